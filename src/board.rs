// ============================================================================
// Board state store — single source of truth for the placed elements
// ============================================================================

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::persist::StatePort;

/// One placed image on the board.
///
/// `src` is the image reference the element was created from: a
/// `data:image/...;base64,` URI, an `http(s)://` URL, or a local file path.
/// Rendering resolves it to pixels lazily (see `render.rs`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoardElement {
    /// Opaque unique id, minted at creation time.
    pub id: String,
    pub src: String,
    /// Top-left corner in board-local pixel coordinates.
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Degrees. Accumulates without wrapping — the rendered orientation is
    /// `rotation mod 360`.
    #[serde(default)]
    pub rotation: f32,
    /// At most one element on the board is selected at any time.
    #[serde(default)]
    pub selected: bool,
}

impl BoardElement {
    pub fn new(src: impl Into<String>, x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            src: src.into(),
            x,
            y,
            width,
            height,
            rotation: 0.0,
            selected: false,
        }
    }

    /// Rotation normalised to [0, 360) for rendering.
    pub fn display_rotation(&self) -> f32 {
        self.rotation.rem_euclid(360.0)
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Hit test in board coordinates, honouring rotation: the point is
    /// rotated back around the element center, then tested against the
    /// axis-aligned rect.
    pub fn contains(&self, px: f32, py: f32) -> bool {
        let (cx, cy) = self.center();
        let rad = -self.rotation.to_radians();
        let (sin, cos) = rad.sin_cos();
        let dx = px - cx;
        let dy = py - cy;
        let ux = cx + dx * cos - dy * sin;
        let uy = cy + dx * sin + dy * cos;
        ux >= self.x && ux <= self.x + self.width && uy >= self.y && uy <= self.y + self.height
    }
}

/// Partial field update for `BoardState::update`. Unset fields are left
/// untouched.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ElementPatch {
    pub x: Option<f32>,
    pub y: Option<f32>,
    pub width: Option<f32>,
    pub height: Option<f32>,
    pub rotation: Option<f32>,
}

impl ElementPatch {
    pub fn position(x: f32, y: f32) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            ..Default::default()
        }
    }

    pub fn size(width: f32, height: f32) -> Self {
        Self {
            width: Some(width),
            height: Some(height),
            ..Default::default()
        }
    }

    pub fn rotation(rotation: f32) -> Self {
        Self {
            rotation: Some(rotation),
            ..Default::default()
        }
    }
}

/// Ordered element collection with write-through persistence.
///
/// Every mutation hands the full collection to the injected [`StatePort`]
/// immediately (no batching). A failed write is logged and the in-memory
/// state stays authoritative — the next successful write carries the full
/// state anyway.
pub struct BoardState {
    elements: Vec<BoardElement>,
    store: Box<dyn StatePort>,
}

impl BoardState {
    /// Create a store backed by `port`, seeded with whatever the port holds.
    /// A port that fails to load (missing file, malformed JSON) yields the
    /// empty default; the failure is the port's to log.
    pub fn new(store: Box<dyn StatePort>) -> Self {
        let mut elements = store.load();
        enforce_exclusive_selection(&mut elements);
        Self { elements, store }
    }

    pub fn elements(&self) -> &[BoardElement] {
        &self.elements
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&BoardElement> {
        self.elements.iter().find(|e| e.id == id)
    }

    /// The selected element, if any. The selection invariant guarantees
    /// there is at most one.
    pub fn selected(&self) -> Option<&BoardElement> {
        self.elements.iter().find(|e| e.selected)
    }

    /// Append an element. No dedup by `src` — the same image may appear any
    /// number of times. A duplicate `id` is refused (ids are minted at
    /// creation, so this only catches buggy callers and hand-edited imports).
    pub fn add(&mut self, element: BoardElement) {
        if self.elements.iter().any(|e| e.id == element.id) {
            crate::log_warn!("board: ignoring add with duplicate id {}", element.id);
            return;
        }
        self.elements.push(element);
        self.persist();
    }

    /// Merge `patch` into the element with `id`. No-op if the id is absent.
    pub fn update(&mut self, id: &str, patch: ElementPatch) {
        let Some(el) = self.elements.iter_mut().find(|e| e.id == id) else {
            return;
        };
        if let Some(x) = patch.x {
            el.x = x;
        }
        if let Some(y) = patch.y {
            el.y = y;
        }
        if let Some(w) = patch.width {
            el.width = w;
        }
        if let Some(h) = patch.height {
            el.height = h;
        }
        if let Some(r) = patch.rotation {
            el.rotation = r;
        }
        self.persist();
    }

    /// Remove the element with `id`. If it was selected, the selection goes
    /// with it. No-op on an unknown id (nothing is persisted either).
    pub fn remove(&mut self, id: &str) {
        let before = self.elements.len();
        self.elements.retain(|e| e.id != id);
        if self.elements.len() != before {
            self.persist();
        }
    }

    /// Exclusive selection: `Some(id)` selects exactly that element and
    /// deselects every other; `None` clears all selection. Selecting an
    /// unknown id behaves like `None`.
    pub fn select(&mut self, id: Option<&str>) {
        for el in &mut self.elements {
            el.selected = id.is_some_and(|id| el.id == id);
        }
        self.persist();
    }

    /// Empty the board.
    pub fn clear(&mut self) {
        self.elements.clear();
        self.persist();
    }

    /// Atomically replace the whole collection (validated import). The caller
    /// is responsible for having run the import validation first. Selection is
    /// normalised: a document carrying several selected elements keeps only
    /// the first.
    pub fn replace_all(&mut self, elements: Vec<BoardElement>) {
        self.elements = elements;
        enforce_exclusive_selection(&mut self.elements);
        self.persist();
    }

    fn persist(&self) {
        if let Err(e) = self.store.save(&self.elements) {
            crate::log_warn!("board: write-through persist failed: {}", e);
        }
    }
}

/// Repair the exclusive-selection invariant on externally supplied
/// collections (imports, persisted files edited by hand): the first selected
/// element keeps its selection, every later one is cleared.
fn enforce_exclusive_selection(elements: &mut [BoardElement]) {
    let mut seen = false;
    for el in elements.iter_mut().filter(|e| e.selected) {
        if seen {
            el.selected = false;
        }
        seen = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::MemoryStore;

    fn state() -> BoardState {
        BoardState::new(Box::new(MemoryStore::default()))
    }

    fn element(src: &str) -> BoardElement {
        BoardElement::new(src, 10.0, 20.0, 200.0, 150.0)
    }

    #[test]
    fn ids_are_unique_across_mutation_sequences() {
        let mut s = state();
        for i in 0..8 {
            s.add(element(&format!("file-{i}.png")));
        }
        let dup_id = s.elements()[2].id.clone();
        s.remove(&s.elements()[0].id.clone());
        let mut dup = element("dup.png");
        dup.id = dup_id;
        s.add(dup); // refused
        s.update(&s.elements()[0].id.clone(), ElementPatch::position(0.0, 0.0));

        let mut ids: Vec<&str> = s.elements().iter().map(|e| e.id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), s.len());
    }

    #[test]
    fn selection_is_exclusive() {
        let mut s = state();
        s.add(element("a.png"));
        s.add(element("b.png"));
        let (a, b) = (s.elements()[0].id.clone(), s.elements()[1].id.clone());

        s.select(Some(&a));
        assert!(s.get(&a).unwrap().selected);
        assert!(!s.get(&b).unwrap().selected);

        s.select(Some(&b));
        assert!(!s.get(&a).unwrap().selected);
        assert!(s.get(&b).unwrap().selected);
        assert_eq!(s.elements().iter().filter(|e| e.selected).count(), 1);

        s.select(None);
        assert!(s.elements().iter().all(|e| !e.selected));
    }

    #[test]
    fn remove_takes_selection_with_it() {
        let mut s = state();
        s.add(element("a.png"));
        let id = s.elements()[0].id.clone();
        s.select(Some(&id));
        s.remove(&id);
        assert!(s.is_empty());
        assert!(s.selected().is_none());
    }

    #[test]
    fn update_unknown_id_is_noop() {
        let mut s = state();
        s.add(element("a.png"));
        let snapshot = s.elements().to_vec();
        s.update("no-such-id", ElementPatch::position(99.0, 99.0));
        assert_eq!(s.elements(), snapshot.as_slice());
    }

    #[test]
    fn every_mutation_writes_through() {
        let store = MemoryStore::default();
        let saved = store.saved_handle();
        let mut s = BoardState::new(Box::new(store));

        s.add(element("a.png"));
        assert_eq!(saved.lock().unwrap().len(), 1);

        let id = s.elements()[0].id.clone();
        s.update(&id, ElementPatch::rotation(90.0));
        assert_eq!(saved.lock().unwrap()[0].rotation, 90.0);

        s.select(Some(&id));
        assert!(saved.lock().unwrap()[0].selected);

        s.clear();
        assert!(saved.lock().unwrap().is_empty());
    }

    #[test]
    fn state_is_seeded_from_the_port() {
        let store = MemoryStore::default();
        store
            .saved_handle()
            .lock()
            .unwrap()
            .push(element("seed.png"));
        let s = BoardState::new(Box::new(store));
        assert_eq!(s.len(), 1);
        assert_eq!(s.elements()[0].src, "seed.png");
    }

    #[test]
    fn replace_all_normalises_multiple_selected_to_one() {
        // A hand-edited document can pass import validation with several
        // selected elements; installing it must restore exclusivity.
        let mut a = element("a.png");
        a.selected = true;
        let mut b = element("b.png");
        b.selected = true;
        let (a_id, b_id) = (a.id.clone(), b.id.clone());

        let mut s = state();
        s.replace_all(vec![a, b]);

        assert_eq!(s.elements().iter().filter(|e| e.selected).count(), 1);
        assert!(s.get(&a_id).unwrap().selected);
        assert!(!s.get(&b_id).unwrap().selected);
    }

    #[test]
    fn seeding_normalises_multiple_selected_to_one() {
        let store = MemoryStore::default();
        {
            let handle = store.saved_handle();
            let mut saved = handle.lock().unwrap();
            for src in ["a.png", "b.png", "c.png"] {
                let mut el = element(src);
                el.selected = true;
                saved.push(el);
            }
        }
        let s = BoardState::new(Box::new(store));
        assert_eq!(s.elements().iter().filter(|e| e.selected).count(), 1);
        assert!(s.elements()[0].selected);
    }

    #[test]
    fn rotated_hit_test() {
        let mut el = BoardElement::new("a.png", 0.0, 0.0, 100.0, 40.0);
        // Unrotated: corner inside, far point outside.
        assert!(el.contains(5.0, 5.0));
        assert!(!el.contains(5.0, 60.0));

        // 90° about the center (50, 20): the rect now spans x 30..70, y -30..70.
        el.rotation = 90.0;
        assert!(el.contains(50.0, -25.0));
        assert!(!el.contains(5.0, 5.0));
    }

    #[test]
    fn display_rotation_wraps_unbounded_accumulation() {
        let mut el = BoardElement::new("a.png", 0.0, 0.0, 10.0, 10.0);
        for _ in 0..4 {
            el.rotation += 90.0;
        }
        assert_eq!(el.rotation, 360.0);
        assert_eq!(el.display_rotation(), 0.0);
        el.rotation = -90.0;
        assert_eq!(el.display_rotation(), 270.0);
    }
}
