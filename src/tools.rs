// ============================================================================
// Interaction controller — pointer state machine over the active tool
// ============================================================================

use crate::board::{BoardState, ElementPatch};

/// Multiplicative factor applied by the toolbar enlarge button.
pub const SCALE_UP_FACTOR: f32 = 1.1;
/// Multiplicative factor applied by the toolbar shrink button.
pub const SCALE_DOWN_FACTOR: f32 = 0.9;
/// Degrees added per rotate-button click. The stored value accumulates
/// without wrapping.
pub const ROTATE_STEP: f32 = 90.0;
/// Minimum edge length enforced by drag-resize (button resize has no floor).
pub const MIN_DRAG_SIZE: f32 = 50.0;

/// Grid layout for multi-file drops: 3 columns, 220 px cells, origin (100,100).
pub const DROP_GRID_ORIGIN: (f32, f32) = (100.0, 100.0);
pub const DROP_GRID_COLUMNS: usize = 3;
pub const DROP_GRID_SPACING: f32 = 220.0;

/// Active tool. With no tool active, pointer drags behave like `Move`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tool {
    Move,
    Resize,
}

/// In-progress pointer drag.
#[derive(Clone, Debug)]
enum Drag {
    /// Repositioning: the element follows `pointer - offset`.
    Move { id: String, offset: (f32, f32) },
    /// Corner drag-resize: aspect-locked, 50 px floor on both axes.
    Resize { id: String, aspect: f32 },
}

/// Translates pointer events into board mutations.
///
/// All positions are board-local pixels. The caller (GUI or test) is
/// responsible for delivering `pointer_up` on release wherever the pointer
/// is — including outside the canvas — so a drag can never get stuck.
#[derive(Default)]
pub struct InteractionController {
    active_tool: Option<Tool>,
    drag: Option<Drag>,
}

impl InteractionController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_tool(&self) -> Option<Tool> {
        self.active_tool
    }

    /// Toolbar toggle: clicking the active tool deactivates it.
    pub fn toggle_tool(&mut self, tool: Tool) {
        self.active_tool = if self.active_tool == Some(tool) {
            None
        } else {
            Some(tool)
        };
    }

    pub fn is_dragging(&self) -> bool {
        self.drag.is_some()
    }

    /// Pointer pressed at `pos`. Hit-tests the board (selected element first —
    /// it renders on top — then reverse insertion order), updates the
    /// selection, and arms a drag according to the active tool.
    pub fn pointer_down(&mut self, state: &mut BoardState, pos: (f32, f32)) {
        let Some(hit) = hit_test(state, pos) else {
            // Empty canvas: clear selection, no drag.
            state.select(None);
            self.drag = None;
            return;
        };

        let el = state.get(&hit).cloned();
        state.select(Some(&hit));

        let Some(el) = el else { return };
        self.drag = match self.active_tool {
            // Unset tool behaves like Move.
            None | Some(Tool::Move) => Some(Drag::Move {
                id: hit,
                offset: (pos.0 - el.x, pos.1 - el.y),
            }),
            Some(Tool::Resize) => Some(Drag::Resize {
                id: hit,
                aspect: if el.height > 0.0 {
                    el.width / el.height
                } else {
                    1.0
                },
            }),
        };
    }

    /// Pointer moved to `pos` while pressed.
    pub fn pointer_move(&mut self, state: &mut BoardState, pos: (f32, f32)) {
        match &self.drag {
            Some(Drag::Move { id, offset }) => {
                // No bounds clamping: elements may be dragged off-canvas.
                state.update(id, ElementPatch::position(pos.0 - offset.0, pos.1 - offset.1));
            }
            Some(Drag::Resize { id, aspect }) => {
                let Some(el) = state.get(id) else { return };
                let (w, h) = aspect_clamped_size(pos.0 - el.x, *aspect);
                state.update(id, ElementPatch::size(w, h));
            }
            None => {}
        }
    }

    /// Pointer released — ends any drag. Safe to call redundantly.
    pub fn pointer_up(&mut self) {
        self.drag = None;
    }

    /// Enlarge the selected element by ×1.1 about its top-left corner.
    /// No-op without a selection. No minimum or maximum is enforced.
    pub fn enlarge_selected(&self, state: &mut BoardState) {
        self.scale_selected(state, SCALE_UP_FACTOR);
    }

    /// Shrink the selected element by ×0.9 about its top-left corner.
    pub fn shrink_selected(&self, state: &mut BoardState) {
        self.scale_selected(state, SCALE_DOWN_FACTOR);
    }

    fn scale_selected(&self, state: &mut BoardState, factor: f32) {
        let Some(el) = state.selected() else { return };
        let (id, w, h) = (el.id.clone(), el.width * factor, el.height * factor);
        state.update(&id, ElementPatch::size(w, h));
    }

    /// Rotate the selected element by +90°. The stored angle accumulates past
    /// 360; rendering wraps it.
    pub fn rotate_selected(&self, state: &mut BoardState) {
        let Some(el) = state.selected() else { return };
        let (id, rotation) = (el.id.clone(), el.rotation + ROTATE_STEP);
        state.update(&id, ElementPatch::rotation(rotation));
    }
}

/// Topmost element under `pos`: the selected element draws above everything,
/// then later insertions above earlier ones.
fn hit_test(state: &BoardState, pos: (f32, f32)) -> Option<String> {
    if let Some(sel) = state.selected()
        && sel.contains(pos.0, pos.1)
    {
        return Some(sel.id.clone());
    }
    state
        .elements()
        .iter()
        .rev()
        .find(|e| e.contains(pos.0, pos.1))
        .map(|e| e.id.clone())
}

/// Aspect-locked size from a dragged width, with the 50 px floor applied to
/// both axes.
fn aspect_clamped_size(target_w: f32, aspect: f32) -> (f32, f32) {
    let mut w = target_w.max(MIN_DRAG_SIZE);
    let mut h = w / aspect.max(f32::EPSILON);
    if h < MIN_DRAG_SIZE {
        h = MIN_DRAG_SIZE;
        w = h * aspect;
    }
    (w, h)
}

/// Board position for the `index`-th element of a drop batch. Slots are
/// assigned at request time so completion order of the background decodes
/// cannot change the layout.
pub fn drop_grid_slot(index: usize) -> (f32, f32) {
    let col = index % DROP_GRID_COLUMNS;
    let row = index / DROP_GRID_COLUMNS;
    (
        DROP_GRID_ORIGIN.0 + col as f32 * DROP_GRID_SPACING,
        DROP_GRID_ORIGIN.1 + row as f32 * DROP_GRID_SPACING,
    )
}

/// Filter for dropped / picked files: accept only the image formats the
/// renderer decodes (PNG, JPEG, WebP, BMP).
pub fn is_image_file(name: &str) -> bool {
    let ext = name.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    matches!(ext.as_str(), "png" | "jpg" | "jpeg" | "webp" | "bmp")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{BoardElement, BoardState};
    use crate::persist::MemoryStore;

    fn state_with(elements: Vec<BoardElement>) -> BoardState {
        let mut s = BoardState::new(Box::new(MemoryStore::default()));
        for el in elements {
            s.add(el);
        }
        s
    }

    fn el(x: f32, y: f32, w: f32, h: f32) -> BoardElement {
        BoardElement::new("img.png", x, y, w, h)
    }

    #[test]
    fn drag_moves_by_pointer_offset_without_clamping() {
        let mut s = state_with(vec![el(100.0, 100.0, 200.0, 150.0)]);
        let mut c = InteractionController::new();

        // Grab 30,40 inside the element and drag far off-canvas.
        c.pointer_down(&mut s, (130.0, 140.0));
        assert!(c.is_dragging());
        assert!(s.elements()[0].selected);

        c.pointer_move(&mut s, (-500.0, 20.0));
        let e = &s.elements()[0];
        assert_eq!((e.x, e.y), (-530.0, -20.0));

        c.pointer_up();
        assert!(!c.is_dragging());
        // Moves after release do nothing.
        c.pointer_move(&mut s, (0.0, 0.0));
        assert_eq!(s.elements()[0].x, -530.0);
    }

    #[test]
    fn pointer_down_on_empty_space_clears_selection() {
        let mut s = state_with(vec![el(100.0, 100.0, 50.0, 50.0)]);
        let id = s.elements()[0].id.clone();
        s.select(Some(&id));

        let mut c = InteractionController::new();
        c.pointer_down(&mut s, (500.0, 500.0));
        assert!(s.selected().is_none());
        assert!(!c.is_dragging());
    }

    #[test]
    fn topmost_element_wins_the_hit_test() {
        // Two overlapping elements: the later insertion is on top.
        let mut s = state_with(vec![el(0.0, 0.0, 100.0, 100.0), el(50.0, 50.0, 100.0, 100.0)]);
        let (bottom, top) = (s.elements()[0].id.clone(), s.elements()[1].id.clone());

        let mut c = InteractionController::new();
        c.pointer_down(&mut s, (75.0, 75.0));
        assert_eq!(s.selected().unwrap().id, top);

        // A selected element renders above later insertions, so it also
        // grabs the pointer first.
        s.select(Some(&bottom));
        c.pointer_down(&mut s, (75.0, 75.0));
        assert_eq!(s.selected().unwrap().id, bottom);
    }

    #[test]
    fn button_resize_compounds_rather_than_round_trips() {
        let mut s = state_with(vec![el(10.0, 10.0, 200.0, 100.0)]);
        let id = s.elements()[0].id.clone();
        s.select(Some(&id));

        let c = InteractionController::new();
        c.enlarge_selected(&mut s);
        c.shrink_selected(&mut s);

        // 1.1 × 0.9 = 0.99 — deliberately NOT an identity.
        let e = &s.elements()[0];
        assert!((e.width - 198.0).abs() < 1e-3);
        assert!((e.height - 99.0).abs() < 1e-3);
        // Top-left anchor is untouched.
        assert_eq!((e.x, e.y), (10.0, 10.0));
    }

    #[test]
    fn four_rotations_restore_the_rendered_orientation() {
        let mut s = state_with(vec![el(0.0, 0.0, 100.0, 100.0)]);
        let id = s.elements()[0].id.clone();
        s.select(Some(&id));

        let c = InteractionController::new();
        for _ in 0..4 {
            c.rotate_selected(&mut s);
        }
        let e = &s.elements()[0];
        assert_eq!(e.rotation, 360.0); // stored value is unbounded
        assert_eq!(e.display_rotation(), 0.0);
    }

    #[test]
    fn drag_resize_preserves_aspect_and_enforces_the_floor() {
        let mut s = state_with(vec![el(100.0, 100.0, 200.0, 100.0)]); // aspect 2:1
        let mut c = InteractionController::new();
        c.toggle_tool(Tool::Resize);

        c.pointer_down(&mut s, (150.0, 150.0));
        c.pointer_move(&mut s, (400.0, 150.0)); // width → 300
        let e = &s.elements()[0];
        assert!((e.width - 300.0).abs() < 1e-3);
        assert!((e.height - 150.0).abs() < 1e-3);

        // Collapse attempt: the 50 px floor holds on the short axis, width
        // follows the aspect lock.
        c.pointer_move(&mut s, (101.0, 150.0));
        let e = &s.elements()[0];
        assert!((e.height - MIN_DRAG_SIZE).abs() < 1e-3);
        assert!((e.width - MIN_DRAG_SIZE * 2.0).abs() < 1e-3);
        c.pointer_up();
    }

    #[test]
    fn toggling_the_active_tool_twice_deactivates_it() {
        let mut c = InteractionController::new();
        assert_eq!(c.active_tool(), None);
        c.toggle_tool(Tool::Move);
        assert_eq!(c.active_tool(), Some(Tool::Move));
        c.toggle_tool(Tool::Resize);
        assert_eq!(c.active_tool(), Some(Tool::Resize));
        c.toggle_tool(Tool::Resize);
        assert_eq!(c.active_tool(), None);
    }

    #[test]
    fn drop_grid_positions_for_a_four_file_batch() {
        let slots: Vec<(f32, f32)> = (0..4).map(drop_grid_slot).collect();
        assert_eq!(
            slots,
            vec![
                (100.0, 100.0),
                (320.0, 100.0),
                (540.0, 100.0),
                (100.0, 320.0),
            ]
        );
    }

    #[test]
    fn file_filter_accepts_decodable_images_only() {
        assert!(is_image_file("photo.PNG"));
        assert!(is_image_file("pic.jpeg"));
        assert!(!is_image_file("anim.gif")); // not a decodable format here
        assert!(!is_image_file("notes.txt"));
        assert!(!is_image_file("archive.tar.gz"));
        assert!(!is_image_file("no_extension"));
    }
}
