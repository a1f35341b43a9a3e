// ============================================================================
// Persistence adapter — write-through store, JSON export / import
// ============================================================================

use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::board::BoardElement;

/// Error type for board persistence operations.
#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Serialize(String),
    InvalidDocument(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "I/O error: {}", e),
            StoreError::Serialize(e) => write!(f, "Serialization error: {}", e),
            StoreError::InvalidDocument(e) => write!(f, "Invalid board document: {}", e),
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialize(e.to_string())
    }
}

/// Durable-storage port for the board state. The GUI injects a [`FileStore`];
/// tests inject a [`MemoryStore`].
pub trait StatePort: Send {
    /// Load the persisted collection. Implementations resolve every failure
    /// to the empty default (logging it) — a broken store file must never
    /// block startup.
    fn load(&self) -> Vec<BoardElement>;

    /// Persist the full collection. Called on every mutation (write-through).
    fn save(&self, elements: &[BoardElement]) -> Result<(), StoreError>;
}

// ----------------------------------------------------------------------------
// File-backed store
// ----------------------------------------------------------------------------

/// JSON document at a fixed path under the platform data directory. Multiple
/// running instances race on it last-writer-wins.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// `<data dir>/Moodboard/board_state.json`
    pub fn default_path() -> PathBuf {
        crate::logger::data_dir()
            .join("Moodboard")
            .join("board_state.json")
    }

    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl Default for FileStore {
    fn default() -> Self {
        Self::new(Self::default_path())
    }
}

impl StatePort for FileStore {
    fn load(&self) -> Vec<BoardElement> {
        let json = match fs::read_to_string(&self.path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                crate::log_warn!("store: could not read {}: {}", self.path.display(), e);
                return Vec::new();
            }
        };
        match serde_json::from_str::<Vec<BoardElement>>(&json) {
            Ok(elements) => elements,
            Err(e) => {
                // Malformed persisted state: keep the default, don't crash
                crate::log_warn!("store: malformed board state ({}), starting empty", e);
                Vec::new()
            }
        }
    }

    fn save(&self, elements: &[BoardElement]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string(elements)?;
        fs::write(&self.path, json)?;
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// In-memory store — injectable fake for tests
// ----------------------------------------------------------------------------

/// Keeps the last-saved collection in memory. `saved_handle()` exposes it so
/// tests can assert on what each mutation wrote through.
#[derive(Default)]
pub struct MemoryStore {
    saved: Arc<Mutex<Vec<BoardElement>>>,
}

impl MemoryStore {
    pub fn saved_handle(&self) -> Arc<Mutex<Vec<BoardElement>>> {
        Arc::clone(&self.saved)
    }
}

impl StatePort for MemoryStore {
    fn load(&self) -> Vec<BoardElement> {
        self.saved.lock().map(|v| v.clone()).unwrap_or_default()
    }

    fn save(&self, elements: &[BoardElement]) -> Result<(), StoreError> {
        if let Ok(mut saved) = self.saved.lock() {
            *saved = elements.to_vec();
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Export / import — the user-facing board document
// ----------------------------------------------------------------------------

/// Serialize the collection to the exportable JSON document. Independent of
/// the write-through copy (pretty-printed for hand editing).
pub fn export_document(elements: &[BoardElement]) -> Result<String, StoreError> {
    Ok(serde_json::to_string_pretty(elements)?)
}

/// Parse and validate a user-supplied board document.
///
/// Validation is all-or-nothing: every element must carry a non-empty `id`
/// and a non-empty `src`, and ids must be unique. On any failure the whole
/// import is rejected so the caller keeps its prior state untouched.
pub fn import_document(json: &str) -> Result<Vec<BoardElement>, StoreError> {
    let elements: Vec<BoardElement> = serde_json::from_str(json)?;

    let mut seen: Vec<&str> = Vec::with_capacity(elements.len());
    for (idx, el) in elements.iter().enumerate() {
        if el.id.is_empty() {
            return Err(StoreError::InvalidDocument(format!(
                "element #{} has an empty id",
                idx
            )));
        }
        if el.src.is_empty() {
            return Err(StoreError::InvalidDocument(format!(
                "element #{} ({}) has an empty src",
                idx, el.id
            )));
        }
        if seen.contains(&el.id.as_str()) {
            return Err(StoreError::InvalidDocument(format!(
                "duplicate element id {}",
                el.id
            )));
        }
        seen.push(&el.id);
    }
    Ok(elements)
}

/// Default export file name, e.g. `canvas-state-2026-08-23.json`.
pub fn export_file_name(prefix: &str, ext: &str) -> String {
    format!("{}-{}.{}", prefix, date_stamp(), ext)
}

/// Current civil date (UTC) as `YYYY-MM-DD`, computed from the unix clock.
/// Hand-rolled days-to-civil conversion — this crate carries no date/time
/// dependency.
fn date_stamp() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let (y, m, d) = civil_from_days((secs / 86400) as i64);
    format!("{:04}-{:02}-{:02}", y, m, d)
}

/// Days-since-epoch → (year, month, day), proleptic Gregorian.
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    (if m <= 2 { y + 1 } else { y }, m, d)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::BoardElement;

    fn sample_elements() -> Vec<BoardElement> {
        let mut a = BoardElement::new("data:image/png;base64,AAAA", 100.0, 100.0, 220.0, 160.0);
        a.rotation = 450.0;
        let mut b = BoardElement::new("https://example.com/shoe.jpg", 320.0, 100.0, 180.0, 180.0);
        b.selected = true;
        vec![a, b]
    }

    #[test]
    fn export_import_round_trip() {
        let original = sample_elements();
        let doc = export_document(&original).unwrap();
        let restored = import_document(&doc).unwrap();
        assert_eq!(restored, original);
    }

    #[test]
    fn import_rejects_malformed_json() {
        assert!(matches!(
            import_document("{not json"),
            Err(StoreError::Serialize(_))
        ));
    }

    #[test]
    fn import_rejects_missing_src_wholesale() {
        let mut elements = sample_elements();
        elements[1].src = String::new();
        let doc = export_document(&elements).unwrap();
        // One bad element poisons the whole document.
        assert!(matches!(
            import_document(&doc),
            Err(StoreError::InvalidDocument(_))
        ));
    }

    #[test]
    fn import_rejects_empty_id_and_duplicates() {
        let mut elements = sample_elements();
        elements[0].id = String::new();
        let doc = export_document(&elements).unwrap();
        assert!(matches!(
            import_document(&doc),
            Err(StoreError::InvalidDocument(_))
        ));

        let mut elements = sample_elements();
        elements[1].id = elements[0].id.clone();
        let doc = export_document(&elements).unwrap();
        assert!(matches!(
            import_document(&doc),
            Err(StoreError::InvalidDocument(_))
        ));
    }

    #[test]
    fn file_store_round_trips_and_survives_corruption() {
        let path = std::env::temp_dir().join(format!("moodboard-test-{}.json", uuid::Uuid::new_v4()));
        let store = FileStore::new(path.clone());

        let elements = sample_elements();
        store.save(&elements).unwrap();
        assert_eq!(store.load(), elements);

        // Corrupt the file on disk: load falls back to the empty default.
        std::fs::write(&path, "][").unwrap();
        assert!(store.load().is_empty());

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn file_store_missing_file_is_empty() {
        let path = std::env::temp_dir().join(format!("moodboard-test-{}.json", uuid::Uuid::new_v4()));
        assert!(FileStore::new(path).load().is_empty());
    }

    #[test]
    fn export_names_carry_a_civil_date() {
        let name = export_file_name("canvas-state", "json");
        // canvas-state-YYYY-MM-DD.json
        assert!(name.starts_with("canvas-state-"));
        assert!(name.ends_with(".json"));
        assert_eq!(name.len(), "canvas-state-".len() + 10 + ".json".len());
    }

    #[test]
    fn civil_from_days_known_dates() {
        assert_eq!(civil_from_days(0), (1970, 1, 1));
        assert_eq!(civil_from_days(19_723), (2024, 1, 1));
    }
}
