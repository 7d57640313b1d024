//! JSON data file store.
//!
//! The whole file is rewritten on every save. The new contents go to a
//! uniquely named temp file in the same directory, are synced to disk and
//! then renamed over the old one, so a crash mid-write leaves the previous
//! snapshot intact. A temp file whose rename fails is removed.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tempfile::NamedTempFile;

use crate::entry::{SavedEntry, Snapshot, StoredEntry, StoredTimestamp};
use crate::error::StoreError;
use crate::PersistenceStore;

/// A [`PersistenceStore`] backed by a single JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Create a store for the file at `path`. Nothing is touched on disk
    /// until the first load or save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The data file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory holding the data file; the temp file must live there too
    /// for the rename to stay on one filesystem.
    fn dir(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }

    fn io_error(path: &Path, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl PersistenceStore for JsonFileStore {
    fn load(&self) -> Result<Vec<StoredEntry>, StoreError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "Data file not found, starting empty");
                return Ok(Vec::new());
            }
            Err(e) => return Err(Self::io_error(&self.path, e)),
        };
        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }

        let root: Value = serde_json::from_str(&contents)?;
        let map = match root {
            Value::Object(map) => map,
            other => {
                return Err(StoreError::Malformed(format!(
                    "expected an object keyed by entity id, found {}",
                    kind_of(&other)
                )));
            }
        };

        let entries: Vec<StoredEntry> = map.into_iter().map(|(id, v)| raw_entry(id, &v)).collect();
        tracing::debug!(
            path = %self.path.display(),
            entries = entries.len(),
            "Read data file"
        );
        Ok(entries)
    }

    fn save(&mut self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let body: BTreeMap<&str, SavedEntry> = snapshot
            .entries
            .iter()
            .map(|(id, seconds)| {
                (
                    id.as_str(),
                    SavedEntry {
                        seconds_active: *seconds,
                        timestamp: snapshot.taken_at,
                    },
                )
            })
            .collect();
        let json = serde_json::to_string_pretty(&body)?;

        let dir = self.dir();
        std::fs::create_dir_all(dir).map_err(|e| Self::io_error(dir, e))?;

        let mut temp = NamedTempFile::new_in(dir).map_err(|e| Self::io_error(dir, e))?;
        temp.write_all(json.as_bytes())
            .and_then(|()| temp.as_file().sync_all())
            .map_err(|e| Self::io_error(temp.path(), e))?;
        // On failure the temp file is handed back and removed when dropped.
        temp.persist(&self.path)
            .map_err(|e| Self::io_error(&self.path, e.error))?;

        tracing::debug!(
            path = %self.path.display(),
            entries = snapshot.entries.len(),
            "Wrote data file"
        );
        Ok(())
    }
}

/// Pull the two known fields out of one entry without judging them.
fn raw_entry(id: String, value: &Value) -> StoredEntry {
    let seconds_active = value.get("SecondsActive").and_then(Value::as_f64);
    let timestamp = match value.get("Timestamp") {
        Some(Value::String(s)) => StoredTimestamp::Text(s.clone()),
        Some(other) => StoredTimestamp::Unsupported(kind_of(other)),
        None => StoredTimestamp::Unsupported("missing"),
    };
    StoredEntry {
        id,
        seconds_active,
        timestamp,
    }
}

const fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp, clippy::indexing_slicing)]
mod tests {
    use chrono::{DateTime, Utc};
    use fatigue_types::EntityId;

    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("Fatigue.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn save_writes_documented_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("Fatigue.json");
        let mut store = JsonFileStore::new(&path);
        let snapshot = Snapshot {
            taken_at: at("2026-03-01T12:00:00Z"),
            entries: vec![(EntityId::new("p1").unwrap(), 3700.0)],
        };
        store.save(&snapshot).unwrap();

        let raw: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["p1"]["SecondsActive"], 3700.0);
        assert_eq!(raw["p1"]["Timestamp"], "2026-03-01T12:00:00.000Z");
        // Only the data file is left behind.
        let names: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("Fatigue.json")]);
    }

    #[test]
    fn failed_save_keeps_previous_contents_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("Fatigue.json");
        let mut store = JsonFileStore::new(&good);
        store
            .save(&Snapshot {
                taken_at: at("2026-03-01T12:00:00Z"),
                entries: vec![(EntityId::new("p1").unwrap(), 42.0)],
            })
            .unwrap();

        // A non-empty directory in the way makes the final rename fail.
        let blocked = dir.path().join("Blocked.json");
        std::fs::create_dir(&blocked).unwrap();
        std::fs::write(blocked.join("keep"), "x").unwrap();
        let mut broken = JsonFileStore::new(&blocked);
        let result = broken.save(&Snapshot {
            taken_at: at("2026-03-01T13:00:00Z"),
            entries: vec![(EntityId::new("p1").unwrap(), 7.0)],
        });
        assert!(matches!(result, Err(StoreError::Io { .. })));

        let mut names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                std::ffi::OsString::from("Blocked.json"),
                std::ffi::OsString::from("Fatigue.json"),
            ]
        );
        assert!(blocked.join("keep").exists());

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].seconds_active, Some(42.0));
    }

    #[test]
    fn save_replaces_previous_contents() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonFileStore::new(dir.path().join("Fatigue.json"));
        let first = Snapshot {
            taken_at: at("2026-03-01T12:00:00Z"),
            entries: vec![
                (EntityId::new("p1").unwrap(), 10.0),
                (EntityId::new("p2").unwrap(), 20.0),
            ],
        };
        store.save(&first).unwrap();
        let second = Snapshot {
            taken_at: at("2026-03-01T13:00:00Z"),
            entries: vec![(EntityId::new("p2").unwrap(), 5.0)],
        };
        store.save(&second).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "p2");
        assert_eq!(loaded[0].seconds_active, Some(5.0));
    }

    #[test]
    fn odd_entries_are_surfaced_not_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Fatigue.json");
        std::fs::write(
            &path,
            r#"{
                "good": { "SecondsActive": 10.0, "Timestamp": "2026-03-01T12:00:00.000Z" },
                "numeric": { "SecondsActive": 10.0, "Timestamp": 1767225600 },
                "bare": { "SecondsActive": "lots" }
            }"#,
        )
        .unwrap();
        let mut loaded = JsonFileStore::new(&path).load().unwrap();
        loaded.sort_by(|a, b| a.id.cmp(&b.id));

        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[0].id, "bare");
        assert_eq!(loaded[0].seconds_active, None);
        assert_eq!(loaded[0].timestamp, StoredTimestamp::Unsupported("missing"));
        assert_eq!(loaded[2].id, "numeric");
        assert_eq!(loaded[2].timestamp, StoredTimestamp::Unsupported("number"));
        assert!(loaded[1].resolve().is_ok());
    }

    #[test]
    fn non_object_root_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Fatigue.json");
        std::fs::write(&path, "[1, 2, 3]").unwrap();
        assert!(matches!(
            JsonFileStore::new(&path).load(),
            Err(StoreError::Malformed(_))
        ));
    }
}
