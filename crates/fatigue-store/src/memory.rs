//! In-memory store.
//!
//! Cloning a [`MemoryStore`] yields another handle onto the same entries,
//! so a test can hand one handle to the engine and keep the other to
//! inspect or seed what was "persisted".

use std::sync::{Arc, Mutex, PoisonError};

use crate::entry::{Snapshot, StoredEntry};
use crate::error::StoreError;
use crate::PersistenceStore;

/// A [`PersistenceStore`] that keeps entries in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<Vec<StoredEntry>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-seeded with raw entries.
    pub fn with_entries(entries: Vec<StoredEntry>) -> Self {
        Self {
            entries: Arc::new(Mutex::new(entries)),
        }
    }

    /// Copy of everything currently stored.
    pub fn entries(&self) -> Vec<StoredEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl PersistenceStore for MemoryStore {
    fn load(&self) -> Result<Vec<StoredEntry>, StoreError> {
        Ok(self.entries())
    }

    fn save(&mut self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let mut guard = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = snapshot.to_stored();
        Ok(())
    }
}
