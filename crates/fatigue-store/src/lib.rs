//! Durable snapshot storage for the fatigue accrual engine.
//!
//! Storage is deliberately dumb: it maps entity id to accumulated seconds
//! plus the instant they were written, is read once at startup and is
//! rewritten wholesale on every save. All time correction happens in the
//! engine.
//!
//! # Modules
//!
//! - [`entry`] -- Raw and resolved entry shapes, per-entry parsing
//! - [`json_file`] -- [`JsonFileStore`], the on-disk data file
//! - [`memory`] -- [`MemoryStore`], for tests and embedding
//! - [`error`] -- Shared error types

pub mod entry;
pub mod error;
pub mod json_file;
pub mod memory;

// Re-export primary types for convenience.
pub use entry::{ResolvedEntry, Snapshot, StoredEntry, StoredTimestamp};
pub use error::{EntryError, StoreError};
pub use json_file::JsonFileStore;
pub use memory::MemoryStore;

/// A durable key/value store of per-entity snapshots.
pub trait PersistenceStore {
    /// Read every stored entry without interpreting it.
    ///
    /// Entries are returned raw so that one malformed entry cannot fail
    /// the whole load; see [`StoredEntry::resolve`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] only when the store as a whole is unreadable.
    fn load(&self) -> Result<Vec<StoredEntry>, StoreError>;

    /// Replace the stored contents with `snapshot`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails. The previous contents
    /// must remain readable in that case.
    fn save(&mut self, snapshot: &Snapshot) -> Result<(), StoreError>;
}
