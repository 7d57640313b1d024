//! Persisted entry shapes and per-entry parsing.
//!
//! The data file is keyed by entity id:
//!
//! ```json
//! {
//!   "76561198000000001": { "SecondsActive": 3712.5, "Timestamp": "2026-03-01T12:00:00.000Z" }
//! }
//! ```
//!
//! Loading never trusts an entry wholesale. Each raw [`StoredEntry`] is
//! resolved on its own via [`StoredEntry::resolve`], so one corrupt entry
//! fails only itself.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use fatigue_types::EntityId;
use serde::{Serialize, Serializer};

use crate::error::EntryError;

/// Format used for timestamps written without an explicit offset.
const NAIVE_ROUND_TRIP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// A timestamp as found in storage, before interpretation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredTimestamp {
    /// A native datetime value (stores that keep typed instants).
    Native(DateTime<Utc>),
    /// An ISO-8601 round-trip string.
    Text(String),
    /// Some other representation, named by its kind.
    Unsupported(&'static str),
}

/// One raw entry read from storage.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntry {
    /// The key, not yet validated as an [`EntityId`].
    pub id: String,
    /// `SecondsActive`, if present and numeric.
    pub seconds_active: Option<f64>,
    /// `Timestamp` in whatever form it was stored.
    pub timestamp: StoredTimestamp,
}

/// A fully parsed persisted entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedEntry {
    /// The entity.
    pub id: EntityId,
    /// Accumulated active seconds at `timestamp`.
    pub seconds_active: f64,
    /// When the value was written.
    pub timestamp: DateTime<Utc>,
}

impl StoredEntry {
    /// Build an entry carrying a native timestamp.
    pub fn native(id: impl Into<String>, seconds_active: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            seconds_active: Some(seconds_active),
            timestamp: StoredTimestamp::Native(timestamp),
        }
    }

    /// Parse this entry.
    ///
    /// # Errors
    ///
    /// Returns an [`EntryError`] describing the first problem found. The
    /// caller is expected to log it and continue with sibling entries.
    pub fn resolve(&self) -> Result<ResolvedEntry, EntryError> {
        let id = EntityId::new(&self.id).map_err(|source| EntryError::InvalidId {
            raw: self.id.clone(),
            source,
        })?;
        let seconds_active = self
            .seconds_active
            .filter(|s| s.is_finite())
            .ok_or_else(|| EntryError::MissingSeconds {
                id: self.id.clone(),
            })?;
        let timestamp = match &self.timestamp {
            StoredTimestamp::Native(at) => *at,
            StoredTimestamp::Text(raw) => parse_round_trip(&self.id, raw)?,
            StoredTimestamp::Unsupported(kind) => {
                return Err(EntryError::UnsupportedTimestamp {
                    id: self.id.clone(),
                    kind,
                });
            }
        };
        Ok(ResolvedEntry {
            id,
            seconds_active,
            timestamp,
        })
    }
}

/// Parse an ISO-8601 round-trip string.
///
/// Strings with an offset (`Z`, `+02:00`) are converted to UTC. Strings
/// without one are taken to already be UTC.
fn parse_round_trip(id: &str, raw: &str) -> Result<DateTime<Utc>, EntryError> {
    let trimmed = raw.trim();
    match DateTime::parse_from_rfc3339(trimmed) {
        Ok(at) => Ok(at.with_timezone(&Utc)),
        Err(offset_err) => NaiveDateTime::parse_from_str(trimmed, NAIVE_ROUND_TRIP_FORMAT)
            .map(|naive| naive.and_utc())
            .map_err(|_naive_err| EntryError::InvalidTimestamp {
                id: id.to_owned(),
                value: raw.to_owned(),
                source: offset_err,
            }),
    }
}

/// Everything written by one save: a single instant and the value of every
/// live record at that instant.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// The instant all values were computed for.
    pub taken_at: DateTime<Utc>,
    /// Accumulated active seconds per entity, already clamped.
    pub entries: Vec<(EntityId, f64)>,
}

impl Snapshot {
    /// Convert into the raw entries a store would hand back on load.
    pub fn to_stored(&self) -> Vec<StoredEntry> {
        self.entries
            .iter()
            .map(|(id, seconds)| StoredEntry::native(id.as_str(), *seconds, self.taken_at))
            .collect()
    }
}

/// Wire shape of a single entry in the data file.
#[derive(Debug, Serialize)]
pub(crate) struct SavedEntry {
    #[serde(rename = "SecondsActive")]
    pub seconds_active: f64,
    #[serde(rename = "Timestamp", serialize_with = "serialize_round_trip")]
    pub timestamp: DateTime<Utc>,
}

/// Write `2026-03-01T12:00:00.000Z`: millisecond precision, `Z` suffix.
fn serialize_round_trip<S: Serializer>(at: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&at.to_rfc3339_opts(SecondsFormat::Millis, true))
}
