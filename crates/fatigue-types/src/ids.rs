//! Stable entity identifier.
//!
//! Entities are keyed by an opaque string supplied by the session layer
//! (a platform account id, for example). The id is the key of the
//! in-memory record map and of the persisted data file, so it must be
//! non-empty and free of surrounding whitespace.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

/// Errors produced when an entity id is rejected at the boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The id was empty or contained only whitespace.
    #[error("entity id is blank")]
    Blank,
}

/// Unique identifier for a tracked entity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId(String);

impl EntityId {
    /// Create an identifier from a raw string, trimming surrounding
    /// whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`IdError::Blank`] if nothing remains after trimming.
    pub fn new(raw: impl AsRef<str>) -> Result<Self, IdError> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            return Err(IdError::Blank);
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EntityId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for EntityId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> Self {
        id.0
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_surrounding_whitespace() {
        let id = EntityId::new("  76561198000000001 ");
        assert_eq!(id.map(|i| i.to_string()).ok().as_deref(), Some("76561198000000001"));
    }

    #[test]
    fn blank_ids_are_rejected() {
        assert_eq!(EntityId::new(""), Err(IdError::Blank));
        assert_eq!(EntityId::new("   \t"), Err(IdError::Blank));
    }

    #[test]
    fn serde_rejects_blank_ids() {
        let ok: Result<EntityId, _> = serde_json::from_str("\"abc\"");
        assert!(ok.is_ok());
        let blank: Result<EntityId, _> = serde_json::from_str("\"  \"");
        assert!(blank.is_err());
    }
}
