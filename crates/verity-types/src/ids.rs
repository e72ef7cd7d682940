//! Strongly-typed identifier wrappers to prevent accidental misuse of strings.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::VerityError;

/// Name of the single global audit-trail stream.
pub const AUDIT_STREAM: &str = "audit";

/// Identity of one hash chain. Uses `Arc<str>` internally so cloning is an
/// atomic increment instead of a heap allocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(Arc<str>);

impl StreamId {
    /// Create a stream id, rejecting empty or whitespace-padded names.
    pub fn new(id: impl Into<Arc<str>>) -> Result<Self, VerityError> {
        let id: Arc<str> = id.into();
        if id.is_empty() {
            return Err(VerityError::Validation("stream id must not be empty".into()));
        }
        if id.trim() != &*id {
            return Err(VerityError::Validation(format!(
                "stream id {id:?} has leading or trailing whitespace"
            )));
        }
        Ok(Self(id))
    }

    /// The global audit-trail stream.
    pub fn audit() -> Self {
        Self(Arc::from(AUDIT_STREAM))
    }

    /// Borrow as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StreamId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for StreamId {
    type Error = VerityError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl Serialize for StreamId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for StreamId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        StreamId::new(s).map_err(serde::de::Error::custom)
    }
}

/// Authenticated actor identity, supplied by the caller's auth layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActorId(Arc<str>);

impl ActorId {
    /// Create an actor id, rejecting empty names.
    pub fn new(id: impl Into<Arc<str>>) -> Result<Self, VerityError> {
        let id: Arc<str> = id.into();
        if id.is_empty() {
            return Err(VerityError::Validation("actor id must not be empty".into()));
        }
        Ok(Self(id))
    }

    /// Borrow as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ActorId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<&str> for ActorId {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

impl Serialize for ActorId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ActorId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ActorId::new(s).map_err(serde::de::Error::custom)
    }
}

/// Unique identifier of a committed ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(Uuid);

impl EntryId {
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for EntryId {
    type Err = VerityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| VerityError::Validation(format!("invalid entry id {s:?}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_id_rejects_empty_and_padded() {
        assert!(StreamId::new("").is_err());
        assert!(StreamId::new(" project-a").is_err());
        assert!(StreamId::new("project-a").is_ok());
    }

    #[test]
    fn audit_stream_name() {
        assert_eq!(StreamId::audit().as_str(), "audit");
    }

    #[test]
    fn stream_id_serde_is_plain_string() {
        let id = StreamId::new("project-7").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"project-7\"");
        let back: StreamId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<StreamId>("\"\"").is_err());
    }

    #[test]
    fn entry_id_parses_uuid() {
        let id = EntryId::new_v4();
        let parsed: EntryId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<EntryId>().is_err());
    }
}
