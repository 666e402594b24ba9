//! Identity types for Engram entities

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// ENTITY ID TYPE SYSTEM
// ============================================================================

/// Trait for type-safe entity IDs.
///
/// Each entity type has its own strongly-typed ID so that a `MemoryId` can
/// never be passed where a `CommitId` is expected.
pub trait EngramIdType:
    Copy
    + Clone
    + Eq
    + PartialEq
    + Hash
    + fmt::Debug
    + fmt::Display
    + FromStr
    + Serialize
    + serde::de::DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// The name of the entity type (e.g., "memory", "commit").
    const ENTITY_NAME: &'static str;

    /// Create a new ID from a UUID.
    fn new(uuid: Uuid) -> Self;

    /// Get the underlying UUID.
    fn as_uuid(&self) -> Uuid;

    /// Create a nil (all zeros) ID.
    fn nil() -> Self {
        Self::new(Uuid::nil())
    }

    /// Create a new random UUIDv4 ID.
    fn new_v4() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Error type for parsing entity IDs from strings.
#[derive(Debug, Clone)]
pub struct IdParseError {
    pub entity_name: &'static str,
    pub input: String,
    pub source: uuid::Error,
}

impl fmt::Display for IdParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Failed to parse {} ID from '{}': {}",
            self.entity_name, self.input, self.source
        )
    }
}

impl std::error::Error for IdParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Macro to define a type-safe entity ID newtype.
macro_rules! define_id {
    ($name:ident, $entity:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(Uuid);

        impl EngramIdType for $name {
            const ENTITY_NAME: &'static str = $entity;

            fn new(uuid: Uuid) -> Self {
                Self(uuid)
            }

            fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map($name).map_err(|e| IdParseError {
                    entity_name: Self::ENTITY_NAME,
                    input: s.to_string(),
                    source: e,
                })
            }
        }

        impl Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                self.0.serialize(serializer)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                Uuid::deserialize(deserializer).map($name)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id!(MemoryId, "memory", "Identifier for a memory record.");
define_id!(SceneId, "scene", "Identifier for an episodic scene.");
define_id!(ViewId, "view", "Identifier for an episodic view.");
define_id!(CommitId, "commit", "Identifier for a staged proposal commit.");
define_id!(ChangeId, "change", "Identifier for a single staged change.");
define_id!(StashId, "stash", "Identifier for a conflict stash entry.");
define_id!(SessionId, "session", "Identifier for a capability session.");
define_id!(NamespaceId, "namespace", "Identifier for a namespace.");
define_id!(PermissionId, "permission", "Identifier for a namespace permission grant.");
define_id!(HandoffSessionId, "handoff_session", "Identifier for a handoff session.");
define_id!(LaneId, "lane", "Identifier for a handoff lane.");
define_id!(CheckpointId, "checkpoint", "Identifier for a handoff checkpoint.");
define_id!(EventId, "event", "Identifier for a memory event log row.");
define_id!(DigestId, "digest", "Identifier for a daily digest row.");
define_id!(EntityNodeId, "entity", "Identifier for a knowledge-graph entity.");
define_id!(CategoryId, "category", "Identifier for a category node.");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_roundtrip_through_string() {
        let id = MemoryId::new_v4();
        let parsed: MemoryId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_id_parse_rejects_garbage() {
        let err = "not-a-uuid".parse::<CommitId>().unwrap_err();
        assert_eq!(err.entity_name, "commit");
    }

    #[test]
    fn test_ids_are_distinct_types() {
        // Compile-time property: MemoryId and SceneId cannot be compared.
        let memory = MemoryId::nil();
        let scene = SceneId::nil();
        assert_eq!(memory.as_uuid(), scene.as_uuid());
    }

    #[test]
    fn test_id_serde_is_bare_uuid() {
        let id = SessionId::new_v4();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.as_uuid()));
    }
}
