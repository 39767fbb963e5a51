//! Materialized record model: targets, partition keys, priorities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadata key carrying the originating event's detail type
pub const META_SOURCE_EVENT: &str = "sourceEvent";
/// Metadata key carrying the originating event's id
pub const META_SOURCE_EVENT_ID: &str = "sourceEventId";

/// Who a record is addressed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    /// A single user
    User,
    /// All users of a tenant/client
    Client,
    /// Everyone
    Broadcast,
    /// Participants of a channel
    Channel,
}

impl TargetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetType::User => "user",
            TargetType::Client => "client",
            TargetType::Broadcast => "broadcast",
            TargetType::Channel => "channel",
        }
    }
}

/// A fully resolved addressing target.
///
/// The identifier is part of the variant, so a typed target can never exist
/// without the identifier its type requires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum Target {
    /// Address a specific user
    User(String),
    /// Address all users of a client
    Client(String),
    /// Address everyone
    Broadcast,
    /// Address participants of a channel
    Channel(String),
}

impl Target {
    pub fn target_type(&self) -> TargetType {
        match self {
            Target::User(_) => TargetType::User,
            Target::Client(_) => TargetType::Client,
            Target::Broadcast => TargetType::Broadcast,
            Target::Channel(_) => TargetType::Channel,
        }
    }

    /// Derive the storage partition key.
    ///
    /// Pure and deterministic: identical targets always yield identical keys.
    /// The key doubles as the fan-out routing discriminant.
    pub fn partition_key(&self) -> String {
        match self {
            Target::User(id) => format!("user#{}", id),
            Target::Client(id) => format!("client#{}", id),
            Target::Broadcast => "broadcast".to_string(),
            Target::Channel(id) => format!("channel#{}", id),
        }
    }
}

/// Priority levels for records
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// Which mapping a record was materialized from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    /// In-app notification record
    Notification,
    /// Message/inbox record
    Message,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Notification => "notification",
            RecordKind::Message => "message",
        }
    }
}

/// A materialized notification or message record.
///
/// Created once by the template resolver and never mutated by this pipeline.
/// `metadata` always contains the provenance keys `sourceEvent` and
/// `sourceEventId`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Deterministic record id (UUIDv5 of event id + subscription + kind)
    pub id: Uuid,
    /// Storage partition key derived from the target
    pub target_key: String,
    /// Resolved addressing target
    pub target: Target,
    /// Record kind
    pub kind: RecordKind,
    /// Resolved title
    pub title: String,
    /// Resolved body content
    pub content: String,
    /// Resolved priority
    pub priority: Priority,
    /// Template metadata plus provenance
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// UI decoration: icon name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// UI decoration: category
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// UI decoration: action URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_url: Option<String>,
    /// UI decoration: tags
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// UI decoration: display duration in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_duration: Option<u32>,
    /// UI decoration: sound name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sound: Option<String>,
    /// When the originating event occurred
    pub created_at: DateTime<Utc>,
    /// When the pipeline materialized the record (store sort key)
    pub received_at: DateTime<Utc>,
}

impl Record {
    /// The originating event's detail type, from provenance metadata
    pub fn source_event(&self) -> Option<&str> {
        self.metadata.get(META_SOURCE_EVENT).and_then(|v| v.as_str())
    }

    /// The originating event's id, from provenance metadata
    pub fn source_event_id(&self) -> Option<&str> {
        self.metadata
            .get(META_SOURCE_EVENT_ID)
            .and_then(|v| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_key_format() {
        assert_eq!(Target::User("u1".into()).partition_key(), "user#u1");
        assert_eq!(Target::Client("t1".into()).partition_key(), "client#t1");
        assert_eq!(Target::Channel("c1".into()).partition_key(), "channel#c1");
        assert_eq!(Target::Broadcast.partition_key(), "broadcast");
    }

    #[test]
    fn test_partition_key_deterministic() {
        let a = Target::Client("tenant-42".into());
        let b = Target::Client("tenant-42".into());
        assert_eq!(a.partition_key(), b.partition_key());
    }

    #[test]
    fn test_target_type_mapping() {
        assert_eq!(Target::User("u".into()).target_type(), TargetType::User);
        assert_eq!(Target::Broadcast.target_type(), TargetType::Broadcast);
        assert_eq!(TargetType::Channel.as_str(), "channel");
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
    }

    #[test]
    fn test_target_serde_tagged() {
        let json = serde_json::to_value(Target::Client("t1".into())).unwrap();
        assert_eq!(json["type"], "client");
        assert_eq!(json["id"], "t1");

        let back: Target = serde_json::from_value(json).unwrap();
        assert_eq!(back, Target::Client("t1".into()));
    }
}
