//! Inbound event and availability event types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::record::{RecordKind, TargetType};

/// An event delivered by the inbound bus.
///
/// Events arrive at-least-once and unordered across sources; the pipeline
/// derives deterministic record ids from `id` so redelivery is harmless.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    /// Bus-assigned event identifier
    pub id: String,
    /// Source service that published the event (e.g., "crm")
    pub source: String,
    /// Event detail type (e.g., "lead.created")
    pub detail_type: String,
    /// Event payload data
    pub payload: serde_json::Value,
    /// When the event occurred
    pub occurred_at: DateTime<Utc>,
}

/// Builder for creating inbound events
#[derive(Debug, Clone)]
pub struct InboundEventBuilder {
    id: Option<String>,
    source: String,
    detail_type: String,
    payload: serde_json::Value,
    occurred_at: Option<DateTime<Utc>>,
}

impl InboundEventBuilder {
    /// Create a new event builder
    pub fn new(source: impl Into<String>, detail_type: impl Into<String>) -> Self {
        Self {
            id: None,
            source: source.into(),
            detail_type: detail_type.into(),
            payload: serde_json::Value::Null,
            occurred_at: None,
        }
    }

    /// Set the event id (defaults to a random UUID when the envelope carries none)
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the payload
    pub fn payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Set the occurrence timestamp
    pub fn occurred_at(mut self, at: DateTime<Utc>) -> Self {
        self.occurred_at = Some(at);
        self
    }

    /// Build the event
    pub fn build(self) -> InboundEvent {
        InboundEvent {
            id: self.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            source: self.source,
            detail_type: self.detail_type,
            payload: self.payload,
            occurred_at: self.occurred_at.unwrap_or_else(Utc::now),
        }
    }
}

impl InboundEvent {
    /// Create an event with minimal parameters
    pub fn new(
        source: impl Into<String>,
        detail_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        InboundEventBuilder::new(source, detail_type)
            .payload(payload)
            .build()
    }

    /// Create a builder for this event type
    pub fn builder(
        source: impl Into<String>,
        detail_type: impl Into<String>,
    ) -> InboundEventBuilder {
        InboundEventBuilder::new(source, detail_type)
    }
}

/// An ephemeral per-recipient "a record now exists for you" signal.
///
/// Availability events are published to the outbound bus and never persisted.
/// Consumers dedupe by `(record_id, recipient_id)` since the triggering
/// insert notification may be redelivered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityEvent {
    /// Recipient user id
    pub recipient_id: String,
    /// Id of the materialized record
    pub record_id: Uuid,
    /// How the record was addressed
    pub target_type: TargetType,
    /// Record kind (notification or message)
    pub kind: RecordKind,
    /// Provenance: the original record's partition key
    pub target_key: String,
    /// When the signal was emitted
    pub emitted_at: DateTime<Utc>,
}

impl AvailabilityEvent {
    /// Detail type the event is published under, suffixed `.available`
    pub fn detail_type(&self) -> String {
        format!("{}.available", self.kind.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{RecordKind, TargetType};
    use serde_json::json;

    #[test]
    fn test_event_builder() {
        let event = InboundEvent::builder("crm", "lead.created")
            .id("evt-1")
            .payload(json!({"tenantId": "t1"}))
            .build();

        assert_eq!(event.id, "evt-1");
        assert_eq!(event.source, "crm");
        assert_eq!(event.detail_type, "lead.created");
        assert_eq!(event.payload["tenantId"], "t1");
    }

    #[test]
    fn test_event_builder_defaults_id() {
        let event = InboundEvent::new("crm", "lead.created", json!({}));
        assert!(!event.id.is_empty());
    }

    #[test]
    fn test_availability_detail_type_suffix() {
        let event = AvailabilityEvent {
            recipient_id: "u1".to_string(),
            record_id: Uuid::nil(),
            target_type: TargetType::Client,
            kind: RecordKind::Notification,
            target_key: "client#t1".to_string(),
            emitted_at: Utc::now(),
        };
        assert_eq!(event.detail_type(), "notification.available");

        let event = AvailabilityEvent {
            kind: RecordKind::Message,
            ..event
        };
        assert_eq!(event.detail_type(), "message.available");
    }
}
