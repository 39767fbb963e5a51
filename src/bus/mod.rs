//! Event bus abstractions and envelope formats.

mod redis;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

use crate::event::{AvailabilityEvent, InboundEvent};

pub use self::redis::{RedisAvailabilityPublisher, RedisSubscriber};

/// Errors that can occur publishing to the outbound bus.
#[derive(Debug, Error)]
pub enum PublishError {
    /// Redis operation failed
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Outbound half of the event bus.
///
/// Batches are published and retried as a unit; a failing batch must not
/// block unrelated batches.
#[async_trait]
pub trait AvailabilityPublisher: Send + Sync {
    async fn publish_batch(&self, events: &[AvailabilityEvent]) -> Result<(), PublishError>;
}

/// Inbound envelope as published by upstream services.
///
/// Field names follow the bus convention (`detail-type`); snake_case aliases
/// are accepted for hand-published test traffic.
#[derive(Debug, Deserialize)]
pub struct EventEnvelope {
    #[serde(default)]
    pub id: Option<String>,
    pub source: String,
    #[serde(rename = "detail-type", alias = "detail_type")]
    pub detail_type: String,
    #[serde(alias = "detail")]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
}

impl EventEnvelope {
    /// Convert into the pipeline's event type.
    pub fn into_event(self) -> InboundEvent {
        let mut builder = InboundEvent::builder(self.source, self.detail_type).payload(self.payload);
        if let Some(id) = self.id {
            builder = builder.id(id);
        }
        if let Some(time) = self.time {
            builder = builder.occurred_at(time);
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bus_convention_envelope() {
        let json = r#"{
            "id": "evt-1",
            "source": "crm",
            "detail-type": "lead.created",
            "detail": {"tenantId": "t1"}
        }"#;

        let envelope: EventEnvelope = serde_json::from_str(json).unwrap();
        let event = envelope.into_event();
        assert_eq!(event.id, "evt-1");
        assert_eq!(event.source, "crm");
        assert_eq!(event.detail_type, "lead.created");
        assert_eq!(event.payload["tenantId"], "t1");
    }

    #[test]
    fn test_parse_snake_case_envelope() {
        let json = r#"{
            "source": "crm",
            "detail_type": "lead.created",
            "payload": {"tenantId": "t1"}
        }"#;

        let envelope: EventEnvelope = serde_json::from_str(json).unwrap();
        let event = envelope.into_event();
        assert_eq!(event.detail_type, "lead.created");
        // Missing id gets a generated one
        assert!(!event.id.is_empty());
    }
}
