//! Template resolution: matched subscription + event → concrete record.

use std::collections::BTreeMap;

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use crate::event::InboundEvent;
use crate::record::{
    Priority, Record, RecordKind, Target, TargetType, META_SOURCE_EVENT, META_SOURCE_EVENT_ID,
};

use super::expr::ExprError;
use super::field::FieldValue;

/// Namespace for deterministic record ids (UUIDv5)
const RECORD_ID_NAMESPACE: Uuid = Uuid::from_u128(0x8c9d_0aa3_5b21_4e6c_9fd4_7a3e_2b1c_6d58);

/// Template resolution error type
#[derive(Debug, Error)]
pub enum TemplateError {
    /// A computed field failed to evaluate; scoped to one subscription's output
    #[error("subscription \"{subscription}\": field \"{field}\" failed to evaluate: {source}")]
    Evaluation {
        subscription: String,
        field: &'static str,
        #[source]
        source: ExprError,
    },

    /// The target type's required identifier resolved empty or not at all
    #[error("subscription \"{subscription}\": {} target requires a non-empty {field}", .target_type.as_str())]
    MissingTargetField {
        subscription: String,
        target_type: TargetType,
        field: &'static str,
    },
}

/// Addressing half of a compiled template.
///
/// Each typed variant carries the identifier field its target type requires,
/// so a template for a user target cannot be built without a user id spec.
#[derive(Debug, Clone)]
pub enum TargetSpec {
    User { user_id: FieldValue<String> },
    Client { client_id: FieldValue<String> },
    Broadcast,
    Channel { channel_id: FieldValue<String> },
}

impl TargetSpec {
    pub fn target_type(&self) -> TargetType {
        match self {
            TargetSpec::User { .. } => TargetType::User,
            TargetSpec::Client { .. } => TargetType::Client,
            TargetSpec::Broadcast => TargetType::Broadcast,
            TargetSpec::Channel { .. } => TargetType::Channel,
        }
    }

    fn resolve(
        &self,
        subscription: &str,
        payload: &serde_json::Value,
    ) -> Result<Target, TemplateError> {
        match self {
            TargetSpec::User { user_id } => {
                resolve_identifier(subscription, TargetType::User, "user_id", user_id, payload)
                    .map(Target::User)
            }
            TargetSpec::Client { client_id } => resolve_identifier(
                subscription,
                TargetType::Client,
                "client_id",
                client_id,
                payload,
            )
            .map(Target::Client),
            TargetSpec::Broadcast => Ok(Target::Broadcast),
            TargetSpec::Channel { channel_id } => resolve_identifier(
                subscription,
                TargetType::Channel,
                "channel_id",
                channel_id,
                payload,
            )
            .map(Target::Channel),
        }
    }
}

/// An unresolved or blank identifier is a data problem, not a transient one.
fn resolve_identifier(
    subscription: &str,
    target_type: TargetType,
    field: &'static str,
    value: &FieldValue<String>,
    payload: &serde_json::Value,
) -> Result<String, TemplateError> {
    let missing = || TemplateError::MissingTargetField {
        subscription: subscription.to_string(),
        target_type,
        field,
    };
    let resolved = value.resolve(payload).map_err(|_| missing())?;
    let trimmed = resolved.trim();
    if trimmed.is_empty() {
        return Err(missing());
    }
    Ok(trimmed.to_string())
}

/// A subscription's per-detail-type blueprint, compiled at registry load.
#[derive(Debug, Clone)]
pub struct CompiledTemplate {
    pub target: TargetSpec,
    pub title: FieldValue<String>,
    pub content: FieldValue<String>,
    pub priority: FieldValue<Priority>,
    pub metadata: BTreeMap<String, FieldValue<serde_json::Value>>,
    pub icon: Option<FieldValue<String>>,
    pub category: Option<FieldValue<String>>,
    pub action_url: Option<FieldValue<String>>,
    pub tags: Option<FieldValue<Vec<String>>>,
    pub display_duration: Option<FieldValue<u32>>,
    pub sound: Option<FieldValue<String>>,
}

/// Deterministic record id: the same (event, subscription, kind) always
/// yields the same id, so a redelivered event produces a duplicate write
/// instead of a second record.
pub fn record_id(event_id: &str, subscription: &str, kind: RecordKind) -> Uuid {
    let name = format!("{}:{}:{}", event_id, subscription, kind.as_str());
    Uuid::new_v5(&RECORD_ID_NAMESPACE, name.as_bytes())
}

/// Resolve a compiled template against an event, producing a record.
///
/// Each field is evaluated at most once. Provenance metadata is merged last
/// and can never be overridden by template-supplied metadata.
pub fn resolve(
    subscription: &str,
    kind: RecordKind,
    template: &CompiledTemplate,
    event: &InboundEvent,
) -> Result<Record, TemplateError> {
    let payload = &event.payload;
    let evaluation = |field: &'static str| {
        let subscription = subscription.to_string();
        move |source: ExprError| TemplateError::Evaluation {
            subscription,
            field,
            source,
        }
    };

    let target = template.target.resolve(subscription, payload)?;
    let title = template.title.resolve(payload).map_err(evaluation("title"))?;
    let content = template
        .content
        .resolve(payload)
        .map_err(evaluation("content"))?;
    let priority = template
        .priority
        .resolve(payload)
        .map_err(evaluation("priority"))?;
    let icon = resolve_optional(&template.icon, payload).map_err(evaluation("icon"))?;
    let category = resolve_optional(&template.category, payload).map_err(evaluation("category"))?;
    let action_url =
        resolve_optional(&template.action_url, payload).map_err(evaluation("action_url"))?;
    let tags = resolve_optional(&template.tags, payload)
        .map_err(evaluation("tags"))?
        .unwrap_or_default();
    let display_duration = resolve_optional(&template.display_duration, payload)
        .map_err(evaluation("display_duration"))?;
    let sound = resolve_optional(&template.sound, payload).map_err(evaluation("sound"))?;

    let mut metadata = serde_json::Map::new();
    for (key, value) in &template.metadata {
        metadata.insert(
            key.clone(),
            value.resolve(payload).map_err(evaluation("metadata"))?,
        );
    }
    // Provenance always wins over template metadata
    metadata.insert(
        META_SOURCE_EVENT.to_string(),
        serde_json::Value::String(event.detail_type.clone()),
    );
    metadata.insert(
        META_SOURCE_EVENT_ID.to_string(),
        serde_json::Value::String(event.id.clone()),
    );

    Ok(Record {
        id: record_id(&event.id, subscription, kind),
        target_key: target.partition_key(),
        target,
        kind,
        title,
        content,
        priority,
        metadata,
        icon,
        category,
        action_url,
        tags,
        display_duration,
        sound,
        created_at: event.occurred_at,
        received_at: Utc::now(),
    })
}

fn resolve_optional<T: serde::de::DeserializeOwned + Clone>(
    field: &Option<FieldValue<T>>,
    payload: &serde_json::Value,
) -> Result<Option<T>, ExprError> {
    field.as_ref().map(|f| f.resolve(payload)).transpose()
}
