//! Subscription registry: load and compile the declarative configuration.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use thiserror::Error;

use crate::event::InboundEvent;
use crate::record::{Priority, TargetType};
use crate::template::{CompiledTemplate, ExprError, FieldValue, TargetSpec};

use super::matcher;
use super::model::{EventPattern, Subscription, SubscriptionSpec, TemplateSpec};

/// Subscription configuration error — fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read subscriptions file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse subscriptions file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("subscription \"{subscription}\": {message}")]
    Invalid {
        subscription: String,
        message: String,
    },

    #[error("subscription \"{subscription}\": field \"{field}\": {source}")]
    Field {
        subscription: String,
        field: String,
        #[source]
        source: ExprError,
    },

    #[error("duplicate subscription name \"{0}\"")]
    Duplicate(String),
}

/// Immutable, process-wide set of compiled subscriptions.
///
/// Built once at worker start and shared by reference; reuse across
/// invocations is purely a performance optimization — nothing here mutates
/// after load.
#[derive(Debug)]
pub struct SubscriptionRegistry {
    subscriptions: Vec<Subscription>,
}

impl SubscriptionRegistry {
    /// Compile a list of raw subscription specs.
    pub fn load(specs: Vec<SubscriptionSpec>) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        let mut subscriptions = Vec::with_capacity(specs.len());
        for spec in specs {
            if !seen.insert(spec.name.clone()) {
                return Err(ConfigError::Duplicate(spec.name));
            }
            subscriptions.push(compile_subscription(spec)?);
        }
        tracing::info!(count = subscriptions.len(), "Subscription registry loaded");
        Ok(Self { subscriptions })
    }

    /// Read and compile a JSON subscriptions file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let specs: Vec<SubscriptionSpec> =
            serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        Self::load(specs)
    }

    pub fn subscriptions(&self) -> &[Subscription] {
        &self.subscriptions
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// All subscriptions matching an event.
    pub fn find_matches(&self, event: &InboundEvent) -> Vec<&Subscription> {
        matcher::find_matches(event, &self.subscriptions)
    }
}

fn compile_subscription(spec: SubscriptionSpec) -> Result<Subscription, ConfigError> {
    let name = spec.name;
    let invalid = |message: &str| ConfigError::Invalid {
        subscription: name.clone(),
        message: message.to_string(),
    };

    if name.trim().is_empty() {
        return Err(ConfigError::Invalid {
            subscription: "<unnamed>".to_string(),
            message: "name must not be empty".to_string(),
        });
    }
    if spec.event_pattern.sources.is_empty() {
        return Err(invalid("event pattern lists no sources"));
    }
    if spec.event_pattern.detail_types.is_empty() {
        return Err(invalid("event pattern lists no detail types"));
    }
    if spec.notifications.is_empty() && spec.messages.is_empty() {
        return Err(invalid("defines no notification or message mapping"));
    }

    let pattern = EventPattern {
        sources: spec.event_pattern.sources.into_iter().collect(),
        detail_types: spec.event_pattern.detail_types.into_iter().collect(),
        detail: spec.event_pattern.detail,
    };

    // A mapping keyed by a detail type the pattern can never match is a
    // configuration bug, not a silent no-op.
    for key in spec.notifications.keys().chain(spec.messages.keys()) {
        if !pattern.detail_types.contains(key) {
            return Err(invalid(&format!(
                "mapping for detail type \"{}\" which the event pattern does not list",
                key
            )));
        }
    }

    let notifications = compile_mapping(&name, spec.notifications)?;
    let messages = compile_mapping(&name, spec.messages)?;

    Ok(Subscription {
        name,
        description: spec.description,
        pattern,
        notifications,
        messages,
    })
}

fn compile_mapping(
    subscription: &str,
    mapping: HashMap<String, TemplateSpec>,
) -> Result<HashMap<String, CompiledTemplate>, ConfigError> {
    mapping
        .into_iter()
        .map(|(detail_type, spec)| {
            compile_template(subscription, &spec).map(|tpl| (detail_type, tpl))
        })
        .collect()
}

fn compile_template(
    subscription: &str,
    spec: &TemplateSpec,
) -> Result<CompiledTemplate, ConfigError> {
    let target = match spec.target_type {
        TargetType::User => TargetSpec::User {
            user_id: required_field(subscription, "user_id", &spec.user_id)?,
        },
        TargetType::Client => TargetSpec::Client {
            client_id: required_field(subscription, "client_id", &spec.client_id)?,
        },
        TargetType::Broadcast => TargetSpec::Broadcast,
        TargetType::Channel => TargetSpec::Channel {
            channel_id: required_field(subscription, "channel_id", &spec.channel_id)?,
        },
    };

    let title = field(subscription, "title", &spec.title)?;
    let content = match &spec.content {
        Some(value) => field(subscription, "content", value)?,
        None => FieldValue::Literal(String::new()),
    };
    let priority = match &spec.priority {
        Some(value) => field(subscription, "priority", value)?,
        None => FieldValue::Literal(Priority::default()),
    };

    let mut metadata = BTreeMap::new();
    for (key, value) in &spec.metadata {
        metadata.insert(key.clone(), field(subscription, "metadata", value)?);
    }

    Ok(CompiledTemplate {
        target,
        title,
        content,
        priority,
        metadata,
        icon: optional_field(subscription, "icon", &spec.icon)?,
        category: optional_field(subscription, "category", &spec.category)?,
        action_url: optional_field(subscription, "action_url", &spec.action_url)?,
        tags: optional_field(subscription, "tags", &spec.tags)?,
        display_duration: optional_field(subscription, "display_duration", &spec.display_duration)?,
        sound: optional_field(subscription, "sound", &spec.sound)?,
    })
}

fn field<T: serde::de::DeserializeOwned>(
    subscription: &str,
    name: &str,
    value: &serde_json::Value,
) -> Result<FieldValue<T>, ConfigError> {
    FieldValue::from_spec(value).map_err(|source| ConfigError::Field {
        subscription: subscription.to_string(),
        field: name.to_string(),
        source,
    })
}

fn required_field<T: serde::de::DeserializeOwned>(
    subscription: &str,
    name: &str,
    value: &Option<serde_json::Value>,
) -> Result<FieldValue<T>, ConfigError> {
    match value {
        Some(v) => field(subscription, name, v),
        None => Err(ConfigError::Invalid {
            subscription: subscription.to_string(),
            message: format!("target type requires \"{}\"", name),
        }),
    }
}

fn optional_field<T: serde::de::DeserializeOwned>(
    subscription: &str,
    name: &str,
    value: &Option<serde_json::Value>,
) -> Result<Option<FieldValue<T>>, ConfigError> {
    value.as_ref().map(|v| field(subscription, name, v)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec_json(value: serde_json::Value) -> Vec<SubscriptionSpec> {
        serde_json::from_value(value).unwrap()
    }

    fn lead_subscription() -> serde_json::Value {
        json!([{
            "name": "lead-alerts",
            "description": "Notify tenant members about new leads",
            "event_pattern": {
                "sources": ["crm"],
                "detail_types": ["lead.created"]
            },
            "notifications": {
                "lead.created": {
                    "target_type": "client",
                    "client_id": "{{tenantId}}",
                    "title": "New Lead",
                    "content": "Lead from {{company}}"
                }
            }
        }])
    }

    #[test]
    fn test_load_and_match() {
        let registry = SubscriptionRegistry::load(spec_json(lead_subscription())).unwrap();
        assert_eq!(registry.len(), 1);

        let event = InboundEvent::builder("crm", "lead.created")
            .payload(json!({"tenantId": "t1", "company": "Acme"}))
            .build();
        assert_eq!(registry.find_matches(&event).len(), 1);

        let other = InboundEvent::builder("crm", "lead.updated")
            .payload(json!({}))
            .build();
        assert!(registry.find_matches(&other).is_empty());
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut specs = spec_json(lead_subscription());
        specs.extend(spec_json(lead_subscription()));
        let err = SubscriptionRegistry::load(specs).unwrap_err();
        assert!(matches!(err, ConfigError::Duplicate(_)));
    }

    #[test]
    fn test_empty_sources_rejected() {
        let specs = spec_json(json!([{
            "name": "broken",
            "event_pattern": {"sources": [], "detail_types": ["x"]},
            "notifications": {"x": {"target_type": "broadcast", "title": "t"}}
        }]));
        let err = SubscriptionRegistry::load(specs).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_missing_required_identifier_rejected() {
        let specs = spec_json(json!([{
            "name": "no-client-id",
            "event_pattern": {"sources": ["crm"], "detail_types": ["lead.created"]},
            "notifications": {
                "lead.created": {"target_type": "client", "title": "t"}
            }
        }]));
        let err = SubscriptionRegistry::load(specs).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_mapping_for_unlisted_detail_type_rejected() {
        let specs = spec_json(json!([{
            "name": "stray-mapping",
            "event_pattern": {"sources": ["crm"], "detail_types": ["lead.created"]},
            "notifications": {
                "lead.deleted": {"target_type": "broadcast", "title": "t"}
            }
        }]));
        let err = SubscriptionRegistry::load(specs).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_malformed_expression_rejected() {
        let specs = spec_json(json!([{
            "name": "bad-expr",
            "event_pattern": {"sources": ["crm"], "detail_types": ["lead.created"]},
            "notifications": {
                "lead.created": {
                    "target_type": "broadcast",
                    "title": "broken {{name"
                }
            }
        }]));
        let err = SubscriptionRegistry::load(specs).unwrap_err();
        assert!(matches!(err, ConfigError::Field { .. }));
    }

    #[test]
    fn test_no_mappings_rejected() {
        let specs = spec_json(json!([{
            "name": "empty",
            "event_pattern": {"sources": ["crm"], "detail_types": ["lead.created"]}
        }]));
        let err = SubscriptionRegistry::load(specs).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }
}
