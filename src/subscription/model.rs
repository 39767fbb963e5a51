//! Subscription configuration model and compiled runtime types.

use std::collections::{HashMap, HashSet};

use serde::Deserialize;

use crate::record::{RecordKind, TargetType};
use crate::template::CompiledTemplate;

/// Raw subscription entry as it appears in the subscriptions file.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionSpec {
    /// Unique subscription name
    pub name: String,
    /// Human-readable description (optional)
    #[serde(default)]
    pub description: Option<String>,
    /// Which events this subscription reacts to
    pub event_pattern: EventPatternSpec,
    /// Per-detail-type notification templates
    #[serde(default)]
    pub notifications: HashMap<String, TemplateSpec>,
    /// Per-detail-type message templates
    #[serde(default)]
    pub messages: HashMap<String, TemplateSpec>,
}

/// Raw event pattern
#[derive(Debug, Clone, Deserialize)]
pub struct EventPatternSpec {
    /// Accepted event sources
    pub sources: Vec<String>,
    /// Accepted detail types (exact membership, no prefix semantics)
    pub detail_types: Vec<String>,
    /// Optional structured payload filter: each key maps to the set of
    /// accepted values; dotted keys address nested payload fields
    #[serde(default)]
    pub detail: Option<HashMap<String, Vec<serde_json::Value>>>,
}

/// Raw template entry.
///
/// Field values are plain JSON: strings containing `{{` compile to payload
/// expressions, everything else is a literal.
#[derive(Debug, Clone, Deserialize)]
pub struct TemplateSpec {
    pub target_type: TargetType,
    #[serde(default)]
    pub user_id: Option<serde_json::Value>,
    #[serde(default)]
    pub client_id: Option<serde_json::Value>,
    #[serde(default)]
    pub channel_id: Option<serde_json::Value>,
    pub title: serde_json::Value,
    #[serde(default)]
    pub content: Option<serde_json::Value>,
    #[serde(default)]
    pub priority: Option<serde_json::Value>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub icon: Option<serde_json::Value>,
    #[serde(default)]
    pub category: Option<serde_json::Value>,
    #[serde(default)]
    pub action_url: Option<serde_json::Value>,
    #[serde(default)]
    pub tags: Option<serde_json::Value>,
    #[serde(default)]
    pub display_duration: Option<serde_json::Value>,
    #[serde(default)]
    pub sound: Option<serde_json::Value>,
}

/// Compiled event pattern with set-membership semantics.
#[derive(Debug, Clone)]
pub struct EventPattern {
    pub sources: HashSet<String>,
    pub detail_types: HashSet<String>,
    pub detail: Option<HashMap<String, Vec<serde_json::Value>>>,
}

/// A compiled subscription, immutable after registry load.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub name: String,
    pub description: Option<String>,
    pub pattern: EventPattern,
    pub notifications: HashMap<String, CompiledTemplate>,
    pub messages: HashMap<String, CompiledTemplate>,
}

impl Subscription {
    /// Templates to materialize for an event of the given detail type,
    /// notification mapping first.
    pub fn templates_for(&self, detail_type: &str) -> Vec<(RecordKind, &CompiledTemplate)> {
        let mut templates = Vec::new();
        if let Some(tpl) = self.notifications.get(detail_type) {
            templates.push((RecordKind::Notification, tpl));
        }
        if let Some(tpl) = self.messages.get(detail_type) {
            templates.push((RecordKind::Message, tpl));
        }
        templates
    }
}
