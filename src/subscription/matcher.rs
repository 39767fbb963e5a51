//! Event pattern matching.

use crate::event::InboundEvent;
use crate::template::lookup_dotted;

use super::model::{EventPattern, Subscription};

/// Whether an event satisfies a subscription's pattern.
///
/// Source and detail type are exact set membership — an event of type
/// "chat.message" never matches a pattern listing only
/// "chat.message.available". The optional detail filter requires each
/// listed payload field to be a member of its accepted value set.
pub fn matches(event: &InboundEvent, pattern: &EventPattern) -> bool {
    if !pattern.sources.contains(&event.source) {
        return false;
    }
    if !pattern.detail_types.contains(&event.detail_type) {
        return false;
    }
    if let Some(detail) = &pattern.detail {
        for (key, accepted) in detail {
            match lookup_dotted(&event.payload, key) {
                Some(actual) => {
                    if !accepted.iter().any(|v| v == actual) {
                        return false;
                    }
                }
                // A field absent from the payload fails the filter
                None => return false,
            }
        }
    }
    true
}

/// All subscriptions matching an event — one event may trigger multiple
/// independent materializations.
pub fn find_matches<'a>(
    event: &InboundEvent,
    subscriptions: &'a [Subscription],
) -> Vec<&'a Subscription> {
    subscriptions
        .iter()
        .filter(|sub| matches(event, &sub.pattern))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::{HashMap, HashSet};

    fn pattern(sources: &[&str], detail_types: &[&str]) -> EventPattern {
        EventPattern {
            sources: sources.iter().map(|s| s.to_string()).collect::<HashSet<_>>(),
            detail_types: detail_types
                .iter()
                .map(|s| s.to_string())
                .collect::<HashSet<_>>(),
            detail: None,
        }
    }

    fn event(source: &str, detail_type: &str, payload: serde_json::Value) -> InboundEvent {
        InboundEvent::builder(source, detail_type).payload(payload).build()
    }

    #[test]
    fn test_source_and_detail_type_match() {
        let p = pattern(&["crm"], &["lead.created"]);
        assert!(matches(&event("crm", "lead.created", json!({})), &p));
    }

    #[test]
    fn test_source_mismatch() {
        let p = pattern(&["crm"], &["lead.created"]);
        assert!(!matches(&event("billing", "lead.created", json!({})), &p));
    }

    #[test]
    fn test_detail_type_mismatch() {
        let p = pattern(&["crm"], &["lead.created"]);
        assert!(!matches(&event("crm", "lead.updated", json!({})), &p));
    }

    #[test]
    fn test_no_prefix_semantics() {
        // "chat.message" must never match a pattern listing only
        // "chat.message.available"
        let p = pattern(&["chat"], &["chat.message.available"]);
        assert!(!matches(&event("chat", "chat.message", json!({})), &p));

        let p = pattern(&["chat"], &["chat.message"]);
        assert!(!matches(&event("chat", "chat.message.available", json!({})), &p));
    }

    #[test]
    fn test_detail_filter_membership() {
        let mut detail = HashMap::new();
        detail.insert("region".to_string(), vec![json!("eu"), json!("us")]);
        let mut p = pattern(&["crm"], &["lead.created"]);
        p.detail = Some(detail);

        assert!(matches(&event("crm", "lead.created", json!({"region": "eu"})), &p));
        assert!(!matches(&event("crm", "lead.created", json!({"region": "apac"})), &p));
        // Absent field fails the filter
        assert!(!matches(&event("crm", "lead.created", json!({})), &p));
    }

    #[test]
    fn test_detail_filter_nested_key() {
        let mut detail = HashMap::new();
        detail.insert("lead.stage".to_string(), vec![json!("qualified")]);
        let mut p = pattern(&["crm"], &["lead.created"]);
        p.detail = Some(detail);

        assert!(matches(
            &event("crm", "lead.created", json!({"lead": {"stage": "qualified"}})),
            &p
        ));
        assert!(!matches(
            &event("crm", "lead.created", json!({"lead": {"stage": "new"}})),
            &p
        ));
    }

    #[test]
    fn test_detail_filter_non_string_values() {
        let mut detail = HashMap::new();
        detail.insert("attempt".to_string(), vec![json!(1), json!(2)]);
        let mut p = pattern(&["auth"], &["login.failed"]);
        p.detail = Some(detail);

        assert!(matches(&event("auth", "login.failed", json!({"attempt": 2})), &p));
        assert!(!matches(&event("auth", "login.failed", json!({"attempt": 3})), &p));
    }
}
