//! Declarative subscriptions: configuration model, registry, and matching.

mod matcher;
mod model;
mod registry;

pub use matcher::{find_matches, matches};
pub use model::{EventPattern, EventPatternSpec, Subscription, SubscriptionSpec, TemplateSpec};
pub use registry::{ConfigError, SubscriptionRegistry};
