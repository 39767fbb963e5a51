//! Central pipeline error type.

use thiserror::Error;

use crate::fanout::FanOutError;
use crate::store::StoreError;
use crate::subscription::ConfigError;
use crate::template::TemplateError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("record store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    FanOut(#[from] FanOutError),
}

impl PipelineError {
    /// Whether redelivering the triggering event could succeed.
    ///
    /// Configuration and template errors are data problems that a retry
    /// would deterministically reproduce; store and fan-out failures are
    /// transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Config(_) => false,
            PipelineError::Template(_) => false,
            PipelineError::Store(_) => true,
            PipelineError::FanOut(_) => true,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::TargetType;

    #[test]
    fn test_retryable_classification() {
        let template_err = PipelineError::Template(TemplateError::MissingTargetField {
            subscription: "s".to_string(),
            target_type: TargetType::User,
            field: "user_id",
        });
        assert!(!template_err.is_retryable());

        let store_err = PipelineError::Store(StoreError::Unavailable("down".to_string()));
        assert!(store_err.is_retryable());
    }
}
