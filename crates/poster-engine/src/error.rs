use std::time::Duration;

use poster_core::ContextKey;
use poster_llm::GuardError;
use poster_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Neither the scene's personality record nor the base one exists.
    #[error("no personality memory for {context} and no base fallback")]
    MissingPersonality { context: ContextKey },

    #[error("generation failed: {0}")]
    Generation(#[from] GuardError),

    #[error("no topics configured")]
    NoTopics,

    #[error("no valid content after {attempts} attempts")]
    ValidationExhausted { attempts: u32 },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("store task did not complete: {0}")]
    StoreTask(String),

    #[error("generation timed out after {0:?}")]
    Timeout(Duration),
}

impl PipelineError {
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::MissingPersonality { .. } => "missing_personality",
            Self::Generation(e) => e.error_kind(),
            Self::NoTopics => "no_topics",
            Self::ValidationExhausted { .. } => "validation_exhausted",
            Self::Store(_) => "store",
            Self::StoreTask(_) => "store_task",
            Self::Timeout(_) => "timeout",
        }
    }
}

/// Failures the control loop absorbs into a backoff.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("publish failed: {0}")]
    Publish(#[from] GuardError),

    #[error("publish timed out after {0:?}")]
    PublishTimeout(Duration),

    #[error("store {op} failed: {source}")]
    Store {
        op: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("store {op} timed out after {after:?}")]
    StoreTimeout { op: &'static str, after: Duration },

    #[error("store task for {op} did not complete: {detail}")]
    StoreTask { op: &'static str, detail: String },
}

impl MonitorError {
    /// A publish that may have gone live even though it reported failure.
    pub fn publish_outcome_unknown(&self) -> bool {
        match self {
            Self::Publish(e) => e.outcome_unknown(),
            Self::PublishTimeout(_) => true,
            _ => false,
        }
    }
}
