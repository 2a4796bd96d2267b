/// Error taxonomy
///
/// Collaborator adapters return `anyhow::Result`; the cycle reports one of the
/// typed errors below so callers can decide between retry, local recovery and
/// surfacing the problem.

use thiserror::Error;

/// Startup configuration problems. Always fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },

    #[error("YOUTUBE_TOPIC must contain at least one topic")]
    EmptyTopics,
}

/// Schedule file persistence failures
#[derive(Debug, Error)]
pub enum GateError {
    #[error("failed to write schedule file {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize schedule: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// The selector could not produce a candidate
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("no candidates found for topics {attempted:?}")]
    NoCandidates { attempted: Vec<String> },

    #[error("no new content available ({pool_size} candidates were all sent recently)")]
    NoNewContent {
        attempted: Vec<String>,
        pool_size: usize,
    },
}

/// Failure of one delivery cycle
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("messenger is not connected")]
    NotReady,

    #[error(transparent)]
    Selection(#[from] SelectionError),

    #[error("target group not found: {0}")]
    GroupNotFound(String),

    #[error("download failed: {0}")]
    Download(String),

    #[error("delivery failed: {0}")]
    Delivery(String),

    #[error("video was sent but the send record could not be saved: {0}")]
    Persistence(#[from] GateError),
}

impl CycleError {
    /// Whether the retry wrapper should try again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CycleError::GroupNotFound(_) | CycleError::Download(_) | CycleError::Delivery(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_failures_are_retried() {
        assert!(CycleError::Download("x".into()).is_retryable());
        assert!(CycleError::Delivery("x".into()).is_retryable());
        assert!(CycleError::GroupNotFound("g".into()).is_retryable());
        assert!(!CycleError::NotReady.is_retryable());
        assert!(!CycleError::Selection(SelectionError::NoCandidates {
            attempted: vec!["a".into()]
        })
        .is_retryable());
    }
}
