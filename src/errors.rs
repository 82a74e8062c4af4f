//! Engine-wide error taxonomy.
//!
//! Every fallible operation maps into one of these variants so callers
//! can decide, per variant, whether to retry, skip, or halt the engine.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Venue call failed in a way that is expected to clear on its own
    /// (timeout, rate limit, 5xx). Caller should back off and retry.
    #[error("transient venue error ({venue}): {message}")]
    TransientVenueError { venue: String, message: String },

    /// Venue call failed in a way retrying will not fix (4xx other than
    /// rate-limit, malformed request, rejected order).
    #[error("permanent venue error ({venue}): {message}")]
    PermanentVenueError { venue: String, message: String },

    /// Credentials missing, malformed, or rejected by the venue/LLM
    /// provider. Not retryable without operator intervention.
    #[error("auth/config error: {0}")]
    AuthConfigError(String),

    /// An analyst role failed to produce a usable estimate (provider
    /// error, unparsable response, exhausted retries).
    #[error("analyst failure ({role}): {message}")]
    AnalystFailure { role: String, message: String },

    /// The edge/Kelly gate rejected a candidate trade. Not an error in
    /// the operational sense — carries the rejection reason for logging.
    #[error("gate rejection: {0}")]
    GateRejection(String),

    /// A hard safety control blocked an action (concurrency cap,
    /// kill-switch, daily drawdown limit).
    #[error("safety block: {0}")]
    SafetyBlock(String),

    /// Internal state is inconsistent (missing FK target, double
    /// settlement, unexpected status transition). Indicates a bug.
    #[error("consistency error: {0}")]
    ConsistencyError(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("config error: {0}")]
    Config(#[from] anyhow::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl EngineError {
    /// Transient venue/network failures are worth retrying; everything
    /// else should be surfaced and the current job skipped.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::TransientVenueError { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let transient = EngineError::TransientVenueError {
            venue: "kalshi".to_string(),
            message: "timeout".to_string(),
        };
        assert!(transient.is_retryable());

        let permanent = EngineError::PermanentVenueError {
            venue: "kalshi".to_string(),
            message: "rejected".to_string(),
        };
        assert!(!permanent.is_retryable());
    }

    #[test]
    fn test_display_messages() {
        let err = EngineError::GateRejection("edge below floor".to_string());
        assert_eq!(format!("{err}"), "gate rejection: edge below floor");
    }
}
