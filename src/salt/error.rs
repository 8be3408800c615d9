use std::time::Duration;

use thiserror::Error;

use super::result::MinionResult;

/// Every way a salt-api interaction can fail.
///
/// Nothing in this crate retries; callers wanting resilience wrap the whole run.
#[derive(Debug, Error)]
pub enum SaltError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("timed out after {}s waiting for minions matching '{target}'", .elapsed.as_secs())]
    Timeout {
        elapsed: Duration,
        target: String,
        partial: Vec<MinionResult>,
    },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("run cancelled")]
    Cancelled,

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The run task ended without reporting (panic or runtime shutdown).
    #[error("run aborted: {0}")]
    Aborted(String),
}

impl SaltError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Short machine-friendly name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            SaltError::Authentication(_) => "authentication",
            SaltError::Transport(_) => "transport",
            SaltError::Timeout { .. } => "timeout",
            SaltError::Validation(_) => "validation",
            SaltError::Cancelled => "cancelled",
            SaltError::Configuration(_) => "configuration",
            SaltError::Io(_) => "io",
            SaltError::Aborted(_) => "aborted",
        }
    }
}

impl From<reqwest::Error> for SaltError {
    fn from(err: reqwest::Error) -> Self {
        // reqwest errors carry the URL but never request bodies, so no secret leaks here.
        SaltError::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SaltError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_names_target_and_elapsed() {
        let err = SaltError::Timeout {
            elapsed: Duration::from_secs(3),
            target: "web*".into(),
            partial: Vec::new(),
        };
        let msg = err.to_string();
        assert!(msg.contains("3s"));
        assert!(msg.contains("web*"));
        assert_eq!(err.kind(), "timeout");
    }

    #[test]
    fn config_helper_builds_configuration_kind() {
        let err = SaltError::config("empty target");
        assert_eq!(err.kind(), "configuration");
        assert_eq!(err.to_string(), "invalid configuration: empty target");
    }
}
