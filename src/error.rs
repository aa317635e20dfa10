//! Error types for provisr
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

/// All error types that can occur while provisioning
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// A required command or privilege is missing; aborts before any step runs
    #[error("Prerequisite not met: {0}")]
    Prerequisite(String),

    /// An external command run by a step exited non-zero (or could not run)
    #[error("Command `{command}` failed ({status}): {detail}")]
    StepAction {
        command: String,
        status: String,
        detail: String,
    },

    /// Download failed or returned an empty body
    #[error("Network fetch failed for {url}: {message} (the download may succeed on retry)")]
    NetworkFetch { url: String, message: String },

    /// More than one release asset matched and no tie-break was configured
    #[error("Ambiguous asset in {repo} for '{pattern}': {} candidates ({})", .candidates.len(), .candidates.join(", "))]
    AmbiguousAsset {
        repo: String,
        pattern: String,
        candidates: Vec<String>,
    },

    /// No release asset matched the pattern
    #[error("No asset in the latest release of {repo} matches '{pattern}'")]
    NoMatchingAsset { repo: String, pattern: String },

    /// A step with the same name was already registered
    #[error("Duplicate step: {0}")]
    DuplicateStep(String),

    /// Another run holds the lock file
    #[error("Lock error: {0}")]
    Lock(String),

    /// Invalid configuration value
    #[error("Config error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl ProvisionError {
    /// Build a step action error for an action that is not a single command
    pub fn action(what: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::StepAction {
            command: what.into(),
            status: "error".to_string(),
            detail: detail.into(),
        }
    }

    /// Build a network fetch error
    pub fn fetch(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NetworkFetch {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Short classification used in the run log
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Prerequisite(_) => "prerequisite",
            Self::StepAction { .. } => "action",
            Self::NetworkFetch { .. } => "network",
            Self::AmbiguousAsset { .. } => "ambiguous-asset",
            Self::NoMatchingAsset { .. } => "no-matching-asset",
            Self::DuplicateStep(_) => "duplicate-step",
            Self::Lock(_) => "lock",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
            Self::Http(_) => "http",
        }
    }
}

/// Result type alias for provisr operations
pub type Result<T> = std::result::Result<T, ProvisionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prerequisite_error() {
        let err = ProvisionError::Prerequisite("missing command: git".to_string());
        assert_eq!(err.to_string(), "Prerequisite not met: missing command: git");
        assert_eq!(err.kind(), "prerequisite");
    }

    #[test]
    fn test_step_action_error() {
        let err = ProvisionError::StepAction {
            command: "apt-get install -y git".to_string(),
            status: "exit code 100".to_string(),
            detail: "E: Unable to locate package git".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Command `apt-get install -y git` failed (exit code 100): E: Unable to locate package git"
        );
        assert_eq!(err.kind(), "action");
    }

    #[test]
    fn test_network_fetch_error_suggests_retry() {
        let err = ProvisionError::fetch("https://example.com/x.deb", "timed out");
        let msg = err.to_string();
        assert!(msg.contains("https://example.com/x.deb"));
        assert!(msg.contains("retry"));
        assert_eq!(err.kind(), "network");
    }

    #[test]
    fn test_ambiguous_asset_lists_candidates() {
        let err = ProvisionError::AmbiguousAsset {
            repo: "sharkdp/bat".to_string(),
            pattern: "*_amd64.deb".to_string(),
            candidates: vec!["a_amd64.deb".to_string(), "b_amd64.deb".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("2 candidates"));
        assert!(msg.contains("a_amd64.deb, b_amd64.deb"));
    }

    #[test]
    fn test_no_matching_asset() {
        let err = ProvisionError::NoMatchingAsset {
            repo: "sharkdp/fd".to_string(),
            pattern: "*.rpm".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "No asset in the latest release of sharkdp/fd matches '*.rpm'"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ProvisionError = io_err.into();
        assert!(matches!(err, ProvisionError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let err: ProvisionError = json_err.into();
        assert!(matches!(err, ProvisionError::Json(_)));
    }
}
