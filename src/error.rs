//! Error types for the deployment orchestrator.
//!
//! Errors are split by the phase that raises them: configuration loading,
//! planning, and driver calls. Configuration and planning errors abort a run
//! before anything is mutated; driver errors are contained to one action.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::sections::SectionName;

/// The main error type for the deployment orchestrator.
#[derive(Debug, Error)]
pub enum DeployError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Planning errors.
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// Resource driver errors.
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configuration file exists but could not be read.
    #[error("Failed to read {path}: {source}")]
    Load {
        /// Path of the unreadable file.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A line in a configuration file is malformed.
    #[error("{path}:{line}: {message}")]
    Parse {
        /// File containing the malformed line.
        path: PathBuf,
        /// One-based line number.
        line: usize,
        /// Description of the problem.
        message: String,
    },

    /// A value could not be coerced to the requested type.
    #[error("{key}: expected {expected}, got '{value}'")]
    Type {
        /// Key whose value is malformed.
        key: String,
        /// Expected type description.
        expected: &'static str,
        /// Offending value (masked for secret keys).
        value: String,
    },

    /// Required keys are missing or empty.
    #[error("Missing required configuration: {}", keys.join(", "))]
    MissingRequired {
        /// Names of the missing keys.
        keys: Vec<String>,
    },

    /// A value is present but not acceptable.
    #[error("{key}: {message}")]
    Invalid {
        /// Key with the invalid value.
        key: String,
        /// Why the value was rejected.
        message: String,
    },
}

/// Planning errors.
#[derive(Debug, Error)]
pub enum PlanError {
    /// A requested section is not part of the catalog.
    #[error("Unknown section '{name}' (valid sections: {valid})")]
    UnknownSection {
        /// The unknown name as given by the user.
        name: String,
        /// Comma separated list of valid section names.
        valid: String,
    },

    /// A selected section depends on a section disabled by configuration.
    #[error("Section '{section}' requires '{dependency}', which is disabled by configuration")]
    UnsatisfiedDependency {
        /// The selected section.
        section: SectionName,
        /// The disabled dependency.
        dependency: SectionName,
    },
}

/// Errors raised by resource drivers while inspecting or reconciling.
#[derive(Debug, Error)]
pub enum DriverError {
    /// An external command is not installed.
    #[error("Command not found: {program} (is it installed and on PATH?)")]
    CommandNotFound {
        /// Program name.
        program: String,
    },

    /// An external command exited unsuccessfully.
    #[error("Command failed: {command} (exit={status}){}", detail_suffix(.stderr))]
    CommandFailed {
        /// Command line (never includes stdin payloads).
        command: String,
        /// Exit status, -1 when killed by a signal.
        status: i32,
        /// Captured standard error, truncated.
        stderr: String,
    },

    /// An operation did not finish in time.
    #[error("{operation} did not finish within {}", humanize(*.after))]
    Timeout {
        /// Operation description.
        operation: String,
        /// Timeout that elapsed.
        after: Duration,
    },

    /// A response could not be understood.
    #[error("Invalid response: {message}")]
    InvalidResponse {
        /// Description of the response issue.
        message: String,
    },

    /// The remote side is not in a state the driver can act on.
    #[error("Precondition failed: {message}")]
    Precondition {
        /// Description of the unmet precondition.
        message: String,
    },

    /// HTTP request failure.
    #[error("HTTP error: {message}")]
    Http {
        /// Description of the HTTP failure.
        message: String,
    },
}

/// Result type alias for orchestrator operations.
pub type Result<T> = std::result::Result<T, DeployError>;

/// Result type alias for configuration accessors.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Markers in command stderr that indicate a transient failure.
const TRANSIENT_MARKERS: &[&str] = &[
    "503",
    "UNAVAILABLE",
    "deadline exceeded",
    "rate limit",
    "RESOURCE_EXHAUSTED",
    "try again",
];

impl DeployError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if the error was raised before any remote mutation could
    /// happen (configuration or planning).
    #[must_use]
    pub const fn is_pre_execution(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Plan(_))
    }
}

impl ConfigError {
    /// Creates an invalid-value error for a key.
    #[must_use]
    pub fn invalid(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.into(),
            message: message.into(),
        }
    }
}

impl DriverError {
    /// Creates a precondition error.
    #[must_use]
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition {
            message: message.into(),
        }
    }

    /// Creates an invalid response error.
    #[must_use]
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }

    /// Returns true if retrying the same call may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::CommandFailed { stderr, .. } => {
                let lower = stderr.to_ascii_lowercase();
                TRANSIENT_MARKERS
                    .iter()
                    .any(|marker| lower.contains(&marker.to_ascii_lowercase()))
            }
            Self::Http { .. } => true,
            _ => false,
        }
    }
}

fn detail_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {stderr}")
    }
}

/// Formats a duration compactly (`90s` → `1m30s`).
#[must_use]
pub fn humanize(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis < 1000 {
        return format!("{millis}ms");
    }
    let secs = duration.as_secs();
    if secs < 60 {
        return format!("{secs}s");
    }
    let (minutes, seconds) = (secs / 60, secs % 60);
    if seconds == 0 {
        format!("{minutes}m")
    } else {
        format!("{minutes}m{seconds:02}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_command_failures_are_retryable() {
        let err = DriverError::CommandFailed {
            command: String::from("gcloud run services describe backend"),
            status: 1,
            stderr: String::from("ERROR: (gcloud) HTTP 503 Service Unavailable"),
        };
        assert!(err.is_retryable());

        let err = DriverError::CommandFailed {
            command: String::from("gcloud run deploy"),
            status: 1,
            stderr: String::from("PERMISSION_DENIED"),
        };
        assert!(!err.is_retryable());
        assert!(!DriverError::precondition("nope").is_retryable());
    }

    #[test]
    fn test_humanize() {
        assert_eq!(humanize(Duration::from_millis(250)), "250ms");
        assert_eq!(humanize(Duration::from_secs(45)), "45s");
        assert_eq!(humanize(Duration::from_secs(900)), "15m");
        assert_eq!(humanize(Duration::from_secs(90)), "1m30s");
    }

    #[test]
    fn test_pre_execution_classification() {
        let err = DeployError::from(ConfigError::MissingRequired {
            keys: vec![String::from("GCP_PROJECT_ID")],
        });
        assert!(err.is_pre_execution());
        assert!(err.to_string().contains("GCP_PROJECT_ID"));
        assert!(!DeployError::internal("boom").is_pre_execution());
    }
}
