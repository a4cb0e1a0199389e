//! Error types for Arbiter

use thiserror::Error;

/// Result type alias using Arbiter's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Arbiter error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // Selection errors (E001-E099)
    #[error("No eligible arms: the strategy has no registered arms to choose from.")]
    NoEligibleArms,

    #[error(
        "No eligible agents for task type '{task_type}' (specializations: [{}]). Defer or queue the task.",
        .specializations.join(", ")
    )]
    NoEligibleAgents {
        task_type: String,
        specializations: Vec<String>,
    },

    #[error("Arm '{0}' is not registered.")]
    UnknownArm(String),

    // Dimension errors (E100-E199)
    #[error("Invalid context dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    // Snapshot errors (E200-E299)
    #[error("Snapshot does not match the running engine: {0}")]
    SnapshotMismatch(String),

    #[error("Snapshot is malformed: {0}")]
    InvalidSnapshot(String),

    // Config errors (E300-E399)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Worker errors (E400-E499)
    #[error("Feedback worker did not stop within {0} seconds")]
    WorkerShutdownTimeout(u64),

    // Generic errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoEligibleArms => "E001",
            Self::NoEligibleAgents { .. } => "E002",
            Self::UnknownArm(_) => "E003",
            Self::InvalidDimension { .. } => "E100",
            Self::SnapshotMismatch(_) => "E200",
            Self::InvalidSnapshot(_) => "E201",
            Self::ConfigError(_) => "E300",
            Self::WorkerShutdownTimeout(_) => "E400",
            Self::Serialization(_) => "E900",
            Self::Other(_) | Self::Io(_) => "E9999",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::NoEligibleArms => Some("Register arms with add_arm before selecting".to_string()),
            Self::NoEligibleAgents { .. } => {
                Some("Retry once running tasks complete and capacity frees up".to_string())
            }
            Self::InvalidDimension { expected, .. } => Some(format!(
                "Set engine.dimension = {} or export a snapshot from a matching engine",
                expected
            )),
            Self::SnapshotMismatch(_) => {
                Some("Import snapshots only into an engine with the same strategy".to_string())
            }
            Self::WorkerShutdownTimeout(_) => {
                Some("Increase feedback.shutdown_timeout_secs".to_string())
            }
            _ => None,
        }
    }

    /// Whether the caller should defer and retry rather than treat this as a failure
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NoEligibleArms | Self::NoEligibleAgents { .. })
    }
}
