//! Dispatch and node status state machine
//!
//! A node transitions `NEW_OBJECT -> RUNNING -> (COMPLETED | FAILED |
//! CANCELLED)` exactly once. The workflow-level status additionally passes
//! through the post-processing states after the final wave.

use serde::{Deserialize, Serialize};

/// Status of a node or of a whole dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    /// Freshly initialized, nothing has run yet
    NewObject,
    /// Currently executing
    Running,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
    /// Cancelled before completion
    Cancelled,
    /// All waves done, post-processing in flight (workflow only)
    Postprocessing,
    /// Post-processing deferred to the client (workflow only)
    PendingPostprocessing,
    /// Post-processing raised an error (workflow only)
    PostprocessingFailed,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NewObject => "NEW_OBJECT",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
            Self::Postprocessing => "POSTPROCESSING",
            Self::PendingPostprocessing => "PENDING_POSTPROCESSING",
            Self::PostprocessingFailed => "POSTPROCESSING_FAILED",
        }
    }

    /// True while nothing has happened to the object yet
    pub fn is_new(&self) -> bool {
        matches!(self, Self::NewObject)
    }

    /// Terminal states: no further transition is permitted
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed
                | Self::Failed
                | Self::Cancelled
                | Self::PendingPostprocessing
                | Self::PostprocessingFailed
        )
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<&str> for Status {
    fn from(s: &str) -> Self {
        match s {
            "RUNNING" => Self::Running,
            "COMPLETED" => Self::Completed,
            "FAILED" => Self::Failed,
            "CANCELLED" => Self::Cancelled,
            "POSTPROCESSING" => Self::Postprocessing,
            "PENDING_POSTPROCESSING" => Self::PendingPostprocessing,
            "POSTPROCESSING_FAILED" => Self::PostprocessingFailed,
            _ => Self::NewObject,
        }
    }
}
