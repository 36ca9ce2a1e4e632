use serde::{Deserialize, Serialize};
use sqlx::Type;
use std::fmt;

/// Lifecycle state of an `ImportBatch`.
///
/// `Processing` is the only state from which an external caller may request
/// `Cancelling`; every other transition belongs to the pipeline itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "batch_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Processing,
    Cancelling,
    Cancelled,
    Completed,
    Failed,
}

impl BatchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Cancelling => "cancelling",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_processing_cancelling_cancelled_failed_are_nonterminal_or_terminal_correctly() {
        assert!(!BatchStatus::Processing.is_terminal());
        assert!(!BatchStatus::Cancelling.is_terminal());
        assert!(BatchStatus::Cancelled.is_terminal());
        assert!(BatchStatus::Completed.is_terminal());
        assert!(BatchStatus::Failed.is_terminal());
    }
}
