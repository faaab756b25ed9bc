//! Error taxonomy for engine operations.
//!
//! Domain errors (`Validation` through `GateFailure`) describe a request the
//! engine refused. `Storage` and `Serialization` are infrastructure failures;
//! the transaction they occurred in is rolled back.

use thiserror::Error;
use uuid::Uuid;

use crate::models::PhaseAgent;

pub type Result<T, E = EngineError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed input: missing fields, out-of-range scores or phases.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The operation violates the entity's state machine.
    #[error("state error: {0}")]
    State(String),

    /// A mutation collided with one already applied.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A precondition gate did not pass. A blocker was opened for it.
    #[error("gate '{gate}' failed: {} missing ({})", .missing.len(), describe(.missing))]
    GateFailure {
        gate: String,
        missing: Vec<PhaseAgent>,
        blocker_id: Uuid,
    },

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Stable name of the error class, exposed to API and MCP callers.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::NotFound { .. } => "not_found",
            Self::State(_) => "state_error",
            Self::Conflict(_) => "conflict_error",
            Self::GateFailure { .. } => "gate_failure",
            Self::Storage(_) | Self::Serialization(_) => "infrastructure_error",
        }
    }

    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Serialization(_))
    }
}

fn describe(missing: &[PhaseAgent]) -> String {
    missing
        .iter()
        .map(|pair| pair.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Phase;

    #[test]
    fn gate_failure_message_lists_missing_pairs() {
        let err = EngineError::GateFailure {
            gate: "invocation_coverage".into(),
            missing: vec![PhaseAgent {
                phase: Phase::RELEASE,
                agent: "release".into(),
            }],
            blocker_id: Uuid::nil(),
        };
        assert_eq!(
            err.to_string(),
            "gate 'invocation_coverage' failed: 1 missing (phase 7/release)"
        );
        assert_eq!(err.kind(), "gate_failure");
    }

    #[test]
    fn storage_errors_are_infrastructure() {
        let err = EngineError::from(rusqlite::Error::InvalidQuery);
        assert!(err.is_infrastructure());
        assert_eq!(err.kind(), "infrastructure_error");
    }
}
