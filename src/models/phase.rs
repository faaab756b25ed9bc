use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;

/// One of the nine ordinal workflow stages.
///
/// Phases 0 through 7 are reachable through generic transitions. Phase 8 is
/// only reachable through the completion gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Phase(u8);

impl Phase {
    pub const PLANNING: Phase = Phase(0);
    pub const DISCOVERY: Phase = Phase(1);
    pub const ARCHITECTURE: Phase = Phase(2);
    pub const REVIEW: Phase = Phase(3);
    pub const BUILD: Phase = Phase(4);
    pub const INTEGRATION: Phase = Phase(5);
    pub const DOCUMENTATION: Phase = Phase(6);
    pub const RELEASE: Phase = Phase(7);
    pub const COMPLETE: Phase = Phase(8);

    /// Phases whose work must be covered by agent telemetry before release.
    pub const TRACKED: [Phase; 7] = [
        Phase::DISCOVERY,
        Phase::ARCHITECTURE,
        Phase::REVIEW,
        Phase::BUILD,
        Phase::INTEGRATION,
        Phase::DOCUMENTATION,
        Phase::RELEASE,
    ];

    pub fn new(value: u8) -> Result<Self, EngineError> {
        if value > Self::COMPLETE.0 {
            return Err(EngineError::Validation(format!(
                "phase {} out of range 0-8",
                value
            )));
        }
        Ok(Phase(value))
    }

    pub fn value(self) -> u8 {
        self.0
    }

    pub fn name(self) -> &'static str {
        match self.0 {
            0 => "Planning",
            1 => "Discovery",
            2 => "Architecture",
            3 => "Review",
            4 => "Build",
            5 => "Integration",
            6 => "Documentation",
            7 => "Release",
            _ => "Complete",
        }
    }

    /// The agent whose completed invocation the coverage gate expects in this phase.
    pub fn expected_agent(self) -> Option<&'static str> {
        match self.0 {
            1 => Some("discovery"),
            2 => Some("architect"),
            3 => Some("guardian"),
            4 => Some("builder"),
            5 => Some("integrator"),
            6 => Some("documenter"),
            7 => Some("release"),
            _ => None,
        }
    }

    pub(crate) fn from_db(value: i64) -> Phase {
        Phase(value.clamp(0, Self::COMPLETE.0 as i64) as u8)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.0, self.name())
    }
}

sql_enum! {
    /// How a phase change relates to the feature's current phase.
    pub enum TransitionKind {
        Forward => "FORWARD",
        /// Rework: a return to any earlier phase.
        Backward => "BACKWARD",
        /// Status escalation recorded in place; the phase does not change.
        Escalation => "ESCALATION",
    }
}

/// Decide whether a generic transition from `from` to `to` is legal.
///
/// Forward moves go exactly one phase ahead, backward moves go anywhere
/// earlier. Phase 8 is never a legal generic target.
pub fn classify_transition(from: Phase, to: Phase) -> Result<TransitionKind, EngineError> {
    if to == Phase::COMPLETE {
        return Err(EngineError::State(
            "phase 8 is reachable only through complete".to_string(),
        ));
    }
    if to == from {
        return Err(EngineError::State(format!(
            "feature is already in phase {}",
            from.value()
        )));
    }
    if to < from {
        return Ok(TransitionKind::Backward);
    }
    if to.value() == from.value() + 1 {
        Ok(TransitionKind::Forward)
    } else {
        Err(EngineError::State(format!(
            "forward skip: phase {} -> {}",
            from.value(),
            to.value()
        )))
    }
}

/// Immutable record of one phase change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseTransition {
    pub id: Uuid,
    pub feature_id: String,
    pub from_phase: Phase,
    pub to_phase: Phase,
    /// Agent or human that requested the move.
    pub actor: String,
    pub kind: TransitionKind,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Input for a generic phase transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionInput {
    pub to_phase: u8,
    pub actor: String,
    #[serde(default)]
    pub note: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phase(n: u8) -> Phase {
        Phase::new(n).unwrap()
    }

    #[test]
    fn forward_transition_only_allows_next_phase() {
        for n in 0..7 {
            assert_eq!(
                classify_transition(phase(n), phase(n + 1)).unwrap(),
                TransitionKind::Forward
            );
        }
        assert!(matches!(
            classify_transition(phase(2), phase(4)),
            Err(EngineError::State(msg)) if msg.contains("forward skip")
        ));
    }

    #[test]
    fn backward_transition_allowed_to_any_earlier_phase() {
        for to in 0..6 {
            assert_eq!(
                classify_transition(phase(6), phase(to)).unwrap(),
                TransitionKind::Backward
            );
        }
    }

    #[test]
    fn complete_phase_is_not_a_generic_target() {
        assert!(matches!(
            classify_transition(phase(7), phase(8)),
            Err(EngineError::State(_))
        ));
    }

    #[test]
    fn same_phase_is_rejected() {
        assert!(classify_transition(phase(3), phase(3)).is_err());
    }

    #[test]
    fn phase_out_of_range_is_validation_error() {
        assert!(matches!(Phase::new(9), Err(EngineError::Validation(_))));
    }

    #[test]
    fn tracked_phases_all_have_expected_agents() {
        let agents: Vec<_> = Phase::TRACKED
            .iter()
            .filter_map(|p| p.expected_agent())
            .collect();
        assert_eq!(
            agents,
            vec![
                "discovery",
                "architect",
                "guardian",
                "builder",
                "integrator",
                "documenter",
                "release"
            ]
        );
        assert!(Phase::PLANNING.expected_agent().is_none());
    }
}
