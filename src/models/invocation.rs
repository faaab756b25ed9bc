use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::phase::Phase;

/// One bracketed window of agent work within a phase.
///
/// Created open by `start_invocation` and closed exactly once by
/// `end_invocation`, which derives the duration. Backfilled rows carry a
/// mandatory provenance note.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentInvocation {
    pub id: Uuid,
    pub feature_id: String,
    pub phase: Phase,
    pub agent_name: String,
    pub operation: String,
    pub skills: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    /// Present only on rows written by the backfill remediation path.
    pub backfill_note: Option<String>,
}

impl AgentInvocation {
    pub fn is_closed(&self) -> bool {
        self.ended_at.is_some() && self.duration_ms.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartInvocationInput {
    pub phase: u8,
    pub agent_name: String,
    pub operation: String,
    #[serde(default)]
    pub skills: Vec<String>,
}

/// Explicit remediation for missing telemetry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillInvocationInput {
    pub phase: u8,
    pub agent_name: String,
    /// Why the invocation is being reconstructed. Required.
    pub note: String,
    pub actor: String,
}

/// A backfilled invocation and the coverage report computed right after it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackfillOutcome {
    pub invocation: AgentInvocation,
    pub coverage: CoverageReport,
}

/// A (phase, agent) pair the coverage gate expects to see.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct PhaseAgent {
    pub phase: Phase,
    pub agent: String,
}

impl std::fmt::Display for PhaseAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "phase {}/{}", self.phase.value(), self.agent)
    }
}

/// Result of the invocation coverage check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CoverageReport {
    pub feature_id: String,
    pub expected: Vec<PhaseAgent>,
    pub covered: Vec<PhaseAgent>,
    pub missing: Vec<PhaseAgent>,
    pub passed: bool,
}

impl CoverageReport {
    /// Compare closed invocations against the fixed phase → agent map.
    ///
    /// Agent names match case-insensitively after trimming.
    pub fn evaluate<'a>(
        feature_id: &str,
        closed: impl IntoIterator<Item = (Phase, &'a str)>,
    ) -> Self {
        let seen: HashSet<(Phase, String)> = closed
            .into_iter()
            .map(|(phase, agent)| (phase, agent.trim().to_lowercase()))
            .collect();

        let expected: Vec<PhaseAgent> = Phase::TRACKED
            .iter()
            .filter_map(|phase| {
                phase.expected_agent().map(|agent| PhaseAgent {
                    phase: *phase,
                    agent: agent.to_string(),
                })
            })
            .collect();

        let (covered, missing): (Vec<_>, Vec<_>) = expected
            .iter()
            .cloned()
            .partition(|pair| seen.contains(&(pair.phase, pair.agent.clone())));

        Self {
            feature_id: feature_id.to_string(),
            passed: missing.is_empty(),
            expected,
            covered,
            missing,
        }
    }

    /// Human-readable list of missing pairs, used in blocker descriptions.
    pub fn describe_missing(&self) -> String {
        self.missing
            .iter()
            .map(|pair| pair.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}
