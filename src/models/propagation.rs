use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::learning::{Learning, LearningCategory};

sql_enum! {
    /// Kinds of document a learning can be written into.
    pub enum TargetType {
        /// Shared memory file read by every agent.
        AgentMemory => "agent_memory",
        Skill => "skill",
        AgentDefinition => "agent_definition",
    }
}

/// A registered document that learnings may be propagated into.
///
/// The targeter scores each learning against every destination; `agent`,
/// `tags` and `categories` describe what the destination is about.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PropagationDestination {
    pub id: Uuid,
    pub target_type: TargetType,
    pub target_path: String,
    pub agent: Option<String>,
    pub tags: Vec<String>,
    pub categories: Vec<LearningCategory>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterDestinationInput {
    pub target_type: TargetType,
    pub target_path: String,
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub categories: Vec<LearningCategory>,
}

/// A scored candidate destination for one learning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PropagationTarget {
    pub id: Uuid,
    pub learning_id: Uuid,
    pub target_type: TargetType,
    pub target_path: String,
    pub relevance_score: f64,
    pub computed_at: DateTime<Utc>,
}

impl PropagationTarget {
    pub fn meets_relevance(&self, threshold: f64) -> bool {
        self.relevance_score >= threshold
    }
}

/// Evidence that a learning was written into a target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PropagationRecord {
    pub id: Uuid,
    pub learning_id: Uuid,
    pub target_type: TargetType,
    pub target_path: String,
    pub actor: String,
    pub section: Option<String>,
    pub propagated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordPropagationInput {
    pub learning_id: Uuid,
    pub target_type: TargetType,
    pub target_path: String,
    pub actor: String,
    #[serde(default)]
    pub section: Option<String>,
}

/// Derived per-learning propagation progress.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PropagationStatus {
    NoTargets,
    Pending,
    Partial,
    Complete,
}

impl PropagationStatus {
    pub fn derive(candidates: usize, propagated: usize) -> Self {
        if candidates == 0 {
            Self::NoTargets
        } else if propagated == 0 {
            Self::Pending
        } else if propagated >= candidates {
            Self::Complete
        } else {
            Self::Partial
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoTargets => "no_targets",
            Self::Pending => "pending",
            Self::Partial => "partial",
            Self::Complete => "complete",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PropagationSummary {
    pub learning_id: Uuid,
    pub candidates: usize,
    pub propagated: usize,
    pub status: PropagationStatus,
}

/// An eligible target waiting in the propagation queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyTarget {
    pub learning_id: Uuid,
    pub title: String,
    pub confidence: f64,
    pub target: PropagationTarget,
}

/// Dashboard row: a learning with its propagation and conflict state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningOverview {
    pub learning: Learning,
    pub propagation_ready: bool,
    pub propagation: PropagationSummary,
    pub open_conflicts: usize,
}
