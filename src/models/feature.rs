use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::phase::Phase;

/// A unit of work tracked through the phase sequence.
///
/// Features are created once and never deleted. They end either by reaching
/// phase 8 through `complete` (status `COMPLETED`) or by cancellation.
/// Version-control fields are facts reported by the orchestrator; the engine
/// never creates branches or pull requests itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Feature {
    pub id: String,
    pub name: String,
    /// 1 (small) to 3 (large). Selects the expected duration used by efficiency scoring.
    pub complexity_level: u8,
    pub severity: FeatureSeverity,
    pub current_phase: Phase,
    pub status: FeatureStatus,
    pub author: String,
    pub branch_name: Option<String>,
    pub base_branch: Option<String>,
    pub pr_reference: Option<String>,
    pub merged_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Feature {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

sql_enum! {
    /// How urgently a feature must move through the workflow.
    pub enum FeatureSeverity {
        Routine => "ROUTINE",
        Expedited => "EXPEDITED",
        Critical => "CRITICAL",
    }
}

sql_enum! {
    /// Lifecycle status of a feature.
    ///
    /// - `InProgress`: Moving through phases
    /// - `Blocked`: Escalated, transitions refused until resumed
    /// - `Completed`: Reached phase 8 through the completion gate
    /// - `Cancelled`: Abandoned; kept for history
    pub enum FeatureStatus {
        InProgress => "IN_PROGRESS",
        Blocked => "BLOCKED",
        Completed => "COMPLETED",
        Cancelled => "CANCELLED",
    }
}

impl FeatureStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

/// Input for creating a new feature. The feature starts at phase 0, `IN_PROGRESS`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateFeatureInput {
    /// Caller-chosen identifier, unique across all features.
    pub id: String,
    pub name: String,
    pub complexity_level: u8,
    #[serde(default = "default_severity")]
    pub severity: FeatureSeverity,
    pub author: String,
    #[serde(default)]
    pub branch_name: Option<String>,
    #[serde(default)]
    pub base_branch: Option<String>,
}

fn default_severity() -> FeatureSeverity {
    FeatureSeverity::Routine
}

/// Version-control facts reported by the orchestrator. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateVcsInput {
    pub branch_name: Option<String>,
    pub base_branch: Option<String>,
}

/// Minimal feature view for list responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureSummary {
    pub id: String,
    pub name: String,
    pub current_phase: Phase,
    pub status: FeatureStatus,
    pub severity: FeatureSeverity,
}

impl From<Feature> for FeatureSummary {
    fn from(f: Feature) -> Self {
        Self {
            id: f.id,
            name: f.name,
            current_phase: f.current_phase,
            status: f.status,
            severity: f.severity,
        }
    }
}
