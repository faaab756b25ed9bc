use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A flagged contradiction or overlap between two learnings.
///
/// While a conflict is `OPEN` or `INVESTIGATING`, neither learning can be
/// propagated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LearningConflict {
    pub id: Uuid,
    pub learning_a_id: Uuid,
    pub learning_b_id: Uuid,
    pub conflict_type: ConflictType,
    pub description: String,
    pub detected_by: String,
    pub status: ConflictStatus,
    pub resolution: Option<String>,
    pub winning_learning_id: Option<Uuid>,
    pub resolved_by: Option<String>,
    pub detected_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl LearningConflict {
    /// Hours since detection. Derived, never stored.
    pub fn hours_open(&self, now: DateTime<Utc>) -> f64 {
        let end = self.resolved_at.unwrap_or(now);
        (end - self.detected_at).num_seconds().max(0) as f64 / 3600.0
    }

    pub fn involves(&self, learning_id: Uuid) -> bool {
        self.learning_a_id == learning_id || self.learning_b_id == learning_id
    }
}

sql_enum! {
    pub enum ConflictType {
        Contradiction => "CONTRADICTION",
        ScopeOverlap => "SCOPE_OVERLAP",
        VersionDrift => "VERSION_DRIFT",
    }
}

sql_enum! {
    pub enum ConflictStatus {
        Open => "OPEN",
        Investigating => "INVESTIGATING",
        Resolved => "RESOLVED",
        Deferred => "DEFERRED",
    }
}

impl ConflictStatus {
    /// Whether a conflict in this status keeps its learnings out of propagation.
    pub fn blocks_propagation(&self) -> bool {
        matches!(self, Self::Open | Self::Investigating)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectConflictInput {
    pub learning_a_id: Uuid,
    pub learning_b_id: Uuid,
    pub conflict_type: ConflictType,
    pub description: String,
    pub detected_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveConflictInput {
    pub resolution: String,
    #[serde(default)]
    pub winning_learning_id: Option<Uuid>,
    pub resolved_by: String,
    /// Set the losing learning's confidence directly. Requires a winner.
    #[serde(default)]
    pub losing_confidence: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn conflict(detected_at: DateTime<Utc>) -> LearningConflict {
        LearningConflict {
            id: Uuid::new_v4(),
            learning_a_id: Uuid::new_v4(),
            learning_b_id: Uuid::new_v4(),
            conflict_type: ConflictType::Contradiction,
            description: "disagree".into(),
            detected_by: "guardian".into(),
            status: ConflictStatus::Open,
            resolution: None,
            winning_learning_id: None,
            resolved_by: None,
            detected_at,
            resolved_at: None,
        }
    }

    #[test]
    fn hours_open_is_derived_from_detection_time() {
        let now = Utc::now();
        let c = conflict(now - Duration::hours(30));
        assert!((c.hours_open(now) - 30.0).abs() < 0.01);
    }

    #[test]
    fn only_open_and_investigating_block_propagation() {
        assert!(ConflictStatus::Open.blocks_propagation());
        assert!(ConflictStatus::Investigating.blocks_propagation());
        assert!(!ConflictStatus::Resolved.blocks_propagation());
        assert!(!ConflictStatus::Deferred.blocks_propagation());
    }
}
