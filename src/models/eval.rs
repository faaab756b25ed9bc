use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

sql_enum! {
    pub enum HealthStatus {
        Healthy => "HEALTHY",
        Concerning => "CONCERNING",
        Critical => "CRITICAL",
    }
}

impl HealthStatus {
    /// Classify an overall score. Lower bounds are inclusive.
    pub fn from_score(overall: f64, healthy_min: f64, concerning_min: f64) -> Self {
        if overall >= healthy_min {
            Self::Healthy
        } else if overall >= concerning_min {
            Self::Concerning
        } else {
            Self::Critical
        }
    }
}

/// Reporting window for system-wide evals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum EvalWindow {
    Week,
    Month,
    Quarter,
}

impl EvalWindow {
    pub fn days(&self) -> u32 {
        match self {
            Self::Week => 7,
            Self::Month => 30,
            Self::Quarter => 90,
        }
    }
}

impl TryFrom<u32> for EvalWindow {
    type Error = String;

    fn try_from(days: u32) -> Result<Self, Self::Error> {
        match days {
            7 => Ok(Self::Week),
            30 => Ok(Self::Month),
            90 => Ok(Self::Quarter),
            other => Err(format!("unsupported window {} days, expected 7, 30 or 90", other)),
        }
    }
}

impl From<EvalWindow> for u32 {
    fn from(window: EvalWindow) -> Self {
        window.days()
    }
}

/// Inputs and intermediate values behind a feature's scores.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FeatureBreakdown {
    pub actual_minutes: f64,
    pub expected_minutes: f64,
    pub efficiency_ratio: f64,
    pub gates_approved: u32,
    pub gates_rejected: u32,
    pub approval_rate: f64,
    pub backward_transitions: u32,
    pub thrash_count: u32,
    pub open_blockers: u32,
}

/// A point-in-time score snapshot for one feature.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeatureEval {
    pub id: Uuid,
    pub feature_id: String,
    pub efficiency_score: f64,
    pub quality_score: f64,
    pub overall_score: f64,
    pub health_status: HealthStatus,
    pub breakdown: FeatureBreakdown,
    pub evaluated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SystemBreakdown {
    pub total_learnings: u32,
    pub high_confidence_learnings: u32,
    pub open_conflicts: u32,
    pub oldest_open_conflict_hours: f64,
    pub open_blockers: u32,
    /// Overall score per feature in the window.
    pub feature_scores: BTreeMap<String, f64>,
}

/// A point-in-time system-wide snapshot over a reporting window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemHealthEval {
    pub id: Uuid,
    pub window: EvalWindow,
    pub features_evaluated: u32,
    pub efficiency_score: f64,
    pub quality_score: f64,
    pub overall_score: f64,
    pub health_status: HealthStatus,
    pub breakdown: SystemBreakdown,
    pub evaluated_at: DateTime<Utc>,
}

sql_enum! {
    pub enum AlertSeverity {
        Warning => "WARNING",
        Critical => "CRITICAL",
    }
}

sql_enum! {
    /// Metrics that can raise alerts.
    pub enum AlertDimension {
        OverallScore => "overall_score",
        EfficiencyRatio => "efficiency_ratio",
        ThrashCount => "thrash_count",
        OpenBlockers => "open_blockers",
        OpenConflicts => "open_conflicts",
        ConflictAgeHours => "conflict_age_hours",
    }
}

/// A threshold breach. Acknowledged and resolved only by explicit actors;
/// later recomputations never resolve it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvalAlert {
    pub id: Uuid,
    pub severity: AlertSeverity,
    pub dimension: AlertDimension,
    pub message: String,
    pub current_value: f64,
    pub threshold: f64,
    /// `feature:<id>` or `system:<days>d`.
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub resolution_note: Option<String>,
}

impl EvalAlert {
    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}

/// A breach found by the scorer, before deduplication and persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertCandidate {
    pub severity: AlertSeverity,
    pub dimension: AlertDimension,
    pub current_value: f64,
    pub threshold: f64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcknowledgeAlertInput {
    pub actor: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveAlertInput {
    pub actor: String,
    #[serde(default)]
    pub note: Option<String>,
}
