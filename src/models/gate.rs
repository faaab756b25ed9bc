use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::phase::Phase;

/// One evaluation of a named approval checkpoint.
///
/// Gate rows are never updated. Re-approval after a rejection appends a new
/// row, so the ledger keeps the full decision history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualityGate {
    pub id: Uuid,
    pub feature_id: String,
    pub gate_name: String,
    pub phase: Phase,
    pub status: GateStatus,
    pub approver: Option<String>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

sql_enum! {
    pub enum GateStatus {
        Pending => "PENDING",
        Approved => "APPROVED",
        Rejected => "REJECTED",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordGateInput {
    pub gate_name: String,
    pub phase: u8,
    pub status: GateStatus,
    #[serde(default)]
    pub approver: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

/// A recorded obstruction to progress.
///
/// Blockers are opened by external actors or by the engine itself when the
/// coverage gate fails. They are never deleted; only their status moves.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Blocker {
    pub id: Uuid,
    pub feature_id: String,
    pub blocker_type: BlockerType,
    pub phase: Phase,
    pub status: BlockerStatus,
    pub severity: BlockerSeverity,
    pub title: String,
    pub description: Option<String>,
    pub created_by: String,
    pub resolved_by: Option<String>,
    pub resolution_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

sql_enum! {
    pub enum BlockerType {
        /// Requirements keep changing between phases.
        SpecThrashing => "SPEC_THRASHING",
        BudgetExceeded => "BUDGET_EXCEEDED",
        /// Validation failed, including the invocation coverage gate.
        ValidationFailed => "VALIDATION_FAILED",
        HumanDecisionRequired => "HUMAN_DECISION_REQUIRED",
        TestFailure => "TEST_FAILURE",
        DependencyBlocked => "DEPENDENCY_BLOCKED",
        Other => "OTHER",
    }
}

sql_enum! {
    /// - `Open`: Newly recorded
    /// - `InProgress`: Someone is working on it
    /// - `Resolved`: Terminal
    /// - `Escalated`: Handed up for a human decision
    pub enum BlockerStatus {
        Open => "OPEN",
        InProgress => "IN_PROGRESS",
        Resolved => "RESOLVED",
        Escalated => "ESCALATED",
    }
}

sql_enum! {
    pub enum BlockerSeverity {
        Low => "LOW",
        Medium => "MEDIUM",
        High => "HIGH",
        Critical => "CRITICAL",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenBlockerInput {
    pub blocker_type: BlockerType,
    pub phase: u8,
    pub severity: BlockerSeverity,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub created_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveBlockerInput {
    pub resolved_by: String,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalateBlockerInput {
    #[serde(default)]
    pub notes: Option<String>,
}
