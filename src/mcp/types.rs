//! Request and response types for MCP tools.
//!
//! Enumerations travel as their wire strings and are parsed by the tool, so
//! agents see plain string parameters in the schema.

use rmcp::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{Blocker, CoverageReport, Feature, QualityGate};

// ============================================================
// Workflow Requests
// ============================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CreateFeatureRequest {
    #[schemars(description = "Caller-chosen feature identifier, e.g. 'FEAT-142'")]
    pub id: String,
    pub name: String,
    #[schemars(description = "1 (small), 2 (medium) or 3 (large)")]
    pub complexity_level: u8,
    #[schemars(description = "ROUTINE, EXPEDITED or CRITICAL. Defaults to ROUTINE.")]
    #[serde(default)]
    pub severity: Option<String>,
    pub author: String,
    #[serde(default)]
    pub branch_name: Option<String>,
    #[serde(default)]
    pub base_branch: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct FeatureIdRequest {
    #[schemars(description = "The feature identifier")]
    pub feature_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListFeaturesRequest {
    #[schemars(description = "Filter by status: IN_PROGRESS, BLOCKED, COMPLETED or CANCELLED")]
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct TransitionPhaseRequest {
    pub feature_id: String,
    #[schemars(
        description = "Target phase 0-7. Forward moves go exactly one phase ahead; backward moves may go to any earlier phase."
    )]
    pub to_phase: u8,
    pub actor: String,
    #[schemars(description = "Reason for the move, recorded with the transition")]
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct FeatureActionRequest {
    pub feature_id: String,
    #[schemars(description = "Who is performing the action")]
    pub actor: String,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RecordPullRequestRequest {
    pub feature_id: String,
    #[schemars(description = "Pull request number or URL")]
    pub pr_reference: String,
    pub actor: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RecordGateRequest {
    pub feature_id: String,
    #[schemars(description = "Gate name, e.g. 'spec_review' or 'security_scan'")]
    pub gate_name: String,
    pub phase: u8,
    #[schemars(description = "PENDING, APPROVED or REJECTED")]
    pub status: String,
    #[serde(default)]
    pub approver: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct OpenBlockerRequest {
    pub feature_id: String,
    #[schemars(
        description = "SPEC_THRASHING, BUDGET_EXCEEDED, VALIDATION_FAILED, HUMAN_DECISION_REQUIRED, TEST_FAILURE, DEPENDENCY_BLOCKED or OTHER"
    )]
    pub blocker_type: String,
    pub phase: u8,
    #[schemars(description = "LOW, MEDIUM, HIGH or CRITICAL")]
    pub severity: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub created_by: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListBlockersRequest {
    pub feature_id: String,
    #[schemars(description = "Only blockers that are not RESOLVED. Defaults to true.")]
    #[serde(default)]
    pub open_only: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ResolveBlockerRequest {
    pub blocker_id: String,
    pub resolved_by: String,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct StartInvocationRequest {
    pub feature_id: String,
    pub phase: u8,
    #[schemars(description = "Agent name, e.g. 'builder' for phase 4")]
    pub agent_name: String,
    #[schemars(description = "What the agent is doing")]
    pub operation: String,
    #[serde(default)]
    pub skills: Vec<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct EndInvocationRequest {
    #[schemars(description = "The id returned by start_invocation")]
    pub invocation_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct BackfillInvocationRequest {
    pub feature_id: String,
    pub phase: u8,
    pub agent_name: String,
    #[schemars(description = "Why the invocation was not recorded live")]
    pub note: String,
    pub actor: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SubmitTaskListRequest {
    pub feature_id: String,
    pub phase: u8,
    #[schemars(
        description = "Task objects. Each needs id, title and status (pending, in-progress, completed or done); other fields are kept as-is."
    )]
    pub tasks: Vec<Value>,
    pub submitted_by: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetTaskListRequest {
    pub feature_id: String,
    pub phase: u8,
}

// ============================================================
// Knowledge Requests
// ============================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CreateLearningRequest {
    #[schemars(
        description = "decision, pattern, gotcha, convention, architecture, rationale, optimization or integration"
    )]
    pub category: String,
    pub title: String,
    pub content: String,
    #[schemars(description = "Initial confidence between 0 and 1")]
    pub confidence: f64,
    #[schemars(description = "HIGH, MEDIUM or LOW. Defaults to MEDIUM.")]
    #[serde(default)]
    pub importance: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub source_feature: Option<String>,
    #[serde(default)]
    pub source_phase: Option<u8>,
    #[serde(default)]
    pub source_agent: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct EvolveLearningRequest {
    #[schemars(description = "The learning being refined. It must not already be superseded.")]
    pub learning_id: String,
    pub content: String,
    #[serde(default)]
    pub title: Option<String>,
    #[schemars(description = "What changed relative to the predecessor")]
    #[serde(default)]
    pub delta_summary: Option<String>,
    #[schemars(description = "New confidence. Inherited from the predecessor when omitted.")]
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct LearningIdRequest {
    pub learning_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ValidateLearningRequest {
    pub learning_id: String,
    pub validated_by: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListLearningsRequest {
    #[serde(default)]
    pub category: Option<String>,
    #[schemars(description = "Exclude superseded learnings")]
    #[serde(default)]
    pub active_only: bool,
    #[serde(default)]
    pub min_confidence: Option<f64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ScanConflictsRequest {
    pub learning_id: String,
    pub detected_by: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ReportConflictRequest {
    pub learning_a_id: String,
    pub learning_b_id: String,
    #[schemars(description = "CONTRADICTION, SCOPE_OVERLAP or VERSION_DRIFT")]
    pub conflict_type: String,
    pub description: String,
    pub detected_by: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ResolveConflictRequest {
    pub conflict_id: String,
    pub resolution: String,
    #[schemars(description = "One of the two learnings in the conflict")]
    #[serde(default)]
    pub winning_learning_id: Option<String>,
    pub resolved_by: String,
    #[schemars(description = "Confidence to assign to the losing learning. Requires a winner.")]
    #[serde(default)]
    pub losing_confidence: Option<f64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RecordPropagationRequest {
    pub learning_id: String,
    #[schemars(description = "agent_memory, skill or agent_definition")]
    pub target_type: String,
    pub target_path: String,
    pub actor: String,
    #[serde(default)]
    pub section: Option<String>,
}

// ============================================================
// Health Requests
// ============================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct EvaluateSystemRequest {
    #[schemars(description = "Window in days: 7, 30 or 90. Defaults to 30.")]
    #[serde(default)]
    pub window_days: Option<u32>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct AcknowledgeAlertRequest {
    pub alert_id: String,
    pub actor: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ResolveAlertRequest {
    pub alert_id: String,
    pub actor: String,
    #[serde(default)]
    pub note: Option<String>,
}

// ============================================================
// Response Types
// ============================================================

/// Everything an agent needs before acting on a feature.
#[derive(Debug, Serialize, Deserialize)]
pub struct FeatureContextResponse {
    pub feature: Feature,
    pub coverage: CoverageReport,
    pub open_blockers: Vec<Blocker>,
    /// Latest decision per gate and phase
    pub gates: Vec<QualityGate>,
}
