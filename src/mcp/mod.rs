//! MCP server exposing the workflow and knowledge engine to agents.
//!
//! Each tool is a thin wrapper over a typed operation on [`McpServer`]; the
//! typed operations are public so they can be driven without a transport.

mod client;
mod types;

use std::str::FromStr;

pub use client::{ClientError, EngineClient};
pub use types::*;

use rmcp::{
    handler::server::{tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, ServerInfo},
    tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler, ServiceExt,
};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::db::{Database, Evaluation, ScanOutcome};
use crate::error::EngineError;
use crate::models::*;

#[derive(Clone)]
pub struct McpServer {
    db: Database,
    tool_router: ToolRouter<Self>,
}

/// Domain refusals become `invalid_params` carrying the error kind, so the
/// agent can correct its call. Infrastructure failures are internal errors.
fn engine_error(err: EngineError) -> McpError {
    if err.is_infrastructure() {
        tracing::error!("MCP tool failed: {}", err);
        return McpError::internal_error(err.to_string(), None);
    }
    let data = match &err {
        EngineError::GateFailure {
            gate,
            missing,
            blocker_id,
        } => json!({
            "kind": err.kind(),
            "gate": gate,
            "missing": missing,
            "blocker_id": blocker_id,
        }),
        _ => json!({ "kind": err.kind() }),
    };
    McpError::invalid_params(err.to_string(), Some(data))
}

fn json_result<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| McpError::internal_error(e.to_string(), None))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

fn parse_uuid(field: &str, s: &str) -> Result<Uuid, McpError> {
    Uuid::parse_str(s)
        .map_err(|e| McpError::invalid_params(format!("Invalid UUID for {}: {}", field, e), None))
}

fn parse_enum<T: FromStr<Err = String>>(value: &str) -> Result<T, McpError> {
    value.parse().map_err(|e: String| McpError::invalid_params(e, None))
}

impl McpServer {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            tool_router: Self::tool_router(),
        }
    }

    // ============================================================
    // Workflow Operations
    // ============================================================

    pub fn create_feature(&self, req: CreateFeatureRequest) -> Result<Feature, McpError> {
        let severity = req
            .severity
            .as_deref()
            .map(parse_enum)
            .transpose()?
            .unwrap_or(FeatureSeverity::Routine);
        self.db
            .create_feature(CreateFeatureInput {
                id: req.id,
                name: req.name,
                complexity_level: req.complexity_level,
                severity,
                author: req.author,
                branch_name: req.branch_name,
                base_branch: req.base_branch,
            })
            .map_err(engine_error)
    }

    pub fn feature_context(&self, feature_id: &str) -> Result<FeatureContextResponse, McpError> {
        Ok(FeatureContextResponse {
            feature: self.db.get_feature(feature_id).map_err(engine_error)?,
            coverage: self.db.check_coverage(feature_id).map_err(engine_error)?,
            open_blockers: self.db.list_blockers(feature_id, true).map_err(engine_error)?,
            gates: self.db.latest_gates(feature_id).map_err(engine_error)?,
        })
    }

    pub fn list_features(&self, req: ListFeaturesRequest) -> Result<Vec<FeatureSummary>, McpError> {
        let status = req.status.as_deref().map(parse_enum).transpose()?;
        let features = self.db.list_features(status).map_err(engine_error)?;
        Ok(features.into_iter().map(Into::into).collect())
    }

    pub fn transition_phase(&self, req: TransitionPhaseRequest) -> Result<PhaseTransition, McpError> {
        self.db
            .transition(
                &req.feature_id,
                TransitionInput {
                    to_phase: req.to_phase,
                    actor: req.actor,
                    note: req.note,
                },
            )
            .map_err(engine_error)
    }

    pub fn complete_feature(&self, req: FeatureActionRequest) -> Result<Feature, McpError> {
        self.db.complete(&req.feature_id, &req.actor).map_err(engine_error)
    }

    pub fn escalate_feature(&self, req: FeatureActionRequest) -> Result<PhaseTransition, McpError> {
        self.db
            .escalate(&req.feature_id, &req.actor, req.note)
            .map_err(engine_error)
    }

    pub fn resume_feature(&self, req: FeatureActionRequest) -> Result<Feature, McpError> {
        self.db
            .resume(&req.feature_id, &req.actor, req.note.as_deref())
            .map_err(engine_error)
    }

    pub fn cancel_feature(&self, req: FeatureActionRequest) -> Result<Feature, McpError> {
        self.db
            .cancel(&req.feature_id, &req.actor, req.note.as_deref())
            .map_err(engine_error)
    }

    pub fn record_pull_request(&self, req: RecordPullRequestRequest) -> Result<Feature, McpError> {
        self.db
            .record_pull_request(&req.feature_id, &req.pr_reference, &req.actor)
            .map_err(engine_error)
    }

    pub fn feature_history(&self, feature_id: &str) -> Result<FeatureHistory, McpError> {
        self.db.feature_history(feature_id).map_err(engine_error)
    }

    pub fn record_gate(&self, req: RecordGateRequest) -> Result<QualityGate, McpError> {
        let status = parse_enum(&req.status)?;
        self.db
            .record_gate(
                &req.feature_id,
                RecordGateInput {
                    gate_name: req.gate_name,
                    phase: req.phase,
                    status,
                    approver: req.approver,
                    note: req.note,
                },
            )
            .map_err(engine_error)
    }

    pub fn open_blocker(&self, req: OpenBlockerRequest) -> Result<Blocker, McpError> {
        let blocker_type = parse_enum(&req.blocker_type)?;
        let severity = parse_enum(&req.severity)?;
        self.db
            .open_blocker(
                &req.feature_id,
                OpenBlockerInput {
                    blocker_type,
                    phase: req.phase,
                    severity,
                    title: req.title,
                    description: req.description,
                    created_by: req.created_by,
                },
            )
            .map_err(engine_error)
    }

    pub fn list_blockers(&self, req: ListBlockersRequest) -> Result<Vec<Blocker>, McpError> {
        self.db
            .list_blockers(&req.feature_id, req.open_only.unwrap_or(true))
            .map_err(engine_error)
    }

    pub fn resolve_blocker(&self, req: ResolveBlockerRequest) -> Result<Blocker, McpError> {
        let id = parse_uuid("blocker_id", &req.blocker_id)?;
        self.db
            .resolve_blocker(
                id,
                ResolveBlockerInput {
                    resolved_by: req.resolved_by,
                    notes: req.notes,
                },
            )
            .map_err(engine_error)
    }

    pub fn start_invocation(&self, req: StartInvocationRequest) -> Result<AgentInvocation, McpError> {
        self.db
            .start_invocation(
                &req.feature_id,
                StartInvocationInput {
                    phase: req.phase,
                    agent_name: req.agent_name,
                    operation: req.operation,
                    skills: req.skills,
                },
            )
            .map_err(engine_error)
    }

    pub fn end_invocation(&self, req: EndInvocationRequest) -> Result<AgentInvocation, McpError> {
        let id = parse_uuid("invocation_id", &req.invocation_id)?;
        self.db.end_invocation(id).map_err(engine_error)
    }

    pub fn backfill_invocation(
        &self,
        req: BackfillInvocationRequest,
    ) -> Result<BackfillOutcome, McpError> {
        self.db
            .backfill_invocation(
                &req.feature_id,
                BackfillInvocationInput {
                    phase: req.phase,
                    agent_name: req.agent_name,
                    note: req.note,
                    actor: req.actor,
                },
            )
            .map_err(engine_error)
    }

    pub fn check_coverage(&self, feature_id: &str) -> Result<CoverageReport, McpError> {
        self.db.check_coverage(feature_id).map_err(engine_error)
    }

    pub fn submit_task_list(&self, req: SubmitTaskListRequest) -> Result<TaskList, McpError> {
        self.db
            .submit_task_list(
                &req.feature_id,
                req.phase,
                SubmitTaskListInput {
                    tasks: req.tasks,
                    submitted_by: req.submitted_by,
                },
            )
            .map_err(engine_error)
    }

    pub fn get_task_list(&self, req: GetTaskListRequest) -> Result<TaskList, McpError> {
        self.db
            .get_task_list(&req.feature_id, req.phase)
            .map_err(engine_error)
    }

    // ============================================================
    // Knowledge Operations
    // ============================================================

    pub fn create_learning(&self, req: CreateLearningRequest) -> Result<Learning, McpError> {
        let category = parse_enum(&req.category)?;
        let importance = req
            .importance
            .as_deref()
            .map(parse_enum)
            .transpose()?
            .unwrap_or(Importance::Medium);
        self.db
            .create_learning(CreateLearningInput {
                category,
                title: req.title,
                content: req.content,
                confidence: req.confidence,
                importance,
                tags: req.tags,
                source_feature: req.source_feature,
                source_phase: req.source_phase,
                source_agent: req.source_agent,
            })
            .map_err(engine_error)
    }

    pub fn evolve_learning(&self, req: EvolveLearningRequest) -> Result<Learning, McpError> {
        let id = parse_uuid("learning_id", &req.learning_id)?;
        self.db
            .evolve_learning(
                id,
                EvolveLearningInput {
                    content: req.content,
                    title: req.title,
                    delta_summary: req.delta_summary,
                    confidence: req.confidence,
                    tags: req.tags,
                    ..Default::default()
                },
            )
            .map_err(engine_error)
    }

    pub fn validate_learning(&self, req: ValidateLearningRequest) -> Result<Learning, McpError> {
        let id = parse_uuid("learning_id", &req.learning_id)?;
        self.db
            .validate_learning(id, &req.validated_by)
            .map_err(engine_error)
    }

    pub fn reference_learning(&self, learning_id: &str) -> Result<Learning, McpError> {
        let id = parse_uuid("learning_id", learning_id)?;
        self.db.reference_learning(id).map_err(engine_error)
    }

    pub fn list_learnings(&self, req: ListLearningsRequest) -> Result<Vec<Learning>, McpError> {
        let filter = LearningFilter {
            category: req.category.as_deref().map(parse_enum).transpose()?,
            active_only: req.active_only,
            min_confidence: req.min_confidence,
        };
        self.db.list_learnings(&filter).map_err(engine_error)
    }

    pub fn learning_chain(&self, learning_id: &str) -> Result<Vec<Learning>, McpError> {
        let id = parse_uuid("learning_id", learning_id)?;
        self.db.evolution_chain(id).map_err(engine_error)
    }

    pub fn scan_conflicts(&self, req: ScanConflictsRequest) -> Result<ScanOutcome, McpError> {
        let id = parse_uuid("learning_id", &req.learning_id)?;
        self.db
            .scan_conflicts(id, &req.detected_by)
            .map_err(engine_error)
    }

    pub fn report_conflict(&self, req: ReportConflictRequest) -> Result<LearningConflict, McpError> {
        let input = DetectConflictInput {
            learning_a_id: parse_uuid("learning_a_id", &req.learning_a_id)?,
            learning_b_id: parse_uuid("learning_b_id", &req.learning_b_id)?,
            conflict_type: parse_enum(&req.conflict_type)?,
            description: req.description,
            detected_by: req.detected_by,
        };
        self.db.detect_conflict(input).map_err(engine_error)
    }

    pub fn resolve_conflict(&self, req: ResolveConflictRequest) -> Result<LearningConflict, McpError> {
        let id = parse_uuid("conflict_id", &req.conflict_id)?;
        let winning_learning_id = req
            .winning_learning_id
            .as_deref()
            .map(|w| parse_uuid("winning_learning_id", w))
            .transpose()?;
        self.db
            .resolve_conflict(
                id,
                ResolveConflictInput {
                    resolution: req.resolution,
                    winning_learning_id,
                    resolved_by: req.resolved_by,
                    losing_confidence: req.losing_confidence,
                },
            )
            .map_err(engine_error)
    }

    pub fn compute_targets(&self, learning_id: &str) -> Result<Vec<PropagationTarget>, McpError> {
        let id = parse_uuid("learning_id", learning_id)?;
        self.db.compute_targets(id).map_err(engine_error)
    }

    pub fn propagation_queue(&self) -> Result<Vec<ReadyTarget>, McpError> {
        self.db.ready_queue().map_err(engine_error)
    }

    pub fn record_propagation(
        &self,
        req: RecordPropagationRequest,
    ) -> Result<PropagationRecord, McpError> {
        let input = RecordPropagationInput {
            learning_id: parse_uuid("learning_id", &req.learning_id)?,
            target_type: parse_enum(&req.target_type)?,
            target_path: req.target_path,
            actor: req.actor,
            section: req.section,
        };
        self.db.record_propagation(input).map_err(engine_error)
    }

    // ============================================================
    // Health Operations
    // ============================================================

    pub fn evaluate_feature(&self, feature_id: &str) -> Result<Evaluation<FeatureEval>, McpError> {
        self.db.evaluate_feature(feature_id).map_err(engine_error)
    }

    pub fn evaluate_system(
        &self,
        req: EvaluateSystemRequest,
    ) -> Result<Evaluation<SystemHealthEval>, McpError> {
        let window = match req.window_days {
            Some(days) => EvalWindow::try_from(days)
                .map_err(|e| McpError::invalid_params(e, None))?,
            None => EvalWindow::Month,
        };
        self.db.evaluate_system(window).map_err(engine_error)
    }

    pub fn list_alerts(&self) -> Result<Vec<EvalAlert>, McpError> {
        self.db.active_alerts().map_err(engine_error)
    }

    pub fn acknowledge_alert(&self, req: AcknowledgeAlertRequest) -> Result<EvalAlert, McpError> {
        let id = parse_uuid("alert_id", &req.alert_id)?;
        self.db
            .acknowledge_alert(id, AcknowledgeAlertInput { actor: req.actor })
            .map_err(engine_error)
    }

    pub fn resolve_alert(&self, req: ResolveAlertRequest) -> Result<EvalAlert, McpError> {
        let id = parse_uuid("alert_id", &req.alert_id)?;
        self.db
            .resolve_alert(
                id,
                ResolveAlertInput {
                    actor: req.actor,
                    note: req.note,
                },
            )
            .map_err(engine_error)
    }
}

#[tool_router]
impl McpServer {
    // ============================================================
    // Feature Workflow Tools
    // ============================================================

    #[tool(
        name = "create_feature",
        description = "Register a new feature. It starts in phase 0 (Planning) with status IN_PROGRESS."
    )]
    async fn create_feature_tool(
        &self,
        params: Parameters<CreateFeatureRequest>,
    ) -> Result<CallToolResult, McpError> {
        json_result(&self.create_feature(params.0)?)
    }

    #[tool(
        name = "get_feature",
        description = "Get a feature with its invocation coverage, open blockers and latest gate decisions. Call this before acting on a feature."
    )]
    async fn get_feature_tool(
        &self,
        params: Parameters<FeatureIdRequest>,
    ) -> Result<CallToolResult, McpError> {
        json_result(&self.feature_context(&params.0.feature_id)?)
    }

    #[tool(name = "list_features", description = "List features, optionally filtered by status.")]
    async fn list_features_tool(
        &self,
        params: Parameters<ListFeaturesRequest>,
    ) -> Result<CallToolResult, McpError> {
        json_result(&self.list_features(params.0)?)
    }

    #[tool(
        name = "feature_history",
        description = "Full audit trail of a feature: transitions, gates, blockers, invocations and task lists."
    )]
    async fn feature_history_tool(
        &self,
        params: Parameters<FeatureIdRequest>,
    ) -> Result<CallToolResult, McpError> {
        json_result(&self.feature_history(&params.0.feature_id)?)
    }

    #[tool(
        name = "transition_phase",
        description = "Move a feature to another phase. Forward moves must go exactly one phase ahead. Backward moves to any earlier phase are allowed and count as rework. Phase 8 is only reachable through complete_feature."
    )]
    async fn transition_phase_tool(
        &self,
        params: Parameters<TransitionPhaseRequest>,
    ) -> Result<CallToolResult, McpError> {
        json_result(&self.transition_phase(params.0)?)
    }

    #[tool(
        name = "complete_feature",
        description = "Complete a feature in phase 7. Requires a closed invocation for every expected agent in phases 1-7; otherwise a VALIDATION_FAILED blocker is opened and the error lists the missing phase/agent pairs."
    )]
    async fn complete_feature_tool(
        &self,
        params: Parameters<FeatureActionRequest>,
    ) -> Result<CallToolResult, McpError> {
        json_result(&self.complete_feature(params.0)?)
    }

    #[tool(
        name = "escalate_feature",
        description = "Escalate a feature for human attention. Records an escalation and sets status BLOCKED until resume_feature."
    )]
    async fn escalate_feature_tool(
        &self,
        params: Parameters<FeatureActionRequest>,
    ) -> Result<CallToolResult, McpError> {
        json_result(&self.escalate_feature(params.0)?)
    }

    #[tool(name = "resume_feature", description = "Return a BLOCKED feature to IN_PROGRESS.")]
    async fn resume_feature_tool(
        &self,
        params: Parameters<FeatureActionRequest>,
    ) -> Result<CallToolResult, McpError> {
        json_result(&self.resume_feature(params.0)?)
    }

    #[tool(
        name = "cancel_feature",
        description = "Cancel a feature. Cancelled features accept no further transitions."
    )]
    async fn cancel_feature_tool(
        &self,
        params: Parameters<FeatureActionRequest>,
    ) -> Result<CallToolResult, McpError> {
        json_result(&self.cancel_feature(params.0)?)
    }

    #[tool(
        name = "record_pull_request",
        description = "Attach the release pull request to a feature. Subject to the same invocation coverage gate as completion."
    )]
    async fn record_pull_request_tool(
        &self,
        params: Parameters<RecordPullRequestRequest>,
    ) -> Result<CallToolResult, McpError> {
        json_result(&self.record_pull_request(params.0)?)
    }

    // ============================================================
    // Gate and Blocker Tools
    // ============================================================

    #[tool(
        name = "record_gate",
        description = "Record a quality gate decision. Each call appends; the latest record per gate and phase is authoritative."
    )]
    async fn record_gate_tool(
        &self,
        params: Parameters<RecordGateRequest>,
    ) -> Result<CallToolResult, McpError> {
        json_result(&self.record_gate(params.0)?)
    }

    #[tool(name = "open_blocker", description = "Record an impediment on a feature.")]
    async fn open_blocker_tool(
        &self,
        params: Parameters<OpenBlockerRequest>,
    ) -> Result<CallToolResult, McpError> {
        json_result(&self.open_blocker(params.0)?)
    }

    #[tool(name = "list_blockers", description = "List blockers on a feature, open ones by default.")]
    async fn list_blockers_tool(
        &self,
        params: Parameters<ListBlockersRequest>,
    ) -> Result<CallToolResult, McpError> {
        json_result(&self.list_blockers(params.0)?)
    }

    #[tool(
        name = "resolve_blocker",
        description = "Resolve a blocker. Resolved blockers cannot be reopened."
    )]
    async fn resolve_blocker_tool(
        &self,
        params: Parameters<ResolveBlockerRequest>,
    ) -> Result<CallToolResult, McpError> {
        json_result(&self.resolve_blocker(params.0)?)
    }

    // ============================================================
    // Telemetry Tools
    // ============================================================

    #[tool(
        name = "start_invocation",
        description = "Record that an agent started work in a phase. Call end_invocation with the returned id when done; only closed invocations count toward coverage."
    )]
    async fn start_invocation_tool(
        &self,
        params: Parameters<StartInvocationRequest>,
    ) -> Result<CallToolResult, McpError> {
        json_result(&self.start_invocation(params.0)?)
    }

    #[tool(name = "end_invocation", description = "Close an open invocation and record its duration.")]
    async fn end_invocation_tool(
        &self,
        params: Parameters<EndInvocationRequest>,
    ) -> Result<CallToolResult, McpError> {
        json_result(&self.end_invocation(params.0)?)
    }

    #[tool(
        name = "backfill_invocation",
        description = "Reconstruct a missing invocation from the feature's phase history. Requires a note explaining why it was not recorded live."
    )]
    async fn backfill_invocation_tool(
        &self,
        params: Parameters<BackfillInvocationRequest>,
    ) -> Result<CallToolResult, McpError> {
        json_result(&self.backfill_invocation(params.0)?)
    }

    #[tool(
        name = "check_coverage",
        description = "Report which expected phase/agent pairs have closed invocations. Read-only."
    )]
    async fn check_coverage_tool(
        &self,
        params: Parameters<FeatureIdRequest>,
    ) -> Result<CallToolResult, McpError> {
        json_result(&self.check_coverage(&params.0.feature_id)?)
    }

    #[tool(
        name = "submit_task_list",
        description = "Replace the task list for a feature phase. The whole list is rejected if any task is malformed."
    )]
    async fn submit_task_list_tool(
        &self,
        params: Parameters<SubmitTaskListRequest>,
    ) -> Result<CallToolResult, McpError> {
        json_result(&self.submit_task_list(params.0)?)
    }

    #[tool(name = "get_task_list", description = "Get the task list for a feature phase.")]
    async fn get_task_list_tool(
        &self,
        params: Parameters<GetTaskListRequest>,
    ) -> Result<CallToolResult, McpError> {
        json_result(&self.get_task_list(params.0)?)
    }

    // ============================================================
    // Learning Tools
    // ============================================================

    #[tool(name = "create_learning", description = "Record a new learning.")]
    async fn create_learning_tool(
        &self,
        params: Parameters<CreateLearningRequest>,
    ) -> Result<CallToolResult, McpError> {
        json_result(&self.create_learning(params.0)?)
    }

    #[tool(
        name = "evolve_learning",
        description = "Refine a learning. Creates a successor and marks the predecessor superseded. Unset fields are inherited."
    )]
    async fn evolve_learning_tool(
        &self,
        params: Parameters<EvolveLearningRequest>,
    ) -> Result<CallToolResult, McpError> {
        json_result(&self.evolve_learning(params.0)?)
    }

    #[tool(
        name = "validate_learning",
        description = "Confirm a learning held up in practice. Raises confidence."
    )]
    async fn validate_learning_tool(
        &self,
        params: Parameters<ValidateLearningRequest>,
    ) -> Result<CallToolResult, McpError> {
        json_result(&self.validate_learning(params.0)?)
    }

    #[tool(
        name = "reference_learning",
        description = "Note that a learning was consulted. Raises confidence slightly."
    )]
    async fn reference_learning_tool(
        &self,
        params: Parameters<LearningIdRequest>,
    ) -> Result<CallToolResult, McpError> {
        json_result(&self.reference_learning(&params.0.learning_id)?)
    }

    #[tool(name = "list_learnings", description = "List learnings by category, activity and confidence.")]
    async fn list_learnings_tool(
        &self,
        params: Parameters<ListLearningsRequest>,
    ) -> Result<CallToolResult, McpError> {
        json_result(&self.list_learnings(params.0)?)
    }

    #[tool(
        name = "learning_chain",
        description = "The evolution chain containing a learning, oldest first."
    )]
    async fn learning_chain_tool(
        &self,
        params: Parameters<LearningIdRequest>,
    ) -> Result<CallToolResult, McpError> {
        json_result(&self.learning_chain(&params.0.learning_id)?)
    }

    // ============================================================
    // Conflict Tools
    // ============================================================

    #[tool(
        name = "scan_conflicts",
        description = "Compare a learning against active learnings of the same category and open conflicts for likely contradictions."
    )]
    async fn scan_conflicts_tool(
        &self,
        params: Parameters<ScanConflictsRequest>,
    ) -> Result<CallToolResult, McpError> {
        json_result(&self.scan_conflicts(params.0)?)
    }

    #[tool(
        name = "report_conflict",
        description = "Record a conflict between two learnings. Open conflicts block propagation of both."
    )]
    async fn report_conflict_tool(
        &self,
        params: Parameters<ReportConflictRequest>,
    ) -> Result<CallToolResult, McpError> {
        json_result(&self.report_conflict(params.0)?)
    }

    #[tool(
        name = "resolve_conflict",
        description = "Resolve a conflict, optionally naming the winning learning and lowering the loser's confidence."
    )]
    async fn resolve_conflict_tool(
        &self,
        params: Parameters<ResolveConflictRequest>,
    ) -> Result<CallToolResult, McpError> {
        json_result(&self.resolve_conflict(params.0)?)
    }

    // ============================================================
    // Propagation Tools
    // ============================================================

    #[tool(
        name = "compute_targets",
        description = "Recompute where a learning should be propagated, scored against registered destinations."
    )]
    async fn compute_targets_tool(
        &self,
        params: Parameters<LearningIdRequest>,
    ) -> Result<CallToolResult, McpError> {
        json_result(&self.compute_targets(&params.0.learning_id)?)
    }

    #[tool(
        name = "propagation_queue",
        description = "Targets of propagation-ready learnings that have not been propagated yet, most relevant first."
    )]
    async fn propagation_queue_tool(&self) -> Result<CallToolResult, McpError> {
        json_result(&self.propagation_queue()?)
    }

    #[tool(
        name = "record_propagation",
        description = "Record that a learning was written into a target. The learning must be propagation-ready."
    )]
    async fn record_propagation_tool(
        &self,
        params: Parameters<RecordPropagationRequest>,
    ) -> Result<CallToolResult, McpError> {
        json_result(&self.record_propagation(params.0)?)
    }

    // ============================================================
    // Health Tools
    // ============================================================

    #[tool(
        name = "evaluate_feature",
        description = "Score a feature's efficiency and quality, store the snapshot and raise alerts for breached thresholds."
    )]
    async fn evaluate_feature_tool(
        &self,
        params: Parameters<FeatureIdRequest>,
    ) -> Result<CallToolResult, McpError> {
        json_result(&self.evaluate_feature(&params.0.feature_id)?)
    }

    #[tool(
        name = "evaluate_system",
        description = "Score overall workflow health over a 7, 30 or 90 day window."
    )]
    async fn evaluate_system_tool(
        &self,
        params: Parameters<EvaluateSystemRequest>,
    ) -> Result<CallToolResult, McpError> {
        json_result(&self.evaluate_system(params.0)?)
    }

    #[tool(name = "list_alerts", description = "Unresolved health alerts, newest first.")]
    async fn list_alerts_tool(&self) -> Result<CallToolResult, McpError> {
        json_result(&self.list_alerts()?)
    }

    #[tool(name = "acknowledge_alert", description = "Acknowledge an alert without resolving it.")]
    async fn acknowledge_alert_tool(
        &self,
        params: Parameters<AcknowledgeAlertRequest>,
    ) -> Result<CallToolResult, McpError> {
        json_result(&self.acknowledge_alert(params.0)?)
    }

    #[tool(name = "resolve_alert", description = "Resolve an alert.")]
    async fn resolve_alert_tool(
        &self,
        params: Parameters<ResolveAlertRequest>,
    ) -> Result<CallToolResult, McpError> {
        json_result(&self.resolve_alert(params.0)?)
    }
}

#[tool_handler]
impl ServerHandler for McpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: rmcp::model::Implementation {
                name: "rocket-phasegate".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                title: None,
                icons: None,
                website_url: None,
            },
            capabilities: rmcp::model::ServerCapabilities::builder()
                .enable_tools()
                .build(),
            instructions: Some(
                r#"RocketPhasegate guards a phased delivery workflow and keeps the team's learnings.

PHASES:
0 Planning, 1 Discovery, 2 Architecture, 3 Review, 4 Build, 5 Integration,
6 Documentation, 7 Release, 8 Complete.
Move forward one phase at a time with transition_phase. Going back is allowed
but counts as rework and lowers the feature's quality score.

AGENT WORKFLOW (when working a phase):
1. Call get_feature to see status, coverage and open blockers
2. Call start_invocation with your phase and agent name
3. Do the work; record gate decisions with record_gate and impediments with open_blocker
4. Call end_invocation with the id from step 2

Expected agents per phase: 1 discovery, 2 architect, 3 guardian, 4 builder,
5 integrator, 6 documenter, 7 release. complete_feature and record_pull_request
refuse until every pair has a closed invocation. If one was missed, use
backfill_invocation with a note rather than inventing a live one.

LEARNINGS:
- create_learning for new knowledge; evolve_learning to refine instead of duplicating
- validate_learning when it held up, reference_learning when you consulted it
- report_conflict or scan_conflicts when two learnings disagree
- Propagate only what propagation_queue returns, then call record_propagation

HEALTH:
evaluate_feature and evaluate_system store score snapshots and raise alerts.
Review list_alerts and acknowledge or resolve them."#
                    .into(),
            ),
            ..Default::default()
        }
    }
}

pub async fn run_stdio_server(db: Database) -> anyhow::Result<()> {
    use tokio::io::{stdin, stdout};

    tracing::info!("Starting MCP server via stdio");

    let service = McpServer::new(db);
    let server = service.serve((stdin(), stdout())).await?;

    let quit_reason = server.waiting().await?;
    tracing::info!("MCP server stopped: {:?}", quit_reason);

    Ok(())
}
