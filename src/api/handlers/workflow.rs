use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use super::ApiResult;
use crate::db::Database;
use crate::models::*;

#[derive(Debug, Deserialize)]
pub struct ListFeaturesQuery {
    pub status: Option<FeatureStatus>,
}

#[derive(Debug, Deserialize)]
pub struct ListBlockersQuery {
    #[serde(default)]
    pub open_only: bool,
}

/// Body shared by status changes that only need an actor and a free note.
#[derive(Debug, Deserialize)]
pub struct ActorBody {
    pub actor: String,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PullRequestBody {
    pub pr_reference: String,
    pub actor: String,
}

#[derive(Debug, Deserialize)]
pub struct MergeBody {
    #[serde(default)]
    pub merged_at: Option<DateTime<Utc>>,
}

// ============================================================
// Features
// ============================================================

pub async fn list_features(
    State(db): State<Database>,
    Query(query): Query<ListFeaturesQuery>,
) -> ApiResult<Json<Vec<FeatureSummary>>> {
    let features = db.list_features(query.status)?;
    Ok(Json(features.into_iter().map(Into::into).collect()))
}

pub async fn create_feature(
    State(db): State<Database>,
    Json(input): Json<CreateFeatureInput>,
) -> ApiResult<(StatusCode, Json<Feature>)> {
    Ok((StatusCode::CREATED, Json(db.create_feature(input)?)))
}

pub async fn get_feature(
    State(db): State<Database>,
    Path(id): Path<String>,
) -> ApiResult<Json<Feature>> {
    Ok(Json(db.get_feature(&id)?))
}

pub async fn get_feature_history(
    State(db): State<Database>,
    Path(id): Path<String>,
) -> ApiResult<Json<FeatureHistory>> {
    Ok(Json(db.feature_history(&id)?))
}

// ============================================================
// Phase Transitions
// ============================================================

pub async fn list_transitions(
    State(db): State<Database>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<PhaseTransition>>> {
    Ok(Json(db.list_transitions(&id)?))
}

pub async fn transition(
    State(db): State<Database>,
    Path(id): Path<String>,
    Json(input): Json<TransitionInput>,
) -> ApiResult<(StatusCode, Json<PhaseTransition>)> {
    Ok((StatusCode::CREATED, Json(db.transition(&id, input)?)))
}

pub async fn complete_feature(
    State(db): State<Database>,
    Path(id): Path<String>,
    Json(body): Json<ActorBody>,
) -> ApiResult<Json<Feature>> {
    Ok(Json(db.complete(&id, &body.actor)?))
}

pub async fn escalate_feature(
    State(db): State<Database>,
    Path(id): Path<String>,
    Json(body): Json<ActorBody>,
) -> ApiResult<(StatusCode, Json<PhaseTransition>)> {
    let transition = db.escalate(&id, &body.actor, body.note)?;
    Ok((StatusCode::CREATED, Json(transition)))
}

pub async fn resume_feature(
    State(db): State<Database>,
    Path(id): Path<String>,
    Json(body): Json<ActorBody>,
) -> ApiResult<Json<Feature>> {
    Ok(Json(db.resume(&id, &body.actor, body.note.as_deref())?))
}

pub async fn cancel_feature(
    State(db): State<Database>,
    Path(id): Path<String>,
    Json(body): Json<ActorBody>,
) -> ApiResult<Json<Feature>> {
    Ok(Json(db.cancel(&id, &body.actor, body.note.as_deref())?))
}

pub async fn update_vcs(
    State(db): State<Database>,
    Path(id): Path<String>,
    Json(input): Json<UpdateVcsInput>,
) -> ApiResult<Json<Feature>> {
    Ok(Json(db.update_vcs(&id, input)?))
}

pub async fn record_pull_request(
    State(db): State<Database>,
    Path(id): Path<String>,
    Json(body): Json<PullRequestBody>,
) -> ApiResult<Json<Feature>> {
    Ok(Json(db.record_pull_request(&id, &body.pr_reference, &body.actor)?))
}

pub async fn record_merge(
    State(db): State<Database>,
    Path(id): Path<String>,
    Json(body): Json<MergeBody>,
) -> ApiResult<Json<Feature>> {
    Ok(Json(db.record_merge(&id, body.merged_at)?))
}

// ============================================================
// Quality Gates
// ============================================================

pub async fn list_gates(
    State(db): State<Database>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<QualityGate>>> {
    Ok(Json(db.list_gates(&id)?))
}

pub async fn latest_gates(
    State(db): State<Database>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<QualityGate>>> {
    Ok(Json(db.latest_gates(&id)?))
}

pub async fn record_gate(
    State(db): State<Database>,
    Path(id): Path<String>,
    Json(input): Json<RecordGateInput>,
) -> ApiResult<(StatusCode, Json<QualityGate>)> {
    Ok((StatusCode::CREATED, Json(db.record_gate(&id, input)?)))
}

// ============================================================
// Blockers
// ============================================================

pub async fn list_blockers(
    State(db): State<Database>,
    Path(id): Path<String>,
    Query(query): Query<ListBlockersQuery>,
) -> ApiResult<Json<Vec<Blocker>>> {
    Ok(Json(db.list_blockers(&id, query.open_only)?))
}

pub async fn open_blocker(
    State(db): State<Database>,
    Path(id): Path<String>,
    Json(input): Json<OpenBlockerInput>,
) -> ApiResult<(StatusCode, Json<Blocker>)> {
    Ok((StatusCode::CREATED, Json(db.open_blocker(&id, input)?)))
}

pub async fn get_blocker(
    State(db): State<Database>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Blocker>> {
    Ok(Json(db.get_blocker(id)?))
}

pub async fn start_blocker(
    State(db): State<Database>,
    Path(id): Path<Uuid>,
    Json(body): Json<ActorBody>,
) -> ApiResult<Json<Blocker>> {
    Ok(Json(db.start_blocker(id, &body.actor)?))
}

pub async fn resolve_blocker(
    State(db): State<Database>,
    Path(id): Path<Uuid>,
    Json(input): Json<ResolveBlockerInput>,
) -> ApiResult<Json<Blocker>> {
    Ok(Json(db.resolve_blocker(id, input)?))
}

pub async fn escalate_blocker(
    State(db): State<Database>,
    Path(id): Path<Uuid>,
    Json(input): Json<EscalateBlockerInput>,
) -> ApiResult<Json<Blocker>> {
    Ok(Json(db.escalate_blocker(id, input)?))
}

// ============================================================
// Invocation Telemetry
// ============================================================

pub async fn list_invocations(
    State(db): State<Database>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<AgentInvocation>>> {
    Ok(Json(db.list_invocations(&id)?))
}

pub async fn start_invocation(
    State(db): State<Database>,
    Path(id): Path<String>,
    Json(input): Json<StartInvocationInput>,
) -> ApiResult<(StatusCode, Json<AgentInvocation>)> {
    Ok((StatusCode::CREATED, Json(db.start_invocation(&id, input)?)))
}

pub async fn get_invocation(
    State(db): State<Database>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<AgentInvocation>> {
    Ok(Json(db.get_invocation(id)?))
}

pub async fn end_invocation(
    State(db): State<Database>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<AgentInvocation>> {
    Ok(Json(db.end_invocation(id)?))
}

pub async fn backfill_invocation(
    State(db): State<Database>,
    Path(id): Path<String>,
    Json(input): Json<BackfillInvocationInput>,
) -> ApiResult<(StatusCode, Json<BackfillOutcome>)> {
    Ok((StatusCode::CREATED, Json(db.backfill_invocation(&id, input)?)))
}

pub async fn check_coverage(
    State(db): State<Database>,
    Path(id): Path<String>,
) -> ApiResult<Json<CoverageReport>> {
    Ok(Json(db.check_coverage(&id)?))
}

// ============================================================
// Task Lists
// ============================================================

pub async fn get_task_list(
    State(db): State<Database>,
    Path((id, phase)): Path<(String, u8)>,
) -> ApiResult<Json<TaskList>> {
    Ok(Json(db.get_task_list(&id, phase)?))
}

pub async fn submit_task_list(
    State(db): State<Database>,
    Path((id, phase)): Path<(String, u8)>,
    Json(input): Json<SubmitTaskListInput>,
) -> ApiResult<Json<TaskList>> {
    Ok(Json(db.submit_task_list(&id, phase, input)?))
}
