use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use super::ApiResult;
use crate::db::{Database, ScanOutcome};
use crate::models::*;

#[derive(Debug, Deserialize)]
pub struct ValidateBody {
    pub validated_by: String,
}

#[derive(Debug, Deserialize)]
pub struct ScanBody {
    pub detected_by: String,
}

#[derive(Debug, Deserialize)]
pub struct ListConflictsQuery {
    pub status: Option<ConflictStatus>,
}

// ============================================================
// Learnings
// ============================================================

pub async fn list_learnings(
    State(db): State<Database>,
    Query(filter): Query<LearningFilter>,
) -> ApiResult<Json<Vec<Learning>>> {
    Ok(Json(db.list_learnings(&filter)?))
}

pub async fn create_learning(
    State(db): State<Database>,
    Json(input): Json<CreateLearningInput>,
) -> ApiResult<(StatusCode, Json<Learning>)> {
    Ok((StatusCode::CREATED, Json(db.create_learning(input)?)))
}

pub async fn get_learning(
    State(db): State<Database>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Learning>> {
    Ok(Json(db.get_learning(id)?))
}

pub async fn evolve_learning(
    State(db): State<Database>,
    Path(id): Path<Uuid>,
    Json(input): Json<EvolveLearningInput>,
) -> ApiResult<(StatusCode, Json<Learning>)> {
    Ok((StatusCode::CREATED, Json(db.evolve_learning(id, input)?)))
}

pub async fn validate_learning(
    State(db): State<Database>,
    Path(id): Path<Uuid>,
    Json(body): Json<ValidateBody>,
) -> ApiResult<Json<Learning>> {
    Ok(Json(db.validate_learning(id, &body.validated_by)?))
}

pub async fn reference_learning(
    State(db): State<Database>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Learning>> {
    Ok(Json(db.reference_learning(id)?))
}

pub async fn evolution_chain(
    State(db): State<Database>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<Learning>>> {
    Ok(Json(db.evolution_chain(id)?))
}

pub async fn ready_learnings(State(db): State<Database>) -> ApiResult<Json<Vec<Learning>>> {
    Ok(Json(db.propagation_ready_learnings()?))
}

// ============================================================
// Conflicts
// ============================================================

pub async fn list_conflicts(
    State(db): State<Database>,
    Query(query): Query<ListConflictsQuery>,
) -> ApiResult<Json<Vec<LearningConflict>>> {
    Ok(Json(db.list_conflicts(query.status)?))
}

pub async fn detect_conflict(
    State(db): State<Database>,
    Json(input): Json<DetectConflictInput>,
) -> ApiResult<(StatusCode, Json<LearningConflict>)> {
    Ok((StatusCode::CREATED, Json(db.detect_conflict(input)?)))
}

pub async fn get_conflict(
    State(db): State<Database>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<LearningConflict>> {
    Ok(Json(db.get_conflict(id)?))
}

pub async fn conflicts_for(
    State(db): State<Database>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<LearningConflict>>> {
    Ok(Json(db.conflicts_for(id)?))
}

pub async fn scan_conflicts(
    State(db): State<Database>,
    Path(id): Path<Uuid>,
    Json(body): Json<ScanBody>,
) -> ApiResult<Json<ScanOutcome>> {
    Ok(Json(db.scan_conflicts(id, &body.detected_by)?))
}

pub async fn investigate_conflict(
    State(db): State<Database>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<LearningConflict>> {
    Ok(Json(db.investigate_conflict(id)?))
}

pub async fn resolve_conflict(
    State(db): State<Database>,
    Path(id): Path<Uuid>,
    Json(input): Json<ResolveConflictInput>,
) -> ApiResult<Json<LearningConflict>> {
    Ok(Json(db.resolve_conflict(id, input)?))
}

pub async fn defer_conflict(
    State(db): State<Database>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<LearningConflict>> {
    Ok(Json(db.defer_conflict(id)?))
}

// ============================================================
// Propagation
// ============================================================

pub async fn list_destinations(
    State(db): State<Database>,
) -> ApiResult<Json<Vec<PropagationDestination>>> {
    Ok(Json(db.list_destinations()?))
}

pub async fn register_destination(
    State(db): State<Database>,
    Json(input): Json<RegisterDestinationInput>,
) -> ApiResult<(StatusCode, Json<PropagationDestination>)> {
    Ok((StatusCode::CREATED, Json(db.register_destination(input)?)))
}

pub async fn list_targets(
    State(db): State<Database>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<PropagationTarget>>> {
    Ok(Json(db.list_targets(id)?))
}

pub async fn compute_targets(
    State(db): State<Database>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<PropagationTarget>>> {
    Ok(Json(db.compute_targets(id)?))
}

pub async fn record_propagation(
    State(db): State<Database>,
    Json(input): Json<RecordPropagationInput>,
) -> ApiResult<(StatusCode, Json<PropagationRecord>)> {
    Ok((StatusCode::CREATED, Json(db.record_propagation(input)?)))
}

pub async fn list_propagations(
    State(db): State<Database>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<PropagationRecord>>> {
    Ok(Json(db.list_propagations(id)?))
}

pub async fn propagation_status(
    State(db): State<Database>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PropagationSummary>> {
    Ok(Json(db.propagation_status(id)?))
}

pub async fn ready_queue(State(db): State<Database>) -> ApiResult<Json<Vec<ReadyTarget>>> {
    Ok(Json(db.ready_queue()?))
}

pub async fn propagation_overview(
    State(db): State<Database>,
) -> ApiResult<Json<Vec<LearningOverview>>> {
    Ok(Json(db.propagation_overview()?))
}
