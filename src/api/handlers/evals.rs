use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use super::ApiResult;
use crate::db::{Database, Evaluation};
use crate::models::*;

#[derive(Debug, Deserialize)]
pub struct SystemEvalBody {
    #[serde(default = "default_window")]
    pub window: EvalWindow,
}

fn default_window() -> EvalWindow {
    EvalWindow::Month
}

#[derive(Debug, Deserialize)]
pub struct SystemEvalsQuery {
    pub window: Option<EvalWindow>,
}

// ============================================================
// Evaluations
// ============================================================

pub async fn evaluate_feature(
    State(db): State<Database>,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<Evaluation<FeatureEval>>)> {
    Ok((StatusCode::CREATED, Json(db.evaluate_feature(&id)?)))
}

pub async fn feature_evals(
    State(db): State<Database>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<FeatureEval>>> {
    Ok(Json(db.feature_evals(&id)?))
}

pub async fn evaluate_system(
    State(db): State<Database>,
    Json(body): Json<SystemEvalBody>,
) -> ApiResult<(StatusCode, Json<Evaluation<SystemHealthEval>>)> {
    Ok((StatusCode::CREATED, Json(db.evaluate_system(body.window)?)))
}

pub async fn system_evals(
    State(db): State<Database>,
    Query(query): Query<SystemEvalsQuery>,
) -> ApiResult<Json<Vec<SystemHealthEval>>> {
    Ok(Json(db.system_evals(query.window)?))
}

// ============================================================
// Alerts
// ============================================================

pub async fn active_alerts(State(db): State<Database>) -> ApiResult<Json<Vec<EvalAlert>>> {
    Ok(Json(db.active_alerts()?))
}

pub async fn acknowledge_alert(
    State(db): State<Database>,
    Path(id): Path<Uuid>,
    Json(input): Json<AcknowledgeAlertInput>,
) -> ApiResult<Json<EvalAlert>> {
    Ok(Json(db.acknowledge_alert(id, input)?))
}

pub async fn resolve_alert(
    State(db): State<Database>,
    Path(id): Path<Uuid>,
    Json(input): Json<ResolveAlertInput>,
) -> ApiResult<Json<EvalAlert>> {
    Ok(Json(db.resolve_alert(id, input)?))
}
