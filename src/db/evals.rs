//! Health & Eval Scorer persistence.
//!
//! Scores are computed by [`crate::scoring`] from facts read inside the same
//! transaction the snapshot is written in. Snapshots are only ever appended.

use chrono::Duration;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::conflicts::query_blocking_conflicts;
use super::features::{load_feature, query_transitions, require_text};
use super::gates::count_open_blockers;
use super::invocations::closed_minutes;
use super::{get_datetime, get_enum, get_json, get_opt_datetime, get_uuid, now, ts, Database};
use crate::config::HealthConfig;
use crate::error::{EngineError, Result};
use crate::models::*;
use crate::scoring::{feature_alerts, score_feature, system_alerts, FeatureInputs, FeatureScores};

const FEATURE_EVAL_COLUMNS: &str = "id, feature_id, efficiency_score, quality_score, overall_score,
     health_status, breakdown, evaluated_at";

const SYSTEM_EVAL_COLUMNS: &str = "id, window_days, features_evaluated, efficiency_score,
     quality_score, overall_score, health_status, breakdown, evaluated_at";

const ALERT_COLUMNS: &str = "id, severity, dimension, message, current_value, threshold, source,
     created_at, acknowledged_at, acknowledged_by, resolved_at, resolved_by, resolution_note";

/// A stored snapshot together with the alerts it raised.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation<T> {
    pub eval: T,
    /// Alerts created by this run. Breaches already covered by an unresolved
    /// alert do not appear here.
    pub new_alerts: Vec<EvalAlert>,
}

fn map_feature_eval(row: &Row<'_>) -> rusqlite::Result<FeatureEval> {
    Ok(FeatureEval {
        id: get_uuid(row, 0)?,
        feature_id: row.get(1)?,
        efficiency_score: row.get(2)?,
        quality_score: row.get(3)?,
        overall_score: row.get(4)?,
        health_status: get_enum(row, 5)?,
        breakdown: get_json(row, 6)?,
        evaluated_at: get_datetime(row, 7)?,
    })
}

fn map_system_eval(row: &Row<'_>) -> rusqlite::Result<SystemHealthEval> {
    let days: u32 = row.get(1)?;
    let window = EvalWindow::try_from(days)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Integer, e.into()))?;
    Ok(SystemHealthEval {
        id: get_uuid(row, 0)?,
        window,
        features_evaluated: row.get(2)?,
        efficiency_score: row.get(3)?,
        quality_score: row.get(4)?,
        overall_score: row.get(5)?,
        health_status: get_enum(row, 6)?,
        breakdown: get_json(row, 7)?,
        evaluated_at: get_datetime(row, 8)?,
    })
}

fn map_alert(row: &Row<'_>) -> rusqlite::Result<EvalAlert> {
    Ok(EvalAlert {
        id: get_uuid(row, 0)?,
        severity: get_enum(row, 1)?,
        dimension: get_enum(row, 2)?,
        message: row.get(3)?,
        current_value: row.get(4)?,
        threshold: row.get(5)?,
        source: row.get(6)?,
        created_at: get_datetime(row, 7)?,
        acknowledged_at: get_opt_datetime(row, 8)?,
        acknowledged_by: row.get(9)?,
        resolved_at: get_opt_datetime(row, 10)?,
        resolved_by: row.get(11)?,
        resolution_note: row.get(12)?,
    })
}

fn load_alert(conn: &Connection, id: Uuid) -> Result<EvalAlert> {
    conn.query_row(
        &format!("SELECT {} FROM eval_alerts WHERE id = ?", ALERT_COLUMNS),
        [id.to_string()],
        map_alert,
    )
    .optional()?
    .ok_or_else(|| EngineError::not_found("alert", id))
}

fn feature_scores(conn: &Connection, feature: &Feature, config: &HealthConfig) -> Result<FeatureScores> {
    let (gates_approved, gates_rejected): (u32, u32) = conn.query_row(
        "SELECT COALESCE(SUM(status = 'APPROVED'), 0), COALESCE(SUM(status = 'REJECTED'), 0)
         FROM quality_gates WHERE feature_id = ?",
        [&feature.id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    let transitions = query_transitions(conn, &feature.id)?;

    Ok(score_feature(
        config,
        &FeatureInputs {
            complexity_level: feature.complexity_level,
            invocation_minutes: closed_minutes(conn, &feature.id)?,
            gates_approved,
            gates_rejected,
            transitions: &transitions,
            open_blockers: count_open_blockers(conn, &feature.id)?,
        },
    ))
}

/// Persist an alert unless one for the same dimension and source is still
/// unresolved.
fn raise_alert(conn: &Connection, candidate: AlertCandidate, source: &str) -> Result<Option<EvalAlert>> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM eval_alerts
             WHERE dimension = ? AND source = ? AND resolved_at IS NULL)",
        (candidate.dimension.as_str(), source),
        |row| row.get(0),
    )?;
    if exists {
        return Ok(None);
    }

    let alert = EvalAlert {
        id: Uuid::new_v4(),
        severity: candidate.severity,
        dimension: candidate.dimension,
        message: candidate.message,
        current_value: candidate.current_value,
        threshold: candidate.threshold,
        source: source.to_string(),
        created_at: now(),
        acknowledged_at: None,
        acknowledged_by: None,
        resolved_at: None,
        resolved_by: None,
        resolution_note: None,
    };
    conn.execute(
        "INSERT INTO eval_alerts (id, severity, dimension, message, current_value, threshold,
             source, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        (
            alert.id.to_string(),
            alert.severity.as_str(),
            alert.dimension.as_str(),
            &alert.message,
            alert.current_value,
            alert.threshold,
            &alert.source,
            ts(&alert.created_at),
        ),
    )?;
    tracing::info!(
        alert_id = %alert.id,
        source,
        dimension = %alert.dimension,
        severity = %alert.severity,
        "alert raised"
    );
    Ok(Some(alert))
}

fn raise_alerts(conn: &Connection, candidates: Vec<AlertCandidate>, source: &str) -> Result<Vec<EvalAlert>> {
    let mut raised = Vec::new();
    for candidate in candidates {
        if let Some(alert) = raise_alert(conn, candidate, source)? {
            raised.push(alert);
        }
    }
    Ok(raised)
}

fn average(values: &[f64]) -> f64 {
    if values.is_empty() {
        100.0
    } else {
        round2(values.iter().sum::<f64>() / values.len() as f64)
    }
}

impl Database {
    /// Score one feature, store the snapshot and raise alerts for breaches.
    pub fn evaluate_feature(&self, feature_id: &str) -> Result<Evaluation<FeatureEval>> {
        let config = self.config().clone();

        let evaluation = self.write(|tx| {
            let feature = load_feature(tx, feature_id)?;
            let scores = feature_scores(tx, &feature, &config.health)?;

            let eval = FeatureEval {
                id: Uuid::new_v4(),
                feature_id: feature.id.clone(),
                efficiency_score: scores.efficiency,
                quality_score: scores.quality,
                overall_score: scores.overall,
                health_status: scores.status,
                breakdown: scores.breakdown,
                evaluated_at: now(),
            };
            tx.execute(
                &format!(
                    "INSERT INTO feature_evals ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                    FEATURE_EVAL_COLUMNS
                ),
                (
                    eval.id.to_string(),
                    &eval.feature_id,
                    eval.efficiency_score,
                    eval.quality_score,
                    eval.overall_score,
                    eval.health_status.as_str(),
                    serde_json::to_string(&eval.breakdown)?,
                    ts(&eval.evaluated_at),
                ),
            )?;

            let candidates = feature_alerts(&config.alerts, eval.overall_score, &eval.breakdown);
            let new_alerts = raise_alerts(tx, candidates, &format!("feature:{}", feature.id))?;
            Ok(Evaluation { eval, new_alerts })
        })?;

        tracing::debug!(
            feature_id,
            overall = evaluation.eval.overall_score,
            status = %evaluation.eval.health_status,
            "feature evaluated"
        );
        Ok(evaluation)
    }

    /// Aggregate every feature created or updated inside the window together
    /// with the learning base.
    pub fn evaluate_system(&self, window: EvalWindow) -> Result<Evaluation<SystemHealthEval>> {
        let config = self.config().clone();

        let evaluation = self.write(|tx| {
            let evaluated_at = now();
            let cutoff = ts(&(evaluated_at - Duration::days(window.days() as i64)));

            let feature_ids: Vec<String> = {
                let mut stmt = tx.prepare(
                    "SELECT id FROM features WHERE created_at >= ?1 OR updated_at >= ?1
                     ORDER BY created_at, rowid",
                )?;
                let ids = stmt
                    .query_map([&cutoff], |row| row.get(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                ids
            };

            let mut breakdown = SystemBreakdown::default();
            let (mut efficiency, mut quality, mut overall) = (Vec::new(), Vec::new(), Vec::new());
            for id in &feature_ids {
                let feature = load_feature(tx, id)?;
                let scores = feature_scores(tx, &feature, &config.health)?;
                efficiency.push(scores.efficiency);
                quality.push(scores.quality);
                overall.push(scores.overall);
                breakdown.open_blockers += scores.breakdown.open_blockers;
                breakdown.feature_scores.insert(feature.id, scores.overall);
            }

            let (total, high): (u32, u32) = tx.query_row(
                "SELECT COUNT(*), COALESCE(SUM(confidence >= ?), 0) FROM learnings WHERE is_superseded = 0",
                [config.learning.readiness_confidence],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            let open_conflicts = query_blocking_conflicts(tx)?;
            breakdown.total_learnings = total;
            breakdown.high_confidence_learnings = high;
            breakdown.open_conflicts = open_conflicts.len() as u32;
            breakdown.oldest_open_conflict_hours = round2(
                open_conflicts
                    .iter()
                    .map(|c| c.hours_open(evaluated_at))
                    .fold(0.0, f64::max),
            );

            let overall_score = average(&overall);
            let eval = SystemHealthEval {
                id: Uuid::new_v4(),
                window,
                features_evaluated: feature_ids.len() as u32,
                efficiency_score: average(&efficiency),
                quality_score: average(&quality),
                overall_score,
                health_status: HealthStatus::from_score(
                    overall_score,
                    config.health.healthy_min,
                    config.health.concerning_min,
                ),
                breakdown,
                evaluated_at,
            };
            tx.execute(
                &format!(
                    "INSERT INTO system_health_evals ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    SYSTEM_EVAL_COLUMNS
                ),
                rusqlite::params![
                    eval.id.to_string(),
                    eval.window.days(),
                    eval.features_evaluated,
                    eval.efficiency_score,
                    eval.quality_score,
                    eval.overall_score,
                    eval.health_status.as_str(),
                    serde_json::to_string(&eval.breakdown)?,
                    ts(&eval.evaluated_at),
                ],
            )?;

            let candidates = system_alerts(
                &config.alerts,
                eval.overall_score,
                eval.breakdown.open_conflicts,
                eval.breakdown.oldest_open_conflict_hours,
            );
            let new_alerts =
                raise_alerts(tx, candidates, &format!("system:{}d", window.days()))?;
            Ok(Evaluation { eval, new_alerts })
        })?;

        tracing::debug!(
            window = window.days(),
            features = evaluation.eval.features_evaluated,
            overall = evaluation.eval.overall_score,
            "system evaluated"
        );
        Ok(evaluation)
    }

    /// Stored snapshots for a feature, oldest first.
    pub fn feature_evals(&self, feature_id: &str) -> Result<Vec<FeatureEval>> {
        self.read(|conn| {
            load_feature(conn, feature_id)?;
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM feature_evals WHERE feature_id = ? ORDER BY evaluated_at, rowid",
                FEATURE_EVAL_COLUMNS
            ))?;
            let evals = stmt
                .query_map([feature_id], map_feature_eval)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(evals)
        })
    }

    pub fn latest_feature_eval(&self, feature_id: &str) -> Result<Option<FeatureEval>> {
        Ok(self.feature_evals(feature_id)?.pop())
    }

    /// Stored system snapshots, oldest first, optionally for one window.
    pub fn system_evals(&self, window: Option<EvalWindow>) -> Result<Vec<SystemHealthEval>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM system_health_evals WHERE (?1 IS NULL OR window_days = ?1)
                 ORDER BY evaluated_at, rowid",
                SYSTEM_EVAL_COLUMNS
            ))?;
            let evals = stmt
                .query_map([window.map(|w| w.days())], map_system_eval)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(evals)
        })
    }

    pub fn latest_system_eval(&self, window: EvalWindow) -> Result<Option<SystemHealthEval>> {
        Ok(self.system_evals(Some(window))?.pop())
    }

    /// Alerts that have not been resolved, newest first.
    pub fn active_alerts(&self) -> Result<Vec<EvalAlert>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM eval_alerts WHERE resolved_at IS NULL
                 ORDER BY created_at DESC, rowid DESC",
                ALERT_COLUMNS
            ))?;
            let alerts = stmt
                .query_map([], map_alert)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(alerts)
        })
    }

    pub fn get_alert(&self, id: Uuid) -> Result<EvalAlert> {
        self.read(|conn| load_alert(conn, id))
    }

    pub fn acknowledge_alert(&self, id: Uuid, input: AcknowledgeAlertInput) -> Result<EvalAlert> {
        require_text("actor", &input.actor)?;

        let alert = self.write(|tx| {
            let alert = load_alert(tx, id)?;
            if alert.is_resolved() {
                return Err(EngineError::State(format!("alert {} is resolved", id)));
            }
            if alert.acknowledged_at.is_some() {
                return Err(EngineError::State(format!(
                    "alert {} is already acknowledged",
                    id
                )));
            }
            tx.execute(
                "UPDATE eval_alerts SET acknowledged_at = ?, acknowledged_by = ? WHERE id = ?",
                (ts(&now()), &input.actor, id.to_string()),
            )?;
            load_alert(tx, id)
        })?;

        tracing::info!(alert_id = %id, actor = %input.actor, "alert acknowledged");
        Ok(alert)
    }

    pub fn resolve_alert(&self, id: Uuid, input: ResolveAlertInput) -> Result<EvalAlert> {
        require_text("actor", &input.actor)?;

        let alert = self.write(|tx| {
            let alert = load_alert(tx, id)?;
            if alert.is_resolved() {
                return Err(EngineError::State(format!(
                    "alert {} is already resolved",
                    id
                )));
            }
            tx.execute(
                "UPDATE eval_alerts SET resolved_at = ?, resolved_by = ?, resolution_note = ?
                 WHERE id = ?",
                (ts(&now()), &input.actor, &input.note, id.to_string()),
            )?;
            load_alert(tx, id)
        })?;

        tracing::info!(alert_id = %id, actor = %input.actor, "alert resolved");
        Ok(alert)
    }
}
