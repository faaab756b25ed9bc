//! Invocation Telemetry & Coverage Gate.

use rusqlite::{Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::features::{load_feature, query_transitions, require_text};
use super::gates::insert_blocker;
use super::{get_datetime, get_json, get_opt_datetime, get_phase, get_uuid, now, ts, Database};
use crate::error::{EngineError, Result};
use crate::models::*;

const INVOCATION_COLUMNS: &str = "id, feature_id, phase, agent_name, operation, skills,
     started_at, ended_at, duration_ms, backfill_note";

const COVERAGE_GATE: &str = "invocation_coverage";

fn map_invocation(row: &Row<'_>) -> rusqlite::Result<AgentInvocation> {
    Ok(AgentInvocation {
        id: get_uuid(row, 0)?,
        feature_id: row.get(1)?,
        phase: get_phase(row, 2)?,
        agent_name: row.get(3)?,
        operation: row.get(4)?,
        skills: get_json(row, 5)?,
        started_at: get_datetime(row, 6)?,
        ended_at: get_opt_datetime(row, 7)?,
        duration_ms: row.get(8)?,
        backfill_note: row.get(9)?,
    })
}

fn load_invocation(conn: &Connection, id: Uuid) -> Result<AgentInvocation> {
    conn.query_row(
        &format!(
            "SELECT {} FROM agent_invocations WHERE id = ?",
            INVOCATION_COLUMNS
        ),
        [id.to_string()],
        map_invocation,
    )
    .optional()?
    .ok_or_else(|| EngineError::not_found("invocation", id))
}

pub(super) fn query_invocations(conn: &Connection, feature_id: &str) -> Result<Vec<AgentInvocation>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM agent_invocations WHERE feature_id = ? ORDER BY started_at, rowid",
        INVOCATION_COLUMNS
    ))?;
    let invocations = stmt
        .query_map([feature_id], map_invocation)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(invocations)
}

/// Total minutes of closed invocations on one feature.
pub(super) fn closed_minutes(conn: &Connection, feature_id: &str) -> Result<f64> {
    let total_ms: i64 = conn.query_row(
        "SELECT COALESCE(SUM(duration_ms), 0) FROM agent_invocations
         WHERE feature_id = ? AND ended_at IS NOT NULL AND duration_ms IS NOT NULL",
        [feature_id],
        |row| row.get(0),
    )?;
    Ok(total_ms as f64 / 60_000.0)
}

pub(super) fn coverage_report(conn: &Connection, feature_id: &str) -> Result<CoverageReport> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT phase, agent_name FROM agent_invocations
         WHERE feature_id = ? AND ended_at IS NOT NULL AND duration_ms IS NOT NULL",
    )?;
    let closed = stmt
        .query_map([feature_id], |row| {
            Ok((get_phase(row, 0)?, row.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CoverageReport::evaluate(
        feature_id,
        closed.iter().map(|(phase, agent)| (*phase, agent.as_str())),
    ))
}

/// Evaluate the coverage gate ahead of `action`.
///
/// A failing gate opens a VALIDATION_FAILED blocker naming every missing pair
/// and yields the `GateFailure` to return once the blocker is committed.
pub(super) fn run_coverage_gate(
    conn: &Connection,
    feature: &Feature,
    action: &str,
) -> Result<std::result::Result<CoverageReport, EngineError>> {
    let report = coverage_report(conn, &feature.id)?;
    if report.passed {
        return Ok(Ok(report));
    }

    let blocker = insert_blocker(
        conn,
        &feature.id,
        OpenBlockerInput {
            blocker_type: BlockerType::ValidationFailed,
            phase: feature.current_phase.value(),
            severity: BlockerSeverity::High,
            title: format!("Invocation coverage incomplete before {}", action),
            description: Some(format!(
                "Missing completed invocations: {}",
                report.describe_missing()
            )),
            created_by: "coverage-gate".to_string(),
        },
    )?;

    Ok(Err(EngineError::GateFailure {
        gate: COVERAGE_GATE.to_string(),
        missing: report.missing,
        blocker_id: blocker.id,
    }))
}

impl Database {
    pub fn start_invocation(
        &self,
        feature_id: &str,
        input: StartInvocationInput,
    ) -> Result<AgentInvocation> {
        require_text("agent_name", &input.agent_name)?;
        require_text("operation", &input.operation)?;
        let phase = Phase::new(input.phase)?;

        let invocation = self.write(|tx| {
            let feature = load_feature(tx, feature_id)?;
            if feature.is_terminal() {
                return Err(EngineError::State(format!(
                    "feature {} is {}",
                    feature.id, feature.status
                )));
            }

            let invocation = AgentInvocation {
                id: Uuid::new_v4(),
                feature_id: feature_id.to_string(),
                phase,
                agent_name: input.agent_name.trim().to_string(),
                operation: input.operation,
                skills: input.skills,
                started_at: now(),
                ended_at: None,
                duration_ms: None,
                backfill_note: None,
            };
            tx.execute(
                "INSERT INTO agent_invocations (id, feature_id, phase, agent_name, operation, skills, started_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                (
                    invocation.id.to_string(),
                    &invocation.feature_id,
                    invocation.phase.value(),
                    &invocation.agent_name,
                    &invocation.operation,
                    serde_json::to_string(&invocation.skills)?,
                    ts(&invocation.started_at),
                ),
            )?;
            Ok(invocation)
        })?;

        tracing::info!(
            feature_id,
            invocation_id = %invocation.id,
            phase = invocation.phase.value(),
            agent = %invocation.agent_name,
            "invocation started"
        );
        Ok(invocation)
    }

    /// Close an open invocation and derive its duration. Closing twice is a
    /// conflict; the first close wins.
    pub fn end_invocation(&self, id: Uuid) -> Result<AgentInvocation> {
        let invocation = self.write(|tx| {
            let invocation = load_invocation(tx, id)?;
            if invocation.ended_at.is_some() {
                return Err(EngineError::Conflict(format!(
                    "invocation {} already ended",
                    id
                )));
            }
            let ended_at = now();
            let duration_ms = (ended_at - invocation.started_at).num_milliseconds().max(0);
            tx.execute(
                "UPDATE agent_invocations SET ended_at = ?, duration_ms = ? WHERE id = ?",
                (ts(&ended_at), duration_ms, id.to_string()),
            )?;
            load_invocation(tx, id)
        })?;

        tracing::info!(
            invocation_id = %id,
            duration_ms = invocation.duration_ms,
            "invocation ended"
        );
        Ok(invocation)
    }

    pub fn get_invocation(&self, id: Uuid) -> Result<AgentInvocation> {
        self.read(|conn| load_invocation(conn, id))
    }

    pub fn list_invocations(&self, feature_id: &str) -> Result<Vec<AgentInvocation>> {
        self.read(|conn| {
            load_feature(conn, feature_id)?;
            query_invocations(conn, feature_id)
        })
    }

    /// Read-only coverage check. Never backfills or opens blockers.
    pub fn check_coverage(&self, feature_id: &str) -> Result<CoverageReport> {
        self.read(|conn| {
            load_feature(conn, feature_id)?;
            coverage_report(conn, feature_id)
        })
    }

    /// Reconstruct a closed invocation from the feature's phase history.
    ///
    /// The window starts at the latest transition into `phase` and ends at the
    /// first transition out of it after that (or is empty while the feature is
    /// still there). The row carries the note as provenance.
    pub fn backfill_invocation(
        &self,
        feature_id: &str,
        input: BackfillInvocationInput,
    ) -> Result<BackfillOutcome> {
        require_text("note", &input.note)?;
        require_text("agent_name", &input.agent_name)?;
        require_text("actor", &input.actor)?;
        let phase = Phase::new(input.phase)?;

        let outcome = self.write(|tx| {
            load_feature(tx, feature_id)?;
            let transitions = query_transitions(tx, feature_id)?;

            let entry = transitions
                .iter()
                .rposition(|t| t.to_phase == phase && t.from_phase != phase)
                .ok_or_else(|| {
                    EngineError::State(format!(
                        "feature {} never entered phase {}",
                        feature_id,
                        phase.value()
                    ))
                })?;
            let started_at = transitions[entry].created_at;
            let ended_at = transitions[entry + 1..]
                .iter()
                .find(|t| t.from_phase == phase && t.to_phase != phase)
                .map(|t| t.created_at)
                .unwrap_or(started_at);

            let invocation = AgentInvocation {
                id: Uuid::new_v4(),
                feature_id: feature_id.to_string(),
                phase,
                agent_name: input.agent_name.trim().to_string(),
                operation: format!("backfill by {}", input.actor),
                skills: Vec::new(),
                started_at,
                ended_at: Some(ended_at),
                duration_ms: Some((ended_at - started_at).num_milliseconds().max(0)),
                backfill_note: Some(input.note),
            };
            tx.execute(
                &format!(
                    "INSERT INTO agent_invocations ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    INVOCATION_COLUMNS
                ),
                rusqlite::params![
                    invocation.id.to_string(),
                    &invocation.feature_id,
                    invocation.phase.value(),
                    &invocation.agent_name,
                    &invocation.operation,
                    "[]",
                    ts(&started_at),
                    ts(&ended_at),
                    invocation.duration_ms,
                    &invocation.backfill_note,
                ],
            )?;

            let coverage = coverage_report(tx, feature_id)?;
            Ok(BackfillOutcome {
                invocation,
                coverage,
            })
        })?;

        tracing::info!(
            feature_id,
            invocation_id = %outcome.invocation.id,
            phase = phase.value(),
            agent = %outcome.invocation.agent_name,
            actor = %input.actor,
            "invocation backfilled"
        );
        Ok(outcome)
    }
}
