//! Quality Gate & Blocker Ledger.

use rusqlite::{Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::features::{load_feature, require_text};
use super::{get_datetime, get_enum, get_opt_datetime, get_phase, get_uuid, now, ts, Database};
use crate::error::{EngineError, Result};
use crate::models::*;

const GATE_COLUMNS: &str = "id, feature_id, gate_name, phase, status, approver, note, created_at";

const BLOCKER_COLUMNS: &str = "id, feature_id, blocker_type, phase, status, severity, title,
     description, created_by, resolved_by, resolution_notes, created_at, updated_at, resolved_at";

fn map_gate(row: &Row<'_>) -> rusqlite::Result<QualityGate> {
    Ok(QualityGate {
        id: get_uuid(row, 0)?,
        feature_id: row.get(1)?,
        gate_name: row.get(2)?,
        phase: get_phase(row, 3)?,
        status: get_enum(row, 4)?,
        approver: row.get(5)?,
        note: row.get(6)?,
        created_at: get_datetime(row, 7)?,
    })
}

fn map_blocker(row: &Row<'_>) -> rusqlite::Result<Blocker> {
    Ok(Blocker {
        id: get_uuid(row, 0)?,
        feature_id: row.get(1)?,
        blocker_type: get_enum(row, 2)?,
        phase: get_phase(row, 3)?,
        status: get_enum(row, 4)?,
        severity: get_enum(row, 5)?,
        title: row.get(6)?,
        description: row.get(7)?,
        created_by: row.get(8)?,
        resolved_by: row.get(9)?,
        resolution_notes: row.get(10)?,
        created_at: get_datetime(row, 11)?,
        updated_at: get_datetime(row, 12)?,
        resolved_at: get_opt_datetime(row, 13)?,
    })
}

pub(super) fn query_gates(conn: &Connection, feature_id: &str) -> Result<Vec<QualityGate>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM quality_gates WHERE feature_id = ? ORDER BY created_at, rowid",
        GATE_COLUMNS
    ))?;
    let gates = stmt
        .query_map([feature_id], map_gate)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(gates)
}

pub(super) fn query_blockers(
    conn: &Connection,
    feature_id: &str,
    open_only: bool,
) -> Result<Vec<Blocker>> {
    let filter = if open_only {
        " AND status != 'RESOLVED'"
    } else {
        ""
    };
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM blockers WHERE feature_id = ?{} ORDER BY created_at, rowid",
        BLOCKER_COLUMNS, filter
    ))?;
    let blockers = stmt
        .query_map([feature_id], map_blocker)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(blockers)
}

/// Unresolved blockers on one feature.
pub(super) fn count_open_blockers(conn: &Connection, feature_id: &str) -> Result<u32> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM blockers WHERE feature_id = ? AND status != 'RESOLVED'",
        [feature_id],
        |row| row.get(0),
    )?)
}

fn load_blocker(conn: &Connection, id: Uuid) -> Result<Blocker> {
    conn.query_row(
        &format!("SELECT {} FROM blockers WHERE id = ?", BLOCKER_COLUMNS),
        [id.to_string()],
        map_blocker,
    )
    .optional()?
    .ok_or_else(|| EngineError::not_found("blocker", id))
}

/// Insert a new OPEN blocker. Shared by the public operation and the
/// coverage gate.
pub(super) fn insert_blocker(
    conn: &Connection,
    feature_id: &str,
    input: OpenBlockerInput,
) -> Result<Blocker> {
    let at = now();
    let blocker = Blocker {
        id: Uuid::new_v4(),
        feature_id: feature_id.to_string(),
        blocker_type: input.blocker_type,
        phase: Phase::new(input.phase)?,
        status: BlockerStatus::Open,
        severity: input.severity,
        title: input.title,
        description: input.description,
        created_by: input.created_by,
        resolved_by: None,
        resolution_notes: None,
        created_at: at,
        updated_at: at,
        resolved_at: None,
    };
    conn.execute(
        "INSERT INTO blockers (id, feature_id, blocker_type, phase, status, severity, title,
             description, created_by, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            blocker.id.to_string(),
            &blocker.feature_id,
            blocker.blocker_type.as_str(),
            blocker.phase.value(),
            blocker.status.as_str(),
            blocker.severity.as_str(),
            &blocker.title,
            &blocker.description,
            &blocker.created_by,
            ts(&at),
            ts(&at),
        ],
    )?;
    Ok(blocker)
}

fn update_blocker_status(
    conn: &Connection,
    blocker: &Blocker,
    status: BlockerStatus,
    resolved_by: Option<&str>,
    notes: Option<&str>,
) -> Result<Blocker> {
    let at = ts(&now());
    let resolved_at = (status == BlockerStatus::Resolved).then(|| at.clone());
    conn.execute(
        "UPDATE blockers SET status = ?, resolved_by = COALESCE(?, resolved_by),
             resolution_notes = COALESCE(?, resolution_notes),
             resolved_at = COALESCE(?, resolved_at), updated_at = ?
         WHERE id = ?",
        (
            status.as_str(),
            resolved_by,
            notes,
            resolved_at,
            &at,
            blocker.id.to_string(),
        ),
    )?;
    load_blocker(conn, blocker.id)
}

impl Database {
    /// Append a gate decision. Earlier rows for the same gate are kept.
    pub fn record_gate(&self, feature_id: &str, input: RecordGateInput) -> Result<QualityGate> {
        require_text("gate_name", &input.gate_name)?;
        let phase = Phase::new(input.phase)?;

        let gate = self.write(|tx| {
            load_feature(tx, feature_id)?;
            let gate = QualityGate {
                id: Uuid::new_v4(),
                feature_id: feature_id.to_string(),
                gate_name: input.gate_name,
                phase,
                status: input.status,
                approver: input.approver,
                note: input.note,
                created_at: now(),
            };
            tx.execute(
                &format!(
                    "INSERT INTO quality_gates ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                    GATE_COLUMNS
                ),
                (
                    gate.id.to_string(),
                    &gate.feature_id,
                    &gate.gate_name,
                    gate.phase.value(),
                    gate.status.as_str(),
                    &gate.approver,
                    &gate.note,
                    ts(&gate.created_at),
                ),
            )?;
            Ok(gate)
        })?;

        tracing::info!(
            feature_id,
            gate = %gate.gate_name,
            phase = gate.phase.value(),
            status = %gate.status,
            "gate recorded"
        );
        Ok(gate)
    }

    pub fn list_gates(&self, feature_id: &str) -> Result<Vec<QualityGate>> {
        self.read(|conn| {
            load_feature(conn, feature_id)?;
            query_gates(conn, feature_id)
        })
    }

    /// The most recent decision per (gate name, phase).
    pub fn latest_gates(&self, feature_id: &str) -> Result<Vec<QualityGate>> {
        let gates = self.list_gates(feature_id)?;
        let mut latest: Vec<QualityGate> = Vec::new();
        for gate in gates {
            match latest
                .iter_mut()
                .find(|g| g.gate_name == gate.gate_name && g.phase == gate.phase)
            {
                Some(slot) => *slot = gate,
                None => latest.push(gate),
            }
        }
        Ok(latest)
    }

    pub fn open_blocker(&self, feature_id: &str, input: OpenBlockerInput) -> Result<Blocker> {
        require_text("title", &input.title)?;
        require_text("created_by", &input.created_by)?;

        let blocker = self.write(|tx| {
            load_feature(tx, feature_id)?;
            insert_blocker(tx, feature_id, input)
        })?;

        tracing::info!(
            feature_id,
            blocker_id = %blocker.id,
            blocker_type = %blocker.blocker_type,
            "blocker opened"
        );
        Ok(blocker)
    }

    pub fn get_blocker(&self, id: Uuid) -> Result<Blocker> {
        self.read(|conn| load_blocker(conn, id))
    }

    pub fn list_blockers(&self, feature_id: &str, open_only: bool) -> Result<Vec<Blocker>> {
        self.read(|conn| {
            load_feature(conn, feature_id)?;
            query_blockers(conn, feature_id, open_only)
        })
    }

    /// Mark someone as working on an OPEN or ESCALATED blocker.
    pub fn start_blocker(&self, id: Uuid, actor: &str) -> Result<Blocker> {
        require_text("actor", actor)?;

        let blocker = self.write(|tx| {
            let blocker = load_blocker(tx, id)?;
            match blocker.status {
                BlockerStatus::Open | BlockerStatus::Escalated => {
                    update_blocker_status(tx, &blocker, BlockerStatus::InProgress, None, None)
                }
                other => Err(EngineError::State(format!(
                    "blocker {} is {}, cannot start work on it",
                    id, other
                ))),
            }
        })?;

        tracing::info!(blocker_id = %id, actor, "blocker in progress");
        Ok(blocker)
    }

    pub fn resolve_blocker(&self, id: Uuid, input: ResolveBlockerInput) -> Result<Blocker> {
        require_text("resolved_by", &input.resolved_by)?;

        let blocker = self.write(|tx| {
            let blocker = load_blocker(tx, id)?;
            if blocker.status == BlockerStatus::Resolved {
                return Err(EngineError::State(format!(
                    "blocker {} is already resolved",
                    id
                )));
            }
            update_blocker_status(
                tx,
                &blocker,
                BlockerStatus::Resolved,
                Some(&input.resolved_by),
                input.notes.as_deref(),
            )
        })?;

        tracing::info!(blocker_id = %id, resolved_by = %input.resolved_by, "blocker resolved");
        Ok(blocker)
    }

    pub fn escalate_blocker(&self, id: Uuid, input: EscalateBlockerInput) -> Result<Blocker> {
        let blocker = self.write(|tx| {
            let blocker = load_blocker(tx, id)?;
            match blocker.status {
                BlockerStatus::Open | BlockerStatus::InProgress => update_blocker_status(
                    tx,
                    &blocker,
                    BlockerStatus::Escalated,
                    None,
                    input.notes.as_deref(),
                ),
                other => Err(EngineError::State(format!(
                    "blocker {} is {}, cannot escalate",
                    id, other
                ))),
            }
        })?;

        tracing::info!(blocker_id = %id, "blocker escalated");
        Ok(blocker)
    }
}
