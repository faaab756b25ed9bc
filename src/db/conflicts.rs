//! Conflict Detector.

use rusqlite::{Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::features::require_text;
use super::learnings::{check_confidence, load_learning, query_learnings};
use super::{get_datetime, get_enum, get_opt_datetime, get_opt_uuid, get_uuid, now, ts, Database};
use crate::error::{EngineError, Result};
use crate::models::*;
use crate::similarity::classify_pair;

const CONFLICT_COLUMNS: &str = "id, learning_a_id, learning_b_id, conflict_type, description,
     detected_by, status, resolution, winning_learning_id, resolved_by, detected_at, resolved_at";

/// Result of a heuristic conflict scan for one learning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanOutcome {
    pub learning_id: Uuid,
    /// Active learnings of the same category that were compared.
    pub compared: usize,
    /// Conflicts opened by this scan. Pairs with an existing conflict are skipped.
    pub created: Vec<LearningConflict>,
}

fn map_conflict(row: &Row<'_>) -> rusqlite::Result<LearningConflict> {
    Ok(LearningConflict {
        id: get_uuid(row, 0)?,
        learning_a_id: get_uuid(row, 1)?,
        learning_b_id: get_uuid(row, 2)?,
        conflict_type: get_enum(row, 3)?,
        description: row.get(4)?,
        detected_by: row.get(5)?,
        status: get_enum(row, 6)?,
        resolution: row.get(7)?,
        winning_learning_id: get_opt_uuid(row, 8)?,
        resolved_by: row.get(9)?,
        detected_at: get_datetime(row, 10)?,
        resolved_at: get_opt_datetime(row, 11)?,
    })
}

fn load_conflict(conn: &Connection, id: Uuid) -> Result<LearningConflict> {
    conn.query_row(
        &format!(
            "SELECT {} FROM learning_conflicts WHERE id = ?",
            CONFLICT_COLUMNS
        ),
        [id.to_string()],
        map_conflict,
    )
    .optional()?
    .ok_or_else(|| EngineError::not_found("conflict", id))
}

pub(super) fn query_conflicts(
    conn: &Connection,
    status: Option<ConflictStatus>,
) -> Result<Vec<LearningConflict>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM learning_conflicts WHERE (?1 IS NULL OR status = ?1)
         ORDER BY detected_at, rowid",
        CONFLICT_COLUMNS
    ))?;
    let conflicts = stmt
        .query_map([status.map(|s| s.as_str())], map_conflict)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(conflicts)
}

/// Conflicts that currently keep learnings out of propagation.
pub(super) fn query_blocking_conflicts(conn: &Connection) -> Result<Vec<LearningConflict>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM learning_conflicts WHERE status IN ('OPEN', 'INVESTIGATING')
         ORDER BY detected_at, rowid",
        CONFLICT_COLUMNS
    ))?;
    let conflicts = stmt
        .query_map([], map_conflict)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(conflicts)
}

fn query_conflicts_for(conn: &Connection, learning_id: Uuid) -> Result<Vec<LearningConflict>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM learning_conflicts WHERE learning_a_id = ?1 OR learning_b_id = ?1
         ORDER BY detected_at, rowid",
        CONFLICT_COLUMNS
    ))?;
    let conflicts = stmt
        .query_map([learning_id.to_string()], map_conflict)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(conflicts)
}

/// OPEN or INVESTIGATING conflicts referencing a learning.
pub(super) fn blocking_conflict_count(conn: &Connection, learning_id: Uuid) -> Result<u32> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM learning_conflicts
         WHERE (learning_a_id = ?1 OR learning_b_id = ?1) AND status IN ('OPEN', 'INVESTIGATING')",
        [learning_id.to_string()],
        |row| row.get(0),
    )?)
}

fn insert_conflict(conn: &Connection, input: DetectConflictInput) -> Result<LearningConflict> {
    let conflict = LearningConflict {
        id: Uuid::new_v4(),
        learning_a_id: input.learning_a_id,
        learning_b_id: input.learning_b_id,
        conflict_type: input.conflict_type,
        description: input.description,
        detected_by: input.detected_by,
        status: ConflictStatus::Open,
        resolution: None,
        winning_learning_id: None,
        resolved_by: None,
        detected_at: now(),
        resolved_at: None,
    };
    conn.execute(
        "INSERT INTO learning_conflicts (id, learning_a_id, learning_b_id, conflict_type,
             description, detected_by, status, detected_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        (
            conflict.id.to_string(),
            conflict.learning_a_id.to_string(),
            conflict.learning_b_id.to_string(),
            conflict.conflict_type.as_str(),
            &conflict.description,
            &conflict.detected_by,
            conflict.status.as_str(),
            ts(&conflict.detected_at),
        ),
    )?;
    Ok(conflict)
}

fn require_unsettled(conflict: &LearningConflict) -> Result<()> {
    match conflict.status {
        ConflictStatus::Open | ConflictStatus::Investigating => Ok(()),
        other => Err(EngineError::State(format!(
            "conflict {} is already {}",
            conflict.id, other
        ))),
    }
}

impl Database {
    pub fn detect_conflict(&self, input: DetectConflictInput) -> Result<LearningConflict> {
        require_text("description", &input.description)?;
        require_text("detected_by", &input.detected_by)?;
        if input.learning_a_id == input.learning_b_id {
            return Err(EngineError::Validation(
                "a learning cannot conflict with itself".to_string(),
            ));
        }

        let conflict = self.write(|tx| {
            load_learning(tx, input.learning_a_id)?;
            load_learning(tx, input.learning_b_id)?;
            insert_conflict(tx, input)
        })?;

        tracing::info!(
            conflict_id = %conflict.id,
            conflict_type = %conflict.conflict_type,
            a = %conflict.learning_a_id,
            b = %conflict.learning_b_id,
            "conflict detected"
        );
        Ok(conflict)
    }

    /// Compare a learning with every other active learning of its category
    /// and open a conflict for each suspicious pair not already on record.
    pub fn scan_conflicts(&self, learning_id: Uuid, detected_by: &str) -> Result<ScanOutcome> {
        require_text("detected_by", detected_by)?;
        let min_similarity = self.config().learning.conflict_similarity;

        let outcome = self.write(|tx| {
            let learning = load_learning(tx, learning_id)?;
            if learning.is_superseded {
                return Err(EngineError::State(format!(
                    "learning {} is superseded, scan its latest version",
                    learning_id
                )));
            }

            let peers = query_learnings(
                tx,
                &LearningFilter {
                    category: Some(learning.category),
                    active_only: true,
                    min_confidence: None,
                },
            )?;
            let known: Vec<LearningConflict> = query_conflicts_for(tx, learning_id)?;

            let mut outcome = ScanOutcome {
                learning_id,
                compared: 0,
                created: Vec::new(),
            };
            for peer in peers.iter().filter(|p| p.id != learning_id) {
                outcome.compared += 1;
                if known.iter().any(|c| c.involves(peer.id)) {
                    continue;
                }
                if let Some((conflict_type, description)) =
                    classify_pair(&learning, peer, min_similarity)
                {
                    let conflict = insert_conflict(
                        tx,
                        DetectConflictInput {
                            learning_a_id: learning_id,
                            learning_b_id: peer.id,
                            conflict_type,
                            description,
                            detected_by: detected_by.to_string(),
                        },
                    )?;
                    outcome.created.push(conflict);
                }
            }
            Ok(outcome)
        })?;

        tracing::debug!(
            learning_id = %learning_id,
            compared = outcome.compared,
            created = outcome.created.len(),
            "conflict scan finished"
        );
        Ok(outcome)
    }

    pub fn investigate_conflict(&self, id: Uuid) -> Result<LearningConflict> {
        self.write(|tx| {
            let conflict = load_conflict(tx, id)?;
            if conflict.status != ConflictStatus::Open {
                return Err(EngineError::State(format!(
                    "conflict {} is {}, only OPEN conflicts move to investigation",
                    id, conflict.status
                )));
            }
            tx.execute(
                "UPDATE learning_conflicts SET status = ? WHERE id = ?",
                (ConflictStatus::Investigating.as_str(), id.to_string()),
            )?;
            load_conflict(tx, id)
        })
    }

    /// Settle a conflict. When a winner is named, the other learning's
    /// confidence may be set explicitly; this is the only path that lowers it.
    pub fn resolve_conflict(&self, id: Uuid, input: ResolveConflictInput) -> Result<LearningConflict> {
        require_text("resolution", &input.resolution)?;
        require_text("resolved_by", &input.resolved_by)?;
        if input.losing_confidence.is_some() && input.winning_learning_id.is_none() {
            return Err(EngineError::Validation(
                "losing_confidence requires winning_learning_id".to_string(),
            ));
        }
        let losing_confidence = input
            .losing_confidence
            .map(|c| check_confidence("losing_confidence", c))
            .transpose()?;

        let conflict = self.write(|tx| {
            let conflict = load_conflict(tx, id)?;
            require_unsettled(&conflict)?;

            if let Some(winner) = input.winning_learning_id {
                if !conflict.involves(winner) {
                    return Err(EngineError::Validation(format!(
                        "learning {} is not part of conflict {}",
                        winner, id
                    )));
                }
                if let Some(confidence) = losing_confidence {
                    let loser = if winner == conflict.learning_a_id {
                        conflict.learning_b_id
                    } else {
                        conflict.learning_a_id
                    };
                    tx.execute(
                        "UPDATE learnings SET confidence = ? WHERE id = ?",
                        (confidence, loser.to_string()),
                    )?;
                }
            }

            tx.execute(
                "UPDATE learning_conflicts SET status = ?, resolution = ?, winning_learning_id = ?,
                     resolved_by = ?, resolved_at = ?
                 WHERE id = ?",
                (
                    ConflictStatus::Resolved.as_str(),
                    &input.resolution,
                    input.winning_learning_id.map(|w| w.to_string()),
                    &input.resolved_by,
                    ts(&now()),
                    id.to_string(),
                ),
            )?;
            load_conflict(tx, id)
        })?;

        tracing::info!(
            conflict_id = %id,
            resolved_by = %input.resolved_by,
            winner = ?conflict.winning_learning_id,
            "conflict resolved"
        );
        Ok(conflict)
    }

    pub fn defer_conflict(&self, id: Uuid) -> Result<LearningConflict> {
        let conflict = self.write(|tx| {
            let conflict = load_conflict(tx, id)?;
            require_unsettled(&conflict)?;
            tx.execute(
                "UPDATE learning_conflicts SET status = ?, resolved_at = ? WHERE id = ?",
                (ConflictStatus::Deferred.as_str(), ts(&now()), id.to_string()),
            )?;
            load_conflict(tx, id)
        })?;

        tracing::info!(conflict_id = %id, "conflict deferred");
        Ok(conflict)
    }

    pub fn get_conflict(&self, id: Uuid) -> Result<LearningConflict> {
        self.read(|conn| load_conflict(conn, id))
    }

    pub fn list_conflicts(&self, status: Option<ConflictStatus>) -> Result<Vec<LearningConflict>> {
        self.read(|conn| query_conflicts(conn, status))
    }

    pub fn conflicts_for(&self, learning_id: Uuid) -> Result<Vec<LearningConflict>> {
        self.read(|conn| {
            load_learning(conn, learning_id)?;
            query_conflicts_for(conn, learning_id)
        })
    }
}
