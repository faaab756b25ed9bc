//! Propagation Targeter.

use rusqlite::{Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::conflicts::blocking_conflict_count;
use super::features::require_text;
use super::learnings::{load_learning, query_learnings};
use super::{get_datetime, get_enum, get_json, get_uuid, now, ts, Database};
use crate::error::{EngineError, Result};
use crate::models::*;
use crate::similarity::relevance;

const DESTINATION_COLUMNS: &str = "id, target_type, target_path, agent, tags, categories, created_at";

const TARGET_COLUMNS: &str =
    "id, learning_id, target_type, target_path, relevance_score, computed_at";

const RECORD_COLUMNS: &str =
    "id, learning_id, target_type, target_path, actor, section, propagated_at";

fn map_destination(row: &Row<'_>) -> rusqlite::Result<PropagationDestination> {
    Ok(PropagationDestination {
        id: get_uuid(row, 0)?,
        target_type: get_enum(row, 1)?,
        target_path: row.get(2)?,
        agent: row.get(3)?,
        tags: get_json(row, 4)?,
        categories: get_json(row, 5)?,
        created_at: get_datetime(row, 6)?,
    })
}

fn map_target(row: &Row<'_>) -> rusqlite::Result<PropagationTarget> {
    Ok(PropagationTarget {
        id: get_uuid(row, 0)?,
        learning_id: get_uuid(row, 1)?,
        target_type: get_enum(row, 2)?,
        target_path: row.get(3)?,
        relevance_score: row.get(4)?,
        computed_at: get_datetime(row, 5)?,
    })
}

fn map_record(row: &Row<'_>) -> rusqlite::Result<PropagationRecord> {
    Ok(PropagationRecord {
        id: get_uuid(row, 0)?,
        learning_id: get_uuid(row, 1)?,
        target_type: get_enum(row, 2)?,
        target_path: row.get(3)?,
        actor: row.get(4)?,
        section: row.get(5)?,
        propagated_at: get_datetime(row, 6)?,
    })
}

fn query_destinations(conn: &Connection) -> Result<Vec<PropagationDestination>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM propagation_destinations ORDER BY created_at, rowid",
        DESTINATION_COLUMNS
    ))?;
    let destinations = stmt
        .query_map([], map_destination)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(destinations)
}

fn query_targets(conn: &Connection, learning_id: Uuid) -> Result<Vec<PropagationTarget>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM propagation_targets WHERE learning_id = ?
         ORDER BY relevance_score DESC, target_path",
        TARGET_COLUMNS
    ))?;
    let targets = stmt
        .query_map([learning_id.to_string()], map_target)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(targets)
}

fn query_records(conn: &Connection, learning_id: Uuid) -> Result<Vec<PropagationRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM propagation_records WHERE learning_id = ? ORDER BY propagated_at, rowid",
        RECORD_COLUMNS
    ))?;
    let records = stmt
        .query_map([learning_id.to_string()], map_record)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}

/// Confidence at or above the readiness threshold and no OPEN or
/// INVESTIGATING conflict.
pub(super) fn is_ready(conn: &Connection, learning: &Learning, readiness: f64) -> Result<bool> {
    if learning.confidence < readiness {
        return Ok(false);
    }
    Ok(blocking_conflict_count(conn, learning.id)? == 0)
}

fn is_propagated(records: &[PropagationRecord], target: &PropagationTarget) -> bool {
    records
        .iter()
        .any(|r| r.target_type == target.target_type && r.target_path == target.target_path)
}

/// Progress over every stored candidate. Low-relevance targets count here even
/// though they never enter the ready queue.
fn summarize(conn: &Connection, learning_id: Uuid) -> Result<PropagationSummary> {
    let candidates = query_targets(conn, learning_id)?;
    let records = query_records(conn, learning_id)?;
    let propagated = candidates
        .iter()
        .filter(|t| is_propagated(&records, t))
        .count();

    Ok(PropagationSummary {
        learning_id,
        candidates: candidates.len(),
        propagated,
        status: PropagationStatus::derive(candidates.len(), propagated),
    })
}

impl Database {
    pub fn register_destination(
        &self,
        input: RegisterDestinationInput,
    ) -> Result<PropagationDestination> {
        require_text("target_path", &input.target_path)?;

        let destination = self.write(|tx| {
            let exists: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM propagation_destinations
                     WHERE target_type = ? AND target_path = ?)",
                (input.target_type.as_str(), &input.target_path),
                |row| row.get(0),
            )?;
            if exists {
                return Err(EngineError::Conflict(format!(
                    "destination {} {} already registered",
                    input.target_type, input.target_path
                )));
            }

            let destination = PropagationDestination {
                id: Uuid::new_v4(),
                target_type: input.target_type,
                target_path: input.target_path,
                agent: input.agent,
                tags: input.tags,
                categories: input.categories,
                created_at: now(),
            };
            tx.execute(
                &format!(
                    "INSERT INTO propagation_destinations ({}) VALUES (?, ?, ?, ?, ?, ?, ?)",
                    DESTINATION_COLUMNS
                ),
                (
                    destination.id.to_string(),
                    destination.target_type.as_str(),
                    &destination.target_path,
                    &destination.agent,
                    serde_json::to_string(&destination.tags)?,
                    serde_json::to_string(&destination.categories)?,
                    ts(&destination.created_at),
                ),
            )?;
            Ok(destination)
        })?;

        tracing::info!(
            target_type = %destination.target_type,
            target_path = %destination.target_path,
            "propagation destination registered"
        );
        Ok(destination)
    }

    pub fn list_destinations(&self) -> Result<Vec<PropagationDestination>> {
        self.read(query_destinations)
    }

    /// Score the learning against every registered destination, replacing
    /// any earlier candidates. Destinations scoring zero are left out.
    pub fn compute_targets(&self, learning_id: Uuid) -> Result<Vec<PropagationTarget>> {
        let targets = self.write(|tx| {
            let learning = load_learning(tx, learning_id)?;
            let destinations = query_destinations(tx)?;

            tx.execute(
                "DELETE FROM propagation_targets WHERE learning_id = ?",
                [learning_id.to_string()],
            )?;

            let computed_at = now();
            for destination in &destinations {
                let score = relevance(&learning, destination);
                if score <= 0.0 {
                    continue;
                }
                tx.execute(
                    &format!(
                        "INSERT INTO propagation_targets ({}) VALUES (?, ?, ?, ?, ?, ?)",
                        TARGET_COLUMNS
                    ),
                    (
                        Uuid::new_v4().to_string(),
                        learning_id.to_string(),
                        destination.target_type.as_str(),
                        &destination.target_path,
                        score,
                        ts(&computed_at),
                    ),
                )?;
            }
            query_targets(tx, learning_id)
        })?;

        tracing::debug!(learning_id = %learning_id, targets = targets.len(), "propagation targets computed");
        Ok(targets)
    }

    pub fn list_targets(&self, learning_id: Uuid) -> Result<Vec<PropagationTarget>> {
        self.read(|conn| {
            load_learning(conn, learning_id)?;
            query_targets(conn, learning_id)
        })
    }

    pub fn is_propagation_ready(&self, learning_id: Uuid) -> Result<bool> {
        let readiness = self.config().learning.readiness_confidence;
        self.read(|conn| {
            let learning = load_learning(conn, learning_id)?;
            is_ready(conn, &learning, readiness)
        })
    }

    /// Every learning that may currently be propagated.
    pub fn propagation_ready_learnings(&self) -> Result<Vec<Learning>> {
        let readiness = self.config().learning.readiness_confidence;
        self.read(|conn| {
            let candidates = query_learnings(
                conn,
                &LearningFilter {
                    min_confidence: Some(readiness),
                    ..Default::default()
                },
            )?;
            let mut ready = Vec::new();
            for learning in candidates {
                if is_ready(conn, &learning, readiness)? {
                    ready.push(learning);
                }
            }
            Ok(ready)
        })
    }

    /// Record that a learning was written into a target. Propagating the same
    /// pair again refreshes the existing evidence.
    pub fn record_propagation(&self, input: RecordPropagationInput) -> Result<PropagationRecord> {
        require_text("target_path", &input.target_path)?;
        require_text("actor", &input.actor)?;
        let readiness = self.config().learning.readiness_confidence;

        let record = self.write(|tx| {
            let learning = load_learning(tx, input.learning_id)?;
            if !is_ready(tx, &learning, readiness)? {
                return Err(EngineError::State(format!(
                    "learning {} is not propagation-ready (confidence {:.2}, {} blocking conflicts)",
                    learning.id,
                    learning.confidence,
                    blocking_conflict_count(tx, learning.id)?
                )));
            }

            tx.execute(
                &format!(
                    "INSERT INTO propagation_records ({}) VALUES (?, ?, ?, ?, ?, ?, ?)
                     ON CONFLICT (learning_id, target_type, target_path) DO UPDATE SET
                         actor = excluded.actor,
                         section = excluded.section,
                         propagated_at = excluded.propagated_at",
                    RECORD_COLUMNS
                ),
                (
                    Uuid::new_v4().to_string(),
                    input.learning_id.to_string(),
                    input.target_type.as_str(),
                    &input.target_path,
                    &input.actor,
                    &input.section,
                    ts(&now()),
                ),
            )?;

            tx.query_row(
                &format!(
                    "SELECT {} FROM propagation_records
                     WHERE learning_id = ? AND target_type = ? AND target_path = ?",
                    RECORD_COLUMNS
                ),
                (
                    input.learning_id.to_string(),
                    input.target_type.as_str(),
                    &input.target_path,
                ),
                map_record,
            )
            .optional()?
            .ok_or_else(|| EngineError::not_found("propagation record", input.learning_id))
        })?;

        tracing::info!(
            learning_id = %record.learning_id,
            target_type = %record.target_type,
            target_path = %record.target_path,
            actor = %record.actor,
            "learning propagated"
        );
        Ok(record)
    }

    pub fn list_propagations(&self, learning_id: Uuid) -> Result<Vec<PropagationRecord>> {
        self.read(|conn| {
            load_learning(conn, learning_id)?;
            query_records(conn, learning_id)
        })
    }

    pub fn propagation_status(&self, learning_id: Uuid) -> Result<PropagationSummary> {
        self.read(|conn| {
            load_learning(conn, learning_id)?;
            summarize(conn, learning_id)
        })
    }

    /// Eligible targets that have not been propagated yet, most relevant first.
    pub fn ready_queue(&self) -> Result<Vec<ReadyTarget>> {
        let readiness = self.config().learning.readiness_confidence;
        let threshold = self.config().learning.relevance_threshold;

        self.read(|conn| {
            let candidates = query_learnings(
                conn,
                &LearningFilter {
                    min_confidence: Some(readiness),
                    ..Default::default()
                },
            )?;

            let mut queue = Vec::new();
            for learning in candidates {
                if !is_ready(conn, &learning, readiness)? {
                    continue;
                }
                let records = query_records(conn, learning.id)?;
                for target in query_targets(conn, learning.id)? {
                    if target.meets_relevance(threshold) && !is_propagated(&records, &target) {
                        queue.push(ReadyTarget {
                            learning_id: learning.id,
                            title: learning.title.clone(),
                            confidence: learning.confidence,
                            target,
                        });
                    }
                }
            }

            queue.sort_by(|a, b| {
                b.target
                    .relevance_score
                    .total_cmp(&a.target.relevance_score)
                    .then(b.confidence.total_cmp(&a.confidence))
            });
            Ok(queue)
        })
    }

    /// Active learnings with their readiness, propagation progress and open
    /// conflicts.
    pub fn propagation_overview(&self) -> Result<Vec<LearningOverview>> {
        let readiness = self.config().learning.readiness_confidence;

        self.read(|conn| {
            let learnings = query_learnings(
                conn,
                &LearningFilter {
                    active_only: true,
                    ..Default::default()
                },
            )?;

            learnings
                .into_iter()
                .map(|learning| {
                    Ok(LearningOverview {
                        propagation_ready: is_ready(conn, &learning, readiness)?,
                        propagation: summarize(conn, learning.id)?,
                        open_conflicts: blocking_conflict_count(conn, learning.id)? as usize,
                        learning,
                    })
                })
                .collect()
        })
    }
}
