//! Learning Evolution Manager.

use rusqlite::{Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::features::require_text;
use super::{get_datetime, get_enum, get_json, get_opt_datetime, get_opt_uuid, get_uuid};
use super::{now, ts, Database};
use crate::error::{EngineError, Result};
use crate::models::*;

pub(super) const LEARNING_COLUMNS: &str = "id, predecessor_id, iteration, category, title, content,
     delta_summary, confidence, validation_count, reference_count, importance, tags,
     source_feature, source_phase, source_agent, is_superseded, superseded_by,
     last_validated_at, last_validated_by, last_referenced_at, created_at";

pub(super) fn map_learning(row: &Row<'_>) -> rusqlite::Result<Learning> {
    Ok(Learning {
        id: get_uuid(row, 0)?,
        predecessor_id: get_opt_uuid(row, 1)?,
        iteration: row.get(2)?,
        category: get_enum(row, 3)?,
        title: row.get(4)?,
        content: row.get(5)?,
        delta_summary: row.get(6)?,
        confidence: row.get(7)?,
        validation_count: row.get(8)?,
        reference_count: row.get(9)?,
        importance: get_enum(row, 10)?,
        tags: get_json(row, 11)?,
        source_feature: row.get(12)?,
        source_phase: row.get(13)?,
        source_agent: row.get(14)?,
        is_superseded: row.get(15)?,
        superseded_by: get_opt_uuid(row, 16)?,
        last_validated_at: get_opt_datetime(row, 17)?,
        last_validated_by: row.get(18)?,
        last_referenced_at: get_opt_datetime(row, 19)?,
        created_at: get_datetime(row, 20)?,
    })
}

pub(super) fn load_learning(conn: &Connection, id: Uuid) -> Result<Learning> {
    conn.query_row(
        &format!("SELECT {} FROM learnings WHERE id = ?", LEARNING_COLUMNS),
        [id.to_string()],
        map_learning,
    )
    .optional()?
    .ok_or_else(|| EngineError::not_found("learning", id))
}

pub(super) fn query_learnings(conn: &Connection, filter: &LearningFilter) -> Result<Vec<Learning>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM learnings
         WHERE (?1 IS NULL OR category = ?1)
           AND (?2 = 0 OR is_superseded = 0)
           AND (?3 IS NULL OR confidence >= ?3)
         ORDER BY created_at, rowid",
        LEARNING_COLUMNS
    ))?;
    let learnings = stmt
        .query_map(
            (
                filter.category.map(|c| c.as_str()),
                filter.active_only,
                filter.min_confidence,
            ),
            map_learning,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(learnings)
}

/// Caller-supplied confidence must already sit on the hundredths grid, so
/// that storage never moves a value across the readiness threshold.
pub(super) fn check_confidence(field: &str, confidence: f64) -> Result<f64> {
    if !(0.0..=1.0).contains(&confidence) {
        return Err(EngineError::Validation(format!(
            "{} {} out of range 0.00-1.00",
            field, confidence
        )));
    }
    let rounded = round2(confidence);
    if (rounded - confidence).abs() > 1e-9 {
        return Err(EngineError::Validation(format!(
            "{} {} has more than two decimals",
            field, confidence
        )));
    }
    Ok(rounded)
}

fn check_source_phase(phase: Option<u8>) -> Result<()> {
    if let Some(phase) = phase {
        Phase::new(phase)?;
    }
    Ok(())
}

fn insert_learning(conn: &Connection, learning: &Learning) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO learnings ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            LEARNING_COLUMNS
        ),
        rusqlite::params![
            learning.id.to_string(),
            learning.predecessor_id.map(|id| id.to_string()),
            learning.iteration,
            learning.category.as_str(),
            &learning.title,
            &learning.content,
            &learning.delta_summary,
            learning.confidence,
            learning.validation_count,
            learning.reference_count,
            learning.importance.as_str(),
            serde_json::to_string(&learning.tags)?,
            &learning.source_feature,
            learning.source_phase,
            &learning.source_agent,
            learning.is_superseded,
            learning.superseded_by.map(|id| id.to_string()),
            learning.last_validated_at.as_ref().map(ts),
            &learning.last_validated_by,
            learning.last_referenced_at.as_ref().map(ts),
            ts(&learning.created_at),
        ],
    )?;
    Ok(())
}

impl Database {
    /// Record new knowledge as the root of a chain.
    pub fn create_learning(&self, input: CreateLearningInput) -> Result<Learning> {
        require_text("title", &input.title)?;
        require_text("content", &input.content)?;
        let confidence = check_confidence("confidence", input.confidence)?;
        check_source_phase(input.source_phase)?;

        let learning = Learning {
            id: Uuid::new_v4(),
            predecessor_id: None,
            iteration: 1,
            category: input.category,
            title: input.title,
            content: input.content,
            delta_summary: None,
            confidence,
            validation_count: 0,
            reference_count: 0,
            importance: input.importance,
            tags: input.tags,
            source_feature: input.source_feature,
            source_phase: input.source_phase,
            source_agent: input.source_agent,
            is_superseded: false,
            superseded_by: None,
            last_validated_at: None,
            last_validated_by: None,
            last_referenced_at: None,
            created_at: now(),
        };
        self.write(|tx| insert_learning(tx, &learning))?;

        tracing::info!(
            learning_id = %learning.id,
            category = %learning.category,
            confidence = learning.confidence,
            "learning created"
        );
        Ok(learning)
    }

    /// Refine a learning. The successor inherits every field the input
    /// leaves unset; the predecessor is marked superseded and otherwise kept.
    pub fn evolve_learning(
        &self,
        predecessor_id: Uuid,
        input: EvolveLearningInput,
    ) -> Result<Learning> {
        require_text("content", &input.content)?;
        let confidence = input
            .confidence
            .map(|c| check_confidence("confidence", c))
            .transpose()?;
        check_source_phase(input.source_phase)?;

        let learning = self.write(|tx| {
            let predecessor = load_learning(tx, predecessor_id)?;
            if predecessor.is_superseded {
                return Err(EngineError::State(format!(
                    "learning {} is already superseded by {}",
                    predecessor.id,
                    predecessor
                        .superseded_by
                        .map(|id| id.to_string())
                        .unwrap_or_else(|| "another learning".to_string())
                )));
            }

            let learning = Learning {
                id: Uuid::new_v4(),
                predecessor_id: Some(predecessor.id),
                iteration: predecessor.iteration + 1,
                category: input.category.unwrap_or(predecessor.category),
                title: input.title.unwrap_or_else(|| predecessor.title.clone()),
                content: input.content,
                delta_summary: input.delta_summary,
                confidence: confidence.unwrap_or(predecessor.confidence),
                validation_count: 0,
                reference_count: 0,
                importance: input.importance.unwrap_or(predecessor.importance),
                tags: input.tags.unwrap_or_else(|| predecessor.tags.clone()),
                source_feature: input.source_feature.or_else(|| predecessor.source_feature.clone()),
                source_phase: input.source_phase.or(predecessor.source_phase),
                source_agent: input.source_agent.or_else(|| predecessor.source_agent.clone()),
                is_superseded: false,
                superseded_by: None,
                last_validated_at: None,
                last_validated_by: None,
                last_referenced_at: None,
                created_at: now(),
            };
            insert_learning(tx, &learning)?;

            let updated = tx.execute(
                "UPDATE learnings SET is_superseded = 1, superseded_by = ?
                 WHERE id = ? AND is_superseded = 0",
                (learning.id.to_string(), predecessor.id.to_string()),
            )?;
            if updated != 1 {
                return Err(EngineError::Conflict(format!(
                    "learning {} was superseded concurrently",
                    predecessor.id
                )));
            }
            Ok(learning)
        })?;

        tracing::info!(
            learning_id = %learning.id,
            predecessor_id = %predecessor_id,
            iteration = learning.iteration,
            "learning evolved"
        );
        Ok(learning)
    }

    /// Record an independent confirmation: one more validation, confidence
    /// up by the configured increment.
    pub fn validate_learning(&self, id: Uuid, validated_by: &str) -> Result<Learning> {
        require_text("validated_by", validated_by)?;
        let increment = self.config().learning.validation_increment;

        let learning = self.write(|tx| {
            let learning = load_learning(tx, id)?;
            tx.execute(
                "UPDATE learnings SET validation_count = validation_count + 1, confidence = ?,
                     last_validated_at = ?, last_validated_by = ?
                 WHERE id = ?",
                (
                    bump_confidence(learning.confidence, increment),
                    ts(&now()),
                    validated_by,
                    id.to_string(),
                ),
            )?;
            load_learning(tx, id)
        })?;

        tracing::info!(
            learning_id = %id,
            validated_by,
            confidence = learning.confidence,
            "learning validated"
        );
        Ok(learning)
    }

    /// Record that an agent relied on a learning.
    pub fn reference_learning(&self, id: Uuid) -> Result<Learning> {
        let increment = self.config().learning.reference_increment;

        let learning = self.write(|tx| {
            let learning = load_learning(tx, id)?;
            tx.execute(
                "UPDATE learnings SET reference_count = reference_count + 1, confidence = ?,
                     last_referenced_at = ?
                 WHERE id = ?",
                (
                    bump_confidence(learning.confidence, increment),
                    ts(&now()),
                    id.to_string(),
                ),
            )?;
            load_learning(tx, id)
        })?;

        tracing::info!(learning_id = %id, confidence = learning.confidence, "learning referenced");
        Ok(learning)
    }

    pub fn get_learning(&self, id: Uuid) -> Result<Learning> {
        self.read(|conn| load_learning(conn, id))
    }

    pub fn list_learnings(&self, filter: &LearningFilter) -> Result<Vec<Learning>> {
        self.read(|conn| query_learnings(conn, filter))
    }

    /// Every learning in `id`'s chain, root first.
    pub fn evolution_chain(&self, id: Uuid) -> Result<Vec<Learning>> {
        self.read(|conn| {
            let start = load_learning(conn, id)?;

            let mut chain = vec![start.clone()];
            let mut cursor = start.predecessor_id;
            while let Some(prev) = cursor {
                let learning = load_learning(conn, prev)?;
                cursor = learning.predecessor_id;
                chain.push(learning);
            }
            chain.reverse();

            let mut cursor = start.superseded_by;
            while let Some(next) = cursor {
                let learning = load_learning(conn, next)?;
                cursor = learning.superseded_by;
                chain.push(learning);
            }
            Ok(chain)
        })
    }
}
