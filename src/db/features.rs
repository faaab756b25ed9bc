//! Phase Transition Guard.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::gates::{query_blockers, query_gates};
use super::invocations::{query_invocations, run_coverage_gate};
use super::tasks::query_task_lists;
use super::{get_datetime, get_enum, get_opt_datetime, get_phase, get_uuid, now, ts, Database};
use crate::error::{EngineError, Result};
use crate::models::*;

const FEATURE_COLUMNS: &str = "id, name, complexity_level, severity, current_phase, status, author,
     branch_name, base_branch, pr_reference, merged_at, created_at, updated_at, completed_at";

const TRANSITION_COLUMNS: &str =
    "id, feature_id, from_phase, to_phase, actor, kind, note, created_at";

fn map_feature(row: &Row<'_>) -> rusqlite::Result<Feature> {
    Ok(Feature {
        id: row.get(0)?,
        name: row.get(1)?,
        complexity_level: row.get(2)?,
        severity: get_enum(row, 3)?,
        current_phase: get_phase(row, 4)?,
        status: get_enum(row, 5)?,
        author: row.get(6)?,
        branch_name: row.get(7)?,
        base_branch: row.get(8)?,
        pr_reference: row.get(9)?,
        merged_at: get_opt_datetime(row, 10)?,
        created_at: get_datetime(row, 11)?,
        updated_at: get_datetime(row, 12)?,
        completed_at: get_opt_datetime(row, 13)?,
    })
}

fn map_transition(row: &Row<'_>) -> rusqlite::Result<PhaseTransition> {
    Ok(PhaseTransition {
        id: get_uuid(row, 0)?,
        feature_id: row.get(1)?,
        from_phase: get_phase(row, 2)?,
        to_phase: get_phase(row, 3)?,
        actor: row.get(4)?,
        kind: get_enum(row, 5)?,
        note: row.get(6)?,
        created_at: get_datetime(row, 7)?,
    })
}

pub(super) fn load_feature(conn: &Connection, id: &str) -> Result<Feature> {
    conn.query_row(
        &format!("SELECT {} FROM features WHERE id = ?", FEATURE_COLUMNS),
        [id],
        map_feature,
    )
    .optional()?
    .ok_or_else(|| EngineError::not_found("feature", id))
}

pub(super) fn query_transitions(conn: &Connection, feature_id: &str) -> Result<Vec<PhaseTransition>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM phase_transitions WHERE feature_id = ? ORDER BY created_at, rowid",
        TRANSITION_COLUMNS
    ))?;
    let transitions = stmt
        .query_map([feature_id], map_transition)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(transitions)
}

fn insert_transition(
    conn: &Connection,
    feature: &Feature,
    to_phase: Phase,
    actor: &str,
    kind: TransitionKind,
    note: Option<String>,
    at: DateTime<Utc>,
) -> Result<PhaseTransition> {
    let transition = PhaseTransition {
        id: Uuid::new_v4(),
        feature_id: feature.id.clone(),
        from_phase: feature.current_phase,
        to_phase,
        actor: actor.to_string(),
        kind,
        note,
        created_at: at,
    };
    conn.execute(
        &format!(
            "INSERT INTO phase_transitions ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            TRANSITION_COLUMNS
        ),
        (
            transition.id.to_string(),
            &transition.feature_id,
            transition.from_phase.value(),
            transition.to_phase.value(),
            &transition.actor,
            transition.kind.as_str(),
            &transition.note,
            ts(&at),
        ),
    )?;
    Ok(transition)
}

/// Refuse phase moves on features that are blocked or finished.
fn require_in_progress(feature: &Feature) -> Result<()> {
    match feature.status {
        FeatureStatus::InProgress => Ok(()),
        other => Err(EngineError::State(format!(
            "feature {} is {}",
            feature.id, other
        ))),
    }
}

pub(super) fn require_text(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(EngineError::Validation(format!("{} is required", field)));
    }
    Ok(())
}

fn set_status(
    conn: &Connection,
    feature_id: &str,
    status: FeatureStatus,
    at: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "UPDATE features SET status = ?, updated_at = ? WHERE id = ?",
        (status.as_str(), ts(&at), feature_id),
    )?;
    Ok(())
}

impl Database {
    pub fn create_feature(&self, input: CreateFeatureInput) -> Result<Feature> {
        require_text("id", &input.id)?;
        require_text("name", &input.name)?;
        require_text("author", &input.author)?;
        if !(1..=3).contains(&input.complexity_level) {
            return Err(EngineError::Validation(format!(
                "complexity_level {} out of range 1-3",
                input.complexity_level
            )));
        }

        let feature = self.write(|tx| {
            let exists: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM features WHERE id = ?)",
                [&input.id],
                |row| row.get(0),
            )?;
            if exists {
                return Err(EngineError::Conflict(format!(
                    "feature {} already exists",
                    input.id
                )));
            }

            let at = now();
            let feature = Feature {
                id: input.id,
                name: input.name,
                complexity_level: input.complexity_level,
                severity: input.severity,
                current_phase: Phase::PLANNING,
                status: FeatureStatus::InProgress,
                author: input.author,
                branch_name: input.branch_name,
                base_branch: input.base_branch,
                pr_reference: None,
                merged_at: None,
                created_at: at,
                updated_at: at,
                completed_at: None,
            };
            tx.execute(
                "INSERT INTO features (id, name, complexity_level, severity, current_phase, status,
                     author, branch_name, base_branch, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                rusqlite::params![
                    &feature.id,
                    &feature.name,
                    feature.complexity_level,
                    feature.severity.as_str(),
                    feature.current_phase.value(),
                    feature.status.as_str(),
                    &feature.author,
                    &feature.branch_name,
                    &feature.base_branch,
                    ts(&at),
                    ts(&at),
                ],
            )?;
            Ok(feature)
        })?;

        tracing::info!(feature_id = %feature.id, "feature created");
        Ok(feature)
    }

    pub fn get_feature(&self, id: &str) -> Result<Feature> {
        self.read(|conn| load_feature(conn, id))
    }

    pub fn list_features(&self, status: Option<FeatureStatus>) -> Result<Vec<Feature>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM features WHERE (?1 IS NULL OR status = ?1) ORDER BY created_at, rowid",
                FEATURE_COLUMNS
            ))?;
            let features = stmt
                .query_map([status.map(|s| s.as_str())], map_feature)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(features)
        })
    }

    /// Move a feature one phase forward or any number of phases back.
    pub fn transition(&self, feature_id: &str, input: TransitionInput) -> Result<PhaseTransition> {
        require_text("actor", &input.actor)?;
        let to_phase = Phase::new(input.to_phase)?;

        let transition = self.write(|tx| {
            let feature = load_feature(tx, feature_id)?;
            require_in_progress(&feature)?;
            let kind = classify_transition(feature.current_phase, to_phase)?;

            let at = now();
            let transition =
                insert_transition(tx, &feature, to_phase, &input.actor, kind, input.note, at)?;
            tx.execute(
                "UPDATE features SET current_phase = ?, updated_at = ? WHERE id = ?",
                (to_phase.value(), ts(&at), feature_id),
            )?;
            Ok(transition)
        })?;

        tracing::info!(
            feature_id,
            from = transition.from_phase.value(),
            to = transition.to_phase.value(),
            kind = %transition.kind,
            actor = %transition.actor,
            "phase transition"
        );
        Ok(transition)
    }

    /// Finish a feature in phase 7. Refused with a gate failure, and a
    /// blocker listing the missing pairs, unless every expected agent has a
    /// closed invocation in its phase.
    pub fn complete(&self, feature_id: &str, actor: &str) -> Result<Feature> {
        require_text("actor", actor)?;

        let result = self.write_gated(|tx| {
            let feature = load_feature(tx, feature_id)?;
            require_in_progress(&feature)?;
            if feature.current_phase != Phase::RELEASE {
                return Err(EngineError::State(format!(
                    "feature {} is in phase {}, completion requires phase 7",
                    feature.id,
                    feature.current_phase.value()
                )));
            }
            if let Err(failure) = run_coverage_gate(tx, &feature, "completion")? {
                return Ok(Err(failure));
            }

            let at = now();
            insert_transition(
                tx,
                &feature,
                Phase::COMPLETE,
                actor,
                TransitionKind::Forward,
                None,
                at,
            )?;
            tx.execute(
                "UPDATE features SET current_phase = ?, status = ?, updated_at = ?, completed_at = ?
                 WHERE id = ?",
                (
                    Phase::COMPLETE.value(),
                    FeatureStatus::Completed.as_str(),
                    ts(&at),
                    ts(&at),
                    feature_id,
                ),
            )?;
            Ok(Ok(load_feature(tx, feature_id)?))
        });

        match &result {
            Ok(_) => tracing::info!(feature_id, actor, "feature completed"),
            Err(EngineError::GateFailure { missing, .. }) => {
                tracing::warn!(feature_id, missing = missing.len(), "completion refused by coverage gate")
            }
            Err(_) => {}
        }
        result
    }

    /// Record an escalation in place and block the feature.
    pub fn escalate(&self, feature_id: &str, actor: &str, note: Option<String>) -> Result<PhaseTransition> {
        require_text("actor", actor)?;

        let transition = self.write(|tx| {
            let feature = load_feature(tx, feature_id)?;
            require_in_progress(&feature)?;

            let at = now();
            let transition = insert_transition(
                tx,
                &feature,
                feature.current_phase,
                actor,
                TransitionKind::Escalation,
                note,
                at,
            )?;
            set_status(tx, feature_id, FeatureStatus::Blocked, at)?;
            Ok(transition)
        })?;

        tracing::info!(feature_id, actor, "feature escalated");
        Ok(transition)
    }

    pub fn resume(&self, feature_id: &str, actor: &str, note: Option<&str>) -> Result<Feature> {
        require_text("actor", actor)?;

        let feature = self.write(|tx| {
            let feature = load_feature(tx, feature_id)?;
            if feature.status != FeatureStatus::Blocked {
                return Err(EngineError::State(format!(
                    "feature {} is {}, only BLOCKED features resume",
                    feature.id, feature.status
                )));
            }
            set_status(tx, feature_id, FeatureStatus::InProgress, now())?;
            load_feature(tx, feature_id)
        })?;

        tracing::info!(feature_id, actor, note, "feature resumed");
        Ok(feature)
    }

    pub fn cancel(&self, feature_id: &str, actor: &str, reason: Option<&str>) -> Result<Feature> {
        require_text("actor", actor)?;

        let feature = self.write(|tx| {
            let feature = load_feature(tx, feature_id)?;
            if feature.is_terminal() {
                return Err(EngineError::State(format!(
                    "feature {} is already {}",
                    feature.id, feature.status
                )));
            }
            let at = now();
            tx.execute(
                "UPDATE features SET status = ?, updated_at = ?, completed_at = ? WHERE id = ?",
                (
                    FeatureStatus::Cancelled.as_str(),
                    ts(&at),
                    ts(&at),
                    feature_id,
                ),
            )?;
            load_feature(tx, feature_id)
        })?;

        tracing::info!(feature_id, actor, reason, "feature cancelled");
        Ok(feature)
    }

    pub fn update_vcs(&self, feature_id: &str, input: UpdateVcsInput) -> Result<Feature> {
        self.write(|tx| {
            load_feature(tx, feature_id)?;
            tx.execute(
                "UPDATE features SET branch_name = COALESCE(?, branch_name),
                     base_branch = COALESCE(?, base_branch), updated_at = ?
                 WHERE id = ?",
                (&input.branch_name, &input.base_branch, ts(&now()), feature_id),
            )?;
            load_feature(tx, feature_id)
        })
    }

    /// Record the pull request opened for release. The coverage gate runs
    /// first; on failure the reference is not stored.
    pub fn record_pull_request(
        &self,
        feature_id: &str,
        pr_reference: &str,
        actor: &str,
    ) -> Result<Feature> {
        require_text("pr_reference", pr_reference)?;
        require_text("actor", actor)?;

        let result = self.write_gated(|tx| {
            let feature = load_feature(tx, feature_id)?;
            require_in_progress(&feature)?;
            if let Err(failure) = run_coverage_gate(tx, &feature, "pull_request")? {
                return Ok(Err(failure));
            }
            tx.execute(
                "UPDATE features SET pr_reference = ?, updated_at = ? WHERE id = ?",
                (pr_reference, ts(&now()), feature_id),
            )?;
            Ok(Ok(load_feature(tx, feature_id)?))
        });

        match &result {
            Ok(_) => tracing::info!(feature_id, pr_reference, actor, "pull request recorded"),
            Err(EngineError::GateFailure { missing, .. }) => {
                tracing::warn!(feature_id, missing = missing.len(), "pull request refused by coverage gate")
            }
            Err(_) => {}
        }
        result
    }

    pub fn record_merge(&self, feature_id: &str, merged_at: Option<DateTime<Utc>>) -> Result<Feature> {
        self.write(|tx| {
            let feature = load_feature(tx, feature_id)?;
            if feature.pr_reference.is_none() {
                return Err(EngineError::State(format!(
                    "feature {} has no pull request to merge",
                    feature.id
                )));
            }
            let merged_at = merged_at.unwrap_or_else(now);
            tx.execute(
                "UPDATE features SET merged_at = ?, updated_at = ? WHERE id = ?",
                (ts(&merged_at), ts(&now()), feature_id),
            )?;
            load_feature(tx, feature_id)
        })
    }

    pub fn list_transitions(&self, feature_id: &str) -> Result<Vec<PhaseTransition>> {
        self.read(|conn| {
            load_feature(conn, feature_id)?;
            query_transitions(conn, feature_id)
        })
    }

    /// The feature and every record attached to it, read from one snapshot.
    pub fn feature_history(&self, feature_id: &str) -> Result<FeatureHistory> {
        self.read(|conn| {
            Ok(FeatureHistory {
                feature: load_feature(conn, feature_id)?,
                transitions: query_transitions(conn, feature_id)?,
                gates: query_gates(conn, feature_id)?,
                blockers: query_blockers(conn, feature_id, false)?,
                invocations: query_invocations(conn, feature_id)?,
                task_lists: query_task_lists(conn, feature_id)?,
            })
        })
    }
}
