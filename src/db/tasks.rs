use rusqlite::{Connection, OptionalExtension, Row};

use super::features::{load_feature, require_text};
use super::{get_datetime, get_json, get_phase, now, ts, Database};
use crate::error::{EngineError, Result};
use crate::models::*;

fn map_task_list(row: &Row<'_>) -> rusqlite::Result<TaskList> {
    Ok(TaskList {
        feature_id: row.get(0)?,
        phase: get_phase(row, 1)?,
        tasks: get_json(row, 2)?,
        submitted_by: row.get(3)?,
        updated_at: get_datetime(row, 4)?,
    })
}

pub(super) fn query_task_lists(conn: &Connection, feature_id: &str) -> Result<Vec<TaskList>> {
    let mut stmt = conn.prepare(
        "SELECT feature_id, phase, tasks, submitted_by, updated_at
         FROM task_lists WHERE feature_id = ? ORDER BY phase",
    )?;
    let lists = stmt
        .query_map([feature_id], map_task_list)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(lists)
}

impl Database {
    /// Replace the task list for one feature phase. Every item is validated
    /// before anything is written.
    pub fn submit_task_list(
        &self,
        feature_id: &str,
        phase: u8,
        input: SubmitTaskListInput,
    ) -> Result<TaskList> {
        require_text("submitted_by", &input.submitted_by)?;
        let phase = Phase::new(phase)?;
        let tasks = input
            .tasks
            .into_iter()
            .enumerate()
            .map(|(index, value)| TaskItem::from_value(index, value))
            .collect::<Result<Vec<_>>>()?;

        let list = self.write(|tx| {
            load_feature(tx, feature_id)?;
            let list = TaskList {
                feature_id: feature_id.to_string(),
                phase,
                tasks,
                submitted_by: input.submitted_by,
                updated_at: now(),
            };
            tx.execute(
                "INSERT INTO task_lists (feature_id, phase, tasks, submitted_by, updated_at)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT (feature_id, phase) DO UPDATE SET
                     tasks = excluded.tasks,
                     submitted_by = excluded.submitted_by,
                     updated_at = excluded.updated_at",
                (
                    &list.feature_id,
                    list.phase.value(),
                    serde_json::to_string(&list.tasks)?,
                    &list.submitted_by,
                    ts(&list.updated_at),
                ),
            )?;
            Ok(list)
        })?;

        tracing::info!(
            feature_id,
            phase = phase.value(),
            tasks = list.tasks.len(),
            "task list submitted"
        );
        Ok(list)
    }

    pub fn get_task_list(&self, feature_id: &str, phase: u8) -> Result<TaskList> {
        let phase = Phase::new(phase)?;
        self.read(|conn| {
            load_feature(conn, feature_id)?;
            conn.query_row(
                "SELECT feature_id, phase, tasks, submitted_by, updated_at
                 FROM task_lists WHERE feature_id = ? AND phase = ?",
                (feature_id, phase.value()),
                map_task_list,
            )
            .optional()?
            .ok_or_else(|| {
                EngineError::not_found("task list", format!("{}/{}", feature_id, phase.value()))
            })
        })
    }
}
