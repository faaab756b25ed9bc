use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::phase::Phase;
use crate::error::EngineError;

/// The task list an agent submitted for one phase of a feature.
///
/// Re-submitting for the same feature and phase replaces the whole list.
/// Items are validated against a minimal schema; any extra fields an agent
/// attaches are kept as-is in `extra`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskList {
    pub feature_id: String,
    pub phase: Phase,
    pub tasks: Vec<TaskItem>,
    pub submitted_by: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskItem {
    pub id: String,
    pub title: String,
    pub status: TaskStatus,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The execution status of a task.
///
/// Agents frequently write `done`; it is accepted as an alias of `completed`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    #[serde(alias = "done")]
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in-progress",
            Self::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in-progress" => Some(Self::InProgress),
            "completed" | "done" => Some(Self::Completed),
            _ => None,
        }
    }
}

impl TaskItem {
    /// Validate one raw task object from an agent payload.
    pub fn from_value(index: usize, value: Value) -> Result<Self, EngineError> {
        let Value::Object(mut fields) = value else {
            return Err(EngineError::Validation(format!(
                "task {} must be an object",
                index
            )));
        };

        let id = match fields.remove("id") {
            Some(Value::String(s)) if !s.trim().is_empty() => s,
            Some(Value::Number(n)) => n.to_string(),
            _ => {
                return Err(EngineError::Validation(format!(
                    "task {} is missing required field 'id'",
                    index
                )))
            }
        };

        let title = match fields.remove("title") {
            Some(Value::String(s)) if !s.trim().is_empty() => s,
            _ => {
                return Err(EngineError::Validation(format!(
                    "task {} ({}) is missing required field 'title'",
                    index, id
                )))
            }
        };

        let status = match fields.remove("status") {
            Some(Value::String(s)) => TaskStatus::parse(&s).ok_or_else(|| {
                EngineError::Validation(format!(
                    "task {} ({}) has invalid status '{}', expected pending, in-progress or completed",
                    index, id, s
                ))
            })?,
            _ => {
                return Err(EngineError::Validation(format!(
                    "task {} ({}) is missing required field 'status'",
                    index, id
                )))
            }
        };

        Ok(Self {
            id,
            title,
            status,
            extra: fields,
        })
    }
}

/// Input for submitting a phase task list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitTaskListInput {
    pub tasks: Vec<Value>,
    pub submitted_by: String,
}
