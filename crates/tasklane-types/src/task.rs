//! Task occurrences.
//!
//! A `Task` is one concrete visit of a task definition inside a `BpmnProcess`.
//! Its id is stable across reloads; `sequence` orders every task of an
//! instance by the moment it was reached, which is what reset truncates on.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a task occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Materialized but not yet reached.
    Future,
    /// Predicted successor on an unconditional path.
    Likely,
    /// Predicted successor behind a condition or gateway.
    Maybe,
    Ready,
    Waiting,
    Started,
    Completed,
    Error,
    Cancelled,
}

impl TaskState {
    /// Speculative look-ahead states. Never part of recorded history.
    pub fn is_predicted(self) -> bool {
        matches!(self, TaskState::Likely | TaskState::Maybe)
    }

    /// States that still block the owning process from finishing.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            TaskState::Future | TaskState::Ready | TaskState::Waiting | TaskState::Started
        )
    }

    pub fn is_finished(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Error | TaskState::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Future => "future",
            TaskState::Likely => "likely",
            TaskState::Maybe => "maybe",
            TaskState::Ready => "ready",
            TaskState::Waiting => "waiting",
            TaskState::Started => "started",
            TaskState::Completed => "completed",
            TaskState::Error => "error",
            TaskState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "future" => Ok(TaskState::Future),
            "likely" => Ok(TaskState::Likely),
            "maybe" => Ok(TaskState::Maybe),
            "ready" => Ok(TaskState::Ready),
            "waiting" => Ok(TaskState::Waiting),
            "started" => Ok(TaskState::Started),
            "completed" => Ok(TaskState::Completed),
            "error" => Ok(TaskState::Error),
            "cancelled" => Ok(TaskState::Cancelled),
            other => Err(format!("unknown task state '{other}'")),
        }
    }
}

/// One task occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique id, stable across reloads.
    pub id: Uuid,
    /// Owning `BpmnProcess`.
    pub process_id: Uuid,
    /// Symbolic identifier of the task definition within its process.
    pub definition_id: String,
    /// The task whose completion created this one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,
    pub state: TaskState,
    /// Per-instance ordering key assigned when the task was reached.
    pub sequence: i64,
    /// Ordering key of the transition into a finished state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_sequence: Option<i64>,
    /// Data scope of the task. Holds the final scope once completed.
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Deadline of a waiting boundary timer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_at: Option<DateTime<Utc>>,
}
