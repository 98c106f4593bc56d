//! Event types.
//!
//! `ProcessInstanceEvent` and `ErrorDetail` form the append-only, persisted
//! log of an instance. `EngineEvent` is the transient notification broadcast
//! on the event bus while the engine runs; all variants are Clone + Send + Sync
//! for use with tokio broadcast channels.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::identity::UserId;
use crate::instance::{ProcessInstanceStatus, StrategyKind};

// ---------------------------------------------------------------------------
// Persisted event log
// ---------------------------------------------------------------------------

/// Kind of a persisted instance event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessInstanceEventType {
    TaskCompleted,
    TaskFailed,
    TaskCancelled,
    TaskExecutedManually,
    TaskSkipped,
    ProcessInstanceCompleted,
    ProcessInstanceError,
    ProcessInstanceSuspended,
    ProcessInstanceResumed,
    ProcessInstanceTerminated,
    ProcessInstanceRewoundToTask,
}

impl ProcessInstanceEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TaskCompleted => "task_completed",
            Self::TaskFailed => "task_failed",
            Self::TaskCancelled => "task_cancelled",
            Self::TaskExecutedManually => "task_executed_manually",
            Self::TaskSkipped => "task_skipped",
            Self::ProcessInstanceCompleted => "process_instance_completed",
            Self::ProcessInstanceError => "process_instance_error",
            Self::ProcessInstanceSuspended => "process_instance_suspended",
            Self::ProcessInstanceResumed => "process_instance_resumed",
            Self::ProcessInstanceTerminated => "process_instance_terminated",
            Self::ProcessInstanceRewoundToTask => "process_instance_rewound_to_task",
        }
    }
}

impl fmt::Display for ProcessInstanceEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessInstanceEventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| format!("unknown event type '{s}'"))
    }
}

/// One entry of an instance's event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessInstanceEvent {
    pub id: Uuid,
    pub instance_id: Uuid,
    pub event_type: ProcessInstanceEventType,
    /// The task this event is about, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<Uuid>,
    /// The acting user, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserId>,
    pub timestamp: DateTime<Utc>,
}

/// Structured detail attached to a failure event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub id: Uuid,
    pub event_id: Uuid,
    pub message: String,
    /// 1-based line within the failing script or expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_number: Option<u32>,
    /// Literal text of the failing line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_contents: Option<String>,
    /// 1-based column, when determinable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
    /// Diagnostic trace lines, outermost first.
    #[serde(default)]
    pub trace: Vec<String>,
}

// ---------------------------------------------------------------------------
// Event bus notifications
// ---------------------------------------------------------------------------

/// Events broadcast while instances are driven.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A run began.
    RunStarted {
        instance_id: Uuid,
        strategy: StrategyKind,
    },

    /// An automated task finished.
    TaskCompleted {
        instance_id: Uuid,
        task_id: Uuid,
        task_name: String,
    },

    /// A task failed and halted its branch.
    TaskFailed {
        instance_id: Uuid,
        task_id: Uuid,
        task_name: String,
        error: String,
    },

    /// A human task was created and assigned.
    HumanTaskCreated {
        instance_id: Uuid,
        task_id: Uuid,
        task_name: String,
        potential_owners: Vec<UserId>,
    },

    /// The run returned control to the caller.
    RunFinished {
        instance_id: Uuid,
        status: ProcessInstanceStatus,
        tasks_executed: usize,
    },

    /// The instance was rewound.
    InstanceReset {
        instance_id: Uuid,
        target_task_id: Uuid,
        tasks_removed: usize,
    },
}

impl EngineEvent {
    pub fn instance_id(&self) -> Uuid {
        match self {
            EngineEvent::RunStarted { instance_id, .. }
            | EngineEvent::TaskCompleted { instance_id, .. }
            | EngineEvent::TaskFailed { instance_id, .. }
            | EngineEvent::HumanTaskCreated { instance_id, .. }
            | EngineEvent::RunFinished { instance_id, .. }
            | EngineEvent::InstanceReset { instance_id, .. } => *instance_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_parses_from_str() {
        let parsed: ProcessInstanceEventType = "task_failed".parse().unwrap();
        assert_eq!(parsed, ProcessInstanceEventType::TaskFailed);
        assert_eq!(
            ProcessInstanceEventType::ProcessInstanceRewoundToTask.as_str(),
            "process_instance_rewound_to_task"
        );
        assert!("task_exploded".parse::<ProcessInstanceEventType>().is_err());
    }

    #[test]
    fn test_engine_event_is_tagged() {
        let id = Uuid::now_v7();
        let event = EngineEvent::RunStarted {
            instance_id: id,
            strategy: StrategyKind::Greedy,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "run_started");
        assert_eq!(json["strategy"], "greedy");
        assert_eq!(event.instance_id(), id);
    }

    #[test]
    fn test_error_detail_optional_fields_omitted() {
        let detail = ErrorDetail {
            id: Uuid::now_v7(),
            event_id: Uuid::now_v7(),
            message: "boom".to_string(),
            line_number: None,
            line_contents: None,
            offset: None,
            trace: vec![],
        };
        let json = serde_json::to_value(&detail).unwrap();
        assert!(json.get("offset").is_none());
        assert_eq!(json["message"], "boom");
    }
}
