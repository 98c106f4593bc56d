//! Process instance types.
//!
//! A `ProcessInstance` is one execution of a process model. It owns a tree of
//! `BpmnProcess` records: the root process plus one child per entered call
//! activity or sub-process, keyed by the spawning task's id.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::identity::UserId;

/// Status of a process instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessInstanceStatus {
    NotStarted,
    /// Automated work remains (the default strategy stopped early).
    Running,
    /// Waiting on a human task, a timer, or nothing runnable.
    Waiting,
    Suspended,
    Complete,
    Error,
    Terminated,
}

impl ProcessInstanceStatus {
    /// Instances in a final status never run again.
    pub fn is_final(self) -> bool {
        matches!(
            self,
            ProcessInstanceStatus::Complete | ProcessInstanceStatus::Terminated
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProcessInstanceStatus::NotStarted => "not_started",
            ProcessInstanceStatus::Running => "running",
            ProcessInstanceStatus::Waiting => "waiting",
            ProcessInstanceStatus::Suspended => "suspended",
            ProcessInstanceStatus::Complete => "complete",
            ProcessInstanceStatus::Error => "error",
            ProcessInstanceStatus::Terminated => "terminated",
        }
    }
}

impl fmt::Display for ProcessInstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessInstanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_started" => Ok(ProcessInstanceStatus::NotStarted),
            "running" => Ok(ProcessInstanceStatus::Running),
            "waiting" => Ok(ProcessInstanceStatus::Waiting),
            "suspended" => Ok(ProcessInstanceStatus::Suspended),
            "complete" => Ok(ProcessInstanceStatus::Complete),
            "error" => Ok(ProcessInstanceStatus::Error),
            "terminated" => Ok(ProcessInstanceStatus::Terminated),
            other => Err(format!("unknown process instance status '{other}'")),
        }
    }
}

/// One execution of a process model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessInstance {
    /// UUIDv7 assigned at creation.
    pub id: Uuid,
    pub model_id: String,
    /// Model version this instance is pinned to.
    pub model_version: semver::Version,
    pub status: ProcessInstanceStatus,
    /// The initiating user.
    pub owner: UserId,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// One instantiation of a process graph within an instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BpmnProcess {
    /// The root process has a fresh id; nested processes share the id of the
    /// task that spawned them.
    pub id: Uuid,
    pub instance_id: Uuid,
    /// Identifier of the process definition within the model.
    pub definition_id: String,
    /// Direct parent process. `None` for the root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,
    #[serde(default)]
    pub snapshot: ProcessSnapshot,
}

/// Engine-internal state needed to resume a process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSnapshot {
    /// Parallel join gateway id -> ids of the tasks that have arrived at it.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub join_arrivals: BTreeMap<String, Vec<Uuid>>,
}

/// Which ready tasks a run executes before returning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Run automated tasks until a human task becomes ready.
    #[default]
    Default,
    /// Exhaust every runnable task, including ones made ready along the way.
    Greedy,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::Default => f.write_str("default"),
            StrategyKind::Greedy => f.write_str("greedy"),
        }
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(StrategyKind::Default),
            "greedy" => Ok(StrategyKind::Greedy),
            other => Err(format!("unknown execution strategy '{other}'")),
        }
    }
}
