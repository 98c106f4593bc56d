//! Process model types.
//!
//! A `ProcessModel` is the immutable, versioned unit loaded from the model
//! store. It packages one or more `ProcessDefinition`s: the primary process
//! plus any process referenced by call activities or sub-processes. Every
//! running instance of the model shares the same `Arc<ProcessModel>`.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::GroupId;

// ---------------------------------------------------------------------------
// Process model
// ---------------------------------------------------------------------------

/// A versioned package of process definitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessModel {
    /// Stable model identifier (e.g. "expense-approval").
    pub id: String,
    /// Human-readable model name.
    pub name: String,
    /// Model version. Instances pin the version they were created with.
    pub version: semver::Version,
    /// Identifier of the process an instance starts in.
    pub primary_process: String,
    /// All process graphs in this model.
    pub processes: Vec<ProcessDefinition>,
}

impl ProcessModel {
    /// Look up a process definition by identifier.
    pub fn process(&self, id: &str) -> Option<&ProcessDefinition> {
        self.processes.iter().find(|p| p.id == id)
    }

    /// The process an instance starts in.
    pub fn primary(&self) -> Option<&ProcessDefinition> {
        self.process(&self.primary_process)
    }
}

// ---------------------------------------------------------------------------
// Process definition
// ---------------------------------------------------------------------------

/// One process graph: lanes, task definitions and the sequence flows between them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessDefinition {
    /// Identifier, unique within the model.
    pub id: String,
    /// Human-readable process name.
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lanes: Vec<LaneDefinition>,
    pub tasks: Vec<TaskDefinition>,
    #[serde(default)]
    pub flows: Vec<SequenceFlow>,
}

impl ProcessDefinition {
    pub fn task(&self, id: &str) -> Option<&TaskDefinition> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn lane(&self, name: &str) -> Option<&LaneDefinition> {
        self.lanes.iter().find(|l| l.name == name)
    }

    /// The single start event of this process.
    pub fn start_event(&self) -> Option<&TaskDefinition> {
        self.tasks
            .iter()
            .find(|t| matches!(t.kind, TaskKind::StartEvent))
    }

    /// Outgoing flows of a task, in declaration order.
    pub fn outgoing<'a>(&'a self, task_id: &'a str) -> impl Iterator<Item = &'a SequenceFlow> {
        self.flows.iter().filter(move |f| f.source == task_id)
    }

    /// Incoming flows of a task, in declaration order.
    pub fn incoming<'a>(&'a self, task_id: &'a str) -> impl Iterator<Item = &'a SequenceFlow> {
        self.flows.iter().filter(move |f| f.target == task_id)
    }

    /// Boundary events attached to the given activity.
    pub fn boundary_events<'a>(
        &'a self,
        activity_id: &'a str,
    ) -> impl Iterator<Item = &'a TaskDefinition> {
        self.tasks.iter().filter(move |t| match &t.kind {
            TaskKind::BoundaryEvent { attached_to, .. } => attached_to == activity_id,
            _ => false,
        })
    }

    /// Whether the task is a parallel gateway that joins more than one branch.
    pub fn is_join(&self, task_id: &str) -> bool {
        self.task(task_id)
            .is_some_and(|t| matches!(t.kind, TaskKind::ParallelGateway))
            && self.incoming(task_id).count() > 1
    }
}

// ---------------------------------------------------------------------------
// Task definition
// ---------------------------------------------------------------------------

/// A node of a process graph.
///
/// The node kind is flattened into the task entry, so YAML reads as:
/// ```yaml
/// - id: approve
///   name: Approve expense
///   type: user_task
///   lane: Finance Team
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDefinition {
    /// Symbolic identifier, unique within its process.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub kind: TaskKind,
    /// Lane this task belongs to. Tasks outside any lane belong to the initiator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lane: Option<String>,
}

impl TaskDefinition {
    /// Display name, falling back to the identifier.
    pub fn title(&self) -> &str {
        if self.name.is_empty() { &self.id } else { &self.name }
    }
}

/// The kind of a process node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskKind {
    StartEvent,
    EndEvent,
    /// Runs a script in the expression sandbox against the task data.
    ScriptTask { script: String },
    /// Waits for a user to submit data.
    UserTask {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        form: Option<String>,
    },
    /// Waits for a user to confirm the work was done.
    ManualTask,
    /// Takes exactly one outgoing flow.
    ExclusiveGateway {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default_flow: Option<String>,
    },
    /// Splits into all outgoing flows, or joins all incoming ones.
    ParallelGateway,
    /// Spawns a nested instance of another process of the model.
    CallActivity { called_element: String },
    /// Spawns an embedded sub-process.
    SubProcess { process: String },
    /// A timer attached to an activity.
    BoundaryEvent {
        attached_to: String,
        /// Interrupting events cancel the activity they are attached to.
        #[serde(default = "default_true")]
        cancel_activity: bool,
        timer: TimerDefinition,
    },
}

fn default_true() -> bool {
    true
}

impl TaskKind {
    /// Human tasks wait for a user before the graph can proceed.
    pub fn is_human(&self) -> bool {
        matches!(self, TaskKind::UserTask { .. } | TaskKind::ManualTask)
    }

    /// Identifier of the process this node spawns, if any.
    pub fn spawned_process(&self) -> Option<&str> {
        match self {
            TaskKind::CallActivity { called_element } => Some(called_element),
            TaskKind::SubProcess { process } => Some(process),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::StartEvent => "start_event",
            TaskKind::EndEvent => "end_event",
            TaskKind::ScriptTask { .. } => "script_task",
            TaskKind::UserTask { .. } => "user_task",
            TaskKind::ManualTask => "manual_task",
            TaskKind::ExclusiveGateway { .. } => "exclusive_gateway",
            TaskKind::ParallelGateway => "parallel_gateway",
            TaskKind::CallActivity { .. } => "call_activity",
            TaskKind::SubProcess { .. } => "sub_process",
            TaskKind::BoundaryEvent { .. } => "boundary_event",
        }
    }
}

/// Timer configuration of a boundary event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerDefinition {
    /// Seconds after the attached activity becomes active. Zero fires on the next step.
    pub duration_secs: u64,
}

impl TimerDefinition {
    /// Longest accepted duration: one hundred years.
    pub const MAX_DURATION_SECS: u64 = 100 * 365 * 24 * 60 * 60;

    /// Instant the timer fires when armed at `armed_at`, or `None` when it
    /// falls outside the representable date range.
    pub fn deadline(&self, armed_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let secs = i64::try_from(self.duration_secs).ok()?;
        armed_at.checked_add_signed(TimeDelta::try_seconds(secs)?)
    }
}

/// A directed edge between two tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceFlow {
    pub id: String,
    pub source: String,
    pub target: String,
    /// JEXL condition over the source task's data. Unconditional when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

// ---------------------------------------------------------------------------
// Lanes
// ---------------------------------------------------------------------------

/// A swimlane assigning responsibility for its human tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaneDefinition {
    pub name: String,
    #[serde(flatten)]
    pub binding: LaneBinding,
}

/// How the potential owners of a lane are computed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "assignment", rename_all = "snake_case")]
pub enum LaneBinding {
    /// The user who created the instance.
    Initiator,
    /// Members of a directory group at the time the human task is created.
    Group { group: GroupId },
    /// A JEXL expression over the task data yielding a user, a list of
    /// users, or a mapping whose values are users or lists of users.
    Expression { expression: String },
}
