//! Execution engine: step-wise driver of one process graph.
//!
//! The engine is synchronous and single-threaded per instance. Each call to
//! `run` repeatedly:
//!
//! 1. Refreshes waiting tasks (finished call activities, due boundary timers).
//! 2. Asks the strategy for the next runnable task.
//! 3. Executes it, which may complete it, spawn a nested process, or fail.
//!
//! Human tasks are never executed here; the service completes them through
//! `complete_human_task` and then runs the engine again. After the loop the
//! engine refreshes one-hop predictions for every active task.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tasklane_types::definition::{
    ProcessDefinition, ProcessModel, SequenceFlow, TaskDefinition, TaskKind,
};
use tasklane_types::task::TaskState;
use thiserror::Error;
use uuid::Uuid;

use super::graph::ProcessGraph;
use super::script::{ScriptContext, ScriptEngine, ScriptError};
use super::strategy::{ExecutionStrategy, StepView};

// ---------------------------------------------------------------------------
// Errors and results
// ---------------------------------------------------------------------------

/// Why a task failed.
#[derive(Debug, Clone, Error)]
pub enum FailureCause {
    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error("no outgoing flow of the gateway can be taken")]
    NoFlowTaken,

    #[error("more than {0} tasks executed in a single run")]
    StepLimit(u32),

    #[error("owner assignment failed: {0}")]
    Assignment(String),

    #[error("definition not found: {0}")]
    MissingDefinition(String),

    #[error("task kind cannot be executed by the engine")]
    NotRunnable,

    #[error("timer of boundary event '{boundary}' ({duration_secs}s) is out of range")]
    TimerOutOfRange { boundary: String, duration_secs: u64 },
}

/// An unrecovered task failure. The task is left in the `error` state.
#[derive(Debug, Clone, Error)]
#[error("task '{task_name}' in process '{process_id}' failed: {cause}")]
pub struct ExecutionFailure {
    pub task_id: Uuid,
    pub task_name: String,
    pub process_id: String,
    pub cause: FailureCause,
}

#[derive(Debug, Clone)]
pub struct ExecutedTask {
    pub id: Uuid,
    pub name: String,
}

/// Result of one `run`.
#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    /// Tasks executed, in order.
    pub executed: Vec<ExecutedTask>,
    /// The root process reached an end event and nothing is active.
    pub finished: bool,
    /// Runnable tasks left behind when the strategy stopped.
    pub runnable_remaining: usize,
}

// ---------------------------------------------------------------------------
// Graph queries
// ---------------------------------------------------------------------------

/// Create the root start event of a fresh graph in the `future` state.
pub fn seed_start_event(graph: &mut ProcessGraph, model: &ProcessModel) -> Option<Uuid> {
    let start = model.primary()?.start_event()?;
    let root = graph.root().id;
    Some(graph.add_task(root, &start.id, None, TaskState::Future, Map::new()))
}

/// Ready tasks the engine can execute, in ordering-key order.
pub fn runnable_tasks(graph: &ProcessGraph, model: &ProcessModel) -> Vec<Uuid> {
    graph
        .tasks_by_sequence()
        .into_iter()
        .filter(|t| t.state == TaskState::Ready)
        .filter(|t| {
            graph.definition_of(model, t.id).is_some_and(|(_, def)| {
                !def.kind.is_human() && !matches!(def.kind, TaskKind::BoundaryEvent { .. })
            })
        })
        .map(|t| t.id)
        .collect()
}

/// Ready tasks awaiting a human, in ordering-key order.
pub fn ready_human_tasks(graph: &ProcessGraph, model: &ProcessModel) -> Vec<Uuid> {
    graph
        .tasks_by_sequence()
        .into_iter()
        .filter(|t| t.state == TaskState::Ready)
        .filter(|t| {
            graph
                .definition_of(model, t.id)
                .is_some_and(|(_, def)| def.kind.is_human())
        })
        .map(|t| t.id)
        .collect()
}

/// A process is finished once it completed an end event and nothing in it
/// is still active or failed.
pub fn process_finished(graph: &ProcessGraph, model: &ProcessModel, process_id: Uuid) -> bool {
    let mut ended = false;
    for task in graph.tasks_in_process(process_id) {
        if task.state.is_active() || task.state == TaskState::Error {
            return false;
        }
        if task.state == TaskState::Completed
            && graph
                .definition_of(model, task.id)
                .is_some_and(|(_, def)| matches!(def.kind, TaskKind::EndEvent))
        {
            ended = true;
        }
    }
    ended
}

/// Data of the most recently completed end event of a process.
fn final_data(graph: &ProcessGraph, model: &ProcessModel, process_id: Uuid) -> Option<Map<String, Value>> {
    graph
        .tasks_in_process(process_id)
        .filter(|t| t.state == TaskState::Completed)
        .filter(|t| {
            graph
                .definition_of(model, t.id)
                .is_some_and(|(_, def)| matches!(def.kind, TaskKind::EndEvent))
        })
        .max_by_key(|t| t.end_sequence)
        .map(|t| t.data.clone())
}

/// Create the waiting boundary events of an activity that just became active.
///
/// Fails without touching the graph when a deadline cannot be represented.
pub(crate) fn attach_boundary_events(
    graph: &mut ProcessGraph,
    process_def: &ProcessDefinition,
    task_id: Uuid,
    now: DateTime<Utc>,
) -> Result<(), FailureCause> {
    let Some(task) = graph.task(task_id) else {
        return Ok(());
    };
    let (process_id, definition_id, data) =
        (task.process_id, task.definition_id.clone(), task.data.clone());

    let mut armed = Vec::new();
    for boundary in process_def.boundary_events(&definition_id) {
        let TaskKind::BoundaryEvent { timer, .. } = &boundary.kind else {
            continue;
        };
        if graph
            .children(task_id)
            .any(|c| c.definition_id == boundary.id && c.state == TaskState::Waiting)
        {
            continue;
        }
        let due_at = timer.deadline(now).ok_or_else(|| FailureCause::TimerOutOfRange {
            boundary: boundary.id.clone(),
            duration_secs: timer.duration_secs,
        })?;
        armed.push((boundary.id.as_str(), due_at));
    }

    for (boundary_id, due_at) in armed {
        let id = graph.add_task(
            process_id,
            boundary_id,
            Some(task_id),
            TaskState::Waiting,
            data.clone(),
        );
        if let Some(event) = graph.task_mut(id) {
            event.due_at = Some(due_at);
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// ExecutionEngine
// ---------------------------------------------------------------------------

pub struct ExecutionEngine {
    scripts: Arc<ScriptEngine>,
    max_steps_per_run: u32,
}

impl ExecutionEngine {
    pub fn new(scripts: Arc<ScriptEngine>, max_steps_per_run: u32) -> Self {
        Self {
            scripts,
            max_steps_per_run,
        }
    }

    pub fn scripts(&self) -> &Arc<ScriptEngine> {
        &self.scripts
    }

    /// Advance the graph until the strategy stops or nothing is runnable.
    pub fn run(
        &self,
        graph: &mut ProcessGraph,
        model: &ProcessModel,
        strategy: &dyn ExecutionStrategy,
        now: DateTime<Utc>,
    ) -> Result<RunOutcome, ExecutionFailure> {
        let human_before: HashSet<Uuid> = ready_human_tasks(graph, model).into_iter().collect();
        let mut outcome = RunOutcome::default();

        let unreached: Vec<Uuid> = graph
            .tasks()
            .filter(|t| t.state == TaskState::Future)
            .map(|t| t.id)
            .collect();
        for id in unreached {
            if let Some(task) = graph.task_mut(id) {
                task.state = TaskState::Ready;
            }
            if let Some((process_def, _)) = graph.definition_of(model, id) {
                if let Err(cause) = attach_boundary_events(graph, process_def, id, now) {
                    return Err(self.abort(graph, id, cause, now));
                }
            }
        }

        loop {
            self.refresh_waiting(graph, model, now)?;

            let runnable = runnable_tasks(graph, model);
            let new_human_tasks = ready_human_tasks(graph, model)
                .iter()
                .filter(|id| !human_before.contains(id))
                .count();
            let view = StepView {
                runnable: &runnable,
                new_human_tasks,
                executed: outcome.executed.len(),
            };
            let Some(task_id) = strategy.next_task(&view) else {
                outcome.runnable_remaining = runnable.len();
                break;
            };

            if outcome.executed.len() as u32 >= self.max_steps_per_run {
                let cause = FailureCause::StepLimit(self.max_steps_per_run);
                return Err(self.abort(graph, task_id, cause, now));
            }

            let name = graph
                .task(task_id)
                .map(|t| t.definition_id.clone())
                .unwrap_or_default();
            self.execute(graph, model, task_id, now)?;
            tracing::debug!(
                instance_id = %graph.instance_id(),
                task = %name,
                strategy = %strategy.kind(),
                "task executed"
            );
            outcome.executed.push(ExecutedTask { id: task_id, name });
        }

        self.refresh_predictions(graph, model);
        outcome.finished = process_finished(graph, model, graph.root().id);
        Ok(outcome)
    }

    /// Merge submitted data into a ready human task and complete it.
    pub fn complete_human_task(
        &self,
        graph: &mut ProcessGraph,
        model: &ProcessModel,
        task_id: Uuid,
        submitted: Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Result<(), ExecutionFailure> {
        if let Some(task) = graph.task_mut(task_id) {
            task.data.extend(submitted);
            task.started_at.get_or_insert(now);
            task.state = TaskState::Started;
        }
        self.complete(graph, model, task_id, now)
    }

    /// Complete a ready or failed task by hand, either running it (`execute`)
    /// or skipping its work.
    pub fn manual_complete(
        &self,
        graph: &mut ProcessGraph,
        model: &ProcessModel,
        task_id: Uuid,
        execute: bool,
        now: DateTime<Utc>,
    ) -> Result<(), ExecutionFailure> {
        let Some((_, def)) = graph.definition_of(model, task_id) else {
            return Err(self.failure(
                graph,
                task_id,
                FailureCause::MissingDefinition(task_id.to_string()),
            ));
        };
        if let Some(task) = graph.task_mut(task_id) {
            task.state = TaskState::Ready;
            task.end_sequence = None;
            task.ended_at = None;
        }

        let has_scope = graph.process(task_id).is_some();
        let runnable = !def.kind.is_human() && !matches!(def.kind, TaskKind::BoundaryEvent { .. });
        if execute && runnable && !has_scope {
            return self.execute(graph, model, task_id, now);
        }

        if has_scope {
            self.cancel_scope(graph, model, task_id, now);
        }
        if let Some(task) = graph.task_mut(task_id) {
            task.state = TaskState::Started;
            task.started_at.get_or_insert(now);
        }
        self.complete(graph, model, task_id, now)
    }

    /// Cancel every active task of the instance and drop all predictions.
    pub fn cancel_all(&self, graph: &mut ProcessGraph, model: &ProcessModel, now: DateTime<Utc>) {
        let root = graph.root().id;
        self.cancel_scope(graph, model, root, now);
        let predicted: HashSet<Uuid> = graph
            .tasks()
            .filter(|t| t.state.is_predicted())
            .map(|t| t.id)
            .collect();
        graph.remove_tasks(&predicted);
    }

    // -----------------------------------------------------------------------
    // Stepping
    // -----------------------------------------------------------------------

    fn execute(
        &self,
        graph: &mut ProcessGraph,
        model: &ProcessModel,
        task_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), ExecutionFailure> {
        let Some((process_def, task_def)) = graph.definition_of(model, task_id) else {
            return Err(self.failure(
                graph,
                task_id,
                FailureCause::MissingDefinition(task_id.to_string()),
            ));
        };
        if let Some(task) = graph.task_mut(task_id) {
            task.state = TaskState::Started;
            task.started_at.get_or_insert(now);
        }

        match &task_def.kind {
            TaskKind::ScriptTask { script } => {
                let ctx = self.context(graph, model, process_def, task_def);
                let mut scope = graph
                    .task(task_id)
                    .map(|t| t.data.clone())
                    .unwrap_or_default();
                let result = self.scripts.execute(script, &mut scope, &ctx);
                if let Some(task) = graph.task_mut(task_id) {
                    task.data = scope;
                }
                if let Err(e) = result {
                    graph.finish_task(task_id, TaskState::Error, now);
                    return Err(self.failure(graph, task_id, e.into()));
                }
                self.complete(graph, model, task_id, now)
            }
            TaskKind::CallActivity {
                called_element: called,
            }
            | TaskKind::SubProcess { process: called } => {
                self.enter_scope(graph, model, task_id, called)
            }
            TaskKind::StartEvent
            | TaskKind::EndEvent
            | TaskKind::ExclusiveGateway { .. }
            | TaskKind::ParallelGateway => self.complete(graph, model, task_id, now),
            TaskKind::UserTask { .. } | TaskKind::ManualTask | TaskKind::BoundaryEvent { .. } => {
                Err(self.failure(graph, task_id, FailureCause::NotRunnable))
            }
        }
    }

    /// Spawn the nested process of a call activity or sub-process and wait on it.
    fn enter_scope(
        &self,
        graph: &mut ProcessGraph,
        model: &ProcessModel,
        task_id: Uuid,
        called: &str,
    ) -> Result<(), ExecutionFailure> {
        let Some(start) = model.process(called).and_then(|p| p.start_event()) else {
            return Err(self.failure(
                graph,
                task_id,
                FailureCause::MissingDefinition(format!("start event of process '{called}'")),
            ));
        };
        let Some((parent_process, data)) = graph.task(task_id).map(|t| (t.process_id, t.data.clone()))
        else {
            return Ok(());
        };

        graph.add_process(task_id, called, parent_process);
        graph.add_task(task_id, &start.id, Some(task_id), TaskState::Ready, data);
        if let Some(task) = graph.task_mut(task_id) {
            task.state = TaskState::Waiting;
        }
        tracing::debug!(
            instance_id = %graph.instance_id(),
            process = called,
            "entered nested process"
        );
        Ok(())
    }

    /// Complete a task, cancel its boundary events and reach its successors.
    fn complete(
        &self,
        graph: &mut ProcessGraph,
        model: &ProcessModel,
        task_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), ExecutionFailure> {
        let Some((process_def, task_def)) = graph.definition_of(model, task_id) else {
            return Err(self.failure(
                graph,
                task_id,
                FailureCause::MissingDefinition(task_id.to_string()),
            ));
        };

        let targets: Vec<String> =
            match self.select_flows(graph, model, process_def, task_def, task_id) {
                Ok(flows) => flows.into_iter().map(|f| f.target.clone()).collect(),
                Err(e) => {
                    graph.finish_task(task_id, TaskState::Error, now);
                    return Err(e);
                }
            };

        graph.finish_task(task_id, TaskState::Completed, now);
        self.cancel_boundary_events(graph, process_def, task_id, now);
        for target in &targets {
            self.reach(graph, process_def, task_id, target, now)?;
        }

        let untaken: HashSet<Uuid> = graph
            .children(task_id)
            .filter(|t| t.state.is_predicted())
            .map(|t| t.id)
            .collect();
        graph.remove_tasks(&untaken);
        Ok(())
    }

    fn select_flows<'m>(
        &self,
        graph: &ProcessGraph,
        model: &ProcessModel,
        process_def: &'m ProcessDefinition,
        task_def: &'m TaskDefinition,
        task_id: Uuid,
    ) -> Result<Vec<&'m SequenceFlow>, ExecutionFailure> {
        let empty = Map::new();
        let data = graph.task(task_id).map_or(&empty, |t| &t.data);
        let ctx = self.context(graph, model, process_def, task_def);
        let holds = |flow: &SequenceFlow| -> Result<bool, ExecutionFailure> {
            match &flow.condition {
                None => Ok(true),
                Some(condition) => self
                    .scripts
                    .evaluate_bool(condition, data, &ctx)
                    .map_err(|e| self.failure(graph, task_id, e.into())),
            }
        };

        let outgoing: Vec<&'m SequenceFlow> = process_def.outgoing(&task_def.id).collect();
        match &task_def.kind {
            TaskKind::ExclusiveGateway { default_flow } => {
                for flow in outgoing
                    .iter()
                    .filter(|f| f.condition.is_some() && default_flow.as_ref() != Some(&f.id))
                {
                    if holds(*flow)? {
                        return Ok(vec![*flow]);
                    }
                }
                let fallback = default_flow
                    .as_ref()
                    .and_then(|d| outgoing.iter().find(|f| &f.id == d))
                    .or_else(|| outgoing.iter().find(|f| f.condition.is_none()));
                match fallback {
                    Some(flow) => Ok(vec![*flow]),
                    None => Err(self.failure(graph, task_id, FailureCause::NoFlowTaken)),
                }
            }
            _ => {
                let mut taken = Vec::new();
                for flow in outgoing {
                    if holds(flow)? {
                        taken.push(flow);
                    }
                }
                Ok(taken)
            }
        }
    }

    /// Make `target` ready after `parent_id` completed, promoting a matching
    /// prediction when one exists.
    fn reach(
        &self,
        graph: &mut ProcessGraph,
        process_def: &ProcessDefinition,
        parent_id: Uuid,
        target: &str,
        now: DateTime<Utc>,
    ) -> Result<(), ExecutionFailure> {
        let Some(parent) = graph.task(parent_id) else {
            return Ok(());
        };
        let process_id = parent.process_id;
        let data = parent.data.clone();

        if process_def.is_join(target) {
            self.arrive_at_join(graph, process_def, process_id, parent_id, target, data);
            return Ok(());
        }

        let predicted = graph
            .children(parent_id)
            .find(|t| {
                t.state.is_predicted() && t.process_id == process_id && t.definition_id == target
            })
            .map(|t| t.id);
        let task_id = match predicted {
            Some(id) => {
                let sequence = graph.next_sequence();
                if let Some(task) = graph.task_mut(id) {
                    task.state = TaskState::Ready;
                    task.sequence = sequence;
                    task.data = data;
                }
                id
            }
            None => graph.add_task(process_id, target, Some(parent_id), TaskState::Ready, data),
        };
        attach_boundary_events(graph, process_def, task_id, now)
            .map_err(|cause| self.abort(graph, task_id, cause, now))
    }

    fn arrive_at_join(
        &self,
        graph: &mut ProcessGraph,
        process_def: &ProcessDefinition,
        process_id: Uuid,
        parent_id: Uuid,
        target: &str,
        data: Map<String, Value>,
    ) {
        let required = process_def.incoming(target).count();
        let Some(process) = graph.process_mut(process_id) else {
            return;
        };
        let arrivals = process
            .snapshot
            .join_arrivals
            .entry(target.to_string())
            .or_default();
        arrivals.push(parent_id);
        let arrived = arrivals.len();

        let waiting = graph
            .tasks_in_process(process_id)
            .find(|t| t.definition_id == target && t.state == TaskState::Waiting)
            .map(|t| t.id);
        let join_id = match waiting {
            Some(id) => {
                if let Some(task) = graph.task_mut(id) {
                    task.data.extend(data);
                }
                id
            }
            None => graph.add_task(process_id, target, Some(parent_id), TaskState::Waiting, data),
        };

        if arrived >= required {
            if let Some(task) = graph.task_mut(join_id) {
                task.state = TaskState::Ready;
            }
            if let Some(process) = graph.process_mut(process_id) {
                process.snapshot.join_arrivals.remove(target);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Waiting tasks: nested processes and timers
    // -----------------------------------------------------------------------

    fn refresh_waiting(
        &self,
        graph: &mut ProcessGraph,
        model: &ProcessModel,
        now: DateTime<Utc>,
    ) -> Result<(), ExecutionFailure> {
        let finished_scopes: Vec<Uuid> = graph
            .tasks_by_sequence()
            .into_iter()
            .filter(|t| t.state == TaskState::Waiting && graph.process(t.id).is_some())
            .filter(|t| process_finished(graph, model, t.id))
            .map(|t| t.id)
            .collect();
        for id in finished_scopes {
            if let Some(data) = final_data(graph, model, id) {
                if let Some(task) = graph.task_mut(id) {
                    task.data = data;
                }
            }
            self.complete(graph, model, id, now)?;
        }

        let due: Vec<Uuid> = graph
            .tasks_by_sequence()
            .into_iter()
            .filter(|t| t.state == TaskState::Waiting && t.due_at.is_some_and(|d| d <= now))
            .map(|t| t.id)
            .collect();
        for id in due {
            // An interrupting timer fired earlier in this pass may have cancelled it.
            if graph.task(id).is_some_and(|t| t.state == TaskState::Waiting) {
                self.fire_timer(graph, model, id, now)?;
            }
        }
        Ok(())
    }

    fn fire_timer(
        &self,
        graph: &mut ProcessGraph,
        model: &ProcessModel,
        boundary_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), ExecutionFailure> {
        let Some((_, def)) = graph.definition_of(model, boundary_id) else {
            return Err(self.failure(
                graph,
                boundary_id,
                FailureCause::MissingDefinition(boundary_id.to_string()),
            ));
        };
        let TaskKind::BoundaryEvent {
            cancel_activity, ..
        } = &def.kind
        else {
            return Err(self.failure(graph, boundary_id, FailureCause::NotRunnable));
        };
        let attached = graph.task(boundary_id).and_then(|t| t.parent_id);

        tracing::info!(
            instance_id = %graph.instance_id(),
            timer = %def.id,
            interrupting = *cancel_activity,
            "boundary timer fired"
        );
        self.complete(graph, model, boundary_id, now)?;
        if *cancel_activity {
            if let Some(activity) = attached {
                self.cancel_task(graph, model, activity, now);
            }
        }
        Ok(())
    }

    fn cancel_boundary_events(
        &self,
        graph: &mut ProcessGraph,
        process_def: &ProcessDefinition,
        task_id: Uuid,
        now: DateTime<Utc>,
    ) {
        let Some(process_id) = graph.task(task_id).map(|t| t.process_id) else {
            return;
        };
        let waiting: Vec<Uuid> = graph
            .children(task_id)
            .filter(|t| t.state == TaskState::Waiting && t.process_id == process_id)
            .filter(|t| {
                process_def
                    .task(&t.definition_id)
                    .is_some_and(|d| matches!(d.kind, TaskKind::BoundaryEvent { .. }))
            })
            .map(|t| t.id)
            .collect();
        for id in waiting {
            graph.finish_task(id, TaskState::Cancelled, now);
        }
    }

    /// Cancel an active task together with its boundary events and nested scope.
    fn cancel_task(
        &self,
        graph: &mut ProcessGraph,
        model: &ProcessModel,
        task_id: Uuid,
        now: DateTime<Utc>,
    ) {
        if !graph.task(task_id).is_some_and(|t| t.state.is_active()) {
            return;
        }
        if graph.process(task_id).is_some() {
            self.cancel_scope(graph, model, task_id, now);
        }

        let children: Vec<Uuid> = graph
            .children(task_id)
            .filter(|t| t.state.is_active())
            .map(|t| t.id)
            .collect();
        for id in children {
            graph.finish_task(id, TaskState::Cancelled, now);
        }
        graph.finish_task(task_id, TaskState::Cancelled, now);

        let predicted: HashSet<Uuid> = graph
            .children(task_id)
            .filter(|t| t.state.is_predicted())
            .map(|t| t.id)
            .collect();
        graph.remove_tasks(&predicted);
        tracing::debug!(instance_id = %graph.instance_id(), %task_id, "task cancelled");
    }

    /// Cancel every active task inside the process `process_id`.
    fn cancel_scope(
        &self,
        graph: &mut ProcessGraph,
        model: &ProcessModel,
        process_id: Uuid,
        now: DateTime<Utc>,
    ) {
        let inner: Vec<Uuid> = graph
            .tasks_in_process(process_id)
            .filter(|t| t.state.is_active())
            .map(|t| t.id)
            .collect();
        for id in inner {
            self.cancel_task(graph, model, id, now);
        }
    }

    // -----------------------------------------------------------------------
    // Predictions
    // -----------------------------------------------------------------------

    /// Keep exactly one hop of predictions below every active task.
    fn refresh_predictions(&self, graph: &mut ProcessGraph, model: &ProcessModel) {
        let stale: HashSet<Uuid> = graph
            .tasks()
            .filter(|t| t.state.is_predicted())
            .filter(|t| {
                !t.parent_id
                    .and_then(|p| graph.task(p))
                    .is_some_and(|p| p.state.is_active())
            })
            .map(|t| t.id)
            .collect();
        graph.remove_tasks(&stale);

        let active: Vec<Uuid> = graph
            .tasks_by_sequence()
            .into_iter()
            .filter(|t| matches!(t.state, TaskState::Ready | TaskState::Waiting))
            .filter(|t| !graph.children(t.id).any(|c| c.state.is_predicted()))
            .map(|t| t.id)
            .collect();

        for id in active {
            let Some((process_def, def)) = graph.definition_of(model, id) else {
                continue;
            };
            if matches!(def.kind, TaskKind::BoundaryEvent { .. }) {
                continue;
            }
            let Some(process_id) = graph.task(id).map(|t| t.process_id) else {
                continue;
            };
            let gateway = matches!(def.kind, TaskKind::ExclusiveGateway { .. });
            let predictions: Vec<(String, TaskState)> = process_def
                .outgoing(&def.id)
                .filter(|f| !process_def.is_join(&f.target))
                .map(|f| {
                    let state = if gateway || f.condition.is_some() {
                        TaskState::Maybe
                    } else {
                        TaskState::Likely
                    };
                    (f.target.clone(), state)
                })
                .collect();
            for (target, state) in predictions {
                graph.add_task(process_id, &target, Some(id), state, Map::new());
            }
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn context(
        &self,
        graph: &ProcessGraph,
        model: &ProcessModel,
        process_def: &ProcessDefinition,
        task_def: &TaskDefinition,
    ) -> ScriptContext {
        ScriptContext {
            instance_id: graph.instance_id(),
            model_id: model.id.clone(),
            process_id: process_def.id.clone(),
            task_name: task_def.id.clone(),
        }
    }

    /// Put a task that never ran into `error`.
    fn abort(
        &self,
        graph: &mut ProcessGraph,
        task_id: Uuid,
        cause: FailureCause,
        now: DateTime<Utc>,
    ) -> ExecutionFailure {
        if let Some(task) = graph.task_mut(task_id) {
            task.state = TaskState::Started;
        }
        graph.finish_task(task_id, TaskState::Error, now);
        self.failure(graph, task_id, cause)
    }

    fn failure(&self, graph: &ProcessGraph, task_id: Uuid, cause: FailureCause) -> ExecutionFailure {
        let task = graph.task(task_id);
        ExecutionFailure {
            task_id,
            task_name: task.map(|t| t.definition_id.clone()).unwrap_or_default(),
            process_id: task
                .and_then(|t| graph.process(t.process_id))
                .map(|p| p.definition_id.clone())
                .unwrap_or_default(),
            cause,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
