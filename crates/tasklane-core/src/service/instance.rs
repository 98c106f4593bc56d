//! Process instance service.
//!
//! The facade the CLI and embedders drive instances through. Every operation
//! works on a `LoadedInstance` working copy obtained from `create_instance`
//! or `load`. Status transitions, human task completion and resets are saved
//! before they return; `run_steps` saves only when asked to.
//!
//! Mutating operations on the same instance are serialized with a
//! per-instance lock.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::{Map, Value};
use tasklane_types::config::EngineConfig;
use tasklane_types::event::{
    EngineEvent, ErrorDetail, ProcessInstanceEvent, ProcessInstanceEventType,
};
use tasklane_types::human_task::HumanTask;
use tasklane_types::identity::UserId;
use tasklane_types::instance::{ProcessInstance, ProcessInstanceStatus, StrategyKind};
use tasklane_types::task::{Task, TaskState};
use tokio::sync::{Mutex, OwnedMutexGuard, broadcast};
use uuid::Uuid;

use crate::engine::assignment::{AssignmentError, HumanTaskResolver};
use crate::engine::executor::{ExecutionEngine, ExecutionFailure, FailureCause, ready_human_tasks};
use crate::engine::persistence::{InstanceStore, LoadedInstance, SaveReport};
use crate::engine::recorder::EventRecorder;
use crate::engine::reset::{self, ResetPlan};
use crate::engine::script::{ScriptContext, ScriptEngine};
use crate::engine::strategy::strategy_for;
use crate::error::{EngineError, UsageError};
use crate::event::bus::{EventBus, InstanceEvents};
use crate::repository::SortOrder;
use crate::repository::directory::Directory;
use crate::repository::instance::ProcessInstanceRepository;
use crate::repository::model::ProcessModelStore;

/// What a run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub status: ProcessInstanceStatus,
    /// Symbolic names of the tasks executed, in order.
    pub executed: Vec<String>,
    /// Human tasks created for tasks that became ready.
    pub human_tasks_created: usize,
    /// Rows written. Zero when the run was not saved or changed nothing.
    pub rows_saved: usize,
}

/// Exclusive access to one instance. The map entry goes away with the last
/// holder so the lock table only tracks instances in use.
struct InstanceLock<'a> {
    locks: &'a DashMap<Uuid, Arc<Mutex<()>>>,
    instance_id: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for InstanceLock<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks
            .remove_if(&self.instance_id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

/// Service orchestrating process instances.
///
/// Generic over the repository ports so tasklane-core never depends on
/// tasklane-infra.
pub struct ProcessInstanceService<R, M, D>
where
    R: ProcessInstanceRepository,
    M: ProcessModelStore,
    D: Directory,
{
    store: InstanceStore<R>,
    models: M,
    resolver: HumanTaskResolver<D>,
    engine: ExecutionEngine,
    event_bus: EventBus,
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
    config: EngineConfig,
}

impl<R, M, D> ProcessInstanceService<R, M, D>
where
    R: ProcessInstanceRepository,
    M: ProcessModelStore,
    D: Directory,
{
    pub fn new(repo: R, models: M, directory: D, config: EngineConfig) -> Self {
        let scripts = Arc::new(ScriptEngine::new());
        Self {
            store: InstanceStore::new(repo),
            models,
            resolver: HumanTaskResolver::new(directory, Arc::clone(&scripts)),
            engine: ExecutionEngine::new(scripts, config.max_steps_per_run),
            event_bus: EventBus::new(config.event_bus_capacity),
            locks: DashMap::new(),
            config,
        }
    }

    pub fn repo(&self) -> &R {
        self.store.repo()
    }

    pub fn models(&self) -> &M {
        &self.models
    }

    pub fn directory(&self) -> &D {
        self.resolver.directory()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Subscribe to engine notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.event_bus.subscribe()
    }

    /// Subscribe to the notifications of one instance.
    pub fn follow(&self, instance_id: Uuid) -> InstanceEvents {
        self.event_bus.follow(instance_id)
    }

    fn recorder(&self) -> EventRecorder<'_, R> {
        EventRecorder::new(self.store.repo())
    }

    async fn lock(&self, instance_id: Uuid) -> InstanceLock<'_> {
        let mutex = Arc::clone(self.locks.entry(instance_id).or_default().value());
        InstanceLock {
            locks: &self.locks,
            instance_id,
            guard: Some(mutex.lock_owned().await),
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Create an instance of the latest version of a model, owned by `owner`.
    ///
    /// The instance is persisted in the `not_started` status with its root
    /// start event; nothing runs until `run_steps`.
    pub async fn create_instance(
        &self,
        model_id: &str,
        owner: &UserId,
    ) -> Result<LoadedInstance, EngineError> {
        if self.directory().find_user(owner).await?.is_none() {
            return Err(UsageError::UnknownUser(owner.clone()).into());
        }
        let model = self
            .models
            .get_model(model_id, None)
            .await?
            .ok_or_else(|| UsageError::ModelNotFound(model_id.to_string()))?;
        Ok(self.store.create(model, owner.clone(), Utc::now()).await?)
    }

    /// Hydrate an instance from storage.
    pub async fn load(&self, instance_id: Uuid) -> Result<LoadedInstance, EngineError> {
        Ok(self.store.hydrate(instance_id, &self.models).await?)
    }

    pub async fn list_instances(
        &self,
        limit: Option<i64>,
        order: SortOrder,
    ) -> Result<Vec<ProcessInstance>, EngineError> {
        Ok(self.store.repo().list_instances(limit, order).await?)
    }

    /// Write pending changes of a working copy.
    pub async fn save(&self, loaded: &mut LoadedInstance) -> Result<SaveReport, EngineError> {
        let _lock = self.lock(loaded.id()).await;
        Ok(self.store.save(loaded).await?)
    }

    /// Advance the instance with `strategy` (the configured default when
    /// `None`), then save if `save` is set.
    ///
    /// A task failure puts the instance into the `error` status, records the
    /// failure in the event log and is returned as `EngineError::Execution`.
    pub async fn run_steps(
        &self,
        loaded: &mut LoadedInstance,
        strategy: Option<StrategyKind>,
        save: bool,
    ) -> Result<RunReport, EngineError> {
        let _lock = self.lock(loaded.id()).await;
        let kind = strategy.unwrap_or(self.config.default_strategy);
        self.drive(loaded, kind, save).await
    }

    pub async fn suspend(
        &self,
        loaded: &mut LoadedInstance,
        user: Option<&UserId>,
    ) -> Result<(), EngineError> {
        let _lock = self.lock(loaded.id()).await;

        let status = loaded.instance.status;
        if status.is_final() || status == ProcessInstanceStatus::Suspended {
            return Err(UsageError::InvalidTransition {
                from: status,
                to: ProcessInstanceStatus::Suspended,
            }
            .into());
        }
        let now = Utc::now();
        loaded.instance.status = ProcessInstanceStatus::Suspended;
        loaded.instance.updated_at = now;
        self.store.save(loaded).await?;
        self.recorder()
            .record(
                loaded.id(),
                ProcessInstanceEventType::ProcessInstanceSuspended,
                None,
                user,
                now,
            )
            .await?;
        tracing::info!(instance_id = %loaded.id(), "process instance suspended");
        Ok(())
    }

    /// Lift a suspension. The instance waits until the next run.
    pub async fn resume(
        &self,
        loaded: &mut LoadedInstance,
        user: Option<&UserId>,
    ) -> Result<(), EngineError> {
        let _lock = self.lock(loaded.id()).await;

        let status = loaded.instance.status;
        if status != ProcessInstanceStatus::Suspended {
            return Err(UsageError::InvalidTransition {
                from: status,
                to: ProcessInstanceStatus::Waiting,
            }
            .into());
        }
        let now = Utc::now();
        loaded.instance.status = if has_failed_tasks(loaded) {
            ProcessInstanceStatus::Error
        } else {
            ProcessInstanceStatus::Waiting
        };
        loaded.instance.updated_at = now;
        self.store.save(loaded).await?;
        self.recorder()
            .record(
                loaded.id(),
                ProcessInstanceEventType::ProcessInstanceResumed,
                None,
                user,
                now,
            )
            .await?;
        tracing::info!(instance_id = %loaded.id(), status = %loaded.instance.status, "process instance resumed");
        Ok(())
    }

    /// Cancel every active task and end the instance.
    pub async fn terminate(
        &self,
        loaded: &mut LoadedInstance,
        user: Option<&UserId>,
    ) -> Result<(), EngineError> {
        let _lock = self.lock(loaded.id()).await;

        let status = loaded.instance.status;
        if status.is_final() {
            return Err(UsageError::InvalidTransition {
                from: status,
                to: ProcessInstanceStatus::Terminated,
            }
            .into());
        }
        let now = Utc::now();
        let model = Arc::clone(&loaded.model);
        self.engine.cancel_all(&mut loaded.graph, &model, now);
        loaded.instance.status = ProcessInstanceStatus::Terminated;
        loaded.instance.ended_at = Some(now);
        loaded.instance.updated_at = now;
        self.store.save(loaded).await?;
        self.recorder()
            .record(
                loaded.id(),
                ProcessInstanceEventType::ProcessInstanceTerminated,
                None,
                user,
                now,
            )
            .await?;
        tracing::info!(instance_id = %loaded.id(), "process instance terminated");
        Ok(())
    }

    /// Rewind the instance so `target` becomes the next task to run.
    ///
    /// Everything that happened after the target is discarded, including
    /// the human tasks of removed tasks and the event log entries of removed
    /// and reopened tasks. The result is saved before returning.
    pub async fn reset(
        &self,
        loaded: &mut LoadedInstance,
        target: Uuid,
        user: Option<&UserId>,
    ) -> Result<ResetPlan, EngineError> {
        let _lock = self.lock(loaded.id()).await;

        let now = Utc::now();
        let plan = reset::reset(loaded, target, now)?;
        self.store.save(loaded).await?;
        self.recorder()
            .record(
                loaded.id(),
                ProcessInstanceEventType::ProcessInstanceRewoundToTask,
                Some(target),
                user,
                now,
            )
            .await?;
        self.event_bus.publish(EngineEvent::InstanceReset {
            instance_id: loaded.id(),
            target_task_id: target,
            tasks_removed: plan.tasks_removed,
        });
        Ok(plan)
    }

    // -----------------------------------------------------------------------
    // Human work
    // -----------------------------------------------------------------------

    /// Complete a ready human task on behalf of `user`, then continue the
    /// instance with the default strategy and save.
    ///
    /// Users who are neither potential owners nor administrators get
    /// `AccessDenied` and the instance is left untouched.
    pub async fn complete_human_task(
        &self,
        loaded: &mut LoadedInstance,
        task_id: Uuid,
        data: Map<String, Value>,
        user: &UserId,
    ) -> Result<RunReport, EngineError> {
        let _lock = self.lock(loaded.id()).await;

        ensure_runnable(&loaded.instance)?;
        let human = loaded
            .human_tasks
            .for_task(task_id)
            .filter(|h| !h.completed)
            .ok_or(UsageError::TaskNotAwaitingInput(task_id))?;
        if loaded.graph.task(task_id).map(|t| t.state) != Some(TaskState::Ready) {
            return Err(UsageError::TaskNotAwaitingInput(task_id).into());
        }
        if !self.resolver.can_complete(human, user).await? {
            tracing::warn!(
                instance_id = %loaded.id(),
                task = %human.task_name,
                user = %user,
                "human task completion denied"
            );
            return Err(EngineError::AccessDenied {
                user: user.clone(),
                task_name: human.task_name.clone(),
            });
        }
        let task_name = human.task_name.clone();

        let now = Utc::now();
        let model = Arc::clone(&loaded.model);
        if let Err(failure) =
            self.engine
                .complete_human_task(&mut loaded.graph, &model, task_id, data, now)
        {
            return Err(self.fail(loaded, failure, true, now).await);
        }
        if let Some(human) = loaded.human_tasks.for_task_mut(task_id) {
            human.completed = true;
            human.completed_by = Some(user.clone());
            human.completed_at = Some(now);
        }
        self.recorder()
            .record(
                loaded.id(),
                ProcessInstanceEventType::TaskCompleted,
                Some(task_id),
                Some(user),
                now,
            )
            .await?;
        self.event_bus.publish(EngineEvent::TaskCompleted {
            instance_id: loaded.id(),
            task_id,
            task_name: task_name.clone(),
        });
        tracing::info!(instance_id = %loaded.id(), task = %task_name, user = %user, "human task completed");

        self.drive(loaded, self.config.default_strategy, true).await
    }

    /// Complete a ready or failed task by hand. With `execute` the task's
    /// work runs; otherwise it is skipped. Administrators only.
    pub async fn manual_complete_task(
        &self,
        loaded: &mut LoadedInstance,
        task_id: Uuid,
        execute: bool,
        user: &UserId,
    ) -> Result<RunReport, EngineError> {
        let _lock = self.lock(loaded.id()).await;

        ensure_runnable(&loaded.instance)?;
        let task = loaded
            .graph
            .task(task_id)
            .filter(|t| !t.state.is_predicted())
            .ok_or(UsageError::UnknownTask(task_id))?;
        if !matches!(task.state, TaskState::Ready | TaskState::Error) {
            return Err(UsageError::TaskNotAwaitingInput(task_id).into());
        }
        let task_name = task.definition_id.clone();
        let is_admin = self
            .directory()
            .find_user(user)
            .await?
            .is_some_and(|u| u.is_admin);
        if !is_admin {
            return Err(EngineError::AccessDenied {
                user: user.clone(),
                task_name,
            });
        }

        let now = Utc::now();
        let model = Arc::clone(&loaded.model);
        if let Err(failure) =
            self.engine
                .manual_complete(&mut loaded.graph, &model, task_id, execute, now)
        {
            return Err(self.fail(loaded, failure, true, now).await);
        }
        if let Some(human) = loaded.human_tasks.for_task_mut(task_id) {
            if !human.completed {
                human.completed = true;
                human.completed_by = Some(user.clone());
                human.completed_at = Some(now);
            }
        }
        let event_type = if execute {
            ProcessInstanceEventType::TaskExecutedManually
        } else {
            ProcessInstanceEventType::TaskSkipped
        };
        self.recorder()
            .record(loaded.id(), event_type, Some(task_id), Some(user), now)
            .await?;
        tracing::info!(instance_id = %loaded.id(), task = %task_name, execute, "task completed manually");

        self.drive(loaded, self.config.default_strategy, true).await
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Latest non-predicted occurrence of a task, by symbolic name.
    pub fn get_task_by_symbolic_name<'a>(
        &self,
        loaded: &'a LoadedInstance,
        name: &str,
    ) -> Option<&'a Task> {
        latest_occurrence(loaded, name, None)
    }

    /// Like `get_task_by_symbolic_name`, restricted to one process definition.
    pub fn get_task_by_symbolic_name_in_process<'a>(
        &self,
        loaded: &'a LoadedInstance,
        process_definition: &str,
        name: &str,
    ) -> Option<&'a Task> {
        latest_occurrence(loaded, name, Some(process_definition))
    }

    pub fn get_task_by_id<'a>(&self, loaded: &'a LoadedInstance, task_id: Uuid) -> Option<&'a Task> {
        loaded.graph.task(task_id)
    }

    /// Ready and waiting tasks in ordering-key order. Predictions are never
    /// included.
    pub fn list_ready_or_waiting_tasks<'a>(&self, loaded: &'a LoadedInstance) -> Vec<&'a Task> {
        loaded
            .graph
            .tasks_by_sequence()
            .into_iter()
            .filter(|t| matches!(t.state, TaskState::Ready | TaskState::Waiting))
            .collect()
    }

    /// Human tasks that can be completed right now.
    pub fn active_human_tasks<'a>(&self, loaded: &'a LoadedInstance) -> Vec<&'a HumanTask> {
        loaded
            .human_tasks
            .iter()
            .filter(|h| !h.completed)
            .filter(|h| {
                loaded
                    .graph
                    .task(h.task_id)
                    .is_some_and(|t| t.state == TaskState::Ready)
            })
            .collect()
    }

    pub fn human_tasks<'a>(&self, loaded: &'a LoadedInstance) -> Vec<&'a HumanTask> {
        loaded.human_tasks.iter().collect()
    }

    /// Data of every completed task, merged in completion order.
    pub fn get_merged_data(&self, loaded: &LoadedInstance) -> Map<String, Value> {
        let mut completed: Vec<&Task> = loaded
            .graph
            .tasks()
            .filter(|t| t.state == TaskState::Completed)
            .collect();
        completed.sort_by_key(|t| (t.end_sequence, t.sequence));

        let mut merged = Map::new();
        for task in completed {
            merged.extend(task.data.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        merged
    }

    pub async fn list_events(
        &self,
        instance_id: Uuid,
    ) -> Result<Vec<ProcessInstanceEvent>, EngineError> {
        Ok(self.store.repo().list_events(&instance_id).await?)
    }

    pub async fn list_error_details(&self, instance_id: Uuid) -> Result<Vec<ErrorDetail>, EngineError> {
        Ok(self.store.repo().list_error_details(&instance_id).await?)
    }

    // -----------------------------------------------------------------------
    // Driving
    // -----------------------------------------------------------------------

    /// Run the engine, assign new human tasks and settle the status.
    /// Callers hold the instance lock.
    async fn drive(
        &self,
        loaded: &mut LoadedInstance,
        kind: StrategyKind,
        save: bool,
    ) -> Result<RunReport, EngineError> {
        ensure_runnable(&loaded.instance)?;
        let instance_id = loaded.id();
        let now = Utc::now();
        if loaded.instance.status == ProcessInstanceStatus::NotStarted {
            loaded.instance.status = ProcessInstanceStatus::Running;
            loaded.instance.started_at = Some(now);
        }
        self.event_bus.publish(EngineEvent::RunStarted {
            instance_id,
            strategy: kind,
        });

        let model = Arc::clone(&loaded.model);
        let strategy = strategy_for(kind);
        let run = self
            .engine
            .run(&mut loaded.graph, &model, strategy.as_ref(), now);
        let synced = self.sync_human_tasks(loaded, now).await;

        let (outcome, human_tasks_created) = match (run, synced) {
            (Ok(outcome), Ok(created)) => (outcome, created),
            (Err(failure), synced) => {
                if let Err(e) = synced {
                    tracing::warn!(%instance_id, error = %e, "human task sync failed after a task failure");
                }
                return Err(self.fail(loaded, failure, save, now).await);
            }
            (Ok(_), Err(EngineError::Execution(failure))) => {
                return Err(self.fail(loaded, failure, save, now).await);
            }
            (Ok(_), Err(other)) => return Err(other),
        };

        let status = if outcome.finished {
            let predicted = loaded.graph.predicted_count();
            if predicted > 0 {
                return Err(EngineError::Invariant(format!(
                    "instance {instance_id} completed with {predicted} predicted tasks"
                )));
            }
            ProcessInstanceStatus::Complete
        } else if has_failed_tasks(loaded) {
            ProcessInstanceStatus::Error
        } else if outcome.runnable_remaining > 0 {
            ProcessInstanceStatus::Running
        } else {
            ProcessInstanceStatus::Waiting
        };
        loaded.instance.status = status;
        loaded.instance.updated_at = now;
        if status == ProcessInstanceStatus::Complete {
            loaded.instance.ended_at = Some(now);
        }

        let rows_saved = if save {
            self.store.save(loaded).await?.rows
        } else {
            0
        };
        if status == ProcessInstanceStatus::Complete {
            self.recorder()
                .record(
                    instance_id,
                    ProcessInstanceEventType::ProcessInstanceCompleted,
                    None,
                    None,
                    now,
                )
                .await?;
            tracing::info!(%instance_id, "process instance complete");
        }

        for task in &outcome.executed {
            self.event_bus.publish(EngineEvent::TaskCompleted {
                instance_id,
                task_id: task.id,
                task_name: task.name.clone(),
            });
        }
        self.event_bus.publish(EngineEvent::RunFinished {
            instance_id,
            status,
            tasks_executed: outcome.executed.len(),
        });
        tracing::debug!(
            %instance_id,
            strategy = %kind,
            executed = outcome.executed.len(),
            %status,
            "run finished"
        );

        Ok(RunReport {
            status,
            executed: outcome.executed.into_iter().map(|t| t.name).collect(),
            human_tasks_created,
            rows_saved,
        })
    }

    /// Create human task rows for ready human tasks that have none.
    ///
    /// A lane that cannot be resolved fails the task like a script would.
    async fn sync_human_tasks(
        &self,
        loaded: &mut LoadedInstance,
        now: DateTime<Utc>,
    ) -> Result<usize, EngineError> {
        let model = Arc::clone(&loaded.model);
        let instance_id = loaded.id();
        let mut created = 0;

        for task_id in ready_human_tasks(&loaded.graph, &model) {
            if loaded.human_tasks.for_task(task_id).is_some() {
                continue;
            }
            let Some((process_def, task_def)) = loaded.graph.definition_of(&model, task_id) else {
                return Err(EngineError::Invariant(format!(
                    "task {task_id} has no definition in model '{}'",
                    model.id
                )));
            };
            let data = loaded
                .graph
                .task(task_id)
                .map(|t| t.data.clone())
                .unwrap_or_default();
            let ctx = ScriptContext {
                instance_id,
                model_id: model.id.clone(),
                process_id: process_def.id.clone(),
                task_name: task_def.id.clone(),
            };

            let assignment = match self
                .resolver
                .resolve(process_def, task_def, &data, &loaded.instance.owner, &ctx)
                .await
            {
                Ok(assignment) => assignment,
                Err(AssignmentError::Directory(e)) => return Err(e.into()),
                Err(e) => {
                    let cause = match e {
                        AssignmentError::Expression(script) => FailureCause::Script(script),
                        other => FailureCause::Assignment(other.to_string()),
                    };
                    if let Some(task) = loaded.graph.task_mut(task_id) {
                        task.state = TaskState::Started;
                    }
                    loaded.graph.finish_task(task_id, TaskState::Error, now);
                    return Err(ExecutionFailure {
                        task_id,
                        task_name: task_def.id.clone(),
                        process_id: process_def.id.clone(),
                        cause,
                    }
                    .into());
                }
            };

            self.event_bus.publish(EngineEvent::HumanTaskCreated {
                instance_id,
                task_id,
                task_name: task_def.id.clone(),
                potential_owners: assignment.owners.clone(),
            });
            loaded.human_tasks.insert(HumanTask {
                id: Uuid::now_v7(),
                instance_id,
                task_id,
                task_name: task_def.id.clone(),
                task_title: task_def.title().to_string(),
                lane_assignment: assignment.lane_group,
                potential_owners: assignment.owners,
                completed: false,
                completed_by: None,
                created_at: now,
                completed_at: None,
            });
            created += 1;
        }
        Ok(created)
    }

    /// Put the instance into the `error` status, log the failure and hand it
    /// back as an error.
    async fn fail(
        &self,
        loaded: &mut LoadedInstance,
        failure: ExecutionFailure,
        save: bool,
        now: DateTime<Utc>,
    ) -> EngineError {
        loaded.instance.status = ProcessInstanceStatus::Error;
        loaded.instance.updated_at = now;
        if save {
            if let Err(e) = self.store.save(loaded).await {
                return e.into();
            }
        }
        if let Err(e) = self.recorder().record_failure(loaded.id(), &failure, now).await {
            return e.into();
        }
        self.event_bus.publish(EngineEvent::TaskFailed {
            instance_id: loaded.id(),
            task_id: failure.task_id,
            task_name: failure.task_name.clone(),
            error: failure.cause.to_string(),
        });
        EngineError::Execution(failure)
    }
}

fn ensure_runnable(instance: &ProcessInstance) -> Result<(), UsageError> {
    match instance.status {
        ProcessInstanceStatus::Suspended => Err(UsageError::InstanceSuspended(instance.id)),
        status if status.is_final() => Err(UsageError::InstanceFinished(instance.id, status)),
        _ => Ok(()),
    }
}

fn has_failed_tasks(loaded: &LoadedInstance) -> bool {
    loaded.graph.tasks().any(|t| t.state == TaskState::Error)
}

fn latest_occurrence<'a>(
    loaded: &'a LoadedInstance,
    name: &str,
    process_definition: Option<&str>,
) -> Option<&'a Task> {
    loaded
        .graph
        .tasks_by_sequence()
        .into_iter()
        .rev()
        .filter(|t| t.definition_id == name && !t.state.is_predicted())
        .find(|t| {
            process_definition.is_none_or(|def| {
                loaded
                    .graph
                    .process(t.process_id)
                    .is_some_and(|p| p.definition_id == def)
            })
        })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
