//! Rewind an instance to the moment before one of its tasks ran.
//!
//! The reset point is the ordering key of the target task. Rewinding:
//!
//! 1. Drops every prediction.
//! 2. Deletes tasks ordered after the point, nested processes entered by a
//!    deleted task or by the target, and the human tasks of everything deleted.
//! 3. Reopens retained tasks that finished after the point. Activities waiting
//!    on a nested process, boundary events and joins go back to `waiting`
//!    (timers restart from now); everything else becomes `ready`.
//! 4. Makes the target ready again with its parent's data.
//! 5. Re-seeds successors of retained completed tasks that were deleted only
//!    because they were ordered after the target, such as the other branch of
//!    a parallel split.
//! 6. Rebuilds join arrivals from what is left.
//!
//! The event log loses the entries of deleted and reopened tasks at the next
//! save. Instance-level entries such as completion stay.
//!
//! Step 3 is what reopens boundary-guarded ancestor scopes: a call activity
//! that completed after the point waits on its nested process again, and its
//! timer is re-armed, so the instance never blocks on a scope that already
//! closed.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Map;
use tasklane_types::definition::{ProcessModel, TaskKind};
use tasklane_types::instance::ProcessInstanceStatus;
use tasklane_types::task::TaskState;
use thiserror::Error;
use uuid::Uuid;

use super::executor::{FailureCause, attach_boundary_events};
use super::graph::ProcessGraph;
use super::persistence::LoadedInstance;

#[derive(Debug, Error)]
pub enum ResetError {
    #[error("task {0} is not part of the instance history")]
    UnknownTask(Uuid),

    #[error("cannot re-arm timers: {0}")]
    Timer(FailureCause),
}

/// Summary of a reset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetPlan {
    pub target_task_id: Uuid,
    /// Ordering key of the target.
    pub reset_point: i64,
    pub tasks_removed: usize,
    pub processes_removed: usize,
    pub tasks_reopened: usize,
    pub tasks_reseeded: usize,
    pub human_tasks_removed: usize,
}

pub fn reset(
    loaded: &mut LoadedInstance,
    target: Uuid,
    now: DateTime<Utc>,
) -> Result<ResetPlan, ResetError> {
    let point = match loaded.graph.task(target) {
        Some(task) if !task.state.is_predicted() => task.sequence,
        _ => return Err(ResetError::UnknownTask(target)),
    };
    check_timers(&loaded.model, now)?;
    let model = Arc::clone(&loaded.model);
    let graph = &mut loaded.graph;

    let predicted: HashSet<Uuid> = graph
        .tasks()
        .filter(|t| t.state.is_predicted())
        .map(|t| t.id)
        .collect();
    graph.remove_tasks(&predicted);

    let mut scope_owners: HashSet<Uuid> = graph
        .tasks()
        .filter(|t| t.sequence > point)
        .map(|t| t.id)
        .collect();
    scope_owners.insert(target);
    let scopes: HashSet<Uuid> = graph
        .processes()
        .filter(|p| {
            graph
                .process_path(p.id)
                .iter()
                .any(|ancestor| scope_owners.contains(&ancestor.id))
        })
        .map(|p| p.id)
        .collect();

    let doomed: HashSet<Uuid> = graph
        .tasks()
        .filter(|t| t.id != target && (t.sequence > point || scopes.contains(&t.process_id)))
        .map(|t| t.id)
        .collect();

    let reseed = successors_to_reseed(graph, &doomed, &scopes, target, point);

    let human_tasks_removed = loaded.human_tasks.remove_for_tasks(&doomed);
    graph.remove_tasks(&doomed);
    graph.remove_processes(&scopes);

    let reopened: Vec<Uuid> = graph
        .tasks_by_sequence()
        .into_iter()
        .filter(|t| t.id != target && t.end_sequence.is_some_and(|end| end > point))
        .map(|t| t.id)
        .collect();
    for id in reopened.iter().copied().chain([target]) {
        reopen(graph, &model, id, now);
        let completed = loaded.human_tasks.for_task(id).is_some_and(|h| h.completed);
        if completed && graph.task(id).is_some_and(|t| t.state == TaskState::Ready) {
            if let Some(human) = loaded.human_tasks.for_task_mut(id) {
                human.completed = false;
                human.completed_by = None;
                human.completed_at = None;
            }
        }
    }

    let mut reseeded = Vec::with_capacity(reseed.len());
    for (process_id, definition_id, parent_id) in reseed {
        let is_join = graph
            .process(process_id)
            .and_then(|p| model.process(&p.definition_id))
            .is_some_and(|d| d.is_join(&definition_id));
        if is_join
            && graph
                .tasks_in_process(process_id)
                .any(|t| t.definition_id == definition_id && t.state.is_active())
        {
            continue;
        }
        let data = graph
            .task(parent_id)
            .map(|p| p.data.clone())
            .unwrap_or_default();
        let state = if is_join {
            TaskState::Waiting
        } else {
            TaskState::Ready
        };
        reseeded.push(graph.add_task(process_id, &definition_id, Some(parent_id), state, data));
    }

    for id in reopened.iter().chain([&target]).chain(&reseeded) {
        if !graph
            .task(*id)
            .is_some_and(|t| matches!(t.state, TaskState::Ready | TaskState::Waiting))
        {
            continue;
        }
        if let Some((process_def, def)) = graph.definition_of(&model, *id) {
            if !matches!(def.kind, TaskKind::BoundaryEvent { .. }) {
                attach_boundary_events(graph, process_def, *id, now).map_err(ResetError::Timer)?;
            }
        }
    }

    rebuild_join_arrivals(graph, &model);
    loaded.discard_events_of(reopened.iter().copied().chain([target]));

    let instance = &mut loaded.instance;
    if instance.status != ProcessInstanceStatus::Suspended {
        instance.status = ProcessInstanceStatus::Waiting;
    }
    instance.ended_at = None;
    instance.updated_at = now;

    let plan = ResetPlan {
        target_task_id: target,
        reset_point: point,
        tasks_removed: doomed.len(),
        processes_removed: scopes.len(),
        tasks_reopened: reopened.len(),
        tasks_reseeded: reseeded.len(),
        human_tasks_removed,
    };
    tracing::info!(
        instance_id = %instance.id,
        target = %target,
        reset_point = point,
        tasks_removed = plan.tasks_removed,
        tasks_reopened = plan.tasks_reopened,
        "instance reset"
    );
    Ok(plan)
}

/// Deleted tasks that already existed at the reset point: children of a
/// retained task that completed before it.
fn successors_to_reseed(
    graph: &ProcessGraph,
    doomed: &HashSet<Uuid>,
    scopes: &HashSet<Uuid>,
    target: Uuid,
    point: i64,
) -> Vec<(Uuid, String, Uuid)> {
    let mut seen = HashSet::new();
    graph
        .tasks_by_sequence()
        .into_iter()
        .filter(|t| doomed.contains(&t.id) && !scopes.contains(&t.process_id))
        .filter_map(|t| {
            let parent = graph.task(t.parent_id?)?;
            let existed = parent.id != target
                && !doomed.contains(&parent.id)
                && parent.state == TaskState::Completed
                && parent.end_sequence.is_some_and(|end| end <= point);
            existed.then(|| (t.process_id, t.definition_id.clone(), parent.id))
        })
        .filter(|(_, definition_id, parent_id)| seen.insert((definition_id.clone(), *parent_id)))
        .collect()
}

/// Every timer of the model must be armable at `now` before the graph is touched.
fn check_timers(model: &ProcessModel, now: DateTime<Utc>) -> Result<(), ResetError> {
    let tasks = model.processes.iter().flat_map(|p| &p.tasks);
    for task in tasks {
        if let TaskKind::BoundaryEvent { timer, .. } = &task.kind {
            if timer.deadline(now).is_none() {
                return Err(ResetError::Timer(FailureCause::TimerOutOfRange {
                    boundary: task.id.clone(),
                    duration_secs: timer.duration_secs,
                }));
            }
        }
    }
    Ok(())
}

fn reopen(graph: &mut ProcessGraph, model: &ProcessModel, task_id: Uuid, now: DateTime<Utc>) {
    let Some((process_def, def)) = graph.definition_of(model, task_id) else {
        return;
    };
    let parent_data = graph
        .task(task_id)
        .and_then(|t| t.parent_id)
        .and_then(|p| graph.task(p))
        .map(|p| p.data.clone());
    let waits_on_scope = graph.process(task_id).is_some();

    let (state, due_at) = match &def.kind {
        TaskKind::BoundaryEvent { timer, .. } => (TaskState::Waiting, timer.deadline(now)),
        _ if waits_on_scope || process_def.is_join(&def.id) => (TaskState::Waiting, None),
        _ => (TaskState::Ready, None),
    };

    if let Some(task) = graph.task_mut(task_id) {
        task.state = state;
        task.end_sequence = None;
        task.ended_at = None;
        task.due_at = due_at;
        if state == TaskState::Ready {
            task.started_at = None;
        }
        if let Some(data) = parent_data {
            task.data = data;
        }
    }
}

/// Recompute which tasks have arrived at each waiting join.
///
/// Arrivals are completed predecessors of the join that finished after the
/// previous completed occurrence of the same join.
fn rebuild_join_arrivals(graph: &mut ProcessGraph, model: &ProcessModel) {
    let process_ids: Vec<Uuid> = graph.processes().map(|p| p.id).collect();
    for process_id in process_ids {
        let Some(process_def) = graph
            .process(process_id)
            .and_then(|p| model.process(&p.definition_id))
        else {
            continue;
        };

        let joins: Vec<(Uuid, String)> = graph
            .tasks_in_process(process_id)
            .filter(|t| t.state == TaskState::Waiting && process_def.is_join(&t.definition_id))
            .map(|t| (t.id, t.definition_id.clone()))
            .collect();

        let mut arrivals = BTreeMap::new();
        for (join_id, definition_id) in joins {
            let floor = graph
                .tasks_in_process(process_id)
                .filter(|t| {
                    t.definition_id == definition_id
                        && t.id != join_id
                        && t.state == TaskState::Completed
                })
                .filter_map(|t| t.end_sequence)
                .max()
                .unwrap_or(0);
            let mut arrived: Vec<_> = graph
                .tasks_in_process(process_id)
                .filter(|t| {
                    t.state == TaskState::Completed
                        && t.end_sequence.is_some_and(|end| end > floor)
                        && process_def
                            .outgoing(&t.definition_id)
                            .any(|f| f.target == definition_id)
                })
                .collect();
            arrived.sort_by_key(|t| t.end_sequence);

            let mut data = Map::new();
            for task in &arrived {
                data.extend(task.data.clone());
            }
            let ids: Vec<Uuid> = arrived.iter().map(|t| t.id).collect();
            let ready = ids.len() >= process_def.incoming(&definition_id).count();

            if let Some(join) = graph.task_mut(join_id) {
                join.data = data;
                if ready {
                    join.state = TaskState::Ready;
                }
            }
            if !ready {
                arrivals.insert(definition_id, ids);
            }
        }

        if graph
            .process(process_id)
            .is_some_and(|p| p.snapshot.join_arrivals != arrivals)
        {
            if let Some(process) = graph.process_mut(process_id) {
                process.snapshot.join_arrivals = arrivals;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::executor::ExecutionEngine;
    use crate::engine::persistence::InstanceStore;
    use crate::engine::script::ScriptEngine;
    use crate::engine::strategy::{DefaultStrategy, GreedyStrategy};
    use crate::model::fixtures;
    use crate::repository::memory::InMemoryInstanceRepository;
    use serde_json::json;
    use tasklane_types::identity::UserId;

    fn engine() -> ExecutionEngine {
        ExecutionEngine::new(Arc::new(ScriptEngine::new()), 100)
    }

    async fn start(yaml: &str) -> LoadedInstance {
        let store = InstanceStore::new(InMemoryInstanceRepository::new());
        store
            .create(fixtures::model(yaml), UserId::new("testuser1"), Utc::now())
            .await
            .unwrap()
    }

    fn task_id(loaded: &LoadedInstance, name: &str) -> Uuid {
        loaded
            .graph
            .tasks_by_sequence()
            .into_iter()
            .rev()
            .find(|t| t.definition_id == name && !t.state.is_predicted())
            .unwrap()
            .id
    }

    fn ready_or_waiting(loaded: &LoadedInstance) -> Vec<String> {
        loaded
            .graph
            .tasks_by_sequence()
            .into_iter()
            .filter(|t| matches!(t.state, TaskState::Ready | TaskState::Waiting))
            .map(|t| t.definition_id.clone())
            .collect()
    }

    fn complete(engine: &ExecutionEngine, loaded: &mut LoadedInstance, name: &str) {
        let id = task_id(loaded, name);
        let model = loaded.model.clone();
        engine
            .complete_human_task(&mut loaded.graph, &model, id, Map::new(), Utc::now())
            .unwrap();
        engine
            .run(&mut loaded.graph, &model, &GreedyStrategy, Utc::now())
            .unwrap();
    }

    #[tokio::test]
    async fn test_reset_into_nested_call_activity_reopens_guarded_scope() {
        let engine = engine();
        let mut loaded = start(fixtures::NESTED_YAML).await;
        let model = loaded.model.clone();
        engine
            .run(&mut loaded.graph, &model, &GreedyStrategy, Utc::now())
            .unwrap();
        for name in ["initial_manual_task", "level_3_manual_task", "level_2_manual_task"] {
            complete(&engine, &mut loaded, name);
        }
        assert_eq!(ready_or_waiting(&loaded), vec!["top_level_manual_task_two"]);

        let target = task_id(&loaded, "level_3_script_task");
        let before = Utc::now();
        let plan = reset(&mut loaded, target, before).unwrap();

        assert_eq!(
            ready_or_waiting(&loaded),
            vec![
                "top_level_call_activity",
                "call_timer",
                "level_2_call_activity",
                "level_3_script_task"
            ]
        );
        assert_eq!(plan.processes_removed, 0);
        assert_eq!(plan.tasks_reseeded, 0);
        assert_eq!(loaded.graph.predicted_count(), 0);
        assert_eq!(loaded.instance.status, ProcessInstanceStatus::Waiting);

        let timer = loaded.graph.task(task_id(&loaded, "call_timer")).unwrap();
        assert!(timer.due_at.is_some_and(|due| due >= before));
        let call = loaded
            .graph
            .task(task_id(&loaded, "top_level_call_activity"))
            .unwrap();
        assert!(call.data.get("set_in_level_3").is_none());

        engine
            .run(&mut loaded.graph, &model, &GreedyStrategy, Utc::now())
            .unwrap();
        let manual = loaded.graph.task(task_id(&loaded, "level_3_manual_task")).unwrap();
        assert_eq!(manual.state, TaskState::Ready);
        assert_eq!(manual.data["set_in_level_3"], json!("yes"));
    }

    #[tokio::test]
    async fn test_reset_keeps_parallel_sibling_branch() {
        let engine = engine();
        let mut loaded = start(fixtures::PARALLEL_YAML).await;
        let model = loaded.model.clone();
        engine
            .run(&mut loaded.graph, &model, &DefaultStrategy, Utc::now())
            .unwrap();
        let old_script = task_id(&loaded, "branch_script");

        let target = task_id(&loaded, "branch_review");
        let plan = reset(&mut loaded, target, Utc::now()).unwrap();
        assert_eq!(plan.tasks_reseeded, 1);
        assert!(loaded.graph.task(old_script).is_none());
        assert_eq!(ready_or_waiting(&loaded), vec!["branch_review", "branch_script"]);

        complete(&engine, &mut loaded, "branch_review");
        assert_eq!(
            loaded.graph.task(task_id(&loaded, "end")).unwrap().state,
            TaskState::Completed
        );
    }

    #[tokio::test]
    async fn test_reset_rearms_timer_of_target() {
        let engine = engine();
        let mut loaded = start(fixtures::TIMER_YAML).await;
        let model = loaded.model.clone();
        let outcome = engine
            .run(&mut loaded.graph, &model, &DefaultStrategy, Utc::now())
            .unwrap();
        assert!(outcome.finished);
        loaded.instance.status = ProcessInstanceStatus::Complete;
        loaded.instance.ended_at = Some(Utc::now());

        let target = task_id(&loaded, "wait_for_approval");
        reset(&mut loaded, target, Utc::now()).unwrap();
        assert_eq!(ready_or_waiting(&loaded), vec!["wait_for_approval", "approval_timeout"]);
        assert_eq!(loaded.instance.status, ProcessInstanceStatus::Waiting);
        assert!(loaded.instance.ended_at.is_none());
    }

    async fn start_retimed(yaml: &str, duration_secs: u64) -> LoadedInstance {
        let model = fixtures::retimed(&fixtures::model(yaml), duration_secs);
        let store = InstanceStore::new(InMemoryInstanceRepository::new());
        store
            .create(model, UserId::new("testuser1"), Utc::now())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_reset_restarts_timer_from_reset_time() {
        let engine = engine();
        let mut loaded = start_retimed(fixtures::TIMER_YAML, 3600).await;
        let model = loaded.model.clone();
        let armed_at = Utc::now();
        engine
            .run(&mut loaded.graph, &model, &DefaultStrategy, armed_at)
            .unwrap();
        let first_timer = task_id(&loaded, "approval_timeout");

        let reset_at = armed_at + chrono::TimeDelta::seconds(600);
        let target = task_id(&loaded, "wait_for_approval");
        reset(&mut loaded, target, reset_at).unwrap();

        assert_eq!(ready_or_waiting(&loaded), vec!["wait_for_approval", "approval_timeout"]);
        let timer = loaded.graph.task(task_id(&loaded, "approval_timeout")).unwrap();
        assert_ne!(timer.id, first_timer);
        assert_eq!(timer.due_at, Some(reset_at + chrono::TimeDelta::seconds(3600)));
    }

    #[tokio::test]
    async fn test_reset_with_unrepresentable_timer_changes_nothing() {
        let mut loaded = start_retimed(fixtures::TIMER_YAML, 100_000_000_000_000).await;
        let target = task_id(&loaded, "start");

        let err = reset(&mut loaded, target, Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            ResetError::Timer(FailureCause::TimerOutOfRange { ref boundary, .. })
                if boundary == "approval_timeout"
        ));
        assert!(!loaded.has_changes());
    }

    #[tokio::test]
    async fn test_reset_to_unknown_task_changes_nothing() {
        let mut loaded = start(fixtures::LANES_YAML).await;
        let err = reset(&mut loaded, Uuid::now_v7(), Utc::now()).unwrap_err();
        assert!(matches!(err, ResetError::UnknownTask(_)));
        assert!(!loaded.has_changes());
    }

    #[tokio::test]
    async fn test_reset_to_prediction_is_rejected() {
        let engine = engine();
        let mut loaded = start(fixtures::LANES_YAML).await;
        let model = loaded.model.clone();
        engine
            .run(&mut loaded.graph, &model, &DefaultStrategy, Utc::now())
            .unwrap();
        let predicted = loaded
            .graph
            .tasks()
            .find(|t| t.state.is_predicted())
            .map(|t| t.id)
            .unwrap();
        let tasks_before = loaded.graph.tasks().count();

        let err = reset(&mut loaded, predicted, Utc::now()).unwrap_err();
        assert!(matches!(err, ResetError::UnknownTask(id) if id == predicted));
        assert_eq!(loaded.graph.tasks().count(), tasks_before);
    }
}
