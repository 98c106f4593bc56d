//! In-memory task graph of one process instance.
//!
//! Processes and tasks live in flat arenas indexed by id. A process node keeps
//! the arena index of its parent instead of a reference, so the nested
//! call-activity tree serializes and hydrates without cycles. Every mutation
//! goes through `*_mut` accessors, which mark the node dirty for the next save.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tasklane_types::definition::{ProcessDefinition, ProcessModel, TaskDefinition};
use tasklane_types::instance::{BpmnProcess, ProcessSnapshot};
use tasklane_types::task::{Task, TaskState};
use thiserror::Error;
use uuid::Uuid;

/// The stored records do not form a valid graph.
#[derive(Debug, Error)]
#[error("inconsistent process graph: {0}")]
pub struct GraphError(pub String);

#[derive(Debug, Clone)]
struct ProcessNode {
    record: BpmnProcess,
    parent: Option<usize>,
    persisted: bool,
    dirty: bool,
}

#[derive(Debug, Clone)]
struct TaskNode {
    record: Task,
    persisted: bool,
    dirty: bool,
}

/// Pending writes produced since the last save.
#[derive(Debug, Default)]
pub struct GraphChanges {
    pub processes: Vec<BpmnProcess>,
    pub inserted_tasks: Vec<Task>,
    pub updated_tasks: Vec<Task>,
    pub deleted_tasks: Vec<Uuid>,
    pub deleted_processes: Vec<Uuid>,
}

#[derive(Debug, Clone)]
pub struct ProcessGraph {
    instance_id: Uuid,
    root_id: Uuid,
    processes: Vec<ProcessNode>,
    process_index: HashMap<Uuid, usize>,
    tasks: Vec<TaskNode>,
    task_index: HashMap<Uuid, usize>,
    next_sequence: i64,
    removed_tasks: Vec<Uuid>,
    removed_processes: Vec<Uuid>,
}

impl ProcessGraph {
    /// A fresh graph holding only the root process.
    pub fn new(instance_id: Uuid, root_definition: &str) -> Self {
        let root = BpmnProcess {
            id: Uuid::now_v7(),
            instance_id,
            definition_id: root_definition.to_string(),
            parent_id: None,
            snapshot: ProcessSnapshot::default(),
        };
        let mut graph = Self {
            instance_id,
            root_id: root.id,
            processes: Vec::new(),
            process_index: HashMap::new(),
            tasks: Vec::new(),
            task_index: HashMap::new(),
            next_sequence: 1,
            removed_tasks: Vec::new(),
            removed_processes: Vec::new(),
        };
        graph.push_process(root, None, false);
        graph
    }

    /// Rebuild a graph from stored records. Nothing is marked dirty.
    pub fn from_records(
        instance_id: Uuid,
        processes: Vec<BpmnProcess>,
        tasks: Vec<Task>,
    ) -> Result<Self, GraphError> {
        let roots: Vec<Uuid> = processes
            .iter()
            .filter(|p| p.parent_id.is_none())
            .map(|p| p.id)
            .collect();
        if roots.len() != 1 {
            return Err(GraphError(format!(
                "expected exactly one root process, found {}",
                roots.len()
            )));
        }

        let mut graph = Self {
            instance_id,
            root_id: roots[0],
            processes: Vec::new(),
            process_index: HashMap::new(),
            tasks: Vec::new(),
            task_index: HashMap::new(),
            next_sequence: 1,
            removed_tasks: Vec::new(),
            removed_processes: Vec::new(),
        };

        // Insert parents before children; the tree depth bounds the passes.
        let mut pending = processes;
        while !pending.is_empty() {
            let before = pending.len();
            let mut deferred = Vec::new();
            for process in pending {
                match process.parent_id {
                    None => graph.push_process(process, None, true),
                    Some(parent) => match graph.process_index.get(&parent).copied() {
                        Some(parent_idx) => graph.push_process(process, Some(parent_idx), true),
                        None => deferred.push(process),
                    },
                }
            }
            if deferred.len() == before {
                return Err(GraphError(format!(
                    "process {} references missing parent process {}",
                    deferred[0].id,
                    deferred[0].parent_id.unwrap_or_default()
                )));
            }
            pending = deferred;
        }

        for task in tasks {
            if !graph.process_index.contains_key(&task.process_id) {
                return Err(GraphError(format!(
                    "task {} references missing process {}",
                    task.id, task.process_id
                )));
            }
            if graph.task_index.contains_key(&task.id) {
                return Err(GraphError(format!("duplicate task {}", task.id)));
            }
            let last = task.end_sequence.unwrap_or(task.sequence).max(task.sequence);
            graph.next_sequence = graph.next_sequence.max(last + 1);
            graph.task_index.insert(task.id, graph.tasks.len());
            graph.tasks.push(TaskNode {
                record: task,
                persisted: true,
                dirty: false,
            });
        }

        Ok(graph)
    }

    fn push_process(&mut self, record: BpmnProcess, parent: Option<usize>, persisted: bool) {
        self.process_index.insert(record.id, self.processes.len());
        self.processes.push(ProcessNode {
            record,
            parent,
            persisted,
            dirty: !persisted,
        });
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    // -----------------------------------------------------------------------
    // Processes
    // -----------------------------------------------------------------------

    pub fn root(&self) -> &BpmnProcess {
        // The root is never removed.
        &self.processes[self.process_index[&self.root_id]].record
    }

    pub fn process(&self, id: Uuid) -> Option<&BpmnProcess> {
        self.process_index.get(&id).map(|&i| &self.processes[i].record)
    }

    pub fn process_mut(&mut self, id: Uuid) -> Option<&mut BpmnProcess> {
        let idx = *self.process_index.get(&id)?;
        let node = &mut self.processes[idx];
        node.dirty = true;
        Some(&mut node.record)
    }

    pub fn processes(&self) -> impl DoubleEndedIterator<Item = &BpmnProcess> {
        self.processes.iter().map(|p| &p.record)
    }

    /// Direct parent of a process.
    pub fn parent_process(&self, id: Uuid) -> Option<&BpmnProcess> {
        let idx = *self.process_index.get(&id)?;
        self.processes[idx]
            .parent
            .map(|parent| &self.processes[parent].record)
    }

    /// Processes from the root down to `id`, inclusive.
    pub fn process_path(&self, id: Uuid) -> Vec<&BpmnProcess> {
        let mut path = Vec::new();
        let mut cursor = self.process_index.get(&id).copied();
        while let Some(idx) = cursor {
            path.push(&self.processes[idx].record);
            cursor = self.processes[idx].parent;
        }
        path.reverse();
        path
    }

    /// Spawn a nested process keyed by the id of the task that enters it.
    pub fn add_process(&mut self, spawning_task: Uuid, definition_id: &str, parent: Uuid) -> Uuid {
        let parent_idx = self.process_index.get(&parent).copied();
        self.push_process(
            BpmnProcess {
                id: spawning_task,
                instance_id: self.instance_id,
                definition_id: definition_id.to_string(),
                parent_id: Some(parent),
                snapshot: ProcessSnapshot::default(),
            },
            parent_idx,
            false,
        );
        spawning_task
    }

    // -----------------------------------------------------------------------
    // Tasks
    // -----------------------------------------------------------------------

    pub fn task(&self, id: Uuid) -> Option<&Task> {
        self.task_index.get(&id).map(|&i| &self.tasks[i].record)
    }

    pub fn task_mut(&mut self, id: Uuid) -> Option<&mut Task> {
        let idx = *self.task_index.get(&id)?;
        let node = &mut self.tasks[idx];
        node.dirty = true;
        Some(&mut node.record)
    }

    /// Tasks in creation order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter().map(|t| &t.record)
    }

    /// Tasks ordered by their ordering key.
    pub fn tasks_by_sequence(&self) -> Vec<&Task> {
        let mut tasks: Vec<&Task> = self.tasks().collect();
        tasks.sort_by_key(|t| t.sequence);
        tasks
    }

    pub fn tasks_in_process(&self, process_id: Uuid) -> impl Iterator<Item = &Task> {
        self.tasks().filter(move |t| t.process_id == process_id)
    }

    /// Tasks created by the completion of `id`.
    pub fn children(&self, id: Uuid) -> impl Iterator<Item = &Task> {
        self.tasks().filter(move |t| t.parent_id == Some(id))
    }

    /// Take the next ordering key.
    pub fn next_sequence(&mut self) -> i64 {
        let seq = self.next_sequence;
        self.next_sequence += 1;
        seq
    }

    pub fn add_task(
        &mut self,
        process_id: Uuid,
        definition_id: &str,
        parent_id: Option<Uuid>,
        state: TaskState,
        data: Map<String, Value>,
    ) -> Uuid {
        let id = Uuid::now_v7();
        let sequence = self.next_sequence();
        self.task_index.insert(id, self.tasks.len());
        self.tasks.push(TaskNode {
            record: Task {
                id,
                process_id,
                definition_id: definition_id.to_string(),
                parent_id,
                state,
                sequence,
                end_sequence: None,
                data,
                started_at: None,
                ended_at: None,
                due_at: None,
            },
            persisted: false,
            dirty: true,
        });
        id
    }

    /// Move a task into a finished state, stamping its end ordering key.
    pub fn finish_task(&mut self, id: Uuid, state: TaskState, now: DateTime<Utc>) {
        let seq = self.next_sequence();
        if let Some(task) = self.task_mut(id) {
            task.state = state;
            task.end_sequence = Some(seq);
            task.ended_at = Some(now);
            task.due_at = None;
        }
    }

    /// Drop tasks from the graph. Persisted ones are deleted on the next save.
    pub fn remove_tasks(&mut self, ids: &HashSet<Uuid>) {
        if ids.is_empty() {
            return;
        }
        for node in &self.tasks {
            if node.persisted && ids.contains(&node.record.id) {
                self.removed_tasks.push(node.record.id);
            }
        }
        self.tasks.retain(|t| !ids.contains(&t.record.id));
        self.task_index = self
            .tasks
            .iter()
            .enumerate()
            .map(|(i, t)| (t.record.id, i))
            .collect();
    }

    /// Drop nested processes. The root is never removed.
    pub fn remove_processes(&mut self, ids: &HashSet<Uuid>) {
        let ids: HashSet<Uuid> = ids
            .iter()
            .copied()
            .filter(|id| *id != self.root_id)
            .collect();
        if ids.is_empty() {
            return;
        }
        for node in &self.processes {
            if node.persisted && ids.contains(&node.record.id) {
                self.removed_processes.push(node.record.id);
            }
        }
        let kept: Vec<ProcessNode> = self
            .processes
            .drain(..)
            .filter(|p| !ids.contains(&p.record.id))
            .collect();
        self.process_index = kept
            .iter()
            .enumerate()
            .map(|(i, p)| (p.record.id, i))
            .collect();
        self.processes = kept
            .into_iter()
            .map(|mut node| {
                node.parent = node
                    .record
                    .parent_id
                    .and_then(|parent| self.process_index.get(&parent).copied());
                node
            })
            .collect();
    }

    /// Definition of a task within the model.
    pub fn definition_of<'m>(
        &self,
        model: &'m ProcessModel,
        task_id: Uuid,
    ) -> Option<(&'m ProcessDefinition, &'m TaskDefinition)> {
        let task = self.task(task_id)?;
        let process = model.process(&self.process(task.process_id)?.definition_id)?;
        let definition = process.task(&task.definition_id)?;
        Some((process, definition))
    }

    /// Number of tasks in a speculative state.
    pub fn predicted_count(&self) -> usize {
        self.tasks().filter(|t| t.state.is_predicted()).count()
    }

    // -----------------------------------------------------------------------
    // Change tracking
    // -----------------------------------------------------------------------

    /// Everything written or removed since the last `mark_saved`.
    pub fn changes(&self) -> GraphChanges {
        let mut changes = GraphChanges {
            deleted_tasks: self.removed_tasks.clone(),
            deleted_processes: self.removed_processes.clone(),
            ..GraphChanges::default()
        };
        changes.processes = self
            .processes
            .iter()
            .filter(|p| p.dirty)
            .map(|p| p.record.clone())
            .collect();
        for node in self.tasks.iter().filter(|t| t.dirty) {
            if node.persisted {
                changes.updated_tasks.push(node.record.clone());
            } else {
                changes.inserted_tasks.push(node.record.clone());
            }
        }
        changes
            .inserted_tasks
            .sort_by_key(|t| t.sequence);
        changes
    }

    /// Record that all pending changes reached storage.
    pub fn mark_saved(&mut self) {
        for node in &mut self.processes {
            node.persisted = true;
            node.dirty = false;
        }
        for node in &mut self.tasks {
            node.persisted = true;
            node.dirty = false;
        }
        self.removed_tasks.clear();
        self.removed_processes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph_with_child() -> (ProcessGraph, Uuid, Uuid) {
        let mut graph = ProcessGraph::new(Uuid::now_v7(), "main");
        let root = graph.root().id;
        let call = graph.add_task(root, "call", None, TaskState::Waiting, Map::new());
        graph.add_process(call, "child", root);
        let inner = graph.add_task(call, "start", None, TaskState::Ready, Map::new());
        (graph, call, inner)
    }

    #[test]
    fn test_sequences_are_strictly_increasing() {
        let (mut graph, call, inner) = graph_with_child();
        assert!(graph.task(inner).unwrap().sequence > graph.task(call).unwrap().sequence);
        graph.finish_task(inner, TaskState::Completed, Utc::now());
        let end = graph.task(inner).unwrap().end_sequence.unwrap();
        assert!(end > graph.task(inner).unwrap().sequence);
    }

    #[test]
    fn test_process_path_walks_parent_indices() {
        let (graph, call, _) = graph_with_child();
        let path: Vec<&str> = graph
            .process_path(call)
            .iter()
            .map(|p| p.definition_id.as_str())
            .collect();
        assert_eq!(path, vec!["main", "child"]);
        assert_eq!(graph.parent_process(call).unwrap().id, graph.root().id);
    }

    #[test]
    fn test_changes_and_mark_saved() {
        let (mut graph, call, _) = graph_with_child();
        let changes = graph.changes();
        assert_eq!(changes.processes.len(), 2);
        assert_eq!(changes.inserted_tasks.len(), 2);
        assert!(changes.updated_tasks.is_empty());

        graph.mark_saved();
        let changes = graph.changes();
        assert!(changes.processes.is_empty());
        assert!(changes.inserted_tasks.is_empty());

        graph.task_mut(call).unwrap().state = TaskState::Completed;
        let changes = graph.changes();
        assert_eq!(changes.updated_tasks.len(), 1);
        assert_eq!(changes.updated_tasks[0].id, call);
    }

    #[test]
    fn test_remove_tracks_only_persisted_rows() {
        let (mut graph, call, inner) = graph_with_child();
        graph.mark_saved();
        let root = graph.root().id;
        let fresh = graph.add_task(root, "fresh", None, TaskState::Likely, Map::new());

        graph.remove_tasks(&HashSet::from([inner, fresh]));
        graph.remove_processes(&HashSet::from([call]));

        let changes = graph.changes();
        assert_eq!(changes.deleted_tasks, vec![inner]);
        assert_eq!(changes.deleted_processes, vec![call]);
        assert!(graph.task(inner).is_none());
        assert!(graph.task(call).is_some());
        assert!(graph.process(call).is_none());
    }

    #[test]
    fn test_from_records_roundtrip() {
        let (graph, call, inner) = graph_with_child();
        let processes: Vec<BpmnProcess> = graph.processes().cloned().rev().collect();
        let tasks: Vec<Task> = graph.tasks().cloned().collect();

        let mut rebuilt = ProcessGraph::from_records(graph.instance_id(), processes, tasks).unwrap();
        assert_eq!(rebuilt.root().id, graph.root().id);
        assert_eq!(rebuilt.task(inner), graph.task(inner));
        assert_eq!(rebuilt.parent_process(call).unwrap().id, graph.root().id);
        assert!(rebuilt.changes().inserted_tasks.is_empty());
        assert!(rebuilt.next_sequence() > graph.task(inner).unwrap().sequence);
    }

    #[test]
    fn test_from_records_rejects_missing_parent() {
        let (graph, call, _) = graph_with_child();
        let processes: Vec<BpmnProcess> =
            graph.processes().filter(|p| p.id == call).cloned().collect();
        let err = ProcessGraph::from_records(graph.instance_id(), processes, vec![]).unwrap_err();
        assert!(err.to_string().contains("root process"));

        let mut orphan = graph.process(call).unwrap().clone();
        orphan.parent_id = Some(Uuid::now_v7());
        let processes = vec![graph.root().clone(), orphan];
        let err = ProcessGraph::from_records(graph.instance_id(), processes, vec![]).unwrap_err();
        assert!(err.to_string().contains("missing parent"));
    }
}
