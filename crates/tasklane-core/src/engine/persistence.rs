//! Save and hydrate process instances.
//!
//! A `LoadedInstance` is the in-memory working copy of one instance: its row,
//! the pinned model, the task graph and its human tasks. `InstanceStore`
//! turns the copy's pending changes into a single `ChangeSet` and rebuilds a
//! copy from stored records, checking that the records still make sense
//! against the model they are pinned to.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tasklane_types::definition::ProcessModel;
use tasklane_types::error::RepositoryError;
use tasklane_types::human_task::HumanTask;
use tasklane_types::identity::UserId;
use tasklane_types::instance::{ProcessInstance, ProcessInstanceStatus};
use thiserror::Error;
use uuid::Uuid;

use super::executor::seed_start_event;
use super::graph::{GraphError, ProcessGraph};
use crate::repository::instance::{ChangeSet, ProcessInstanceRepository};
use crate::repository::model::ProcessModelStore;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("process instance not found: {0}")]
    InstanceNotFound(Uuid),

    #[error("process model '{model_id}' version {version} not found")]
    ModelNotFound {
        model_id: String,
        version: semver::Version,
    },

    #[error("stored instance is inconsistent: {0}")]
    Inconsistent(String),
}

impl From<GraphError> for PersistenceError {
    fn from(err: GraphError) -> Self {
        PersistenceError::Inconsistent(err.0)
    }
}

// ---------------------------------------------------------------------------
// Human task set
// ---------------------------------------------------------------------------

/// Human task records of one instance with change tracking.
#[derive(Debug, Clone, Default)]
pub struct HumanTaskSet {
    records: Vec<HumanTask>,
    persisted: HashSet<Uuid>,
    dirty: HashSet<Uuid>,
    removed: Vec<Uuid>,
}

impl HumanTaskSet {
    pub fn from_records(records: Vec<HumanTask>) -> Self {
        let persisted = records.iter().map(|h| h.id).collect();
        Self {
            records,
            persisted,
            dirty: HashSet::new(),
            removed: Vec::new(),
        }
    }

    /// Records in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &HumanTask> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn for_task(&self, task_id: Uuid) -> Option<&HumanTask> {
        self.records.iter().find(|h| h.task_id == task_id)
    }

    pub fn for_task_mut(&mut self, task_id: Uuid) -> Option<&mut HumanTask> {
        let human = self.records.iter_mut().find(|h| h.task_id == task_id)?;
        self.dirty.insert(human.id);
        Some(human)
    }

    pub fn insert(&mut self, human: HumanTask) {
        self.dirty.insert(human.id);
        self.records.push(human);
    }

    /// Drop the records of the given tasks. Returns how many were removed.
    pub fn remove_for_tasks(&mut self, task_ids: &HashSet<Uuid>) -> usize {
        let before = self.records.len();
        let mut kept = Vec::with_capacity(before);
        for human in self.records.drain(..) {
            if task_ids.contains(&human.task_id) {
                self.dirty.remove(&human.id);
                if self.persisted.remove(&human.id) {
                    self.removed.push(human.id);
                }
            } else {
                kept.push(human);
            }
        }
        self.records = kept;
        before - self.records.len()
    }

    fn changes(&self) -> (Vec<HumanTask>, Vec<Uuid>) {
        let upserts = self
            .records
            .iter()
            .filter(|h| self.dirty.contains(&h.id))
            .cloned()
            .collect();
        (upserts, self.removed.clone())
    }

    fn mark_saved(&mut self) {
        self.persisted.extend(self.records.iter().map(|h| h.id));
        self.dirty.clear();
        self.removed.clear();
    }
}

// ---------------------------------------------------------------------------
// Loaded instance
// ---------------------------------------------------------------------------

/// Working copy of one process instance.
#[derive(Debug, Clone)]
pub struct LoadedInstance {
    pub instance: ProcessInstance,
    pub model: Arc<ProcessModel>,
    pub graph: ProcessGraph,
    pub human_tasks: HumanTaskSet,
    /// Instance row as last written.
    saved_instance: Option<ProcessInstance>,
    /// Tasks whose event log entries go at the next save.
    rewound_task_ids: Vec<Uuid>,
}

impl LoadedInstance {
    pub fn id(&self) -> Uuid {
        self.instance.id
    }

    /// Drop the logged events of tasks a reset reopened.
    pub(crate) fn discard_events_of(&mut self, task_ids: impl IntoIterator<Item = Uuid>) {
        self.rewound_task_ids.extend(task_ids);
    }

    /// Whether a save would write anything.
    pub fn has_changes(&self) -> bool {
        !self.pending().is_empty()
    }

    fn pending(&self) -> ChangeSet {
        let graph = self.graph.changes();
        let (human_tasks, deleted_human_task_ids) = self.human_tasks.changes();
        ChangeSet {
            instance: (self.saved_instance.as_ref() != Some(&self.instance))
                .then(|| self.instance.clone()),
            processes: graph.processes,
            inserted_tasks: graph.inserted_tasks,
            updated_tasks: graph.updated_tasks,
            human_tasks,
            deleted_task_ids: graph.deleted_tasks,
            deleted_process_ids: graph.deleted_processes,
            deleted_human_task_ids,
            rewound_task_ids: self.rewound_task_ids.clone(),
        }
    }

    fn mark_saved(&mut self) {
        self.graph.mark_saved();
        self.human_tasks.mark_saved();
        self.saved_instance = Some(self.instance.clone());
        self.rewound_task_ids.clear();
    }
}

/// What a save wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveReport {
    /// Rows written or deleted. Zero when nothing changed.
    pub rows: usize,
}

// ---------------------------------------------------------------------------
// InstanceStore
// ---------------------------------------------------------------------------

pub struct InstanceStore<R: ProcessInstanceRepository> {
    repo: R,
}

impl<R: ProcessInstanceRepository> InstanceStore<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    pub fn repo(&self) -> &R {
        &self.repo
    }

    /// Create and persist a new instance with its root start event.
    pub async fn create(
        &self,
        model: Arc<ProcessModel>,
        owner: UserId,
        now: DateTime<Utc>,
    ) -> Result<LoadedInstance, PersistenceError> {
        let instance = ProcessInstance {
            id: Uuid::now_v7(),
            model_id: model.id.clone(),
            model_version: model.version.clone(),
            status: ProcessInstanceStatus::NotStarted,
            owner,
            created_at: now,
            started_at: None,
            ended_at: None,
            updated_at: now,
        };
        let mut graph = ProcessGraph::new(instance.id, &model.primary_process);
        seed_start_event(&mut graph, &model).ok_or_else(|| {
            PersistenceError::Inconsistent(format!(
                "model '{}' has no start event in its primary process",
                model.id
            ))
        })?;

        self.repo.create_instance(&instance).await?;
        let mut loaded = LoadedInstance {
            saved_instance: Some(instance.clone()),
            instance,
            model,
            graph,
            human_tasks: HumanTaskSet::default(),
            rewound_task_ids: Vec::new(),
        };
        self.save(&mut loaded).await?;
        tracing::info!(
            instance_id = %loaded.id(),
            model = %loaded.model.id,
            version = %loaded.model.version,
            "process instance created"
        );
        Ok(loaded)
    }

    /// Write pending changes. Saving an unchanged instance writes nothing.
    pub async fn save(&self, loaded: &mut LoadedInstance) -> Result<SaveReport, PersistenceError> {
        let changes = loaded.pending();
        if changes.is_empty() {
            return Ok(SaveReport::default());
        }
        let rows = changes.len();
        self.repo.apply_changes(&loaded.instance.id, &changes).await?;
        loaded.mark_saved();
        tracing::debug!(instance_id = %loaded.id(), rows, "instance saved");
        Ok(SaveReport { rows })
    }

    /// Rebuild the working copy of an instance from storage.
    pub async fn hydrate<M: ProcessModelStore>(
        &self,
        instance_id: Uuid,
        models: &M,
    ) -> Result<LoadedInstance, PersistenceError> {
        let records = self
            .repo
            .load_records(&instance_id)
            .await?
            .ok_or(PersistenceError::InstanceNotFound(instance_id))?;
        let instance = records.instance;
        let model = models
            .get_model(&instance.model_id, Some(&instance.model_version))
            .await?
            .ok_or_else(|| PersistenceError::ModelNotFound {
                model_id: instance.model_id.clone(),
                version: instance.model_version.clone(),
            })?;

        let graph = ProcessGraph::from_records(instance_id, records.processes, records.tasks)?;
        if graph.root().definition_id != model.primary_process {
            return Err(PersistenceError::Inconsistent(format!(
                "root process '{}' is not the primary process of model '{}'",
                graph.root().definition_id,
                model.id
            )));
        }
        for process in graph.processes() {
            if model.process(&process.definition_id).is_none() {
                return Err(PersistenceError::Inconsistent(format!(
                    "process definition '{}' is not part of model '{}'",
                    process.definition_id, model.id
                )));
            }
        }
        for task in graph.tasks() {
            if graph.definition_of(&model, task.id).is_none() {
                return Err(PersistenceError::Inconsistent(format!(
                    "task '{}' ({}) has no definition",
                    task.definition_id, task.id
                )));
            }
        }
        for human in &records.human_tasks {
            if graph.task(human.task_id).is_none() {
                return Err(PersistenceError::Inconsistent(format!(
                    "human task {} refers to missing task {}",
                    human.id, human.task_id
                )));
            }
        }

        tracing::debug!(
            instance_id = %instance_id,
            tasks = graph.tasks().count(),
            "instance hydrated"
        );
        Ok(LoadedInstance {
            saved_instance: Some(instance.clone()),
            instance,
            model,
            graph,
            human_tasks: HumanTaskSet::from_records(records.human_tasks),
            rewound_task_ids: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::executor::ExecutionEngine;
    use crate::engine::script::ScriptEngine;
    use crate::engine::strategy::GreedyStrategy;
    use crate::model::fixtures;
    use crate::repository::memory::{InMemoryInstanceRepository, StaticModelStore};
    use tasklane_types::task::TaskState;

    fn models() -> StaticModelStore {
        StaticModelStore::new([
            fixtures::model(fixtures::NESTED_YAML),
            fixtures::model(fixtures::PARALLEL_YAML),
        ])
    }

    #[tokio::test]
    async fn test_create_persists_root_and_start_event() {
        let store = InstanceStore::new(InMemoryInstanceRepository::new());
        let loaded = store
            .create(fixtures::model(fixtures::NESTED_YAML), UserId::new("testuser1"), Utc::now())
            .await
            .unwrap();

        let records = store.repo().load_records(&loaded.id()).await.unwrap().unwrap();
        assert_eq!(records.processes.len(), 1);
        assert_eq!(records.tasks.len(), 1);
        assert_eq!(records.tasks[0].state, TaskState::Future);
        assert_eq!(records.instance.status, ProcessInstanceStatus::NotStarted);
        assert!(!loaded.has_changes());
    }

    #[tokio::test]
    async fn test_save_twice_writes_once() {
        let store = InstanceStore::new(InMemoryInstanceRepository::new());
        let mut loaded = store
            .create(fixtures::model(fixtures::PARALLEL_YAML), UserId::new("testuser1"), Utc::now())
            .await
            .unwrap();
        let engine = ExecutionEngine::new(Arc::new(ScriptEngine::new()), 100);
        let model = loaded.model.clone();
        engine
            .run(&mut loaded.graph, &model, &GreedyStrategy, Utc::now())
            .unwrap();

        let writes = store.repo().writes();
        let first = store.save(&mut loaded).await.unwrap();
        assert!(first.rows > 0);
        let second = store.save(&mut loaded).await.unwrap();
        assert_eq!(second.rows, 0);
        assert_eq!(store.repo().writes(), writes + 1);
    }

    #[tokio::test]
    async fn test_hydrate_matches_saved_graph() {
        let store = InstanceStore::new(InMemoryInstanceRepository::new());
        let mut loaded = store
            .create(fixtures::model(fixtures::NESTED_YAML), UserId::new("testuser1"), Utc::now())
            .await
            .unwrap();
        let engine = ExecutionEngine::new(Arc::new(ScriptEngine::new()), 100);
        let model = loaded.model.clone();
        engine
            .run(&mut loaded.graph, &model, &GreedyStrategy, Utc::now())
            .unwrap();
        store.save(&mut loaded).await.unwrap();

        let hydrated = store.hydrate(loaded.id(), &models()).await.unwrap();
        let mut expected: Vec<_> = loaded.graph.tasks().cloned().collect();
        let mut actual: Vec<_> = hydrated.graph.tasks().cloned().collect();
        expected.sort_by_key(|t| t.sequence);
        actual.sort_by_key(|t| t.sequence);
        assert_eq!(actual, expected);
        assert_eq!(hydrated.instance, loaded.instance);
        assert!(!hydrated.has_changes());
    }

    #[tokio::test]
    async fn test_hydrate_unknown_instance() {
        let store = InstanceStore::new(InMemoryInstanceRepository::new());
        let err = store.hydrate(Uuid::now_v7(), &models()).await.unwrap_err();
        assert!(matches!(err, PersistenceError::InstanceNotFound(_)));
    }

    #[tokio::test]
    async fn test_hydrate_detects_missing_root() {
        let store = InstanceStore::new(InMemoryInstanceRepository::new());
        let loaded = store
            .create(fixtures::model(fixtures::NESTED_YAML), UserId::new("testuser1"), Utc::now())
            .await
            .unwrap();
        let changes = ChangeSet {
            deleted_process_ids: vec![loaded.graph.root().id],
            ..ChangeSet::default()
        };
        store.repo().apply_changes(&loaded.id(), &changes).await.unwrap();

        let err = store.hydrate(loaded.id(), &models()).await.unwrap_err();
        assert!(matches!(err, PersistenceError::Inconsistent(_)));
    }

    #[tokio::test]
    async fn test_hydrate_requires_pinned_model_version() {
        let store = InstanceStore::new(InMemoryInstanceRepository::new());
        let loaded = store
            .create(fixtures::model(fixtures::NESTED_YAML), UserId::new("testuser1"), Utc::now())
            .await
            .unwrap();
        let err = store
            .hydrate(loaded.id(), &StaticModelStore::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::ModelNotFound { .. }));
    }

    #[test]
    fn test_human_task_set_tracks_removals() {
        let task_id = Uuid::now_v7();
        let human = HumanTask {
            id: Uuid::now_v7(),
            instance_id: Uuid::now_v7(),
            task_id,
            task_name: "review".to_string(),
            task_title: "Review".to_string(),
            lane_assignment: None,
            potential_owners: vec![UserId::new("testuser1")],
            completed: false,
            completed_by: None,
            created_at: Utc::now(),
            completed_at: None,
        };
        let mut set = HumanTaskSet::from_records(vec![human.clone()]);
        assert!(set.changes().0.is_empty());

        let removed = set.remove_for_tasks(&HashSet::from([task_id]));
        assert_eq!(removed, 1);
        assert!(set.is_empty());
        assert_eq!(set.changes().1, vec![human.id]);
    }
}
