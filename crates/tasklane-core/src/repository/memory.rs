//! In-memory repository implementations.
//!
//! Used by the engine's own tests and by embedders that do not need
//! durable storage. Semantics match the SQLite implementations in
//! tasklane-infra: change sets apply atomically under one lock, deletions
//! before upserts.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tasklane_types::definition::ProcessModel;
use tasklane_types::error::RepositoryError;
use tasklane_types::event::{ErrorDetail, ProcessInstanceEvent};
use tasklane_types::human_task::HumanTask;
use tasklane_types::identity::{GroupId, User, UserId};
use tasklane_types::instance::{BpmnProcess, ProcessInstance};
use tasklane_types::task::Task;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::SortOrder;
use super::directory::Directory;
use super::instance::{ChangeSet, InstanceRecords, ProcessInstanceRepository};
use super::model::ProcessModelStore;

// ---------------------------------------------------------------------------
// Instances
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct StoredInstance {
    instance: ProcessInstance,
    processes: BTreeMap<Uuid, BpmnProcess>,
    tasks: HashMap<Uuid, Task>,
    human_tasks: Vec<HumanTask>,
    events: Vec<ProcessInstanceEvent>,
    details: Vec<ErrorDetail>,
}

/// Process instance repository backed by a map.
#[derive(Debug, Default)]
pub struct InMemoryInstanceRepository {
    instances: RwLock<HashMap<Uuid, StoredInstance>>,
    writes: AtomicUsize,
}

impl InMemoryInstanceRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of change sets applied so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl ProcessInstanceRepository for InMemoryInstanceRepository {
    async fn create_instance(&self, instance: &ProcessInstance) -> Result<(), RepositoryError> {
        let mut instances = self.instances.write().await;
        if instances.contains_key(&instance.id) {
            return Err(RepositoryError::Conflict(format!(
                "instance {} already exists",
                instance.id
            )));
        }
        instances.insert(
            instance.id,
            StoredInstance {
                instance: instance.clone(),
                processes: BTreeMap::new(),
                tasks: HashMap::new(),
                human_tasks: Vec::new(),
                events: Vec::new(),
                details: Vec::new(),
            },
        );
        Ok(())
    }

    async fn get_instance(&self, id: &Uuid) -> Result<Option<ProcessInstance>, RepositoryError> {
        let instances = self.instances.read().await;
        Ok(instances.get(id).map(|s| s.instance.clone()))
    }

    async fn list_instances(
        &self,
        limit: Option<i64>,
        order: SortOrder,
    ) -> Result<Vec<ProcessInstance>, RepositoryError> {
        let instances = self.instances.read().await;
        let mut list: Vec<ProcessInstance> =
            instances.values().map(|s| s.instance.clone()).collect();
        list.sort_by_key(|i| (i.created_at, i.id));
        if order == SortOrder::Desc {
            list.reverse();
        }
        if let Some(limit) = limit {
            list.truncate(usize::try_from(limit).unwrap_or(0));
        }
        Ok(list)
    }

    async fn load_records(&self, id: &Uuid) -> Result<Option<InstanceRecords>, RepositoryError> {
        let instances = self.instances.read().await;
        let Some(stored) = instances.get(id) else {
            return Ok(None);
        };
        let mut tasks: Vec<Task> = stored.tasks.values().cloned().collect();
        tasks.sort_by_key(|t| t.sequence);
        Ok(Some(InstanceRecords {
            instance: stored.instance.clone(),
            processes: stored.processes.values().cloned().collect(),
            tasks,
            human_tasks: stored.human_tasks.clone(),
        }))
    }

    async fn apply_changes(
        &self,
        instance_id: &Uuid,
        changes: &ChangeSet,
    ) -> Result<(), RepositoryError> {
        let mut instances = self.instances.write().await;
        let stored = instances
            .get_mut(instance_id)
            .ok_or(RepositoryError::NotFound)?;

        for id in &changes.deleted_human_task_ids {
            stored.human_tasks.retain(|h| h.id != *id);
        }
        for id in &changes.deleted_task_ids {
            stored.tasks.remove(id);
        }
        let discarded: HashSet<Uuid> = changes
            .deleted_task_ids
            .iter()
            .chain(&changes.rewound_task_ids)
            .copied()
            .collect();
        if !discarded.is_empty() {
            let (kept, dropped): (Vec<_>, Vec<_>) = stored
                .events
                .drain(..)
                .partition(|e| !e.task_id.is_some_and(|t| discarded.contains(&t)));
            stored.events = kept;
            stored
                .details
                .retain(|d| !dropped.iter().any(|e| e.id == d.event_id));
        }
        for id in &changes.deleted_process_ids {
            stored.processes.remove(id);
        }

        if let Some(instance) = &changes.instance {
            stored.instance = instance.clone();
        }
        for process in &changes.processes {
            stored.processes.insert(process.id, process.clone());
        }
        for task in changes.inserted_tasks.iter().chain(&changes.updated_tasks) {
            stored.tasks.insert(task.id, task.clone());
        }
        for human in &changes.human_tasks {
            match stored.human_tasks.iter_mut().find(|h| h.id == human.id) {
                Some(existing) => *existing = human.clone(),
                None => stored.human_tasks.push(human.clone()),
            }
        }

        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn append_event(
        &self,
        event: &ProcessInstanceEvent,
        detail: Option<&ErrorDetail>,
    ) -> Result<(), RepositoryError> {
        let mut instances = self.instances.write().await;
        let stored = instances
            .get_mut(&event.instance_id)
            .ok_or(RepositoryError::NotFound)?;
        stored.events.push(event.clone());
        if let Some(detail) = detail {
            stored.details.push(detail.clone());
        }
        Ok(())
    }

    async fn list_events(
        &self,
        instance_id: &Uuid,
    ) -> Result<Vec<ProcessInstanceEvent>, RepositoryError> {
        let instances = self.instances.read().await;
        Ok(instances
            .get(instance_id)
            .map(|s| s.events.clone())
            .unwrap_or_default())
    }

    async fn list_error_details(
        &self,
        instance_id: &Uuid,
    ) -> Result<Vec<ErrorDetail>, RepositoryError> {
        let instances = self.instances.read().await;
        Ok(instances
            .get(instance_id)
            .map(|s| s.details.clone())
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Directory
// ---------------------------------------------------------------------------

/// Fixed set of users and groups.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    users: HashMap<UserId, User>,
    groups: HashMap<GroupId, Vec<UserId>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, user: User) -> Self {
        self.users.insert(user.id.clone(), user);
        self
    }

    pub fn with_admin(mut self, id: &str) -> Self {
        let mut user = User::new(id, id);
        user.is_admin = true;
        self.users.insert(user.id.clone(), user);
        self
    }

    pub fn with_group(mut self, id: &str, members: &[&str]) -> Self {
        self.groups.insert(
            GroupId::new(id),
            members.iter().map(|m| UserId::new(*m)).collect(),
        );
        self
    }
}

impl Directory for StaticDirectory {
    async fn find_user(&self, id: &UserId) -> Result<Option<User>, RepositoryError> {
        Ok(self.users.get(id).cloned())
    }

    async fn group_members(&self, id: &GroupId) -> Result<Option<Vec<UserId>>, RepositoryError> {
        Ok(self.groups.get(id).cloned())
    }
}

// ---------------------------------------------------------------------------
// Models
// ---------------------------------------------------------------------------

/// Fixed set of process models.
#[derive(Debug, Clone, Default)]
pub struct StaticModelStore {
    models: Vec<Arc<ProcessModel>>,
}

impl StaticModelStore {
    pub fn new(models: impl IntoIterator<Item = Arc<ProcessModel>>) -> Self {
        let mut models: Vec<Arc<ProcessModel>> = models.into_iter().collect();
        models.sort_by(|a, b| a.id.cmp(&b.id).then_with(|| a.version.cmp(&b.version)));
        Self { models }
    }
}

impl ProcessModelStore for StaticModelStore {
    async fn get_model(
        &self,
        id: &str,
        version: Option<&semver::Version>,
    ) -> Result<Option<Arc<ProcessModel>>, RepositoryError> {
        Ok(self
            .models
            .iter()
            .filter(|m| m.id == id)
            .filter(|m| version.is_none_or(|v| &m.version == v))
            .max_by(|a, b| a.version.cmp(&b.version))
            .cloned())
    }

    async fn list_models(&self) -> Result<Vec<Arc<ProcessModel>>, RepositoryError> {
        Ok(self.models.clone())
    }
}
