//! Process instance repository trait definition.
//!
//! An instance is persisted as five record families: the instance row, its
//! process tree, its tasks, its human tasks and its append-only event log
//! (events plus error details). Saves are incremental: the engine hands the
//! repository a `ChangeSet` that must be applied atomically.

use tasklane_types::error::RepositoryError;
use tasklane_types::event::{ErrorDetail, ProcessInstanceEvent};
use tasklane_types::human_task::HumanTask;
use tasklane_types::instance::{BpmnProcess, ProcessInstance};
use tasklane_types::task::Task;
use uuid::Uuid;

use super::SortOrder;

/// Incremental write produced by one save.
///
/// Deletions are applied before upserts. Deleting a task also deletes the
/// events that reference it and their error details. Applying the same change
/// set twice must leave storage unchanged.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    /// Instance row, when its status or timestamps changed.
    pub instance: Option<ProcessInstance>,
    /// Process records to upsert (new or with a changed snapshot).
    pub processes: Vec<BpmnProcess>,
    /// Tasks created since the last save.
    pub inserted_tasks: Vec<Task>,
    /// Tasks that changed since the last save.
    pub updated_tasks: Vec<Task>,
    /// Human task records to upsert.
    pub human_tasks: Vec<HumanTask>,
    pub deleted_task_ids: Vec<Uuid>,
    /// Nested processes removed by a reset or prediction prune.
    pub deleted_process_ids: Vec<Uuid>,
    /// Human tasks whose underlying task was removed.
    pub deleted_human_task_ids: Vec<Uuid>,
    /// Retained tasks whose logged events are discarded by a reset.
    pub rewound_task_ids: Vec<Uuid>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.instance.is_none()
            && self.processes.is_empty()
            && self.inserted_tasks.is_empty()
            && self.updated_tasks.is_empty()
            && self.human_tasks.is_empty()
            && self.deleted_task_ids.is_empty()
            && self.deleted_process_ids.is_empty()
            && self.deleted_human_task_ids.is_empty()
            && self.rewound_task_ids.is_empty()
    }

    /// Total number of rows touched.
    pub fn len(&self) -> usize {
        usize::from(self.instance.is_some())
            + self.processes.len()
            + self.inserted_tasks.len()
            + self.updated_tasks.len()
            + self.human_tasks.len()
            + self.deleted_task_ids.len()
            + self.deleted_process_ids.len()
            + self.deleted_human_task_ids.len()
            + self.rewound_task_ids.len()
    }
}

/// Everything stored for one instance, as read back for hydration.
#[derive(Debug, Clone)]
pub struct InstanceRecords {
    pub instance: ProcessInstance,
    pub processes: Vec<BpmnProcess>,
    /// Ordered by ordering key.
    pub tasks: Vec<Task>,
    /// Ordered by creation time.
    pub human_tasks: Vec<HumanTask>,
}

/// Repository trait for process instance persistence.
///
/// Implementations live in tasklane-infra (SqliteInstanceRepository) and in
/// `repository::memory` for tests.
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait ProcessInstanceRepository: Send + Sync {
    /// Insert a new instance row. Fails with `Conflict` if the id exists.
    fn create_instance(
        &self,
        instance: &ProcessInstance,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_instance(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<ProcessInstance>, RepositoryError>> + Send;

    /// List instances by creation time.
    fn list_instances(
        &self,
        limit: Option<i64>,
        order: SortOrder,
    ) -> impl std::future::Future<Output = Result<Vec<ProcessInstance>, RepositoryError>> + Send;

    /// Load every record of an instance. `None` if the instance does not exist.
    fn load_records(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<InstanceRecords>, RepositoryError>> + Send;

    /// Apply a change set atomically.
    fn apply_changes(
        &self,
        instance_id: &Uuid,
        changes: &ChangeSet,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Event log
    // -----------------------------------------------------------------------

    /// Append an event and, for failures, its error detail.
    fn append_event(
        &self,
        event: &ProcessInstanceEvent,
        detail: Option<&ErrorDetail>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Events of an instance in append order.
    fn list_events(
        &self,
        instance_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<ProcessInstanceEvent>, RepositoryError>> + Send;

    /// Error details attached to events of an instance, in append order.
    fn list_error_details(
        &self,
        instance_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<ErrorDetail>, RepositoryError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_set_empty_and_len() {
        let mut changes = ChangeSet::default();
        assert!(changes.is_empty());
        assert_eq!(changes.len(), 0);

        changes.deleted_task_ids.push(Uuid::now_v7());
        changes.deleted_process_ids.push(Uuid::now_v7());
        assert!(!changes.is_empty());
        assert_eq!(changes.len(), 2);
    }
}
