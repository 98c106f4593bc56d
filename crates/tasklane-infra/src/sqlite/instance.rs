//! SQLite process instance repository implementation.
//!
//! Implements `ProcessInstanceRepository` from `tasklane-core` using sqlx with
//! split read/write pools. A change set is applied in one transaction.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, Transaction};
use tasklane_core::repository::SortOrder;
use tasklane_core::repository::instance::{ChangeSet, InstanceRecords, ProcessInstanceRepository};
use tasklane_types::error::RepositoryError;
use tasklane_types::event::{ErrorDetail, ProcessInstanceEvent};
use tasklane_types::human_task::HumanTask;
use tasklane_types::identity::{GroupId, UserId};
use tasklane_types::instance::{BpmnProcess, ProcessInstance};
use tasklane_types::task::Task;
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `ProcessInstanceRepository`.
pub struct SqliteInstanceRepository {
    pool: DatabasePool,
}

impl SqliteInstanceRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn query_err(e: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::Query(e.to_string())
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

fn parse_opt_datetime(s: Option<String>) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    s.as_deref().map(parse_datetime).transpose()
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    Uuid::parse_str(s).map_err(|e| RepositoryError::Query(format!("invalid uuid '{s}': {e}")))
}

fn parse_opt_uuid(s: Option<String>) -> Result<Option<Uuid>, RepositoryError> {
    s.as_deref().map(parse_uuid).transpose()
}

fn parse_json<T: serde::de::DeserializeOwned>(s: &str, what: &str) -> Result<T, RepositoryError> {
    serde_json::from_str(s).map_err(|e| RepositoryError::Query(format!("invalid {what} JSON: {e}")))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(query_err)
}

fn row_to_instance(row: &SqliteRow) -> Result<ProcessInstance, RepositoryError> {
    let id: String = row.try_get("id").map_err(query_err)?;
    let version: String = row.try_get("model_version").map_err(query_err)?;
    let status: String = row.try_get("status").map_err(query_err)?;
    let owner: String = row.try_get("owner").map_err(query_err)?;
    let created_at: String = row.try_get("created_at").map_err(query_err)?;
    let updated_at: String = row.try_get("updated_at").map_err(query_err)?;

    Ok(ProcessInstance {
        id: parse_uuid(&id)?,
        model_id: row.try_get("model_id").map_err(query_err)?,
        model_version: semver::Version::parse(&version)
            .map_err(|e| RepositoryError::Query(format!("invalid model version: {e}")))?,
        status: status.parse().map_err(RepositoryError::Query)?,
        owner: UserId::new(owner),
        created_at: parse_datetime(&created_at)?,
        started_at: parse_opt_datetime(row.try_get("started_at").map_err(query_err)?)?,
        ended_at: parse_opt_datetime(row.try_get("ended_at").map_err(query_err)?)?,
        updated_at: parse_datetime(&updated_at)?,
    })
}

fn row_to_process(row: &SqliteRow) -> Result<BpmnProcess, RepositoryError> {
    let id: String = row.try_get("id").map_err(query_err)?;
    let instance_id: String = row.try_get("instance_id").map_err(query_err)?;
    let snapshot: String = row.try_get("snapshot").map_err(query_err)?;

    Ok(BpmnProcess {
        id: parse_uuid(&id)?,
        instance_id: parse_uuid(&instance_id)?,
        definition_id: row.try_get("definition_id").map_err(query_err)?,
        parent_id: parse_opt_uuid(row.try_get("parent_id").map_err(query_err)?)?,
        snapshot: parse_json(&snapshot, "snapshot")?,
    })
}

fn row_to_task(row: &SqliteRow) -> Result<Task, RepositoryError> {
    let id: String = row.try_get("id").map_err(query_err)?;
    let process_id: String = row.try_get("process_id").map_err(query_err)?;
    let state: String = row.try_get("state").map_err(query_err)?;
    let data: String = row.try_get("data").map_err(query_err)?;

    Ok(Task {
        id: parse_uuid(&id)?,
        process_id: parse_uuid(&process_id)?,
        definition_id: row.try_get("definition_id").map_err(query_err)?,
        parent_id: parse_opt_uuid(row.try_get("parent_id").map_err(query_err)?)?,
        state: state.parse().map_err(RepositoryError::Query)?,
        sequence: row.try_get("sequence").map_err(query_err)?,
        end_sequence: row.try_get("end_sequence").map_err(query_err)?,
        data: parse_json(&data, "task data")?,
        started_at: parse_opt_datetime(row.try_get("started_at").map_err(query_err)?)?,
        ended_at: parse_opt_datetime(row.try_get("ended_at").map_err(query_err)?)?,
        due_at: parse_opt_datetime(row.try_get("due_at").map_err(query_err)?)?,
    })
}

fn row_to_human_task(row: &SqliteRow) -> Result<HumanTask, RepositoryError> {
    let id: String = row.try_get("id").map_err(query_err)?;
    let instance_id: String = row.try_get("instance_id").map_err(query_err)?;
    let task_id: String = row.try_get("task_id").map_err(query_err)?;
    let owners: String = row.try_get("potential_owners").map_err(query_err)?;
    let lane: Option<String> = row.try_get("lane_assignment").map_err(query_err)?;
    let completed_by: Option<String> = row.try_get("completed_by").map_err(query_err)?;
    let created_at: String = row.try_get("created_at").map_err(query_err)?;

    Ok(HumanTask {
        id: parse_uuid(&id)?,
        instance_id: parse_uuid(&instance_id)?,
        task_id: parse_uuid(&task_id)?,
        task_name: row.try_get("task_name").map_err(query_err)?,
        task_title: row.try_get("task_title").map_err(query_err)?,
        lane_assignment: lane.map(GroupId::new),
        potential_owners: parse_json(&owners, "potential owners")?,
        completed: row.try_get::<i64, _>("completed").map_err(query_err)? != 0,
        completed_by: completed_by.map(UserId::new),
        created_at: parse_datetime(&created_at)?,
        completed_at: parse_opt_datetime(row.try_get("completed_at").map_err(query_err)?)?,
    })
}

fn row_to_event(row: &SqliteRow) -> Result<ProcessInstanceEvent, RepositoryError> {
    let id: String = row.try_get("id").map_err(query_err)?;
    let instance_id: String = row.try_get("instance_id").map_err(query_err)?;
    let event_type: String = row.try_get("event_type").map_err(query_err)?;
    let user: Option<String> = row.try_get("user_id").map_err(query_err)?;
    let timestamp: String = row.try_get("timestamp").map_err(query_err)?;

    Ok(ProcessInstanceEvent {
        id: parse_uuid(&id)?,
        instance_id: parse_uuid(&instance_id)?,
        event_type: event_type.parse().map_err(RepositoryError::Query)?,
        task_id: parse_opt_uuid(row.try_get("task_id").map_err(query_err)?)?,
        user: user.map(UserId::new),
        timestamp: parse_datetime(&timestamp)?,
    })
}

fn row_to_error_detail(row: &SqliteRow) -> Result<ErrorDetail, RepositoryError> {
    let id: String = row.try_get("id").map_err(query_err)?;
    let event_id: String = row.try_get("event_id").map_err(query_err)?;
    let trace: String = row.try_get("trace").map_err(query_err)?;
    let line_number: Option<i64> = row.try_get("line_number").map_err(query_err)?;
    let offset: Option<i64> = row.try_get("column_offset").map_err(query_err)?;

    Ok(ErrorDetail {
        id: parse_uuid(&id)?,
        event_id: parse_uuid(&event_id)?,
        message: row.try_get("message").map_err(query_err)?,
        line_number: line_number.and_then(|n| u32::try_from(n).ok()),
        line_contents: row.try_get("line_contents").map_err(query_err)?,
        offset: offset.and_then(|n| u32::try_from(n).ok()),
        trace: parse_json(&trace, "trace")?,
    })
}

// ---------------------------------------------------------------------------
// Writes inside a transaction
// ---------------------------------------------------------------------------

async fn upsert_instance(
    tx: &mut Transaction<'_, Sqlite>,
    instance: &ProcessInstance,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "UPDATE process_instances
         SET status = ?, started_at = ?, ended_at = ?, updated_at = ?
         WHERE id = ?",
    )
    .bind(instance.status.as_str())
    .bind(instance.started_at.as_ref().map(format_datetime))
    .bind(instance.ended_at.as_ref().map(format_datetime))
    .bind(format_datetime(&instance.updated_at))
    .bind(instance.id.to_string())
    .execute(&mut **tx)
    .await
    .map_err(query_err)?;
    Ok(())
}

async fn upsert_process(
    tx: &mut Transaction<'_, Sqlite>,
    process: &BpmnProcess,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO bpmn_processes (id, instance_id, definition_id, parent_id, snapshot)
         VALUES (?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
             definition_id = excluded.definition_id,
             parent_id = excluded.parent_id,
             snapshot = excluded.snapshot",
    )
    .bind(process.id.to_string())
    .bind(process.instance_id.to_string())
    .bind(&process.definition_id)
    .bind(process.parent_id.map(|id| id.to_string()))
    .bind(to_json(&process.snapshot)?)
    .execute(&mut **tx)
    .await
    .map_err(query_err)?;
    Ok(())
}

async fn upsert_task(
    tx: &mut Transaction<'_, Sqlite>,
    instance_id: &Uuid,
    task: &Task,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO tasks (id, instance_id, process_id, definition_id, parent_id, state, sequence, end_sequence, data, started_at, ended_at, due_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
             process_id = excluded.process_id,
             parent_id = excluded.parent_id,
             state = excluded.state,
             sequence = excluded.sequence,
             end_sequence = excluded.end_sequence,
             data = excluded.data,
             started_at = excluded.started_at,
             ended_at = excluded.ended_at,
             due_at = excluded.due_at",
    )
    .bind(task.id.to_string())
    .bind(instance_id.to_string())
    .bind(task.process_id.to_string())
    .bind(&task.definition_id)
    .bind(task.parent_id.map(|id| id.to_string()))
    .bind(task.state.as_str())
    .bind(task.sequence)
    .bind(task.end_sequence)
    .bind(to_json(&task.data)?)
    .bind(task.started_at.as_ref().map(format_datetime))
    .bind(task.ended_at.as_ref().map(format_datetime))
    .bind(task.due_at.as_ref().map(format_datetime))
    .execute(&mut **tx)
    .await
    .map_err(query_err)?;
    Ok(())
}

async fn upsert_human_task(
    tx: &mut Transaction<'_, Sqlite>,
    human: &HumanTask,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO human_tasks (id, instance_id, task_id, task_name, task_title, lane_assignment, potential_owners, completed, completed_by, created_at, completed_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
             potential_owners = excluded.potential_owners,
             lane_assignment = excluded.lane_assignment,
             completed = excluded.completed,
             completed_by = excluded.completed_by,
             completed_at = excluded.completed_at",
    )
    .bind(human.id.to_string())
    .bind(human.instance_id.to_string())
    .bind(human.task_id.to_string())
    .bind(&human.task_name)
    .bind(&human.task_title)
    .bind(human.lane_assignment.as_ref().map(|g| g.as_str().to_string()))
    .bind(to_json(&human.potential_owners)?)
    .bind(i64::from(human.completed))
    .bind(human.completed_by.as_ref().map(|u| u.as_str().to_string()))
    .bind(format_datetime(&human.created_at))
    .bind(human.completed_at.as_ref().map(format_datetime))
    .execute(&mut **tx)
    .await
    .map_err(query_err)?;
    Ok(())
}

async fn delete_by_id(
    tx: &mut Transaction<'_, Sqlite>,
    sql: &str,
    ids: &[Uuid],
) -> Result<(), RepositoryError> {
    for id in ids {
        sqlx::query(sql)
            .bind(id.to_string())
            .execute(&mut **tx)
            .await
            .map_err(query_err)?;
    }
    Ok(())
}

impl ProcessInstanceRepository for SqliteInstanceRepository {
    async fn create_instance(&self, instance: &ProcessInstance) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO process_instances (id, model_id, model_version, status, owner, created_at, started_at, ended_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(instance.id.to_string())
        .bind(&instance.model_id)
        .bind(instance.model_version.to_string())
        .bind(instance.status.as_str())
        .bind(instance.owner.as_str())
        .bind(format_datetime(&instance.created_at))
        .bind(instance.started_at.as_ref().map(format_datetime))
        .bind(instance.ended_at.as_ref().map(format_datetime))
        .bind(format_datetime(&instance.updated_at))
        .execute(&self.pool.writer)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.message().contains("UNIQUE") => Err(
                RepositoryError::Conflict(format!("instance {} already exists", instance.id)),
            ),
            Err(e) => Err(query_err(e)),
        }
    }

    async fn get_instance(&self, id: &Uuid) -> Result<Option<ProcessInstance>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM process_instances WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;

        row.as_ref().map(row_to_instance).transpose()
    }

    async fn list_instances(
        &self,
        limit: Option<i64>,
        order: SortOrder,
    ) -> Result<Vec<ProcessInstance>, RepositoryError> {
        let direction = match order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        let mut sql =
            format!("SELECT * FROM process_instances ORDER BY created_at {direction}, id {direction}");
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;

        rows.iter().map(row_to_instance).collect()
    }

    async fn load_records(&self, id: &Uuid) -> Result<Option<InstanceRecords>, RepositoryError> {
        let Some(instance) = self.get_instance(id).await? else {
            return Ok(None);
        };
        let id = id.to_string();

        let processes = sqlx::query("SELECT * FROM bpmn_processes WHERE instance_id = ?")
            .bind(&id)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?
            .iter()
            .map(row_to_process)
            .collect::<Result<Vec<_>, _>>()?;

        let tasks = sqlx::query("SELECT * FROM tasks WHERE instance_id = ? ORDER BY sequence ASC")
            .bind(&id)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?
            .iter()
            .map(row_to_task)
            .collect::<Result<Vec<_>, _>>()?;

        let human_tasks = sqlx::query(
            "SELECT * FROM human_tasks WHERE instance_id = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(&id)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?
        .iter()
        .map(row_to_human_task)
        .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(InstanceRecords {
            instance,
            processes,
            tasks,
            human_tasks,
        }))
    }

    async fn apply_changes(
        &self,
        instance_id: &Uuid,
        changes: &ChangeSet,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;

        let exists: Option<(String,)> =
            sqlx::query_as("SELECT id FROM process_instances WHERE id = ?")
                .bind(instance_id.to_string())
                .fetch_optional(&mut *tx)
                .await
                .map_err(query_err)?;
        if exists.is_none() {
            return Err(RepositoryError::NotFound);
        }

        // Deletions first. Error details go with their events (ON DELETE CASCADE).
        delete_by_id(
            &mut tx,
            "DELETE FROM human_tasks WHERE id = ?",
            &changes.deleted_human_task_ids,
        )
        .await?;
        for task_ids in [&changes.deleted_task_ids, &changes.rewound_task_ids] {
            delete_by_id(
                &mut tx,
                "DELETE FROM process_instance_events WHERE task_id = ?",
                task_ids,
            )
            .await?;
        }
        delete_by_id(&mut tx, "DELETE FROM tasks WHERE id = ?", &changes.deleted_task_ids).await?;
        delete_by_id(
            &mut tx,
            "DELETE FROM bpmn_processes WHERE id = ?",
            &changes.deleted_process_ids,
        )
        .await?;

        if let Some(instance) = &changes.instance {
            upsert_instance(&mut tx, instance).await?;
        }
        for process in &changes.processes {
            upsert_process(&mut tx, process).await?;
        }
        for task in changes.inserted_tasks.iter().chain(&changes.updated_tasks) {
            upsert_task(&mut tx, instance_id, task).await?;
        }
        for human in &changes.human_tasks {
            upsert_human_task(&mut tx, human).await?;
        }

        tx.commit().await.map_err(query_err)?;
        tracing::trace!(%instance_id, rows = changes.len(), "change set applied");
        Ok(())
    }

    async fn append_event(
        &self,
        event: &ProcessInstanceEvent,
        detail: Option<&ErrorDetail>,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;

        sqlx::query(
            "INSERT INTO process_instance_events (id, instance_id, event_type, task_id, user_id, timestamp)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(event.id.to_string())
        .bind(event.instance_id.to_string())
        .bind(event.event_type.as_str())
        .bind(event.task_id.map(|id| id.to_string()))
        .bind(event.user.as_ref().map(|u| u.as_str().to_string()))
        .bind(format_datetime(&event.timestamp))
        .execute(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.message().contains("FOREIGN KEY") => {
                RepositoryError::NotFound
            }
            other => query_err(other),
        })?;

        if let Some(detail) = detail {
            sqlx::query(
                "INSERT INTO error_details (id, event_id, message, line_number, line_contents, column_offset, trace)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(detail.id.to_string())
            .bind(detail.event_id.to_string())
            .bind(&detail.message)
            .bind(detail.line_number.map(i64::from))
            .bind(&detail.line_contents)
            .bind(detail.offset.map(i64::from))
            .bind(to_json(&detail.trace)?)
            .execute(&mut *tx)
            .await
            .map_err(query_err)?;
        }

        tx.commit().await.map_err(query_err)?;
        Ok(())
    }

    async fn list_events(
        &self,
        instance_id: &Uuid,
    ) -> Result<Vec<ProcessInstanceEvent>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM process_instance_events WHERE instance_id = ? ORDER BY rowid ASC",
        )
        .bind(instance_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        rows.iter().map(row_to_event).collect()
    }

    async fn list_error_details(
        &self,
        instance_id: &Uuid,
    ) -> Result<Vec<ErrorDetail>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT d.* FROM error_details d
             JOIN process_instance_events e ON e.id = d.event_id
             WHERE e.instance_id = ?
             ORDER BY d.rowid ASC",
        )
        .bind(instance_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        rows.iter().map(row_to_error_detail).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::pool::test_pool;
    use serde_json::json;
    use tasklane_types::event::ProcessInstanceEventType;
    use tasklane_types::instance::{ProcessInstanceStatus, ProcessSnapshot};
    use tasklane_types::task::TaskState;

    fn make_instance() -> ProcessInstance {
        let now = Utc::now();
        ProcessInstance {
            id: Uuid::now_v7(),
            model_id: "lanes".to_string(),
            model_version: semver::Version::new(1, 0, 0),
            status: ProcessInstanceStatus::NotStarted,
            owner: UserId::new("testuser1"),
            created_at: now,
            started_at: None,
            ended_at: None,
            updated_at: now,
        }
    }

    fn make_process(instance: &ProcessInstance) -> BpmnProcess {
        BpmnProcess {
            id: Uuid::now_v7(),
            instance_id: instance.id,
            definition_id: "main".to_string(),
            parent_id: None,
            snapshot: ProcessSnapshot::default(),
        }
    }

    fn make_task(process: &BpmnProcess, name: &str, sequence: i64) -> Task {
        Task {
            id: Uuid::now_v7(),
            process_id: process.id,
            definition_id: name.to_string(),
            parent_id: None,
            state: TaskState::Ready,
            sequence,
            end_sequence: None,
            data: json!({"amount": 120, "note": "ok"}).as_object().cloned().unwrap(),
            started_at: None,
            ended_at: None,
            due_at: None,
        }
    }

    fn make_human_task(instance: &ProcessInstance, task: &Task) -> HumanTask {
        HumanTask {
            id: Uuid::now_v7(),
            instance_id: instance.id,
            task_id: task.id,
            task_name: task.definition_id.clone(),
            task_title: "Approve expense".to_string(),
            lane_assignment: Some(GroupId::new("Finance Team")),
            potential_owners: vec![UserId::new("testuser2"), UserId::new("testuser3")],
            completed: false,
            completed_by: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    fn make_event(instance: &ProcessInstance, task_id: Option<Uuid>) -> ProcessInstanceEvent {
        ProcessInstanceEvent {
            id: Uuid::now_v7(),
            instance_id: instance.id,
            event_type: ProcessInstanceEventType::TaskFailed,
            task_id,
            user: None,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_create_and_load_records() {
        let repo = SqliteInstanceRepository::new(test_pool().await);
        let instance = make_instance();
        repo.create_instance(&instance).await.unwrap();

        let process = make_process(&instance);
        let first = make_task(&process, "start", 1);
        let second = make_task(&process, "finance_approval", 2);
        let human = make_human_task(&instance, &second);
        let changes = ChangeSet {
            processes: vec![process.clone()],
            inserted_tasks: vec![second.clone(), first.clone()],
            human_tasks: vec![human.clone()],
            ..Default::default()
        };
        repo.apply_changes(&instance.id, &changes).await.unwrap();

        let records = repo.load_records(&instance.id).await.unwrap().unwrap();
        assert_eq!(records.instance, instance);
        assert_eq!(records.processes, vec![process]);
        assert_eq!(records.tasks, vec![first, second]);
        assert_eq!(records.human_tasks, vec![human]);
    }

    #[tokio::test]
    async fn test_duplicate_instance_conflicts() {
        let repo = SqliteInstanceRepository::new(test_pool().await);
        let instance = make_instance();
        repo.create_instance(&instance).await.unwrap();

        let err = repo.create_instance(&instance).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_apply_changes_to_unknown_instance() {
        let repo = SqliteInstanceRepository::new(test_pool().await);
        let err = repo
            .apply_changes(&Uuid::now_v7(), &ChangeSet::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));
        assert!(repo.load_records(&Uuid::now_v7()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_updates_and_status_changes_persist() {
        let repo = SqliteInstanceRepository::new(test_pool().await);
        let mut instance = make_instance();
        repo.create_instance(&instance).await.unwrap();
        let process = make_process(&instance);
        let mut task = make_task(&process, "start", 1);
        repo.apply_changes(
            &instance.id,
            &ChangeSet {
                processes: vec![process.clone()],
                inserted_tasks: vec![task.clone()],
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let now = Utc::now();
        instance.status = ProcessInstanceStatus::Complete;
        instance.started_at = Some(now);
        instance.ended_at = Some(now);
        task.state = TaskState::Completed;
        task.end_sequence = Some(2);
        task.ended_at = Some(now);
        let changes = ChangeSet {
            instance: Some(instance.clone()),
            updated_tasks: vec![task.clone()],
            ..Default::default()
        };
        repo.apply_changes(&instance.id, &changes).await.unwrap();
        // Applying the same change set again leaves storage unchanged
        repo.apply_changes(&instance.id, &changes).await.unwrap();

        let records = repo.load_records(&instance.id).await.unwrap().unwrap();
        assert_eq!(records.instance.status, ProcessInstanceStatus::Complete);
        assert_eq!(records.tasks, vec![task]);
    }

    #[tokio::test]
    async fn test_deleting_tasks_drops_their_events_and_details() {
        let repo = SqliteInstanceRepository::new(test_pool().await);
        let instance = make_instance();
        repo.create_instance(&instance).await.unwrap();
        let process = make_process(&instance);
        let kept = make_task(&process, "start", 1);
        let doomed = make_task(&process, "script_with_error", 2);
        let human = make_human_task(&instance, &doomed);
        repo.apply_changes(
            &instance.id,
            &ChangeSet {
                processes: vec![process.clone()],
                inserted_tasks: vec![kept.clone(), doomed.clone()],
                human_tasks: vec![human.clone()],
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let kept_event = make_event(&instance, Some(kept.id));
        let doomed_event = make_event(&instance, Some(doomed.id));
        let detail = ErrorDetail {
            id: Uuid::now_v7(),
            event_id: doomed_event.id,
            message: "NameError: name 'hey' is not defined".to_string(),
            line_number: Some(2),
            line_contents: Some("hey".to_string()),
            offset: Some(1),
            trace: vec!["line 2: hey".to_string()],
        };
        repo.append_event(&kept_event, None).await.unwrap();
        repo.append_event(&doomed_event, Some(&detail)).await.unwrap();
        assert_eq!(repo.list_error_details(&instance.id).await.unwrap(), vec![detail]);

        repo.apply_changes(
            &instance.id,
            &ChangeSet {
                deleted_task_ids: vec![doomed.id],
                deleted_human_task_ids: vec![human.id],
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(repo.list_events(&instance.id).await.unwrap(), vec![kept_event]);
        assert!(repo.list_error_details(&instance.id).await.unwrap().is_empty());
        let records = repo.load_records(&instance.id).await.unwrap().unwrap();
        assert_eq!(records.tasks, vec![kept]);
        assert!(records.human_tasks.is_empty());
    }

    #[tokio::test]
    async fn test_rewound_tasks_lose_their_events_but_stay() {
        let repo = SqliteInstanceRepository::new(test_pool().await);
        let instance = make_instance();
        repo.create_instance(&instance).await.unwrap();
        let process = make_process(&instance);
        let reopened = make_task(&process, "finance_approval", 1);
        repo.apply_changes(
            &instance.id,
            &ChangeSet {
                processes: vec![process.clone()],
                inserted_tasks: vec![reopened.clone()],
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let task_event = make_event(&instance, Some(reopened.id));
        let instance_event = make_event(&instance, None);
        repo.append_event(&task_event, None).await.unwrap();
        repo.append_event(&instance_event, None).await.unwrap();

        repo.apply_changes(
            &instance.id,
            &ChangeSet {
                rewound_task_ids: vec![reopened.id],
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(repo.list_events(&instance.id).await.unwrap(), vec![instance_event]);
        let records = repo.load_records(&instance.id).await.unwrap().unwrap();
        assert_eq!(records.tasks, vec![reopened]);
    }

    #[tokio::test]
    async fn test_deleting_a_process_removes_its_tasks() {
        let repo = SqliteInstanceRepository::new(test_pool().await);
        let instance = make_instance();
        repo.create_instance(&instance).await.unwrap();
        let root = make_process(&instance);
        let call = make_task(&root, "top_level_call_activity", 1);
        let child = BpmnProcess {
            id: call.id,
            instance_id: instance.id,
            definition_id: "level_2".to_string(),
            parent_id: Some(root.id),
            snapshot: ProcessSnapshot::default(),
        };
        let nested = make_task(&child, "start", 2);
        repo.apply_changes(
            &instance.id,
            &ChangeSet {
                processes: vec![root.clone(), child.clone()],
                inserted_tasks: vec![call.clone(), nested],
                ..Default::default()
            },
        )
        .await
        .unwrap();

        repo.apply_changes(
            &instance.id,
            &ChangeSet {
                deleted_process_ids: vec![child.id],
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let records = repo.load_records(&instance.id).await.unwrap().unwrap();
        assert_eq!(records.processes, vec![root]);
        assert_eq!(records.tasks, vec![call]);
    }

    #[tokio::test]
    async fn test_list_instances_order_and_limit() {
        let repo = SqliteInstanceRepository::new(test_pool().await);
        let mut ids = Vec::new();
        for offset in 0..3 {
            let mut instance = make_instance();
            instance.created_at += chrono::Duration::seconds(offset);
            repo.create_instance(&instance).await.unwrap();
            ids.push(instance.id);
        }

        let newest = repo.list_instances(Some(2), SortOrder::Desc).await.unwrap();
        assert_eq!(newest.iter().map(|i| i.id).collect::<Vec<_>>(), vec![ids[2], ids[1]]);

        let oldest = repo.list_instances(None, SortOrder::Asc).await.unwrap();
        assert_eq!(oldest.iter().map(|i| i.id).collect::<Vec<_>>(), ids);
    }

    #[tokio::test]
    async fn test_event_for_unknown_instance_is_not_found() {
        let repo = SqliteInstanceRepository::new(test_pool().await);
        let err = repo
            .append_event(&make_event(&make_instance(), None), None)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));
    }
}
