//! Append-only instance event log.

use chrono::{DateTime, Utc};
use tasklane_types::error::RepositoryError;
use tasklane_types::event::{ErrorDetail, ProcessInstanceEvent, ProcessInstanceEventType};
use tasklane_types::identity::UserId;
use uuid::Uuid;

use super::executor::{ExecutionFailure, FailureCause};
use crate::repository::instance::ProcessInstanceRepository;

/// Writes events and error details for one repository.
pub struct EventRecorder<'a, R: ProcessInstanceRepository> {
    repo: &'a R,
}

impl<'a, R: ProcessInstanceRepository> EventRecorder<'a, R> {
    pub fn new(repo: &'a R) -> Self {
        Self { repo }
    }

    pub async fn record(
        &self,
        instance_id: Uuid,
        event_type: ProcessInstanceEventType,
        task_id: Option<Uuid>,
        user: Option<&UserId>,
        now: DateTime<Utc>,
    ) -> Result<ProcessInstanceEvent, RepositoryError> {
        let event = ProcessInstanceEvent {
            id: Uuid::now_v7(),
            instance_id,
            event_type,
            task_id,
            user: user.cloned(),
            timestamp: now,
        };
        self.repo.append_event(&event, None).await?;
        tracing::debug!(%instance_id, event = %event_type, "event recorded");
        Ok(event)
    }

    /// Record a task failure together with its error detail.
    pub async fn record_failure(
        &self,
        instance_id: Uuid,
        failure: &ExecutionFailure,
        now: DateTime<Utc>,
    ) -> Result<ErrorDetail, RepositoryError> {
        let event = ProcessInstanceEvent {
            id: Uuid::now_v7(),
            instance_id,
            event_type: ProcessInstanceEventType::TaskFailed,
            task_id: Some(failure.task_id),
            user: None,
            timestamp: now,
        };
        let detail = error_detail(event.id, failure);
        self.repo.append_event(&event, Some(&detail)).await?;
        tracing::warn!(
            %instance_id,
            task = %failure.task_name,
            process = %failure.process_id,
            error = %detail.message,
            "task failed"
        );
        Ok(detail)
    }
}

fn error_detail(event_id: Uuid, failure: &ExecutionFailure) -> ErrorDetail {
    match &failure.cause {
        FailureCause::Script(error) => ErrorDetail {
            id: Uuid::now_v7(),
            event_id,
            message: error.message.clone(),
            line_number: Some(error.line_number),
            line_contents: Some(error.line_contents.clone()),
            offset: error.offset,
            trace: error.trace.clone(),
        },
        other => ErrorDetail {
            id: Uuid::now_v7(),
            event_id,
            message: other.to_string(),
            line_number: None,
            line_contents: None,
            offset: None,
            trace: vec![format!(
                "task '{}' in process '{}'",
                failure.task_name, failure.process_id
            )],
        },
    }
}
