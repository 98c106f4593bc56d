//! Engine error taxonomy.
//!
//! `EngineError` is what the service facade returns. Only `Execution` is an
//! expected business outcome; every other variant is a caller, authorization
//! or storage problem and is never retried.

use tasklane_types::error::RepositoryError;
use tasklane_types::identity::UserId;
use tasklane_types::instance::ProcessInstanceStatus;
use thiserror::Error;
use uuid::Uuid;

use crate::engine::executor::ExecutionFailure;
use crate::engine::persistence::PersistenceError;
use crate::engine::reset::ResetError;
use crate::model::ModelError;

/// The caller asked for something the instance cannot do right now.
#[derive(Debug, Error)]
pub enum UsageError {
    #[error("process instance not found: {0}")]
    InstanceNotFound(Uuid),

    #[error("process model not found: {0}")]
    ModelNotFound(String),

    #[error("task {0} not found in instance history")]
    UnknownTask(Uuid),

    #[error("task {0} is not awaiting input")]
    TaskNotAwaitingInput(Uuid),

    #[error("process instance {0} is suspended")]
    InstanceSuspended(Uuid),

    #[error("process instance {0} is {1}")]
    InstanceFinished(Uuid, ProcessInstanceStatus),

    #[error("cannot move process instance from {from} to {to}")]
    InvalidTransition {
        from: ProcessInstanceStatus,
        to: ProcessInstanceStatus,
    },

    #[error("unknown user '{0}'")]
    UnknownUser(UserId),
}

#[derive(Debug, Error)]
pub enum EngineError {
    /// A task failed while running. The instance is in the `error` status.
    #[error(transparent)]
    Execution(#[from] ExecutionFailure),

    #[error("user '{user}' may not complete task '{task_name}'")]
    AccessDenied { user: UserId, task_name: String },

    #[error(transparent)]
    Usage(#[from] UsageError),

    #[error(transparent)]
    Persistence(PersistenceError),

    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Model(#[from] ModelError),
}

impl EngineError {
    /// True for failures the process itself produced, as opposed to misuse.
    pub fn is_business_failure(&self) -> bool {
        matches!(self, EngineError::Execution(_))
    }
}

impl From<PersistenceError> for EngineError {
    fn from(err: PersistenceError) -> Self {
        match err {
            PersistenceError::InstanceNotFound(id) => {
                EngineError::Usage(UsageError::InstanceNotFound(id))
            }
            PersistenceError::Repository(e) => EngineError::Repository(e),
            other => EngineError::Persistence(other),
        }
    }
}

impl From<ResetError> for EngineError {
    fn from(err: ResetError) -> Self {
        match err {
            ResetError::UnknownTask(id) => EngineError::Usage(UsageError::UnknownTask(id)),
            timer @ ResetError::Timer(_) => {
                EngineError::Model(ModelError::ValidationError(timer.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_execution_failures_are_business_failures() {
        let denied = EngineError::AccessDenied {
            user: UserId::new("testuser4"),
            task_name: "finance_approval".to_string(),
        };
        assert!(!denied.is_business_failure());
        assert_eq!(
            denied.to_string(),
            "user 'testuser4' may not complete task 'finance_approval'"
        );

        let failure = EngineError::from(ExecutionFailure {
            task_id: Uuid::now_v7(),
            task_name: "script_with_error".to_string(),
            process_id: "main".to_string(),
            cause: crate::engine::executor::FailureCause::NoFlowTaken,
        });
        assert!(failure.is_business_failure());
    }

    #[test]
    fn test_missing_instance_is_a_usage_error() {
        let id = Uuid::now_v7();
        let err = EngineError::from(PersistenceError::InstanceNotFound(id));
        assert!(matches!(err, EngineError::Usage(UsageError::InstanceNotFound(i)) if i == id));

        let err = EngineError::from(PersistenceError::Inconsistent("missing root".to_string()));
        assert!(matches!(err, EngineError::Persistence(_)));
    }
}
