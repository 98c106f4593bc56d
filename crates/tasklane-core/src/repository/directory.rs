//! User and group directory port.

use tasklane_types::error::RepositoryError;
use tasklane_types::identity::{GroupId, User, UserId};

/// Read access to users and groups.
///
/// Group membership is resolved at the moment a human task is created, so
/// later membership changes do not affect existing tasks.
pub trait Directory: Send + Sync {
    fn find_user(
        &self,
        id: &UserId,
    ) -> impl std::future::Future<Output = Result<Option<User>, RepositoryError>> + Send;

    /// Members of a group in insertion order. `None` if the group does not exist.
    fn group_members(
        &self,
        id: &GroupId,
    ) -> impl std::future::Future<Output = Result<Option<Vec<UserId>>, RepositoryError>> + Send;
}
