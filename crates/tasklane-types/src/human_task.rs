use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::identity::{GroupId, UserId};

/// A task awaiting a human actor.
///
/// Created when control reaches a user or manual task. Owners are resolved
/// once, at creation; a loop back into the same lane creates a new row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanTask {
    pub id: Uuid,
    pub instance_id: Uuid,
    /// The underlying task occurrence.
    pub task_id: Uuid,
    /// Symbolic identifier of the task definition.
    pub task_name: String,
    /// Display name of the task definition.
    pub task_title: String,
    /// Group the lane was bound to. `None` for initiator and expression lanes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lane_assignment: Option<GroupId>,
    /// Ordered, distinct users allowed to complete the task.
    pub potential_owners: Vec<UserId>,
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl HumanTask {
    pub fn is_potential_owner(&self, user: &UserId) -> bool {
        self.potential_owners.iter().any(|u| u == user)
    }
}
