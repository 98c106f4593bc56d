//! Human task owner resolution.
//!
//! When a user or manual task becomes ready, its lane decides who may
//! complete it:
//!
//! - no lane, or an `initiator` lane: the instance owner
//! - a `group` lane: the group's members at this moment
//! - an `expression` lane: whatever the lane expression yields against the
//!   task data, which may be a single user, a list of users, or a mapping of
//!   lane name to users
//!
//! Owners are resolved once. Changing group membership or task data later
//! does not reassign an existing human task.

use std::sync::Arc;

use serde_json::{Map, Value};
use tasklane_types::definition::{LaneBinding, ProcessDefinition, TaskDefinition};
use tasklane_types::error::RepositoryError;
use tasklane_types::human_task::HumanTask;
use tasklane_types::identity::{GroupId, UserId};
use thiserror::Error;

use super::script::{ScriptContext, ScriptEngine, ScriptError};
use crate::repository::directory::Directory;

#[derive(Debug, Error)]
pub enum AssignmentError {
    #[error("lane expression failed: {0}")]
    Expression(#[from] ScriptError),

    #[error("lane '{lane}' expression must yield a user, a list of users or a mapping, got {found}")]
    InvalidOwnerValue { lane: String, found: String },

    #[error("lane '{0}' resolved to no users")]
    EmptyOwners(String),

    #[error("unknown user '{0}'")]
    UnknownUser(UserId),

    #[error("unknown group '{0}'")]
    UnknownGroup(GroupId),

    #[error("unknown lane '{0}'")]
    UnknownLane(String),

    #[error(transparent)]
    Directory(#[from] RepositoryError),
}

/// Shape of a lane expression result.
#[derive(Debug, Clone, PartialEq)]
pub enum OwnerSpec {
    Single(UserId),
    List(Vec<UserId>),
    /// Lane name to users, in key order.
    Mapping(Vec<(String, Vec<UserId>)>),
}

impl OwnerSpec {
    pub fn from_value(lane: &str, value: &Value) -> Result<Self, AssignmentError> {
        let invalid = |found: &Value| AssignmentError::InvalidOwnerValue {
            lane: lane.to_string(),
            found: found.to_string(),
        };
        let users = |value: &Value| -> Result<Vec<UserId>, AssignmentError> {
            match value {
                Value::String(s) => Ok(vec![UserId::new(s.as_str())]),
                Value::Array(items) => items
                    .iter()
                    .map(|item| item.as_str().map(UserId::new).ok_or_else(|| invalid(item)))
                    .collect(),
                other => Err(invalid(other)),
            }
        };

        match value {
            Value::String(s) => Ok(OwnerSpec::Single(UserId::new(s.as_str()))),
            Value::Array(_) => users(value).map(OwnerSpec::List),
            Value::Object(map) => map
                .iter()
                .map(|(key, v)| users(v).map(|u| (key.clone(), u)))
                .collect::<Result<Vec<_>, _>>()
                .map(OwnerSpec::Mapping),
            other => Err(invalid(other)),
        }
    }

    /// Flatten to distinct users in first-seen order. A mapping contributes
    /// only the entry named after `lane` when one exists, otherwise every
    /// entry.
    pub fn into_owners(self, lane: &str) -> Vec<UserId> {
        let all = match self {
            OwnerSpec::Single(user) => vec![user],
            OwnerSpec::List(users) => users,
            OwnerSpec::Mapping(entries) => {
                match entries.iter().position(|(key, _)| key == lane) {
                    Some(idx) => entries.into_iter().nth(idx).map(|(_, u)| u).unwrap_or_default(),
                    None => entries.into_iter().flat_map(|(_, u)| u).collect(),
                }
            }
        };
        distinct(all)
    }
}

fn distinct(users: Vec<UserId>) -> Vec<UserId> {
    let mut out: Vec<UserId> = Vec::with_capacity(users.len());
    for user in users {
        if !out.contains(&user) {
            out.push(user);
        }
    }
    out
}

/// Outcome of resolving a task's lane.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    /// Set for group lanes only.
    pub lane_group: Option<GroupId>,
    pub owners: Vec<UserId>,
}

pub struct HumanTaskResolver<D: Directory> {
    directory: D,
    scripts: Arc<ScriptEngine>,
}

impl<D: Directory> HumanTaskResolver<D> {
    pub fn new(directory: D, scripts: Arc<ScriptEngine>) -> Self {
        Self { directory, scripts }
    }

    pub fn directory(&self) -> &D {
        &self.directory
    }

    /// Resolve the potential owners of a human task becoming ready.
    pub async fn resolve(
        &self,
        process: &ProcessDefinition,
        task: &TaskDefinition,
        data: &Map<String, Value>,
        initiator: &UserId,
        ctx: &ScriptContext,
    ) -> Result<Assignment, AssignmentError> {
        let Some(lane_name) = task.lane.as_deref() else {
            return Ok(Assignment {
                lane_group: None,
                owners: vec![initiator.clone()],
            });
        };
        let lane = process
            .lane(lane_name)
            .ok_or_else(|| AssignmentError::UnknownLane(lane_name.to_string()))?;

        let assignment = match &lane.binding {
            LaneBinding::Initiator => Assignment {
                lane_group: None,
                owners: vec![initiator.clone()],
            },
            LaneBinding::Group { group } => {
                let members = self
                    .directory
                    .group_members(group)
                    .await?
                    .ok_or_else(|| AssignmentError::UnknownGroup(group.clone()))?;
                Assignment {
                    lane_group: Some(group.clone()),
                    owners: distinct(members),
                }
            }
            LaneBinding::Expression { expression } => {
                let value = self.scripts.evaluate(expression, data, ctx)?;
                Assignment {
                    lane_group: None,
                    owners: OwnerSpec::from_value(lane_name, &value)?.into_owners(lane_name),
                }
            }
        };

        if assignment.owners.is_empty() {
            return Err(AssignmentError::EmptyOwners(lane_name.to_string()));
        }
        for owner in &assignment.owners {
            if self.directory.find_user(owner).await?.is_none() {
                return Err(AssignmentError::UnknownUser(owner.clone()));
            }
        }
        tracing::debug!(
            lane = lane_name,
            task = %task.id,
            owners = assignment.owners.len(),
            "lane resolved"
        );
        Ok(assignment)
    }

    /// Potential owners and administrators may complete a human task.
    pub async fn can_complete(&self, human: &HumanTask, user: &UserId) -> Result<bool, RepositoryError> {
        if human.is_potential_owner(user) {
            return Ok(true);
        }
        Ok(self
            .directory
            .find_user(user)
            .await?
            .is_some_and(|u| u.is_admin))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures;
    use crate::repository::memory::StaticDirectory;
    use serde_json::json;
    use tasklane_types::identity::User;
    use uuid::Uuid;

    fn users(ids: &[&str]) -> Vec<UserId> {
        ids.iter().map(|id| UserId::new(*id)).collect()
    }

    fn directory() -> StaticDirectory {
        StaticDirectory::new()
            .with_user(User::new("testuser1", "Test User 1"))
            .with_user(User::new("testuser2", "Test User 2"))
            .with_user(User::new("testuser3", "Test User 3"))
            .with_user(User::new("testuser4", "Test User 4"))
            .with_admin("admin")
            .with_group("Finance Team", &["testuser2", "testuser3", "testuser2"])
            .with_group("Empty", &[])
    }

    fn ctx() -> ScriptContext {
        ScriptContext {
            instance_id: Uuid::now_v7(),
            model_id: "test".to_string(),
            process_id: "main".to_string(),
            task_name: "review".to_string(),
        }
    }

    #[test]
    fn test_owner_spec_shapes() {
        let single = OwnerSpec::from_value("Reviewers", &json!("testuser2")).unwrap();
        assert_eq!(single.into_owners("Reviewers"), users(&["testuser2"]));

        let list = OwnerSpec::from_value("Reviewers", &json!(["testuser3", "testuser4", "testuser3"]))
            .unwrap();
        assert_eq!(list.into_owners("Reviewers"), users(&["testuser3", "testuser4"]));
    }

    #[test]
    fn test_owner_mapping_prefers_own_lane() {
        let value = json!({"Reviewers": ["testuser3", "testuser4", "testuser3"], "Others": ["testuser2"]});
        let owners_spec = OwnerSpec::from_value("Reviewers", &value).unwrap();
        assert_eq!(owners_spec.into_owners("Reviewers"), users(&["testuser3", "testuser4"]));

        let value = json!({"Escalation": ["testuser4"]});
        let owners_spec = OwnerSpec::from_value("Reviewers", &value).unwrap();
        assert_eq!(owners_spec.into_owners("Reviewers"), users(&["testuser4"]));
    }

    #[test]
    fn test_owner_spec_rejects_non_user_values() {
        assert!(matches!(
            OwnerSpec::from_value("Reviewers", &json!(42)),
            Err(AssignmentError::InvalidOwnerValue { .. })
        ));
        assert!(matches!(
            OwnerSpec::from_value("Reviewers", &json!(["testuser2", 7])),
            Err(AssignmentError::InvalidOwnerValue { .. })
        ));
        assert!(matches!(
            OwnerSpec::from_value("Reviewers", &json!({"Reviewers": true})),
            Err(AssignmentError::InvalidOwnerValue { .. })
        ));
    }

    #[tokio::test]
    async fn test_initiator_and_group_lanes() {
        let model = fixtures::model(fixtures::LANES_YAML);
        let process = model.primary().unwrap();
        let resolver = HumanTaskResolver::new(directory(), Arc::new(ScriptEngine::new()));
        let initiator = UserId::new("testuser1");

        let first = resolver
            .resolve(process, process.task("initiator_one").unwrap(), &Map::new(), &initiator, &ctx())
            .await
            .unwrap();
        assert_eq!(first.owners, users(&["testuser1"]));
        assert!(first.lane_group.is_none());

        let approval = resolver
            .resolve(process, process.task("finance_approval").unwrap(), &Map::new(), &initiator, &ctx())
            .await
            .unwrap();
        assert_eq!(approval.lane_group, Some(GroupId::new("Finance Team")));
        assert_eq!(approval.owners, users(&["testuser2", "testuser3"]));
    }

    #[tokio::test]
    async fn test_expression_lane_against_task_data() {
        let model = fixtures::model(fixtures::DYNAMIC_LANES_YAML);
        let process = model.primary().unwrap();
        let resolver = HumanTaskResolver::new(directory(), Arc::new(ScriptEngine::new()));
        let data = json!({
            "lane_owners": {"Reviewers": ["testuser3", "testuser4", "testuser3"], "Others": ["testuser2"]},
            "auditor": "testuser2"
        });
        let data = data.as_object().unwrap();

        let review = resolver
            .resolve(process, process.task("review_one").unwrap(), data, &UserId::new("testuser1"), &ctx())
            .await
            .unwrap();
        assert_eq!(review.owners, users(&["testuser3", "testuser4"]));

        let audit = resolver
            .resolve(process, process.task("final_review").unwrap(), data, &UserId::new("testuser1"), &ctx())
            .await
            .unwrap();
        assert_eq!(audit.owners, users(&["testuser2"]));
    }

    #[tokio::test]
    async fn test_unresolvable_owners_are_errors() {
        let model = fixtures::model(fixtures::DYNAMIC_LANES_YAML);
        let process = model.primary().unwrap();
        let resolver = HumanTaskResolver::new(directory(), Arc::new(ScriptEngine::new()));
        let task = process.task("final_review").unwrap();
        let initiator = UserId::new("testuser1");

        let missing = resolver
            .resolve(process, task, &Map::new(), &initiator, &ctx())
            .await
            .unwrap_err();
        assert!(matches!(missing, AssignmentError::Expression(_)));

        let data = json!({"auditor": "ghost"});
        let unknown = resolver
            .resolve(process, task, data.as_object().unwrap(), &initiator, &ctx())
            .await
            .unwrap_err();
        assert!(matches!(unknown, AssignmentError::UnknownUser(ref u) if u.as_str() == "ghost"));

        let data = json!({"auditor": []});
        let empty = resolver
            .resolve(process, task, data.as_object().unwrap(), &initiator, &ctx())
            .await
            .unwrap_err();
        assert!(matches!(empty, AssignmentError::EmptyOwners(_)));
    }

    #[tokio::test]
    async fn test_admin_may_complete_any_task() {
        let resolver = HumanTaskResolver::new(directory(), Arc::new(ScriptEngine::new()));
        let human = HumanTask {
            id: Uuid::now_v7(),
            instance_id: Uuid::now_v7(),
            task_id: Uuid::now_v7(),
            task_name: "final_review".to_string(),
            task_title: "final_review".to_string(),
            lane_assignment: None,
            potential_owners: users(&["testuser2"]),
            completed: false,
            completed_by: None,
            created_at: chrono::Utc::now(),
            completed_at: None,
        };

        assert!(resolver.can_complete(&human, &UserId::new("testuser2")).await.unwrap());
        assert!(resolver.can_complete(&human, &UserId::new("admin")).await.unwrap());
        assert!(!resolver.can_complete(&human, &UserId::new("testuser3")).await.unwrap());
        assert!(!resolver.can_complete(&human, &UserId::new("ghost")).await.unwrap());
    }
}
