use std::fmt;

use serde::{Deserialize, Serialize};

/// A user identifier as known to the directory (usually a login name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A group identifier, used by statically bound lanes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub String);

impl GroupId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for GroupId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A user as reported by the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    /// Display name shown in CLI output.
    pub display_name: String,
    /// Administrators may complete any human task.
    #[serde(default)]
    pub is_admin: bool,
}

impl User {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: UserId::new(id),
            display_name: display_name.into(),
            is_admin: false,
        }
    }
}

/// A named group of users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    /// Members in insertion order.
    #[serde(default)]
    pub members: Vec<UserId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_serializes_as_plain_string() {
        let id = UserId::new("testuser2");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"testuser2\"");
        let parsed: UserId = serde_json::from_str("\"testuser3\"").unwrap();
        assert_eq!(parsed.as_str(), "testuser3");
    }

    #[test]
    fn test_group_id_display() {
        assert_eq!(GroupId::from("Finance Team").to_string(), "Finance Team");
    }

    #[test]
    fn test_user_defaults_to_non_admin() {
        let user: User =
            serde_json::from_str(r#"{"id":"alice","display_name":"Alice"}"#).unwrap();
        assert!(!user.is_admin);
    }
}
