//! SQLite user and group directory.
//!
//! Implements the `Directory` port for lane assignment and also offers the
//! write operations the CLI uses to manage users and groups.

use sqlx::Row;
use tasklane_core::repository::directory::Directory;
use tasklane_types::error::RepositoryError;
use tasklane_types::identity::{Group, GroupId, User, UserId};

use super::pool::DatabasePool;

pub struct SqliteDirectory {
    pool: DatabasePool,
}

impl SqliteDirectory {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Insert or update a user.
    pub async fn upsert_user(&self, user: &User) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO users (id, display_name, is_admin) VALUES (?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 display_name = excluded.display_name,
                 is_admin = excluded.is_admin",
        )
        .bind(user.id.as_str())
        .bind(&user.display_name)
        .bind(i64::from(user.is_admin))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
        Ok(())
    }

    pub async fn list_users(&self) -> Result<Vec<User>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM users ORDER BY id ASC")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows.iter().map(row_to_user).collect()
    }

    /// Create a group or replace its name and member list.
    ///
    /// Every member must already exist; unknown members yield `NotFound`.
    pub async fn upsert_group(&self, group: &Group) -> Result<(), RepositoryError> {
        let mut tx = self
            .pool
            .writer
            .begin()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        sqlx::query(
            "INSERT INTO groups (id, name) VALUES (?, ?)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name",
        )
        .bind(group.id.as_str())
        .bind(&group.name)
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        sqlx::query("DELETE FROM group_members WHERE group_id = ?")
            .bind(group.id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        for (position, member) in group.members.iter().enumerate() {
            sqlx::query("INSERT INTO group_members (group_id, user_id, position) VALUES (?, ?, ?)")
                .bind(group.id.as_str())
                .bind(member.as_str())
                .bind(position as i64)
                .execute(&mut *tx)
                .await
                .map_err(|e| match e {
                    sqlx::Error::Database(ref db_err)
                        if db_err.message().contains("FOREIGN KEY") =>
                    {
                        RepositoryError::NotFound
                    }
                    other => RepositoryError::Query(other.to_string()),
                })?;
        }

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        Ok(())
    }

    pub async fn list_groups(&self) -> Result<Vec<Group>, RepositoryError> {
        let rows = sqlx::query("SELECT id, name FROM groups ORDER BY id ASC")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut groups = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row
                .try_get("id")
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            let name: String = row
                .try_get("name")
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            let id = GroupId::new(id);
            let members = self.group_members(&id).await?.unwrap_or_default();
            groups.push(Group { id, name, members });
        }
        Ok(groups)
    }
}

fn row_to_user(row: &sqlx::sqlite::SqliteRow) -> Result<User, RepositoryError> {
    let id: String = row
        .try_get("id")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let is_admin: i64 = row
        .try_get("is_admin")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    Ok(User {
        id: UserId::new(id),
        display_name: row
            .try_get("display_name")
            .map_err(|e| RepositoryError::Query(e.to_string()))?,
        is_admin: is_admin != 0,
    })
}

impl Directory for SqliteDirectory {
    async fn find_user(&self, id: &UserId) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM users WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        row.as_ref().map(row_to_user).transpose()
    }

    async fn group_members(&self, id: &GroupId) -> Result<Option<Vec<UserId>>, RepositoryError> {
        let exists = sqlx::query("SELECT id FROM groups WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        if exists.is_none() {
            return Ok(None);
        }

        let members: Vec<(String,)> = sqlx::query_as(
            "SELECT user_id FROM group_members WHERE group_id = ? ORDER BY position ASC",
        )
        .bind(id.as_str())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(Some(members.into_iter().map(|(id,)| UserId::new(id)).collect()))
    }
}
