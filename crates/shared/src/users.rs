//! Username → user id resolution.

use crate::db::Database;
use crate::error::{is_unique_violation, Missing, StorageContext, TrackerError};
use crate::models::User;
use crate::Result;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct UserStore {
    db: Database,
}

impl UserStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a user with a fresh opaque id; `Conflict` if the name is taken
    pub fn register(&self, username: &str) -> Result<User> {
        let user = User {
            user_id: Uuid::new_v4().to_string(),
            username: username.to_string(),
            created_at: Utc::now(),
        };

        match self.db.conn().execute(
            "INSERT INTO users (user_id, username, created_at) VALUES (?1, ?2, ?3)",
            params![user.user_id, user.username, user.created_at],
        ) {
            Ok(_) => {
                info!(user_id = %user.user_id, username, "Registered user");
                Ok(user)
            }
            Err(e) if is_unique_violation(&e) => {
                Err(TrackerError::Conflict(format!("username '{}' is taken", username)))
            }
            Err(e) => Err(e).during("inserting user"),
        }
    }

    pub fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        self.db
            .conn()
            .query_row(
                "SELECT user_id, username, created_at FROM users WHERE username = ?1",
                params![username],
                |row| {
                    Ok(User {
                        user_id: row.get(0)?,
                        username: row.get(1)?,
                        created_at: row.get(2)?,
                    })
                },
            )
            .optional()
            .during("looking up user")
    }

    /// Resolve a username, `NotFound` when unknown
    pub fn resolve(&self, username: &str) -> Result<User> {
        self.find_by_username(username)?
            .ok_or_else(|| TrackerError::NotFound(Missing::User(username.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_register_and_resolve() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let store = UserStore::new(Database::open(temp_dir.path().join("test.db"))?);

        let user = store.register("alice")?;
        assert_eq!(store.resolve("alice")?, user);
        assert!(matches!(store.register("alice").unwrap_err(), TrackerError::Conflict(_)));
        assert!(matches!(
            store.resolve("bob").unwrap_err(),
            TrackerError::NotFound(Missing::User(name)) if name == "bob"
        ));

        Ok(())
    }
}
