//! Durable cross-session flags.
//!
//! The store is advisory: opening, reading and writing never fail from the
//! caller's point of view. A store that could not be opened behaves as an
//! empty one and drops writes, logging each failure.
//!
//! Flags live in the `app_state` table, which cache eviction never touches.

use crate::storage::Database;

/// Key recording that the app was installed to the home screen.
pub const INSTALLED_FLAG: &str = "installed";

#[derive(Clone)]
pub struct LocalStore {
    db: Option<Database>,
}

impl LocalStore {
    /// Open the store at `path`. Failure yields a store that holds nothing.
    pub async fn open(path: &str) -> Self {
        match Database::open(path).await {
            Ok(db) => Self { db: Some(db) },
            Err(e) => {
                tracing::warn!(path, error = %e, "Failed to open local store, flags unavailable");
                Self { db: None }
            }
        }
    }

    /// Share an already-open database.
    pub fn from_database(db: Database) -> Self {
        Self { db: Some(db) }
    }

    /// A store with no backing database.
    pub fn unavailable() -> Self {
        Self { db: None }
    }

    pub fn is_available(&self) -> bool {
        self.db.is_some()
    }

    /// Write a flag. Failures are logged and swallowed.
    pub async fn set_flag(&self, key: &str, value: bool) {
        let Some(db) = &self.db else {
            tracing::warn!(key, "Local store unavailable, flag not saved");
            return;
        };
        if let Err(e) = db.set_app_state(key, if value { "true" } else { "false" }).await {
            tracing::warn!(key, error = %e, "Failed to save flag");
        }
    }

    /// Read a flag. Missing keys, unreadable values and store failures all
    /// yield `None`.
    pub async fn get_flag(&self, key: &str) -> Option<bool> {
        let db = self.db.as_ref()?;
        match db.get_app_state(key).await {
            Ok(Some(value)) => match value.as_str() {
                "true" => Some(true),
                "false" => Some(false),
                other => {
                    tracing::warn!(key, value = other, "Ignoring non-boolean flag value");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(key, error = %e, "Failed to read flag");
                None
            }
        }
    }

    /// Whether the app has been installed. Absent counts as not installed.
    pub async fn is_installed(&self) -> bool {
        self.get_flag(INSTALLED_FLAG).await.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_and_get_flag() {
        let store = LocalStore::open(":memory:").await;
        assert!(store.is_available());
        assert_eq!(store.get_flag(INSTALLED_FLAG).await, None);
        assert!(!store.is_installed().await);

        store.set_flag(INSTALLED_FLAG, true).await;
        assert_eq!(store.get_flag(INSTALLED_FLAG).await, Some(true));
        assert!(store.is_installed().await);

        store.set_flag(INSTALLED_FLAG, false).await;
        assert_eq!(store.get_flag(INSTALLED_FLAG).await, Some(false));
    }

    #[tokio::test]
    async fn test_open_failure_is_absent() {
        let store = LocalStore::open("/nonexistent-dir/definitely/missing/app.db").await;
        assert!(!store.is_available());
        store.set_flag(INSTALLED_FLAG, true).await;
        assert_eq!(store.get_flag(INSTALLED_FLAG).await, None);
    }

    #[tokio::test]
    async fn test_closed_database_reads_absent() {
        let db = Database::open(":memory:").await.unwrap();
        let store = LocalStore::from_database(db.clone());
        store.set_flag(INSTALLED_FLAG, true).await;

        db.close().await;
        assert_eq!(store.get_flag(INSTALLED_FLAG).await, None);
        // Must not panic or propagate
        store.set_flag(INSTALLED_FLAG, false).await;
    }

    #[tokio::test]
    async fn test_non_boolean_value_is_absent() {
        let db = Database::open(":memory:").await.unwrap();
        db.set_app_state(INSTALLED_FLAG, "maybe").await.unwrap();
        let store = LocalStore::from_database(db);
        assert_eq!(store.get_flag(INSTALLED_FLAG).await, None);
    }
}
