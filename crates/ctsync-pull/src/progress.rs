//! Progress store: `ct_log_infos(name, base_url, last_index)` in SQLite.
//! Owned exclusively by the progress writer; Pullers only ever reach it
//! through the progress-update queue.

use crate::error::ProgressError;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;

pub struct ProgressStore {
    pool: SqlitePool,
}

#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub name: String,
    pub base_url: String,
    pub last_index: i64,
}

impl ProgressStore {
    pub async fn open(path: &Path) -> Result<Self, ProgressError> {
        let opts = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
            .map_err(|source| ProgressError::Open {
                path: path.display().to_string(),
                source,
            })?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await
            .map_err(|source| ProgressError::Open {
                path: path.display().to_string(),
                source,
            })?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    #[cfg(test)]
    pub async fn open_in_memory() -> Result<Self, ProgressError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|source| ProgressError::Open {
                path: ":memory:".into(),
                source,
            })?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), ProgressError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ct_log_infos (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                base_url TEXT NOT NULL UNIQUE,
                last_index INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                deleted_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(ProgressError::Migrate)?;

        Ok(())
    }

    /// Loads the persisted checkpoint for `name`/`base_url`, inserting a
    /// fresh row seeded from `starting_index` if none exists yet. The
    /// persisted value always wins over the `starting_index` literal once a
    /// row exists.
    pub async fn load_or_init(
        &self,
        name: &str,
        base_url: &str,
        starting_index: i64,
    ) -> Result<Checkpoint, ProgressError> {
        if let Some(row) = sqlx::query_as::<_, (i64,)>(
            "SELECT last_index FROM ct_log_infos WHERE name = ?1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|source| ProgressError::Read {
            name: name.to_string(),
            source,
        })? {
            return Ok(Checkpoint {
                name: name.to_string(),
                base_url: base_url.to_string(),
                last_index: row.0,
            });
        }

        sqlx::query(
            "INSERT INTO ct_log_infos (name, base_url, last_index) VALUES (?1, ?2, ?3)",
        )
        .bind(name)
        .bind(base_url)
        .bind(starting_index)
        .execute(&self.pool)
        .await
        .map_err(|source| ProgressError::Write {
            name: name.to_string(),
            source,
        })?;

        Ok(Checkpoint {
            name: name.to_string(),
            base_url: base_url.to_string(),
            last_index: starting_index,
        })
    }

    /// Applies a single `(name, new_last_index)` update. Never moves the
    /// checkpoint backwards; a regression is logged and skipped rather than
    /// treated as an error.
    pub async fn apply_update(&self, name: &str, new_last_index: i64) -> Result<(), ProgressError> {
        let current: Option<(i64,)> =
            sqlx::query_as("SELECT last_index FROM ct_log_infos WHERE name = ?1")
                .bind(name)
                .fetch_optional(&self.pool)
                .await
                .map_err(|source| ProgressError::Read {
                    name: name.to_string(),
                    source,
                })?;

        let Some((current_index,)) = current else {
            tracing::warn!(log = name, "progress update for unknown log; dropping");
            return Ok(());
        };

        if new_last_index < current_index {
            tracing::warn!(
                log = name,
                current_index,
                new_last_index,
                "checkpoint regression observed; skipping update"
            );
            return Ok(());
        }

        sqlx::query(
            "UPDATE ct_log_infos SET last_index = ?1, updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE name = ?2",
        )
        .bind(new_last_index)
        .bind(name)
        .execute(&self.pool)
        .await
        .map_err(|source| ProgressError::Write {
            name: name.to_string(),
            source,
        })?;

        Ok(())
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn load_or_init_seeds_from_starting_index() {
        let store = ProgressStore::open_in_memory().await.unwrap();
        let cp = store.load_or_init("A", "https://a", 42).await.unwrap();
        assert_eq!(cp.last_index, 42);

        // Second load returns the persisted value, not a fresh starting_index.
        let cp2 = store.load_or_init("A", "https://a", 999).await.unwrap();
        assert_eq!(cp2.last_index, 42);
    }

    #[tokio::test]
    async fn apply_update_advances_checkpoint() {
        let store = ProgressStore::open_in_memory().await.unwrap();
        store.load_or_init("A", "https://a", 0).await.unwrap();
        store.apply_update("A", 10).await.unwrap();
        let cp = store.load_or_init("A", "https://a", 0).await.unwrap();
        assert_eq!(cp.last_index, 10);
    }

    #[tokio::test]
    async fn apply_update_rejects_regression() {
        let store = ProgressStore::open_in_memory().await.unwrap();
        store.load_or_init("A", "https://a", 10).await.unwrap();
        store.apply_update("A", 3).await.unwrap();
        let cp = store.load_or_init("A", "https://a", 0).await.unwrap();
        assert_eq!(cp.last_index, 10);
    }

    #[tokio::test]
    async fn apply_update_for_unknown_log_is_a_noop() {
        let store = ProgressStore::open_in_memory().await.unwrap();
        store.apply_update("ghost", 5).await.unwrap();
    }
}
