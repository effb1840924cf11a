use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::DatabaseError;

// ============================================================================
// Database
// ============================================================================

/// Handle to the podcast catalog.
///
/// Cheap to clone; every clone shares the same connection pool. Constructed
/// once per run and passed to each component that needs it.
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Open a database connection and run migrations
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::InstanceLocked` if another process holds the
    /// database locked (SQLITE_BUSY, SQLITE_LOCKED).
    /// Returns `DatabaseError::CannotOpen` if the file cannot be opened or
    /// created (SQLITE_CANTOPEN).
    /// Returns `DatabaseError::Migration` if the schema could not be applied.
    pub async fn open(path: &str) -> Result<Self, DatabaseError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        // busy_timeout=5000: writers queue for up to 5 seconds instead of
        // failing with SQLITE_BUSY while another subscription is reconciled.
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(DatabaseError::from_sqlx)?
            .foreign_keys(true)
            .pragma("busy_timeout", "5000");

        // An in-memory catalog lives in a shared-cache connection set where
        // table locks are not covered by busy_timeout, so keep it to one
        // connection.
        let max_connections = if path == ":memory:" { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        let db = Self { pool };
        db.migrate().await.map_err(|e| match DatabaseError::from_sqlx(e) {
            e @ (DatabaseError::InstanceLocked | DatabaseError::CannotOpen(_)) => e,
            other => DatabaseError::Migration(other.to_string()),
        })?;
        tracing::debug!(path = %path, "Catalog database opened");
        Ok(db)
    }

    /// Close every pooled connection.
    ///
    /// Called at the end of a run so the SQLite file is released before the
    /// process exits.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Run database migrations atomically within a transaction.
    ///
    /// All migrations use `IF NOT EXISTS`, so re-running on an existing
    /// catalog is a no-op.
    async fn migrate(&self) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY,
                username TEXT NOT NULL,
                email TEXT NOT NULL DEFAULT '',
                password TEXT NOT NULL DEFAULT '',
                created_at INTEGER NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // AUTOINCREMENT: subscription ids are never reused after deletion
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS subscriptions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id INTEGER NOT NULL REFERENCES users(id),
                name TEXT NOT NULL,
                xml_url TEXT NOT NULL,
                html_url TEXT,
                image_url TEXT,
                title TEXT,
                description TEXT,
                language TEXT,
                last_polled_at INTEGER,
                created_at INTEGER NOT NULL,
                UNIQUE(owner_id, name)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS episodes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                subscription_id INTEGER NOT NULL REFERENCES subscriptions(id),
                url TEXT NOT NULL,
                item_key TEXT,
                title TEXT,
                published TEXT,
                downloaded INTEGER NOT NULL DEFAULT 0,
                file_name TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER,
                UNIQUE(subscription_id, url)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS archived_episodes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                original_episode_id INTEGER NOT NULL REFERENCES episodes(id),
                subscription_id INTEGER NOT NULL REFERENCES subscriptions(id),
                url TEXT NOT NULL,
                downloaded INTEGER NOT NULL,
                archived_at INTEGER NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Supersession lookups go through the item key
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_episodes_item_key ON episodes(subscription_id, item_key)",
        )
        .execute(&mut *tx)
        .await?;

        // Partial index for list_pending_downloads()
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_episodes_pending ON episodes(subscription_id) WHERE downloaded = 0",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_archived_episodes_subscription ON archived_episodes(subscription_id)",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }
}
