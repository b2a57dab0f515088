use anyhow::Result;
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

#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Open a database connection and run migrations
    ///
    /// `":memory:"` opens a private in-memory database (used by tests and dry
    /// runs). In that case the pool is pinned to a single connection, since
    /// every SQLite in-memory connection would otherwise see its own empty
    /// database.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::InstanceLocked` if another process has the
    /// database locked (SQLITE_BUSY, SQLITE_LOCKED, SQLITE_CANTOPEN).
    /// Returns `DatabaseError::Migration` if the schema could not be created.
    pub async fn open(path: &str) -> Result<Self, DatabaseError> {
        let in_memory = path == ":memory:";
        let url = format!("sqlite:{}?mode=rwc", path);

        // busy_timeout=5000: SQLite waits up to 5 seconds for locks to release before returning SQLITE_BUSY.
        // foreign_keys is per-connection, so it goes on the connect options rather than a one-off PRAGMA.
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(DatabaseError::from_sqlx)?
            .pragma("busy_timeout", "5000")
            .foreign_keys(true);

        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(10));
        if in_memory {
            // The database lives only as long as its connection.
            pool_options = pool_options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        let db = Self { pool };
        db.migrate().await.map_err(|e| {
            let error_string = e.to_string().to_lowercase();
            if error_string.contains("database is locked")
                || error_string.contains("database table is locked")
                || error_string.contains("sqlite_busy")
                || error_string.contains("sqlite_locked")
            {
                DatabaseError::InstanceLocked
            } else {
                DatabaseError::Migration(e.to_string())
            }
        })?;
        Ok(db)
    }

    /// Run database migrations atomically within a transaction.
    ///
    /// All migrations use `IF NOT EXISTS`, so re-running on an existing
    /// database is a no-op.
    async fn migrate(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS creators (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                created_at INTEGER NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS categories (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                created_at INTEGER NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // UNIQUE(link) doubles as the index the existence checker relies on.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS articles (
                id INTEGER PRIMARY KEY,
                guid TEXT NOT NULL UNIQUE,
                link TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL,
                pub_date INTEGER,
                description TEXT,
                content TEXT,
                comments_link TEXT,
                creator_id INTEGER REFERENCES creators(id) ON DELETE SET NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS article_categories (
                article_id INTEGER NOT NULL REFERENCES articles(id) ON DELETE CASCADE,
                category_id INTEGER NOT NULL REFERENCES categories(id) ON DELETE CASCADE,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (article_id, category_id)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_articles_pub_date ON articles(pub_date DESC)")
            .execute(&mut *tx)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_articles_creator ON articles(creator_id)")
            .execute(&mut *tx)
            .await?;
        // The primary key covers lookups by article_id; category stats scan by category_id.
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_article_categories_category ON article_categories(category_id)",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }
}
