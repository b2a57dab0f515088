use anyhow::Result;
use sqlx::SqliteConnection;

use super::schema::Database;

impl Database {
    /// Return the id of the creator called `name`, creating it on first sight.
    pub async fn resolve_or_create_creator(&self, name: &str) -> Result<i64> {
        let now = chrono::Utc::now().timestamp();
        let mut conn = self.pool.acquire().await?;
        Ok(creator_id(&mut *conn, name, now).await?)
    }

    pub async fn creator_name(&self, creator_id: i64) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT name FROM creators WHERE id = ?")
            .bind(creator_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(name,)| name))
    }

    pub async fn creator_count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM creators")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

/// Insert-if-absent on the unique name, then read the id back.
pub(crate) async fn creator_id(
    conn: &mut SqliteConnection,
    name: &str,
    now: i64,
) -> Result<i64, sqlx::Error> {
    sqlx::query("INSERT INTO creators (name, created_at) VALUES (?, ?) ON CONFLICT(name) DO NOTHING")
        .bind(name)
        .bind(now)
        .execute(&mut *conn)
        .await?;

    let (id,): (i64,) = sqlx::query_as("SELECT id FROM creators WHERE name = ?")
        .bind(name)
        .fetch_one(&mut *conn)
        .await?;
    Ok(id)
}

#[cfg(test)]
mod tests {
    use crate::storage::Database;

    #[tokio::test]
    async fn test_resolve_or_create_is_idempotent() {
        let db = Database::open(":memory:").await.unwrap();

        let first = db.resolve_or_create_creator("路德社").await.unwrap();
        let second = db.resolve_or_create_creator("路德社").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(db.creator_count().await.unwrap(), 1);
        assert_eq!(
            db.creator_name(first).await.unwrap().as_deref(),
            Some("路德社")
        );
    }

    #[tokio::test]
    async fn test_distinct_names_get_distinct_ids() {
        let db = Database::open(":memory:").await.unwrap();

        let a = db.resolve_or_create_creator("Alice").await.unwrap();
        let b = db.resolve_or_create_creator("Bob").await.unwrap();
        assert_ne!(a, b);
        assert_eq!(db.creator_count().await.unwrap(), 2);
    }
}
