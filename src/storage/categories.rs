use anyhow::Result;
use sqlx::SqliteConnection;

use super::schema::Database;
use super::types::CategoryStat;

impl Database {
    // ========================================================================
    // Category Operations
    // ========================================================================

    /// Return the id of the category called `name`, creating it on first sight.
    ///
    /// No allow-list check happens here; the upsert engine filters names
    /// before they reach the store.
    pub async fn resolve_or_create_category(&self, name: &str) -> Result<i64> {
        let now = chrono::Utc::now().timestamp();
        let mut conn = self.pool.acquire().await?;
        Ok(category_id(&mut *conn, name, now).await?)
    }

    /// Link an article to a category if the pair is not linked yet.
    ///
    /// Returns `true` when a new pair was inserted.
    pub async fn link_article_category(&self, article_id: i64, category_id: i64) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let mut conn = self.pool.acquire().await?;
        Ok(link_category(&mut *conn, article_id, category_id, now).await?)
    }

    /// Category names linked to an article, alphabetically.
    pub async fn categories_for_article(&self, article_id: i64) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT c.name
            FROM article_categories ac
            JOIN categories c ON c.id = ac.category_id
            WHERE ac.article_id = ?
            ORDER BY c.name
        "#,
        )
        .bind(article_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    /// Article count per category, busiest first.
    ///
    /// Categories with no articles are included with a count of 0.
    pub async fn category_stats(&self) -> Result<Vec<CategoryStat>> {
        let rows = sqlx::query_as::<_, CategoryStat>(
            r#"
            SELECT c.name, COUNT(ac.article_id) AS article_count
            FROM categories c
            LEFT JOIN article_categories ac ON c.id = ac.category_id
            GROUP BY c.id, c.name
            ORDER BY article_count DESC, c.name
        "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Total number of (article, category) pairs.
    pub async fn article_category_count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM article_categories")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

pub(crate) async fn category_id(
    conn: &mut SqliteConnection,
    name: &str,
    now: i64,
) -> Result<i64, sqlx::Error> {
    sqlx::query("INSERT INTO categories (name, created_at) VALUES (?, ?) ON CONFLICT(name) DO NOTHING")
        .bind(name)
        .bind(now)
        .execute(&mut *conn)
        .await?;

    let (id,): (i64,) = sqlx::query_as("SELECT id FROM categories WHERE name = ?")
        .bind(name)
        .fetch_one(&mut *conn)
        .await?;
    Ok(id)
}

pub(crate) async fn link_category(
    conn: &mut SqliteConnection,
    article_id: i64,
    category_id: i64,
    now: i64,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "INSERT OR IGNORE INTO article_categories (article_id, category_id, created_at) VALUES (?, ?, ?)",
    )
    .bind(article_id)
    .bind(category_id)
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() > 0)
}
