use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{QueryBuilder, SqliteConnection};

use super::categories::{category_id, link_category};
use super::creators::creator_id;
use super::schema::Database;
use super::types::{Article, ArticleListing, ArticleRecord, StoreError, UpsertOutcome};
use crate::sync::LinkLookup;

/// Maximum number of articles to return from any listing query (OOM protection)
const MAX_LISTING: i64 = 500;

impl Database {
    // ========================================================================
    // Existence Checks
    // ========================================================================

    /// Return the subset of `links` already stored as an article link.
    ///
    /// Issues exactly one `SELECT ... WHERE link IN (...)` for the whole slice;
    /// callers are responsible for keeping the slice within their batch bound.
    /// The lookup is served by the UNIQUE index on `articles.link`.
    pub async fn find_existing_links(&self, links: &[String]) -> Result<HashSet<String>, StoreError> {
        if links.is_empty() {
            return Ok(HashSet::new());
        }

        let mut builder: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new("SELECT link FROM articles WHERE link IN (");
        let mut separated = builder.separated(", ");
        for link in links {
            separated.push_bind(link);
        }
        separated.push_unseparated(")");

        let rows: Vec<(String,)> = builder.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|(link,)| link).collect())
    }

    // ========================================================================
    // Article Upsert
    // ========================================================================

    /// Persist one article and its relations in a single transaction.
    ///
    /// `categories` must already be filtered against the allow-list; every
    /// name given here is resolved or created. The record's `link` is stored
    /// as given, so it should come from [`ArticleRecord::validate`].
    ///
    /// Matching prefers `guid`, then `link`. A matched row has its mutable
    /// fields refreshed; `guid`, `link` and `created_at` never change, and an
    /// optional field is only overwritten when the new value is present.
    ///
    /// On error the transaction is dropped, rolling back this record only.
    pub async fn upsert_article(
        &self,
        record: &ArticleRecord,
        categories: &[String],
    ) -> Result<UpsertOutcome, StoreError> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        let creator = match record.creator.as_deref() {
            Some(name) => Some(creator_id(&mut *tx, name, now).await?),
            None => None,
        };

        let mut category_ids = Vec::with_capacity(categories.len());
        for name in categories {
            category_ids.push(category_id(&mut *tx, name, now).await?);
        }

        let (article_id, created) = match find_article_id(&mut *tx, &record.guid, &record.link).await? {
            Some(id) => {
                update_article(&mut *tx, id, record, creator, now).await?;
                (id, false)
            }
            None => insert_article(&mut *tx, record, creator, now).await?,
        };

        let mut categories_linked = 0;
        for category in category_ids {
            if link_category(&mut *tx, article_id, category, now).await? {
                categories_linked += 1;
            }
        }

        tx.commit().await?;
        Ok(UpsertOutcome {
            article_id,
            created,
            categories_linked,
        })
    }

    // ========================================================================
    // Article Queries
    // ========================================================================

    pub async fn article_count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM articles")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn get_article_by_link(&self, link: &str) -> Result<Option<Article>> {
        let row = sqlx::query_as::<_, Article>(
            r#"
            SELECT id, guid, link, title, pub_date, description, content,
                   comments_link, creator_id, created_at, updated_at
            FROM articles
            WHERE link = ?
        "#,
        )
        .bind(link)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn get_article_by_guid(&self, guid: &str) -> Result<Option<Article>> {
        let row = sqlx::query_as::<_, Article>(
            r#"
            SELECT id, guid, link, title, pub_date, description, content,
                   comments_link, creator_id, created_at, updated_at
            FROM articles
            WHERE guid = ?
        "#,
        )
        .bind(guid)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Most recent articles with their category names joined by `", "`.
    ///
    /// Capped at 500 rows.
    pub async fn recent_articles_with_categories(&self, limit: i64) -> Result<Vec<ArticleListing>> {
        let limit = limit.clamp(0, MAX_LISTING);
        let rows = sqlx::query_as::<_, ArticleListing>(
            r#"
            SELECT a.id, a.title, a.pub_date,
                   (SELECT GROUP_CONCAT(name, ', ') FROM (
                        SELECT c.name FROM article_categories ac
                        JOIN categories c ON c.id = ac.category_id
                        WHERE ac.article_id = a.id
                        ORDER BY c.name
                   )) AS categories
            FROM articles a
            ORDER BY a.pub_date DESC, a.id DESC
            LIMIT ?
        "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl LinkLookup for Database {
    async fn find_existing_links(&self, links: &[String]) -> Result<HashSet<String>, StoreError> {
        Database::find_existing_links(self, links).await
    }
}

// ============================================================================
// Transaction Helpers
// ============================================================================

async fn find_article_id(
    conn: &mut SqliteConnection,
    guid: &str,
    link: &str,
) -> Result<Option<i64>, sqlx::Error> {
    // A guid match wins over a link match when the two point at different rows.
    let row: Option<(i64,)> = sqlx::query_as(
        "SELECT id FROM articles WHERE guid = ? OR link = ? ORDER BY (guid = ?) DESC LIMIT 1",
    )
    .bind(guid)
    .bind(link)
    .bind(guid)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row.map(|(id,)| id))
}

async fn update_article(
    conn: &mut SqliteConnection,
    id: i64,
    record: &ArticleRecord,
    creator_id: Option<i64>,
    now: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE articles SET
            title = ?,
            pub_date = COALESCE(?, pub_date),
            description = COALESCE(?, description),
            content = COALESCE(?, content),
            comments_link = COALESCE(?, comments_link),
            creator_id = COALESCE(?, creator_id),
            updated_at = ?
        WHERE id = ?
    "#,
    )
    .bind(&record.title)
    .bind(record.pub_date)
    .bind(&record.description)
    .bind(&record.content)
    .bind(&record.comments_link)
    .bind(creator_id)
    .bind(now)
    .bind(id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Insert a new row; returns `(id, created)`.
///
/// `ON CONFLICT DO NOTHING` absorbs a duplicate guid/link that appeared after
/// `find_article_id` ran (another writer on a file database); the existing row
/// is then refreshed instead.
async fn insert_article(
    conn: &mut SqliteConnection,
    record: &ArticleRecord,
    creator_id: Option<i64>,
    now: i64,
) -> Result<(i64, bool), sqlx::Error> {
    let inserted: Option<(i64,)> = sqlx::query_as(
        r#"
        INSERT INTO articles
            (guid, link, title, pub_date, description, content, comments_link,
             creator_id, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT DO NOTHING
        RETURNING id
    "#,
    )
    .bind(&record.guid)
    .bind(&record.link)
    .bind(&record.title)
    .bind(record.pub_date)
    .bind(&record.description)
    .bind(&record.content)
    .bind(&record.comments_link)
    .bind(creator_id)
    .bind(now)
    .bind(now)
    .fetch_optional(&mut *conn)
    .await?;

    if let Some((id,)) = inserted {
        return Ok((id, true));
    }

    tracing::debug!(guid = %record.guid, link = %record.link, "Insert conflicted, refreshing existing row");
    let id = find_article_id(conn, &record.guid, &record.link)
        .await?
        .ok_or(sqlx::Error::RowNotFound)?;
    update_article(conn, id, record, creator_id, now).await?;
    Ok((id, false))
}
