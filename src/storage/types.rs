use serde::Serialize;
use thiserror::Error;

use crate::util::{clean_name, collapse_whitespace, normalize_link};

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds a write lock on the database
    #[error("The database is locked by another process. Wait for the other run to finish and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5): database is locked
        // SQLITE_LOCKED (6): database table is locked
        // SQLITE_CANTOPEN (14): unable to open database file
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return DatabaseError::InstanceLocked;
        }

        DatabaseError::Other(err)
    }
}

/// A query against the store failed. Retryable; scoped to one batch or one
/// record by the callers in `sync`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store query failed: {0}")]
    Query(#[from] sqlx::Error),
}

/// Why a parsed record was rejected at the parser boundary.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("record has no usable link: {0:?}")]
    InvalidLink(String),
    #[error("record for {0} has no guid")]
    MissingGuid(String),
}

// ============================================================================
// Records
// ============================================================================

/// Where a record entered the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOrigin {
    /// Parsed from an RSS/Atom feed page.
    Feed,
    /// Fetched and parsed from the article page after reconciliation.
    Backfill,
}

/// One article as produced by a parser, ready for the upsert engine.
///
/// Both the feed parser and the article page parser build this type; it is
/// validated once via [`ArticleRecord::validate`] before leaving the parser.
#[derive(Debug, Clone, PartialEq)]
pub struct ArticleRecord {
    pub guid: String,
    pub link: String,
    pub title: String,
    /// Unix seconds
    pub pub_date: Option<i64>,
    pub description: Option<String>,
    pub content: Option<String>,
    pub comments_link: Option<String>,
    pub creator: Option<String>,
    /// Raw category tags, before allow-list filtering
    pub categories: Vec<String>,
    pub origin: RecordOrigin,
}

impl ArticleRecord {
    /// Normalize and check the record.
    ///
    /// - `link` is normalized and must be an absolute http(s) URL
    /// - `guid` is trimmed and must be non-empty
    /// - `title` is flattened; blank titles become `"Untitled"`
    /// - blank description/content/comments/creator become `None`
    /// - category names are cleaned, blanks dropped
    pub fn validate(mut self) -> Result<Self, RecordError> {
        let link = normalize_link(&self.link);
        match url::Url::parse(&link) {
            Ok(u) if matches!(u.scheme(), "http" | "https") => self.link = link,
            _ => return Err(RecordError::InvalidLink(self.link)),
        }

        self.guid = self.guid.trim().to_string();
        if self.guid.is_empty() {
            return Err(RecordError::MissingGuid(self.link));
        }

        let title = collapse_whitespace(&self.title).into_owned();
        self.title = if title.is_empty() {
            "Untitled".to_string()
        } else {
            title
        };

        self.description = non_blank(self.description.map(|d| collapse_whitespace(&d).into_owned()));
        self.content = non_blank(self.content.map(|c| c.trim().to_string()));
        self.comments_link = non_blank(self.comments_link.map(|c| c.trim().to_string()));
        self.creator = self.creator.as_deref().and_then(clean_name);
        self.categories = self.categories.iter().filter_map(|c| clean_name(c)).collect();

        Ok(self)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Result of persisting one [`ArticleRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub article_id: i64,
    /// `true` when a new row was inserted, `false` when an existing row was refreshed
    pub created: bool,
    /// Join rows newly inserted by this call
    pub categories_linked: usize,
}

// ============================================================================
// Data Structures
// ============================================================================

/// Article row as stored
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Article {
    pub id: i64,
    pub guid: String,
    pub link: String,
    pub title: String,
    pub pub_date: Option<i64>,
    pub description: Option<String>,
    pub content: Option<String>,
    pub comments_link: Option<String>,
    pub creator_id: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Article count per category, for run statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct CategoryStat {
    pub name: String,
    pub article_count: i64,
}

/// Recent article with its category names joined, for `--stats`
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ArticleListing {
    pub id: i64,
    pub title: String,
    pub pub_date: Option<i64>,
    pub categories: Option<String>,
}
