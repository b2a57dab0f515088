use std::collections::HashSet;

use thiserror::Error;

use crate::config::Config;
use crate::storage::{ArticleRecord, Database, StoreError, UpsertOutcome};
use crate::util::{clean_name, normalize_link};

#[derive(Debug, Error)]
pub enum UpsertError {
    /// The record's transaction failed and was rolled back
    #[error("failed to persist {link}: {source}")]
    Store {
        link: String,
        #[source]
        source: StoreError,
    },
}

/// Persists articles with their creator and allow-listed categories.
#[derive(Debug, Clone)]
pub struct UpsertEngine {
    allowed: HashSet<String>,
}

impl UpsertEngine {
    pub fn new<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            allowed: allowed
                .into_iter()
                .filter_map(|name| clean_name(name.as_ref()))
                .collect(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.allowed_categories)
    }

    pub fn is_allowed(&self, category: &str) -> bool {
        self.allowed.contains(category)
    }

    /// Keep recognized category names, trimmed and deduplicated in order.
    pub fn filter_categories(&self, categories: &[String]) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut kept = Vec::new();
        for raw in categories {
            let Some(name) = clean_name(raw) else {
                continue;
            };
            if !self.is_allowed(&name) {
                tracing::debug!(category = %name, "Discarding unrecognized category");
                continue;
            }
            if seen.insert(name.clone()) {
                kept.push(name);
            }
        }
        kept
    }

    /// Persist one record. Resubmitting the same guid/link refreshes the
    /// existing row and only adds category links that are not there yet.
    pub async fn upsert(&self, db: &Database, record: &ArticleRecord) -> Result<UpsertOutcome, UpsertError> {
        let categories = self.filter_categories(&record.categories);
        let link = normalize_link(&record.link);
        // A blank creator means no creator
        let creator = record.creator.as_deref().and_then(clean_name);

        let outcome = if link == record.link && creator == record.creator {
            db.upsert_article(record, &categories).await
        } else {
            let normalized = ArticleRecord {
                link: link.clone(),
                creator,
                ..record.clone()
            };
            db.upsert_article(&normalized, &categories).await
        };

        let outcome = outcome.map_err(|source| UpsertError::Store { link, source })?;
        tracing::debug!(
            article_id = outcome.article_id,
            created = outcome.created,
            categories = outcome.categories_linked,
            origin = ?record.origin,
            "Upserted article"
        );
        Ok(outcome)
    }
}
