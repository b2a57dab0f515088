mod articles;
mod categories;
mod creators;
mod schema;
mod types;

pub use schema::Database;
pub use types::{
    Article, ArticleListing, ArticleRecord, CategoryStat, DatabaseError, RecordError,
    RecordOrigin, StoreError, UpsertOutcome,
};
