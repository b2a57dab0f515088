//! Ingests a news site's RSS feed and sitemap into one deduplicated SQLite
//! article catalog.
//!
//! The binary wires these modules together; integration tests drive them
//! directly.

pub mod config;
pub mod feed;
pub mod storage;
pub mod sync;
pub mod util;
