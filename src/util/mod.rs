//! Utility functions shared by the feed, storage and sync layers.
//!
//! - **Link normalization**: canonical cross-source keys for article URLs
//! - **Text cleanup**: whitespace collapsing and name sanitizing
//!
//! # Examples
//!
//! ```
//! use press_ingest::util::{clean_name, normalize_link};
//!
//! let key = normalize_link("https://Example.com/2024/01/post/");
//! assert_eq!(key, "https://example.com/2024/01/post");
//!
//! assert_eq!(clean_name("  要闻 ").as_deref(), Some("要闻"));
//! ```

mod normalize;
mod text;

pub use normalize::normalize_link;
pub use text::{clean_name, collapse_whitespace};
