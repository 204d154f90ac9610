//! Feed retrieval and parsing.
//!
//! - [`fetcher`] - single-shot HTTP(S) retrieval with a size cap
//! - [`tree`] - lenient XML → element tree
//! - [`parser`] - dialect-independent entry location and extraction
//!
//! # Example
//!
//! ```ignore
//! let bytes = fetch(&client, "https://example.com/rss").await?;
//! let feed = parse_feed(&bytes)?;
//! for entry in &feed.entries {
//!     println!("{} {}", entry.title, entry.link);
//! }
//! ```

mod fetcher;
mod parser;
mod tree;

use thiserror::Error;

pub use fetcher::{build_client, fetch, FetchError};
pub use parser::{locate_items, parse_feed, Entry, ItemSource, LocatedItems, ParsedFeed};
pub use tree::{parse_tree, XmlElement};

/// Errors that can occur while turning feed bytes into entries.
#[derive(Debug, Error)]
pub enum ParseError {
    /// Nothing resembling an XML document could be recovered
    #[error("Malformed feed XML: {0}")]
    Malformed(String),
    /// The document has no `item` or `entry` list where feeds keep them
    #[error("No entries found under <{root}>")]
    NoEntriesFound { root: String },
}

/// Why one feed contributed nothing to a cycle.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Parse(#[from] ParseError),
}
