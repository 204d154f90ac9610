//! Keyword watcher for RSS/RDF/Atom feeds.
//!
//! Each cycle fetches the configured sources, matches entry descriptions
//! against the configured keywords, and mails every subscriber once per
//! (subscriber, link, keyword). Sent notifications are remembered in a
//! SQLite store so later cycles stay quiet.

pub mod config;
pub mod cycle;
pub mod feed;
pub mod matcher;
pub mod notify;
pub mod storage;
pub mod util;
