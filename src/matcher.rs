//! Keyword matching against entry descriptions.

use regex::{Regex, RegexBuilder};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::feed::Entry;

/// A keyword hit on one entry.
///
/// Two matches are the same notification trigger when they share the
/// keyword and the entry link, even if the entries came from different
/// feeds.
#[derive(Debug, Clone)]
pub struct Match {
    pub keyword: String,
    pub entry: Arc<Entry>,
}

impl PartialEq for Match {
    fn eq(&self, other: &Self) -> bool {
        self.keyword == other.keyword && self.entry.link == other.entry.link
    }
}

impl Eq for Match {}

impl Hash for Match {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.keyword.hash(state);
        self.entry.link.hash(state);
    }
}

#[derive(Debug)]
struct CompiledKeyword {
    keyword: String,
    pattern: Regex,
}

/// Compiled set of configured keywords.
///
/// Each keyword is a case-insensitive regular expression. A keyword that
/// does not compile is matched as a literal instead, so a stray `(` or `+`
/// in the config never disables matching.
#[derive(Debug)]
pub struct KeywordMatcher {
    keywords: Vec<CompiledKeyword>,
}

impl KeywordMatcher {
    pub fn new<S: AsRef<str>>(keywords: &[S]) -> Self {
        let keywords = keywords
            .iter()
            .map(AsRef::as_ref)
            .filter(|k| !k.trim().is_empty())
            .filter_map(|keyword| {
                let compiled = case_insensitive(keyword).or_else(|e| {
                    tracing::warn!(
                        keyword = %keyword,
                        error = %e,
                        "Keyword is not a valid pattern, matching it literally"
                    );
                    case_insensitive(&regex::escape(keyword))
                });
                match compiled {
                    Ok(pattern) => Some(CompiledKeyword {
                        keyword: keyword.to_string(),
                        pattern,
                    }),
                    // Only reachable for literals beyond the regex size limit
                    Err(e) => {
                        tracing::error!(keyword = %keyword, error = %e, "Ignoring keyword");
                        None
                    }
                }
            })
            .collect();

        Self { keywords }
    }

    pub fn len(&self) -> usize {
        self.keywords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }

    /// One [`Match`] per keyword found in the entry's description, in
    /// keyword order. Entries without a description never match.
    pub fn match_entry(&self, entry: &Arc<Entry>) -> Vec<Match> {
        let Some(description) = entry.description.as_deref() else {
            return Vec::new();
        };

        self.keywords
            .iter()
            .filter(|k| k.pattern.is_match(description))
            .map(|k| Match {
                keyword: k.keyword.clone(),
                entry: Arc::clone(entry),
            })
            .collect()
    }

    /// All matches for a feed's entries, entry by entry.
    pub fn match_entries(&self, entries: Vec<Entry>) -> Vec<Match> {
        entries
            .into_iter()
            .map(Arc::new)
            .flat_map(|entry| self.match_entry(&entry))
            .collect()
    }
}

fn case_insensitive(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).case_insensitive(true).build()
}
