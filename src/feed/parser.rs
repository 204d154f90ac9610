use super::tree::{parse_tree, XmlElement};
use super::ParseError;

/// Where a feed keeps its entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemSource {
    /// Entries are direct children of the root (RSS 1.0/RDF, Atom).
    Root,
    /// Entries sit under `<channel>` (RSS 0.9x/2.0).
    Channel,
}

/// The entry elements of a feed, located independently of its dialect.
#[derive(Debug)]
pub struct LocatedItems<'a> {
    pub root_tag: &'a str,
    pub source: ItemSource,
    pub items: Vec<&'a XmlElement>,
}

/// One feed entry, reduced to the fields the pipeline needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub title: String,
    pub link: String,
    /// `None` when the entry has no description-like element at all.
    pub description: Option<String>,
    /// The entry element as it appeared in the feed.
    pub raw: XmlElement,
}

/// Result of parsing one feed document.
#[derive(Debug, Clone)]
pub struct ParsedFeed {
    pub root_tag: String,
    pub source: ItemSource,
    pub entries: Vec<Entry>,
    /// Entries dropped because they had no usable link.
    pub skipped: usize,
}

/// Find the entry list of a feed tree.
///
/// Looks for `item` children of the root, then `item` children of the
/// root's first `channel`, then Atom `entry` children of the root.
///
/// # Errors
///
/// [`ParseError::NoEntriesFound`] when none of those exist.
pub fn locate_items(root: &XmlElement) -> Result<LocatedItems<'_>, ParseError> {
    let items: Vec<_> = root.children_named("item").collect();
    if !items.is_empty() {
        return Ok(LocatedItems {
            root_tag: &root.name,
            source: ItemSource::Root,
            items,
        });
    }

    if let Some(channel) = root.child("channel") {
        let items: Vec<_> = channel.children_named("item").collect();
        if !items.is_empty() {
            return Ok(LocatedItems {
                root_tag: &root.name,
                source: ItemSource::Channel,
                items,
            });
        }
    }

    let entries: Vec<_> = root.children_named("entry").collect();
    if !entries.is_empty() {
        return Ok(LocatedItems {
            root_tag: &root.name,
            source: ItemSource::Root,
            items: entries,
        });
    }

    Err(ParseError::NoEntriesFound {
        root: root.name.clone(),
    })
}

/// Parse raw feed bytes into entries.
///
/// Tolerates malformed markup (see [`parse_tree`]). Entries without a link
/// cannot be deduplicated and are counted in [`ParsedFeed::skipped`].
pub fn parse_feed(bytes: &[u8]) -> Result<ParsedFeed, ParseError> {
    let root = parse_tree(bytes)?;
    let located = locate_items(&root)?;

    let mut entries = Vec::with_capacity(located.items.len());
    let mut skipped = 0;
    for item in &located.items {
        match to_entry(item) {
            Some(entry) => entries.push(entry),
            None => skipped += 1,
        }
    }

    Ok(ParsedFeed {
        root_tag: located.root_tag.to_string(),
        source: located.source,
        entries,
        skipped,
    })
}

fn to_entry(item: &XmlElement) -> Option<Entry> {
    let link = entry_link(item)?;
    let title = item
        .child("title")
        .map(|t| t.text_content())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "Untitled".to_string());
    let description = ["description", "summary", "content"]
        .iter()
        .find_map(|name| item.child(name))
        .map(XmlElement::text_content);

    Some(Entry {
        title,
        link,
        description,
        raw: item.clone(),
    })
}

/// RSS puts the URL in `<link>` text; Atom in `<link href>` (possibly
/// several, the `alternate` one being the article). A permalink `<guid>`
/// is the last resort.
fn entry_link(item: &XmlElement) -> Option<String> {
    if let Some(text) = item.child_text("link") {
        return Some(text.to_string());
    }

    let hrefs: Vec<&XmlElement> = item
        .children_named("link")
        .filter(|l| l.attribute("href").is_some_and(|h| !h.trim().is_empty()))
        .collect();
    let preferred = hrefs
        .iter()
        .find(|l| matches!(l.attribute("rel"), None | Some("alternate")))
        .or_else(|| hrefs.first());
    if let Some(href) = preferred.and_then(|l| l.attribute("href")) {
        return Some(href.trim().to_string());
    }

    item.child_text("guid")
        .filter(|g| g.starts_with("http://") || g.starts_with("https://"))
        .map(str::to_string)
}
