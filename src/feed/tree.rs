//! Lenient XML → element tree conversion.
//!
//! Real-world feeds are frequently not well-formed: mismatched end tags,
//! bare ampersands, HTML entities such as `&nbsp;`, stray closing tags,
//! truncated bodies. The builder here keeps whatever structure it can
//! recover instead of rejecting the document.
//!
//! Tag and attribute names are normalized: namespace prefix removed and
//! lowercased, so `<dc:Creator>`, `<CREATOR>` and `<creator>` are the same.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::ParseError;

/// SEC-003: Maximum element nesting depth.
/// Prevents stack exhaustion from maliciously deep documents.
const MAX_DEPTH: usize = 256;

/// One element of a parsed feed document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlElement {
    /// Normalized tag name (no prefix, lowercase).
    pub name: String,
    /// Normalized attribute names with unescaped values, in document order.
    pub attributes: Vec<(String, String)>,
    /// Direct text content (text and CDATA nodes joined by a space).
    pub text: String,
    pub children: Vec<XmlElement>,
    /// Text runs and child positions in document order.
    content: Vec<Content>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Content {
    Text(String),
    Child(usize),
}

impl XmlElement {
    fn new(name: String) -> Self {
        Self {
            name,
            ..Self::default()
        }
    }

    /// First direct child with the given (normalized) name.
    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }

    /// All direct children with the given (normalized) name.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.children.iter().filter(move |c| c.name == name)
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Direct text of the first child called `name`, if non-empty.
    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name)
            .map(|c| c.text.trim())
            .filter(|t| !t.is_empty())
    }

    /// Text of this element and its descendants, in document order.
    ///
    /// Descriptions sometimes embed unescaped markup (`<p>..</p>`) which
    /// parses as child elements; this flattens it back to prose.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        for part in &self.content {
            match part {
                Content::Text(text) => push_text(out, text),
                Content::Child(index) => {
                    if let Some(child) = self.children.get(*index) {
                        child.collect_text(out);
                    }
                }
            }
        }
    }

    fn push_child(&mut self, child: XmlElement) {
        self.content.push(Content::Child(self.children.len()));
        self.children.push(child);
    }

    fn push_text_run(&mut self, text: &str) {
        push_text(&mut self.text, text);
        self.content.push(Content::Text(text.to_string()));
    }
}

fn push_text(out: &mut String, text: &str) {
    let text = text.trim();
    if text.is_empty() {
        return;
    }
    if !out.is_empty() {
        out.push(' ');
    }
    out.push_str(text);
}

fn normalize_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).to_lowercase()
}

fn start_element(e: &BytesStart<'_>, reader: &Reader<&[u8]>) -> XmlElement {
    let mut element = XmlElement::new(normalize_name(e.local_name().as_ref()));

    for attr_result in e.attributes().with_checks(false) {
        let attr = match attr_result {
            Ok(attr) => attr,
            Err(err) => {
                tracing::debug!(element = %element.name, error = %err, "Skipping malformed attribute");
                continue;
            }
        };
        let value = attr
            .decode_and_unescape_value(reader.decoder())
            .map(|v| v.into_owned())
            .unwrap_or_else(|_| String::from_utf8_lossy(&attr.value).into_owned());
        element
            .attributes
            .push((normalize_name(attr.key.local_name().as_ref()), value));
    }

    element
}

/// Pop the innermost open element and attach it to its parent (or make it
/// the root if nothing is open).
fn close_top(stack: &mut Vec<XmlElement>, root: &mut Option<XmlElement>) {
    if let Some(element) = stack.pop() {
        attach(stack, root, element);
    }
}

fn attach(stack: &mut [XmlElement], root: &mut Option<XmlElement>, element: XmlElement) {
    match stack.last_mut() {
        Some(parent) => parent.push_child(element),
        None if root.is_none() => *root = Some(element),
        None => {
            tracing::debug!(element = %element.name, "Ignoring extra top-level element");
        }
    }
}

/// Parse raw bytes into an element tree, best effort.
///
/// # Errors
///
/// [`ParseError::Malformed`] only when no root element could be recovered:
/// empty input, non-XML bytes, or a syntax error before the first tag.
/// Errors after the root has opened, and elements nested deeper than the
/// SEC-003 limit, end parsing early and keep what was read so far.
pub fn parse_tree(bytes: &[u8]) -> Result<XmlElement, ParseError> {
    // SEC-002: quick-xml (0.37) never expands <!ENTITY> declarations; only the
    // five XML builtins are resolved by unescape(). Unknown entities fall
    // back to the raw text below.
    let mut reader = Reader::from_reader(bytes);
    {
        let config = reader.config_mut();
        config.trim_text(true);
        config.check_end_names = false;
        config.allow_unmatched_ends = true;
    }

    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if stack.len() >= MAX_DEPTH {
                    tracing::debug!(
                        max_depth = MAX_DEPTH,
                        "Nesting depth exceeded, keeping partial tree"
                    );
                    break;
                }
                stack.push(start_element(&e, &reader));
            }
            Ok(Event::Empty(e)) => {
                let element = start_element(&e, &reader);
                attach(&mut stack, &mut root, element);
            }
            Ok(Event::End(e)) => {
                let name = normalize_name(e.local_name().as_ref());
                // Close up to the matching open element; a stray end tag
                // with no open counterpart is ignored.
                if let Some(pos) = stack.iter().rposition(|el| el.name == name) {
                    while stack.len() > pos {
                        close_top(&mut stack, &mut root);
                    }
                } else {
                    tracing::debug!(tag = %name, "Ignoring unmatched end tag");
                }
            }
            Ok(Event::Text(e)) => {
                if let Some(top) = stack.last_mut() {
                    let text = match e.unescape() {
                        Ok(text) => text.into_owned(),
                        Err(_) => String::from_utf8_lossy(&e).into_owned(),
                    };
                    top.push_text_run(&text);
                }
            }
            Ok(Event::CData(e)) => {
                if let Some(top) = stack.last_mut() {
                    top.push_text_run(&String::from_utf8_lossy(&e));
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                if stack.is_empty() && root.is_none() {
                    return Err(ParseError::Malformed(e.to_string()));
                }
                tracing::debug!(
                    position = reader.buffer_position(),
                    error = %e,
                    "XML error inside document, keeping partial tree"
                );
                break;
            }
        }
        buf.clear();
    }

    // Unclosed elements at EOF are closed implicitly
    while !stack.is_empty() {
        close_top(&mut stack, &mut root);
    }

    root.ok_or_else(|| ParseError::Malformed("no root element".to_string()))
}
