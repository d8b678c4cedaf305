//! Mapping tagged markup onto styled ranges of plain text.
//!
//! Two strategies share one plain-text projection of the markup:
//!
//! * [`MappingStrategy::Structured`] walks the node tree and records each
//!   span while its text is being appended, so every span is exact.
//! * [`MappingStrategy::Positional`] locates each tagged element in the
//!   markup and searches its text in the projection behind a forward-only
//!   cursor. Elements whose text cannot be found are dropped and reported
//!   as [`PreviewError::AmbiguousContentMatch`].
//!
//! Span ranges are byte offsets into [`StyledText::text`].

use std::{cmp::Reverse, ops::Range, sync::LazyLock};

use regex::Regex;
use serde::Deserialize;
use tracing::trace;

use crate::error::PreviewError;
use crate::markup::{Element, MarkupConverter, MarkupNode, html_to_text};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ListMarker {
    Bullet,
    Ordinal(u32),
}

impl ListMarker {
    pub fn label(self) -> String {
        match self {
            ListMarker::Bullet => "• ".to_string(),
            ListMarker::Ordinal(n) => format!("{n}. "),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StyleTag {
    /// Heading level, 1 through 6.
    Heading(u8),
    Paragraph,
    Code,
    CodeBlock,
    Emphasis,
    Strong,
    Blockquote,
    ListItem(ListMarker),
}

impl StyleTag {
    /// The tag for a markup element, if it is part of the styled vocabulary.
    /// List containers and anything unknown map to `None`.
    pub fn from_element(tag: &str) -> Option<Self> {
        let tag = match tag {
            "h1" => StyleTag::Heading(1),
            "h2" => StyleTag::Heading(2),
            "h3" => StyleTag::Heading(3),
            "h4" => StyleTag::Heading(4),
            "h5" => StyleTag::Heading(5),
            "h6" => StyleTag::Heading(6),
            "p" => StyleTag::Paragraph,
            "code" => StyleTag::Code,
            "pre" => StyleTag::CodeBlock,
            "em" => StyleTag::Emphasis,
            "strong" => StyleTag::Strong,
            "blockquote" => StyleTag::Blockquote,
            _ => return None,
        };
        Some(tag)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StyleSpan {
    pub range: Range<usize>,
    pub tag: StyleTag,
}

impl StyleSpan {
    pub fn new(range: Range<usize>, tag: StyleTag) -> Self {
        Self { range, tag }
    }
}

/// Plain text plus the spans that style it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StyledText {
    pub text: String,
    pub spans: Vec<StyleSpan>,
}

impl StyledText {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            spans: Vec::new(),
        }
    }

    /// Restores whitespace that surrounded a fragment in its source and that
    /// the converter dropped.
    ///
    /// Leading newlines and trailing whitespace of the projection are
    /// replaced by the source's leading whitespace (up to its last newline,
    /// since indentation after it is structural) and its trailing
    /// whitespace. Spans are clipped to the kept text and shifted.
    pub fn with_source_whitespace(self, source: &str) -> StyledText {
        if source.trim().is_empty() {
            return StyledText::plain(source);
        }

        let leading_source = &source[..source.len() - source.trim_start().len()];
        let lead = match leading_source.rfind('\n') {
            Some(idx) => &leading_source[..=idx],
            None => leading_source,
        };
        let trail = &source[source.trim_end().len()..];

        let core_start = self.text.len() - self.text.trim_start_matches('\n').len();
        let core_end = self.text.trim_end().len().max(core_start);
        let core = &self.text[core_start..core_end];

        let mut text = String::with_capacity(lead.len() + core.len() + trail.len());
        text.push_str(lead);
        text.push_str(core);
        text.push_str(trail);

        let spans = self
            .spans
            .into_iter()
            .filter_map(|span| {
                let start = span.range.start.clamp(core_start, core_end);
                let end = span.range.end.clamp(core_start, core_end);
                (end > start).then(|| {
                    StyleSpan::new(
                        start - core_start + lead.len()..end - core_start + lead.len(),
                        span.tag,
                    )
                })
            })
            .collect();

        StyledText { text, spans }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingStrategy {
    #[default]
    Structured,
    Positional,
}

impl MappingStrategy {
    /// Converts and maps one markdown fragment. Diagnostics are only
    /// produced by the positional strategy.
    pub fn apply(
        self,
        converter: &dyn MarkupConverter,
        markdown: &str,
    ) -> (StyledText, Vec<PreviewError>) {
        let nodes = converter.convert_tree(markdown);
        match self {
            MappingStrategy::Structured => (project(&nodes), Vec::new()),
            MappingStrategy::Positional => {
                let text = plain_text(&nodes);
                let mapping = map_styles(&text, &converter.convert(markdown));
                (
                    StyledText {
                        text,
                        spans: mapping.spans,
                    },
                    mapping.misses,
                )
            }
        }
    }
}

/// Walks the markup tree, producing the plain text and its spans together.
pub fn project(nodes: &[MarkupNode]) -> StyledText {
    let mut projector = Projector::default();
    projector.walk(nodes, Parent::Block);
    let mut spans = projector.spans;
    sort_spans(&mut spans);
    StyledText {
        text: projector.text,
        spans,
    }
}

/// The plain-text projection alone, list markers included.
pub fn plain_text(nodes: &[MarkupNode]) -> String {
    project(nodes).text
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Parent {
    Block,
    List,
    ListItem,
    Table,
    Preformatted,
}

#[derive(Default)]
struct Projector {
    text: String,
    spans: Vec<StyleSpan>,
    list_depth: usize,
    item_content_start: usize,
}

impl Projector {
    fn walk(&mut self, nodes: &[MarkupNode], parent: Parent) {
        for node in nodes {
            match node {
                MarkupNode::Text(text) => {
                    let structural = match parent {
                        Parent::List | Parent::Table => true,
                        Parent::ListItem => text.contains('\n'),
                        Parent::Block | Parent::Preformatted => false,
                    };
                    if structural && text.trim().is_empty() {
                        continue;
                    }
                    self.text.push_str(text);
                }
                MarkupNode::Element(element) => self.element(element, parent),
            }
        }
    }

    fn element(&mut self, element: &Element, parent: Parent) {
        match element.tag.as_str() {
            "br" => self.text.push('\n'),
            "ul" | "ol" => self.list(element),
            "li" => self.list_item(element, ListMarker::Bullet),
            "table" | "thead" | "tbody" | "tfoot" => self.walk(&element.children, Parent::Table),
            "tr" => self.table_row(element),
            tag => {
                if parent == Parent::ListItem && is_block(tag) {
                    self.break_line_within_item();
                }
                let start = self.text.len();
                let inner = if tag == "pre" || parent == Parent::Preformatted {
                    Parent::Preformatted
                } else {
                    Parent::Block
                };
                self.walk(&element.children, inner);
                let end = self.text.len();
                let in_code_block = tag == "code" && parent == Parent::Preformatted;
                if let Some(style) = StyleTag::from_element(tag)
                    && end > start
                    && !in_code_block
                {
                    self.spans.push(StyleSpan::new(start..end, style));
                }
            }
        }
    }

    fn list(&mut self, element: &Element) {
        if !self.text.is_empty() && !self.text.ends_with('\n') {
            self.text.push('\n');
        }
        let ordered = element.tag == "ol";
        let mut ordinal = element
            .attr("start")
            .and_then(|start| start.trim().parse::<u32>().ok())
            .unwrap_or(1);
        self.list_depth += 1;
        for child in &element.children {
            match child {
                MarkupNode::Element(item) if item.tag == "li" => {
                    let marker = if ordered {
                        ListMarker::Ordinal(ordinal)
                    } else {
                        ListMarker::Bullet
                    };
                    ordinal = ordinal.saturating_add(1);
                    self.list_item(item, marker);
                }
                other => self.walk(std::slice::from_ref(other), Parent::List),
            }
        }
        self.list_depth -= 1;
    }

    fn list_item(&mut self, item: &Element, marker: ListMarker) {
        let start = self.text.len();
        let depth = self.list_depth.max(1);
        for _ in 1..depth {
            self.text.push_str("  ");
        }
        self.text.push_str(&marker.label());
        let content_start = self.text.len();
        let outer_content_start = std::mem::replace(&mut self.item_content_start, content_start);
        self.walk(&item.children, Parent::ListItem);
        self.item_content_start = outer_content_start;
        let end = self.text.trim_end_matches('\n').len().max(content_start);
        self.spans
            .push(StyleSpan::new(start..end, StyleTag::ListItem(marker)));
        if !self.text.ends_with('\n') {
            self.text.push('\n');
        }
    }

    fn break_line_within_item(&mut self) {
        if self.text.len() > self.item_content_start && !self.text.ends_with('\n') {
            self.text.push('\n');
        }
    }

    fn table_row(&mut self, row: &Element) {
        let mut first = true;
        for child in &row.children {
            match child {
                MarkupNode::Element(cell) if cell.tag == "th" || cell.tag == "td" => {
                    if !first {
                        self.text.push_str(" | ");
                    }
                    first = false;
                    self.walk(&cell.children, Parent::Block);
                }
                other => self.walk(std::slice::from_ref(other), Parent::Table),
            }
        }
        if !self.text.ends_with('\n') {
            self.text.push('\n');
        }
    }
}

fn is_block(tag: &str) -> bool {
    matches!(
        tag,
        "p" | "pre" | "blockquote" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "table" | "hr"
    )
}

pub(crate) fn sort_spans(spans: &mut [StyleSpan]) {
    spans.sort_by_key(|span| (span.range.start, Reverse(span.range.end), span.tag));
}

/// Result of the positional strategy.
#[derive(Debug, Default)]
pub struct StyleMapping {
    pub spans: Vec<StyleSpan>,
    /// One `AmbiguousContentMatch` per tagged element that was skipped.
    pub misses: Vec<PreviewError>,
}

struct TagPattern {
    tag: StyleTag,
    regex: Regex,
}

fn element_pattern(name: &str) -> Regex {
    // `(?:\s[^>]*)?` keeps `<p` from matching `<pre>`.
    Regex::new(&format!(r"(?s)<{name}(?:\s[^>]*)?>(.*?)</{name}>")).expect("static pattern")
}

static TAG_PATTERNS: LazyLock<Vec<TagPattern>> = LazyLock::new(|| {
    [
        "h1",
        "h2",
        "h3",
        "h4",
        "h5",
        "h6",
        "p",
        "code",
        "pre",
        "em",
        "strong",
        "blockquote",
    ]
    .into_iter()
    .filter_map(|name| {
        StyleTag::from_element(name).map(|tag| TagPattern {
            tag,
            regex: element_pattern(name),
        })
    })
    .collect()
});

static UNORDERED_LIST: LazyLock<Regex> = LazyLock::new(|| element_pattern("ul"));
static ORDERED_LIST: LazyLock<Regex> = LazyLock::new(|| element_pattern("ol"));
static LIST_ITEM: LazyLock<Regex> = LazyLock::new(|| element_pattern("li"));
static START_ATTR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^<ol[^>]*\sstart="?(\d+)"#).expect("static pattern"));

/// Best-effort positional reconciliation of `tagged_markup` against
/// `plain_text`.
///
/// Each tag kind is searched independently. Within a kind, occurrences are
/// taken in markup order and each one is looked up in `plain_text` no
/// earlier than the end of the previous hit, so identical content can only
/// ever match forward. A miss drops that span and is recorded; the text
/// itself is unaffected.
pub fn map_styles(plain_text: &str, tagged_markup: &str) -> StyleMapping {
    let mut mapping = StyleMapping::default();

    for pattern in TAG_PATTERNS.iter() {
        let mut cursor = 0;
        for captures in pattern.regex.captures_iter(tagged_markup) {
            let Some(inner) = captures.get(1) else {
                continue;
            };
            let content = html_to_text(inner.as_str());
            if content.is_empty() {
                continue;
            }
            cursor = place(&mut mapping, plain_text, cursor, &content, pattern.tag);
        }
    }

    for (regex, ordered) in [(&*UNORDERED_LIST, false), (&*ORDERED_LIST, true)] {
        let mut cursor = 0;
        for list in regex.captures_iter(tagged_markup) {
            let (Some(whole), Some(body)) = (list.get(0), list.get(1)) else {
                continue;
            };
            let mut ordinal = START_ATTR
                .captures(whole.as_str())
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse::<u32>().ok())
                .unwrap_or(1);
            for item in LIST_ITEM.captures_iter(body.as_str()) {
                let Some(inner) = item.get(1) else {
                    continue;
                };
                let marker = if ordered {
                    ListMarker::Ordinal(ordinal)
                } else {
                    ListMarker::Bullet
                };
                ordinal = ordinal.saturating_add(1);
                let needle = format!("{}{}", marker.label(), html_to_text(inner.as_str()).trim());
                cursor = place(
                    &mut mapping,
                    plain_text,
                    cursor,
                    &needle,
                    StyleTag::ListItem(marker),
                );
            }
        }
    }

    sort_spans(&mut mapping.spans);
    mapping
}

fn place(
    mapping: &mut StyleMapping,
    plain_text: &str,
    cursor: usize,
    content: &str,
    tag: StyleTag,
) -> usize {
    match plain_text
        .get(cursor..)
        .and_then(|rest| rest.find(content))
    {
        Some(offset) => {
            let start = cursor + offset;
            let end = start + content.len();
            mapping.spans.push(StyleSpan::new(start..end, tag));
            end
        }
        None => {
            trace!(?tag, content, cursor, "no forward match for tagged content");
            mapping.misses.push(PreviewError::AmbiguousContentMatch {
                tag,
                content: content.to_string(),
            });
            cursor
        }
    }
}

#[cfg(test)]
#[path = "styles_tests.rs"]
mod styles_tests;
