//! Markdown to tagged markup, and markdown to a node tree.
//!
//! The converter itself is an external collaborator behind
//! [`MarkupConverter`]. Besides the flat tagged string it hands out the same
//! document as `{tag, children}` nodes, so the style mapper can walk a tree
//! instead of searching rendered text.

use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag, TagEnd, html};

pub trait MarkupConverter: Send + Sync {
    /// Converts one markdown fragment into tagged markup. Never fails; an
    /// empty input yields an empty string.
    fn convert(&self, markdown: &str) -> String;

    /// The same conversion as a node tree. Element names and the newlines
    /// between blocks match [`MarkupConverter::convert`].
    fn convert_tree(&self, markdown: &str) -> Vec<MarkupNode>;
}

/// CommonMark with tables and strikethrough, rendered by `pulldown-cmark`.
#[derive(Clone, Copy, Debug, Default)]
pub struct CmarkConverter;

fn options() -> Options {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options
}

impl MarkupConverter for CmarkConverter {
    fn convert(&self, markdown: &str) -> String {
        let parser = Parser::new_ext(markdown, options());
        let mut out = String::with_capacity(markdown.len() * 3 / 2);
        html::push_html(&mut out, parser);
        out
    }

    fn convert_tree(&self, markdown: &str) -> Vec<MarkupNode> {
        let mut builder = TreeBuilder::new();
        for event in Parser::new_ext(markdown, options()) {
            builder.event(event);
        }
        builder.finish()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MarkupNode {
    Element(Element),
    /// Character data, entities already decoded.
    Text(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Element {
    /// Lower-case tag name.
    pub tag: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<MarkupNode>,
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_attr(mut self, name: &str, value: impl Into<String>) -> Self {
        self.attrs.push((name.to_string(), value.into()));
        self
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Elements followed by a newline once closed.
const BLOCK_TAGS: &[&str] = &[
    "p", "h1", "h2", "h3", "h4", "h5", "h6", "blockquote", "ol", "ul", "li", "table", "div",
];

/// Builds nodes from the parser's event stream.
///
/// `line_start` mirrors whether the equivalent HTML output would currently
/// end in a newline; block elements only insert a separating `"\n"` when it
/// would not.
struct TreeBuilder {
    roots: Vec<MarkupNode>,
    stack: Vec<Element>,
    line_start: bool,
    in_table_head: bool,
}

impl TreeBuilder {
    fn new() -> Self {
        Self {
            roots: Vec::new(),
            stack: Vec::new(),
            line_start: true,
            in_table_head: false,
        }
    }

    fn event(&mut self, event: Event<'_>) {
        match event {
            Event::Start(tag) => self.start(tag),
            Event::End(tag) => self.end(tag),
            Event::Text(text) => self.text(&text),
            Event::Code(code) => {
                self.open(Element::new("code"));
                self.text(&code);
                self.close();
            }
            Event::InlineMath(math) => self.text(&format!("${math}$")),
            Event::DisplayMath(math) => self.text(&format!("$${math}$$")),
            // Raw HTML only contributes its text.
            Event::Html(raw) | Event::InlineHtml(raw) => self.text(&html_to_text(&raw)),
            Event::FootnoteReference(label) => self.text(&format!("[^{label}]")),
            Event::SoftBreak => self.text("\n"),
            Event::HardBreak => {
                self.void(Element::new("br"));
                self.line_start = true;
            }
            Event::Rule => {
                self.block_break();
                self.void(Element::new("hr"));
                self.text("\n");
            }
            Event::TaskListMarker(checked) => self.text(if checked { "[x] " } else { "[ ] " }),
        }
    }

    fn start(&mut self, tag: Tag<'_>) {
        match tag {
            Tag::Paragraph => self.open_block(Element::new("p")),
            Tag::Heading { level, .. } => {
                self.open_block(Element::new(format!("h{}", level as usize)))
            }
            Tag::BlockQuote(_) => {
                self.open_block(Element::new("blockquote"));
                self.text("\n");
            }
            Tag::CodeBlock(kind) => {
                self.open_block(Element::new("pre"));
                let mut code = Element::new("code");
                if let CodeBlockKind::Fenced(info) = kind
                    && let Some(lang) = info.split_whitespace().next()
                {
                    code = code.with_attr("class", format!("language-{lang}"));
                }
                self.open(code);
            }
            Tag::HtmlBlock => {}
            Tag::List(Some(1)) => {
                self.open_block(Element::new("ol"));
                self.text("\n");
            }
            Tag::List(Some(start)) => {
                self.open_block(Element::new("ol").with_attr("start", start.to_string()));
                self.text("\n");
            }
            Tag::List(None) => {
                self.open_block(Element::new("ul"));
                self.text("\n");
            }
            Tag::Item => self.open_block(Element::new("li")),
            Tag::FootnoteDefinition(label) => {
                self.open_block(Element::new("div"));
                self.text(&format!("[^{label}]: "));
            }
            Tag::Table(_) => self.open_block(Element::new("table")),
            Tag::TableHead => {
                self.in_table_head = true;
                self.open(Element::new("thead"));
                self.open(Element::new("tr"));
            }
            Tag::TableRow => self.open(Element::new("tr")),
            Tag::TableCell => {
                let cell = if self.in_table_head { "th" } else { "td" };
                self.open(Element::new(cell));
            }
            Tag::Emphasis => self.open(Element::new("em")),
            Tag::Strong => self.open(Element::new("strong")),
            Tag::Strikethrough => self.open(Element::new("del")),
            Tag::Link { dest_url, .. } => {
                self.open(Element::new("a").with_attr("href", dest_url.to_string()))
            }
            Tag::Image { dest_url, .. } => {
                self.open(Element::new("img").with_attr("src", dest_url.to_string()))
            }
            _ => self.open(Element::new("span")),
        }
    }

    fn end(&mut self, tag: TagEnd) {
        match tag {
            TagEnd::HtmlBlock => {}
            TagEnd::CodeBlock => {
                self.close();
                self.close();
                self.text("\n");
            }
            TagEnd::TableHead => {
                self.in_table_head = false;
                self.close();
                self.close();
            }
            _ => {
                if self.close().is_some_and(|tag| BLOCK_TAGS.contains(&tag.as_str())) {
                    self.text("\n");
                }
            }
        }
    }

    fn children_mut(&mut self) -> &mut Vec<MarkupNode> {
        match self.stack.last_mut() {
            Some(parent) => &mut parent.children,
            None => &mut self.roots,
        }
    }

    fn text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.line_start = text.ends_with('\n');
        let children = self.children_mut();
        if let Some(MarkupNode::Text(existing)) = children.last_mut() {
            existing.push_str(text);
        } else {
            children.push(MarkupNode::Text(text.to_string()));
        }
    }

    fn block_break(&mut self) {
        if !self.line_start {
            self.text("\n");
        }
    }

    fn open_block(&mut self, element: Element) {
        self.block_break();
        self.open(element);
    }

    fn open(&mut self, element: Element) {
        self.stack.push(element);
        self.line_start = false;
    }

    fn void(&mut self, element: Element) {
        self.children_mut().push(MarkupNode::Element(element));
        self.line_start = false;
    }

    /// Closes the innermost element and returns its tag.
    fn close(&mut self) -> Option<String> {
        self.line_start = false;
        let element = self.stack.pop()?;
        let tag = element.tag.clone();
        self.children_mut().push(MarkupNode::Element(element));
        Some(tag)
    }

    fn finish(mut self) -> Vec<MarkupNode> {
        while !self.stack.is_empty() {
            self.close();
        }
        self.roots
    }
}

/// Text content of an HTML snippet: tags dropped, the converter's escapes
/// decoded.
pub fn html_to_text(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if in_tag => {}
            _ => out.push(ch),
        }
    }
    decode_basic_entities(&out)
}

fn decode_basic_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}
