use ratatui::{
    style::Style,
    text::{Line, Span},
};
use unicode_width::UnicodeWidthChar;

use crate::{
    assemble::{MathContent, RenderItem},
    styles::{StyleSpan, StyleTag},
    theme::Theme,
};

#[derive(Debug)]
pub struct PreviewRender {
    pub lines: Vec<Line<'static>>,
    pub total_lines: usize,
}

/// Lays a render list out as wrapped terminal lines. Text runs and inline
/// math flow together; display math gets its own centred line.
pub fn render_preview(items: &[RenderItem], width: usize, theme: &Theme) -> PreviewRender {
    let mut renderer = Renderer::new(width.max(1), theme);
    for item in items {
        renderer.render_item(item);
    }
    renderer.finish()
}

struct Renderer<'a> {
    wrap_width: usize,
    theme: &'a Theme,
    lines: Vec<Line<'static>>,
    pending: Vec<FragmentItem>,
    after_display: bool,
}

impl<'a> Renderer<'a> {
    fn new(wrap_width: usize, theme: &'a Theme) -> Self {
        Self {
            wrap_width,
            theme,
            lines: Vec::new(),
            pending: Vec::new(),
            after_display: false,
        }
    }

    fn render_item(&mut self, item: &RenderItem) {
        match item {
            RenderItem::TextRun { text, spans } => self.render_text_run(text, spans),
            RenderItem::MathImage {
                content,
                display: false,
            } => self.render_inline_math(content),
            RenderItem::MathImage {
                content,
                display: true,
            } => self.render_display_math(content),
        }
    }

    fn render_text_run(&mut self, text: &str, spans: &[StyleSpan]) {
        for (range, style) in styled_pieces(text, spans, self.theme) {
            tokenize_text(&text[range], style, &mut self.pending);
        }
    }

    fn render_inline_math(&mut self, content: &MathContent) {
        let (label, style) = match content {
            MathContent::Image(handle) => (handle.expression().to_string(), self.theme.math_style(false)),
            MathContent::Literal { source, .. } => (source.clone(), self.theme.math_error_style()),
        };
        let label = label.replace(['\n', '\r'], " ");
        let width = visible_width(&label);
        self.pending.push(FragmentItem::Token(Fragment {
            text: label,
            style,
            kind: FragmentKind::Word,
            width,
        }));
    }

    fn render_display_math(&mut self, content: &MathContent) {
        self.flush_paragraph();
        let (body, style) = match content {
            MathContent::Image(handle) => (handle.expression().to_string(), self.theme.math_style(true)),
            MathContent::Literal { source, .. } => (source.clone(), self.theme.math_error_style()),
        };
        for row in body.lines().map(str::trim).filter(|row| !row.is_empty()) {
            let row_width = visible_width(row);
            let padding = self.wrap_width.saturating_sub(row_width) / 2;
            let mut spans = Vec::with_capacity(2);
            if padding > 0 {
                spans.push(Span::raw(" ".repeat(padding)));
            }
            spans.push(Span::styled(row.to_string(), style));
            self.lines.push(Line::from(spans));
        }
        self.after_display = true;
    }

    /// Wraps everything collected since the last display block.
    fn flush_paragraph(&mut self) {
        let mut fragments = std::mem::take(&mut self.pending);
        if self.after_display && matches!(fragments.first(), Some(FragmentItem::LineBreak)) {
            fragments.remove(0);
        }
        if matches!(fragments.last(), Some(FragmentItem::LineBreak)) {
            fragments.pop();
        }
        self.after_display = false;
        if fragments.is_empty() {
            return;
        }
        let lines = wrap_fragments(&fragments, "", "", self.wrap_width);
        self.consume_lines(lines);
    }

    fn consume_lines(&mut self, outputs: Vec<LineOutput>) {
        for output in outputs {
            let spans: Vec<Span<'static>> = output
                .spans
                .into_iter()
                .map(|segment| Span::styled(segment.text, segment.style))
                .collect();
            self.lines.push(Line::from(spans));
        }
    }

    fn finish(mut self) -> PreviewRender {
        self.flush_paragraph();
        while self.lines.len() > 1 && self.lines.last().is_some_and(|line| line_width(line) == 0) {
            self.lines.pop();
        }
        if self.lines.is_empty() {
            self.lines.push(Line::from(""));
        }
        let total_lines = self.lines.len();
        PreviewRender {
            lines: self.lines,
            total_lines,
        }
    }
}

/// Splits `text` at every span boundary and layers the theme styles of the
/// spans covering each piece, outermost first.
fn styled_pieces(
    text: &str,
    spans: &[StyleSpan],
    theme: &Theme,
) -> Vec<(std::ops::Range<usize>, Style)> {
    let layers: Vec<(std::ops::Range<usize>, Style)> = spans
        .iter()
        .filter_map(|span| {
            let range = span.range.start.min(text.len())..span.range.end.min(text.len());
            if range.is_empty() {
                return None;
            }
            match span.tag {
                StyleTag::ListItem(marker) => {
                    // Nested items start with their indentation.
                    let item = text.get(range.clone())?;
                    let start = range.end - item.trim_start_matches(' ').len();
                    let end = (start + marker.label().len()).min(range.end);
                    text.is_char_boundary(end)
                        .then(|| (start..end, theme.list_marker_style()))
                }
                tag => Some((range, theme.tag_style(tag))),
            }
        })
        .filter(|(range, _)| text.is_char_boundary(range.start) && text.is_char_boundary(range.end))
        .collect();

    let mut boundaries: Vec<usize> = vec![0, text.len()];
    for (range, _) in &layers {
        boundaries.push(range.start);
        boundaries.push(range.end);
    }
    boundaries.sort_unstable();
    boundaries.dedup();

    boundaries
        .windows(2)
        .map(|pair| {
            let piece = pair[0]..pair[1];
            let style = layers
                .iter()
                .filter(|(range, _)| range.start <= piece.start && piece.end <= range.end)
                .fold(Style::default(), |style, (_, layer)| style.patch(*layer));
            (piece, style)
        })
        .collect()
}

#[derive(Clone)]
struct LineSegment {
    text: String,
    style: Style,
}

#[derive(Clone)]
struct LineOutput {
    spans: Vec<LineSegment>,
}

#[derive(Clone)]
struct Fragment {
    text: String,
    style: Style,
    kind: FragmentKind,
    width: usize,
}

#[derive(Clone, Copy)]
enum FragmentKind {
    Word,
    Whitespace,
}

#[derive(Clone)]
enum FragmentItem {
    Token(Fragment),
    LineBreak,
}

fn tokenize_text(text: &str, style: Style, fragments: &mut Vec<FragmentItem>) {
    let mut builder: Option<TokenBuilder> = None;
    for ch in text.chars() {
        if ch == '\r' {
            continue;
        }
        if ch == '\n' {
            if let Some(token) = builder.take() {
                fragments.push(FragmentItem::Token(token.finish()));
            }
            fragments.push(FragmentItem::LineBreak);
            continue;
        }

        let (actual, repeat) = if ch == '\t' { (' ', 4) } else { (ch, 1) };
        for _ in 0..repeat {
            let is_whitespace = actual.is_whitespace();
            match builder.as_mut() {
                Some(current) if current.kind_matches(is_whitespace) => current.push_char(actual),
                _ => {
                    if let Some(existing) = builder.take() {
                        fragments.push(FragmentItem::Token(existing.finish()));
                    }
                    let mut new_builder = TokenBuilder::new(style, is_whitespace);
                    new_builder.push_char(actual);
                    builder = Some(new_builder);
                }
            }
        }
    }

    if let Some(token) = builder {
        fragments.push(FragmentItem::Token(token.finish()));
    }
}

struct TokenBuilder {
    text: String,
    style: Style,
    kind: FragmentKind,
    width: usize,
}

impl TokenBuilder {
    fn new(style: Style, is_whitespace: bool) -> Self {
        Self {
            text: String::new(),
            style,
            kind: if is_whitespace {
                FragmentKind::Whitespace
            } else {
                FragmentKind::Word
            },
            width: 0,
        }
    }

    fn kind_matches(&self, is_whitespace: bool) -> bool {
        matches!(
            (self.kind, is_whitespace),
            (FragmentKind::Whitespace, true) | (FragmentKind::Word, false)
        )
    }

    fn push_char(&mut self, ch: char) {
        self.text.push(ch);
        self.width += UnicodeWidthChar::width(ch).unwrap_or(0);
    }

    fn finish(self) -> Fragment {
        Fragment {
            text: self.text,
            style: self.style,
            kind: self.kind,
            width: self.width,
        }
    }
}

fn wrap_fragments(
    fragments: &[FragmentItem],
    first_prefix: &str,
    continuation_prefix: &str,
    width: usize,
) -> Vec<LineOutput> {
    let mut outputs = Vec::new();
    let mut builder = LineBuilder::new(first_prefix.to_string());
    let mut pending_whitespace: Vec<Fragment> = Vec::new();

    for fragment in fragments {
        match fragment {
            FragmentItem::LineBreak => {
                builder.consume_pending(&mut pending_whitespace);
                outputs.push(builder.build_line());
                builder = LineBuilder::new(continuation_prefix.to_string());
            }
            FragmentItem::Token(token) => match token.kind {
                FragmentKind::Whitespace => {
                    pending_whitespace.push(token.clone());
                }
                FragmentKind::Word => {
                    let whitespace_width: usize =
                        pending_whitespace.iter().map(|item| item.width).sum();
                    if builder.current_width() > builder.prefix_width
                        && builder.current_width() + whitespace_width + token.width > width
                    {
                        pending_whitespace.clear();
                        outputs.push(builder.build_line());
                        builder = LineBuilder::new(continuation_prefix.to_string());
                    }

                    builder.append_with_pending(token.clone(), &mut pending_whitespace);
                }
            },
        }
    }

    builder.consume_pending(&mut pending_whitespace);
    outputs.push(builder.build_line());
    outputs
}

struct LineBuilder {
    segments: Vec<LineSegment>,
    width: usize,
    prefix_width: usize,
}

impl LineBuilder {
    fn new(prefix: String) -> Self {
        let prefix_width = visible_width(&prefix);
        let mut segments = Vec::new();
        if !prefix.is_empty() {
            segments.push(LineSegment {
                text: prefix,
                style: Style::default(),
            });
        }
        Self {
            segments,
            width: prefix_width,
            prefix_width,
        }
    }

    fn current_width(&self) -> usize {
        self.width
    }

    fn append_with_pending(&mut self, token: Fragment, pending_whitespace: &mut Vec<Fragment>) {
        self.consume_pending(pending_whitespace);
        self.append_token(token);
    }

    fn consume_pending(&mut self, pending_whitespace: &mut Vec<Fragment>) {
        for fragment in pending_whitespace.drain(..) {
            self.append_token(fragment);
        }
    }

    fn append_token(&mut self, fragment: Fragment) {
        if fragment.text.is_empty() {
            return;
        }
        // Adjacent pieces of one word may carry different styles.
        match self.segments.last_mut() {
            Some(last) if last.style == fragment.style => last.text.push_str(&fragment.text),
            _ => self.segments.push(LineSegment {
                text: fragment.text,
                style: fragment.style,
            }),
        }
        self.width += fragment.width;
    }

    fn build_line(mut self) -> LineOutput {
        if self.segments.is_empty() {
            self.segments.push(LineSegment {
                text: String::new(),
                style: Style::default(),
            });
        }
        LineOutput {
            spans: self.segments,
        }
    }
}

fn visible_width(text: &str) -> usize {
    text.chars()
        .map(|ch| UnicodeWidthChar::width(ch).unwrap_or(0))
        .sum()
}

fn line_width(line: &Line<'_>) -> usize {
    line.spans
        .iter()
        .map(|span| visible_width(span.content.as_ref()))
        .sum()
}
