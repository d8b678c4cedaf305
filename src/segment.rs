//! Splitting source text into markup and math segments.
//!
//! Delimiter families are matched in priority order, display before inline
//! within a family, so that `$$a$$` is never read as `$` + `$a$` + `$`.
//! Each match claims its byte range; later passes only scan the unclaimed
//! gaps between claims, so a claimed region behaves like an opaque
//! placeholder and delimiters can never nest.

use std::{fmt, ops::Range};

use tracing::trace;

use crate::error::PreviewError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SegmentKind {
    Text,
    Math,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Delimiter {
    /// `$$ ... $$`
    DoubleDollar,
    /// `\[ ... \]`
    Bracket,
    /// `$ ... $`
    Dollar,
    /// `\( ... \)`
    Paren,
}

impl Delimiter {
    /// Matching order. Display forms come first so the inline `$` pass can
    /// never split a `$$` pair.
    pub const PRIORITY: [Delimiter; 4] = [
        Delimiter::DoubleDollar,
        Delimiter::Bracket,
        Delimiter::Dollar,
        Delimiter::Paren,
    ];

    pub fn open(self) -> &'static str {
        match self {
            Delimiter::DoubleDollar => "$$",
            Delimiter::Bracket => "\\[",
            Delimiter::Dollar => "$",
            Delimiter::Paren => "\\(",
        }
    }

    pub fn close(self) -> &'static str {
        match self {
            Delimiter::DoubleDollar => "$$",
            Delimiter::Bracket => "\\]",
            Delimiter::Dollar => "$",
            Delimiter::Paren => "\\)",
        }
    }

    pub fn is_display(self) -> bool {
        matches!(self, Delimiter::DoubleDollar | Delimiter::Bracket)
    }

    fn honours_escape(self) -> bool {
        matches!(self, Delimiter::DoubleDollar | Delimiter::Dollar)
    }
}

impl fmt::Display for Delimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}...{}", self.open(), self.close())
    }
}

/// A contiguous slice of the source, classified as markup or math.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segment {
    pub kind: SegmentKind,
    /// Text segments hold their source verbatim; math segments hold the
    /// expression between the delimiters, untrimmed.
    pub content: String,
    pub display_math: bool,
    /// Byte range in the source text, delimiters included.
    pub source_range: Range<usize>,
    pub delimiter: Option<Delimiter>,
}

impl Segment {
    fn text(content: &str, source_range: Range<usize>) -> Self {
        Self {
            kind: SegmentKind::Text,
            content: content.to_string(),
            display_math: false,
            source_range,
            delimiter: None,
        }
    }

    fn math(content: &str, delimiter: Delimiter, source_range: Range<usize>) -> Self {
        Self {
            kind: SegmentKind::Math,
            content: content.to_string(),
            display_math: delimiter.is_display(),
            source_range,
            delimiter: Some(delimiter),
        }
    }

    pub fn is_math(&self) -> bool {
        self.kind == SegmentKind::Math
    }

    /// The segment as it appeared in the source, delimiters reinserted.
    pub fn source_text(&self) -> String {
        match self.delimiter {
            Some(delimiter) => {
                format!("{}{}{}", delimiter.open(), self.content, delimiter.close())
            }
            None => self.content.clone(),
        }
    }
}

pub fn segment(text: &str) -> Vec<Segment> {
    segment_with_diagnostics(text).0
}

/// Like [`segment`], also returning one `UnterminatedDelimiter` per opening
/// delimiter that was left as literal text.
pub fn segment_with_diagnostics(text: &str) -> (Vec<Segment>, Vec<PreviewError>) {
    let mut claims: Vec<(Range<usize>, Delimiter)> = Vec::new();
    let mut diagnostics = Vec::new();

    for delimiter in Delimiter::PRIORITY {
        let gaps = unclaimed_gaps(&claims, text.len());
        for gap in gaps {
            scan_gap(text, gap, delimiter, &mut claims, &mut diagnostics);
        }
        claims.sort_by_key(|(range, _)| range.start);
    }

    let mut segments = Vec::with_capacity(claims.len() * 2 + 1);
    let mut cursor = 0;
    for (range, delimiter) in claims {
        if range.start > cursor {
            segments.push(Segment::text(&text[cursor..range.start], cursor..range.start));
        }
        let body = range.start + delimiter.open().len()..range.end - delimiter.close().len();
        segments.push(Segment::math(&text[body], delimiter, range.clone()));
        cursor = range.end;
    }
    if cursor < text.len() {
        segments.push(Segment::text(&text[cursor..], cursor..text.len()));
    }

    (segments, diagnostics)
}

fn scan_gap(
    text: &str,
    gap: Range<usize>,
    delimiter: Delimiter,
    claims: &mut Vec<(Range<usize>, Delimiter)>,
    diagnostics: &mut Vec<PreviewError>,
) {
    let mut pos = gap.start;
    while let Some(open) = find_delimiter(text, pos..gap.end, delimiter.open(), delimiter) {
        let body_start = open + delimiter.open().len();
        match find_delimiter(text, body_start..gap.end, delimiter.close(), delimiter) {
            Some(close) if close > body_start => {
                let end = close + delimiter.close().len();
                claims.push((open..end, delimiter));
                pos = end;
            }
            Some(_) => {
                // Empty body: the opener is literal, retry from the next byte.
                pos = open + 1;
            }
            None => {
                trace!(%delimiter, offset = open, "unterminated math delimiter");
                diagnostics.push(PreviewError::UnterminatedDelimiter {
                    delimiter,
                    offset: open,
                });
                break;
            }
        }
    }
}

fn find_delimiter(
    text: &str,
    window: Range<usize>,
    needle: &str,
    delimiter: Delimiter,
) -> Option<usize> {
    let mut from = window.start;
    while from < window.end {
        let found = from + text[from..window.end].find(needle)?;
        if delimiter.honours_escape() && found > 0 && text.as_bytes()[found - 1] == b'\\' {
            from = found + 1;
            continue;
        }
        return Some(found);
    }
    None
}

fn unclaimed_gaps(claims: &[(Range<usize>, Delimiter)], len: usize) -> Vec<Range<usize>> {
    let mut gaps = Vec::with_capacity(claims.len() + 1);
    let mut cursor = 0;
    for (range, _) in claims {
        if range.start > cursor {
            gaps.push(cursor..range.start);
        }
        cursor = range.end;
    }
    if cursor < len {
        gaps.push(cursor..len);
    }
    gaps
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn kinds(segments: &[Segment]) -> Vec<(SegmentKind, &str, bool)> {
        segments
            .iter()
            .map(|s| (s.kind, s.content.as_str(), s.display_math))
            .collect()
    }

    #[test]
    fn plain_text_is_one_segment() {
        let segments = segment("just words");
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].kind, SegmentKind::Text);
        assert_eq!(segments[0].source_range, 0..10);
    }

    #[test]
    fn empty_text_has_no_segments() {
        assert!(segment("").is_empty());
    }

    #[test]
    fn double_dollar_wins_over_single() {
        let segments = segment("$$a$$");
        assert_eq!(kinds(&segments), vec![(SegmentKind::Math, "a", true)]);
        assert_eq!(segments[0].delimiter, Some(Delimiter::DoubleDollar));
    }

    #[test]
    fn inline_math_between_text() {
        let segments = segment("A $m$ B");
        assert_eq!(
            kinds(&segments),
            vec![
                (SegmentKind::Text, "A ", false),
                (SegmentKind::Math, "m", false),
                (SegmentKind::Text, " B", false),
            ]
        );
        assert_eq!(segments[1].source_range, 2..5);
    }

    #[test]
    fn all_four_families() {
        let segments = segment(r"a $$x$$ b \[y\] c $z$ d \(w\)");
        let math: Vec<_> = segments
            .iter()
            .filter(|s| s.is_math())
            .map(|s| (s.content.as_str(), s.delimiter.unwrap()))
            .collect();
        assert_eq!(
            math,
            vec![
                ("x", Delimiter::DoubleDollar),
                ("y", Delimiter::Bracket),
                ("z", Delimiter::Dollar),
                ("w", Delimiter::Paren),
            ]
        );
    }

    #[test]
    fn matches_are_shortest() {
        let segments = segment("$a$ and $b$");
        assert_eq!(
            kinds(&segments),
            vec![
                (SegmentKind::Math, "a", false),
                (SegmentKind::Text, " and ", false),
                (SegmentKind::Math, "b", false),
            ]
        );
    }

    #[test]
    fn unterminated_delimiter_is_literal() {
        let (segments, diagnostics) = segment_with_diagnostics("costs $5 today");
        assert_eq!(kinds(&segments), vec![(SegmentKind::Text, "costs $5 today", false)]);
        assert!(matches!(
            diagnostics.as_slice(),
            [PreviewError::UnterminatedDelimiter {
                delimiter: Delimiter::Dollar,
                offset: 6
            }]
        ));
    }

    #[test]
    fn claimed_display_math_hides_its_interior() {
        // The `$` inside the display block must not pair with the one after it.
        let segments = segment("$$a $ b$$ c $d$");
        assert_eq!(
            kinds(&segments),
            vec![
                (SegmentKind::Math, "a $ b", true),
                (SegmentKind::Text, " c ", false),
                (SegmentKind::Math, "d", false),
            ]
        );
    }

    #[test]
    fn inline_match_cannot_span_a_display_block() {
        let segments = segment(r"$a \[x\] b$");
        assert_eq!(
            kinds(&segments),
            vec![
                (SegmentKind::Text, "$a ", false),
                (SegmentKind::Math, "x", true),
                (SegmentKind::Text, " b$", false),
            ]
        );
    }

    #[test]
    fn escaped_dollars_are_text() {
        let segments = segment(r"price \$5 and \$6");
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].kind, SegmentKind::Text);
    }

    #[test]
    fn empty_pairs_stay_literal() {
        let segments = segment("$$$$");
        assert!(segments.iter().all(|s| s.kind == SegmentKind::Text));
    }

    #[test]
    fn multiline_display_math() {
        let text = "before\n$$\nx = 1\n$$\nafter";
        let segments = segment(text);
        assert_eq!(segments[1].content, "\nx = 1\n");
        assert!(segments[1].display_math);
    }

    proptest! {
        #[test]
        fn segments_round_trip(text in r"[ab$\\()\[\] \n]{0,40}") {
            let segments = segment(&text);
            let rebuilt: String = segments.iter().map(Segment::source_text).collect();
            prop_assert_eq!(rebuilt, text);
        }

        #[test]
        fn segments_cover_source_exactly_once(text in r"[xy$\\()\[\] é]{0,40}") {
            let segments = segment(&text);
            let mut cursor = 0;
            for segment in &segments {
                prop_assert_eq!(segment.source_range.start, cursor);
                prop_assert!(segment.source_range.end > segment.source_range.start);
                prop_assert_eq!(&text[segment.source_range.clone()], segment.source_text());
                cursor = segment.source_range.end;
            }
            prop_assert_eq!(cursor, text.len());
        }
    }
}
