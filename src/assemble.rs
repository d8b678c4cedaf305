//! Stitching styled text runs and math images back into document order.

use crate::{
    error::RasterError,
    math::ImageHandle,
    segment::Segment,
    styles::{StyleSpan, StyledText},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MathContent {
    Image(ImageHandle),
    /// Shown when rasterization failed: the delimited source and the reason.
    Literal { source: String, error: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RenderItem {
    TextRun {
        text: String,
        spans: Vec<StyleSpan>,
    },
    MathImage {
        content: MathContent,
        display: bool,
    },
}

impl RenderItem {
    pub fn text(text: impl Into<String>) -> Self {
        RenderItem::TextRun {
            text: text.into(),
            spans: Vec::new(),
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(
            self,
            RenderItem::MathImage {
                content: MathContent::Literal { .. },
                ..
            }
        )
    }
}

/// Builds the render list.
///
/// `styles` holds one entry per text segment and `math` one entry per math
/// segment, both in segment order. Missing entries degrade to unstyled text
/// or a literal fallback.
pub fn assemble(
    segments: &[Segment],
    styles: &[StyledText],
    math: &[Result<ImageHandle, RasterError>],
) -> Vec<RenderItem> {
    let mut styles = styles.iter();
    let mut math = math.iter();

    segments
        .iter()
        .map(|segment| {
            if segment.is_math() {
                let content = match math.next() {
                    Some(Ok(handle)) => MathContent::Image(handle.clone()),
                    Some(Err(err)) => MathContent::Literal {
                        source: segment.source_text(),
                        error: err.to_string(),
                    },
                    None => MathContent::Literal {
                        source: segment.source_text(),
                        error: "not rendered".to_string(),
                    },
                };
                RenderItem::MathImage {
                    content,
                    display: segment.display_math,
                }
            } else {
                match styles.next() {
                    Some(styled) => RenderItem::TextRun {
                        text: styled.text.clone(),
                        spans: styled.spans.clone(),
                    },
                    None => RenderItem::text(segment.content.clone()),
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        markup::{CmarkConverter, MarkupConverter},
        math::MathRasterizer,
        segment::segment,
        styles::{StyleTag, project},
    };

    fn plain_styles(segments: &[Segment]) -> Vec<StyledText> {
        segments
            .iter()
            .filter(|s| !s.is_math())
            .map(|s| StyledText::plain(s.content.clone()))
            .collect()
    }

    #[test]
    fn document_order_is_preserved() {
        let rasterizer = MathRasterizer::default();
        let segments = segment("A $m$ B");
        let styles = plain_styles(&segments);
        let math: Vec<_> = segments
            .iter()
            .filter(|s| s.is_math())
            .map(|s| rasterizer.render(&s.content, s.display_math))
            .collect();

        let items = assemble(&segments, &styles, &math);
        assert_eq!(items.len(), 3);
        assert_eq!(items[0], RenderItem::text("A "));
        match &items[1] {
            RenderItem::MathImage {
                content: MathContent::Image(handle),
                display,
            } => {
                assert_eq!(handle.expression(), "m");
                assert!(!display);
            }
            other => panic!("expected math image, got {other:?}"),
        }
        assert_eq!(items[2], RenderItem::text(" B"));
    }

    #[test]
    fn failed_math_becomes_literal_fallback() {
        let rasterizer = MathRasterizer::default();
        let segments = segment(r"$$\frac{1$$");
        let math: Vec<_> = segments
            .iter()
            .map(|s| rasterizer.render(&s.content, s.display_math))
            .collect();

        let items = assemble(&segments, &[], &math);
        assert_eq!(items.len(), 1);
        assert!(items[0].is_fallback());
        match &items[0] {
            RenderItem::MathImage {
                content: MathContent::Literal { source, .. },
                display,
            } => {
                assert_eq!(source, r"$$\frac{1$$");
                assert!(display);
            }
            other => panic!("expected literal, got {other:?}"),
        }
    }

    #[test]
    fn short_inputs_degrade_instead_of_panicking() {
        let segments = segment("x $y$ z $w$");
        let items = assemble(&segments, &[], &[]);
        assert_eq!(items.len(), 4);
        assert_eq!(items[0], RenderItem::text("x "));
        assert!(items[1].is_fallback());
        assert!(items[3].is_fallback());
    }

    #[test]
    fn styles_attach_to_their_own_segment() {
        let segments = segment("*a* $m$ b");
        let styles = vec![
            project(&CmarkConverter.convert_tree("*a* ")).with_source_whitespace("*a* "),
            StyledText::plain(" b"),
        ];
        let items = assemble(&segments, &styles, &[]);
        match &items[0] {
            RenderItem::TextRun { text, spans } => {
                assert_eq!(text, "a ");
                assert!(spans.iter().any(|s| s.tag == StyleTag::Emphasis));
            }
            other => panic!("expected text run, got {other:?}"),
        }
        assert_eq!(items[2], RenderItem::text(" b"));
    }

    #[test]
    fn assembly_is_deterministic() {
        let segments = segment("p $q$ r");
        let styles = plain_styles(&segments);
        let first = assemble(&segments, &styles, &[]);
        let second = assemble(&segments, &styles, &[]);
        assert_eq!(first, second);
    }
}
