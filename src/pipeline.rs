//! One full render pass: segment, convert, map styles, rasterize, assemble.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use thiserror::Error;
use tracing::debug;

use crate::{
    assemble::{RenderItem, assemble},
    error::PreviewError,
    markup::{CmarkConverter, MarkupConverter},
    math::{CacheStats, MathRasterizer},
    segment::{Segment, segment_with_diagnostics},
    styles::MappingStrategy,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RenderMode {
    #[default]
    Preview,
    /// Converter output as one unstyled run, math left as delimited source.
    RawMarkup,
}

impl RenderMode {
    pub fn toggled(self) -> Self {
        match self {
            RenderMode::Preview => RenderMode::RawMarkup,
            RenderMode::RawMarkup => RenderMode::Preview,
        }
    }
}

/// Observes the editor generation a pass was started for.
#[derive(Clone, Debug)]
pub struct CancelToken {
    latest: Arc<AtomicU64>,
    generation: u64,
}

impl CancelToken {
    pub fn new(latest: Arc<AtomicU64>, generation: u64) -> Self {
        Self { latest, generation }
    }

    /// A token that is never cancelled.
    pub fn never() -> Self {
        Self::new(Arc::new(AtomicU64::new(0)), 0)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_cancelled(&self) -> bool {
        self.latest.load(Ordering::Acquire) != self.generation
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("render pass for generation {generation} was superseded")]
pub struct Cancelled {
    pub generation: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PassStats {
    pub generation: u64,
    pub segments: usize,
    pub math: usize,
    pub elapsed: Duration,
    pub cache: CacheStats,
}

#[derive(Debug)]
pub struct RenderOutput {
    pub items: Vec<RenderItem>,
    pub diagnostics: Vec<PreviewError>,
    pub stats: PassStats,
}

/// Converter, mapping strategy and rasterizer for a session. Clones share
/// the math cache.
#[derive(Clone)]
pub struct RenderPipeline {
    converter: Arc<dyn MarkupConverter>,
    strategy: MappingStrategy,
    rasterizer: MathRasterizer,
}

impl Default for RenderPipeline {
    fn default() -> Self {
        Self::new(
            CmarkConverter,
            MappingStrategy::default(),
            MathRasterizer::default(),
        )
    }
}

impl RenderPipeline {
    pub fn new(
        converter: impl MarkupConverter + 'static,
        strategy: MappingStrategy,
        rasterizer: MathRasterizer,
    ) -> Self {
        Self {
            converter: Arc::new(converter),
            strategy,
            rasterizer,
        }
    }

    pub fn converter(&self) -> &dyn MarkupConverter {
        self.converter.as_ref()
    }

    pub fn rasterizer(&self) -> &MathRasterizer {
        &self.rasterizer
    }

    pub fn strategy(&self) -> MappingStrategy {
        self.strategy
    }

    /// Runs a pass over `text`. The token is checked between segments; a
    /// superseded pass stops early and returns [`Cancelled`]. Math already
    /// inserted into the cache by that pass stays there.
    pub fn run(
        &self,
        text: &str,
        mode: RenderMode,
        cancel: &CancelToken,
    ) -> Result<RenderOutput, Cancelled> {
        let started = Instant::now();
        let (segments, mut diagnostics) = segment_with_diagnostics(text);
        let math_count = segments.iter().filter(|s| s.is_math()).count();

        let items = match mode {
            RenderMode::Preview => self.preview(&segments, &mut diagnostics, cancel)?,
            RenderMode::RawMarkup => self.raw_markup(&segments, cancel)?,
        };

        let stats = PassStats {
            generation: cancel.generation(),
            segments: segments.len(),
            math: math_count,
            elapsed: started.elapsed(),
            cache: self.rasterizer.stats(),
        };
        debug!(
            generation = stats.generation,
            segments = stats.segments,
            math = stats.math,
            hits = stats.cache.hits,
            misses = stats.cache.misses,
            diagnostics = diagnostics.len(),
            elapsed = ?stats.elapsed,
            ?mode,
            "render pass complete"
        );

        Ok(RenderOutput {
            items,
            diagnostics,
            stats,
        })
    }

    fn preview(
        &self,
        segments: &[Segment],
        diagnostics: &mut Vec<PreviewError>,
        cancel: &CancelToken,
    ) -> Result<Vec<RenderItem>, Cancelled> {
        let mut styles = Vec::new();
        let mut math = Vec::new();
        for segment in segments {
            check(cancel)?;
            if segment.is_math() {
                let result = self.rasterizer.render(&segment.content, segment.display_math);
                if let Err(err) = &result {
                    diagnostics.push(PreviewError::Raster(err.clone()));
                }
                math.push(result);
            } else {
                let (styled, misses) =
                    self.strategy.apply(self.converter.as_ref(), &segment.content);
                diagnostics.extend(misses);
                styles.push(styled.with_source_whitespace(&segment.content));
            }
        }
        Ok(assemble(segments, &styles, &math))
    }

    fn raw_markup(
        &self,
        segments: &[Segment],
        cancel: &CancelToken,
    ) -> Result<Vec<RenderItem>, Cancelled> {
        let mut raw = String::new();
        for segment in segments {
            check(cancel)?;
            if segment.is_math() {
                raw.push_str(&segment.source_text());
            } else {
                raw.push_str(&self.converter.convert(&segment.content));
            }
        }
        Ok(vec![RenderItem::text(raw)])
    }
}

fn check(cancel: &CancelToken) -> Result<(), Cancelled> {
    if cancel.is_cancelled() {
        debug!(generation = cancel.generation(), "render pass cancelled");
        return Err(Cancelled {
            generation: cancel.generation(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{assemble::MathContent, styles::StyleTag};

    fn run_text(item: &RenderItem) -> &str {
        match item {
            RenderItem::TextRun { text, .. } => text,
            other => panic!("expected a text run, got {other:?}"),
        }
    }

    #[test]
    fn preview_pass_keeps_document_order() {
        let pipeline = RenderPipeline::default();
        let output = pipeline
            .run("A $m$ B", RenderMode::Preview, &CancelToken::never())
            .unwrap();
        assert_eq!(output.items.len(), 3);
        assert_eq!(run_text(&output.items[0]), "A ");
        assert!(matches!(
            &output.items[1],
            RenderItem::MathImage {
                content: MathContent::Image(_),
                display: false
            }
        ));
        assert_eq!(run_text(&output.items[2]), " B");
        assert_eq!((output.stats.segments, output.stats.math), (3, 1));
    }

    #[test]
    fn styles_survive_the_pass() {
        let pipeline = RenderPipeline::default();
        let output = pipeline
            .run("# Heading\n\nsome **bold**\n", RenderMode::Preview, &CancelToken::never())
            .unwrap();
        let RenderItem::TextRun { text, spans } = &output.items[0] else {
            panic!("expected a text run");
        };
        assert!(text.starts_with("Heading\n"));
        assert!(spans.iter().any(|s| s.tag == StyleTag::Heading(1)));
        assert!(spans.iter().any(|s| s.tag == StyleTag::Strong));
    }

    #[test]
    fn raster_failures_become_diagnostics() {
        let pipeline = RenderPipeline::default();
        let output = pipeline
            .run(r"bad \[\frac{1\] ok", RenderMode::Preview, &CancelToken::never())
            .unwrap();
        assert!(output.items.iter().any(RenderItem::is_fallback));
        assert!(
            output
                .diagnostics
                .iter()
                .any(|d| matches!(d, PreviewError::Raster(_)))
        );
    }

    #[test]
    fn unterminated_delimiters_are_reported_not_fatal() {
        let pipeline = RenderPipeline::default();
        let output = pipeline
            .run("costs $5", RenderMode::Preview, &CancelToken::never())
            .unwrap();
        assert_eq!(output.items.len(), 1);
        assert_eq!(run_text(&output.items[0]), "costs $5");
        assert!(matches!(
            output.diagnostics.as_slice(),
            [PreviewError::UnterminatedDelimiter { .. }]
        ));
    }

    #[test]
    fn repeated_passes_hit_the_cache() {
        let pipeline = RenderPipeline::default();
        let text = "$a$ and $$b$$ and $a$";
        pipeline.run(text, RenderMode::Preview, &CancelToken::never()).unwrap();
        let output = pipeline.run(text, RenderMode::Preview, &CancelToken::never()).unwrap();
        assert_eq!(output.stats.cache.engine_calls, 2);
        assert_eq!(output.stats.cache.entries, 2);
    }

    #[test]
    fn raw_mode_shows_converter_output() {
        let pipeline = RenderPipeline::default();
        let output = pipeline
            .run("*a* $x$", RenderMode::RawMarkup, &CancelToken::never())
            .unwrap();
        let [RenderItem::TextRun { text, spans }] = output.items.as_slice() else {
            panic!("expected one run");
        };
        assert!(spans.is_empty());
        assert!(text.contains("<em>a</em>"));
        assert!(text.ends_with("$x$"));
    }

    #[test]
    fn stale_token_cancels_the_pass() {
        let latest = Arc::new(AtomicU64::new(1));
        let token = CancelToken::new(Arc::clone(&latest), 1);
        assert!(!token.is_cancelled());
        latest.store(2, Ordering::Release);
        let pipeline = RenderPipeline::default();
        let result = pipeline.run("a $b$ c", RenderMode::Preview, &token);
        assert_eq!(result.unwrap_err(), Cancelled { generation: 1 });
    }

    #[test]
    fn mode_toggles() {
        assert_eq!(RenderMode::Preview.toggled(), RenderMode::RawMarkup);
        assert_eq!(RenderMode::RawMarkup.toggled(), RenderMode::Preview);
    }
}
