//! Live preview of Markdown with embedded LaTeX math.
//!
//! Each pass runs source text through [`segment`] (split math from markup),
//! [`markup`] (convert markup to tagged markup or a node tree), [`styles`]
//! (map tags onto styled plain text), [`math`] (rasterize expressions through
//! a cache) and [`assemble`] (stitch everything back in document order).
//! [`scheduler`] decides when a pass runs and where its output goes.

pub mod assemble;
pub mod config;
pub mod editor;
pub mod error;
pub mod html;
pub mod io;
pub mod markup;
pub mod math;
pub mod pipeline;
pub mod render;
pub mod scheduler;
pub mod segment;
pub mod styles;
pub mod theme;

pub use assemble::{MathContent, RenderItem, assemble};
pub use error::{ExternalIoError, PreviewError, RasterError};
pub use math::{EvictionPolicy, ImageHandle, MathRasterizer};
pub use pipeline::{CancelToken, RenderMode, RenderOutput, RenderPipeline};
pub use scheduler::{DisplaySurface, RenderScheduler, SchedulerState};
pub use segment::{Segment, SegmentKind, segment};
pub use styles::{MappingStrategy, StyleSpan, StyleTag, StyledText};
