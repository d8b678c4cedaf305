use std::{
    fmt, io,
    path::{Path, PathBuf},
    time::Duration,
};

use thiserror::Error;

use crate::segment::Delimiter;
use crate::styles::StyleTag;

/// Non-fatal problems found during a render pass.
///
/// None of these abort a pass. They are collected into
/// [`RenderOutput::diagnostics`](crate::pipeline::RenderOutput) so callers
/// can log or display them.
#[derive(Debug, Error)]
pub enum PreviewError {
    #[error("unterminated {delimiter} delimiter at byte {offset}, kept as text")]
    UnterminatedDelimiter { delimiter: Delimiter, offset: usize },

    #[error("could not place {tag:?} content {content:?} after the previous match")]
    AmbiguousContentMatch { tag: StyleTag, content: String },

    #[error(transparent)]
    Raster(#[from] RasterError),

    #[error(transparent)]
    Io(#[from] ExternalIoError),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RasterError {
    #[error("math engine rejected {expr:?}: {message}")]
    Rejected { expr: String, message: String },

    #[error("math engine did not answer for {expr:?} within {waited:?}")]
    Timeout { expr: String, waited: Duration },

    #[error("math engine worker exited before answering")]
    EngineUnavailable,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IoOperation {
    Read,
    Write,
}

impl fmt::Display for IoOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoOperation::Read => f.write_str("read"),
            IoOperation::Write => f.write_str("write"),
        }
    }
}

#[derive(Debug, Error)]
#[error("failed to {operation} {}", path.display())]
pub struct ExternalIoError {
    pub operation: IoOperation,
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

impl ExternalIoError {
    pub fn new(operation: IoOperation, path: &Path, source: io::Error) -> Self {
        Self {
            operation,
            path: path.to_path_buf(),
            source,
        }
    }
}
