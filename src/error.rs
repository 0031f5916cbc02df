use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Raster header problems. Truncated sample data is not an error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("raster is empty")]
    Empty,

    #[error("unsupported raster magic {0:?} (expected P5 or P2)")]
    BadMagic(String),

    #[error("raster header ended before the {0} field")]
    TruncatedHeader(&'static str),

    #[error("invalid {field} in raster header: {value:?}")]
    BadHeaderField { field: &'static str, value: String },
}

/// Failures of the external collaborators (ffmpeg, ffprobe, renderer).
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {}s", .timeout.as_secs())]
    Timeout { program: String, timeout: Duration },

    #[error("{program} exited with status {code}: {stderr}")]
    NonZeroExit {
        program: String,
        code: i32,
        stderr: String,
    },

    #[error("unexpected output from {program}: {detail}")]
    BadOutput { program: String, detail: String },
}

/// Stage-level failures of a pipeline run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("input file not found: {0}")]
    MissingInput(PathBuf),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{stage} failed: {source}")]
    Tool {
        stage: &'static str,
        #[source]
        source: ToolError,
    },

    #[error("no raster frames found in {0} after extraction")]
    NoFrames(PathBuf),

    #[error("all {0} frames failed to convert")]
    AllFramesFailed(usize),

    #[error("run cancelled after {done} of {total} frames")]
    Cancelled { done: usize, total: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub(crate) fn tool(stage: &'static str) -> impl FnOnce(ToolError) -> Self {
        move |source| PipelineError::Tool { stage, source }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
