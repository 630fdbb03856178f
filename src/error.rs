//! Error taxonomy for the export pipeline
//!
//! Segment-level failures are recoverable: they are collected into the
//! per-run report and never abort processing of remaining segments.
//! `MergeIoFailure` is fatal for the merge run that hit it; partial output
//! is preserved for inspection.

use std::path::PathBuf;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    /// User-correctable annotation error; pending marks are left untouched.
    #[error("invalid segment bounds for {video_id}: {reason}")]
    InvalidSegmentBounds { video_id: String, reason: String },

    #[error("cannot open source video {path}: {reason}")]
    SourceUnreadable { path: PathBuf, reason: String },

    #[error(
        "segment {video_id}_segment_{segment_index} starts at {start_time:.3}s, \
         past the end of a {source_duration:.3}s source"
    )]
    SeekOutOfRange {
        video_id: String,
        segment_index: u32,
        start_time: f64,
        source_duration: f64,
    },

    #[error("encoding {video_id}_segment_{segment_index} failed: {reason}")]
    EncodeFailure {
        video_id: String,
        segment_index: u32,
        reason: String,
    },

    #[error(
        "decoding {video_id}_segment_{segment_index} failed after \
         {frames_written} frames: {reason}"
    )]
    DecodeFailure {
        video_id: String,
        segment_index: u32,
        frames_written: usize,
        reason: String,
    },

    #[error("I/O failure while {context}: {source}")]
    IoFailure {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("segment directory {} has no usable metadata record", dir.display())]
    SourceMetadataMissing { dir: PathBuf },

    #[error("dataset merge failed while {context}: {source}")]
    MergeIoFailure {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::IoFailure {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn merge_io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::MergeIoFailure {
            context: context.into(),
            source,
        }
    }
}
