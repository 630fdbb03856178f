//! Video Segment Annotator
//!
//! Deterministic annotation-to-dataset export pipeline: operator-marked time
//! segments become standalone clips, numbered frame sequences with metadata,
//! and a unified, collision-free image dataset with aggregate statistics.

pub mod config;
pub mod dataset;
pub mod error;
pub mod export;
pub mod extract;
pub mod processing;
pub mod segments;
pub mod video;

// Re-export main types for easy access
pub use crate::config::{Config, ConfigBuilder};
pub use crate::dataset::{dataset_statistics, DatasetMerger, DatasetStatistics, DatasetSummary};
pub use crate::error::{PipelineError, Result};
pub use crate::export::{Clip, ClipExporter, FrameWindow};
pub use crate::extract::{FrameExtractor, FrameSet, SegmentMetadata};
pub use crate::processing::{
    load_annotations, BatchExporter, ExportJob, ExportReport, SegmentOutcome, SegmentStatus,
};
pub use crate::segments::{AnnotationSession, MarkOutcome, Segment, SegmentStore};
pub use crate::video::{VideoInfo, VideoProcessor};
