use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::ExtractionConfig;
use crate::error::{PipelineError, Result};
use crate::export::{stderr_reason, Clip};
use crate::segments::Segment;
use crate::video::VideoInfo;

/// Metadata file written beside every extracted frame sequence.
pub const METADATA_FILE: &str = "metadata.json";

/// Per-segment extraction record persisted as `metadata.json`.
///
/// The schema is strict: unknown fields are rejected on load. `frame_count`
/// always equals the number of image files actually written; a record whose
/// extraction stopped short is flagged `incomplete` so the dataset merge can
/// exclude it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SegmentMetadata {
    pub video_id: String,
    pub segment_index: u32,
    pub source_video_path: PathBuf,
    pub start_time: f64,
    pub end_time: f64,
    pub duration: f64,
    pub fps: f64,
    pub frame_count: usize,
    pub resolution: (u32, u32),
    pub extraction_timestamp: DateTime<Utc>,
    #[serde(default)]
    pub incomplete: bool,
}

impl SegmentMetadata {
    /// Load and validate the metadata record of a segment directory.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(METADATA_FILE);
        let raw = std::fs::read_to_string(&path).map_err(|_| {
            PipelineError::SourceMetadataMissing {
                dir: dir.to_path_buf(),
            }
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            warn!("Rejecting malformed metadata in {}: {}", dir.display(), e);
            PipelineError::SourceMetadataMissing {
                dir: dir.to_path_buf(),
            }
        })
    }

    async fn persist(&self, dir: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(|e| {
            PipelineError::io(
                "serializing segment metadata",
                std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            )
        })?;
        tokio::fs::write(dir.join(METADATA_FILE), json)
            .await
            .map_err(|e| PipelineError::io("writing segment metadata", e))
    }
}

/// The extracted frames of one clip plus their metadata record.
#[derive(Debug, Clone)]
pub struct FrameSet {
    pub directory: PathBuf,
    /// Frame image paths ordered by 1-based frame index.
    pub frames: Vec<PathBuf>,
    pub metadata: SegmentMetadata,
}

/// Zero-padding width for frame filenames: at least `minimum`, widened when
/// the expected count would overflow it.
pub fn padding_width(minimum: usize, frame_count: u64) -> usize {
    let digits = frame_count.max(1).to_string().len();
    minimum.max(digits)
}

/// Number of frames a stride keeps out of a clip.
pub fn expected_frames(clip_frames: u64, stride: u32) -> u64 {
    let stride = stride.max(1) as u64;
    clip_frames.div_ceil(stride)
}

/// Decodes rendered clips into numbered frame sequences.
#[derive(Debug, Clone)]
pub struct FrameExtractor {
    config: ExtractionConfig,
}

impl FrameExtractor {
    pub fn new(config: ExtractionConfig) -> Self {
        Self { config }
    }

    /// Frame directory for a segment: `{frames_root}/{video_id}_segment_{index}`.
    pub fn frames_dir(&self, frames_root: &Path, segment: &Segment) -> PathBuf {
        frames_root.join(segment.name())
    }

    /// Decode the rendered clip into sequentially numbered images and persist
    /// the metadata record beside them.
    ///
    /// On decode failure the partial output directory is left in place with a
    /// metadata record counting only the frames actually written and flagged
    /// `incomplete`, so the dataset merge skips it.
    pub async fn extract_frames(
        &self,
        clip: &Clip,
        segment: &Segment,
        source: &VideoInfo,
        frames_root: &Path,
    ) -> Result<FrameSet> {
        let output_dir = self.frames_dir(frames_root, segment);
        tokio::fs::create_dir_all(&output_dir)
            .await
            .map_err(|e| PipelineError::io("creating frames output directory", e))?;

        let expected = expected_frames(clip.frame_count, self.config.stride);
        let width = padding_width(self.config.min_padding_width, expected);
        let pattern = output_dir.join(format!(
            "frame_%0{}d.{}",
            width, self.config.image_format
        ));

        let mut command = tokio::process::Command::new("ffmpeg");
        command.arg("-i").arg(&clip.file_path);
        if self.config.stride > 1 {
            command.args([
                "-vf",
                &format!("select=not(mod(n\\,{}))", self.config.stride),
                "-vsync",
                "vfr",
            ]);
        } else {
            command.args(["-vsync", "0"]);
        }
        let output = command
            .args([
                "-q:v",
                &self.config.image_quality.to_string(),
                "-start_number",
                "1",
                "-y",
            ])
            .arg(&pattern)
            .output()
            .await
            .map_err(|e| PipelineError::DecodeFailure {
                video_id: segment.video_id.clone(),
                segment_index: segment.index,
                frames_written: 0,
                reason: format!("failed to launch ffmpeg: {e}"),
            })?;

        let frames = self.list_frames(&output_dir).await?;
        let decode_failed = !output.status.success();
        let short = (frames.len() as u64) < expected;

        let metadata = SegmentMetadata {
            video_id: segment.video_id.clone(),
            segment_index: segment.index,
            source_video_path: source.path.clone(),
            start_time: segment.start_time,
            end_time: segment.end_time,
            duration: segment.duration(),
            fps: clip.fps,
            frame_count: frames.len(),
            resolution: clip.resolution,
            extraction_timestamp: Utc::now(),
            incomplete: decode_failed || short,
        };
        metadata.persist(&output_dir).await?;

        if decode_failed || short {
            let reason = if decode_failed {
                stderr_reason(&output.stderr)
            } else {
                format!("decoder produced {} of {} expected frames", frames.len(), expected)
            };
            warn!(
                "⚠️ Incomplete extraction for {}: {}",
                segment.name(),
                reason
            );
            return Err(PipelineError::DecodeFailure {
                video_id: segment.video_id.clone(),
                segment_index: segment.index,
                frames_written: frames.len(),
                reason,
            });
        }

        info!(
            "🖼️ Extracted {} frames for {} → {}",
            frames.len(),
            segment.name(),
            output_dir.display()
        );

        Ok(FrameSet {
            directory: output_dir,
            frames,
            metadata,
        })
    }

    /// Sorted frame image paths inside a segment directory.
    async fn list_frames(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut frames = Vec::new();
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| PipelineError::io("listing extracted frames", e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PipelineError::io("listing extracted frames", e))?
        {
            let path = entry.path();
            if is_frame_image(&path) {
                frames.push(path);
            }
        }
        frames.sort();
        Ok(frames)
    }
}

/// Recognize `frame_*.{jpg,jpeg,png}` files written by the extractor.
pub fn is_frame_image(path: &Path) -> bool {
    let named_frame = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .map(|stem| stem.starts_with("frame_"))
        .unwrap_or(false);
    let image_ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| matches!(ext.to_lowercase().as_str(), "jpg" | "jpeg" | "png"))
        .unwrap_or(false);
    named_frame && image_ext
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_metadata() -> SegmentMetadata {
        SegmentMetadata {
            video_id: "v1".to_string(),
            segment_index: 1,
            source_video_path: PathBuf::from("videos/v1.mp4"),
            start_time: 2.0,
            end_time: 5.0,
            duration: 3.0,
            fps: 30.0,
            frame_count: 90,
            resolution: (1920, 1080),
            extraction_timestamp: Utc::now(),
            incomplete: false,
        }
    }

    #[test]
    fn test_padding_width() {
        assert_eq!(padding_width(4, 1), 4);
        assert_eq!(padding_width(4, 9999), 4);
        assert_eq!(padding_width(4, 10000), 5);
        assert_eq!(padding_width(4, 123456), 6);
        assert_eq!(padding_width(6, 90), 6);
    }

    #[test]
    fn test_expected_frames_with_stride() {
        assert_eq!(expected_frames(90, 1), 90);
        assert_eq!(expected_frames(90, 2), 45);
        assert_eq!(expected_frames(91, 2), 46);
        assert_eq!(expected_frames(90, 7), 13);
    }

    #[test]
    fn test_frames_dir_naming() {
        let extractor = FrameExtractor::new(crate::config::Config::default().extraction);
        let segment = Segment {
            video_id: "v1".to_string(),
            index: 2,
            start_time: 0.0,
            end_time: 1.0,
        };
        assert_eq!(
            extractor.frames_dir(Path::new("segments/frames"), &segment),
            Path::new("segments/frames/v1_segment_2")
        );
    }

    #[test]
    fn test_frame_image_recognition() {
        assert!(is_frame_image(Path::new("frame_0001.jpg")));
        assert!(is_frame_image(Path::new("frame_00001.PNG")));
        assert!(!is_frame_image(Path::new("metadata.json")));
        assert!(!is_frame_image(Path::new("thumb_0001.jpg")));
        assert!(!is_frame_image(Path::new("frame_0001.txt")));
    }

    #[test]
    fn test_metadata_round_trip() {
        let metadata = sample_metadata();
        let json = serde_json::to_string_pretty(&metadata).unwrap();
        let loaded: SegmentMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded, metadata);
    }

    #[test]
    fn test_metadata_rejects_unknown_fields() {
        let mut value = serde_json::to_value(sample_metadata()).unwrap();
        value["surprise"] = serde_json::json!(true);
        let raw = value.to_string();
        assert!(serde_json::from_str::<SegmentMetadata>(&raw).is_err());
    }

    #[test]
    fn test_metadata_incomplete_defaults_false() {
        let mut value = serde_json::to_value(sample_metadata()).unwrap();
        value.as_object_mut().unwrap().remove("incomplete");
        let loaded: SegmentMetadata = serde_json::from_str(&value.to_string()).unwrap();
        assert!(!loaded.incomplete);
    }

    #[test]
    fn test_metadata_load_missing_or_malformed() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let err = SegmentMetadata::load(temp_dir.path()).unwrap_err();
        assert!(matches!(err, PipelineError::SourceMetadataMissing { .. }));

        std::fs::write(temp_dir.path().join(METADATA_FILE), b"not json").unwrap();
        let err = SegmentMetadata::load(temp_dir.path()).unwrap_err();
        assert!(matches!(err, PipelineError::SourceMetadataMissing { .. }));
    }
}
