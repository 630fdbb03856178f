use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::config::DatasetConfig;
use crate::error::{PipelineError, Result};
use crate::extract::{is_frame_image, SegmentMetadata, METADATA_FILE};

/// Aggregate summary written as the final step of a merge run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub total_videos: usize,
    pub total_segments: usize,
    pub total_frames: usize,
    pub segments: Vec<SegmentSummary>,
    pub creation_timestamp: DateTime<Utc>,
}

/// Per-segment breakdown inside the dataset summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentSummary {
    pub segment_name: String,
    pub video_id: String,
    pub segment_index: u32,
    pub frame_count: usize,
}

/// On-disk statistics across the project's output trees.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetStatistics {
    pub input_videos: usize,
    pub segment_clips: usize,
    pub segment_frame_dirs: usize,
    pub extracted_frames: usize,
    pub unified_images: usize,
    pub dataset_created: Option<DateTime<Utc>>,
}

impl DatasetStatistics {
    pub fn format_report(&self) -> String {
        format!(
            "Dataset statistics:\n\
            - Input videos: {}\n\
            - Segment clips: {}\n\
            - Extracted segments: {}\n\
            - Extracted frames: {}\n\
            - Unified dataset images: {}\n\
            - Dataset created: {}",
            self.input_videos,
            self.segment_clips,
            self.segment_frame_dirs,
            self.extracted_frames,
            self.unified_images,
            self.dataset_created
                .map(|ts| ts.to_rfc3339())
                .unwrap_or_else(|| "not created".to_string()),
        )
    }
}

/// Merges all extracted frame sets into one collision-free image pool.
///
/// The merge is a pure read-combine-write over existing segment outputs: it
/// never mutates them, and re-running it over an unchanged tree rewrites the
/// same files under the same names.
#[derive(Debug, Clone)]
pub struct DatasetMerger {
    config: DatasetConfig,
}

impl DatasetMerger {
    pub fn new(config: DatasetConfig) -> Self {
        Self { config }
    }

    /// Build the unified dataset from every complete frame set under
    /// `segments_root`.
    ///
    /// Segment directories without a usable metadata record, flagged
    /// incomplete, failing the frame-count invariant, or colliding on
    /// `video_id` are skipped with a warning; filesystem errors abort the run
    /// with partial output preserved. The summary is written last so a run
    /// that fails partway never leaves a summary claiming more than was
    /// copied.
    pub async fn build_unified_dataset(
        &self,
        segments_root: &Path,
        output_root: &Path,
    ) -> Result<DatasetSummary> {
        let segment_dirs = discover_segment_dirs(segments_root)?;
        if segment_dirs.is_empty() {
            warn!("No extracted frame sets found under {}", segments_root.display());
        }

        let images_dir = output_root.join("images");
        let metadata_dir = output_root.join("metadata");
        tokio::fs::create_dir_all(&images_dir)
            .await
            .map_err(|e| PipelineError::merge_io("creating images directory", e))?;
        tokio::fs::create_dir_all(&metadata_dir)
            .await
            .map_err(|e| PipelineError::merge_io("creating metadata directory", e))?;

        let mut summary = DatasetSummary {
            total_videos: 0,
            total_segments: 0,
            total_frames: 0,
            segments: Vec::new(),
            creation_timestamp: Utc::now(),
        };
        let mut sources_by_video: HashMap<String, PathBuf> = HashMap::new();

        for dir in segment_dirs {
            let segment_name = name_of(&dir);

            let metadata = match SegmentMetadata::load(&dir) {
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!("⚠️ Skipping {}: {}", dir.display(), e);
                    continue;
                }
            };
            if metadata.incomplete {
                warn!(
                    "⚠️ Skipping {}: extraction is flagged incomplete ({} frames)",
                    segment_name, metadata.frame_count
                );
                continue;
            }

            match sources_by_video.get(&metadata.video_id) {
                Some(known) if known != &metadata.source_video_path => {
                    warn!(
                        "🚨 Video id collision: {} maps to both {} and {}; skipping {}",
                        metadata.video_id,
                        known.display(),
                        metadata.source_video_path.display(),
                        segment_name
                    );
                    continue;
                }
                _ => {
                    sources_by_video
                        .insert(metadata.video_id.clone(), metadata.source_video_path.clone());
                }
            }

            let frames = frame_files(&dir)
                .map_err(|e| PipelineError::merge_io("listing segment frames", e))?;
            if frames.len() != metadata.frame_count {
                warn!(
                    "⚠️ Skipping {}: metadata claims {} frames but {} are on disk",
                    segment_name,
                    metadata.frame_count,
                    frames.len()
                );
                continue;
            }

            // Namespaced copy: `{video_id}_segment_{index}` directory name +
            // original zero-padded frame file name is globally unique.
            for frame in &frames {
                let file_name = name_of(frame);
                let dest = images_dir.join(format!("{segment_name}_{file_name}"));
                tokio::fs::copy(frame, &dest)
                    .await
                    .map_err(|e| PipelineError::merge_io("copying frame into dataset", e))?;
            }

            tokio::fs::copy(
                dir.join(METADATA_FILE),
                metadata_dir.join(format!("{segment_name}_metadata.json")),
            )
            .await
            .map_err(|e| PipelineError::merge_io("copying segment metadata", e))?;

            summary.total_segments += 1;
            summary.total_frames += frames.len();
            summary.segments.push(SegmentSummary {
                segment_name,
                video_id: metadata.video_id.clone(),
                segment_index: metadata.segment_index,
                frame_count: frames.len(),
            });
        }

        summary.total_videos = summary
            .segments
            .iter()
            .map(|segment| segment.video_id.as_str())
            .collect::<std::collections::HashSet<_>>()
            .len();

        if self.config.write_frame_list {
            self.write_frame_list(output_root, &images_dir, &summary)
                .await?;
        }

        // Written last: a merge that died earlier leaves no summary behind.
        let summary_json = serde_json::to_string_pretty(&summary).map_err(|e| {
            PipelineError::merge_io(
                "serializing dataset summary",
                std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            )
        })?;
        tokio::fs::write(output_root.join("dataset_summary.json"), summary_json)
            .await
            .map_err(|e| PipelineError::merge_io("writing dataset summary", e))?;

        info!(
            "📊 Unified dataset: {} frames from {} segments across {} videos → {}",
            summary.total_frames,
            summary.total_segments,
            summary.total_videos,
            output_root.display()
        );
        Ok(summary)
    }

    async fn write_frame_list(
        &self,
        output_root: &Path,
        images_dir: &Path,
        summary: &DatasetSummary,
    ) -> Result<()> {
        let mut images = frame_files(images_dir)
            .map_err(|e| PipelineError::merge_io("listing dataset images", e))?;
        images.sort();

        let mut listing = String::new();
        listing.push_str("Unified Video Dataset\n");
        listing.push_str(&format!("Total Frames: {}\n", summary.total_frames));
        listing.push_str(&format!("Total Segments: {}\n", summary.total_segments));
        listing.push_str(&format!(
            "Created: {}\n\nFrame Files:\n",
            summary.creation_timestamp.to_rfc3339()
        ));
        for image in &images {
            listing.push_str(&name_of(image));
            listing.push('\n');
        }

        tokio::fs::write(output_root.join("frame_list.txt"), listing)
            .await
            .map_err(|e| PipelineError::merge_io("writing frame list", e))
    }
}

/// Statistics over the on-disk project trees; tolerates absent directories.
pub fn dataset_statistics(
    videos_dir: &Path,
    segments_root: &Path,
    dataset_root: &Path,
) -> DatasetStatistics {
    let video_processor = crate::video::VideoProcessor::new();
    let input_videos = count_files(videos_dir, |path| video_processor.is_video_file(path));
    let segment_clips = count_files(&segments_root.join("videos"), |_| true);

    let frame_dirs = discover_segment_dirs(segments_root).unwrap_or_default();
    let extracted_frames = frame_dirs
        .iter()
        .filter_map(|dir| frame_files(dir).ok())
        .map(|frames| frames.len())
        .sum();

    let unified_images = count_files(&dataset_root.join("images"), |path| is_frame_image(path));

    let dataset_created = std::fs::read_to_string(dataset_root.join("dataset_summary.json"))
        .ok()
        .and_then(|raw| serde_json::from_str::<DatasetSummary>(&raw).ok())
        .map(|summary| summary.creation_timestamp);

    DatasetStatistics {
        input_videos,
        segment_clips,
        segment_frame_dirs: frame_dirs.len(),
        extracted_frames,
        unified_images,
        dataset_created,
    }
}

/// Directories under `root` holding a metadata record, in sorted order.
/// Frame directories missing their record are reported and skipped here.
fn discover_segment_dirs(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.exists() {
        return Ok(Vec::new());
    }

    let mut dirs = Vec::new();
    for entry in WalkDir::new(root).min_depth(1) {
        let entry = entry.map_err(|e| {
            PipelineError::merge_io("enumerating segment directories", e.into())
        })?;
        if !entry.file_type().is_dir() {
            continue;
        }
        let dir = entry.path();
        if dir.join(METADATA_FILE).exists() {
            dirs.push(dir.to_path_buf());
        } else if has_frame_files(dir) {
            warn!(
                "⚠️ Skipping {}: {}",
                dir.display(),
                PipelineError::SourceMetadataMissing {
                    dir: dir.to_path_buf()
                }
            );
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn frame_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut frames: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_frame_image(path))
        .collect();
    frames.sort();
    Ok(frames)
}

fn has_frame_files(dir: &Path) -> bool {
    frame_files(dir).map(|f| !f.is_empty()).unwrap_or(false)
}

fn count_files(dir: &Path, keep: impl Fn(&Path) -> bool) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.path())
                .filter(|path| path.is_file() && keep(path))
                .count()
        })
        .unwrap_or(0)
}

fn name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statistics_tolerate_empty_project() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let stats = dataset_statistics(
            &temp_dir.path().join("videos"),
            &temp_dir.path().join("segments"),
            &temp_dir.path().join("unified_dataset"),
        );
        assert_eq!(stats.input_videos, 0);
        assert_eq!(stats.extracted_frames, 0);
        assert_eq!(stats.unified_images, 0);
        assert!(stats.dataset_created.is_none());
        assert!(stats.format_report().contains("not created"));
    }
}
