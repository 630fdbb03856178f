use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Semaphore};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::export::ClipExporter;
use crate::extract::{FrameExtractor, SegmentMetadata};
use crate::segments::{Segment, SegmentStore};
use crate::video::{video_id_for, VideoProcessor};

/// One video's worth of export work: its source path plus the committed
/// segments to render.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportJob {
    pub video_path: PathBuf,
    pub video_id: String,
    pub segments: Vec<Segment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentStatus {
    Exported,
    Skipped,
    Failed,
}

/// Outcome of one segment's export+extraction, keyed by
/// `(video_id, segment_index)` for the per-run report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentOutcome {
    pub video_id: String,
    pub segment_index: u32,
    pub status: SegmentStatus,
    pub clip_path: Option<PathBuf>,
    pub frames_dir: Option<PathBuf>,
    pub frame_count: Option<usize>,
    pub error_message: Option<String>,
}

/// Per-run export report; segment failures are collected here, never fatal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportReport {
    pub total: usize,
    pub exported: usize,
    pub skipped: usize,
    pub failed: usize,
    pub outcomes: Vec<SegmentOutcome>,
}

impl ExportReport {
    fn from_outcomes(outcomes: Vec<SegmentOutcome>) -> Self {
        let exported = outcomes
            .iter()
            .filter(|o| o.status == SegmentStatus::Exported)
            .count();
        let skipped = outcomes
            .iter()
            .filter(|o| o.status == SegmentStatus::Skipped)
            .count();
        let failed = outcomes
            .iter()
            .filter(|o| o.status == SegmentStatus::Failed)
            .count();
        Self {
            total: outcomes.len(),
            exported,
            skipped,
            failed,
            outcomes,
        }
    }
}

/// Annotations file entry: a source video plus marked time pairs.
#[derive(Debug, Deserialize)]
struct AnnotationEntry {
    video: PathBuf,
    #[serde(default)]
    id: Option<String>,
    segments: Vec<TimePair>,
}

#[derive(Debug, Deserialize)]
struct TimePair {
    start: f64,
    end: f64,
}

/// Parse an annotations JSON file into export jobs, committing every pair
/// through the segment store so validation and index assignment stay in one
/// place. Invalid pairs are reported and dropped; they never abort the batch.
pub fn load_annotations(path: &Path, store: &mut SegmentStore) -> Result<Vec<ExportJob>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| PipelineError::io("reading annotations file", e))?;
    let entries: Vec<AnnotationEntry> = serde_json::from_str(&raw).map_err(|e| {
        PipelineError::io(
            "parsing annotations file",
            std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        )
    })?;

    let mut jobs = Vec::new();
    for entry in entries {
        let video_id = entry
            .id
            .clone()
            .unwrap_or_else(|| video_id_for(&entry.video));

        for pair in &entry.segments {
            store.mark_start(&video_id, pair.start);
            store.mark_end(&video_id, pair.end);
            if let Err(e) = store.commit_segment(&video_id) {
                warn!("⚠️ Dropping annotation pair: {}", e);
            }
        }

        let segments = store.list_segments(&video_id).to_vec();
        if segments.is_empty() {
            warn!(
                "No valid segments for {}, skipping video",
                entry.video.display()
            );
            continue;
        }
        jobs.push(ExportJob {
            video_path: entry.video,
            video_id,
            segments,
        });
    }
    Ok(jobs)
}

/// Batch export pipeline: clips then frames per segment, per video, with a
/// bounded worker pool across videos.
#[derive(Clone)]
pub struct BatchExporter {
    config: Config,
    video_processor: VideoProcessor,
    clip_exporter: ClipExporter,
    frame_extractor: FrameExtractor,
    worker_semaphore: Arc<Semaphore>,
    max_concurrent: usize,
}

impl BatchExporter {
    pub fn new(config: Config) -> Self {
        let max_workers = config.processing.max_workers.max(1);
        Self {
            video_processor: VideoProcessor::with_extensions(
                config.processing.supported_extensions.clone(),
            ),
            clip_exporter: ClipExporter::new(config.export.clone()),
            frame_extractor: FrameExtractor::new(config.extraction.clone()),
            worker_semaphore: Arc::new(Semaphore::new(max_workers)),
            max_concurrent: max_workers,
            config,
        }
    }

    /// Export every job, independent videos in parallel, and persist the
    /// per-run report under the segments root.
    pub async fn export_all(&self, jobs: Vec<ExportJob>, output_root: &Path) -> Result<ExportReport> {
        let start_time = Instant::now();
        let total_jobs = jobs.len();
        info!(
            "🚀 Exporting {} videos with up to {} workers",
            total_jobs, self.max_concurrent
        );

        tokio::fs::create_dir_all(output_root)
            .await
            .map_err(|e| PipelineError::io("creating segments output root", e))?;

        let (tx, mut rx) = mpsc::channel(self.max_concurrent);
        for (index, job) in jobs.into_iter().enumerate() {
            let exporter = self.clone();
            let output_root = output_root.to_path_buf();
            let tx = tx.clone();
            let semaphore = Arc::clone(&self.worker_semaphore);

            tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return;
                };
                info!(
                    "📹 Exporting video {}/{}: {}",
                    index + 1,
                    total_jobs,
                    job.video_id
                );
                let outcomes = exporter.export_video(&job, &output_root).await;
                if tx.send(outcomes).await.is_err() {
                    error!("Failed to report outcomes for {}", job.video_id);
                }
            });
        }
        drop(tx);

        let mut outcomes = Vec::new();
        while let Some(mut batch) = rx.recv().await {
            outcomes.append(&mut batch);
        }
        outcomes.sort_by(|a, b| {
            (&a.video_id, a.segment_index).cmp(&(&b.video_id, b.segment_index))
        });

        let report = ExportReport::from_outcomes(outcomes);
        self.persist_report(&report, output_root).await?;

        info!(
            "🎉 Export finished in {:.2}s: {} exported, {} skipped, {} failed",
            start_time.elapsed().as_secs_f64(),
            report.exported,
            report.skipped,
            report.failed
        );
        Ok(report)
    }

    /// Export one video's segments sequentially. Per-segment failures are
    /// recorded and the remaining segments still run.
    pub async fn export_video(&self, job: &ExportJob, output_root: &Path) -> Vec<SegmentOutcome> {
        let videos_dir = output_root.join("videos");
        let frames_root = output_root.join("frames");

        let source = match self.video_processor.probe(&job.video_path).await {
            Ok(mut source) => {
                // The job's id wins over the stem-derived one so artifact
                // names follow the annotations.
                source.video_id = job.video_id.clone();
                source
            }
            Err(e) => {
                warn!("❌ {}", e);
                let message = e.to_string();
                return job
                    .segments
                    .iter()
                    .map(|segment| SegmentOutcome {
                        video_id: job.video_id.clone(),
                        segment_index: segment.index,
                        status: SegmentStatus::Failed,
                        clip_path: None,
                        frames_dir: None,
                        frame_count: None,
                        error_message: Some(message.clone()),
                    })
                    .collect();
            }
        };

        let mut outcomes = Vec::with_capacity(job.segments.len());
        for segment in &job.segments {
            if self.config.processing.skip_existing
                && self.is_already_exported(segment, &videos_dir, &frames_root)
            {
                info!("⏭️ {} already exported, skipping", segment.name());
                outcomes.push(SegmentOutcome {
                    video_id: segment.video_id.clone(),
                    segment_index: segment.index,
                    status: SegmentStatus::Skipped,
                    clip_path: Some(self.clip_exporter.clip_path(&videos_dir, segment)),
                    frames_dir: Some(self.frame_extractor.frames_dir(&frames_root, segment)),
                    frame_count: None,
                    error_message: None,
                });
                continue;
            }

            let outcome = match self
                .clip_exporter
                .export_clip(&source, segment, &videos_dir)
                .await
            {
                Ok(clip) => match self
                    .frame_extractor
                    .extract_frames(&clip, segment, &source, &frames_root)
                    .await
                {
                    Ok(frame_set) => SegmentOutcome {
                        video_id: segment.video_id.clone(),
                        segment_index: segment.index,
                        status: SegmentStatus::Exported,
                        clip_path: Some(clip.file_path.clone()),
                        frames_dir: Some(frame_set.directory.clone()),
                        frame_count: Some(frame_set.frames.len()),
                        error_message: None,
                    },
                    Err(e) => {
                        warn!("❌ {}", e);
                        SegmentOutcome {
                            video_id: segment.video_id.clone(),
                            segment_index: segment.index,
                            status: SegmentStatus::Failed,
                            clip_path: Some(clip.file_path.clone()),
                            frames_dir: Some(
                                self.frame_extractor.frames_dir(&frames_root, segment),
                            ),
                            frame_count: None,
                            error_message: Some(e.to_string()),
                        }
                    }
                },
                Err(e) => {
                    warn!("❌ {}", e);
                    SegmentOutcome {
                        video_id: segment.video_id.clone(),
                        segment_index: segment.index,
                        status: SegmentStatus::Failed,
                        clip_path: None,
                        frames_dir: None,
                        frame_count: None,
                        error_message: Some(e.to_string()),
                    }
                }
            };
            outcomes.push(outcome);
        }
        outcomes
    }

    /// A segment is complete when its clip exists and its frame set carries a
    /// valid, non-incomplete metadata record.
    fn is_already_exported(
        &self,
        segment: &Segment,
        videos_dir: &Path,
        frames_root: &Path,
    ) -> bool {
        if !self.clip_exporter.clip_path(videos_dir, segment).exists() {
            return false;
        }
        let frames_dir = self.frame_extractor.frames_dir(frames_root, segment);
        match SegmentMetadata::load(&frames_dir) {
            Ok(metadata) => !metadata.incomplete && metadata.frame_count > 0,
            Err(_) => false,
        }
    }

    async fn persist_report(&self, report: &ExportReport, output_root: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(report).map_err(|e| {
            PipelineError::io(
                "serializing export report",
                std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            )
        })?;
        let path = output_root.join("export_report.json");
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| PipelineError::io("writing export report", e))?;
        info!("💾 Report saved to: {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_annotations_assigns_indices() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("marks.json");
        std::fs::write(
            &path,
            r#"[
                {"video": "videos/v1.mp4", "segments": [
                    {"start": 2.0, "end": 5.0},
                    {"start": 8.0, "end": 9.5}
                ]},
                {"video": "videos/v2.mp4", "id": "alt", "segments": [
                    {"start": 0.0, "end": 1.0}
                ]}
            ]"#,
        )
        .unwrap();

        let mut store = SegmentStore::new();
        let jobs = load_annotations(&path, &mut store).unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].video_id, "v1");
        assert_eq!(jobs[0].segments.len(), 2);
        assert_eq!(jobs[0].segments[1].index, 2);
        assert_eq!(jobs[1].video_id, "alt");
    }

    #[test]
    fn test_load_annotations_drops_invalid_pairs() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("marks.json");
        std::fs::write(
            &path,
            r#"[
                {"video": "v1.mp4", "segments": [
                    {"start": 5.0, "end": 5.0},
                    {"start": 1.0, "end": 2.0}
                ]},
                {"video": "v2.mp4", "segments": [
                    {"start": 3.0, "end": 1.0}
                ]}
            ]"#,
        )
        .unwrap();

        let mut store = SegmentStore::new();
        let jobs = load_annotations(&path, &mut store).unwrap();
        // v2's only pair is invalid, so the whole video drops out.
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].segments.len(), 1);
        assert_eq!(jobs[0].segments[0].start_time, 1.0);
    }

    #[test]
    fn test_report_counts() {
        let outcome = |status| SegmentOutcome {
            video_id: "v1".to_string(),
            segment_index: 1,
            status,
            clip_path: None,
            frames_dir: None,
            frame_count: None,
            error_message: None,
        };
        let report = ExportReport::from_outcomes(vec![
            outcome(SegmentStatus::Exported),
            outcome(SegmentStatus::Exported),
            outcome(SegmentStatus::Skipped),
            outcome(SegmentStatus::Failed),
        ]);
        assert_eq!(report.total, 4);
        assert_eq!(report.exported, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failed, 1);
    }

    #[tokio::test]
    async fn test_export_unreadable_source_fails_every_segment() {
        let temp_dir = TempDir::new().unwrap();
        let exporter = BatchExporter::new(Config::default());
        let job = ExportJob {
            video_path: temp_dir.path().join("missing.mp4"),
            video_id: "missing".to_string(),
            segments: vec![
                Segment {
                    video_id: "missing".to_string(),
                    index: 1,
                    start_time: 0.0,
                    end_time: 1.0,
                },
                Segment {
                    video_id: "missing".to_string(),
                    index: 2,
                    start_time: 2.0,
                    end_time: 3.0,
                },
            ],
        };

        let outcomes = exporter.export_video(&job, temp_dir.path()).await;
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes
            .iter()
            .all(|o| o.status == SegmentStatus::Failed && o.error_message.is_some()));
    }
}
