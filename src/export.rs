use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::ExportConfig;
use crate::error::{PipelineError, Result};
use crate::segments::Segment;
use crate::video::VideoInfo;

/// Tolerance for float noise when a frame boundary lands exactly on a
/// segment bound (e.g. 2.1 * 30 computing to 63.000000000000007).
const FRAME_EPSILON: f64 = 1e-6;

/// Frame-accurate window for a segment against a known frame rate.
///
/// A frame with index `i` covers presentation time `[i/fps, (i+1)/fps)`.
/// The window holds every frame whose presentation time is inside
/// `[start, end)`: it starts at `round(start * fps)` and never includes a
/// frame starting at or after `end`, while a segment shorter than one frame
/// period still yields its single boundary frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameWindow {
    pub start_frame: u64,
    pub frame_count: u64,
}

impl FrameWindow {
    pub fn for_segment(start_time: f64, end_time: f64, fps: f64) -> Self {
        let start_frame = (start_time * fps).round() as u64;
        let end_frame_exclusive = ((end_time * fps) - FRAME_EPSILON).ceil() as u64;
        let frame_count = end_frame_exclusive.saturating_sub(start_frame).max(1);
        Self {
            start_frame,
            frame_count,
        }
    }

    /// Seek position snapped to the first frame's boundary.
    pub fn start_seconds(&self, fps: f64) -> f64 {
        self.start_frame as f64 / fps
    }
}

/// A rendered, standalone video artifact for one segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Clip {
    pub video_id: String,
    pub segment_index: u32,
    pub file_path: PathBuf,
    pub frame_count: u64,
    pub fps: f64,
    pub resolution: (u32, u32),
}

/// Renders segments of a source video into independent clip files.
#[derive(Debug, Clone)]
pub struct ClipExporter {
    config: ExportConfig,
}

impl ClipExporter {
    pub fn new(config: ExportConfig) -> Self {
        Self { config }
    }

    /// Deterministic clip path: `{videos_dir}/{video_id}_segment_{index}.{ext}`.
    pub fn clip_path(&self, videos_dir: &Path, segment: &Segment) -> PathBuf {
        videos_dir.join(format!("{}.{}", segment.name(), self.config.container))
    }

    /// Render one segment into a standalone clip, re-encoding from the
    /// frame-accurate window. Overwrites any previous export of the same
    /// segment.
    pub async fn export_clip(
        &self,
        source: &VideoInfo,
        segment: &Segment,
        videos_dir: &Path,
    ) -> Result<Clip> {
        if segment.start_time >= source.duration_seconds {
            return Err(PipelineError::SeekOutOfRange {
                video_id: segment.video_id.clone(),
                segment_index: segment.index,
                start_time: segment.start_time,
                source_duration: source.duration_seconds,
            });
        }

        tokio::fs::create_dir_all(videos_dir)
            .await
            .map_err(|e| PipelineError::io("creating clip output directory", e))?;

        let window = FrameWindow::for_segment(segment.start_time, segment.end_time, source.fps);
        let output_path = self.clip_path(videos_dir, segment);

        let output = tokio::process::Command::new("ffmpeg")
            .arg("-ss")
            .arg(format!("{:.6}", window.start_seconds(source.fps)))
            .arg("-i")
            .arg(&source.path)
            .args([
                "-frames:v",
                &window.frame_count.to_string(),
                "-c:v",
                &self.config.video_codec,
                "-preset",
                &self.config.preset,
                "-crf",
                &self.config.crf.to_string(),
                "-an",
                "-y",
            ])
            .arg(&output_path)
            .output()
            .await
            .map_err(|e| PipelineError::EncodeFailure {
                video_id: segment.video_id.clone(),
                segment_index: segment.index,
                reason: format!("failed to launch ffmpeg: {e}"),
            })?;

        if !output.status.success() {
            return Err(PipelineError::EncodeFailure {
                video_id: segment.video_id.clone(),
                segment_index: segment.index,
                reason: stderr_reason(&output.stderr),
            });
        }

        info!(
            "🎬 Exported {} [{:.3}s, {:.3}s) → {} frames at {}",
            segment.name(),
            segment.start_time,
            segment.end_time,
            window.frame_count,
            output_path.display()
        );

        Ok(Clip {
            video_id: segment.video_id.clone(),
            segment_index: segment.index,
            file_path: output_path,
            frame_count: window.frame_count,
            fps: source.fps,
            resolution: source.resolution(),
        })
    }
}

/// Last non-empty stderr line, the part ffmpeg puts its actual error in.
pub(crate) fn stderr_reason(stderr: &[u8]) -> String {
    String::from_utf8_lossy(stderr)
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("no diagnostic output")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_whole_seconds() {
        // [2.0s, 5.0s) at 30fps is exactly frames 60..150.
        let window = FrameWindow::for_segment(2.0, 5.0, 30.0);
        assert_eq!(window.start_frame, 60);
        assert_eq!(window.frame_count, 90);
    }

    #[test]
    fn test_window_excludes_frame_at_end_time() {
        // Frame 63 starts exactly at 2.1s and must not be included.
        let window = FrameWindow::for_segment(2.0, 2.1, 30.0);
        assert_eq!(window.start_frame, 60);
        assert_eq!(window.frame_count, 3);
    }

    #[test]
    fn test_window_keeps_fractional_tail() {
        // End lands mid-frame: the frame straddling 4.98s starts at 4.9666s
        // and is kept.
        let window = FrameWindow::for_segment(2.0, 4.98, 30.0);
        assert_eq!(window.frame_count, 90);
    }

    #[test]
    fn test_window_fractional_frame_rate() {
        let fps = 30000.0 / 1001.0; // 29.97
        let window = FrameWindow::for_segment(0.0, 10.0, fps);
        assert_eq!(window.start_frame, 0);
        assert_eq!(window.frame_count, 300);
    }

    #[test]
    fn test_window_degenerate_segment_keeps_one_frame() {
        // Rounding the start up can push it past every frame beginning before
        // the end bound; the boundary frame is still exported.
        let window = FrameWindow::for_segment(1.99, 2.0, 30.0);
        assert_eq!(window.start_frame, 60);
        assert_eq!(window.frame_count, 1);
    }

    #[test]
    fn test_window_seek_snaps_to_frame_boundary() {
        let window = FrameWindow::for_segment(2.004, 5.0, 30.0);
        assert_eq!(window.start_frame, 60);
        assert!((window.start_seconds(30.0) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_clip_path_is_deterministic() {
        let exporter = ClipExporter::new(crate::config::Config::default().export);
        let segment = Segment {
            video_id: "v1".to_string(),
            index: 3,
            start_time: 0.0,
            end_time: 1.0,
        };
        assert_eq!(
            exporter.clip_path(Path::new("segments/videos"), &segment),
            Path::new("segments/videos/v1_segment_3.mp4")
        );
    }

    #[test]
    fn test_stderr_reason_takes_last_line() {
        let stderr = b"frame=  1 fps=0.0\nconversion failed!\n\n";
        assert_eq!(stderr_reason(stderr), "conversion failed!");
        assert_eq!(stderr_reason(b""), "no diagnostic output");
    }
}
