use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;
use walkdir::WalkDir;

use crate::error::{PipelineError, Result};

/// Source video properties probed from the container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoInfo {
    pub path: PathBuf,
    pub video_id: String,
    pub duration_seconds: f64,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub format: String,
    pub file_size: u64,
}

impl VideoInfo {
    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Derive the video id a source path annotates under.
///
/// The collaborator guarantees id uniqueness across the input set; duplicate
/// ids are flagged at merge time, never silently overwritten.
pub fn video_id_for(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Video discovery and ffprobe-backed inspection.
#[derive(Debug, Clone)]
pub struct VideoProcessor {
    supported_extensions: Vec<String>,
}

impl VideoProcessor {
    pub fn new() -> Self {
        Self {
            supported_extensions: vec![
                "mp4".to_string(),
                "mkv".to_string(),
                "avi".to_string(),
                "mov".to_string(),
                "webm".to_string(),
                "m4v".to_string(),
            ],
        }
    }

    pub fn with_extensions(extensions: Vec<String>) -> Self {
        Self {
            supported_extensions: extensions,
        }
    }

    /// Discover all video files under a directory, sorted, skipping hidden
    /// files.
    pub fn discover_videos(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        if !dir.exists() {
            return Err(PipelineError::io(
                format!("listing videos in {}", dir.display()),
                std::io::Error::new(std::io::ErrorKind::NotFound, "directory does not exist"),
            ));
        }

        let mut videos = Vec::new();
        for entry in WalkDir::new(dir).min_depth(1) {
            let entry = entry
                .map_err(|e| PipelineError::io("walking video directory", e.into()))?;
            let path = entry.path();
            if !path.is_file() || is_hidden(path) {
                continue;
            }
            if self.is_video_file(path) {
                videos.push(path.to_path_buf());
            }
        }
        videos.sort();

        info!("🔍 Found {} videos under {}", videos.len(), dir.display());
        Ok(videos)
    }

    pub fn is_video_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.supported_extensions.contains(&ext.to_lowercase()))
            .unwrap_or(false)
    }

    /// Probe a source video with ffprobe.
    pub async fn probe(&self, video_path: &Path) -> Result<VideoInfo> {
        let output = tokio::process::Command::new("ffprobe")
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(video_path)
            .output()
            .await
            .map_err(|e| PipelineError::SourceUnreadable {
                path: video_path.to_path_buf(),
                reason: format!("failed to launch ffprobe: {e}"),
            })?;

        if !output.status.success() {
            return Err(PipelineError::SourceUnreadable {
                path: video_path.to_path_buf(),
                reason: "ffprobe could not read the container".to_string(),
            });
        }

        let probed: serde_json::Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| PipelineError::SourceUnreadable {
                path: video_path.to_path_buf(),
                reason: format!("unparseable ffprobe output: {e}"),
            })?;

        let format = &probed["format"];
        let video_stream = probed["streams"]
            .as_array()
            .and_then(|streams| {
                streams
                    .iter()
                    .find(|stream| stream["codec_type"] == "video")
            })
            .ok_or_else(|| PipelineError::SourceUnreadable {
                path: video_path.to_path_buf(),
                reason: "no video stream found".to_string(),
            })?;

        let fps = video_stream["r_frame_rate"]
            .as_str()
            .or_else(|| video_stream["avg_frame_rate"].as_str())
            .and_then(parse_frame_rate)
            .unwrap_or(0.0);
        if fps <= 0.0 {
            return Err(PipelineError::SourceUnreadable {
                path: video_path.to_path_buf(),
                reason: "source reports no usable frame rate".to_string(),
            });
        }

        let duration_seconds: f64 = format["duration"]
            .as_str()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0.0);
        if duration_seconds <= 0.0 {
            return Err(PipelineError::SourceUnreadable {
                path: video_path.to_path_buf(),
                reason: "source reports no duration".to_string(),
            });
        }

        let file_size = tokio::fs::metadata(video_path)
            .await
            .map_err(|e| PipelineError::io("reading source file size", e))?
            .len();

        let info = VideoInfo {
            path: video_path.to_path_buf(),
            video_id: video_id_for(video_path),
            duration_seconds,
            width: video_stream["width"].as_u64().unwrap_or(0) as u32,
            height: video_stream["height"].as_u64().unwrap_or(0) as u32,
            fps,
            format: format["format_name"]
                .as_str()
                .unwrap_or("unknown")
                .to_string(),
            file_size,
        };

        info!(
            "📹 Probed {}: {}x{}, {:.2}fps, {:.1}s",
            info.video_id, info.width, info.height, info.fps, info.duration_seconds
        );
        Ok(info)
    }
}

impl Default for VideoProcessor {
    fn default() -> Self {
        Self::new()
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}

/// Parse ffprobe frame rates, rational ("30000/1001") or plain ("30").
fn parse_frame_rate(raw: &str) -> Option<f64> {
    if let Some((num, den)) = raw.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        if den == 0.0 {
            return None;
        }
        return Some(num / den);
    }
    raw.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_frame_rate_parsing() {
        assert_eq!(parse_frame_rate("30"), Some(30.0));
        assert_eq!(parse_frame_rate("30000/1001"), Some(30000.0 / 1001.0));
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("garbage"), None);
    }

    #[test]
    fn test_video_id_derivation() {
        assert_eq!(video_id_for(Path::new("videos/match_01.mp4")), "match_01");
        assert_eq!(video_id_for(Path::new("clip.MOV")), "clip");
    }

    #[test]
    fn test_discovery_filters_and_sorts() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("b.mp4"), b"video").unwrap();
        std::fs::write(temp_dir.path().join("a.MOV"), b"video").unwrap();
        std::fs::write(temp_dir.path().join(".hidden.mp4"), b"video").unwrap();
        std::fs::write(temp_dir.path().join("notes.txt"), b"text").unwrap();
        std::fs::create_dir(temp_dir.path().join("nested")).unwrap();
        std::fs::write(temp_dir.path().join("nested/c.mkv"), b"video").unwrap();

        let processor = VideoProcessor::new();
        let videos = processor.discover_videos(temp_dir.path()).unwrap();
        let names: Vec<String> = videos
            .iter()
            .map(|p| {
                p.strip_prefix(temp_dir.path())
                    .unwrap()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();
        assert_eq!(names, vec!["a.MOV", "b.mp4", "nested/c.mkv"]);
    }

    #[test]
    fn test_discovery_missing_directory() {
        let processor = VideoProcessor::new();
        assert!(processor
            .discover_videos(Path::new("/nonexistent/videos"))
            .is_err());
    }
}
