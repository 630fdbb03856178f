use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the segment annotation and export pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Input discovery and batch settings
    pub processing: ProcessingConfig,

    /// Clip rendering settings
    pub export: ExportConfig,

    /// Frame extraction settings
    pub extraction: ExtractionConfig,

    /// Unified dataset settings
    pub dataset: DatasetConfig,

    /// Output locations
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Supported video file extensions
    pub supported_extensions: Vec<String>,

    /// Skip segments whose clip and complete frame set already exist
    pub skip_existing: bool,

    /// Maximum number of videos exported concurrently
    pub max_workers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Output container for segment clips
    pub container: String,

    /// Video codec passed to the encoder
    pub video_codec: String,

    /// Constant rate factor (quality, lower = better)
    pub crf: u8,

    /// Encoder preset
    pub preset: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Output image format for extracted frames
    pub image_format: String,

    /// Encoder quality scale for images (ffmpeg -q:v, lower = better)
    pub image_quality: u8,

    /// Minimum zero-padding width for frame filenames; widened automatically
    /// when a segment holds more frames than the padding can number
    pub min_padding_width: usize,

    /// Keep every Nth decoded frame (1 = every frame)
    pub stride: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Write the human-readable frame_list.txt inventory alongside the summary
    pub write_frame_list: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Input folder scanned for source videos
    pub videos_dir: PathBuf,

    /// Root for per-segment outputs (clips under videos/, frames under frames/)
    pub segments_dir: PathBuf,

    /// Root for the merged unified dataset
    pub dataset_dir: PathBuf,
}

impl Config {
    /// Load configuration from file, falling back to environment overrides
    pub fn load() -> Result<Self> {
        let config_paths = [
            "segment-annotator.toml",
            "config/segment-annotator.toml",
            "~/.config/segment-annotator/config.toml",
        ];

        for path in &config_paths {
            if let Ok(config_str) = std::fs::read_to_string(path) {
                match toml::from_str(&config_str) {
                    Ok(config) => {
                        tracing::info!("📄 Loaded configuration from: {}", path);
                        return Ok(config);
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse config file {}: {}", path, e);
                    }
                }
            }
        }

        if let Ok(config) = Self::from_env() {
            return Ok(config);
        }

        Err(anyhow!("No configuration file found"))
    }

    /// Build configuration from environment variables over defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(videos_dir) = std::env::var("SEGMENT_ANNOTATOR_VIDEOS_DIR") {
            config.output.videos_dir = PathBuf::from(videos_dir);
        }

        if let Ok(segments_dir) = std::env::var("SEGMENT_ANNOTATOR_SEGMENTS_DIR") {
            config.output.segments_dir = PathBuf::from(segments_dir);
        }

        if let Ok(dataset_dir) = std::env::var("SEGMENT_ANNOTATOR_DATASET_DIR") {
            config.output.dataset_dir = PathBuf::from(dataset_dir);
        }

        if let Ok(container) = std::env::var("SEGMENT_ANNOTATOR_CONTAINER") {
            config.export.container = container;
        }

        if let Ok(image_format) = std::env::var("SEGMENT_ANNOTATOR_IMAGE_FORMAT") {
            config.extraction.image_format = image_format;
        }

        if let Ok(stride) = std::env::var("SEGMENT_ANNOTATOR_STRIDE") {
            config.extraction.stride = stride.parse().unwrap_or(1);
        }

        if let Ok(padding) = std::env::var("SEGMENT_ANNOTATOR_PADDING_WIDTH") {
            config.extraction.min_padding_width = padding.parse().unwrap_or(4);
        }

        if let Ok(workers) = std::env::var("SEGMENT_ANNOTATOR_WORKERS") {
            config.processing.max_workers = workers.parse().unwrap_or(4);
        }

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.processing.max_workers == 0 {
            return Err(anyhow!("max_workers must be greater than 0"));
        }

        if self.extraction.stride == 0 {
            return Err(anyhow!("stride must be at least 1"));
        }

        if self.extraction.min_padding_width == 0 {
            return Err(anyhow!("min_padding_width must be at least 1"));
        }

        if self.export.crf > 51 {
            return Err(anyhow!("crf must be in 0..=51"));
        }

        if self.processing.supported_extensions.is_empty() {
            return Err(anyhow!("supported_extensions must not be empty"));
        }

        Ok(())
    }

    /// Get runtime configuration summary
    pub fn summary(&self) -> String {
        format!(
            "Segment Annotator Configuration:\n\
            - Videos Directory: {}\n\
            - Segments Directory: {}\n\
            - Dataset Directory: {}\n\
            - Clip Container: {} ({}, crf {})\n\
            - Image Format: {} (stride {}, padding {})\n\
            - Workers: {}\n\
            - Skip Existing: {}",
            self.output.videos_dir.display(),
            self.output.segments_dir.display(),
            self.output.dataset_dir.display(),
            self.export.container,
            self.export.video_codec,
            self.export.crf,
            self.extraction.image_format,
            self.extraction.stride,
            self.extraction.min_padding_width,
            self.processing.max_workers,
            self.processing.skip_existing,
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            processing: ProcessingConfig {
                supported_extensions: vec![
                    "mp4".to_string(),
                    "mkv".to_string(),
                    "avi".to_string(),
                    "mov".to_string(),
                    "webm".to_string(),
                    "m4v".to_string(),
                ],
                skip_existing: true,
                max_workers: num_cpus::get().min(8),
            },
            export: ExportConfig {
                container: "mp4".to_string(),
                video_codec: "libx264".to_string(),
                crf: 18,
                preset: "medium".to_string(),
            },
            extraction: ExtractionConfig {
                image_format: "jpg".to_string(),
                image_quality: 2,
                min_padding_width: 4,
                stride: 1,
            },
            dataset: DatasetConfig {
                write_frame_list: true,
            },
            output: OutputConfig {
                videos_dir: PathBuf::from("videos"),
                segments_dir: PathBuf::from("segments"),
                dataset_dir: PathBuf::from("unified_dataset"),
            },
        }
    }
}

/// Configuration builder for programmatic config creation
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.config.processing.max_workers = workers;
        self
    }

    pub fn with_container(mut self, container: impl Into<String>) -> Self {
        self.config.export.container = container.into();
        self
    }

    pub fn with_image_format(mut self, format: impl Into<String>) -> Self {
        self.config.extraction.image_format = format.into();
        self
    }

    pub fn with_stride(mut self, stride: u32) -> Self {
        self.config.extraction.stride = stride;
        self
    }

    pub fn with_padding_width(mut self, width: usize) -> Self {
        self.config.extraction.min_padding_width = width;
        self
    }

    pub fn with_segments_dir(mut self, dir: PathBuf) -> Self {
        self.config.output.segments_dir = dir;
        self
    }

    pub fn with_dataset_dir(mut self, dir: PathBuf) -> Self {
        self.config.output.dataset_dir = dir;
        self
    }

    pub fn skip_existing(mut self, skip: bool) -> Self {
        self.config.processing.skip_existing = skip;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.export.container, "mp4");
        assert_eq!(config.extraction.image_format, "jpg");
        assert_eq!(config.extraction.stride, 1);
        assert_eq!(config.extraction.min_padding_width, 4);
        assert!(config.processing.skip_existing);
    }

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new()
            .with_workers(2)
            .with_image_format("png")
            .with_stride(5)
            .skip_existing(false)
            .build();

        assert_eq!(config.processing.max_workers, 2);
        assert_eq!(config.extraction.image_format, "png");
        assert_eq!(config.extraction.stride, 5);
        assert!(!config.processing.skip_existing);
    }

    #[test]
    fn test_config_validation() {
        let config = Config::default();
        assert!(config.validate().is_ok());

        let bad = ConfigBuilder::new().with_stride(0).build();
        assert!(bad.validate().is_err());

        let bad = ConfigBuilder::new().with_workers(0).build();
        assert!(bad.validate().is_err());
    }
}
