use anyhow::Result;
use clap::{Arg, ArgAction, Command};
use std::path::PathBuf;
use tracing::{info, warn};

use segment_annotator::config::Config;
use segment_annotator::dataset::{dataset_statistics, DatasetMerger};
use segment_annotator::processing::{load_annotations, BatchExporter, ExportJob};
use segment_annotator::segments::SegmentStore;
use segment_annotator::video::{video_id_for, VideoProcessor};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("segment_annotator=info,warn")
        .init();

    let matches = Command::new("segment-annotator")
        .version("0.1.0")
        .author("Video Annotation Tools")
        .about("Video segment annotation and dataset export pipeline")
        .subcommand_required(true)
        .subcommand(
            Command::new("export")
                .about("Export marked segments into clips and frame sets")
                .arg(
                    Arg::new("video")
                        .short('i')
                        .long("video")
                        .value_name("FILE")
                        .help("Source video to export segments from"),
                )
                .arg(
                    Arg::new("id")
                        .long("id")
                        .value_name("ID")
                        .help("Video id override (defaults to the file stem)"),
                )
                .arg(
                    Arg::new("segment")
                        .short('s')
                        .long("segment")
                        .value_name("START-END")
                        .action(ArgAction::Append)
                        .help("Segment bounds in seconds, e.g. 2.0-5.0 (repeatable)"),
                )
                .arg(
                    Arg::new("annotations")
                        .short('a')
                        .long("annotations")
                        .value_name("FILE")
                        .help("Annotations JSON file describing videos and their marked segments"),
                )
                .arg(
                    Arg::new("output-dir")
                        .short('o')
                        .long("output-dir")
                        .value_name("DIR")
                        .help("Segments output root (defaults to the configured segments dir)"),
                ),
        )
        .subcommand(
            Command::new("merge")
                .about("Merge all extracted frame sets into the unified dataset")
                .arg(
                    Arg::new("segments-root")
                        .long("segments-root")
                        .value_name("DIR")
                        .help("Root holding per-segment frame directories"),
                )
                .arg(
                    Arg::new("output-dir")
                        .short('o')
                        .long("output-dir")
                        .value_name("DIR")
                        .help("Unified dataset root (defaults to the configured dataset dir)"),
                ),
        )
        .subcommand(
            Command::new("list")
                .about("List source videos in the input folder")
                .arg(
                    Arg::new("videos-dir")
                        .long("videos-dir")
                        .value_name("DIR")
                        .help("Folder scanned for source videos"),
                ),
        )
        .subcommand(Command::new("stats").about("Show on-disk dataset statistics"))
        .get_matches();

    let config = Config::load().unwrap_or_else(|e| {
        warn!("Failed to load config, using defaults: {}", e);
        Config::default()
    });
    config.validate()?;

    match matches.subcommand() {
        Some(("export", sub)) => {
            let output_root = sub
                .get_one::<String>("output-dir")
                .map(PathBuf::from)
                .unwrap_or_else(|| config.output.segments_dir.clone());

            let mut store = SegmentStore::new();
            let jobs = if let Some(annotations) = sub.get_one::<String>("annotations") {
                load_annotations(&PathBuf::from(annotations), &mut store)?
            } else {
                let video = sub
                    .get_one::<String>("video")
                    .map(PathBuf::from)
                    .ok_or_else(|| {
                        anyhow::anyhow!("either --video or --annotations is required")
                    })?;
                let specs: Vec<&String> = sub
                    .get_many::<String>("segment")
                    .map(|values| values.collect())
                    .unwrap_or_default();
                if specs.is_empty() {
                    return Err(anyhow::anyhow!(
                        "at least one --segment START-END is required with --video"
                    ));
                }

                let video_id = sub
                    .get_one::<String>("id")
                    .cloned()
                    .unwrap_or_else(|| video_id_for(&video));
                for spec in specs {
                    let (start, end) = parse_segment_spec(spec)?;
                    store.mark_start(&video_id, start);
                    store.mark_end(&video_id, end);
                    store.commit_segment(&video_id)?;
                }
                vec![ExportJob {
                    video_path: video,
                    video_id: video_id.clone(),
                    segments: store.list_segments(&video_id).to_vec(),
                }]
            };

            if jobs.is_empty() {
                warn!("Nothing to export");
                return Ok(());
            }

            let exporter = BatchExporter::new(config);
            let report = exporter.export_all(jobs, &output_root).await?;
            info!(
                "✅ Exported: {} | ⏭️ Skipped: {} | ❌ Failed: {}",
                report.exported, report.skipped, report.failed
            );
            for outcome in report.outcomes.iter().filter(|o| o.error_message.is_some()) {
                warn!(
                    "{}_segment_{}: {}",
                    outcome.video_id,
                    outcome.segment_index,
                    outcome.error_message.as_deref().unwrap_or("unknown error")
                );
            }
        }
        Some(("merge", sub)) => {
            let segments_root = sub
                .get_one::<String>("segments-root")
                .map(PathBuf::from)
                .unwrap_or_else(|| config.output.segments_dir.join("frames"));
            let output_root = sub
                .get_one::<String>("output-dir")
                .map(PathBuf::from)
                .unwrap_or_else(|| config.output.dataset_dir.clone());

            let merger = DatasetMerger::new(config.dataset.clone());
            let summary = merger
                .build_unified_dataset(&segments_root, &output_root)
                .await?;
            info!(
                "✅ Dataset ready: {} frames / {} segments / {} videos",
                summary.total_frames, summary.total_segments, summary.total_videos
            );
        }
        Some(("list", sub)) => {
            let videos_dir = sub
                .get_one::<String>("videos-dir")
                .map(PathBuf::from)
                .unwrap_or_else(|| config.output.videos_dir.clone());
            let processor =
                VideoProcessor::with_extensions(config.processing.supported_extensions.clone());
            let videos = processor.discover_videos(&videos_dir)?;
            if videos.is_empty() {
                warn!(
                    "No videos found, place video files in {}",
                    videos_dir.display()
                );
            }
            for video in videos {
                println!("{}\t{}", video_id_for(&video), video.display());
            }
        }
        Some(("stats", _)) => {
            let stats = dataset_statistics(
                &config.output.videos_dir,
                &config.output.segments_dir,
                &config.output.dataset_dir,
            );
            println!("{}", stats.format_report());
        }
        _ => unreachable!("subcommand is required"),
    }

    Ok(())
}

/// Parse a `START-END` seconds pair, e.g. `2.0-5.0`.
fn parse_segment_spec(spec: &str) -> Result<(f64, f64)> {
    let (start, end) = spec
        .split_once('-')
        .ok_or_else(|| anyhow::anyhow!("segment spec must be START-END, got '{spec}'"))?;
    let start: f64 = start
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid start time in '{spec}'"))?;
    let end: f64 = end
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid end time in '{spec}'"))?;
    Ok((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_segment_spec() {
        assert_eq!(parse_segment_spec("2.0-5.0").unwrap(), (2.0, 5.0));
        assert_eq!(parse_segment_spec("0-1").unwrap(), (0.0, 1.0));
        assert!(parse_segment_spec("2.0").is_err());
        assert!(parse_segment_spec("a-b").is_err());
    }
}
