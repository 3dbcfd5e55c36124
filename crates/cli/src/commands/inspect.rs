//! `inspect` command: read a recorded session back from disk.

use std::path::Path;

use anyhow::{Context, Result};
use contracts::{StreamKey, StreamKind};
use recorder::encoders::{read_index, DepthReader, PointCloudReader, COLOR_INDEX_FILE, DEPTH_INDEX_FILE};
use recorder::{read_manifest, SessionReport};
use serde::Serialize;
use tracing::info;

use crate::cli::InspectArgs;

#[derive(Debug, Serialize)]
struct SessionInspection {
    manifest: SessionReport,
    streams: Vec<StreamInspection>,
}

#[derive(Debug, Serialize)]
struct StreamInspection {
    stream: StreamKey,
    file: String,
    file_bytes: u64,
    frames: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Execute the `inspect` command
pub fn run_inspect(args: &InspectArgs) -> Result<()> {
    info!(session = %args.session.display(), "Inspecting session");
    let inspection = inspect_session(&args.session)?;

    if args.json {
        let json = serde_json::to_string_pretty(&inspection)
            .context("Failed to serialize inspection")?;
        println!("{json}");
    } else {
        print_inspection(&inspection);
    }

    if inspection.streams.iter().any(|s| s.error.is_some()) {
        anyhow::bail!("Some session files could not be read");
    }
    Ok(())
}

fn inspect_session(dir: &Path) -> Result<SessionInspection> {
    let manifest = read_manifest(dir)
        .with_context(|| format!("Not a recording session: {}", dir.display()))?;
    let streams = manifest
        .streams
        .iter()
        .map(|report| inspect_stream(dir, report.stream, &report.file))
        .collect();
    Ok(SessionInspection { manifest, streams })
}

fn inspect_stream(dir: &Path, stream: StreamKey, file: &str) -> StreamInspection {
    let path = dir.join(file);
    let file_bytes = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
    let mut inspection = StreamInspection {
        stream,
        file: file.to_string(),
        file_bytes,
        frames: 0,
        detail: None,
        error: None,
    };

    let outcome = match stream.stream {
        StreamKind::PointCloud => inspect_pointcloud(&path),
        StreamKind::Depth => inspect_depth(&path, &dir.join(DEPTH_INDEX_FILE)),
        StreamKind::Color => inspect_color(&dir.join(COLOR_INDEX_FILE)),
    };
    match outcome {
        Ok((frames, detail)) => {
            inspection.frames = frames;
            inspection.detail = detail;
        }
        Err(e) => inspection.error = Some(format!("{e:#}")),
    }
    inspection
}

fn inspect_pointcloud(path: &Path) -> Result<(u64, Option<String>)> {
    let frames = PointCloudReader::open(path)?.read_frames()?;
    let points: usize = frames.iter().map(|f| f.points.len()).sum();
    let span = match (frames.first(), frames.last()) {
        (Some(first), Some(last)) => format!(
            ", sequences {}..={}",
            first.frame_num, last.frame_num
        ),
        _ => String::new(),
    };
    Ok((frames.len() as u64, Some(format!("{points} points{span}"))))
}

fn inspect_depth(path: &Path, index: &Path) -> Result<(u64, Option<String>)> {
    let mut reader = DepthReader::open(path).context("open depth file")?;
    let mut frames = 0u64;
    while reader.next_frame().context("read depth frame")?.is_some() {
        frames += 1;
    }
    let indexed = read_index(index).context("read depth index")?.len() as u64;
    if indexed != frames {
        anyhow::bail!("depth index lists {indexed} frames, file holds {frames}");
    }
    let detail = reader
        .header()
        .map(|h| format!("{}x{} {:?} scale {}", h.width, h.height, h.format, h.scale));
    Ok((frames, detail))
}

fn inspect_color(index: &Path) -> Result<(u64, Option<String>)> {
    let entries = read_index(index).context("read color index")?;
    let video_frames: u64 = entries.iter().map(|e| u64::from(e.repeats)).sum();
    Ok((
        entries.len() as u64,
        Some(format!("{video_frames} video frames incl. gap fill")),
    ))
}

fn print_inspection(inspection: &SessionInspection) {
    let manifest = &inspection.manifest;
    println!("\n=== Session {} ===\n", manifest.directory.display());
    println!("  State:   {:?}", manifest.state);
    println!("  Started: {}", manifest.started_at);
    if let Some(finished) = &manifest.finished_at {
        println!("  Finished: {finished}");
    }
    if let Some(failure) = &manifest.failure {
        println!("  Failure: {} ({})", failure.stream, failure.message);
    }

    println!("\nFiles:");
    for stream in &inspection.streams {
        let recorded = manifest.stream(stream.stream).map_or(0, |s| s.frames_written);
        println!(
            "  - {:<18} {:<22} {:>10} bytes  {} frames read / {} recorded",
            stream.stream.to_string(),
            stream.file,
            stream.file_bytes,
            stream.frames,
            recorded
        );
        if let Some(detail) = &stream.detail {
            println!("      {detail}");
        }
        if let Some(error) = &stream.error {
            println!("      error: {error}");
        }
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inspect_rejects_plain_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(inspect_session(dir.path()).is_err());
    }
}
