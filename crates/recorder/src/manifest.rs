//! Session directory and `session.json`

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use contracts::{SessionState, StreamKey};
use observability::StatsSummary;
use serde::{Deserialize, Serialize};

use crate::error::{RecorderError, Result};

pub const MANIFEST_FILE: &str = "session.json";

/// Per-stream outcome of a recording session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamReport {
    pub stream: StreamKey,
    pub file: String,
    pub frames_written: u64,
    /// Sequence numbers skipped in the output
    pub dropped_frames: u64,
    /// Number of distinct gaps
    pub drop_events: u64,
    /// Frames discarded because their slot had already been skipped
    pub late_frames: u64,
    pub first_sequence: Option<u64>,
    pub last_sequence: Option<u64>,
    #[serde(default)]
    pub encode_latency_ms: StatsSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionFailure {
    pub stream: StreamKey,
    pub message: String,
}

/// Contents of `session.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    pub directory: PathBuf,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub state: SessionState,
    pub streams: Vec<StreamReport>,
    pub failure: Option<SessionFailure>,
}

impl SessionReport {
    pub fn stream(&self, key: StreamKey) -> Option<&StreamReport> {
        self.streams.iter().find(|s| s.stream == key)
    }

    pub fn total_dropped(&self) -> u64 {
        self.streams.iter().map(|s| s.dropped_frames).sum()
    }
}

/// `record_YYYYMMDD_HHMMSS`
pub fn session_dir_name(at: &DateTime<Local>) -> String {
    format!("record_{}", at.format("%Y%m%d_%H%M%S"))
}

/// Create a fresh session directory under `root`, suffixing `_N` on collision
pub fn create_session_dir(root: &Path, at: &DateTime<Local>) -> Result<PathBuf> {
    fs::create_dir_all(root).map_err(|e| RecorderError::io(root, e))?;
    let base = session_dir_name(at);
    let mut candidate = root.join(&base);
    let mut suffix = 1u32;
    loop {
        match fs::create_dir(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                candidate = root.join(format!("{base}_{suffix}"));
                suffix += 1;
            }
            Err(e) => return Err(RecorderError::io(candidate, e)),
        }
    }
}

pub fn write_manifest(dir: &Path, report: &SessionReport) -> Result<()> {
    let path = dir.join(MANIFEST_FILE);
    let json = serde_json::to_vec_pretty(report)
        .map_err(|e| RecorderError::Manifest(e.to_string()))?;
    // write-then-rename
    let tmp = dir.join(format!("{MANIFEST_FILE}.tmp"));
    fs::write(&tmp, json).map_err(|e| RecorderError::io(&tmp, e))?;
    fs::rename(&tmp, &path).map_err(|e| RecorderError::io(path, e))
}

pub fn read_manifest(dir: &Path) -> Result<SessionReport> {
    let path = dir.join(MANIFEST_FILE);
    let bytes = fs::read(&path).map_err(|e| RecorderError::io(&path, e))?;
    serde_json::from_slice(&bytes).map_err(|e| RecorderError::Manifest(format!("{}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_session_dir_collision() {
        let root = tempfile::tempdir().unwrap();
        let at = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();

        let first = create_session_dir(root.path(), &at).unwrap();
        let second = create_session_dir(root.path(), &at).unwrap();
        let third = create_session_dir(root.path(), &at).unwrap();

        assert!(first.ends_with("record_20240309_140507"));
        assert!(second.ends_with("record_20240309_140507_1"));
        assert!(third.ends_with("record_20240309_140507_2"));
    }

    #[test]
    fn test_manifest_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let report = SessionReport {
            directory: dir.path().to_path_buf(),
            started_at: "2024-03-09T14:05:07+00:00".to_string(),
            finished_at: None,
            state: SessionState::Active,
            streams: vec![StreamReport {
                stream: StreamKey::CAMERA_DEPTH,
                file: "depth.zst".to_string(),
                frames_written: 0,
                dropped_frames: 0,
                drop_events: 0,
                late_frames: 0,
                first_sequence: None,
                last_sequence: None,
                encode_latency_ms: StatsSummary::default(),
            }],
            failure: None,
        };
        write_manifest(dir.path(), &report).unwrap();
        assert!(!dir.path().join("session.json.tmp").exists());
        assert_eq!(read_manifest(dir.path()).unwrap(), report);
    }
}
