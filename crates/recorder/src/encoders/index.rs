//! Frame index sidecar (`*.frames.jsonl`)
//!
//! One JSON line per recorded frame so consumers can map file positions back
//! to capture timestamps.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub sequence: u64,
    pub capture_time_ns: u64,
    /// Output frames this frame occupies: >1 fills a video gap, 0 means merged away
    #[serde(default = "one")]
    pub repeats: u32,
}

fn one() -> u32 {
    1
}

pub struct FrameIndex {
    writer: BufWriter<File>,
}

impl FrameIndex {
    pub fn create(path: &Path) -> std::io::Result<Self> {
        Ok(Self {
            writer: BufWriter::new(File::create(path)?),
        })
    }

    pub fn append(&mut self, entry: &IndexEntry) -> std::io::Result<()> {
        serde_json::to_writer(&mut self.writer, entry).map_err(std::io::Error::other)?;
        self.writer.write_all(b"\n")
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

pub fn read_index(path: &Path) -> std::io::Result<Vec<IndexEntry>> {
    let reader = BufReader::new(File::open(path)?);
    let mut entries = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        entries.push(serde_json::from_str(&line).map_err(std::io::Error::other)?);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("depth.frames.jsonl");
        let mut index = FrameIndex::create(&path).unwrap();
        index
            .append(&IndexEntry { sequence: 0, capture_time_ns: 10, repeats: 1 })
            .unwrap();
        index
            .append(&IndexEntry { sequence: 2, capture_time_ns: 30, repeats: 3 })
            .unwrap();
        index.flush().unwrap();

        let entries = read_index(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].sequence, 2);
        assert_eq!(entries[1].repeats, 3);

        // repeats is optional on read
        std::fs::write(&path, "{\"sequence\":5,\"capture_time_ns\":1}\n").unwrap();
        assert_eq!(read_index(&path).unwrap()[0].repeats, 1);
    }
}
