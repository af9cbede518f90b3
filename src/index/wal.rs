//! Shared write-ahead-log helpers used by `InvertedIndex` and
//! `MetadataIndex`: append a CRC32-checksummed JSON line, and replay a WAL
//! file tolerating a malformed or partial trailing line.
use crate::error::RecallResult;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct WalLine<T> {
    entry: T,
    checksum: String,
}

fn checksum_of(entry_json: &str) -> String {
    format!("crc32:{:08x}", crc32fast::hash(entry_json.as_bytes()))
}

/// Append one entry as a checksummed JSON line to `path`, creating the file
/// if needed.
pub fn append_line<T: Serialize>(path: &Path, entry: &T) -> RecallResult<()> {
    let entry_json = serde_json::to_string(entry)?;
    let checksum = checksum_of(&entry_json);
    let line = serde_json::to_string(&serde_json::json!({
        "entry": serde_json::from_str::<serde_json::Value>(&entry_json)?,
        "checksum": checksum,
    }))?;

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", line)?;
    file.flush()?;
    Ok(())
}

/// Replay every line in a WAL file, skipping lines that fail to parse or
/// fail checksum verification (corruption or a partial trailing write).
pub fn replay<T: DeserializeOwned>(path: &Path) -> RecallResult<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = std::fs::File::open(path)?;
    let reader = BufReader::new(file);
    let mut out = Vec::new();
    for line in reader.lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<WalLine<T>>(&line) {
            Ok(wal_line) => {
                let entry_json = match serde_json::to_string(&wal_line.entry) {
                    Ok(s) => s,
                    Err(_) => continue,
                };
                if checksum_of(&entry_json) != wal_line.checksum {
                    tracing::warn!(path = %path.display(), "WAL checksum mismatch, skipping line");
                    continue;
                }
                out.push(wal_line.entry);
            }
            Err(_) => {
                tracing::warn!(path = %path.display(), "skipping unparseable WAL line");
                continue;
            }
        }
    }
    Ok(out)
}

/// Truncate the WAL file to empty (called after a successful compaction).
pub fn truncate(path: &Path) -> RecallResult<()> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    Ok(())
}

/// Atomically rewrite a snapshot file via temp-file + rename.
pub fn write_snapshot_atomic<T: Serialize>(path: &Path, value: &T) -> RecallResult<()> {
    let tmp = path.with_extension("json.tmp");
    let data = serde_json::to_string(value)?;
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Entry {
        keyword: String,
        item_id: String,
    }

    #[test]
    fn append_and_replay_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.jsonl");

        append_line(&path, &Entry { keyword: "a".into(), item_id: "1".into() }).unwrap();
        append_line(&path, &Entry { keyword: "b".into(), item_id: "2".into() }).unwrap();

        let replayed: Vec<Entry> = replay(&path).unwrap();
        assert_eq!(replayed.len(), 2);
        assert_eq!(replayed[0].keyword, "a");
    }

    #[test]
    fn replay_skips_malformed_trailing_line() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.jsonl");
        append_line(&path, &Entry { keyword: "a".into(), item_id: "1".into() }).unwrap();

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        write!(file, "{{not valid json").unwrap();

        let replayed: Vec<Entry> = replay(&path).unwrap();
        assert_eq!(replayed.len(), 1);
    }

    #[test]
    fn truncate_removes_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.jsonl");
        append_line(&path, &Entry { keyword: "a".into(), item_id: "1".into() }).unwrap();
        truncate(&path).unwrap();
        assert!(!path.exists());
    }
}
