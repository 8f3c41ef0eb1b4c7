//! Snapshot layer: deterministic execution snapshots.
//!
//! A snapshot holds the full execution record (history, pending task and
//! dedup resources) plus the canonical hash of that record. No timestamps in snapshot content.
//!
//! Snapshots only shorten replay: the history log rebuilds the whole run,
//! dedup resources included. A snapshot whose hash does not verify is
//! ignored and the session falls back to an older one or to full replay.
//! Files are written under a temporary name and renamed into place.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use history_reapply::hashing::{canonical_hash, canonical_serialize};
use history_reapply::invariants::validate_invariants;
use history_reapply::ExecutionState;

use crate::error::{io_error, json_error, RuntimeError};

/// Snapshot on-disk format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Snapshot {
    /// Last history event covered by this snapshot.
    pub last_event_id: i64,
    /// Dedup resources recorded when the snapshot was taken.
    pub dedup_count: usize,
    pub state: ExecutionState,
    /// SHA-256 of the canonical JSON of `state`.
    pub hash: String,
    pub kernel_version: u32,
}

impl Snapshot {
    /// Check the stored hash against the state and the state's invariants.
    pub fn verify(&self) -> Result<(), String> {
        if self.kernel_version != history_reapply::KERNEL_VERSION {
            return Err(format!("kernel version {} is not supported", self.kernel_version));
        }
        if self.last_event_id != self.state.last_event_id() {
            return Err(format!(
                "header says event {} but state ends at {}",
                self.last_event_id,
                self.state.last_event_id()
            ));
        }
        if self.dedup_count != self.state.dedup_resources.len() {
            return Err(format!(
                "header says {} dedup resources but state has {}",
                self.dedup_count,
                self.state.dedup_resources.len()
            ));
        }
        if !verify_snapshot_hash(self) {
            return Err("hash mismatch".to_string());
        }
        validate_invariants(&self.state).map_err(|e| e.to_string())
    }
}

fn snapshot_file_name(last_event_id: i64) -> String {
    format!("snapshot_{last_event_id:08}.json")
}

fn parse_snapshot_file_name(name: &str) -> Option<i64> {
    name.strip_prefix("snapshot_")?
        .strip_suffix(".json")?
        .parse()
        .ok()
}

/// Write a snapshot of `state` into `dir`.
pub fn save_snapshot(dir: &Path, state: &ExecutionState) -> Result<PathBuf, RuntimeError> {
    fs::create_dir_all(dir).map_err(|e| io_error(dir, e))?;

    let snap = Snapshot {
        last_event_id: state.last_event_id(),
        dedup_count: state.dedup_resources.len(),
        state: state.clone(),
        hash: canonical_hash(state),
        kernel_version: history_reapply::KERNEL_VERSION,
    };

    let path = dir.join(snapshot_file_name(snap.last_event_id));
    let content = serde_json::to_string(&snap).map_err(|e| json_error(&path, e))?;

    // Readers only ever see a complete file.
    let tmp = path.with_extension("json.tmp");
    let mut file = File::create(&tmp).map_err(|e| io_error(&tmp, e))?;
    file.write_all(content.as_bytes())
        .and_then(|_| file.sync_all())
        .map_err(|e| io_error(&tmp, e))?;
    drop(file);
    fs::rename(&tmp, &path).map_err(|e| io_error(&path, e))?;

    Ok(path)
}

pub fn load_snapshot(path: &Path) -> Result<Snapshot, RuntimeError> {
    let content = fs::read_to_string(path).map_err(|e| io_error(path, e))?;
    serde_json::from_str(&content).map_err(|e| json_error(path, e))
}

/// Snapshot files in `dir`, newest first.
pub fn list_snapshots(dir: &Path) -> Result<Vec<PathBuf>, RuntimeError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut found = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| io_error(dir, e))? {
        let entry = entry.map_err(|e| io_error(dir, e))?;
        let name = entry.file_name();
        if let Some(order) = parse_snapshot_file_name(&name.to_string_lossy()) {
            found.push((order, entry.path()));
        }
    }
    found.sort_by(|a, b| b.0.cmp(&a.0));
    Ok(found.into_iter().map(|(_, path)| path).collect())
}

/// Newest snapshot in `dir` that parses and verifies.
pub fn load_latest_valid_snapshot(dir: &Path) -> Result<Option<Snapshot>, RuntimeError> {
    for path in list_snapshots(dir)? {
        let snap = match load_snapshot(&path) {
            Ok(snap) => snap,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "skipping unreadable snapshot");
                continue;
            }
        };
        match snap.verify() {
            Ok(()) => return Ok(Some(snap)),
            Err(reason) => {
                tracing::warn!(path = %path.display(), %reason, "skipping invalid snapshot");
            }
        }
    }
    Ok(None)
}

/// True if the stored hash matches the canonical JSON of the state.
pub fn verify_snapshot_hash(snap: &Snapshot) -> bool {
    let digest = Sha256::digest(canonical_serialize(&snap.state));
    let computed: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    computed == snap.hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_leaves_no_temporary_file() {
        let dir = tempfile::tempdir().unwrap();
        let state = ExecutionState::start("r1", 1, 0).unwrap();
        let path = save_snapshot(dir.path(), &state).unwrap();

        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["snapshot_00000002.json".to_string()]);
        assert!(load_snapshot(&path).unwrap().verify().is_ok());
    }

    #[test]
    fn dedup_count_mismatch_fails_verification() {
        let dir = tempfile::tempdir().unwrap();
        let state = ExecutionState::start("r1", 1, 0).unwrap();
        let path = save_snapshot(dir.path(), &state).unwrap();
        let mut snap = load_snapshot(&path).unwrap();
        snap.dedup_count = 3;
        assert!(snap.verify().is_err());
    }

    #[test]
    fn file_names_carry_last_event_id() {
        assert_eq!(snapshot_file_name(12), "snapshot_00000012.json");
        assert_eq!(parse_snapshot_file_name("snapshot_00000012.json"), Some(12));
        assert_eq!(parse_snapshot_file_name("snapshot_x.json"), None);
        assert_eq!(parse_snapshot_file_name("events.log"), None);
    }
}
