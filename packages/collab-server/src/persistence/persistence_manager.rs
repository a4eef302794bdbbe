//! Durable change log, counters and store snapshot.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use collab_core::{AnnotationStore, ChangeLogEntry, CollabError, EngineConfig, Result};
use crc32fast::Hasher;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use super::io_utils::{classify_io_error, retry_io_operation};

const LOG_FILE: &str = "changes.log";
const COUNTERS_FILE: &str = "counters.json";
const SNAPSHOT_FILE: &str = "store.json";
const SNAPSHOT_VERSION: u32 = 1;

/// Store state as of a given log sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    pub version: u32,
    /// Highest log sequence reflected in `store`
    pub last_sequence: u64,
    pub store: AnnotationStore,
}

fn checksum(bytes: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

/// Writes the change log, counters and store snapshot under `data_dir`.
#[derive(Debug)]
pub struct PersistenceManager {
    /// Data directory path
    data_dir: PathBuf,
    /// Maximum retry attempts for transient I/O errors
    max_retries: u32,
    /// Delay between retry attempts in milliseconds
    retry_delay_ms: u64,
    /// Snapshot every N commits, 0 = never
    snapshot_interval: u64,
    /// Commits since the last snapshot
    commits_since_snapshot: AtomicU64,
}

impl PersistenceManager {
    /// Creates a new persistence manager with the given configuration.
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            data_dir: config.data_dir.clone(),
            max_retries: config.persistence_max_retries,
            retry_delay_ms: config.persistence_retry_delay_ms,
            snapshot_interval: config.snapshot_interval_changes,
            commits_since_snapshot: AtomicU64::new(0),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.data_dir)
            .map_err(|e| classify_io_error(e, "Failed to create data directory"))
    }

    /// Appends one entry to the change log and syncs it to disk.
    ///
    /// Each line is `<crc32 hex> <json>`.
    pub fn append_log_entry(&self, entry: &ChangeLogEntry) -> Result<()> {
        let json = serde_json::to_string(entry)?;
        let line = format!("{:08x} {}\n", checksum(json.as_bytes()), json);
        retry_io_operation(
            || self.append_line(&line),
            self.max_retries,
            self.retry_delay_ms,
            "append_log_entry",
        )
    }

    fn append_line(&self, line: &str) -> Result<()> {
        self.ensure_dir()?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.data_dir.join(LOG_FILE))
            .map_err(|e| classify_io_error(e, "Failed to open change log"))?;
        let offset = file
            .metadata()
            .map_err(|e| classify_io_error(e, "Failed to stat change log"))?
            .len();
        let written = file
            .write_all(line.as_bytes())
            .map_err(|e| classify_io_error(e, "Failed to append change log"))
            .and_then(|()| {
                file.sync_data()
                    .map_err(|e| classify_io_error(e, "Failed to sync change log"))
            });
        if written.is_err() {
            // Cut a partial record so a retry starts on a line boundary
            if let Err(e) = file.set_len(offset) {
                warn!(offset, error = %e, "Failed to roll back partial change log append");
            }
        }
        written
    }

    /// Cuts the change log back to `len` bytes.
    fn truncate_log(&self, path: &Path, len: u64) -> Result<()> {
        let file = OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(|e| classify_io_error(e, "Failed to open change log"))?;
        file.set_len(len)
            .map_err(|e| classify_io_error(e, "Failed to truncate change log"))?;
        file.sync_all()
            .map_err(|e| classify_io_error(e, "Failed to sync change log"))
    }

    /// Reads back the whole change log, verifying every checksum.
    ///
    /// A final line without a newline is a torn append from a crash. It is
    /// cut from the file with a warning, so later appends start on a fresh
    /// line.
    pub fn load_log(&self) -> Result<Vec<ChangeLogEntry>> {
        let path = self.data_dir.join(LOG_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let contents = retry_io_operation(
            || fs::read_to_string(&path).map_err(|e| classify_io_error(e, "Failed to read change log")),
            self.max_retries,
            self.retry_delay_ms,
            "load_log",
        )?;

        let mut entries = Vec::new();
        let mut complete_len = 0u64;
        for (index, raw) in contents.split_inclusive('\n').enumerate() {
            let line_no = index + 1;
            let Some(line) = raw.strip_suffix('\n') else {
                warn!(
                    line = line_no,
                    bytes = raw.len(),
                    "Truncating incomplete trailing change log line"
                );
                self.truncate_log(&path, complete_len)?;
                break;
            };
            complete_len += raw.len() as u64;
            if line.trim().is_empty() {
                continue;
            }
            let (crc_hex, json) = line.split_once(' ').ok_or_else(|| {
                CollabError::DataCorruption(format!("{} line {}: missing checksum", LOG_FILE, line_no))
            })?;
            let expected = u32::from_str_radix(crc_hex, 16).map_err(|_| {
                CollabError::DataCorruption(format!(
                    "{} line {}: bad checksum field '{}'",
                    LOG_FILE, line_no, crc_hex
                ))
            })?;
            let actual = checksum(json.as_bytes());
            if expected != actual {
                return Err(CollabError::DataCorruption(format!(
                    "{} line {}: checksum mismatch (expected {:08x}, got {:08x})",
                    LOG_FILE, line_no, expected, actual
                )));
            }
            let entry: ChangeLogEntry = serde_json::from_str(json).map_err(|e| {
                CollabError::DataCorruption(format!("{} line {}: {}", LOG_FILE, line_no, e))
            })?;
            entries.push(entry);
        }
        debug!(entries = entries.len(), "Loaded change log");
        Ok(entries)
    }

    /// Atomically replaces the counters file.
    pub fn save_counters(&self, counters: &BTreeMap<String, u64>) -> Result<()> {
        let json = serde_json::to_vec_pretty(counters)?;
        retry_io_operation(
            || self.write_atomic(COUNTERS_FILE, &json),
            self.max_retries,
            self.retry_delay_ms,
            "save_counters",
        )
    }

    pub fn load_counters(&self) -> Result<BTreeMap<String, u64>> {
        match self.read_optional(COUNTERS_FILE)? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(BTreeMap::new()),
        }
    }

    /// Atomically replaces the store snapshot.
    pub fn save_snapshot(&self, store: &AnnotationStore, last_sequence: u64) -> Result<()> {
        let snapshot = StoreSnapshot {
            version: SNAPSHOT_VERSION,
            last_sequence,
            store: store.clone(),
        };
        let json = serde_json::to_vec(&snapshot)?;
        retry_io_operation(
            || self.write_atomic(SNAPSHOT_FILE, &json),
            self.max_retries,
            self.retry_delay_ms,
            "save_snapshot",
        )?;
        self.commits_since_snapshot.store(0, Ordering::Relaxed);
        debug!(last_sequence, "Wrote store snapshot");
        Ok(())
    }

    pub fn load_snapshot(&self) -> Result<Option<StoreSnapshot>> {
        let Some(bytes) = self.read_optional(SNAPSHOT_FILE)? else {
            return Ok(None);
        };
        let snapshot: StoreSnapshot = serde_json::from_slice(&bytes)
            .map_err(|e| CollabError::DataCorruption(format!("{}: {}", SNAPSHOT_FILE, e)))?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(CollabError::Serialization(format!(
                "Unsupported snapshot version: {}",
                snapshot.version
            )));
        }
        Ok(Some(snapshot))
    }

    /// Counts a commit and writes a snapshot when the interval is reached.
    ///
    /// # Returns
    /// Whether a snapshot was written
    pub fn record_commit(&self, store: &AnnotationStore, last_sequence: u64) -> Result<bool> {
        if self.snapshot_interval == 0 {
            return Ok(false);
        }
        let commits = self.commits_since_snapshot.fetch_add(1, Ordering::Relaxed) + 1;
        if commits < self.snapshot_interval {
            return Ok(false);
        }
        self.save_snapshot(store, last_sequence)?;
        Ok(true)
    }

    fn read_optional(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let path = self.data_dir.join(name);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path).map_err(|e| classify_io_error(e, &format!("Failed to read {}", name)))?;
        Ok(Some(bytes))
    }

    fn write_atomic(&self, name: &str, bytes: &[u8]) -> Result<()> {
        self.ensure_dir()?;
        let temp_path = self
            .data_dir
            .join(format!("{}.{}.tmp", name, Uuid::new_v4().simple()));
        let final_path = self.data_dir.join(name);

        let mut file = File::create(&temp_path)
            .map_err(|e| classify_io_error(e, "Failed to create temp file"))?;
        file.write_all(bytes)
            .map_err(|e| classify_io_error(e, &format!("Failed to write {}", name)))?;
        file.sync_all()
            .map_err(|e| classify_io_error(e, &format!("Failed to sync {}", name)))?;

        fs::rename(&temp_path, &final_path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            classify_io_error(e, &format!("Failed to rename {}", name))
        })
    }
}
