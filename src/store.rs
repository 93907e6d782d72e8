//! File-based local state under the data directory (default ~/.trackium).
//!
//! Two files:
//! - `location-data.json`: the single last-known-state record, overwritten
//!   on every successful resolution.
//! - `pending_location_updates.json`: the ordered queue of payloads the
//!   remote node has not yet acknowledged.
//!
//! Both are replaced atomically (write and fsync `.tmp`, then rename) so a
//! crash mid-write leaves the previous contents intact.

use crate::location::{Location, LocationSource};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const LAST_STATE_FILE: &str = "location-data.json";

/// Fixed key the pending queue is stored under, locally and remotely.
pub const PENDING_QUEUE_KEY: &str = "pending_location_updates";

/// Last known state of this device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedRecord {
    pub device_id: String,
    pub location: Location,
    pub timestamp: DateTime<Utc>,
    pub uploaded: bool,
}

/// One delivery payload, exactly as the remote node receives it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingPayload {
    pub device_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
    #[serde(default)]
    pub altitude: f64,
    #[serde(default)]
    pub speed: f64,
    pub timestamp: DateTime<Utc>,
    pub source: LocationSource,
}

impl PendingPayload {
    pub fn new(device_id: &str, location: &Location, timestamp: DateTime<Utc>) -> Self {
        Self {
            device_id: device_id.to_string(),
            latitude: location.latitude,
            longitude: location.longitude,
            accuracy: location.accuracy,
            altitude: 0.0,
            speed: 0.0,
            timestamp,
            source: location.source,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Durable local state.
pub struct LocalStore {
    dir: PathBuf,
}

impl LocalStore {
    /// Open a store rooted at `dir`. Nothing is touched until the first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The default data directory (~/.trackium).
    pub fn default_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".trackium")
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn last_path(&self) -> PathBuf {
        self.dir.join(LAST_STATE_FILE)
    }

    pub fn pending_path(&self) -> PathBuf {
        self.dir.join(format!("{}.json", PENDING_QUEUE_KEY))
    }

    /// Overwrite the last-known-state record.
    pub fn save_last(&self, record: &PersistedRecord) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(record)?;
        self.write_atomic(&self.last_path(), &json)
    }

    /// Read the last-known-state record, if one has been written.
    pub fn load_last(&self) -> Result<Option<PersistedRecord>, StoreError> {
        let path = self.last_path();
        let Some(data) = read_optional(&path)? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(&data)?))
    }

    /// Read the full pending queue.
    ///
    /// A missing file is an empty queue. A file that no longer decodes
    /// (bad UTF-8 included) is moved aside to `<file>.corrupt-<timestamp>`
    /// so later writes cannot clobber it.
    pub fn load_pending_queue(&self) -> Result<Vec<PendingPayload>, StoreError> {
        let path = self.pending_path();
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        match serde_json::from_slice(&data) {
            Ok(queue) => Ok(queue),
            Err(e) => {
                let aside = quarantine_path(&path);
                tracing::warn!(
                    path = %path.display(),
                    moved_to = %aside.display(),
                    error = %e,
                    "pending queue unreadable, starting empty"
                );
                fs::rename(&path, &aside).map_err(|source| StoreError::Io {
                    path: path.clone(),
                    source,
                })?;
                Ok(Vec::new())
            }
        }
    }

    /// Replace the full pending queue.
    pub fn save_pending_queue(&self, queue: &[PendingPayload]) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(queue)?;
        self.write_atomic(&self.pending_path(), &json)
    }

    fn write_atomic(&self, path: &Path, contents: &str) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        };

        fs::create_dir_all(&self.dir).map_err(|source| StoreError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let tmp = path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp).map_err(io_err)?;
            file.write_all(contents.as_bytes()).map_err(io_err)?;
            file.sync_all().map_err(io_err)?;
        }

        fs::rename(&tmp, path).map_err(|source| {
            let _ = fs::remove_file(&tmp);
            io_err(source)
        })?;

        // Persist the rename itself. Directories cannot be opened for
        // syncing everywhere, so this is best-effort.
        if let Ok(dir) = fs::File::open(&self.dir) {
            let _ = dir.sync_all();
        }
        Ok(())
    }
}

/// A fresh `<file>.corrupt-<timestamp>` name that does not exist yet.
fn quarantine_path(path: &Path) -> PathBuf {
    let stamp = Utc::now().format("%Y%m%dT%H%M%S%.6fZ");
    let base = path.with_extension(format!("json.corrupt-{}", stamp));
    let mut candidate = base.clone();
    let mut n = 1;
    while candidate.exists() {
        candidate = PathBuf::from(format!("{}.{}", base.display(), n));
        n += 1;
    }
    candidate
}

fn read_optional(path: &Path) -> Result<Option<String>, StoreError> {
    match fs::read_to_string(path) {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(StoreError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn test_store() -> (LocalStore, TempDir) {
        let dir = TempDir::new().unwrap();
        (LocalStore::new(dir.path().join("state")), dir)
    }

    fn london() -> Location {
        Location {
            latitude: 51.5,
            longitude: -0.12,
            accuracy: 800.0,
            source: LocationSource::BigDataCloud,
            city: Some("London".into()),
            country: Some("UK".into()),
        }
    }

    fn payload(n: i64) -> PendingPayload {
        let ts = Utc.timestamp_opt(1_700_000_000 + n, 0).unwrap();
        PendingPayload::new("TRACK-001", &london(), ts)
    }

    #[test]
    fn test_last_roundtrip_and_overwrite() {
        let (store, _dir) = test_store();
        assert!(store.load_last().unwrap().is_none());

        let mut record = PersistedRecord {
            device_id: "TRACK-001".into(),
            location: london(),
            timestamp: Utc::now(),
            uploaded: false,
        };
        store.save_last(&record).unwrap();

        record.uploaded = true;
        store.save_last(&record).unwrap();

        let loaded = store.load_last().unwrap().unwrap();
        assert_eq!(loaded, record);
        assert!(!store.last_path().with_extension("json.tmp").exists());
    }

    #[test]
    fn test_last_file_shape() {
        let (store, _dir) = test_store();
        store
            .save_last(&PersistedRecord {
                device_id: "TRACK-001".into(),
                location: london(),
                timestamp: Utc::now(),
                uploaded: false,
            })
            .unwrap();

        let raw = fs::read_to_string(store.last_path()).unwrap();
        assert!(raw.contains('\n'), "expected pretty-printed JSON");
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["deviceId"], "TRACK-001");
        assert_eq!(json["uploaded"], false);
        assert_eq!(json["location"]["source"], "bigdatacloud");
        assert_eq!(json["location"]["city"], "London");
    }

    #[test]
    fn test_queue_missing_is_empty() {
        let (store, _dir) = test_store();
        assert!(store.load_pending_queue().unwrap().is_empty());
    }

    #[test]
    fn test_queue_preserves_order() {
        let (store, _dir) = test_store();
        let queue: Vec<_> = (0..5).map(payload).collect();
        store.save_pending_queue(&queue).unwrap();

        let loaded = store.load_pending_queue().unwrap();
        assert_eq!(loaded.len(), 5);
        assert_eq!(loaded, queue);
    }

    #[test]
    fn test_queue_keeps_duplicates() {
        let (store, _dir) = test_store();
        let queue = vec![payload(1), payload(1)];
        store.save_pending_queue(&queue).unwrap();
        assert_eq!(store.load_pending_queue().unwrap().len(), 2);
    }

    #[test]
    fn test_corrupt_queue_moved_aside() {
        let (store, _dir) = test_store();
        fs::create_dir_all(store.dir()).unwrap();
        fs::write(store.pending_path(), "[{not json").unwrap();

        assert!(store.load_pending_queue().unwrap().is_empty());
        let aside = corrupt_files(&store);
        assert_eq!(aside.len(), 1);
        assert_eq!(fs::read_to_string(&aside[0]).unwrap(), "[{not json");
        assert!(!store.pending_path().exists());
    }

    fn corrupt_files(store: &LocalStore) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = fs::read_dir(store.dir())
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.to_string_lossy().contains(".json.corrupt-"))
            .collect();
        files.sort();
        files
    }

    #[test]
    fn test_invalid_utf8_queue_moved_aside() {
        let (store, _dir) = test_store();
        store.save_pending_queue(&[payload(0), payload(1)]).unwrap();
        let mut bytes = fs::read(store.pending_path()).unwrap();
        bytes.push(0xFF);
        fs::write(store.pending_path(), &bytes).unwrap();

        assert!(store.load_pending_queue().unwrap().is_empty());
        let aside = corrupt_files(&store);
        assert_eq!(aside.len(), 1);
        assert_eq!(fs::read(&aside[0]).unwrap(), bytes);
    }

    #[test]
    fn test_second_quarantine_keeps_first() {
        let (store, _dir) = test_store();
        fs::create_dir_all(store.dir()).unwrap();

        fs::write(store.pending_path(), "first").unwrap();
        store.load_pending_queue().unwrap();
        fs::write(store.pending_path(), "second").unwrap();
        store.load_pending_queue().unwrap();

        let contents: Vec<String> = corrupt_files(&store)
            .iter()
            .map(|p| fs::read_to_string(p).unwrap())
            .collect();
        assert_eq!(contents.len(), 2);
        assert!(contents.contains(&"first".to_string()));
        assert!(contents.contains(&"second".to_string()));
    }

    #[test]
    fn test_leftover_tmp_does_not_affect_queue() {
        let (store, _dir) = test_store();
        store.save_pending_queue(&[payload(0)]).unwrap();

        // Half-written temp file from an interrupted save.
        let tmp = store.pending_path().with_extension("json.tmp");
        fs::write(&tmp, "[{\"deviceId\":").unwrap();
        assert_eq!(store.load_pending_queue().unwrap(), vec![payload(0)]);

        store.save_pending_queue(&[payload(0), payload(1)]).unwrap();
        assert!(!tmp.exists());
        assert_eq!(store.load_pending_queue().unwrap().len(), 2);
    }

    #[test]
    fn test_payload_wire_shape() {
        let json = serde_json::to_value(payload(0)).unwrap();
        assert_eq!(json["deviceId"], "TRACK-001");
        assert_eq!(json["altitude"], 0.0);
        assert_eq!(json["speed"], 0.0);
        assert_eq!(json["source"], "bigdatacloud");
        assert!(json["timestamp"].as_str().unwrap().starts_with("2023-11-14T"));
    }

    #[test]
    fn test_write_failure_reported() {
        let dir = TempDir::new().unwrap();
        // A regular file where the data directory should be.
        let blocker = dir.path().join("blocked");
        fs::write(&blocker, "x").unwrap();
        let store = LocalStore::new(blocker.clone());
        assert!(matches!(store.save_pending_queue(&[payload(0)]), Err(StoreError::Io { .. })));
    }
}
