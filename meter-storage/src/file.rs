use std::collections::BTreeMap;
use std::error::Error;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use meter_config::Config;
use meter_metrics::{Record, RecordId};
use tokio::fs::{self, DirBuilder};
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::{MemoryStorage, StorageError, checked_id};

/// An error returned by [`FileStorage`].
#[derive(Debug, thiserror::Error)]
pub enum FileStorageError {
    /// No snapshot path is configured.
    #[error("no file path for the snapshot was provided")]
    NoFilePath,

    /// Reading the snapshot failed.
    #[error("failed to read snapshot {}", .0.display())]
    ReadError(PathBuf, #[source] io::Error),

    /// The snapshot is not valid JSON or contains invalid records.
    #[error("failed to parse snapshot {}", .0.display())]
    ParseError(PathBuf, #[source] serde_json::Error),

    /// Serializing the snapshot failed.
    #[error("failed to serialize snapshot")]
    SerializeError(#[source] serde_json::Error),

    /// Writing the snapshot failed.
    #[error("failed to write snapshot {}", .0.display())]
    WriteError(PathBuf, #[source] io::Error),
}

#[derive(Debug)]
struct Inner {
    memory: MemoryStorage,
    path: PathBuf,
    /// Serializes dumps so that a slow dump never overwrites a newer one.
    dump_lock: tokio::sync::Mutex<()>,
}

impl Inner {
    async fn dump(&self) -> Result<(), FileStorageError> {
        let _guard = self.dump_lock.lock().await;
        self.write(&self.memory.snapshot()).await
    }

    /// Writes a snapshot containing `records` and applies them to memory once it is on disk.
    ///
    /// If the write fails, memory is left untouched.
    async fn commit(&self, records: &[Record]) -> Result<(), StorageError> {
        let _guard = self.dump_lock.lock().await;

        let mut snapshot = self.memory.snapshot();
        for record in records {
            snapshot.insert(checked_id(record)?, record.clone());
        }

        self.write(&snapshot).await?;
        self.memory.push_list(records)
    }

    async fn write(&self, snapshot: &BTreeMap<RecordId, Record>) -> Result<(), FileStorageError> {
        let data = serde_json::to_vec(snapshot).map_err(FileStorageError::SerializeError)?;

        write_atomic(&self.path, &data)
            .await
            .map_err(|e| FileStorageError::WriteError(self.path.clone(), e))?;

        meter_log::trace!(records = snapshot.len(), "snapshot written");
        Ok(())
    }
}

/// Writes to a temporary sibling, syncs it and renames it over `path`.
async fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        DirBuilder::new().recursive(true).create(parent).await?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut file = fs::File::create(&tmp).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(&tmp, path).await
}

/// Reads a snapshot. A missing or blank file yields an empty map.
async fn read_snapshot(path: &Path) -> Result<BTreeMap<RecordId, Record>, FileStorageError> {
    let data = match fs::read(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => return Err(FileStorageError::ReadError(path.to_owned(), e)),
    };

    if data.iter().all(u8::is_ascii_whitespace) {
        return Ok(BTreeMap::new());
    }

    let records: BTreeMap<String, Record> = serde_json::from_slice(&data)
        .map_err(|e| FileStorageError::ParseError(path.to_owned(), e))?;

    // Keys are derived from the records, the stored keys are informational.
    Ok(records
        .into_values()
        .map(|record| (record.id(), record))
        .collect())
}

/// In-memory storage that persists JSON snapshots to a file.
///
/// With a store interval of zero every write is dumped before it is applied, and a failed dump
/// leaves the stored records unchanged. Otherwise a background task dumps on the interval and
/// [`close`](Self::close) writes a final snapshot.
#[derive(Debug)]
pub struct FileStorage {
    inner: Arc<Inner>,
    sync: bool,
    shutdown: CancellationToken,
    dumper: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl FileStorage {
    /// Creates the storage from the configuration, restoring the snapshot if enabled.
    pub async fn prepare(config: &Config) -> Result<Self, FileStorageError> {
        let Some(path) = config.file_storage_path() else {
            return Err(FileStorageError::NoFilePath);
        };

        meter_log::info!("snapshot file {}", path.display());
        Self::open(path, config.store_interval(), config.restore()).await
    }

    /// Opens the storage at `path`.
    pub async fn open(
        path: impl Into<PathBuf>,
        interval: Duration,
        restore: bool,
    ) -> Result<Self, FileStorageError> {
        let path = path.into();

        let records = if restore {
            let records = read_snapshot(&path).await?;
            meter_log::info!(records = records.len(), "restored snapshot");
            records
        } else {
            BTreeMap::new()
        };

        let inner = Arc::new(Inner {
            memory: MemoryStorage::with_records(records),
            path,
            dump_lock: tokio::sync::Mutex::new(()),
        });

        let shutdown = CancellationToken::new();
        let sync = interval.is_zero();
        let dumper = (!sync).then(|| spawn_dumper(inner.clone(), interval, shutdown.clone()));

        Ok(Self {
            inner,
            sync,
            shutdown,
            dumper: parking_lot::Mutex::new(dumper),
        })
    }

    /// Returns the snapshot path.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Stores a record, dumping first in synchronous mode.
    pub async fn push(&self, record: &Record) -> Result<(), StorageError> {
        if self.sync {
            return self.inner.commit(std::slice::from_ref(record)).await;
        }
        self.inner.memory.push(record)
    }

    /// Stores all records, dumping once first in synchronous mode.
    pub async fn push_list(&self, records: &[Record]) -> Result<(), StorageError> {
        if self.sync {
            return self.inner.commit(records).await;
        }
        self.inner.memory.push_list(records)
    }

    /// Returns the record stored under `id`.
    pub fn get(&self, id: &RecordId) -> Result<Record, StorageError> {
        self.inner.memory.get(id)
    }

    /// Returns all records ordered by name and type.
    pub fn list(&self) -> Vec<Record> {
        self.inner.memory.list()
    }

    /// Writes the current snapshot.
    pub async fn dump(&self) -> Result<(), StorageError> {
        Ok(self.inner.dump().await?)
    }

    /// Stops the background dumper and writes a final snapshot.
    pub async fn close(&self) -> Result<(), StorageError> {
        self.shutdown.cancel();

        let dumper = self.dumper.lock().take();
        if let Some(handle) = dumper {
            handle.await.ok();
        }

        self.dump().await
    }
}

impl Drop for FileStorage {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn spawn_dumper(
    inner: Arc<Inner>,
    period: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(error) = inner.dump().await {
                        meter_log::error!(
                            error = &error as &dyn Error,
                            "failed to write snapshot",
                        );
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use meter_metrics::MetricValue;
    use similar_asserts::assert_eq;

    use super::*;

    fn snapshot_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("data").join("metrics.json")
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(snapshot_path(&dir), Duration::ZERO, true)
            .await
            .unwrap();
        assert!(storage.list().is_empty());
    }

    #[tokio::test]
    async fn test_sync_mode_writes_on_push() {
        let dir = tempfile::tempdir().unwrap();
        let path = snapshot_path(&dir);
        let storage = FileStorage::open(&path, Duration::ZERO, true).await.unwrap();

        storage
            .push(&Record::counter("PollCount", 5).unwrap())
            .await
            .unwrap();

        let written: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(
            written,
            serde_json::json!({
                "PollCount_counter": {"name": "PollCount", "kind": "counter", "value": "5"}
            })
        );
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_failed_sync_write_keeps_state() {
        let dir = tempfile::tempdir().unwrap();

        // A regular file where the snapshot directory should be makes every write fail.
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"").unwrap();
        let storage = FileStorage::open(blocker.join("metrics.json"), Duration::ZERO, false)
            .await
            .unwrap();
        storage
            .inner
            .memory
            .push(&Record::counter("PollCount", 1).unwrap())
            .unwrap();

        let error = storage
            .push(&Record::counter("PollCount", 2).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            StorageError::File(FileStorageError::WriteError(..))
        ));
        assert_eq!(
            storage
                .get(&RecordId::new("PollCount", "counter"))
                .unwrap()
                .value(),
            MetricValue::Counter(1)
        );

        let error = storage
            .push_list(&[Record::gauge("Alloc", 1.5).unwrap()])
            .await
            .unwrap_err();
        assert!(matches!(error, StorageError::File(..)));
        assert!(
            storage
                .get(&RecordId::new("Alloc", "gauge"))
                .unwrap_err()
                .is_not_found()
        );
        assert_eq!(storage.list().len(), 1);
    }

    #[tokio::test]
    async fn test_restore_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = snapshot_path(&dir);

        let storage = FileStorage::open(&path, Duration::from_secs(300), true)
            .await
            .unwrap();
        storage
            .push_list(&[
                Record::counter("PollCount", 20).unwrap(),
                Record::gauge("Alloc", 11.23).unwrap(),
                Record::gauge("RandomValue", 0.1 + 0.2).unwrap(),
            ])
            .await
            .unwrap();
        // Buffered mode does not write before close.
        assert!(!path.exists());
        storage.close().await.unwrap();

        let restored = FileStorage::open(&path, Duration::ZERO, true).await.unwrap();
        assert_eq!(restored.list(), storage.list());
        assert_eq!(
            restored
                .get(&RecordId::new("RandomValue", "gauge"))
                .unwrap()
                .value(),
            MetricValue::Gauge(0.1 + 0.2)
        );
    }

    #[tokio::test]
    async fn test_restore_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let path = snapshot_path(&dir);

        let storage = FileStorage::open(&path, Duration::ZERO, true).await.unwrap();
        storage
            .push(&Record::counter("PollCount", 1).unwrap())
            .await
            .unwrap();

        let fresh = FileStorage::open(&path, Duration::ZERO, false).await.unwrap();
        assert!(fresh.list().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        std::fs::write(&path, b"{not json").unwrap();

        let error = FileStorage::open(&path, Duration::ZERO, true)
            .await
            .unwrap_err();
        assert!(matches!(error, FileStorageError::ParseError(..)));
    }

    #[tokio::test]
    async fn test_blank_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        std::fs::write(&path, b"\n").unwrap();

        let storage = FileStorage::open(&path, Duration::ZERO, true).await.unwrap();
        assert!(storage.list().is_empty());
    }

    #[tokio::test]
    async fn test_interval_dump() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");

        let storage = FileStorage::open(&path, Duration::from_millis(50), false)
            .await
            .unwrap();
        storage
            .push(&Record::gauge("Alloc", 1.0).unwrap())
            .await
            .unwrap();

        for _ in 0..100 {
            if path.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert!(path.exists());
        storage.close().await.unwrap();
    }
}
