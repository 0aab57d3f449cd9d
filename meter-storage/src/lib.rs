//! Storage backends for aggregated metrics.
//!
//! All backends store one [`Record`] per [`RecordId`] and are internally synchronized, so a
//! [`Storage`] can be shared between request handlers behind an `Arc`. Aggregation semantics
//! (summing counters) live in the collector; storage only keeps the latest record per id.
//!
//! The backend is selected from the [`Config`]:
//!
//! - a database DSN selects [`SqliteStorage`],
//! - otherwise a snapshot file path selects [`FileStorage`],
//! - otherwise everything is kept in [`MemoryStorage`].
#![warn(missing_docs)]

use std::fmt;

use meter_config::Config;
use meter_metrics::{Record, RecordId};

mod file;
mod memory;
mod sqlite;

pub use self::file::*;
pub use self::memory::*;
pub use self::sqlite::*;

/// An error returned by [`Storage`] operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// No record is stored under the id.
    #[error("metric {0} not found")]
    NotFound(RecordId),

    /// A record without identity was passed to a write.
    #[error("refusing to store a record without identity")]
    EmptyId,

    /// The backend has no notion of connectivity.
    #[error("the {0} storage does not support ping")]
    PingUnsupported(&'static str),

    /// The file backend failed.
    #[error(transparent)]
    File(#[from] FileStorageError),

    /// The relational backend failed.
    #[error(transparent)]
    Sqlite(#[from] SqliteStorageError),
}

impl StorageError {
    /// Returns `true` if the error only signals a missing record.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Rejects records that cannot be keyed.
fn checked_id(record: &Record) -> Result<RecordId, StorageError> {
    let id = record.id();
    if id.is_empty() {
        return Err(StorageError::EmptyId);
    }
    Ok(id)
}

/// The metric store of the collector.
#[derive(Debug)]
pub enum Storage {
    /// Volatile in-memory storage.
    Memory(MemoryStorage),
    /// In-memory storage with JSON snapshots on disk.
    File(FileStorage),
    /// SQLite database.
    Sqlite(SqliteStorage),
}

impl Storage {
    /// Creates a volatile in-memory storage.
    pub fn memory() -> Self {
        Self::Memory(MemoryStorage::new())
    }

    /// Creates the file backed storage, restoring the snapshot if configured.
    pub async fn file(config: &Config) -> Result<Self, StorageError> {
        Ok(Self::File(FileStorage::prepare(config).await?))
    }

    /// Connects to the database and runs pending migrations.
    pub async fn sqlite(config: &Config) -> Result<Self, StorageError> {
        Ok(Self::Sqlite(SqliteStorage::prepare(config).await?))
    }

    /// Creates the storage backend selected by the configuration.
    pub async fn from_config(config: &Config) -> Result<Self, StorageError> {
        let storage = if config.database_dsn().is_some() {
            Self::sqlite(config).await?
        } else if config.file_storage_path().is_some() {
            Self::file(config).await?
        } else {
            Self::memory()
        };

        meter_log::info!(backend = %storage, "metric storage ready");
        Ok(storage)
    }

    /// Stores a record, replacing any previous record with the same id.
    pub async fn push(&self, record: &Record) -> Result<(), StorageError> {
        match self {
            Self::Memory(storage) => storage.push(record),
            Self::File(storage) => storage.push(record).await,
            Self::Sqlite(storage) => storage.push(record).await,
        }
    }

    /// Stores all records as one unit.
    pub async fn push_list(&self, records: &[Record]) -> Result<(), StorageError> {
        if records.is_empty() {
            return Ok(());
        }

        match self {
            Self::Memory(storage) => storage.push_list(records),
            Self::File(storage) => storage.push_list(records).await,
            Self::Sqlite(storage) => storage.push_list(records).await,
        }
    }

    /// Returns the record stored under `id`.
    pub async fn get(&self, id: &RecordId) -> Result<Record, StorageError> {
        match self {
            Self::Memory(storage) => storage.get(id),
            Self::File(storage) => storage.get(id),
            Self::Sqlite(storage) => storage.get(id).await,
        }
    }

    /// Returns all records ordered by name and type.
    pub async fn list(&self) -> Result<Vec<Record>, StorageError> {
        match self {
            Self::Memory(storage) => Ok(storage.list()),
            Self::File(storage) => Ok(storage.list()),
            Self::Sqlite(storage) => storage.list().await,
        }
    }

    /// Checks connectivity of the backend.
    pub async fn ping(&self) -> Result<(), StorageError> {
        match self {
            Self::Memory(_) => Err(StorageError::PingUnsupported("memory")),
            Self::File(_) => Err(StorageError::PingUnsupported("file")),
            Self::Sqlite(storage) => storage.ping().await,
        }
    }

    /// Writes the snapshot of the file backend. A no-op for the other backends.
    pub async fn dump(&self) -> Result<(), StorageError> {
        match self {
            Self::File(storage) => storage.dump().await,
            Self::Memory(_) | Self::Sqlite(_) => Ok(()),
        }
    }

    /// Flushes and releases the backend.
    pub async fn close(&self) -> Result<(), StorageError> {
        match self {
            Self::Memory(_) => Ok(()),
            Self::File(storage) => storage.close().await,
            Self::Sqlite(storage) => {
                storage.close().await;
                Ok(())
            }
        }
    }
}

impl fmt::Display for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory(_) => write!(f, "memory"),
            Self::File(_) => write!(f, "file"),
            Self::Sqlite(_) => write!(f, "sqlite"),
        }
    }
}
