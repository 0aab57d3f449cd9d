use std::error::Error;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use meter_config::Config;
use meter_metrics::{Record, RecordId};
use sqlx::migrate::{MigrateError, Migrator};
use sqlx::query::Query;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::{Pool, QueryBuilder, Row, Sqlite};
use tokio::fs::DirBuilder;

static MIGRATOR: Migrator = sqlx::migrate!("../migrations");

/// How often migrations are attempted before giving up.
const MIGRATION_ATTEMPTS: usize = 5;

/// Delay between two migration attempts.
const MIGRATION_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Upper bound for a connectivity check.
const PING_TIMEOUT: Duration = Duration::from_secs(1);

/// Bound parameters per row of an insert statement.
const BINDS_PER_ROW: usize = 4;

/// Rows per insert statement, keeping below SQLite's default limit of 999 bound parameters.
const INSERT_CHUNK_SIZE: usize = 999 / BINDS_PER_ROW;

/// An error returned by [`SqliteStorage`].
#[derive(Debug, thiserror::Error)]
pub enum SqliteStorageError {
    /// No database DSN is configured.
    #[error("no database dsn was provided")]
    NoDsn,

    /// Connecting to the database failed.
    #[error("failed to setup the database: {0}")]
    SqlxSetupFailed(sqlx::Error),

    /// The directory of the database file could not be created.
    #[error("failed to create the database directory: {0}")]
    FileSetupError(std::io::Error),

    /// Migrations failed after all attempts.
    #[error("failed to migrate the database: {0}")]
    MigrationError(MigrateError),

    /// An insert or transaction failed.
    #[error("failed to write to the database: {0}")]
    WriteError(sqlx::Error),

    /// A select failed.
    #[error("failed to read from the database: {0}")]
    FetchError(sqlx::Error),

    /// A stored row does not form a valid record.
    #[error("invalid row {id} in the database")]
    InvalidRow {
        /// The primary key of the row.
        id: String,
    },

    /// The connectivity check failed.
    #[error("database ping failed: {0}")]
    PingFailed(sqlx::Error),

    /// The connectivity check did not finish in time.
    #[error("database ping timed out")]
    PingTimeout,
}

/// Stores records in a SQLite database.
///
/// Writes are upserts keyed by the record id. Batches are written in a single transaction.
#[derive(Debug, Clone)]
pub struct SqliteStorage {
    db: Pool<Sqlite>,
}

impl SqliteStorage {
    /// Connects to the configured database and applies pending migrations.
    pub async fn prepare(config: &Config) -> Result<Self, SqliteStorageError> {
        let Some(dsn) = config.database_dsn() else {
            return Err(SqliteStorageError::NoDsn);
        };

        let options = SqliteConnectOptions::from_str(dsn)
            .map_err(SqliteStorageError::SqlxSetupFailed)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            // WAL mode is safe from corruption with synchronous=NORMAL.
            .synchronous(SqliteSynchronous::Normal);

        Self::create_directory(options.get_filename()).await?;
        meter_log::info!("database file {}", options.get_filename().display());

        let db = SqlitePoolOptions::new()
            .max_connections(config.database_max_connections())
            .connect_with(options)
            .await
            .map_err(SqliteStorageError::SqlxSetupFailed)?;

        migrate(&db).await?;

        Ok(Self { db })
    }

    /// Creates the directories for the database file.
    async fn create_directory(path: &Path) -> Result<(), SqliteStorageError> {
        let Some(parent) = path.parent() else {
            return Ok(());
        };

        if !parent.as_os_str().is_empty() && !parent.exists() {
            meter_log::debug!("creating directory for database file: {}", parent.display());
            DirBuilder::new()
                .recursive(true)
                .create(&parent)
                .await
                .map_err(SqliteStorageError::FileSetupError)?;
        }

        Ok(())
    }

    /// Upserts a single record.
    pub async fn push(&self, record: &Record) -> Result<(), crate::StorageError> {
        let id = crate::checked_id(record)?;

        if let Err(err) = build_upsert(&id, record).execute(&self.db).await {
            meter_log::error!(
                error = &err as &dyn Error,
                id = %id,
                "failed to store metric",
            );
            return Err(SqliteStorageError::WriteError(err).into());
        }

        Ok(())
    }

    /// Upserts all records in one transaction.
    pub async fn push_list(&self, records: &[Record]) -> Result<(), crate::StorageError> {
        let keyed = records
            .iter()
            .map(|record| Ok((crate::checked_id(record)?, record)))
            .collect::<Result<Vec<_>, crate::StorageError>>()?;

        let result = async {
            let mut tx = self.db.begin().await?;
            for chunk in keyed.chunks(INSERT_CHUNK_SIZE) {
                build_upsert_many(chunk).build().execute(&mut *tx).await?;
            }
            tx.commit().await
        }
        .await;

        if let Err(err) = result {
            meter_log::error!(
                error = &err as &dyn Error,
                records = records.len(),
                "failed to store metric batch",
            );
            return Err(SqliteStorageError::WriteError(err).into());
        }

        Ok(())
    }

    /// Returns the record stored under `id`.
    pub async fn get(&self, id: &RecordId) -> Result<Record, crate::StorageError> {
        let row = build_get(id)
            .fetch_optional(&self.db)
            .await
            .map_err(SqliteStorageError::FetchError)?
            .ok_or_else(|| crate::StorageError::NotFound(id.clone()))?;

        Ok(extract_record(&row)?)
    }

    /// Returns all records ordered by name and type.
    pub async fn list(&self) -> Result<Vec<Record>, crate::StorageError> {
        let rows = build_list()
            .fetch_all(&self.db)
            .await
            .map_err(SqliteStorageError::FetchError)?;

        rows.iter()
            .map(|row| extract_record(row).map_err(Into::into))
            .collect()
    }

    /// Runs a trivial query with a short timeout.
    pub async fn ping(&self) -> Result<(), crate::StorageError> {
        match tokio::time::timeout(PING_TIMEOUT, build_ping().execute(&self.db)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(err)) => Err(SqliteStorageError::PingFailed(err).into()),
            Err(_) => Err(SqliteStorageError::PingTimeout.into()),
        }
    }

    /// Closes all connections of the pool.
    pub async fn close(&self) {
        self.db.close().await;
    }
}

/// Applies pending migrations, retrying while the database is unavailable.
///
/// Migrations that are already applied are skipped, so this is safe to run on every start.
async fn migrate(db: &Pool<Sqlite>) -> Result<(), SqliteStorageError> {
    let mut attempt = 1;

    loop {
        match MIGRATOR.run(db).await {
            Ok(()) => return Ok(()),
            Err(err) if attempt < MIGRATION_ATTEMPTS => {
                meter_log::warn!(
                    error = &err as &dyn Error,
                    attempt,
                    "failed to migrate the database, retrying",
                );
                attempt += 1;
                tokio::time::sleep(MIGRATION_RETRY_DELAY).await;
            }
            Err(err) => return Err(SqliteStorageError::MigrationError(err)),
        }
    }
}

/// Converts a row back into a [`Record`].
fn extract_record(row: &SqliteRow) -> Result<Record, SqliteStorageError> {
    let id: String = row.try_get("id").map_err(SqliteStorageError::FetchError)?;
    let name: String = row.try_get("name").map_err(SqliteStorageError::FetchError)?;
    let kind: String = row.try_get("kind").map_err(SqliteStorageError::FetchError)?;
    let value: String = row.try_get("value").map_err(SqliteStorageError::FetchError)?;

    Record::parse(&kind, &name, &value).map_err(|_| SqliteStorageError::InvalidRow { id })
}

/// Returns the query to upsert a single record.
fn build_upsert<'a>(
    id: &'a RecordId,
    record: &'a Record,
) -> Query<'a, Sqlite, SqliteArguments<'a>> {
    sqlx::query(
        "INSERT INTO metrics (id, name, kind, value) VALUES (?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET value = excluded.value;",
    )
    .bind(id.as_str())
    .bind(record.name())
    .bind(record.ty().as_str())
    .bind(record.value().to_string())
}

/// Returns a query builder that upserts many records at once.
fn build_upsert_many<'a>(records: &'a [(RecordId, &'a Record)]) -> QueryBuilder<'a, Sqlite> {
    let mut builder: QueryBuilder<Sqlite> =
        QueryBuilder::new("INSERT INTO metrics (id, name, kind, value) ");

    builder.push_values(records, |mut b, (id, record)| {
        b.push_bind(id.as_str())
            .push_bind(record.name())
            .push_bind(record.ty().as_str())
            .push_bind(record.value().to_string());
    });

    builder.push(" ON CONFLICT(id) DO UPDATE SET value = excluded.value");
    builder
}

/// Returns the query to fetch a single record.
fn build_get(id: &RecordId) -> Query<'_, Sqlite, SqliteArguments<'_>> {
    sqlx::query("SELECT id, name, kind, value FROM metrics WHERE id = ?;").bind(id.as_str())
}

/// Returns the query to fetch all records.
fn build_list<'a>() -> Query<'a, Sqlite, SqliteArguments<'a>> {
    sqlx::query("SELECT id, name, kind, value FROM metrics ORDER BY name, kind;")
}

/// Returns the connectivity check query.
fn build_ping<'a>() -> Query<'a, Sqlite, SqliteArguments<'a>> {
    sqlx::query("SELECT 1;")
}
