use std::error::Error;
use std::time::Duration;

use meter_storage::{Storage, StorageError};

/// Upper bound for a single storage ping.
pub const PING_TIMEOUT: Duration = Duration::from_secs(1);

/// Result of a storage health check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Health {
    /// The storage answered the ping.
    Healthy,
    /// The storage has no notion of connectivity.
    Unsupported,
    /// The ping failed or timed out.
    Unhealthy,
}

/// Pings the storage, giving up after [`PING_TIMEOUT`].
pub async fn check_health(storage: &Storage) -> Health {
    match tokio::time::timeout(PING_TIMEOUT, storage.ping()).await {
        Ok(Ok(())) => Health::Healthy,
        Ok(Err(StorageError::PingUnsupported(_))) => Health::Unsupported,
        Ok(Err(error)) => {
            meter_log::warn!(error = &error as &dyn Error, "storage ping failed");
            Health::Unhealthy
        }
        Err(_) => {
            meter_log::warn!("storage ping timed out");
            Health::Unhealthy
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_unsupported() {
        assert_eq!(check_health(&Storage::memory()).await, Health::Unsupported);
    }

    #[tokio::test]
    async fn test_sqlite_healthy_until_closed() {
        let dir = tempfile::tempdir().unwrap();
        let config = meter_config::Config::from_json_value(serde_json::json!({
            "storage": {
                "database_dsn": format!("sqlite://{}", dir.path().join("metrics.db").display()),
            }
        }))
        .unwrap();

        let storage = Storage::from_config(&config).await.unwrap();
        assert_eq!(check_health(&storage).await, Health::Healthy);

        storage.close().await.unwrap();
        assert_eq!(check_health(&storage).await, Health::Unhealthy);
    }
}
