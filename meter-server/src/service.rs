use std::error::Error;
use std::sync::Arc;

use meter_auth::{Decryptor, KeyError, Signer, SignerError};
use meter_config::Config;
use meter_storage::{Storage, StorageError};

use crate::ingest::Ingest;
use crate::services::Aggregator;

/// Indicates the type of failure of the server.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The storage backend could not be opened.
    #[error("could not initialize the metric storage")]
    Storage(#[from] StorageError),

    /// The shared secret is unusable.
    #[error("invalid signing key")]
    Signer(#[from] SignerError),

    /// The private key could not be loaded.
    #[error("could not load the private key")]
    Key(#[from] KeyError),
}

#[derive(Debug)]
struct StateInner {
    config: Arc<Config>,
    aggregator: Aggregator,
    signer: Option<Arc<Signer>>,
    ingest: Ingest,
}

/// Server state.
///
/// Shared by all HTTP handlers and gRPC services. Cloning is cheap.
#[derive(Clone, Debug)]
pub struct ServiceState {
    inner: Arc<StateInner>,
}

impl ServiceState {
    /// Opens the configured storage and loads the keys.
    pub async fn start(config: Arc<Config>) -> Result<Self, ServiceError> {
        let storage = Storage::from_config(&config).await?;
        Self::new(config, storage)
    }

    /// Creates the state on top of an already opened storage.
    pub fn new(config: Arc<Config>, storage: Storage) -> Result<Self, ServiceError> {
        let signer = match config.signing_key() {
            Some(key) => Some(Arc::new(Signer::new(key)?)),
            None => None,
        };

        let decryptor = match config.crypto_key_path() {
            Some(path) => {
                meter_log::info!("loading private key from {}", path.display());
                Some(Arc::new(Decryptor::from_pem_file(path)?))
            }
            None => None,
        };

        let inner = StateInner {
            aggregator: Aggregator::new(Arc::new(storage)),
            ingest: Ingest::new(signer.clone(), decryptor),
            signer,
            config,
        };

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Returns an atomically counted reference to the config.
    pub fn config(&self) -> &Arc<Config> {
        &self.inner.config
    }

    /// Returns the aggregation service.
    pub fn aggregator(&self) -> &Aggregator {
        &self.inner.aggregator
    }

    /// Returns the metric storage.
    pub fn storage(&self) -> &Storage {
        self.inner.aggregator.storage()
    }

    /// Returns the signer for responses, if a shared secret is configured.
    pub fn signer(&self) -> Option<&Signer> {
        self.inner.signer.as_deref()
    }

    /// Returns the ingestion pipeline.
    pub fn ingest(&self) -> &Ingest {
        &self.inner.ingest
    }

    /// Flushes and closes the storage.
    pub async fn close(&self) {
        if let Err(error) = self.storage().close().await {
            meter_log::error!(
                error = &error as &dyn Error,
                "failed to close the metric storage",
            );
        }
    }
}
