use std::error::Error;
use std::sync::Arc;

use meter_auth::{Encryptor, KeyError, Signer, SignerError};
use meter_config::{Config, TransportKind};
use meter_metrics::Record;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::exporter::{ExportError, Exporter, ExporterOptions};
use crate::sampler::SystemSampler;
use crate::transport::{GrpcTransport, HttpTransport, Transport};

/// Error raised while starting the agent.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// The shared secret is unusable.
    #[error("invalid signing key")]
    Signer(#[from] SignerError),

    /// The public key could not be loaded.
    #[error("could not load the public key")]
    Key(#[from] KeyError),

    /// The HTTP client could not be created.
    #[error("could not create the HTTP client")]
    Client(#[from] reqwest::Error),

    /// The gRPC endpoint is invalid.
    #[error("invalid gRPC endpoint")]
    Channel(#[from] tonic::transport::Error),
}

/// Creates the transport selected by the configuration.
pub fn make_transport(config: &Config) -> Result<Arc<dyn Transport>, AgentError> {
    let signer = config.signing_key().map(Signer::new).transpose()?;
    let encryptor = match config.crypto_key_path() {
        Some(path) => {
            meter_log::info!("loading public key from {}", path.display());
            Some(Encryptor::from_pem_file(path)?)
        }
        None => None,
    };

    let address = config.collector_address();
    let timeout = config.http_timeout();

    Ok(match config.transport() {
        TransportKind::Http => Arc::new(HttpTransport::new(address, timeout, signer, encryptor)?),
        TransportKind::Grpc => Arc::new(GrpcTransport::new(address, timeout, signer, encryptor)?),
    })
}

/// Periodically samples the system and reports to the collector.
#[derive(Debug)]
pub struct Agent {
    config: Arc<Config>,
    sampler: SystemSampler,
    exporter: Exporter,
    latest: Vec<Record>,
    polls: i64,
}

impl Agent {
    /// Creates an agent delivering through `transport`.
    ///
    /// Must be called within a tokio runtime, since this starts the delivery workers.
    pub fn new(
        config: Arc<Config>,
        transport: Arc<dyn Transport>,
        shutdown: CancellationToken,
    ) -> Self {
        let options = ExporterOptions {
            workers: config.rate_limit(),
            batch: config.batch(),
            ..Default::default()
        };

        Self {
            exporter: Exporter::start(transport, options, shutdown),
            sampler: SystemSampler::new(),
            config,
            latest: Vec::new(),
            polls: 0,
        }
    }

    /// Takes a new sample.
    pub fn poll(&mut self) {
        self.latest = self.sampler.sample();
        self.polls += 1;
    }

    /// Adds the latest sample and the poll count to the exporter and sends the batch.
    pub async fn report(&mut self) -> Result<(), ExportError> {
        for record in &self.latest {
            self.exporter.add_record(record)?;
        }

        if self.polls > 0 {
            let polls = std::mem::take(&mut self.polls);
            self.exporter.add_record(&Record::counter("PollCount", polls)?)?;
        }

        self.exporter.send().await
    }

    /// Polls and reports on the configured intervals until `shutdown` is canceled.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut poll = tokio::time::interval(self.config.poll_interval());
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut report = tokio::time::interval(self.config.report_interval());
        report.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately, there is nothing to report yet.
        report.tick().await;

        meter_log::info!(
            poll_interval = ?self.config.poll_interval(),
            report_interval = ?self.config.report_interval(),
            "agent started"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = poll.tick() => self.poll(),
                _ = report.tick() => match self.report().await {
                    Ok(()) => {}
                    Err(ExportError::EmptyBatch) => meter_log::debug!("nothing to report"),
                    Err(error) => meter_log::error!(
                        error = &error as &dyn Error,
                        "failed to report metrics",
                    ),
                },
            }
        }

        meter_log::info!("shutting down agent");
        self.exporter.shutdown().await;
    }
}

/// Runs the agent with the configured transport until `shutdown` is canceled.
pub async fn run(config: Arc<Config>, shutdown: CancellationToken) -> Result<(), AgentError> {
    let transport = make_transport(&config)?;
    meter_log::info!(
        "reporting to {} via {}",
        config.collector_address(),
        config.transport()
    );

    Agent::new(config, transport, shutdown.clone())
        .run(shutdown)
        .await;

    Ok(())
}
