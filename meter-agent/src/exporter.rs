use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use meter_common::{DEFAULT_RETRY_DELAYS, RetrySchedule};
use meter_metrics::{MetricExchange, Record, ValidationError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::transport::{DeliveryError, Envelope, Transport};

/// Capacity of the queue between [`Exporter::send`] and the delivery workers.
pub const QUEUE_CAPACITY: usize = 30;

/// Error returned by the [`Exporter`].
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// `send` was called without any buffered metric.
    #[error("no metrics to send")]
    EmptyBatch,

    /// A metric added since the last send was invalid. The batch was discarded.
    #[error("invalid metric in batch")]
    Invalid(#[from] ValidationError),

    /// The delivery workers have stopped.
    #[error("exporter is shut down")]
    Closed,
}

/// Tuning of the [`Exporter`].
#[derive(Clone, Debug)]
pub struct ExporterOptions {
    /// Number of concurrent delivery workers.
    pub workers: usize,
    /// Whether the buffer is delivered as one batch or one metric at a time.
    pub batch: bool,
    /// Waits between delivery attempts.
    pub retry_delays: Vec<Duration>,
}

impl Default for ExporterOptions {
    fn default() -> Self {
        Self {
            workers: 1,
            batch: true,
            retry_delays: DEFAULT_RETRY_DELAYS.to_vec(),
        }
    }
}

/// Buffers metrics and hands them to a pool of delivery workers.
///
/// Metrics are collected with [`add`](Self::add) and enqueued with [`send`](Self::send). An
/// invalid metric poisons the current batch: later adds are ignored and the next send discards
/// the buffer and reports the error. Delivery happens in the background, failures are logged and
/// retried according to the configured delays, after which the envelope is dropped.
#[derive(Debug)]
pub struct Exporter {
    buffer: Vec<MetricExchange>,
    error: Option<ValidationError>,
    batch: bool,
    jobs: Option<flume::Sender<Envelope>>,
    workers: Vec<JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl Exporter {
    /// Starts the delivery workers.
    ///
    /// Must be called within a tokio runtime.
    pub fn start(
        transport: Arc<dyn Transport>,
        options: ExporterOptions,
        shutdown: CancellationToken,
    ) -> Self {
        let (tx, rx) = flume::bounded(QUEUE_CAPACITY);
        let schedule = RetrySchedule::new(options.retry_delays);

        let workers = (0..options.workers.max(1))
            .map(|id| {
                tokio::spawn(worker(
                    id,
                    transport.clone(),
                    rx.clone(),
                    schedule.clone(),
                    shutdown.clone(),
                ))
            })
            .collect();

        Self {
            buffer: Vec::new(),
            error: None,
            batch: options.batch,
            jobs: Some(tx),
            workers,
            shutdown,
        }
    }

    /// Adds a metric from its raw name, type and value.
    pub fn add(&mut self, name: &str, kind: &str, value: &str) -> Result<(), ExportError> {
        if let Some(ref error) = self.error {
            return Err(error.clone().into());
        }

        match MetricExchange::parse(name, kind, value) {
            Ok(metric) => {
                self.buffer.push(metric);
                Ok(())
            }
            Err(error) => {
                self.error = Some(error.clone());
                Err(error.into())
            }
        }
    }

    /// Adds a validated record.
    pub fn add_record(&mut self, record: &Record) -> Result<(), ExportError> {
        if let Some(ref error) = self.error {
            return Err(error.clone().into());
        }

        self.buffer.push(MetricExchange::from(record));
        Ok(())
    }

    /// Returns the number of buffered metrics.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Enqueues the buffered metrics for delivery and resets the batch.
    ///
    /// Returns once all envelopes are enqueued, waiting while the queue is full.
    pub async fn send(&mut self) -> Result<(), ExportError> {
        let metrics = std::mem::take(&mut self.buffer);
        if let Some(error) = self.error.take() {
            meter_log::debug!(dropped = metrics.len(), "discarding poisoned batch");
            return Err(error.into());
        }

        if metrics.is_empty() {
            return Err(ExportError::EmptyBatch);
        }

        let jobs = self.jobs.as_ref().ok_or(ExportError::Closed)?;
        if self.batch {
            enqueue(jobs, Envelope::Batch(metrics)).await
        } else {
            for metric in metrics {
                enqueue(jobs, Envelope::Metric(metric)).await?;
            }
            Ok(())
        }
    }

    /// Stops the workers. Pending retries are canceled and queued envelopes are dropped.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        self.jobs = None;

        for worker in self.workers.drain(..) {
            worker.await.ok();
        }
    }
}

async fn enqueue(jobs: &flume::Sender<Envelope>, envelope: Envelope) -> Result<(), ExportError> {
    jobs.send_async(envelope)
        .await
        .map_err(|_| ExportError::Closed)
}

async fn worker(
    id: usize,
    transport: Arc<dyn Transport>,
    jobs: flume::Receiver<Envelope>,
    schedule: RetrySchedule,
    shutdown: CancellationToken,
) {
    meter_log::debug!(worker = id, "delivery worker started");

    loop {
        let envelope = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            job = jobs.recv_async() => match job {
                Ok(envelope) => envelope,
                Err(_) => break,
            },
        };

        let result = deliver(transport.as_ref(), &envelope, schedule.clone(), &shutdown).await;
        if let Err(error) = result {
            meter_log::error!(
                error = &error as &dyn Error,
                worker = id,
                metrics = envelope.len(),
                "dropping envelope",
            );
        }
    }

    meter_log::debug!(worker = id, "delivery worker stopped");
}

/// Delivers an envelope, retrying retriable failures according to `schedule`.
///
/// Waits between attempts end early when `shutdown` is canceled. A delay requested by the
/// collector extends the scheduled wait.
pub async fn deliver(
    transport: &dyn Transport,
    envelope: &Envelope,
    mut schedule: RetrySchedule,
    shutdown: &CancellationToken,
) -> Result<(), DeliveryError> {
    schedule.reset();

    loop {
        let error = match transport.deliver(envelope).await {
            Ok(()) => return Ok(()),
            Err(error) => error,
        };

        if !error.is_retriable() {
            return Err(error);
        }

        let Some(delay) = schedule.next_backoff() else {
            return Err(error);
        };

        meter_log::warn!(
            error = &error as &dyn Error,
            attempt = schedule.attempt(),
            "delivery failed, retrying in {delay:?}",
        );

        tokio::select! {
            _ = shutdown.cancelled() => return Err(DeliveryError::Canceled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use meter_metrics::MetricType;
    use parking_lot::Mutex;
    use similar_asserts::assert_eq;

    use super::*;
    use crate::transport::TransportError;

    /// Fails with a retriable error for the first `failures` calls.
    #[derive(Default)]
    struct Flaky {
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Transport for Flaky {
        async fn deliver(&self, _envelope: &Envelope) -> Result<(), DeliveryError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(DeliveryError::retriable(TransportError::Rpc(
                    tonic::Status::unavailable("collector down"),
                )))
            } else {
                Ok(())
            }
        }
    }

    /// Records every delivered envelope.
    #[derive(Default)]
    struct Recorder {
        envelopes: Mutex<Vec<Envelope>>,
    }

    #[async_trait]
    impl Transport for Recorder {
        async fn deliver(&self, envelope: &Envelope) -> Result<(), DeliveryError> {
            self.envelopes.lock().push(envelope.clone());
            Ok(())
        }
    }

    fn envelope() -> Envelope {
        Envelope::Metric(MetricExchange::query("PollCount", MetricType::Counter))
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_until_success() {
        let transport = Flaky {
            failures: 2,
            ..Default::default()
        };

        deliver(
            &transport,
            &envelope(),
            RetrySchedule::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhausted() {
        let transport = Flaky {
            failures: usize::MAX,
            ..Default::default()
        };
        let schedule = RetrySchedule::default();
        let max_attempts = schedule.max_attempts();

        let started = tokio::time::Instant::now();
        let error = deliver(&transport, &envelope(), schedule, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(error.is_retriable());
        assert_eq!(transport.calls.load(Ordering::SeqCst), max_attempts);
        assert_eq!(max_attempts, DEFAULT_RETRY_DELAYS.len() + 1);
        assert!(started.elapsed() >= Duration::from_secs(9));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_canceled() {
        let transport = Flaky {
            failures: usize::MAX,
            ..Default::default()
        };
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let error = deliver(&transport, &envelope(), RetrySchedule::default(), &shutdown)
            .await
            .unwrap_err();

        assert!(matches!(error, DeliveryError::Canceled));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fatal_not_retried() {
        struct Rejecting(AtomicUsize);

        #[async_trait]
        impl Transport for Rejecting {
            async fn deliver(&self, _envelope: &Envelope) -> Result<(), DeliveryError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Err(DeliveryError::fatal(TransportError::Status(
                    reqwest::StatusCode::BAD_REQUEST,
                )))
            }
        }

        let transport = Rejecting(AtomicUsize::new(0));
        let error = deliver(
            &transport,
            &envelope(),
            RetrySchedule::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(!error.is_retriable());
        assert_eq!(transport.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let mut exporter = Exporter::start(
            Arc::new(Recorder::default()),
            ExporterOptions::default(),
            CancellationToken::new(),
        );

        assert!(matches!(
            exporter.send().await,
            Err(ExportError::EmptyBatch)
        ));
        exporter.shutdown().await;
    }

    #[tokio::test]
    async fn test_sticky_error() {
        let recorder = Arc::new(Recorder::default());
        let mut exporter = Exporter::start(
            recorder.clone(),
            ExporterOptions::default(),
            CancellationToken::new(),
        );

        exporter.add("Alloc", "gauge", "1.5").unwrap();
        assert!(exporter.add("Alloc", "histogram", "1").is_err());
        assert!(matches!(
            exporter.add("PollCount", "counter", "1"),
            Err(ExportError::Invalid(ValidationError::InvalidKind(_)))
        ));
        assert_eq!(exporter.buffered(), 1);

        assert!(matches!(
            exporter.send().await,
            Err(ExportError::Invalid(_))
        ));
        assert_eq!(exporter.buffered(), 0);

        // The error is cleared with the batch.
        exporter.add("PollCount", "counter", "1").unwrap();
        exporter.send().await.unwrap();
        exporter.shutdown().await;
    }

    #[tokio::test]
    async fn test_batch_and_single_envelopes() {
        for (batch, expected) in [(true, 1), (false, 2)] {
            let recorder = Arc::new(Recorder::default());
            let options = ExporterOptions {
                batch,
                ..Default::default()
            };
            let mut exporter =
                Exporter::start(recorder.clone(), options, CancellationToken::new());

            exporter
                .add_record(&Record::gauge("Alloc", 2.0).unwrap())
                .unwrap();
            exporter
                .add_record(&Record::counter("PollCount", 3).unwrap())
                .unwrap();
            exporter.send().await.unwrap();

            for _ in 0..100 {
                if recorder.envelopes.lock().len() == expected {
                    break;
                }
                tokio::task::yield_now().await;
            }

            let envelopes = recorder.envelopes.lock().clone();
            assert_eq!(envelopes.len(), expected);
            assert_eq!(
                envelopes.iter().map(Envelope::len).sum::<usize>(),
                2,
                "batch mode {batch}"
            );

            exporter.shutdown().await;
        }
    }
}
