use std::collections::HashMap;
use std::sync::Arc;

use meter_metrics::{MetricType, Record, RecordId};
use meter_storage::{Storage, StorageError};
use tokio::sync::Mutex;

/// Folds incoming records into the stored state.
///
/// Counters are summed with the stored delta while gauges replace the stored value. All
/// read-modify-write sequences are serialized by a single lock, so concurrent pushes to the same
/// counter never lose an increment.
#[derive(Debug)]
pub struct Aggregator {
    storage: Arc<Storage>,
    merge_lock: Mutex<()>,
}

impl Aggregator {
    /// Creates an aggregator on top of the given storage.
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            merge_lock: Mutex::new(()),
        }
    }

    /// Returns the underlying storage.
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Merges a record into the stored state and returns the result.
    pub async fn push(&self, record: Record) -> Result<Record, StorageError> {
        let _guard = self.merge_lock.lock().await;

        let merged = self.merge_stored(record).await?;
        self.storage.push(&merged).await?;

        meter_log::trace!(id = %merged.id(), value = %merged.value(), "metric updated");
        Ok(merged)
    }

    /// Merges a batch of records and persists the results in one storage batch.
    ///
    /// Records sharing an id are combined first: counters are summed and the last gauge wins.
    /// The returned records follow the order in which each id was first seen.
    pub async fn push_list(&self, records: Vec<Record>) -> Result<Vec<Record>, StorageError> {
        let batch = premerge(records);
        if batch.is_empty() {
            return Ok(batch);
        }

        let _guard = self.merge_lock.lock().await;

        let mut merged = Vec::with_capacity(batch.len());
        for record in batch {
            merged.push(self.merge_stored(record).await?);
        }
        self.storage.push_list(&merged).await?;

        meter_log::trace!(records = merged.len(), "metric batch updated");
        Ok(merged)
    }

    /// Returns the stored record of the given type and name.
    pub async fn get(&self, kind: MetricType, name: &str) -> Result<Record, StorageError> {
        self.storage.get(&RecordId::new(name, kind.as_str())).await
    }

    /// Returns all stored records ordered by name and type.
    pub async fn list(&self) -> Result<Vec<Record>, StorageError> {
        self.storage.list().await
    }

    async fn merge_stored(&self, record: Record) -> Result<Record, StorageError> {
        if record.ty() != MetricType::Counter {
            return Ok(record);
        }

        match self.storage.get(&record.id()).await {
            Ok(stored) => {
                let mut value = stored.value();
                value.merge(record.value());
                Ok(record.with_value(value))
            }
            Err(error) if error.is_not_found() => Ok(record),
            Err(error) => Err(error),
        }
    }
}

/// Combines records with the same id, keeping the position of the first occurrence.
fn premerge(records: Vec<Record>) -> Vec<Record> {
    let mut positions = HashMap::<RecordId, usize>::with_capacity(records.len());
    let mut merged: Vec<Record> = Vec::with_capacity(records.len());

    for record in records {
        match positions.get(&record.id()) {
            Some(&index) => {
                let mut value = merged[index].value();
                value.merge(record.value());
                merged[index] = record.with_value(value);
            }
            None => {
                positions.insert(record.id(), merged.len());
                merged.push(record);
            }
        }
    }

    merged
}

#[cfg(test)]
mod tests {
    use meter_metrics::MetricValue;
    use similar_asserts::assert_eq;

    use super::*;

    fn aggregator() -> Aggregator {
        Aggregator::new(Arc::new(Storage::memory()))
    }

    #[tokio::test]
    async fn test_counter_sums() {
        let aggregator = aggregator();
        aggregator
            .push(Record::counter("PollCount", 10).unwrap())
            .await
            .unwrap();
        let record = aggregator
            .push(Record::counter("PollCount", 10).unwrap())
            .await
            .unwrap();

        assert_eq!(record.value(), MetricValue::Counter(20));
    }

    #[tokio::test]
    async fn test_gauge_replaces() {
        let aggregator = aggregator();
        aggregator
            .push(Record::gauge("Alloc", 11.23).unwrap())
            .await
            .unwrap();
        aggregator
            .push(Record::gauge("Alloc", 22.0).unwrap())
            .await
            .unwrap();

        let record = aggregator.get(MetricType::Gauge, "Alloc").await.unwrap();
        assert_eq!(record.value(), MetricValue::Gauge(22.0));
    }

    #[tokio::test]
    async fn test_push_list_equals_sequential_pushes() {
        let batched = aggregator();
        let sequential = aggregator();
        let records = vec![
            Record::counter("PollCount", 3).unwrap(),
            Record::counter("PollCount", 4).unwrap(),
        ];

        batched.push_list(records.clone()).await.unwrap();
        for record in records {
            sequential.push(record).await.unwrap();
        }

        assert_eq!(batched.list().await.unwrap(), sequential.list().await.unwrap());
    }

    #[tokio::test]
    async fn test_push_list_order_and_merge() {
        let aggregator = aggregator();
        aggregator
            .push(Record::counter("PollCount", 1).unwrap())
            .await
            .unwrap();

        let merged = aggregator
            .push_list(vec![
                Record::gauge("Alloc", 1.0).unwrap(),
                Record::counter("PollCount", 2).unwrap(),
                Record::gauge("Alloc", 2.0).unwrap(),
                Record::counter("PollCount", 3).unwrap(),
            ])
            .await
            .unwrap();

        assert_eq!(
            merged,
            vec![
                Record::gauge("Alloc", 2.0).unwrap(),
                Record::counter("PollCount", 6).unwrap(),
            ]
        );
    }

    #[tokio::test]
    async fn test_push_list_empty() {
        let aggregator = aggregator();
        assert!(aggregator.push_list(Vec::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_counter_saturates() {
        let aggregator = aggregator();
        aggregator
            .push(Record::counter("Big", i64::MAX).unwrap())
            .await
            .unwrap();
        let record = aggregator
            .push(Record::counter("Big", 1).unwrap())
            .await
            .unwrap();

        assert_eq!(record.value(), MetricValue::Counter(i64::MAX));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_counters() {
        let aggregator = Arc::new(aggregator());

        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let aggregator = aggregator.clone();
                tokio::spawn(async move {
                    aggregator
                        .push(Record::counter("PollCount", 1).unwrap())
                        .await
                        .unwrap();
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }

        let record = aggregator
            .get(MetricType::Counter, "PollCount")
            .await
            .unwrap();
        assert_eq!(record.value(), MetricValue::Counter(50));
    }

    #[tokio::test]
    async fn test_missing() {
        let error = aggregator()
            .get(MetricType::Counter, "PollCount")
            .await
            .unwrap_err();
        assert!(error.is_not_found());
    }
}
