use std::collections::BTreeMap;

use meter_metrics::{Record, RecordId};
use parking_lot::RwLock;

use crate::{StorageError, checked_id};

/// Keeps all records in a map guarded by a read-write lock.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    records: RwLock<BTreeMap<RecordId, Record>>,
}

impl MemoryStorage {
    /// Creates an empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a storage holding the given records.
    pub fn with_records(records: BTreeMap<RecordId, Record>) -> Self {
        Self {
            records: RwLock::new(records),
        }
    }

    /// Stores a record.
    pub fn push(&self, record: &Record) -> Result<(), StorageError> {
        let id = checked_id(record)?;
        self.records.write().insert(id, record.clone());
        Ok(())
    }

    /// Stores all records under a single lock acquisition.
    ///
    /// Either all records are stored or, if one of them has no identity, none.
    pub fn push_list(&self, records: &[Record]) -> Result<(), StorageError> {
        let keyed = records
            .iter()
            .map(|record| Ok((checked_id(record)?, record.clone())))
            .collect::<Result<Vec<_>, StorageError>>()?;

        self.records.write().extend(keyed);
        Ok(())
    }

    /// Returns the record stored under `id`.
    pub fn get(&self, id: &RecordId) -> Result<Record, StorageError> {
        self.records
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(id.clone()))
    }

    /// Returns all records ordered by name and type.
    pub fn list(&self) -> Vec<Record> {
        let mut records: Vec<_> = self.records.read().values().cloned().collect();
        records.sort_by(|a, b| (a.name(), a.ty()).cmp(&(b.name(), b.ty())));
        records
    }

    /// Returns a copy of the full map.
    pub fn snapshot(&self) -> BTreeMap<RecordId, Record> {
        self.records.read().clone()
    }

    /// Returns the number of stored records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use meter_metrics::MetricValue;
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn test_push_replaces() {
        let storage = MemoryStorage::new();
        storage.push(&Record::gauge("Alloc", 11.23).unwrap()).unwrap();
        storage.push(&Record::gauge("Alloc", 22.0).unwrap()).unwrap();

        assert_eq!(storage.len(), 1);
        let record = storage.get(&RecordId::new("Alloc", "gauge")).unwrap();
        assert_eq!(record.value(), MetricValue::Gauge(22.0));
    }

    #[test]
    fn test_same_name_different_type() {
        let storage = MemoryStorage::new();
        storage
            .push_list(&[
                Record::gauge("Load", 1.5).unwrap(),
                Record::counter("Load", 3).unwrap(),
            ])
            .unwrap();

        assert_eq!(storage.len(), 2);
        assert_eq!(
            storage.get(&RecordId::new("Load", "counter")).unwrap().value(),
            MetricValue::Counter(3)
        );
    }

    #[test]
    fn test_not_found() {
        let storage = MemoryStorage::new();
        let error = storage.get(&RecordId::new("PollCount", "counter")).unwrap_err();
        assert!(error.is_not_found());
        assert_eq!(error.to_string(), "metric PollCount_counter not found");
    }

    #[test]
    fn test_list_sorted() {
        let storage = MemoryStorage::new();
        for record in [
            Record::gauge("RandomValue", 0.5).unwrap(),
            Record::counter("PollCount", 1).unwrap(),
            Record::gauge("Alloc", 1.0).unwrap(),
            Record::counter("Alloc", 1).unwrap(),
        ] {
            storage.push(&record).unwrap();
        }

        let listed: Vec<_> = storage
            .list()
            .iter()
            .map(|r| r.id().to_string())
            .collect();
        assert_eq!(
            listed,
            ["Alloc_counter", "Alloc_gauge", "PollCount_counter", "RandomValue_gauge"]
        );
    }
}
