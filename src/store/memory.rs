use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{Result, TrackerError};
use crate::store::JobStore;
use crate::tracker::JobRecord;

/// Process-local store. Records are lost on restart.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    records: RwLock<HashMap<String, JobRecord>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with existing records, keeping their versions.
    pub fn with_records(records: impl IntoIterator<Item = JobRecord>) -> Self {
        Self {
            records: RwLock::new(
                records
                    .into_iter()
                    .map(|r| (r.job_id.clone(), r))
                    .collect(),
            ),
        }
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn get(&self, job_id: &str) -> Result<Option<JobRecord>> {
        Ok(self.records.read().await.get(job_id).cloned())
    }

    async fn put(&self, mut record: JobRecord) -> Result<JobRecord> {
        let mut records = self.records.write().await;
        let current = records.get(&record.job_id).map_or(0, |r| r.version);
        record.version = current + 1;
        records.insert(record.job_id.clone(), record.clone());
        Ok(record)
    }

    async fn put_if_version(&self, mut record: JobRecord, expected: u64) -> Result<JobRecord> {
        let mut records = self.records.write().await;
        let found = records.get(&record.job_id).map_or(0, |r| r.version);
        if found != expected {
            return Err(TrackerError::VersionConflict {
                job_id: record.job_id,
                expected,
                found,
            });
        }
        record.version = expected + 1;
        records.insert(record.job_id.clone(), record.clone());
        Ok(record)
    }

    async fn scan(&self) -> Result<Vec<JobRecord>> {
        let records = self.records.read().await;
        let mut all: Vec<JobRecord> = records.values().cloned().collect();
        all.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_bumps_version() {
        let store = InMemoryJobStore::new();
        let written = store.put(JobRecord::new("job-1", "q")).await.unwrap();
        assert_eq!(written.version, 1);
        let written = store.put(written).await.unwrap();
        assert_eq!(written.version, 2);
        assert_eq!(store.get("job-1").await.unwrap().unwrap().version, 2);
    }

    #[tokio::test]
    async fn conditional_write_rejects_stale_version() {
        let store = InMemoryJobStore::new();
        let first = store
            .put_if_version(JobRecord::new("job-1", "q"), 0)
            .await
            .unwrap();
        assert_eq!(first.version, 1);

        let err = store
            .put_if_version(JobRecord::new("job-1", "q"), 0)
            .await
            .unwrap_err();
        match err {
            TrackerError::VersionConflict {
                job_id,
                expected,
                found,
            } => {
                assert_eq!(job_id, "job-1");
                assert_eq!(expected, 0);
                assert_eq!(found, 1);
            }
            other => panic!("unexpected error: {other}"),
        }

        let second = store.put_if_version(first, 1).await.unwrap();
        assert_eq!(second.version, 2);
    }

    #[tokio::test]
    async fn scan_is_ordered_by_job_id() {
        let store = InMemoryJobStore::with_records(vec![
            JobRecord::new("b", "q"),
            JobRecord::new("a", "q"),
        ]);
        let ids: Vec<String> = store
            .scan()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.job_id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(store.len().await, 2);
    }
}
