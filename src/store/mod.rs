//! Durable job-record persistence.
//!
//! Records are keyed by job id and always written whole. Each stored record
//! carries a `version` that the store bumps on every write; the reconciler uses
//! [`JobStore::put_if_version`] so two deliveries for the same job cannot
//! silently overwrite each other.

pub mod file;
pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::tracker::JobRecord;

pub use file::FileJobStore;
pub use memory::InMemoryJobStore;

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Fetch a record by job id.
    async fn get(&self, job_id: &str) -> Result<Option<JobRecord>>;

    /// Overwrite a record unconditionally. The stored version is bumped.
    async fn put(&self, record: JobRecord) -> Result<JobRecord>;

    /// Overwrite a record only if the stored version equals `expected`
    /// (0 meaning "not stored yet"). Returns the record as written, with its
    /// new version, or `TrackerError::VersionConflict`.
    async fn put_if_version(&self, record: JobRecord, expected: u64) -> Result<JobRecord>;

    /// Every stored record.
    async fn scan(&self) -> Result<Vec<JobRecord>>;
}
