use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{Result, TrackerError};
use crate::store::JobStore;
use crate::tracker::JobRecord;

/// One pretty-printed JSON file per job under a directory.
///
/// Writes go to a temporary file that is renamed over the record, so readers
/// never see a partial record. Conditional writes are serialized through a
/// process-wide lock; the directory must not be shared between processes.
#[derive(Debug)]
pub struct FileJobStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileJobStore {
    /// Open (and create if needed) a store rooted at `dir`.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            TrackerError::Persistence(format!("cannot create {}: {}", dir.display(), e))
        })?;
        tracing::info!(dir = %dir.display(), "Opened file job store");
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    fn path_for(&self, job_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(job_id)))
    }

    async fn read_record(path: &Path) -> Result<Option<JobRecord>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(TrackerError::Persistence(format!(
                "cannot read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn write_record(&self, record: &JobRecord) -> Result<()> {
        let path = self.path_for(&record.job_id);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(record)?;
        tokio::fs::write(&tmp, bytes).await.map_err(|e| {
            TrackerError::Persistence(format!("cannot write {}: {}", tmp.display(), e))
        })?;
        tokio::fs::rename(&tmp, &path).await.map_err(|e| {
            TrackerError::Persistence(format!("cannot replace {}: {}", path.display(), e))
        })?;
        Ok(())
    }
}

/// Job ids become file names; anything outside `[A-Za-z0-9_-]` is hex-escaped.
fn file_stem(job_id: &str) -> String {
    let mut stem = String::with_capacity(job_id.len());
    for byte in job_id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            stem.push(byte as char);
        } else {
            stem.push_str(&format!("%{:02X}", byte));
        }
    }
    stem
}

#[async_trait]
impl JobStore for FileJobStore {
    async fn get(&self, job_id: &str) -> Result<Option<JobRecord>> {
        Self::read_record(&self.path_for(job_id)).await
    }

    async fn put(&self, mut record: JobRecord) -> Result<JobRecord> {
        let _guard = self.write_lock.lock().await;
        let current = Self::read_record(&self.path_for(&record.job_id))
            .await?
            .map_or(0, |r| r.version);
        record.version = current + 1;
        self.write_record(&record).await?;
        Ok(record)
    }

    async fn put_if_version(&self, mut record: JobRecord, expected: u64) -> Result<JobRecord> {
        let _guard = self.write_lock.lock().await;
        let found = Self::read_record(&self.path_for(&record.job_id))
            .await?
            .map_or(0, |r| r.version);
        if found != expected {
            return Err(TrackerError::VersionConflict {
                job_id: record.job_id,
                expected,
                found,
            });
        }
        record.version = expected + 1;
        self.write_record(&record).await?;
        Ok(record)
    }

    async fn scan(&self) -> Result<Vec<JobRecord>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(|e| {
            TrackerError::Persistence(format!("cannot list {}: {}", self.dir.display(), e))
        })?;

        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read_record(&path).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable job record");
                }
            }
        }
        records.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        Ok(records)
    }
}
