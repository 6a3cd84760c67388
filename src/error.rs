use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Version conflict for job {job_id}: expected {expected}, found {found}")]
    VersionConflict {
        job_id: String,
        expected: u64,
        found: u64,
    },

    #[error("Gave up on job {job_id} after {attempts} conflicting writes")]
    ConflictRetriesExhausted { job_id: String, attempts: u32 },

    #[error("Resolution error: {0}")]
    Resolution(String),

    #[error("Pricing error: {0}")]
    Pricing(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TrackerError>;
