use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::TrackerError;
use crate::tracker::time_saved::TimeSavedLedger;

/// Sentinel for an instance, queue or instance type that could not be resolved.
pub const UNKNOWN: &str = "unknown";

/// Job states as reported by the orchestrator.
///
/// Only `Running`, `Runnable`, `Succeeded` and `Failed` drive accounting; the
/// pre-run states are recorded as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    #[default]
    Submitted,
    Pending,
    Runnable,
    Starting,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Submitted => write!(f, "SUBMITTED"),
            JobStatus::Pending => write!(f, "PENDING"),
            JobStatus::Runnable => write!(f, "RUNNABLE"),
            JobStatus::Starting => write!(f, "STARTING"),
            JobStatus::Running => write!(f, "RUNNING"),
            JobStatus::Succeeded => write!(f, "SUCCEEDED"),
            JobStatus::Failed => write!(f, "FAILED"),
        }
    }
}

impl FromStr for JobStatus {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SUBMITTED" => Ok(JobStatus::Submitted),
            "PENDING" => Ok(JobStatus::Pending),
            "RUNNABLE" => Ok(JobStatus::Runnable),
            "STARTING" => Ok(JobStatus::Starting),
            "RUNNING" => Ok(JobStatus::Running),
            "SUCCEEDED" => Ok(JobStatus::Succeeded),
            "FAILED" => Ok(JobStatus::Failed),
            other => Err(TrackerError::MalformedEvent(format!(
                "unrecognised job status {:?}",
                other
            ))),
        }
    }
}

/// Durable per-job record, overwritten in place on every reconciled event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct JobRecord {
    #[serde(rename = "JobID")]
    pub job_id: String,
    #[serde(rename = "JobQueue", default = "unknown_string")]
    pub queue_name: String,
    #[serde(default)]
    pub status: JobStatus,
    #[serde(rename = "InstanceID", default = "unknown_string")]
    pub current_instance_id: String,
    /// instance id -> instance type. Entries are only ever added.
    #[serde(default, deserialize_with = "deserialize_instance_map")]
    pub instance_map: BTreeMap<String, String>,
    #[serde(rename = "PreviousInstanceIDs", default)]
    pub previous_instance_ids: Vec<String>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub run_duration_seconds: u64,
    #[serde(default)]
    pub total_time_saved: TimeSavedLedger,
    #[serde(
        default,
        deserialize_with = "deserialize_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(
        default,
        deserialize_with = "deserialize_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub interruption_time: Option<DateTime<Utc>>,
    /// Write counter, bumped by the store on every conditional write.
    #[serde(default)]
    pub version: u64,
}

fn unknown_string() -> String {
    UNKNOWN.to_string()
}

/// RFC 3339, or a naive ISO timestamp (older rows omit the offset) read as UTC.
fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(text) => parse_timestamp(text).map(Some).ok_or_else(|| {
            serde::de::Error::custom(format!("unrecognised timestamp {:?}", text))
        }),
    }
}

/// Older rows stored the instance map as a JSON-encoded string.
fn deserialize_instance_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Encoded {
        Map(BTreeMap<String, String>),
        Text(String),
        Null(()),
    }

    match Encoded::deserialize(deserializer)? {
        Encoded::Map(map) => Ok(map),
        Encoded::Text(text) if text.trim().is_empty() => Ok(BTreeMap::new()),
        Encoded::Text(text) => serde_json::from_str(&text).map_err(serde::de::Error::custom),
        Encoded::Null(()) => Ok(BTreeMap::new()),
    }
}

impl JobRecord {
    /// A fresh record for a job seen for the first time.
    pub fn new(job_id: impl Into<String>, queue_name: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            queue_name: queue_name.into(),
            status: JobStatus::default(),
            current_instance_id: unknown_string(),
            instance_map: BTreeMap::new(),
            previous_instance_ids: Vec::new(),
            attempts: 0,
            run_duration_seconds: 0,
            total_time_saved: TimeSavedLedger::default(),
            start_time: None,
            interruption_time: None,
            version: 0,
        }
    }

    /// True while a run segment is open.
    pub fn is_running_segment_open(&self) -> bool {
        self.start_time.is_some()
    }

    pub fn has_known_instance(&self) -> bool {
        self.current_instance_id != UNKNOWN
    }

    /// All instance ids this job ever ran on, current last.
    pub fn instance_history(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self
            .previous_instance_ids
            .iter()
            .map(String::as_str)
            .collect();
        if self.has_known_instance() {
            ids.push(&self.current_instance_id);
        }
        ids
    }
}
