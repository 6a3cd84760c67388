use serde_json::Value;

use crate::error::{Result, TrackerError};
use crate::tracker::job::{JobStatus, UNKNOWN};

/// Pulls the container-instance locator out of one known event shape.
pub trait LocatorExtractor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns `None` when this shape does not apply to `detail`.
    fn extract(&self, detail: &Value) -> Option<String>;
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// `detail.containerInstanceArn`
#[derive(Debug, Default)]
pub struct TopLevelLocator;

impl LocatorExtractor for TopLevelLocator {
    fn name(&self) -> &'static str {
        "detail"
    }

    fn extract(&self, detail: &Value) -> Option<String> {
        non_empty_str(detail.get("containerInstanceArn"))
    }
}

/// `detail.ecsProperties.taskProperties[0].containerInstanceArn`
#[derive(Debug, Default)]
pub struct EcsTaskPropertiesLocator;

impl LocatorExtractor for EcsTaskPropertiesLocator {
    fn name(&self) -> &'static str {
        "ecsProperties.taskProperties"
    }

    fn extract(&self, detail: &Value) -> Option<String> {
        let first_task = detail
            .get("ecsProperties")?
            .get("taskProperties")?
            .as_array()?
            .first()?;
        non_empty_str(first_task.get("containerInstanceArn"))
    }
}

/// `detail.container.containerInstanceArn`
#[derive(Debug, Default)]
pub struct ContainerLocator;

impl LocatorExtractor for ContainerLocator {
    fn name(&self) -> &'static str {
        "container"
    }

    fn extract(&self, detail: &Value) -> Option<String> {
        non_empty_str(detail.get("container")?.get("containerInstanceArn"))
    }
}

/// Extractors in the order they are tried.
pub fn default_extractors() -> Vec<Box<dyn LocatorExtractor>> {
    vec![
        Box::new(TopLevelLocator),
        Box::new(EcsTaskPropertiesLocator),
        Box::new(ContainerLocator),
    ]
}

/// First extractor that matches wins; otherwise the unknown sentinel.
pub fn extract_locator(detail: &Value, extractors: &[Box<dyn LocatorExtractor>]) -> String {
    for extractor in extractors {
        if let Some(locator) = extractor.extract(detail) {
            tracing::trace!(shape = extractor.name(), locator = %locator, "Extracted instance locator");
            return locator;
        }
    }
    UNKNOWN.to_string()
}

/// Queue name is the last path segment of the queue ARN (or the plain id).
pub fn queue_name_from(queue: &str) -> String {
    let queue = queue.trim();
    match queue.rsplit('/').next() {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => UNKNOWN.to_string(),
    }
}

/// One job state-change notification from the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct JobEvent {
    pub job_id: String,
    pub queue_name: String,
    pub status: JobStatus,
    /// Container-instance locator, or the unknown sentinel.
    pub instance_locator: String,
}

impl JobEvent {
    pub fn new(
        job_id: impl Into<String>,
        queue_name: impl Into<String>,
        status: JobStatus,
        instance_locator: impl Into<String>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            queue_name: queue_name.into(),
            status,
            instance_locator: instance_locator.into(),
        }
    }

    /// Parse an event envelope (`{"detail": {...}}`) or a bare detail object.
    pub fn from_value(value: &Value) -> Result<Self> {
        Self::from_value_with(value, &default_extractors())
    }

    pub fn from_value_with(value: &Value, extractors: &[Box<dyn LocatorExtractor>]) -> Result<Self> {
        let detail = value.get("detail").unwrap_or(value);
        if !detail.is_object() {
            return Err(TrackerError::MalformedEvent(
                "event detail is not an object".to_string(),
            ));
        }

        let job_id = non_empty_str(detail.get("jobId"))
            .ok_or_else(|| TrackerError::MalformedEvent("missing jobId".to_string()))?;
        let status = detail
            .get("status")
            .and_then(Value::as_str)
            .ok_or_else(|| TrackerError::MalformedEvent(format!("job {} has no status", job_id)))?
            .parse::<JobStatus>()?;
        let queue_name = non_empty_str(detail.get("jobQueue"))
            .map(|q| queue_name_from(&q))
            .unwrap_or_else(|| UNKNOWN.to_string());

        Ok(Self {
            job_id,
            queue_name,
            status,
            instance_locator: extract_locator(detail, extractors),
        })
    }

    pub fn has_locator(&self) -> bool {
        self.instance_locator != UNKNOWN
    }
}
