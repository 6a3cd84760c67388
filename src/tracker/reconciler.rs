use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::{ReconcilerConfig, TrackerConfig};
use crate::error::{Result, TrackerError};
use crate::resolver::InstanceResolver;
use crate::store::JobStore;
use crate::tracker::event::JobEvent;
use crate::tracker::job::{JobRecord, JobStatus, UNKNOWN};

/// Instance the job was observed on, with its type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedInstance {
    pub id: String,
    pub instance_type: String,
}

/// What applying one event did to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Status is (still) running. `segment_opened` is false for a repeated
    /// running event on an open segment.
    Running {
        segment_opened: bool,
        instance_changed: bool,
    },
    /// Running -> Runnable with an open segment.
    Interrupted { run_seconds: u64 },
    /// Running -> Succeeded/Failed with an open segment.
    Finished { run_seconds: u64 },
    /// Status recorded, no accounting (pre-run states, replays).
    StatusOnly,
    /// Non-terminal event for a job that already finished.
    IgnoredAfterTerminal,
}

fn elapsed_seconds(start: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    (now - start).num_seconds().max(0) as u64
}

/// Apply one lifecycle event to a record.
///
/// `instance` is only consulted for running events and is expected to be set
/// only when the resolved instance differs from the record's current one.
pub fn apply_event(
    record: &mut JobRecord,
    status: JobStatus,
    instance: Option<&ResolvedInstance>,
    now: DateTime<Utc>,
) -> Transition {
    if record.status.is_terminal() && !status.is_terminal() {
        return Transition::IgnoredAfterTerminal;
    }

    let transition = match status {
        JobStatus::Running => {
            let segment_opened = record.start_time.is_none();
            if segment_opened {
                record.start_time = Some(now);
            }

            let mut instance_changed = false;
            if let Some(instance) = instance {
                if instance.id != UNKNOWN && instance.id != record.current_instance_id {
                    if record.has_known_instance() {
                        if !segment_opened {
                            // Interruption event never arrived; history grows but
                            // attempts only count observed interruptions.
                            tracing::warn!(
                                job_id = %record.job_id,
                                from = %record.current_instance_id,
                                to = %instance.id,
                                "Job moved instance without a recorded interruption"
                            );
                        }
                        let superseded = std::mem::replace(
                            &mut record.current_instance_id,
                            instance.id.clone(),
                        );
                        record.previous_instance_ids.push(superseded);
                    } else {
                        record.current_instance_id = instance.id.clone();
                    }
                    record
                        .instance_map
                        .insert(instance.id.clone(), instance.instance_type.clone());
                    instance_changed = true;
                }
            }

            Transition::Running {
                segment_opened,
                instance_changed,
            }
        }
        JobStatus::Runnable => match record.start_time.take() {
            Some(start) => {
                let run_seconds = elapsed_seconds(start, now);
                record.run_duration_seconds += run_seconds;
                record.attempts += 1;
                record.total_time_saved.push(run_seconds);
                record.interruption_time = Some(now);
                Transition::Interrupted { run_seconds }
            }
            None => Transition::StatusOnly,
        },
        JobStatus::Succeeded | JobStatus::Failed => match record.start_time.take() {
            Some(start) => {
                let run_seconds = elapsed_seconds(start, now);
                record.run_duration_seconds += run_seconds;
                Transition::Finished { run_seconds }
            }
            None => Transition::StatusOnly,
        },
        JobStatus::Submitted | JobStatus::Pending | JobStatus::Starting => Transition::StatusOnly,
    };

    record.status = status;
    transition
}

/// Maintains job records from a stream of lifecycle events.
///
/// Each call is one read-modify-write cycle against the store, guarded by a
/// conditional write on the record version. A conflicting concurrent write
/// makes the cycle start over from a fresh read.
pub struct Reconciler {
    store: Arc<dyn JobStore>,
    resolver: Arc<dyn InstanceResolver>,
    policy: ReconcilerConfig,
    store_timeout: Duration,
    resolver_timeout: Duration,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn JobStore>,
        resolver: Arc<dyn InstanceResolver>,
        config: &TrackerConfig,
    ) -> Self {
        Self {
            store,
            resolver,
            policy: config.reconciler.clone(),
            store_timeout: config.store_timeout(),
            resolver_timeout: config.resolver_timeout(),
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Reconcile an event at the current wall-clock time.
    pub async fn reconcile(&self, event: &JobEvent) -> Result<JobRecord> {
        self.reconcile_at(event, Utc::now()).await
    }

    /// Reconcile an event as if it were processed at `now`.
    pub async fn reconcile_at(&self, event: &JobEvent, now: DateTime<Utc>) -> Result<JobRecord> {
        let instance_id = if event.status == JobStatus::Running && event.has_locator() {
            self.resolve_instance(&event.job_id, &event.instance_locator)
                .await
        } else {
            None
        };
        let mut instance_type: Option<String> = None;
        let mut backoff_ms = self.policy.backoff_initial_ms;

        for attempt in 0..=self.policy.max_conflict_retries {
            let stored = self.load(&event.job_id).await?;
            let expected = stored.as_ref().map_or(0, |r| r.version);
            let mut record =
                stored.unwrap_or_else(|| JobRecord::new(&event.job_id, &event.queue_name));
            if record.queue_name == UNKNOWN && event.queue_name != UNKNOWN {
                record.queue_name = event.queue_name.clone();
            }

            let resolved = match &instance_id {
                Some(id) if *id != record.current_instance_id => {
                    let ty = match &instance_type {
                        Some(ty) => ty.clone(),
                        None => {
                            let ty = self.resolve_instance_type(&event.job_id, id).await;
                            instance_type = Some(ty.clone());
                            ty
                        }
                    };
                    Some(ResolvedInstance {
                        id: id.clone(),
                        instance_type: ty,
                    })
                }
                _ => None,
            };

            let transition = apply_event(&mut record, event.status, resolved.as_ref(), now);

            match self.persist(record, expected).await {
                Ok(written) => {
                    log_transition(&written, transition);
                    return Ok(written);
                }
                Err(TrackerError::VersionConflict { expected, found, .. }) => {
                    tracing::debug!(
                        job_id = %event.job_id,
                        attempt,
                        expected,
                        found,
                        "Concurrent update detected, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms = (backoff_ms * 2).min(self.policy.backoff_max_ms);
                }
                Err(e) => {
                    tracing::error!(job_id = %event.job_id, error = %e, "Failed to persist job record");
                    return Err(e);
                }
            }
        }

        tracing::error!(
            job_id = %event.job_id,
            attempts = self.policy.max_conflict_retries + 1,
            "Giving up after repeated conflicting writes"
        );
        Err(TrackerError::ConflictRetriesExhausted {
            job_id: event.job_id.clone(),
            attempts: self.policy.max_conflict_retries + 1,
        })
    }

    async fn load(&self, job_id: &str) -> Result<Option<JobRecord>> {
        match tokio::time::timeout(self.store_timeout, self.store.get(job_id)).await {
            Ok(result) => result.map_err(|e| {
                tracing::error!(job_id, error = %e, "Failed to read job record");
                e
            }),
            Err(_) => Err(TrackerError::Timeout(format!("reading job {}", job_id))),
        }
    }

    async fn persist(&self, record: JobRecord, expected: u64) -> Result<JobRecord> {
        let job_id = record.job_id.clone();
        match tokio::time::timeout(
            self.store_timeout,
            self.store.put_if_version(record, expected),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(TrackerError::Timeout(format!("writing job {}", job_id))),
        }
    }

    /// Container locator -> instance id. `None` when it cannot be resolved.
    async fn resolve_instance(&self, job_id: &str, locator: &str) -> Option<String> {
        match tokio::time::timeout(self.resolver_timeout, self.resolver.resolve_instance(locator))
            .await
        {
            Ok(Ok(id)) if id != UNKNOWN && !id.is_empty() => Some(id),
            Ok(Ok(_)) => None,
            Ok(Err(e)) => {
                tracing::warn!(job_id, locator, error = %e, "Could not resolve instance");
                None
            }
            Err(_) => {
                tracing::warn!(job_id, locator, "Instance resolution timed out");
                None
            }
        }
    }

    async fn resolve_instance_type(&self, job_id: &str, instance_id: &str) -> String {
        match tokio::time::timeout(
            self.resolver_timeout,
            self.resolver.resolve_instance_type(instance_id),
        )
        .await
        {
            Ok(Ok(ty)) if !ty.is_empty() => ty,
            Ok(Ok(_)) => UNKNOWN.to_string(),
            Ok(Err(e)) => {
                tracing::warn!(job_id, instance_id, error = %e, "Could not resolve instance type");
                UNKNOWN.to_string()
            }
            Err(_) => {
                tracing::warn!(job_id, instance_id, "Instance type resolution timed out");
                UNKNOWN.to_string()
            }
        }
    }
}

fn log_transition(record: &JobRecord, transition: Transition) {
    match transition {
        Transition::Running {
            segment_opened,
            instance_changed,
        } => {
            if segment_opened || instance_changed {
                tracing::info!(
                    job_id = %record.job_id,
                    instance_id = %record.current_instance_id,
                    segment_opened,
                    instance_changed,
                    "Job running"
                );
            } else {
                tracing::debug!(job_id = %record.job_id, "Repeated running event");
            }
        }
        Transition::Interrupted { run_seconds } => {
            tracing::info!(
                job_id = %record.job_id,
                run_seconds,
                attempts = record.attempts,
                "Job interrupted"
            );
        }
        Transition::Finished { run_seconds } => {
            tracing::info!(
                job_id = %record.job_id,
                status = %record.status,
                run_seconds,
                total_seconds = record.run_duration_seconds,
                "Job finished"
            );
        }
        Transition::StatusOnly => {
            tracing::debug!(job_id = %record.job_id, status = %record.status, "Job status recorded");
        }
        Transition::IgnoredAfterTerminal => {
            tracing::warn!(
                job_id = %record.job_id,
                status = %record.status,
                "Ignoring non-terminal event for finished job"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn on(id: &str) -> ResolvedInstance {
        ResolvedInstance {
            id: id.to_string(),
            instance_type: "m5.large".to_string(),
        }
    }

    #[test]
    fn first_running_event_opens_segment_and_records_instance() {
        let mut record = JobRecord::new("job", "q");
        let transition = apply_event(&mut record, JobStatus::Running, Some(&on("i-1")), t(0));

        assert_eq!(
            transition,
            Transition::Running {
                segment_opened: true,
                instance_changed: true
            }
        );
        assert_eq!(record.start_time, Some(t(0)));
        assert_eq!(record.current_instance_id, "i-1");
        assert!(record.previous_instance_ids.is_empty());
        assert_eq!(record.instance_map.len(), 1);
    }

    #[test]
    fn repeated_running_event_is_idempotent() {
        let mut record = JobRecord::new("job", "q");
        apply_event(&mut record, JobStatus::Running, Some(&on("i-1")), t(0));
        let before = record.clone();

        let transition = apply_event(&mut record, JobStatus::Running, None, t(30));
        assert_eq!(
            transition,
            Transition::Running {
                segment_opened: false,
                instance_changed: false
            }
        );
        assert_eq!(record, before);
    }

    #[test]
    fn interruption_accumulates_and_closes_segment() {
        let mut record = JobRecord::new("job", "q");
        apply_event(&mut record, JobStatus::Running, Some(&on("i-1")), t(0));
        let transition = apply_event(&mut record, JobStatus::Runnable, None, t(100));

        assert_eq!(transition, Transition::Interrupted { run_seconds: 100 });
        assert_eq!(record.attempts, 1);
        assert_eq!(record.run_duration_seconds, 100);
        assert_eq!(record.total_time_saved.decode().seconds, 100);
        assert_eq!(record.interruption_time, Some(t(100)));
        assert!(record.start_time.is_none());

        // Duplicate interruption does nothing beyond the status.
        let transition = apply_event(&mut record, JobStatus::Runnable, None, t(120));
        assert_eq!(transition, Transition::StatusOnly);
        assert_eq!(record.attempts, 1);
        assert_eq!(record.run_duration_seconds, 100);
        assert_eq!(record.total_time_saved.len(), 1);
    }

    #[test]
    fn migration_moves_current_to_previous() {
        let mut record = JobRecord::new("job", "q");
        apply_event(&mut record, JobStatus::Running, Some(&on("i-1")), t(0));
        apply_event(&mut record, JobStatus::Runnable, None, t(100));
        apply_event(&mut record, JobStatus::Running, Some(&on("i-2")), t(150));
        apply_event(&mut record, JobStatus::Succeeded, None, t(400));

        assert_eq!(record.attempts, 1);
        assert_eq!(record.run_duration_seconds, 350);
        assert_eq!(record.previous_instance_ids, vec!["i-1".to_string()]);
        assert_eq!(record.current_instance_id, "i-2");
        assert_eq!(
            record.instance_map.keys().cloned().collect::<Vec<_>>(),
            vec!["i-1".to_string(), "i-2".to_string()]
        );
        assert_eq!(record.status, JobStatus::Succeeded);
    }

    #[test]
    fn duplicate_terminal_event_adds_nothing() {
        let mut record = JobRecord::new("job", "q");
        apply_event(&mut record, JobStatus::Running, None, t(0));
        assert_eq!(
            apply_event(&mut record, JobStatus::Failed, None, t(60)),
            Transition::Finished { run_seconds: 60 }
        );
        assert_eq!(
            apply_event(&mut record, JobStatus::Failed, None, t(90)),
            Transition::StatusOnly
        );
        assert_eq!(record.run_duration_seconds, 60);
    }

    #[test]
    fn late_running_event_after_terminal_is_ignored() {
        let mut record = JobRecord::new("job", "q");
        apply_event(&mut record, JobStatus::Running, Some(&on("i-1")), t(0));
        apply_event(&mut record, JobStatus::Succeeded, None, t(10));
        let before = record.clone();

        assert_eq!(
            apply_event(&mut record, JobStatus::Running, Some(&on("i-9")), t(20)),
            Transition::IgnoredAfterTerminal
        );
        assert_eq!(record, before);
    }

    #[test]
    fn unknown_instance_never_enters_history() {
        let mut record = JobRecord::new("job", "q");
        let unknown = ResolvedInstance {
            id: UNKNOWN.to_string(),
            instance_type: UNKNOWN.to_string(),
        };
        apply_event(&mut record, JobStatus::Running, Some(&unknown), t(0));
        assert!(record.instance_map.is_empty());
        assert!(!record.has_known_instance());

        // First known instance after an unknown one is not a migration.
        apply_event(&mut record, JobStatus::Running, Some(&on("i-1")), t(5));
        assert!(record.previous_instance_ids.is_empty());
        assert_eq!(record.current_instance_id, "i-1");
    }

    #[test]
    fn migration_without_interruption_keeps_segment_and_attempts() {
        let mut record = JobRecord::new("job", "q");
        apply_event(&mut record, JobStatus::Running, Some(&on("i-1")), t(0));
        let transition = apply_event(&mut record, JobStatus::Running, Some(&on("i-2")), t(10));

        assert_eq!(
            transition,
            Transition::Running {
                segment_opened: false,
                instance_changed: true
            }
        );
        assert_eq!(record.previous_instance_ids, vec!["i-1".to_string()]);
        assert_eq!(record.current_instance_id, "i-2");
        assert_eq!(record.attempts, 0);
        assert_eq!(record.start_time, Some(t(0)));

        apply_event(&mut record, JobStatus::Succeeded, None, t(60));
        assert_eq!(record.run_duration_seconds, 60);
        assert_eq!(record.attempts, 0);
    }

    #[test]
    fn clock_skew_clamps_to_zero() {
        let mut record = JobRecord::new("job", "q");
        apply_event(&mut record, JobStatus::Running, None, t(100));
        assert_eq!(
            apply_event(&mut record, JobStatus::Succeeded, None, t(50)),
            Transition::Finished { run_seconds: 0 }
        );
        assert_eq!(record.run_duration_seconds, 0);
    }

    #[test]
    fn pre_run_states_only_record_status() {
        let mut record = JobRecord::new("job", "q");
        for status in [JobStatus::Submitted, JobStatus::Pending, JobStatus::Starting] {
            assert_eq!(apply_event(&mut record, status, None, t(0)), Transition::StatusOnly);
            assert_eq!(record.status, status);
        }
        assert!(record.start_time.is_none());
    }
}
