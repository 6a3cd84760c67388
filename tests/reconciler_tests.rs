//! Reconciler integration tests.
//!
//! Drive full event sequences through `Reconciler::reconcile_at` against real
//! store implementations, including concurrent writers and failing adapters.


use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use spot_tracker::error::{Result, TrackerError};
use spot_tracker::resolver::InstanceResolver;
use spot_tracker::store::{InMemoryJobStore, JobStore};
use spot_tracker::tracker::{JobEvent, JobRecord, JobStatus, Reconciler, UNKNOWN};
use test_harness::*;

#[tokio::test]
async fn test_interrupted_job_migrates_and_accumulates_runtime() {
    let (store, reconciler) = in_memory_reconciler();

    reconciler.reconcile_at(&running_on("J1", 1), t(0)).await.unwrap();
    reconciler
        .reconcile_at(&status_event("J1", JobStatus::Runnable), t(100))
        .await
        .unwrap();
    reconciler.reconcile_at(&running_on("J1", 2), t(150)).await.unwrap();
    let done = reconciler
        .reconcile_at(&status_event("J1", JobStatus::Succeeded), t(400))
        .await
        .unwrap();

    assert_eq!(done.status, JobStatus::Succeeded);
    assert_eq!(done.run_duration_seconds, 350);
    assert_eq!(done.attempts, 1);
    assert_eq!(done.current_instance_id, "i-2");
    assert_eq!(done.previous_instance_ids, vec!["i-1".to_string()]);
    assert_eq!(done.instance_map.len(), 2);
    assert_eq!(done.instance_map["i-1"], "m5.large");
    assert_eq!(done.instance_map["i-2"], "m5.large");
    assert_eq!(done.total_time_saved.decode().seconds, 100);
    assert!(done.start_time.is_none());
    assert_eq!(done.interruption_time, Some(t(100)));
    assert_eq!(done.queue_name, "spot-queue");

    let stored = store.get("J1").await.unwrap().unwrap();
    assert_eq!(stored, done);
    assert_eq!(stored.version, 4);
}

#[tokio::test]
async fn test_attempts_count_only_interruptions() {
    let (_store, reconciler) = in_memory_reconciler();

    reconciler
        .reconcile_at(&status_event("J2", JobStatus::Submitted), t(0))
        .await
        .unwrap();
    reconciler
        .reconcile_at(&status_event("J2", JobStatus::Runnable), t(5))
        .await
        .unwrap();

    let mut now = 10;
    for n in [1, 2, 3] {
        reconciler.reconcile_at(&running_on("J2", n), t(now)).await.unwrap();
        // A repeated running event changes nothing.
        reconciler.reconcile_at(&running_on("J2", n), t(now + 5)).await.unwrap();
        reconciler
            .reconcile_at(&status_event("J2", JobStatus::Runnable), t(now + 60))
            .await
            .unwrap();
        now += 100;
    }

    let record = reconciler.store().get("J2").await.unwrap().unwrap();
    assert_eq!(record.attempts, 3);
    assert_eq!(record.run_duration_seconds, 180);
    assert_eq!(record.previous_instance_ids, vec!["i-1", "i-2"]);
    assert_eq!(record.current_instance_id, "i-3");
    assert_eq!(record.total_time_saved.len(), 3);
}

#[tokio::test]
async fn test_replayed_terminal_event_adds_nothing() {
    let (_store, reconciler) = in_memory_reconciler();

    reconciler.reconcile_at(&running_on("J3", 1), t(0)).await.unwrap();
    let first = reconciler
        .reconcile_at(&status_event("J3", JobStatus::Failed), t(30))
        .await
        .unwrap();
    let replay = reconciler
        .reconcile_at(&status_event("J3", JobStatus::Failed), t(90))
        .await
        .unwrap();

    assert_eq!(first.run_duration_seconds, 30);
    assert_eq!(replay.run_duration_seconds, 30);
    assert_eq!(replay.status, JobStatus::Failed);
}

#[tokio::test]
async fn test_late_running_event_does_not_reopen_finished_job() {
    let (_store, reconciler) = in_memory_reconciler();

    reconciler.reconcile_at(&running_on("J4", 1), t(0)).await.unwrap();
    reconciler
        .reconcile_at(&status_event("J4", JobStatus::Succeeded), t(50))
        .await
        .unwrap();
    let late = reconciler.reconcile_at(&running_on("J4", 2), t(60)).await.unwrap();

    assert_eq!(late.status, JobStatus::Succeeded);
    assert!(late.start_time.is_none());
    assert_eq!(late.current_instance_id, "i-1");
    assert_eq!(late.run_duration_seconds, 50);
}

#[tokio::test]
async fn test_unresolvable_locator_still_accumulates_runtime() {
    let (_store, reconciler) = in_memory_reconciler();

    let event = JobEvent::new(
        "J5",
        "spot-queue",
        JobStatus::Running,
        "arn:aws:ecs:us-west-2:123456789012:container-instance/spot/404",
    );
    let running = reconciler.reconcile_at(&event, t(0)).await.unwrap();
    assert_eq!(running.current_instance_id, UNKNOWN);
    assert!(running.instance_map.is_empty());

    let done = reconciler
        .reconcile_at(&status_event("J5", JobStatus::Succeeded), t(75))
        .await
        .unwrap();
    assert_eq!(done.run_duration_seconds, 75);
}

#[tokio::test]
async fn test_event_without_locator_keeps_current_instance() {
    let (_store, reconciler) = in_memory_reconciler();

    reconciler.reconcile_at(&running_on("J6", 1), t(0)).await.unwrap();
    reconciler
        .reconcile_at(&status_event("J6", JobStatus::Runnable), t(10))
        .await
        .unwrap();
    let resumed = reconciler
        .reconcile_at(&status_event("J6", JobStatus::Running), t(20))
        .await
        .unwrap();

    assert_eq!(resumed.current_instance_id, "i-1");
    assert!(resumed.previous_instance_ids.is_empty());
    assert_eq!(resumed.start_time, Some(t(20)));
}

#[tokio::test]
async fn test_queue_name_is_set_once() {
    let (_store, reconciler) = in_memory_reconciler();

    reconciler.reconcile_at(&running_on("J7", 1), t(0)).await.unwrap();
    let moved = JobEvent::new("J7", "other-queue", JobStatus::Runnable, UNKNOWN);
    let record = reconciler.reconcile_at(&moved, t(10)).await.unwrap();

    assert_eq!(record.queue_name, "spot-queue");
}

#[tokio::test]
async fn test_clock_skew_clamps_to_zero() {
    let (_store, reconciler) = in_memory_reconciler();

    reconciler.reconcile_at(&running_on("J8", 1), t(100)).await.unwrap();
    let record = reconciler
        .reconcile_at(&status_event("J8", JobStatus::Runnable), t(40))
        .await
        .unwrap();

    assert_eq!(record.run_duration_seconds, 0);
    assert_eq!(record.attempts, 1);
}

#[tokio::test]
async fn test_store_failure_is_reported() {
    let reconciler = reconciler_over(Arc::new(BrokenStore), &test_config());

    let err = reconciler
        .reconcile_at(&running_on("J9", 1), t(0))
        .await
        .unwrap_err();

    assert!(matches!(err, TrackerError::Persistence(_)));
}

/// Resolver that never answers within any sane timeout.
struct StalledResolver;

#[async_trait]
impl InstanceResolver for StalledResolver {
    async fn resolve_instance(&self, _container_locator: &str) -> Result<String> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok("i-late".to_string())
    }

    async fn resolve_instance_type(&self, _instance_id: &str) -> Result<String> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok("m5.large".to_string())
    }
}

#[tokio::test]
async fn test_resolver_timeout_degrades_to_unknown() {
    let mut config = test_config();
    config.resolver.timeout_ms = 20;
    let store = Arc::new(InMemoryJobStore::new());
    let reconciler = Reconciler::new(store, Arc::new(StalledResolver), &config);

    let record = reconciler.reconcile_at(&running_on("J10", 1), t(0)).await.unwrap();

    assert_eq!(record.status, JobStatus::Running);
    assert_eq!(record.current_instance_id, UNKNOWN);
    assert_eq!(record.start_time, Some(t(0)));
}

/// Store that lets another writer slip in before the first conditional write.
struct RacingStore {
    inner: InMemoryJobStore,
    raced: AtomicBool,
}

#[async_trait]
impl JobStore for RacingStore {
    async fn get(&self, job_id: &str) -> Result<Option<JobRecord>> {
        self.inner.get(job_id).await
    }

    async fn put(&self, record: JobRecord) -> Result<JobRecord> {
        self.inner.put(record).await
    }

    async fn put_if_version(&self, record: JobRecord, expected: u64) -> Result<JobRecord> {
        if !self.raced.swap(true, Ordering::SeqCst) {
            let mut rival = self
                .inner
                .get(&record.job_id)
                .await?
                .unwrap_or_else(|| JobRecord::new(&record.job_id, "spot-queue"));
            rival.attempts += 1;
            self.inner.put(rival).await?;
        }
        self.inner.put_if_version(record, expected).await
    }

    async fn scan(&self) -> Result<Vec<JobRecord>> {
        self.inner.scan().await
    }
}

#[tokio::test]
async fn test_conflicting_write_is_retried_on_fresh_state() {
    let store = Arc::new(RacingStore {
        inner: InMemoryJobStore::new(),
        raced: AtomicBool::new(false),
    });
    let reconciler = reconciler_over(store.clone(), &test_config());

    let record = reconciler.reconcile_at(&running_on("J11", 1), t(0)).await.unwrap();

    // The rival's write survives and the event is applied on top of it.
    assert_eq!(record.attempts, 1);
    assert_eq!(record.current_instance_id, "i-1");
    assert_eq!(record.start_time, Some(t(0)));
    assert_eq!(record.version, 2);
}

/// Store whose conditional writes always lose.
struct AlwaysConflicting {
    writes: AtomicU32,
}

#[async_trait]
impl JobStore for AlwaysConflicting {
    async fn get(&self, _job_id: &str) -> Result<Option<JobRecord>> {
        Ok(None)
    }

    async fn put(&self, record: JobRecord) -> Result<JobRecord> {
        Ok(record)
    }

    async fn put_if_version(&self, record: JobRecord, expected: u64) -> Result<JobRecord> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Err(TrackerError::VersionConflict {
            job_id: record.job_id,
            expected,
            found: expected + 1,
        })
    }

    async fn scan(&self) -> Result<Vec<JobRecord>> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn test_gives_up_after_bounded_conflicts() {
    let mut config = test_config();
    config.reconciler.max_conflict_retries = 2;
    let store = Arc::new(AlwaysConflicting {
        writes: AtomicU32::new(0),
    });
    let reconciler = reconciler_over(store.clone(), &config);

    let err = reconciler
        .reconcile_at(&running_on("J12", 1), t(0))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        TrackerError::ConflictRetriesExhausted { attempts: 3, .. }
    ));
    assert_eq!(store.writes.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_concurrent_duplicate_interruptions_count_once() {
    let mut config = test_config();
    config.reconciler.max_conflict_retries = 32;
    let store = Arc::new(InMemoryJobStore::new());
    let reconciler = Arc::new(reconciler_over(store.clone(), &config));

    reconciler.reconcile_at(&running_on("J13", 1), t(0)).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let reconciler = reconciler.clone();
        handles.push(tokio::spawn(async move {
            reconciler
                .reconcile_at(&status_event("J13", JobStatus::Runnable), t(120))
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let record = store.get("J13").await.unwrap().unwrap();
    assert_eq!(record.attempts, 1);
    assert_eq!(record.run_duration_seconds, 120);
    assert_eq!(record.total_time_saved.len(), 1);
    assert_eq!(record.version, 9);
}

#[tokio::test]
async fn test_concurrent_jobs_do_not_interfere() {
    let store = Arc::new(InMemoryJobStore::new());
    let reconciler = Arc::new(reconciler_over(store.clone(), &test_config()));

    let mut handles = Vec::new();
    for i in 0..16 {
        let reconciler = reconciler.clone();
        handles.push(tokio::spawn(async move {
            let job_id = format!("batch-{}", i);
            reconciler.reconcile_at(&running_on(&job_id, 1), t(0)).await?;
            reconciler
                .reconcile_at(&status_event(&job_id, JobStatus::Succeeded), t(10 + i))
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let records = store.scan().await.unwrap();
    assert_eq!(records.len(), 16);
    let total: u64 = records.iter().map(|r| r.run_duration_seconds).sum();
    assert_eq!(total, (0..16).map(|i| 10 + i as u64).sum::<u64>());
}
