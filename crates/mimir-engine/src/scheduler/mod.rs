//! Job scheduler
//!
//! Cron-driven executor that survives restarts: every job is a database row,
//! and an in-memory min-heap keyed by next_run_at decides what fires on each
//! tick. Heap entries are advisory: before dispatch the job row is
//! re-read, and entries that no longer match (job deleted, disabled, or
//! rescheduled) are dropped. Jobs never run concurrently with themselves: an
//! overlapping tick is dropped with a warning.

pub mod cron;
pub mod dispatch;

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use mimir_contracts::{CreateJobRequest, UpdateJobRequest};
use mimir_storage::{CreateSchedulerJob, Database, SchedulerJobRow, UpdateSchedulerJob};

use crate::bus::{Event, EventBus, EventType};
use crate::error::EngineError;

pub use cron::CronSchedule;
pub use dispatch::{
    DispatchOutcome, EngineJobDispatcher, EventPipelineRunner, JobDispatcher, PipelineRunner,
};

const SOURCE: &str = "scheduler";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct HeapEntry {
    next_run: DateTime<Utc>,
    job_id: String,
}

/// Cron-driven job executor with database-backed persistence.
pub struct JobScheduler {
    db: Database,
    bus: Arc<EventBus>,
    dispatcher: Arc<dyn JobDispatcher>,
    tick: Duration,
    max_failures: i32,
    /// Min-heap of upcoming firings; guarded by a short-held mutex, never
    /// held across I/O.
    heap: Mutex<BinaryHeap<Reverse<HeapEntry>>>,
    /// Jobs currently executing (self-overlap guard).
    running: Mutex<HashSet<String>>,
    shutdown: CancellationToken,
    tick_handle: Mutex<Option<JoinHandle<()>>>,
}

impl JobScheduler {
    pub fn new(
        db: Database,
        bus: Arc<EventBus>,
        dispatcher: Arc<dyn JobDispatcher>,
        tick: Duration,
        max_failures: i32,
    ) -> Self {
        Self {
            db,
            bus,
            dispatcher,
            tick,
            max_failures,
            heap: Mutex::new(BinaryHeap::new()),
            running: Mutex::new(HashSet::new()),
            shutdown: CancellationToken::new(),
            tick_handle: Mutex::new(None),
        }
    }

    /// Register a job: validate the cron expression, persist the row, and
    /// install the in-memory timer.
    pub async fn add_job(&self, req: CreateJobRequest) -> Result<SchedulerJobRow, EngineError> {
        if req.id.trim().is_empty() {
            return Err(EngineError::InvalidInput("job id is empty".to_string()));
        }

        let schedule = CronSchedule::parse(&req.cron_expr)?;
        let enabled = req.enabled.unwrap_or(true);
        let next_run = schedule.next_after(Utc::now());

        let inserted = self
            .db
            .insert_job(CreateSchedulerJob {
                id: req.id.clone(),
                name: req.name,
                job_type: req.job_type.to_string(),
                target: req.target,
                cron_expr: schedule.expr().to_string(),
                enabled,
                next_run_at: next_run,
            })
            .await?;

        if !inserted {
            return Err(EngineError::Conflict(format!(
                "scheduler job '{}' already exists",
                req.id
            )));
        }

        if enabled {
            if let Some(next_run) = next_run {
                self.push_entry(&req.id, next_run);
            }
        }

        let job = self
            .db
            .get_job(&req.id)
            .await?
            .ok_or_else(|| EngineError::not_found("scheduler job", &req.id))?;

        tracing::info!(job_id = %job.id, cron = %job.cron_expr, "scheduler job added");
        Ok(job)
    }

    /// Mutate name, cron expression, or enabled flag; next_run_at is
    /// recomputed from the effective expression.
    pub async fn update_job(
        &self,
        id: &str,
        req: UpdateJobRequest,
    ) -> Result<SchedulerJobRow, EngineError> {
        let existing = self
            .db
            .get_job(id)
            .await?
            .ok_or_else(|| EngineError::not_found("scheduler job", id))?;

        let cron_expr = req.cron_expr.unwrap_or_else(|| existing.cron_expr.clone());
        let schedule = CronSchedule::parse(&cron_expr)?;
        let enabled = req.enabled.unwrap_or(existing.enabled);
        let next_run = schedule.next_after(Utc::now());

        let updated = self
            .db
            .update_job(
                id,
                UpdateSchedulerJob {
                    name: req.name,
                    cron_expr: Some(schedule.expr().to_string()),
                    enabled: Some(enabled),
                    next_run_at: next_run,
                },
            )
            .await?
            .ok_or_else(|| EngineError::not_found("scheduler job", id))?;

        if enabled {
            if let Some(next_run) = next_run {
                self.push_entry(id, next_run);
            }
        }

        Ok(updated)
    }

    /// Delete the row; any in-memory timer entry goes stale and is dropped
    /// at pop time.
    pub async fn remove_job(&self, id: &str) -> Result<(), EngineError> {
        if !self.db.delete_job(id).await? {
            return Err(EngineError::not_found("scheduler job", id));
        }
        tracing::info!(job_id = %id, "scheduler job removed");
        Ok(())
    }

    pub async fn set_enabled(&self, id: &str, enabled: bool) -> Result<SchedulerJobRow, EngineError> {
        let job = self
            .db
            .get_job(id)
            .await?
            .ok_or_else(|| EngineError::not_found("scheduler job", id))?;

        if enabled {
            let schedule = CronSchedule::parse(&job.cron_expr)?;
            let next_run = schedule.next_after(Utc::now());
            self.db
                .update_job(
                    id,
                    UpdateSchedulerJob {
                        enabled: Some(true),
                        next_run_at: next_run,
                        ..Default::default()
                    },
                )
                .await?;
            if let Some(next_run) = next_run {
                self.push_entry(id, next_run);
            }
        } else {
            self.db.set_job_enabled(id, false).await?;
        }

        self.db
            .get_job(id)
            .await?
            .ok_or_else(|| EngineError::not_found("scheduler job", id))
    }

    /// Pull a job's next firing forward to now (used by chain reactions for
    /// drift remediation). The regular cadence resumes after the run.
    pub async fn trigger_now(&self, id: &str) -> Result<(), EngineError> {
        let job = self
            .db
            .get_job(id)
            .await?
            .ok_or_else(|| EngineError::not_found("scheduler job", id))?;

        if !job.enabled {
            return Err(EngineError::InvalidState(format!(
                "scheduler job '{id}' is disabled"
            )));
        }

        let now = Utc::now();
        self.db.set_job_next_run(id, Some(now)).await?;
        self.push_entry(id, now);
        Ok(())
    }

    /// First enabled job of a type whose target matches, if any.
    pub async fn find_job_by_target(
        &self,
        job_type: &str,
        target: &str,
    ) -> Result<Option<SchedulerJobRow>, EngineError> {
        let jobs = self.db.list_enabled_jobs().await?;
        Ok(jobs
            .into_iter()
            .find(|j| j.job_type == job_type && j.target == target))
    }

    pub async fn get_job(&self, id: &str) -> Result<SchedulerJobRow, EngineError> {
        self.db
            .get_job(id)
            .await?
            .ok_or_else(|| EngineError::not_found("scheduler job", id))
    }

    pub async fn list_jobs(&self) -> Result<Vec<SchedulerJobRow>, EngineError> {
        Ok(self.db.list_jobs().await?)
    }

    /// Load enabled jobs from the database, recompute their timers, and
    /// install heap entries. Invalid cron expressions are skipped and
    /// logged; missed runs are not re-executed.
    pub async fn recover_from_database(&self) -> Result<usize, EngineError> {
        let jobs = self.db.list_enabled_jobs().await?;
        let now = Utc::now();
        let mut recovered = 0usize;

        for job in jobs {
            let schedule = match CronSchedule::parse(&job.cron_expr) {
                Ok(schedule) => schedule,
                Err(err) => {
                    tracing::warn!(job_id = %job.id, error = %err, "skipping job with invalid cron expression");
                    continue;
                }
            };

            if let Some(previous) = job.next_run_at {
                if previous <= now {
                    tracing::info!(
                        job_id = %job.id,
                        missed = %previous,
                        "missed runs skipped, advancing to next occurrence"
                    );
                }
            }

            let next_run = schedule.next_after(now);
            self.db.set_job_next_run(&job.id, next_run).await?;
            if let Some(next_run) = next_run {
                self.push_entry(&job.id, next_run);
            }
            recovered += 1;
        }

        tracing::info!(jobs = recovered, "scheduler recovered from database");
        Ok(recovered)
    }

    /// Start the tick loop.
    pub fn start(self: Arc<Self>) {
        let scheduler = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = scheduler.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(scheduler.tick) => {
                        scheduler.pickup_new_jobs().await;
                        scheduler.clone().run_due_jobs().await;
                    }
                }
            }
        });
        *self.tick_handle.lock() = Some(handle);
    }

    /// Stop ticking and wait for in-flight jobs up to the deadline.
    pub async fn shutdown(&self, deadline: Duration) {
        self.shutdown.cancel();

        let handle = self.tick_handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        let started = Instant::now();
        while !self.running.lock().is_empty() {
            if started.elapsed() >= deadline {
                tracing::warn!("scheduler shutdown deadline reached with jobs still running");
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Jobs inserted out-of-band (next_run_at null) get their first timer
    /// here.
    pub(crate) async fn pickup_new_jobs(&self) {
        let jobs = match self.db.list_enabled_jobs().await {
            Ok(jobs) => jobs,
            Err(err) => {
                tracing::error!(error = %err, "failed to list jobs");
                return;
            }
        };

        for job in jobs.into_iter().filter(|j| j.next_run_at.is_none()) {
            let schedule = match CronSchedule::parse(&job.cron_expr) {
                Ok(schedule) => schedule,
                Err(err) => {
                    tracing::warn!(job_id = %job.id, error = %err, "disabling job with invalid cron expression");
                    let _ = self.db.set_job_enabled(&job.id, false).await;
                    continue;
                }
            };

            let next_run = schedule.next_after(Utc::now());
            if let Err(err) = self.db.set_job_next_run(&job.id, next_run).await {
                tracing::error!(job_id = %job.id, error = %err, "failed to persist next run");
                continue;
            }
            if let Some(next_run) = next_run {
                self.push_entry(&job.id, next_run);
                tracing::info!(job_id = %job.id, %next_run, "picked up new scheduler job");
            }
        }
    }

    /// Pop every due heap entry, revalidate it against the database, and
    /// dispatch the jobs that still match.
    pub(crate) async fn run_due_jobs(self: Arc<Self>) {
        let now = Utc::now();
        let due: Vec<HeapEntry> = {
            let mut heap = self.heap.lock();
            let mut due = Vec::new();
            while let Some(Reverse(entry)) = heap.peek() {
                if entry.next_run > now {
                    break;
                }
                if let Some(Reverse(entry)) = heap.pop() {
                    due.push(entry);
                }
            }
            due
        };

        for entry in due {
            let job = match self.db.get_job(&entry.job_id).await {
                Ok(Some(job)) => job,
                Ok(None) => continue, // deleted since scheduling
                Err(err) => {
                    tracing::error!(job_id = %entry.job_id, error = %err, "failed to load due job");
                    continue;
                }
            };

            // Stale entry: the job was disabled or rescheduled after this
            // entry was pushed.
            if !job.enabled || job.next_run_at != Some(entry.next_run) {
                continue;
            }

            self.clone().dispatch_job(job);
        }
    }

    /// Run one job on its own task. Overlapping ticks are dropped.
    fn dispatch_job(self: Arc<Self>, job: SchedulerJobRow) {
        {
            let mut running = self.running.lock();
            if !running.insert(job.id.clone()) {
                drop(running);
                tracing::warn!(job_id = %job.id, "previous run still in progress, dropping tick");
                let scheduler = self.clone();
                tokio::spawn(async move {
                    scheduler.reschedule(&job).await;
                });
                return;
            }
        }

        let scheduler = self.clone();
        tokio::spawn(async move {
            let started_at = Utc::now();
            tracing::debug!(job_id = %job.id, job_type = %job.job_type, "dispatching job");

            let outcome = scheduler.dispatcher.dispatch(&job).await;
            let next_run = CronSchedule::parse(&job.cron_expr)
                .ok()
                .and_then(|s| s.next_after(Utc::now()));

            match outcome {
                Ok(DispatchOutcome::Completed) => {
                    if let Err(err) = scheduler
                        .db
                        .record_job_success(&job.id, started_at, next_run)
                        .await
                    {
                        tracing::error!(job_id = %job.id, error = %err, "failed to record job success");
                    }
                    if let Some(next_run) = next_run {
                        scheduler.push_entry(&job.id, next_run);
                    }
                }
                Ok(DispatchOutcome::TargetMissing) => {
                    tracing::info!(job_id = %job.id, "job target is gone, auto-disabling");
                    let _ = scheduler.db.set_job_enabled(&job.id, false).await;
                }
                Err(err) => {
                    scheduler
                        .handle_job_failure(&job, started_at, next_run, &err.to_string())
                        .await;
                }
            }

            scheduler.running.lock().remove(&job.id);
        });
    }

    async fn handle_job_failure(
        &self,
        job: &SchedulerJobRow,
        started_at: DateTime<Utc>,
        next_run: Option<DateTime<Utc>>,
        error: &str,
    ) {
        let failures = match self
            .db
            .record_job_failure(&job.id, started_at, next_run, error)
            .await
        {
            Ok(failures) => failures,
            Err(err) => {
                tracing::error!(job_id = %job.id, error = %err, "failed to record job failure");
                return;
            }
        };

        tracing::warn!(job_id = %job.id, failures, error, "scheduled job failed");

        if failures >= self.max_failures {
            tracing::warn!(job_id = %job.id, failures, "failure threshold exceeded, auto-disabling");
            let _ = self.db.set_job_enabled(&job.id, false).await;

            self.bus
                .publish(Event::new(
                    EventType::AlertRaised,
                    SOURCE,
                    json!({
                        "severity": "high",
                        "title": format!("scheduler job '{}' disabled", job.id),
                        "description": format!(
                            "{failures} consecutive failures, last error: {error}"
                        ),
                        "job_id": job.id,
                    }),
                ))
                .await;
        } else if let Some(next_run) = next_run {
            self.push_entry(&job.id, next_run);
        }
    }

    async fn reschedule(&self, job: &SchedulerJobRow) {
        let next_run = CronSchedule::parse(&job.cron_expr)
            .ok()
            .and_then(|s| s.next_after(Utc::now()));
        if let Err(err) = self.db.set_job_next_run(&job.id, next_run).await {
            tracing::error!(job_id = %job.id, error = %err, "failed to reschedule job");
            return;
        }
        if let Some(next_run) = next_run {
            self.push_entry(&job.id, next_run);
        }
    }

    fn push_entry(&self, job_id: &str, next_run: DateTime<Utc>) {
        self.heap.lock().push(Reverse(HeapEntry {
            next_run,
            job_id: job_id.to_string(),
        }));
    }

    #[cfg(test)]
    fn force_entry(&self, job_id: &str, next_run: DateTime<Utc>) {
        self.push_entry(job_id, next_run);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::FutureExt;
    use mimir_contracts::JobType;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingDispatcher {
        calls: AtomicUsize,
        fail: bool,
    }

    impl RecordingDispatcher {
        fn ok() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail: true,
            })
        }
    }

    #[async_trait]
    impl JobDispatcher for RecordingDispatcher {
        async fn dispatch(&self, _job: &SchedulerJobRow) -> Result<DispatchOutcome, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(EngineError::HandlerFailed("dispatch failed".to_string()))
            } else {
                Ok(DispatchOutcome::Completed)
            }
        }
    }

    async fn scheduler_with(
        dispatcher: Arc<dyn JobDispatcher>,
        max_failures: i32,
    ) -> (Arc<JobScheduler>, Arc<EventBus>) {
        let db = Database::in_memory().await.unwrap();
        let bus = Arc::new(EventBus::new());
        let scheduler = Arc::new(JobScheduler::new(
            db,
            bus.clone(),
            dispatcher,
            Duration::from_millis(10),
            max_failures,
        ));
        (scheduler, bus)
    }

    fn job_request(id: &str, cron: &str) -> CreateJobRequest {
        CreateJobRequest {
            id: id.to_string(),
            name: format!("{id} job"),
            job_type: JobType::Monitoring,
            target: "target".to_string(),
            cron_expr: cron.to_string(),
            enabled: Some(true),
        }
    }

    async fn wait_until<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..200 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn add_job_rejects_invalid_cron_and_duplicates() {
        let (scheduler, _bus) = scheduler_with(RecordingDispatcher::ok(), 5).await;

        let err = scheduler
            .add_job(job_request("bad", "*/0 * * * *"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_input");

        scheduler.add_job(job_request("dup", "*/5 * * * *")).await.unwrap();
        let err = scheduler
            .add_job(job_request("dup", "*/5 * * * *"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "conflict");
    }

    #[tokio::test]
    async fn add_job_computes_future_next_run() {
        let (scheduler, _bus) = scheduler_with(RecordingDispatcher::ok(), 5).await;

        let before = Utc::now();
        let job = scheduler.add_job(job_request("j", "*/1 * * * *")).await.unwrap();

        assert!(job.next_run_at.unwrap() > before);
    }

    #[tokio::test]
    async fn recovery_advances_past_next_runs() {
        let (scheduler, _bus) = scheduler_with(RecordingDispatcher::ok(), 5).await;
        let job = scheduler.add_job(job_request("j", "*/1 * * * *")).await.unwrap();

        // Simulate long downtime: next_run_at far in the past.
        let past = Utc::now() - chrono::Duration::hours(3);
        scheduler.db.set_job_next_run(&job.id, Some(past)).await.unwrap();

        let recovered = scheduler.recover_from_database().await.unwrap();
        assert_eq!(recovered, 1);

        let job = scheduler.get_job("j").await.unwrap();
        assert!(job.next_run_at.unwrap() > Utc::now());
    }

    #[tokio::test]
    async fn recovery_skips_invalid_cron() {
        let (scheduler, _bus) = scheduler_with(RecordingDispatcher::ok(), 5).await;
        let job = scheduler.add_job(job_request("j", "*/1 * * * *")).await.unwrap();

        // Corrupt the stored expression behind the scheduler's back.
        scheduler
            .db
            .update_job(
                &job.id,
                UpdateSchedulerJob {
                    cron_expr: Some("garbage".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let recovered = scheduler.recover_from_database().await.unwrap();
        assert_eq!(recovered, 0);
    }

    #[tokio::test]
    async fn due_job_is_dispatched_once() {
        let dispatcher = RecordingDispatcher::ok();
        let (scheduler, _bus) = scheduler_with(dispatcher.clone(), 5).await;
        let job = scheduler.add_job(job_request("j", "*/1 * * * *")).await.unwrap();

        // Force the entry due now, keeping the row in agreement.
        let due = Utc::now() - chrono::Duration::seconds(1);
        scheduler.db.set_job_next_run(&job.id, Some(due)).await.unwrap();
        scheduler.force_entry(&job.id, due);

        scheduler.clone().run_due_jobs().await;

        let db = scheduler.db.clone();
        wait_until(|| {
            let db = db.clone();
            async move {
                db.get_job("j")
                    .await
                    .unwrap()
                    .unwrap()
                    .last_run_at
                    .is_some()
            }
        })
        .await;

        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 1);
        let job = scheduler.get_job("j").await.unwrap();
        assert_eq!(job.consecutive_failures, 0);
        assert!(job.next_run_at.unwrap() > Utc::now());
    }

    #[tokio::test]
    async fn stale_heap_entries_are_dropped() {
        let dispatcher = RecordingDispatcher::ok();
        let (scheduler, _bus) = scheduler_with(dispatcher.clone(), 5).await;
        let job = scheduler.add_job(job_request("j", "*/1 * * * *")).await.unwrap();

        // Entry no longer matches the row's next_run_at.
        let stale = Utc::now() - chrono::Duration::minutes(5);
        scheduler.force_entry(&job.id, stale);

        scheduler.clone().run_due_jobs().await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn disabled_job_is_never_dispatched() {
        let dispatcher = RecordingDispatcher::ok();
        let (scheduler, _bus) = scheduler_with(dispatcher.clone(), 5).await;
        let job = scheduler.add_job(job_request("j", "*/1 * * * *")).await.unwrap();

        let due = Utc::now() - chrono::Duration::seconds(1);
        scheduler.db.set_job_next_run(&job.id, Some(due)).await.unwrap();
        scheduler.force_entry(&job.id, due);
        scheduler.set_enabled("j", false).await.unwrap();

        scheduler.clone().run_due_jobs().await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn repeated_failures_disable_job_and_raise_alert() {
        let dispatcher = RecordingDispatcher::failing();
        let (scheduler, bus) = scheduler_with(dispatcher.clone(), 2).await;

        let alerts = Arc::new(AtomicUsize::new(0));
        let alerts_clone = alerts.clone();
        bus.subscribe(EventType::AlertRaised, "test", move |event| {
            let alerts = alerts_clone.clone();
            async move {
                assert_eq!(event.payload_str("severity"), Some("high"));
                alerts.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            .boxed()
        });

        let job = scheduler.add_job(job_request("j", "*/1 * * * *")).await.unwrap();

        for _ in 0..2 {
            let due = Utc::now() - chrono::Duration::seconds(1);
            scheduler.db.set_job_next_run(&job.id, Some(due)).await.unwrap();
            scheduler.force_entry(&job.id, due);
            scheduler.clone().run_due_jobs().await;

            let db = scheduler.db.clone();
            wait_until(|| {
                let db = db.clone();
                async move {
                    let job = db.get_job("j").await.unwrap().unwrap();
                    job.consecutive_failures > 0 || !job.enabled
                }
            })
            .await;
            // Let the spawned task finish its bookkeeping.
            tokio::time::sleep(Duration::from_millis(30)).await;
        }

        let job = scheduler.get_job("j").await.unwrap();
        assert!(!job.enabled);
        assert_eq!(job.consecutive_failures, 2);
        assert_eq!(alerts.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn overlapping_tick_is_dropped() {
        let dispatcher = RecordingDispatcher::ok();
        let (scheduler, _bus) = scheduler_with(dispatcher.clone(), 5).await;
        let job = scheduler.add_job(job_request("j", "*/1 * * * *")).await.unwrap();

        // Pretend a previous run is still going.
        scheduler.running.lock().insert("j".to_string());

        let due = Utc::now() - chrono::Duration::seconds(1);
        scheduler.db.set_job_next_run(&job.id, Some(due)).await.unwrap();
        scheduler.force_entry(&job.id, due);

        scheduler.clone().run_due_jobs().await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 0);
        // The dropped tick still advanced the timer.
        let job = scheduler.get_job("j").await.unwrap();
        assert!(job.next_run_at.unwrap() > Utc::now());
    }

    #[tokio::test]
    async fn pickup_schedules_jobs_inserted_out_of_band() {
        let dispatcher = RecordingDispatcher::ok();
        let (scheduler, _bus) = scheduler_with(dispatcher, 5).await;

        // A stage handler inserts the row directly with no next_run_at.
        scheduler
            .db
            .insert_job(CreateSchedulerJob {
                id: "oob".to_string(),
                name: "out of band".to_string(),
                job_type: "monitoring".to_string(),
                target: "t".to_string(),
                cron_expr: "*/1 * * * *".to_string(),
                enabled: true,
                next_run_at: None,
            })
            .await
            .unwrap();

        scheduler.pickup_new_jobs().await;

        let job = scheduler.get_job("oob").await.unwrap();
        assert!(job.next_run_at.is_some());
    }
}
