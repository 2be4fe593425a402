//! Named job queues with bounded worker pools.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::{watch, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::QueueConfig;

use super::types::{Job, JobFailure, JobState, JobStatus, QueueError, QueueStats};

/// Finished jobs kept around for status lookups.
const MAX_FINISHED_JOBS: usize = 1000;

/// How long interrupted jobs get to run their failure handlers.
const INTERRUPT_DRAIN: Duration = Duration::from_secs(5);

/// Invoked once per job after it reaches a final state.
pub type JobFinishedCallback = Arc<dyn Fn(&JobStatus) + Send + Sync>;

#[derive(Default)]
struct QueueCounters {
    queued: AtomicU64,
    active: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
}

struct NamedQueue {
    name: String,
    workers: usize,
    timeout: Duration,
    semaphore: Arc<Semaphore>,
    accepting: AtomicBool,
    counters: QueueCounters,
}

impl NamedQueue {
    fn stats(&self) -> QueueStats {
        QueueStats {
            name: self.name.clone(),
            workers: self.workers,
            timeout_secs: self.timeout.as_secs(),
            accepting: self.accepting.load(Ordering::SeqCst),
            queued: self.counters.queued.load(Ordering::Relaxed),
            active: self.counters.active.load(Ordering::Relaxed),
            processed: self.counters.processed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            timed_out: self.counters.timed_out.load(Ordering::Relaxed),
        }
    }
}

#[derive(Default)]
struct JobRegistry {
    jobs: HashMap<String, JobStatus>,
    finished: VecDeque<String>,
}

impl JobRegistry {
    fn update(&mut self, id: &str, apply: impl FnOnce(&mut JobStatus)) -> Option<JobStatus> {
        let status = self.jobs.get_mut(id)?;
        apply(status);
        let snapshot = status.clone();

        if snapshot.state.is_done() {
            self.finished.push_back(id.to_string());
            while self.finished.len() > MAX_FINISHED_JOBS {
                if let Some(oldest) = self.finished.pop_front() {
                    self.jobs.remove(&oldest);
                }
            }
        }
        Some(snapshot)
    }
}

/// Handle to an enqueued job.
#[derive(Debug)]
pub struct JobHandle {
    pub id: String,
    pub queue: String,
    task: JoinHandle<()>,
}

impl JobHandle {
    /// Wait until the job reached a final state.
    pub async fn finished(self) {
        if let Err(e) = self.task.await {
            error!(job_id = %self.id, error = %e, "Job driver task failed");
        }
    }
}

/// A set of named queues, each with its own worker pool and timeout.
///
/// Enqueueing never waits for the job: it registers it and spawns a task that
/// waits for a worker permit.
pub struct JobQueue {
    queues: HashMap<String, Arc<NamedQueue>>,
    registry: Arc<RwLock<JobRegistry>>,
    on_finished: Option<JobFinishedCallback>,
    /// Flipped to `true` when shutdown gives up waiting on running jobs.
    interrupt: watch::Sender<bool>,
}

impl JobQueue {
    pub fn new(configs: &BTreeMap<String, QueueConfig>) -> Self {
        let queues = configs
            .iter()
            .map(|(name, config)| {
                let queue = NamedQueue {
                    name: name.clone(),
                    workers: config.workers,
                    timeout: Duration::from_secs(config.timeout_secs),
                    semaphore: Arc::new(Semaphore::new(config.workers)),
                    accepting: AtomicBool::new(true),
                    counters: QueueCounters::default(),
                };
                (name.clone(), Arc::new(queue))
            })
            .collect();

        Self {
            queues,
            registry: Arc::new(RwLock::new(JobRegistry::default())),
            on_finished: None,
            interrupt: watch::channel(false).0,
        }
    }

    /// Override the timeout of one queue.
    pub fn with_timeout(mut self, queue: &str, timeout: Duration) -> Self {
        if let Some(existing) = self.queues.get(queue) {
            let replacement = NamedQueue {
                name: existing.name.clone(),
                workers: existing.workers,
                timeout,
                semaphore: Arc::new(Semaphore::new(existing.workers)),
                accepting: AtomicBool::new(true),
                counters: QueueCounters::default(),
            };
            self.queues.insert(queue.to_string(), Arc::new(replacement));
        }
        self
    }

    /// Register a callback run after each job reaches a final state.
    pub fn with_on_finished(mut self, callback: JobFinishedCallback) -> Self {
        self.on_finished = Some(callback);
        self
    }

    pub fn has_queue(&self, name: &str) -> bool {
        self.queues.contains_key(name)
    }

    /// Submit a job to a named queue.
    pub async fn enqueue(&self, queue: &str, job: Box<dyn Job>) -> Result<JobHandle, QueueError> {
        let named = self
            .queues
            .get(queue)
            .ok_or_else(|| QueueError::UnknownQueue(queue.to_string()))?;

        if !named.accepting.load(Ordering::SeqCst) {
            return Err(QueueError::Unavailable(queue.to_string()));
        }

        let id = Uuid::new_v4().to_string();
        let status = JobStatus {
            id: id.clone(),
            queue: queue.to_string(),
            label: job.label(),
            state: JobState::Queued,
            enqueued_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
        };

        self.registry.write().await.jobs.insert(id.clone(), status);
        named.counters.queued.fetch_add(1, Ordering::Relaxed);
        debug!(job_id = %id, queue, label = %job.label(), "Job enqueued");

        let task = tokio::spawn(Self::drive(
            Arc::clone(named),
            Arc::clone(&self.registry),
            self.on_finished.clone(),
            self.interrupt.subscribe(),
            id.clone(),
            job,
        ));

        Ok(JobHandle {
            id,
            queue: queue.to_string(),
            task,
        })
    }

    async fn drive(
        queue: Arc<NamedQueue>,
        registry: Arc<RwLock<JobRegistry>>,
        on_finished: Option<JobFinishedCallback>,
        mut interrupt: watch::Receiver<bool>,
        id: String,
        job: Box<dyn Job>,
    ) {
        let permit = match Arc::clone(&queue.semaphore).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                queue.counters.queued.fetch_sub(1, Ordering::Relaxed);
                queue.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(job_id = %id, queue = %queue.name, "Queue stopped before job ran");

                let failure = JobFailure::Shutdown;
                let message = failure.to_string();
                Self::notify_failure(job.as_ref(), &id, failure).await;
                Self::finish(&registry, &on_finished, &id, JobState::Failed, Some(message)).await;
                return;
            }
        };

        queue.counters.queued.fetch_sub(1, Ordering::Relaxed);
        queue.counters.active.fetch_add(1, Ordering::Relaxed);
        registry.write().await.update(&id, |status| {
            status.state = JobState::Running;
            status.started_at = Some(Utc::now());
        });
        debug!(job_id = %id, queue = %queue.name, "Job started");

        let run = tokio::time::timeout(
            queue.timeout,
            AssertUnwindSafe(job.run()).catch_unwind(),
        );
        let interrupted = async {
            // A dropped sender means the queue is gone, not interrupted
            let sender_dropped = interrupt.wait_for(|flag| *flag).await.is_err();
            if sender_dropped {
                std::future::pending::<()>().await;
            }
        };
        let outcome = tokio::select! {
            outcome = run => Some(outcome),
            _ = interrupted => None,
        };

        let (state, error) = match outcome {
            None => {
                warn!(job_id = %id, queue = %queue.name, "Job interrupted by shutdown");
                queue.counters.failed.fetch_add(1, Ordering::Relaxed);

                let failure = JobFailure::Interrupted;
                let text = failure.to_string();
                Self::notify_failure(job.as_ref(), &id, failure).await;
                (JobState::Failed, Some(text))
            }
            Some(Ok(Ok(()))) => {
                queue.counters.processed.fetch_add(1, Ordering::Relaxed);
                (JobState::Finished, None)
            }
            Some(Ok(Err(panic))) => {
                let message = panic_message(panic.as_ref());
                error!(job_id = %id, queue = %queue.name, panic = %message, "Job panicked");
                queue.counters.failed.fetch_add(1, Ordering::Relaxed);

                let failure = JobFailure::Panicked(message);
                let text = failure.to_string();
                Self::notify_failure(job.as_ref(), &id, failure).await;
                (JobState::Failed, Some(text))
            }
            Some(Err(_)) => {
                warn!(
                    job_id = %id,
                    queue = %queue.name,
                    timeout_secs = queue.timeout.as_secs(),
                    "Job timed out"
                );
                queue.counters.timed_out.fetch_add(1, Ordering::Relaxed);

                let failure = JobFailure::TimedOut(queue.timeout);
                let text = failure.to_string();
                Self::notify_failure(job.as_ref(), &id, failure).await;
                (JobState::TimedOut, Some(text))
            }
        };

        drop(permit);
        queue.counters.active.fetch_sub(1, Ordering::Relaxed);
        Self::finish(&registry, &on_finished, &id, state, error).await;
    }

    async fn notify_failure(job: &dyn Job, id: &str, failure: JobFailure) {
        if let Err(panic) = AssertUnwindSafe(job.fail(failure)).catch_unwind().await {
            error!(
                job_id = %id,
                panic = %panic_message(panic.as_ref()),
                "Job failure handler panicked"
            );
        }
    }

    async fn finish(
        registry: &RwLock<JobRegistry>,
        on_finished: &Option<JobFinishedCallback>,
        id: &str,
        state: JobState,
        error: Option<String>,
    ) {
        let snapshot = registry.write().await.update(id, |status| {
            status.state = state;
            status.finished_at = Some(Utc::now());
            status.error = error;
        });

        if let Some(snapshot) = snapshot {
            debug!(job_id = %id, state = state.as_str(), "Job done");
            if let Some(callback) = on_finished {
                callback(&snapshot);
            }
        }
    }

    /// Current status of a job, if it is still tracked.
    pub async fn job_status(&self, id: &str) -> Option<JobStatus> {
        self.registry.read().await.jobs.get(id).cloned()
    }

    /// Stats for every queue, sorted by name.
    pub fn stats(&self) -> Vec<QueueStats> {
        let mut stats: Vec<QueueStats> = self.queues.values().map(|q| q.stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    /// Stop accepting jobs on one queue; waiting jobs fail with `Shutdown`.
    pub fn stop_queue(&self, name: &str) -> Result<(), QueueError> {
        let queue = self
            .queues
            .get(name)
            .ok_or_else(|| QueueError::UnknownQueue(name.to_string()))?;
        queue.accepting.store(false, Ordering::SeqCst);
        queue.semaphore.close();
        info!(queue = name, "Queue stopped");
        Ok(())
    }

    fn active_jobs(&self) -> u64 {
        self.queues
            .values()
            .map(|q| q.counters.active.load(Ordering::Relaxed))
            .sum()
    }

    async fn wait_idle(&self, limit: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        while self.active_jobs() > 0 {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        true
    }

    /// Stop every queue and wait up to `grace` for running jobs to end.
    ///
    /// Jobs still running afterwards are dropped and failed with
    /// [`JobFailure::Interrupted`], so each one reaches a final state.
    pub async fn shutdown(&self, grace: Duration) {
        for name in self.queues.keys() {
            let _ = self.stop_queue(name);
        }

        if self.wait_idle(grace).await {
            return;
        }

        warn!(
            active = self.active_jobs(),
            "Shutdown grace period elapsed, interrupting running jobs"
        );
        self.interrupt.send_replace(true);

        if !self.wait_idle(INTERRUPT_DRAIN).await {
            error!(
                active = self.active_jobs(),
                "Interrupted jobs did not finish their failure handlers"
            );
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
