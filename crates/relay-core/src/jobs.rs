//! Background job execution with job-level retry.
//!
//! `LocalJobQueue` runs relay tasks on a fixed pool of workers pulling from an
//! unbounded FIFO. A task that fails with a retryable error is re-queued after
//! the outer backoff delay without holding a worker while it waits; a task
//! that runs out of attempts becomes a `DeadTask` for an operator to inspect.

use std::sync::{
    atomic::{AtomicU64, AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tokio::{
    sync::{mpsc, Mutex, Notify},
    task::JoinHandle,
    time::sleep,
};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::{
    domain::{ChannelId, MessageId},
    retry::OuterRetryPolicy,
    task::{RelayTask, TaskState},
    Error, Result,
};

pub type JobId = u64;

/// Accepts relay tasks for background execution.
#[async_trait]
pub trait JobScheduler: Send + Sync {
    async fn enqueue(&self, task: RelayTask) -> Result<JobId>;
}

/// Entry point invoked by the scheduler for each attempt.
///
/// `cancel` is a fresh token per attempt; it fires on shutdown.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, task: &RelayTask, cancel: CancellationToken) -> Result<TaskState>;
}

/// A task abandoned after exhausting its outer retries.
#[derive(Clone, Debug, Serialize)]
pub struct DeadTask {
    pub job_id: JobId,
    pub rule_name: String,
    pub source_channel_id: ChannelId,
    pub source_message_id: MessageId,
    pub target_channel_id: ChannelId,
    pub attempts: u32,
    pub last_error: String,
    /// RFC 3339.
    pub failed_at: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub enqueued: u64,
    pub delivered: u64,
    pub duplicates: u64,
    pub retried: u64,
    pub cancelled: u64,
    pub failed: u64,
    pub dead: u64,
}

impl QueueStats {
    /// Count one state transition the queue observed.
    pub fn record(&mut self, state: TaskState) {
        match state {
            TaskState::Created => self.enqueued += 1,
            TaskState::Delivered => self.delivered += 1,
            TaskState::Duplicate => self.duplicates += 1,
            TaskState::FailedTransient => self.retried += 1,
            TaskState::Cancelled => self.cancelled += 1,
            TaskState::Failed => self.failed += 1,
            TaskState::Dead => self.dead += 1,
            // Decided before the task reaches the queue, or inside one attempt.
            TaskState::FilteredOut | TaskState::PeersResolved => {}
        }
    }
}

struct Job {
    id: JobId,
    task: RelayTask,
    attempt: u32,
}

#[derive(Clone)]
pub struct LocalJobQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    handler: Arc<dyn JobHandler>,
    policy: OuterRetryPolicy,
    tx: mpsc::UnboundedSender<Job>,
    rx: Mutex<mpsc::UnboundedReceiver<Job>>,
    shutdown: CancellationToken,
    next_id: AtomicU64,
    /// Jobs queued, running, or waiting out a backoff.
    in_flight: AtomicUsize,
    idle: Notify,
    state: Mutex<QueueState>,
}

#[derive(Default)]
struct QueueState {
    stats: QueueStats,
    dead: Vec<DeadTask>,
    workers: Vec<JoinHandle<()>>,
}

impl LocalJobQueue {
    /// Create the queue and spawn `workers` worker tasks.
    pub async fn start(
        handler: Arc<dyn JobHandler>,
        policy: OuterRetryPolicy,
        workers: usize,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = Self {
            inner: Arc::new(QueueInner {
                handler,
                policy,
                tx,
                rx: Mutex::new(rx),
                shutdown: CancellationToken::new(),
                next_id: AtomicU64::new(1),
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
                state: Mutex::new(QueueState::default()),
            }),
        };

        let workers = workers.max(1);
        let mut handles = Vec::with_capacity(workers);
        for n in 0..workers {
            let q = queue.clone();
            handles.push(tokio::spawn(async move { q.worker_loop(n).await }));
        }
        queue.inner.state.lock().await.workers = handles;
        tracing::info!(workers, "job queue started");
        queue
    }

    pub async fn stats(&self) -> QueueStats {
        self.inner.state.lock().await.stats
    }

    pub async fn dead_tasks(&self) -> Vec<DeadTask> {
        self.inner.state.lock().await.dead.clone()
    }

    /// Resolves once nothing is queued, running, or backing off.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.inner.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Cancel running attempts and pending backoffs, then join the workers.
    /// Jobs still queued are counted as cancelled.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let handles = std::mem::take(&mut self.inner.state.lock().await.workers);
        for h in handles {
            if let Err(e) = h.await {
                tracing::warn!(error = %e, "job worker ended abnormally");
            }
        }

        let mut dropped = 0u64;
        loop {
            let next = self.inner.rx.lock().await.try_recv();
            if next.is_err() {
                break;
            }
            dropped += 1;
            self.settle(TaskState::Cancelled).await;
        }
        if dropped > 0 {
            tracing::warn!(dropped, "queued jobs cancelled at shutdown");
        }
        tracing::info!("job queue stopped");
    }

    async fn worker_loop(&self, worker: usize) {
        loop {
            let job = {
                let mut rx = self.inner.rx.lock().await;
                tokio::select! {
                    biased;
                    _ = self.inner.shutdown.cancelled() => break,
                    job = rx.recv() => match job {
                        Some(job) => job,
                        None => break,
                    },
                }
            };
            self.process(worker, job).await;
        }
    }

    async fn process(&self, worker: usize, mut job: Job) {
        job.attempt += 1;
        let cancel = self.inner.shutdown.child_token();
        let span = tracing::info_span!(
            "job",
            id = job.id,
            worker,
            attempt = job.attempt,
            task = %job.task
        );
        let outcome = self
            .inner
            .handler
            .run(&job.task, cancel)
            .instrument(span)
            .await;

        match outcome {
            Ok(state) if state.is_terminal() => self.settle(state).await,
            Ok(state) => {
                tracing::error!(id = job.id, task = %job.task, ?state, "handler returned a non-terminal state");
                self.settle(TaskState::Failed).await;
            }
            Err(Error::Cancelled) => {
                tracing::info!(id = job.id, task = %job.task, "relay task cancelled");
                self.settle(TaskState::Cancelled).await;
            }
            Err(err) if self.inner.policy.allows_retry(job.attempt, &err) => {
                let delay = self.inner.policy.delay_for(job.attempt, &err);
                tracing::warn!(
                    id = job.id,
                    task = %job.task,
                    attempt = job.attempt,
                    delay_secs = delay.as_secs_f64(),
                    error = %err,
                    "relay task failed, scheduling retry"
                );
                self.settle(TaskState::FailedTransient).await;
                self.requeue_after(job, delay);
            }
            Err(err) if err.is_retryable() => {
                tracing::error!(
                    id = job.id,
                    task = %job.task,
                    attempts = job.attempt,
                    error = %err,
                    "relay task exhausted its retries, abandoning"
                );
                let dead = DeadTask {
                    job_id: job.id,
                    rule_name: job.task.rule.rule_name.clone(),
                    source_channel_id: ChannelId(job.task.raw_source_peer_id),
                    source_message_id: job.task.source_message_id,
                    target_channel_id: job.task.target_channel_id,
                    attempts: job.attempt,
                    last_error: err.to_string(),
                    failed_at: Utc::now().to_rfc3339(),
                };
                self.inner.state.lock().await.dead.push(dead);
                self.settle(TaskState::Dead).await;
            }
            Err(err) => {
                tracing::error!(id = job.id, task = %job.task, error = %err, "relay task failed permanently");
                self.settle(TaskState::Failed).await;
            }
        }
    }

    fn requeue_after(&self, job: Job, delay: std::time::Duration) {
        let q = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = q.inner.shutdown.cancelled() => q.settle(TaskState::Cancelled).await,
                _ = sleep(delay) => {
                    if q.inner.tx.send(job).is_err() {
                        q.settle(TaskState::Cancelled).await;
                    }
                }
            }
        });
    }

    /// Record `state`; a terminal state also releases the job's in-flight slot.
    async fn settle(&self, state: TaskState) {
        self.inner.state.lock().await.stats.record(state);
        if state.is_terminal() {
            self.finish();
        }
    }

    fn finish(&self) {
        if self.inner.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.idle.notify_waiters();
        }
    }
}

#[async_trait]
impl JobScheduler for LocalJobQueue {
    async fn enqueue(&self, task: RelayTask) -> Result<JobId> {
        if self.inner.shutdown.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner.in_flight.fetch_add(1, Ordering::SeqCst);
        let job = Job {
            id,
            task,
            attempt: 0,
        };
        if self.inner.tx.send(job).is_err() {
            self.finish();
            return Err(Error::External("job queue closed".into()));
        }
        self.inner.state.lock().await.stats.record(TaskState::Created);
        tracing::debug!(id, "relay task enqueued");
        Ok(id)
    }
}
