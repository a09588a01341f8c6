use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::batch::BatchCoordinator;
use crate::channel::ChannelAdapter;
use crate::eligibility::{Decision, EligibilityFilter};
use crate::error::{StateError, ValidationError};
use crate::repository::Repository;
use crate::retry::RetryPolicy;
use crate::state::StateMachine;
use crate::types::{
    now_secs, Batch, BatchId, BatchStatus, ChannelKind, DeliveryLogEntry, Notification,
    NotificationId, NotificationStatus,
};
use crate::worker::{worker_loop, Task, WorkerContext};

#[cfg(feature = "metrics")]
fn metric_inc(name: &'static str) {
    metrics::counter!(name).increment(1);
}

#[cfg(not(feature = "metrics"))]
fn metric_inc(_name: &'static str) {}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Cadence of the polling loop.
    pub poll_interval: Duration,

    /// Maximum notifications claimed per poll cycle.
    pub claim_limit: usize,

    /// Worker count per channel kind.
    pub workers_per_channel: usize,

    /// Queue depth per channel kind.
    pub queue_size: usize,

    /// Per-attempt timeout on the adapter's network call.
    pub send_timeout: Duration,

    /// Processing rows untouched for this long are reverted to pending
    /// by the reconciliation sweep.
    pub stale_after_secs: u64,

    /// Global in-flight cap across all channels.
    pub max_in_flight: usize,

    pub retry: RetryPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            claim_limit: 100,
            workers_per_channel: 4,
            queue_size: 256,
            send_timeout: Duration::from_secs(30),
            stale_after_secs: 900,
            max_in_flight: 100,
            retry: RetryPolicy::default(),
        }
    }
}

/// Everything the poll loop and the batch trigger share.
struct Shared {
    repo: Arc<dyn Repository>,
    state: Arc<StateMachine>,
    filter: EligibilityFilter,
    batches: Arc<BatchCoordinator>,
    config: DispatcherConfig,
}

/// The dispatch scheduler.
///
/// Polls the repository for due pending notifications on a fixed cadence,
/// gates each through the eligibility filter, claims it via the state
/// machine's compare-and-set and hands it to a bounded worker pool for its
/// channel kind. Retry timing lives in `scheduled_at`, so a requeued
/// notification is picked up by a later poll cycle — and survives restarts.
pub struct Dispatcher {
    shared: Arc<Shared>,
    queues: HashMap<ChannelKind, mpsc::Sender<Task>>,
    is_running: Arc<AtomicBool>,
    notify: Arc<Notify>,
    poll_handle: Option<JoinHandle<()>>,
    worker_handles: Vec<JoinHandle<()>>,
}

impl Dispatcher {
    pub fn new(
        config: DispatcherConfig,
        repo: Arc<dyn Repository>,
        adapters: Vec<Arc<dyn ChannelAdapter>>,
    ) -> Self {
        let state = Arc::new(StateMachine::new(repo.clone(), config.retry.clone()));
        let batches = Arc::new(BatchCoordinator::new(repo.clone()));
        let filter = EligibilityFilter::new(repo.clone());

        let adapter_map: HashMap<ChannelKind, Arc<dyn ChannelAdapter>> =
            adapters.into_iter().map(|a| (a.kind(), a)).collect();

        let ctx = Arc::new(WorkerContext {
            state: state.clone(),
            repo: repo.clone(),
            batches: batches.clone(),
            adapters: adapter_map,
            global_semaphore: Arc::new(Semaphore::new(config.max_in_flight.max(1))),
            send_timeout: config.send_timeout,
        });

        let mut queues = HashMap::new();
        let mut worker_handles = Vec::new();

        for kind in ChannelKind::ALL {
            let (tx, rx) = mpsc::channel(config.queue_size.max(1));
            let rx = Arc::new(Mutex::new(rx));
            for _ in 0..config.workers_per_channel.max(1) {
                worker_handles.push(tokio::spawn(worker_loop(rx.clone(), ctx.clone())));
            }
            queues.insert(kind, tx);
        }

        let shared = Arc::new(Shared {
            repo,
            state,
            filter,
            batches,
            config,
        });

        let is_running = Arc::new(AtomicBool::new(true));
        let notify = Arc::new(Notify::new());

        let poll_shared = shared.clone();
        let poll_queues = queues.clone();
        let poll_running = is_running.clone();
        let poll_notify = notify.clone();

        let poll_handle = tokio::spawn(async move {
            loop {
                if !poll_running.load(Ordering::SeqCst) {
                    return;
                }

                poll_cycle(&poll_shared, &poll_queues).await;

                tokio::select! {
                    _ = poll_notify.notified() => {}
                    _ = sleep(poll_shared.config.poll_interval) => {}
                }
            }
        });

        Self {
            shared,
            queues,
            is_running,
            notify,
            poll_handle: Some(poll_handle),
            worker_handles,
        }
    }

    /// Accept a notification into the pipeline.
    ///
    /// Validation failures are the only errors surfaced to the caller;
    /// dispatch-path failures show up in `status` and `last_error` instead.
    pub async fn submit(
        &self,
        notification: Notification,
    ) -> Result<Notification, ValidationError> {
        let notification = self.shared.state.submit(notification).await?;
        metric_inc("notify.dispatch.submitted");
        if notification.scheduled_at <= now_secs() {
            self.notify.notify_one();
        }
        Ok(notification)
    }

    /// Cancel a pending notification.
    pub async fn cancel(&self, id: &NotificationId) -> Result<Notification, StateError> {
        self.shared.state.cancel(id).await
    }

    /// Requeue a failed notification with a fresh retry budget.
    pub async fn manual_retry(&self, id: &NotificationId) -> Result<Notification, StateError> {
        let notification = self.shared.state.manual_retry(id).await?;
        self.notify.notify_one();
        Ok(notification)
    }

    pub async fn notification(&self, id: &NotificationId) -> Option<Notification> {
        self.shared.repo.notification(id).await
    }

    pub async fn delivery_log(&self, id: &NotificationId) -> Vec<DeliveryLogEntry> {
        self.shared.repo.logs(id).await
    }

    pub async fn create_batch(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Batch {
        self.shared.batches.create_batch(name, description).await
    }

    pub async fn batch(&self, id: &BatchId) -> Option<Batch> {
        self.shared.repo.batch(id).await
    }

    /// Trigger a batch: claim it, record the member count and push every
    /// pending member through the per-notification pipeline.
    ///
    /// Completion tracks submission, not final delivery outcome, so a slow
    /// channel cannot hold the batch open. Returns `None` if the batch does
    /// not exist or was already triggered.
    pub async fn run_batch(&self, id: &BatchId) -> Option<Batch> {
        let now = now_secs();
        self.shared
            .repo
            .transition_batch(id, BatchStatus::Pending, BatchStatus::Processing, now)
            .await?;

        let members = self
            .shared
            .repo
            .batch_members(id, NotificationStatus::Pending)
            .await;
        self.shared
            .repo
            .set_batch_total(id, members.len() as u32)
            .await;

        tracing::info!(batch = %id, members = members.len(), "batch triggered");
        for member in &members {
            dispatch_one(&self.shared, &self.queues, member, now).await;
        }

        self.shared
            .repo
            .transition_batch(id, BatchStatus::Processing, BatchStatus::Completed, now_secs())
            .await
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Stop polling, drain the worker queues and join all tasks.
    pub async fn shutdown(&mut self) {
        self.is_running.store(false, Ordering::SeqCst);
        // notify_one stores a permit, so a poll task that is mid-cycle
        // rather than parked still wakes immediately instead of sleeping
        // out the rest of its interval.
        self.notify.notify_one();

        if let Some(handle) = self.poll_handle.take() {
            let _ = handle.await;
        }

        self.queues.clear();
        for handle in self.worker_handles.drain(..) {
            let _ = handle.await;
        }
    }
}

/// One poll cycle: reclaim stale work, then claim and dispatch due rows.
async fn poll_cycle(shared: &Shared, queues: &HashMap<ChannelKind, mpsc::Sender<Task>>) {
    let now = now_secs();

    reclaim_stale(shared, now).await;

    let due = shared
        .repo
        .due_notifications(now, shared.config.claim_limit)
        .await;
    for notification in &due {
        dispatch_one(shared, queues, notification, now).await;
    }
}

/// Revert processing rows abandoned by a crashed worker back to pending.
async fn reclaim_stale(shared: &Shared, now: u64) {
    let cutoff = now.saturating_sub(shared.config.stale_after_secs);
    for stale in shared.repo.stale_processing(cutoff).await {
        let reverted = shared
            .repo
            .transition(
                &stale.id,
                NotificationStatus::Processing,
                NotificationStatus::Pending,
                now,
            )
            .await;
        if reverted.is_some() {
            let entry =
                DeliveryLogEntry::new(stale.id.clone(), "pending", "reclaimed stalled attempt");
            shared.repo.append_log(&entry).await;
            metric_inc("notify.dispatch.reclaimed");
            tracing::warn!(id = %stale.id, "reclaimed stalled processing notification");
        }
    }
}

/// Gate, claim and enqueue a single pending notification.
async fn dispatch_one(
    shared: &Shared,
    queues: &HashMap<ChannelKind, mpsc::Sender<Task>>,
    notification: &Notification,
    now: u64,
) {
    match shared.filter.evaluate(notification, now).await {
        Decision::Deny(reason) => {
            let cancelled = shared
                .repo
                .transition(
                    &notification.id,
                    NotificationStatus::Pending,
                    NotificationStatus::Cancelled,
                    now,
                )
                .await;
            if cancelled.is_some() {
                let entry = DeliveryLogEntry::new(
                    notification.id.clone(),
                    "cancelled",
                    format!("suppressed: {}", reason),
                );
                shared.repo.append_log(&entry).await;
                metric_inc("notify.dispatch.suppressed");
                tracing::info!(id = %notification.id, reason = %reason, "notification suppressed");
            }
            return;
        }
        Decision::Allow => {}
    }

    // Sole concurrency gate: losing the compare-and-set means another
    // scheduler already claimed this notification.
    let Some(claimed) = shared.state.begin_attempt(&notification.id).await else {
        metric_inc("notify.dispatch.claim_conflict");
        return;
    };

    let Some(tx) = queues.get(&claimed.channel) else {
        return;
    };

    let id = claimed.id.clone();
    if tx.send(Task { notification: claimed }).await.is_err() {
        // Shutting down; release the claim so a later run retries it.
        shared
            .repo
            .transition(
                &id,
                NotificationStatus::Processing,
                NotificationStatus::Pending,
                now,
            )
            .await;
        return;
    }

    metric_inc("notify.dispatch.enqueued");
}
