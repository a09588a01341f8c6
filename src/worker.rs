use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::time::timeout;

use crate::batch::BatchCoordinator;
use crate::channel::{ChannelAdapter, SendRequest};
use crate::error::{PermanentError, SendFailure, TransientError};
use crate::repository::Repository;
use crate::retry::RetryDecision;
use crate::state::StateMachine;
use crate::types::{ChannelKind, Notification};

#[cfg(feature = "metrics")]
fn metric_inc(name: &'static str) {
    metrics::counter!(name).increment(1);
}

#[cfg(not(feature = "metrics"))]
fn metric_inc(_name: &'static str) {}

/// A claimed notification consumed by channel workers.
///
/// The notification is already `Processing` by the time it is enqueued;
/// the worker only runs the send attempt and records the outcome.
#[derive(Debug, Clone)]
pub(crate) struct Task {
    pub notification: Notification,
}

/// Shared context for all channel workers.
pub(crate) struct WorkerContext {
    pub state: Arc<StateMachine>,
    pub repo: Arc<dyn Repository>,
    pub batches: Arc<BatchCoordinator>,
    pub adapters: HashMap<ChannelKind, Arc<dyn ChannelAdapter>>,

    /// Global in-flight cap across all channels.
    pub global_semaphore: Arc<Semaphore>,

    /// Per-attempt timeout on the adapter's network call.
    pub send_timeout: Duration,
}

/// Main worker loop. One pool of these runs per channel kind, so a slow
/// gateway on one channel cannot starve the others.
pub(crate) async fn worker_loop(rx: Arc<Mutex<mpsc::Receiver<Task>>>, ctx: Arc<WorkerContext>) {
    loop {
        let task = {
            let mut guard = rx.lock().await;
            guard.recv().await
        };

        let Some(task) = task else { break };

        process_task(task, &ctx).await;
    }
}

/// Run one send attempt and record the outcome.
///
/// Failures never escape past here; they end up in the notification's
/// error field and delivery log.
async fn process_task(task: Task, ctx: &WorkerContext) {
    let notification = task.notification;

    let permit = match ctx.global_semaphore.acquire().await {
        Ok(permit) => permit,
        Err(_) => return,
    };

    let result = attempt_send(&notification, ctx).await;
    drop(permit);

    match result {
        Ok(()) => {
            metric_inc("notify.delivery.sent");
            if let Some(updated) = ctx.state.record_success(&notification).await {
                ctx.batches.note_terminal(&updated).await;
            }
        }
        Err(failure) => {
            metric_inc("notify.delivery.failure");
            let decision = ctx.state.record_failure(&notification, &failure).await;
            if decision == RetryDecision::GiveUp {
                if let Some(updated) = ctx.repo.notification(&notification.id).await {
                    ctx.batches.note_terminal(&updated).await;
                }
            } else {
                metric_inc("notify.delivery.retry_scheduled");
            }
        }
    }
}

async fn attempt_send(
    notification: &Notification,
    ctx: &WorkerContext,
) -> Result<(), SendFailure> {
    let Some(adapter) = ctx.adapters.get(&notification.channel) else {
        // No adapter registered for the channel; an ops fix can still
        // deliver this later, so classify transient.
        tracing::warn!(channel = %notification.channel, "no adapter registered");
        return Err(SendFailure::Transient(TransientError::Unknown));
    };

    let Some(destination) = resolve_destination(notification, &ctx.repo).await else {
        return Err(SendFailure::Permanent(PermanentError::InvalidDestination));
    };

    let request = SendRequest {
        destination,
        subject: notification.subject.clone(),
        body: notification.body.clone(),
        metadata: notification.metadata.clone(),
    };

    match timeout(ctx.send_timeout, adapter.send(&request)).await {
        Ok(result) => result,
        Err(_) => Err(SendFailure::Transient(TransientError::Timeout)),
    }
}

/// Explicit override wins; otherwise fall back to the recipient record.
async fn resolve_destination(
    notification: &Notification,
    repo: &Arc<dyn Repository>,
) -> Option<String> {
    if let Some(destination) = &notification.destination {
        if !destination.is_empty() {
            return Some(destination.clone());
        }
    }

    let recipient = repo.recipient(&notification.recipient).await?;
    match notification.channel {
        ChannelKind::Email => recipient.email,
        ChannelKind::Sms => recipient.phone,
        // Push gateways address devices by user-scoped token.
        ChannelKind::Push => Some(recipient.id.0),
    }
}
