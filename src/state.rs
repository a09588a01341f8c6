use std::sync::Arc;

use crate::error::{SendFailure, StateError, ValidationError};
use crate::repository::Repository;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::types::{
    now_secs, ChannelKind, DeliveryLogEntry, Notification, NotificationId, NotificationStatus,
};

/// Owns the lifecycle of individual notifications.
///
/// All transitions go through here; the dispatcher and manual admin calls
/// are just different entry points into the same operations. `begin_attempt`
/// is the single concurrency gate: it is a conditional compare-and-set on
/// status at the repository, so two workers racing on the same notification
/// resolve to exactly one winner even across processes.
pub struct StateMachine {
    repo: Arc<dyn Repository>,
    retry: RetryPolicy,
}

impl StateMachine {
    pub fn new(repo: Arc<dyn Repository>, retry: RetryPolicy) -> Self {
        Self { repo, retry }
    }

    /// Accept a new notification into `Pending`.
    ///
    /// Fails with `ValidationError` if the channel kind requires a field
    /// that is absent (email requires a non-empty subject).
    pub async fn submit(&self, notification: Notification) -> Result<Notification, ValidationError> {
        if notification.channel == ChannelKind::Email && notification.subject.trim().is_empty() {
            return Err(ValidationError::MissingSubject {
                channel: notification.channel,
            });
        }

        self.repo.insert_notification(&notification).await;
        self.log(&notification.id, "pending", "notification accepted").await;
        tracing::debug!(id = %notification.id, channel = %notification.channel, "notification submitted");
        Ok(notification)
    }

    /// Claim a pending notification for a send attempt.
    ///
    /// Returns `None` if the notification is not exactly `Pending` — a
    /// concurrent claim already happened, or the caller raced a cancel.
    /// That outcome is a skipped no-op, not an error.
    pub async fn begin_attempt(&self, id: &NotificationId) -> Option<Notification> {
        let claimed = self
            .repo
            .transition(
                id,
                NotificationStatus::Pending,
                NotificationStatus::Processing,
                now_secs(),
            )
            .await?;

        self.log(id, "processing", "starting send attempt").await;
        Some(claimed)
    }

    /// Record a successful send for a claimed attempt.
    ///
    /// `claimed` is the row `begin_attempt` handed back. The write is a
    /// single fenced update against that snapshot, so `sent_at` lands
    /// together with the status flip. If the reclamation sweep reverted
    /// the attempt and someone else re-claimed it, this write is dropped
    /// and `None` is returned.
    pub async fn record_success(&self, claimed: &Notification) -> Option<Notification> {
        if claimed.status != NotificationStatus::Processing {
            return None;
        }

        let now = now_secs();
        let mut notification = claimed.clone();
        notification.status = NotificationStatus::Sent;
        notification.sent_at = Some(now);
        notification.last_error = None;
        notification.updated_at = now;

        if !self.repo.update_if_unchanged(&notification, claimed).await {
            return None;
        }

        self.log(&claimed.id, "sent", "delivered successfully").await;
        tracing::info!(id = %claimed.id, channel = %notification.channel, "notification sent");
        Some(notification)
    }

    /// Record a failed send attempt for a claimed attempt and decide what
    /// happens next.
    ///
    /// Transient failures increment the retry count and either requeue the
    /// notification with its `scheduled_at` pushed out by the backoff delay,
    /// or mark it `Failed` once the retry budget is exhausted. Permanent
    /// failures skip retry entirely. Like `record_success`, the write is
    /// fenced on the claim snapshot: a late failure from a reclaimed
    /// attempt cannot clobber whoever claimed the notification since.
    pub async fn record_failure(
        &self,
        claimed: &Notification,
        failure: &SendFailure,
    ) -> RetryDecision {
        if claimed.status != NotificationStatus::Processing {
            return RetryDecision::GiveUp;
        }

        let now = now_secs();
        let mut notification = claimed.clone();
        notification.retry_count += 1;
        notification.last_error = Some(failure.to_string());
        notification.updated_at = now;

        let decision = if failure.is_permanent() {
            RetryDecision::GiveUp
        } else {
            self.retry.decide(notification.retry_count, notification.max_retries)
        };

        match decision {
            RetryDecision::RetryAfter { delay_secs } => {
                notification.status = NotificationStatus::Pending;
                notification.scheduled_at = now + delay_secs;
            }
            RetryDecision::GiveUp => {
                notification.status = NotificationStatus::Failed;
            }
        }

        if !self.repo.update_if_unchanged(&notification, claimed).await {
            // The attempt was reclaimed while this outcome was in flight;
            // it belongs to the new claim now.
            return RetryDecision::GiveUp;
        }

        match decision {
            RetryDecision::RetryAfter { delay_secs } => {
                self.log(
                    &claimed.id,
                    "retry",
                    format!("retry {}: {}", notification.retry_count, failure),
                )
                .await;
                tracing::warn!(
                    id = %claimed.id,
                    retry = notification.retry_count,
                    delay_secs,
                    error = %failure,
                    "send failed, requeued"
                );
            }
            RetryDecision::GiveUp => {
                let message = if failure.is_permanent() {
                    format!("permanent failure: {}", failure)
                } else {
                    format!("max retries exceeded: {}", failure)
                };
                self.log(&claimed.id, "failed", message).await;
                tracing::warn!(id = %claimed.id, error = %failure, "notification failed permanently");
            }
        }

        decision
    }

    /// Cancel a notification that has not been claimed yet.
    ///
    /// Once `begin_attempt` has claimed it, cancellation is rejected until
    /// the attempt resolves.
    pub async fn cancel(&self, id: &NotificationId) -> Result<Notification, StateError> {
        match self
            .repo
            .transition(
                id,
                NotificationStatus::Pending,
                NotificationStatus::Cancelled,
                now_secs(),
            )
            .await
        {
            Some(notification) => {
                self.log(id, "cancelled", "cancelled before dispatch").await;
                Ok(notification)
            }
            None => match self.repo.notification(id).await {
                Some(notification) => Err(StateError::InvalidState {
                    operation: "cancel",
                    status: notification.status,
                }),
                None => Err(StateError::NotFound { id: id.clone() }),
            },
        }
    }

    /// Requeue a failed notification from scratch.
    ///
    /// Resets the retry count, clears the error and schedules it for
    /// immediate dispatch. Only valid from `Failed`.
    pub async fn manual_retry(&self, id: &NotificationId) -> Result<Notification, StateError> {
        let now = now_secs();
        let Some(current) = self.repo.notification(id).await else {
            return Err(StateError::NotFound { id: id.clone() });
        };
        if current.status != NotificationStatus::Failed {
            return Err(StateError::InvalidState {
                operation: "retry",
                status: current.status,
            });
        }

        let mut notification = current.clone();
        notification.status = NotificationStatus::Pending;
        notification.retry_count = 0;
        notification.last_error = None;
        notification.scheduled_at = now;
        notification.updated_at = now;

        // Fenced like the worker-side resolutions; a racing retry request
        // or claim loses cleanly instead of clobbering.
        if !self.repo.update_if_unchanged(&notification, &current).await {
            return match self.repo.notification(id).await {
                Some(notification) => Err(StateError::InvalidState {
                    operation: "retry",
                    status: notification.status,
                }),
                None => Err(StateError::NotFound { id: id.clone() }),
            };
        }

        self.log(id, "retry", "manually requeued").await;
        Ok(notification)
    }

    async fn log(&self, id: &NotificationId, status: &str, message: impl Into<String>) {
        let entry = DeliveryLogEntry::new(id.clone(), status, message);
        self.repo.append_log(&entry).await;
    }
}
