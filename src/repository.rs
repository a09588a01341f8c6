use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::types::{
    Batch, BatchId, BatchStatus, Category, CategoryName, DeliveryLogEntry, Notification,
    NotificationId, NotificationStatus, Preference, Recipient, UserId,
};

/// Persistence boundary for the dispatch engine.
///
/// Workers may run across multiple processes, so the `transition` methods
/// must be atomic conditional updates against the backing store. Everything
/// else is plain CRUD plus the filtered queries and aggregate counts the
/// scheduler and eligibility filter need.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn insert_notification(&self, notification: &Notification);
    async fn notification(&self, id: &NotificationId) -> Option<Notification>;

    /// Optimistic full-row write, fenced on a prior snapshot: the write
    /// lands only if the stored status and `updated_at` still match
    /// `expected`. A row that was reclaimed or re-claimed in the meantime
    /// fails the check and the write is dropped.
    async fn update_if_unchanged(&self, notification: &Notification, expected: &Notification)
        -> bool;

    /// Atomic compare-and-set on status. Returns the updated row if this
    /// caller won the transition, `None` if the status was not `from`.
    async fn transition(
        &self,
        id: &NotificationId,
        from: NotificationStatus,
        to: NotificationStatus,
        now: u64,
    ) -> Option<Notification>;

    /// Pending notifications with `scheduled_at <= now`, oldest first.
    async fn due_notifications(&self, now: u64, limit: usize) -> Vec<Notification>;

    /// Processing notifications last touched at or before `cutoff`.
    /// Used by the reconciliation sweep to recover from worker crashes.
    async fn stale_processing(&self, cutoff: u64) -> Vec<Notification>;

    /// Members of a batch currently in the given status.
    async fn batch_members(&self, batch: &BatchId, status: NotificationStatus)
        -> Vec<Notification>;

    /// Notifications sent in this category at or after `since`.
    /// Feeds the rate-cap checks; eventually consistent by design.
    async fn sent_count_since(&self, category: &CategoryName, since: u64) -> u64;

    async fn append_log(&self, entry: &DeliveryLogEntry);
    async fn logs(&self, id: &NotificationId) -> Vec<DeliveryLogEntry>;

    async fn upsert_recipient(&self, recipient: &Recipient);
    async fn recipient(&self, id: &UserId) -> Option<Recipient>;

    async fn upsert_category(&self, category: &Category);
    async fn category(&self, name: &CategoryName) -> Option<Category>;

    async fn upsert_preference(&self, preference: &Preference);
    async fn preference(&self, user: &UserId, category: &CategoryName) -> Option<Preference>;

    async fn insert_batch(&self, batch: &Batch);
    async fn batch(&self, id: &BatchId) -> Option<Batch>;

    /// Record the member count for a triggered batch. Touches only the
    /// total so it cannot clobber concurrent counter bumps.
    async fn set_batch_total(&self, id: &BatchId, total: u32);

    /// Atomic compare-and-set on batch status. Sets `started_at` when
    /// entering `Processing` and `completed_at` when entering `Completed`.
    async fn transition_batch(
        &self,
        id: &BatchId,
        from: BatchStatus,
        to: BatchStatus,
        now: u64,
    ) -> Option<Batch>;

    /// Monotonic counter bump for a batch.
    async fn add_batch_counts(&self, id: &BatchId, sent: u32, failed: u32);

    /// Mark a batch member as counted toward aggregate counters.
    /// Returns false if it was already counted; a notification contributes
    /// to the counters at most once across retry cycles.
    async fn mark_counted(&self, id: &NotificationId) -> bool;
}

/// In-memory repository for tests and lightweight deployments.
#[derive(Default)]
pub struct InMemoryRepository {
    notifications: Mutex<HashMap<NotificationId, Notification>>,
    logs: Mutex<Vec<DeliveryLogEntry>>,
    recipients: Mutex<HashMap<UserId, Recipient>>,
    categories: Mutex<HashMap<CategoryName, Category>>,
    preferences: Mutex<HashMap<(UserId, CategoryName), Preference>>,
    batches: Mutex<HashMap<BatchId, Batch>>,
    counted: Mutex<HashSet<NotificationId>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn insert_notification(&self, notification: &Notification) {
        let mut guard = self.notifications.lock().await;
        guard.insert(notification.id.clone(), notification.clone());
    }

    async fn notification(&self, id: &NotificationId) -> Option<Notification> {
        let guard = self.notifications.lock().await;
        guard.get(id).cloned()
    }

    async fn update_if_unchanged(
        &self,
        notification: &Notification,
        expected: &Notification,
    ) -> bool {
        let mut guard = self.notifications.lock().await;
        let unchanged = guard.get(&notification.id).is_some_and(|stored| {
            stored.status == expected.status && stored.updated_at == expected.updated_at
        });
        if !unchanged {
            return false;
        }
        guard.insert(notification.id.clone(), notification.clone());
        true
    }

    async fn transition(
        &self,
        id: &NotificationId,
        from: NotificationStatus,
        to: NotificationStatus,
        now: u64,
    ) -> Option<Notification> {
        let mut guard = self.notifications.lock().await;
        let notification = guard.get_mut(id)?;
        if notification.status != from {
            return None;
        }
        notification.status = to;
        notification.updated_at = now;
        Some(notification.clone())
    }

    async fn due_notifications(&self, now: u64, limit: usize) -> Vec<Notification> {
        let guard = self.notifications.lock().await;
        let mut due: Vec<Notification> = guard
            .values()
            .filter(|n| n.status == NotificationStatus::Pending && n.scheduled_at <= now)
            .cloned()
            .collect();
        due.sort_by_key(|n| n.scheduled_at);
        due.truncate(limit);
        due
    }

    async fn stale_processing(&self, cutoff: u64) -> Vec<Notification> {
        let guard = self.notifications.lock().await;
        guard
            .values()
            .filter(|n| n.status == NotificationStatus::Processing && n.updated_at <= cutoff)
            .cloned()
            .collect()
    }

    async fn batch_members(
        &self,
        batch: &BatchId,
        status: NotificationStatus,
    ) -> Vec<Notification> {
        let guard = self.notifications.lock().await;
        guard
            .values()
            .filter(|n| n.batch.as_ref() == Some(batch) && n.status == status)
            .cloned()
            .collect()
    }

    async fn sent_count_since(&self, category: &CategoryName, since: u64) -> u64 {
        let guard = self.notifications.lock().await;
        guard
            .values()
            .filter(|n| {
                n.status == NotificationStatus::Sent
                    && &n.category == category
                    && n.sent_at.is_some_and(|at| at >= since)
            })
            .count() as u64
    }

    async fn append_log(&self, entry: &DeliveryLogEntry) {
        self.logs.lock().await.push(entry.clone());
    }

    async fn logs(&self, id: &NotificationId) -> Vec<DeliveryLogEntry> {
        let guard = self.logs.lock().await;
        guard
            .iter()
            .filter(|entry| &entry.notification == id)
            .cloned()
            .collect()
    }

    async fn upsert_recipient(&self, recipient: &Recipient) {
        let mut guard = self.recipients.lock().await;
        guard.insert(recipient.id.clone(), recipient.clone());
    }

    async fn recipient(&self, id: &UserId) -> Option<Recipient> {
        let guard = self.recipients.lock().await;
        guard.get(id).cloned()
    }

    async fn upsert_category(&self, category: &Category) {
        let mut guard = self.categories.lock().await;
        guard.insert(category.name.clone(), category.clone());
    }

    async fn category(&self, name: &CategoryName) -> Option<Category> {
        let guard = self.categories.lock().await;
        guard.get(name).cloned()
    }

    async fn upsert_preference(&self, preference: &Preference) {
        let mut guard = self.preferences.lock().await;
        guard.insert(
            (preference.user.clone(), preference.category.clone()),
            preference.clone(),
        );
    }

    async fn preference(&self, user: &UserId, category: &CategoryName) -> Option<Preference> {
        let guard = self.preferences.lock().await;
        guard.get(&(user.clone(), category.clone())).cloned()
    }

    async fn insert_batch(&self, batch: &Batch) {
        let mut guard = self.batches.lock().await;
        guard.insert(batch.id.clone(), batch.clone());
    }

    async fn batch(&self, id: &BatchId) -> Option<Batch> {
        let guard = self.batches.lock().await;
        guard.get(id).cloned()
    }

    async fn set_batch_total(&self, id: &BatchId, total: u32) {
        let mut guard = self.batches.lock().await;
        if let Some(batch) = guard.get_mut(id) {
            batch.total = total;
        }
    }

    async fn transition_batch(
        &self,
        id: &BatchId,
        from: BatchStatus,
        to: BatchStatus,
        now: u64,
    ) -> Option<Batch> {
        let mut guard = self.batches.lock().await;
        let batch = guard.get_mut(id)?;
        if batch.status != from {
            return None;
        }
        batch.status = to;
        match to {
            BatchStatus::Processing => batch.started_at = Some(now),
            BatchStatus::Completed | BatchStatus::Failed => batch.completed_at = Some(now),
            BatchStatus::Pending => {}
        }
        Some(batch.clone())
    }

    async fn add_batch_counts(&self, id: &BatchId, sent: u32, failed: u32) {
        let mut guard = self.batches.lock().await;
        if let Some(batch) = guard.get_mut(id) {
            batch.sent += sent;
            batch.failed += failed;
        }
    }

    async fn mark_counted(&self, id: &NotificationId) -> bool {
        let mut guard = self.counted.lock().await;
        guard.insert(id.clone())
    }
}
