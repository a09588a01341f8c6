use std::sync::Arc;

use crate::repository::Repository;
use crate::types::{Batch, BatchId, Notification, NotificationStatus};

/// Maintains a batch's aggregate counters as members resolve.
///
/// Counters are monotonic and each notification contributes at most once,
/// at the point it first reaches `Sent` or `Failed`. A later manual retry
/// cycle does not move the counters again; the repository-side counted mark
/// makes the bump idempotent.
pub struct BatchCoordinator {
    repo: Arc<dyn Repository>,
}

impl BatchCoordinator {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }

    pub async fn create_batch(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Batch {
        let batch = Batch::new(name, description);
        self.repo.insert_batch(&batch).await;
        batch
    }

    pub async fn batch(&self, id: &BatchId) -> Option<Batch> {
        self.repo.batch(id).await
    }

    /// Called when a member notification reaches a terminal state.
    pub async fn note_terminal(&self, notification: &Notification) {
        let Some(batch_id) = &notification.batch else {
            return;
        };

        let (sent, failed) = match notification.status {
            NotificationStatus::Sent => (1, 0),
            NotificationStatus::Failed => (0, 1),
            // Cancelled members count toward neither aggregate.
            _ => return,
        };

        if !self.repo.mark_counted(&notification.id).await {
            return;
        }

        self.repo.add_batch_counts(batch_id, sent, failed).await;
        tracing::debug!(
            batch = %batch_id,
            id = %notification.id,
            status = %notification.status,
            "batch counter updated"
        );
    }
}
