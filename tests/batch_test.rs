mod common;

use std::sync::Arc;
use std::time::Duration;

use notification_dispatcher::{
    now_secs, Batch, BatchId, BatchStatus, ChannelAdapter, ChannelKind, Dispatcher,
    DispatcherConfig, EmailAdapter, EmailConfig, InMemoryRepository, Notification,
    NotificationStatus, PermanentError, SendFailure,
};

use common::{wait_for_status, ScriptedAdapter};

fn test_config() -> DispatcherConfig {
    DispatcherConfig {
        poll_interval: Duration::from_millis(20),
        ..Default::default()
    }
}

async fn wait_for_counts(dispatcher: &Dispatcher, id: &BatchId, sent: u32, failed: u32) -> Batch {
    for _ in 0..200 {
        if let Some(batch) = dispatcher.batch(id).await {
            if batch.sent == sent && batch.failed == failed {
                return batch;
            }
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for batch {} counters ({}/{})", id, sent, failed);
}

#[tokio::test]
async fn run_batch_counts_sent_and_failed_members() {
    let repo = Arc::new(InMemoryRepository::new());
    let email = Arc::new(EmailAdapter::new(EmailConfig::new(
        "http://localhost/send",
        "noreply@example.com",
    )));
    let mut dispatcher = Dispatcher::new(
        test_config(),
        repo.clone(),
        vec![email as Arc<dyn ChannelAdapter>],
    );

    let batch = dispatcher.create_batch("launch", "product launch blast").await;

    // Members are scheduled in the future so only the batch trigger,
    // not the regular poll cycle, can dispatch them.
    let later = now_secs() + 3_600;
    for i in 0..10 {
        let destination = if i < 7 {
            format!("user{}@example.com", i)
        } else {
            // No '@': rejected by the email adapter as undeliverable.
            format!("user{}", i)
        };
        let notification =
            Notification::new(format!("u{}", i), "announce", ChannelKind::Email, "hi", "body")
                .with_destination(destination)
                .with_batch(batch.id.clone())
                .with_scheduled_at(later);
        dispatcher.submit(notification).await.unwrap();
    }

    let triggered = dispatcher.run_batch(&batch.id).await.unwrap();
    assert_eq!(triggered.status, BatchStatus::Completed);
    assert_eq!(triggered.total, 10);

    let done = wait_for_counts(&dispatcher, &batch.id, 7, 3).await;
    assert_eq!(done.total, 10);
    assert!(done.started_at.is_some());
    assert!(done.completed_at.is_some());

    dispatcher.shutdown().await;
}

#[tokio::test]
async fn run_batch_is_single_shot() {
    let repo = Arc::new(InMemoryRepository::new());
    let adapter = Arc::new(ScriptedAdapter::new(ChannelKind::Email));
    let mut dispatcher = Dispatcher::new(
        test_config(),
        repo.clone(),
        vec![adapter as Arc<dyn ChannelAdapter>],
    );

    let batch = dispatcher.create_batch("digest", "weekly digest").await;
    assert!(dispatcher.run_batch(&batch.id).await.is_some());

    // Already triggered; the claim on batch status loses.
    assert!(dispatcher.run_batch(&batch.id).await.is_none());

    let missing = BatchId::generate();
    assert!(dispatcher.run_batch(&missing).await.is_none());

    dispatcher.shutdown().await;
}

#[tokio::test]
async fn member_is_counted_once_across_manual_retry() {
    let repo = Arc::new(InMemoryRepository::new());
    let adapter = Arc::new(ScriptedAdapter::new(ChannelKind::Email));
    adapter
        .push_outcome(Err(SendFailure::Permanent(PermanentError::Rejected)))
        .await;

    let mut dispatcher = Dispatcher::new(
        test_config(),
        repo.clone(),
        vec![adapter.clone() as Arc<dyn ChannelAdapter>],
    );

    let batch = dispatcher.create_batch("invoices", "monthly invoices").await;
    let notification = Notification::new("u1", "billing", ChannelKind::Email, "invoice", "body")
        .with_destination("u1@example.com")
        .with_batch(batch.id.clone());
    let notification = dispatcher.submit(notification).await.unwrap();

    wait_for_status(&*repo, &notification.id, NotificationStatus::Failed).await;
    let counted = wait_for_counts(&dispatcher, &batch.id, 0, 1).await;
    assert_eq!(counted.failed, 1);

    // A manual retry that then succeeds must not move the counters again.
    dispatcher.manual_retry(&notification.id).await.unwrap();
    wait_for_status(&*repo, &notification.id, NotificationStatus::Sent).await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    let settled = dispatcher.batch(&batch.id).await.unwrap();
    assert_eq!(settled.sent, 0);
    assert_eq!(settled.failed, 1);

    dispatcher.shutdown().await;
}
