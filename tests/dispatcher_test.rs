mod common;

use std::sync::Arc;
use std::time::Duration;

use notification_dispatcher::{
    now_secs, Category, ChannelAdapter, ChannelKind, Dispatcher, DispatcherConfig,
    InMemoryRepository, Notification, NotificationStatus, Preference, QuietHours, Recipient,
    Repository,
};

use common::{wait_for_status, ScriptedAdapter};

fn test_config() -> DispatcherConfig {
    DispatcherConfig {
        poll_interval: Duration::from_millis(20),
        ..Default::default()
    }
}

fn dispatcher_with(
    repo: Arc<InMemoryRepository>,
    adapter: Arc<ScriptedAdapter>,
) -> Dispatcher {
    Dispatcher::new(test_config(), repo, vec![adapter as Arc<dyn ChannelAdapter>])
}

#[tokio::test]
async fn delivers_due_notification() {
    let repo = Arc::new(InMemoryRepository::new());
    let adapter = Arc::new(ScriptedAdapter::new(ChannelKind::Email));
    let mut dispatcher = dispatcher_with(repo.clone(), adapter.clone());

    let notification = Notification::new("u1", "security", ChannelKind::Email, "alert", "body")
        .with_destination("u1@example.com");
    let notification = dispatcher.submit(notification).await.unwrap();

    let sent = wait_for_status(&*repo, &notification.id, NotificationStatus::Sent).await;
    assert!(sent.sent_at.is_some());
    assert_eq!(adapter.calls(), 1);

    let log = dispatcher.delivery_log(&notification.id).await;
    let statuses: Vec<&str> = log.iter().map(|entry| entry.status.as_str()).collect();
    assert_eq!(statuses, vec!["pending", "processing", "sent"]);

    dispatcher.shutdown().await;
    assert!(!dispatcher.is_running());
}

#[tokio::test]
async fn shutdown_returns_without_waiting_out_the_poll_interval() {
    let repo = Arc::new(InMemoryRepository::new());
    let adapter = Arc::new(ScriptedAdapter::new(ChannelKind::Email));
    let config = DispatcherConfig {
        poll_interval: Duration::from_secs(30),
        ..Default::default()
    };
    let mut dispatcher = Dispatcher::new(
        config,
        repo.clone(),
        vec![adapter as Arc<dyn ChannelAdapter>],
    );

    // Give the poll task work so shutdown can race a mid-cycle loop
    // instead of always finding it parked.
    let notification = Notification::new("u1", "security", ChannelKind::Email, "hi", "body")
        .with_destination("u1@example.com");
    dispatcher.submit(notification).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), dispatcher.shutdown())
        .await
        .expect("shutdown must not wait out the poll interval");
    assert!(!dispatcher.is_running());
}

#[tokio::test]
async fn future_notification_is_not_dispatched_early() {
    let repo = Arc::new(InMemoryRepository::new());
    let adapter = Arc::new(ScriptedAdapter::new(ChannelKind::Email));
    let mut dispatcher = dispatcher_with(repo.clone(), adapter.clone());

    let notification = Notification::new("u1", "security", ChannelKind::Email, "later", "body")
        .with_destination("u1@example.com")
        .with_scheduled_at(now_secs() + 3_600);
    let notification = dispatcher.submit(notification).await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    let current = repo.notification(&notification.id).await.unwrap();
    assert_eq!(current.status, NotificationStatus::Pending);
    assert_eq!(adapter.calls(), 0);

    dispatcher.shutdown().await;
}

#[tokio::test]
async fn disabled_preference_cancels_without_attempt() {
    let repo = Arc::new(InMemoryRepository::new());
    repo.upsert_preference(&Preference::new("u1", "marketing").with_channel(ChannelKind::Sms, false))
        .await;

    let adapter = Arc::new(ScriptedAdapter::new(ChannelKind::Sms));
    let mut dispatcher = dispatcher_with(repo.clone(), adapter.clone());

    let notification = Notification::new("u1", "marketing", ChannelKind::Sms, "", "promo")
        .with_destination("+15550000001");
    let notification = dispatcher.submit(notification).await.unwrap();

    let cancelled = wait_for_status(&*repo, &notification.id, NotificationStatus::Cancelled).await;
    // Denial is not a failure: no attempt, no retry consumed.
    assert_eq!(cancelled.retry_count, 0);
    assert_eq!(adapter.calls(), 0);

    let log = dispatcher.delivery_log(&notification.id).await;
    assert!(log.iter().any(|entry| entry.message.contains("suppressed")));

    dispatcher.shutdown().await;
}

#[tokio::test]
async fn quiet_hours_suppress_dispatch() {
    let repo = Arc::new(InMemoryRepository::new());
    // All-day window keeps the test independent of the wall clock; the
    // overnight-wrap semantics are pinned by the QuietHours unit tests.
    repo.upsert_recipient(
        &Recipient::new("u1")
            .with_email("u1@example.com")
            .with_quiet_hours(QuietHours::new(0, 1_439)),
    )
    .await;

    let adapter = Arc::new(ScriptedAdapter::new(ChannelKind::Email));
    let mut dispatcher = dispatcher_with(repo.clone(), adapter.clone());

    let notification =
        Notification::new("u1", "security", ChannelKind::Email, "alert", "body");
    let notification = dispatcher.submit(notification).await.unwrap();

    wait_for_status(&*repo, &notification.id, NotificationStatus::Cancelled).await;
    assert_eq!(adapter.calls(), 0);

    dispatcher.shutdown().await;
}

#[tokio::test]
async fn hourly_rate_cap_denies_when_met() {
    let repo = Arc::new(InMemoryRepository::new());
    repo.upsert_category(&Category::new("digest").with_rate_caps(1, 100)).await;

    // One send already on the books inside the trailing hour.
    let mut already_sent =
        Notification::new("u2", "digest", ChannelKind::Email, "old", "body");
    already_sent.status = NotificationStatus::Sent;
    already_sent.sent_at = Some(now_secs());
    repo.insert_notification(&already_sent).await;

    let adapter = Arc::new(ScriptedAdapter::new(ChannelKind::Email));
    let mut dispatcher = dispatcher_with(repo.clone(), adapter.clone());

    let notification = Notification::new("u1", "digest", ChannelKind::Email, "new", "body")
        .with_destination("u1@example.com");
    let notification = dispatcher.submit(notification).await.unwrap();

    wait_for_status(&*repo, &notification.id, NotificationStatus::Cancelled).await;
    assert_eq!(adapter.calls(), 0);

    dispatcher.shutdown().await;
}

#[tokio::test]
async fn transient_failure_requeues_with_backoff() {
    let repo = Arc::new(InMemoryRepository::new());
    let adapter = Arc::new(ScriptedAdapter::new(ChannelKind::Push));
    adapter
        .push_outcome(Err(notification_dispatcher::SendFailure::Transient(
            notification_dispatcher::TransientError::RemoteError,
        )))
        .await;

    let before = now_secs();
    let mut dispatcher = dispatcher_with(repo.clone(), adapter.clone());

    let notification = Notification::new("u1", "security", ChannelKind::Push, "hi", "body")
        .with_destination("device-token-1");
    let notification = dispatcher.submit(notification).await.unwrap();

    // First attempt fails; the notification goes back to pending with its
    // due time pushed out by the backoff delay (60 * 2^1 = 120s).
    for _ in 0..200 {
        let current = repo.notification(&notification.id).await.unwrap();
        if current.retry_count == 1 && current.status == NotificationStatus::Pending {
            assert!(current.scheduled_at >= before + 120);
            assert!(current.last_error.is_some());
            dispatcher.shutdown().await;
            assert_eq!(adapter.calls(), 1);
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("notification was never requeued");
}

#[tokio::test]
async fn stalled_processing_notification_is_reclaimed() {
    let repo = Arc::new(InMemoryRepository::new());
    let adapter = Arc::new(ScriptedAdapter::new(ChannelKind::Email));

    // A worker crashed mid-attempt long ago, leaving the row stuck.
    let mut stuck = Notification::new("u1", "security", ChannelKind::Email, "hi", "body")
        .with_destination("u1@example.com");
    stuck.status = NotificationStatus::Processing;
    stuck.updated_at = now_secs() - 10_000;
    repo.insert_notification(&stuck).await;

    let config = DispatcherConfig {
        poll_interval: Duration::from_millis(20),
        stale_after_secs: 900,
        ..Default::default()
    };
    let mut dispatcher = Dispatcher::new(
        config,
        repo.clone(),
        vec![adapter.clone() as Arc<dyn ChannelAdapter>],
    );

    let sent = wait_for_status(&*repo, &stuck.id, NotificationStatus::Sent).await;
    assert!(sent.sent_at.is_some());

    let log = dispatcher.delivery_log(&stuck.id).await;
    assert!(log.iter().any(|entry| entry.message.contains("reclaimed")));

    dispatcher.shutdown().await;
}

#[tokio::test]
async fn missing_destination_is_a_permanent_failure() {
    let repo = Arc::new(InMemoryRepository::new());
    // Recipient exists but has no phone on file.
    repo.upsert_recipient(&Recipient::new("u1").with_email("u1@example.com")).await;

    let adapter = Arc::new(ScriptedAdapter::new(ChannelKind::Sms));
    let mut dispatcher = dispatcher_with(repo.clone(), adapter.clone());

    let notification = Notification::new("u1", "security", ChannelKind::Sms, "", "body");
    let notification = dispatcher.submit(notification).await.unwrap();

    let failed = wait_for_status(&*repo, &notification.id, NotificationStatus::Failed).await;
    // Permanent: one attempt, no retries, adapter never reached.
    assert_eq!(failed.retry_count, 1);
    assert_eq!(adapter.calls(), 0);

    dispatcher.shutdown().await;
}

#[tokio::test]
async fn manual_retry_redelivers_after_failure() {
    let repo = Arc::new(InMemoryRepository::new());
    let adapter = Arc::new(ScriptedAdapter::new(ChannelKind::Email));
    adapter
        .push_outcome(Err(notification_dispatcher::SendFailure::Permanent(
            notification_dispatcher::PermanentError::Rejected,
        )))
        .await;

    let mut dispatcher = dispatcher_with(repo.clone(), adapter.clone());

    let notification = Notification::new("u1", "security", ChannelKind::Email, "hi", "body")
        .with_destination("u1@example.com");
    let notification = dispatcher.submit(notification).await.unwrap();

    wait_for_status(&*repo, &notification.id, NotificationStatus::Failed).await;

    dispatcher.manual_retry(&notification.id).await.unwrap();
    let sent = wait_for_status(&*repo, &notification.id, NotificationStatus::Sent).await;
    assert_eq!(sent.retry_count, 0);

    dispatcher.shutdown().await;
}
