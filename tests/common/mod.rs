#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::sleep;

use notification_dispatcher::{
    ChannelAdapter, ChannelKind, Notification, NotificationId, NotificationStatus, Repository,
    SendFailure, SendRequest,
};

/// Test adapter that replays scripted outcomes in order, then succeeds.
pub struct ScriptedAdapter {
    kind: ChannelKind,
    calls: AtomicU32,
    script: Mutex<VecDeque<Result<(), SendFailure>>>,
}

impl ScriptedAdapter {
    pub fn new(kind: ChannelKind) -> Self {
        Self {
            kind,
            calls: AtomicU32::new(0),
            script: Mutex::new(VecDeque::new()),
        }
    }

    pub async fn push_outcome(&self, outcome: Result<(), SendFailure>) {
        self.script.lock().await.push_back(outcome);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChannelAdapter for ScriptedAdapter {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    async fn send(&self, _request: &SendRequest) -> Result<(), SendFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock().await;
        script.pop_front().unwrap_or(Ok(()))
    }
}

/// Poll the repository until the notification reaches the given status.
pub async fn wait_for_status(
    repo: &dyn Repository,
    id: &NotificationId,
    status: NotificationStatus,
) -> Notification {
    for _ in 0..200 {
        if let Some(notification) = repo.notification(id).await {
            if notification.status == status {
                return notification;
            }
        }
        sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for notification {} to become {}", id, status);
}
