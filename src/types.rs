use std::collections::HashMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Unique identifier for a notification.
///
/// This is a strongly-typed wrapper to avoid accidental mixing
/// of notification IDs with other string identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotificationId(pub String);

impl NotificationId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique identifier for a recipient user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique name of a notification category.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CategoryName(pub String);

impl fmt::Display for CategoryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique identifier for a batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchId(pub String);

impl BatchId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Delivery mechanism for a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Email,
    Sms,
    Push,
}

impl ChannelKind {
    /// All channel kinds, in dispatch order.
    pub const ALL: [ChannelKind; 3] = [ChannelKind::Email, ChannelKind::Sms, ChannelKind::Push];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Email => "email",
            ChannelKind::Sms => "sms",
            ChannelKind::Push => "push",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a notification.
///
/// `Sent`, `Failed` and `Cancelled` are terminal; the only transition out
/// of a terminal state is `Failed -> Pending` via an explicit manual retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Pending,
    Processing,
    Sent,
    Failed,
    Cancelled,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Pending => "pending",
            NotificationStatus::Processing => "processing",
            NotificationStatus::Sent => "sent",
            NotificationStatus::Failed => "failed",
            NotificationStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NotificationStatus::Sent | NotificationStatus::Failed | NotificationStatus::Cancelled
        )
    }
}

impl fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unit of delivery.
///
/// A `Notification` is created `Pending` and driven to a terminal state by
/// the state machine. All timestamps are unix seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub recipient: UserId,
    pub category: CategoryName,
    pub channel: ChannelKind,
    pub status: NotificationStatus,

    pub subject: String,
    pub body: String,
    pub metadata: HashMap<String, serde_json::Value>,

    /// Explicit destination (address, phone, device token). When absent the
    /// destination is derived from the recipient record at dispatch time.
    pub destination: Option<String>,

    /// Batch this notification belongs to, if any.
    pub batch: Option<BatchId>,

    pub scheduled_at: u64,
    pub sent_at: Option<u64>,
    pub created_at: u64,
    pub updated_at: u64,

    pub retry_count: u32,
    pub max_retries: u32,
    pub last_error: Option<String>,
}

impl Notification {
    /// Create a new pending notification scheduled for immediate dispatch.
    ///
    /// Defaults:
    /// - scheduled_at: now
    /// - max_retries: 3
    pub fn new(
        recipient: impl Into<String>,
        category: impl Into<String>,
        channel: ChannelKind,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        let now = now_secs();
        Self {
            id: NotificationId::generate(),
            recipient: UserId(recipient.into()),
            category: CategoryName(category.into()),
            channel,
            status: NotificationStatus::Pending,
            subject: subject.into(),
            body: body.into(),
            metadata: HashMap::new(),
            destination: None,
            batch: None,
            scheduled_at: now,
            sent_at: None,
            created_at: now,
            updated_at: now,
            retry_count: 0,
            max_retries: 3,
            last_error: None,
        }
    }

    /// Override the destination instead of deriving it from the recipient.
    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    /// Defer dispatch until the given unix time.
    pub fn with_scheduled_at(mut self, scheduled_at: u64) -> Self {
        self.scheduled_at = scheduled_at;
        self
    }

    /// Set the maximum number of automatic retries.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Attach this notification to a batch.
    pub fn with_batch(mut self, batch: BatchId) -> Self {
        self.batch = Some(batch);
        self
    }

    /// Attach an arbitrary metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Quiet-hours window in minutes of day (0..1440).
///
/// Windows may cross midnight: `start > end` means the window wraps, e.g.
/// 22:00-06:00 covers late evening and early morning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuietHours {
    pub start_minute: u16,
    pub end_minute: u16,
}

impl QuietHours {
    pub fn new(start_minute: u16, end_minute: u16) -> Self {
        Self { start_minute, end_minute }
    }

    /// Whether the given minute of day falls inside the window.
    pub fn contains(&self, minute_of_day: u16) -> bool {
        if self.start_minute <= self.end_minute {
            self.start_minute <= minute_of_day && minute_of_day <= self.end_minute
        } else {
            minute_of_day >= self.start_minute || minute_of_day <= self.end_minute
        }
    }
}

/// A user that notifications can be addressed to.
///
/// Carries the default destinations used when a notification has no explicit
/// override, plus the optional quiet-hours window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipient {
    pub id: UserId,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub quiet_hours: Option<QuietHours>,
}

impl Recipient {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: UserId(id.into()),
            email: None,
            phone: None,
            quiet_hours: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn with_quiet_hours(mut self, quiet_hours: QuietHours) -> Self {
        self.quiet_hours = Some(quiet_hours);
        self
    }
}

/// Delivery policy bucket.
///
/// Categories are read-only configuration for the eligibility filter;
/// dispatch never mutates them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub name: CategoryName,
    /// 1=Low, 2=Medium, 3=High, 4=Critical.
    pub priority: u8,
    pub max_per_hour: u64,
    pub max_per_day: u64,
}

impl Category {
    /// Create a category with default rate caps (100/hour, 1000/day).
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: CategoryName(name.into()),
            priority: 1,
            max_per_hour: 100,
            max_per_day: 1_000,
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_rate_caps(mut self, max_per_hour: u64, max_per_day: u64) -> Self {
        self.max_per_hour = max_per_hour;
        self.max_per_day = max_per_day;
        self
    }
}

/// Digest frequency for a preference record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Immediate,
    Hourly,
    Daily,
    Weekly,
}

/// Per (user, category) opt-in record.
///
/// Absence of a record implies default-enabled on every channel with
/// immediate frequency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preference {
    pub user: UserId,
    pub category: CategoryName,
    pub email_enabled: bool,
    pub sms_enabled: bool,
    pub push_enabled: bool,
    pub frequency: Frequency,
}

impl Preference {
    pub fn new(user: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            user: UserId(user.into()),
            category: CategoryName(category.into()),
            email_enabled: true,
            sms_enabled: true,
            push_enabled: true,
            frequency: Frequency::Immediate,
        }
    }

    pub fn with_channel(mut self, channel: ChannelKind, enabled: bool) -> Self {
        match channel {
            ChannelKind::Email => self.email_enabled = enabled,
            ChannelKind::Sms => self.sms_enabled = enabled,
            ChannelKind::Push => self.push_enabled = enabled,
        }
        self
    }

    pub fn with_frequency(mut self, frequency: Frequency) -> Self {
        self.frequency = frequency;
        self
    }

    /// Whether this record allows delivery on the given channel.
    pub fn allows(&self, channel: ChannelKind) -> bool {
        match channel {
            ChannelKind::Email => self.email_enabled,
            ChannelKind::Sms => self.sms_enabled,
            ChannelKind::Push => self.push_enabled,
        }
    }
}

/// Lifecycle status of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Processing => "processing",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
        }
    }
}

/// A named group of notifications submitted together.
///
/// Counters are derived aggregates maintained by the batch coordinator;
/// they only ever increase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub id: BatchId,
    pub name: String,
    pub description: String,
    pub status: BatchStatus,
    pub total: u32,
    pub sent: u32,
    pub failed: u32,
    pub created_at: u64,
    pub started_at: Option<u64>,
    pub completed_at: Option<u64>,
}

impl Batch {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: BatchId::generate(),
            name: name.into(),
            description: description.into(),
            status: BatchStatus::Pending,
            total: 0,
            sent: 0,
            failed: 0,
            created_at: now_secs(),
            started_at: None,
            completed_at: None,
        }
    }
}

/// One append-only audit entry per state transition attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryLogEntry {
    pub notification: NotificationId,
    pub status: String,
    pub message: String,
    pub timestamp: u64,
}

impl DeliveryLogEntry {
    pub fn new(
        notification: NotificationId,
        status: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            notification,
            status: status.into(),
            message: message.into(),
            timestamp: now_secs(),
        }
    }
}

/// Current unix time in seconds.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_hours_same_day_window() {
        let window = QuietHours::new(9 * 60, 17 * 60);
        assert!(window.contains(12 * 60));
        assert!(window.contains(9 * 60));
        assert!(window.contains(17 * 60));
        assert!(!window.contains(8 * 60));
        assert!(!window.contains(18 * 60));
    }

    #[test]
    fn quiet_hours_overnight_window_wraps() {
        // 22:00 - 06:00
        let window = QuietHours::new(22 * 60, 6 * 60);
        assert!(window.contains(23 * 60));
        assert!(window.contains(2 * 60));
        assert!(window.contains(22 * 60));
        assert!(window.contains(6 * 60));
        assert!(!window.contains(12 * 60));
        assert!(!window.contains(21 * 60 + 59));
    }

    #[test]
    fn preference_defaults_allow_all_channels() {
        let pref = Preference::new("u1", "security");
        for kind in ChannelKind::ALL {
            assert!(pref.allows(kind));
        }
        let pref = pref.with_channel(ChannelKind::Sms, false);
        assert!(!pref.allows(ChannelKind::Sms));
        assert!(pref.allows(ChannelKind::Email));
    }
}
