use std::fmt;
use std::sync::Arc;

use crate::repository::Repository;
use crate::types::{ChannelKind, Notification};

const HOUR_SECS: u64 = 3_600;
const DAY_SECS: u64 = 86_400;

/// Verdict for a due notification.
///
/// A denial causes the caller to cancel the notification; it never silently
/// vanishes and never consumes a retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// The recipient opted out of this channel for this category.
    ChannelDisabled(ChannelKind),
    /// The current time falls inside the recipient's quiet-hours window.
    QuietHours,
    /// The category's hourly send cap is already met.
    HourlyCapReached,
    /// The category's daily send cap is already met.
    DailyCapReached,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::ChannelDisabled(channel) =>
                write!(f, "{} disabled by preference", channel),
            DenyReason::QuietHours =>
                write!(f, "inside quiet hours"),
            DenyReason::HourlyCapReached =>
                write!(f, "hourly rate cap reached"),
            DenyReason::DailyCapReached =>
                write!(f, "daily rate cap reached"),
        }
    }
}

/// Gates due notifications on preferences, quiet hours and rate caps.
///
/// All three checks are read-only against the repository; the first failing
/// check wins. Rate caps are aggregate queries over already-persisted sends,
/// so concurrent schedulers can overshoot slightly — a soft limit.
pub struct EligibilityFilter {
    repo: Arc<dyn Repository>,
}

impl EligibilityFilter {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }

    pub async fn evaluate(&self, notification: &Notification, now: u64) -> Decision {
        if let Some(preference) = self
            .repo
            .preference(&notification.recipient, &notification.category)
            .await
        {
            if !preference.allows(notification.channel) {
                return Decision::Deny(DenyReason::ChannelDisabled(notification.channel));
            }
        }

        if let Some(recipient) = self.repo.recipient(&notification.recipient).await {
            if let Some(quiet_hours) = recipient.quiet_hours {
                if quiet_hours.contains(minute_of_day(now)) {
                    return Decision::Deny(DenyReason::QuietHours);
                }
            }
        }

        if let Some(category) = self.repo.category(&notification.category).await {
            let hourly = self
                .repo
                .sent_count_since(&notification.category, now.saturating_sub(HOUR_SECS))
                .await;
            if hourly >= category.max_per_hour {
                return Decision::Deny(DenyReason::HourlyCapReached);
            }

            let daily = self
                .repo
                .sent_count_since(&notification.category, now.saturating_sub(DAY_SECS))
                .await;
            if daily >= category.max_per_day {
                return Decision::Deny(DenyReason::DailyCapReached);
            }
        }

        Decision::Allow
    }
}

/// Minute of day (UTC) for a unix timestamp.
pub(crate) fn minute_of_day(now_secs: u64) -> u16 {
    ((now_secs % DAY_SECS) / 60) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minute_of_day_wraps_at_midnight() {
        assert_eq!(minute_of_day(0), 0);
        assert_eq!(minute_of_day(DAY_SECS - 1), 1_439);
        assert_eq!(minute_of_day(DAY_SECS + 61), 1);
    }
}
