/// Exponential backoff policy for failed send attempts.
///
/// The policy is a pure function of the post-increment retry count:
/// `delay = base_delay_secs * 2^retry_count`, with no jitter. Retry timing
/// is realized through the notification's `scheduled_at` field, not an
/// in-memory timer, so requeued work survives process restarts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_delay_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { base_delay_secs: 60 }
    }
}

/// Next action after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// No further attempts; the notification becomes `Failed`.
    GiveUp,
    /// Requeue the notification, eligible again after the delay.
    RetryAfter { delay_secs: u64 },
}

impl RetryPolicy {
    pub fn new(base_delay_secs: u64) -> Self {
        Self { base_delay_secs }
    }

    /// Decide what to do after a failure, given the retry count *after*
    /// incrementing for the attempt that just failed.
    pub fn decide(&self, retry_count: u32, max_retries: u32) -> RetryDecision {
        if retry_count >= max_retries {
            return RetryDecision::GiveUp;
        }

        let pow = 2u64.saturating_pow(retry_count);
        RetryDecision::RetryAfter {
            delay_secs: self.base_delay_secs.saturating_mul(pow),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_retry() {
        let policy = RetryPolicy::new(60);

        assert_eq!(
            policy.decide(1, 3),
            RetryDecision::RetryAfter { delay_secs: 120 }
        );
        assert_eq!(
            policy.decide(2, 3),
            RetryDecision::RetryAfter { delay_secs: 240 }
        );
        assert_eq!(policy.decide(3, 3), RetryDecision::GiveUp);
    }

    #[test]
    fn gives_up_beyond_max() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.decide(5, 3), RetryDecision::GiveUp);
        assert_eq!(policy.decide(0, 0), RetryDecision::GiveUp);
    }

    #[test]
    fn large_counts_saturate_instead_of_overflowing() {
        let policy = RetryPolicy::new(u64::MAX / 2);
        match policy.decide(63, 100) {
            RetryDecision::RetryAfter { delay_secs } => assert_eq!(delay_secs, u64::MAX),
            RetryDecision::GiveUp => panic!("expected a retry"),
        }
    }
}
