//! Reconnect delay policies.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry interval used by the log and shell streams.
pub const STREAM_RETRY_INTERVAL: Duration = Duration::from_secs(15);

/// First gateway reconnect delay; doubles on every failed attempt.
pub const GATEWAY_BASE_DELAY: Duration = Duration::from_secs(2);

/// Ceiling for a single gateway reconnect delay.
pub const GATEWAY_MAX_DELAY: Duration = Duration::from_secs(20);

/// Gateway reconnect attempts before giving up.
pub const GATEWAY_MAX_ATTEMPTS: u32 = 5;

/// How long to wait before reconnecting after a close or error.
///
/// Each endpoint picks its own policy; there is no global default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Same delay forever.
    Fixed {
        #[serde(with = "millis")]
        interval: Duration,
    },
    /// `base * 2^attempt`, clamped to `max`, for at most `max_attempts` retries.
    Exponential {
        #[serde(with = "millis")]
        base: Duration,
        #[serde(with = "millis")]
        max: Duration,
        max_attempts: u32,
    },
}

impl RetryPolicy {
    /// Fixed 15 second interval, retried indefinitely.
    #[must_use]
    pub const fn stream() -> Self {
        Self::Fixed {
            interval: STREAM_RETRY_INTERVAL,
        }
    }

    /// Doubling delay from 2s capped at 20s, abandoned after 5 attempts.
    #[must_use]
    pub const fn gateway() -> Self {
        Self::Exponential {
            base: GATEWAY_BASE_DELAY,
            max: GATEWAY_MAX_DELAY,
            max_attempts: GATEWAY_MAX_ATTEMPTS,
        }
    }

    /// Delay before retry number `attempt` (zero based).
    ///
    /// Returns `None` once the policy is exhausted.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        match *self {
            Self::Fixed { interval } => Some(interval),
            Self::Exponential {
                base,
                max,
                max_attempts,
            } => {
                if attempt >= max_attempts {
                    return None;
                }
                let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
                Some(base.checked_mul(factor).map_or(max, |d| d.min(max)))
            }
        }
    }

    /// Whether this policy ever stops retrying.
    #[must_use]
    pub const fn is_bounded(&self) -> bool {
        matches!(self, Self::Exponential { .. })
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::stream()
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
