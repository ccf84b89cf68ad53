use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Safety margin added to every computed wait.
///
/// Absorbs clock skew and network latency, so a request is never sent at the
/// exact instant the server still considers the window closed.
pub const EXTRA_DELAY: Duration = Duration::from_millis(250);

/// Configuration of a [`Limiter`](crate::Limiter)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Added to every wait and to every `X-RateLimit-Reset` instant
    #[serde(default = "default_extra_delay", with = "humantime_serde")]
    pub extra_delay: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            extra_delay: default_extra_delay(),
        }
    }
}

const fn default_extra_delay() -> Duration {
    EXTRA_DELAY
}

impl RateLimitConfig {
    /// Create a `RateLimitConfig` from CLI options, using defaults for missing values
    #[must_use]
    pub fn from_options(extra_delay: Option<Duration>) -> Self {
        Self {
            extra_delay: extra_delay.unwrap_or(EXTRA_DELAY),
        }
    }
}
