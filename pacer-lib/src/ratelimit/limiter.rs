use dashmap::DashMap;
use http::HeaderMap;
use log::{debug, trace};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use super::bucket::{Bucket, BucketState};
use super::headers::{
    parse_remaining, parse_reset, parse_retry_after, HeaderParseError, RateLimitHeaders,
};
use super::{BucketKey, RateLimitConfig};

/// Paces requests according to the rate limits reported by the server.
///
/// The `Limiter` holds one bucket per [`BucketKey`] plus a global cool-down
/// that applies to all keys. Buckets are created lazily on the first
/// [`acquire`](Limiter::acquire) and live as long as the limiter.
///
/// Waiting callers hold no lock, so they never block callers of other keys.
/// The flip side is that concurrent callers of one key may all see a call
/// left and go ahead together. The server answers the excess with
/// `429 Too Many Requests` and the next [`release`](Limiter::release)
/// corrects the local state.
///
/// # Examples
///
/// ```
/// use http::{HeaderMap, HeaderValue};
/// use pacer_lib::{BucketKey, Limiter};
///
/// let limiter = Limiter::new();
/// let key = BucketKey::from("/users/:id");
///
/// limiter.acquire(&key);
///
/// let mut headers = HeaderMap::new();
/// headers.insert("x-ratelimit-remaining", HeaderValue::from_static("5"));
/// limiter.release(&key, &headers);
///
/// assert_eq!(limiter.bucket_state(&key).unwrap().remaining, 5);
/// ```
#[derive(Debug, Default)]
pub struct Limiter {
    /// Buckets by key, created on demand and never removed
    buckets: DashMap<BucketKey, Arc<Bucket>>,

    /// No request may go out before this instant
    global: Mutex<Option<SystemTime>>,

    config: RateLimitConfig,
}

impl Limiter {
    /// Create an empty limiter without any global cool-down
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty limiter with the given configuration
    #[must_use]
    pub fn with_config(config: RateLimitConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// The configuration this limiter was created with
    #[must_use]
    pub const fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Block the current thread until a request for `key` may be sent.
    ///
    /// Waits for the global cool-down first, then for the bucket of `key` if
    /// it is exhausted, and finally uses up one call of the bucket.
    ///
    /// Do not call this from async code; use
    /// [`acquire_async`](Limiter::acquire_async) instead.
    pub fn acquire(&self, key: &BucketKey) {
        if let Some(wait) = self.global_wait(SystemTime::now()) {
            log_wait(key, "global rate limit", wait);
            std::thread::sleep(wait);
        }

        let bucket = self.get_or_create_bucket(key);

        if let Some(wait) = self.bucket_wait(&bucket, SystemTime::now()) {
            log_wait(key, "exhausted bucket", wait);
            std::thread::sleep(wait);
        }

        bucket.consume();
    }

    /// Like [`acquire`](Limiter::acquire), but suspends the task instead of
    /// blocking the thread.
    pub async fn acquire_async(&self, key: &BucketKey) {
        if let Some(wait) = self.global_wait(SystemTime::now()) {
            log_wait(key, "global rate limit", wait);
            tokio::time::sleep(wait).await;
        }

        let bucket = self.get_or_create_bucket(key);

        if let Some(wait) = self.bucket_wait(&bucket, SystemTime::now()) {
            log_wait(key, "exhausted bucket", wait);
            tokio::time::sleep(wait).await;
        }

        bucket.consume();
    }

    /// Update the state of `key` from the headers of a response.
    ///
    /// `Retry-After` (whole seconds) takes precedence over
    /// `X-RateLimit-Reset`. If `X-RateLimit-Global` is set as well, the delay
    /// applies to all keys. `X-RateLimit-Remaining` is applied last.
    ///
    /// This never fails. The first header that cannot be parsed ends the
    /// update; whatever was applied before it stays. Keys that were never
    /// acquired are ignored.
    pub fn release(&self, key: &BucketKey, headers: &HeaderMap) {
        let Some(bucket) = self.get_bucket(key) else {
            return;
        };

        let mut state = bucket.lock();
        let headers = RateLimitHeaders::from_headers(headers);
        if let Err(e) = self.update(&mut state, &headers) {
            debug!("Ignoring rest of rate limit headers for {key}: {e}");
        }
    }

    /// Apply the parsed headers to a locked bucket
    fn update(
        &self,
        state: &mut BucketState,
        headers: &RateLimitHeaders<'_>,
    ) -> Result<(), HeaderParseError> {
        if let Some(retry_after) = headers.retry_after {
            let at = parse_retry_after(retry_after, SystemTime::now())?;
            if headers.global {
                debug!("Server requested a global cool-down until {at:?}");
                *self.lock_global() = Some(at);
            } else {
                state.reset = Some(at);
            }
        } else if let Some(reset) = headers.reset {
            let reset = parse_reset(reset)?;
            state.reset = Some(
                reset
                    .checked_add(self.config.extra_delay)
                    .unwrap_or(reset),
            );
        }

        if let Some(remaining) = headers.remaining {
            state.remaining = parse_remaining(remaining)?;
        }

        Ok(())
    }

    /// Get a snapshot of the bucket for `key`, if one exists
    #[must_use]
    pub fn bucket_state(&self, key: &BucketKey) -> Option<BucketState> {
        self.get_bucket(key).map(|bucket| bucket.snapshot())
    }

    /// Number of buckets created so far
    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// The instant until which all requests are held back, if any
    #[must_use]
    pub fn global_cooldown(&self) -> Option<SystemTime> {
        *self.lock_global()
    }

    fn get_bucket(&self, key: &BucketKey) -> Option<Arc<Bucket>> {
        self.buckets.get(key).map(|bucket| bucket.value().clone())
    }

    fn get_or_create_bucket(&self, key: &BucketKey) -> Arc<Bucket> {
        if let Some(bucket) = self.get_bucket(key) {
            return bucket;
        }

        // The entry API locks the shard, so racing callers end up sharing
        // whichever bucket got inserted first
        self.buckets
            .entry(key.clone())
            .or_insert_with(|| {
                trace!("Creating bucket for {key}");
                Arc::default()
            })
            .value()
            .clone()
    }

    fn lock_global(&self) -> MutexGuard<'_, Option<SystemTime>> {
        self.global.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn global_wait(&self, now: SystemTime) -> Option<Duration> {
        let until = (*self.lock_global())?;
        until
            .duration_since(now)
            .ok()
            .filter(|wait| !wait.is_zero())
            .map(|wait| wait.saturating_add(self.config.extra_delay))
    }

    fn bucket_wait(&self, bucket: &Bucket, now: SystemTime) -> Option<Duration> {
        bucket
            .snapshot()
            .wait_time(now)
            .map(|wait| wait.saturating_add(self.config.extra_delay))
    }
}

fn log_wait(key: &BucketKey, reason: &str, wait: Duration) {
    debug!(
        "Delaying request for {key} by {}ms due to {reason}",
        wait.as_millis()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::{Instant, UNIX_EPOCH};
    use test_utils::{headers, reset_in};

    const EXTRA: Duration = Duration::from_millis(50);

    /// Slack for timestamps rounded to milliseconds
    const SLACK: Duration = Duration::from_millis(10);

    fn limiter() -> Limiter {
        Limiter::with_config(RateLimitConfig { extra_delay: EXTRA })
    }

    fn timed(f: impl FnOnce()) -> Duration {
        let start = Instant::now();
        f();
        start.elapsed()
    }

    #[test]
    fn test_first_acquire_does_not_block() {
        let limiter = limiter();
        let key = BucketKey::from("/users/:id");

        assert!(timed(|| limiter.acquire(&key)) < Duration::from_millis(50));
        assert_eq!(limiter.bucket_count(), 1);
        assert_eq!(limiter.bucket_state(&key).unwrap().remaining, 0);
    }

    #[test]
    fn test_exhausted_bucket_blocks_until_reset() {
        let limiter = limiter();
        let key = BucketKey::from("/users/:id");

        limiter.acquire(&key);
        let reset = Duration::from_millis(300);
        limiter.release(
            &key,
            &headers! {
                "X-RateLimit-Remaining" => "0",
                "X-RateLimit-Reset" => reset_in!(reset),
            },
        );

        // the reset instant carries one extra delay, the wait another
        let elapsed = timed(|| limiter.acquire(&key));
        assert!(elapsed >= reset + EXTRA * 2 - SLACK, "{elapsed:?}");

        // the window has reopened, but nothing told us about new calls
        let state = limiter.bucket_state(&key).unwrap();
        assert_eq!(state.remaining, 0);
        assert!(timed(|| limiter.acquire(&key)) < Duration::from_millis(50));
    }

    #[test]
    fn test_other_keys_are_not_blocked_by_exhausted_bucket() {
        let limiter = limiter();
        let exhausted = BucketKey::from("/a");

        limiter.acquire(&exhausted);
        limiter.release(&exhausted, &headers! { "Retry-After" => "10" });

        let other = BucketKey::from("/b");
        assert!(timed(|| limiter.acquire(&other)) < Duration::from_millis(50));
        assert_eq!(limiter.global_cooldown(), None);
    }

    #[test]
    fn test_remaining_update_lifts_exhaustion() {
        let limiter = limiter();
        let key = BucketKey::from("/users/:id");

        limiter.acquire(&key);
        assert_eq!(limiter.bucket_state(&key).unwrap().remaining, 0);

        limiter.release(
            &key,
            &headers! {
                "X-RateLimit-Remaining" => "5",
                "X-RateLimit-Reset" => reset_in!(Duration::from_secs(60)),
            },
        );
        assert_eq!(limiter.bucket_state(&key).unwrap().remaining, 5);

        assert!(timed(|| limiter.acquire(&key)) < Duration::from_millis(50));
        assert_eq!(limiter.bucket_state(&key).unwrap().remaining, 4);
    }

    #[test]
    fn test_retry_after_sets_bucket_reset() {
        let limiter = limiter();
        let key = BucketKey::from("/users/:id");
        limiter.acquire(&key);

        let before = SystemTime::now();
        limiter.release(&key, &headers! { "Retry-After" => "2" });
        let after = SystemTime::now();

        let reset = limiter.bucket_state(&key).unwrap().reset.unwrap();
        assert!(reset >= before + Duration::from_secs(2));
        assert!(reset <= after + Duration::from_secs(2));
        assert_eq!(limiter.global_cooldown(), None);
    }

    #[test]
    fn test_global_retry_after_sets_cooldown() {
        let limiter = limiter();
        let key = BucketKey::from("/users/:id");
        limiter.acquire(&key);

        let before = SystemTime::now();
        limiter.release(
            &key,
            &headers! {
                "Retry-After" => "2",
                "X-RateLimit-Global" => "true",
            },
        );

        let global = limiter.global_cooldown().unwrap();
        assert!(global >= before + Duration::from_secs(2));
        // the bucket itself is left alone
        assert_eq!(limiter.bucket_state(&key).unwrap().reset, None);
    }

    #[test]
    fn test_reset_header_adds_extra_delay() {
        let limiter = limiter();
        let key = BucketKey::from("/users/:id");
        limiter.acquire(&key);

        limiter.release(&key, &headers! { "X-RateLimit-Reset" => "1470173023.5" });

        let expected = UNIX_EPOCH + Duration::from_millis(1_470_173_023_500) + EXTRA;
        assert_eq!(limiter.bucket_state(&key).unwrap().reset, Some(expected));
    }

    #[test]
    fn test_retry_after_takes_precedence_over_reset() {
        let limiter = limiter();
        let key = BucketKey::from("/users/:id");
        limiter.acquire(&key);

        let before = SystemTime::now();
        limiter.release(
            &key,
            &headers! {
                "Retry-After" => "5",
                "X-RateLimit-Reset" => "1470173023.5",
            },
        );

        let reset = limiter.bucket_state(&key).unwrap().reset.unwrap();
        assert!(reset >= before + Duration::from_secs(5));
    }

    #[test]
    fn test_malformed_remaining_is_ignored() {
        let limiter = limiter();
        let key = BucketKey::from("/users/:id");
        limiter.acquire(&key);
        let state = limiter.bucket_state(&key).unwrap();

        limiter.release(&key, &headers! { "X-RateLimit-Remaining" => "abc" });

        assert_eq!(limiter.bucket_state(&key).unwrap(), state);
    }

    #[test]
    fn test_reset_survives_malformed_remaining() {
        let limiter = limiter();
        let key = BucketKey::from("/users/:id");
        limiter.acquire(&key);

        limiter.release(
            &key,
            &headers! {
                "Retry-After" => "3",
                "X-RateLimit-Remaining" => "abc",
            },
        );

        let state = limiter.bucket_state(&key).unwrap();
        assert!(state.reset.is_some());
        assert_eq!(state.remaining, 0);
    }

    #[test]
    fn test_malformed_retry_after_suppresses_remaining() {
        let limiter = limiter();
        let key = BucketKey::from("/users/:id");
        limiter.acquire(&key);

        limiter.release(
            &key,
            &headers! {
                "Retry-After" => "soon",
                "X-RateLimit-Remaining" => "7",
            },
        );

        let state = limiter.bucket_state(&key).unwrap();
        assert_eq!(state, BucketState { remaining: 0, reset: None });
    }

    #[test]
    fn test_malformed_reset_suppresses_remaining() {
        let limiter = limiter();
        let key = BucketKey::from("/users/:id");
        limiter.acquire(&key);

        limiter.release(
            &key,
            &headers! {
                "X-RateLimit-Reset" => "tomorrow",
                "X-RateLimit-Remaining" => "7",
            },
        );

        assert_eq!(limiter.bucket_state(&key).unwrap().remaining, 0);
    }

    #[test]
    fn test_negative_retry_after_still_applies_remaining() {
        let limiter = limiter();
        let key = BucketKey::from("/users/:id");
        limiter.acquire(&key);

        let before = SystemTime::now();
        limiter.release(
            &key,
            &headers! {
                "Retry-After" => "-1",
                "X-RateLimit-Remaining" => "5",
            },
        );

        let state = limiter.bucket_state(&key).unwrap();
        assert_eq!(state.remaining, 5);
        assert!(state.reset.unwrap() < before);
        assert!(timed(|| limiter.acquire(&key)) < Duration::from_millis(50));
    }

    #[test]
    fn test_negative_reset_still_applies_remaining() {
        let limiter = limiter();
        let key = BucketKey::from("/users/:id");
        limiter.acquire(&key);

        limiter.release(
            &key,
            &headers! {
                "X-RateLimit-Reset" => "-5.0",
                "X-RateLimit-Remaining" => "5",
            },
        );

        let state = limiter.bucket_state(&key).unwrap();
        assert_eq!(state.remaining, 5);
        assert_eq!(state.reset, Some(UNIX_EPOCH - Duration::from_secs(5) + EXTRA));
    }

    #[test]
    fn test_global_cooldown_blocks_thread() {
        let limiter = limiter();
        let limited = BucketKey::from("/users/:id");
        limiter.acquire(&limited);
        limiter.release(
            &limited,
            &headers! {
                "Retry-After" => "1",
                "X-RateLimit-Global" => "true",
            },
        );

        let elapsed = timed(|| limiter.acquire(&BucketKey::from("/guilds/:id")));
        assert!(elapsed >= Duration::from_secs(1) + EXTRA - SLACK, "{elapsed:?}");
        // the cool-down has passed
        assert!(timed(|| limiter.acquire(&limited)) < Duration::from_millis(50));
    }

    #[test]
    fn test_release_of_unknown_key_is_a_noop() {
        let limiter = limiter();
        let key = BucketKey::from("/never/acquired");

        limiter.release(
            &key,
            &headers! {
                "Retry-After" => "2",
                "X-RateLimit-Global" => "true",
                "X-RateLimit-Remaining" => "5",
            },
        );

        assert_eq!(limiter.bucket_count(), 0);
        assert_eq!(limiter.bucket_state(&key), None);
        assert_eq!(limiter.global_cooldown(), None);
    }

    #[test]
    fn test_release_without_rate_limit_headers() {
        let limiter = limiter();
        let key = BucketKey::from("/users/:id");
        limiter.acquire(&key);

        limiter.release(&key, &HeaderMap::new());

        assert_eq!(
            limiter.bucket_state(&key).unwrap(),
            BucketState { remaining: 0, reset: None }
        );
    }

    #[test]
    fn test_concurrent_creation_yields_one_bucket() {
        let limiter = limiter();
        let key = BucketKey::from("/users/:id");

        let buckets: Vec<Arc<Bucket>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| limiter.get_or_create_bucket(&key)))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(limiter.bucket_count(), 1);
        assert!(buckets.iter().all(|b| Arc::ptr_eq(b, &buckets[0])));
    }

    #[test]
    fn test_default_config() {
        assert_eq!(Limiter::new().config().extra_delay, Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_global_cooldown_blocks_every_key() {
        let limiter = limiter();
        let key = BucketKey::from("/users/:id");
        limiter.acquire_async(&key).await;

        limiter.release(
            &key,
            &headers! {
                "Retry-After" => "2",
                "X-RateLimit-Global" => "true",
            },
        );

        // a key that has never been used
        let start = tokio::time::Instant::now();
        limiter.acquire_async(&BucketKey::from("/unrelated")).await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(2) + EXTRA - SLACK, "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(3), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_global_cooldown_blocks_same_key() {
        let limiter = limiter();
        let key = BucketKey::from("/users/:id");
        limiter.acquire_async(&key).await;
        limiter.release(
            &key,
            &headers! {
                "Retry-After" => "2",
                "X-RateLimit-Global" => "true",
                "X-RateLimit-Remaining" => "10",
            },
        );

        let start = tokio::time::Instant::now();
        limiter.acquire_async(&key).await;
        assert!(start.elapsed() >= Duration::from_secs(2) + EXTRA - SLACK);
        assert_eq!(limiter.bucket_state(&key).unwrap().remaining, 9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bucket_retry_after_only_blocks_its_key() {
        let limiter = limiter();
        let key = BucketKey::from("/users/:id");
        limiter.acquire_async(&key).await;
        limiter.release(&key, &headers! { "Retry-After" => "2" });

        let start = tokio::time::Instant::now();
        limiter.acquire_async(&BucketKey::from("/other")).await;
        assert_eq!(start.elapsed(), Duration::ZERO);

        limiter.acquire_async(&key).await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(2) + EXTRA - SLACK, "{elapsed:?}");
    }
}
