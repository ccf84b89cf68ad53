//! Handle rate limiting headers.
//!
//! There is no standard for these yet. The names used here are the ones sent
//! by Discord-style APIs: `X-RateLimit-Remaining`, `X-RateLimit-Reset`
//! (fractional Unix seconds), `X-RateLimit-Global` and the regular
//! `Retry-After` (integer seconds).

use http::{HeaderMap, HeaderValue};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

const RETRY_AFTER: &str = "retry-after";
const GLOBAL: &str = "x-ratelimit-global";
const REMAINING: &str = "x-ratelimit-remaining";
const RESET: &str = "x-ratelimit-reset";

#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum HeaderParseError {
    #[error("Header value of `{0}` contains invalid chars")]
    HeaderValueError(&'static str),

    #[error("Unable to parse Retry-After value '{0}'")]
    RetryAfter(String),

    #[error("Unable to parse X-RateLimit-Reset value '{0}'")]
    Reset(String),

    #[error("Unable to parse X-RateLimit-Remaining value '{0}'")]
    Remaining(String),
}

/// The rate limit related headers of a single response.
///
/// A header with an empty value counts as absent.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct RateLimitHeaders<'a> {
    /// Whether `Retry-After` applies to all buckets at once
    pub(crate) global: bool,
    pub(crate) retry_after: Option<&'a HeaderValue>,
    pub(crate) reset: Option<&'a HeaderValue>,
    pub(crate) remaining: Option<&'a HeaderValue>,
}

impl<'a> RateLimitHeaders<'a> {
    pub(crate) fn from_headers(headers: &'a HeaderMap) -> Self {
        Self {
            global: non_empty(headers, GLOBAL).is_some(),
            retry_after: non_empty(headers, RETRY_AFTER),
            reset: non_empty(headers, RESET),
            remaining: non_empty(headers, REMAINING),
        }
    }
}

fn non_empty<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a HeaderValue> {
    headers.get(name).filter(|value| !value.is_empty())
}

fn to_str<'a>(value: &'a HeaderValue, name: &'static str) -> Result<&'a str, HeaderParseError> {
    value
        .to_str()
        .map_err(|_| HeaderParseError::HeaderValueError(name))
}

/// Parse `Retry-After` as signed whole seconds and turn it into an instant
/// relative to `now`. Negative values yield an instant in the past.
///
/// Unlike RFC 7231, HTTP dates are not accepted.
pub(crate) fn parse_retry_after(
    value: &HeaderValue,
    now: SystemTime,
) -> Result<SystemTime, HeaderParseError> {
    let value = to_str(value, "Retry-After")?;
    let secs = value
        .parse::<i64>()
        .map_err(|_| HeaderParseError::RetryAfter(value.into()))?;
    let offset = Duration::from_secs(secs.unsigned_abs());
    let at = if secs < 0 {
        now.checked_sub(offset)
    } else {
        now.checked_add(offset)
    };
    at.ok_or_else(|| HeaderParseError::RetryAfter(value.into()))
}

/// How long a response asks us to hold off, from its `Retry-After` header.
///
/// `None` if the header is missing or malformed. Values in the past yield
/// [`Duration::ZERO`].
pub(crate) fn retry_after_delay(headers: &HeaderMap) -> Option<Duration> {
    let value = RateLimitHeaders::from_headers(headers).retry_after?;
    let now = SystemTime::now();
    let at = parse_retry_after(value, now).ok()?;
    Some(at.duration_since(now).unwrap_or_default())
}

/// Parse `X-RateLimit-Reset`, a Unix timestamp in seconds with a fractional
/// part. Negative timestamps lie before the epoch.
pub(crate) fn parse_reset(value: &HeaderValue) -> Result<SystemTime, HeaderParseError> {
    let value = to_str(value, "X-RateLimit-Reset")?;
    let invalid = || HeaderParseError::Reset(value.into());
    let secs = value.parse::<f64>().map_err(|_| invalid())?;
    // rejects NaN and infinite timestamps
    let offset = Duration::try_from_secs_f64(secs.abs()).map_err(|_| invalid())?;
    let at = if secs < 0.0 {
        UNIX_EPOCH.checked_sub(offset)
    } else {
        UNIX_EPOCH.checked_add(offset)
    };
    at.ok_or_else(invalid)
}

/// Parse `X-RateLimit-Remaining`, the calls left in the current window.
///
/// Only plain decimal digits are accepted, no sign.
pub(crate) fn parse_remaining(value: &HeaderValue) -> Result<u64, HeaderParseError> {
    let value = to_str(value, "X-RateLimit-Remaining")?;
    if !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(HeaderParseError::Remaining(value.into()));
    }
    value
        .parse::<u64>()
        .map_err(|_| HeaderParseError::Remaining(value.into()))
}
