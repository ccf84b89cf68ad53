//! Per-endpoint rate limiting driven by server feedback.
//!
//! The server tells us how many calls are left in the current window and when
//! the window resets. This module keeps that state around so the next request
//! to the same endpoint can wait instead of getting rejected.
//!
//! # Architecture
//!
//! - [`BucketKey`]: Identifies the endpoint a request is paced under
//! - [`BucketState`]: The quota of one endpoint (`remaining` calls, `reset` instant)
//! - [`Limiter`]: Registry of buckets plus the global cool-down
//! - [`RateLimitConfig`]: Tunables, currently the extra safety delay

mod bucket;
mod config;
pub(crate) mod headers;
mod key;
mod limiter;

pub use bucket::BucketState;
pub use config::{RateLimitConfig, EXTRA_DELAY};
pub use key::BucketKey;
pub use limiter::Limiter;
