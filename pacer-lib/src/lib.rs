//! `pacer` keeps a client within the rate limits of a remote HTTP API.
//!
//! The core is the [`Limiter`]: call [`Limiter::acquire`] before sending a
//! request and [`Limiter::release`] with the response headers afterwards.
//! Quota state is tracked per [`BucketKey`], plus one global cool-down that
//! blocks every key at once.
//!
//! ```
//! use http::HeaderMap;
//! use pacer_lib::{BucketKey, Limiter};
//!
//! let limiter = Limiter::new();
//! let key = BucketKey::from("GET /channels/:id/messages");
//!
//! limiter.acquire(&key);
//! // ... send the request, then feed the response headers back
//! limiter.release(&key, &HeaderMap::new());
//! ```
//!
//! For async code, [`RateLimitedClient`] wraps a `reqwest` client and does
//! the bookkeeping (including retries on `429 Too Many Requests`):
//!
//! ```no_run
//! use pacer_lib::{ClientBuilder, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = ClientBuilder::default().client()?;
//!     let response = client.get("https://api.example.com/users/42").await?;
//!     println!("{}", response.status());
//!     Ok(())
//! }
//! ```
#![warn(clippy::all, clippy::pedantic)]
#![warn(
    absolute_paths_not_starting_with_crate,
    rustdoc::invalid_html_tags,
    missing_copy_implementations,
    missing_debug_implementations,
    semicolon_in_expressions_from_macros,
    unreachable_pub,
    unused_extern_crates,
    variant_size_differences,
    clippy::missing_const_for_fn
)]
#![deny(anonymous_parameters, macro_use_extern_crate)]
#![deny(missing_docs)]

mod client;
mod types;

pub mod ratelimit;

pub use client::{ClientBuilder, RateLimitedClient, DEFAULT_MAX_RETRIES, DEFAULT_USER_AGENT};
pub use ratelimit::{BucketKey, BucketState, Limiter, RateLimitConfig, EXTRA_DELAY};
pub use types::{ErrorKind, Result};
