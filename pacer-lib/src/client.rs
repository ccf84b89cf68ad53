//! An HTTP client that paces its requests through a [`Limiter`].
//!
//! Every request is mapped to a [`BucketKey`] via
//! [`BucketKey::from_route`]. Before sending, the client waits on the
//! limiter; afterwards the response headers are fed back into it. Responses
//! with status `429 Too Many Requests` are retried once the delay named in
//! their `Retry-After` header has passed.
use http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use log::{debug, warn};
use reqwest::{Request, Response, Url};
use std::{sync::Arc, time::Duration};
use typed_builder::TypedBuilder;

use crate::ratelimit::headers::retry_after_delay;
use crate::{BucketKey, ErrorKind, Limiter, RateLimitConfig, Result};

/// Default number of retries after a `429 Too Many Requests`, 3.
pub const DEFAULT_MAX_RETRIES: u64 = 3;
/// Default user agent, `pacer/<PKG_VERSION>`.
pub const DEFAULT_USER_AGENT: &str = concat!("pacer/", env!("CARGO_PKG_VERSION"));

/// Builder for [`RateLimitedClient`].
#[derive(TypedBuilder, Debug, Clone)]
#[builder(field_defaults(default, setter(into)))]
#[builder(builder_method(doc = "
Start configuring a rate limited client.

Every setter is optional. Call `.build()` followed by `.client()` to get a
[`RateLimitedClient`].
"))]
pub struct ClientBuilder {
    /// Configuration of the limiter shared by all requests of the client.
    rate_limit: RateLimitConfig,
    /// Maximum number of retries after the server answered with `429 Too
    /// Many Requests`.
    #[builder(default = DEFAULT_MAX_RETRIES)]
    max_retries: u64,
    /// User-agent sent with every request.
    #[builder(default_code = "String::from(DEFAULT_USER_AGENT)")]
    user_agent: String,
    /// Sets the default [headers] for every request.
    ///
    /// [headers]: https://docs.rs/http/latest/http/header/struct.HeaderName.html
    custom_headers: HeaderMap,
    /// Response timeout per request.
    timeout: Option<Duration>,
}

impl Default for ClientBuilder {
    #[must_use]
    #[inline]
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ClientBuilder {
    /// Instantiates a [`RateLimitedClient`] with a fresh [`Limiter`].
    ///
    /// # Errors
    ///
    /// Returns an `Err` if the request client cannot be created.
    /// See [here](https://docs.rs/reqwest/latest/reqwest/struct.ClientBuilder.html#errors).
    pub fn client(self) -> Result<RateLimitedClient> {
        let limiter = Arc::new(Limiter::with_config(self.rate_limit));
        self.client_with_limiter(limiter)
    }

    /// Instantiates a [`RateLimitedClient`] sharing an existing [`Limiter`].
    ///
    /// # Errors
    ///
    /// Returns an `Err` if the request client cannot be created.
    pub fn client_with_limiter(self, limiter: Arc<Limiter>) -> Result<RateLimitedClient> {
        let Self {
            user_agent,
            custom_headers: mut headers,
            max_retries,
            timeout,
            ..
        } = self;

        if let Ok(value) = HeaderValue::from_str(&user_agent) {
            headers.insert(header::USER_AGENT, value);
        } else {
            warn!("Ignoring invalid user agent `{user_agent}`");
        }

        let builder = reqwest::ClientBuilder::new()
            .gzip(true)
            .default_headers(headers);

        let reqwest_client = (match timeout {
            Some(t) => builder.timeout(t),
            None => builder,
        })
        .build()
        .map_err(ErrorKind::BuildRequestClient)?;

        Ok(RateLimitedClient {
            reqwest_client,
            limiter,
            max_retries,
        })
    }
}

/// Sends requests while staying within the server's rate limits.
///
/// Cloning is cheap: clones share the same connection pool and [`Limiter`].
#[derive(Debug, Clone)]
pub struct RateLimitedClient {
    reqwest_client: reqwest::Client,
    limiter: Arc<Limiter>,
    max_retries: u64,
}

impl RateLimitedClient {
    /// The limiter shared by all requests of this client
    #[must_use]
    pub const fn limiter(&self) -> &Arc<Limiter> {
        &self.limiter
    }

    /// Send a request without a body to `url`.
    ///
    /// # Errors
    ///
    /// See [`RateLimitedClient::execute`]. Additionally, an unparsable URL
    /// results in [`ErrorKind::NetworkRequest`].
    pub async fn request<T: reqwest::IntoUrl>(&self, method: Method, url: T) -> Result<Response> {
        let request = self
            .reqwest_client
            .request(method, url)
            .build()
            .map_err(ErrorKind::NetworkRequest)?;
        self.execute(request).await
    }

    /// Send a `GET` request to `url`.
    ///
    /// # Errors
    ///
    /// See [`RateLimitedClient::request`].
    pub async fn get<T: reqwest::IntoUrl>(&self, url: T) -> Result<Response> {
        self.request(Method::GET, url).await
    }

    /// Send `request`, waiting for the rate limit first and retrying while
    /// the server answers `429 Too Many Requests`.
    ///
    /// Requests with a streaming body cannot be cloned and are sent only once.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::InvalidUrlHost`] if the URL has no host.
    /// - [`ErrorKind::NetworkRequest`] if sending fails.
    /// - [`ErrorKind::RateLimitExceeded`] if the server still answers 429
    ///   after all retries.
    pub async fn execute(&self, request: Request) -> Result<Response> {
        let key = BucketKey::from_route(request.method(), request.url())?;

        let mut attempts = 0;
        loop {
            let retry = if attempts < self.max_retries {
                request.try_clone()
            } else {
                None
            };
            let current = match retry {
                Some(clone) => clone,
                None => return self.send_final(&key, request, attempts + 1).await,
            };

            attempts += 1;
            let response = self.send(&key, current).await?;
            if response.status() != StatusCode::TOO_MANY_REQUESTS {
                return Ok(response);
            }
            debug!(
                "{} answered 429 for {key}, attempt {attempts} of {}",
                redact(request.url()),
                self.max_retries + 1
            );
            self.wait_before_retry(&key, &response).await;
        }
    }

    /// Hold off for as long as the 429 response asked.
    ///
    /// The limiter only honours a bucket's `Retry-After` once the bucket is
    /// exhausted, which a 429 does not imply.
    async fn wait_before_retry(&self, key: &BucketKey, response: &Response) {
        if let Some(delay) = retry_after_delay(response.headers()) {
            let wait = delay.saturating_add(self.limiter.config().extra_delay);
            debug!("Retrying request for {key} in {}ms", wait.as_millis());
            tokio::time::sleep(wait).await;
        }
    }

    /// Send the last permitted attempt, turning a 429 into an error
    async fn send_final(
        &self,
        key: &BucketKey,
        request: Request,
        attempts: u64,
    ) -> Result<Response> {
        let response = self.send(key, request).await?;
        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(ErrorKind::RateLimitExceeded {
                key: key.clone(),
                attempts,
            });
        }
        Ok(response)
    }

    async fn send(&self, key: &BucketKey, request: Request) -> Result<Response> {
        self.limiter.acquire_async(key).await;
        let response = self
            .reqwest_client
            .execute(request)
            .await
            .map_err(ErrorKind::NetworkRequest)?;
        self.limiter.release(key, response.headers());
        Ok(response)
    }
}

/// Strip credentials, query and fragment before logging a URL
fn redact(url: &Url) -> String {
    format!(
        "{}://{}{}",
        url.scheme(),
        url.host_str().unwrap_or_default(),
        url.path()
    )
}
