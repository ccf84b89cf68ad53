use futures::stream::{self, StreamExt};
use http::{Method, StatusCode};
use log::{info, warn};
use pacer_lib::{ErrorKind, RateLimitedClient};
use std::fmt;
use std::io::Write;

/// Outcome of a single request
#[derive(Debug)]
pub(crate) enum Outcome {
    /// The server answered, with any status
    Response(StatusCode),
    /// No usable answer: network failure, invalid URL or rate limit exceeded
    Error(ErrorKind),
}

impl Outcome {
    pub(crate) fn is_success(&self) -> bool {
        matches!(self, Outcome::Response(status) if status.is_success())
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Response(status) => write!(f, "[{}]", status.as_u16()),
            Outcome::Error(_) => write!(f, "[ERROR]"),
        }
    }
}

/// Summary of a run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Stats {
    pub(crate) total: usize,
    pub(crate) successful: usize,
    pub(crate) failed: usize,
}

impl Stats {
    fn add(&mut self, outcome: &Outcome) {
        self.total += 1;
        if outcome.is_success() {
            self.successful += 1;
        } else {
            self.failed += 1;
        }
    }

    pub(crate) const fn is_success(&self) -> bool {
        self.failed == 0
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} total, {} ok, {} failed",
            self.total, self.successful, self.failed
        )
    }
}

/// Send one request per URL through `client`, at most `max_concurrency`
/// at a time, and write one line per response to `out`
pub(crate) async fn check<W: Write>(
    client: &RateLimitedClient,
    method: Method,
    urls: Vec<String>,
    max_concurrency: usize,
    out: &mut W,
) -> anyhow::Result<Stats> {
    let mut responses = stream::iter(urls)
        .map(|url| {
            let method = method.clone();
            async move {
                let outcome = request(client, method, &url).await;
                (url, outcome)
            }
        })
        .buffer_unordered(max_concurrency.max(1));

    let mut stats = Stats::default();
    while let Some((url, outcome)) = responses.next().await {
        if let Outcome::Error(e) = &outcome {
            warn!("{method} {url} failed: {e}");
        }
        writeln!(out, "{outcome} {method} {url}")?;
        stats.add(&outcome);
    }

    info!(
        "Used {} rate limit bucket(s)",
        client.limiter().bucket_count()
    );
    Ok(stats)
}

async fn request(client: &RateLimitedClient, method: Method, url: &str) -> Outcome {
    match client.request(method, url).await {
        Ok(response) => Outcome::Response(response.status()),
        Err(e) => Outcome::Error(e),
    }
}
