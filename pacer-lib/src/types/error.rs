use std::hash::Hash;
use thiserror::Error;

use crate::BucketKey;

/// Possible errors when sending requests through `pacer_lib`
///
/// The limiter itself never fails; these come from the HTTP side.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Network error while sending a request
    #[error("Network error while sending request")]
    NetworkRequest(#[source] reqwest::Error),

    /// The request client could not be created
    #[error("Error creating request client: {0}")]
    BuildRequestClient(#[source] reqwest::Error),

    /// The server kept answering `429 Too Many Requests`
    #[error("Rate limit for {key} still exceeded after {attempts} attempts")]
    RateLimitExceeded {
        /// Bucket the request was paced under
        key: BucketKey,
        /// Number of requests sent, including the first one
        attempts: u64,
    },

    /// A URL without a host cannot be mapped to a bucket
    #[error("URL is missing a host")]
    InvalidUrlHost,
}

impl ErrorKind {
    /// Return the underlying `reqwest` error, if any
    #[must_use]
    pub const fn reqwest_error(&self) -> Option<&reqwest::Error> {
        match self {
            Self::NetworkRequest(e) | Self::BuildRequestClient(e) => Some(e),
            Self::RateLimitExceeded { .. } | Self::InvalidUrlHost => None,
        }
    }
}

impl PartialEq for ErrorKind {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::NetworkRequest(e1), Self::NetworkRequest(e2))
            | (Self::BuildRequestClient(e1), Self::BuildRequestClient(e2)) => {
                e1.to_string() == e2.to_string()
            }
            (
                Self::RateLimitExceeded {
                    key: k1,
                    attempts: a1,
                },
                Self::RateLimitExceeded {
                    key: k2,
                    attempts: a2,
                },
            ) => k1 == k2 && a1 == a2,
            (Self::InvalidUrlHost, Self::InvalidUrlHost) => true,
            _ => false,
        }
    }
}

impl Eq for ErrorKind {}

impl Hash for ErrorKind {
    fn hash<H>(&self, state: &mut H)
    where
        H: std::hash::Hasher,
    {
        match self {
            Self::NetworkRequest(e) | Self::BuildRequestClient(e) => e.to_string().hash(state),
            Self::RateLimitExceeded { key, attempts } => (key, attempts).hash(state),
            Self::InvalidUrlHost => std::mem::discriminant(self).hash(state),
        }
    }
}
