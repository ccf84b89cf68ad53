use http::Method;
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

use crate::{ErrorKind, Result};

/// Placeholder for numeric path segments in a normalized route
const ID_PLACEHOLDER: &str = ":id";

/// Identifies the rate limit bucket a request belongs to.
///
/// Any string works as a key. Since buckets are never evicted, keys should
/// have low cardinality: use a route template rather than the raw path with
/// interpolated ids. [`BucketKey::from_route`] does that for you.
///
/// # Examples
///
/// ```
/// use pacer_lib::BucketKey;
/// use http::Method;
/// use url::Url;
///
/// let url = Url::parse("https://discord.com/api/channels/81384788765712384/messages").unwrap();
/// let key = BucketKey::from_route(&Method::POST, &url).unwrap();
/// assert_eq!(key.as_str(), "POST discord.com/api/channels/:id/messages");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BucketKey(String);

impl BucketKey {
    /// Derive a key from the method and URL of a request.
    ///
    /// The key consists of the method, the lowercased host (and port, if
    /// any) and the path, where every purely numeric segment is replaced by
    /// `:id`. Query and fragment are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidUrlHost`] if the URL has no host.
    pub fn from_route(method: &Method, url: &Url) -> Result<Self> {
        let host = url.host_str().ok_or(ErrorKind::InvalidUrlHost)?;

        let mut key = format!("{method} {}", host.to_lowercase());
        if let Some(port) = url.port() {
            key.push_str(&format!(":{port}"));
        }

        match url.path_segments() {
            Some(segments) => {
                for segment in segments {
                    key.push('/');
                    if is_id(segment) {
                        key.push_str(ID_PLACEHOLDER);
                    } else {
                        key.push_str(segment);
                    }
                }
            }
            None => key.push('/'),
        }

        Ok(BucketKey(key))
    }

    /// Get the key as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Get the key as an owned String
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

fn is_id(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for BucketKey {
    fn from(key: String) -> Self {
        BucketKey(key)
    }
}

impl From<&str> for BucketKey {
    fn from(key: &str) -> Self {
        BucketKey(key.to_string())
    }
}
