use anyhow::{anyhow, Context, Error, Result};
use clap::Parser;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use pacer_lib::{DEFAULT_MAX_RETRIES, DEFAULT_USER_AGENT, EXTRA_DELAY};
use serde::Deserialize;
use std::fs;
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::verbosity::Verbosity;

pub(crate) const PACER_CONFIG_FILE: &str = "pacer.toml";

const STDIN: &str = "-";

const DEFAULT_METHOD: &str = "GET";
const DEFAULT_MAX_CONCURRENCY: usize = 16;
const DEFAULT_TIMEOUT_SECS: u64 = 20;

// Macro for generating default functions to be used by serde
macro_rules! default_function {
    ( $( $name:ident : $T:ty = $e:expr; )* ) => {
        $(
            #[allow(clippy::missing_const_for_fn)]
            fn $name() -> $T {
                $e
            }
        )*
    };
}

// Generate the functions for serde defaults
default_function! {
    verbosity: Verbosity = Verbosity::default();
    method: String = DEFAULT_METHOD.to_string();
    max_concurrency: usize = DEFAULT_MAX_CONCURRENCY;
    max_retries: u64 = DEFAULT_MAX_RETRIES;
    extra_delay: Duration = EXTRA_DELAY;
    timeout: u64 = DEFAULT_TIMEOUT_SECS;
    user_agent: String = DEFAULT_USER_AGENT.to_string();
}

// Macro for merging configuration values
macro_rules! fold_in {
    ($cli:ident , $toml:ident ; $ty:ident { $(..$ignore:ident,)* $( $key:ident : $default:expr, )* } ) => {
        if (false) {
            #[allow(dead_code, unused, clippy::diverging_sub_expression)]
            let _check_fold_in_exhaustivity = $ty {
                $($key: unreachable!(), )*
                $($ignore: unreachable!(), )*
            };
        };
        $(
            if $cli.$key == $default && $toml.$key != $default {
                $cli.$key = $toml.$key;
            }
        )*
    };
}

/// Send HTTP requests while staying within the server's rate limits.
///
/// Rate limit state is taken from the `Retry-After`, `X-RateLimit-Remaining`,
/// `X-RateLimit-Reset` and `X-RateLimit-Global` response headers. Requests to
/// the same route (numeric path segments are treated as ids) share one quota.
#[derive(Parser, Debug)]
#[command(version, about)]
pub(crate) struct PacerOptions {
    /// URLs to request. Use `-` to read URLs from stdin, one per line.
    #[arg(name = "inputs", required = true)]
    raw_inputs: Vec<String>,

    /// Configuration file to use
    #[arg(short, long = "config")]
    pub(crate) config_file: Option<PathBuf>,

    #[clap(flatten)]
    pub(crate) config: Config,
}

impl PacerOptions {
    /// The URLs to request, in the order given.
    ///
    /// `-` is replaced by the non-empty lines of stdin. Lines starting with
    /// `#` are comments.
    pub(crate) fn inputs(&self) -> Result<Vec<String>> {
        let mut inputs = Vec::with_capacity(self.raw_inputs.len());
        for raw in &self.raw_inputs {
            if raw == STDIN {
                inputs.extend(read_lines(io::stdin().lock())?);
            } else {
                inputs.push(raw.clone());
            }
        }
        Ok(inputs)
    }
}

/// Read lines; ignore empty lines and comments
fn read_lines(reader: impl BufRead) -> Result<Vec<String>> {
    let lines: Vec<String> = reader.lines().collect::<Result<_, _>>()?;
    Ok(lines
        .into_iter()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .collect())
}

/// The main configuration for pacer
#[derive(clap::Args, Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub(crate) struct Config {
    /// Verbose program output
    #[clap(flatten)]
    #[serde(default = "verbosity")]
    pub(crate) verbose: Verbosity,

    /// Request method
    #[arg(short = 'X', long, default_value = DEFAULT_METHOD)]
    #[serde(default = "method")]
    pub(crate) method: String,

    /// Custom request header, in the format `Name: value`.
    /// Can be given multiple times.
    #[arg(short = 'H', long = "header")]
    #[serde(default)]
    pub(crate) header: Vec<String>,

    /// Maximum number of requests in flight at the same time
    #[arg(long, default_value_t = DEFAULT_MAX_CONCURRENCY)]
    #[serde(default = "max_concurrency")]
    pub(crate) max_concurrency: usize,

    /// Maximum number of retries per request after `429 Too Many Requests`
    #[arg(long, default_value_t = DEFAULT_MAX_RETRIES)]
    #[serde(default = "max_retries")]
    pub(crate) max_retries: u64,

    /// Safety margin added to every wait, e.g. `250ms` or `1s`
    #[arg(long, value_parser = humantime::parse_duration, default_value = "250ms")]
    #[serde(default = "extra_delay", with = "humantime_serde")]
    pub(crate) extra_delay: Duration,

    /// Website timeout in seconds from connect to response finished
    #[arg(short, long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    #[serde(default = "timeout")]
    pub(crate) timeout: u64,

    /// User agent
    #[arg(short, long, default_value = DEFAULT_USER_AGENT)]
    #[serde(default = "user_agent")]
    pub(crate) user_agent: String,
}

impl Config {
    /// Load configuration from a file
    pub(crate) fn load_from_file(path: &Path) -> Result<Config> {
        let contents = fs::read_to_string(path)?;
        toml::from_str(&contents).with_context(|| "Failed to parse configuration file")
    }

    /// Merge the configuration from TOML into the CLI configuration
    pub(crate) fn merge(&mut self, toml: Config) {
        // Headers from the CLI come last, so they win on conflicts
        let mut header = toml.header;
        header.append(&mut self.header);
        self.header = header;

        // NOTE: if you see an error within this macro call, check to make sure that
        // that the fields provided to fold_in! match all the fields of the Config struct.
        fold_in! {
            // Destination and source configs
            self, toml;

            Config {
                // Keys which are handled outside of fold_in
                ..header,

                // Keys with defaults to assign
                verbose: Verbosity::default(),
                method: DEFAULT_METHOD,
                max_concurrency: DEFAULT_MAX_CONCURRENCY,
                max_retries: DEFAULT_MAX_RETRIES,
                extra_delay: EXTRA_DELAY,
                timeout: DEFAULT_TIMEOUT_SECS,
                user_agent: DEFAULT_USER_AGENT,
            }
        }
    }

    /// The request method, validated
    pub(crate) fn method(&self) -> Result<Method> {
        Method::from_str(&self.method.to_uppercase())
            .map_err(|e| anyhow!("Invalid request method `{}`: {e}", self.method))
    }

    /// All custom headers as a `HeaderMap`
    pub(crate) fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        for header in &self.header {
            let (name, value) = parse_single_header(header)?;
            headers.insert(name, value);
        }
        Ok(headers)
    }
}

/// Parse a single header into a [`HeaderName`] and [`HeaderValue`]
///
/// Headers are expected to be in format `Header-Name: Header-Value`.
/// The header name and value are trimmed of whitespace.
///
/// If the header contains multiple colons, the part after the first colon is
/// considered the value.
fn parse_single_header(header: &str) -> Result<(HeaderName, HeaderValue)> {
    let Some((name, value)) = header.split_once(':') else {
        return Err(anyhow!(
            "Invalid header format `{header}`. Expected colon-separated string in the format 'HeaderName: HeaderValue'"
        ));
    };

    let name = name.trim();
    let name = HeaderName::from_str(name)
        .map_err(|e| anyhow!("Unable to convert header name '{name}': {e}"))?;
    let value = HeaderValue::from_str(value.trim())
        .map_err(|e| Error::new(e).context(format!("Unable to read value of header `{name}`")))?;
    Ok((name, value))
}
