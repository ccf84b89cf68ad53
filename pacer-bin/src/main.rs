//! `pacer` sends batches of HTTP requests without tripping the server's
//! rate limits.
//!
//! The pacer binary is a wrapper around pacer-lib: every response's
//! `Retry-After`, `X-RateLimit-Remaining`, `X-RateLimit-Reset` and
//! `X-RateLimit-Global` headers are fed into a shared limiter, and every
//! following request to the same route waits until the server allows it.
//!
//! Request a couple of URLs:
//! ```sh
//! pacer https://api.example.com/users/1 https://api.example.com/users/2
//! ```
//!
//! Read URLs from stdin, authenticate and show every wait:
//! ```sh
//! cat urls.txt | pacer -vv -H "Authorization: Bot $TOKEN" -
//! ```
//!
//! Delete messages, with a larger safety margin:
//! ```sh
//! pacer -X DELETE --extra-delay 1s https://api.example.com/channels/7/messages/42
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

use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Error, Result};
use clap::Parser;
use log::{error, info};
use pacer_lib::{ClientBuilder, RateLimitConfig};

mod check;
mod logging;
mod options;
mod verbosity;

use crate::logging::init_logging;
use crate::options::{Config, PacerOptions, PACER_CONFIG_FILE};

/// A C-like enum that can be cast to `i32` and used as process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitCode {
    Success = 0,
    // NOTE: exit code 1 is used for any `Result::Err` bubbled up to `main()`
    // using the `?` operator.
    #[allow(unused)]
    UnexpectedFailure = 1,
    RequestFailure = 2,
    ConfigFile = 3,
}

fn main() -> Result<()> {
    // std::process::exit doesn't run destructors,
    // so the actual work happens in another function.
    let exit_code = run_main()?;
    std::process::exit(exit_code);
}

/// Merge all provided config options into one.
/// This includes a potential config file and the command-line arguments
fn load_config() -> Result<PacerOptions> {
    let mut opts = PacerOptions::parse();

    init_logging(&opts.config.verbose);

    if let Some(config_file) = &opts.config_file {
        match Config::load_from_file(config_file) {
            Ok(c) => opts.config.merge(c),
            Err(e) => {
                bail!(
                    "Cannot load configuration file `{}`: {e:?}",
                    config_file.display()
                );
            }
        }
    } else {
        // A `pacer.toml` in the working directory is picked up automatically,
        // and must be valid just like an explicitly given one.
        let default_config = PathBuf::from(PACER_CONFIG_FILE);
        if default_config.is_file() {
            match Config::load_from_file(&default_config) {
                Ok(c) => opts.config.merge(c),
                Err(e) => {
                    bail!(
                        "Cannot load default configuration file `{}`: {e:?}",
                        default_config.display()
                    );
                }
            }
        }
    }

    // Surface bad methods and headers as configuration errors
    opts.config.method()?;
    opts.config.headers()?;

    Ok(opts)
}

/// Set up runtime and call pacer entrypoint
fn run_main() -> Result<i32> {
    use std::process::exit;

    let opts = match load_config() {
        Ok(opts) => opts,
        Err(e) => {
            error!("Error while loading config: {e}");
            exit(ExitCode::ConfigFile as i32);
        }
    };

    let runtime = tokio::runtime::Runtime::new()?;
    match runtime.block_on(run(&opts)) {
        Err(e) if Some(io::ErrorKind::BrokenPipe) == underlying_io_error_kind(&e) => {
            exit(ExitCode::Success as i32);
        }
        res => res,
    }
}

/// Check if the given error can be traced back to an `io::ErrorKind`
fn underlying_io_error_kind(error: &Error) -> Option<io::ErrorKind> {
    for cause in error.chain() {
        if let Some(io_error) = cause.downcast_ref::<io::Error>() {
            return Some(io_error.kind());
        }
    }
    None
}

/// Run pacer on the given inputs
async fn run(opts: &PacerOptions) -> Result<i32> {
    let inputs = opts.inputs()?;
    let config = &opts.config;

    let client = ClientBuilder::builder()
        .rate_limit(RateLimitConfig::from_options(Some(config.extra_delay)))
        .max_retries(config.max_retries)
        .user_agent(config.user_agent.clone())
        .custom_headers(config.headers()?)
        .timeout(Some(Duration::from_secs(config.timeout)))
        .build()
        .client()
        .context("Failed to create request client")?;

    info!("Sending {} request(s)", inputs.len());

    let mut stdout = io::stdout().lock();
    let stats = check::check(
        &client,
        config.method()?,
        inputs,
        config.max_concurrency,
        &mut stdout,
    )
    .await?;
    writeln!(stdout, "{stats}")?;

    let exit_code = if stats.is_success() {
        ExitCode::Success
    } else {
        ExitCode::RequestFailure
    };
    Ok(exit_code as i32)
}
