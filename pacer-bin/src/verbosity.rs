//! A counted `--verbose` / `--quiet` flag pair for the CLI.
//!
//! The default level is `warn`:
//! - `-q` only reports errors
//! - `-v` shows info
//! - `-vv` shows debug, including every wait caused by a rate limit
//! - `-vvv` shows trace

use log::{Level, LevelFilter};
use serde::Deserialize;

#[derive(clap::Args, Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Verbosity {
    /// More output per occurrence
    #[arg(
        long,
        short = 'v',
        action = clap::ArgAction::Count,
        global = true,
        conflicts_with = "quiet"
    )]
    verbose: u8,

    /// Less output per occurrence
    #[arg(
        long,
        short = 'q',
        action = clap::ArgAction::Count,
        global = true,
        conflicts_with = "verbose"
    )]
    quiet: u8,
}

impl Verbosity {
    /// Get the log level filter.
    ///
    /// `-qq` and beyond turn logging off entirely.
    pub(crate) fn log_level_filter(&self) -> LevelFilter {
        let level = i16::from(self.verbose) - i16::from(self.quiet) + level_value(Level::Warn);
        match level {
            i16::MIN..=-1 => LevelFilter::Off,
            0 => LevelFilter::Error,
            1 => LevelFilter::Warn,
            2 => LevelFilter::Info,
            3 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}

const fn level_value(level: Level) -> i16 {
    match level {
        Level::Error => 0,
        Level::Warn => 1,
        Level::Info => 2,
        Level::Debug => 3,
        Level::Trace => 4,
    }
}

// Config files name the level instead of counting flags,
// e.g. `verbose = "debug"`
impl<'de> Deserialize<'de> for Verbosity {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let level = match s.to_lowercase().as_str() {
            "error" => Level::Error,
            "warn" | "warning" => Level::Warn,
            "info" => Level::Info,
            "debug" => Level::Debug,
            "trace" => Level::Trace,
            level => {
                return Err(serde::de::Error::custom(format!(
                    "invalid log level `{level}`"
                )))
            }
        };

        let offset = level_value(level) - level_value(Level::Warn);
        Ok(Verbosity {
            verbose: offset.max(0) as u8,
            quiet: (-offset).max(0) as u8,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn verify_app() {
        #[derive(Debug, clap::Parser)]
        struct Cli {
            #[clap(flatten)]
            verbose: Verbosity,
        }

        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_default_log_level() {
        assert_eq!(Verbosity::default().log_level_filter(), LevelFilter::Warn);
    }

    #[test]
    fn test_counted_flags() {
        let verbosity = |verbose, quiet| Verbosity { verbose, quiet }.log_level_filter();
        assert_eq!(verbosity(1, 0), LevelFilter::Info);
        assert_eq!(verbosity(3, 0), LevelFilter::Trace);
        assert_eq!(verbosity(9, 0), LevelFilter::Trace);
        assert_eq!(verbosity(0, 1), LevelFilter::Error);
        assert_eq!(verbosity(0, 2), LevelFilter::Off);
    }

    #[test]
    fn test_deserialize_level_name() {
        #[derive(Deserialize)]
        struct Wrapper {
            verbose: Verbosity,
        }

        let parse = |s: &str| {
            toml::from_str::<Wrapper>(&format!("verbose = \"{s}\""))
                .unwrap()
                .verbose
                .log_level_filter()
        };
        assert_eq!(parse("Debug"), LevelFilter::Debug);
        assert_eq!(parse("warning"), LevelFilter::Warn);
        assert_eq!(parse("error"), LevelFilter::Error);

        assert!(toml::from_str::<Wrapper>("verbose = \"loud\"").is_err());
    }
}
