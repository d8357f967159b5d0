//! Log verbosity and output format flags.

use clap::{builder::ValueParser, Arg, ArgAction, ArgMatches, Command};
use tracing::Level;

pub const ARG_VERBOSITY: &str = "verbosity";
pub const ARG_LOG_FORMAT: &str = "log-format";

/// How log lines are rendered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, human readable.
    Pretty,
    /// One JSON object per line, for log shippers.
    Json,
}

/// Logging choices taken from flags and environment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LogOptions {
    pub level: Level,
    pub format: LogFormat,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            level: Level::ERROR,
            format: LogFormat::Pretty,
        }
    }
}

impl LogOptions {
    #[must_use]
    pub fn parse(matches: &ArgMatches) -> Self {
        let count = matches.get_one::<u8>(ARG_VERBOSITY).copied().unwrap_or(0);
        let format = match matches.get_one::<String>(ARG_LOG_FORMAT).map(String::as_str) {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };
        Self {
            level: level(count),
            format,
        }
    }
}

/// `-v` count to level. Errors are always logged.
const fn level(count: u8) -> Level {
    match count {
        0 => Level::ERROR,
        1 => Level::WARN,
        2 => Level::INFO,
        3 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Accepts a level name or its `-v` count, so `PORDISTO_LOG_LEVEL=info` and
/// `-vv` mean the same thing.
#[must_use]
pub fn validator_log_level() -> ValueParser {
    ValueParser::from(|value: &str| -> std::result::Result<u8, String> {
        if let Ok(count) = value.parse::<u8>() {
            return if count <= 5 {
                Ok(count)
            } else {
                Err(format!("log level {count} is out of range (0-5)"))
            };
        }

        ["error", "warn", "info", "debug", "trace"]
            .iter()
            .zip(0u8..)
            .find(|(name, _)| value.eq_ignore_ascii_case(name))
            .map(|(_, count)| count)
            .ok_or_else(|| format!("invalid log level: {value}"))
    })
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_VERBOSITY)
                .short('v')
                .long("verbose")
                .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
                .env("PORDISTO_LOG_LEVEL")
                .global(true)
                .action(ArgAction::Count)
                .value_parser(validator_log_level()),
        )
        .arg(
            Arg::new(ARG_LOG_FORMAT)
                .long(ARG_LOG_FORMAT)
                .help("Log output format")
                .env("PORDISTO_LOG_FORMAT")
                .global(true)
                .value_parser(["pretty", "json"])
                .default_value("pretty"),
        )
}
