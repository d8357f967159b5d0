use crate::cli::{
    actions::Action,
    commands::{self, logging::LogOptions},
    dispatch, telemetry,
};
use anyhow::Result;
use tracing::debug;

/// Parse the command line, bring up logging and resolve what to run.
///
/// # Errors
///
/// Returns an error if arguments are invalid, telemetry cannot start, or the
/// gateway configuration is incomplete.
pub fn start() -> Result<Action> {
    let matches = commands::new().get_matches();
    let options = LogOptions::parse(&matches);
    telemetry::init(options)?;

    debug!(
        version = env!("CARGO_PKG_VERSION"),
        commit = crate::GIT_COMMIT_HASH,
        level = %options.level,
        format = ?options.format,
        "pordisto starting"
    );

    dispatch::handler(&matches)
}
