//! Tracing subscriber setup.
//!
//! Logs go to stderr so command output on stdout stays clean. The
//! `TICKETWATCH_LOG` variable takes an `EnvFilter` directive (for example
//! `ticketwatch::poller=debug`) and wins over the `-v` flags.

use tracing_subscriber::{EnvFilter, fmt};

use crate::error::{AppError, AppResult};

pub const LOG_ENV: &str = "TICKETWATCH_LOG";

pub fn init_logging(verbosity: u8) -> AppResult<()> {
    let filter = match std::env::var(LOG_ENV) {
        Ok(directives) if !directives.trim().is_empty() => EnvFilter::try_new(directives)
            .map_err(|err| AppError::Configuration(format!("invalid {LOG_ENV}: {err}")))?,
        _ => EnvFilter::new(default_directive(verbosity)),
    };

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .try_init()
        .map_err(|err| AppError::Configuration(format!("failed to initialise logging: {err}")))
}

fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    }
}
