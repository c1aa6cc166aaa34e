//! Tracing subscriber setup.
//!
//! Full detail goes to a daily-rotated file under `$HOME/pf9/log`; the
//! console only shows warnings unless `--verbose` is given.

use std::io;

use camino::Utf8Path;
use cap_std::ambient_authority;
use cap_std::fs_utf8::Dir;
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Environment variable overriding the file log filter.
pub const LOG_ENV: &str = "PF9CTL_LOG";
/// Base name of the log file; the appender adds a date suffix.
pub const LOG_FILE: &str = "pf9ctl.log";

const FILE_DEFAULT: &str = "pf9ctl=debug";
const CONSOLE_QUIET: &str = "warn";
const CONSOLE_VERBOSE: &str = "pf9ctl=debug,warn";

/// Errors raised while installing the subscriber.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// The log directory or file could not be created.
    #[error("failed to open log directory {path}: {message}")]
    Appender {
        /// Log directory.
        path: String,
        /// Human-readable error message.
        message: String,
    },
    /// A global subscriber was already installed.
    #[error("failed to install log subscriber: {message}")]
    Install {
        /// Human-readable error message.
        message: String,
    },
}

/// Console filter directive for the given verbosity.
#[must_use]
pub const fn console_directive(verbose: bool) -> &'static str {
    if verbose { CONSOLE_VERBOSE } else { CONSOLE_QUIET }
}

fn appender_error(dir: &Utf8Path, err: &dyn std::error::Error) -> LoggingError {
    LoggingError::Appender {
        path: dir.to_string(),
        message: err.to_string(),
    }
}

/// Installs the global subscriber writing to `log_dir` and stderr.
///
/// The returned guard flushes the file writer when dropped, so keep it alive
/// until the command finishes.
///
/// # Errors
///
/// Returns [`LoggingError`] when the log directory cannot be created or a
/// subscriber is already installed.
pub fn init(log_dir: &Utf8Path, verbose: bool) -> Result<WorkerGuard, LoggingError> {
    Dir::create_ambient_dir_all(log_dir, ambient_authority())
        .map_err(|err: io::Error| appender_error(log_dir, &err))?;
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE)
        .build(log_dir)
        .map_err(|err| appender_error(log_dir, &err))?;
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let file_filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(FILE_DEFAULT));
    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_filter(file_filter);
    let console_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_target(false)
        .without_time()
        .with_filter(EnvFilter::new(console_directive(verbose)));

    tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|err| LoggingError::Install {
            message: err.to_string(),
        })?;
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::console_directive;

    #[rstest]
    #[case(false, "warn")]
    #[case(true, "pf9ctl=debug,warn")]
    fn console_verbosity(#[case] verbose: bool, #[case] expected: &str) {
        assert_eq!(console_directive(verbose), expected);
    }
}
