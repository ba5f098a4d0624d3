use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Map the CLI's numeric log level (1-5) onto a tracing filter directive.
pub fn level_directive(level: u8) -> Option<&'static str> {
    match level {
        1 => Some("debug"),
        2 => Some("info"),
        3 => Some("warn"),
        4 | 5 => Some("error"),
        _ => None,
    }
}

/// Initialize logging. Returns the guard keeping the non-blocking file
/// writer alive; hold it for the process lifetime.
pub fn init(level: u8, log_path: Option<PathBuf>) -> Option<WorkerGuard> {
    let directive = level_directive(level).unwrap_or("info");
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_path {
        Some(dir) => {
            let appender = rolling::RollingFileAppender::builder()
                .rotation(rolling::Rotation::DAILY)
                .filename_prefix("metrad")
                .filename_suffix("log")
                .build(dir)
                .expect("failed to create rolling file appender");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            registry
                .with(fmt::layer())
                .with(fmt::layer().with_ansi(false).with_writer(non_blocking))
                .init();
            Some(guard)
        }
        None => {
            registry.with(fmt::layer()).init();
            None
        }
    }
}
