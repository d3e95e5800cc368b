//! Log setup for the hook binary.
//!
//! Stdout and stderr belong to the hook protocol, so logs go to a daily file under
//! `<state dir>/logs/`. Filter: `TRACE_HOOK_LOG`, else `debug` when `LANGFUSE_DEBUG` is set,
//! else `warn`.

use fs_err as fs;
use trace_core::TraceConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "TRACE_HOOK_LOG";
const LOG_PREFIX: &str = "trace-hook";

/// Installs the global subscriber. Keep the returned guard alive until exit so buffered
/// lines reach the file.
pub fn init(config: &TraceConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| {
        EnvFilter::new(if config.debug { "debug" } else { "warn" })
    });

    match file_appender(config) {
        Some(appender) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let installed = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .try_init();
            installed.ok().map(|_| guard)
        }
        None => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(EnvFilter::new("warn"))
                .with_writer(std::io::stderr)
                .with_target(false)
                .try_init();
            None
        }
    }
}

fn file_appender(config: &TraceConfig) -> Option<RollingFileAppender> {
    let dir = config.storage().ok()?.logs_dir();
    fs::create_dir_all(&dir).ok()?;
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_PREFIX)
        .filename_suffix("log")
        .build(&dir)
        .ok()
}
