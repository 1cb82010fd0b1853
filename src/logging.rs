use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Local wall-clock timestamps, `2025-01-31 08:15:02,417`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{} -", chrono::Local::now().format("%Y-%m-%d %H:%M:%S,%3f"))
    }
}

/// Daily rolling file log in `log_dir` plus an optional console layer.
///
/// `RUST_LOG` overrides the level chosen by `debug`. The returned guard must be
/// held for the lifetime of the program or buffered lines are lost.
pub fn init_logging(
    log_dir: &Path,
    prefix: &str,
    debug: bool,
    console: bool,
) -> Result<WorkerGuard> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;

    let file_appender = rolling::daily(log_dir, prefix);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let default_level = if debug { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true);

    let console_layer = console.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .context("Logging already initialized")?;

    let debug_enabled = debug;
    tracing::info!(
        "Logging initialized: dir={}, prefix={}, debug={}",
        log_dir.display(),
        prefix,
        debug_enabled
    );

    Ok(guard)
}

/// Append-only log in a single file, for the small watchdog tools.
///
/// Lines read `<local time> - <LEVEL> <message>`. Also echoes to the console
/// when `console` is set.
pub fn init_tool_logging(log_dir: &Path, file_name: &str, console: bool) -> Result<WorkerGuard> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(rolling::never(log_dir, file_name));
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(false)
        .with_timer(LocalTimer);
    let console_layer = console.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_timer(LocalTimer)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .context("Logging already initialized")?;

    Ok(guard)
}

/// One-line host description for the startup banner.
pub fn describe_host() -> String {
    let info = os_info::get();
    format!("{} {} ({})", info.os_type(), info.version(), info.bitness())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_log_directory_created() {
        let temp_dir = TempDir::new().unwrap();
        let log_dir = temp_dir.path().join("logs");

        // A second subscriber in the same test binary is rejected, but the
        // directory is created first either way.
        let _ = init_logging(&log_dir, "test", false, false);

        assert!(log_dir.exists());
    }

    #[test]
    fn test_local_timer_format() {
        let mut out = String::new();
        LocalTimer.format_time(&mut Writer::new(&mut out)).unwrap();
        // 2025-01-31 08:15:02,417 -
        assert_eq!(out.len(), 25);
        assert!(out.ends_with(" -"));
        assert_eq!(&out[19..20], ",");
    }

    #[test]
    fn test_describe_host_not_empty() {
        assert!(!describe_host().is_empty());
    }
}
