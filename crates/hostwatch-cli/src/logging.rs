//! Console and file logging for the agent binary

use anyhow::{Context, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Layer, Registry};

/// Rotated copies kept next to the live log (`.1` is the newest)
pub const LOG_BACKUPS: usize = 3;

/// Console level from the verbosity flags; `silent` wins over the others
pub fn console_filter(silent: bool, verbose: bool, quiet: bool) -> LevelFilter {
    if silent {
        LevelFilter::OFF
    } else if verbose {
        LevelFilter::DEBUG
    } else if quiet {
        LevelFilter::ERROR
    } else {
        LevelFilter::INFO
    }
}

/// Create the log directory (mode 0700) if it does not exist
pub fn prepare_log_dir(log_file: &Path) -> std::io::Result<()> {
    let Some(dir) = log_file.parent().filter(|d| !d.as_os_str().is_empty()) else {
        return Ok(());
    };
    if dir.exists() {
        return Ok(());
    }

    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(dir)
}

fn backup_path(log_file: &Path, n: usize) -> PathBuf {
    let mut name = log_file.as_os_str().to_os_string();
    name.push(format!(".{}", n));
    PathBuf::from(name)
}

/// Shift `log` to `log.1`, `log.1` to `log.2` and so on, dropping the oldest
pub fn rotate_log_file(log_file: &Path) -> std::io::Result<()> {
    if !log_file.exists() {
        return Ok(());
    }

    match std::fs::remove_file(backup_path(log_file, LOG_BACKUPS)) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    for n in (1..LOG_BACKUPS).rev() {
        let from = backup_path(log_file, n);
        if from.exists() {
            std::fs::rename(&from, backup_path(log_file, n + 1))?;
        }
    }
    std::fs::rename(log_file, backup_path(log_file, 1))
}

/// Install the global subscriber: console at `console`, file at debug
///
/// Keep the returned guard alive until exit so buffered file lines are flushed.
pub fn init_logging(log_file: &Path, console: LevelFilter, verbose: bool) -> Result<WorkerGuard> {
    prepare_log_dir(log_file)
        .with_context(|| format!("Failed to create log directory for {}", log_file.display()))?;

    let dir = log_file.parent().unwrap_or_else(|| Path::new("."));
    let file_name = log_file
        .file_name()
        .with_context(|| format!("Invalid log file path {}", log_file.display()))?;

    // Console: bare messages unless verbose
    let plain_layer = (!verbose).then(|| {
        tracing_subscriber::fmt::Layer::default()
            .without_time()
            .with_level(false)
            .with_target(false)
            .with_filter(console)
    });
    let verbose_layer = verbose.then(|| {
        tracing_subscriber::fmt::Layer::default()
            .with_target(false)
            .with_filter(console)
    });

    // File
    let file_appender = tracing_appender::rolling::never(dir, file_name);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let file_layer = tracing_subscriber::fmt::Layer::default()
        .with_ansi(false)
        .with_file(true)
        .with_line_number(true)
        .with_writer(file_writer)
        .with_filter(LevelFilter::DEBUG);

    Registry::default()
        .with(plain_layer)
        .with(verbose_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to install log subscriber")?;

    Ok(guard)
}
