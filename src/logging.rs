use std::{
    fs,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use anyhow::{Context, Result, anyhow};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{self, RollingFileAppender},
};
use tracing_subscriber::{
    EnvFilter, Layer, filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};
use uuid::Uuid;

use crate::config::{LoggingConfig, LoggingRotation};

const LOG_FILE_PREFIX: &str = "summarion.log";
const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Keeps the non-blocking writer alive; drop it last.
pub struct LoggingGuard {
    _worker_guard: WorkerGuard,
    run_id: String,
}

impl LoggingGuard {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }
}

/// JSON lines go to a rolling file under `logging.dir`; warnings are
/// mirrored to stderr. Each line carries the invocation span it was
/// emitted in.
pub fn init_tracing(config: &LoggingConfig) -> Result<LoggingGuard> {
    if config.filter.trim().is_empty() {
        return Err(anyhow!("logging.filter cannot be empty"));
    }
    if config.dir.as_os_str().is_empty() {
        return Err(anyhow!("logging.dir cannot be empty"));
    }

    let log_dir = resolve_log_dir(&config.dir)?;
    fs::create_dir_all(&log_dir)
        .with_context(|| format!("failed to create logging directory {}", log_dir.display()))?;
    let sweep = purge_expired_logs(&log_dir, config.retention_days, SystemTime::now());

    let appender = rolling_appender(&log_dir, &config.rotation);
    let (writer, worker_guard) = tracing_appender::non_blocking(appender);
    let file_layer = fmt::layer()
        .json()
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_current_span(true)
        .with_span_list(false)
        .with_ansi(false)
        .with_writer(writer)
        .with_filter(build_env_filter(&config.filter)?);
    let stderr_layer = config.stderr_warn_enabled.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_filter(LevelFilter::WARN)
    });

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .context("failed to initialize tracing subscriber")?;

    let run_id = Uuid::now_v7().to_string();
    tracing::info!(
        target: "logging",
        run_id = %run_id,
        dir = %log_dir.display(),
        filter = %config.filter,
        rotation = ?config.rotation,
        retention_days = config.retention_days,
        purged_files = sweep.removed,
        "logging_initialized"
    );
    for warning in &sweep.warnings {
        tracing::warn!(target: "logging", warning = %warning, "log_retention_sweep_failed");
    }

    Ok(LoggingGuard {
        _worker_guard: worker_guard,
        run_id,
    })
}

fn build_env_filter(filter: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(filter).with_context(|| format!("failed to parse logging.filter '{filter}'"))
}

fn rolling_appender(log_dir: &Path, rotation: &LoggingRotation) -> RollingFileAppender {
    match rotation {
        LoggingRotation::Daily => rolling::daily(log_dir, LOG_FILE_PREFIX),
        LoggingRotation::Hourly => rolling::hourly(log_dir, LOG_FILE_PREFIX),
    }
}

fn resolve_log_dir(dir: &Path) -> Result<PathBuf> {
    if dir.is_absolute() {
        return Ok(dir.to_path_buf());
    }
    let cwd = std::env::current_dir().context("failed to resolve a relative logging.dir")?;
    Ok(cwd.join(dir))
}

#[derive(Debug, Default)]
struct SweepReport {
    removed: usize,
    warnings: Vec<String>,
}

/// Removes rotated `summarion.log*` files at least `retention_days` old.
/// Failures are collected rather than raised; logging still starts.
fn purge_expired_logs(log_dir: &Path, retention_days: usize, now: SystemTime) -> SweepReport {
    let max_age = Duration::from_secs((retention_days as u64).saturating_mul(SECONDS_PER_DAY));
    let mut report = SweepReport::default();

    let entries = match fs::read_dir(log_dir) {
        Ok(entries) => entries,
        Err(err) => {
            report.warnings.push(format!("cannot scan {}: {err}", log_dir.display()));
            return report;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let is_log = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with(LOG_FILE_PREFIX));
        if !is_log {
            continue;
        }

        match file_age(&entry, now) {
            Ok(Some(age)) if age >= max_age => match fs::remove_file(&path) {
                Ok(()) => report.removed += 1,
                Err(err) => report.warnings.push(format!("cannot remove {}: {err}", path.display())),
            },
            Ok(_) => {}
            Err(err) => report.warnings.push(format!("cannot stat {}: {err}", path.display())),
        }
    }
    report
}

/// `None` for directories and for files stamped in the future.
fn file_age(entry: &fs::DirEntry, now: SystemTime) -> std::io::Result<Option<Duration>> {
    let metadata = entry.metadata()?;
    if !metadata.is_file() {
        return Ok(None);
    }
    Ok(now.duration_since(metadata.modified()?).ok())
}
