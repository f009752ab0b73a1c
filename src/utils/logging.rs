use std::error::Error;
use std::path::Path;

use tracing::Level;
use tracing_appender::non_blocking::{ErrorCounter, NonBlocking, NonBlockingBuilder, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;

use crate::config::LoggingSettings;
use crate::utils::error::LogError;

/// Initialize tracing/logging for the application.
///
/// This uses a simple `with_max_level` configuration based on `default_level`.
pub fn init(default_level: &str) {
    let _ = tracing_subscriber::registry()
        .with(LevelFilter::from_level(parse_level(default_level)))
        .with(console_layer())
        .try_init();
}

/// Initialize console logging and, when `file_path` is set, a rolling log
/// file written through a non-blocking buffer.
///
/// The returned guard flushes the file on drop and must be kept alive for as
/// long as the application logs.
pub fn init_with_settings(settings: &LoggingSettings) -> Result<Option<FileLogGuard>, LogError> {
    let (file_layer, guard) = match file_writer(settings)? {
        Some((writer, guard)) => {
            let layer = fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    // Use try_init so tests and libraries can call this multiple times without panicking
    let _ = tracing_subscriber::registry()
        .with(LevelFilter::from_level(parse_level(&settings.level)))
        .with(console_layer())
        .with(file_layer)
        .try_init();

    Ok(guard)
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "error" => Level::ERROR,
        "warn" | "warning" => Level::WARN,
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        _ => Level::INFO,
    }
}

fn console_layer<S>() -> fmt::Layer<S>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    fmt::layer().with_target(false)
}

fn parse_rotation(rotation: &str) -> Result<Rotation, LogError> {
    match rotation.to_lowercase().as_str() {
        "minutely" => Ok(Rotation::MINUTELY),
        "hourly" => Ok(Rotation::HOURLY),
        "daily" => Ok(Rotation::DAILY),
        "never" => Ok(Rotation::NEVER),
        _ => Err(LogError::InvalidRotation(rotation.to_string())),
    }
}

/// Opens the rolling file behind a lossy non-blocking writer, or `None` if
/// file logging is off.
fn file_writer(settings: &LoggingSettings) -> Result<Option<(NonBlocking, FileLogGuard)>, LogError> {
    if settings.file_path.is_empty() {
        return Ok(None);
    }

    let path = Path::new(&settings.file_path);
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| LogError::InvalidPath(settings.file_path.clone()))?;
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut builder = RollingFileAppender::builder()
        .rotation(parse_rotation(&settings.rotation)?)
        .filename_prefix(file_name);
    if settings.max_files > 0 {
        builder = builder.max_log_files(settings.max_files);
    }
    let appender = builder.build(directory).map_err(|source| LogError::File {
        path: settings.file_path.clone(),
        source,
    })?;

    let (writer, worker) = NonBlockingBuilder::default()
        .buffered_lines_limit(settings.buffer_lines.max(1))
        .lossy(true)
        .finish(appender);
    let dropped = writer.error_counter();

    Ok(Some((
        writer,
        FileLogGuard {
            _worker: worker,
            dropped,
        },
    )))
}

/// Keeps the log file writer running; dropping it flushes buffered lines.
pub struct FileLogGuard {
    _worker: WorkerGuard,
    dropped: ErrorCounter,
}

impl FileLogGuard {
    /// Lines discarded because the file buffer was full.
    pub fn dropped_lines(&self) -> usize {
        self.dropped.dropped_lines()
    }
}

impl std::fmt::Debug for FileLogGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileLogGuard")
            .field("dropped_lines", &self.dropped_lines())
            .finish()
    }
}

/// Leveled log destination used by the client for lifecycle and delivery events.
///
/// Every connect, disconnect, reconnect attempt, subscribe and publish failure
/// is reported through this trait, never returned to the publisher.
pub trait LogSink: Send + Sync {
    fn debug(&self, msg: &str);
    fn info(&self, msg: &str);
    fn warn(&self, msg: &str);
    fn error(&self, msg: &str, err: Option<&(dyn Error + 'static)>);
}

/// `LogSink` that forwards to the global `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn debug(&self, msg: &str) {
        tracing::debug!("{msg}");
    }

    fn info(&self, msg: &str) {
        tracing::info!("{msg}");
    }

    fn warn(&self, msg: &str) {
        tracing::warn!("{msg}");
    }

    fn error(&self, msg: &str, err: Option<&(dyn Error + 'static)>) {
        match err {
            Some(err) => tracing::error!(error = %ErrorChain(err), "{msg}"),
            None => tracing::error!("{msg}"),
        }
    }
}

/// Displays an error followed by its `source()` chain, `outer: inner: root`.
pub struct ErrorChain<'a>(pub &'a (dyn Error + 'static));

impl std::fmt::Display for ErrorChain<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)?;
        let mut source = self.0.source();
        while let Some(err) = source {
            write!(f, ": {err}")?;
            source = err.source();
        }
        Ok(())
    }
}
