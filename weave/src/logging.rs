// Logging for the weave runtime
//
// Built on the `tracing` ecosystem. Every component logs structured events;
// instance-scoped events carry `msu_id` and `type_name` fields, errors carry
// an `error` field, so a log aggregator can filter per instance or per type.
//
// # Usage Examples
//
// ```rust
// use weave::logging;
//
// // INFO level, human-readable console output
// logging::init_default();
//
// // Or pick the fields explicitly
// logging::init(logging::LogConfig {
//     level: tracing::Level::DEBUG,
//     target_filters: Some("weave::dispatch=trace".to_string()),
//     ..Default::default()
// });
// ```
//
// Instance spans and lifecycle events:
//
// ```rust
// let span = weave::msu_span!(7u32, "read");
// let _guard = span.enter();
// weave::log_lifecycle!(7u32, "read", "created");
// ```

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Once;
use tracing::{Level, Subscriber};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Configuration of the global subscriber.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: Level,
    /// Emit one JSON object per event
    pub json_format: bool,
    /// Include file and line information
    pub show_file_line: bool,
    /// Include thread name and id (workers are named `weave-worker-N`)
    pub show_thread_info: bool,
    /// Include timestamps
    pub show_time: bool,
    /// Extra directives, format: "target=level,target2=level2"
    pub target_filters: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json_format: false,
            show_file_line: true,
            show_thread_info: true,
            show_time: true,
            target_filters: None,
        }
    }
}

static INIT: Once = Once::new();

fn env_filter(config: &LogConfig) -> EnvFilter {
    let mut filter = EnvFilter::from_default_env().add_directive(config.level.into());
    if let Some(filters) = &config.target_filters {
        for directive in filters.split(',').filter_map(|d| d.trim().parse().ok()) {
            filter = filter.add_directive(directive);
        }
    }
    filter
}

/// Installs the global subscriber. Only the first call in a process has an
/// effect; later calls are ignored.
pub fn init(config: LogConfig) {
    INIT.call_once(|| {
        let registry = tracing_subscriber::registry().with(env_filter(&config));

        let subscriber: Box<dyn Subscriber + Send + Sync> = if config.json_format {
            let layer = fmt::layer()
                .json()
                .flatten_event(true)
                .with_file(config.show_file_line)
                .with_line_number(config.show_file_line)
                .with_thread_names(config.show_thread_info)
                .with_thread_ids(config.show_thread_info);
            Box::new(registry.with(layer))
        } else {
            let layer = fmt::layer()
                .with_ansi(atty::is(atty::Stream::Stdout))
                .with_file(config.show_file_line)
                .with_line_number(config.show_file_line)
                .with_thread_names(config.show_thread_info)
                .with_thread_ids(config.show_thread_info);
            if config.show_time {
                Box::new(registry.with(layer))
            } else {
                Box::new(registry.with(layer.without_time()))
            }
        };

        set_global_subscriber(subscriber);
    });
}

fn set_global_subscriber<S>(subscriber: S)
where
    S: Subscriber + Send + Sync + 'static,
{
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Error setting global tracing subscriber: {}", err);
    }
}

/// Opens `path` for appending, creating it if needed.
pub fn file_writer(path: &Path) -> io::Result<std::fs::File> {
    std::fs::OpenOptions::new().create(true).append(true).open(path)
}

/// Logs to the console and, without colors, to `log_file`.
///
/// # Errors
/// Returns an error if the file cannot be opened. Nothing is installed in
/// that case.
pub fn init_with_file(config: LogConfig, log_file: impl AsRef<Path>) -> io::Result<()> {
    let path: PathBuf = log_file.as_ref().to_path_buf();
    // Fail early instead of silently losing the file layer.
    file_writer(&path)?;

    INIT.call_once(|| {
        let console_layer = fmt::layer()
            .with_ansi(atty::is(atty::Stream::Stdout))
            .with_file(config.show_file_line)
            .with_line_number(config.show_file_line)
            .with_thread_names(config.show_thread_info)
            .with_thread_ids(config.show_thread_info);

        let file_layer = fmt::layer()
            .with_ansi(false)
            .with_writer(move || -> Box<dyn io::Write> {
                match file_writer(&path) {
                    Ok(file) => Box::new(file),
                    Err(_) => Box::new(io::stderr()),
                }
            })
            .with_file(true)
            .with_line_number(true)
            .with_thread_names(true)
            .with_thread_ids(true);

        let subscriber = tracing_subscriber::registry()
            .with(env_filter(&config))
            .with(console_layer)
            .with(file_layer);

        set_global_subscriber(subscriber);
    });

    Ok(())
}

/// INFO level, console output.
pub fn init_default() {
    init(LogConfig::default());
}

/// DEBUG everywhere, TRACE for the dispatch path.
pub fn init_development() {
    init(LogConfig {
        level: Level::DEBUG,
        target_filters: Some("weave=debug,weave::dispatch=trace".to_string()),
        ..Default::default()
    });
}

/// JSON output for log aggregators, no source locations.
pub fn init_production() {
    init(LogConfig {
        level: Level::INFO,
        json_format: true,
        show_file_line: false,
        show_thread_info: true,
        show_time: true,
        target_filters: None,
    });
}

/// Warnings and errors only, compact. Call at the top of a test.
pub fn init_test() {
    init(LogConfig {
        level: Level::WARN,
        json_format: false,
        show_file_line: true,
        show_thread_info: false,
        show_time: false,
        target_filters: None,
    });
}

/// Span covering work done on behalf of one instance.
///
/// ```rust
/// let span = weave::msu_span!(3u32, "cache", worker = 0usize);
/// let _guard = span.enter();
/// ```
#[macro_export]
macro_rules! msu_span {
    ($msu_id:expr, $type_name:expr) => {
        $crate::tracing::info_span!("msu", msu_id = %$msu_id, type_name = %$type_name)
    };
    ($msu_id:expr, $type_name:expr, $($fields:tt)*) => {
        $crate::tracing::info_span!("msu", msu_id = %$msu_id, type_name = %$type_name, $($fields)*)
    };
}

/// Instance lifecycle events: created, destroyed, creation failed.
#[macro_export]
macro_rules! log_lifecycle {
    ($msu_id:expr, $type_name:expr, $event:expr) => {
        $crate::tracing::info!(msu_id = %$msu_id, type_name = %$type_name, event = $event)
    };
    ($msu_id:expr, $type_name:expr, $event:expr, $($fields:tt)*) => {
        $crate::tracing::info!(msu_id = %$msu_id, type_name = %$type_name, event = $event, $($fields)*)
    };
}

/// Per-message dispatch trace.
#[macro_export]
macro_rules! log_dispatch {
    ($msu_id:expr, $outcome:expr) => {
        $crate::tracing::trace!(msu_id = %$msu_id, outcome = $outcome)
    };
    ($msu_id:expr, $outcome:expr, $($fields:tt)*) => {
        $crate::tracing::trace!(msu_id = %$msu_id, outcome = $outcome, $($fields)*)
    };
}

/// Error event with the instance, its type and the error.
///
/// ```rust
/// let err = std::io::Error::new(std::io::ErrorKind::Other, "boom");
/// weave::log_error!(err, 3u32, "cache");
/// weave::log_error!(err, 3u32, "cache", category = "resource");
/// ```
#[macro_export]
macro_rules! log_error {
    ($error:expr, $msu_id:expr, $type_name:expr) => {
        $crate::tracing::error!(msu_id = %$msu_id, type_name = %$type_name, error = %$error)
    };
    ($error:expr, $msu_id:expr, $type_name:expr, $($fields:tt)*) => {
        $crate::tracing::error!(msu_id = %$msu_id, type_name = %$type_name, error = %$error, $($fields)*)
    };
}

/// The dispatcher active on the calling thread, for handing to spawned threads.
#[inline]
pub fn current_subscriber() -> tracing::Dispatch {
    tracing::dispatcher::get_default(|d| d.clone())
}

pub use tracing::{debug, error, info, trace, warn};
