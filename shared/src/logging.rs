//! Process-wide logger.
//!
//! One stdout sink configured once at startup. Lines look like
//! `[2016-09-06T10:15:30.123] [INFO] [host] [service] - message`.

use std::fmt::{self, Write as _};
use std::str::FromStr;
use std::sync::OnceLock;

use tracing::level_filters::LevelFilter;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields, MakeWriter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::ServiceConfig;
use crate::{Error, Result};

/// Events emitted with this target are labelled `FATAL`.
pub const FATAL_TARGET: &str = "fatal";

static THRESHOLD: OnceLock<LogLevel> = OnceLock::new();

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    All,
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
    Off,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::All => "ALL",
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Fatal => "FATAL",
            LogLevel::Off => "OFF",
        }
    }

    /// Closest `tracing` filter for this threshold.
    pub fn filter(&self) -> LevelFilter {
        match self {
            LogLevel::All | LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error | LogLevel::Fatal => LevelFilter::ERROR,
            LogLevel::Off => LevelFilter::OFF,
        }
    }

    fn passes(&self, threshold: LogLevel) -> bool {
        threshold != LogLevel::Off && *self != LogLevel::Off && *self >= threshold
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ALL" => Ok(LogLevel::All),
            "TRACE" => Ok(LogLevel::Trace),
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARN" => Ok(LogLevel::Warn),
            "ERROR" => Ok(LogLevel::Error),
            "FATAL" => Ok(LogLevel::Fatal),
            "OFF" => Ok(LogLevel::Off),
            other => Err(Error::Config(format!("unknown log level: {}", other))),
        }
    }
}

/// Event format carrying the host and service name on every line.
#[derive(Clone, Debug)]
pub struct ServiceFormat {
    host: String,
    service: String,
}

impl ServiceFormat {
    pub fn new(host: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            service: service.into(),
        }
    }

    fn prefix(&self, timestamp: &str, label: &str) -> String {
        format!(
            "[{}] [{}] [{}] [{}] - ",
            timestamp, label, self.host, self.service
        )
    }
}

impl<S, N> FormatEvent<S, N> for ServiceFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let meta = event.metadata();
        let label = if meta.target() == FATAL_TARGET {
            LogLevel::Fatal.to_string()
        } else {
            meta.level().to_string()
        };
        let timestamp = chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f").to_string();

        writer.write_str(&self.prefix(&timestamp, &label))?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

fn host_name() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "localhost".to_string())
}

/// Whether an event at `level` with `target` gets through `threshold`.
///
/// `tracing` has no level above ERROR, so at `Fatal` only events sent to
/// [`FATAL_TARGET`] pass.
fn admits(threshold: LogLevel, level: &Level, target: &str) -> bool {
    match threshold {
        LogLevel::Fatal => target == FATAL_TARGET && *level == Level::ERROR,
        other => *level <= other.filter(),
    }
}

fn service_layer<S, W>(format: ServiceFormat, level: LogLevel, writer: W) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::fmt::layer()
        .event_format(format)
        .with_writer(writer)
        .with_filter(filter_fn(move |meta| {
            admits(level, meta.level(), meta.target())
        }))
}

/// Install the process-wide stdout logger. Fails if a logger is already set.
pub fn configure(service_name: &str, level: LogLevel) -> Result<()> {
    tracing_subscriber::registry()
        .with(service_layer(
            ServiceFormat::new(host_name(), service_name),
            level,
            std::io::stdout,
        ))
        .try_init()
        .map_err(|e| Error::Config(format!("logger already configured: {}", e)))?;

    THRESHOLD
        .set(level)
        .map_err(|_| Error::Config("log level already set".to_string()))
}

/// Configure from the `service` section of the config.
pub fn configure_service(service: &ServiceConfig) -> Result<()> {
    configure(&service.name, service.log_level)
}

/// Threshold check against the configured level (INFO until configured).
pub fn enabled(level: LogLevel) -> bool {
    level.passes(THRESHOLD.get().copied().unwrap_or(LogLevel::Info))
}

pub fn log(level: LogLevel, message: &str) {
    if !enabled(level) {
        return;
    }

    match level {
        LogLevel::All | LogLevel::Trace => tracing::trace!("{}", message),
        LogLevel::Debug => tracing::debug!("{}", message),
        LogLevel::Info => tracing::info!("{}", message),
        LogLevel::Warn => tracing::warn!("{}", message),
        LogLevel::Error => tracing::error!("{}", message),
        LogLevel::Fatal => tracing::error!(target: FATAL_TARGET, "{}", message),
        LogLevel::Off => {}
    }
}
