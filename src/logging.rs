//! Logging setup for embedders and tests.
//!
//! The library itself only emits `tracing` events; call [`init`] once from
//! the host binary if nothing else installs a subscriber.
//!
//! # Environment Variables
//!
//! - `ARTICLE_POOL_LOG` - Log filter (overrides RUST_LOG)
//! - `ARTICLE_POOL_LOG_LEVEL` - Log level: error, warn, info, debug, trace
//! - `ARTICLE_POOL_LOG_FORMAT` - Output format: pretty, compact, json
//! - `ARTICLE_POOL_LOG_FILE` - Path to log file (in addition to stderr)
//! - `RUST_LOG` - Standard Rust log filter (fallback)
//!
//! # Example
//!
//! ```no_run
//! use article_pool::logging::{LogConfig, LogFormat, init};
//!
//! let _guard = init(LogConfig::default().with_format(LogFormat::Json).with_env_overrides());
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, MakeWriter, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

const ENV_FILTER: &str = "ARTICLE_POOL_LOG";
const ENV_LEVEL: &str = "ARTICLE_POOL_LOG_LEVEL";
const ENV_FORMAT: &str = "ARTICLE_POOL_LOG_FORMAT";
const ENV_FILE: &str = "ARTICLE_POOL_LOG_FILE";

const DEFAULT_LOG_FILE: &str = "article-pool.log";

/// Log line layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, human oriented
    #[default]
    Pretty,
    /// One line per event
    Compact,
    /// Newline-delimited JSON objects
    Json,
}

impl LogFormat {
    pub const ALL: [LogFormat; 3] = [Self::Pretty, Self::Compact, Self::Json];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pretty => "pretty",
            Self::Compact => "compact",
            Self::Json => "json",
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|format| format.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| {
                format!("unsupported log format '{s}' (expected pretty, compact or json)")
            })
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subscriber settings consumed by [`init`].
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Level used when no filter directive is set
    pub level: Level,
    pub format: LogFormat,
    /// Also write to this file, rotated daily
    pub file_path: Option<PathBuf>,
    /// Log span timing on close
    pub span_events: bool,
    /// `EnvFilter` directives, e.g. `article_pool=debug,warn`
    pub filter: Option<String>,
    pub show_target: bool,
    pub show_thread_ids: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            file_path: None,
            span_events: false,
            filter: None,
            show_target: true,
            show_thread_ids: false,
        }
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    /// Emit an event when each span closes, with its busy and idle time.
    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.span_events = enabled;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Apply `ARTICLE_POOL_LOG*` and `RUST_LOG` from the process environment.
    ///
    /// An explicitly set filter wins over the environment.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides read through `lookup`.
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if self.filter.is_none() {
            self.filter = lookup(ENV_FILTER).or_else(|| lookup("RUST_LOG"));
        }

        if self.filter.is_none()
            && let Some(level) = lookup(ENV_LEVEL).as_deref().and_then(parse_level)
        {
            self.level = level;
        }

        if let Some(format) = lookup(ENV_FORMAT)
            && let Ok(f) = format.parse()
        {
            self.format = f;
        }

        if let Some(path) = lookup(ENV_FILE).filter(|p| !p.is_empty()) {
            self.file_path = Some(PathBuf::from(path));
        }

        self
    }

    fn build_filter(&self) -> EnvFilter {
        let default = || EnvFilter::new(self.level.to_string().to_lowercase());
        match self.filter {
            Some(ref filter) => EnvFilter::try_new(filter).unwrap_or_else(|_| {
                eprintln!("Warning: Invalid log filter '{}', using default", filter);
                default()
            }),
            None => default(),
        }
    }

    fn span_events(&self) -> FmtSpan {
        if self.span_events {
            FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }

    fn layer<W>(&self, writer: W, ansi: bool) -> Box<dyn Layer<Registry> + Send + Sync>
    where
        W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    {
        let layer = fmt::layer()
            .with_span_events(self.span_events())
            .with_target(self.show_target)
            .with_ansi(ansi)
            .with_writer(writer);
        match self.format {
            LogFormat::Json => layer.json().boxed(),
            LogFormat::Compact => layer
                .compact()
                .with_thread_ids(self.show_thread_ids)
                .boxed(),
            LogFormat::Pretty => layer.with_thread_ids(self.show_thread_ids).boxed(),
        }
    }
}

/// `tracing` level names, case-insensitive, plus `warning`.
fn parse_level(s: &str) -> Option<Level> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("warning") {
        return Some(Level::WARN);
    }
    s.parse().ok()
}

fn file_appender(path: &Path) -> RollingFileAppender {
    let parent = path.parent().unwrap_or(Path::new("."));
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(DEFAULT_LOG_FILE);
    RollingFileAppender::new(Rotation::DAILY, parent, file_name)
}

/// Install the global subscriber.
///
/// Logs go to stderr and, when `file_path` is set, to a daily-rotated file
/// written off-thread. Keep the returned guard alive until exit so buffered
/// file output is flushed. Calls after the first are ignored.
pub fn init(config: LogConfig) -> Option<WorkerGuard> {
    let mut layers = vec![config.layer(std::io::stderr, true)];

    let guard = config.file_path.as_deref().map(|path| {
        let (writer, guard) = tracing_appender::non_blocking(file_appender(path));
        layers.push(config.layer(writer, false));
        guard
    });

    let result = tracing_subscriber::registry()
        .with(layers)
        .with(config.build_filter())
        .try_init();

    // Already initialized by the host or an earlier call.
    let _ = result;
    guard
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_log_format_from_str() {
        for format in LogFormat::ALL {
            assert_eq!(format.to_string().parse::<LogFormat>(), Ok(format));
        }
        assert_eq!(" JSON ".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert!("xml".parse::<LogFormat>().unwrap_err().contains("xml"));
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("warning"), Some(Level::WARN));
        assert_eq!(parse_level("DEBUG"), Some(Level::DEBUG));
        assert_eq!(parse_level("loud"), None);
    }

    #[test]
    fn test_defaults_log_info_to_stderr() {
        let defaults = LogConfig::default();
        assert_eq!((defaults.level, defaults.format), (Level::INFO, LogFormat::Pretty));
        assert_eq!(defaults.file_path, None);
        assert_eq!(defaults.filter, None);
    }

    #[test]
    fn test_prefixed_filter_beats_rust_log() {
        let config = LogConfig::new().with_overrides_from(lookup(&[
            ("ARTICLE_POOL_LOG", "article_pool=trace"),
            ("RUST_LOG", "warn"),
        ]));
        assert_eq!(config.filter.as_deref(), Some("article_pool=trace"));
    }

    #[test]
    fn test_rust_log_is_fallback() {
        let config = LogConfig::new().with_overrides_from(lookup(&[("RUST_LOG", "warn")]));
        assert_eq!(config.filter.as_deref(), Some("warn"));
    }

    #[test]
    fn test_explicit_filter_wins() {
        let config = LogConfig::new()
            .with_filter("error")
            .with_overrides_from(lookup(&[("ARTICLE_POOL_LOG", "trace")]));
        assert_eq!(config.filter.as_deref(), Some("error"));
    }

    #[test]
    fn test_level_format_and_file_overrides() {
        let config = LogConfig::new().with_overrides_from(lookup(&[
            ("ARTICLE_POOL_LOG_LEVEL", "debug"),
            ("ARTICLE_POOL_LOG_FORMAT", "json"),
            ("ARTICLE_POOL_LOG_FILE", "/tmp/pool.log"),
        ]));
        assert_eq!(config.level, Level::DEBUG);
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.file_path, Some(PathBuf::from("/tmp/pool.log")));
    }

    #[test]
    fn test_invalid_overrides_are_ignored() {
        let config = LogConfig::new().with_overrides_from(lookup(&[
            ("ARTICLE_POOL_LOG_LEVEL", "loud"),
            ("ARTICLE_POOL_LOG_FORMAT", "xml"),
            ("ARTICLE_POOL_LOG_FILE", ""),
        ]));
        assert_eq!(config.level, Level::INFO);
        assert_eq!(config.format, LogFormat::Pretty);
        assert!(config.file_path.is_none());
    }

    #[test]
    fn test_init_with_file_returns_guard() {
        let dir = tempfile::tempdir().unwrap();
        let guard = init(LogConfig::new().with_file(dir.path().join("pool.log")));
        assert!(guard.is_some());
        assert!(init(LogConfig::new()).is_none());
    }
}
