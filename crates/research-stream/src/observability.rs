use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

/// Filter used when neither `RESEARCH_LOG_LEVEL` nor `RUST_LOG` is usable:
/// this crate at info, dependencies only when they warn.
const DEFAULT_FILTER: &str = "warn,research_stream=info";
const DEFAULT_LOG_FILE: &str = "research-stream.jsonl";
const CRATE_TARGET: &str = "research_stream";

static INIT: OnceCell<()> = OnceCell::new();

#[derive(Debug, Clone, PartialEq, Eq)]
enum LogSink {
    Console,
    JsonFile { dir: PathBuf, file_name: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct LogSettings {
    enabled: bool,
    filter: String,
    sink: LogSink,
}

impl LogSettings {
    fn from_env() -> Self {
        Self::resolve(|key| std::env::var(key).ok())
    }

    fn resolve(var: impl Fn(&str) -> Option<String>) -> Self {
        let enabled = var("RESEARCH_OBSERVABILITY_ENABLED")
            .and_then(|value| parse_bool_env(&value))
            .unwrap_or(true);
        let filter = resolve_env_filter(var("RESEARCH_LOG_LEVEL"), var("RUST_LOG"));
        let sink = match var("RESEARCH_JSON_LOG_PATH").filter(|p| !p.trim().is_empty()) {
            Some(raw) => json_sink(Path::new(&raw)),
            None => LogSink::Console,
        };
        Self {
            enabled,
            filter,
            sink,
        }
    }
}

fn parse_bool_env(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

/// Picks the filter directive.
///
/// A bare level in `RESEARCH_LOG_LEVEL` (`debug`) is scoped to this crate so
/// the transport crates stay quiet; a full directive is used as written.
/// Unparsable values fall through to `RUST_LOG`, then to the default.
fn resolve_env_filter(research_level: Option<String>, rust_log: Option<String>) -> String {
    if let Some(level) = research_level.map(|l| l.trim().to_string()) {
        if level.parse::<LevelFilter>().is_ok() {
            return format!("warn,{CRATE_TARGET}={level}");
        }
        if EnvFilter::try_new(&level).is_ok() {
            return level;
        }
    }
    rust_log
        .filter(|directive| EnvFilter::try_new(directive).is_ok())
        .unwrap_or_else(|| DEFAULT_FILTER.to_string())
}

fn json_sink(path: &Path) -> LogSink {
    match path.file_name().and_then(|n| n.to_str()) {
        Some(file_name) if !path.as_os_str().to_string_lossy().ends_with('/') => LogSink::JsonFile {
            dir: path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map_or_else(|| PathBuf::from("."), Path::to_path_buf),
            file_name: file_name.to_string(),
        },
        _ => LogSink::JsonFile {
            dir: path.to_path_buf(),
            file_name: DEFAULT_LOG_FILE.to_string(),
        },
    }
}

/// Installs the process-wide `tracing` subscriber for session logs. Later
/// calls do nothing, and neither does a process that already installed its
/// own subscriber.
///
/// Environment variables:
/// - `RESEARCH_OBSERVABILITY_ENABLED`: enable/disable flag (default enabled).
/// - `RESEARCH_LOG_LEVEL`: a level for this crate (`debug`) or a full filter
///   (`research_stream=trace,reqwest=debug`).
/// - `RUST_LOG`: fallback filter.
/// - `RESEARCH_JSON_LOG_PATH`: JSONL log file (or directory). Each line carries
///   the enclosing `research_session` span, so `session_id` and `backend` are
///   recorded with every event. Unset means compact console output on stderr.
pub fn init_observability() {
    INIT.get_or_init(|| {
        let settings = LogSettings::from_env();
        if !settings.enabled {
            return;
        }

        let env_filter = EnvFilter::new(&settings.filter);
        match settings.sink {
            LogSink::JsonFile { dir, file_name } => {
                let _ = std::fs::create_dir_all(&dir);
                let writer = tracing_appender::rolling::never(&dir, &file_name);
                let json_layer = tracing_subscriber::fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_target(true)
                    .with_writer(writer);
                let _ = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(json_layer)
                    .try_init();
            }
            LogSink::Console => {
                let console_layer = tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr);
                let _ = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(console_layer)
                    .try_init();
            }
        }
        tracing::debug!(filter = %settings.filter, "session logging installed");
    });
}
