//! Tracer configuration.
//!
//! Two layers, same split as the rest of the config handling in this
//! workspace: raw structs that mirror the TOML file exactly, and the
//! runtime [`Config`] the shim actually consults on every call. The file
//! is optional; every field has a default, and a handful of `IOPEEK_*`
//! environment variables override the file so a run can be retuned from
//! the job script without editing anything.
//!
//! Lookup order for the file itself: `$IOPEEK_CONFIG`, then
//! `iopeek.toml` in the working directory, then built-in defaults.

use log::LevelFilter;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Name of the config file probed in the working directory.
pub const DEFAULT_FILE: &str = "iopeek.toml";

/// All the ways config loading can go wrong.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid log level '{0}'")]
    InvalidLevel(String),

    #[error("invalid duration '{0}': {1}")]
    InvalidDuration(String, #[source] humantime::DurationError),

    #[error("invalid integer '{0}'")]
    InvalidInteger(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/* ───────────────────────── raw file format ───────────────────────── */

/// Mirror of the whole TOML file. Every table is optional.
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub logging: LoggingTable,
    #[serde(default)]
    pub trace: TraceTable,
    #[serde(default)]
    pub values: ValuesTable,
    #[serde(default)]
    pub hooks: HooksTable,
    #[serde(default)]
    pub summary: SummaryTable,
}

/// Mirror of the `[logging]` table.
#[derive(Debug, Default, Deserialize)]
pub struct LoggingTable {
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub file: Option<String>,
}

/// Mirror of the `[trace]` table.
#[derive(Debug, Default, Deserialize)]
pub struct TraceTable {
    #[serde(default)]
    pub file: Option<String>,
    /// Humantime string, e.g. `"250ms"`.
    #[serde(default)]
    pub flush_interval: Option<String>,
}

/// Mirror of the `[values]` table.
#[derive(Debug, Default, Deserialize)]
pub struct ValuesTable {
    #[serde(default)]
    pub preview: Option<bool>,
    #[serde(default)]
    pub preview_limit: Option<usize>,
    #[serde(default)]
    pub max_chars: Option<usize>,
    #[serde(default)]
    pub minmax: Option<bool>,
}

/// Mirror of the `[hooks]` table.
#[derive(Debug, Default, Deserialize)]
pub struct HooksTable {
    #[serde(default)]
    pub mpiio: Option<bool>,
    #[serde(default)]
    pub hdf5: Option<bool>,
}

/// Mirror of the `[summary]` table.
#[derive(Debug, Default, Deserialize)]
pub struct SummaryTable {
    #[serde(default)]
    pub enable: Option<bool>,
}

/* ───────────────────────── runtime config ───────────────────────── */

/// Fully-resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Master switch; `IOPEEK_DISABLE=1` turns every hook into a bare
    /// forward.
    pub enabled: bool,
    pub log_level: LevelFilter,
    /// Optional log file pattern; `{rank}` and `{pid}` are expanded.
    pub log_file: Option<String>,
    /// Optional JSONL trace file pattern; `None` disables trace output.
    pub trace_file: Option<String>,
    pub flush_interval: Duration,
    /// Render value previews in log lines and records.
    pub preview: bool,
    /// Maximum elements shown in a numeric preview.
    pub preview_limit: usize,
    /// Maximum characters shown in a char/string preview.
    pub max_chars: usize,
    /// Compute min/max over the whole buffer for numeric datatypes.
    pub minmax: bool,
    pub hook_mpiio: bool,
    pub hook_hdf5: bool,
    /// Log a per-hook counter summary at process exit.
    pub summary: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            log_level: LevelFilter::Info,
            log_file: None,
            trace_file: None,
            flush_interval: Duration::from_millis(250),
            preview: true,
            preview_limit: 10,
            max_chars: 64,
            minmax: true,
            hook_mpiio: true,
            hook_hdf5: true,
            summary: true,
        }
    }
}

/// Parse a level name the way the logging table spells them.
pub fn parse_level(s: &str) -> Option<LevelFilter> {
    match s.to_uppercase().as_str() {
        "OFF" => Some(LevelFilter::Off),
        "ERROR" => Some(LevelFilter::Error),
        "WARN" => Some(LevelFilter::Warn),
        "INFO" => Some(LevelFilter::Info),
        "DEBUG" => Some(LevelFilter::Debug),
        "TRACE" => Some(LevelFilter::Trace),
        _ => None,
    }
}

impl Config {
    /// Merge a parsed TOML file over the defaults.
    pub fn from_file(file: FileConfig) -> Result<Self, ConfigError> {
        let mut cfg = Config::default();

        if let Some(level) = file.logging.level {
            cfg.log_level =
                parse_level(&level).ok_or(ConfigError::InvalidLevel(level))?;
        }
        cfg.log_file = file.logging.file;
        cfg.trace_file = file.trace.file;
        if let Some(interval) = file.trace.flush_interval {
            cfg.flush_interval = humantime::parse_duration(&interval)
                .map_err(|e| ConfigError::InvalidDuration(interval, e))?;
        }
        if let Some(v) = file.values.preview {
            cfg.preview = v;
        }
        if let Some(v) = file.values.preview_limit {
            cfg.preview_limit = v;
        }
        if let Some(v) = file.values.max_chars {
            cfg.max_chars = v;
        }
        if let Some(v) = file.values.minmax {
            cfg.minmax = v;
        }
        if let Some(v) = file.hooks.mpiio {
            cfg.hook_mpiio = v;
        }
        if let Some(v) = file.hooks.hdf5 {
            cfg.hook_hdf5 = v;
        }
        if let Some(v) = file.summary.enable {
            cfg.summary = v;
        }
        Ok(cfg)
    }

    /// Load and parse the TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let txt = std::fs::read_to_string(path)?;
        let file: FileConfig = toml::from_str(&txt)?;
        Self::from_file(file)
    }

    /// Apply `IOPEEK_*` overrides. `get` is the environment accessor so
    /// tests can feed a closure instead of mutating the process env.
    pub fn apply_env(
        &mut self,
        get: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(v) = get("IOPEEK_DISABLE") {
            self.enabled = !matches!(v.as_str(), "1" | "true" | "yes");
        }
        if let Some(v) = get("IOPEEK_LOG_LEVEL") {
            self.log_level = parse_level(&v).ok_or(ConfigError::InvalidLevel(v))?;
        }
        if let Some(v) = get("IOPEEK_LOG_FILE") {
            self.log_file = Some(v);
        }
        if let Some(v) = get("IOPEEK_TRACE_FILE") {
            self.trace_file = Some(v);
        }
        if let Some(v) = get("IOPEEK_PREVIEW_LIMIT") {
            self.preview_limit =
                v.parse().map_err(|_| ConfigError::InvalidInteger(v))?;
        }
        Ok(())
    }

    /// Resolve the effective configuration for this process.
    ///
    /// Never fails: the shim runs inside someone else's application, so a
    /// broken config file must degrade to defaults, not abort the host.
    /// Problems are returned as warning strings for the caller to log once
    /// the logger exists.
    pub fn discover() -> (Self, Vec<String>) {
        let mut warnings = Vec::new();

        let explicit = std::env::var("IOPEEK_CONFIG").ok();
        let path = explicit
            .clone()
            .or_else(|| Path::new(DEFAULT_FILE).exists().then(|| DEFAULT_FILE.into()));

        let mut cfg = match path {
            Some(p) => match Self::load(Path::new(&p)) {
                Ok(cfg) => cfg,
                Err(e) => {
                    warnings.push(format!("config {p}: {e}; using defaults"));
                    Config::default()
                }
            },
            None => Config::default(),
        };

        if explicit.is_some() && !warnings.is_empty() {
            // Explicit file that failed to load is worth a louder note.
            warnings.push("IOPEEK_CONFIG was set but not honored".into());
        }

        if let Err(e) = cfg.apply_env(|k| std::env::var(k).ok()) {
            warnings.push(format!("environment override: {e}"));
        }
        (cfg, warnings)
    }
}
