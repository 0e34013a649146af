//! Common library behind the `iopeek` preload shim and the `trace_dump` tool.
//!
//! Everything here is ordinary safe Rust with no knowledge of dynamic
//! linking: the preload crate turns raw call arguments into the types in
//! this crate, and `trace_dump` reads the same types back out of trace
//! files.
//!
//! Key responsibilities:
//! - Parse and merge configuration (TOML file + `IOPEEK_*` environment).
//! - Define the [`record::CallRecord`] written for every intercepted call.
//! - Render buffer previews and min/max diagnostics ([`preview`]).
//! - Keep per-hook atomic counters and format the exit summary ([`stats`]).
//! - Set up the process-wide logger ([`logging`]) and the JSONL trace
//!   sink ([`sink`]).

pub mod config;
pub mod logging;
pub mod preview;
pub mod record;
pub mod sink;
pub mod stats;

pub use config::{Config, ConfigError};
pub use record::{Api, CallRecord};
