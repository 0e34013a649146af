//! Per-process shim state.
//!
//! Nothing runs at library load time; the first hook that fires boots the
//! session, and everything after that is an acquire on a `OnceLock`. Boot
//! resolves the config, wires the logger, opens the trace sink and
//! registers the exit report. It must never panic or abort: this code
//! runs inside somebody else's application, and a broken config file or
//! unwritable trace path degrades the shim, not the host.

use iopeek_core::config::Config;
use iopeek_core::preview::RenderOpts;
use iopeek_core::sink::{TraceSink, expand_path};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;
use std::sync::OnceLock;

pub struct Session {
    pub config: Config,
    pub opts: RenderOpts,
    pub sink: Option<TraceSink>,
}

impl Session {
    pub fn mpiio_on(&self) -> bool {
        self.config.enabled && self.config.hook_mpiio
    }

    pub fn hdf5_on(&self) -> bool {
        self.config.enabled && self.config.hook_hdf5
    }

    fn boot() -> Self {
        let (config, warnings) = Config::discover();
        if !config.enabled {
            // Disabled means invisible: no logger, no sink, no atexit.
            return Self {
                opts: RenderOpts::from(&config),
                config,
                sink: None,
            };
        }

        // Learn the rank first so even the banner line carries it.
        let (rank, _) = crate::mpi::world();

        if let Err(e) = iopeek_core::logging::init(&config) {
            // Most likely the host installed its own logger; our lines
            // then flow through that one instead.
            eprintln!("iopeek: logger setup degraded: {e}");
        }
        for w in &warnings {
            log::warn!(target: "iopeek", "{w}");
        }
        log::debug!(
            target: "iopeek",
            "iopeek {} attached (mpi flavor {:?})",
            env!("CARGO_PKG_VERSION"),
            crate::mpi::flavor()
        );

        let sink = config.trace_file.as_ref().and_then(|pattern| {
            let path = expand_path(pattern, rank, std::process::id());
            match TraceSink::create(Path::new(&path), config.flush_interval) {
                Ok(sink) => {
                    log::debug!(target: "iopeek", "trace records -> {path}");
                    Some(sink)
                }
                Err(e) => {
                    log::warn!(target: "iopeek", "cannot open trace file {path}: {e}");
                    None
                }
            }
        });

        unsafe {
            libc::atexit(report_at_exit);
        }

        Self {
            opts: RenderOpts::from(&config),
            config,
            sink,
        }
    }
}

static SESSION: OnceLock<Session> = OnceLock::new();

/// Process-wide session, booted by whichever hook gets here first.
pub fn session() -> &'static Session {
    SESSION.get_or_init(Session::boot)
}

extern "C" fn report_at_exit() {
    // A panic cannot unwind an extern "C" atexit frame; it would abort
    // the host and eat its own stdio buffers. Losing the summary is the
    // acceptable outcome.
    let _ = catch_unwind(AssertUnwindSafe(exit_report));
}

/// Flush the trace sink and log the per-hook summary.
///
/// This is the body of the atexit handler. By then the process is deep
/// in teardown, so everything it reaches must work without thread-local
/// state; the logger's timestamping is set up for that in
/// [`iopeek_core::logging::init`].
pub fn exit_report() {
    let Some(s) = SESSION.get() else { return };
    if let Some(sink) = &s.sink {
        sink.flush();
        let dropped = sink.dropped();
        if dropped > 0 {
            log::warn!(target: "iopeek", "{dropped} trace record(s) were dropped");
        }
    }
    if s.config.summary {
        for line in iopeek_core::stats::summary_lines(&crate::hooks::registry()) {
            log::info!(target: "iopeek", "{line}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manual(config: Config) -> Session {
        Session {
            opts: RenderOpts::from(&config),
            config,
            sink: None,
        }
    }

    #[test]
    fn gates_respect_master_and_per_api_switches() {
        let s = manual(Config::default());
        assert!(s.mpiio_on() && s.hdf5_on());

        let mut cfg = Config::default();
        cfg.hook_hdf5 = false;
        let s = manual(cfg);
        assert!(s.mpiio_on());
        assert!(!s.hdf5_on());

        let mut cfg = Config::default();
        cfg.enabled = false;
        let s = manual(cfg);
        assert!(!s.mpiio_on() && !s.hdf5_on());
    }

    #[test]
    fn render_opts_mirror_config() {
        let mut cfg = Config::default();
        cfg.preview_limit = 3;
        cfg.minmax = false;
        let s = manual(cfg);
        assert_eq!(s.opts.limit, 3);
        assert!(!s.opts.minmax);
    }
}
