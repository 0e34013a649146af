//! Logger wiring for the shim and the tooling around it.
//!
//! One `fern` dispatch: stderr always, plus an optional per-process log
//! file. Every line carries the pid and the MPI rank so interleaved
//! output from a parallel job can be pulled apart afterwards. The rank
//! is not known until the host calls `MPI_Init`, so it lives in a global
//! the MPI layer updates as soon as it learns it; until then lines show
//! `rank=?`.
//!
//! Timestamps are local-time rfc3339. The UTC offset is resolved once in
//! [`init`] and baked into the format closure: `chrono::Local` resolves
//! the timezone through a thread local, and glibc destroys those before
//! atexit handlers run, so the exit summary must not touch it.

use crate::config::Config;
use chrono::FixedOffset;
use std::sync::atomic::{AtomicI32, Ordering};

static CURRENT_RANK: AtomicI32 = AtomicI32::new(-1);

/// Publish the rank stamped on subsequent log lines.
pub fn set_rank(rank: i32) {
    CURRENT_RANK.store(rank, Ordering::Relaxed);
}

/// Last published rank, `-1` when unknown.
pub fn current_rank() -> i32 {
    CURRENT_RANK.load(Ordering::Relaxed)
}

fn render_line(
    offset: FixedOffset,
    level: log::Level,
    target: &str,
    message: &std::fmt::Arguments,
) -> String {
    let rank = CURRENT_RANK.load(Ordering::Relaxed);
    let mut tag = String::new();
    if rank < 0 {
        tag.push('?');
    } else {
        tag.push_str(&rank.to_string());
    }
    format!(
        "[{}][{}][{}][pid={}][rank={}] {}",
        chrono::Utc::now()
            .with_timezone(&offset)
            .format("%Y-%m-%dT%H:%M:%S%.3f%:z"),
        level,
        target,
        std::process::id(),
        tag,
        message
    )
}

/// Install the global logger according to `cfg`.
///
/// Fails if the log file cannot be opened or if the host process already
/// installed a logger of its own. The caller treats the latter as
/// harmless: our `log` macros then feed whatever the host set up.
pub fn init(cfg: &Config) -> Result<(), fern::InitError> {
    // The one Local::now() in the crate. Per-record stamps go through
    // Utc plus this offset so nothing thread-local is read at exit time.
    let offset = *chrono::Local::now().offset();
    let mut dispatch = fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "{}",
                render_line(offset, record.level(), record.target(), message)
            ))
        })
        .level(cfg.log_level)
        .chain(std::io::stderr());

    if let Some(pattern) = &cfg.log_file {
        let path = crate::sink::expand_path(pattern, current_rank(), std::process::id());
        dispatch = dispatch.chain(fern::log_file(path)?);
    }

    dispatch.apply()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // One test because the rank tag is process-global.
    #[test]
    fn line_carries_pid_rank_and_utc_offset() {
        let tz = FixedOffset::east_opt(2 * 3600).unwrap();
        set_rank(3);
        let line = render_line(tz, log::Level::Info, "iopeek", &format_args!("opened x"));
        assert!(line.contains("[INFO]"));
        assert!(line.contains("[iopeek]"));
        assert!(line.contains(&format!("[pid={}]", std::process::id())));
        assert!(line.contains("[rank=3]"));
        assert!(line.contains("+02:00]"), "rfc3339 offset missing: {line}");
        assert!(line.ends_with("opened x"));

        set_rank(-1);
        let line = render_line(tz, log::Level::Warn, "iopeek", &format_args!("x"));
        assert!(line.contains("[rank=?]"));
    }
}
