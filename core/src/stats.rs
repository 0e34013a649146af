//! Per-hook call accounting.
//!
//! Each intercepted function owns one static [`HookCounter`]; hooks bump
//! it lock-free on every call and the process-exit summary walks the
//! full set. Plain relaxed atomics are enough here: the numbers are
//! advisory diagnostics, not synchronization.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Running totals for one intercepted function.
#[derive(Debug)]
pub struct HookCounter {
    name: &'static str,
    calls: AtomicU64,
    bytes: AtomicU64,
    elapsed_us: AtomicU64,
    errors: AtomicU64,
}

impl HookCounter {
    /// `const` so counters can live in statics next to the hooks.
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            calls: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            elapsed_us: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Count one interception and return its 1-based sequence number.
    /// Happens on entry, before the forward.
    pub fn next_seq(&self) -> u64 {
        self.calls.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Fold in the outcome of a forwarded call.
    pub fn note(&self, bytes: u64, elapsed: Duration, ok: bool) {
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
        self.elapsed_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        if !ok {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            name: self.name,
            calls: self.calls.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            elapsed_us: self.elapsed_us.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of one counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub name: &'static str,
    pub calls: u64,
    pub bytes: u64,
    pub elapsed_us: u64,
    pub errors: u64,
}

/// Render the exit summary over every counter that actually fired.
///
/// First line is the grand total, then one indented line per function in
/// registry order. Returns nothing when no hook fired so a silent run
/// stays silent.
pub fn summary_lines(counters: &[&HookCounter]) -> Vec<String> {
    let snaps: Vec<CounterSnapshot> = counters
        .iter()
        .map(|c| c.snapshot())
        .filter(|s| s.calls > 0)
        .collect();
    if snaps.is_empty() {
        return Vec::new();
    }

    let calls: u64 = snaps.iter().map(|s| s.calls).sum();
    let bytes: u64 = snaps.iter().map(|s| s.bytes).sum();
    let elapsed: u64 = snaps.iter().map(|s| s.elapsed_us).sum();
    let width = snaps.iter().map(|s| s.name.len()).max().unwrap_or(0);

    let mut lines = vec![format!(
        "intercepted {} call(s), {} byte(s), {} across {} function(s)",
        calls,
        bytes,
        humantime::format_duration(Duration::from_micros(elapsed)),
        snaps.len()
    )];
    for s in snaps {
        lines.push(format!(
            "  {:width$}  calls={} bytes={} time={} errors={}",
            s.name,
            s.calls,
            s.bytes,
            humantime::format_duration(Duration::from_micros(s.elapsed_us)),
            s.errors,
        ));
    }
    lines
}
