//! Shared plumbing for the exported hooks.
//!
//! Each hook follows the same shape: resolve the real symbol, take a
//! sequence number, describe the call into a [`CallRecord`], announce
//! it, forward with the clock running, then account/log/persist the
//! finished record. The sequence number is taken before the on/off
//! check so call numbering stays continuous across toggled runs. The
//! helpers here are that shape's common parts; the per-API argument
//! picking lives with the hooks themselves.
//!
//! Diagnostics are strictly best-effort. The describe step walks
//! caller-owned pointers, so it runs under a panic guard; if it blows up
//! the host still gets its I/O done.

pub mod hdf5;
pub mod mpiio;

use crate::session::Session;
use iopeek_core::preview::{self, ValueClass};
use iopeek_core::record::{Api, CallRecord};
use iopeek_core::stats::HookCounter;
use std::ffi::{CStr, c_char, c_void};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

/// Every counter in the shim, in summary order.
pub fn registry() -> [&'static HookCounter; 14] {
    [
        &mpiio::OPEN,
        &mpiio::CLOSE,
        &mpiio::WRITE,
        &mpiio::WRITE_AT,
        &mpiio::WRITE_ALL,
        &mpiio::WRITE_ORDERED,
        &hdf5::FCREATE,
        &hdf5::FOPEN,
        &hdf5::FCLOSE,
        &hdf5::GCREATE,
        &hdf5::DCREATE,
        &hdf5::DWRITE,
        &hdf5::DREAD,
        &hdf5::SSELECT,
    ]
}

/// Start a record for `func` with rank and world size resolved.
pub(crate) fn begin(api: Api, func: &'static str) -> CallRecord {
    let (rank, world) = crate::mpi::world();
    CallRecord::begin(api, func, rank, world)
}

/// Run the pointer-walking diagnostic step; a panic in it is swallowed.
pub(crate) fn guard(f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        log::error!(target: "iopeek", "diagnostic step panicked; record is partial");
    }
}

/// Log the call line before it is forwarded, matching the original
/// tracer's print-then-call behavior. With a crashing forward this line
/// is the last trace of the call, which is exactly when it matters.
pub(crate) fn announce(rec: &CallRecord) {
    log::info!(target: "iopeek", "{}", call_line(rec));
}

/// Account, log the completion and persist one finished record.
pub(crate) fn finish(
    s: &Session,
    counter: &'static HookCounter,
    mut rec: CallRecord,
    elapsed: Duration,
    ok: bool,
) {
    rec.elapsed_us = elapsed.as_micros() as u64;
    counter.note(rec.bytes.unwrap_or(0), elapsed, ok);
    log::debug!(target: "iopeek", "{}", done_line(&rec));
    if let Some(sink) = &s.sink {
        sink.append(&rec);
    }
}

/// The pre-forward line, e.g.
/// `MPI_File_write_at#3 out.dat [int x 256 = 1024B] off=2048 { 1 2 ... } min=1 max=9`.
fn call_line(rec: &CallRecord) -> String {
    let mut s = format!("{}#{}", rec.func, rec.seq);
    if let Some(target) = &rec.target {
        s.push(' ');
        s.push_str(target);
    }
    if let Some(detail) = &rec.detail {
        s.push(' ');
        s.push_str(detail);
    }
    if let Some(count) = rec.count {
        let dtype = rec.dtype.as_deref().unwrap_or("?");
        match rec.bytes {
            Some(bytes) => s.push_str(&format!(" [{dtype} x {count} = {bytes}B]")),
            None => s.push_str(&format!(" [{dtype} x {count}]")),
        }
    }
    if let Some(off) = rec.offset {
        s.push_str(&format!(" off={off}"));
    }
    if let Some(preview) = &rec.preview {
        s.push(' ');
        s.push_str(preview);
    }
    if let (Some(min), Some(max)) = (&rec.min, &rec.max) {
        s.push_str(&format!(" min={min} max={max}"));
    }
    s
}

/// The post-forward line: outcome plus anything only known afterwards
/// (a read's preview arrives here).
fn done_line(rec: &CallRecord) -> String {
    let mut s = format!("{}#{}", rec.func, rec.seq);
    if let Some(preview) = &rec.preview {
        s.push(' ');
        s.push_str(preview);
    }
    if let (Some(min), Some(max)) = (&rec.min, &rec.max) {
        s.push_str(&format!(" min={min} max={max}"));
    }
    s.push_str(&format!(" rc={} t={}us", rec.ret, rec.elapsed_us));
    s
}

/// Copy a C string argument, if the caller passed one.
pub(crate) fn cstr_arg(p: *const c_char) -> Option<String> {
    if p.is_null() {
        return None;
    }
    Some(unsafe { CStr::from_ptr(p) }.to_string_lossy().into_owned())
}

/// Fill the metadata fields (type, count, bytes) for a data transfer.
/// Byte volume can only be computed when the element size is known.
pub(crate) fn describe_meta(rec: &mut CallRecord, class: ValueClass, count: usize) {
    rec.dtype = Some(class.label().to_string());
    rec.count = Some(count as u64);
    let esize = class.elem_size();
    if esize > 0 {
        rec.bytes = Some(count as u64 * esize as u64);
    }
}

/// Render preview and extrema from a raw buffer into `rec`.
///
/// # Safety
/// `buf` must point to at least `count` elements of the class's size, or
/// be null.
pub(crate) unsafe fn attach_preview(
    rec: &mut CallRecord,
    s: &Session,
    class: ValueClass,
    buf: *const c_void,
    count: usize,
) {
    let esize = class.elem_size();
    if !s.config.preview || buf.is_null() || esize == 0 || count == 0 {
        return;
    }
    let raw =
        unsafe { std::slice::from_raw_parts(buf.cast::<u8>(), count.saturating_mul(esize)) };
    let out = preview::render(class, raw, count, &s.opts);
    rec.preview = out.preview;
    rec.min = out.min;
    rec.max = out.max;
}

/// [`describe_meta`] plus [`attach_preview`], for calls whose buffer is
/// already meaningful on entry.
///
/// # Safety
/// Same contract as [`attach_preview`].
pub(crate) unsafe fn describe_data(
    rec: &mut CallRecord,
    s: &Session,
    class: ValueClass,
    buf: *const c_void,
    count: usize,
) {
    describe_meta(rec, class, count);
    unsafe { attach_preview(rec, s, class, buf, count) };
}
