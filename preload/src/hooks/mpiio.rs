//! Exported MPI-IO hooks.
//!
//! Each function here shadows its namesake from the MPI library behind
//! us in the link chain. Argument lists match the C prototypes with
//! handles widened to `usize` (see the ABI notes in [`crate::mpi`]);
//! `MPI_Status*` and `MPI_Info` are carried opaquely and never touched.
//!
//! When the next definition cannot be resolved the hook fails the call
//! with `-1`, which no MPI implementation uses for `MPI_SUCCESS`, instead
//! of crashing through a null pointer.

#![allow(non_snake_case)]

use crate::hooks;
use crate::mpi::{self, Handle, MPI_SUCCESS};
use crate::resolve::{self, NextFn};
use crate::session::{Session, session};
use iopeek_core::record::Api;
use iopeek_core::stats::HookCounter;
use std::ffi::{c_char, c_int, c_void};
use std::time::Instant;

pub(super) static OPEN: HookCounter = HookCounter::new("MPI_File_open");
pub(super) static CLOSE: HookCounter = HookCounter::new("MPI_File_close");
pub(super) static WRITE: HookCounter = HookCounter::new("MPI_File_write");
pub(super) static WRITE_AT: HookCounter = HookCounter::new("MPI_File_write_at");
pub(super) static WRITE_ALL: HookCounter = HookCounter::new("MPI_File_write_all");
pub(super) static WRITE_ORDERED: HookCounter = HookCounter::new("MPI_File_write_ordered");

/// Returned when the real symbol is unreachable; outside every MPI error
/// class, and callers only compare against `MPI_SUCCESS` anyway.
const NO_NEXT: c_int = -1;

/// Common body of the four write-family hooks.
unsafe fn traced_write(
    s: &Session,
    func: &'static str,
    counter: &'static HookCounter,
    seq: u64,
    offset: Option<i64>,
    buf: *const c_void,
    count: c_int,
    datatype: Handle,
    forward: impl FnOnce() -> c_int,
) -> c_int {
    let mut rec = hooks::begin(Api::Mpiio, func);
    rec.seq = seq;
    rec.offset = offset;
    let n = usize::try_from(count).unwrap_or(0);
    hooks::guard(|| {
        let class = mpi::classify(datatype);
        unsafe { hooks::describe_data(&mut rec, s, class, buf, n) };
    });
    hooks::announce(&rec);

    let t0 = Instant::now();
    let rc = forward();
    let elapsed = t0.elapsed();

    rec.ret = rc as i64;
    hooks::finish(s, counter, rec, elapsed, rc == MPI_SUCCESS);
    rc
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn MPI_File_open(
    comm: Handle,
    filename: *const c_char,
    amode: c_int,
    info: Handle,
    fh: *mut c_void,
) -> c_int {
    type Real =
        unsafe extern "C" fn(Handle, *const c_char, c_int, Handle, *mut c_void) -> c_int;
    static NEXT: NextFn = NextFn::new(c"MPI_File_open");
    let Some(addr) = NEXT.get() else { return NO_NEXT };
    let real: Real = unsafe { resolve::as_fn(addr) };

    let seq = OPEN.next_seq();
    let s = session();
    if !s.mpiio_on() {
        return unsafe { real(comm, filename, amode, info, fh) };
    }

    let mut rec = hooks::begin(Api::Mpiio, "MPI_File_open");
    rec.seq = seq;
    hooks::guard(|| {
        rec.target = hooks::cstr_arg(filename);
        rec.detail = Some(format!("mode={}", mpi::describe_amode(amode)));
    });
    hooks::announce(&rec);

    let t0 = Instant::now();
    let rc = unsafe { real(comm, filename, amode, info, fh) };
    let elapsed = t0.elapsed();

    rec.ret = rc as i64;
    hooks::finish(s, &OPEN, rec, elapsed, rc == MPI_SUCCESS);
    rc
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn MPI_File_close(fh: *mut c_void) -> c_int {
    type Real = unsafe extern "C" fn(*mut c_void) -> c_int;
    static NEXT: NextFn = NextFn::new(c"MPI_File_close");
    let Some(addr) = NEXT.get() else { return NO_NEXT };
    let real: Real = unsafe { resolve::as_fn(addr) };

    let seq = CLOSE.next_seq();
    let s = session();
    if !s.mpiio_on() {
        return unsafe { real(fh) };
    }

    let mut rec = hooks::begin(Api::Mpiio, "MPI_File_close");
    rec.seq = seq;
    hooks::announce(&rec);

    let t0 = Instant::now();
    let rc = unsafe { real(fh) };
    let elapsed = t0.elapsed();

    rec.ret = rc as i64;
    hooks::finish(s, &CLOSE, rec, elapsed, rc == MPI_SUCCESS);
    rc
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn MPI_File_write(
    fh: Handle,
    buf: *const c_void,
    count: c_int,
    datatype: Handle,
    status: *mut c_void,
) -> c_int {
    type Real =
        unsafe extern "C" fn(Handle, *const c_void, c_int, Handle, *mut c_void) -> c_int;
    static NEXT: NextFn = NextFn::new(c"MPI_File_write");
    let Some(addr) = NEXT.get() else { return NO_NEXT };
    let real: Real = unsafe { resolve::as_fn(addr) };

    let seq = WRITE.next_seq();
    let s = session();
    if !s.mpiio_on() {
        return unsafe { real(fh, buf, count, datatype, status) };
    }
    unsafe {
        traced_write(s, "MPI_File_write", &WRITE, seq, None, buf, count, datatype, || {
            real(fh, buf, count, datatype, status)
        })
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn MPI_File_write_at(
    fh: Handle,
    offset: i64,
    buf: *const c_void,
    count: c_int,
    datatype: Handle,
    status: *mut c_void,
) -> c_int {
    type Real = unsafe extern "C" fn(
        Handle,
        i64,
        *const c_void,
        c_int,
        Handle,
        *mut c_void,
    ) -> c_int;
    static NEXT: NextFn = NextFn::new(c"MPI_File_write_at");
    let Some(addr) = NEXT.get() else { return NO_NEXT };
    let real: Real = unsafe { resolve::as_fn(addr) };

    let seq = WRITE_AT.next_seq();
    let s = session();
    if !s.mpiio_on() {
        return unsafe { real(fh, offset, buf, count, datatype, status) };
    }
    unsafe {
        traced_write(
            s,
            "MPI_File_write_at",
            &WRITE_AT,
            seq,
            Some(offset),
            buf,
            count,
            datatype,
            || real(fh, offset, buf, count, datatype, status),
        )
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn MPI_File_write_all(
    fh: Handle,
    buf: *const c_void,
    count: c_int,
    datatype: Handle,
    status: *mut c_void,
) -> c_int {
    type Real =
        unsafe extern "C" fn(Handle, *const c_void, c_int, Handle, *mut c_void) -> c_int;
    static NEXT: NextFn = NextFn::new(c"MPI_File_write_all");
    let Some(addr) = NEXT.get() else { return NO_NEXT };
    let real: Real = unsafe { resolve::as_fn(addr) };

    let seq = WRITE_ALL.next_seq();
    let s = session();
    if !s.mpiio_on() {
        return unsafe { real(fh, buf, count, datatype, status) };
    }
    unsafe {
        traced_write(
            s,
            "MPI_File_write_all",
            &WRITE_ALL,
            seq,
            None,
            buf,
            count,
            datatype,
            || real(fh, buf, count, datatype, status),
        )
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn MPI_File_write_ordered(
    fh: Handle,
    buf: *const c_void,
    count: c_int,
    datatype: Handle,
    status: *mut c_void,
) -> c_int {
    type Real =
        unsafe extern "C" fn(Handle, *const c_void, c_int, Handle, *mut c_void) -> c_int;
    static NEXT: NextFn = NextFn::new(c"MPI_File_write_ordered");
    let Some(addr) = NEXT.get() else { return NO_NEXT };
    let real: Real = unsafe { resolve::as_fn(addr) };

    let seq = WRITE_ORDERED.next_seq();
    let s = session();
    if !s.mpiio_on() {
        return unsafe { real(fh, buf, count, datatype, status) };
    }
    unsafe {
        traced_write(
            s,
            "MPI_File_write_ordered",
            &WRITE_ORDERED,
            seq,
            None,
            buf,
            count,
            datatype,
            || real(fh, buf, count, datatype, status),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // No MPI library is linked into the test binary, so the next-symbol
    // lookup must miss and the hooks must fail closed.
    #[test]
    fn hooks_fail_closed_without_a_real_library() {
        let rc = unsafe {
            MPI_File_write(0, std::ptr::null(), 0, 0, std::ptr::null_mut())
        };
        assert_eq!(rc, NO_NEXT);

        let rc = unsafe {
            MPI_File_open(
                0,
                std::ptr::null(),
                0,
                0,
                std::ptr::null_mut(),
            )
        };
        assert_eq!(rc, NO_NEXT);

        let rc = unsafe { MPI_File_close(std::ptr::null_mut()) };
        assert_eq!(rc, NO_NEXT);

        // Failing before the call means failing before the count.
        assert_eq!(WRITE.calls(), 0);
        assert_eq!(OPEN.calls(), 0);
    }
}
