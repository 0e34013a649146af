//! Exported HDF5 hooks.
//!
//! The versioned symbols `H5Gcreate2`/`H5Dcreate2` are hooked rather
//! than the 1.6-era names: since 1.8 the public macros compile
//! applications straight to the versioned entry points, so those are
//! the symbols that actually cross the PLT.
//!
//! `H5Dread` previews its buffer after forwarding (the real call is what
//! fills it); everything else describes before. Failure returns follow
//! the library's own conventions: `H5I_INVALID_HID` for id-returning
//! calls, `-1` for `herr_t` ones, so an unresolvable symbol looks to the
//! host like an ordinary library failure.

#![allow(non_snake_case)]

use crate::hdf5::{self, FAIL, Herr, Hid, Hsize, INVALID_HID};
use crate::hooks;
use crate::resolve::{self, NextFn};
use crate::session::session;
use iopeek_core::preview::ValueClass;
use iopeek_core::record::Api;
use iopeek_core::stats::HookCounter;
use std::ffi::{c_char, c_int, c_uint, c_void};
use std::time::Instant;

pub(super) static FCREATE: HookCounter = HookCounter::new("H5Fcreate");
pub(super) static FOPEN: HookCounter = HookCounter::new("H5Fopen");
pub(super) static FCLOSE: HookCounter = HookCounter::new("H5Fclose");
pub(super) static GCREATE: HookCounter = HookCounter::new("H5Gcreate2");
pub(super) static DCREATE: HookCounter = HookCounter::new("H5Dcreate2");
pub(super) static DWRITE: HookCounter = HookCounter::new("H5Dwrite");
pub(super) static DREAD: HookCounter = HookCounter::new("H5Dread");
pub(super) static SSELECT: HookCounter = HookCounter::new("H5Sselect_hyperslab");

// H5F_ACC_* bits from H5Fpublic.h.
const ACC_RDWR: c_uint = 0x1;
const ACC_TRUNC: c_uint = 0x2;
const ACC_EXCL: c_uint = 0x4;

fn create_flags_text(flags: c_uint) -> String {
    if flags & ACC_TRUNC != 0 {
        "trunc".to_string()
    } else if flags & ACC_EXCL != 0 {
        "excl".to_string()
    } else {
        format!("0x{flags:x}")
    }
}

fn open_flags_text(flags: c_uint) -> &'static str {
    if flags & ACC_RDWR != 0 { "rdwr" } else { "rdonly" }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn H5Fcreate(
    filename: *const c_char,
    flags: c_uint,
    fcpl_id: Hid,
    fapl_id: Hid,
) -> Hid {
    type Real = unsafe extern "C" fn(*const c_char, c_uint, Hid, Hid) -> Hid;
    static NEXT: NextFn = NextFn::new(c"H5Fcreate");
    let Some(addr) = NEXT.get() else { return INVALID_HID };
    let real: Real = unsafe { resolve::as_fn(addr) };

    let seq = FCREATE.next_seq();
    let s = session();
    if !s.hdf5_on() {
        return unsafe { real(filename, flags, fcpl_id, fapl_id) };
    }

    let mut rec = hooks::begin(Api::Hdf5, "H5Fcreate");
    rec.seq = seq;
    hooks::guard(|| {
        rec.target = hooks::cstr_arg(filename);
        rec.detail = Some(format!("flags={}", create_flags_text(flags)));
    });
    hooks::announce(&rec);

    let t0 = Instant::now();
    let id = unsafe { real(filename, flags, fcpl_id, fapl_id) };
    let elapsed = t0.elapsed();

    rec.ret = id;
    hooks::finish(s, &FCREATE, rec, elapsed, id >= 0);
    id
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn H5Fopen(filename: *const c_char, flags: c_uint, fapl_id: Hid) -> Hid {
    type Real = unsafe extern "C" fn(*const c_char, c_uint, Hid) -> Hid;
    static NEXT: NextFn = NextFn::new(c"H5Fopen");
    let Some(addr) = NEXT.get() else { return INVALID_HID };
    let real: Real = unsafe { resolve::as_fn(addr) };

    let seq = FOPEN.next_seq();
    let s = session();
    if !s.hdf5_on() {
        return unsafe { real(filename, flags, fapl_id) };
    }

    let mut rec = hooks::begin(Api::Hdf5, "H5Fopen");
    rec.seq = seq;
    hooks::guard(|| {
        rec.target = hooks::cstr_arg(filename);
        rec.detail = Some(format!("flags={}", open_flags_text(flags)));
    });
    hooks::announce(&rec);

    let t0 = Instant::now();
    let id = unsafe { real(filename, flags, fapl_id) };
    let elapsed = t0.elapsed();

    rec.ret = id;
    hooks::finish(s, &FOPEN, rec, elapsed, id >= 0);
    id
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn H5Fclose(file_id: Hid) -> Herr {
    type Real = unsafe extern "C" fn(Hid) -> Herr;
    static NEXT: NextFn = NextFn::new(c"H5Fclose");
    let Some(addr) = NEXT.get() else { return FAIL };
    let real: Real = unsafe { resolve::as_fn(addr) };

    let seq = FCLOSE.next_seq();
    let s = session();
    if !s.hdf5_on() {
        return unsafe { real(file_id) };
    }

    let mut rec = hooks::begin(Api::Hdf5, "H5Fclose");
    rec.seq = seq;
    hooks::announce(&rec);

    let t0 = Instant::now();
    let rc = unsafe { real(file_id) };
    let elapsed = t0.elapsed();

    rec.ret = rc as i64;
    hooks::finish(s, &FCLOSE, rec, elapsed, rc >= 0);
    rc
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn H5Gcreate2(
    loc_id: Hid,
    name: *const c_char,
    lcpl_id: Hid,
    gcpl_id: Hid,
    gapl_id: Hid,
) -> Hid {
    type Real = unsafe extern "C" fn(Hid, *const c_char, Hid, Hid, Hid) -> Hid;
    static NEXT: NextFn = NextFn::new(c"H5Gcreate2");
    let Some(addr) = NEXT.get() else { return INVALID_HID };
    let real: Real = unsafe { resolve::as_fn(addr) };

    let seq = GCREATE.next_seq();
    let s = session();
    if !s.hdf5_on() {
        return unsafe { real(loc_id, name, lcpl_id, gcpl_id, gapl_id) };
    }

    let mut rec = hooks::begin(Api::Hdf5, "H5Gcreate2");
    rec.seq = seq;
    hooks::guard(|| {
        rec.target = hooks::cstr_arg(name);
    });
    hooks::announce(&rec);

    let t0 = Instant::now();
    let id = unsafe { real(loc_id, name, lcpl_id, gcpl_id, gapl_id) };
    let elapsed = t0.elapsed();

    rec.ret = id;
    hooks::finish(s, &GCREATE, rec, elapsed, id >= 0);
    id
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn H5Dcreate2(
    loc_id: Hid,
    name: *const c_char,
    type_id: Hid,
    space_id: Hid,
    lcpl_id: Hid,
    dcpl_id: Hid,
    dapl_id: Hid,
) -> Hid {
    type Real =
        unsafe extern "C" fn(Hid, *const c_char, Hid, Hid, Hid, Hid, Hid) -> Hid;
    static NEXT: NextFn = NextFn::new(c"H5Dcreate2");
    let Some(addr) = NEXT.get() else { return INVALID_HID };
    let real: Real = unsafe { resolve::as_fn(addr) };

    let seq = DCREATE.next_seq();
    let s = session();
    if !s.hdf5_on() {
        return unsafe { real(loc_id, name, type_id, space_id, lcpl_id, dcpl_id, dapl_id) };
    }

    let mut rec = hooks::begin(Api::Hdf5, "H5Dcreate2");
    rec.seq = seq;
    hooks::guard(|| {
        rec.target = hooks::cstr_arg(name);
        let class = hdf5::classify_type(type_id);
        rec.dtype = Some(class.label().to_string());
        // Dataset extent, not bytes moved; bytes stays empty on purpose.
        rec.count = hdf5::space_npoints(space_id);
    });
    hooks::announce(&rec);

    let t0 = Instant::now();
    let id = unsafe { real(loc_id, name, type_id, space_id, lcpl_id, dcpl_id, dapl_id) };
    let elapsed = t0.elapsed();

    rec.ret = id;
    hooks::finish(s, &DCREATE, rec, elapsed, id >= 0);
    id
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn H5Dwrite(
    dset_id: Hid,
    mem_type_id: Hid,
    mem_space_id: Hid,
    file_space_id: Hid,
    dxpl_id: Hid,
    buf: *const c_void,
) -> Herr {
    type Real = unsafe extern "C" fn(Hid, Hid, Hid, Hid, Hid, *const c_void) -> Herr;
    static NEXT: NextFn = NextFn::new(c"H5Dwrite");
    let Some(addr) = NEXT.get() else { return FAIL };
    let real: Real = unsafe { resolve::as_fn(addr) };

    let seq = DWRITE.next_seq();
    let s = session();
    if !s.hdf5_on() {
        return unsafe { real(dset_id, mem_type_id, mem_space_id, file_space_id, dxpl_id, buf) };
    }

    let mut rec = hooks::begin(Api::Hdf5, "H5Dwrite");
    rec.seq = seq;
    hooks::guard(|| {
        let class = hdf5::classify_type(mem_type_id);
        match hdf5::transfer_npoints(dset_id, mem_space_id, file_space_id) {
            Some(n) => unsafe {
                hooks::describe_data(&mut rec, s, class, buf, n as usize)
            },
            None => rec.dtype = Some(class.label().to_string()),
        }
    });
    hooks::announce(&rec);

    let t0 = Instant::now();
    let rc = unsafe { real(dset_id, mem_type_id, mem_space_id, file_space_id, dxpl_id, buf) };
    let elapsed = t0.elapsed();

    rec.ret = rc as i64;
    hooks::finish(s, &DWRITE, rec, elapsed, rc >= 0);
    rc
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn H5Dread(
    dset_id: Hid,
    mem_type_id: Hid,
    mem_space_id: Hid,
    file_space_id: Hid,
    dxpl_id: Hid,
    buf: *mut c_void,
) -> Herr {
    type Real = unsafe extern "C" fn(Hid, Hid, Hid, Hid, Hid, *mut c_void) -> Herr;
    static NEXT: NextFn = NextFn::new(c"H5Dread");
    let Some(addr) = NEXT.get() else { return FAIL };
    let real: Real = unsafe { resolve::as_fn(addr) };

    let seq = DREAD.next_seq();
    let s = session();
    if !s.hdf5_on() {
        return unsafe { real(dset_id, mem_type_id, mem_space_id, file_space_id, dxpl_id, buf) };
    }

    let mut rec = hooks::begin(Api::Hdf5, "H5Dread");
    rec.seq = seq;
    let mut class = ValueClass::Unknown { elem_size: 0 };
    let mut points: Option<usize> = None;
    hooks::guard(|| {
        class = hdf5::classify_type(mem_type_id);
        points = hdf5::transfer_npoints(dset_id, mem_space_id, file_space_id)
            .map(|n| n as usize);
        match points {
            Some(n) => hooks::describe_meta(&mut rec, class, n),
            None => rec.dtype = Some(class.label().to_string()),
        }
    });
    hooks::announce(&rec);

    let t0 = Instant::now();
    let rc = unsafe { real(dset_id, mem_type_id, mem_space_id, file_space_id, dxpl_id, buf) };
    let elapsed = t0.elapsed();

    // The forward is what filled the buffer, so the preview can only be
    // rendered now. On failure the contents are undefined and stay
    // unread.
    if rc >= 0 {
        if let Some(n) = points {
            hooks::guard(|| unsafe {
                hooks::attach_preview(&mut rec, s, class, buf.cast_const(), n)
            });
        }
    }

    rec.ret = rc as i64;
    hooks::finish(s, &DREAD, rec, elapsed, rc >= 0);
    rc
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn H5Sselect_hyperslab(
    space_id: Hid,
    op: c_int,
    start: *const Hsize,
    stride: *const Hsize,
    count: *const Hsize,
    block: *const Hsize,
) -> Herr {
    type Real = unsafe extern "C" fn(
        Hid,
        c_int,
        *const Hsize,
        *const Hsize,
        *const Hsize,
        *const Hsize,
    ) -> Herr;
    static NEXT: NextFn = NextFn::new(c"H5Sselect_hyperslab");
    let Some(addr) = NEXT.get() else { return FAIL };
    let real: Real = unsafe { resolve::as_fn(addr) };

    let seq = SSELECT.next_seq();
    let s = session();
    if !s.hdf5_on() {
        return unsafe { real(space_id, op, start, stride, count, block) };
    }

    let mut rec = hooks::begin(Api::Hdf5, "H5Sselect_hyperslab");
    rec.seq = seq;
    hooks::guard(|| unsafe {
        let ndims = hdf5::space_ndims(space_id).unwrap_or(0);
        rec.detail = Some(format!(
            "slab {} start={} stride={} count={} block={}",
            hdf5::select_op_name(op),
            hdf5::dims_text(start, ndims),
            hdf5::dims_text(stride, ndims),
            hdf5::dims_text(count, ndims),
            hdf5::dims_text(block, ndims),
        ));
    });
    hooks::announce(&rec);

    let t0 = Instant::now();
    let rc = unsafe { real(space_id, op, start, stride, count, block) };
    let elapsed = t0.elapsed();

    rec.ret = rc as i64;
    hooks::finish(s, &SSELECT, rec, elapsed, rc >= 0);
    rc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_texts() {
        assert_eq!(create_flags_text(ACC_TRUNC), "trunc");
        assert_eq!(create_flags_text(ACC_EXCL), "excl");
        assert_eq!(create_flags_text(0x20), "0x20");
        assert_eq!(open_flags_text(ACC_RDWR), "rdwr");
        assert_eq!(open_flags_text(0), "rdonly");
    }

    // No libhdf5 in the test binary: every hook must miss its next
    // symbol and fail with the library's own error conventions.
    #[test]
    fn hooks_fail_closed_without_a_real_library() {
        let id = unsafe { H5Fcreate(std::ptr::null(), ACC_TRUNC, 0, 0) };
        assert_eq!(id, INVALID_HID);

        let rc = unsafe { H5Fclose(42) };
        assert_eq!(rc, FAIL);

        let rc = unsafe { H5Dwrite(1, 2, 0, 0, 0, std::ptr::null()) };
        assert_eq!(rc, FAIL);

        assert_eq!(FCREATE.calls(), 0);
        assert_eq!(DWRITE.calls(), 0);
    }
}
