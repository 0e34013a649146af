//! HDF5 ABI handling without hdf5.h.
//!
//! Unlike MPI there is only one HDF5 ABI to speak: `hid_t` has been a
//! 64-bit integer since 1.10, and the numeric values of the type-class
//! and selection-operator enums are fixed by the library's public
//! headers. What the shim cannot know statically, it asks the real
//! library at run time: element type and size through `H5Tget_class` /
//! `H5Tget_size` / `H5Tget_sign`, element counts through the dataspace
//! query calls. None of those symbols are hooked here, so the lookups
//! cannot recurse into our own exports.

use crate::resolve::{self, NextFn};
use iopeek_core::preview::ValueClass;
use std::ffi::c_int;

pub type Hid = i64;
pub type Herr = c_int;
pub type Hsize = u64;

/// `H5S_ALL`: "the whole dataspace" pseudo-id.
pub const H5S_ALL: Hid = 0;
/// Failure value for `herr_t` returns.
pub const FAIL: Herr = -1;
/// Failure value for `hid_t` returns (`H5I_INVALID_HID`).
pub const INVALID_HID: Hid = -1;

// H5T_class_t values from H5Tpublic.h.
mod h5t {
    use std::ffi::c_int;
    pub const INTEGER: c_int = 0;
    pub const FLOAT: c_int = 1;
    pub const STRING: c_int = 3;
    // H5T_sign_t: SGN_2 is two's-complement signed.
    pub const SGN_2: c_int = 1;
}

static NEXT_TGET_CLASS: NextFn = NextFn::new(c"H5Tget_class");
static NEXT_TGET_SIZE: NextFn = NextFn::new(c"H5Tget_size");
static NEXT_TGET_SIGN: NextFn = NextFn::new(c"H5Tget_sign");
static NEXT_SGET_NPOINTS: NextFn = NextFn::new(c"H5Sget_simple_extent_npoints");
static NEXT_SGET_NDIMS: NextFn = NextFn::new(c"H5Sget_simple_extent_ndims");
static NEXT_DGET_SPACE: NextFn = NextFn::new(c"H5Dget_space");
static NEXT_SCLOSE: NextFn = NextFn::new(c"H5Sclose");

fn tget_class(type_id: Hid) -> Option<c_int> {
    type F = unsafe extern "C" fn(Hid) -> c_int;
    let real: F = unsafe { resolve::as_fn(NEXT_TGET_CLASS.get()?) };
    let class = unsafe { real(type_id) };
    (class >= 0).then_some(class)
}

fn tget_size(type_id: Hid) -> Option<usize> {
    type F = unsafe extern "C" fn(Hid) -> usize;
    let real: F = unsafe { resolve::as_fn(NEXT_TGET_SIZE.get()?) };
    let size = unsafe { real(type_id) };
    (size > 0).then_some(size)
}

fn tget_sign(type_id: Hid) -> Option<c_int> {
    type F = unsafe extern "C" fn(Hid) -> c_int;
    let real: F = unsafe { resolve::as_fn(NEXT_TGET_SIGN.get()?) };
    let sign = unsafe { real(type_id) };
    (sign >= 0).then_some(sign)
}

/// Work out how to render buffers of the given datatype id.
pub fn classify_type(type_id: Hid) -> ValueClass {
    let size = tget_size(type_id).unwrap_or(0);
    match tget_class(type_id) {
        Some(h5t::INTEGER) => {
            // Single-byte signed integers read best as text; that is what
            // H5T_NATIVE_CHAR maps to.
            let signed = tget_sign(type_id) == Some(h5t::SGN_2);
            if size == 1 && signed {
                ValueClass::Char
            } else {
                ValueClass::Int { width: size, signed }
            }
        }
        Some(h5t::FLOAT) => ValueClass::Float { width: size },
        Some(h5t::STRING) => ValueClass::Char,
        _ => ValueClass::Unknown { elem_size: size },
    }
}

/// Element count of a concrete dataspace id.
pub fn space_npoints(space_id: Hid) -> Option<u64> {
    type F = unsafe extern "C" fn(Hid) -> i64;
    let real: F = unsafe { resolve::as_fn(NEXT_SGET_NPOINTS.get()?) };
    let n = unsafe { real(space_id) };
    (n >= 0).then_some(n as u64)
}

/// Rank (dimension count) of a dataspace.
pub fn space_ndims(space_id: Hid) -> Option<usize> {
    type F = unsafe extern "C" fn(Hid) -> c_int;
    let real: F = unsafe { resolve::as_fn(NEXT_SGET_NDIMS.get()?) };
    let n = unsafe { real(space_id) };
    (n >= 0).then_some(n as usize)
}

/// Element count of an `H5Dread`/`H5Dwrite` transfer.
///
/// The memory dataspace wins when given; `H5S_ALL` falls through to the
/// file dataspace and finally to the dataset's own extent, which costs a
/// temporary dataspace id that must be closed again.
pub fn transfer_npoints(dset: Hid, mem_space: Hid, file_space: Hid) -> Option<u64> {
    if mem_space != H5S_ALL {
        return space_npoints(mem_space);
    }
    if file_space != H5S_ALL {
        return space_npoints(file_space);
    }

    type GetSpaceFn = unsafe extern "C" fn(Hid) -> Hid;
    type CloseFn = unsafe extern "C" fn(Hid) -> Herr;
    let get_space: GetSpaceFn = unsafe { resolve::as_fn(NEXT_DGET_SPACE.get()?) };
    let space = unsafe { get_space(dset) };
    if space < 0 {
        return None;
    }
    let n = space_npoints(space);
    if let Some(addr) = NEXT_SCLOSE.get() {
        let close: CloseFn = unsafe { resolve::as_fn(addr) };
        unsafe { close(space) };
    }
    n
}

/// Name of an `H5S_seloper_t` value, for hyperslab log lines.
pub fn select_op_name(op: c_int) -> &'static str {
    match op {
        0 => "set",
        1 => "or",
        2 => "and",
        3 => "xor",
        4 => "notb",
        5 => "nota",
        6 => "append",
        7 => "prepend",
        _ => "?",
    }
}

/// Render a dims array like `[4x8]`; NULL means "all ones".
///
/// # Safety
/// A non-null `ptr` must point to at least `ndims` readable elements.
pub unsafe fn dims_text(ptr: *const Hsize, ndims: usize) -> String {
    if ptr.is_null() {
        return "-".to_string();
    }
    let dims = unsafe { std::slice::from_raw_parts(ptr, ndims) };
    let parts: Vec<String> = dims.iter().map(|d| d.to_string()).collect();
    format!("[{}]", parts.join("x"))
}

#[cfg(test)]
mod tests {
    use super::*;

    // The test binary links no libhdf5, so every introspection path must
    // degrade instead of crashing.
    #[test]
    fn classification_without_a_library_degrades() {
        assert_eq!(
            classify_type(50331741),
            ValueClass::Unknown { elem_size: 0 }
        );
        assert_eq!(space_npoints(1), None);
        assert_eq!(transfer_npoints(7, H5S_ALL, H5S_ALL), None);
    }

    #[test]
    fn select_ops_have_names() {
        assert_eq!(select_op_name(0), "set");
        assert_eq!(select_op_name(1), "or");
        assert_eq!(select_op_name(99), "?");
    }

    #[test]
    fn dims_render_compactly() {
        let dims: [Hsize; 3] = [4, 8, 2];
        assert_eq!(unsafe { dims_text(dims.as_ptr(), 3) }, "[4x8x2]");
        assert_eq!(unsafe { dims_text(std::ptr::null(), 3) }, "-");
        let one: [Hsize; 1] = [16];
        assert_eq!(unsafe { dims_text(one.as_ptr(), 1) }, "[16]");
    }
}
