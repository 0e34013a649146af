//! Real-symbol resolution through the dynamic linker.
//!
//! Every hook exported by this library shadows a symbol that still exists
//! in the real MPI or HDF5 library further down the link chain. The first
//! time a hook fires it asks the linker for "the next definition after
//! mine" and caches the address; after that a forward is one atomic load.
//!
//! A lookup miss is survivable: the hook logs it once and returns an
//! error code instead of jumping through a null pointer.

use std::ffi::{CStr, c_void};
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

/// Lazily-resolved pointer to the next definition of one symbol.
///
/// `const`-constructible so each hook keeps one in a static beside it.
pub struct NextFn {
    name: &'static CStr,
    cache: AtomicPtr<c_void>,
    warned: AtomicBool,
}

impl NextFn {
    pub const fn new(name: &'static CStr) -> Self {
        Self {
            name,
            cache: AtomicPtr::new(std::ptr::null_mut()),
            warned: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        self.name.to_str().unwrap_or("<non-utf8>")
    }

    /// Address of the real function, resolving and caching on first use.
    ///
    /// Two threads racing the first call both resolve to the same address,
    /// so the unsynchronized double store is benign.
    pub fn get(&self) -> Option<*mut c_void> {
        let cached = self.cache.load(Ordering::Acquire);
        if !cached.is_null() {
            return Some(cached);
        }
        let found = unsafe { libc::dlsym(libc::RTLD_NEXT, self.name.as_ptr()) };
        if found.is_null() {
            if !self.warned.swap(true, Ordering::Relaxed) {
                log::error!(
                    target: "iopeek",
                    "cannot resolve next '{}': {}; calls will fail",
                    self.name(),
                    dlerror_text()
                );
            }
            return None;
        }
        self.cache.store(found, Ordering::Release);
        Some(found)
    }
}

/// One-shot global lookup, used to sniff which MPI implementation is
/// loaded by probing for symbols only one of them exports.
pub fn lookup_global(name: &CStr) -> Option<*mut c_void> {
    let p = unsafe { libc::dlsym(libc::RTLD_DEFAULT, name.as_ptr()) };
    (!p.is_null()).then_some(p)
}

fn dlerror_text() -> String {
    let err = unsafe { libc::dlerror() };
    if err.is_null() {
        return "symbol not found".to_string();
    }
    unsafe { CStr::from_ptr(err) }.to_string_lossy().into_owned()
}

/// Cast a resolved address to a typed extern fn.
///
/// # Safety
/// `F` must match the real function's signature and ABI exactly.
pub unsafe fn as_fn<F: Copy>(addr: *mut c_void) -> F {
    debug_assert_eq!(std::mem::size_of::<F>(), std::mem::size_of::<*mut c_void>());
    unsafe { std::mem::transmute_copy(&addr) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_and_caches_a_libc_symbol() {
        static GETPID: NextFn = NextFn::new(c"getpid");
        let addr = GETPID.get().expect("getpid must resolve");
        // Cached path returns the same address.
        assert_eq!(GETPID.get(), Some(addr));

        type GetpidFn = unsafe extern "C" fn() -> libc::pid_t;
        let real: GetpidFn = unsafe { as_fn(addr) };
        assert_eq!(unsafe { real() } as u32, std::process::id());
    }

    #[test]
    fn missing_symbol_is_a_miss_not_a_crash() {
        static MISSING: NextFn = NextFn::new(c"iopeek_no_such_symbol_750c");
        assert_eq!(MISSING.get(), None);
        assert_eq!(MISSING.get(), None);
    }

    #[test]
    fn global_probe_sees_libc() {
        assert!(lookup_global(c"malloc").is_some());
        assert!(lookup_global(c"iopeek_no_such_global_750c").is_none());
    }
}
