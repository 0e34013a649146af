//! MPI ABI handling without mpi.h.
//!
//! The shim is built against no particular MPI implementation, yet it has
//! to read datatype and communicator handles off the wire. The two ABIs
//! in practical use differ exactly here: MPICH-family libraries (MPICH,
//! Intel MPI, MVAPICH, Cray MPT) encode predefined handles as 32-bit
//! magic integers, while Open MPI hands out addresses of exported global
//! objects. Which family is loaded is sniffed once through the dynamic
//! linker and every handle is interpreted accordingly.
//!
//! Key responsibilities:
//! - Detect the loaded MPI flavor from its exported symbols.
//! - Map datatype handles to a [`ValueClass`] for buffer rendering.
//! - Discover the calling rank and world size, falling back to launcher
//!   environment variables when MPI is not initialized yet.
//! - Decode `MPI_File_open` access-mode bits for log lines.
//!
//! Handles travel through the hooks as `usize`: wide enough for Open
//! MPI's pointers, and MPICH's 32-bit constants arrive zero-extended in
//! the low half.

use crate::resolve::{self, NextFn};
use iopeek_core::preview::ValueClass;
use std::ffi::{CStr, c_int};
use std::sync::OnceLock;

/// Opaque MPI handle as it crosses our hooks.
pub type Handle = usize;

pub const MPI_SUCCESS: c_int = 0;

/// Which MPI ABI family the process is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    OpenMpi,
    Mpich,
    /// No MPI library visible, e.g. a serial HDF5 program.
    Absent,
}

/// Predefined MPICH handle constants, stable across the MPICH family.
mod mpich {
    pub const COMM_WORLD: u32 = 0x4400_0000;
    pub const CHAR: u32 = 0x4c00_0101;
    pub const SIGNED_CHAR: u32 = 0x4c00_0118;
    pub const UNSIGNED_CHAR: u32 = 0x4c00_0102;
    pub const BYTE: u32 = 0x4c00_010d;
    pub const SHORT: u32 = 0x4c00_0203;
    pub const UNSIGNED_SHORT: u32 = 0x4c00_0204;
    pub const INT: u32 = 0x4c00_0405;
    pub const UNSIGNED: u32 = 0x4c00_0406;
    pub const LONG: u32 = 0x4c00_0807;
    pub const UNSIGNED_LONG: u32 = 0x4c00_0808;
    pub const LONG_LONG: u32 = 0x4c00_0809;
    pub const UNSIGNED_LONG_LONG: u32 = 0x4c00_0819;
    pub const FLOAT: u32 = 0x4c00_040a;
    pub const DOUBLE: u32 = 0x4c00_080b;
}

static FLAVOR: OnceLock<Flavor> = OnceLock::new();

/// Sniff the loaded MPI implementation, once per process.
pub fn flavor() -> Flavor {
    *FLAVOR.get_or_init(|| {
        if resolve::lookup_global(c"ompi_mpi_comm_world").is_some() {
            Flavor::OpenMpi
        } else if resolve::lookup_global(c"MPI_Comm_rank").is_some() {
            // Everything else that speaks MPI uses the MPICH handle ABI.
            Flavor::Mpich
        } else {
            Flavor::Absent
        }
    })
}

/* ─────────────────────── datatype classification ─────────────────────── */

fn classify_mpich(handle: Handle) -> Option<ValueClass> {
    use mpich::*;
    // MPICH handles are 32-bit ints; the register's upper half is noise.
    let class = match handle as u32 {
        CHAR => ValueClass::Char,
        BYTE => ValueClass::Byte,
        SIGNED_CHAR => ValueClass::Int { width: 1, signed: true },
        UNSIGNED_CHAR => ValueClass::Int { width: 1, signed: false },
        SHORT => ValueClass::Int { width: 2, signed: true },
        UNSIGNED_SHORT => ValueClass::Int { width: 2, signed: false },
        INT => ValueClass::Int { width: 4, signed: true },
        UNSIGNED => ValueClass::Int { width: 4, signed: false },
        LONG | LONG_LONG => ValueClass::Int { width: 8, signed: true },
        UNSIGNED_LONG | UNSIGNED_LONG_LONG => ValueClass::Int { width: 8, signed: false },
        FLOAT => ValueClass::Float { width: 4 },
        DOUBLE => ValueClass::Float { width: 8 },
        _ => return None,
    };
    Some(class)
}

fn ompi_type_table() -> &'static [(usize, ValueClass)] {
    static TABLE: OnceLock<Vec<(usize, ValueClass)>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = Vec::new();
        let mut add = |name: &CStr, class: ValueClass| {
            if let Some(p) = resolve::lookup_global(name) {
                table.push((p as usize, class));
            }
        };
        add(c"ompi_mpi_char", ValueClass::Char);
        add(c"ompi_mpi_byte", ValueClass::Byte);
        add(c"ompi_mpi_signed_char", ValueClass::Int { width: 1, signed: true });
        add(c"ompi_mpi_unsigned_char", ValueClass::Int { width: 1, signed: false });
        add(c"ompi_mpi_short", ValueClass::Int { width: 2, signed: true });
        add(c"ompi_mpi_unsigned_short", ValueClass::Int { width: 2, signed: false });
        add(c"ompi_mpi_int", ValueClass::Int { width: 4, signed: true });
        add(c"ompi_mpi_unsigned", ValueClass::Int { width: 4, signed: false });
        add(c"ompi_mpi_long", ValueClass::Int { width: 8, signed: true });
        add(c"ompi_mpi_unsigned_long", ValueClass::Int { width: 8, signed: false });
        add(c"ompi_mpi_long_long_int", ValueClass::Int { width: 8, signed: true });
        add(c"ompi_mpi_float", ValueClass::Float { width: 4 });
        add(c"ompi_mpi_double", ValueClass::Float { width: 8 });
        table
    })
}

static NEXT_TYPE_SIZE: NextFn = NextFn::new(c"MPI_Type_size");

/// Element size of an arbitrary datatype via the real `MPI_Type_size`.
pub fn type_size(dtype: Handle) -> Option<usize> {
    type TypeSizeFn = unsafe extern "C" fn(Handle, *mut c_int) -> c_int;
    let addr = NEXT_TYPE_SIZE.get()?;
    let real: TypeSizeFn = unsafe { resolve::as_fn(addr) };
    let mut size: c_int = 0;
    let rc = unsafe { real(dtype, &mut size) };
    (rc == MPI_SUCCESS && size > 0).then_some(size as usize)
}

/// Work out how to render buffers of `dtype`.
///
/// Unrecognized handles (derived types, exotic predefineds) degrade to
/// [`ValueClass::Unknown`] with whatever element size the real library
/// reports, which still yields correct byte accounting.
pub fn classify(dtype: Handle) -> ValueClass {
    let known = match flavor() {
        Flavor::Mpich => classify_mpich(dtype),
        Flavor::OpenMpi => ompi_type_table()
            .iter()
            .find(|(h, _)| *h == dtype)
            .map(|&(_, class)| class),
        Flavor::Absent => None,
    };
    known.unwrap_or(ValueClass::Unknown {
        elem_size: type_size(dtype).unwrap_or(0),
    })
}

/* ─────────────────────── rank and world size ─────────────────────── */

static NEXT_INITIALIZED: NextFn = NextFn::new(c"MPI_Initialized");
static NEXT_FINALIZED: NextFn = NextFn::new(c"MPI_Finalized");
static NEXT_COMM_RANK: NextFn = NextFn::new(c"MPI_Comm_rank");
static NEXT_COMM_SIZE: NextFn = NextFn::new(c"MPI_Comm_size");

type FlagFn = unsafe extern "C" fn(*mut c_int) -> c_int;
type CommQueryFn = unsafe extern "C" fn(Handle, *mut c_int) -> c_int;

fn flag_call(next: &NextFn) -> Option<bool> {
    let real: FlagFn = unsafe { resolve::as_fn(next.get()?) };
    let mut flag: c_int = 0;
    (unsafe { real(&mut flag) } == MPI_SUCCESS).then_some(flag != 0)
}

fn comm_world() -> Option<Handle> {
    match flavor() {
        Flavor::Mpich => Some(mpich::COMM_WORLD as Handle),
        Flavor::OpenMpi => {
            resolve::lookup_global(c"ompi_mpi_comm_world").map(|p| p as Handle)
        }
        Flavor::Absent => None,
    }
}

fn comm_query(next: &NextFn, comm: Handle) -> Option<i32> {
    let real: CommQueryFn = unsafe { resolve::as_fn(next.get()?) };
    let mut out: c_int = 0;
    (unsafe { real(comm, &mut out) } == MPI_SUCCESS).then_some(out)
}

/// Rank and size straight from the library, when it is safe to ask.
fn query_mpi() -> Option<(i32, i32)> {
    // Calling into MPI outside the init..finalize window is undefined, so
    // both guards have to pass first.
    if flag_call(&NEXT_INITIALIZED) != Some(true) {
        return None;
    }
    if flag_call(&NEXT_FINALIZED) == Some(true) {
        return None;
    }
    let world = comm_world()?;
    let rank = comm_query(&NEXT_COMM_RANK, world)?;
    let size = comm_query(&NEXT_COMM_SIZE, world)?;
    Some((rank, size))
}

fn env_world_from(get: impl Fn(&str) -> Option<String>) -> (i32, i32) {
    let lookup = |keys: &[&str]| {
        keys.iter()
            .find_map(|k| get(k))
            .and_then(|v| v.parse::<i32>().ok())
            .unwrap_or(-1)
    };
    let rank = lookup(&["OMPI_COMM_WORLD_RANK", "PMI_RANK", "PMIX_RANK", "SLURM_PROCID"]);
    let size = lookup(&["OMPI_COMM_WORLD_SIZE", "PMI_SIZE", "SLURM_NTASKS"]);
    (rank, size)
}

static WORLD: OnceLock<(i32, i32)> = OnceLock::new();

/// Best-known `(rank, world size)` for this process; `-1` for unknown.
///
/// The MPI answer is cached once obtained. Before `MPI_Init` the launcher
/// environment stands in, which keeps HDF5-before-init calls attributable
/// to the right process in the logs.
pub fn world() -> (i32, i32) {
    if let Some(&w) = WORLD.get() {
        return w;
    }
    if let Some(w) = query_mpi() {
        let w = *WORLD.get_or_init(|| w);
        iopeek_core::logging::set_rank(w.0);
        return w;
    }
    static ENV_WORLD: OnceLock<(i32, i32)> = OnceLock::new();
    let w = *ENV_WORLD.get_or_init(|| {
        let w = env_world_from(|k| std::env::var(k).ok());
        if w.0 >= 0 {
            iopeek_core::logging::set_rank(w.0);
        }
        w
    });
    w
}

/* ─────────────────────── access-mode decoding ─────────────────────── */

// MPI_MODE_* bits, identical in MPICH and Open MPI (ROMIO heritage).
const MODE_BITS: [(c_int, &str); 9] = [
    (0x001, "create"),
    (0x002, "rdonly"),
    (0x004, "wronly"),
    (0x008, "rdwr"),
    (0x010, "delete_on_close"),
    (0x020, "unique_open"),
    (0x040, "excl"),
    (0x080, "append"),
    (0x100, "sequential"),
];

/// Render an `MPI_File_open` access mode like `create|wronly`.
pub fn describe_amode(amode: c_int) -> String {
    let mut parts = Vec::new();
    let mut rest = amode;
    for (bit, name) in MODE_BITS {
        if amode & bit != 0 {
            parts.push(name);
            rest &= !bit;
        }
    }
    if parts.is_empty() || rest != 0 {
        return format!("0x{amode:x}");
    }
    parts.join("|")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mpich_builtin_handles_classify() {
        assert_eq!(
            classify_mpich(mpich::INT as Handle),
            Some(ValueClass::Int { width: 4, signed: true })
        );
        assert_eq!(
            classify_mpich(mpich::DOUBLE as Handle),
            Some(ValueClass::Float { width: 8 })
        );
        assert_eq!(classify_mpich(mpich::CHAR as Handle), Some(ValueClass::Char));
        assert_eq!(classify_mpich(mpich::BYTE as Handle), Some(ValueClass::Byte));
        assert_eq!(classify_mpich(0xdead_beef), None);
    }

    #[test]
    fn mpich_classification_masks_to_low_32_bits() {
        // Handles travel in full-width registers; garbage above bit 31
        // must not change the answer.
        let dirty = (0xffff_ffff_0000_0000u64 | u64::from(mpich::FLOAT)) as Handle;
        assert_eq!(classify_mpich(dirty), Some(ValueClass::Float { width: 4 }));
    }

    #[test]
    fn mpich_size_nibble_agrees_with_classes() {
        // MPICH encodes the element size in bits 8..16 of builtin
        // handles; the table must agree with it.
        for handle in [mpich::SHORT, mpich::INT, mpich::LONG, mpich::FLOAT, mpich::DOUBLE] {
            let encoded = ((handle >> 8) & 0xff) as usize;
            let class = classify_mpich(handle as Handle).unwrap();
            assert_eq!(class.elem_size(), encoded, "handle {handle:#x}");
        }
    }

    #[test]
    fn launcher_env_fallback() {
        let (rank, size) = env_world_from(|k| match k {
            "OMPI_COMM_WORLD_RANK" => Some("3".into()),
            "OMPI_COMM_WORLD_SIZE" => Some("8".into()),
            _ => None,
        });
        assert_eq!((rank, size), (3, 8));

        // Slurm spelling, rank only.
        let (rank, size) = env_world_from(|k| (k == "SLURM_PROCID").then(|| "5".into()));
        assert_eq!((rank, size), (5, -1));

        let (rank, size) = env_world_from(|_| None);
        assert_eq!((rank, size), (-1, -1));

        // Garbage values do not panic.
        let (rank, _) = env_world_from(|k| (k == "PMI_RANK").then(|| "albatross".into()));
        assert_eq!(rank, -1);
    }

    #[test]
    fn amode_renders_known_bits() {
        assert_eq!(describe_amode(0x001 | 0x004), "create|wronly");
        assert_eq!(describe_amode(0x008), "rdwr");
        // Unknown bits keep the raw form.
        assert_eq!(describe_amode(0x1000), "0x1000");
        assert_eq!(describe_amode(0), "0x0");
    }

    #[test]
    fn no_mpi_loaded_classifies_as_unknown() {
        // The test binary links no MPI, so the probe lands on Absent and
        // classification degrades instead of crashing.
        assert_eq!(flavor(), Flavor::Absent);
        let class = classify(0x4c00_0405);
        assert!(matches!(class, ValueClass::Unknown { .. }));
        assert_eq!(world(), env_world_from(|k| std::env::var(k).ok()));
    }
}
