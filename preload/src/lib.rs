//! `iopeek`: an `LD_PRELOAD` shim that watches MPI-IO and HDF5 calls.
//!
//! Built as `libiopeek.so` and loaded in front of the real libraries:
//!
//! ```text
//! LD_PRELOAD=./target/release/libiopeek.so mpirun -np 4 ./my_app
//! ```
//!
//! The exported symbols shadow a small set of write-path functions from
//! both APIs. Each hook describes the call (who, what file, which
//! datatype, how many elements, a peek at the buffer), forwards to the
//! real implementation through an `RTLD_NEXT` lookup, then logs the
//! outcome and optionally appends a JSONL record for `trace_dump`.
//!
//! Key responsibilities:
//! - Resolve and cache the real symbols behind the shim ([`resolve`]).
//! - Interpret MPI and HDF5 handles without their headers ([`mpi`],
//!   [`hdf5`]).
//! - Keep per-process config, logging and trace output ([`session`]).
//! - Export the actual hook functions ([`hooks`]).
//!
//! The shim is a guest in the host process: every failure path degrades
//! to plain forwarding, and no hook panics across the C boundary.

pub mod hdf5;
pub mod hooks;
pub mod mpi;
pub mod resolve;
pub mod session;
