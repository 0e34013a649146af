//! Session bootstrap against launcher environment variables.
//!
//! Simulates what an MPI launcher sets up before exec: rank/size in the
//! environment and a per-rank trace file pattern. The session must pick
//! the rank up without any MPI library present, expand the pattern, and
//! hand out a working sink. One test function: the session boots once
//! per process.

use iopeek_core::record::{Api, CallRecord};
use std::io::BufRead;

#[test]
fn boots_from_launcher_env_and_opens_the_trace() {
    let dir = tempfile::tempdir().unwrap();
    let pattern = dir.path().join("trace-{rank}.jsonl");
    unsafe {
        std::env::remove_var("IOPEEK_DISABLE");
        std::env::set_var("IOPEEK_TRACE_FILE", &pattern);
        std::env::set_var("IOPEEK_LOG_LEVEL", "warn");
        std::env::set_var("OMPI_COMM_WORLD_RANK", "2");
        std::env::set_var("OMPI_COMM_WORLD_SIZE", "4");
    }

    let s = iopeek::session::session();
    assert!(s.config.enabled);
    assert_eq!(s.config.log_level, log::LevelFilter::Warn);

    // The env rank made it into the log tag and the file name.
    assert_eq!(iopeek_core::logging::current_rank(), 2);
    let expanded = dir.path().join("trace-2.jsonl");
    assert!(expanded.exists(), "sink file missing at {expanded:?}");

    // Push one record through the sink the way a hook's finish step does.
    let sink = s.sink.as_ref().expect("sink must be open");
    let mut rec = CallRecord::begin(Api::Mpiio, "MPI_File_write_ordered", 2, 4);
    rec.seq = 1;
    rec.bytes = Some(1024);
    sink.append(&rec);
    sink.flush();

    let file = std::fs::File::open(&expanded).unwrap();
    let lines: Vec<CallRecord> = std::io::BufReader::new(file)
        .lines()
        .map(|l| serde_json::from_str(&l.unwrap()).unwrap())
        .collect();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].func, "MPI_File_write_ordered");
    assert_eq!(lines[0].rank, 2);
    assert_eq!(lines[0].world, 4);
}
