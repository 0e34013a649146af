//! Exit report against a fully booted session.
//!
//! The report runs from an atexit handler, where a panic would abort the
//! host process instead of unwinding. This drives the handler body
//! directly after a real boot: logger installed, sink open, counters
//! hot. One test function: the session boots once per process.

use iopeek_core::record::{Api, CallRecord};
use std::io::BufRead;

#[test]
fn exit_report_runs_cleanly_and_lands_the_flush() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trace.jsonl");
    unsafe {
        std::env::remove_var("IOPEEK_DISABLE");
        std::env::set_var("IOPEEK_TRACE_FILE", &path);
        std::env::set_var("IOPEEK_LOG_LEVEL", "info");
    }

    let s = iopeek::session::session();
    let sink = s.sink.as_ref().expect("sink must be open");

    // Leave the counters the way a traced run would: one completed call.
    let counter = iopeek::hooks::registry()[0];
    let seq = counter.next_seq();
    counter.note(4096, std::time::Duration::from_micros(120), true);

    let mut rec = CallRecord::begin(Api::Mpiio, "MPI_File_write_ordered", 0, 1);
    rec.seq = seq;
    rec.bytes = Some(4096);
    sink.append(&rec);

    // The summary renders through the live logger here. Run it twice:
    // nothing in the body may assume it only ever fires once.
    iopeek::session::exit_report();
    iopeek::session::exit_report();

    let file = std::fs::File::open(&path).unwrap();
    let lines: Vec<String> = std::io::BufReader::new(file)
        .lines()
        .map(|l| l.unwrap())
        .collect();
    assert_eq!(lines.len(), 1, "flush must land the appended record");
    let parsed: CallRecord = serde_json::from_str(&lines[0]).unwrap();
    assert_eq!(parsed.seq, seq);
}
