//! End-to-end: a config file drives a trace sink, and every appended
//! record survives the trip back through the JSONL parser, including
//! when many threads append at once (hooks fire from wherever the host
//! application does its I/O).

use iopeek_core::config::Config;
use iopeek_core::record::{Api, CallRecord};
use iopeek_core::sink::{TraceSink, expand_path};
use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn config_file_to_trace_file_and_back() {
    let dir = tempfile::tempdir().unwrap();
    let cfg_path = dir.path().join("iopeek.toml");
    std::fs::write(
        &cfg_path,
        r#"
            [trace]
            file = "trace-{rank}.jsonl"
            flush_interval = "5ms"

            [values]
            preview_limit = 6
        "#,
    )
    .unwrap();

    let cfg = Config::load(&cfg_path).unwrap();
    assert_eq!(cfg.preview_limit, 6);
    assert_eq!(cfg.flush_interval, Duration::from_millis(5));

    let pattern = cfg.trace_file.as_deref().unwrap();
    let path = dir.path().join(expand_path(pattern, 3, 777));
    assert!(path.ends_with(Path::new("trace-3.jsonl")));

    let sink = TraceSink::create(&path, cfg.flush_interval).unwrap();
    let mut rec = CallRecord::begin(Api::Hdf5, "H5Dwrite", 3, 4);
    rec.seq = 1;
    rec.target = Some("/data/temperature".into());
    rec.preview = Some("{ 21.5 21.6 }".into());
    sink.append(&rec);
    sink.flush();

    let lines: Vec<CallRecord> = std::io::BufReader::new(std::fs::File::open(&path).unwrap())
        .lines()
        .map(|l| serde_json::from_str(&l.unwrap()).unwrap())
        .collect();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0], rec);
}

#[test]
fn concurrent_appends_keep_lines_whole() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trace.jsonl");
    let sink = Arc::new(TraceSink::create(&path, Duration::from_millis(1)).unwrap());

    let threads = 4;
    let per_thread = 25;
    let mut handles = Vec::new();
    for t in 0..threads {
        let sink = Arc::clone(&sink);
        handles.push(thread::spawn(move || {
            for i in 0..per_thread {
                let mut rec =
                    CallRecord::begin(Api::Mpiio, "MPI_File_write_at", t, threads);
                rec.seq = i + 1;
                rec.offset = Some(i as i64 * 4096);
                rec.bytes = Some(4096);
                sink.append(&rec);
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }
    sink.flush();
    assert_eq!(sink.dropped(), 0);

    // Every line parses and nothing interleaved.
    let lines: Vec<CallRecord> = std::io::BufReader::new(std::fs::File::open(&path).unwrap())
        .lines()
        .map(|l| serde_json::from_str(&l.unwrap()).unwrap())
        .collect();
    assert_eq!(lines.len(), (threads * per_thread as i32) as usize);
    for rank in 0..threads {
        let seqs: Vec<u64> = lines
            .iter()
            .filter(|r| r.rank == rank)
            .map(|r| r.seq)
            .collect();
        assert_eq!(seqs.len(), per_thread as usize);
    }
}
