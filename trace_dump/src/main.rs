//! Offline reader for iopeek trace files.
//!
//! The preload shim leaves one JSONL file per process when
//! `IOPEEK_TRACE_FILE` (or `[trace] file`) is set. This tool merges any
//! number of those files and prints either a per-function aggregate
//! table or the raw records. Malformed lines, e.g. from a process that
//! died mid-write, are counted and skipped rather than aborting the run.

use anyhow::{Context, Result};
use clap::Parser;
use iopeek_core::record::{Api, CallRecord};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "trace_dump", about = "Summarize iopeek JSONL trace files")]
struct Args {
    /// Trace files written by the preload shim.
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Print every record instead of the aggregate table.
    #[arg(long)]
    raw: bool,

    /// Only include records from this rank.
    #[arg(long)]
    rank: Option<i32>,
}

#[derive(Debug, Default)]
struct FuncAgg {
    calls: u64,
    bytes: u64,
    elapsed_us: u64,
    errors: u64,
    ranks: BTreeSet<i32>,
}

/// Success is API-specific: MPI returns `MPI_SUCCESS` (0), HDF5 uses
/// negative values for failure.
fn call_ok(rec: &CallRecord) -> bool {
    match rec.api {
        Api::Mpiio => rec.ret == 0,
        Api::Hdf5 => rec.ret >= 0,
    }
}

/// Parse one JSONL stream, counting lines that do not decode.
fn read_records(reader: impl BufRead, skipped: &mut u64) -> Vec<CallRecord> {
    let mut records = Vec::new();
    for line in reader.lines() {
        let Ok(line) = line else {
            *skipped += 1;
            continue;
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<CallRecord>(&line) {
            Ok(rec) => records.push(rec),
            Err(_) => *skipped += 1,
        }
    }
    records
}

fn aggregate(records: &[CallRecord]) -> BTreeMap<String, FuncAgg> {
    let mut by_func: BTreeMap<String, FuncAgg> = BTreeMap::new();
    for rec in records {
        let agg = by_func.entry(rec.func.clone()).or_default();
        agg.calls += 1;
        agg.bytes += rec.bytes.unwrap_or(0);
        agg.elapsed_us += rec.elapsed_us;
        if !call_ok(rec) {
            agg.errors += 1;
        }
        if rec.rank >= 0 {
            agg.ranks.insert(rec.rank);
        }
    }
    by_func
}

fn ranks_text(ranks: &BTreeSet<i32>) -> String {
    if ranks.is_empty() {
        return "-".to_string();
    }
    let parts: Vec<String> = ranks.iter().map(|r| r.to_string()).collect();
    if parts.len() <= 4 {
        return parts.join(",");
    }
    format!(
        "{}..{} ({})",
        ranks.first().unwrap(),
        ranks.last().unwrap(),
        ranks.len()
    )
}

fn table_lines(by_func: &BTreeMap<String, FuncAgg>) -> Vec<String> {
    let width = by_func
        .keys()
        .map(|f| f.len())
        .max()
        .unwrap_or(8)
        .max("FUNCTION".len());
    let mut lines = vec![format!(
        "{:width$}  {:>8}  {:>12}  {:>12}  {:>4}  RANKS",
        "FUNCTION", "CALLS", "BYTES", "TIME", "ERR"
    )];
    for (func, agg) in by_func {
        lines.push(format!(
            "{:width$}  {:>8}  {:>12}  {:>12}  {:>4}  {}",
            func,
            agg.calls,
            agg.bytes,
            humantime::format_duration(Duration::from_micros(agg.elapsed_us)).to_string(),
            agg.errors,
            ranks_text(&agg.ranks),
        ));
    }
    lines
}

fn raw_line(rec: &CallRecord) -> String {
    let mut s = format!("{} r{} {}#{}", rec.ts, rec.rank, rec.func, rec.seq);
    if let Some(target) = &rec.target {
        s.push(' ');
        s.push_str(target);
    }
    if let Some(bytes) = rec.bytes {
        s.push_str(&format!(" {bytes}B"));
    }
    if let Some(preview) = &rec.preview {
        s.push(' ');
        s.push_str(preview);
    }
    s.push_str(&format!(" rc={} t={}us", rec.ret, rec.elapsed_us));
    s
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut records = Vec::new();
    let mut skipped = 0u64;
    for path in &args.files {
        let file =
            File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
        records.extend(read_records(BufReader::new(file), &mut skipped));
    }
    if let Some(rank) = args.rank {
        records.retain(|r| r.rank == rank);
    }
    records.sort_by(|a, b| a.ts.cmp(&b.ts));

    if args.raw {
        for rec in &records {
            println!("{}", raw_line(rec));
        }
    } else {
        for line in table_lines(&aggregate(&records)) {
            println!("{line}");
        }
    }

    println!(
        "{} record(s) from {} file(s){}",
        records.len(),
        args.files.len(),
        if skipped > 0 {
            format!(", {skipped} malformed line(s) skipped")
        } else {
            String::new()
        }
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn record(func: &str, rank: i32, bytes: u64, ret: i64) -> CallRecord {
        let mut rec = CallRecord::begin(Api::Mpiio, func, rank, 4);
        rec.bytes = Some(bytes);
        rec.ret = ret;
        rec.elapsed_us = 10;
        rec
    }

    #[test]
    fn malformed_lines_are_counted_not_fatal() {
        let good = serde_json::to_string(&record("MPI_File_write", 0, 64, 0)).unwrap();
        let input = format!("{good}\nnot json at all\n\n{good}\n");
        let mut skipped = 0;
        let records = read_records(Cursor::new(input), &mut skipped);
        assert_eq!(records.len(), 2);
        assert_eq!(skipped, 1);
    }

    #[test]
    fn aggregate_sums_per_function() {
        let records = vec![
            record("MPI_File_write", 0, 64, 0),
            record("MPI_File_write", 1, 64, 0),
            record("MPI_File_write", 1, 32, -1),
            record("MPI_File_open", 0, 0, 0),
        ];
        let agg = aggregate(&records);
        assert_eq!(agg.len(), 2);

        let write = &agg["MPI_File_write"];
        assert_eq!(write.calls, 3);
        assert_eq!(write.bytes, 160);
        assert_eq!(write.elapsed_us, 30);
        assert_eq!(write.errors, 1);
        assert_eq!(ranks_text(&write.ranks), "0,1");

        assert_eq!(agg["MPI_File_open"].calls, 1);
    }

    #[test]
    fn hdf5_success_convention_is_nonnegative() {
        let mut rec = CallRecord::begin(Api::Hdf5, "H5Fcreate", 0, 1);
        rec.ret = 72057594037927936; // a plausible hid_t
        assert!(call_ok(&rec));
        rec.ret = -1;
        assert!(!call_ok(&rec));

        let mut rec = CallRecord::begin(Api::Mpiio, "MPI_File_open", 0, 1);
        rec.ret = 2; // any nonzero MPI code is a failure
        assert!(!call_ok(&rec));
    }

    #[test]
    fn rank_set_renders_compactly() {
        let small: BTreeSet<i32> = [0, 1, 3].into_iter().collect();
        assert_eq!(ranks_text(&small), "0,1,3");
        let big: BTreeSet<i32> = (0..32).collect();
        assert_eq!(ranks_text(&big), "0..31 (32)");
        assert_eq!(ranks_text(&BTreeSet::new()), "-");
    }

    #[test]
    fn table_has_a_row_per_function() {
        let records = vec![
            record("MPI_File_write_ordered", 0, 1024, 0),
            record("MPI_File_close", 0, 0, 0),
        ];
        let lines = table_lines(&aggregate(&records));
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("FUNCTION"));
        // BTreeMap order: close sorts before write_ordered.
        assert!(lines[1].contains("MPI_File_close"));
        assert!(lines[2].contains("MPI_File_write_ordered"));
        assert!(lines[2].contains("1024"));
    }
}
