//! Unified call-record model.
//!
//! Every intercepted call is flattened into one [`CallRecord`] regardless
//! of which library it came from. The record is what gets serialized to
//! the JSONL trace file and what `trace_dump` reads back, so the field
//! set here is the wire format. Optional fields are skipped when absent
//! to keep the lines short.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which intercepted API surface a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Api {
    Mpiio,
    Hdf5,
}

impl fmt::Display for Api {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Api::Mpiio => write!(f, "mpiio"),
            Api::Hdf5 => write!(f, "hdf5"),
        }
    }
}

/// One intercepted call, start to finish.
///
/// `rank` and `world` are `-1` when the communicator state could not be
/// established (before `MPI_Init`, after `MPI_Finalize`, or in a plain
/// serial HDF5 program).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    /// RFC 3339 timestamp taken when the hook fired.
    pub ts: String,
    pub pid: u32,
    pub rank: i32,
    pub world: i32,
    pub api: Api,
    /// Intercepted symbol name, e.g. `MPI_File_write_ordered`.
    pub func: String,
    /// Per-function call sequence number, starting at 1.
    pub seq: u64,

    /// File name, dataset name, or group name when the call carries one.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub target: Option<String>,
    /// Call-specific extra text, e.g. open mode bits or slab geometry.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub detail: Option<String>,
    /// Element type as classified, e.g. `int`, `double`, `char`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub dtype: Option<String>,
    /// Element count for data-carrying calls.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub count: Option<u64>,
    /// Payload size in bytes for data-carrying calls.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub bytes: Option<u64>,
    /// Explicit file offset for positioned writes.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub offset: Option<i64>,
    /// Rendered buffer preview, already truncated.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub preview: Option<String>,
    /// Rendered minimum over the whole buffer.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub min: Option<String>,
    /// Rendered maximum over the whole buffer.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub max: Option<String>,

    /// Return value of the forwarded call (widened).
    pub ret: i64,
    /// Wall time spent inside the real library, in microseconds.
    pub elapsed_us: u64,
}

impl CallRecord {
    /// Start a record for `func` with the ambient process fields filled
    /// in and everything call-specific left empty.
    pub fn begin(api: Api, func: &str, rank: i32, world: i32) -> Self {
        Self {
            ts: chrono::Utc::now().to_rfc3339(),
            pid: std::process::id(),
            rank,
            world,
            api,
            func: func.to_string(),
            seq: 0,
            target: None,
            detail: None,
            dtype: None,
            count: None,
            bytes: None,
            offset: None,
            preview: None,
            min: None,
            max: None,
            ret: 0,
            elapsed_us: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CallRecord {
        let mut rec = CallRecord::begin(Api::Mpiio, "MPI_File_write_at", 2, 4);
        rec.seq = 7;
        rec.target = Some("out.dat".into());
        rec.dtype = Some("int".into());
        rec.count = Some(256);
        rec.bytes = Some(1024);
        rec.offset = Some(2048);
        rec.preview = Some("{ 1 2 3 ... }".into());
        rec.min = Some("1".into());
        rec.max = Some("256".into());
        rec.ret = 0;
        rec.elapsed_us = 83;
        rec
    }

    #[test]
    fn record_round_trips_through_json() {
        let rec = sample();
        let json = serde_json::to_string(&rec).unwrap();
        let back: CallRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(rec, back);
    }

    #[test]
    fn absent_fields_are_omitted() {
        let rec = CallRecord::begin(Api::Hdf5, "H5Fclose", -1, -1);
        let json = serde_json::to_string(&rec).unwrap();
        assert!(!json.contains("\"target\""));
        assert!(!json.contains("\"preview\""));
        assert!(json.contains("\"func\":\"H5Fclose\""));
        assert!(json.contains("\"api\":\"hdf5\""));
    }

    #[test]
    fn missing_optionals_deserialize_as_none() {
        let json = r#"{"ts":"2025-01-01T00:00:00Z","pid":1,"rank":0,"world":1,
            "api":"mpiio","func":"MPI_File_close","seq":1,"ret":0,"elapsed_us":5}"#;
        let rec: CallRecord = serde_json::from_str(json).unwrap();
        assert_eq!(rec.func, "MPI_File_close");
        assert!(rec.target.is_none());
        assert!(rec.min.is_none());
    }
}
