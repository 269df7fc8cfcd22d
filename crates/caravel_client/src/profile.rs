//! Post-transfer artifacts: the chunk-status table as CSV and a Chrome Trace
//! Event rendering of per-chunk state intervals.

use std::collections::BTreeMap;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde_json::{json, Value};

use caravel_core::RegionTag;

use crate::errors::Result;
use crate::monitor::ChunkStatusRecord;

pub fn write_status_csv(records: &[ChunkStatusRecord], path: &Path) -> Result<()> {
    let mut out = BufWriter::new(std::fs::File::create(path)?);
    writeln!(out, "chunk_id,state,time,region,instance")?;
    for record in records {
        writeln!(
            out,
            "{},{},{},{},{}",
            record.chunk_id,
            record.state,
            record.time.to_rfc3339(),
            record.region,
            record.instance
        )?;
    }
    out.flush()?;
    Ok(())
}

/// Render the chunk-status table as Chrome Trace Event JSON: one complete
/// (`ph: "X"`) span per state interval per chunk per gateway, with gateways as
/// processes and chunks as threads.
///
/// Timestamps are microseconds since the earliest log entry. The final state
/// of each chunk has no successor entry and therefore no span.
pub fn trace_events(records: &[ChunkStatusRecord]) -> Value {
    let Some(epoch) = records.iter().map(|r| r.time).min() else {
        return json!({ "traceEvents": [] });
    };

    let mut gateways: Vec<(RegionTag, u32)> = records
        .iter()
        .map(|r| (r.region.clone(), r.instance))
        .collect();
    gateways.sort();
    gateways.dedup();
    let pid_of = |region: &RegionTag, instance: u32| {
        gateways
            .iter()
            .position(|(r, i)| r == region && *i == instance)
            .map_or(0, |p| p + 1)
    };

    let mut events = Vec::new();
    for (pid0, (region, instance)) in gateways.iter().enumerate() {
        events.push(json!({
            "name": "process_name",
            "ph": "M",
            "pid": pid0 + 1,
            "args": { "name": format!("{region}/{instance}") },
        }));
    }

    let mut lanes: BTreeMap<(usize, u64), Vec<&ChunkStatusRecord>> = BTreeMap::new();
    for record in records {
        let pid = pid_of(&record.region, record.instance);
        lanes.entry((pid, record.chunk_id)).or_default().push(record);
    }

    for ((pid, chunk_id), mut rows) in lanes {
        rows.sort_by_key(|r| r.time);
        for pair in rows.windows(2) {
            let (from, to) = (pair[0], pair[1]);
            events.push(json!({
                "name": from.state.as_str(),
                "cat": from.region.to_string(),
                "ph": "X",
                "ts": (from.time - epoch).num_microseconds().unwrap_or(0),
                "dur": (to.time - from.time).num_microseconds().unwrap_or(0),
                "pid": pid,
                "tid": chunk_id,
            }));
        }
    }

    json!({ "traceEvents": events })
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use caravel_core::ChunkState;

    use super::*;

    fn record(
        chunk_id: u64,
        state: ChunkState,
        instance: u32,
        second: u32,
    ) -> ChunkStatusRecord {
        ChunkStatusRecord {
            chunk_id,
            state,
            time: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, second).unwrap(),
            region: "aws:us-east-1".parse().unwrap(),
            instance,
        }
    }

    #[test]
    fn csv_has_one_row_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chunk_status_df.csv");
        let records = vec![
            record(0, ChunkState::Registered, 0, 0),
            record(0, ChunkState::UploadComplete, 0, 5),
        ];
        write_status_csv(&records, &path).unwrap();

        let body = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "chunk_id,state,time,region,instance");
        assert!(lines[2].contains("upload_complete"));
    }

    #[test]
    fn trace_spans_cover_state_intervals() {
        let records = vec![
            record(0, ChunkState::Registered, 0, 0),
            record(0, ChunkState::DownloadInProgress, 0, 1),
            record(0, ChunkState::UploadComplete, 0, 4),
            record(1, ChunkState::Registered, 0, 2),
        ];
        let trace = trace_events(&records);
        let events = trace["traceEvents"].as_array().unwrap();

        let spans: Vec<&Value> = events.iter().filter(|e| e["ph"] == "X").collect();
        // chunk 0 has three entries (two intervals); chunk 1 has one (none)
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0]["name"], "registered");
        assert_eq!(spans[0]["ts"], 0);
        assert_eq!(spans[0]["dur"], 1_000_000);
        assert_eq!(spans[1]["name"], "download_in_progress");
        assert_eq!(spans[1]["dur"], 3_000_000);

        let metadata: Vec<&Value> = events.iter().filter(|e| e["ph"] == "M").collect();
        assert_eq!(metadata.len(), 1);
        assert_eq!(metadata[0]["args"]["name"], "aws:us-east-1/0");
    }

    #[test]
    fn empty_log_produces_empty_trace() {
        let trace = trace_events(&[]);
        assert!(trace["traceEvents"].as_array().unwrap().is_empty());
    }
}
