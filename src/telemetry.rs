use std::collections::{BTreeSet, HashMap};
use std::fs::OpenOptions;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{Value, json};

use crate::config::RuntimeConfig;

pub fn unix_ms_now() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

/// Append-only JSONL observability log: every gate decision (including
/// allows) is written here, never silently swallowed. A write failure is
/// logged via `tracing` but never fails the gate decision itself.
#[derive(Debug, Clone)]
pub struct TelemetrySink {
    pub enabled: bool,
    pub path: PathBuf,
    pub run_id: String,
    pub file_lock: Arc<std::sync::Mutex<()>>,
}

impl TelemetrySink {
    pub fn new(cfg: &RuntimeConfig) -> Self {
        let run_id = format!("run-{}-{}", unix_ms_now(), std::process::id());
        Self {
            enabled: !cfg.disable,
            path: cfg.observability_log_path.clone(),
            run_id,
            file_lock: Arc::new(std::sync::Mutex::new(())),
        }
    }

    /// A sink that never writes; useful for tests that don't exercise the
    /// observability path.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            path: PathBuf::new(),
            run_id: "disabled".to_string(),
            file_lock: Arc::new(std::sync::Mutex::new(())),
        }
    }

    pub fn emit(&self, event: &str, payload: Value) {
        if !self.enabled {
            return;
        }

        let mut record = serde_json::Map::new();
        record.insert("ts_unix_ms".to_string(), json!(unix_ms_now()));
        record.insert("event".to_string(), json!(event));
        record.insert("run_id".to_string(), json!(self.run_id));

        if let Some(map) = payload.as_object() {
            for (key, value) in map {
                record.insert(key.clone(), value.clone());
            }
        }

        let value = Value::Object(record);
        if let Err(err) = self.append_event_line(&value) {
            tracing::warn!(
                event = event,
                path = %self.path.display(),
                error = %err,
                "observability log write failed"
            );
        }
    }

    fn append_event_line(&self, value: &Value) -> io::Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let _guard = self.file_lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        serde_json::to_writer(&mut file, value)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
        writeln!(file)
    }
}

#[derive(Debug, Default)]
pub struct TelemetrySummary {
    pub total_lines: usize,
    pub parsed_events: usize,
    pub parse_errors: usize,
    pub unique_runs: BTreeSet<String>,
    pub event_counts: HashMap<String, usize>,
    pub last_event_ts_unix_ms: Option<u128>,
}

pub fn summarize_telemetry_lines(lines: Vec<String>, limit: usize) -> TelemetrySummary {
    let mut summary = TelemetrySummary::default();
    let max_events = limit.max(1);
    summary.total_lines = lines.len();

    for line in lines.into_iter().rev().take(max_events) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let parsed = match serde_json::from_str::<Value>(line) {
            Ok(value) => value,
            Err(_) => {
                summary.parse_errors += 1;
                continue;
            }
        };

        summary.parsed_events += 1;

        if let Some(run_id) = parsed.get("run_id").and_then(Value::as_str)
            && !run_id.is_empty()
        {
            summary.unique_runs.insert(run_id.to_string());
        }

        if let Some(event) = parsed.get("event").and_then(Value::as_str) {
            *summary.event_counts.entry(event.to_string()).or_insert(0) += 1;
        }

        if let Some(ts) = parsed.get("ts_unix_ms").and_then(Value::as_u64) {
            let ts_u128 = ts as u128;
            summary.last_event_ts_unix_ms = Some(
                summary
                    .last_event_ts_unix_ms
                    .map(|existing| existing.max(ts_u128))
                    .unwrap_or(ts_u128),
            );
        }
    }

    summary
}

pub fn run_telemetry_report(path: &std::path::Path, limit: usize) -> anyhow::Result<()> {
    if !path.exists() {
        println!("No observability log found at '{}'.", path.display());
        return Ok(());
    }

    let file = std::fs::File::open(path)?;
    let reader = io::BufReader::new(file);
    let lines = reader
        .lines()
        .collect::<std::result::Result<Vec<String>, std::io::Error>>()?;

    let summary = summarize_telemetry_lines(lines, limit);
    let mut events = summary.event_counts.iter().collect::<Vec<_>>();
    events.sort_by_key(|(name, count)| (std::cmp::Reverse(**count), (*name).clone()));

    println!("Observability report");
    println!("Path: {}", path.display());
    println!("Lines in file: {}", summary.total_lines);
    println!(
        "Events analyzed: {} (parse_errors={})",
        summary.parsed_events, summary.parse_errors
    );
    println!("Unique runs: {}", summary.unique_runs.len());

    if !events.is_empty() {
        println!("Events by kind:");
        for (name, count) in events.into_iter().take(10) {
            println!("- {}: {}", name, count);
        }
    }

    if let Some(last_ts) = summary.last_event_ts_unix_ms {
        println!("Last event ts_unix_ms: {last_ts}");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_sink_never_writes() {
        let sink = TelemetrySink::disabled();
        sink.emit("gate.decision", json!({"tool": "Write"}));
        assert!(!sink.path.exists());
    }

    #[test]
    fn summarizes_lines_by_event() {
        let lines = vec![
            json!({"ts_unix_ms": 1, "event": "gate.decision", "run_id": "r1"}).to_string(),
            json!({"ts_unix_ms": 2, "event": "gate.decision", "run_id": "r1"}).to_string(),
            "not json".to_string(),
        ];
        let summary = summarize_telemetry_lines(lines, 10);
        assert_eq!(summary.parsed_events, 2);
        assert_eq!(summary.parse_errors, 1);
        assert_eq!(summary.event_counts.get("gate.decision"), Some(&2));
    }
}
