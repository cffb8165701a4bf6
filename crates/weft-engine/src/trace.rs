use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::response::NodeStatus;

/// One structured record of a node's execution.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceEntry {
    pub node_id: String,
    pub node_type: String,
    pub status: NodeStatus,
    pub duration_ms: u64,
    pub started_at: DateTime<Utc>,
    /// Rendered request, recorded when the node sets `logRequests`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<serde_json::Value>,
    /// Raw response, recorded when the node sets `logResponses`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Append-only recorder of per-node trace entries.
///
/// Append is mutex-guarded so concurrently completing siblings can never
/// interleave or lose entries; the runner appends in batch declaration
/// order to keep the sequence deterministic.
pub struct TraceRecorder {
    entries: Mutex<Vec<TraceEntry>>,
    enabled: bool,
}

impl TraceRecorder {
    pub fn new(enabled: bool) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            enabled,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn record(&self, entry: TraceEntry) {
        if !self.enabled {
            return;
        }
        self.entries.lock().expect("trace lock poisoned").push(entry);
    }

    /// The ordered trace, or `None` when recording was disabled.
    pub fn entries(&self) -> Option<Vec<TraceEntry>> {
        if !self.enabled {
            return None;
        }
        Some(self.entries.lock().expect("trace lock poisoned").clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str) -> TraceEntry {
        TraceEntry {
            node_id: id.into(),
            node_type: "chat".into(),
            status: NodeStatus::Succeeded,
            duration_ms: 1,
            started_at: Utc::now(),
            request: None,
            response: None,
            error: None,
        }
    }

    #[test]
    fn test_disabled_recorder_drops_entries() {
        let recorder = TraceRecorder::new(false);
        recorder.record(entry("a"));
        assert!(recorder.entries().is_none());
    }

    #[test]
    fn test_append_preserves_order() {
        let recorder = TraceRecorder::new(true);
        recorder.record(entry("a"));
        recorder.record(entry("b"));
        let entries = recorder.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].node_id, "a");
        assert_eq!(entries[1].node_id, "b");
    }

    #[test]
    fn test_concurrent_append_loses_nothing() {
        let recorder = std::sync::Arc::new(TraceRecorder::new(true));
        let mut handles = Vec::new();
        for i in 0..8 {
            let r = recorder.clone();
            handles.push(std::thread::spawn(move || {
                for j in 0..50 {
                    r.record(entry(&format!("{}-{}", i, j)));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(recorder.entries().unwrap().len(), 400);
    }
}
