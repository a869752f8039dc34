//! Recorded trace format
//!
//! One JSON object per line, tagged by `"event"`. Blank lines are skipped.

use base64::Engine;
use bytes::Bytes;
use netlens_core::{HttpRequest, HttpResponse, TaskId, TransportError};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceRecord {
    TaskCreated {
        task_id: TaskId,
        #[serde(default)]
        request: Option<HttpRequest>,
    },
    CurrentRequestChanged {
        task_id: TaskId,
        #[serde(default)]
        request: Option<HttpRequest>,
    },
    ResponseReceived {
        task_id: TaskId,
        response: HttpResponse,
    },
    DataReceived {
        task_id: TaskId,
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        base64: Option<String>,
    },
    Redirect {
        task_id: TaskId,
        response: HttpResponse,
        request: HttpRequest,
    },
    Completed {
        task_id: TaskId,
        #[serde(default)]
        error: Option<TransportError>,
    },
    InvalidateObservation {
        task_id: TaskId,
    },
}

impl TraceRecord {
    pub fn task_id(&self) -> TaskId {
        match self {
            Self::TaskCreated { task_id, .. }
            | Self::CurrentRequestChanged { task_id, .. }
            | Self::ResponseReceived { task_id, .. }
            | Self::DataReceived { task_id, .. }
            | Self::Redirect { task_id, .. }
            | Self::Completed { task_id, .. }
            | Self::InvalidateObservation { task_id } => *task_id,
        }
    }
}

/// Decode a `data_received` payload; exactly one of `text` or `base64` must be set
pub fn decode_data(text: Option<&str>, base64: Option<&str>) -> Result<Bytes, String> {
    match (text, base64) {
        (Some(text), None) => Ok(Bytes::copy_from_slice(text.as_bytes())),
        (None, Some(encoded)) => base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map(Bytes::from)
            .map_err(|e| format!("invalid base64 data: {e}")),
        _ => Err("data_received needs exactly one of `text` or `base64`".to_string()),
    }
}

pub fn parse_trace(input: &str) -> Result<Vec<TraceRecord>, String> {
    input
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            let record: TraceRecord = serde_json::from_str(line)
                .map_err(|e| format!("line {}: {e}", index + 1))?;
            if let TraceRecord::DataReceived { text, base64, .. } = &record {
                decode_data(text.as_deref(), base64.as_deref())
                    .map_err(|e| format!("line {}: {e}", index + 1))?;
            }
            Ok(record)
        })
        .collect()
}

pub fn load_trace(path: &Path) -> Result<Vec<TraceRecord>, String> {
    let input = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read trace {}: {e}", path.display()))?;
    parse_trace(&input)
}
