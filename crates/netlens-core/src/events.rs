//! Event Sink Trait
//!
//! This module provides the sink that receives serialized DevTools events.
//! Implementations can forward payloads to a debugger connection, print
//! them (CLI), or hand them to an async consumer.

use serde::Deserialize;
use std::io::Write;
use tokio::sync::mpsc;

/// Receiver of serialized DevTools events
///
/// Called on the serializer thread, once per event, in emission order.
/// Implementations should return quickly; a slow sink delays every later event.
pub trait CdpEventSink: Send + Sync {
    /// Deliver one event payload (`{"method": ..., "params": ...}` as JSON)
    fn dispatch(&self, payload: String);
}

/// No-op event sink for testing or when nobody is listening
#[derive(Default, Clone)]
pub struct NoOpEventSink;

impl CdpEventSink for NoOpEventSink {
    fn dispatch(&self, _payload: String) {}
}

/// Stdout event sink for CLI mode - prints events to console
#[derive(Default, Clone)]
pub struct StdoutEventSink {
    /// Whether to print the raw JSON payload
    pub json_output: bool,
}

impl StdoutEventSink {
    pub fn new(json_output: bool) -> Self {
        Self { json_output }
    }

    fn render(&self, payload: &str) -> String {
        if self.json_output {
            return payload.to_string();
        }
        match serde_json::from_str::<PayloadSummary>(payload) {
            Ok(summary) => {
                let timestamp = summary
                    .params
                    .timestamp
                    .map(format_timestamp)
                    .unwrap_or_else(|| "--:--:--.---".to_string());
                format!(
                    "[{}] {} {}",
                    timestamp,
                    summary.method,
                    summary.params.request_id.as_deref().unwrap_or("-")
                )
            }
            Err(_) => payload.to_string(),
        }
    }
}

impl CdpEventSink for StdoutEventSink {
    fn dispatch(&self, payload: String) {
        let line = self.render(&payload);
        let mut stdout = std::io::stdout().lock();
        if let Err(e) = writeln!(stdout, "{line}") {
            tracing::warn!("Failed to write event to stdout: {}", e);
        }
    }
}

#[derive(Deserialize)]
struct PayloadSummary {
    method: String,
    params: ParamsSummary,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ParamsSummary {
    request_id: Option<String>,
    timestamp: Option<f64>,
}

/// Forwards payloads into a tokio channel for async consumers
#[derive(Clone)]
pub struct ChannelEventSink {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelEventSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl CdpEventSink for ChannelEventSink {
    fn dispatch(&self, payload: String) {
        if self.tx.send(payload).is_err() {
            tracing::trace!("Channel sink receiver dropped; discarding event");
        }
    }
}

/// Format epoch seconds as `HH:MM:SS.mmm` (UTC)
fn format_timestamp(seconds: f64) -> String {
    let millis = (seconds.max(0.0) * 1000.0) as u64;
    let secs = millis / 1000;
    let mins = secs / 60;
    let hours = mins / 60;
    format!(
        "{:02}:{:02}:{:02}.{:03}",
        hours % 24,
        mins % 60,
        secs % 60,
        millis % 1000
    )
}
