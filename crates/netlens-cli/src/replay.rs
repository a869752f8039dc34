//! Trace replay
//!
//! Acts as an instrumentation source that plays a recorded trace through the
//! installed hooks, in file order, from a single thread.

use netlens_core::{
    CdpEventSink, CurrentRequestObserver, InspectorConfig, InstrumentationSource,
    InterceptionHooks, NetworkInspector, TaskId,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::trace::{decode_data, TraceRecord};

/// Outcome of one replay run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplaySummary {
    pub records: usize,
    pub events_emitted: u64,
    pub unfinished_tasks: Vec<TaskId>,
}

#[derive(Default)]
pub struct ReplaySource {
    hooks: Mutex<Vec<Arc<dyn InterceptionHooks>>>,
    observers: Mutex<HashMap<TaskId, Vec<CurrentRequestObserver>>>,
}

impl ReplaySource {
    pub fn new() -> Self {
        Self::default()
    }

    fn installed(&self) -> Vec<Arc<dyn InterceptionHooks>> {
        self.hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Deliver one recorded callback to every installed hook
    pub fn play(&self, record: TraceRecord) -> Result<(), String> {
        tracing::trace!(task_id = %record.task_id(), "Replaying {:?}", record);
        let hooks = self.installed();
        let mut observers = self
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        match record {
            TraceRecord::TaskCreated { task_id, request } => {
                let created = hooks
                    .iter()
                    .map(|hook| hook.on_task_created(task_id, request.clone()))
                    .collect();
                observers.insert(task_id, created);
            }
            TraceRecord::CurrentRequestChanged { task_id, request } => {
                match observers.get(&task_id) {
                    Some(list) => {
                        for observer in list {
                            observer.current_request_changed(request.clone());
                        }
                    }
                    None => tracing::warn!(%task_id, "Current request changed before task creation"),
                }
            }
            TraceRecord::ResponseReceived { task_id, response } => {
                for hook in &hooks {
                    hook.on_response_received(task_id, response.clone());
                }
            }
            TraceRecord::DataReceived {
                task_id,
                text,
                base64,
            } => {
                let data = decode_data(text.as_deref(), base64.as_deref())?;
                for hook in &hooks {
                    hook.on_data_received(task_id, data.clone());
                }
            }
            TraceRecord::Redirect {
                task_id,
                response,
                request,
            } => {
                let mut followed = request;
                for hook in &hooks {
                    followed = hook.on_redirect(task_id, response.clone(), followed);
                }
                tracing::debug!(%task_id, url = %followed.url, "Following redirect");
            }
            TraceRecord::Completed { task_id, error } => {
                for hook in &hooks {
                    hook.on_completed(task_id, error.clone());
                }
                observers.remove(&task_id);
            }
            TraceRecord::InvalidateObservation { task_id } => {
                if let Some(list) = observers.get(&task_id) {
                    for observer in list {
                        observer.invalidate();
                    }
                }
            }
        }
        Ok(())
    }
}

impl InstrumentationSource for ReplaySource {
    fn install(&self, hooks: Arc<dyn InterceptionHooks>) {
        self.hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(hooks);
    }

    fn remove_all(&self) {
        self.hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Replay `records` through a fresh inspector whose events go to `sink`
pub fn run_replay<S: CdpEventSink + 'static>(
    records: Vec<TraceRecord>,
    config: InspectorConfig,
    sink: &Arc<S>,
) -> Result<ReplaySummary, String> {
    let inspector = NetworkInspector::new(config)?;
    inspector.set_sink(sink)?;

    let source = ReplaySource::new();
    inspector.intercept(&source);

    let count = records.len();
    for record in records {
        source.play(record)?;
    }
    inspector.flush()?;
    let snapshot = inspector.snapshot()?;
    inspector.stop_intercepting(&source);
    inspector.shutdown();

    for task in &snapshot.tasks {
        tracing::warn!(
            task_id = %task.task_id,
            request_ids = ?task.request_ids,
            "Task never completed"
        );
    }
    tracing::info!(
        "Replayed {} record(s): {} event(s) emitted, {} dropped",
        count,
        snapshot.dispatch.emitted,
        snapshot.dispatch.dropped_no_sink + snapshot.dispatch.dropped_unencodable
    );

    Ok(ReplaySummary {
        records: count,
        events_emitted: snapshot.dispatch.emitted,
        unfinished_tasks: snapshot.tasks.iter().map(|task| task.task_id).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::parse_trace;

    #[derive(Default)]
    struct RecordingSink {
        payloads: Mutex<Vec<String>>,
    }

    impl CdpEventSink for RecordingSink {
        fn dispatch(&self, payload: String) {
            self.payloads.lock().unwrap().push(payload);
        }
    }

    impl RecordingSink {
        fn methods(&self) -> Vec<String> {
            self.payloads
                .lock()
                .unwrap()
                .iter()
                .map(|p| {
                    let v: serde_json::Value = serde_json::from_str(p).unwrap();
                    v["method"].as_str().unwrap().to_string()
                })
                .collect()
        }
    }

    const REDIRECT_TRACE: &str = r#"
{"event":"task_created","task_id":7,"request":{"method":"GET","url":"https://example.com/a"}}
{"event":"redirect","task_id":7,"response":{"url":"https://example.com/a","status":302},"request":{"method":"GET","url":"https://example.com/b"}}
{"event":"response_received","task_id":7,"response":{"url":"https://example.com/b","status":200,"headers":{"Content-Type":"text/plain"}}}
{"event":"data_received","task_id":7,"text":"hello"}
{"event":"completed","task_id":7}
"#;

    #[test]
    fn test_replay_redirect_trace() {
        let sink = Arc::new(RecordingSink::default());
        let records = parse_trace(REDIRECT_TRACE).unwrap();

        let summary = run_replay(records, InspectorConfig::new(), &sink).unwrap();

        assert_eq!(summary.records, 5);
        assert_eq!(summary.events_emitted, 7);
        assert!(summary.unfinished_tasks.is_empty());
        assert_eq!(
            sink.methods(),
            vec![
                "Network.requestWillBeSent",
                "Network.requestWillBeSentExtraInfo",
                "Network.requestWillBeSent",
                "Network.requestWillBeSentExtraInfo",
                "Network.responseReceived",
                "Expo(Network.receivedResponseBody)",
                "Network.loadingFinished",
            ]
        );
    }

    #[test]
    fn test_replay_reports_unfinished_tasks() {
        let sink = Arc::new(RecordingSink::default());
        let records = parse_trace(
            r#"{"event":"task_created","task_id":1,"request":{"method":"GET","url":"https://example.com"}}
{"event":"task_created","task_id":2}"#,
        )
        .unwrap();

        let summary = run_replay(records, InspectorConfig::new(), &sink).unwrap();
        assert_eq!(summary.unfinished_tasks, vec![TaskId(1), TaskId(2)]);
    }

    #[test]
    fn test_replay_invalidated_observation() {
        let sink = Arc::new(RecordingSink::default());
        let records = parse_trace(
            r#"{"event":"task_created","task_id":3}
{"event":"invalidate_observation","task_id":3}
{"event":"current_request_changed","task_id":3,"request":{"method":"GET","url":"https://example.com"}}
{"event":"completed","task_id":3}"#,
        )
        .unwrap();

        let summary = run_replay(records, InspectorConfig::new(), &sink).unwrap();
        assert_eq!(summary.events_emitted, 0);
        assert!(sink.methods().is_empty());
    }

    #[test]
    fn test_removed_source_delivers_nothing() {
        let source = ReplaySource::new();
        let inspector = NetworkInspector::new(InspectorConfig::new()).unwrap();
        let sink = Arc::new(RecordingSink::default());
        inspector.set_sink(&sink).unwrap();

        inspector.intercept(&source);
        inspector.stop_intercepting(&source);
        source
            .play(TraceRecord::TaskCreated {
                task_id: TaskId(1),
                request: Some(netlens_core::HttpRequest::get("https://example.com")),
            })
            .unwrap();
        inspector.flush().unwrap();

        assert!(sink.methods().is_empty());
    }
}
