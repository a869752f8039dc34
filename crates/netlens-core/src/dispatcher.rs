//! CDP event dispatcher
//!
//! Turns resolved occasions into [`CdpEvent`]s and pushes them, serialized,
//! to the currently attached sink. The sink is held weakly: the embedding
//! application owns it and may drop it at any time, in which case events are
//! discarded.

use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use crate::events::CdpEventSink;
use crate::identity::RequestId;
use crate::protocol::{
    CdpEvent, CdpMethod, LoadingFinishedParams, ReceivedResponseBodyParams, RequestWillBeSentExtraInfoParams,
    RequestWillBeSentParams, ResponseReceivedParams,
};
use crate::transport::{HttpRequest, HttpResponse};

/// Counters over the dispatcher's lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    /// Events handed to a live sink
    pub emitted: u64,
    /// Events discarded because no sink was attached or it was gone
    pub dropped_no_sink: u64,
    /// Events that failed to serialize
    pub dropped_unencodable: u64,
    /// Events whose delivery panicked inside the sink
    pub dropped_sink_panic: u64,
}

#[derive(Default)]
pub struct CdpEventDispatcher {
    sink: Option<Weak<dyn CdpEventSink>>,
    stats: DispatchStats,
}

impl CdpEventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the sink; applies to every event emitted after this call
    pub fn set_sink(&mut self, sink: Option<Weak<dyn CdpEventSink>>) {
        self.sink = sink;
    }

    pub fn has_live_sink(&self) -> bool {
        self.live_sink().is_some()
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    fn live_sink(&self) -> Option<Arc<dyn CdpEventSink>> {
        self.sink.as_ref().and_then(Weak::upgrade)
    }

    /// `requestWillBeSent` followed by `requestWillBeSentExtraInfo`, sharing one timestamp
    pub fn will_send_request(
        &mut self,
        now: f64,
        request_id: RequestId,
        request: &HttpRequest,
        encoded_data_length: u64,
        redirect_response: Option<&HttpResponse>,
    ) {
        self.emit(CdpEvent::request_will_be_sent(RequestWillBeSentParams::new(
            now,
            request_id,
            request,
            encoded_data_length,
            redirect_response,
        )));
        self.emit(CdpEvent::request_will_be_sent_extra_info(
            RequestWillBeSentExtraInfoParams::new(now, request_id, request),
        ));
    }

    pub fn response_received(
        &mut self,
        now: f64,
        request_id: RequestId,
        response: &HttpResponse,
        encoded_data_length: u64,
    ) {
        self.emit(CdpEvent::response_received(ResponseReceivedParams::new(
            now,
            request_id,
            response,
            encoded_data_length,
        )));
    }

    pub fn response_body(&mut self, request_id: RequestId, body: &[u8], is_text: bool) {
        self.emit(CdpEvent::received_response_body(
            ReceivedResponseBodyParams::new(request_id, body, is_text),
        ));
    }

    pub fn loading_finished(&mut self, now: f64, request_id: RequestId, encoded_data_length: u64) {
        self.emit(CdpEvent::loading_finished(LoadingFinishedParams::new(
            now,
            request_id,
            encoded_data_length,
        )));
    }

    /// Serialize and hand off. Never fails: problems are logged and the event dropped.
    pub fn emit(&mut self, event: CdpEvent) {
        let Some(sink) = self.live_sink() else {
            self.stats.dropped_no_sink += 1;
            tracing::trace!(method = %event.method(), "No sink attached; dropping event");
            return;
        };
        self.deliver(sink.as_ref(), event.method(), event.to_json());
    }

    /// A panicking sink loses the event but never takes the serializer down
    fn deliver(
        &mut self,
        sink: &dyn CdpEventSink,
        method: CdpMethod,
        encoded: serde_json::Result<String>,
    ) {
        let payload = match encoded {
            Ok(payload) => payload,
            Err(e) => {
                self.stats.dropped_unencodable += 1;
                tracing::warn!(%method, "Dropping unencodable event: {}", e);
                return;
            }
        };
        match panic::catch_unwind(AssertUnwindSafe(|| sink.dispatch(payload))) {
            Ok(()) => self.stats.emitted += 1,
            Err(_) => {
                self.stats.dropped_sink_panic += 1;
                tracing::warn!(%method, "Sink panicked while handling event; dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

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

    fn attach(dispatcher: &mut CdpEventDispatcher, sink: &Arc<RecordingSink>) {
        let sink: Arc<dyn CdpEventSink> = sink.clone();
        dispatcher.set_sink(Some(Arc::downgrade(&sink)));
    }

    #[test]
    fn test_will_send_request_emits_pair() {
        let sink = Arc::new(RecordingSink::default());
        let mut dispatcher = CdpEventDispatcher::new();
        attach(&mut dispatcher, &sink);

        dispatcher.will_send_request(
            1.0,
            RequestId(0),
            &HttpRequest::get("https://example.com"),
            0,
            None,
        );

        assert_eq!(
            sink.methods(),
            vec![
                "Network.requestWillBeSent",
                "Network.requestWillBeSentExtraInfo"
            ]
        );
        assert_eq!(dispatcher.stats().emitted, 2);
    }

    #[test]
    fn test_no_sink_drops_silently() {
        let mut dispatcher = CdpEventDispatcher::new();
        dispatcher.loading_finished(1.0, RequestId(0), 0);

        assert!(!dispatcher.has_live_sink());
        assert_eq!(dispatcher.stats().dropped_no_sink, 1);
        assert_eq!(dispatcher.stats().emitted, 0);
    }

    #[test]
    fn test_dropped_sink_is_treated_as_absent() {
        let sink = Arc::new(RecordingSink::default());
        let mut dispatcher = CdpEventDispatcher::new();
        attach(&mut dispatcher, &sink);
        assert!(dispatcher.has_live_sink());

        drop(sink);
        dispatcher.response_body(RequestId(0), b"x", true);
        assert_eq!(dispatcher.stats().dropped_no_sink, 1);
    }

    #[test]
    fn test_swapping_sink_is_not_retroactive() {
        let first = Arc::new(RecordingSink::default());
        let second = Arc::new(RecordingSink::default());
        let mut dispatcher = CdpEventDispatcher::new();

        attach(&mut dispatcher, &first);
        dispatcher.loading_finished(1.0, RequestId(0), 0);
        attach(&mut dispatcher, &second);
        dispatcher.loading_finished(2.0, RequestId(1), 0);

        assert_eq!(first.payloads.lock().unwrap().len(), 1);
        assert_eq!(second.payloads.lock().unwrap().len(), 1);
        assert!(second.payloads.lock().unwrap()[0].contains("\"requestId\":\"1\""));
    }

    struct PanickingSink;

    impl CdpEventSink for PanickingSink {
        fn dispatch(&self, _payload: String) {
            panic!("sink failure");
        }
    }

    #[test]
    fn test_panicking_sink_is_contained() {
        let bad: Arc<dyn CdpEventSink> = Arc::new(PanickingSink);
        let mut dispatcher = CdpEventDispatcher::new();
        dispatcher.set_sink(Some(Arc::downgrade(&bad)));

        dispatcher.loading_finished(1.0, RequestId(0), 0);
        assert_eq!(dispatcher.stats().dropped_sink_panic, 1);
        assert_eq!(dispatcher.stats().emitted, 0);

        let good = Arc::new(RecordingSink::default());
        attach(&mut dispatcher, &good);
        dispatcher.loading_finished(2.0, RequestId(1), 0);
        assert_eq!(good.methods(), vec!["Network.loadingFinished"]);
    }

    #[test]
    fn test_unencodable_event_is_dropped() {
        let sink = Arc::new(RecordingSink::default());
        let mut dispatcher = CdpEventDispatcher::new();
        let encoded = serde_json::from_str::<serde_json::Value>("{").map(|_| String::new());
        assert!(encoded.is_err());

        dispatcher.deliver(sink.as_ref(), CdpMethod::LoadingFinished, encoded);

        assert_eq!(dispatcher.stats().dropped_unencodable, 1);
        assert_eq!(dispatcher.stats().emitted, 0);
        assert!(sink.payloads.lock().unwrap().is_empty());
    }
}
