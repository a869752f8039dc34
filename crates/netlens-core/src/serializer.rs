//! Event serializer (confinement queue)
//!
//! Every intercepted callback becomes a [`Command`] on one unbounded queue
//! drained by a single dedicated thread. That thread exclusively owns the
//! [`TaskRegistry`], the global id counter and the dispatcher, so none of
//! them need locks and all events leave in one deterministic order.
//!
//! Producers never block. Synchronous round trips (sink attachment, flush,
//! snapshot, sweep) carry a reply channel and wait for the worker; calling
//! them from the worker itself would deadlock and is rejected.

use bytes::Bytes;
use std::cell::Cell;
use std::sync::mpsc as std_mpsc;
use std::sync::{Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::config::InspectorConfig;
use crate::dispatcher::CdpEventDispatcher;
use crate::error::{InspectorError, Result};
use crate::events::CdpEventSink;
use crate::identity::{Fingerprint, SequentialIds};
use crate::inspector::{RegistrySnapshot, TaskSnapshot};
use crate::observation::ObservationToken;
use crate::protocol::{is_text_content_type, now_seconds};
use crate::registry::{ChunkDecision, TaskEntry, TaskRegistry};
use crate::transport::{HttpRequest, HttpResponse, TaskId, TransportError};

thread_local! {
    static IN_SERIALIZER: Cell<bool> = const { Cell::new(false) };
}

/// Whether the calling thread is the serializer's worker
pub fn in_serializer_context() -> bool {
    IN_SERIALIZER.with(|flag| flag.get())
}

/// A raw instrumentation callback, forwarded unmodified
#[derive(Debug)]
pub(crate) enum InterceptedCallback {
    TaskCreated {
        task_id: TaskId,
        request: Option<HttpRequest>,
        observation: ObservationToken,
    },
    CurrentRequestChanged {
        task_id: TaskId,
        request: Option<HttpRequest>,
    },
    ResponseReceived {
        task_id: TaskId,
        response: HttpResponse,
    },
    DataReceived {
        task_id: TaskId,
        data: Bytes,
    },
    Redirect {
        task_id: TaskId,
        response: HttpResponse,
        request: HttpRequest,
    },
    Completed {
        task_id: TaskId,
        error: Option<TransportError>,
    },
}

enum Command {
    Callback(InterceptedCallback),
    AttachSink {
        sink: Option<Weak<dyn CdpEventSink>>,
        ack: Option<std_mpsc::Sender<()>>,
    },
    Flush(std_mpsc::Sender<()>),
    Snapshot(std_mpsc::Sender<RegistrySnapshot>),
    Sweep {
        max_idle: Duration,
        reply: Option<std_mpsc::Sender<Vec<TaskId>>>,
    },
    Shutdown,
}

/// Producer handle onto the confinement queue. Cheap to clone, usable from any thread.
#[derive(Clone)]
pub struct CallbackQueue {
    tx: mpsc::UnboundedSender<Command>,
}

impl CallbackQueue {
    /// Fire-and-forget submission; a closed queue is logged, never reported
    pub(crate) fn submit(&self, callback: InterceptedCallback) {
        if self.tx.send(Command::Callback(callback)).is_err() {
            warn!("Serializer queue closed; dropping intercepted callback");
        }
    }

    pub(crate) fn request_sweep(&self, max_idle: Duration) -> Result<()> {
        self.send(Command::Sweep {
            max_idle,
            reply: None,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn send(&self, command: Command) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|_| InspectorError::QueueClosed)
    }
}

/// Owner of the confinement thread
pub struct EventSerializer {
    queue: CallbackQueue,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl EventSerializer {
    pub fn spawn(config: &InspectorConfig) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = ConfinedState::new(config.clone());
        let worker = thread::Builder::new()
            .name(config.worker_name.clone())
            .spawn(move || run_worker(state, rx))
            .map_err(|e| InspectorError::WorkerSpawn(e.to_string()))?;

        debug!("Serializer worker '{}' started", config.worker_name);
        Ok(Self {
            queue: CallbackQueue { tx },
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn queue(&self) -> CallbackQueue {
        self.queue.clone()
    }

    /// Swap the sink. Ordered with callbacks: applies to events emitted by
    /// work processed after this call.
    pub fn set_sink(&self, sink: Option<Weak<dyn CdpEventSink>>) -> Result<()> {
        if in_serializer_context() {
            if cfg!(debug_assertions) {
                panic!("set_sink must not be called from the serializer context");
            }
            return self.queue.send(Command::AttachSink { sink, ack: None });
        }
        let (ack, done) = std_mpsc::channel();
        self.queue.send(Command::AttachSink {
            sink,
            ack: Some(ack),
        })?;
        done.recv().map_err(|_| InspectorError::QueueClosed)
    }

    /// Wait until everything submitted before this call has been processed
    pub fn flush(&self) -> Result<()> {
        self.round_trip("flush", Command::Flush)
    }

    pub fn snapshot(&self) -> Result<RegistrySnapshot> {
        self.round_trip("snapshot", Command::Snapshot)
    }

    /// Reclaim tasks idle for at least `max_idle`
    pub fn sweep(&self, max_idle: Duration) -> Result<Vec<TaskId>> {
        self.round_trip("sweep", |reply| Command::Sweep {
            max_idle,
            reply: Some(reply),
        })
    }

    fn round_trip<T>(
        &self,
        operation: &'static str,
        make: impl FnOnce(std_mpsc::Sender<T>) -> Command,
    ) -> Result<T> {
        if in_serializer_context() {
            if cfg!(debug_assertions) {
                panic!("{operation} must not be called from the serializer context");
            }
            return Err(InspectorError::Reentrant(operation));
        }
        let (reply, response) = std_mpsc::channel();
        self.queue.send(make(reply))?;
        response.recv().map_err(|_| InspectorError::QueueClosed)
    }

    /// Stop the worker after it drains what was submitted so far. Idempotent.
    pub fn shutdown(&self) {
        let _ = self.queue.send(Command::Shutdown);
        if in_serializer_context() {
            return;
        }
        let handle = match self.worker.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("Serializer worker panicked");
            }
        }
    }
}

impl Drop for EventSerializer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(mut state: ConfinedState, mut rx: mpsc::UnboundedReceiver<Command>) {
    IN_SERIALIZER.with(|flag| flag.set(true));
    while let Some(command) = rx.blocking_recv() {
        match command {
            Command::Callback(callback) => state.handle(callback),
            Command::AttachSink { sink, ack } => {
                debug!(attached = sink.is_some(), "Sink updated");
                state.dispatcher.set_sink(sink);
                if let Some(ack) = ack {
                    let _ = ack.send(());
                }
            }
            Command::Flush(reply) => {
                let _ = reply.send(());
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(state.snapshot());
            }
            Command::Sweep { max_idle, reply } => {
                let swept = state.sweep(max_idle);
                if let Some(reply) = reply {
                    let _ = reply.send(swept);
                }
            }
            Command::Shutdown => break,
        }
    }
    debug!(
        "Serializer worker stopping with {} live task(s)",
        state.registry.len()
    );
}

/// State owned by the serializer thread
struct ConfinedState {
    config: InspectorConfig,
    registry: TaskRegistry,
    ids: SequentialIds,
    dispatcher: CdpEventDispatcher,
}

impl ConfinedState {
    fn new(config: InspectorConfig) -> Self {
        Self {
            config,
            registry: TaskRegistry::new(),
            ids: SequentialIds::new(),
            dispatcher: CdpEventDispatcher::new(),
        }
    }

    fn handle(&mut self, callback: InterceptedCallback) {
        let now = Instant::now();
        match callback {
            InterceptedCallback::TaskCreated {
                task_id,
                request,
                observation,
            } => self.on_task_created(task_id, request, observation, now),
            InterceptedCallback::CurrentRequestChanged { task_id, request } => {
                self.on_current_request_changed(task_id, request, now)
            }
            InterceptedCallback::ResponseReceived { task_id, response } => {
                self.on_response_received(task_id, response, now)
            }
            InterceptedCallback::DataReceived { task_id, data } => {
                self.on_data_received(task_id, data, now)
            }
            InterceptedCallback::Redirect {
                task_id,
                response,
                request,
            } => self.on_redirect(task_id, response, request, now),
            InterceptedCallback::Completed { task_id, error } => {
                self.on_completed(task_id, error)
            }
        }
    }

    fn on_task_created(
        &mut self,
        task_id: TaskId,
        request: Option<HttpRequest>,
        observation: ObservationToken,
        now: Instant,
    ) {
        debug!(%task_id, "Task created");
        let entry = self.registry.get_or_create(task_id, now);
        entry.touch(now);
        entry.attach_observation(observation);
        if let Some(request) = request {
            make_current(entry, &mut self.ids, &mut self.dispatcher, request);
        }
    }

    fn on_current_request_changed(
        &mut self,
        task_id: TaskId,
        request: Option<HttpRequest>,
        now: Instant,
    ) {
        let Some(entry) = self.registry.get_mut(task_id) else {
            trace!(%task_id, "Current request changed on unknown task; ignoring");
            return;
        };
        entry.touch(now);
        match request {
            Some(request) => make_current(entry, &mut self.ids, &mut self.dispatcher, request),
            None => {
                entry.identities.set_current(None);
                entry.current_request = None;
            }
        }
    }

    fn on_response_received(&mut self, task_id: TaskId, response: HttpResponse, now: Instant) {
        let Some(entry) = self.registry.get_mut(task_id) else {
            trace!(%task_id, "Response for unknown task; ignoring");
            return;
        };
        entry.touch(now);
        if let Some(request_id) = entry.identities.current_id() {
            self.dispatcher
                .response_received(now_seconds(), request_id, &response, entry.bytes_received);
        } else {
            debug!(%task_id, "Response before any request became current; not emitted");
        }
        entry.response = Some(response);
    }

    fn on_data_received(&mut self, task_id: TaskId, data: Bytes, now: Instant) {
        let Some(entry) = self.registry.get_mut(task_id) else {
            trace!(%task_id, "Data for unknown task; ignoring");
            return;
        };
        entry.touch(now);
        entry.bytes_received += data.len() as u64;

        let Some(request_id) = entry.identities.current_id() else {
            trace!(%task_id, "Data before any request became current; not captured");
            return;
        };
        match entry
            .body
            .accept(&data, self.config.max_body_bytes, self.config.body_delivery)
        {
            ChunkDecision::Emit => {
                let is_text = is_text_body(entry);
                self.dispatcher.response_body(request_id, &data, is_text);
            }
            ChunkDecision::Buffered => {}
            ChunkDecision::Suppressed => {
                trace!(%task_id, bytes = data.len(), "Body over capture limit; suppressed");
            }
        }
    }

    fn on_redirect(
        &mut self,
        task_id: TaskId,
        response: HttpResponse,
        request: HttpRequest,
        now: Instant,
    ) {
        let Some(entry) = self.registry.get_mut(task_id) else {
            trace!(%task_id, "Redirect on unknown task; ignoring");
            return;
        };
        entry.touch(now);
        entry.begin_hop();

        // A change notice for the target that arrived before this callback has
        // already announced it without `redirectResponse`; the pair is sent
        // again here so the redirect itself is never lost.
        let fingerprint = Fingerprint::of(&request);
        let (request_id, _) = entry
            .identities
            .resolve_or_assign(fingerprint, &mut self.ids);
        entry.identities.set_current(Some(fingerprint));
        debug!(%task_id, %request_id, status = response.status, "Redirect");

        self.dispatcher.will_send_request(
            now_seconds(),
            request_id,
            &request,
            entry.bytes_received,
            Some(&response),
        );
        entry.current_request = Some(request);
    }

    fn on_completed(&mut self, task_id: TaskId, error: Option<TransportError>) {
        let Some(mut entry) = self.registry.remove(task_id) else {
            debug!(%task_id, "Completion for unknown or finished task; ignoring");
            return;
        };
        if let Some(error) = error {
            debug!(%task_id, "Task failed: {}", error);
            return;
        }
        let Some(request_id) = entry.identities.current_id() else {
            debug!(%task_id, "Task completed before any request became current");
            return;
        };
        if let Some(pending) = entry.body.take_pending() {
            let is_text = is_text_body(&entry);
            self.dispatcher.response_body(request_id, &pending, is_text);
        }
        self.dispatcher
            .loading_finished(now_seconds(), request_id, entry.bytes_received);
        debug!(%task_id, %request_id, bytes = entry.bytes_received, "Task finished");
    }

    fn sweep(&mut self, max_idle: Duration) -> Vec<TaskId> {
        let swept = self.registry.sweep_idle(Instant::now(), max_idle);
        for task_id in &swept {
            warn!(%task_id, "Reclaimed task that never completed");
        }
        swept
    }

    fn snapshot(&self) -> RegistrySnapshot {
        let mut tasks: Vec<TaskSnapshot> = self
            .registry
            .iter()
            .map(|(task_id, entry)| TaskSnapshot {
                task_id: *task_id,
                request_ids: entry.identities.all_ids().into_iter().collect(),
                current_id: entry.identities.current_id(),
                bytes_received: entry.bytes_received,
                body_exceeds_limit: entry.body.exceeds_limit(),
                has_response: entry.response.is_some(),
            })
            .collect();
        tasks.sort_by_key(|task| task.task_id);

        RegistrySnapshot {
            tasks,
            ids_issued: self.ids.issued(),
            dispatch: self.dispatcher.stats(),
            sink_attached: self.dispatcher.has_live_sink(),
        }
    }
}

/// Register `request` as the task's current request; announce it if it is new
fn make_current(
    entry: &mut TaskEntry,
    ids: &mut SequentialIds,
    dispatcher: &mut CdpEventDispatcher,
    request: HttpRequest,
) {
    let fingerprint = Fingerprint::of(&request);
    let (request_id, fresh) = entry.identities.resolve_or_assign(fingerprint, ids);
    entry.identities.set_current(Some(fingerprint));
    if fresh {
        dispatcher.will_send_request(
            now_seconds(),
            request_id,
            &request,
            entry.bytes_received,
            None,
        );
    }
    entry.current_request = Some(request);
}

fn is_text_body(entry: &TaskEntry) -> bool {
    is_text_content_type(entry.response.as_ref().and_then(|r| r.content_type()))
}
