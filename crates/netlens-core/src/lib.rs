//! netlens Core Library
//!
//! Observes an HTTP stack's task lifecycle and re-emits it as Chrome DevTools
//! Protocol `Network.*` events. Callbacks may arrive on any thread; all state
//! lives on one serializer thread, so events leave in a single deterministic
//! order.
//!
//! # Modules
//!
//! - [`transport`] - Raw task, request and response values from the HTTP stack
//! - [`identity`] - Request fingerprints and per-task request ids
//! - [`registry`] - Live task bookkeeping
//! - [`observation`] - Detachable "current request changed" subscriptions
//! - [`protocol`] - DevTools event payloads
//! - [`events`] - Event sink trait and stock sinks
//! - [`dispatcher`] - Event construction and delivery
//! - [`serializer`] - The confinement queue and its worker thread
//! - [`adapter`] - Instrumentation hooks
//! - [`inspector`] - Public facade
//! - [`config`] - Configuration
//! - [`error`] - Error types
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use netlens_core::{
//!     HttpRequest, InspectorConfig, InterceptionHooks, NetworkInspector, StdoutEventSink, TaskId,
//! };
//!
//! let inspector = NetworkInspector::new(InspectorConfig::default())?;
//! let sink = Arc::new(StdoutEventSink::new(true));
//! inspector.set_sink(&sink)?;
//!
//! let hooks = inspector.adapter();
//! let _observer = hooks.on_task_created(TaskId(1), Some(HttpRequest::get("https://example.com")));
//! hooks.on_completed(TaskId(1), None);
//! inspector.flush()?;
//! # Ok::<(), netlens_core::InspectorError>(())
//! ```

pub mod adapter;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod identity;
pub mod inspector;
pub mod observation;
pub mod protocol;
pub mod registry;
pub mod serializer;
pub mod transport;

// Re-export commonly used types
pub use adapter::{
    CurrentRequestObserver, InstrumentationSource, InterceptionAdapter, InterceptionHooks,
};
pub use config::{BodyDelivery, InspectorConfig};
pub use dispatcher::DispatchStats;
pub use error::{InspectorError, Result};
pub use events::{CdpEventSink, ChannelEventSink, NoOpEventSink, StdoutEventSink};
pub use identity::{Fingerprint, RequestId};
pub use inspector::{MaintenanceHandle, NetworkInspector, RegistrySnapshot, TaskSnapshot};
pub use protocol::{is_text_content_type, CdpEvent, CdpMethod};
pub use transport::{HttpRequest, HttpResponse, TaskId, TransportError};
