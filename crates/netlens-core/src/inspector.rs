//! Network inspector
//!
//! The embedding application's entry point. Owns the serializer, hands out
//! interception adapters, manages the sink and exposes read-only
//! introspection of the registry.

use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::adapter::{InstrumentationSource, InterceptionAdapter};
use crate::config::InspectorConfig;
use crate::dispatcher::DispatchStats;
use crate::error::{InspectorError, Result};
use crate::events::CdpEventSink;
use crate::identity::RequestId;
use crate::serializer::EventSerializer;
use crate::transport::TaskId;

/// Point-in-time view of one live task
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskSnapshot {
    pub task_id: TaskId,
    pub request_ids: Vec<RequestId>,
    pub current_id: Option<RequestId>,
    pub bytes_received: u64,
    pub body_exceeds_limit: bool,
    pub has_response: bool,
}

/// Point-in-time view of the registry, taken on the serializer thread
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrySnapshot {
    /// Live tasks ordered by task id
    pub tasks: Vec<TaskSnapshot>,
    /// Request ids handed out so far, across all tasks
    pub ids_issued: u64,
    pub dispatch: DispatchStats,
    pub sink_attached: bool,
}

impl RegistrySnapshot {
    pub fn task(&self, task_id: TaskId) -> Option<&TaskSnapshot> {
        self.tasks.iter().find(|task| task.task_id == task_id)
    }

    /// Every request id currently held by a live task
    pub fn all_request_ids(&self) -> BTreeSet<RequestId> {
        self.tasks
            .iter()
            .flat_map(|task| task.request_ids.iter().copied())
            .collect()
    }
}

/// Handle to the periodic stale-task sweep
pub struct MaintenanceHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl MaintenanceHandle {
    /// Stop the sweep loop and wait for it to exit
    pub async fn shutdown(mut self) -> std::result::Result<(), tokio::task::JoinError> {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            match task.await {
                Ok(_) => Ok(()),
                Err(err) if err.is_cancelled() => Ok(()),
                Err(err) => Err(err),
            }
        } else {
            Ok(())
        }
    }
}

impl Drop for MaintenanceHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

pub struct NetworkInspector {
    config: InspectorConfig,
    serializer: EventSerializer,
}

impl NetworkInspector {
    /// Validate the config and start the serializer thread
    pub fn new(config: InspectorConfig) -> Result<Self> {
        config.validate()?;
        let serializer = EventSerializer::spawn(&config)?;
        Ok(Self { config, serializer })
    }

    pub fn config(&self) -> &InspectorConfig {
        &self.config
    }

    /// A fresh adapter feeding this inspector
    pub fn adapter(&self) -> InterceptionAdapter {
        InterceptionAdapter::new(self.serializer.queue())
    }

    /// Install an adapter on `source`
    pub fn intercept(&self, source: &dyn InstrumentationSource) {
        source.install(Arc::new(self.adapter()));
        tracing::debug!("Interception installed");
    }

    pub fn stop_intercepting(&self, source: &dyn InstrumentationSource) {
        source.remove_all();
        tracing::debug!("Interception removed");
    }

    /// Attach `sink` for every event emitted from now on.
    ///
    /// Only a weak reference is kept: the caller owns the sink, and events
    /// emitted after it is dropped are discarded.
    pub fn set_sink<S: CdpEventSink + 'static>(&self, sink: &Arc<S>) -> Result<()> {
        let sink: Arc<dyn CdpEventSink> = sink.clone();
        self.serializer.set_sink(Some(Arc::downgrade(&sink)))
    }

    pub fn clear_sink(&self) -> Result<()> {
        self.serializer.set_sink(None)
    }

    /// Block until every callback submitted so far has been processed
    pub fn flush(&self) -> Result<()> {
        self.serializer.flush()
    }

    pub fn snapshot(&self) -> Result<RegistrySnapshot> {
        self.serializer.snapshot()
    }

    /// Request ids held by a live task, or `None` if the task is unknown
    pub fn request_ids(&self, task_id: TaskId) -> Result<Option<Vec<RequestId>>> {
        Ok(self
            .snapshot()?
            .task(task_id)
            .map(|task| task.request_ids.clone()))
    }

    /// Reclaim tasks idle for longer than the configured stale timeout
    pub fn sweep_stale(&self) -> Result<Vec<TaskId>> {
        self.serializer.sweep(self.config.stale_task_timeout())
    }

    /// Run [`sweep_stale`](Self::sweep_stale) every `sweep_interval` on the
    /// current tokio runtime. Fails with [`InspectorError::Runtime`] when
    /// called outside one.
    pub fn spawn_maintenance(&self) -> Result<MaintenanceHandle> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| InspectorError::Runtime(e.to_string()))?;
        let queue = self.serializer.queue();
        let max_idle = self.config.stale_task_timeout();
        let tick_interval = self.config.sweep_interval().max(Duration::from_millis(1));
        let cancel = CancellationToken::new();
        let loop_token = cancel.clone();
        let task = runtime.spawn(async move {
            let mut ticker = interval(tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => {
                        break;
                    }
                    _ = ticker.tick() => {
                        if queue.request_sweep(max_idle).is_err() {
                            tracing::debug!("Serializer gone; stopping maintenance");
                            break;
                        }
                    }
                }
            }
        });
        Ok(MaintenanceHandle {
            cancel,
            task: Some(task),
        })
    }

    /// Drain pending work and stop the serializer thread
    pub fn shutdown(&self) {
        self.serializer.shutdown();
    }
}
