//! Interception adapter
//!
//! Bridges an instrumentation source's raw callbacks onto the serializer
//! queue. Every hook is non-blocking and infallible from the caller's point of
//! view; the adapter never alters the traffic it observes.

use bytes::Bytes;
use std::sync::Arc;

use crate::observation::ObservationToken;
use crate::serializer::{CallbackQueue, InterceptedCallback};
use crate::transport::{HttpRequest, HttpResponse, TaskId, TransportError};

/// Callbacks an instrumentation source delivers, from any thread
pub trait InterceptionHooks: Send + Sync {
    /// A task was created. The returned observer reports later changes of the
    /// task's current request and must be kept by the source for as long as
    /// it wants to report them.
    fn on_task_created(
        &self,
        task_id: TaskId,
        current_request: Option<HttpRequest>,
    ) -> CurrentRequestObserver;

    fn on_response_received(&self, task_id: TaskId, response: HttpResponse);

    fn on_data_received(&self, task_id: TaskId, data: Bytes);

    /// A redirect is about to be followed; returns the request to follow instead
    fn on_redirect(
        &self,
        task_id: TaskId,
        response: HttpResponse,
        request: HttpRequest,
    ) -> HttpRequest;

    fn on_completed(&self, task_id: TaskId, error: Option<TransportError>);
}

/// A subscription surface that can carry interception hooks
pub trait InstrumentationSource {
    fn install(&self, hooks: Arc<dyn InterceptionHooks>);

    /// Detach every installed hook. Work already submitted is still processed.
    fn remove_all(&self);
}

/// Forwards raw callbacks, unmodified, into the serializer
#[derive(Clone)]
pub struct InterceptionAdapter {
    queue: CallbackQueue,
}

impl InterceptionAdapter {
    pub fn new(queue: CallbackQueue) -> Self {
        Self { queue }
    }
}

impl InterceptionHooks for InterceptionAdapter {
    fn on_task_created(
        &self,
        task_id: TaskId,
        current_request: Option<HttpRequest>,
    ) -> CurrentRequestObserver {
        let token = ObservationToken::new();
        self.queue.submit(InterceptedCallback::TaskCreated {
            task_id,
            request: current_request,
            observation: token.clone(),
        });
        CurrentRequestObserver {
            task_id,
            token,
            queue: self.queue.clone(),
        }
    }

    fn on_response_received(&self, task_id: TaskId, response: HttpResponse) {
        self.queue
            .submit(InterceptedCallback::ResponseReceived { task_id, response });
    }

    fn on_data_received(&self, task_id: TaskId, data: Bytes) {
        self.queue
            .submit(InterceptedCallback::DataReceived { task_id, data });
    }

    fn on_redirect(
        &self,
        task_id: TaskId,
        response: HttpResponse,
        request: HttpRequest,
    ) -> HttpRequest {
        self.queue.submit(InterceptedCallback::Redirect {
            task_id,
            response,
            request: request.clone(),
        });
        request
    }

    fn on_completed(&self, task_id: TaskId, error: Option<TransportError>) {
        self.queue
            .submit(InterceptedCallback::Completed { task_id, error });
    }
}

/// Reports "current request changed" for one task until invalidated.
///
/// Invalidation comes either from the source (detach) or from the task's
/// registry entry when it is finalized; both are idempotent.
pub struct CurrentRequestObserver {
    task_id: TaskId,
    token: ObservationToken,
    queue: CallbackQueue,
}

impl CurrentRequestObserver {
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn is_active(&self) -> bool {
        self.token.is_active()
    }

    pub fn current_request_changed(&self, request: Option<HttpRequest>) {
        let submitted = self.token.run_if_active(|| {
            self.queue.submit(InterceptedCallback::CurrentRequestChanged {
                task_id: self.task_id,
                request,
            });
        });
        if !submitted {
            tracing::trace!(task_id = %self.task_id, "Observation detached; ignoring change");
        }
    }

    /// Stop observing. Already-submitted changes are unaffected.
    pub fn invalidate(&self) {
        self.token.invalidate();
    }
}
