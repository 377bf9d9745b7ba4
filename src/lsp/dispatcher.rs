//! Request correlation and inbound routing
//!
//! Owns the outstanding-request table, the notification observer table and
//! the handlers for backend-initiated requests. It performs no I/O; the
//! connection task feeds it decoded messages.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::oneshot;
use tracing::{Level, debug, error, info, trace, warn};

use crate::log_lsp_message;
use crate::lsp::error::SessionError;
use crate::lsp::jsonrpc_utils::{
    error_codes, error_response, method_not_found_response, null_success_response,
    success_response,
};
use crate::lsp::protocol::{
    JsonRpcErrorObject, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
};

/// Observer invoked for every inbound notification of one method
pub type NotificationObserver = Arc<dyn Fn(&JsonRpcNotification) + Send + Sync>;

/// Handler answering one backend-initiated request method
pub type RequestHandler =
    Arc<dyn Fn(Option<Value>) -> Result<Value, JsonRpcErrorObject> + Send + Sync>;

/// Completion slot of an outstanding request
pub type ResponseSlot = oneshot::Receiver<Result<Value, SessionError>>;

struct PendingRequest {
    method: String,
    slot: oneshot::Sender<Result<Value, SessionError>>,
}

pub struct Dispatcher {
    /// Next request id; ids are never reused within a session
    next_id: AtomicU64,

    /// Outstanding requests keyed by id
    pending: Mutex<HashMap<u64, PendingRequest>>,

    /// Notification observers in registration order
    observers: RwLock<HashMap<String, Vec<NotificationObserver>>>,

    /// Handlers for backend-initiated requests
    request_handlers: RwLock<HashMap<String, RequestHandler>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            observers: RwLock::new(HashMap::new()),
            request_handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Allocate an id and a completion slot for an outbound request
    pub fn register(&self, method: &str) -> (u64, ResponseSlot) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel();

        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                id,
                PendingRequest {
                    method: method.to_string(),
                    slot: sender,
                },
            );
        trace!("Registered pending request {} ({})", id, method);
        (id, receiver)
    }

    /// Drop an outstanding request; a later response for it is discarded
    pub fn forget(&self, id: u64) -> bool {
        let removed = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        if let Some(pending) = &removed {
            debug!("Abandoned pending request {} ({})", id, pending.method);
        }
        removed.is_some()
    }

    pub fn pending_count(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Route a response to the caller waiting on its id
    pub fn complete(&self, response: JsonRpcResponse) {
        let Some(id) = response.id.as_u64() else {
            warn!("Discarding response with foreign id {}", response.id);
            return;
        };

        let pending = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);

        match pending {
            Some(pending) => {
                log_lsp_message!(Level::DEBUG, "inbound", pending.method.as_str(), &response);
                if pending.slot.send(response.into_result()).is_err() {
                    debug!("Caller of request {} went away before its response", id);
                }
            }
            None => {
                warn!("Discarding late or unknown response for request {}", id);
            }
        }
    }

    /// Fail every outstanding request
    pub fn cancel_all(&self, make_error: impl Fn() -> SessionError) {
        let drained: Vec<(u64, PendingRequest)> = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();

        if !drained.is_empty() {
            info!("Cancelling {} outstanding request(s)", drained.len());
        }
        for (id, pending) in drained {
            trace!("Cancelling request {} ({})", id, pending.method);
            let _ = pending.slot.send(Err(make_error()));
        }
    }

    pub fn add_observer(&self, method: &str, observer: NotificationObserver) {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(method.to_string())
            .or_default()
            .push(observer);
    }

    /// Deliver a notification to its observers in registration order
    pub fn notify_observers(&self, notification: &JsonRpcNotification) {
        log_lsp_message!(
            Level::TRACE,
            "inbound",
            notification.method.as_str(),
            &notification.params
        );
        Self::log_server_message(notification);

        // Clone the list so observers may register further observers
        let observers = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&notification.method)
            .cloned()
            .unwrap_or_default();

        if observers.is_empty() {
            trace!("No observers for {}", notification.method);
        }
        for observer in observers {
            observer(notification);
        }
    }

    pub fn set_request_handler(&self, method: &str, handler: RequestHandler) {
        self.request_handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(method.to_string(), handler);
    }

    /// Produce the reply to a backend-initiated request
    pub fn answer(&self, request: &JsonRpcRequest) -> JsonRpcResponse {
        log_lsp_message!(
            Level::DEBUG,
            "inbound",
            request.method.as_str(),
            &request.params
        );

        let handler = self
            .request_handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&request.method)
            .cloned();

        if let Some(handler) = handler {
            return match handler(request.params.clone()) {
                Ok(result) => success_response(request.id.clone(), result),
                Err(error) => {
                    error_response(request.id.clone(), error.code, error.message, error.data)
                }
            };
        }

        match request.method.as_str() {
            "client/registerCapability"
            | "client/unregisterCapability"
            | "window/workDoneProgress/create" => null_success_response(request.id.clone()),
            "workspace/configuration" => {
                let Some(items) = request
                    .params
                    .as_ref()
                    .and_then(|params| params.get("items"))
                    .and_then(Value::as_array)
                else {
                    return error_response(
                        request.id.clone(),
                        error_codes::INVALID_PARAMS,
                        "workspace/configuration requires an items array",
                        None,
                    );
                };
                success_response(request.id.clone(), Value::Array(vec![Value::Null; items.len()]))
            }
            other => {
                debug!("No handler for backend request {}", other);
                method_not_found_response(request.id.clone(), other)
            }
        }
    }

    /// Forward the backend's own log and message notifications to tracing
    fn log_server_message(notification: &JsonRpcNotification) {
        let method = notification.method.as_str();
        if method != "window/logMessage" && method != "window/showMessage" {
            return;
        }
        let Some(params) = &notification.params else {
            return;
        };
        let message = params
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default();

        // MessageType: 1 error, 2 warning, 3 info, 4 log, 5 debug
        match params.get("type").and_then(Value::as_u64) {
            Some(1) => error!(target: "backend", "{}", message),
            Some(2) => warn!(target: "backend", "{}", message),
            Some(3) => info!(target: "backend", "{}", message),
            _ => debug!(target: "backend", "{}", message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lsp::jsonrpc_utils::JSONRPC_VERSION;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn response(id: Value, result: Value) -> JsonRpcResponse {
        success_response(id, result)
    }

    #[tokio::test]
    async fn test_ids_are_monotonic_and_routed() {
        let dispatcher = Dispatcher::new();
        let (first, first_slot) = dispatcher.register("textDocument/hover");
        let (second, second_slot) = dispatcher.register("textDocument/hover");
        assert_eq!((first, second), (1, 2));
        assert_eq!(dispatcher.pending_count(), 2);

        dispatcher.complete(response(json!(second), json!("two")));
        dispatcher.complete(response(json!(first), json!("one")));

        assert_eq!(first_slot.await.unwrap().unwrap(), json!("one"));
        assert_eq!(second_slot.await.unwrap().unwrap(), json!("two"));
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_forgotten_request_discards_late_response() {
        let dispatcher = Dispatcher::new();
        let (id, slot) = dispatcher.register("workspace/symbol");
        assert!(dispatcher.forget(id));
        assert!(!dispatcher.forget(id));

        // Must not panic or resurrect the entry
        dispatcher.complete(response(json!(id), json!([])));
        assert_eq!(dispatcher.pending_count(), 0);
        assert!(slot.await.is_err());

        let (next, _slot) = dispatcher.register("workspace/symbol");
        assert!(next > id);
    }

    #[tokio::test]
    async fn test_cancel_all() {
        let dispatcher = Dispatcher::new();
        let (_, a) = dispatcher.register("a");
        let (_, b) = dispatcher.register("b");

        dispatcher.cancel_all(|| SessionError::SessionDead);

        assert!(matches!(a.await.unwrap(), Err(SessionError::SessionDead)));
        assert!(matches!(b.await.unwrap(), Err(SessionError::SessionDead)));
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[test]
    fn test_observers_run_in_registration_order() {
        let dispatcher = Dispatcher::new();
        let calls = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let calls = Arc::clone(&calls);
            dispatcher.add_observer(
                "textDocument/publishDiagnostics",
                Arc::new(move |_: &JsonRpcNotification| calls.lock().unwrap().push(tag)),
            );
        }
        let unrelated = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&unrelated);
        dispatcher.add_observer(
            "$/progress",
            Arc::new(move |_: &JsonRpcNotification| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        dispatcher.notify_observers(&JsonRpcNotification::new(
            "textDocument/publishDiagnostics",
            Some(json!({"uri": "file:///a.php", "diagnostics": []})),
        ));

        assert_eq!(*calls.lock().unwrap(), vec!["first", "second", "third"]);
        assert_eq!(unrelated.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_builtin_request_replies() {
        let dispatcher = Dispatcher::new();

        let reply = dispatcher.answer(&JsonRpcRequest::new(
            1,
            "client/registerCapability",
            Some(json!({"registrations": []})),
        ));
        assert_eq!(reply.result, Some(Value::Null));
        assert_eq!(reply.jsonrpc, JSONRPC_VERSION);

        let reply = dispatcher.answer(&JsonRpcRequest::new(
            2,
            "workspace/configuration",
            Some(json!({"items": [{"section": "a"}, {"section": "b"}]})),
        ));
        assert_eq!(reply.result, Some(json!([null, null])));

        let reply = dispatcher.answer(&JsonRpcRequest::new(3, "custom/unknown", None));
        assert_eq!(reply.error.unwrap().code, error_codes::METHOD_NOT_FOUND);
        assert_eq!(reply.id, json!(3));
    }

    #[test]
    fn test_registered_handler_overrides_builtin() {
        let dispatcher = Dispatcher::new();
        dispatcher.set_request_handler(
            "workspace/configuration",
            Arc::new(|_: Option<Value>| Ok(json!([{"indent": 4}]))),
        );
        dispatcher.set_request_handler(
            "workspace/applyEdit",
            Arc::new(|_: Option<Value>| -> Result<Value, JsonRpcErrorObject> {
                Err(JsonRpcErrorObject {
                    code: error_codes::REQUEST_CANCELLED,
                    message: "declined".into(),
                    data: None,
                })
            }),
        );

        let reply = dispatcher.answer(&JsonRpcRequest::new(
            "cfg",
            "workspace/configuration",
            Some(json!({"items": [{}]})),
        ));
        assert_eq!(reply.result, Some(json!([{"indent": 4}])));

        let reply = dispatcher.answer(&JsonRpcRequest::new(9, "workspace/applyEdit", None));
        let error = reply.error.unwrap();
        assert_eq!(error.code, error_codes::REQUEST_CANCELLED);
        assert_eq!(error.message, "declined");
    }
}
