//! Session: the public surface of one client-to-backend connection
//!
//! A [`Session`] owns its transport through the connection task. Callers
//! perform the handshake with [`Session::initialize`], then issue requests
//! and notifications, register observers, and finally shut down.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{Level, debug, info, warn};

use crate::backend::SessionConfig;
use crate::io::transport::Transport;
use crate::log_lsp_message;
use crate::lsp::capabilities::{CapabilityRegistry, capability_for_method};
use crate::lsp::connection::{self, Outbound};
use crate::lsp::dispatcher::Dispatcher;
use crate::lsp::error::SessionError;
use crate::lsp::handshake::{HandshakeCoordinator, Lifecycle, SessionState};
use crate::lsp::protocol::{
    JsonRpcErrorObject, JsonRpcNotification, JsonRpcRequest, Message, encode,
};
use crate::template::ResolvedParameters;

/// State shared between a [`Session`] and its connection task
pub(crate) struct SessionCore {
    pub(crate) lifecycle: Lifecycle,
    pub(crate) dispatcher: Dispatcher,
    /// Written once by the handshake, read without locking afterwards
    pub(crate) registry: OnceLock<CapabilityRegistry>,
    pub(crate) config: SessionConfig,
    /// Asks the connection task to stop
    pub(crate) shutdown: CancellationToken,
    /// Cancelled by the connection task when it has stopped
    pub(crate) closed: CancellationToken,
    outbound: mpsc::UnboundedSender<Outbound>,
}

/// Removes a pending entry when the waiting caller goes away
struct PendingGuard<'a> {
    dispatcher: &'a Dispatcher,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.dispatcher.forget(self.id);
    }
}

impl SessionCore {
    fn enqueue(&self, message: &Message) -> Result<(), SessionError> {
        let bytes = encode(message)?;
        self.outbound
            .send(Outbound::Message(bytes))
            .map_err(|_| SessionError::SessionDead)
    }

    /// Send `initialized` and wait until it is on the wire
    ///
    /// Replies to backend requests that arrived during the handshake are
    /// written right after it.
    pub(crate) async fn send_initialized(&self) -> Result<(), SessionError> {
        let params = Some(json!({}));
        log_lsp_message!(Level::DEBUG, "outbound", "initialized", &params);
        let body = encode(&JsonRpcNotification::new("initialized", params).into())?;

        let (written, done) = oneshot::channel();
        self.outbound
            .send(Outbound::Initialized { body, written })
            .map_err(|_| SessionError::SessionDead)?;

        let timeout = self.config.initialization_timeout;
        match tokio::time::timeout(timeout, done).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(SessionError::SessionDead),
            Err(_) => Err(SessionError::Timeout {
                method: "initialized".to_string(),
                timeout,
            }),
        }
    }

    /// Queue a notification without any lifecycle check
    pub(crate) fn send_notification(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<(), SessionError> {
        log_lsp_message!(Level::DEBUG, "outbound", method, &params);
        self.enqueue(&JsonRpcNotification::new(method, params).into())
    }

    /// Send a request and wait for its response, without any lifecycle check
    pub(crate) async fn round_trip(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, SessionError> {
        let (id, mut slot) = self.dispatcher.register(method);
        let _guard = PendingGuard {
            dispatcher: &self.dispatcher,
            id,
        };

        log_lsp_message!(Level::DEBUG, "outbound", method, &params);
        self.enqueue(&JsonRpcRequest::new(id, method, params).into())?;

        tokio::select! {
            biased;

            outcome = tokio::time::timeout(timeout, &mut slot) => match outcome {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => Err(SessionError::SessionDead),
                Err(_) => {
                    warn!("Request {} ({}) timed out after {:?}", id, method, timeout);
                    Err(SessionError::Timeout {
                        method: method.to_string(),
                        timeout,
                    })
                }
            },

            // Pending requests are failed before `closed` fires; anything
            // registered after that would otherwise wait for its timeout
            _ = self.closed.cancelled() => slot.try_recv().unwrap_or(Err(SessionError::SessionDead)),
        }
    }

    /// Tear the session down after an unrecoverable error
    pub(crate) fn abort(&self) {
        self.lifecycle.fail();
        self.dispatcher.cancel_all(|| SessionError::SessionDead);
        self.shutdown.cancel();
    }
}

/// One protocol session with a backend
pub struct Session {
    core: Arc<SessionCore>,
}

impl Session {
    /// Create a session over a transport and start its connection task
    ///
    /// Must be called from within a tokio runtime. Nothing is sent until
    /// [`Session::initialize`].
    pub fn new<T>(transport: T, config: SessionConfig) -> Self
    where
        T: Transport + 'static,
    {
        let (outbound_sender, outbound_receiver) = mpsc::unbounded_channel();
        let core = Arc::new(SessionCore {
            lifecycle: Lifecycle::new(),
            dispatcher: Dispatcher::new(),
            registry: OnceLock::new(),
            config,
            shutdown: CancellationToken::new(),
            closed: CancellationToken::new(),
            outbound: outbound_sender,
        });

        connection::spawn(transport, Arc::clone(&core), outbound_receiver);

        Self { core }
    }

    /// Perform the initialize handshake
    ///
    /// Returns the backend's full `InitializeResult`. On any failure the
    /// session is `Failed` and must be discarded.
    pub async fn initialize(&self, params: ResolvedParameters) -> Result<Value, SessionError> {
        let (registry, result) = HandshakeCoordinator::new(&self.core).run(params).await?;
        info!(
            "Session ready with {} negotiated capabilities",
            registry.negotiated().len()
        );
        Ok(result)
    }

    pub fn state(&self) -> SessionState {
        self.core.lifecycle.state()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.core.config
    }

    /// Fail unless the handshake has completed and shutdown has not begun
    pub fn ensure_ready(&self) -> Result<(), SessionError> {
        self.core.lifecycle.require_ready()
    }

    /// The negotiated capabilities; unavailable until the handshake completes
    pub fn capabilities(&self) -> Result<&CapabilityRegistry, SessionError> {
        if self.state().is_negotiating() {
            return Err(SessionError::NotNegotiatedYet);
        }
        self.core.registry.get().ok_or(SessionError::SessionDead)
    }

    pub fn supports(&self, capability: &str) -> Result<bool, SessionError> {
        Ok(self.capabilities()?.supports(capability))
    }

    pub fn descriptor(&self, capability: &str) -> Result<Option<&Value>, SessionError> {
        Ok(self.capabilities()?.descriptor(capability))
    }

    /// Send a request with the configured request timeout
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, SessionError> {
        self.call_with_timeout(method, params, self.core.config.request_timeout)
            .await
    }

    /// Send a request and wait at most `timeout` for its response
    ///
    /// Fails without sending anything when the session is not ready or the
    /// method's capability was not negotiated.
    pub async fn call_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, SessionError> {
        self.check_outbound(method)?;
        self.core.round_trip(method, params, timeout).await
    }

    /// Send a notification
    pub fn notify(&self, method: &str, params: Option<Value>) -> Result<(), SessionError> {
        self.core.lifecycle.require_ready()?;
        self.core.send_notification(method, params)
    }

    /// Send a typed request
    pub async fn request<R>(&self, params: R::Params) -> Result<R::Result, SessionError>
    where
        R: lsp_types::request::Request,
        R::Params: Serialize,
        R::Result: DeserializeOwned,
    {
        let result = self.call(R::METHOD, to_params(&params)?).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Send a typed notification
    pub fn notification<N>(&self, params: N::Params) -> Result<(), SessionError>
    where
        N: lsp_types::notification::Notification,
        N::Params: Serialize,
    {
        self.notify(N::METHOD, to_params(&params)?)
    }

    /// Register an observer for an inbound notification method
    ///
    /// Observers may be registered at any time, including before the
    /// handshake, and run on the connection task in registration order.
    pub fn on_notification<F>(&self, method: &str, observer: F)
    where
        F: Fn(&JsonRpcNotification) + Send + Sync + 'static,
    {
        debug!("Registering observer for {}", method);
        self.core.dispatcher.add_observer(method, Arc::new(observer));
    }

    /// Answer a backend-initiated request method
    pub fn on_request<F>(&self, method: &str, handler: F)
    where
        F: Fn(Option<Value>) -> Result<Value, JsonRpcErrorObject> + Send + Sync + 'static,
    {
        debug!("Registering request handler for {}", method);
        self.core
            .dispatcher
            .set_request_handler(method, Arc::new(handler));
    }

    /// Number of requests still waiting for a response
    pub fn pending_requests(&self) -> usize {
        self.core.dispatcher.pending_count()
    }

    /// Orderly shutdown: `shutdown` request, `exit` notification, wait for close
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        let lifecycle = &self.core.lifecycle;
        match lifecycle.state() {
            SessionState::Ready => {
                lifecycle.transition(SessionState::Ready, SessionState::ShuttingDown)?
            }
            SessionState::Uninitialized => {
                lifecycle.transition(SessionState::Uninitialized, SessionState::Closed)?;
                self.stop_connection().await;
                return Ok(());
            }
            SessionState::Closed => return Ok(()),
            SessionState::Failed | SessionState::ShuttingDown => {
                return Err(SessionError::SessionDead);
            }
            current @ SessionState::AwaitingCapabilities => {
                return Err(SessionError::InvalidState {
                    current,
                    expected: SessionState::Ready,
                });
            }
        }

        let shutdown_timeout = self.core.config.shutdown_timeout;
        if let Err(err) = self
            .core
            .round_trip("shutdown", None, shutdown_timeout)
            .await
        {
            warn!("Shutdown request failed: {}", err);
        }
        if let Err(err) = self.core.send_notification("exit", None) {
            debug!("Could not send exit notification: {}", err);
        }

        if tokio::time::timeout(shutdown_timeout, self.core.closed.cancelled())
            .await
            .is_err()
        {
            info!(
                "Backend did not close the connection within {:?}, forcing close",
                shutdown_timeout
            );
        }
        self.stop_connection().await;

        match self.state() {
            SessionState::Closed => Ok(()),
            _ => Err(SessionError::SessionDead),
        }
    }

    /// Close the connection immediately, without the shutdown exchange
    pub async fn close(&self) {
        if let Err(err) = self
            .core
            .lifecycle
            .transition(SessionState::Ready, SessionState::ShuttingDown)
        {
            debug!("Closing outside Ready: {}", err);
        }
        self.stop_connection().await;
    }

    /// Wait until the connection task has stopped
    pub async fn closed(&self) {
        self.core.closed.cancelled().await;
    }

    async fn stop_connection(&self) {
        self.core.shutdown.cancel();
        self.core.closed.cancelled().await;
    }

    fn check_outbound(&self, method: &str) -> Result<(), SessionError> {
        self.core.lifecycle.require_ready()?;

        let Some(capability) = capability_for_method(method) else {
            return Ok(());
        };
        let registry = self
            .core
            .registry
            .get()
            .ok_or(SessionError::NotNegotiatedYet)?;
        if registry.supports(capability) {
            Ok(())
        } else {
            debug!("Refusing {}: capability {} not negotiated", method, capability);
            Err(SessionError::UnsupportedOperation {
                method: method.to_string(),
                capability: capability.to_string(),
            })
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.core.shutdown.cancel();
    }
}

fn to_params<P: Serialize>(params: &P) -> Result<Option<Value>, SessionError> {
    match serde_json::to_value(params)? {
        Value::Null => Ok(None),
        value => Ok(Some(value)),
    }
}
