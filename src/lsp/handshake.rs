//! Session lifecycle and the initialize handshake
//!
//! ```text
//! Uninitialized -> AwaitingCapabilities -> Ready -> ShuttingDown -> Closed
//!        \________________\___________________\_________\______> Failed
//! ```
//!
//! `Closed` and `Failed` are terminal; a session that reaches either cannot
//! be reused.

use serde_json::{Value, json};
use std::fmt;
use std::sync::{Mutex, PoisonError};
use tracing::{Level, debug, error, info};

use crate::log_timing;
use crate::lsp::capabilities::CapabilityRegistry;
use crate::lsp::error::SessionError;
use crate::lsp::session::SessionCore;
use crate::template::ResolvedParameters;

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Uninitialized,
    AwaitingCapabilities,
    Ready,
    ShuttingDown,
    Closed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }

    /// The handshake window, during which decode errors are fatal
    pub fn is_negotiating(self) -> bool {
        matches!(
            self,
            SessionState::Uninitialized | SessionState::AwaitingCapabilities
        )
    }

    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Uninitialized, AwaitingCapabilities)
            | (AwaitingCapabilities, Ready)
            | (Ready, ShuttingDown)
            | (ShuttingDown, Closed) => true,
            // Closing a session that never started needs no shutdown exchange
            (Uninitialized, Closed) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Uninitialized => "Uninitialized",
            SessionState::AwaitingCapabilities => "AwaitingCapabilities",
            SessionState::Ready => "Ready",
            SessionState::ShuttingDown => "ShuttingDown",
            SessionState::Closed => "Closed",
            SessionState::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// Shared, thread-safe holder of the current [`SessionState`]
#[derive(Debug)]
pub struct Lifecycle {
    state: Mutex<SessionState>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SessionState::Uninitialized),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move from `from` to `to`, failing if the session is elsewhere
    pub fn transition(&self, from: SessionState, to: SessionState) -> Result<(), SessionError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != from || !from.can_transition_to(to) {
            if state.is_terminal() {
                return Err(SessionError::SessionDead);
            }
            return Err(SessionError::InvalidState {
                current: *state,
                expected: from,
            });
        }
        *state = to;
        drop(state);

        info!("Session state: {} -> {}", from, to);
        Ok(())
    }

    /// Move to `Failed` unless already terminal; returns whether it moved
    pub fn fail(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.is_terminal() {
            return false;
        }
        let previous = *state;
        *state = SessionState::Failed;
        drop(state);

        error!("Session state: {} -> Failed", previous);
        true
    }

    /// Settle the state once the connection is gone
    ///
    /// An orderly end (`ShuttingDown`, or a session that never started)
    /// becomes `Closed`; anything else that is not yet terminal is a failure.
    pub fn settle(&self) -> SessionState {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = *state;
        let next = match previous {
            SessionState::ShuttingDown | SessionState::Uninitialized => SessionState::Closed,
            terminal if terminal.is_terminal() => terminal,
            _ => SessionState::Failed,
        };
        *state = next;
        drop(state);

        if previous != next {
            info!("Session state: {} -> {}", previous, next);
        }
        next
    }

    /// Gate for client-originated traffic
    pub fn require_ready(&self) -> Result<(), SessionError> {
        match self.state() {
            SessionState::Ready => Ok(()),
            SessionState::Uninitialized | SessionState::AwaitingCapabilities => {
                Err(SessionError::NotNegotiatedYet)
            }
            SessionState::ShuttingDown | SessionState::Closed | SessionState::Failed => {
                Err(SessionError::SessionDead)
            }
        }
    }
}

/// Drives the initialize / initialized exchange for one session
pub(crate) struct HandshakeCoordinator<'a> {
    core: &'a SessionCore,
}

impl<'a> HandshakeCoordinator<'a> {
    pub(crate) fn new(core: &'a SessionCore) -> Self {
        Self { core }
    }

    /// Run the handshake; any failure leaves the session `Failed`
    pub(crate) async fn run(
        self,
        params: ResolvedParameters,
    ) -> Result<(&'a CapabilityRegistry, Value), SessionError> {
        let lifecycle = &self.core.lifecycle;
        match lifecycle.state() {
            SessionState::Uninitialized => {}
            state if state.is_terminal() => return Err(SessionError::SessionDead),
            current => {
                return Err(SessionError::InvalidState {
                    current,
                    expected: SessionState::Uninitialized,
                });
            }
        }

        let started = std::time::Instant::now();
        match self.negotiate(params).await {
            Ok(outcome) => {
                log_timing!(Level::INFO, "initialize handshake", started.elapsed());
                Ok(outcome)
            }
            Err(err) => {
                error!("Handshake failed: {}", err);
                self.core.abort();
                Err(err)
            }
        }
    }

    async fn negotiate(
        &self,
        params: ResolvedParameters,
    ) -> Result<(&'a CapabilityRegistry, Value), SessionError> {
        let core = self.core;
        let client_capabilities = params.capabilities().clone();

        core.lifecycle.transition(
            SessionState::Uninitialized,
            SessionState::AwaitingCapabilities,
        )?;

        let mut params = params.into_value();
        if let Value::Object(map) = &mut params
            && !map.contains_key("clientInfo")
        {
            map.insert(
                "clientInfo".to_string(),
                json!({
                    "name": core.config.client_name,
                    "version": core.config.client_version,
                }),
            );
        }

        let result = core
            .round_trip(
                "initialize",
                Some(params),
                core.config.initialization_timeout,
            )
            .await?;

        let server_capabilities = result
            .get("capabilities")
            .filter(|capabilities| capabilities.is_object())
            .ok_or_else(|| {
                SessionError::ProtocolViolation(
                    "initialize response has no capabilities object".to_string(),
                )
            })?;

        for required in &core.config.required_capabilities {
            let declared = server_capabilities
                .get(required)
                .is_some_and(|value| !value.is_null() && *value != Value::Bool(false));
            if !declared {
                return Err(SessionError::ProtocolViolation(format!(
                    "backend does not advertise required capability '{required}'"
                )));
            }
        }

        let registry = CapabilityRegistry::negotiate(&client_capabilities, server_capabilities);
        debug!("Negotiated capabilities: {:?}", registry.negotiated());

        // Only reachable once per session thanks to the Uninitialized check
        let registry = core.registry.get_or_init(|| registry);

        core.send_initialized().await?;
        core.lifecycle
            .transition(SessionState::AwaitingCapabilities, SessionState::Ready)?;

        Ok((registry, result))
    }
}
