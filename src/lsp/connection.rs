//! The connection task
//!
//! A single task owns the framed transport. It writes queued outbound
//! messages one at a time and decodes everything the backend sends,
//! handing responses and notifications to the dispatcher and answering
//! backend-initiated requests directly. Replies produced before
//! `initialized` is written are held back and flushed right after it.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{Level, debug, error, info, trace, warn};

use crate::io::transport::Transport;
use crate::log_lsp_message;
use crate::lsp::error::SessionError;
use crate::lsp::framing::{LspFraming, LspFramingError};
use crate::lsp::protocol::{Message, decode, encode};
use crate::lsp::session::SessionCore;

/// Why the connection task stopped
#[derive(Debug)]
enum Exit {
    /// Asked to stop by the session
    Cancelled,
    /// The backend closed the channel
    Disconnected(String),
    /// Unrecoverable protocol or transport error
    Fatal(SessionError),
}

/// An encoded message queued for the connection task
pub(crate) enum Outbound {
    Message(Vec<u8>),
    /// The `initialized` notification; `written` fires once it and the
    /// held replies are on the wire
    Initialized {
        body: Vec<u8>,
        written: oneshot::Sender<()>,
    },
}

/// Replies to backend requests that are waiting for `initialized`
///
/// `None` once `initialized` has been written.
type HeldReplies = Option<Vec<Vec<u8>>>;

/// Spawn the connection task for a session
pub(crate) fn spawn<T>(
    transport: T,
    core: Arc<SessionCore>,
    outbound: mpsc::UnboundedReceiver<Outbound>,
) -> JoinHandle<()>
where
    T: Transport + 'static,
{
    tokio::spawn(run(LspFraming::new(transport), core, outbound))
}

async fn run<T: Transport>(
    mut framing: LspFraming<T>,
    core: Arc<SessionCore>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    // Wake waiters on `closed` even if this task unwinds
    let _closed = core.closed.clone().drop_guard();
    let mut held: HeldReplies = Some(Vec::new());

    let exit = loop {
        tokio::select! {
            biased;

            Some(message) = outbound.recv() => {
                if let Err(exit) = write_outbound(&mut framing, message, &mut held).await {
                    break exit;
                }
            }

            _ = core.shutdown.cancelled() => break Exit::Cancelled,

            received = framing.receive() => match received {
                Ok(body) => {
                    if let Err(exit) = handle_inbound(&core, &mut framing, &mut held, &body).await {
                        break exit;
                    }
                }
                Err(e) => break classify_receive_error(e),
            },
        }
    };

    let _ = framing.close().await;

    let final_state = core.lifecycle.settle();
    match &exit {
        Exit::Cancelled => debug!("Connection closed by session ({})", final_state),
        Exit::Disconnected(reason) => info!("Backend disconnected: {} ({})", reason, final_state),
        Exit::Fatal(err) => error!("Connection failed: {} ({})", err, final_state),
    }

    match exit {
        Exit::Fatal(SessionError::ProtocolViolation(reason)) => core
            .dispatcher
            .cancel_all(|| SessionError::ProtocolViolation(reason.clone())),
        _ => core.dispatcher.cancel_all(|| SessionError::SessionDead),
    }
}

fn classify_receive_error<E>(err: LspFramingError<E>) -> Exit
where
    E: std::error::Error + Send + Sync + 'static,
{
    if err.is_malformed_frame() {
        Exit::Fatal(SessionError::ProtocolViolation(err.to_string()))
    } else {
        Exit::Disconnected(err.to_string())
    }
}

async fn write<T: Transport>(framing: &mut LspFraming<T>, body: &[u8]) -> Result<(), Exit> {
    trace!("Connection: writing {} byte message", body.len());
    framing
        .send(body)
        .await
        .map_err(|e| Exit::Fatal(SessionError::Transport(e.to_string())))
}

async fn write_outbound<T: Transport>(
    framing: &mut LspFraming<T>,
    message: Outbound,
    held: &mut HeldReplies,
) -> Result<(), Exit> {
    match message {
        Outbound::Message(body) => write(framing, &body).await,
        Outbound::Initialized { body, written } => {
            write(framing, &body).await?;
            let replies = held.take().unwrap_or_default();
            if !replies.is_empty() {
                debug!("Flushing {} replies held during the handshake", replies.len());
            }
            for reply in replies {
                write(framing, &reply).await?;
            }
            // The handshake may have given up waiting
            let _ = written.send(());
            Ok(())
        }
    }
}

async fn handle_inbound<T: Transport>(
    core: &SessionCore,
    framing: &mut LspFraming<T>,
    held: &mut HeldReplies,
    body: &[u8],
) -> Result<(), Exit> {
    let message = match decode(body) {
        Ok(message) => message,
        Err(err) if core.lifecycle.state().is_negotiating() => {
            return Err(Exit::Fatal(err));
        }
        Err(err) => {
            warn!("Ignoring undecodable message: {}", err);
            return Ok(());
        }
    };

    match message {
        Message::Response(response) => core.dispatcher.complete(response),
        Message::Notification(notification) => core.dispatcher.notify_observers(&notification),
        Message::Request(request) => {
            let reply = core.dispatcher.answer(&request);
            log_lsp_message!(Level::DEBUG, "outbound", request.method.as_str(), &reply);
            let bytes = encode(&reply.into()).map_err(Exit::Fatal)?;
            match held {
                Some(replies) => {
                    trace!("Holding reply to {} until initialized", request.method);
                    replies.push(bytes);
                }
                None => write(framing, &bytes).await?,
            }
        }
    }
    Ok(())
}
