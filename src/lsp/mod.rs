pub mod capabilities;
pub mod client;
pub(crate) mod connection;
pub mod dispatcher;
pub mod documents;
pub mod error;
pub mod framing;
pub mod handshake;
pub mod jsonrpc_utils;
pub mod protocol;
pub mod session;

pub use capabilities::{CapabilityRegistry, CapabilitySet, capability_for_method};
pub use client::LspClient;
pub use documents::DocumentStore;
pub use error::{ErrorKind, SessionError};
pub use framing::{LspFraming, LspFramingError};
pub use handshake::SessionState;
pub use protocol::{JsonRpcErrorObject, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, Message};
pub use session::Session;
