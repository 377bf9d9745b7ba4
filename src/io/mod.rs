//! I/O layer - Generic abstractions for process management and transport
//!
//! - **Transport**: byte channel to a backend (child stdio, TCP socket, or in-memory mock)
//! - **Process**: backend process lifecycle with stderr draining
//!
//! Nothing here knows about LSP framing or JSON-RPC.

pub mod process;
pub mod transport;

pub use process::{ChildProcessManager, ProcessError, ProcessManager, ProcessState, StopMode};
pub use transport::{
    MockBackend, MockTransport, StdioTransport, StreamTransport, StreamTransportError, Transport,
};
