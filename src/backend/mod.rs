//! Backend kinds and session launching
//!
//! - **config**: timeouts and client identity for a session
//! - **profile**: launch command, initialize template and settings per backend kind
//! - **launcher**: spawn or attach, handshake, orderly teardown
//! - **content**: source excerpts around reported locations

pub mod config;
pub mod content;
pub mod error;
pub mod launcher;
pub mod profile;

pub use config::{SessionConfig, SessionConfigBuilder};
pub use content::{LineKind, MatchedLines, TextLine};
pub use error::{BackendError, ConfigError};
pub use launcher::BackendSession;
pub use profile::{BUILTIN_BACKENDS, BackendProfile};
