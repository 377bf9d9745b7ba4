//! Generic Language Server Protocol client
//!
//! One [`lsp::Session`] type talks to any backend. Backend differences live
//! entirely in data: an initialize template resolved per session
//! ([`template`]) and a launch profile ([`backend`]).

pub mod backend;
pub mod io;
pub mod logging;
pub mod lsp;
pub mod template;

#[cfg(test)]
mod test_utils;
