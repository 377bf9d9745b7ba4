//! LSP message framing layer
//!
//! Handles Content-Length framing as specified by the Language Server
//! Protocol base protocol:
//!
//! Content-Length: <length>\r\n\r\n<content>
//!
//! A message is only handed upwards once its full declared body length has
//! arrived; partial reads are accumulated, and several messages arriving in
//! one chunk are split apart.

use crate::io::transport::Transport;
use async_trait::async_trait;
use std::collections::VecDeque;
use tracing::trace;

/// Error types for LSP framing
#[derive(Debug, thiserror::Error)]
pub enum LspFramingError<T: std::error::Error + Send + Sync + 'static> {
    #[error("Transport error: {0}")]
    Transport(T),

    #[error("Invalid LSP message format: {0}")]
    InvalidFormat(String),

    #[error("Invalid content length: {0}")]
    InvalidContentLength(String),

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

impl<T: std::error::Error + Send + Sync + 'static> LspFramingError<T> {
    /// True when the byte stream itself is corrupt rather than closed
    pub fn is_malformed_frame(&self) -> bool {
        !matches!(self, LspFramingError::Transport(_))
    }
}

/// Maximum message size to prevent memory exhaustion
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Header/body separator
const HEADER_SEPARATOR: &[u8] = b"\r\n\r\n";

/// Maximum header block size before we give up looking for the separator
const MAX_HEADER_SIZE: usize = 8 * 1024;

/// Wrap a message body in a Content-Length header
pub fn frame(body: &[u8]) -> Vec<u8> {
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    let mut framed = Vec::with_capacity(header.len() + body.len());
    framed.extend_from_slice(header.as_bytes());
    framed.extend_from_slice(body);
    framed
}

/// LSP message framing wrapper
///
/// Wraps any transport so the layers above exchange whole message bodies
/// while the transport deals in arbitrary chunks.
pub struct LspFraming<T: Transport> {
    /// Underlying transport
    transport: T,

    /// Bytes received but not yet forming a complete message
    receive_buffer: Vec<u8>,

    /// Complete message bodies ready to be returned
    message_queue: VecDeque<Vec<u8>>,
}

impl<T: Transport> LspFraming<T> {
    /// Create a new LSP framing wrapper around a transport
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            receive_buffer: Vec::new(),
            message_queue: VecDeque::new(),
        }
    }

    /// Get a reference to the underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Try to cut one complete message off the front of the receive buffer
    ///
    /// Returns `Ok(None)` if more data is needed.
    fn try_parse_message(&mut self) -> Result<Option<Vec<u8>>, LspFramingError<T::Error>> {
        let Some(header_end) = self
            .receive_buffer
            .windows(HEADER_SEPARATOR.len())
            .position(|window| window == HEADER_SEPARATOR)
        else {
            if self.receive_buffer.len() > MAX_HEADER_SIZE {
                return Err(LspFramingError::InvalidFormat(format!(
                    "no header terminator within {MAX_HEADER_SIZE} bytes"
                )));
            }
            return Ok(None);
        };

        let header = std::str::from_utf8(&self.receive_buffer[..header_end])
            .map_err(|_| LspFramingError::InvalidFormat("header is not valid UTF-8".into()))?;
        let content_length = Self::parse_content_length(header)?;
        let content_start = header_end + HEADER_SEPARATOR.len();

        let available = self.receive_buffer.len() - content_start;
        if available < content_length {
            trace!(
                "LspFraming: Incomplete message - need {} more bytes",
                content_length - available
            );
            return Ok(None);
        }

        let message = self.receive_buffer[content_start..content_start + content_length].to_vec();
        self.receive_buffer.drain(..content_start + content_length);

        trace!(
            "LspFraming: Parsed complete message ({} bytes)",
            content_length
        );
        Ok(Some(message))
    }

    /// Parse Content-Length from the header block; other headers are ignored
    fn parse_content_length(header: &str) -> Result<usize, LspFramingError<T::Error>> {
        for line in header.split("\r\n") {
            let Some((name, value)) = line.split_once(':') else {
                return Err(LspFramingError::InvalidFormat(format!(
                    "malformed header line: {line:?}"
                )));
            };
            if !name.trim().eq_ignore_ascii_case("Content-Length") {
                continue;
            }

            let value = value.trim();
            let length = value
                .parse::<usize>()
                .map_err(|_| LspFramingError::InvalidContentLength(value.to_string()))?;

            if length > MAX_MESSAGE_SIZE {
                return Err(LspFramingError::MessageTooLarge {
                    size: length,
                    max: MAX_MESSAGE_SIZE,
                });
            }

            return Ok(length);
        }

        Err(LspFramingError::InvalidFormat(
            "Missing Content-Length header".to_string(),
        ))
    }

    /// Read one chunk from the transport and queue every complete message
    async fn process_transport_data(&mut self) -> Result<(), LspFramingError<T::Error>> {
        let new_data = self
            .transport
            .receive()
            .await
            .map_err(LspFramingError::Transport)?;

        self.receive_buffer.extend_from_slice(&new_data);

        while let Some(message) = self.try_parse_message()? {
            self.message_queue.push_back(message);
        }

        Ok(())
    }
}

#[async_trait]
impl<T: Transport> Transport for LspFraming<T> {
    type Error = LspFramingError<T::Error>;

    async fn send(&mut self, body: &[u8]) -> Result<(), Self::Error> {
        trace!("LspFraming: Sending framed message ({} bytes content)", body.len());

        self.transport
            .send(&frame(body))
            .await
            .map_err(LspFramingError::Transport)
    }

    /// Cancel safe as long as the inner transport's `receive` is
    async fn receive(&mut self) -> Result<Vec<u8>, Self::Error> {
        loop {
            if let Some(message) = self.message_queue.pop_front() {
                return Ok(message);
            }
            self.process_transport_data().await?;
        }
    }

    async fn close(&mut self) -> Result<(), Self::Error> {
        self.transport
            .close()
            .await
            .map_err(LspFramingError::Transport)
    }

    fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::transport::{MockTransport, MockTransportError};

    fn framed(body: &str) -> Vec<u8> {
        format!("Content-Length: {}\r\n\r\n{}", body.len(), body).into_bytes()
    }

    #[tokio::test]
    async fn test_lsp_framing_send() {
        let (transport, backend) = MockTransport::pair();
        let mut framing = LspFraming::new(transport);

        let message = r#"{"jsonrpc":"2.0","id":1,"method":"initialize"}"#;
        framing.send(message.as_bytes()).await.unwrap();

        let sent = framing.transport().sent_chunks();
        assert_eq!(sent, vec![framed(message)]);
        assert_eq!(backend.bytes_sent(), framed(message).len());
    }

    #[tokio::test]
    async fn test_lsp_framing_receive() {
        let message = r#"{"jsonrpc":"2.0","id":1,"result":{}}"#;
        let mut framing = LspFraming::new(MockTransport::with_chunks(vec![framed(message)]));

        assert_eq!(framing.receive().await.unwrap(), message.as_bytes());
    }

    #[tokio::test]
    async fn test_lsp_framing_partial_message() {
        let message = r#"{"jsonrpc":"2.0","id":1,"result":{}}"#;
        let all = framed(message);
        // Split inside the header and again inside the body
        let chunks = vec![all[..7].to_vec(), all[7..30].to_vec(), all[30..].to_vec()];
        let mut framing = LspFraming::new(MockTransport::with_chunks(chunks));

        assert_eq!(framing.receive().await.unwrap(), message.as_bytes());
    }

    #[tokio::test]
    async fn test_lsp_framing_incomplete_body_is_not_delivered() {
        let message = r#"{"jsonrpc":"2.0","id":1,"result":{}}"#;
        let all = framed(message);
        let mut framing =
            LspFraming::new(MockTransport::with_chunks(vec![all[..all.len() - 1].to_vec()]));

        match framing.receive().await {
            Err(LspFramingError::Transport(MockTransportError::Disconnected)) => {}
            other => panic!("expected disconnect before a full body, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_lsp_framing_multiple_messages() {
        let message1 = r#"{"jsonrpc":"2.0","id":1,"method":"initialize"}"#;
        let message2 = r#"{"jsonrpc":"2.0","id":2,"method":"shutdown"}"#;
        let mut combined = framed(message1);
        combined.extend(framed(message2));

        let mut framing = LspFraming::new(MockTransport::with_chunks(vec![combined]));

        assert_eq!(framing.receive().await.unwrap(), message1.as_bytes());
        assert_eq!(framing.receive().await.unwrap(), message2.as_bytes());
    }

    #[tokio::test]
    async fn test_lsp_framing_multibyte_body() {
        let message = r#"{"jsonrpc":"2.0","method":"window/logMessage","params":{"message":"世界 🌍"}}"#;
        let all = framed(message);
        // Split in the middle of a multi-byte character
        let split = all.len() - 8;
        let mut framing = LspFraming::new(MockTransport::with_chunks(vec![
            all[..split].to_vec(),
            all[split..].to_vec(),
        ]));

        assert_eq!(framing.receive().await.unwrap(), message.as_bytes());
    }

    #[tokio::test]
    async fn test_lsp_framing_extra_headers_are_ignored() {
        let message = r#"{"jsonrpc":"2.0","id":1,"result":null}"#;
        let raw = format!(
            "Content-Type: application/vscode-jsonrpc; charset=utf-8\r\ncontent-length: {}\r\n\r\n{}",
            message.len(),
            message
        );
        let mut framing = LspFraming::new(MockTransport::with_chunks(vec![raw.into_bytes()]));

        assert_eq!(framing.receive().await.unwrap(), message.as_bytes());
    }

    #[tokio::test]
    async fn test_lsp_framing_invalid_content_length() {
        let invalid = b"Content-Length: invalid\r\n\r\n{}".to_vec();
        let mut framing = LspFraming::new(MockTransport::with_chunks(vec![invalid]));

        match framing.receive().await {
            Err(err @ LspFramingError::InvalidContentLength(_)) => {
                assert!(err.is_malformed_frame())
            }
            other => panic!("Expected InvalidContentLength error, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_lsp_framing_message_too_large() {
        let large_size = MAX_MESSAGE_SIZE + 1;
        let invalid = format!("Content-Length: {large_size}\r\n\r\n").into_bytes();
        let mut framing = LspFraming::new(MockTransport::with_chunks(vec![invalid]));

        match framing.receive().await {
            Err(LspFramingError::MessageTooLarge { size, max }) => {
                assert_eq!(size, large_size);
                assert_eq!(max, MAX_MESSAGE_SIZE);
            }
            other => panic!("Expected MessageTooLarge error, got: {other:?}"),
        }
    }
}
