//! Transport layer - Pure I/O abstraction for message exchange
//!
//! This module provides the core transport abstraction that moves raw byte
//! chunks between the client and a backend, without knowledge of message
//! framing or process management. Framing lives in `crate::lsp::framing`.

use async_trait::async_trait;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::process::{ChildStdin, ChildStdout};
use tokio::sync::{Notify, mpsc};
use tracing::{debug, error, trace};

use crate::lsp::framing::frame;

// ============================================================================
// Constants
// ============================================================================

/// Size of the read buffer for stream reading operations
const READ_BUFFER_SIZE: usize = 8192;

/// How long `MockBackend::next_message` waits before giving up
const MOCK_RECEIVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Core transport trait for bidirectional byte exchange
#[async_trait]
pub trait Transport: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Send a chunk of bytes
    async fn send(&mut self, bytes: &[u8]) -> Result<(), Self::Error>;

    /// Receive the next chunk of bytes; chunk boundaries carry no meaning
    async fn receive(&mut self) -> Result<Vec<u8>, Self::Error>;

    /// Close the transport
    async fn close(&mut self) -> Result<(), Self::Error>;

    /// Check if transport is still active
    fn is_connected(&self) -> bool;
}

// ============================================================================
// Stream Transport Implementation
// ============================================================================

/// Error types for stream transports
#[derive(Debug, thiserror::Error)]
pub enum StreamTransportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Transport is disconnected")]
    Disconnected,

    #[error("Channel error: {0}")]
    Channel(String),
}

/// Transport over any async reader/writer pair
///
/// Used for a spawned backend's stdout/stdin as well as for a TCP socket
/// attached to an already running backend. Writes go through a single
/// writer task, so chunks are never interleaved on the wire.
#[derive(Debug)]
pub struct StreamTransport {
    /// Channel feeding the writer task
    writer_sender: Option<mpsc::UnboundedSender<Vec<u8>>>,

    /// Channel fed by the reader task
    reader_receiver: Option<mpsc::UnboundedReceiver<Vec<u8>>>,

    /// Connection status
    connected: bool,
}

/// Transport for a child process talking over stdio
pub type StdioTransport = StreamTransport;

impl StreamTransport {
    /// Create a transport from an arbitrary reader/writer pair
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (writer_sender, writer_receiver) = mpsc::unbounded_channel();
        let (reader_sender, reader_receiver) = mpsc::unbounded_channel();

        tokio::spawn(Self::writer_task(writer, writer_receiver));
        tokio::spawn(Self::reader_task(reader, reader_sender));

        Self {
            writer_sender: Some(writer_sender),
            reader_receiver: Some(reader_receiver),
            connected: true,
        }
    }

    /// Create a transport from child process streams
    pub fn from_child(stdin: ChildStdin, stdout: ChildStdout) -> Self {
        Self::new(stdout, stdin)
    }

    /// Attach to a backend listening on a TCP socket
    pub async fn connect_tcp<A: ToSocketAddrs>(addr: A) -> Result<Self, StreamTransportError> {
        let stream = TcpStream::connect(addr).await?;
        if let Ok(peer) = stream.peer_addr() {
            debug!("StreamTransport: connected to {}", peer);
        }
        let (reader, writer) = stream.into_split();
        Ok(Self::new(reader, writer))
    }

    /// Background task that writes chunks to the stream
    async fn writer_task<W>(mut writer: W, mut receiver: mpsc::UnboundedReceiver<Vec<u8>>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        while let Some(chunk) = receiver.recv().await {
            trace!("StreamTransport: writing {} bytes", chunk.len());

            if let Err(e) = writer.write_all(&chunk).await {
                error!("Failed to write to backend: {}", e);
                break;
            }

            if let Err(e) = writer.flush().await {
                error!("Failed to flush backend stream: {}", e);
                break;
            }
        }

        let _ = writer.shutdown().await;
        trace!("StreamTransport: writer task finished");
    }

    /// Background task that reads raw chunks from the stream
    async fn reader_task<R>(mut reader: R, sender: mpsc::UnboundedSender<Vec<u8>>)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let mut read_buffer = vec![0u8; READ_BUFFER_SIZE];

        loop {
            match reader.read(&mut read_buffer).await {
                Ok(0) => {
                    trace!("StreamTransport: reader reached EOF");
                    break;
                }
                Ok(n) => {
                    if sender.send(read_buffer[..n].to_vec()).is_err() {
                        trace!("StreamTransport: receiver dropped, stopping reader");
                        break;
                    }
                }
                Err(e) => {
                    error!("Failed to read from backend: {}", e);
                    break;
                }
            }
        }

        trace!("StreamTransport: reader task finished");
    }
}

#[async_trait]
impl Transport for StreamTransport {
    type Error = StreamTransportError;

    async fn send(&mut self, bytes: &[u8]) -> Result<(), Self::Error> {
        if !self.connected {
            return Err(StreamTransportError::Disconnected);
        }

        let sender = self
            .writer_sender
            .as_ref()
            .ok_or(StreamTransportError::Disconnected)?;

        sender
            .send(bytes.to_vec())
            .map_err(|e| StreamTransportError::Channel(e.to_string()))
    }

    async fn receive(&mut self) -> Result<Vec<u8>, Self::Error> {
        if !self.connected {
            return Err(StreamTransportError::Disconnected);
        }

        let receiver = self
            .reader_receiver
            .as_mut()
            .ok_or(StreamTransportError::Disconnected)?;

        receiver
            .recv()
            .await
            .ok_or(StreamTransportError::Disconnected)
    }

    async fn close(&mut self) -> Result<(), Self::Error> {
        self.connected = false;
        self.writer_sender.take();
        self.reader_receiver.take();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

// ============================================================================
// Mock Transport Implementation
// ============================================================================

/// Error type for mock transport
#[derive(Debug, thiserror::Error)]
pub enum MockTransportError {
    #[error("Transport is disconnected")]
    Disconnected,
}

/// In-memory transport for tests
///
/// The client side of a scripted conversation; the other side is driven
/// through the [`MockBackend`] handle returned by [`MockTransport::pair`].
pub struct MockTransport {
    /// Chunks pushed by the backend handle
    inbound: mpsc::UnboundedReceiver<Vec<u8>>,

    /// Every chunk written by the client
    sent: Arc<Mutex<Vec<Vec<u8>>>>,

    /// Wakes the backend handle when the client writes
    sent_notify: Arc<Notify>,

    /// Connection status
    connected: bool,
}

/// Backend side of a [`MockTransport`]
pub struct MockBackend {
    inbound: Option<mpsc::UnboundedSender<Vec<u8>>>,
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
    sent_notify: Arc<Notify>,
    cursor: usize,
}

impl MockTransport {
    /// Create a connected transport/backend pair
    pub fn pair() -> (Self, MockBackend) {
        let (inbound_sender, inbound_receiver) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sent_notify = Arc::new(Notify::new());

        let transport = Self {
            inbound: inbound_receiver,
            sent: Arc::clone(&sent),
            sent_notify: Arc::clone(&sent_notify),
            connected: true,
        };
        let backend = MockBackend {
            inbound: Some(inbound_sender),
            sent,
            sent_notify,
            cursor: 0,
        };
        (transport, backend)
    }

    /// Create a transport that yields the given chunks and then reports closure
    pub fn with_chunks(chunks: Vec<Vec<u8>>) -> Self {
        let (transport, mut backend) = Self::pair();
        for chunk in chunks {
            backend.push_raw(chunk);
        }
        backend.close();
        transport
    }

    /// Get all chunks written by the client
    pub fn sent_chunks(&self) -> Vec<Vec<u8>> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Error = MockTransportError;

    async fn send(&mut self, bytes: &[u8]) -> Result<(), Self::Error> {
        if !self.connected {
            return Err(MockTransportError::Disconnected);
        }

        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(bytes.to_vec());
        self.sent_notify.notify_one();
        Ok(())
    }

    async fn receive(&mut self) -> Result<Vec<u8>, Self::Error> {
        if !self.connected {
            return Err(MockTransportError::Disconnected);
        }

        self.inbound
            .recv()
            .await
            .ok_or(MockTransportError::Disconnected)
    }

    async fn close(&mut self) -> Result<(), Self::Error> {
        self.connected = false;
        self.inbound.close();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

impl MockBackend {
    /// Push a raw chunk towards the client
    pub fn push_raw(&mut self, bytes: impl Into<Vec<u8>>) {
        if let Some(sender) = &self.inbound {
            let _ = sender.send(bytes.into());
        }
    }

    /// Push a JSON message towards the client, framed with Content-Length
    pub fn push_message(&mut self, message: &serde_json::Value) {
        let body = message.to_string();
        self.push_raw(frame(body.as_bytes()));
    }

    /// Drop the backend side; the client observes the channel closing
    pub fn close(&mut self) {
        self.inbound.take();
    }

    /// Number of chunks the client has written so far
    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Total number of bytes the client has written so far
    pub fn bytes_sent(&self) -> usize {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(Vec::len)
            .sum()
    }

    /// Decode every framed message the client has written so far
    pub fn sent_messages(&self) -> Vec<serde_json::Value> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(|chunk| Self::decode_frame(chunk))
            .collect()
    }

    /// Wait for the next message written by the client
    ///
    /// Returns `None` if nothing arrives within a few seconds.
    pub async fn next_message(&mut self) -> Option<serde_json::Value> {
        let deadline = tokio::time::Instant::now() + MOCK_RECEIVE_TIMEOUT;
        loop {
            let chunk = {
                let sent = self.sent.lock().unwrap_or_else(PoisonError::into_inner);
                sent.get(self.cursor).cloned()
            };
            if let Some(chunk) = chunk {
                self.cursor += 1;
                return Self::decode_frame(&chunk);
            }
            if tokio::time::timeout_at(deadline, self.sent_notify.notified())
                .await
                .is_err()
            {
                return None;
            }
        }
    }

    fn decode_frame(chunk: &[u8]) -> Option<serde_json::Value> {
        let header_end = chunk.windows(4).position(|w| w == b"\r\n\r\n")?;
        serde_json::from_slice(&chunk[header_end + 4..]).ok()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::process::Stdio;
    use tokio::process::Command;

    #[tokio::test]
    async fn test_stream_transport_echo() {
        let mut child = Command::new("cat")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .expect("Failed to spawn cat command");

        let stdin = child.stdin.take().unwrap();
        let stdout = child.stdout.take().unwrap();

        let mut transport = StreamTransport::from_child(stdin, stdout);
        transport.send("hello world".as_bytes()).await.unwrap();

        let mut received = Vec::new();
        while received.len() < "hello world".len() {
            received.extend(transport.receive().await.unwrap());
        }
        assert_eq!(received, b"hello world");
        assert!(transport.is_connected());

        transport.close().await.unwrap();
        let _ = child.wait().await;
    }

    #[tokio::test]
    async fn test_stream_transport_reports_eof() {
        let mut child = Command::new("echo")
            .arg("bye")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .expect("Failed to spawn echo command");

        let stdin = child.stdin.take().unwrap();
        let stdout = child.stdout.take().unwrap();
        let mut transport = StreamTransport::from_child(stdin, stdout);

        let mut received = Vec::new();
        loop {
            match transport.receive().await {
                Ok(chunk) => received.extend(chunk),
                Err(StreamTransportError::Disconnected) => break,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(received, b"bye\n");
        let _ = child.wait().await;
    }

    #[tokio::test]
    async fn test_tcp_transport_round_trip() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            socket.read_exact(&mut buf).await.unwrap();
            socket.write_all(&buf).await.unwrap();
        });

        let mut transport = StreamTransport::connect_tcp(addr).await.unwrap();
        transport.send(b"ping").await.unwrap();

        let mut received = Vec::new();
        while received.len() < 4 {
            received.extend(transport.receive().await.unwrap());
        }
        assert_eq!(received, b"ping");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_mock_transport_pair() {
        let (mut transport, mut backend) = MockTransport::pair();

        transport.send(&frame(br#"{"a":1}"#)).await.unwrap();
        assert_eq!(backend.next_message().await, Some(json!({"a": 1})));
        assert_eq!(backend.sent_count(), 1);
        assert_eq!(backend.bytes_sent(), frame(br#"{"a":1}"#).len());

        backend.push_raw(b"chunk".to_vec());
        assert_eq!(transport.receive().await.unwrap(), b"chunk");

        backend.close();
        assert!(transport.receive().await.is_err());
    }

    #[tokio::test]
    async fn test_mock_transport_disconnect() {
        let (mut transport, _backend) = MockTransport::pair();

        assert!(transport.is_connected());
        transport.close().await.unwrap();

        assert!(!transport.is_connected());
        assert!(transport.send(b"test").await.is_err());
        assert!(transport.receive().await.is_err());
    }
}
