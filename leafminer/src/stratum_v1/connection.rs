//! Line-delimited pool transport.
//!
//! Stratum v1 is newline-delimited JSON over TCP. The [`Transport`] trait is
//! the session's whole view of the network: bring the link up, open a
//! connection, write a line, read a line with a deadline. [`TcpTransport`]
//! is the production implementation; a channel-backed mock stands in for it
//! in tests.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::bytes::BytesMut;
use tokio_util::codec::{Decoder, FramedRead, FramedWrite, LinesCodec, LinesCodecError};

use super::error::{StratumError, StratumResult};
use crate::tracing::prelude::*;

/// Longest line accepted from a pool. A notify with a deep merkle branch is
/// a few kilobytes.
pub const MAX_LINE_LENGTH: usize = 16 * 1024;

/// Default TCP connect timeout.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Line-level I/O with a pool.
#[async_trait]
pub trait Transport: Send {
    /// Make sure the network link under the connection is usable.
    ///
    /// Hosts with a wired or OS-managed link have nothing to do here.
    async fn link_up(&mut self) -> StratumResult<()> {
        Ok(())
    }

    /// Open a connection to the pool, replacing any existing one.
    async fn connect(&mut self, host: &str, port: u16) -> StratumResult<()>;

    fn is_connected(&self) -> bool;

    /// Write one line. The newline is added here.
    async fn send(&mut self, line: &str) -> StratumResult<()>;

    /// Read one non-empty line, waiting at most `timeout`.
    ///
    /// Returns `Ok(None)` on timeout and [`StratumError::Disconnected`] when
    /// the pool closes the connection.
    async fn read_line(&mut self, timeout: Duration) -> StratumResult<Option<String>>;

    fn disconnect(&mut self);
}

/// One framed line from the pool.
#[derive(Debug, PartialEq, Eq)]
enum PoolLine {
    Text(String),
    /// Too long or not UTF-8. The bytes are already consumed, so reading
    /// can continue with the next line.
    Undecodable(String),
}

/// [`LinesCodec`] that reports bad lines as frames rather than errors.
///
/// A decode error puts `FramedRead` into its terminal state, which a single
/// bad line from a pool must not do. Only I/O errors stay errors.
struct PoolLineCodec {
    lines: LinesCodec,
}

impl PoolLineCodec {
    fn new() -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(MAX_LINE_LENGTH),
        }
    }

    fn frame(
        result: Result<Option<String>, LinesCodecError>,
    ) -> Result<Option<PoolLine>, LinesCodecError> {
        match result {
            Ok(line) => Ok(line.map(PoolLine::Text)),
            Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(PoolLine::Undecodable(
                format!("line longer than {} bytes", MAX_LINE_LENGTH),
            ))),
            // The only InvalidData the codec itself produces is bad UTF-8
            Err(LinesCodecError::Io(e)) if e.kind() == io::ErrorKind::InvalidData => {
                Ok(Some(PoolLine::Undecodable(format!("line is not UTF-8: {}", e))))
            }
            Err(e) => Err(e),
        }
    }
}

impl Decoder for PoolLineCodec {
    type Item = PoolLine;
    type Error = LinesCodecError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<PoolLine>, LinesCodecError> {
        Self::frame(self.lines.decode(buf))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<PoolLine>, LinesCodecError> {
        Self::frame(self.lines.decode_eof(buf))
    }
}

struct Connection {
    reader: FramedRead<OwnedReadHalf, PoolLineCodec>,
    writer: FramedWrite<OwnedWriteHalf, LinesCodec>,
}

impl Connection {
    fn new(stream: TcpStream) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self {
            reader: FramedRead::new(read_half, PoolLineCodec::new()),
            writer: FramedWrite::new(write_half, LinesCodec::new()),
        }
    }
}

/// TCP transport over tokio.
pub struct TcpTransport {
    connect_timeout: Duration,
    conn: Option<Connection>,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self::with_connect_timeout(CONNECT_TIMEOUT)
    }

    pub fn with_connect_timeout(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            conn: None,
        }
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&mut self, host: &str, port: u16) -> StratumResult<()> {
        self.conn = None;
        debug!(host, port, "Connecting to pool");

        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| StratumError::Timeout)?
            .map_err(|e| StratumError::ConnectionFailed(format!("{}:{}: {}", host, port, e)))?;

        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY");
        }

        debug!(host, port, "Connected to pool");
        self.conn = Some(Connection::new(stream));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    async fn send(&mut self, line: &str) -> StratumResult<()> {
        let conn = self.conn.as_mut().ok_or(StratumError::NotConnected)?;
        trace!(tx = %line, "Sending line");

        let result = conn.writer.send(line).await;
        if let Err(e) = result {
            self.conn = None;
            return Err(codec_error(e));
        }
        Ok(())
    }

    async fn read_line(&mut self, timeout: Duration) -> StratumResult<Option<String>> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let conn = self.conn.as_mut().ok_or(StratumError::NotConnected)?;

            let next = match tokio::time::timeout_at(deadline, conn.reader.next()).await {
                Ok(next) => next,
                Err(_) => return Ok(None),
            };

            match next {
                Some(Ok(PoolLine::Text(line))) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    trace!(rx = %line, "Received line");
                    return Ok(Some(line.to_string()));
                }
                Some(Ok(PoolLine::Undecodable(reason))) => {
                    return Err(StratumError::InvalidMessage(reason));
                }
                Some(Err(e)) => {
                    self.conn = None;
                    return Err(codec_error(e));
                }
                None => {
                    self.conn = None;
                    return Err(StratumError::Disconnected);
                }
            }
        }
    }

    fn disconnect(&mut self) {
        if self.conn.take().is_some() {
            debug!("Disconnected from pool");
        }
    }
}

fn codec_error(e: LinesCodecError) -> StratumError {
    match e {
        LinesCodecError::Io(e) => StratumError::Io(e),
        LinesCodecError::MaxLineLengthExceeded => {
            StratumError::InvalidMessage("line too long".into())
        }
    }
}

/// Channel-based transport for deterministic testing.
///
/// Backed by tokio mpsc channels rather than TCP, so it works with
/// `tokio::time::pause()`. Create a pair with [`MockTransport::pair()`]; the
/// transport is the session's side, the handle is the test's side.
#[cfg(test)]
pub(crate) struct MockTransport {
    rx: tokio::sync::mpsc::UnboundedReceiver<Result<String, String>>,
    tx: tokio::sync::mpsc::UnboundedSender<String>,
    connected: bool,
    control: std::sync::Arc<MockControl>,
}

#[cfg(test)]
#[derive(Default)]
struct MockControl {
    refuse_link: std::sync::atomic::AtomicBool,
    refuse_connect: std::sync::atomic::AtomicBool,
    link_attempts: std::sync::atomic::AtomicUsize,
    connect_attempts: std::sync::atomic::AtomicUsize,
}

/// Test-side handle for a [`MockTransport`].
#[cfg(test)]
pub(crate) struct MockTransportHandle {
    tx: tokio::sync::mpsc::UnboundedSender<Result<String, String>>,
    rx: tokio::sync::mpsc::UnboundedReceiver<String>,
    control: std::sync::Arc<MockControl>,
}

#[cfg(test)]
impl MockTransport {
    /// Create a linked (transport, handle) pair.
    pub fn pair() -> (Self, MockTransportHandle) {
        let (session_tx, handle_rx) = tokio::sync::mpsc::unbounded_channel();
        let (handle_tx, session_rx) = tokio::sync::mpsc::unbounded_channel();
        let control = std::sync::Arc::new(MockControl::default());

        let transport = MockTransport {
            rx: session_rx,
            tx: session_tx,
            connected: false,
            control: control.clone(),
        };
        let handle = MockTransportHandle {
            tx: handle_tx,
            rx: handle_rx,
            control,
        };
        (transport, handle)
    }
}

#[cfg(test)]
#[async_trait]
impl Transport for MockTransport {
    async fn link_up(&mut self) -> StratumResult<()> {
        use std::sync::atomic::Ordering;

        self.control.link_attempts.fetch_add(1, Ordering::SeqCst);
        if self.control.refuse_link.load(Ordering::SeqCst) {
            return Err(StratumError::ConnectionFailed("link down".into()));
        }
        Ok(())
    }

    async fn connect(&mut self, host: &str, port: u16) -> StratumResult<()> {
        use std::sync::atomic::Ordering;

        self.control.connect_attempts.fetch_add(1, Ordering::SeqCst);
        if self.control.refuse_connect.load(Ordering::SeqCst) {
            self.connected = false;
            return Err(StratumError::ConnectionFailed(format!(
                "{}:{} refused",
                host, port
            )));
        }
        self.connected = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn send(&mut self, line: &str) -> StratumResult<()> {
        if !self.connected {
            return Err(StratumError::NotConnected);
        }
        self.tx
            .send(line.to_string())
            .map_err(|_| StratumError::Disconnected)
    }

    async fn read_line(&mut self, timeout: Duration) -> StratumResult<Option<String>> {
        if !self.connected {
            return Err(StratumError::NotConnected);
        }
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Err(_) => Ok(None),
            Ok(Some(Ok(line))) => Ok(Some(line)),
            Ok(Some(Err(reason))) => Err(StratumError::InvalidMessage(reason)),
            Ok(None) => {
                self.connected = false;
                Err(StratumError::Disconnected)
            }
        }
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }
}

#[cfg(test)]
impl MockTransportHandle {
    /// Queue a line for the session to read.
    pub fn send(&self, line: impl Into<String>) {
        self.tx.send(Ok(line.into())).expect("transport dropped");
    }

    /// Queue a line the transport can't decode.
    pub fn send_undecodable(&self) {
        self.tx
            .send(Err("undecodable line".into()))
            .expect("transport dropped");
    }

    /// Queue a JSON message for the session to read.
    pub fn send_json(&self, value: serde_json::Value) {
        self.send(value.to_string());
    }

    /// Wait for the next line the session writes, parsed as JSON.
    pub async fn recv(&mut self) -> serde_json::Value {
        let line = self.rx.recv().await.expect("transport dropped");
        serde_json::from_str(&line).expect("session wrote invalid JSON")
    }

    /// Next line the session wrote, if any, parsed as JSON.
    pub fn try_recv(&mut self) -> Option<serde_json::Value> {
        self.rx
            .try_recv()
            .ok()
            .map(|line| serde_json::from_str(&line).expect("session wrote invalid JSON"))
    }

    /// Everything the session has written so far.
    pub fn drain(&mut self) -> Vec<serde_json::Value> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    pub fn refuse_link(&self, refuse: bool) {
        self.control
            .refuse_link
            .store(refuse, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.control
            .refuse_connect
            .store(refuse, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn link_attempts(&self) -> usize {
        self.control
            .link_attempts
            .load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn connect_attempts(&self) -> usize {
        self.control
            .connect_attempts
            .load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    async fn listener() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    #[tokio::test]
    async fn test_line_roundtrip() {
        let (listener, port) = listener().await;

        // Echo server
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read, mut write) = socket.into_split();
            let mut lines = BufReader::new(read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                write.write_all(b"\n").await.unwrap();
                write.write_all(line.as_bytes()).await.unwrap();
                write.write_all(b"\n").await.unwrap();
            }
        });

        let mut transport = TcpTransport::new();
        transport.connect("127.0.0.1", port).await.unwrap();
        assert!(transport.is_connected());

        transport
            .send(r#"{"id":1,"method":"mining.subscribe","params":[]}"#)
            .await
            .unwrap();

        // The blank line before the echo is skipped
        let line = transport
            .read_line(Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(line, r#"{"id":1,"method":"mining.subscribe","params":[]}"#);
    }

    #[tokio::test]
    async fn test_read_timeout_returns_none() {
        let (listener, port) = listener().await;
        let server = tokio::spawn(async move { listener.accept().await.unwrap() });

        let mut transport = TcpTransport::new();
        transport.connect("127.0.0.1", port).await.unwrap();
        let _socket = server.await.unwrap();

        let line = transport
            .read_line(Duration::from_millis(50))
            .await
            .unwrap();

        assert_eq!(line, None);
        assert!(transport.is_connected());
    }

    #[tokio::test]
    async fn test_pool_close_is_disconnect() {
        let (listener, port) = listener().await;
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        let mut transport = TcpTransport::new();
        transport.connect("127.0.0.1", port).await.unwrap();

        let result = transport.read_line(Duration::from_secs(5)).await;

        assert!(matches!(result, Err(StratumError::Disconnected)));
        assert!(!transport.is_connected());
    }

    #[test]
    fn test_codec_reports_bad_utf8_and_continues() {
        let mut codec = PoolLineCodec::new();
        let mut buf = BytesMut::from(&b"{\"result\":\"\xff\"}\n{\"id\":1}\n"[..]);

        assert!(matches!(codec.decode(&mut buf), Ok(Some(PoolLine::Undecodable(_)))));
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(PoolLine::Text(r#"{"id":1}"#.into()))
        );
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_codec_skips_oversized_line() {
        let mut codec = PoolLineCodec::new();
        let mut buf = BytesMut::from(vec![b'x'; MAX_LINE_LENGTH + 10].as_slice());
        buf.extend_from_slice(b"\n{\"id\":1}\n");

        assert!(matches!(codec.decode(&mut buf), Ok(Some(PoolLine::Undecodable(_)))));
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(PoolLine::Text(r#"{"id":1}"#.into()))
        );
    }

    #[tokio::test]
    async fn test_undecodable_line_keeps_connection() {
        let (listener, port) = listener().await;
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"{\"id\":1,\"result\":\"\xff\"}\n").await.unwrap();
            socket
                .write_all(b"{\"id\":null,\"method\":\"mining.set_difficulty\",\"params\":[2]}\n")
                .await
                .unwrap();
            // Hold the socket open until the client is done
            let mut buf = [0u8; 1];
            let _ = tokio::io::AsyncReadExt::read(&mut socket, &mut buf).await;
        });

        let mut transport = TcpTransport::new();
        transport.connect("127.0.0.1", port).await.unwrap();

        let first = transport.read_line(Duration::from_secs(5)).await;
        assert!(matches!(first, Err(StratumError::InvalidMessage(_))));
        assert!(transport.is_connected());

        let second = transport
            .read_line(Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();
        assert!(second.contains("mining.set_difficulty"));
    }

    #[tokio::test]
    async fn test_io_before_connect() {
        let mut transport = TcpTransport::new();

        assert!(matches!(
            transport.send("{}").await,
            Err(StratumError::NotConnected)
        ));
        assert!(matches!(
            transport.read_line(Duration::from_millis(1)).await,
            Err(StratumError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind then drop to get a port nobody listens on
        let (listener, port) = listener().await;
        drop(listener);

        let mut transport = TcpTransport::new();
        let result = transport.connect("127.0.0.1", port).await;

        assert!(matches!(result, Err(StratumError::ConnectionFailed(_))));
        assert!(!transport.is_connected());
    }
}
