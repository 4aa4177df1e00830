//! Connection Handler
//!
//! One handler task per accepted TCP connection. The handler owns the
//! socket lifecycle: keepalive configuration, the read buffer, frame
//! parsing, sequencing decoded commands into the dispatcher strictly
//! in arrival order, and the disconnect cleanup that opens a release
//! window for the client's locks.
//!
//! ## Per-command sequence
//!
//! ```text
//! read bytes ─> parse frame ─> take maintenance gate (shared)
//!           ─> count in-flight ─> dispatch ─> write + flush reply
//! ```
//!
//! The in-flight guard is held until the reply has been flushed, so
//! the shutdown coordinator never lets the process exit while a client
//! is still owed bytes.
//!
//! ## Disconnect semantics
//!
//! On socket loss, if the store's last-known peer address for the
//! bound client still matches this connection (or none was recorded),
//! a release window is opened via `release_all`. If it differs, a
//! newer connection superseded this one and the locks are left alone.

use crate::commands::{CommandHandler, Outcome};
use crate::context::ServerContext;
use crate::protocol::{into_command, FrameParser, ParseError, WireValue};
use bytes::BytesMut;
use socket2::{SockRef, TcpKeepalive};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, error, info, trace, warn};

/// Maximum size for the read buffer (64 KB)
const MAX_BUFFER_SIZE: usize = 64 * 1024;

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Shared connection and command counters, surfaced by `stats`.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    pub connections_accepted: AtomicU64,
    pub active_connections: AtomicU64,
    pub commands_processed: AtomicU64,
    pub bytes_read: AtomicU64,
    pub bytes_written: AtomicU64,
}

/// A plain-value copy of [`ConnectionStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub connections_accepted: u64,
    pub active_connections: u64,
    pub commands_processed: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn add_bytes_written(&self, count: usize) {
        self.bytes_written
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            commands_processed: self.commands_processed.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
        }
    }
}

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed frame: fatal, the peer gets no reply
    #[error("protocol error: {0}")]
    Protocol(#[from] ParseError),

    /// Client disconnected normally
    #[error("client disconnected")]
    ClientDisconnected,

    /// Socket closed with a partial frame still buffered
    #[error("unexpected end of stream")]
    UnexpectedEof,

    /// Read buffer limit exceeded
    #[error("buffer size limit exceeded")]
    BufferFull,
}

/// Handles one client connection.
pub struct ConnectionHandler {
    stream: BufWriter<TcpStream>,
    addr: SocketAddr,
    buffer: BytesMut,
    parser: FrameParser,
    dispatcher: CommandHandler,
    ctx: Arc<ServerContext>,
}

impl ConnectionHandler {
    pub fn new(stream: TcpStream, addr: SocketAddr, ctx: Arc<ServerContext>) -> Self {
        ctx.stats().connection_opened();
        let dispatcher = CommandHandler::new(Arc::clone(&ctx), addr.to_string());

        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            parser: FrameParser::new(),
            dispatcher,
            ctx,
        }
    }

    /// Runs the connection to completion, then performs disconnect
    /// cleanup.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => info!(client = %self.addr, "connection closed"),
            Err(ConnectionError::ClientDisconnected) => {
                debug!(client = %self.addr, "client disconnected")
            }
            Err(ConnectionError::Io(io_err))
                if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
            {
                debug!(client = %self.addr, "connection reset by client")
            }
            Err(e) => warn!(client = %self.addr, error = %e, "connection error"),
        }

        self.cleanup_on_close();
        self.ctx.stats().connection_closed();
        result
    }

    /// The read-dispatch-reply loop. Commands are processed and
    /// replied to strictly in arrival order; pipelined frames are
    /// handled one at a time.
    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            while let Some(value) = self.try_parse_frame()? {
                let command = into_command(value)?;
                trace!(client = %self.addr, verb = %command.verb, "dispatching");

                // Shared side of the maintenance gate, held together
                // with the in-flight guard until the reply is flushed.
                let ctx = Arc::clone(&self.ctx);
                let _gate = ctx.maintenance_gate().read().await;
                let _in_flight = ctx.begin_command();

                let outcome = self.dispatcher.execute(command);
                self.send_reply(outcome.reply()).await?;

                if matches!(outcome, Outcome::ReplyAndClose(_)) {
                    return Ok(());
                }
            }

            self.read_more_data().await?;
        }
    }

    /// Attempts to parse one frame from the buffer.
    fn try_parse_frame(&mut self) -> Result<Option<WireValue>, ConnectionError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        match self.parser.parse(&self.buffer) {
            Ok(Some((value, consumed))) => {
                let _ = self.buffer.split_to(consumed);
                Ok(Some(value))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                warn!(client = %self.addr, error = %e, "malformed frame, closing");
                Err(ConnectionError::Protocol(e))
            }
        }
    }

    /// Reads more data from the socket into the buffer.
    async fn read_more_data(&mut self) -> Result<(), ConnectionError> {
        if self.buffer.len() >= MAX_BUFFER_SIZE {
            error!(client = %self.addr, size = self.buffer.len(), "buffer limit exceeded");
            return Err(ConnectionError::BufferFull);
        }

        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(4096);
        }

        let n = self.stream.get_mut().read_buf(&mut self.buffer).await?;

        if n == 0 {
            if self.buffer.is_empty() {
                return Err(ConnectionError::ClientDisconnected);
            }
            return Err(ConnectionError::UnexpectedEof);
        }

        self.ctx.stats().add_bytes_read(n);
        Ok(())
    }

    async fn send_reply(&mut self, reply: &WireValue) -> Result<(), ConnectionError> {
        let bytes = reply.serialize();
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        self.ctx.stats().add_bytes_written(bytes.len());
        Ok(())
    }

    /// Disconnect cleanup: opens a release window for the bound client
    /// unless a newer connection already superseded this one, or the
    /// server is draining (the store is frozen for the snapshot).
    fn cleanup_on_close(&self) {
        let Some(client) = self.dispatcher.client_id() else {
            return;
        };
        if self.ctx.lifecycle().is_terminating() {
            return;
        }

        let peer = self.addr.to_string();
        if let Some(last) = self.ctx.store().get_client_last_address(client) {
            if last != peer {
                debug!(
                    client,
                    stale_peer = %peer,
                    current_peer = %last,
                    "stale connection closed, keeping locks"
                );
                return;
            }
        }

        let grace = self.ctx.config().release_all_timeout();
        match self.ctx.store().release_all(client, grace) {
            Ok(0) => {}
            Ok(scheduled) => {
                info!(client, locks = scheduled, "disconnect opened release window")
            }
            Err(e) => error!(client, error = %e, "release window could not be opened"),
        }
    }
}

/// Applies keepalive and latency socket options from the config.
pub fn configure_socket(
    stream: &TcpStream,
    config: &crate::config::Config,
) -> std::io::Result<()> {
    stream.set_nodelay(true)?;

    let sock = SockRef::from(stream);
    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(config.keepalive_idle_secs))
        .with_interval(Duration::from_secs(config.keepalive_interval_secs))
        .with_retries(config.keepalive_probes);
    sock.set_tcp_keepalive(&keepalive)?;

    #[cfg(target_os = "linux")]
    sock.set_tcp_user_timeout(Some(Duration::from_millis(config.tcp_user_timeout_ms)))?;

    Ok(())
}

/// Accepts one connection end to end. Convenience wrapper used by the
/// accept loop.
pub async fn handle_connection(stream: TcpStream, addr: SocketAddr, ctx: Arc<ServerContext>) {
    if let Err(e) = configure_socket(&stream, ctx.config()) {
        warn!(client = %addr, error = %e, "socket options could not be applied");
    }

    let handler = ConnectionHandler::new(stream, addr, ctx);
    if let Err(e) = handler.run().await {
        match e {
            ConnectionError::ClientDisconnected => {}
            ConnectionError::Io(ref io_err)
                if io_err.kind() == std::io::ErrorKind::ConnectionReset => {}
            _ => {
                debug!(client = %addr, error = %e, "connection ended with error");
            }
        }
    }
}
