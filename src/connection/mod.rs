//! Connection Management Module
//!
//! Each accepted TCP connection is handled by its own async task.
//! The handler configures keepalive and nodelay on the socket, frames
//! inbound bytes, sequences commands through the dispatcher strictly
//! in arrival order, and on socket loss decides (by last-known peer
//! address) whether to open a release window for the client's locks.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │               TCP Listener (main)            │
//! └──────────────────────┬───────────────────────┘
//!                        │ accept() + spawn
//!                        ▼
//! ┌──────────────────────────────────────────────┐
//! │             ConnectionHandler                │
//! │  read ─> parse ─> gate ─> dispatch ─> reply  │
//! │  close ─> release-window decision            │
//! └──────────────────────────────────────────────┘
//! ```

pub mod handler;

pub use handler::{
    configure_socket, handle_connection, ConnectionError, ConnectionHandler, ConnectionStats,
    StatsSnapshot,
};
