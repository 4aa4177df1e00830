//! # LiveLock - A Distributed Lock Coordination Server
//!
//! LiveLock is a network-accessible lock coordination service. Clients
//! connect over TCP, bind an identity, and acquire/release named locks
//! with reentrancy, attach signal markers to lock ids, and survive
//! their own crashes through a reconnect grace window and a store
//! snapshot written on shutdown.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                            LiveLock                             │
//! │                                                                 │
//! │  ┌────────────┐   ┌────────────┐   ┌────────────┐               │
//! │  │ TCP Server │──>│ Connection │──>│  Command   │               │
//! │  │ (Listener) │   │  Handler   │   │ Dispatcher │               │
//! │  └────────────┘   └────────────┘   └─────┬──────┘               │
//! │                                          │                      │
//! │  ┌────────────┐                          ▼                      │
//! │  │   Frame    │   ┌──────────────────────────────────────────┐  │
//! │  │   Parser   │   │                LockStore                 │  │
//! │  └────────────┘   │  locks, signals, sessions, snapshot      │  │
//! │                   └──────────────────────────────────────────┘  │
//! │                          ▲                        ▲             │
//! │              ┌───────────┴──────────┐  ┌──────────┴──────────┐  │
//! │              │ MaintenanceScheduler │  │ ShutdownCoordinator │  │
//! │              │ (quiescence-gated)   │  │ (drain + snapshot)  │  │
//! │              └──────────────────────┘  └─────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire Protocol
//!
//! Hybrid format over TCP, CRLF-terminated: commands arrive either as
//! one RESP-like typed value (`:` `$` `*` `,`) or as a plain command
//! line. Success replies are `+<content>`, errors `-<code> <message>`,
//! structured results full typed serialization.
//!
//! ## Verbs
//!
//! `pass`, `conn`, `conninfo`, `aq`, `aqr`, `release`, `locked`,
//! `sigset`, `sigexists`, `sigdel`, `ping`, `find`, `stats`,
//! `shutdown`, `dump`
//!
//! ## Module Overview
//!
//! - [`protocol`]: frame parser and wire value types
//! - [`store`]: the lock store and its snapshot
//! - [`commands`]: the verb table and session state machine
//! - [`connection`]: per-connection socket lifecycle
//! - [`maintenance`]: the quiescence-gated background sweep
//! - [`shutdown`]: the drain/snapshot/exit state machine
//! - [`config`] / [`context`]: configuration and dependency injection
//!
//! ## Coordination Invariants
//!
//! Commands hold the maintenance gate shared and count themselves
//! in flight until their reply is flushed. The maintenance sweep only
//! starts when no command is in flight and takes the gate exclusively.
//! On shutdown the snapshot is written exactly once, at the first
//! instant the storage-operation counter reaches zero after kill, and
//! the process exits only once the command counter is also zero, so
//! every client mid-command still receives its reply.

pub mod commands;
pub mod config;
pub mod connection;
pub mod context;
pub mod maintenance;
pub mod protocol;
pub mod shutdown;
pub mod store;

// Re-export commonly used types for convenience
pub use commands::{CommandHandler, Outcome, ReplyError};
pub use config::Config;
pub use connection::{handle_connection, ConnectionStats};
pub use context::ServerContext;
pub use maintenance::MaintenanceScheduler;
pub use protocol::{Command, FrameParser, ParseError, WireValue};
pub use shutdown::{Lifecycle, ShutdownCoordinator};
pub use store::{LockStore, StoreError};

/// Version of LiveLock
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
