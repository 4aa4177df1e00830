//! Command Dispatch Module
//!
//! Receives decoded wire commands, validates the verb and its fixed
//! arity, walks the per-connection session state machine, executes
//! against the lock store, and builds exactly one typed reply per
//! command.
//!
//! ```text
//! Client frame
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  Frame parser   │  (protocol module)
//! └────────┬────────┘
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  (this module)
//! │  auth/bind gate │
//! │  verb table     │
//! │  arity checks   │
//! └────────┬────────┘
//!          ▼
//! ┌─────────────────┐
//! │   LockStore     │  (store module)
//! └─────────────────┘
//! ```

pub mod handler;

pub use handler::{CommandHandler, Outcome, ReplyError};
