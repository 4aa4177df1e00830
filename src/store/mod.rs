//! Lock Store Module
//!
//! Authoritative in-memory state for the server: named locks with
//! reentrancy, signal markers, client sessions, and pending-release
//! bookkeeping, plus the snapshot that round-trips all of it across a
//! restart.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                      LockStore                       │
//! │  ┌─────────────────── Mutex ─────────────────────┐   │
//! │  │  locks:   lock_id -> LockRecord               │   │
//! │  │  signals: lock_id -> {marker, ...}            │   │
//! │  │  clients: client_id -> ClientSession          │   │
//! │  └───────────────────────────────────────────────┘   │
//! │  ops_in_flight (atomic) and disabled (atomic)        │
//! └──────────────────────────────────────────────────────┘
//!                ▲                         ▲
//!        maintenance sweep          shutdown drain
//!      (expired release windows)   (quiescence + dump)
//! ```
//!
//! Every mutating operation runs under the single mutex with no await
//! point, so concurrent operations on the same lock id are atomic.

pub mod engine;
pub mod snapshot;

pub use engine::{LockRecord, LockStore, StoreError, StoreStats};
pub use snapshot::{Snapshot, SNAPSHOT_VERSION};
