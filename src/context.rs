//! Server Context
//!
//! One [`ServerContext`] is constructed at startup and shared (via
//! `Arc`) by every component: connection handlers, the command
//! dispatcher, the maintenance scheduler and the shutdown coordinator.
//! It replaces any global state with explicit dependency injection.
//!
//! The context also owns the two quiescence primitives:
//!
//! - the **maintenance gate**, an async `RwLock<()>`: commands hold it
//!   shared for their whole lifetime (dispatch through reply flush),
//!   the maintenance sweep takes it exclusive;
//! - the **in-flight command counter**, watched by the shutdown
//!   coordinator so the process never exits while a client is still
//!   owed a reply.

use crate::config::Config;
use crate::connection::ConnectionStats;
use crate::shutdown::ShutdownCoordinator;
use crate::store::LockStore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::{Notify, RwLock};

/// Shared server state, constructed once in `main`.
#[derive(Debug)]
pub struct ServerContext {
    config: Config,
    store: LockStore,
    lifecycle: ShutdownCoordinator,
    maintenance_gate: RwLock<()>,
    commands_in_flight: AtomicU64,
    commands_idle: Notify,
    stats: ConnectionStats,
    started_at: Instant,
}

impl ServerContext {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            store: LockStore::new(),
            lifecycle: ShutdownCoordinator::new(),
            maintenance_gate: RwLock::new(()),
            commands_in_flight: AtomicU64::new(0),
            commands_idle: Notify::new(),
            stats: ConnectionStats::new(),
            started_at: Instant::now(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &LockStore {
        &self.store
    }

    pub fn lifecycle(&self) -> &ShutdownCoordinator {
        &self.lifecycle
    }

    /// Commands take this shared, the maintenance sweep exclusive.
    pub fn maintenance_gate(&self) -> &RwLock<()> {
        &self.maintenance_gate
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Number of commands between dispatch and reply flush.
    pub fn commands_in_flight(&self) -> u64 {
        self.commands_in_flight.load(Ordering::Acquire)
    }

    /// Counts one in-flight command; the guard must live until the
    /// reply has been flushed to the socket.
    pub fn begin_command(&self) -> CommandGuard<'_> {
        self.commands_in_flight.fetch_add(1, Ordering::AcqRel);
        CommandGuard { ctx: self }
    }

    /// Waits until no command is in flight.
    pub async fn wait_commands_idle(&self) {
        loop {
            let notified = self.commands_idle.notified();
            if self.commands_in_flight.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// RAII guard for one in-flight command.
#[derive(Debug)]
pub struct CommandGuard<'a> {
    ctx: &'a ServerContext,
}

impl Drop for CommandGuard<'_> {
    fn drop(&mut self) {
        if self.ctx.commands_in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.ctx.commands_idle.notify_waiters();
        }
    }
}
