//! Shutdown Coordinator
//!
//! Drives the graceful shutdown state machine shared by every
//! component:
//!
//! ```text
//! Running ──signal/`shutdown` verb──> KillRequested ──> Draining ──> Terminated
//! ```
//!
//! Invariants:
//! - After `KillRequested`, every arriving command gets a fixed
//!   "server terminating" reply instead of normal dispatch, and the
//!   store rejects mutating calls.
//! - The snapshot dump happens exactly once, at the first instant the
//!   in-flight storage-operation counter reaches zero after kill.
//! - The process only exits once the in-flight command counter also
//!   reaches zero, so every client mid-command still gets its reply.
//!
//! OS signals never mutate async state directly: the signal task only
//! calls [`ShutdownCoordinator::request_kill`], which flips a watch
//! channel the drain task selects on.

use crate::context::ServerContext;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tracing::{error, info};

/// Lifecycle states of the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Running,
    KillRequested,
    Draining,
    Terminated,
}

/// Shared handle on the lifecycle state machine.
#[derive(Debug)]
pub struct ShutdownCoordinator {
    state: watch::Sender<Lifecycle>,
    dumped: AtomicBool,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (state, _) = watch::channel(Lifecycle::Running);
        Self {
            state,
            dumped: AtomicBool::new(false),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> Lifecycle {
        *self.state.borrow()
    }

    /// True once kill has been requested. Checked by the dispatcher
    /// before every command and by the maintenance scheduler each tick.
    pub fn is_terminating(&self) -> bool {
        self.state() != Lifecycle::Running
    }

    /// Requests termination. Only the first call transitions the state
    /// machine; later calls are no-ops. Returns whether this call won.
    pub fn request_kill(&self) -> bool {
        self.state.send_if_modified(|s| {
            if *s == Lifecycle::Running {
                *s = Lifecycle::KillRequested;
                true
            } else {
                false
            }
        })
    }

    fn advance(&self, to: Lifecycle) {
        self.state.send_if_modified(|s| {
            if *s == to {
                false
            } else {
                *s = to;
                true
            }
        });
    }

    /// Waits until kill has been requested.
    pub async fn wait_kill(&self) {
        let mut rx = self.state.subscribe();
        loop {
            if *rx.borrow() != Lifecycle::Running {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Waits until the state machine reaches `Terminated`.
    pub async fn wait_terminated(&self) {
        let mut rx = self.state.subscribe();
        loop {
            if *rx.borrow() == Lifecycle::Terminated {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// The drain task: runs for the life of the process and performs the
/// kill -> drain -> snapshot -> exit sequence once kill is requested.
///
/// If both counters are already zero when the signal arrives, this
/// degenerates to an immediate dump-then-exit.
pub async fn drain(ctx: &ServerContext) {
    let lifecycle = ctx.lifecycle();
    lifecycle.wait_kill().await;

    info!("kill requested, draining");
    ctx.store().disable();
    lifecycle.advance(Lifecycle::Draining);

    // Quiescence point one: no mutating storage operation in flight.
    ctx.store().wait_ops_idle().await;

    if !lifecycle.dumped.swap(true, Ordering::AcqRel) {
        let path = &ctx.config().snapshot_path;
        if let Err(e) = ctx.store().dump(path) {
            error!(error = %e, path = %path.display(), "snapshot dump failed during drain");
        }
    }

    // Quiescence point two: every in-flight command has been replied to.
    ctx.wait_commands_idle().await;

    lifecycle.advance(Lifecycle::Terminated);
    info!("drain complete");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_request_kill_once() {
        let coordinator = ShutdownCoordinator::new();
        assert_eq!(coordinator.state(), Lifecycle::Running);
        assert!(!coordinator.is_terminating());

        assert!(coordinator.request_kill());
        assert!(!coordinator.request_kill());
        assert_eq!(coordinator.state(), Lifecycle::KillRequested);
        assert!(coordinator.is_terminating());
    }

    #[tokio::test]
    async fn test_wait_kill_resolves() {
        let coordinator = Arc::new(ShutdownCoordinator::new());
        let waiter = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.wait_kill().await })
        };
        coordinator.request_kill();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_drain_dumps_and_terminates() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            snapshot_path: dir.path().join("livelock.snapshot"),
            ..Default::default()
        };
        let ctx = Arc::new(ServerContext::new(config));
        ctx.store().acquire("c1", "L1", false).unwrap();

        let drain_task = {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move { drain(&ctx).await })
        };

        ctx.lifecycle().request_kill();
        tokio::time::timeout(Duration::from_secs(1), drain_task)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(ctx.lifecycle().state(), Lifecycle::Terminated);
        assert!(ctx.config().snapshot_path.exists());

        // The store was disabled at kill time.
        assert!(ctx.store().acquire("c1", "L2", false).is_err());
    }

    #[tokio::test]
    async fn test_drain_waits_for_in_flight_command() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            snapshot_path: dir.path().join("livelock.snapshot"),
            ..Default::default()
        };
        let ctx = Arc::new(ServerContext::new(config));

        // Simulate a command still awaiting its reply flush.
        let guard = ctx.begin_command();

        let drain_task = {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move { drain(&ctx).await })
        };
        ctx.lifecycle().request_kill();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_ne!(ctx.lifecycle().state(), Lifecycle::Terminated);

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), drain_task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ctx.lifecycle().state(), Lifecycle::Terminated);
    }
}
