//! Maintenance Scheduler
//!
//! A fixed-period background task that finalizes expired pending
//! releases. The sweep is quiescence-gated:
//!
//! 1. A tick is skipped outright if any command is in flight or
//!    shutdown has been requested. Maintenance never *waits* to
//!    start, it only starts when the server is already idle.
//! 2. While the sweep runs it holds the maintenance gate exclusively,
//!    so new commands wait until it finishes.
//!
//! This ordering prevents the sweep from racing a command's view of
//! lock state.

use crate::context::ServerContext;
use crate::store::StoreError;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, trace};

/// Handle to the running scheduler. Dropping it stops the task.
#[derive(Debug)]
pub struct MaintenanceScheduler {
    shutdown_tx: watch::Sender<bool>,
}

impl MaintenanceScheduler {
    /// Starts the scheduler as a background task, with period and
    /// sweep budget taken from the context's config.
    pub fn start(ctx: Arc<ServerContext>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(scheduler_loop(ctx, shutdown_rx));
        info!("maintenance scheduler started");

        Self { shutdown_tx }
    }

    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for MaintenanceScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn scheduler_loop(ctx: Arc<ServerContext>, mut shutdown_rx: watch::Receiver<bool>) {
    let interval = ctx.config().maintenance_interval();
    let budget = ctx.config().maintenance_budget();

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("maintenance scheduler stopped");
                    return;
                }
            }
        }

        // Shutdown owns the store from here on.
        if ctx.lifecycle().is_terminating() {
            debug!("maintenance scheduler exiting, shutdown requested");
            return;
        }

        // Only start at quiescence; a busy tick is skipped, not queued.
        if ctx.commands_in_flight() > 0 {
            trace!("maintenance tick skipped, commands in flight");
            continue;
        }
        let Ok(_exclusive) = ctx.maintenance_gate().try_write() else {
            trace!("maintenance tick skipped, gate busy");
            continue;
        };

        match ctx.store().maintenance(budget) {
            Ok(0) => {}
            Ok(released) => {
                debug!(released, "maintenance finalized expired release windows")
            }
            // Lost the race with a concurrent kill request.
            Err(StoreError::Disabled) => return,
            Err(e) => error!(error = %e, "maintenance sweep failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::time::Duration;

    fn fast_ctx() -> Arc<ServerContext> {
        Arc::new(ServerContext::new(Config {
            maintenance_interval_ms: 10,
            ..Default::default()
        }))
    }

    #[tokio::test]
    async fn test_scheduler_finalizes_expired_windows() {
        let ctx = fast_ctx();
        ctx.store().acquire("c1", "L1", false).unwrap();
        ctx.store().release_all("c1", Duration::ZERO).unwrap();

        let _scheduler = MaintenanceScheduler::start(Arc::clone(&ctx));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!ctx.store().locked("L1"));
    }

    #[tokio::test]
    async fn test_scheduler_skips_while_command_in_flight() {
        let ctx = fast_ctx();
        ctx.store().acquire("c1", "L1", false).unwrap();
        ctx.store().release_all("c1", Duration::ZERO).unwrap();

        let guard = ctx.begin_command();
        let _scheduler = MaintenanceScheduler::start(Arc::clone(&ctx));

        // Window is expired, but a command is in flight: every tick skips.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(ctx.store().locked("L1"));

        drop(guard);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!ctx.store().locked("L1"));
    }

    #[tokio::test]
    async fn test_scheduler_stops_on_drop() {
        let ctx = fast_ctx();
        {
            let _scheduler = MaintenanceScheduler::start(Arc::clone(&ctx));
            tokio::time::sleep(Duration::from_millis(30)).await;
        }

        // Scheduler gone: an expired window stays pending.
        ctx.store().acquire("c1", "L1", false).unwrap();
        ctx.store().release_all("c1", Duration::ZERO).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(ctx.store().locked("L1"));
    }

    #[tokio::test]
    async fn test_scheduler_exits_after_kill() {
        let ctx = fast_ctx();
        ctx.lifecycle().request_kill();
        ctx.store().disable();

        let _scheduler = MaintenanceScheduler::start(Arc::clone(&ctx));
        // No sweep runs against the disabled store; nothing panics or
        // logs an invariant violation.
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
