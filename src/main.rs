//! LiveLock - A Distributed Lock Coordination Server
//!
//! Entry point: loads configuration, restores the store snapshot,
//! binds the TCP listener, and wires the signal layer into the
//! shutdown coordinator.

use anyhow::Context as _;
use clap::Parser;
use livelock::connection::handle_connection;
use livelock::maintenance::MaintenanceScheduler;
use livelock::shutdown;
use livelock::{Config, ServerContext};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!(version = livelock::VERSION, "LiveLock starting");

    let ctx = Arc::new(ServerContext::new(config.clone()));

    // Restore state before accepting any connection; restored clients
    // get a fresh reconnect grace window.
    match ctx
        .store()
        .load_dump(&config.snapshot_path, config.release_all_timeout())
    {
        Ok(true) => info!(path = %config.snapshot_path.display(), "snapshot restored"),
        Ok(false) => info!("no snapshot found, starting with an empty store"),
        Err(e) => {
            return Err(e).context("failed to load store snapshot");
        }
    }

    let _scheduler = MaintenanceScheduler::start(Arc::clone(&ctx));

    let listener = TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address()))?;
    info!(addr = %config.bind_address(), "listening");

    // OS signals never mutate state directly; they only trip the
    // coordinator, which the main loop selects on.
    {
        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            wait_for_termination_signal().await;
            info!("termination signal received");
            ctx.lifecycle().request_kill();
        });
    }

    tokio::select! {
        _ = accept_loop(listener, Arc::clone(&ctx)) => {}
        _ = ctx.lifecycle().wait_kill() => {}
    }

    // Drain: storage quiescence, snapshot once, then wait for every
    // in-flight reply to flush.
    shutdown::drain(&ctx).await;
    info!("server stopped");

    // Graceful exit code is 0, for signal-driven and verb-driven
    // shutdown alike.
    Ok(())
}

/// Accepts connections until the listener fails or the select in
/// `main` drops it on kill.
async fn accept_loop(listener: TcpListener, ctx: Arc<ServerContext>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                tokio::spawn(handle_connection(stream, addr, Arc::clone(&ctx)));
            }
            Err(e) => {
                error!(error = %e, "failed to accept connection");
            }
        }
    }
}

#[cfg(unix)]
async fn wait_for_termination_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            error!(error = %e, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_termination_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
