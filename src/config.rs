//! Server Configuration
//!
//! All tunables are supplied on the command line and collected into a
//! single [`Config`] struct that is constructed once in `main` and
//! injected into every component through the server context. There is
//! no global configuration state.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// LiveLock server configuration.
#[derive(Debug, Clone, Parser)]
#[command(name = "livelock", version, about = "A distributed lock coordination server")]
pub struct Config {
    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on
    #[arg(long, default_value_t = 7878)]
    pub port: u16,

    /// Shared secret; when set, connections must authenticate with
    /// `pass <secret>` before anything else
    #[arg(long)]
    pub password: Option<String>,

    /// Grace window after a disconnect before the client's locks are
    /// released, in milliseconds
    #[arg(long, default_value_t = 30_000)]
    pub release_all_timeout_ms: u64,

    /// Period of the background maintenance sweep, in milliseconds
    #[arg(long, default_value_t = 1_000)]
    pub maintenance_interval_ms: u64,

    /// Budget for one maintenance sweep, in milliseconds; overruns are
    /// logged but the sweep is never abandoned
    #[arg(long, default_value_t = 250)]
    pub maintenance_budget_ms: u64,

    /// Path of the store snapshot written on shutdown and loaded at
    /// startup
    #[arg(long, default_value = "livelock.snapshot")]
    pub snapshot_path: PathBuf,

    /// Enable the `shutdown` and `dump` verbs
    #[arg(long, default_value_t = false)]
    pub enable_shutdown: bool,

    /// TCP keepalive idle time, in seconds
    #[arg(long, default_value_t = 60)]
    pub keepalive_idle_secs: u64,

    /// TCP keepalive probe interval, in seconds
    #[arg(long, default_value_t = 10)]
    pub keepalive_interval_secs: u64,

    /// TCP keepalive probe count before the peer is declared dead
    #[arg(long, default_value_t = 3)]
    pub keepalive_probes: u32,

    /// TCP_USER_TIMEOUT, in milliseconds (Linux only)
    #[arg(long, default_value_t = 90_000)]
    pub tcp_user_timeout_ms: u64,
}

impl Config {
    /// The bind address as `host:port`.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn release_all_timeout(&self) -> Duration {
        Duration::from_millis(self.release_all_timeout_ms)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_millis(self.maintenance_interval_ms)
    }

    pub fn maintenance_budget(&self) -> Duration {
        Duration::from_millis(self.maintenance_budget_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        // Defaults match the clap attributes above.
        Self {
            host: "127.0.0.1".to_string(),
            port: 7878,
            password: None,
            release_all_timeout_ms: 30_000,
            maintenance_interval_ms: 1_000,
            maintenance_budget_ms: 250,
            snapshot_path: PathBuf::from("livelock.snapshot"),
            enable_shutdown: false,
            keepalive_idle_secs: 60,
            keepalive_interval_secs: 10,
            keepalive_probes: 3,
            tcp_user_timeout_ms: 90_000,
        }
    }
}
