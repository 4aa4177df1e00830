//! The Lock Store
//!
//! In-memory authoritative state for the whole server: named locks
//! with reentrancy depths, signal markers, client sessions with
//! last-known peer addresses, and pending-release bookkeeping for the
//! reconnect grace window.
//!
//! ## Concurrency Model
//!
//! A single `Mutex` guards the entire state. Every operation runs to
//! completion while holding it, with no await point inside, so
//! concurrent acquire/release on the same lock id are atomic. The
//! store is wrapped in an `Arc` and shared by every connection task.
//!
//! Every **mutating** call increments an in-flight operation counter
//! for the duration of the call; the shutdown coordinator watches it
//! to find the quiescent instant for the snapshot dump. Pure reads
//! (`locked`, `has_signal`, `find`, address lookup, stats) bypass the
//! counter.
//!
//! Once shutdown has been requested the store is disabled: any further
//! mutating call fails fast with [`StoreError::Disabled`]. Reaching
//! that path indicates a coordination defect upstream, not a retryable
//! error.

use crate::store::snapshot::{
    clear_snapshot, read_snapshot, write_snapshot, ClientSnapshot, LockSnapshot, Snapshot,
    SNAPSHOT_VERSION,
};
use globset::Glob;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Errors surfaced by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Mutating call after shutdown was requested. A defect upstream,
    /// never retried.
    #[error("storage disabled: mutating call after shutdown was requested")]
    Disabled,

    /// Invalid glob pattern passed to `find`.
    #[error("invalid pattern: {0}")]
    Pattern(String),

    /// Snapshot file I/O or decode failure.
    #[error("snapshot error: {0}")]
    Snapshot(#[from] std::io::Error),
}

/// One held lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRecord {
    /// Client id of the holder
    pub holder: String,
    /// Reentrancy count, always >= 1 while the record exists
    pub depth: u32,
    /// Unix millis of the first successful acquire
    pub acquired_at_ms: u64,
}

/// Per-client bookkeeping.
#[derive(Debug, Clone, Default)]
struct ClientSession {
    /// Lock ids currently held by this client
    held: HashSet<String>,
    /// Last peer address seen for this client, used to decide whether
    /// a dropped socket should open a release window
    last_addr: Option<String>,
    /// Deadline of an open pending-release window, if any
    pending_release: Option<Instant>,
}

/// Read-only store counters for the `stats` verb.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    pub locks_held: u64,
    pub clients_known: u64,
    pub signals_total: u64,
    pub pending_releases: u64,
    pub acquires: u64,
    pub releases: u64,
    pub released_by_maintenance: u64,
}

#[derive(Debug, Default)]
struct StoreState {
    locks: HashMap<String, LockRecord>,
    /// Signals are keyed by lock id, not by the record, so they
    /// outlive the lock being held.
    signals: HashMap<String, HashSet<String>>,
    clients: HashMap<String, ClientSession>,
}

/// The in-memory lock store.
pub struct LockStore {
    state: Mutex<StoreState>,
    ops_in_flight: AtomicU64,
    ops_idle: Notify,
    disabled: AtomicBool,

    acquire_count: AtomicU64,
    release_count: AtomicU64,
    maintenance_released: AtomicU64,
}

impl std::fmt::Debug for LockStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockStore")
            .field("ops_in_flight", &self.ops_in_flight.load(Ordering::Relaxed))
            .field("disabled", &self.disabled.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for LockStore {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard counting one in-flight mutating operation.
struct OpGuard<'a> {
    store: &'a LockStore,
}

impl Drop for OpGuard<'_> {
    fn drop(&mut self) {
        if self.store.ops_in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.store.ops_idle.notify_waiters();
        }
    }
}

impl LockStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            ops_in_flight: AtomicU64::new(0),
            ops_idle: Notify::new(),
            disabled: AtomicBool::new(false),
            acquire_count: AtomicU64::new(0),
            release_count: AtomicU64::new(0),
            maintenance_released: AtomicU64::new(0),
        }
    }

    /// Starts a mutating operation, failing fast once disabled.
    fn begin_op(&self) -> Result<OpGuard<'_>, StoreError> {
        if self.disabled.load(Ordering::Acquire) {
            return Err(StoreError::Disabled);
        }
        self.ops_in_flight.fetch_add(1, Ordering::AcqRel);
        Ok(OpGuard { store: self })
    }

    /// Disables all further mutating operations. Called exactly once,
    /// when shutdown is requested.
    pub fn disable(&self) {
        self.disabled.store(true, Ordering::Release);
    }

    /// Number of mutating operations currently in flight.
    pub fn ops_in_flight(&self) -> u64 {
        self.ops_in_flight.load(Ordering::Acquire)
    }

    /// Waits until no mutating operation is in flight.
    pub async fn wait_ops_idle(&self) {
        loop {
            let notified = self.ops_idle.notified();
            if self.ops_in_flight.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }

    // ========================================================================
    // Lock operations
    // ========================================================================

    /// Acquires `lock` for `client`.
    ///
    /// Returns `true` if the lock was unheld, or was already held by
    /// `client` with `reentrant` set (depth + 1). Returns `false` when
    /// another client holds it, or the same client re-acquires without
    /// `reentrant`.
    pub fn acquire(
        &self,
        client: &str,
        lock: &str,
        reentrant: bool,
    ) -> Result<bool, StoreError> {
        let _op = self.begin_op()?;
        self.acquire_count.fetch_add(1, Ordering::Relaxed);

        let mut state = self.state.lock().unwrap();
        match state.locks.get_mut(lock) {
            Some(record) => {
                if record.holder == client && reentrant {
                    record.depth += 1;
                    debug!(client, lock, depth = record.depth, "reentrant acquire");
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            None => {
                state.locks.insert(
                    lock.to_string(),
                    LockRecord {
                        holder: client.to_string(),
                        depth: 1,
                        acquired_at_ms: now_ms(),
                    },
                );
                state
                    .clients
                    .entry(client.to_string())
                    .or_default()
                    .held
                    .insert(lock.to_string());
                debug!(client, lock, "acquired");
                Ok(true)
            }
        }
    }

    /// Releases one level of `lock` for `client`.
    ///
    /// The record is destroyed at depth 0. Returns `false` if `client`
    /// does not hold the lock.
    pub fn release(&self, client: &str, lock: &str) -> Result<bool, StoreError> {
        let _op = self.begin_op()?;
        self.release_count.fetch_add(1, Ordering::Relaxed);

        let mut state = self.state.lock().unwrap();
        let Some(record) = state.locks.get_mut(lock) else {
            return Ok(false);
        };
        if record.holder != client {
            return Ok(false);
        }

        record.depth -= 1;
        if record.depth == 0 {
            state.locks.remove(lock);
            if let Some(session) = state.clients.get_mut(client) {
                session.held.remove(lock);
            }
            debug!(client, lock, "released");
        }
        Ok(true)
    }

    /// Is `lock` currently held? Pure read.
    pub fn locked(&self, lock: &str) -> bool {
        self.state.lock().unwrap().locks.contains_key(lock)
    }

    /// Opens a pending-release window for `client`: every lock it
    /// holds will be released by maintenance once `grace` has elapsed,
    /// unless `unrelease_all` cancels the window first.
    ///
    /// Returns the number of locks scheduled for release.
    pub fn release_all(&self, client: &str, grace: Duration) -> Result<usize, StoreError> {
        let _op = self.begin_op()?;

        let mut state = self.state.lock().unwrap();
        let Some(session) = state.clients.get_mut(client) else {
            return Ok(0);
        };
        if session.held.is_empty() {
            // Nothing to schedule: drop the session outright so idle
            // disconnects do not accumulate entries.
            state.clients.remove(client);
            return Ok(0);
        }

        session.pending_release = Some(Instant::now() + grace);
        let scheduled = session.held.len();
        info!(client, locks = scheduled, grace_ms = grace.as_millis() as u64,
              "release window opened");
        Ok(scheduled)
    }

    /// Cancels a pending release window opened by a prior disconnect,
    /// restoring the client's held locks. Returns `true` if a window
    /// was open.
    pub fn unrelease_all(&self, client: &str) -> Result<bool, StoreError> {
        let _op = self.begin_op()?;

        let mut state = self.state.lock().unwrap();
        let Some(session) = state.clients.get_mut(client) else {
            return Ok(false);
        };
        let was_pending = session.pending_release.take().is_some();
        if was_pending {
            info!(client, locks = session.held.len(), "release window cancelled");
        }
        Ok(was_pending)
    }

    // ========================================================================
    // Signals
    // ========================================================================

    /// Attaches a lower-cased signal marker to a lock id. The lock
    /// does not need to be held. Returns `true` if newly added.
    pub fn add_signal(&self, lock: &str, sig: &str) -> Result<bool, StoreError> {
        let _op = self.begin_op()?;
        let mut state = self.state.lock().unwrap();
        Ok(state
            .signals
            .entry(lock.to_string())
            .or_default()
            .insert(sig.to_lowercase()))
    }

    /// Case-insensitive signal check. Pure read.
    pub fn has_signal(&self, lock: &str, sig: &str) -> bool {
        let state = self.state.lock().unwrap();
        state
            .signals
            .get(lock)
            .is_some_and(|set| set.contains(&sig.to_lowercase()))
    }

    /// Removes a signal marker. Returns `true` if it was present.
    pub fn remove_signal(&self, lock: &str, sig: &str) -> Result<bool, StoreError> {
        let _op = self.begin_op()?;
        let mut state = self.state.lock().unwrap();
        let Some(set) = state.signals.get_mut(lock) else {
            return Ok(false);
        };
        let removed = set.remove(&sig.to_lowercase());
        if set.is_empty() {
            state.signals.remove(lock);
        }
        Ok(removed)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Finds held locks whose id matches a glob pattern. Pure read.
    ///
    /// Returns `(lock_id, acquired_at_ms)` pairs.
    pub fn find(&self, pattern: &str) -> Result<Vec<(String, u64)>, StoreError> {
        let matcher = Glob::new(pattern)
            .map_err(|e| StoreError::Pattern(e.to_string()))?
            .compile_matcher();

        let state = self.state.lock().unwrap();
        let mut matches: Vec<(String, u64)> = state
            .locks
            .iter()
            .filter(|(id, _)| matcher.is_match(id.as_str()))
            .map(|(id, record)| (id.clone(), record.acquired_at_ms))
            .collect();
        matches.sort();
        Ok(matches)
    }

    /// Records the last peer address seen for a client.
    pub fn set_client_last_address(&self, client: &str, addr: &str) -> Result<(), StoreError> {
        let _op = self.begin_op()?;
        let mut state = self.state.lock().unwrap();
        state
            .clients
            .entry(client.to_string())
            .or_default()
            .last_addr = Some(addr.to_string());
        Ok(())
    }

    /// Last peer address recorded for a client, if any. Pure read.
    pub fn get_client_last_address(&self, client: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        state.clients.get(client).and_then(|s| s.last_addr.clone())
    }

    /// Read-only counters for the `stats` verb.
    pub fn stats_snapshot(&self) -> StoreStats {
        let state = self.state.lock().unwrap();
        StoreStats {
            locks_held: state.locks.len() as u64,
            clients_known: state.clients.len() as u64,
            signals_total: state.signals.values().map(|s| s.len() as u64).sum(),
            pending_releases: state
                .clients
                .values()
                .filter(|s| s.pending_release.is_some())
                .count() as u64,
            acquires: self.acquire_count.load(Ordering::Relaxed),
            releases: self.release_count.load(Ordering::Relaxed),
            released_by_maintenance: self.maintenance_released.load(Ordering::Relaxed),
        }
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Time-boxed sweep finalizing expired pending releases.
    ///
    /// Runs to completion even past `timeout`; an overrun is logged,
    /// never abandoned mid-sweep. Returns the number of locks released.
    pub fn maintenance(&self, timeout: Duration) -> Result<usize, StoreError> {
        let _op = self.begin_op()?;
        let started = Instant::now();
        let now = started;

        let mut state = self.state.lock().unwrap();
        let expired: Vec<String> = state
            .clients
            .iter()
            .filter(|(_, s)| s.pending_release.is_some_and(|deadline| deadline <= now))
            .map(|(id, _)| id.clone())
            .collect();

        let mut released = 0usize;
        for client in expired {
            let Some(session) = state.clients.remove(&client) else {
                continue;
            };
            for lock in &session.held {
                state.locks.remove(lock);
            }
            released += session.held.len();
            info!(
                client = %client,
                locks = session.held.len(),
                "release window expired, locks released and session pruned"
            );
        }

        if released > 0 {
            self.maintenance_released
                .fetch_add(released as u64, Ordering::Relaxed);
        }

        let elapsed = started.elapsed();
        if elapsed > timeout {
            warn!(
                elapsed_ms = elapsed.as_millis() as u64,
                budget_ms = timeout.as_millis() as u64,
                "maintenance sweep overran its budget"
            );
        }

        Ok(released)
    }

    // ========================================================================
    // Snapshot
    // ========================================================================

    /// Serializes the whole store to `path`, atomically.
    ///
    /// Called on shutdown drain (after the store is disabled) and by
    /// the debug `dump` verb, so it deliberately bypasses the mutating
    /// guard: it does not change in-memory state.
    pub fn dump(&self, path: &Path) -> Result<(), StoreError> {
        let snapshot = {
            let state = self.state.lock().unwrap();
            Snapshot {
                version: SNAPSHOT_VERSION,
                locks: state
                    .locks
                    .iter()
                    .map(|(id, r)| {
                        (
                            id.clone(),
                            LockSnapshot {
                                holder: r.holder.clone(),
                                depth: r.depth,
                                acquired_at_ms: r.acquired_at_ms,
                            },
                        )
                    })
                    .collect(),
                signals: state
                    .signals
                    .iter()
                    .map(|(id, set)| {
                        let mut sigs: Vec<String> = set.iter().cloned().collect();
                        sigs.sort();
                        (id.clone(), sigs)
                    })
                    .collect(),
                clients: state
                    .clients
                    .iter()
                    .map(|(id, s)| {
                        let mut held: Vec<String> = s.held.iter().cloned().collect();
                        held.sort();
                        (
                            id.clone(),
                            ClientSnapshot {
                                last_addr: s.last_addr.clone(),
                                held,
                            },
                        )
                    })
                    .collect(),
            }
        };

        write_snapshot(path, &snapshot)?;
        info!(path = %path.display(), locks = snapshot.locks.len(), "store snapshot written");
        Ok(())
    }

    /// Loads a snapshot written by a previous process. Runs once at
    /// startup, before the listener binds and before any connection
    /// exists.
    ///
    /// Every restored client that holds locks gets a fresh release
    /// window of `grace`: reconnecting with `conn <id>` inside the
    /// window keeps the locks, otherwise maintenance reaps them.
    ///
    /// Returns `true` if a snapshot was found and loaded.
    pub fn load_dump(&self, path: &Path, grace: Duration) -> Result<bool, StoreError> {
        let Some(snapshot) = read_snapshot(path)? else {
            return Ok(false);
        };

        let deadline = Instant::now() + grace;
        let mut state = self.state.lock().unwrap();

        state.locks = snapshot
            .locks
            .into_iter()
            .map(|(id, r)| {
                (
                    id,
                    LockRecord {
                        holder: r.holder,
                        depth: r.depth,
                        acquired_at_ms: r.acquired_at_ms,
                    },
                )
            })
            .collect();
        state.signals = snapshot
            .signals
            .into_iter()
            .map(|(id, sigs)| (id, sigs.into_iter().collect()))
            .collect();
        state.clients = snapshot
            .clients
            .into_iter()
            .map(|(id, s)| {
                let held: HashSet<String> = s.held.into_iter().collect();
                let pending_release = if held.is_empty() { None } else { Some(deadline) };
                (
                    id,
                    ClientSession {
                        held,
                        last_addr: s.last_addr,
                        pending_release,
                    },
                )
            })
            .collect();

        info!(
            path = %path.display(),
            locks = state.locks.len(),
            clients = state.clients.len(),
            "store snapshot loaded"
        );
        Ok(true)
    }

    /// Removes the snapshot file.
    pub fn clear_dump(&self, path: &Path) -> Result<(), StoreError> {
        clear_snapshot(path)?;
        Ok(())
    }
}

/// Unix millis now.
fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
