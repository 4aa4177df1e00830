//! Snapshot Persistence
//!
//! The whole lock store round-trips through a single self-describing
//! JSON document: written atomically (temp file + rename) on shutdown
//! drain and on the debug `dump` verb, loaded once at startup before
//! the listener binds.
//!
//! Pending-release deadlines are wall-clock relative and are not
//! persisted; the loader re-opens a fresh grace window for every
//! restored client that still holds locks, so a client that never
//! comes back after a restart is reaped by maintenance.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Serialized form of one lock record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockSnapshot {
    pub holder: String,
    pub depth: u32,
    pub acquired_at_ms: u64,
}

/// Serialized form of one client session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_addr: Option<String>,
    pub held: Vec<String>,
}

/// The persisted store state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub locks: BTreeMap<String, LockSnapshot>,
    pub signals: BTreeMap<String, Vec<String>>,
    pub clients: BTreeMap<String, ClientSnapshot>,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            locks: BTreeMap::new(),
            signals: BTreeMap::new(),
            clients: BTreeMap::new(),
        }
    }
}

/// Writes a snapshot atomically: temp file in the same directory,
/// then rename over the target.
pub fn write_snapshot(path: &Path, snapshot: &Snapshot) -> io::Result<()> {
    let json = serde_json::to_vec_pretty(snapshot)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    let tmp = path.with_extension("tmp");
    fs::write(&tmp, &json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Reads a snapshot from disk. Returns `Ok(None)` if the file does
/// not exist (first boot).
pub fn read_snapshot(path: &Path) -> io::Result<Option<Snapshot>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    let snapshot: Snapshot = serde_json::from_slice(&bytes)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(Some(snapshot))
}

/// Removes the snapshot file if present.
pub fn clear_snapshot(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
