//! On-disk snapshot of the published resolution state.
//!
//! The snapshot is a single JSON document:
//!
//! ```json
//! {
//!   "ipv4": { "us": ["3.0.0.0/9", ...], ... },
//!   "ipv6": { "jp": ["2001:200::/23", ...], ... },
//!   "ready": true,
//!   "refreshed_at": 1760000000
//! }
//! ```
//!
//! `refreshed_at` is seconds since the Unix epoch. Writes go to a temporary
//! file in the same directory which is then renamed over the old snapshot,
//! so a crash mid-write leaves the previous snapshot intact.

use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::{Error, Result};
use crate::resolver::ResolutionState;
use crate::table::RangeTable;

#[derive(Debug, Serialize, Deserialize)]
struct PersistedSnapshot {
    #[serde(default)]
    ipv4: BTreeMap<String, Vec<Ipv4Net>>,
    #[serde(default)]
    ipv6: BTreeMap<String, Vec<Ipv6Net>>,
    #[serde(default)]
    ready: bool,
    #[serde(default, with = "system_time_serde")]
    refreshed_at: Option<SystemTime>,
}

mod system_time_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    pub fn serialize<S>(time: &Option<SystemTime>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        time.map(|t| t.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs())
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<SystemTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs: Option<u64> = Option::deserialize(deserializer)?;
        Ok(secs.map(|s| UNIX_EPOCH + Duration::from_secs(s)))
    }
}

impl PersistedSnapshot {
    fn from_state(state: &ResolutionState) -> Self {
        let ipv4 = state
            .table
            .v4_entries()
            .into_iter()
            .map(|(code, nets)| (code.to_string(), nets.to_vec()))
            .collect();
        let ipv6 = state
            .table
            .v6_entries()
            .into_iter()
            .map(|(code, nets)| (code.to_string(), nets.to_vec()))
            .collect();

        Self {
            ipv4,
            ipv6,
            ready: true,
            refreshed_at: Some(state.refreshed_at),
        }
    }

    fn into_state(self) -> Option<ResolutionState> {
        let refreshed_at = match (self.ready, self.refreshed_at) {
            (true, Some(at)) => at,
            _ => return None,
        };

        let mut builder = RangeTable::builder();
        for (code, nets) in self.ipv4 {
            builder.extend(&code, nets.into_iter().map(IpNet::V4));
        }
        for (code, nets) in self.ipv6 {
            builder.extend(&code, nets.into_iter().map(IpNet::V6));
        }

        Some(ResolutionState {
            table: builder.build(),
            refreshed_at,
        })
    }
}

/// Reads and writes the snapshot file.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    /// Create a store for the given file.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Snapshot file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Atomically replace the snapshot with `state`.
    pub fn save(&self, state: &ResolutionState) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        let data = serde_json::to_vec(&PersistedSnapshot::from_state(state))?;

        let mut temp = tempfile::NamedTempFile::new_in(dir)?;
        temp.write_all(&data)?;
        temp.as_file().sync_all()?;
        temp.persist(&self.path)
            .map_err(|e| Error::persistence(&self.path, e.error))?;

        log::info!("Saved snapshot to {:?} ({} bytes)", self.path, data.len());
        Ok(())
    }

    /// Read the snapshot.
    ///
    /// A missing file, or one that was never marked ready, yields `Ok(None)`.
    pub fn load(&self) -> Result<Option<ResolutionState>> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("No snapshot at {:?}", self.path);
                return Ok(None);
            }
            Err(e) => return Err(Error::persistence(&self.path, e)),
        };

        let snapshot: PersistedSnapshot =
            serde_json::from_slice(&data).map_err(|e| Error::persistence(&self.path, e))?;

        let state = snapshot.into_state();
        match &state {
            Some(state) => log::info!(
                "Loaded snapshot from {:?} ({} IPv4 ranges, {} IPv6 ranges)",
                self.path,
                state.table.range_count(crate::table::Family::V4),
                state.table.range_count(crate::table::Family::V6),
            ),
            None => log::warn!("Snapshot {:?} is not marked ready, ignoring", self.path),
        }

        Ok(state)
    }
}
