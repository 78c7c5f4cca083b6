//! `ReplicaConfig` (§3.1) and the on-disk layout it points at (§6.2).
use std::{
    collections::BTreeMap,
    path::PathBuf,
};

/// One replica's view of the cluster at boot. `peers` excludes `replica_id`
/// itself and is mutated at runtime only by committed `AddReplica`/
/// `RemoveReplica` entries (§4.3).
#[derive(Debug, Clone)]
pub struct ReplicaConfig {
    pub replica_id: String,
    /// Base URL other replicas use to reach this one, e.g. `http://host:port`.
    pub bind_addr: String,
    /// True for the single replica that originates a brand new cluster.
    pub bootstrap: bool,
    pub peers: BTreeMap<String, String>,
    pub snapshot_store: PathBuf,
    pub log_store: PathBuf,
    pub stable_store: PathBuf,
}

impl ReplicaConfig {
    #[cfg(test)]
    pub fn new_for_test(replica_id: impl Into<String>, dir: &std::path::Path) -> Self {
        let replica_id = replica_id.into();
        Self {
            bind_addr: format!("http://test-{replica_id}"),
            bootstrap: true,
            peers: BTreeMap::new(),
            snapshot_store: dir.join("snapshots"),
            log_store: dir.join("log"),
            stable_store: dir.join("stable"),
            replica_id,
        }
    }
}
