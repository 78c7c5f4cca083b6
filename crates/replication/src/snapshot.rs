//! Snapshot and restore protocol (§4.3): point-in-time copies of the live
//! index, taken and restored under the facade's exclusive guard.
use std::{
    collections::BTreeMap,
    path::{
        Path,
        PathBuf,
    },
};

use index_facade::{
    IndexEngine,
    IndexFacade,
};
use serde::{
    Deserialize,
    Serialize,
};

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotDescriptor {
    path: PathBuf,
}

/// A snapshot's files, read into memory and keyed by path relative to the
/// engine's save directory. Lets a snapshot cross the wire as one JSON body
/// to a newly joined replica that has no access to the leader's local
/// `snapshot_store` (§4.3 cluster membership catch-up).
#[derive(Debug, Serialize, Deserialize)]
pub struct SnapshotPayload {
    files: BTreeMap<String, Vec<u8>>,
}

/// Reads every file under an engine's save directory into a transferable
/// payload.
pub fn package(path: &Path) -> anyhow::Result<SnapshotPayload> {
    let mut files = BTreeMap::new();
    let mut dirs = vec![path.to_path_buf()];
    while let Some(dir) = dirs.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let entry_path = entry.path();
            if entry.file_type()?.is_dir() {
                dirs.push(entry_path);
            } else {
                let rel = entry_path.strip_prefix(path)?.to_string_lossy().into_owned();
                files.insert(rel, std::fs::read(&entry_path)?);
            }
        }
    }
    Ok(SnapshotPayload { files })
}

/// Writes a received payload to a fresh path under `snapshot_store`,
/// restores the facade from it, and records the same `latest.json`
/// descriptor a locally taken snapshot would, so a later restart can
/// restore without needing another push from the leader.
pub fn install<E: IndexEngine>(
    facade: &IndexFacade<E>,
    snapshot_store: &Path,
    payload: &SnapshotPayload,
) -> anyhow::Result<()> {
    let data_path = snapshot_store.join(uuid::Uuid::new_v4().to_string());
    std::fs::create_dir_all(&data_path)?;
    for (rel, bytes) in &payload.files {
        let file_path = data_path.join(rel);
        if let Some(parent) = file_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(file_path, bytes)?;
    }
    facade.restore_from(&data_path)?;

    let descriptor_path = snapshot_store.join("latest.json");
    if let Some(parent) = descriptor_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let descriptor = SnapshotDescriptor { path: data_path };
    std::fs::write(&descriptor_path, serde_json::to_vec_pretty(&descriptor)?)?;
    Ok(())
}

/// A snapshot that has been taken but not yet durably recorded. `persist`
/// writes the descriptor the consensus snapshot sink needs to find it again;
/// `release` reclaims the on-disk copy once that descriptor is durable.
pub struct SnapshotHandle {
    pub path: PathBuf,
    descriptor_path: PathBuf,
}

impl SnapshotHandle {
    pub fn persist(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.descriptor_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let descriptor = SnapshotDescriptor {
            path: self.path.clone(),
        };
        std::fs::write(&self.descriptor_path, serde_json::to_vec_pretty(&descriptor)?)?;
        Ok(())
    }

    pub fn release(&self) -> anyhow::Result<()> {
        if self.path.exists() {
            std::fs::remove_dir_all(&self.path)?;
        }
        Ok(())
    }
}

/// Acquires the facade's exclusive guard (via `save`), copies the live
/// index to a fresh path under `snapshot_store`, and releases it.
pub fn take<E: IndexEngine>(facade: &IndexFacade<E>, snapshot_store: &Path) -> anyhow::Result<SnapshotHandle> {
    let snapshot_path = snapshot_store.join(uuid::Uuid::new_v4().to_string());
    facade.save(&snapshot_path)?;
    Ok(SnapshotHandle {
        path: snapshot_path,
        descriptor_path: snapshot_store.join("latest.json"),
    })
}

/// Opens the index at the descriptor's path and swaps it in under the
/// facade's exclusive guard. Errors leave the previous handle intact
/// (`IndexFacade::restore_from`'s own contract).
pub fn restore<E: IndexEngine>(facade: &IndexFacade<E>, descriptor_path: &Path) -> anyhow::Result<()> {
    let bytes = std::fs::read(descriptor_path)?;
    let descriptor: SnapshotDescriptor = serde_json::from_slice(&bytes)?;
    facade.restore_from(&descriptor.path)
}

#[cfg(test)]
mod tests {
    use index_facade::NaiveEngine;

    use super::*;

    #[test]
    fn snapshot_then_restore_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let facade = IndexFacade::<NaiveEngine>::open(dir.path().join("live")).unwrap();
        facade
            .insert("a.pdf", "d1", &["the cat sat".to_string()], &[], None)
            .unwrap();

        let store = dir.path().join("snapshots");
        let handle = take(&facade, &store).unwrap();
        handle.persist().unwrap();

        let restored = IndexFacade::<NaiveEngine>::open(dir.path().join("restored")).unwrap();
        restore(&restored, &store.join("latest.json")).unwrap();

        let sources = restored.sources().unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].doc_id, "d1");
    }
}
