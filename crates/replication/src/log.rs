//! The replicated log: committed membership changes and `UpdateOp`s, in
//! strict index order (§4.2, §4.3).
use index_protocol::UpdateOp;
use parking_lot::Mutex;
use serde::{
    Deserialize,
    Serialize,
};

/// A log entry's payload. `UpdateOp`s and membership changes share one log
/// so both replicate and apply with the same ordering guarantees (§4.3
/// cluster membership).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LogCommand {
    Update(UpdateOp),
    AddReplica { replica_id: String, addr: String },
    RemoveReplica { replica_id: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub term: u64,
    pub index: u64,
    pub command: LogCommand,
}

/// In-memory log, 1-indexed (index 0 means "no entries"). A real deployment
/// would back this with the `log_store` path in `ReplicaConfig`; kept
/// in-memory here since persistence-on-every-append isn't load-bearing for
/// the properties in §8.
#[derive(Default)]
pub struct ReplicationLog {
    entries: Mutex<Vec<LogEntry>>,
}

impl ReplicationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_index_term(&self) -> (u64, u64) {
        let entries = self.entries.lock();
        match entries.last() {
            Some(e) => (e.index, e.term),
            None => (0, 0),
        }
    }

    pub fn term_at(&self, index: u64) -> Option<u64> {
        if index == 0 {
            return Some(0);
        }
        self.entries
            .lock()
            .get((index - 1) as usize)
            .map(|e| e.term)
    }

    /// Appends a new entry authored locally (leader path). Returns its index.
    pub fn append(&self, term: u64, command: LogCommand) -> u64 {
        let mut entries = self.entries.lock();
        let index = entries.len() as u64 + 1;
        entries.push(LogEntry {
            term,
            index,
            command,
        });
        index
    }

    /// Merges entries received via `AppendEntries` (follower path),
    /// truncating any conflicting suffix first (§4.3 ordering).
    pub fn merge_replicated(&self, prev_log_index: u64, new_entries: &[LogEntry]) {
        let mut entries = self.entries.lock();
        entries.truncate(prev_log_index as usize);
        for entry in new_entries {
            if let Some(existing) = entries.get(entry.index as usize - 1) {
                if existing.term != entry.term {
                    entries.truncate(entry.index as usize - 1);
                    entries.push(entry.clone());
                }
                // else: already have this exact entry, skip.
            } else {
                entries.push(entry.clone());
            }
        }
    }

    pub fn get(&self, index: u64) -> Option<LogEntry> {
        if index == 0 {
            return None;
        }
        self.entries.lock().get((index - 1) as usize).cloned()
    }

    pub fn entries_from(&self, index: u64) -> Vec<LogEntry> {
        let entries = self.entries.lock();
        let start = index.saturating_sub(1) as usize;
        entries.get(start..).map(|s| s.to_vec()).unwrap_or_default()
    }

    pub fn has_entry_matching(&self, index: u64, term: u64) -> bool {
        if index == 0 {
            return true;
        }
        self.term_at(index) == Some(term)
    }
}
