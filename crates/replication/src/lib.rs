//! The Replicated Index State Machine (§4.3): leader election, log
//! replication, the single-threaded apply loop over the Index Facade, and
//! the snapshot/restore protocol.
pub mod config;
pub mod log;
mod metrics;
pub mod node;
pub mod rpc;
pub mod snapshot;

pub use config::ReplicaConfig;
pub use log::{
    LogCommand,
    LogEntry,
};
pub use node::{
    Role,
    Rsm,
};
pub use snapshot::SnapshotHandle;
