//! Wire types and HTTP client for the Raft-subset RPCs between replicas
//! (§4.3). Plain HTTP, matching the teacher's own internal-service client
//! style (`big_brain_client`) rather than a protobuf/tonic pipeline this
//! worker has no other use for.
use std::time::Duration;

use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    log::{
        LogCommand,
        LogEntry,
    },
    snapshot::SnapshotPayload,
};

#[derive(Debug, Serialize, Deserialize)]
pub struct RequestVoteRequest {
    pub term: u64,
    pub candidate_id: String,
    pub last_log_index: u64,
    pub last_log_term: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RequestVoteResponse {
    pub term: u64,
    pub vote_granted: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AppendEntriesRequest {
    pub term: u64,
    pub leader_id: String,
    pub prev_log_index: u64,
    pub prev_log_term: u64,
    pub entries: Vec<LogEntry>,
    pub leader_commit: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AppendEntriesResponse {
    pub term: u64,
    pub success: bool,
    pub match_index: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub command: LogCommand,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub ok: bool,
    pub error: Option<String>,
}

/// Pushed by the leader to a newly added replica so it catches up without
/// waiting on the next periodic snapshot to land on a shared store (§4.3
/// cluster membership).
#[derive(Debug, Serialize, Deserialize)]
pub struct InstallSnapshotRequest {
    pub term: u64,
    pub leader_id: String,
    pub payload: SnapshotPayload,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InstallSnapshotResponse {
    pub term: u64,
    pub success: bool,
}

const RPC_TIMEOUT: Duration = Duration::from_secs(5);

pub struct RaftClient {
    client: reqwest::Client,
}

impl Default for RaftClient {
    fn default() -> Self {
        Self::new()
    }
}

impl RaftClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(RPC_TIMEOUT)
                .build()
                .expect("failed to build reqwest client"),
        }
    }

    pub async fn request_vote(
        &self,
        addr: &str,
        req: &RequestVoteRequest,
    ) -> anyhow::Result<RequestVoteResponse> {
        Ok(self
            .client
            .post(format!("{addr}/raft/request-vote"))
            .json(req)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }

    pub async fn append_entries(
        &self,
        addr: &str,
        req: &AppendEntriesRequest,
    ) -> anyhow::Result<AppendEntriesResponse> {
        Ok(self
            .client
            .post(format!("{addr}/raft/append-entries"))
            .json(req)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }

    /// Forwards a write submitted to a non-leader replica to the current
    /// leader (§4.3 writer contract step 2).
    pub async fn forward_submit(&self, leader_addr: &str, command: LogCommand) -> anyhow::Result<SubmitResponse> {
        Ok(self
            .client
            .post(format!("{leader_addr}/raft/submit"))
            .json(&SubmitRequest { command })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }

    pub async fn install_snapshot(
        &self,
        addr: &str,
        req: &InstallSnapshotRequest,
    ) -> anyhow::Result<InstallSnapshotResponse> {
        Ok(self
            .client
            .post(format!("{addr}/raft/install-snapshot"))
            .json(req)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }
}
