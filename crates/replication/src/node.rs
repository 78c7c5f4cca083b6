//! The Replicated Index State Machine (§4.3): a single-leader protocol
//! modeled on Raft's leader-election and log-replication core (term
//! numbers, `RequestVote`/`AppendEntries`, randomized election timeouts,
//! majority commit), without full joint-consensus membership changes —
//! `AddReplica`/`RemoveReplica` are ordinary committed log entries instead.
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{
            AtomicU64,
            AtomicUsize,
            Ordering,
        },
        Arc,
    },
    time::{
        Duration,
        Instant,
    },
};

use axum::{
    extract::State,
    routing::post,
    Json,
    Router,
};
use errors::ErrorMetadata;
use index_facade::{
    IndexEngine,
    IndexFacade,
};
use index_protocol::UpdateOp;
use parking_lot::Mutex;
use rand::Rng;
use serde::{
    Deserialize,
    Serialize,
};
use tokio::sync::{
    oneshot,
    Notify,
};

use crate::{
    config::ReplicaConfig,
    log::{
        LogCommand,
        LogEntry,
        ReplicationLog,
    },
    metrics,
    rpc::{
        AppendEntriesRequest,
        AppendEntriesResponse,
        InstallSnapshotRequest,
        InstallSnapshotResponse,
        RaftClient,
        RequestVoteRequest,
        RequestVoteResponse,
        SubmitRequest,
        SubmitResponse,
    },
    snapshot::{
        self,
        SnapshotHandle,
    },
};

/// Writes block on commit for at most this long before returning
/// `Unavailable` (§5); the entry may still commit and apply afterward
/// (at-least-once semantics, §9).
const APPLY_TIMEOUT: Duration = Duration::from_secs(30);
const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(50);
const ELECTION_TIMEOUT_RANGE_MS: std::ops::Range<u64> = 150..300;
/// How often each replica takes a local point-in-time snapshot (§4.3).
const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

#[derive(Serialize, Deserialize, Default)]
struct StableState {
    current_term: u64,
    voted_for: Option<String>,
}

struct VolatileState {
    role: Role,
    current_term: u64,
    voted_for: Option<String>,
    leader_id: Option<String>,
    peers: BTreeMap<String, String>,
    next_index: BTreeMap<String, u64>,
    match_index: BTreeMap<String, u64>,
    last_heartbeat: Instant,
}

/// One replica's share of the RSM: the log, consensus state, and the single
/// handle to the Index Facade that the apply loop is the only writer of.
pub struct Rsm<E: IndexEngine + 'static> {
    config: ReplicaConfig,
    facade: IndexFacade<E>,
    log: ReplicationLog,
    state: Mutex<VolatileState>,
    client: RaftClient,
    commit_index: AtomicU64,
    last_applied: AtomicU64,
    apply_in_flight: AtomicUsize,
    apply_notify: Notify,
    waiters: Mutex<BTreeMap<u64, oneshot::Sender<anyhow::Result<()>>>>,
    last_local_snapshot: Mutex<Option<SnapshotHandle>>,
}

fn load_stable_state(path: &std::path::Path) -> StableState {
    std::fs::read(path)
        .ok()
        .and_then(|bytes| serde_json::from_slice(&bytes).ok())
        .unwrap_or_default()
}

impl<E: IndexEngine + 'static> Rsm<E> {
    pub fn new(config: ReplicaConfig, facade: IndexFacade<E>) -> Arc<Self> {
        Self::restore_from_snapshot_if_empty(&config, &facade);

        let stable = load_stable_state(&config.stable_store);
        let state = VolatileState {
            role: Role::Follower,
            current_term: stable.current_term,
            voted_for: stable.voted_for,
            leader_id: None,
            peers: config.peers.clone(),
            next_index: BTreeMap::new(),
            match_index: BTreeMap::new(),
            last_heartbeat: Instant::now(),
        };
        Arc::new(Self {
            config,
            facade,
            log: ReplicationLog::new(),
            state: Mutex::new(state),
            client: RaftClient::new(),
            commit_index: AtomicU64::new(0),
            last_applied: AtomicU64::new(0),
            apply_in_flight: AtomicUsize::new(0),
            apply_notify: Notify::new(),
            waiters: Mutex::new(BTreeMap::new()),
            last_local_snapshot: Mutex::new(None),
        })
    }

    /// If this replica's index is empty and a local snapshot descriptor
    /// already exists, restores from it before accepting any writes, so a
    /// process restart (or a replica whose `snapshot_store` is a mounted
    /// path shared with an earlier instance) doesn't start from scratch
    /// (§4.3 restore protocol). A non-empty index is left untouched: restore
    /// never overwrites live data a replica already has.
    fn restore_from_snapshot_if_empty(config: &ReplicaConfig, facade: &IndexFacade<E>) {
        let descriptor_path = config.snapshot_store.join("latest.json");
        if !descriptor_path.exists() {
            return;
        }
        if !facade.writer().read().is_empty() {
            return;
        }
        match snapshot::restore(facade, &descriptor_path) {
            Ok(()) => tracing::info!("restored index from local snapshot on boot"),
            Err(e) => tracing::warn!(error = %e, "failed to restore from local snapshot on boot"),
        }
    }

    /// Starts the election timer, apply-loop, and periodic-snapshot
    /// background tasks (§4.8 boot step 6).
    pub fn spawn(rsm: &Arc<Self>) {
        tokio::spawn(Self::election_timer_loop(rsm.clone()));
        tokio::spawn(Self::apply_loop(rsm.clone()));
        tokio::spawn(Self::snapshot_loop(rsm.clone()));
        if rsm.config.bootstrap && rsm.config.peers.is_empty() {
            let rsm = rsm.clone();
            tokio::spawn(async move { Self::start_election(&rsm).await });
        }
    }

    /// Mounts `/raft/request-vote`, `/raft/append-entries`, `/raft/submit`,
    /// `/raft/install-snapshot` for `serving_worker` to merge into its
    /// router.
    pub fn routes(rsm: Arc<Self>) -> Router {
        Router::new()
            .route("/raft/request-vote", post(handle_request_vote::<E>))
            .route("/raft/append-entries", post(handle_append_entries::<E>))
            .route("/raft/submit", post(handle_submit::<E>))
            .route("/raft/install-snapshot", post(handle_install_snapshot::<E>))
            .with_state(rsm)
    }

    pub fn is_leader(&self) -> bool {
        self.state.lock().role == Role::Leader
    }

    pub fn leader_id(&self) -> Option<String> {
        self.state.lock().leader_id.clone()
    }

    fn persist_stable(&self, current_term: u64, voted_for: Option<String>) {
        let stable = StableState {
            current_term,
            voted_for,
        };
        if let Some(parent) = self.config.stable_store.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Ok(bytes) = serde_json::to_vec(&stable) {
            if let Err(e) = std::fs::write(&self.config.stable_store, bytes) {
                tracing::warn!(error = %e, "failed to persist stable raft state");
            }
        }
    }

    async fn election_timer_loop(rsm: Arc<Self>) {
        loop {
            let timeout_ms = rand::rng().random_range(ELECTION_TIMEOUT_RANGE_MS);
            let timeout = Duration::from_millis(timeout_ms);
            tokio::time::sleep(timeout).await;
            let should_elect = {
                let state = rsm.state.lock();
                state.role != Role::Leader && state.last_heartbeat.elapsed() >= timeout
            };
            if should_elect {
                Self::start_election(&rsm).await;
            }
        }
    }

    async fn start_election(rsm: &Arc<Self>) {
        let (term, candidate_id, last_log_index, last_log_term, peers) = {
            let mut state = rsm.state.lock();
            state.current_term += 1;
            state.role = Role::Candidate;
            state.voted_for = Some(rsm.config.replica_id.clone());
            state.leader_id = None;
            state.last_heartbeat = Instant::now();
            let (last_log_index, last_log_term) = rsm.log.last_index_term();
            (
                state.current_term,
                rsm.config.replica_id.clone(),
                last_log_index,
                last_log_term,
                state.peers.clone(),
            )
        };
        rsm.persist_stable(term, Some(candidate_id.clone()));
        tracing::debug!(term, "starting election");

        let votes = futures::future::join_all(peers.values().map(|addr| {
            let req = RequestVoteRequest {
                term,
                candidate_id: candidate_id.clone(),
                last_log_index,
                last_log_term,
            };
            async move { rsm.client.request_vote(addr, &req).await }
        }))
        .await;

        let mut granted = 1usize; // the candidate votes for itself
        let mut highest_term = term;
        for vote in votes.into_iter().flatten() {
            highest_term = highest_term.max(vote.term);
            if vote.vote_granted {
                granted += 1;
            }
        }
        let majority = (peers.len() + 1) / 2 + 1;

        let mut state = rsm.state.lock();
        if highest_term > state.current_term {
            state.current_term = highest_term;
            state.role = Role::Follower;
            state.voted_for = None;
            drop(state);
            rsm.persist_stable(highest_term, None);
            return;
        }
        if state.role != Role::Candidate || state.current_term != term {
            // Term advanced meanwhile, e.g. a competing leader's heartbeat arrived.
            return;
        }
        if granted < majority {
            return;
        }
        state.role = Role::Leader;
        state.leader_id = Some(rsm.config.replica_id.clone());
        let last_index = rsm.log.last_index_term().0;
        state.next_index = state.peers.keys().map(|id| (id.clone(), last_index + 1)).collect();
        state.match_index = state.peers.keys().map(|id| (id.clone(), 0)).collect();
        drop(state);
        tracing::info!(term, "became leader");
        tokio::spawn(Self::leader_heartbeat_loop(rsm.clone(), term));
    }

    async fn leader_heartbeat_loop(rsm: Arc<Self>, term: u64) {
        let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        loop {
            interval.tick().await;
            {
                let state = rsm.state.lock();
                if state.role != Role::Leader || state.current_term != term {
                    return;
                }
            }
            Self::replicate_to_all(&rsm, term).await;
        }
    }

    async fn replicate_to_all(rsm: &Arc<Self>, term: u64) {
        let peers = { rsm.state.lock().peers.clone() };
        if peers.is_empty() {
            let last_index = rsm.log.last_index_term().0;
            rsm.advance_commit_index(last_index);
            return;
        }

        let leader_id = rsm.config.replica_id.clone();
        let commit_index = rsm.commit_index.load(Ordering::SeqCst);
        let results = futures::future::join_all(peers.iter().map(|(id, addr)| {
            let id = id.clone();
            let addr = addr.clone();
            let leader_id = leader_id.clone();
            async move {
                let next_index = { rsm.state.lock().next_index.get(&id).copied().unwrap_or(1) };
                let prev_log_index = next_index.saturating_sub(1);
                let prev_log_term = rsm.log.term_at(prev_log_index).unwrap_or(0);
                let entries = rsm.log.entries_from(next_index);
                let req = AppendEntriesRequest {
                    term,
                    leader_id,
                    prev_log_index,
                    prev_log_term,
                    entries,
                    leader_commit: commit_index,
                };
                (id, rsm.client.append_entries(&addr, &req).await)
            }
        }))
        .await;

        let mut highest_term = term;
        {
            let mut state = rsm.state.lock();
            for (id, result) in results {
                match result {
                    Ok(resp) => {
                        highest_term = highest_term.max(resp.term);
                        if resp.success {
                            state.next_index.insert(id.clone(), resp.match_index + 1);
                            state.match_index.insert(id.clone(), resp.match_index);
                        } else if resp.term <= term {
                            let next = state.next_index.entry(id.clone()).or_insert(1);
                            *next = next.saturating_sub(1).max(1);
                        }
                    },
                    Err(e) => {
                        tracing::debug!(replica = %id, error = %e, "append_entries failed");
                    },
                }
            }
            if highest_term > state.current_term {
                state.current_term = highest_term;
                state.role = Role::Follower;
                state.voted_for = None;
                drop(state);
                rsm.persist_stable(highest_term, None);
                return;
            }
        }

        let committed_candidate = {
            let state = rsm.state.lock();
            let mut indices: Vec<u64> = state.match_index.values().copied().collect();
            indices.push(rsm.log.last_index_term().0);
            indices.sort_unstable_by(|a, b| b.cmp(a));
            let majority = (state.peers.len() + 1) / 2 + 1;
            indices.get(majority - 1).copied().unwrap_or(0)
        };
        // Only commit entries from the current term directly (Raft safety rule);
        // earlier-term entries commit transitively once a later entry does.
        if rsm.log.term_at(committed_candidate) == Some(term) {
            rsm.advance_commit_index(committed_candidate);
        }
    }

    fn advance_commit_index(&self, index: u64) {
        let prev = self.commit_index.fetch_max(index, Ordering::SeqCst);
        if index > prev {
            self.apply_notify.notify_one();
        }
    }

    pub fn handle_request_vote(&self, req: RequestVoteRequest) -> RequestVoteResponse {
        let mut state = self.state.lock();
        if req.term < state.current_term {
            return RequestVoteResponse {
                term: state.current_term,
                vote_granted: false,
            };
        }
        if req.term > state.current_term {
            state.current_term = req.term;
            state.role = Role::Follower;
            state.voted_for = None;
            state.leader_id = None;
        }
        let (last_log_index, last_log_term) = self.log.last_index_term();
        let log_ok = req.last_log_term > last_log_term
            || (req.last_log_term == last_log_term && req.last_log_index >= last_log_index);
        let can_vote = state.voted_for.is_none() || state.voted_for.as_deref() == Some(req.candidate_id.as_str());
        let grant = log_ok && can_vote;
        if grant {
            state.voted_for = Some(req.candidate_id.clone());
            state.last_heartbeat = Instant::now();
        }
        let term = state.current_term;
        let voted_for = state.voted_for.clone();
        drop(state);
        self.persist_stable(term, voted_for);
        RequestVoteResponse {
            term,
            vote_granted: grant,
        }
    }

    pub fn handle_append_entries(&self, req: AppendEntriesRequest) -> AppendEntriesResponse {
        let (term, term_changed) = {
            let mut state = self.state.lock();
            if req.term < state.current_term {
                return AppendEntriesResponse {
                    term: state.current_term,
                    success: false,
                    match_index: 0,
                };
            }
            let term_changed = req.term != state.current_term;
            state.current_term = req.term;
            state.role = Role::Follower;
            state.leader_id = Some(req.leader_id.clone());
            state.last_heartbeat = Instant::now();
            if term_changed {
                state.voted_for = None;
            }
            (state.current_term, term_changed)
        };
        if term_changed {
            self.persist_stable(term, None);
        }

        if !self.log.has_entry_matching(req.prev_log_index, req.prev_log_term) {
            return AppendEntriesResponse {
                term,
                success: false,
                match_index: 0,
            };
        }
        self.log.merge_replicated(req.prev_log_index, &req.entries);
        let last_new_index = req.prev_log_index + req.entries.len() as u64;
        if req.leader_commit > self.commit_index.load(Ordering::SeqCst) {
            self.advance_commit_index(req.leader_commit.min(last_new_index));
        }
        AppendEntriesResponse {
            term,
            success: true,
            match_index: last_new_index,
        }
    }

    /// The writer contract of §4.3: pre-validate, submit to the leader
    /// (forwarding if necessary), await replication and apply.
    pub async fn apply_update(rsm: &Arc<Self>, op: UpdateOp) -> anyhow::Result<()> {
        op.validate()?;
        Self::submit_command(rsm, LogCommand::Update(op)).await
    }

    /// Leader-only; submits a membership change through the same log as
    /// ordinary writes (§4.3 cluster membership).
    pub async fn add_replica(rsm: &Arc<Self>, replica_id: String, addr: String) -> anyhow::Result<()> {
        Self::submit_command(rsm, LogCommand::AddReplica { replica_id, addr }).await
    }

    pub async fn remove_replica(rsm: &Arc<Self>, replica_id: String) -> anyhow::Result<()> {
        Self::submit_command(rsm, LogCommand::RemoveReplica { replica_id }).await
    }

    async fn submit_command(rsm: &Arc<Self>, command: LogCommand) -> anyhow::Result<()> {
        let (role, term, leader_addr) = {
            let state = rsm.state.lock();
            let leader_addr = state.leader_id.as_ref().and_then(|id| {
                if *id == rsm.config.replica_id {
                    None
                } else {
                    state.peers.get(id).cloned()
                }
            });
            (state.role, state.current_term, leader_addr)
        };

        if role != Role::Leader {
            let Some(leader_addr) = leader_addr else {
                anyhow::bail!(ErrorMetadata::unavailable(
                    "NoLeader",
                    "no leader is currently known; retry",
                ));
            };
            let resp = rsm
                .client
                .forward_submit(&leader_addr, command)
                .await
                .map_err(|e| {
                    anyhow::anyhow!(ErrorMetadata::unavailable(
                        "LeaderUnreachable",
                        format!("failed to forward write to leader: {e}"),
                    ))
                })?;
            return if resp.ok {
                Ok(())
            } else {
                Err(anyhow::anyhow!(ErrorMetadata::internal(
                    resp.error.unwrap_or_default()
                )))
            };
        }

        let index = rsm.log.append(term, command);
        let rx = {
            let (tx, rx) = oneshot::channel();
            rsm.waiters.lock().insert(index, tx);
            rx
        };
        Self::replicate_to_all(rsm, term).await;

        match tokio::time::timeout(APPLY_TIMEOUT, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(anyhow::anyhow!(ErrorMetadata::internal("apply waiter dropped before completion"))),
            Err(_) => {
                rsm.waiters.lock().remove(&index);
                Err(anyhow::anyhow!(ErrorMetadata::unavailable(
                    "ApplyTimeout",
                    "write did not commit within the timeout; it may still apply later",
                )))
            },
        }
    }

    async fn apply_loop(rsm: Arc<Self>) {
        loop {
            rsm.apply_notify.notified().await;
            loop {
                let last_applied = rsm.last_applied.load(Ordering::SeqCst);
                let commit_index = rsm.commit_index.load(Ordering::SeqCst);
                if last_applied >= commit_index {
                    break;
                }
                let next = last_applied + 1;
                let Some(entry) = rsm.log.get(next) else {
                    break;
                };
                Self::apply_entry(&rsm, entry).await;
                rsm.last_applied.store(next, Ordering::SeqCst);
                let lag = rsm.commit_index.load(Ordering::SeqCst).saturating_sub(next);
                metrics::REPLICATION_LAG_ENTRIES.set(lag as i64);
            }
        }
    }

    async fn apply_entry(rsm: &Arc<Self>, entry: LogEntry) {
        // Single-threaded by construction: this is the only place that calls
        // apply, and it runs to completion before the next iteration (§3.2
        // invariant 1, §8 at-most-one-writer property).
        let prev = rsm.apply_in_flight.fetch_add(1, Ordering::SeqCst);
        debug_assert_eq!(prev, 0, "at-most-one-writer invariant violated");
        metrics::APPLY_IN_FLIGHT.set(1);
        let timer = metrics::Timer::new(&metrics::APPLY_DURATION_SECONDS);
        let result = rsm.apply_command(&entry.command);
        timer.finish();
        metrics::APPLY_IN_FLIGHT.set(0);
        rsm.apply_in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Err(ref e) = result {
            // Engine errors are a deterministic function of (state, op) for
            // the reference engine, so every replica observes the same
            // failure here and stays convergent; an engine whose failures
            // can be non-deterministic would need to classify this branch
            // and transition to Fatal instead (§4.3, §7).
            tracing::error!(index = entry.index, error = %e, "apply failed");
        }

        // A newly added replica needs the data the log alone doesn't carry
        // (everything committed before it joined); the leader pushes it a
        // snapshot directly rather than leaving it to catch up only via the
        // next periodic snapshot landing on a store it happens to share
        // (§4.3 cluster membership).
        if result.is_ok() {
            if let LogCommand::AddReplica { replica_id, addr } = &entry.command {
                if rsm.is_leader() {
                    tokio::spawn(Self::push_snapshot_to(rsm.clone(), replica_id.clone(), addr.clone()));
                }
            }
        }

        if let Some(sender) = rsm.waiters.lock().remove(&entry.index) {
            let _ = sender.send(result);
        }
    }

    fn apply_command(&self, command: &LogCommand) -> anyhow::Result<()> {
        match command {
            LogCommand::Update(op) => self.apply_update_to_facade(op),
            LogCommand::AddReplica { replica_id, addr } => {
                self.state.lock().peers.insert(replica_id.clone(), addr.clone());
                Ok(())
            },
            LogCommand::RemoveReplica { replica_id } => {
                self.state.lock().peers.remove(replica_id);
                Ok(())
            },
        }
    }

    /// Periodically takes a local point-in-time snapshot and records it as
    /// the replica's restore descriptor, releasing the previous one (§4.3).
    async fn snapshot_loop(rsm: Arc<Self>) {
        let mut interval = tokio::time::interval(SNAPSHOT_INTERVAL);
        interval.tick().await; // first tick fires immediately; skip it
        loop {
            interval.tick().await;
            if let Err(e) = rsm.take_local_snapshot() {
                tracing::warn!(error = %e, "periodic snapshot failed");
            }
        }
    }

    fn take_local_snapshot(&self) -> anyhow::Result<()> {
        let handle = snapshot::take(&self.facade, &self.config.snapshot_store)?;
        handle.persist()?;
        tracing::debug!(path = %handle.path.display(), "took periodic snapshot");
        if let Some(previous) = self.last_local_snapshot.lock().replace(handle) {
            if let Err(e) = previous.release() {
                tracing::warn!(error = %e, "failed to release superseded snapshot");
            }
        }
        Ok(())
    }

    /// Packages the leader's current state and pushes it to a replica that
    /// was just added to the cluster, so it can serve queries without
    /// waiting on the log alone to replay history it never saw (§4.3).
    async fn push_snapshot_to(rsm: Arc<Self>, replica_id: String, addr: String) {
        let handle = match snapshot::take(&rsm.facade, &rsm.config.snapshot_store) {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(replica = %replica_id, error = %e, "failed to take snapshot for new replica");
                return;
            },
        };
        let payload = match snapshot::package(&handle.path) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(replica = %replica_id, error = %e, "failed to package snapshot for new replica");
                let _ = handle.release();
                return;
            },
        };
        let term = rsm.state.lock().current_term;
        let req = InstallSnapshotRequest {
            term,
            leader_id: rsm.config.replica_id.clone(),
            payload,
        };
        match rsm.client.install_snapshot(&addr, &req).await {
            Ok(InstallSnapshotResponse { success: true, .. }) => {
                tracing::info!(replica = %replica_id, "pushed snapshot to new replica");
            },
            Ok(resp) => {
                tracing::warn!(replica = %replica_id, term = resp.term, "new replica rejected pushed snapshot");
            },
            Err(e) => {
                tracing::warn!(replica = %replica_id, error = %e, "failed to push snapshot to new replica");
            },
        }
        let _ = handle.release();
    }

    fn apply_update_to_facade(&self, op: &UpdateOp) -> anyhow::Result<()> {
        match op {
            UpdateOp::Insert {
                document,
                doc_id,
                chunks,
                metadata,
                version,
            } => self.facade.insert(document, doc_id, chunks, metadata, *version),
            UpdateOp::Delete {
                doc_id,
                keep_latest_version,
            } => self.facade.delete(doc_id, *keep_latest_version),
            UpdateOp::Upvote { query, label } => {
                self.facade.finetune(std::slice::from_ref(query), std::slice::from_ref(label))
            },
            UpdateOp::Associate {
                source,
                target,
                strength,
            } => self
                .facade
                .associate(std::slice::from_ref(source), std::slice::from_ref(target), *strength),
        }
    }

    pub fn facade(&self) -> &IndexFacade<E> {
        &self.facade
    }

    pub fn snapshot_store(&self) -> &std::path::Path {
        &self.config.snapshot_store
    }
}

async fn handle_request_vote<E: IndexEngine + 'static>(
    State(rsm): State<Arc<Rsm<E>>>,
    Json(req): Json<RequestVoteRequest>,
) -> Json<RequestVoteResponse> {
    Json(rsm.handle_request_vote(req))
}

async fn handle_append_entries<E: IndexEngine + 'static>(
    State(rsm): State<Arc<Rsm<E>>>,
    Json(req): Json<AppendEntriesRequest>,
) -> Json<AppendEntriesResponse> {
    Json(rsm.handle_append_entries(req))
}

async fn handle_submit<E: IndexEngine + 'static>(
    State(rsm): State<Arc<Rsm<E>>>,
    Json(req): Json<SubmitRequest>,
) -> Json<SubmitResponse> {
    match Rsm::submit_command(&rsm, req.command).await {
        Ok(()) => Json(SubmitResponse { ok: true, error: None }),
        Err(e) => Json(SubmitResponse {
            ok: false,
            error: Some(e.to_string()),
        }),
    }
}

async fn handle_install_snapshot<E: IndexEngine + 'static>(
    State(rsm): State<Arc<Rsm<E>>>,
    Json(req): Json<InstallSnapshotRequest>,
) -> Json<InstallSnapshotResponse> {
    {
        let mut state = rsm.state.lock();
        if req.term > state.current_term {
            state.current_term = req.term;
            state.role = Role::Follower;
            state.voted_for = None;
            state.leader_id = Some(req.leader_id.clone());
        }
    }
    let success = match snapshot::install(&rsm.facade, &rsm.config.snapshot_store, &req.payload) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "failed to install pushed snapshot");
            false
        },
    };
    let term = rsm.state.lock().current_term;
    Json(InstallSnapshotResponse { term, success })
}

#[cfg(test)]
mod tests {
    use index_facade::NaiveEngine;

    use super::*;

    fn rsm_for_test(dir: &std::path::Path) -> Arc<Rsm<NaiveEngine>> {
        let config = ReplicaConfig::new_for_test("r1", dir);
        let facade = IndexFacade::open(dir.join("index")).unwrap();
        Rsm::new(config, facade)
    }

    #[tokio::test]
    async fn single_node_bootstrap_applies_writes() {
        let dir = tempfile::tempdir().unwrap();
        let rsm = rsm_for_test(dir.path());
        Rsm::spawn(&rsm);
        // Single-replica cluster with no peers: the bootstrap election is
        // uncontested, so give it a moment to complete.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rsm.is_leader());

        Rsm::apply_update(
            &rsm,
            UpdateOp::Insert {
                document: "a.pdf".to_string(),
                doc_id: "d1".to_string(),
                chunks: vec!["the cat sat".to_string()],
                metadata: vec![],
                version: None,
            },
        )
        .await
        .unwrap();

        let sources = rsm.facade().sources().unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].doc_id, "d1");
    }

    #[tokio::test]
    async fn non_leader_without_known_leader_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ReplicaConfig::new_for_test("r2", dir.path());
        config.bootstrap = false;
        let facade = IndexFacade::open(dir.path().join("index")).unwrap();
        let rsm = Rsm::new(config, facade);
        Rsm::spawn(&rsm);

        let err = Rsm::apply_update(
            &rsm,
            UpdateOp::Delete {
                doc_id: "d1".to_string(),
                keep_latest_version: false,
            },
        )
        .await
        .unwrap_err();
        assert_eq!(
            err.downcast_ref::<ErrorMetadata>().unwrap().code,
            errors::ErrorCode::Unavailable
        );
    }
}
