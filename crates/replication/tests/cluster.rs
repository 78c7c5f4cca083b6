//! Multi-replica integration tests (§8 scenarios 5 and 6): convergence
//! across a real cluster of RSM instances talking over actual HTTP, rather
//! than the single-node and no-leader cases covered by `node.rs`'s own
//! unit tests.
use std::{
    collections::BTreeMap,
    sync::Arc,
    time::Duration,
};

use index_facade::{
    IndexFacade,
    NaiveEngine,
};
use index_protocol::UpdateOp;
use replication::{
    ReplicaConfig,
    Rsm,
};

/// Binds a listener, builds an `Rsm` over it, and serves its routes in the
/// background. Returns the handle and the address peers reach it at.
async fn spawn_replica(
    replica_id: &str,
    dir: &std::path::Path,
    bootstrap: bool,
    peers: BTreeMap<String, String>,
) -> (Arc<Rsm<NaiveEngine>>, String) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = format!("http://{}", listener.local_addr().unwrap());
    let rsm = spawn_replica_on(listener, replica_id, &addr, dir, bootstrap, peers).await;
    (rsm, addr)
}

/// Same as `spawn_replica` but over a listener whose address the caller
/// already needed to know (building peer maps before any replica starts).
async fn spawn_replica_on(
    listener: tokio::net::TcpListener,
    replica_id: &str,
    addr: &str,
    dir: &std::path::Path,
    bootstrap: bool,
    peers: BTreeMap<String, String>,
) -> Arc<Rsm<NaiveEngine>> {
    let config = ReplicaConfig {
        replica_id: replica_id.to_string(),
        bind_addr: addr.to_string(),
        bootstrap,
        peers,
        snapshot_store: dir.join("snapshots"),
        log_store: dir.join("log.json"),
        stable_store: dir.join("stable"),
    };
    let facade: IndexFacade<NaiveEngine> = IndexFacade::open(dir.join("index")).unwrap();
    let rsm = Rsm::new(config, facade);
    Rsm::spawn(&rsm);

    let app = Rsm::routes(rsm.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    rsm
}

async fn wait_for_leader(replicas: &[Arc<Rsm<NaiveEngine>>]) {
    for _ in 0..100 {
        if replicas.iter().any(|r| r.is_leader()) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("no leader elected within timeout");
}

#[tokio::test]
async fn three_replica_cluster_converges_on_writes() {
    let root = tempfile::tempdir().unwrap();

    let listener_a = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let listener_b = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let listener_c = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr_a = format!("http://{}", listener_a.local_addr().unwrap());
    let addr_b = format!("http://{}", listener_b.local_addr().unwrap());
    let addr_c = format!("http://{}", listener_c.local_addr().unwrap());

    let mut peers_a = BTreeMap::new();
    peers_a.insert("b".to_string(), addr_b.clone());
    peers_a.insert("c".to_string(), addr_c.clone());
    let mut peers_b = BTreeMap::new();
    peers_b.insert("a".to_string(), addr_a.clone());
    peers_b.insert("c".to_string(), addr_c.clone());
    let mut peers_c = BTreeMap::new();
    peers_c.insert("a".to_string(), addr_a.clone());
    peers_c.insert("b".to_string(), addr_b.clone());

    let rsm_a = spawn_replica_on(listener_a, "a", &addr_a, &root.path().join("a"), true, peers_a).await;
    let rsm_b = spawn_replica_on(listener_b, "b", &addr_b, &root.path().join("b"), false, peers_b).await;
    let rsm_c = spawn_replica_on(listener_c, "c", &addr_c, &root.path().join("c"), false, peers_c).await;
    let replicas = [rsm_a.clone(), rsm_b.clone(), rsm_c.clone()];

    wait_for_leader(&replicas).await;

    // Issue the write against a replica picked without knowing which one is
    // leader; a non-leader forwards it (§4.3 writer contract step 2).
    Rsm::apply_update(
        &rsm_b,
        UpdateOp::Insert {
            document: "a.pdf".to_string(),
            doc_id: "d1".to_string(),
            chunks: vec!["the cat sat on the mat".to_string()],
            metadata: vec![],
            version: None,
        },
    )
    .await
    .unwrap();

    // Give replication/apply a moment to reach the followers.
    for _ in 0..100 {
        if replicas.iter().all(|r| r.facade().sources().unwrap().len() == 1) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    for rsm in &replicas {
        let sources = rsm.facade().sources().unwrap();
        assert_eq!(sources.len(), 1, "replica did not converge");
        assert_eq!(sources[0].doc_id, "d1");
    }
}

#[tokio::test]
async fn new_replica_catches_up_via_pushed_snapshot() {
    let root = tempfile::tempdir().unwrap();

    let (leader, leader_addr) = spawn_replica("leader", &root.path().join("leader"), true, BTreeMap::new()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(leader.is_leader());

    Rsm::apply_update(
        &leader,
        UpdateOp::Insert {
            document: "a.pdf".to_string(),
            doc_id: "d1".to_string(),
            chunks: vec!["the cat sat on the mat".to_string()],
            metadata: vec![],
            version: None,
        },
    )
    .await
    .unwrap();

    // The new replica boots with empty local state and no knowledge of the
    // leader's pre-existing history via the log alone.
    let mut new_peers = BTreeMap::new();
    new_peers.insert("leader".to_string(), leader_addr.clone());
    let (joiner, joiner_addr) = spawn_replica("joiner", &root.path().join("joiner"), false, new_peers).await;
    assert_eq!(joiner.facade().sources().unwrap().len(), 0);

    Rsm::add_replica(&leader, "joiner".to_string(), joiner_addr).await.unwrap();

    for _ in 0..100 {
        if !joiner.facade().sources().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let sources = joiner.facade().sources().unwrap();
    assert_eq!(sources.len(), 1, "joiner did not receive pushed snapshot");
    assert_eq!(sources[0].doc_id, "d1");
}
