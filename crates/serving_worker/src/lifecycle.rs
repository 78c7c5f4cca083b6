//! Process boot and graceful shutdown (§4.8). Each boot step either
//! succeeds or the process exits non-zero; there is no partial-boot retry.
use std::{
    sync::Arc,
    time::Duration,
};

use auth_gate::{
    AuthGate,
    ControlPlaneClient,
};
use index_facade::{
    IndexFacade,
    NaiveEngine,
};
use replication::{
    ReplicaConfig,
    Rsm,
};
use response_cache::ResponseCache;
use status_reporter::{
    Status,
    StatusReporter,
};
use tokio::signal;

use crate::{
    config::Config,
    llm::HttpLlmProvider,
    router,
    state::AppState,
};

/// Time to let in-flight requests drain after a shutdown signal before the
/// process exits anyway (§4.8 step 8).
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

pub async fn run(config: Config) -> anyhow::Result<()> {
    let reporter = Arc::new(StatusReporter::new(
        config.model_bazaar_url.clone(),
        config.model_id.clone(),
        config.job_token.clone(),
    ));
    reporter.report(Status::Starting).await;

    match boot(config, reporter.clone()).await {
        Ok(()) => Ok(()),
        Err(e) => {
            reporter.report(Status::Failed).await;
            Err(e)
        },
    }
}

async fn boot(config: Config, reporter: Arc<StatusReporter>) -> anyhow::Result<()> {
    reporter.report(Status::InProgress).await;

    // Step: open the index and, if configured, the response cache.
    let facade: IndexFacade<NaiveEngine> = IndexFacade::open(config.index_path())?;

    let response_cache = if config.response_cache_enabled {
        Some(Arc::new(ResponseCache::open(config.cache_path())?))
    } else {
        None
    };

    // Step: join or bootstrap the replicated index state machine.
    let replica_config = ReplicaConfig {
        replica_id: config.replica_id.clone(),
        bind_addr: format!("0.0.0.0:{}", config.port),
        bootstrap: config.bootstrap,
        peers: config.parsed_peers(),
        snapshot_store: config.snapshot_store(),
        log_store: config.snapshot_store().join("log.json"),
        stable_store: config.stable_store(),
    };
    let rsm = Rsm::new(replica_config, facade);
    Rsm::spawn(&rsm);

    let auth_gate = Arc::new(AuthGate::new(ControlPlaneClient::new(config.model_bazaar_url.clone())));
    let llm: Option<Arc<dyn crate::llm::LlmProvider>> = config
        .llm_provider_url
        .clone()
        .map(|url| Arc::new(HttpLlmProvider::new(url)) as Arc<dyn crate::llm::LlmProvider>);

    let state = Arc::new(AppState {
        config: config.clone(),
        rsm,
        response_cache,
        auth_gate,
        llm,
    });

    let app = router::build(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    tracing::info!(port = config.port, "serving worker listening");

    // Delayed so the control plane sees "complete" only once the process has
    // had time to stay up, not immediately on listener bind (§4.7).
    reporter.clone().report_complete_after_delay();

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let serve_task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(SHUTDOWN_GRACE, serve_task).await {
        Ok(join_result) => join_result??,
        Err(_) => tracing::warn!("graceful shutdown grace period elapsed with requests still in flight"),
    }

    reporter.report(Status::Stopped).await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received, draining in-flight requests");
}
