//! Process-wide shared state (§9 Design Notes "Globals"): the single index
//! handle, the RSM, and the auth cache, all initialized by the lifecycle
//! orchestrator and handed to every request by reference.
use std::sync::Arc;

use auth_gate::AuthGate;
use index_facade::NaiveEngine;
use replication::Rsm;
use response_cache::ResponseCache;

use crate::{
    config::Config,
    llm::LlmProvider,
};

pub struct AppState {
    pub config: Config,
    pub rsm: Arc<Rsm<NaiveEngine>>,
    pub response_cache: Option<Arc<ResponseCache>>,
    pub auth_gate: Arc<AuthGate>,
    pub llm: Option<Arc<dyn LlmProvider>>,
}
