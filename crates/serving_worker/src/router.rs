//! Assembles the public HTTP surface (§4.5 route table) on top of the
//! consensus routes the RSM mounts itself.
use std::sync::Arc;

use axum::{
    routing::{
        get,
        post,
    },
    Router,
};
use index_facade::NaiveEngine;
use tower_http::trace::TraceLayer;

use crate::{
    handlers,
    state::AppState,
};

pub fn build(state: Arc<AppState>) -> Router {
    let rsm_routes = replication::Rsm::<NaiveEngine>::routes(state.rsm.clone());

    let app_routes = Router::new()
        .route("/query", post(handlers::query))
        .route("/insert", post(handlers::insert))
        .route("/delete", post(handlers::delete))
        .route("/upvote", post(handlers::upvote))
        .route("/associate", post(handlers::associate))
        .route("/sources", get(handlers::sources))
        .route("/generate", post(handlers::generate))
        .route("/cache-suggestions", post(handlers::cache_suggestions))
        .route("/generation-cache", post(handlers::generation_cache))
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics_export))
        .with_state(state);

    app_routes.merge(rsm_routes).layer(TraceLayer::new_for_http())
}
