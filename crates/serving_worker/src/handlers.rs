//! The Serving Router's request handlers (§4.5). Reads dispatch to the
//! Index Facade (via the RSM's shared handle) or the Response Cache; writes
//! dispatch to the RSM.
use std::{
    collections::BTreeSet,
    sync::Arc,
};

use auth_gate::Access;
use axum::{
    extract::State,
    http::HeaderMap,
    response::{
        sse::{
            Event,
            Sse,
        },
        IntoResponse,
        Response,
    },
    Json,
};
use errors::{
    ErrorMetadata,
    ErrorMetadataAnyhowExt,
    HttpResponseError,
};
use futures::{
    stream,
    StreamExt,
};
use index_protocol::{
    Constraints,
    Metadata,
    UpdateOp,
};
use replication::Rsm;
use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    llm::{
        GenerateRequest,
        ReferenceInput,
    },
    metrics,
    state::AppState,
};

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Write-path error wrapper: an RSM apply that times out waiting for commit
/// answers 504, not the taxonomy's default 503 for `Unavailable` (§5). Every
/// other error still goes through the ordinary taxonomy mapping.
struct WriteError(anyhow::Error);

impl From<anyhow::Error> for WriteError {
    fn from(err: anyhow::Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for WriteError {
    fn into_response(self) -> Response {
        if self.0.short_msg() == "ApplyTimeout" {
            return (axum::http::StatusCode::GATEWAY_TIMEOUT, self.0.user_facing_message()).into_response();
        }
        HttpResponseError(self.0).into_response()
    }
}

/// Read-path error wrapper mirroring `WriteError`: a bad constraint op
/// answers 422, not the taxonomy's default 400 for `BadRequest` (§4.5).
struct QueryError(anyhow::Error);

impl From<anyhow::Error> for QueryError {
    fn from(err: anyhow::Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for QueryError {
    fn into_response(self) -> Response {
        if self.0.short_msg() == "UnknownConstraintOp" {
            return (axum::http::StatusCode::UNPROCESSABLE_ENTITY, self.0.user_facing_message()).into_response();
        }
        HttpResponseError(self.0).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    query: String,
    top_k: i64,
    #[serde(default)]
    constraints: Constraints,
}

#[derive(Debug, Serialize)]
pub struct ReferenceView {
    id: u64,
    text: String,
    source: String,
    score: f32,
}

#[derive(Debug, Serialize)]
pub struct QueryResponse {
    references: Vec<ReferenceView>,
}

pub async fn query(
    State(app): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, QueryError> {
    app.auth_gate
        .authorize(bearer_token(&headers), &app.config.model_id, Access::Read)
        .await?;
    index_protocol::validate_constraints(&body.constraints)?;
    let timer = metrics::Timer::new(&metrics::QUERY_DURATION_SECONDS);
    let chunks = app.rsm.facade().query(&body.query, body.top_k, &body.constraints)?;
    timer.finish();
    Ok(Json(QueryResponse {
        references: chunks
            .into_iter()
            .map(|c| ReferenceView {
                id: c.id,
                text: c.text,
                source: c.document,
                score: c.score,
            })
            .collect(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct InsertRequest {
    document: String,
    doc_id: String,
    chunks: Vec<String>,
    #[serde(default)]
    metadata: Vec<Metadata>,
    version: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct EmptyResponse {}

pub async fn insert(
    State(app): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<InsertRequest>,
) -> Result<Json<EmptyResponse>, WriteError> {
    app.auth_gate
        .authorize(bearer_token(&headers), &app.config.model_id, Access::Write)
        .await?;
    let timer = metrics::Timer::new(&metrics::WRITE_DURATION_SECONDS);
    let op = UpdateOp::Insert {
        document: body.document,
        doc_id: body.doc_id,
        chunks: body.chunks,
        metadata: body.metadata,
        version: body.version,
    };
    Rsm::apply_update(&app.rsm, op).await?;
    timer.finish();
    Ok(Json(EmptyResponse {}))
}

#[derive(Debug, Deserialize)]
pub struct DeleteRequest {
    source_ids: Vec<String>,
    keep_latest_version: bool,
}

pub async fn delete(
    State(app): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<DeleteRequest>,
) -> Result<Json<EmptyResponse>, WriteError> {
    app.auth_gate
        .authorize(bearer_token(&headers), &app.config.model_id, Access::Write)
        .await?;
    // Per-id apply; first failure aborts (§4.5).
    for doc_id in body.source_ids {
        let op = UpdateOp::Delete {
            doc_id,
            keep_latest_version: body.keep_latest_version,
        };
        Rsm::apply_update(&app.rsm, op).await?;
    }
    Ok(Json(EmptyResponse {}))
}

#[derive(Debug, Deserialize)]
pub struct TextIdPair {
    query_text: String,
    reference_id: u64,
    #[allow(dead_code)]
    reference_text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpvoteRequest {
    text_id_pairs: Vec<TextIdPair>,
}

pub async fn upvote(
    State(app): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<UpvoteRequest>,
) -> Result<Json<EmptyResponse>, WriteError> {
    app.auth_gate
        .authorize(bearer_token(&headers), &app.config.model_id, Access::Write)
        .await?;
    for pair in body.text_id_pairs {
        let op = UpdateOp::Upvote {
            query: pair.query_text,
            label: pair.reference_id,
        };
        Rsm::apply_update(&app.rsm, op).await?;
    }
    Ok(Json(EmptyResponse {}))
}

#[derive(Debug, Deserialize)]
pub struct TextPair {
    source: String,
    target: String,
}

#[derive(Debug, Deserialize)]
pub struct AssociateRequest {
    text_pairs: Vec<TextPair>,
    strength: Option<u32>,
}

pub async fn associate(
    State(app): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<AssociateRequest>,
) -> Result<Json<EmptyResponse>, WriteError> {
    app.auth_gate
        .authorize(bearer_token(&headers), &app.config.model_id, Access::Write)
        .await?;
    let strength = body.strength.unwrap_or_else(UpdateOp::default_associate_strength);
    for pair in body.text_pairs {
        let op = UpdateOp::Associate {
            source: pair.source,
            target: pair.target,
            strength,
        };
        Rsm::apply_update(&app.rsm, op).await?;
    }
    Ok(Json(EmptyResponse {}))
}

#[derive(Debug, Serialize)]
pub struct SourceView {
    source: String,
    source_id: String,
    version: u32,
}

#[derive(Debug, Serialize)]
pub struct SourcesResponse {
    sources: Vec<SourceView>,
}

pub async fn sources(
    State(app): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<SourcesResponse>, HttpResponseError> {
    app.auth_gate
        .authorize(bearer_token(&headers), &app.config.model_id, Access::Read)
        .await?;
    let docs = app.rsm.facade().sources()?;
    Ok(Json(SourcesResponse {
        sources: docs
            .into_iter()
            .map(|d| SourceView {
                source: d.document,
                source_id: d.doc_id,
                version: d.doc_version,
            })
            .collect(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct GenerateRequestBody {
    query: String,
    references: Vec<ReferenceInput>,
    prompt: Option<String>,
    provider: Option<String>,
    model: Option<String>,
}

/// Opens a streaming response; forwards each provider chunk to the client
/// and to an in-memory accumulator; on a clean end-of-stream, inserts into
/// the response cache (if enabled). Dropping the stream (client disconnect)
/// discards the accumulator without a cache insert (§4.5, §5).
pub async fn generate(
    State(app): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<GenerateRequestBody>,
) -> Result<Response, HttpResponseError> {
    app.auth_gate
        .authorize(bearer_token(&headers), &app.config.model_id, Access::Read)
        .await?;
    let Some(llm) = app.llm.clone() else {
        return Err(HttpResponseError(anyhow::anyhow!(ErrorMetadata::internal(
            "no LLM provider is configured for this model"
        ))));
    };

    let reference_ids: BTreeSet<u64> = body.references.iter().map(|r| r.id).collect();
    let request = GenerateRequest {
        query: body.query.clone(),
        references: body.references,
        prompt: body.prompt,
        provider: body.provider,
        model: body.model,
    };
    let token_stream = llm.stream(request).await?;

    let cache = app.response_cache.clone();
    let query = body.query;

    enum Stage {
        Streaming(futures::stream::BoxStream<'static, anyhow::Result<String>>, String),
        Done,
    }

    let sse_stream = stream::unfold(Stage::Streaming(token_stream, String::new()), move |stage| {
        let cache = cache.clone();
        let query = query.clone();
        let reference_ids = reference_ids.clone();
        async move {
            match stage {
                Stage::Streaming(mut token_stream, mut accumulated) => match token_stream.next().await {
                    Some(Ok(token)) => {
                        accumulated.push_str(&token);
                        let event = Event::default().data(token);
                        Some((
                            Ok::<_, std::convert::Infallible>(event),
                            Stage::Streaming(token_stream, accumulated),
                        ))
                    },
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "generation stream error");
                        let event = Event::default().event("error").data(e.to_string());
                        Some((Ok(event), Stage::Done))
                    },
                    None => {
                        if let Some(cache) = cache {
                            if let Err(e) = cache.insert(&query, &accumulated, &reference_ids) {
                                tracing::warn!(error = %e, "failed to insert generation into response cache");
                            }
                        }
                        let event = Event::default().event("done").data("");
                        Some((Ok(event), Stage::Done))
                    },
                },
                Stage::Done => None,
            }
        }
    });

    Ok(Sse::new(sse_stream).into_response())
}

#[derive(Debug, Deserialize)]
pub struct CacheSuggestionsRequest {
    query: String,
}

#[derive(Debug, Serialize)]
pub struct CacheSuggestionsResponse {
    suggestions: Vec<String>,
}

pub async fn cache_suggestions(
    State(app): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CacheSuggestionsRequest>,
) -> Result<Json<CacheSuggestionsResponse>, HttpResponseError> {
    app.auth_gate
        .authorize(bearer_token(&headers), &app.config.model_id, Access::Read)
        .await?;
    let Some(cache) = &app.response_cache else {
        return Err(HttpResponseError(anyhow::anyhow!(ErrorMetadata::internal(
            "response cache is not enabled for this model"
        ))));
    };
    let suggestions = cache.suggestions(&body.query)?;
    Ok(Json(CacheSuggestionsResponse { suggestions }))
}

#[derive(Debug, Deserialize)]
pub struct GenerationCacheRequest {
    query: String,
    reference_ids: Vec<u64>,
}

#[derive(Debug, Serialize)]
pub struct GenerationCacheResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    result: String,
}

pub async fn generation_cache(
    State(app): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<GenerationCacheRequest>,
) -> Result<Json<GenerationCacheResponse>, HttpResponseError> {
    app.auth_gate
        .authorize(bearer_token(&headers), &app.config.model_id, Access::Read)
        .await?;
    let Some(cache) = &app.response_cache else {
        return Err(HttpResponseError(anyhow::anyhow!(ErrorMetadata::internal(
            "response cache is not enabled for this model"
        ))));
    };
    let reference_ids: BTreeSet<u64> = body.reference_ids.into_iter().collect();
    match cache.lookup(&body.query, &reference_ids)? {
        Some(result) => {
            metrics::CACHE_HIT_TOTAL.inc();
            Ok(Json(GenerationCacheResponse { message: None, result }))
        },
        None => {
            metrics::CACHE_MISS_TOTAL.inc();
            Ok(Json(GenerationCacheResponse {
                message: Some("No cached result found".to_string()),
                result: String::new(),
            }))
        },
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    ok: bool,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { ok: true })
}

pub async fn metrics_export() -> Result<String, HttpResponseError> {
    Ok(::metrics::export_text()?)
}
