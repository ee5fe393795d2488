use crate::{FilterConfig, GlossaryError, GlossaryStore, MatcherCache, TermMapProvider};
use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::compression::CompressionLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{info, warn};

type SharedState = Arc<AppState>;
const MAX_TERMS_LIMIT: usize = 500;

pub struct AppState {
    pub filters: MatcherCache<GlossaryStore>,
    pub default_langcode: String,
}

impl AppState {
    fn langcode<'a>(&'a self, requested: Option<&'a str>) -> &'a str {
        requested
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .unwrap_or(&self.default_langcode)
    }
}

#[derive(Clone)]
pub struct WebConfig {
    pub addr: SocketAddr,
    pub default_langcode: String,
    pub cache_capacity: NonZeroUsize,
    pub filter: FilterConfig,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            default_langcode: "en".to_string(),
            cache_capacity: NonZeroUsize::new(crate::DEFAULT_CACHE_CAPACITY)
                .unwrap_or(NonZeroUsize::MIN),
            filter: FilterConfig::default(),
        }
    }
}

/// Binds `config.addr` and serves until ctrl-c or SIGTERM. Bind and accept
/// failures surface as [`GlossaryError::Io`].
pub async fn serve(store: GlossaryStore, config: WebConfig) -> Result<(), GlossaryError> {
    let terms = store.records().len();
    let state = Arc::new(AppState {
        filters: MatcherCache::new(store, config.filter.clone(), config.cache_capacity),
        default_langcode: config.default_langcode.clone(),
    });
    let router = build_router(state);
    info!(
        %config.addr,
        langcode = %config.default_langcode,
        terms,
        "Binding HTTP listener"
    );
    let listener = TcpListener::bind(config.addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("HTTP server exited");
    Ok(())
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<GlossaryError> for ApiError {
    fn from(value: GlossaryError) -> Self {
        warn!(error = %value, "glossary request failed");
        ApiError::internal(value.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let payload = json!({ "error": self.message });
        (self.status, Json(payload)).into_response()
    }
}

fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/api/annotate", post(api_annotate))
        .route("/api/terms", get(api_terms))
        .route("/api/invalidate", post(api_invalidate))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(true))
                .on_response(DefaultOnResponse::new().include_headers(true)),
        )
        .layer(CompressionLayer::new())
}

async fn shutdown_signal() {
    let interrupt = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "ctrl-c handler unavailable");
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let reason = tokio::select! {
        _ = interrupt => "interrupt",
        _ = terminate => "terminate",
    };
    info!(reason, "shutting down glossary server");
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "service": "glossary-tooltip" }))
}

#[derive(Debug, Deserialize)]
struct AnnotateRequest {
    html: String,
    langcode: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct AnnotateResponse {
    html: String,
    langcode: String,
    used_term_ids: Vec<u32>,
    cache_tags: Vec<String>,
    attachments: Vec<String>,
}

async fn api_annotate(
    State(state): State<SharedState>,
    Json(request): Json<AnnotateRequest>,
) -> Result<Json<AnnotateResponse>, ApiError> {
    let langcode = state.langcode(request.langcode.as_deref()).to_string();
    let output = state.filters.process(&request.html, &langcode)?;
    Ok(Json(AnnotateResponse {
        cache_tags: output.cache_tags(),
        used_term_ids: output.used_term_ids.into_iter().collect(),
        html: output.html,
        attachments: output.attachments,
        langcode,
    }))
}

#[derive(Debug, Deserialize)]
struct TermsParams {
    langcode: Option<String>,
    prefix: Option<String>,
    limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TermHitPayload {
    key: String,
    label: String,
    tid: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct TermsResponsePayload {
    langcode: String,
    prefix: String,
    total: usize,
    results: Vec<TermHitPayload>,
}

async fn api_terms(
    State(state): State<SharedState>,
    Query(params): Query<TermsParams>,
) -> Result<Json<TermsResponsePayload>, ApiError> {
    let langcode = state.langcode(params.langcode.as_deref()).to_string();
    let limit = params.limit.unwrap_or(50).clamp(1, MAX_TERMS_LIMIT);
    let prefix = params.prefix.unwrap_or_default();
    let dictionary = state.filters.provider().term_map(&langcode)?;
    let results = dictionary
        .prefix(&prefix, limit)
        .into_iter()
        .map(|entry| TermHitPayload {
            key: entry.key.clone(),
            label: entry.label.clone(),
            tid: entry.tid,
        })
        .collect();
    Ok(Json(TermsResponsePayload {
        total: dictionary.len(),
        langcode,
        prefix,
        results,
    }))
}

#[derive(Debug, Deserialize)]
struct InvalidateRequest {
    tid: Option<u32>,
}

async fn api_invalidate(
    State(state): State<SharedState>,
    Json(request): Json<InvalidateRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let tid = request
        .tid
        .ok_or_else(|| ApiError::bad_request("Field `tid` is required"))?;
    let evicted = state.filters.invalidate_term(tid);
    Ok(Json(json!({ "tid": tid, "evicted": evicted })))
}
