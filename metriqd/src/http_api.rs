//! HTTP API.
//!
//! Provides:
//! - `POST /update/{kind}/{name}/{value}` - path-encoded single metric
//! - `POST /update` - one JSON metric, echoes the stored value
//! - `POST /updates` - JSON batch, applied atomically
//! - `POST /value` - JSON lookup
//! - `GET /value/{kind}/{name}` - plain-text lookup
//! - `GET /ping` - storage health
//! - `GET /` - HTML table of every metric

use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{Path, Request, State},
    http::{
        HeaderValue, StatusCode,
        header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE},
    },
    middleware::{self, Next},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use metriq_common::codec::gzip;
use metriq_common::{Metric, MetricDto, MetricKind};
use metriq_storage::Repository;
use tracing::info;

use crate::error::ApiError;
use crate::ingress::{self, HASH_HEADER_NAME, Ingress};

/// Largest request body read before unframing.
pub const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Shared state for HTTP handlers.
pub struct AppState {
    pub repo: Arc<dyn Repository>,
    pub ingress: Ingress,
}

impl AppState {
    pub fn new(repo: Arc<dyn Repository>, ingress: Ingress) -> Self {
        Self { repo, ingress }
    }
}

type SharedState = Arc<AppState>;

/// Create the collector router.
pub fn create_router(state: AppState) -> Router {
    let state = Arc::new(state);
    Router::new()
        .route("/", get(index_handler))
        .route("/ping", get(ping_handler))
        .route("/update", post(update_json_handler))
        .route("/updates", post(updates_handler))
        .route("/value", post(value_json_handler))
        .route("/update/{kind}/{name}/{value}", post(update_path_handler))
        .route("/value/{kind}/{name}", get(value_path_handler))
        .layer(middleware::from_fn_with_state(state.clone(), codec_layer))
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}

/// Run a repository call on the blocking pool.
async fn with_repo<T, F>(state: &AppState, op: F) -> Result<T, ApiError>
where
    F: FnOnce(&dyn Repository) -> T + Send + 'static,
    T: Send + 'static,
{
    let repo = Arc::clone(&state.repo);
    tokio::task::spawn_blocking(move || op(repo.as_ref()))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))
}

async fn stored(state: &AppState, name: String, kind: MetricKind) -> Result<Metric, ApiError> {
    let metric = with_repo(state, move |repo| repo.metric(&name))
        .await?
        .map_err(ApiError::from_read)?;
    // a name stored under the other kind does not exist for this kind
    if metric.kind() != kind {
        return Err(ApiError::NotFound);
    }
    Ok(metric)
}

/// Handler for `POST /update/{kind}/{name}/{value}`.
async fn update_path_handler(
    State(state): State<SharedState>,
    Path((kind, name, value)): Path<(String, String, String)>,
) -> Result<String, ApiError> {
    let metric = ingress::parse_path(&kind, &name, &value)?;
    let reply = format!("updated {} {} = {}\n", metric.kind(), metric.name, metric.value);
    with_repo(&state, move |repo| repo.set_metric(metric))
        .await?
        .map_err(ApiError::from_write)?;
    Ok(reply)
}

/// Handler for `POST /update`.
async fn update_json_handler(
    State(state): State<SharedState>,
    body: Bytes,
) -> Result<Json<MetricDto>, ApiError> {
    let metric = ingress::parse_metric(&body)?;
    let (name, kind) = (metric.name.clone(), metric.kind());
    with_repo(&state, move |repo| repo.set_metric(metric))
        .await?
        .map_err(ApiError::from_write)?;
    let metric = stored(&state, name, kind).await?;
    Ok(Json(MetricDto::from(&metric)))
}

/// Handler for `POST /updates`.
async fn updates_handler(
    State(state): State<SharedState>,
    body: Bytes,
) -> Result<Json<String>, ApiError> {
    let batch = ingress::parse_batch(&body)?;
    let count = batch.len();
    with_repo(&state, move |repo| repo.set_metrics(batch))
        .await?
        .map_err(ApiError::from_write)?;
    Ok(Json(format!("{count} metrics received")))
}

/// Handler for `POST /value`.
async fn value_json_handler(
    State(state): State<SharedState>,
    body: Bytes,
) -> Result<Json<MetricDto>, ApiError> {
    let (kind, name) = ingress::parse_query(&body)?;
    let metric = stored(&state, name, kind).await?;
    Ok(Json(MetricDto::from(&metric)))
}

/// Handler for `GET /value/{kind}/{name}`.
async fn value_path_handler(
    State(state): State<SharedState>,
    Path((kind, name)): Path<(String, String)>,
) -> Result<String, ApiError> {
    let kind: MetricKind = kind.parse()?;
    let metric = stored(&state, name, kind).await?;
    Ok(metric.value.to_string())
}

/// Handler for `GET /ping`.
///
/// Returns 200 if the backend answers, 500 otherwise.
async fn ping_handler(State(state): State<SharedState>) -> Result<&'static str, ApiError> {
    with_repo(&state, |repo| repo.ping())
        .await?
        .map_err(ApiError::Unavailable)?;
    Ok("OK")
}

/// Handler for `GET /`.
async fn index_handler(State(state): State<SharedState>) -> Result<Html<String>, ApiError> {
    let metrics = with_repo(&state, |repo| repo.metrics())
        .await?
        .map_err(ApiError::Unavailable)?;
    Ok(Html(render_index(&metrics)))
}

fn render_index(metrics: &[Metric]) -> String {
    let mut rows = String::new();
    for metric in metrics {
        rows.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            escape_html(&metric.name),
            metric.kind(),
            metric.value
        ));
    }
    format!(
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>Metrics</title></head>\n<body>\n\
         <table>\n<tr><th>Name</th><th>Type</th><th>Value</th></tr>\n{rows}</table>\n</body>\n</html>\n"
    )
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

// ============================================================================
// Middleware
// ============================================================================

/// Log method, URI, status and latency of every request.
async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let started = Instant::now();

    let response = next.run(request).await;

    info!(
        %method,
        %uri,
        status = response.status().as_u16(),
        latency_ms = started.elapsed().as_secs_f64() * 1000.0,
        "HTTP request"
    );
    response
}

/// Unframe the request body, then sign and compress the response.
async fn codec_layer(State(state): State<SharedState>, request: Request, next: Next) -> Response {
    let accepts_gzip = request
        .headers()
        .get(ACCEPT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(gzip::names_gzip);

    let request = match unframe_request(&state.ingress, request).await {
        Ok(request) => request,
        Err(e) => return e.into_response(),
    };
    let response = next.run(request).await;
    match frame_response(&state.ingress, response, accepts_gzip).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn unframe_request(ingress: &Ingress, request: Request) -> Result<Request, ApiError> {
    let (mut parts, body) = request.into_parts();
    let raw = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| ApiError::Body(e.to_string()))?;
    let plain = ingress.unframe(&parts.headers, &raw)?;
    parts.headers.remove(CONTENT_ENCODING);
    parts.headers.remove(CONTENT_LENGTH);
    Ok(Request::from_parts(parts, Body::from(plain)))
}

fn content_type_is(response: &Response, prefix: &str) -> bool {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with(prefix))
}

async fn frame_response(
    ingress: &Ingress,
    response: Response,
    accepts_gzip: bool,
) -> Result<Response, ApiError> {
    let is_json = content_type_is(&response, "application/json");
    let sign = is_json && ingress.signs() && response.status().is_success();
    let compress = accepts_gzip && (is_json || content_type_is(&response, "text/html"));
    if !sign && !compress {
        return Ok(response);
    }

    let (mut parts, body) = response.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    if sign {
        if let Some(signature) = ingress.response_signature(&bytes)? {
            let value =
                HeaderValue::from_str(&signature).map_err(|e| ApiError::Internal(e.to_string()))?;
            parts.headers.insert(HASH_HEADER_NAME, value);
        }
    }

    let body = if compress {
        parts.headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        parts.headers.remove(CONTENT_LENGTH);
        Body::from(gzip::compress(&bytes)?)
    } else {
        Body::from(bytes)
    };
    Ok(Response::from_parts(parts, body))
}
