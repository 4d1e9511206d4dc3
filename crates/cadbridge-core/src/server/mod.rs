//! HTTP glue: every request goes to the bridge router.
//!
//! axum only does transport here. A single fallback handler decodes the
//! body, merges query parameters and hands the request to `Router::route` on
//! the blocking pool, so route handlers may take locks and do synchronous
//! work without stalling the async workers.

mod system_routes;

pub use system_routes::{HealthReport, HealthStatus, health_report, register_system_routes};

use axum::Json;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::{Method, StatusCode, Uri};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{Instrument, error, info, info_span};

use crate::config::ServerConfig;
use crate::domain::{ApiResponse, ErrorResponse, RequestData};
use crate::error::BridgeError;
use crate::ports::{IdGenerator, SystemClock, UlidGenerator};
use crate::router::Router;

const MAX_BODY_SIZE_10MB: usize = 10 * 1024 * 1024;

#[derive(Clone)]
struct HttpState {
    router: Arc<Router>,
    ids: Arc<dyn IdGenerator>,
}

pub fn build_app(router: Arc<Router>) -> axum::Router {
    let state = HttpState {
        router,
        ids: Arc::new(UlidGenerator::new(SystemClock)),
    };
    axum::Router::new()
        .fallback(dispatch)
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE_10MB))
        .with_state(state)
}

/// Bind `config.host:config.port` and serve until `shutdown` flips to true.
pub async fn serve(
    config: &ServerConfig,
    app: axum::Router,
    shutdown: watch::Receiver<bool>,
) -> Result<(), BridgeError> {
    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    serve_on(listener, app, shutdown).await
}

pub async fn serve_on(
    listener: TcpListener,
    app: axum::Router,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), BridgeError> {
    info!(addr = %listener.local_addr()?, "http server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow_and_update() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await?;
    info!("http server stopped");
    Ok(())
}

async fn dispatch(
    State(state): State<HttpState>,
    method: Method,
    uri: Uri,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> (StatusCode, Json<ApiResponse>) {
    let request_id = state.ids.generate_request_id();
    let path = uri.path().to_string();
    let span = info_span!("request", %request_id, %method, path = %path);

    let response = match decode_body(&body) {
        Ok(mut data) => {
            for (key, value) in query {
                data.entry(key).or_insert(Value::String(value));
            }
            let router = Arc::clone(&state.router);
            let blocking_span = span.clone();
            let routed = tokio::task::spawn_blocking(move || {
                blocking_span.in_scope(|| router.route(&path, method.as_str(), data))
            })
            .instrument(span.clone())
            .await;
            match routed {
                Ok(response) => response,
                Err(join_error) => {
                    span.in_scope(|| error!("router task failed: {join_error}"));
                    ErrorResponse::new(500, "SYSTEM_ERROR", "request could not be completed").into()
                }
            }
        }
        Err(response) => response.into(),
    };

    let status = StatusCode::from_u16(response.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(response))
}

/// Empty body means no data. Anything else must be a JSON object.
fn decode_body(body: &[u8]) -> Result<RequestData, ErrorResponse> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(RequestData::new());
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(ErrorResponse::new(
            400,
            "INVALID_JSON",
            format!("request body must be a JSON object, got {}", json_kind(&other)),
        )),
        Err(e) => Err(ErrorResponse::new(400, "INVALID_JSON", format!("malformed JSON body: {e}"))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
