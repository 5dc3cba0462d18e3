//! HTTP surface of the daemon.
//!
//! Translates the agent/operator exchange into registry, queue and sink
//! operations. One mutex guards the registry and every queue as a unit;
//! handlers hold it for the whole critical section and release it before
//! sink file I/O.

use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{ConnectInfo, Extension, Path},
    http::{header::CONTENT_TYPE, Method, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use fleet_common::{
    BroadcastRequest, DataRequest, DispatchRequest, ReportRequest, BROADCAST_COMMAND_KIND,
};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::{sink::Store, state::State};

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    state: Mutex<State>,
    store: Store,
}

impl AppState {
    pub fn new(state: State, store: Store) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                state: Mutex::new(state),
                store,
            }),
        }
    }

    fn state(&self) -> &Mutex<State> {
        &self.inner.state
    }

    fn store(&self) -> &Store {
        &self.inner.store
    }
}

#[derive(Debug)]
enum ApiError {
    UnknownClient,
    MalformedRequest(&'static str),
    Internal(anyhow::Error),
}

impl ApiError {
    fn internal<E: Into<anyhow::Error>>(err: E) -> Self {
        Self::Internal(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::UnknownClient => (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "Client not found" })),
            )
                .into_response(),
            ApiError::MalformedRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
            }
            ApiError::Internal(err) => {
                tracing::error!("request failed: {:#}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "internal server error" })),
                )
                    .into_response()
            }
        }
    }
}

pub fn router(app: AppState) -> Router {
    Router::new()
        .route("/", get(dashboard))
        .route("/health", get(health))
        .route("/register", post(register))
        .route("/data", post(receive_data))
        .route("/cmd/:identifier", get(next_command))
        .route("/cmd", post(dispatch_command))
        .route("/report", post(accept_report))
        .route("/api/clients", get(list_clients))
        .route("/api/send-message", post(broadcast_message))
        .layer(Extension(app))
        .layer(
            CorsLayer::new()
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([CONTENT_TYPE]),
        )
        .layer(TraceLayer::new_for_http())
}

async fn register(
    Extension(app): Extension<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(payload): Json<Value>,
) -> Result<Response, ApiError> {
    let attributes = payload.as_object().cloned().unwrap_or_default();

    let (identifier, record) = {
        let mut state = app.state().lock().await;
        state.register(attributes, addr.ip().to_string())
    };

    app.store()
        .persist_registration(&identifier, &record)
        .await
        .map_err(ApiError::internal)?;

    info!(identifier = %identifier, source = %record.source_address, "agent registered");
    Ok(Json(json!({ "identifier": identifier, "status": "registered" })).into_response())
}

async fn receive_data(
    Extension(app): Extension<AppState>,
    Json(request): Json<DataRequest>,
) -> Result<Response, ApiError> {
    let identifier = request
        .identifier
        .filter(|id| !id.is_empty())
        .ok_or(ApiError::MalformedRequest("Invalid client"))?;

    {
        app.state().lock().await.touch(&identifier);
    }

    app.store()
        .persist_snapshot(&identifier, &request.data)
        .await
        .map_err(ApiError::internal)?;

    info!(identifier = %identifier, "data received");
    Ok(Json(json!({ "status": "received" })).into_response())
}

async fn next_command(
    Extension(app): Extension<AppState>,
    Path(identifier): Path<String>,
) -> Result<Response, ApiError> {
    let command = {
        let mut state = app.state().lock().await;
        state.touch(&identifier);
        state.poll_one(&identifier)
    };

    Ok(match command {
        Some(command) => Json(json!({ "command": command })).into_response(),
        None => Json(json!({ "status": "no_command" })).into_response(),
    })
}

async fn dispatch_command(
    Extension(app): Extension<AppState>,
    Json(request): Json<DispatchRequest>,
) -> Result<Response, ApiError> {
    let identifier = request.identifier.unwrap_or_default();

    let command_id = {
        let mut state = app.state().lock().await;
        state
            .enqueue(&identifier, request.command.kind, request.command.payload)
            .map_err(|_| ApiError::UnknownClient)?
    };

    info!(identifier = %identifier, command_id, "command queued");
    Ok(Json(json!({ "status": "queued", "commandId": command_id })).into_response())
}

async fn accept_report(
    Extension(app): Extension<AppState>,
    Json(request): Json<ReportRequest>,
) -> Result<Response, ApiError> {
    {
        app.state().lock().await.touch(&request.identifier);
    }

    let report = json!({ "identifier": request.identifier, "result": request.result });
    app.store()
        .persist_report(&request.identifier, &report)
        .await
        .map_err(ApiError::internal)?;

    // Artifact decoding is best-effort: a corrupt payload never fails the
    // report acceptance itself.
    if request.result.is_artifact() {
        let payload = request.result.payload.as_deref().unwrap_or_default();
        match app.store().store_artifact(&request.identifier, payload).await {
            Ok(path) => {
                info!(identifier = %request.identifier, path = %path.display(), "screenshot stored")
            }
            Err(err) => {
                warn!(identifier = %request.identifier, "failed to store screenshot: {:#}", err)
            }
        }
    }

    info!(identifier = %request.identifier, kind = %request.result.kind, "report received");
    Ok(Json(json!({ "status": "received" })).into_response())
}

async fn list_clients(Extension(app): Extension<AppState>) -> Result<Response, ApiError> {
    let snapshot = {
        let state = app.state().lock().await;
        state.clients_snapshot()
    };
    Ok(Json(snapshot).into_response())
}

async fn broadcast_message(
    Extension(app): Extension<AppState>,
    Json(request): Json<BroadcastRequest>,
) -> Result<Response, ApiError> {
    let dispatched = {
        let mut state = app.state().lock().await;
        state.enqueue_broadcast(BROADCAST_COMMAND_KIND, &request.message)
    };

    info!(agents = dispatched.len(), "broadcast queued");
    Ok(Json(json!({ "status": "sent", "message": request.message })).into_response())
}

async fn dashboard(Extension(app): Extension<AppState>) -> Html<String> {
    let (count, snapshot) = {
        let state = app.state().lock().await;
        (state.client_count(), state.clients_snapshot())
    };

    let mut rows = String::new();
    if let Value::Object(clients) = &snapshot {
        for (identifier, record) in clients {
            let last_seen = record
                .get("last_seen")
                .and_then(Value::as_str)
                .unwrap_or("-");
            let source = record
                .get("source_address")
                .and_then(Value::as_str)
                .unwrap_or("-");
            rows.push_str(&format!(
                "<tr><td>{identifier}</td><td>{source}</td><td>{last_seen}</td></tr>"
            ));
        }
    }

    Html(format!(
        "<html><head><title>fleetd</title></head><body>\
         <h1>fleetd</h1>\
         <p>{count} agent(s) registered | {version}</p>\
         <table border=\"1\"><tr><th>identifier</th><th>source</th><th>last seen</th></tr>{rows}</table>\
         </body></html>",
        version = env!("CARGO_PKG_VERSION"),
    ))
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
