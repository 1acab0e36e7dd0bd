#![forbid(unsafe_code)]

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use dispatch_adapter::{
    init_tracing, AdapterError, AdapterHealthResponse, AdapterResponse, AdapterRuntime,
    FieldFocusRequest, FieldValueRequest,
};
use dispatch_os::error::DispatchError;
use dispatch_storage::roster::StorageError;
use tracing::info;

const USER_HEADER: &str = "x-dispatcher-user";

type SharedRuntime = Arc<AdapterRuntime>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let runtime = Arc::new(AdapterRuntime::default_from_env()?);
    let addr = runtime.config().bind;

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/views", post(open_view))
        .route("/v1/views/:view_id", delete(close_view))
        .route("/v1/views/:view_id/board", get(board))
        .route("/v1/views/:view_id/focus", post(focus))
        .route("/v1/views/:view_id/blur", post(blur))
        .route("/v1/views/:view_id/field", post(set_field))
        .route("/v1/views/:view_id/slots/:tag/save", post(save_slot))
        .route("/v1/views/:view_id/slots/:tag/clear", post(clear_slot))
        .with_state(runtime);

    info!(%addr, "dispatch_adapter_http listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown requested");
}

fn status_for(err: &AdapterError) -> StatusCode {
    match err {
        AdapterError::Dispatch(DispatchError::Unauthorized)
        | AdapterError::Dispatch(DispatchError::Storage(StorageError::Unauthorized)) => {
            StatusCode::UNAUTHORIZED
        }
        AdapterError::UnknownView(_) | AdapterError::Dispatch(DispatchError::UnknownTag(_)) => {
            StatusCode::NOT_FOUND
        }
        AdapterError::Dispatch(DispatchError::ViewClosed) => StatusCode::GONE,
        AdapterError::Dispatch(DispatchError::Storage(_)) => StatusCode::SERVICE_UNAVAILABLE,
        AdapterError::InvalidConfig { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    }
}

fn reply<T: serde::Serialize>(result: Result<T, AdapterError>) -> Response {
    match result {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(err) => (status_for(&err), Json(AdapterResponse::error(&err))).into_response(),
    }
}

async fn healthz(State(runtime): State<SharedRuntime>) -> (StatusCode, Json<AdapterHealthResponse>) {
    (StatusCode::OK, Json(runtime.health_report()))
}

async fn open_view(State(runtime): State<SharedRuntime>, headers: HeaderMap) -> Response {
    let user = headers.get(USER_HEADER).and_then(|v| v.to_str().ok());
    reply(runtime.open_view(user).await)
}

async fn close_view(State(runtime): State<SharedRuntime>, Path(view_id): Path<u64>) -> Response {
    reply(
        runtime
            .close_view(view_id)
            .map(|()| AdapterResponse::ok("CLOSED")),
    )
}

async fn board(State(runtime): State<SharedRuntime>, Path(view_id): Path<u64>) -> Response {
    reply(runtime.board(view_id))
}

async fn focus(
    State(runtime): State<SharedRuntime>,
    Path(view_id): Path<u64>,
    Json(request): Json<FieldFocusRequest>,
) -> Response {
    reply(
        runtime
            .focus(view_id, &request)
            .map(|()| AdapterResponse::ok("FOCUSED")),
    )
}

async fn blur(
    State(runtime): State<SharedRuntime>,
    Path(view_id): Path<u64>,
    Json(request): Json<FieldFocusRequest>,
) -> Response {
    reply(
        runtime
            .blur(view_id, &request)
            .map(|()| AdapterResponse::ok("BLURRED")),
    )
}

async fn set_field(
    State(runtime): State<SharedRuntime>,
    Path(view_id): Path<u64>,
    Json(request): Json<FieldValueRequest>,
) -> Response {
    reply(runtime.set_field(view_id, &request))
}

async fn save_slot(
    State(runtime): State<SharedRuntime>,
    Path((view_id, tag)): Path<(u64, String)>,
) -> Response {
    reply(runtime.save(view_id, &tag).await)
}

async fn clear_slot(
    State(runtime): State<SharedRuntime>,
    Path((view_id, tag)): Path<(u64, String)>,
) -> Response {
    reply(
        runtime
            .clear(view_id, &tag)
            .map(|()| AdapterResponse::ok("CLEARED")),
    )
}
