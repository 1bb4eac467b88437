use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use snex_core::{DeviceError, DeviceRegistry, DeviceUri};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::rpc::{
    deadline_from_ms, ControlBody, DeviceDto, MethodSummary, MultiReadBody, MultiWriteBody,
    PauseBody, ReadResponseDto, SingleReadBody, SingleWriteBody, WriteResponseDto,
};

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<DeviceRegistry>,
}

pub enum ApiError {
    Device(DeviceError),
    BadRequest(String),
}

impl From<DeviceError> for ApiError {
    fn from(err: DeviceError) -> ApiError {
        ApiError::Device(err)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    kind: String,
    message: String,
}

fn device_error_status(err: &DeviceError) -> StatusCode {
    match err {
        DeviceError::DeviceNotFound(_) | DeviceError::SchemeUnknown(_) => StatusCode::NOT_FOUND,
        DeviceError::CapabilityUnavailable(_) => StatusCode::NOT_IMPLEMENTED,
        DeviceError::AddressOutOfRange(_) | DeviceError::InvalidUri { .. } => {
            StatusCode::BAD_REQUEST
        }
        DeviceError::NoCore => StatusCode::SERVICE_UNAVAILABLE,
        DeviceError::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        DeviceError::ProtocolError(_) | DeviceError::Transport(_) => StatusCode::BAD_GATEWAY,
        DeviceError::DuplicateScheme(_) | DeviceError::RegistrySealed => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match self {
            ApiError::Device(err) => (
                device_error_status(&err),
                err.kind().to_string(),
                err.to_string(),
            ),
            ApiError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                "invalid_request".to_string(),
                message,
            ),
        };
        (
            status,
            Json(ErrorBody {
                error: ErrorDetail { kind, message },
            }),
        )
            .into_response()
    }
}

fn parse_uri(raw: &str) -> Result<DeviceUri, ApiError> {
    Ok(DeviceUri::parse(raw)?)
}

async fn healthz() -> impl IntoResponse {
    StatusCode::OK
}

#[derive(Deserialize)]
struct ListQuery {
    kinds: Option<String>,
}

async fn list_devices(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Json<Vec<DeviceDto>> {
    let kinds: Vec<String> = query
        .kinds
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let found = state.registry.list_devices(&kinds).await;
    Json(found.into_iter().map(DeviceDto::from).collect())
}

#[derive(Deserialize)]
struct UriQuery {
    uri: String,
}

async fn methods_for(
    State(state): State<AppState>,
    Query(query): Query<UriQuery>,
) -> Result<Json<Vec<String>>, ApiError> {
    let uri = parse_uri(&query.uri)?;
    let capabilities = state.registry.methods_for(&uri).await?;
    Ok(Json(
        capabilities.iter().map(|c| c.name().to_string()).collect(),
    ))
}

async fn single_read(
    State(state): State<AppState>,
    Json(body): Json<SingleReadBody>,
) -> Result<Json<ReadResponseDto>, ApiError> {
    if tracing::enabled!(tracing::Level::DEBUG) {
        tracing::debug!(request = %body.summary(), "read");
    }
    let uri = parse_uri(&body.uri)?;
    let response = state
        .registry
        .single_read(
            &uri,
            body.mapping,
            body.request.into_core(),
            deadline_from_ms(body.deadline_ms),
        )
        .await?;
    Ok(Json(response.into()))
}

async fn single_write(
    State(state): State<AppState>,
    Json(body): Json<SingleWriteBody>,
) -> Result<Json<WriteResponseDto>, ApiError> {
    if tracing::enabled!(tracing::Level::DEBUG) {
        tracing::debug!(request = %body.summary(), "write");
    }
    let uri = parse_uri(&body.uri)?;
    let request = body
        .request
        .into_core()
        .ok_or_else(|| ApiError::BadRequest("data must be an even-length hex string".into()))?;
    let response = state
        .registry
        .single_write(&uri, body.mapping, request, deadline_from_ms(body.deadline_ms))
        .await?;
    Ok(Json(response.into()))
}

async fn multi_read(
    State(state): State<AppState>,
    Json(body): Json<MultiReadBody>,
) -> Result<Json<Vec<ReadResponseDto>>, ApiError> {
    if tracing::enabled!(tracing::Level::DEBUG) {
        tracing::debug!(request = %body.summary(), "multi_read");
    }
    let uri = parse_uri(&body.uri)?;
    let reads: Vec<_> = body.requests.into_iter().map(|r| r.into_core()).collect();
    let responses = state
        .registry
        .multi_read(&uri, body.mapping, &reads, deadline_from_ms(body.deadline_ms))
        .await?;
    Ok(Json(responses.into_iter().map(Into::into).collect()))
}

async fn multi_write(
    State(state): State<AppState>,
    Json(body): Json<MultiWriteBody>,
) -> Result<Json<Vec<WriteResponseDto>>, ApiError> {
    if tracing::enabled!(tracing::Level::DEBUG) {
        tracing::debug!(request = %body.summary(), "multi_write");
    }
    let uri = parse_uri(&body.uri)?;
    let writes: Vec<_> = body
        .requests
        .into_iter()
        .map(|r| r.into_core())
        .collect::<Option<_>>()
        .ok_or_else(|| ApiError::BadRequest("data must be an even-length hex string".into()))?;
    let responses = state
        .registry
        .multi_write(&uri, body.mapping, &writes, deadline_from_ms(body.deadline_ms))
        .await?;
    Ok(Json(responses.into_iter().map(Into::into).collect()))
}

async fn reset(
    State(state): State<AppState>,
    Json(body): Json<ControlBody>,
) -> Result<StatusCode, ApiError> {
    let uri = parse_uri(&body.uri)?;
    state
        .registry
        .reset(&uri, deadline_from_ms(body.deadline_ms))
        .await?;
    Ok(StatusCode::OK)
}

async fn pause_toggle(
    State(state): State<AppState>,
    Json(body): Json<ControlBody>,
) -> Result<StatusCode, ApiError> {
    let uri = parse_uri(&body.uri)?;
    state
        .registry
        .pause_toggle(&uri, deadline_from_ms(body.deadline_ms))
        .await?;
    Ok(StatusCode::OK)
}

async fn pause_unpause(
    State(state): State<AppState>,
    Json(body): Json<PauseBody>,
) -> Result<StatusCode, ApiError> {
    let uri = parse_uri(&body.uri)?;
    state
        .registry
        .pause_unpause(&uri, body.paused, deadline_from_ms(body.deadline_ms))
        .await?;
    Ok(StatusCode::OK)
}

// --- streaming ------------------------------------------------------------

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamRequest {
    MultiRead(MultiReadBody),
    MultiWrite(MultiWriteBody),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamResponse {
    MultiRead { responses: Vec<ReadResponseDto> },
    MultiWrite { responses: Vec<WriteResponseDto> },
    Error { kind: String, message: String },
}

async fn stream_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_stream(socket, state))
}

/// The stream is a plain loop: read one message, dispatch it as a batch,
/// write one response. No state survives between messages beyond the device
/// handles themselves, so batches from one stream interleave safely with
/// unary calls.
async fn run_stream(socket: WebSocket, state: AppState) {
    let (mut tx, mut rx) = socket.split();
    while let Some(Ok(message)) = rx.next().await {
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        let response = dispatch_stream(&state, &text).await;
        let payload = match serde_json::to_string(&response) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(error = %err, "cannot serialize stream response");
                break;
            }
        };
        if tx.send(Message::Text(payload)).await.is_err() {
            break;
        }
    }
}

async fn dispatch_stream(state: &AppState, text: &str) -> StreamResponse {
    let request: StreamRequest = match serde_json::from_str(text) {
        Ok(request) => request,
        Err(err) => {
            return StreamResponse::Error {
                kind: "invalid_request".to_string(),
                message: err.to_string(),
            }
        }
    };

    let result = match request {
        StreamRequest::MultiRead(body) => match parse_uri(&body.uri) {
            Ok(uri) => {
                let reads: Vec<_> = body.requests.into_iter().map(|r| r.into_core()).collect();
                state
                    .registry
                    .multi_read(&uri, body.mapping, &reads, deadline_from_ms(body.deadline_ms))
                    .await
                    .map(|responses| StreamResponse::MultiRead {
                        responses: responses.into_iter().map(Into::into).collect(),
                    })
                    .map_err(ApiError::Device)
            }
            Err(err) => Err(err),
        },
        StreamRequest::MultiWrite(body) => match parse_uri(&body.uri) {
            Ok(uri) => {
                match body
                    .requests
                    .into_iter()
                    .map(|r| r.into_core())
                    .collect::<Option<Vec<_>>>()
                {
                    Some(writes) => state
                        .registry
                        .multi_write(
                            &uri,
                            body.mapping,
                            &writes,
                            deadline_from_ms(body.deadline_ms),
                        )
                        .await
                        .map(|responses| StreamResponse::MultiWrite {
                            responses: responses.into_iter().map(Into::into).collect(),
                        })
                        .map_err(ApiError::Device),
                    None => Err(ApiError::BadRequest(
                        "data must be an even-length hex string".into(),
                    )),
                }
            }
            Err(err) => Err(err),
        },
    };

    match result {
        Ok(response) => response,
        Err(ApiError::Device(err)) => StreamResponse::Error {
            kind: err.kind().to_string(),
            message: err.to_string(),
        },
        Err(ApiError::BadRequest(message)) => StreamResponse::Error {
            kind: "invalid_request".to_string(),
            message,
        },
    }
}

// --- wiring ---------------------------------------------------------------

async fn timing(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = std::time::Instant::now();

    let response = next.run(request).await;

    tracing::debug!(
        %method,
        path = %path,
        status = response.status().as_u16(),
        elapsed_us = started.elapsed().as_micros() as u64,
        "rpc call"
    );
    response
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/devices", get(list_devices))
        .route("/v1/device/methods", get(methods_for))
        .route("/v1/device/read", post(single_read))
        .route("/v1/device/write", post(single_write))
        .route("/v1/device/multi_read", post(multi_read))
        .route("/v1/device/multi_write", post(multi_write))
        .route("/v1/device/reset", post(reset))
        .route("/v1/device/pause_toggle", post(pause_toggle))
        .route("/v1/device/pause", post(pause_unpause))
        .route("/v1/stream", get(stream_handler))
        .layer(middleware::from_fn(timing))
        .with_state(state)
}

pub struct ServerHandle {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Bind the RPC listener and serve until shutdown. A bind failure is the
/// caller's cue to exit non-zero.
pub async fn start(listen_addr: &str, registry: Arc<DeviceRegistry>) -> std::io::Result<ServerHandle> {
    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    let addr = listener.local_addr()?;

    let app = build_app(AppState { registry });

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await;
    });

    Ok(ServerHandle {
        addr,
        shutdown_tx: Some(shutdown_tx),
        task: Some(task),
    })
}
