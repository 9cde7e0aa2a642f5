//!
//! HTTP surface: the JSON-RPC POST endpoint, WebSocket upgrade paths, the
//! optional inner service (index page, metrics, static tree) and
//! user-registered raw paths. User registrations whose first path segment
//! collides with a built-in path are rejected at registration time.
//!

use crate::context::RequestContext;
use crate::error::{METHOD_NOT_FOUND, SUCCESS};
use crate::imports::*;
use crate::message::Response as RpcResponse;
use crate::metrics::Metrics;
use crate::server::dispatcher::Dispatcher;
use crate::server::session::{JsonRpcSessionHandler, RawSessionHandler, RawWsHandlerFn};
use crate::server::{
    BUILTIN_PATH_DIR, BUILTIN_PATH_JSONRPC, BUILTIN_PATH_JSONRPC_WS, BUILTIN_PATH_METRICS,
    BUILTIN_PATH_RAW_WS,
};
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Extension, Query, State};
use axum::http::{header, StatusCode, Uri};
use axum::response::{Html, IntoResponse, Response as AxumResponse};
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use std::collections::HashMap;
use std::path::PathBuf;
use tower_http::services::ServeDir;
use uniport_websocket::session::{MAX_MESSAGE_SIZE, WRITE_BUFFER_SIZE};
use uniport_websocket::Session;
use uuid::Uuid;

/// Peer address of the underlying connection, inserted as a request
/// extension by the multiplexer before the router runs.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ClientAddr(pub SocketAddr);

/// Reply produced by a raw path handler: status code, content type and
/// body bytes.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub content_type: String,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn new(status: u16, content_type: impl Into<String>, body: Vec<u8>) -> RawResponse {
        RawResponse {
            status,
            content_type: content_type.into(),
            body,
        }
    }

    pub fn text(status: u16, body: impl Into<String>) -> RawResponse {
        RawResponse::new(status, "text/plain; charset=utf-8", body.into().into_bytes())
    }

    pub fn json(status: u16, value: &Value) -> RawResponse {
        RawResponse::new(status, "application/json", value.to_string().into_bytes())
    }
}

/// User handler for a registered raw path. GET invocations receive `None`
/// as the body; POST invocations receive the request body bytes.
pub type RawHandlerFn = Arc<
    Box<
        dyn Fn(RequestContext, Option<Bytes>) -> Pin<Box<dyn Future<Output = RawResponse> + Send + 'static>>
            + Send
            + Sync
            + 'static,
    >,
>;

/// Wrap an async closure into a [`RawHandlerFn`].
pub fn raw_handler<FN, Fut>(handler: FN) -> RawHandlerFn
where
    FN: Fn(RequestContext, Option<Bytes>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = RawResponse> + Send + 'static,
{
    Arc::new(Box::new(move |ctx, body| Box::pin(handler(ctx, body))))
}

pub(crate) struct HttpState {
    pub dispatcher: Arc<Dispatcher>,
    pub metrics: Arc<Metrics>,
    pub raw_ws: Option<RawWsHandlerFn>,
    pub get_handles: AHashMap<String, RawHandlerFn>,
    pub post_handles: AHashMap<String, RawHandlerFn>,
    pub enable_inner_service: bool,
    pub static_dir: Option<PathBuf>,
}

/// Reject any path whose first segment shadows a built-in path.
pub(crate) fn check_path(path: &str) -> Result<()> {
    let trimmed = path.trim_start_matches('/');
    let root = trimmed.split('/').next().unwrap_or(trimmed);
    let builtin = [
        BUILTIN_PATH_JSONRPC,
        BUILTIN_PATH_JSONRPC_WS,
        BUILTIN_PATH_RAW_WS,
        BUILTIN_PATH_DIR,
        BUILTIN_PATH_METRICS,
    ];
    if builtin.contains(&root) {
        return Err(Error::PathConflict);
    }
    Ok(())
}

pub(crate) fn build_router(state: Arc<HttpState>) -> Router {
    let mut router = Router::new()
        .route(&format!("/{BUILTIN_PATH_JSONRPC}"), post(handle_jsonrpc))
        .route(&format!("/{BUILTIN_PATH_JSONRPC_WS}"), get(handle_jsonrpc_ws))
        .route(&format!("/{BUILTIN_PATH_RAW_WS}"), get(handle_raw_ws));

    if state.enable_inner_service {
        router = router
            .route("/", get(handle_index))
            .route(&format!("/{BUILTIN_PATH_METRICS}"), get(handle_metrics));
        if let Some(dir) = &state.static_dir {
            router = router.nest_service(
                &format!("/{BUILTIN_PATH_DIR}"),
                ServeDir::new(dir.clone()),
            );
        }
    }

    let mut paths: Vec<&String> = state
        .get_handles
        .keys()
        .chain(state.post_handles.keys())
        .collect();
    paths.sort();
    paths.dedup();
    for path in paths {
        router = router.route(path, get(handle_raw_get).post(handle_raw_post));
    }

    router.with_state(state)
}

fn peer_of(addr: Option<Extension<ClientAddr>>) -> Option<SocketAddr> {
    addr.map(|Extension(ClientAddr(peer))| peer)
}

async fn handle_jsonrpc(
    State(state): State<Arc<HttpState>>,
    addr: Option<Extension<ClientAddr>>,
    body: Bytes,
) -> AxumResponse {
    let ctx = RequestContext::new(
        state.metrics.clone(),
        "jsonRpc2",
        Value::String(Uuid::new_v4().to_string()),
        body.len(),
        peer_of(addr),
        None,
    );
    let outcome = state.dispatcher.dispatch(&ctx, &body).await;
    ctx.end_request(SUCCESS);
    json_body(StatusCode::OK, outcome.to_json())
}

async fn handle_jsonrpc_ws(
    State(state): State<Arc<HttpState>>,
    addr: Option<Extension<ClientAddr>>,
    ws: WebSocketUpgrade,
) -> AxumResponse {
    let peer = peer_of(addr).unwrap_or_else(unspecified_peer);
    info!("open jsonrpc websocket session: client[{peer}]");
    let dispatcher = state.dispatcher.clone();
    let metrics = state.metrics.clone();
    ws.max_message_size(MAX_MESSAGE_SIZE)
        .write_buffer_size(WRITE_BUFFER_SIZE)
        .on_upgrade(move |socket| async move {
            let counters = metrics.sessions().clone();
            let handler = Arc::new(JsonRpcSessionHandler::new(dispatcher, metrics));
            let session = Session::spawn(socket, peer, handler, counters);
            session.join().await;
            info!("jsonrpc websocket session closed: client[{peer}]");
        })
}

async fn handle_raw_ws(
    State(state): State<Arc<HttpState>>,
    addr: Option<Extension<ClientAddr>>,
    ws: WebSocketUpgrade,
) -> AxumResponse {
    let Some(raw_handler) = state.raw_ws.clone() else {
        return (
            StatusCode::NOT_FOUND,
            "no raw websocket handler registered",
        )
            .into_response();
    };
    let peer = peer_of(addr).unwrap_or_else(unspecified_peer);
    info!("open raw websocket session: client[{peer}]");
    let metrics = state.metrics.clone();
    ws.max_message_size(MAX_MESSAGE_SIZE)
        .write_buffer_size(WRITE_BUFFER_SIZE)
        .on_upgrade(move |socket| async move {
            let counters = metrics.sessions().clone();
            let handler = Arc::new(RawSessionHandler::new(raw_handler, metrics));
            let session = Session::spawn(socket, peer, handler, counters);
            session.join().await;
            info!("raw websocket session closed: client[{peer}]");
        })
}

async fn handle_metrics(State(state): State<Arc<HttpState>>) -> AxumResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
        .into_response()
}

async fn handle_index() -> AxumResponse {
    let app = binary_name();
    Html(format!(
        r#"
<h2>Welcome to {app}</h2>
<table border="1">
  <tr>
    <th>InnerPath</th>
  </tr>
  <tr>
    <td><a href="/{BUILTIN_PATH_DIR}">directory of {app}</a></td>
  </tr>
  <tr>
    <td><a href="/{BUILTIN_PATH_METRICS}">metrics of {app}</a></td>
  </tr>
</table>
"#
    ))
    .into_response()
}

async fn handle_raw_get(
    State(state): State<Arc<HttpState>>,
    addr: Option<Extension<ClientAddr>>,
    Query(query): Query<HashMap<String, String>>,
    uri: Uri,
) -> AxumResponse {
    let path = uri.path().to_string();
    let Some(handler) = state.get_handles.get(&path).cloned() else {
        return not_found_response(&path, &query);
    };
    let ctx = raw_context(&state, &path, &query, peer_of(addr), 0);
    let reply = handler(ctx.clone(), None).await;
    ctx.end_request(SUCCESS);
    raw_response(reply)
}

async fn handle_raw_post(
    State(state): State<Arc<HttpState>>,
    addr: Option<Extension<ClientAddr>>,
    Query(query): Query<HashMap<String, String>>,
    uri: Uri,
    body: Bytes,
) -> AxumResponse {
    let path = uri.path().to_string();
    let Some(handler) = state.post_handles.get(&path).cloned() else {
        return not_found_response(&path, &query);
    };
    let ctx = raw_context(&state, &path, &query, peer_of(addr), body.len());
    let reply = handler(ctx.clone(), Some(body)).await;
    ctx.end_request(SUCCESS);
    raw_response(reply)
}

/// Raw path contexts take the `id` query parameter as the request id when
/// present; the remaining query parameters are exposed through the
/// context's value bag.
fn raw_context(
    state: &Arc<HttpState>,
    path: &str,
    query: &HashMap<String, String>,
    peer: Option<SocketAddr>,
    body_size: usize,
) -> RequestContext {
    let id = query
        .get("id")
        .cloned()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let ctx = RequestContext::new(
        state.metrics.clone(),
        path,
        Value::String(id),
        body_size,
        peer,
        None,
    );
    for (key, value) in query {
        ctx.with_value(key.clone(), Value::String(value.clone()));
    }
    ctx
}

fn not_found_response(path: &str, query: &HashMap<String, String>) -> AxumResponse {
    let id = query
        .get("id")
        .cloned()
        .map(|id| serde_json::value::to_raw_value(&id).ok())
        .unwrap_or(None);
    let response = RpcResponse::failure(
        id,
        RpcError::system(METHOD_NOT_FOUND, Some(Value::String(path.to_string()))),
    );
    let body = serde_json::to_string(&response).unwrap_or_default();
    json_body(StatusCode::OK, body)
}

fn raw_response(reply: RawResponse) -> AxumResponse {
    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, [(header::CONTENT_TYPE, reply.content_type)], reply.body).into_response()
}

fn json_body(status: StatusCode, body: String) -> AxumResponse {
    (status, [(header::CONTENT_TYPE, "application/json")], body).into_response()
}

fn unspecified_peer() -> SocketAddr {
    use std::net::{IpAddr, Ipv4Addr};
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
}

pub(crate) fn binary_name() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|path| path.file_stem().map(|stem| stem.to_string_lossy().to_string()))
        .unwrap_or_else(|| "uniport".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_paths_are_reserved() {
        assert!(check_path("_metrics_/foo").is_err());
        assert!(check_path("/_metrics_/foo").is_err());
        assert!(check_path("/_jsonrpc_").is_err());
        assert!(check_path("/_jsonrpc_ws_/x").is_err());
        assert!(check_path("/_raw_ws_").is_err());
        assert!(check_path("/_dir_/a/b").is_err());
    }

    #[test]
    fn user_paths_are_admitted() {
        assert!(check_path("/v1/get").is_ok());
        assert!(check_path("/metrics").is_ok());
        assert!(check_path("/_metrics/x").is_ok());
    }
}
