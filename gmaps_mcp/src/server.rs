//! Streamable HTTP transport endpoint.
//!
//! A single `/mcp` route carries the whole protocol: POST for client→server
//! JSON-RPC messages, GET to resume the server→client SSE stream, DELETE to
//! terminate a session. Session affinity rides in the `mcp-session-id`
//! header; only a session-less `initialize` request may mint a new session,
//! every other shape without a valid session id gets a structured 400.

use crate::context::{self, RequestContext};
use crate::credentials::ApiKeyResolver;
use crate::error::{Result, ServerError};
use crate::service::McpService;
use crate::session::{Session, SessionRegistry};
use crate::tools::{ToolRegistry, maps::MapsClient};
use axum::{
    Router,
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, HeaderValue, Method, StatusCode, header::CONTENT_TYPE},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures::stream::StreamExt;
use gmaps_common::{MCP_SESSION_ID_HEADER, READY_MARKER, jsonrpc};
use serde_json::Value;
use std::{convert::Infallible, net::SocketAddr, sync::Arc};
use tokio_stream::wrappers::BroadcastStream;
use tower_http::{
    cors::{AllowHeaders, AllowMethods, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, error, info, warn};

/// Configuration for one HTTP server instance.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Name reported in `initialize` responses.
    pub name: String,

    /// Address to bind. Port 0 asks the OS for a free port; the bound
    /// port is announced on stderr either way.
    pub bind_addr: SocketAddr,

    /// Process-wide default API key (lowest credential precedence).
    pub default_api_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "gmaps-mcp".to_string(),
            bind_addr: "127.0.0.1:3000".parse().expect("valid literal address"),
            default_api_key: None,
        }
    }
}

/// Shared state behind the router.
pub struct AppState {
    registry: Arc<SessionRegistry>,
    resolver: ApiKeyResolver,
    service: McpService,
}

impl AppState {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::new()),
            resolver: ApiKeyResolver::new(config.default_api_key.clone()),
            service: McpService::new(config.name.clone(), ToolRegistry::new(MapsClient::new())),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }
}

/// Build the CORS layer for the bind address.
///
/// Loopback binds only accept browser origins that are themselves
/// loopback; a non-loopback bind was an explicit opt-in, so any origin is
/// allowed there (methods and headers stay restricted either way).
fn build_cors_layer(bind_addr: &SocketAddr) -> CorsLayer {
    let methods = AllowMethods::list([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS]);
    let headers = AllowHeaders::list([
        CONTENT_TYPE,
        MCP_SESSION_ID_HEADER.parse().expect("valid header name"),
        "accept".parse().expect("valid header name"),
        "last-event-id".parse().expect("valid header name"),
        "authorization".parse().expect("valid header name"),
        gmaps_common::API_KEY_HEADER
            .parse()
            .expect("valid header name"),
    ]);
    let expose = tower_http::cors::ExposeHeaders::list([MCP_SESSION_ID_HEADER
        .parse::<axum::http::HeaderName>()
        .expect("valid header name")]);

    if bind_addr.ip().is_loopback() {
        CorsLayer::new()
            .allow_origin(tower_http::cors::AllowOrigin::predicate(
                |origin: &HeaderValue, _req: &axum::http::request::Parts| {
                    let Ok(origin_str) = origin.to_str() else {
                        return false;
                    };
                    let lower = origin_str.to_ascii_lowercase();
                    lower.starts_with("http://127.0.0.1")
                        || lower.starts_with("http://localhost")
                        || lower.starts_with("http://[::1]")
                },
            ))
            .allow_methods(methods)
            .allow_headers(headers)
            .expose_headers(expose)
    } else {
        CorsLayer::new()
            .allow_origin(tower_http::cors::AllowOrigin::any())
            .allow_methods(methods)
            .allow_headers(headers)
            .expose_headers(expose)
    }
}

/// Build the router for one server instance.
pub fn build_router(state: Arc<AppState>, bind_addr: &SocketAddr) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(
            "/mcp",
            post(handle_mcp_post)
                .get(handle_mcp_get)
                .delete(handle_mcp_delete),
        )
        .layer(build_cors_layer(bind_addr))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// One bound-but-not-yet-serving server instance.
pub struct HttpServer {
    listener: tokio::net::TcpListener,
    router: Router,
    state: Arc<AppState>,
    local_addr: SocketAddr,
}

impl HttpServer {
    /// Bind the listener and announce the port. Serving starts later via
    /// [`HttpServer::serve`], so tests can bind port 0 and read the
    /// resolved address first.
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let state = Arc::new(AppState::new(&config));
        let router = build_router(state.clone(), &config.bind_addr);

        let listener = tokio::net::TcpListener::bind(config.bind_addr)
            .await
            .map_err(|e| {
                ServerError::Startup(format!("failed to bind {}: {e}", config.bind_addr))
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::Startup(format!("failed to read local addr: {e}")))?;

        if !local_addr.ip().is_loopback() {
            warn!(
                "Server bound to non-loopback address {local_addr}; \
                 restrict access via firewall or reverse proxy"
            );
        }
        info!(server = %config.name, "MCP endpoint on http://{local_addr}/mcp");

        // Machine-readable bound port for the stdio bridge and tests.
        eprintln!("{READY_MARKER}{}", local_addr.port());

        Ok(Self {
            listener,
            router,
            state,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve until ctrl-c, then close every live session.
    pub async fn serve(self) -> Result<()> {
        let registry = self.state.registry.clone();
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("Failed to listen for shutdown signal: {e}");
                }
            })
            .await?;

        let closed = registry.close_all();
        info!(closed, addr = %self.local_addr, "Server stopped");
        Ok(())
    }
}

/// Start every configured instance. A bind failure is reported and does
/// not stop the remaining instances; only zero successful binds is fatal.
pub async fn start_all(configs: Vec<ServerConfig>) -> Result<()> {
    let mut servers = Vec::new();
    for config in configs {
        let name = config.name.clone();
        let addr = config.bind_addr;
        match HttpServer::bind(config).await {
            Ok(server) => servers.push(server),
            Err(e) => error!(server = %name, %addr, "Instance failed to start: {e}"),
        }
    }
    if servers.is_empty() {
        return Err(ServerError::Startup(
            "no server instance could be started".to_string(),
        ));
    }

    let results = futures::future::join_all(servers.into_iter().map(HttpServer::serve)).await;
    for result in results {
        result?;
    }
    Ok(())
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

fn session_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(MCP_SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

fn with_session_header(mut response: Response, session_id: &str) -> Response {
    let value = HeaderValue::from_str(session_id)
        .unwrap_or_else(|_| HeaderValue::from_static("invalid"));
    response.headers_mut().insert(MCP_SESSION_ID_HEADER, value);
    response
}

fn json_response_with_status(status: StatusCode, value: Value) -> Response {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(&value).unwrap_or_default()))
        .unwrap_or_else(|_| (status, "Failed to create response").into_response())
}

/// The structured rejection every invalid-session shape maps to.
fn bad_session_response() -> Response {
    json_response_with_status(
        StatusCode::BAD_REQUEST,
        jsonrpc::error_object(
            jsonrpc::BAD_SESSION,
            "Bad Request: No valid session ID provided",
            Value::Null,
        ),
    )
}

/// Frame one JSON-RPC response as a single-event SSE body.
fn sse_message_response(value: &Value) -> Response {
    let body = format!("event: message\ndata: {value}\n\n");
    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "text/event-stream")
        .body(Body::from(body))
        .unwrap_or_else(|_| {
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to create response").into_response()
        })
}

/// POST /mcp: one JSON-RPC message in, at most one framed response out.
async fn handle_mcp_post(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let message: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            debug!("Rejecting unparseable POST body: {e}");
            return json_response_with_status(
                StatusCode::BAD_REQUEST,
                jsonrpc::error_object(
                    jsonrpc::PARSE_ERROR,
                    &format!("Parse error: {e}"),
                    Value::Null,
                ),
            );
        }
    };

    let session = match session_header(&headers) {
        Some(session_id) => match state.registry.lookup(&session_id) {
            Some(session) if !session.transport().is_closed() => session,
            _ => {
                warn!(session_id = %session_id, "Request for unknown or closed session");
                return bad_session_response();
            }
        },
        None if jsonrpc::is_initialize_request(&message) => {
            let session = state.registry.create_session();
            session.transport().mark_initialized();
            session
        }
        None => {
            debug!(
                method = ?message.get("method").and_then(|m| m.as_str()),
                "Session-less request is not an initialize"
            );
            return bad_session_response();
        }
    };

    dispatch(&state, &headers, session, &message).await
}

/// Refresh the session credential, establish the request scope, and run
/// the message through protocol dispatch.
async fn dispatch(
    state: &AppState,
    headers: &HeaderMap,
    session: Arc<Session>,
    message: &Value,
) -> Response {
    if let Some(key) = state.resolver.request_key(headers) {
        state.registry.update_api_key(session.id(), key);
    }

    let ctx = RequestContext {
        api_key: state
            .resolver
            .resolve(headers, session.api_key_override().as_deref()),
        session_id: Some(session.id().to_string()),
    };

    let response = context::run_scoped(ctx, state.service.handle(message)).await;
    match response {
        Some(value) => with_session_header(sse_message_response(&value), session.id()),
        // Notification: nothing to put on the wire.
        None => with_session_header(StatusCode::ACCEPTED.into_response(), session.id()),
    }
}

/// GET /mcp: resume the session's server→client event stream.
async fn handle_mcp_get(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let Some(session_id) = session_header(&headers) else {
        return bad_session_response();
    };
    let Some(session) = state.registry.lookup(&session_id) else {
        return bad_session_response();
    };
    if session.transport().is_closed() || !session.transport().is_initialized() {
        return bad_session_response();
    }

    info!(session_id = %session_id, "SSE stream opened");
    let rx = session.transport().subscribe();

    let stream = BroadcastStream::new(rx).filter_map(move |result| {
        let session_id = session_id.clone();
        async move {
            match result {
                Ok(msg) => Some(Ok::<_, Infallible>(Event::default().event("message").data(msg))),
                Err(tokio_stream::wrappers::errors::BroadcastStreamRecvError::Lagged(n)) => {
                    warn!(session_id = %session_id, lagged = n, "SSE receiver lagged, events dropped");
                    // Comment keeps the connection visibly alive without
                    // injecting a fake protocol message.
                    Some(Ok(Event::default().comment(format!("lagged: {n} events dropped"))))
                }
            }
        }
    });

    with_session_header(
        Sse::new(stream)
            .keep_alive(KeepAlive::default())
            .into_response(),
        session.id(),
    )
}

/// DELETE /mcp: terminate the session named by the header.
async fn handle_mcp_delete(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let Some(session_id) = session_header(&headers) else {
        return bad_session_response();
    };
    if !state.registry.remove(&session_id) {
        return bad_session_response();
    }
    info!(session_id = %session_id, "Session terminated via DELETE");
    StatusCode::NO_CONTENT.into_response()
}
