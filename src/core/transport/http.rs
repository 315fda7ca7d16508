//! HTTP transport implementation.
//!
//! REST surface over the tool registry:
//!
//! - `GET /tools` - listing with `ETag`/`If-None-Match`, `?reload=1` forces a full scan
//! - `POST /execute` - `{"tool": name, "params": {...}}` (`tool_reg` is accepted as an alias)
//! - `GET /discovery` - last scan summary, including per-module errors
//! - `GET /control`, `GET /control.js` - the control panel
//! - `GET /config`, `POST /config` - managed secrets
//! - `GET /health`, `GET /` - liveness and API info

use axum::{
    Json, Router,
    extract::{Query, State, rejection::JsonRejection},
    http::{
        HeaderMap, HeaderValue, Method, StatusCode,
        header::{CACHE_CONTROL, CONTENT_TYPE, ETAG, IF_NONE_MATCH},
    },
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, instrument, warn};

use super::{TransportError, TransportResult, config::HttpConfig};
use crate::core::ToolServer;
use crate::domains::settings::{SettingsError, SettingsUpdate};
use crate::domains::tools::{ErrorKind, ToolError};

const CONTROL_HTML: &str = include_str!("assets/control.html");
const CONTROL_JS: &str = include_str!("assets/control.js");

/// HTTP transport handler.
pub struct HttpTransport {
    config: HttpConfig,
}

impl HttpTransport {
    /// Create a new HTTP transport with the given config.
    pub fn new(config: HttpConfig) -> Self {
        Self { config }
    }

    /// Get the bind address.
    pub fn address(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }

    /// Run the HTTP transport.
    pub async fn run(self, server: ToolServer) -> TransportResult<()> {
        let addr = self.address();
        let app = router(server, self.config.enable_cors);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| TransportError::bind(&addr, e))?;

        let cors_status = if self.config.enable_cors {
            "enabled"
        } else {
            "disabled"
        };
        info!("Ready - listening on {} (CORS {})", addr, cors_status);
        info!("  → Tools:   GET /tools, POST /execute");
        info!("  → Control: GET http://{}/control", addr);

        axum::serve(listener, app)
            .await
            .map_err(|e| TransportError::http(e.to_string()))?;

        Ok(())
    }
}

/// Build the router. `GET` routes also answer `HEAD` without a body.
pub fn router(server: ToolServer, enable_cors: bool) -> Router {
    let mut app = Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_check))
        .route("/tools", get(list_tools))
        .route("/execute", post(execute_tool))
        .route("/discovery", get(discovery))
        .route("/control", get(control_panel))
        .route("/control.js", get(control_script))
        .route("/config", get(get_config).post(update_config))
        .with_state(server)
        .layer(TraceLayer::new_for_http());

    if enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS, Method::HEAD])
            .allow_headers(Any)
            .expose_headers([ETAG]);
        app = app.layer(cors);
    }

    app
}

/// Error response: `{"detail": message, "error": {"kind", "message", "fields"}}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ApiErrorResponse,
}

#[derive(Debug, Serialize)]
struct ApiErrorResponse {
    detail: String,
    error: ApiErrorBody,
}

#[derive(Debug, Serialize)]
struct ApiErrorBody {
    kind: String,
    message: String,
    fields: Vec<String>,
}

impl ApiError {
    fn new(status: StatusCode, kind: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            status,
            body: ApiErrorResponse {
                detail: message.clone(),
                error: ApiErrorBody {
                    kind: kind.into(),
                    message,
                    fields: Vec::new(),
                },
            },
        }
    }

    fn unprocessable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, "ValidationError", message)
    }

    fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, ErrorKind::Internal.as_str(), message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<ToolError> for ApiError {
    fn from(err: ToolError) -> Self {
        let kind = err.kind();
        let status = match kind {
            ErrorKind::UnknownTool => StatusCode::NOT_FOUND,
            ErrorKind::InvalidArguments => StatusCode::BAD_REQUEST,
            ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::RegistryUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::ToolError | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let mut api = Self::new(status, kind.as_str(), err.to_string());
        api.body.error.fields = err.fields();
        api
    }
}

impl From<SettingsError> for ApiError {
    fn from(err: SettingsError) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "SettingsError", err.to_string())
    }
}

/// Root handler - provides API info.
async fn root_handler(State(server): State<ToolServer>) -> impl IntoResponse {
    Json(json!({
        "name": server.name(),
        "version": server.version(),
        "transport": "HTTP",
        "endpoints": {
            "tools": "/tools",
            "execute": "/execute",
            "discovery": "/discovery",
            "control": "/control",
            "config": "/config",
            "health": "/health"
        }
    }))
}

/// Health check endpoint.
async fn health_check(State(server): State<ToolServer>) -> impl IntoResponse {
    let snapshot = server.tools().registry().snapshot();
    Json(json!({
        "status": "healthy",
        "generation": snapshot.generation(),
        "tools": snapshot.len(),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

#[derive(Debug, Default, Deserialize)]
struct ListQuery {
    #[serde(default)]
    reload: Option<String>,
}

impl ListQuery {
    fn force_reload(&self) -> bool {
        matches!(
            self.reload.as_deref().map(str::to_lowercase).as_deref(),
            Some("1" | "true" | "yes")
        )
    }
}

/// Whether an `If-None-Match` header matches `fingerprint`.
fn matches_fingerprint(headers: &HeaderMap, fingerprint: &str) -> bool {
    headers
        .get_all(IF_NONE_MATCH)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|tag| tag.trim().trim_start_matches("W/").trim_matches('"'))
        .any(|tag| tag == "*" || tag == fingerprint)
}

/// `GET /tools` - the Listing Cache payload.
#[instrument(skip_all)]
async fn list_tools(
    State(server): State<ToolServer>,
    Query(query): Query<ListQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let listing = server.tools().get_listing(query.force_reload()).await?;
    let etag = HeaderValue::from_str(&listing.fingerprint)
        .map_err(|e| ApiError::internal(format!("invalid fingerprint: {e}")))?;
    let no_cache = HeaderValue::from_static("no-cache");

    if matches_fingerprint(&headers, &listing.fingerprint) {
        return Ok((
            StatusCode::NOT_MODIFIED,
            [(ETAG, etag), (CACHE_CONTROL, no_cache)],
        )
            .into_response());
    }

    Ok((
        [
            (CONTENT_TYPE, HeaderValue::from_static("application/json")),
            (CACHE_CONTROL, no_cache),
            (ETAG, etag),
        ],
        listing.payload.to_string(),
    )
        .into_response())
}

/// Body of `POST /execute`.
#[derive(Debug, Deserialize)]
struct ExecuteRequest {
    #[serde(default)]
    tool: Option<String>,
    #[serde(default)]
    tool_reg: Option<String>,
    #[serde(default)]
    params: Option<Value>,
}

impl ExecuteRequest {
    fn tool_name(&self) -> Option<&str> {
        [self.tool_reg.as_deref(), self.tool.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|name| !name.is_empty())
    }
}

/// `POST /execute` - run one tool.
#[instrument(skip_all, fields(tool))]
async fn execute_tool(
    State(server): State<ToolServer>,
    payload: Result<Json<ExecuteRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(request) = payload.map_err(|e| {
        warn!(error = %e, "Rejected execute request");
        ApiError::unprocessable(e.body_text())
    })?;
    let name = request
        .tool_name()
        .ok_or_else(|| ApiError::unprocessable("request must name a tool in 'tool' or 'tool_reg'"))?
        .to_string();
    tracing::Span::current().record("tool", name.as_str());

    let params = request
        .params
        .unwrap_or_else(|| Value::Object(Map::new()));
    let result = server.execute(&name, params).await?;
    Ok(Json(json!({ "result": result })))
}

/// `GET /discovery` - what the most recent scan found.
async fn discovery(State(server): State<ToolServer>) -> impl IntoResponse {
    let tools = server.tools();
    let last_scan = tools.last_scan();
    Json(json!({
        "directory": tools.config().directory.display().to_string(),
        "generation": tools.registry().generation(),
        "last_scan": last_scan.as_deref(),
    }))
}

async fn control_panel() -> Html<&'static str> {
    Html(CONTROL_HTML)
}

async fn control_script() -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "application/javascript; charset=utf-8")],
        CONTROL_JS,
    )
}

/// `GET /config` - managed secrets, masked.
async fn get_config(State(server): State<ToolServer>) -> impl IntoResponse {
    Json(server.settings().view())
}

/// `POST /config` - persist non-empty values.
#[instrument(skip_all)]
async fn update_config(
    State(server): State<ToolServer>,
    payload: Result<Json<SettingsUpdate>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(update) = payload.map_err(|e| ApiError::unprocessable(e.body_text()))?;
    let settings = std::sync::Arc::clone(server.settings());
    let outcome = tokio::task::spawn_blocking(move || settings.update(update))
        .await
        .map_err(|e| ApiError::internal(format!("settings update failed: {e}")))??;
    info!(updated = outcome.updated, "Settings updated");
    Ok(Json(outcome))
}
