//! Chat HTTP server.
//!
//! Serves the retrieval-augmented chat endpoint over the persisted index.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/chat` | Ask a question; answer streams back as plain text |
//! | `GET`  | `/healthz` | Health check (returns version) |
//!
//! # Response Contract
//!
//! A successful `/chat` response is a streamed text body: generated prose
//! followed by `\n\n[[SOURCES]]<json>[[/SOURCES]]`, where the JSON is the
//! citation array for the client to render separately. A failed request is
//! JSON:
//!
//! ```json
//! { "error": "validation_failed", "message": "message must not be empty" }
//! ```
//!
//! Error kinds: `invalid_content_type` (415), `request_too_large` (413),
//! `cross_origin` (403), `rate_limited` (429), `validation_failed` (400),
//! `server_configuration` (500), `embedding_failed` (502), `no_content`
//! (503), `index_loading_failed` (500), `model_unavailable` (502),
//! `authentication_failed` (500), `internal_error` (500).
//!
//! Request gates run cheapest-first: content type, body size, origin,
//! validation, rate limit — only then does the request touch the
//! embedding provider and the index.

use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, DefaultBodyLimit, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use fancy_regex::Regex;
use futures::{stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::{Arc, LazyLock};
use thiserror::Error;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{Config, ServerConfig};
use crate::context::build_context;
use crate::embedding::EmbeddingClient;
use crate::generate::{self, GenerateError};
use crate::intent;
use crate::models::{ChatTurn, DocKind, EmbeddedDocument, TurnRole};
use crate::ratelimit::{client_key, RateLimiter};
use crate::retrieve;
use crate::store::IndexStore;

const FORBIDDEN_PATTERNS: &[&str] = &["<script", "<iframe", "javascript:"];
const MAX_FOCUS_URLS: usize = 10;

static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("valid regex")
});

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    index: Arc<IndexStore>,
    limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let limiter = RateLimiter::from_config(&config);
        let index = IndexStore::new(config.index.path.clone());
        Self {
            config: Arc::new(config),
            index: Arc::new(index),
            limiter: Arc::new(limiter),
        }
    }
}

/// Starts the chat server on the configured bind address and runs until
/// the process is terminated.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let state = AppState::new(config);
    let app = router(state);

    println!("chat server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.server.allowed_origins);

    Router::new()
        .route("/chat", post(handle_chat))
        .route("/healthz", get(handle_health))
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(cors)
        .with_state(state)
}

/// Browsers on unlisted origins get no CORS headers at all, so only the
/// configured origins (plus same-origin pages) can read responses.
fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
}

// ============ Error response ============

/// Request-time failure, one variant per wire error kind. `detail` fields
/// are logged server-side and never sent to the client; the display
/// string is the user-facing message.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("requests must use content-type application/json")]
    InvalidContentType,
    #[error("request body is too large")]
    RequestTooLarge,
    #[error("cross-origin requests are not allowed")]
    CrossOrigin,
    #[error("{message}")]
    RateLimited { message: String },
    #[error("{message}")]
    ValidationFailed { message: String },
    #[error("chat is not configured on this server")]
    ServerConfiguration { detail: String },
    #[error("could not process the question right now, please try again")]
    EmbeddingFailed { detail: String },
    #[error("no site content has been indexed yet")]
    NoContent,
    #[error("site content could not be loaded")]
    IndexLoadingFailed { detail: String },
    #[error("the assistant is temporarily unavailable, please try again shortly")]
    ModelUnavailable { detail: String },
    #[error("the assistant is temporarily unavailable")]
    AuthenticationFailed,
    #[error("something went wrong")]
    Internal { detail: String },
}

impl ChatError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidContentType => "invalid_content_type",
            Self::RequestTooLarge => "request_too_large",
            Self::CrossOrigin => "cross_origin",
            Self::RateLimited { .. } => "rate_limited",
            Self::ValidationFailed { .. } => "validation_failed",
            Self::ServerConfiguration { .. } => "server_configuration",
            Self::EmbeddingFailed { .. } => "embedding_failed",
            Self::NoContent => "no_content",
            Self::IndexLoadingFailed { .. } => "index_loading_failed",
            Self::ModelUnavailable { .. } => "model_unavailable",
            Self::AuthenticationFailed => "authentication_failed",
            Self::Internal { .. } => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidContentType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::RequestTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::CrossOrigin => StatusCode::FORBIDDEN,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::ValidationFailed { .. } => StatusCode::BAD_REQUEST,
            Self::EmbeddingFailed { .. } | Self::ModelUnavailable { .. } => {
                StatusCode::BAD_GATEWAY
            }
            Self::NoContent => StatusCode::SERVICE_UNAVAILABLE,
            Self::ServerConfiguration { .. }
            | Self::IndexLoadingFailed { .. }
            | Self::AuthenticationFailed
            | Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn detail(&self) -> Option<&str> {
        match self {
            Self::ServerConfiguration { detail }
            | Self::EmbeddingFailed { detail }
            | Self::IndexLoadingFailed { detail }
            | Self::ModelUnavailable { detail }
            | Self::Internal { detail } => Some(detail),
            _ => None,
        }
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(
                kind = self.kind(),
                detail = self.detail().unwrap_or(""),
                "chat request failed"
            );
        } else {
            warn!(kind = self.kind(), "chat request rejected");
        }

        let body = serde_json::json!({
            "error": self.kind(),
            "message": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

// ============ POST /chat ============

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatRequest {
    message: String,
    #[serde(default)]
    focus_urls: Vec<String>,
    #[serde(default)]
    history: Vec<ChatTurn>,
}

async fn handle_chat(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ChatError> {
    let request_id = Uuid::new_v4();

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !content_type.starts_with("application/json") {
        return Err(ChatError::InvalidContentType);
    }

    if body.len() > state.config.server.max_body_bytes {
        return Err(ChatError::RequestTooLarge);
    }

    if !origin_allowed(&headers, &state.config.server.allowed_origins) {
        return Err(ChatError::CrossOrigin);
    }

    let request: ChatRequest = serde_json::from_slice(&body).map_err(|_| {
        ChatError::ValidationFailed {
            message: "request body must be valid JSON".to_string(),
        }
    })?;
    validate_request(&request, &state.config.server)
        .map_err(|message| ChatError::ValidationFailed { message })?;
    let question = request.message.trim().to_string();

    info!(
        %request_id,
        focus_urls = request.focus_urls.len(),
        history = request.history.len(),
        "chat request"
    );

    let ip = client_ip(&headers, &addr);
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let decision = state.limiter.check(&client_key(&ip, user_agent)).await;
    if !decision.allowed {
        warn!(%request_id, "rate limited");
        let index = state.index.get().await.unwrap_or_default();
        return Err(ChatError::RateLimited {
            message: friendly_limit_message(&index),
        });
    }

    if state.config.secrets.openai_api_key.is_none() {
        return Err(ChatError::ServerConfiguration {
            detail: "OPENAI_API_KEY not set".to_string(),
        });
    }

    // Follow-up questions embed poorly on their own, so the prior user
    // turn is prepended to the embedding input.
    let embed_input = match (
        intent::is_followup(&question),
        last_user_turn(&request.history),
    ) {
        (true, Some(prior)) => format!("{}\n{}", prior, question),
        _ => question.clone(),
    };

    let embed_client =
        EmbeddingClient::new(&state.config).map_err(|e| ChatError::ServerConfiguration {
            detail: e.to_string(),
        })?;
    let query_vec = embed_client
        .embed_query(&embed_input)
        .await
        .map_err(|e| ChatError::EmbeddingFailed {
            detail: format!("{:#}", e),
        })?;

    let index = state
        .index
        .get()
        .await
        .map_err(|e| ChatError::IndexLoadingFailed {
            detail: format!("{:#}", e),
        })?;
    if index.is_empty() {
        return Err(ChatError::NoContent);
    }

    let mut retrieved = retrieve::top_k_similar(&index, &query_vec, state.config.retrieval.top_k);
    if retrieved.is_empty() {
        retrieved = retrieve::lexical_fallback(&index, &question, state.config.retrieval.top_k);
    }

    if let Some(focused) = intent::focus_documents(&index, &request.focus_urls, &question) {
        retrieved = focused;
    }

    let docs = intent::resolve_intent(&question, &index, &retrieved);
    let prompt = build_context(&docs, state.config.retrieval.context_chars);

    let text_stream =
        generate::stream_answer(&state.config, &question, &prompt.context, &request.history)
            .await
            .map_err(|e| map_generate_error(e, &index))?;

    let sources_json = serde_json::to_string(&prompt.sources)
        .map_err(|e| ChatError::Internal {
            detail: e.to_string(),
        })?;
    let footer = format!("\n\n[[SOURCES]]{}[[/SOURCES]]", sources_json);

    info!(
        %request_id,
        docs = docs.len(),
        sources = prompt.sources.len(),
        "streaming answer"
    );

    // Dropping this stream on client disconnect drops the upstream
    // connection too; nothing is buffered.
    let byte_stream = text_stream
        .map(|item| item.map(Bytes::from))
        .chain(stream::once(async move {
            Ok::<Bytes, GenerateError>(Bytes::from(footer))
        }));

    let mut response = Response::new(Body::from_stream(byte_stream));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    Ok(response)
}

fn map_generate_error(err: GenerateError, index: &[EmbeddedDocument]) -> ChatError {
    match err {
        GenerateError::Authentication => ChatError::AuthenticationFailed,
        // Provider-side throttling degrades the same way as our own
        // limiter: a friendly message with somewhere to go next.
        GenerateError::RateLimited => ChatError::RateLimited {
            message: friendly_limit_message(index),
        },
        GenerateError::Timeout => ChatError::ModelUnavailable {
            detail: "generation timed out".to_string(),
        },
        GenerateError::Unavailable(detail) => ChatError::ModelUnavailable { detail },
    }
}

// ============ Request checks ============

fn validate_request(request: &ChatRequest, server: &ServerConfig) -> Result<(), String> {
    let message = request.message.trim();
    if message.is_empty() {
        return Err("message must not be empty".to_string());
    }
    if message.chars().count() > server.message_max_chars {
        return Err(format!(
            "message must be at most {} characters",
            server.message_max_chars
        ));
    }

    let lowered = message.to_lowercase();
    for pattern in FORBIDDEN_PATTERNS {
        if lowered.contains(pattern) {
            return Err("message contains disallowed content".to_string());
        }
    }

    if request.focus_urls.len() > MAX_FOCUS_URLS {
        return Err(format!(
            "at most {} focus urls are allowed",
            MAX_FOCUS_URLS
        ));
    }
    for url in &request.focus_urls {
        if !focus_url_ok(url) {
            return Err(format!("invalid focus url: {}", url));
        }
    }

    Ok(())
}

fn focus_url_ok(url: &str) -> bool {
    if url.contains("..") {
        return false;
    }
    url.starts_with('/') || url.starts_with("http://") || url.starts_with("https://")
}

/// Requests without an `Origin` header (curl, server-to-server, most
/// same-origin navigations) pass. With one, it must be a configured
/// origin or match the request's own host.
fn origin_allowed(headers: &HeaderMap, allowed: &[String]) -> bool {
    let Some(origin) = headers
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
    else {
        return true;
    };

    if allowed
        .iter()
        .any(|a| a.trim_end_matches('/') == origin.trim_end_matches('/'))
    {
        return true;
    }

    if let Some(host) = headers.get(header::HOST).and_then(|v| v.to_str().ok()) {
        if let Some(origin_host) = origin
            .strip_prefix("https://")
            .or_else(|| origin.strip_prefix("http://"))
        {
            return origin_host == host;
        }
    }

    false
}

fn client_ip(headers: &HeaderMap, addr: &SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| addr.ip().to_string())
}

fn last_user_turn(history: &[ChatTurn]) -> Option<&str> {
    history
        .iter()
        .rev()
        .find(|t| t.role == TurnRole::User)
        .map(|t| t.content.as_str())
}

/// Limit responses point somewhere useful: the newest post, and a contact
/// email when one appears in the resume.
fn friendly_limit_message(index: &[EmbeddedDocument]) -> String {
    let mut message = String::from(
        "You've reached the chat limit for now. Please try again in a little while.",
    );
    if let Some(post) = intent::newest_of_kind(index, DocKind::Post) {
        message.push_str(&format!(
            " In the meantime, the latest post is \"{}\" at {}.",
            post.title, post.url
        ));
    }
    if let Some(email) = contact_email(index) {
        message.push_str(&format!(" For anything urgent, email {}.", email));
    }
    message
}

fn contact_email(index: &[EmbeddedDocument]) -> Option<String> {
    for doc in index {
        if doc.kind != DocKind::Resume {
            continue;
        }
        if let Ok(Some(found)) = EMAIL_PATTERN.find(&doc.text) {
            return Some(found.as_str().to_string());
        }
    }
    None
}

// ============ GET /healthz ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
