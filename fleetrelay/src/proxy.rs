// Copyright 2026 The Fleetrelay Project
// SPDX-License-Identifier: Apache-2.0

// HTTP surface
//
// Responsibilities:
// - Chat CRUD scoped to the resolved caller
// - Chat turns: persist the new user message, start the agent turn, and
//   stream the rewritten events back
// - Map every failure onto a status code with a public message only

use crate::agent::{AgentClient, AgentTurn};
use crate::identity::{IdentityError, IdentityResolver, UserId};
use crate::message::{message_text, ChatMessage, Role};
use crate::store::{Chat, ChatStore, ChatSummary, NewMessage, StoreError};
use crate::stream::ui_tag::extract_ui_signals;
use crate::stream::StreamProcessor;
use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{FromRequestParts, Path, State};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors surfaced to the HTTP client before any stream byte is sent.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProxyError {
    #[error("agent endpoint is not configured")]
    NotConfigured,

    #[error("upstream request failed: {0}")]
    UpstreamFailure(String),

    #[error("upstream request timed out: {0}")]
    UpstreamTimeout(String),

    #[error("upstream answered {status}: {body}")]
    UpstreamStatus { status: StatusCode, body: String },

    #[error("request body is not valid JSON: {0}")]
    MalformedJson(String),

    #[error("request body is empty")]
    EmptyBody,

    #[error("failed to read request body: {0}")]
    BodyUnreadable(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("chat not found")]
    ChatNotFound,

    #[error("message not found")]
    MessageNotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let (status, public_message) = match &self {
            ProxyError::NotConfigured => (
                StatusCode::SERVICE_UNAVAILABLE,
                "agent endpoint is not configured".to_string(),
            ),
            ProxyError::UpstreamFailure(_) => (
                StatusCode::BAD_GATEWAY,
                "upstream request failed".to_string(),
            ),
            ProxyError::UpstreamTimeout(_) => (
                StatusCode::GATEWAY_TIMEOUT,
                "upstream request timed out".to_string(),
            ),
            ProxyError::UpstreamStatus { status, .. } => (
                *status,
                format!("upstream request failed with status {}", status.as_u16()),
            ),
            ProxyError::MalformedJson(_) => (
                StatusCode::BAD_REQUEST,
                "request body is not valid JSON".to_string(),
            ),
            ProxyError::EmptyBody => (
                StatusCode::BAD_REQUEST,
                "request body is empty".to_string(),
            ),
            ProxyError::BodyUnreadable(_) => (
                StatusCode::BAD_REQUEST,
                "failed to read request body".to_string(),
            ),
            ProxyError::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, format!("invalid request: {msg}")),
            ProxyError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized".to_string()),
            ProxyError::ChatNotFound => (StatusCode::NOT_FOUND, "chat not found".to_string()),
            ProxyError::MessageNotFound => (StatusCode::NOT_FOUND, "message not found".to_string()),
            ProxyError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
        };
        (status, public_message).into_response()
    }
}

impl From<StoreError> for ProxyError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::ChatNotFound => ProxyError::ChatNotFound,
            StoreError::MessageNotFound => ProxyError::MessageNotFound,
            StoreError::DuplicateMessage(_) => ProxyError::Conflict(e.to_string()),
        }
    }
}

impl From<IdentityError> for ProxyError {
    fn from(e: IdentityError) -> Self {
        match e {
            IdentityError::Unauthorized => ProxyError::Unauthorized,
        }
    }
}

// ---------------------------------------------------------------------------
// Shared application state
// ---------------------------------------------------------------------------

/// Shared state injected into axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub agent: Arc<dyn AgentClient>,
    pub store: Arc<dyn ChatStore>,
    pub identity: Arc<dyn IdentityResolver>,
    pub processor: Arc<StreamProcessor>,
    pub max_body_bytes: usize,
    /// Mark the init cookie `Secure` (production deployments).
    pub secure_cookies: bool,
}

/// The caller of a request, resolved through `AppState::identity`.
pub struct Caller(pub UserId);

#[async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = ProxyError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        Ok(Caller(state.identity.resolve(parts)?))
    }
}

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTurnRequest {
    pub model: Option<String>,
    pub model_provider: Option<String>,
    pub messages: Option<Vec<ChatMessage>>,
    #[serde(default)]
    pub policy_urls: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateChatRequest {
    pub prompt: String,
}

#[derive(Debug, Deserialize)]
pub struct NewMessageRequest {
    pub id: Option<String>,
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct AppendMessageRequest {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateMessageRequest {
    pub content: String,
}

/// Read and decode a JSON body. Empty and non-JSON bodies are told apart
/// from well-formed JSON of the wrong shape.
async fn read_json<T: DeserializeOwned>(body: Body, limit: usize) -> Result<T, ProxyError> {
    let bytes = axum::body::to_bytes(body, limit)
        .await
        .map_err(|e| ProxyError::BodyUnreadable(e.to_string()))?;
    if bytes.is_empty() {
        return Err(ProxyError::EmptyBody);
    }
    let value: serde_json::Value =
        serde_json::from_slice(&bytes).map_err(|e| ProxyError::MalformedJson(e.to_string()))?;
    serde_json::from_value(value).map_err(|e| ProxyError::InvalidRequest(e.to_string()))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /api/ping -> 200 "ok", setting the client init cookie.
pub async fn ping(State(state): State<AppState>) -> impl IntoResponse {
    let mut cookie = String::from("app-init=1; Path=/; SameSite=None");
    if state.secure_cookies {
        cookie.push_str("; Secure");
    }
    ([(header::SET_COOKIE, cookie)], "ok")
}

/// POST /api/chats -> new chat whose first message is the prompt.
pub async fn create_chat(
    State(state): State<AppState>,
    Caller(user_id): Caller,
    body: Body,
) -> Result<Json<Chat>, ProxyError> {
    let request: CreateChatRequest = read_json(body, state.max_body_bytes).await?;
    if request.prompt.trim().is_empty() {
        return Err(ProxyError::InvalidRequest("prompt must not be empty".into()));
    }

    let chat = state.store.create_chat(&user_id, &request.prompt);
    tracing::info!(chat_id = %chat.id, user_id = %user_id, "chat created");
    Ok(Json(chat))
}

/// GET /api/chats -> the caller's chats, newest first.
pub async fn list_chats(State(state): State<AppState>, Caller(user_id): Caller) -> Json<Vec<ChatSummary>> {
    Json(state.store.list_chats(&user_id))
}

/// GET /api/chats/:id -> the chat with its messages.
pub async fn get_chat(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    Caller(user_id): Caller,
) -> Result<Json<Chat>, ProxyError> {
    state
        .store
        .find_chat(&chat_id, &user_id)
        .map(Json)
        .ok_or(ProxyError::ChatNotFound)
}

/// DELETE /api/chats/:id -> the deleted chats (empty when nothing matched).
pub async fn delete_chat(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    Caller(user_id): Caller,
) -> Json<Vec<Chat>> {
    let deleted: Vec<Chat> = state.store.delete_chat(&chat_id, &user_id).into_iter().collect();
    if !deleted.is_empty() {
        tracing::info!(chat_id = %chat_id, user_id = %user_id, "chat deleted");
    }
    Json(deleted)
}

/// PUT /api/chats/:id -> append a message to the chat. Answers 204.
pub async fn append_message(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    Caller(user_id): Caller,
    body: Body,
) -> Result<StatusCode, ProxyError> {
    let request: AppendMessageRequest = read_json(body, state.max_body_bytes).await?;
    let stored = state.store.insert_message(
        &user_id,
        NewMessage::new(chat_id, request.role, request.content),
    )?;
    tracing::info!(
        chat_id = %stored.chat_id,
        message_id = %stored.id,
        role = stored.role.as_str(),
        "message appended"
    );
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/chats/:id -> one chat turn, answered with the rewritten
/// event stream.
pub async fn chat_turn(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    Caller(user_id): Caller,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, ProxyError> {
    let request_id = Uuid::new_v4().to_string();
    let span = tracing::info_span!(
        "chat_turn",
        request_id = %request_id,
        chat_id = %chat_id,
        user_id = %user_id
    );

    run_turn(state, request_id, chat_id, user_id, headers, body)
        .instrument(span)
        .await
}

async fn run_turn(
    state: AppState,
    request_id: String,
    chat_id: String,
    user_id: UserId,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, ProxyError> {
    let request: ChatTurnRequest = read_json(body, state.max_body_bytes).await?;
    let messages = request
        .messages
        .filter(|m| !m.is_empty())
        .ok_or_else(|| ProxyError::InvalidRequest("messages must be a non-empty array".into()))?;

    let chat = state
        .store
        .find_chat(&chat_id, &user_id)
        .ok_or(ProxyError::ChatNotFound)?;

    // The first prompt was stored when the chat was created.
    if let Some(last) = messages.last().filter(|m| m.role == Role::User && messages.len() > 1) {
        let text = message_text(last).map_err(|e| ProxyError::InvalidRequest(e.to_string()))?;
        state
            .store
            .insert_message(&user_id, NewMessage::new(&chat.id, Role::User, text))?;
        tracing::debug!("user message stored");
    }

    let turn = AgentTurn {
        request_id,
        user_id,
        chat_id: chat.id,
        model_provider: request.model_provider,
        model: request.model,
        messages,
        policy_urls: request.policy_urls,
        client_headers: headers,
    };

    let response = match state.agent.start_turn(turn).await {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(error = %e, "agent turn failed before streaming");
            return Err(e);
        }
    };

    if !response.is_event_stream() {
        tracing::warn!(
            status = response.status.as_u16(),
            "agent answered without an event stream, forwarding unchanged"
        );
        let mut forwarded = HeaderMap::new();
        if let Some(ct) = response.headers.get(header::CONTENT_TYPE) {
            forwarded.insert(header::CONTENT_TYPE, ct.clone());
        }
        let body = Body::from_stream(response.body.into_stream());
        return Ok((response.status, forwarded, body).into_response());
    }

    tracing::info!(status = response.status.as_u16(), "agent stream opened");
    let events = state.processor.process(response.body.into_stream());

    Ok((
        response.status,
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Body::from_stream(events),
    )
        .into_response())
}

/// POST /api/chats/:id/messages -> store a finished message. Wrapped UI
/// signals in assistant content are stored alongside it.
pub async fn add_message(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    Caller(user_id): Caller,
    body: Body,
) -> Result<impl IntoResponse, ProxyError> {
    let request: NewMessageRequest = read_json(body, state.max_body_bytes).await?;

    let ui_signals = match request.role {
        Role::Assistant => extract_ui_signals(&request.content),
        _ => Vec::new(),
    };

    let stored = state.store.insert_message(
        &user_id,
        NewMessage {
            id: request.id,
            chat_id,
            role: request.role,
            content: request.content,
            ui_signals,
        },
    )?;

    tracing::info!(
        chat_id = %stored.chat_id,
        message_id = %stored.id,
        role = stored.role.as_str(),
        ui_signals = stored.ui_signals.len(),
        "message stored"
    );
    Ok((StatusCode::CREATED, Json(stored)))
}

/// GET /api/chats/:id/messages/:message_id
pub async fn get_message(
    State(state): State<AppState>,
    Path((chat_id, message_id)): Path<(String, String)>,
    Caller(user_id): Caller,
) -> Result<impl IntoResponse, ProxyError> {
    Ok(Json(state.store.find_message(&chat_id, &message_id, &user_id)?))
}

/// PUT /api/chats/:id/messages/:message_id -> replace the message content.
pub async fn update_message(
    State(state): State<AppState>,
    Path((chat_id, message_id)): Path<(String, String)>,
    Caller(user_id): Caller,
    body: Body,
) -> Result<impl IntoResponse, ProxyError> {
    let request: UpdateMessageRequest = read_json(body, state.max_body_bytes).await?;
    let updated = state
        .store
        .update_message(&chat_id, &message_id, &user_id, request.content)?;
    tracing::info!(chat_id = %chat_id, message_id = %updated.id, "message updated");
    Ok(Json(serde_json::json!({ "success": true })))
}

// ---------------------------------------------------------------------------
// Router construction
// ---------------------------------------------------------------------------

/// Build the axum router. All collaborators come in through `state`.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/ping", get(ping))
        .route("/api/chats", get(list_chats).post(create_chat))
        .route(
            "/api/chats/:id",
            get(get_chat)
                .post(chat_turn)
                .put(append_message)
                .delete(delete_chat),
        )
        .route("/api/chats/:id/messages", post(add_message))
        .route(
            "/api/chats/:id/messages/:message_id",
            get(get_message).put(update_message),
        )
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentResponse, HttpBody};
    use crate::identity::SessionIdResolver;
    use crate::store::InMemoryChatStore;
    use crate::stream::IdSource;
    use axum::http::{HeaderValue, Request};
    use bytes::Bytes;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt; // for oneshot

    // -----------------------------------------------------------------------
    // Test doubles
    // -----------------------------------------------------------------------

    #[derive(Clone)]
    enum AgentReply {
        Sse(&'static str),
        Json(&'static str),
        Fail(ProxyError),
    }

    /// Agent that records every turn and answers with a canned reply.
    struct MockAgent {
        reply: AgentReply,
        turns: tokio::sync::Mutex<Vec<AgentTurn>>,
    }

    impl MockAgent {
        fn new(reply: AgentReply) -> Arc<Self> {
            Arc::new(Self {
                reply,
                turns: tokio::sync::Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl AgentClient for MockAgent {
        async fn start_turn(&self, turn: AgentTurn) -> Result<AgentResponse, ProxyError> {
            self.turns.lock().await.push(turn);
            let (content_type, body) = match &self.reply {
                AgentReply::Sse(body) => ("text/event-stream", *body),
                AgentReply::Json(body) => ("application/json", *body),
                AgentReply::Fail(e) => return Err(e.clone()),
            };
            let mut headers = HeaderMap::new();
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
            Ok(AgentResponse {
                status: StatusCode::OK,
                headers,
                body: HttpBody::Full(Bytes::from_static(body.as_bytes())),
            })
        }
    }

    #[derive(Default)]
    struct CountingIds(AtomicUsize);

    impl IdSource for CountingIds {
        fn next_id(&self) -> String {
            format!("gen-{}", self.0.fetch_add(1, Ordering::SeqCst) + 1)
        }
    }

    struct Harness {
        app: Router,
        agent: Arc<MockAgent>,
        store: Arc<InMemoryChatStore>,
    }

    fn harness(reply: AgentReply) -> Harness {
        let agent = MockAgent::new(reply);
        let store = Arc::new(InMemoryChatStore::new());
        let state = AppState {
            agent: agent.clone(),
            store: store.clone(),
            identity: Arc::new(SessionIdResolver),
            processor: Arc::new(StreamProcessor::new(Arc::new(CountingIds::default()), 8)),
            max_body_bytes: 64 * 1024,
            secure_cookies: false,
        };
        Harness {
            app: build_router(state),
            agent,
            store,
        }
    }

    fn request(method: &str, uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_owned()))
            .unwrap()
    }

    async fn body_string(resp: Response) -> String {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn body_json(resp: Response) -> Value {
        serde_json::from_str(&body_string(resp).await).unwrap()
    }

    const TURN_BODY: &str = r#"{"model":"gpt-4o","messages":[{"role":"user","content":"hi"}]}"#;

    const UPSTREAM_EVENTS: &str = concat!(
        "data: {\"type\":\"text-start\",\"id\":\"t1\"}\n",
        "\n",
        "data: {\"type\":\"workflow-progress\"}\n",
        "\n",
        "data: {\"type\":\"text-delta\",\"delta\":\"hi\"}\n",
        "\n",
        "data: {\"type\":\"text-end\",\"id\":\"t1\"}\n",
        "\n",
    );

    // -----------------------------------------------------------------------
    // Ping
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn ping_returns_ok_and_sets_init_cookie() {
        let h = harness(AgentReply::Sse(""));
        let resp = h
            .app
            .oneshot(Request::get("/api/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        let cookie = resp.headers()[header::SET_COOKIE].to_str().unwrap().to_string();
        assert!(cookie.starts_with("app-init=1"), "{cookie}");
        assert!(!cookie.contains("Secure"));
        assert_eq!(body_string(resp).await, "ok");
    }

    // -----------------------------------------------------------------------
    // Chat turn: rejection paths
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn turn_without_session_is_unauthorized() {
        let h = harness(AgentReply::Sse(UPSTREAM_EVENTS));
        let resp = h.app.oneshot(request("POST", "/api/chats/c1", TURN_BODY)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(h.agent.turns.lock().await.is_empty());
    }

    #[tokio::test]
    async fn turn_for_unknown_chat_is_not_found() {
        let h = harness(AgentReply::Sse(UPSTREAM_EVENTS));
        let resp = h
            .app
            .oneshot(request("POST", "/api/chats/nope?sessionId=u1", TURN_BODY))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert!(h.agent.turns.lock().await.is_empty());
    }

    #[tokio::test]
    async fn turn_for_someone_elses_chat_is_not_found() {
        let h = harness(AgentReply::Sse(UPSTREAM_EVENTS));
        let chat = h.store.create_chat(&UserId::new("owner"), "hello");

        let uri = format!("/api/chats/{}?sessionId=intruder", chat.id);
        let resp = h.app.oneshot(request("POST", &uri, TURN_BODY)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn turn_rejects_bad_bodies() {
        let h = harness(AgentReply::Sse(UPSTREAM_EVENTS));
        let chat = h.store.create_chat(&UserId::new("u1"), "hello");
        let uri = format!("/api/chats/{}?sessionId=u1", chat.id);

        for body in ["", "{not json", "{}", r#"{"messages":[]}"#, r#"{"messages":[{"role":"robot"}]}"#] {
            let resp = h.app.clone().oneshot(request("POST", &uri, body)).await.unwrap();
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "body {body:?}");
        }
        assert!(h.agent.turns.lock().await.is_empty());
    }

    // -----------------------------------------------------------------------
    // Chat turn: streaming
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn turn_streams_rewritten_events() {
        let h = harness(AgentReply::Sse(UPSTREAM_EVENTS));
        let chat = h.store.create_chat(&UserId::new("u1"), "hello");

        let uri = format!("/api/chats/{}?sessionId=u1", chat.id);
        let resp = h.app.oneshot(request("POST", &uri, TURN_BODY)).await.unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "text/event-stream");
        assert_eq!(resp.headers()[header::CACHE_CONTROL], "no-cache");
        assert_eq!(resp.headers()["x-accel-buffering"], "no");
        assert_eq!(
            body_string(resp).await,
            concat!(
                "data: {\"type\":\"text-start\",\"id\":\"t1\"}\n",
                "\n",
                "data: {\"type\":\"text-delta\",\"delta\":\"hi\",\"id\":\"t1\"}\n",
                "\n",
                "data: {\"type\":\"text-end\",\"id\":\"t1\"}\n",
                "\n",
            )
        );
    }

    #[tokio::test]
    async fn turn_passes_chat_context_to_agent() {
        let h = harness(AgentReply::Sse(""));
        let chat = h.store.create_chat(&UserId::new("u1"), "hello");

        let body = r#"{"modelProvider":"anthropic","messages":[{"role":"user","content":"hi"}],"policyUrls":["https://p.test/1"]}"#;
        let uri = format!("/api/chats/{}?sessionId=u1", chat.id);
        let mut req = request("POST", &uri, body);
        req.headers_mut()
            .insert("accept-language", HeaderValue::from_static("tr"));
        h.app.oneshot(req).await.unwrap();

        let turns = h.agent.turns.lock().await;
        assert_eq!(turns.len(), 1);
        let turn = &turns[0];
        assert_eq!(turn.chat_id, chat.id);
        assert_eq!(turn.user_id, UserId::new("u1"));
        assert_eq!(turn.model_provider.as_deref(), Some("anthropic"));
        assert_eq!(turn.model, None);
        assert_eq!(turn.policy_urls, vec!["https://p.test/1".to_string()]);
        assert_eq!(turn.client_headers["accept-language"], "tr");
        assert!(!turn.request_id.is_empty());
    }

    #[tokio::test]
    async fn follow_up_user_message_is_persisted() {
        let h = harness(AgentReply::Sse(""));
        let user = UserId::new("u1");
        let chat = h.store.create_chat(&user, "hello");

        let body = json!({
            "messages": [
                {"role": "user", "content": "hello"},
                {"role": "assistant", "content": "hi there"},
                {"role": "user", "parts": [
                    {"type": "reasoning", "text": "hidden"},
                    {"type": "text", "text": "tell me more"}
                ]}
            ]
        })
        .to_string();
        let uri = format!("/api/chats/{}?sessionId=u1", chat.id);
        let resp = h.app.oneshot(request("POST", &uri, &body)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let stored = h.store.find_chat(&chat.id, &user).unwrap();
        assert_eq!(stored.messages.len(), 2);
        assert_eq!(stored.messages[1].role, Role::User);
        assert_eq!(stored.messages[1].content, "tell me more");
    }

    #[tokio::test]
    async fn first_prompt_is_not_stored_twice() {
        let h = harness(AgentReply::Sse(""));
        let user = UserId::new("u1");
        let chat = h.store.create_chat(&user, "hi");

        let uri = format!("/api/chats/{}?sessionId=u1", chat.id);
        h.app.oneshot(request("POST", &uri, TURN_BODY)).await.unwrap();

        assert_eq!(h.store.find_chat(&chat.id, &user).unwrap().messages.len(), 1);
    }

    // -----------------------------------------------------------------------
    // Chat turn: agent failures
    // -----------------------------------------------------------------------

    async fn turn_status(reply: AgentReply) -> (StatusCode, String) {
        let h = harness(reply);
        let chat = h.store.create_chat(&UserId::new("u1"), "hello");
        let uri = format!("/api/chats/{}?sessionId=u1", chat.id);
        let resp = h.app.oneshot(request("POST", &uri, TURN_BODY)).await.unwrap();
        let status = resp.status();
        (status, body_string(resp).await)
    }

    #[tokio::test]
    async fn agent_status_is_preserved_without_leaking_body() {
        let (status, body) = turn_status(AgentReply::Fail(ProxyError::UpstreamStatus {
            status: StatusCode::TOO_MANY_REQUESTS,
            body: "internal quota detail".into(),
        }))
        .await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert!(!body.contains("quota"), "{body}");
    }

    #[tokio::test]
    async fn agent_failures_map_to_gateway_statuses() {
        let cases = [
            (ProxyError::UpstreamTimeout("30s".into()), StatusCode::GATEWAY_TIMEOUT),
            (ProxyError::UpstreamFailure("refused".into()), StatusCode::BAD_GATEWAY),
            (ProxyError::NotConfigured, StatusCode::SERVICE_UNAVAILABLE),
        ];
        for (error, expected) in cases {
            let (status, _) = turn_status(AgentReply::Fail(error)).await;
            assert_eq!(status, expected);
        }
    }

    #[tokio::test]
    async fn non_event_stream_answer_forwarded_unchanged() {
        let raw = r#"{"type":"workflow-step","note":"not rewritten"}"#;
        let h = harness(AgentReply::Json(raw));
        let chat = h.store.create_chat(&UserId::new("u1"), "hello");

        let uri = format!("/api/chats/{}?sessionId=u1", chat.id);
        let resp = h.app.oneshot(request("POST", &uri, TURN_BODY)).await.unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/json");
        assert_eq!(body_string(resp).await, raw);
    }

    // -----------------------------------------------------------------------
    // Chat and message CRUD
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn create_then_get_chat() {
        let h = harness(AgentReply::Sse(""));

        let resp = h
            .app
            .clone()
            .oneshot(request("POST", "/api/chats?sessionId=u1", r#"{"prompt":"Plan a phishing drill"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let created = body_json(resp).await;
        assert_eq!(created["title"], "Plan a phishing drill");
        assert_eq!(created["userId"], "u1");

        let uri = format!("/api/chats/{}?sessionId=u1", created["id"].as_str().unwrap());
        let resp = h.app.oneshot(request("GET", &uri, "")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let fetched = body_json(resp).await;
        assert_eq!(fetched["messages"][0]["content"], "Plan a phishing drill");
        assert_eq!(fetched["messages"][0]["role"], "user");
    }

    #[tokio::test]
    async fn create_chat_requires_prompt() {
        let h = harness(AgentReply::Sse(""));
        let resp = h
            .app
            .oneshot(request("POST", "/api/chats?sessionId=u1", r#"{"prompt":"  "}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn assistant_message_keeps_its_ui_signals() {
        let h = harness(AgentReply::Sse(""));
        let user = UserId::new("u1");
        let chat = h.store.create_chat(&user, "hello");

        let content = "Here you go ::ui:phishing_email:: eyJhIjoxfQ== ::/ui:phishing_email:: done";
        let body = json!({"id": "m-9", "role": "assistant", "content": content}).to_string();
        let uri = format!("/api/chats/{}/messages?sessionId=u1", chat.id);
        let resp = h.app.oneshot(request("POST", &uri, &body)).await.unwrap();

        assert_eq!(resp.status(), StatusCode::CREATED);
        let stored = body_json(resp).await;
        assert_eq!(stored["id"], "m-9");
        assert_eq!(stored["uiSignals"][0]["signal"], "phishing_email");
        assert_eq!(
            stored["uiSignals"][0]["message"],
            "::ui:phishing_email::eyJhIjoxfQ==::/ui:phishing_email::"
        );
        assert_eq!(h.store.find_chat(&chat.id, &user).unwrap().messages.len(), 2);
    }

    #[tokio::test]
    async fn message_for_foreign_chat_is_not_found() {
        let h = harness(AgentReply::Sse(""));
        let chat = h.store.create_chat(&UserId::new("owner"), "hello");

        let uri = format!("/api/chats/{}/messages?sessionId=other", chat.id);
        let resp = h
            .app
            .oneshot(request("POST", &uri, r#"{"role":"user","content":"x"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn duplicate_message_id_conflicts() {
        let h = harness(AgentReply::Sse(""));
        let chat = h.store.create_chat(&UserId::new("u1"), "hello");
        let uri = format!("/api/chats/{}/messages?sessionId=u1", chat.id);
        let body = r#"{"id":"m1","role":"assistant","content":"x"}"#;

        let first = h.app.clone().oneshot(request("POST", &uri, body)).await.unwrap();
        assert_eq!(first.status(), StatusCode::CREATED);
        let second = h.app.oneshot(request("POST", &uri, body)).await.unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn get_and_update_message() {
        let h = harness(AgentReply::Sse(""));
        let user = UserId::new("u1");
        let chat = h.store.create_chat(&user, "hello");
        let message_id = chat.messages[0].id.clone();
        let uri = format!("/api/chats/{}/messages/{}?sessionId=u1", chat.id, message_id);

        let resp = h
            .app
            .clone()
            .oneshot(request("PUT", &uri, r#"{"content":"edited"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await, json!({"success": true}));

        let resp = h.app.clone().oneshot(request("GET", &uri, "")).await.unwrap();
        assert_eq!(body_json(resp).await["content"], "edited");

        let missing = format!("/api/chats/{}/messages/nope?sessionId=u1", chat.id);
        let resp = h.app.oneshot(request("GET", &missing, "")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_chat_only_for_owner() {
        let h = harness(AgentReply::Sse(""));
        let chat = h.store.create_chat(&UserId::new("u1"), "hello");

        let foreign = format!("/api/chats/{}?sessionId=u2", chat.id);
        let resp = h.app.clone().oneshot(request("DELETE", &foreign, "")).await.unwrap();
        assert_eq!(body_json(resp).await, json!([]));
        assert_eq!(h.store.len(), 1);

        let own = format!("/api/chats/{}?sessionId=u1", chat.id);
        let resp = h.app.oneshot(request("DELETE", &own, "")).await.unwrap();
        assert_eq!(body_json(resp).await[0]["id"], chat.id.as_str());
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn list_chats_returns_only_callers_chats_newest_first() {
        let h = harness(AgentReply::Sse(""));
        let older = h.store.create_chat(&UserId::new("u1"), "older");
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let newer = h.store.create_chat(&UserId::new("u1"), "newer");
        h.store.create_chat(&UserId::new("u2"), "someone else's");

        let resp = h
            .app
            .clone()
            .oneshot(request("GET", "/api/chats?sessionId=u1", ""))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let listed = body_json(resp).await;
        let ids: Vec<&str> = listed
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec![newer.id.as_str(), older.id.as_str()]);
        assert_eq!(listed[0]["title"], "newer");
        assert!(listed[0].get("messages").is_none());

        let resp = h.app.oneshot(request("GET", "/api/chats", "")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn append_message_adds_to_owned_chat_only() {
        let h = harness(AgentReply::Sse(""));
        let chat = h.store.create_chat(&UserId::new("u1"), "hello");
        let body = r#"{"role":"assistant","content":"appended"}"#;

        let foreign = format!("/api/chats/{}?sessionId=u2", chat.id);
        let resp = h.app.clone().oneshot(request("PUT", &foreign, body)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let own = format!("/api/chats/{}?sessionId=u1", chat.id);
        let resp = h.app.clone().oneshot(request("PUT", &own, body)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let resp = h.app.oneshot(request("PUT", &own, "")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let messages = h.store.find_chat(&chat.id, &UserId::new("u1")).unwrap().messages;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].content, "appended");
    }
}
