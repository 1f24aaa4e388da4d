// Copyright 2026 The Fleetrelay Project
// SPDX-License-Identifier: Apache-2.0

// Fleet Agent client
//
// One POST per chat turn. Establishment (connect plus response headers) is
// bounded; once the body is streaming there is no idle timeout. Nothing is
// retried.

use crate::config::UpstreamConfig;
use crate::identity::UserId;
use crate::message::ChatMessage;
use crate::proxy::ProxyError;
use async_trait::async_trait;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use bytes::{Bytes, BytesMut};
use futures_util::stream::{Stream, StreamExt};
use futures_util::TryStreamExt;
use serde::Serialize;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Header carrying the resolved caller to the agent.
pub const USER_ID_HEADER: &str = "x-user-id";
/// Header carrying the per-turn request id to the agent.
pub const REQUEST_ID_HEADER: &str = "x-request-id";
/// Upper bound on a failed upstream body kept for diagnostics.
pub const ERROR_BODY_LIMIT: usize = 64 * 1024;

const EVENT_STREAM: &str = "text/event-stream";

// ---------------------------------------------------------------------------
// Interfaces
// ---------------------------------------------------------------------------

/// Sends HTTP requests to the agent.
#[async_trait]
pub trait HttpSender: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError>;
}

/// Starts one agent turn and hands back the still-unread response.
#[async_trait]
pub trait AgentClient: Send + Sync {
    async fn start_turn(&self, turn: AgentTurn) -> Result<AgentResponse, ProxyError>;
}

// ---------------------------------------------------------------------------
// Transport types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Bound on connect plus response headers.
    pub connect_timeout: Option<Duration>,
}

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, HttpError>> + Send>>;

pub enum HttpBody {
    Full(Bytes),
    Stream(ByteStream),
}

impl HttpBody {
    pub fn into_stream(self) -> ByteStream {
        match self {
            HttpBody::Full(bytes) => Box::pin(futures_util::stream::once(async move { Ok(bytes) })),
            HttpBody::Stream(s) => s,
        }
    }

    /// Read at most `limit` bytes. A read error ends collection early.
    pub async fn read_capped(self, limit: usize) -> Bytes {
        match self {
            HttpBody::Full(bytes) => bytes.slice(..bytes.len().min(limit)),
            HttpBody::Stream(mut s) => {
                let mut buf = BytesMut::new();
                while buf.len() < limit {
                    match s.next().await {
                        Some(Ok(chunk)) => {
                            let take = chunk.len().min(limit - buf.len());
                            buf.extend_from_slice(&chunk[..take]);
                        }
                        _ => break,
                    }
                }
                buf.freeze()
            }
        }
    }
}

pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: HttpBody,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum HttpError {
    #[error("upstream request failed: {0}")]
    Transport(String),
    #[error("upstream request timed out: {0}")]
    Timeout(String),
}

// ---------------------------------------------------------------------------
// Turn types
// ---------------------------------------------------------------------------

/// Everything needed to start one agent turn.
#[derive(Debug, Clone)]
pub struct AgentTurn {
    pub request_id: String,
    pub user_id: UserId,
    /// Sent as `conversationId`.
    pub chat_id: String,
    pub model_provider: Option<String>,
    pub model: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub policy_urls: Vec<String>,
    /// Headers of the client request; only allow-listed ones are forwarded.
    pub client_headers: HeaderMap,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AgentRequestBody<'a> {
    model_provider: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    messages: &'a [ChatMessage],
    conversation_id: &'a str,
    policy_urls: &'a [String],
}

/// A 2xx agent response whose body has not been read yet.
pub struct AgentResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: HttpBody,
}

impl AgentResponse {
    /// Whether the body is an SSE stream that should be rewritten.
    pub fn is_event_stream(&self) -> bool {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map(|mime| mime.trim().eq_ignore_ascii_case(EVENT_STREAM))
            .unwrap_or(false)
    }
}

// ---------------------------------------------------------------------------
// FleetAgentClient
// ---------------------------------------------------------------------------

pub struct FleetAgentClient {
    http: Arc<dyn HttpSender>,
    config: UpstreamConfig,
}

impl FleetAgentClient {
    pub fn new(http: Arc<dyn HttpSender>, config: UpstreamConfig) -> Self {
        Self { http, config }
    }

    fn build_headers(&self, turn: &AgentTurn) -> HeaderMap {
        let mut headers = HeaderMap::new();

        for name in &self.config.forward_headers {
            for value in turn.client_headers.get_all(name) {
                headers.append(name.clone(), value.clone());
            }
        }

        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(header::ACCEPT, HeaderValue::from_static(EVENT_STREAM));
        insert_opaque(&mut headers, USER_ID_HEADER, turn.user_id.as_str());
        insert_opaque(&mut headers, REQUEST_ID_HEADER, &turn.request_id);
        headers
    }
}

fn insert_opaque(headers: &mut HeaderMap, name: &'static str, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(v) => {
            headers.insert(HeaderName::from_static(name), v);
        }
        Err(_) => tracing::warn!(header = name, "value not representable as a header, not forwarded"),
    }
}

#[async_trait]
impl AgentClient for FleetAgentClient {
    async fn start_turn(&self, turn: AgentTurn) -> Result<AgentResponse, ProxyError> {
        let url = self.config.url.as_deref().ok_or(ProxyError::NotConfigured)?;

        let body = AgentRequestBody {
            model_provider: turn
                .model_provider
                .as_deref()
                .unwrap_or(&self.config.model_provider),
            model: turn.model.as_deref().or(self.config.model.as_deref()),
            messages: &turn.messages,
            conversation_id: &turn.chat_id,
            policy_urls: &turn.policy_urls,
        };
        let body = serde_json::to_vec(&body)
            .map_err(|e| ProxyError::UpstreamFailure(format!("failed to encode agent request: {e}")))?;

        tracing::debug!(
            request_id = %turn.request_id,
            chat_id = %turn.chat_id,
            messages = turn.messages.len(),
            body_bytes = body.len(),
            "sending agent turn"
        );

        let request = HttpRequest {
            method: Method::POST,
            url: url.to_string(),
            headers: self.build_headers(&turn),
            body: Bytes::from(body),
            connect_timeout: Some(self.config.connect_timeout),
        };

        let response = self.http.send(request).await.map_err(|e| match e {
            HttpError::Timeout(msg) => ProxyError::UpstreamTimeout(msg),
            HttpError::Transport(msg) => ProxyError::UpstreamFailure(msg),
        })?;

        if !response.status.is_success() {
            let captured = response.body.read_capped(ERROR_BODY_LIMIT).await;
            let body = String::from_utf8_lossy(&captured).into_owned();
            tracing::warn!(
                request_id = %turn.request_id,
                chat_id = %turn.chat_id,
                status = response.status.as_u16(),
                body = %body,
                "agent rejected turn"
            );
            return Err(ProxyError::UpstreamStatus {
                status: response.status,
                body,
            });
        }

        Ok(AgentResponse {
            status: response.status,
            headers: response.headers,
            body: response.body,
        })
    }
}

// ---------------------------------------------------------------------------
// Reqwest HTTP sender
// ---------------------------------------------------------------------------

pub struct ReqwestHttpSender {
    client: reqwest::Client,
}

impl ReqwestHttpSender {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn transport_error(e: reqwest::Error) -> HttpError {
    if e.is_timeout() {
        HttpError::Timeout(e.to_string())
    } else {
        HttpError::Transport(e.to_string())
    }
}

#[async_trait]
impl HttpSender for ReqwestHttpSender {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        let pending = self
            .client
            .request(request.method, &request.url)
            .headers(request.headers)
            .body(request.body)
            .send();

        // `RequestBuilder::timeout` would also cover the body, so the bound
        // is applied to header arrival only.
        let resp = match request.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, pending).await.map_err(|_| {
                HttpError::Timeout(format!("no response headers within {}ms", limit.as_millis()))
            })?,
            None => pending.await,
        }
        .map_err(transport_error)?;

        let status = resp.status();
        let headers = resp.headers().clone();
        let stream = resp.bytes_stream().map_err(transport_error);

        Ok(HttpResponse {
            status,
            headers,
            body: HttpBody::Stream(Box::pin(stream)),
        })
    }
}

/// Agent client over a default reqwest client.
pub fn build_agent_client(config: UpstreamConfig) -> FleetAgentClient {
    FleetAgentClient::new(Arc::new(ReqwestHttpSender::new(reqwest::Client::new())), config)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
