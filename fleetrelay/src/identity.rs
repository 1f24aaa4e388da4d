// Copyright 2026 The Fleetrelay Project
// SPDX-License-Identifier: Apache-2.0

// Identity resolution
//
// Maps an incoming request to the opaque user id that scopes chat lookups
// and is forwarded to the agent. The id is never inspected beyond that.

use axum::extract::Query;
use axum::http::request::Parts;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Header consulted when the query string carries no session id.
pub const SESSION_HEADER: &str = "x-session-id";

/// Opaque user identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("no valid session on request")]
    Unauthorized,
}

/// Resolves the caller of a request.
pub trait IdentityResolver: Send + Sync {
    fn resolve(&self, parts: &Parts) -> Result<UserId, IdentityError>;
}

/// Trusts the `sessionId` query parameter (embedded iframe clients), then
/// the `x-session-id` header. Blank values count as absent.
#[derive(Debug, Default, Clone, Copy)]
pub struct SessionIdResolver;

#[derive(Deserialize)]
struct SessionQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

impl IdentityResolver for SessionIdResolver {
    fn resolve(&self, parts: &Parts) -> Result<UserId, IdentityError> {
        let from_query = Query::<SessionQuery>::try_from_uri(&parts.uri)
            .ok()
            .and_then(|Query(q)| q.session_id);
        let from_header = || {
            parts
                .headers
                .get(SESSION_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };

        from_query
            .filter(|s| !s.trim().is_empty())
            .or_else(|| from_header().filter(|s| !s.trim().is_empty()))
            .map(|s| UserId::new(s.trim()))
            .ok_or(IdentityError::Unauthorized)
    }
}
