// Copyright 2026 The Fleetrelay Project
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use axum::http::HeaderName;

use crate::stream::DEFAULT_CHANNEL_CAPACITY;

pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;
pub const DEFAULT_MODEL_PROVIDER: &str = "openai";

/// Top-level parsed and validated relay config.
#[derive(Debug, Clone)]
pub struct Config {
    /// Config version. Always "v1".
    pub version: String,
    /// Environment label (e.g. "staging", "production").
    pub environment: String,
    pub upstream: UpstreamConfig,
    pub stream: StreamConfig,
    pub server: ServerConfig,
    /// SHA256 of the raw YAML: "sha256:{hex}".
    pub config_hash: String,
}

/// Fleet Agent endpoint settings.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Agent endpoint. `None` when unset or blank; chat turns then fail
    /// before any request is sent.
    pub url: Option<String>,
    /// Bound on connect plus response headers. Not applied once streaming.
    pub connect_timeout: Duration,
    /// Sent as `modelProvider` when the client does not pick one.
    pub model_provider: String,
    /// Sent as `model` when the client does not pick one.
    pub model: Option<String>,
    /// Client request headers copied onto the upstream request.
    pub forward_headers: Vec<HeaderName>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: None,
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            model_provider: DEFAULT_MODEL_PROVIDER.to_string(),
            model: None,
            forward_headers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Rewritten chunks allowed to wait for a slow client.
    pub channel_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}
