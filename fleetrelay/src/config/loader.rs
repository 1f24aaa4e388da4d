// Copyright 2026 The Fleetrelay Project
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use axum::http::HeaderName;
use sha2::{Digest, Sha256};

use super::error::ConfigError;
use super::interpolation::resolve_variables;
use super::raw;
use super::source::ConfigSource;
use super::types::*;

/// Load and validate a relay config from the given source.
///
/// Steps:
/// 1. Read raw YAML from source
/// 2. Compute the SHA256 config hash
/// 3. Parse YAML into raw deserialization types
/// 4. Check the version
/// 5. Resolve `${VAR}` references in string fields
/// 6. Apply defaults and validate values
pub fn load_config(source: &dyn ConfigSource) -> Result<Config, ConfigError> {
    let raw_yaml = source.load()?;
    let config_hash = compute_hash(&raw_yaml);

    let raw: raw::RawConfig = serde_yaml::from_str(&raw_yaml)?;

    if raw.fleetrelay != "v1" {
        return Err(ConfigError::Validation(format!(
            "unsupported config version \"{}\", expected \"v1\"",
            raw.fleetrelay
        )));
    }

    let environment = match raw.environment {
        Some(env) => resolve_variables(&env)?,
        None => String::new(),
    };

    Ok(Config {
        version: raw.fleetrelay,
        environment,
        upstream: build_upstream_config(raw.upstream)?,
        stream: build_stream_config(raw.stream)?,
        server: build_server_config(raw.server)?,
        config_hash,
    })
}

pub fn compute_hash(raw_yaml: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_yaml.as_bytes());
    let hash = hasher.finalize();
    format!("sha256:{:x}", hash)
}

fn build_upstream_config(raw: Option<raw::RawUpstreamConfig>) -> Result<UpstreamConfig, ConfigError> {
    let raw = match raw {
        Some(r) => r,
        None => return Ok(UpstreamConfig::default()),
    };

    let url = match &raw.url {
        Some(u) => {
            let resolved = resolve_variables(u)?;
            let trimmed = resolved.trim();
            if trimmed.is_empty() {
                None
            } else if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
                Some(trimmed.to_string())
            } else {
                return Err(ConfigError::Validation(format!(
                    "upstream.url \"{trimmed}\" must start with http:// or https://"
                )));
            }
        }
        None => None,
    };

    let connect_timeout_ms = raw.connect_timeout_ms.unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS);
    if connect_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "upstream.connect_timeout_ms must be greater than 0".to_string(),
        ));
    }

    let model_provider = match &raw.model_provider {
        Some(p) => resolve_variables(p)?,
        None => DEFAULT_MODEL_PROVIDER.to_string(),
    };

    let model = match &raw.model {
        Some(m) => Some(resolve_variables(m)?).filter(|m| !m.trim().is_empty()),
        None => None,
    };

    let forward_headers = raw
        .forward_headers
        .iter()
        .map(|name| {
            HeaderName::from_bytes(name.trim().to_ascii_lowercase().as_bytes())
                .map_err(|_| ConfigError::InvalidHeader { name: name.clone() })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(UpstreamConfig {
        url,
        connect_timeout: Duration::from_millis(connect_timeout_ms),
        model_provider,
        model,
        forward_headers,
    })
}

fn build_stream_config(raw: Option<raw::RawStreamConfig>) -> Result<StreamConfig, ConfigError> {
    let Some(capacity) = raw.and_then(|r| r.channel_capacity) else {
        return Ok(StreamConfig::default());
    };
    if capacity == 0 {
        return Err(ConfigError::Validation(
            "stream.channel_capacity must be greater than 0".to_string(),
        ));
    }
    Ok(StreamConfig {
        channel_capacity: capacity,
    })
}

fn build_server_config(raw: Option<raw::RawServerConfig>) -> Result<ServerConfig, ConfigError> {
    let Some(max_body_bytes) = raw.and_then(|r| r.max_body_bytes) else {
        return Ok(ServerConfig::default());
    };
    if max_body_bytes == 0 {
        return Err(ConfigError::Validation(
            "server.max_body_bytes must be greater than 0".to_string(),
        ));
    }
    Ok(ServerConfig { max_body_bytes })
}
