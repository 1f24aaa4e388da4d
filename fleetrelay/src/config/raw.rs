// Raw YAML deserialization types (internal)
// Kept apart from the typed Config: interpolation, defaults and validation
// happen between the two.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    pub fleetrelay: String,
    pub environment: Option<String>,
    pub upstream: Option<RawUpstreamConfig>,
    pub stream: Option<RawStreamConfig>,
    pub server: Option<RawServerConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawUpstreamConfig {
    pub url: Option<String>,
    pub connect_timeout_ms: Option<u64>,
    pub model_provider: Option<String>,
    pub model: Option<String>,
    #[serde(default)]
    pub forward_headers: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawStreamConfig {
    pub channel_capacity: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawServerConfig {
    pub max_body_bytes: Option<usize>,
}
