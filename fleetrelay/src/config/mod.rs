// Config loader and validator
//
// Loads fleetrelay.yaml, validates structure, resolves variable
// interpolation, and computes a deterministic config hash.

mod error;
mod interpolation;
mod loader;
mod raw;
mod source;
mod types;

pub use error::ConfigError;
pub use loader::{compute_hash, load_config};
pub use source::{ConfigSource, EnvOrFileSource, FileSource, StringSource, INLINE_CONFIG_VAR};
pub use types::{
    Config, ServerConfig, StreamConfig, UpstreamConfig, DEFAULT_CONNECT_TIMEOUT_MS,
    DEFAULT_MAX_BODY_BYTES, DEFAULT_MODEL_PROVIDER,
};
