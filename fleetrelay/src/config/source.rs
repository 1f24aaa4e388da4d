// Copyright 2026 The Fleetrelay Project
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use super::error::ConfigError;

/// Environment variable that may carry the whole config inline.
pub const INLINE_CONFIG_VAR: &str = "FLEETRELAY_CONFIG_YAML";

/// Where relay config YAML comes from.
pub trait ConfigSource {
    fn load(&self) -> Result<String, ConfigError>;

    /// Short description for start-up logs.
    fn describe(&self) -> String;
}

/// A YAML file on disk.
pub struct FileSource {
    pub path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ConfigSource for FileSource {
    fn load(&self) -> Result<String, ConfigError> {
        std::fs::read_to_string(&self.path).map_err(|source| ConfigError::FileRead {
            path: self.path.clone(),
            source,
        })
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}

/// Inline YAML, used by tests.
pub struct StringSource {
    pub content: String,
}

impl ConfigSource for StringSource {
    fn load(&self) -> Result<String, ConfigError> {
        Ok(self.content.clone())
    }

    fn describe(&self) -> String {
        "inline string".to_string()
    }
}

/// YAML from an environment variable when it is set and non-blank,
/// otherwise from a file.
///
/// Container deployments set `FLEETRELAY_CONFIG_YAML`; everything else
/// points `--config` at a file.
pub struct EnvOrFileSource {
    pub var: String,
    pub file: FileSource,
}

impl EnvOrFileSource {
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self {
            var: INLINE_CONFIG_VAR.to_string(),
            file: FileSource::new(file),
        }
    }

    fn inline(&self) -> Option<String> {
        std::env::var(&self.var).ok().filter(|v| !v.trim().is_empty())
    }
}

impl ConfigSource for EnvOrFileSource {
    fn load(&self) -> Result<String, ConfigError> {
        match self.inline() {
            Some(yaml) => Ok(yaml),
            None => self.file.load(),
        }
    }

    fn describe(&self) -> String {
        match self.inline() {
            Some(_) => format!("env {}", self.var),
            None => self.file.describe(),
        }
    }
}
