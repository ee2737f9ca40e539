// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Runtime configuration

use crate::error::{Result, RuntimeError};
use crate::ids::ChunkId;
use crate::manifest::Manifest;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Prefix of environment variables that override file settings
pub const ENV_PREFIX: &str = "CHUNKRT_";

/// Configuration for a [`Runtime`](crate::Runtime)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Prefix prepended to every payload locator
    pub public_path: String,

    /// Seconds a single fetch may take before it fails with `timeout`
    pub chunk_timeout_secs: u64,

    /// Compile binary payloads while their bytes stream in, when the source streams
    pub compile_streaming: bool,

    /// Nonce attached to inserted scripts
    pub script_nonce: Option<String>,

    /// Automatic retries after a `network` or `timeout` failure
    pub max_retries: u32,

    /// Delay before the first retry; doubled for each further attempt
    pub retry_backoff_ms: u64,

    /// Build-time chunk tables
    pub manifest: Manifest,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            public_path: "dist/".to_string(),
            chunk_timeout_secs: 120,
            compile_streaming: true,
            script_nonce: None,
            max_retries: 0,
            retry_backoff_ms: 0,
            manifest: Manifest::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from an optional file, then the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(std::env::vars());
        config.manifest.validate()?;
        Ok(config)
    }

    /// Read a TOML or JSON file, chosen by extension
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading runtime configuration from {}", path.display());
        let content = std::fs::read_to_string(path)?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&content),
            Some("toml") | None => Self::from_toml_str(&content),
            Some(other) => Err(RuntimeError::Config(format!(
                "unsupported configuration format '.{}'",
                other
            ))),
        }
    }

    /// Parse TOML
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Parse JSON
    pub fn from_json_str(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Apply `CHUNKRT_*` overrides
    pub fn apply_env<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            if let Some(config_key) = key.strip_prefix(ENV_PREFIX) {
                let config_key = config_key.to_lowercase().replace('_', "-");
                self.set(&config_key, &value);
            }
        }
    }

    /// Set a configuration value by its dashed key
    ///
    /// Unknown keys and unparsable values are ignored.
    pub fn set(&mut self, key: &str, value: &str) {
        match key {
            "public-path" => self.public_path = value.to_string(),
            "chunk-timeout-secs" => {
                if let Ok(n) = value.parse() {
                    self.chunk_timeout_secs = n;
                }
            }
            "compile-streaming" => {
                if let Some(flag) = parse_flag(value) {
                    self.compile_streaming = flag;
                }
            }
            "script-nonce" => self.script_nonce = Some(value.to_string()),
            "max-retries" => {
                if let Ok(n) = value.parse() {
                    self.max_retries = n;
                }
            }
            "retry-backoff-ms" => {
                if let Ok(n) = value.parse() {
                    self.retry_backoff_ms = n;
                }
            }
            _ => debug!("Ignoring unknown configuration key '{}'", key),
        }
    }

    /// Fetch timeout
    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_secs(self.chunk_timeout_secs)
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(factor))
    }

    /// Locator of a chunk's script part
    pub fn script_locator(&self, chunk: &ChunkId) -> String {
        format!("{}{}.bundle.js", self.public_path, chunk)
    }

    /// Locator of a binary payload
    pub fn binary_locator(&self, fingerprint: &str) -> String {
        format!("{}{}.module.wasm", self.public_path, fingerprint)
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
