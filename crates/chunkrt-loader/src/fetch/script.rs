// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Script hosts: where script chunks are inserted and executed

use crate::chunks::{ChunkPayload, ChunkRegistrar};
use crate::fetch::source::FetchFailure;
use crate::ids::ChunkId;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// A request to insert one script chunk
#[derive(Clone)]
pub struct ScriptRequest {
    /// Chunk being loaded
    pub chunk: ChunkId,
    /// Script locator
    pub src: String,
    /// Character set of the script
    pub charset: &'static str,
    /// Nonce to attach, if configured
    pub nonce: Option<String>,
    /// Callback the executed script registers through
    pub registrar: ChunkRegistrar,
}

/// Inserts script chunks and reports when they have run
///
/// `insert` returns once the script has executed (its load event) or failed
/// to load (its error event). A script that ran without registering its
/// chunk is detected by the caller.
#[async_trait]
pub trait ScriptHost: Send + Sync {
    /// Insert and execute a script
    async fn insert(&self, request: ScriptRequest) -> Result<(), FetchFailure>;
}

/// Script chunks compiled into the host program
///
/// Each locator maps to the payload its script would register when run.
#[derive(Clone, Default)]
pub struct BundledScripts {
    scripts: Arc<DashMap<String, ChunkPayload>>,
}

impl BundledScripts {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `payload` as the script at `src`
    pub fn serve(&self, src: impl Into<String>, payload: ChunkPayload) {
        self.scripts.insert(src.into(), payload);
    }

    /// Whether a script is served at `src`
    pub fn contains(&self, src: &str) -> bool {
        self.scripts.contains_key(src)
    }

    /// Number of scripts
    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    /// Whether no scripts are bundled
    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }
}

#[async_trait]
impl ScriptHost for BundledScripts {
    async fn insert(&self, request: ScriptRequest) -> Result<(), FetchFailure> {
        let payload = self
            .scripts
            .get(&request.src)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| FetchFailure::network(format!("no script at {}", request.src)))?;

        debug!("Executing bundled script {} for chunk {}", request.src, request.chunk);
        request.registrar.push(payload);
        Ok(())
    }
}
