// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Registration callback used by loaded script chunks

use crate::chunks::state::{ChunkState, LoadTable};
use crate::ids::{ChunkId, ModuleId};
use crate::module_system::{ModuleFactory, ModuleRegistry};
use std::sync::Arc;
use tracing::debug;

/// What a script chunk hands back once it has executed
#[derive(Clone, Default)]
pub struct ChunkPayload {
    /// Chunks this payload completes
    pub chunk_ids: Vec<ChunkId>,
    /// Module factories it contributes
    pub modules: Vec<(ModuleId, ModuleFactory)>,
}

impl ChunkPayload {
    /// Payload completing the given chunks
    pub fn new<I, C>(chunk_ids: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<ChunkId>,
    {
        Self {
            chunk_ids: chunk_ids.into_iter().map(Into::into).collect(),
            modules: Vec::new(),
        }
    }

    /// Add a module factory
    pub fn module(mut self, id: impl Into<ModuleId>, factory: ModuleFactory) -> Self {
        self.modules.push((id.into(), factory));
        self
    }
}

/// Handle through which executed script chunks register their modules
///
/// Cloned into every script request; payloads may also arrive unrequested
/// (preloaded chunks), in which case their chunks are installed directly.
#[derive(Clone)]
pub struct ChunkRegistrar {
    registry: Arc<ModuleRegistry>,
    chunks: Arc<LoadTable<ChunkId>>,
}

impl ChunkRegistrar {
    pub(crate) fn new(registry: Arc<ModuleRegistry>, chunks: Arc<LoadTable<ChunkId>>) -> Self {
        Self { registry, chunks }
    }

    /// Merge `modules` into the registry, then mark `chunk_ids` installed
    ///
    /// Factories are merged before any pending signal resolves, so waiters can
    /// `require` the new modules as soon as they wake.
    pub fn register<C, M>(&self, chunk_ids: C, modules: M)
    where
        C: IntoIterator<Item = ChunkId>,
        M: IntoIterator<Item = (ModuleId, ModuleFactory)>,
    {
        self.registry.register_all(modules);

        for chunk in chunk_ids {
            let was_pending = self.chunks.install(chunk.clone());
            debug!("Chunk {} registered (pending: {})", chunk, was_pending);
        }
    }

    /// Register a whole payload
    pub fn push(&self, payload: ChunkPayload) {
        self.register(payload.chunk_ids, payload.modules);
    }

    /// Whether `chunk` has been registered
    pub fn is_installed(&self, chunk: &ChunkId) -> bool {
        self.chunks.state(chunk) == ChunkState::Installed
    }

    /// The registry payloads are merged into
    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }
}
