// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Chunk fetching
//!
//! Script parts go through a [`ScriptHost`]; binary parts are pulled from a
//! [`ByteSource`] and handed to the linker. Every attempt is bounded by the
//! configured chunk timeout.

mod script;
mod source;

pub use script::{BundledScripts, ScriptHost, ScriptRequest};
#[cfg(feature = "http")]
pub use source::HttpSource;
pub use source::{ByteSource, FetchBody, FetchFailure, FsSource, MemorySource};

use crate::chunks::ChunkRegistrar;
use crate::config::RuntimeConfig;
use crate::error::{ChunkLoadError, FailureCategory, Result, RuntimeError};
use crate::ids::{BinaryModuleId, ChunkId};
use crate::linker::{BinaryLinker, CompiledBinary, ExportTable};
use crate::module_system::ModuleRegistry;
use futures::StreamExt;
use std::future::Future;
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

/// Character set announced for script chunks
pub const SCRIPT_CHARSET: &str = "utf-8";

fn load_error(chunk: &ChunkId, locator: &str, failure: FetchFailure) -> RuntimeError {
    ChunkLoadError::new(chunk.clone(), failure.category, locator)
        .with_detail(failure.detail)
        .into()
}

/// Performs individual fetches on behalf of the runtime
pub(crate) struct ChunkFetcher {
    config: Arc<RuntimeConfig>,
    scripts: Arc<dyn ScriptHost>,
    source: Arc<dyn ByteSource>,
    linker: BinaryLinker,
}

impl ChunkFetcher {
    pub(crate) fn new(
        config: Arc<RuntimeConfig>,
        scripts: Arc<dyn ScriptHost>,
        source: Arc<dyn ByteSource>,
        linker: BinaryLinker,
    ) -> Self {
        Self {
            config,
            scripts,
            source,
            linker,
        }
    }

    /// Load a chunk's script part; resolves once the chunk is registered
    #[instrument(skip(self, registrar))]
    pub(crate) async fn load_script(&self, chunk: &ChunkId, registrar: &ChunkRegistrar) -> Result<()> {
        let locator = self.config.script_locator(chunk);
        self.with_retries(&locator, || self.script_attempt(chunk, &locator, registrar))
            .await?;
        info!("Loaded chunk {} from {}", chunk, locator);
        Ok(())
    }

    async fn script_attempt(&self, chunk: &ChunkId, locator: &str, registrar: &ChunkRegistrar) -> Result<()> {
        let request = ScriptRequest {
            chunk: chunk.clone(),
            src: locator.to_string(),
            charset: SCRIPT_CHARSET,
            nonce: self.config.script_nonce.clone(),
            registrar: registrar.clone(),
        };

        match timeout(self.config.chunk_timeout(), self.scripts.insert(request)).await {
            Err(_) if registrar.is_installed(chunk) => {
                debug!("Script {} timed out after registering chunk {}", locator, chunk);
                Ok(())
            }
            Err(_) => Err(ChunkLoadError::new(chunk.clone(), FailureCategory::Timeout, locator).into()),
            Ok(Err(failure)) => Err(load_error(chunk, locator, failure)),
            Ok(Ok(())) if registrar.is_installed(chunk) => Ok(()),
            Ok(Ok(())) => Err(ChunkLoadError::new(chunk.clone(), FailureCategory::Missing, locator)
                .with_detail("script ran without registering its chunk")
                .into()),
        }
    }

    /// Fetch and compile a binary unit of `chunk`
    ///
    /// Runs alongside the chunk's script; nothing is instantiated here.
    #[instrument(skip(self))]
    pub(crate) async fn fetch_binary(&self, chunk: &ChunkId, id: &BinaryModuleId) -> Result<CompiledBinary> {
        let entry = self.config.manifest.binary(id)?;
        let locator = self.config.binary_locator(&entry.fingerprint);
        let compiled = self
            .with_retries(&locator, || self.binary_attempt(chunk, id, &locator))
            .await?;
        debug!("Compiled binary module {} from {}", id, locator);
        Ok(compiled)
    }

    /// Instantiate a compiled binary unit against the registered modules
    ///
    /// Call once the modules its imports forward to are registered.
    pub(crate) fn link_binary(&self, compiled: &CompiledBinary, registry: &Arc<ModuleRegistry>) -> Result<ExportTable> {
        let entry = self.config.manifest.binary(compiled.id())?;
        let exports = self.linker.instantiate(compiled, &entry.import_table(), registry)?;
        info!("Linked binary module {}", compiled.id());
        Ok(exports)
    }

    async fn binary_attempt(&self, chunk: &ChunkId, id: &BinaryModuleId, locator: &str) -> Result<CompiledBinary> {
        let download = async {
            let body = self
                .source
                .fetch(locator)
                .await
                .map_err(|failure| load_error(chunk, locator, failure))?;

            match body {
                FetchBody::Streaming(stream) if self.config.compile_streaming => {
                    debug!("Compiling {} while streaming", locator);
                    let stream = stream.map(|piece| piece.map_err(|failure| load_error(chunk, locator, failure)));
                    self.linker.compile_streaming(id, stream).await
                }
                body => {
                    let bytes = body
                        .into_bytes()
                        .await
                        .map_err(|failure| load_error(chunk, locator, failure))?;
                    self.linker.compile(id, &bytes)
                }
            }
        };

        match timeout(self.config.chunk_timeout(), download).await {
            Ok(result) => result,
            Err(_) => Err(ChunkLoadError::new(chunk.clone(), FailureCategory::Timeout, locator).into()),
        }
    }

    async fn with_retries<T, F, Fut>(&self, locator: &str, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retries = 0;
        loop {
            match attempt().await {
                Err(err) if retries < self.config.max_retries && is_transient(&err) => {
                    retries += 1;
                    let delay = self.config.retry_delay(retries);
                    warn!(
                        "Fetch of {} failed ({}), retry {}/{} in {:?}",
                        locator,
                        err.to_string().replace('\n', " "),
                        retries,
                        self.config.max_retries,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                result => return result,
            }
        }
    }
}

fn is_transient(err: &RuntimeError) -> bool {
    err.as_chunk_load()
        .is_some_and(|load| load.category.is_transient())
}
