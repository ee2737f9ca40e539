// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Main chunk runtime implementation

use crate::chunks::{Begin, ChunkRegistrar, ChunkState, LoadTable, Signal};
use crate::config::RuntimeConfig;
use crate::error::Result;
use crate::fetch::{BundledScripts, ByteSource, ChunkFetcher, FsSource, ScriptHost};
use crate::ids::{BinaryModuleId, ChunkId, ModuleId};
use crate::linker::{BinaryLinker, ExportTable};
use crate::module_system::{ModuleFactory, ModuleRegistry};
use crate::value::{Exports, Value};
use futures::future::{BoxFuture, FutureExt, join_all};
use futures::try_join;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Completion signal returned by [`Runtime::ensure_chunk`]
pub type ChunkSignal = BoxFuture<'static, Result<()>>;

/// Export the entry module must provide
pub const ENTRY_EXPORT: &str = "run";

struct Shared {
    config: Arc<RuntimeConfig>,
    registry: Arc<ModuleRegistry>,
    chunks: Arc<LoadTable<ChunkId>>,
    binaries: LoadTable<BinaryModuleId>,
    fetcher: ChunkFetcher,
}

impl Shared {
    fn registrar(&self) -> ChunkRegistrar {
        ChunkRegistrar::new(Arc::clone(&self.registry), Arc::clone(&self.chunks))
    }
}

/// The chunk loading runtime
///
/// Owns the module registry, the chunk and binary state tables, the fetch
/// back-ends and the linker. Clones share all of it.
#[derive(Clone)]
pub struct Runtime {
    shared: Arc<Shared>,
}

impl Runtime {
    /// Start building a runtime
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::default()
    }

    /// Create a runtime with the given configuration and default back-ends
    pub fn new(config: RuntimeConfig) -> Self {
        Self::builder().config(config).build()
    }

    /// Make sure every part of `chunk` is installed
    ///
    /// Installed parts resolve immediately. Parts already loading share the
    /// in-flight fetch; unrequested parts start one. Fetches run on spawned
    /// tasks, so this must be called within a Tokio runtime, and dropping the
    /// returned future does not cancel them. The future resolves once every
    /// part has settled; failed parts are reset so a later call fetches them
    /// again.
    pub fn ensure_chunk(&self, chunk: impl Into<ChunkId>) -> ChunkSignal {
        let chunk = chunk.into();
        let entry = self.shared.config.manifest.chunk(&chunk);
        let mut signals: Vec<Signal> = Vec::new();

        let script = if entry.script {
            match self.shared.chunks.begin(&chunk) {
                Begin::Installed => None,
                Begin::Attached(signal) => Some(signal),
                Begin::Started(signal) => {
                    self.spawn_script(chunk.clone());
                    Some(signal)
                }
            }
        } else {
            None
        };
        signals.extend(script.clone());

        for binary in entry.binaries {
            match self.shared.binaries.begin(&binary) {
                Begin::Installed => {}
                Begin::Attached(signal) => signals.push(signal),
                Begin::Started(signal) => {
                    self.spawn_binary(chunk.clone(), binary, script.clone());
                    signals.push(signal);
                }
            }
        }

        if signals.is_empty() {
            return futures::future::ok(()).boxed();
        }

        debug!("Waiting on {} part(s) of chunk {}", signals.len(), chunk);
        async move {
            // Failed parts are reset by the time any failure is reported
            join_all(signals).await.into_iter().collect::<Result<Vec<()>>>()?;
            Ok(())
        }
        .boxed()
    }

    fn spawn_script(&self, chunk: ChunkId) {
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            let registrar = shared.registrar();
            if let Err(err) = shared.fetcher.load_script(&chunk, &registrar).await {
                warn!("Chunk {} failed to load: {}", chunk, err.to_string().replace('\n', " "));
                shared.chunks.fail(&chunk, err);
            }
        });
    }

    fn spawn_binary(&self, chunk: ChunkId, binary: BinaryModuleId, script: Option<Signal>) {
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            let outcome: Result<ExportTable> = async {
                // Fetch and compile alongside the script; its modules are
                // only needed to instantiate
                let script = async {
                    match script {
                        Some(script) => script.await,
                        None => Ok(()),
                    }
                };
                let (compiled, ()) = try_join!(shared.fetcher.fetch_binary(&chunk, &binary), script)?;
                shared.fetcher.link_binary(&compiled, &shared.registry)
            }
            .await;

            match outcome {
                Ok(exports) => {
                    shared.registry.install_binary(binary.clone(), exports);
                    shared.binaries.install(binary);
                }
                Err(err) => {
                    warn!("Binary module {} of chunk {} failed: {}", binary, chunk, err.to_string().replace('\n', " "));
                    shared.binaries.fail(&binary, err);
                }
            }
        });
    }

    /// Combined state of every part of `chunk`
    ///
    /// `Loading` if any part is in flight, `Installed` once all parts are.
    pub fn chunk_state(&self, chunk: impl Into<ChunkId>) -> ChunkState {
        let chunk = chunk.into();
        let entry = self.shared.config.manifest.chunk(&chunk);

        let mut states = Vec::with_capacity(entry.binaries.len() + 1);
        if entry.script {
            states.push(self.shared.chunks.state(&chunk));
        }
        states.extend(entry.binaries.iter().map(|binary| self.shared.binaries.state(binary)));

        if states.contains(&ChunkState::Loading) {
            ChunkState::Loading
        } else if states.iter().all(|state| *state == ChunkState::Installed) {
            ChunkState::Installed
        } else {
            ChunkState::Unrequested
        }
    }

    /// Execute a module once and return its exports
    pub fn require(&self, id: impl Into<ModuleId>) -> Result<Exports> {
        self.shared.registry.require(&id.into())
    }

    /// Export table of an installed binary unit
    pub fn binary_exports(&self, id: impl Into<BinaryModuleId>) -> Option<ExportTable> {
        self.shared.registry.binary_exports(&id.into())
    }

    /// The module registry
    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.shared.registry
    }

    /// A registration handle, for payloads arriving outside a request
    pub fn registrar(&self) -> ChunkRegistrar {
        self.shared.registrar()
    }

    /// Active configuration
    pub fn config(&self) -> &RuntimeConfig {
        &self.shared.config
    }

    /// Startup action: load `chunk`, require `module` and call its `run` export
    ///
    /// Failures are logged and returned.
    pub async fn run_entry(&self, chunk: impl Into<ChunkId>, module: impl Into<ModuleId>) -> Result<Value> {
        let module = module.into();
        let outcome: Result<Value> = async {
            self.ensure_chunk(chunk).await?;
            let exports = self.require(module.clone())?;
            exports.call(ENTRY_EXPORT, &[])
        }
        .await;

        if let Err(err) = &outcome {
            error!("Entry module {} failed: {}", module, err);
        }
        outcome
    }
}

/// Builder for [`Runtime`]
#[derive(Default)]
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    modules: Vec<(ModuleId, ModuleFactory)>,
    scripts: Option<Arc<dyn ScriptHost>>,
    source: Option<Arc<dyn ByteSource>>,
    linker: Option<BinaryLinker>,
}

impl RuntimeBuilder {
    /// Use `config`
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a module shipped with the entry bundle
    pub fn module(mut self, id: impl Into<ModuleId>, factory: ModuleFactory) -> Self {
        self.modules.push((id.into(), factory));
        self
    }

    /// Script host for script chunks; defaults to an empty [`BundledScripts`]
    pub fn script_host(mut self, host: Arc<dyn ScriptHost>) -> Self {
        self.scripts = Some(host);
        self
    }

    /// Byte source for binary payloads; defaults to an [`FsSource`] rooted at `.`
    pub fn byte_source(mut self, source: Arc<dyn ByteSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Linker to compile binary units with
    pub fn linker(mut self, linker: BinaryLinker) -> Self {
        self.linker = Some(linker);
        self
    }

    /// Build the runtime
    ///
    /// Chunks the manifest lists as installed start out installed.
    pub fn build(self) -> Runtime {
        let config = Arc::new(self.config);
        let registry = Arc::new(ModuleRegistry::new());
        registry.register_all(self.modules);

        let chunks = Arc::new(LoadTable::new("chunk"));
        for chunk in &config.manifest.installed {
            chunks.install(chunk.clone());
        }

        let scripts = self
            .scripts
            .unwrap_or_else(|| Arc::new(BundledScripts::new()));
        let source = self.source.unwrap_or_else(|| Arc::new(FsSource::new(".")));
        let fetcher = ChunkFetcher::new(
            Arc::clone(&config),
            scripts,
            source,
            self.linker.unwrap_or_default(),
        );

        Runtime {
            shared: Arc::new(Shared {
                config,
                registry,
                chunks,
                binaries: LoadTable::new("binary module"),
                fetcher,
            }),
        }
    }
}
