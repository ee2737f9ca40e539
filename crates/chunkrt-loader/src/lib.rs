// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! # chunkrt-loader
//!
//! Chunk loading and WebAssembly linking for bundled applications.
//!
//! A bundled application ships an entry chunk and loads the rest on demand.
//! This crate provides the runtime side of that arrangement:
//!
//! - a module registry that executes each module factory exactly once
//! - per-chunk load state with one in-flight fetch per chunk
//! - script chunks inserted through a [`ScriptHost`], binary payloads
//!   pulled from a [`ByteSource`]
//! - a `wasmtime` based linker binding a binary unit's imports to the
//!   exports of an already registered module
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use chunkrt_loader::{BundledScripts, ChunkPayload, Runtime, RuntimeConfig, Value, factory};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let scripts = BundledScripts::new();
//!     scripts.serve(
//!         "dist/1.bundle.js",
//!         ChunkPayload::new([1]).module(1, factory(|_, exports, _| {
//!             exports.define("run", |_, _| Ok(Value::Undefined));
//!             Ok(())
//!         })),
//!     );
//!
//!     let runtime = Runtime::builder()
//!         .config(RuntimeConfig::load(None)?)
//!         .script_host(Arc::new(scripts))
//!         .build();
//!     runtime.run_entry(1, 1).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chunks;
pub mod config;
pub mod error;
pub mod fetch;
pub mod ids;
pub mod linker;
pub mod manifest;
pub mod module_system;
pub mod runtime;
pub mod value;

// Re-exports
pub use chunks::{ChunkPayload, ChunkRegistrar, ChunkState};
pub use config::RuntimeConfig;
pub use error::{ChunkLoadError, FailureCategory, Result, RuntimeError};
#[cfg(feature = "http")]
pub use fetch::HttpSource;
pub use fetch::{BundledScripts, ByteSource, FetchBody, FetchFailure, FsSource, MemorySource, ScriptHost, ScriptRequest};
pub use ids::{BinaryModuleId, ChunkId, ModuleId};
pub use linker::{BinaryLinker, CompiledBinary, ExportTable, ImportTable, LinearMemory};
pub use manifest::Manifest;
pub use module_system::{factory, Module, ModuleFactory, ModuleRegistry};
pub use runtime::{ChunkSignal, Runtime, RuntimeBuilder};
pub use value::{CallContext, Exports, GuestMemory, NativeFunction, Value};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
