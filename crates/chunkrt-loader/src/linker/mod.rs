// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! WebAssembly linking
//!
//! A binary unit is compiled, checked against its import table, and
//! instantiated with host functions that forward each import to a module
//! export. Nothing is instantiated unless every import resolves.

mod abi;
mod exports;
mod imports;

pub use exports::{ExportTable, LinearMemory};
pub use imports::{ImportTable, ImportTarget};

use crate::error::{Result, RuntimeError};
use crate::ids::BinaryModuleId;
use crate::module_system::ModuleRegistry;
use crate::value::{CallContext, Value};
use abi::{CallerMemory, from_wasm, is_integer_signature, to_wasm};
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tracing::{debug, trace};
use wasmtime::{Caller, Engine, Extern, ExternType, Linker, Module, Store, Val};

/// Magic number and version every binary payload starts with
pub const WASM_HEADER: [u8; 8] = *b"\0asm\x01\0\0\0";

/// A compiled, not yet instantiated, binary unit
#[derive(Clone)]
pub struct CompiledBinary {
    id: BinaryModuleId,
    module: Module,
}

impl CompiledBinary {
    /// Binary unit id
    pub fn id(&self) -> &BinaryModuleId {
        &self.id
    }

    /// Declared imports as `(namespace, symbol)`
    pub fn imports(&self) -> Vec<(String, String)> {
        self.module
            .imports()
            .map(|import| (import.module().to_string(), import.name().to_string()))
            .collect()
    }

    /// Declared export names
    pub fn exports(&self) -> Vec<String> {
        self.module.exports().map(|export| export.name().to_string()).collect()
    }
}

/// Compiles and instantiates binary units
#[derive(Clone, Default)]
pub struct BinaryLinker {
    engine: Engine,
}

impl BinaryLinker {
    /// Create a linker with a default engine
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a linker sharing an existing engine
    pub fn with_engine(engine: Engine) -> Self {
        Self { engine }
    }

    /// Compile a fully buffered payload
    pub fn compile(&self, id: &BinaryModuleId, bytes: &[u8]) -> Result<CompiledBinary> {
        check_header(id, bytes)?;
        debug!("Compiling binary module {} ({} bytes)", id, bytes.len());
        let module = Module::from_binary(&self.engine, bytes).map_err(|e| RuntimeError::link(id, format!("{:#}", e)))?;
        Ok(CompiledBinary {
            id: id.clone(),
            module,
        })
    }

    /// Compile a payload while it arrives
    ///
    /// The header is checked as soon as its eight bytes are in, so a payload
    /// that is not a binary unit fails without being read to the end.
    pub async fn compile_streaming<S>(&self, id: &BinaryModuleId, stream: S) -> Result<CompiledBinary>
    where
        S: Stream<Item = Result<Bytes>>,
    {
        let mut stream = std::pin::pin!(stream);
        let mut buffer = BytesMut::new();
        let mut header_checked = false;

        while let Some(chunk) = stream.next().await {
            buffer.extend_from_slice(&chunk?);
            if !header_checked && buffer.len() >= WASM_HEADER.len() {
                check_header(id, &buffer)?;
                header_checked = true;
            }
        }

        trace!("Stream of binary module {} complete", id);
        self.compile(id, &buffer)
    }

    /// Compile a payload and check its imports without instantiating it
    ///
    /// Import targets are not resolved against a registry.
    pub fn inspect(&self, id: &BinaryModuleId, bytes: &[u8], table: &ImportTable) -> Result<CompiledBinary> {
        let compiled = self.compile(id, bytes)?;
        self.check_imports(&compiled, table)?;
        Ok(compiled)
    }

    /// Compile, instantiate and record a binary unit in one step
    pub fn link(
        &self,
        id: &BinaryModuleId,
        bytes: &[u8],
        table: &ImportTable,
        registry: &Arc<ModuleRegistry>,
    ) -> Result<ExportTable> {
        table.resolve(id, registry)?;
        let compiled = self.compile(id, bytes)?;
        let exports = self.instantiate(&compiled, table, registry)?;
        registry.install_binary(id.clone(), exports.clone());
        Ok(exports)
    }

    /// Check that every import is a function with an integer signature and
    /// has an entry in `table`
    pub fn check_imports(&self, compiled: &CompiledBinary, table: &ImportTable) -> Result<()> {
        for import in compiled.module.imports() {
            let (namespace, symbol) = (import.module(), import.name());
            let ExternType::Func(ty) = import.ty() else {
                return Err(RuntimeError::link(
                    &compiled.id,
                    format!("import '{}'.'{}' is not a function", namespace, symbol),
                ));
            };
            if !is_integer_signature(&ty) {
                return Err(RuntimeError::link(
                    &compiled.id,
                    format!("import '{}'.'{}' does not use an integer signature", namespace, symbol),
                ));
            }
            if table.get(namespace, symbol).is_none() {
                return Err(RuntimeError::link(
                    &compiled.id,
                    format!("import '{}'.'{}' has no forwarding entry", namespace, symbol),
                ));
            }
        }
        Ok(())
    }

    /// Instantiate a compiled binary unit
    ///
    /// Every import target is checked against `registry` before anything is
    /// created. Imported functions hold the registry weakly and look their
    /// target export up on each call.
    pub fn instantiate(
        &self,
        compiled: &CompiledBinary,
        table: &ImportTable,
        registry: &Arc<ModuleRegistry>,
    ) -> Result<ExportTable> {
        let id = &compiled.id;
        table.resolve(id, registry)?;
        self.check_imports(compiled, table)?;

        let mut linker: Linker<()> = Linker::new(&self.engine);
        for import in compiled.module.imports() {
            let (namespace, symbol) = (import.module(), import.name());
            let (ExternType::Func(ty), Some(target)) = (import.ty(), table.get(namespace, symbol)) else {
                continue;
            };

            let registry = Arc::downgrade(registry);
            let target = target.clone();
            let result_ty = ty.results().next();
            linker
                .func_new(namespace, symbol, ty, move |caller, params, results| {
                    let value = forward_import(&registry, &target, caller, params)?;
                    if let (Some(ty), Some(slot)) = (&result_ty, results.first_mut()) {
                        *slot = to_wasm(&value, ty)?;
                    }
                    Ok(())
                })
                .map_err(|e| RuntimeError::link(id, format!("{:#}", e)))?;
        }

        let mut store = Store::new(&self.engine, ());
        let instance = linker
            .instantiate(&mut store, &compiled.module)
            .map_err(|e| match e.downcast_ref::<RuntimeError>() {
                Some(inner) => inner.clone(),
                None => RuntimeError::link(id, format!("{:#}", e)),
            })?;

        let exported: Vec<(String, Extern)> = instance
            .exports(&mut store)
            .map(|export| (export.name().to_string(), export.into_extern()))
            .collect();

        let mut funcs = BTreeMap::new();
        let mut memory = None;
        for (name, item) in exported {
            match item {
                Extern::Func(func) => {
                    funcs.insert(name, func);
                }
                Extern::Memory(mem) if name == "memory" => memory = Some(mem),
                _ => {}
            }
        }

        debug!("Instantiated binary module {} with {} exported functions", id, funcs.len());
        Ok(ExportTable::new(id.clone(), store, funcs, memory))
    }
}

fn check_header(id: &BinaryModuleId, bytes: &[u8]) -> Result<()> {
    if bytes.len() < WASM_HEADER.len() || bytes[..WASM_HEADER.len()] != WASM_HEADER {
        return Err(RuntimeError::link(id, "payload is not a WebAssembly binary"));
    }
    Ok(())
}

fn forward_import(
    registry: &Weak<ModuleRegistry>,
    target: &ImportTarget,
    mut caller: Caller<'_, ()>,
    params: &[Val],
) -> Result<Value> {
    let registry = registry
        .upgrade()
        .ok_or_else(|| RuntimeError::Abandoned(format!("module registry for import of {}", target.module)))?;

    let args = params.iter().map(from_wasm).collect::<Result<Vec<_>>>()?;
    let function = registry.require(&target.module)?.function(&target.export)?;
    trace!("Forwarding import to {}.{}", target.module, target.export);

    match caller.get_export("memory").and_then(Extern::into_memory) {
        Some(memory) => {
            let mut guest = CallerMemory {
                caller: &mut caller,
                memory,
            };
            function.call_with(&mut CallContext::with_memory(&mut guest), &args)
        }
        None => function.call(&args),
    }
}
