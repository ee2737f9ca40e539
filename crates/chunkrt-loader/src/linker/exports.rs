// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Export tables of instantiated binary units

use crate::error::{Result, RuntimeError};
use crate::ids::BinaryModuleId;
use crate::linker::abi::{copy_out, from_wasm, to_wasm, zero};
use crate::value::{Exports, GuestMemory, Value};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use wasmtime::{Func, Memory, Store, Val};

struct ExportTableInner {
    id: BinaryModuleId,
    store: Mutex<Store<()>>,
    funcs: BTreeMap<String, Func>,
    memory: Option<Memory>,
}

/// Callable exports of one binary unit instance
///
/// Cloning is cheap; every clone drives the same instance. Calls are
/// serialized, and a call that arrives while the instance is already running
/// (an import calling back into its own binary) is refused.
#[derive(Clone)]
pub struct ExportTable {
    inner: Arc<ExportTableInner>,
}

impl ExportTable {
    pub(crate) fn new(
        id: BinaryModuleId,
        store: Store<()>,
        funcs: BTreeMap<String, Func>,
        memory: Option<Memory>,
    ) -> Self {
        Self {
            inner: Arc::new(ExportTableInner {
                id,
                store: Mutex::new(store),
                funcs,
                memory,
            }),
        }
    }

    /// Binary unit this table belongs to
    pub fn id(&self) -> &BinaryModuleId {
        &self.inner.id
    }

    /// Exported function names
    pub fn names(&self) -> Vec<String> {
        self.inner.funcs.keys().cloned().collect()
    }

    /// Whether a function is exported under `name`
    pub fn contains(&self, name: &str) -> bool {
        self.inner.funcs.contains_key(name)
    }

    /// Call an exported function
    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value> {
        let func = *self
            .inner
            .funcs
            .get(name)
            .ok_or_else(|| RuntimeError::missing_export(self.owner(), name))?;

        let mut store = self.inner.store.try_lock().ok_or_else(|| RuntimeError::BinaryCall {
            symbol: name.to_string(),
            reason: "re-entrant call into a running instance".into(),
        })?;

        let ty = func.ty(&*store);
        if ty.params().len() != args.len() {
            return Err(RuntimeError::Abi(format!(
                "'{}' takes {} arguments but {} were given",
                name,
                ty.params().len(),
                args.len()
            )));
        }

        let params = ty
            .params()
            .zip(args)
            .map(|(ty, arg)| to_wasm(arg, &ty))
            .collect::<Result<Vec<Val>>>()?;
        let mut results: Vec<Val> = ty.results().map(|ty| zero(&ty)).collect();

        func.call(&mut *store, &params, &mut results)
            .map_err(|err| call_error(name, err))?;
        drop(store);

        match results.first() {
            Some(val) => from_wasm(val),
            None => Ok(Value::Undefined),
        }
    }

    /// The instance's exported linear memory, if any
    pub fn memory(&self) -> Option<LinearMemory> {
        self.inner.memory.map(|memory| LinearMemory {
            table: self.clone(),
            memory,
        })
    }

    /// View as a module exports object whose functions forward to [`call`](Self::call)
    pub fn as_exports(&self) -> Exports {
        let exports = Exports::owned_by(self.owner());
        for name in self.inner.funcs.keys() {
            let table = self.clone();
            let symbol = name.clone();
            exports.define(name, move |_, args| table.call(&symbol, args));
        }
        exports
    }

    fn owner(&self) -> String {
        format!("binary module {}", self.inner.id)
    }
}

impl fmt::Debug for ExportTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportTable")
            .field("id", &self.inner.id)
            .field("funcs", &self.names())
            .field("memory", &self.inner.memory.is_some())
            .finish()
    }
}

fn call_error(symbol: &str, err: anyhow::Error) -> RuntimeError {
    match err.downcast_ref::<RuntimeError>() {
        Some(inner) => inner.clone(),
        None => RuntimeError::BinaryCall {
            symbol: symbol.to_string(),
            reason: format!("{:#}", err),
        },
    }
}

/// Host access to an instance's exported memory
pub struct LinearMemory {
    table: ExportTable,
    memory: Memory,
}

impl LinearMemory {
    fn busy() -> RuntimeError {
        RuntimeError::Abi("memory is locked by a running call".into())
    }

    /// Read a UTF-8 string
    pub fn read_str(&self, ptr: u32, len: u32) -> Result<String> {
        let bytes = self.read(ptr, len)?;
        String::from_utf8(bytes).map_err(|e| RuntimeError::Abi(format!("invalid UTF-8: {}", e)))
    }
}

impl GuestMemory for LinearMemory {
    fn read(&self, ptr: u32, len: u32) -> Result<Vec<u8>> {
        let store = self.table.inner.store.try_lock().ok_or_else(Self::busy)?;
        copy_out(self.memory.data(&*store), ptr, len)
    }

    fn write(&mut self, ptr: u32, data: &[u8]) -> Result<()> {
        let mut store = self.table.inner.store.try_lock().ok_or_else(Self::busy)?;
        self.memory
            .write(&mut *store, ptr as usize, data)
            .map_err(|e| RuntimeError::Abi(e.to_string()))
    }

    fn size(&self) -> Result<usize> {
        let store = self.table.inner.store.try_lock().ok_or_else(Self::busy)?;
        Ok(self.memory.data_size(&*store))
    }
}
