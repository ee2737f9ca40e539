// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Values exchanged between modules
//!
//! Module exports are dynamically typed: a module factory publishes plain
//! values and callables by name, and other modules (or the import
//! forwarders of a binary unit) look them up at call time.

use crate::error::{Result, RuntimeError};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Linear memory of the binary unit that is currently calling into the host
///
/// Pointers and lengths are the `i32` pairs the binary passes across the
/// import boundary, reinterpreted as unsigned offsets.
pub trait GuestMemory {
    /// Read `len` bytes starting at `ptr`
    fn read(&self, ptr: u32, len: u32) -> Result<Vec<u8>>;

    /// Write `data` starting at `ptr`
    fn write(&mut self, ptr: u32, data: &[u8]) -> Result<()>;

    /// Current size of the memory in bytes
    fn size(&self) -> Result<usize>;
}

/// Per-call context handed to native functions
pub struct CallContext<'a> {
    memory: Option<&'a mut dyn GuestMemory>,
}

impl<'a> CallContext<'a> {
    /// Context for a call made from host code
    pub fn detached() -> Self {
        Self { memory: None }
    }

    /// Context for a call forwarded from a binary unit's import
    pub fn with_memory(memory: &'a mut dyn GuestMemory) -> Self {
        Self {
            memory: Some(memory),
        }
    }

    /// Whether the caller's linear memory is reachable
    pub fn has_memory(&self) -> bool {
        self.memory.is_some()
    }

    /// The caller's linear memory
    pub fn memory(&mut self) -> Result<&mut (dyn GuestMemory + 'a)> {
        self.memory
            .as_deref_mut()
            .ok_or_else(|| RuntimeError::Abi("no linear memory in this call context".into()))
    }

    /// Decode a UTF-8 string passed as a pointer/length pair
    ///
    /// A negative length is rejected; the pointer is an unsigned offset.
    pub fn read_str(&mut self, ptr: i32, len: i32) -> Result<String> {
        let len = u32::try_from(len).map_err(|_| RuntimeError::Abi(format!("negative string length {}", len)))?;
        let bytes = self.memory()?.read(ptr as u32, len)?;
        String::from_utf8(bytes).map_err(|e| RuntimeError::Abi(format!("invalid UTF-8: {}", e)))
    }
}

type NativeFn = dyn Fn(&mut CallContext<'_>, &[Value]) -> Result<Value> + Send + Sync;

/// A host function published as a module export
#[derive(Clone)]
pub struct NativeFunction {
    name: Arc<str>,
    func: Arc<NativeFn>,
}

impl NativeFunction {
    /// Wrap a closure
    pub fn new<F>(name: impl AsRef<str>, func: F) -> Self
    where
        F: Fn(&mut CallContext<'_>, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name.as_ref()),
            func: Arc::new(func),
        }
    }

    /// Function name, for diagnostics
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Call from host code
    pub fn call(&self, args: &[Value]) -> Result<Value> {
        self.call_with(&mut CallContext::detached(), args)
    }

    /// Call with an explicit context
    pub fn call_with(&self, ctx: &mut CallContext<'_>, args: &[Value]) -> Result<Value> {
        (self.func)(ctx, args)
    }

    /// Whether both handles wrap the same closure
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.func, &other.func)
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[Function: {}]", self.name)
    }
}

/// A dynamically typed value
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// No value
    #[default]
    Undefined,
    /// Explicit null
    Null,
    /// Boolean
    Bool(bool),
    /// 32-bit integer, the native width of the binary ABI
    I32(i32),
    /// 64-bit integer
    I64(i64),
    /// Floating point number
    Number(f64),
    /// String
    String(String),
    /// Callable
    Function(NativeFunction),
    /// Object (another exports table)
    Object(Exports),
}

impl Value {
    /// Whether this is `Undefined`
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Integer view used when crossing the binary ABI
    ///
    /// Numbers truncate toward zero and wrap modulo 2^32; NaN and the
    /// infinities become 0.
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::I32(v) => Some(*v),
            Value::Bool(b) => Some(*b as i32),
            Value::I64(v) => i32::try_from(*v).ok(),
            Value::Number(n) if !n.is_finite() => Some(0),
            Value::Number(n) => wrap_number(*n).map(|v| v as i32),
            _ => None,
        }
    }

    /// 64-bit integer view
    ///
    /// Finite numbers truncate toward zero and wrap modulo 2^64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I64(v) => Some(*v),
            Value::I32(v) => Some(*v as i64),
            Value::Bool(b) => Some(*b as i64),
            Value::Number(n) => wrap_number(*n),
            _ => None,
        }
    }

    /// String view
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Function view
    pub fn as_function(&self) -> Option<&NativeFunction> {
        match self {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }

    /// Call this value from host code
    pub fn call(&self, args: &[Value]) -> Result<Value> {
        match self {
            Value::Function(f) => f.call(args),
            other => Err(RuntimeError::NotCallable(format!("{:?}", other))),
        }
    }
}

fn wrap_number(n: f64) -> Option<i64> {
    const TWO_63: f64 = 9_223_372_036_854_775_808.0;

    if !n.is_finite() {
        return None;
    }
    let t = n.trunc();
    if (-TWO_63..TWO_63).contains(&t) {
        Some(t as i64)
    } else {
        Some(t.rem_euclid(2.0 * TWO_63) as u64 as i64)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::I32(a), Value::I32(b)) => a == b,
            (Value::I64(a), Value::I64(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::I32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<NativeFunction> for Value {
    fn from(v: NativeFunction) -> Self {
        Value::Function(v)
    }
}

impl From<Exports> for Value {
    fn from(v: Exports) -> Self {
        Value::Object(v)
    }
}

struct ExportsInner {
    owner: String,
    values: RwLock<BTreeMap<String, Value>>,
}

/// Shared, mutable export table of a module
///
/// Clones share the same table; `ptr_eq` compares identity.
#[derive(Clone)]
pub struct Exports {
    inner: Arc<ExportsInner>,
}

impl Exports {
    /// Create an empty table
    pub fn new() -> Self {
        Self::owned_by("object")
    }

    /// Create an empty table labelled with its owner for error messages
    pub fn owned_by(owner: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ExportsInner {
                owner: owner.into(),
                values: RwLock::new(BTreeMap::new()),
            }),
        }
    }

    /// Owner label
    pub fn owner(&self) -> &str {
        &self.inner.owner
    }

    /// Look up an export
    pub fn get(&self, name: &str) -> Option<Value> {
        self.inner.values.read().get(name).cloned()
    }

    /// Publish an export, replacing any previous value
    pub fn set(&self, name: impl Into<String>, value: impl Into<Value>) {
        self.inner.values.write().insert(name.into(), value.into());
    }

    /// Publish a native function under `name`
    pub fn define<F>(&self, name: &str, func: F)
    where
        F: Fn(&mut CallContext<'_>, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.set(name, NativeFunction::new(name, func));
    }

    /// Whether an export exists
    pub fn contains(&self, name: &str) -> bool {
        self.inner.values.read().contains_key(name)
    }

    /// Export names in sorted order
    pub fn names(&self) -> Vec<String> {
        self.inner.values.read().keys().cloned().collect()
    }

    /// Number of exports
    pub fn len(&self) -> usize {
        self.inner.values.read().len()
    }

    /// Whether nothing is exported yet
    pub fn is_empty(&self) -> bool {
        self.inner.values.read().is_empty()
    }

    /// Look up an exported function
    pub fn function(&self, name: &str) -> Result<NativeFunction> {
        match self.get(name) {
            Some(Value::Function(f)) => Ok(f),
            Some(_) => Err(RuntimeError::NotCallable(format!("{}.{}", self.owner(), name))),
            None => Err(RuntimeError::missing_export(self.owner(), name)),
        }
    }

    /// Call an exported function from host code
    ///
    /// The table lock is released before the function runs, so the callee may
    /// read or extend this same table.
    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value> {
        self.function(name)?.call(args)
    }

    /// Whether both handles refer to the same table
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for Exports {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Exports {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exports")
            .field("owner", &self.inner.owner)
            .field("names", &self.names())
            .finish()
    }
}
