// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Value conversion across the integer import/export boundary

use crate::error::{Result, RuntimeError};
use crate::value::{GuestMemory, Value};
use wasmtime::{Caller, FuncType, Memory, Val, ValType};

/// Whether `ty` can cross the boundary
pub(crate) fn is_integer(ty: &ValType) -> bool {
    matches!(ty, ValType::I32 | ValType::I64)
}

/// Whether a signature uses only integers and returns at most one value
pub(crate) fn is_integer_signature(ty: &FuncType) -> bool {
    ty.params().all(|p| is_integer(&p)) && ty.results().all(|r| is_integer(&r)) && ty.results().len() <= 1
}

fn type_name(ty: &ValType) -> &'static str {
    match ty {
        ValType::I32 => "i32",
        ValType::I64 => "i64",
        ValType::F32 => "f32",
        ValType::F64 => "f64",
        ValType::V128 => "v128",
        _ => "reference",
    }
}

/// Convert a host value for a parameter or result of type `ty`
///
/// `undefined` and `null` become zero, as a host function with no meaningful
/// return value still has to fill an `i32` result slot.
pub(crate) fn to_wasm(value: &Value, ty: &ValType) -> Result<Val> {
    let converted = match (ty, value) {
        (ValType::I32, Value::Undefined | Value::Null) => Some(Val::I32(0)),
        (ValType::I64, Value::Undefined | Value::Null) => Some(Val::I64(0)),
        (ValType::I32, value) => value.as_i32().map(Val::I32),
        (ValType::I64, value) => value.as_i64().map(Val::I64),
        _ => None,
    };

    converted.ok_or_else(|| RuntimeError::Abi(format!("cannot pass {:?} as {}", value, type_name(ty))))
}

/// Convert a value produced by the binary unit
pub(crate) fn from_wasm(val: &Val) -> Result<Value> {
    match val {
        Val::I32(v) => Ok(Value::I32(*v)),
        Val::I64(v) => Ok(Value::I64(*v)),
        Val::F32(bits) => Ok(Value::Number(f32::from_bits(*bits) as f64)),
        Val::F64(bits) => Ok(Value::Number(f64::from_bits(*bits))),
        other => Err(RuntimeError::Abi(format!("unsupported value {:?}", other))),
    }
}

/// Placeholder for a result slot of type `ty`
pub(crate) fn zero(ty: &ValType) -> Val {
    match ty {
        ValType::I64 => Val::I64(0),
        ValType::F32 => Val::F32(0),
        ValType::F64 => Val::F64(0),
        _ => Val::I32(0),
    }
}

/// Copy `len` bytes at `ptr` out of `data`, bounds-checked before allocating
pub(crate) fn copy_out(data: &[u8], ptr: u32, len: u32) -> Result<Vec<u8>> {
    let start = ptr as usize;
    start
        .checked_add(len as usize)
        .and_then(|end| data.get(start..end))
        .map(<[u8]>::to_vec)
        .ok_or_else(|| {
            RuntimeError::Abi(format!(
                "read of {} bytes at {} is outside linear memory of {} bytes",
                len,
                ptr,
                data.len()
            ))
        })
}

/// Linear memory of the instance whose import is currently executing
pub(crate) struct CallerMemory<'a, 'b> {
    pub(crate) caller: &'a mut Caller<'b, ()>,
    pub(crate) memory: Memory,
}

impl GuestMemory for CallerMemory<'_, '_> {
    fn read(&self, ptr: u32, len: u32) -> Result<Vec<u8>> {
        copy_out(self.memory.data(&*self.caller), ptr, len)
    }

    fn write(&mut self, ptr: u32, data: &[u8]) -> Result<()> {
        self.memory
            .write(&mut *self.caller, ptr as usize, data)
            .map_err(|e| RuntimeError::Abi(e.to_string()))
    }

    fn size(&self) -> Result<usize> {
        Ok(self.memory.data_size(&*self.caller))
    }
}
