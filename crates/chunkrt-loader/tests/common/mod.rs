//! Shared fixtures for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chunkrt_loader::{
    BinaryModuleId, ByteSource, BundledScripts, CallContext, ChunkPayload, FetchBody, FetchFailure,
    ModuleFactory, ModuleId, Result, RuntimeConfig, RuntimeError, ScriptHost, ScriptRequest, Value,
    factory,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Binary unit 2: string passing through linear memory, plus plain arithmetic
pub const TODOMVC_WAT: &str = r#"
(module
  (import "./todomvc" "__wbindgen_string_new" (func $string_new (param i32 i32) (result i32)))
  (import "./todomvc" "__wbindgen_object_drop_ref" (func $drop_ref (param i32)))
  (memory (export "memory") 1)
  (data (i32.const 16) "hello, todo")
  (func (export "greet") (result i32)
    (call $string_new (i32.const 16) (i32.const 11)))
  (func (export "add") (param i32 i32) (result i32)
    (i32.add (local.get 0) (local.get 1)))
  (func (export "release") (param i32)
    (call $drop_ref (local.get 0))))
"#;

pub const FINGERPRINT: &str = "3130f85ae8cd67784cd0";

pub const IMPORTS: [&str; 2] = ["__wbindgen_string_new", "__wbindgen_object_drop_ref"];

pub fn todomvc_wasm() -> Vec<u8> {
    wat::parse_str(TODOMVC_WAT).unwrap()
}

/// Chunk 0 preinstalled; chunk 1 bundles binary unit 2, whose imports
/// forward to module 1
pub fn todomvc_config() -> RuntimeConfig {
    RuntimeConfig::from_toml_str(&format!(
        r#"
[manifest]
installed = [0]

[manifest.chunks.1]
binaries = [2]

[manifest.binaries.2]
fingerprint = "{FINGERPRINT}"

[[manifest.binaries.2.imports]]
namespace = "./todomvc"
module = 1
symbols = ["__wbindgen_string_new", "__wbindgen_object_drop_ref"]
"#
    ))
    .unwrap()
}

pub fn binary_locator() -> String {
    format!("dist/{FINGERPRINT}.module.wasm")
}

fn int_arg(args: &[Value], index: usize) -> Result<i32> {
    args.get(index)
        .and_then(Value::as_i32)
        .ok_or_else(|| RuntimeError::Abi(format!("argument {} is not an integer", index)))
}

/// Host heap shared by the glue module and the assertions
#[derive(Clone, Default)]
pub struct Heap {
    pub strings: Arc<Mutex<Vec<String>>>,
    pub dropped: Arc<Mutex<Vec<i32>>>,
}

impl Heap {
    pub fn strings(&self) -> Vec<String> {
        self.strings.lock().unwrap().clone()
    }

    pub fn dropped(&self) -> Vec<i32> {
        self.dropped.lock().unwrap().clone()
    }

    fn string_new(&self, ctx: &mut CallContext<'_>, args: &[Value]) -> Result<Value> {
        let text = ctx.read_str(int_arg(args, 0)?, int_arg(args, 1)?)?;
        let mut strings = self.strings.lock().unwrap();
        strings.push(text);
        Ok(Value::I32(strings.len() as i32 - 1))
    }

    fn drop_ref(&self, args: &[Value]) -> Result<Value> {
        self.dropped.lock().unwrap().push(int_arg(args, 0)?);
        Ok(Value::Undefined)
    }

    /// Module 1 without a `run` export
    pub fn imports_factory(&self) -> ModuleFactory {
        let heap = self.clone();
        factory(move |_, exports, _| {
            let for_new = heap.clone();
            exports.define("__wbindgen_string_new", move |ctx, args| for_new.string_new(ctx, args));
            let for_drop = heap.clone();
            exports.define("__wbindgen_object_drop_ref", move |_, args| for_drop.drop_ref(args));
            Ok(())
        })
    }

    /// Module 1 as the entry module: host imports plus `run`, which calls
    /// the binary unit's `greet`
    pub fn glue_factory(&self) -> ModuleFactory {
        let imports = self.imports_factory();
        factory(move |module, exports, registry| {
            imports(module, exports, registry)?;
            let wasm = registry
                .binary_exports(&BinaryModuleId::from(2))
                .ok_or_else(|| RuntimeError::UnknownModule(ModuleId::from("wasm 2")))?;
            exports.define("run", move |_, _| wasm.call("greet", &[]));
            Ok(())
        })
    }
}

/// Script host that counts insertions and can hang or fail on demand
#[derive(Default)]
pub struct TestHost {
    pub scripts: BundledScripts,
    pub inserts: AtomicUsize,
    pub hang: AtomicBool,
    pub hang_after_insert: AtomicBool,
    pub failures_left: AtomicUsize,
}

impl TestHost {
    pub fn with_chunk_1(heap: &Heap) -> Self {
        let host = Self::default();
        host.scripts
            .serve("dist/1.bundle.js", ChunkPayload::new([1]).module(1, heap.glue_factory()));
        host
    }

    pub fn inserts(&self) -> usize {
        self.inserts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScriptHost for TestHost {
    async fn insert(&self, request: ScriptRequest) -> std::result::Result<(), FetchFailure> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        if self.hang.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(FetchFailure::network("connection reset"));
        }
        tokio::task::yield_now().await;
        ScriptHost::insert(&self.scripts, request).await?;
        if self.hang_after_insert.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
        Ok(())
    }
}

/// Byte source that counts fetches and can hang on demand
pub struct TestSource {
    pub inner: Arc<dyn ByteSource>,
    pub fetches: AtomicUsize,
    pub hang: AtomicBool,
}

impl TestSource {
    pub fn new(inner: Arc<dyn ByteSource>) -> Self {
        Self {
            inner,
            fetches: AtomicUsize::new(0),
            hang: AtomicBool::new(false),
        }
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ByteSource for TestSource {
    async fn fetch(&self, locator: &str) -> std::result::Result<FetchBody, FetchFailure> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.hang.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
        self.inner.fetch(locator).await
    }
}
