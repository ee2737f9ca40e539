// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Module registry - factories, executed instances and binary export tables

use crate::error::{Result, RuntimeError};
use crate::ids::{BinaryModuleId, ModuleId};
use crate::linker::ExportTable;
use crate::module_system::cache::{Module, ModuleCache};
use crate::value::Exports;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// A module body: `factory(module, exports, require)`
///
/// The registry stands in for `require`; factories call
/// [`ModuleRegistry::require`] on it to pull in their dependencies.
pub type ModuleFactory = Arc<dyn Fn(&Module, &Exports, &ModuleRegistry) -> Result<()> + Send + Sync>;

/// Wrap a closure as a [`ModuleFactory`]
pub fn factory<F>(f: F) -> ModuleFactory
where
    F: Fn(&Module, &Exports, &ModuleRegistry) -> Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Registry of every known module
pub struct ModuleRegistry {
    /// Factories merged in at startup or by chunk registration
    factories: DashMap<ModuleId, ModuleFactory>,
    /// Executed instances
    cache: ModuleCache,
    /// Export tables of instantiated binary units
    binaries: DashMap<BinaryModuleId, ExportTable>,
}

impl ModuleRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            factories: DashMap::new(),
            cache: ModuleCache::new(),
            binaries: DashMap::new(),
        }
    }

    /// Register a module factory
    ///
    /// Replacing the factory of a module that already executed has no effect
    /// on its cached instance.
    pub fn register(&self, id: impl Into<ModuleId>, factory: ModuleFactory) {
        let id = id.into();
        trace!("Registering module {}", id);
        self.factories.insert(id, factory);
    }

    /// Register several module factories
    pub fn register_all<I>(&self, modules: I)
    where
        I: IntoIterator<Item = (ModuleId, ModuleFactory)>,
    {
        for (id, factory) in modules {
            self.register(id, factory);
        }
    }

    /// Whether a factory or instance exists for `id`
    pub fn is_registered(&self, id: &ModuleId) -> bool {
        self.factories.contains_key(id) || self.cache.has(id)
    }

    /// Whether `id` has started executing
    pub fn is_loaded(&self, id: &ModuleId) -> bool {
        self.cache.get(id).is_some_and(|m| m.is_loaded())
    }

    /// The executed instance of `id`, if any
    pub fn module(&self, id: &ModuleId) -> Option<Arc<Module>> {
        self.cache.get(id)
    }

    /// The instance cache
    pub fn cache(&self) -> &ModuleCache {
        &self.cache
    }

    /// Number of registered factories
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Execute a module once and return its exports
    ///
    /// Cached modules return their existing exports. A module that is still
    /// running its factory returns the exports it has published so far when
    /// required from the same thread (a circular require); other threads wait
    /// for the factory to finish.
    pub fn require(&self, id: &ModuleId) -> Result<Exports> {
        if let Some(module) = self.cache.get(id) {
            module.wait_settled()?;
            return Ok(module.exports().clone());
        }

        let factory = self
            .factories
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| RuntimeError::UnknownModule(id.clone()))?;

        let (module, created) = self.cache.get_or_create(id);
        if !created {
            module.wait_settled()?;
            return Ok(module.exports().clone());
        }

        module.mark_loaded();
        debug!("Executing module {}", id);

        let running = Running {
            cache: &self.cache,
            module: &module,
        };
        let outcome = factory(&module, module.exports(), self);
        running.finish(&outcome);
        outcome?;

        Ok(module.exports().clone())
    }

    /// Record the export table of an instantiated binary unit
    pub fn install_binary(&self, id: BinaryModuleId, exports: ExportTable) {
        debug!("Installing export table of binary module {}", id);
        self.binaries.insert(id, exports);
    }

    /// Export table of an instantiated binary unit
    pub fn binary_exports(&self, id: &BinaryModuleId) -> Option<ExportTable> {
        self.binaries.get(id).map(|entry| entry.value().clone())
    }
}

/// A factory in progress; unwinding out of it evicts the module
struct Running<'a> {
    cache: &'a ModuleCache,
    module: &'a Module,
}

impl Running<'_> {
    fn finish(self, outcome: &Result<()>) {
        if outcome.is_err() {
            self.cache.delete(self.module.id());
        }
        self.module.settle(outcome);
        std::mem::forget(self);
    }
}

impl Drop for Running<'_> {
    fn drop(&mut self) {
        self.cache.delete(self.module.id());
        let abandoned = RuntimeError::Abandoned(format!("module {}", self.module.id()));
        self.module.settle(&Err(abandoned));
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_require_executes_factory_once() {
        let registry = ModuleRegistry::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        registry.register(
            1,
            factory(move |_, exports, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                exports.set("value", 7);
                Ok(())
            }),
        );

        let id = ModuleId::from(1);
        let first = registry.require(&id).unwrap();
        for _ in 0..5 {
            assert!(registry.require(&id).unwrap().ptr_eq(&first));
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(first.get("value"), Some(Value::I32(7)));
        assert!(registry.is_loaded(&id));
    }

    #[test]
    fn test_unknown_module() {
        let registry = ModuleRegistry::new();
        assert_eq!(
            registry.require(&ModuleId::from(9)).unwrap_err(),
            RuntimeError::UnknownModule(ModuleId::from(9))
        );
    }

    #[test]
    fn test_circular_require_sees_partial_exports() {
        let registry = ModuleRegistry::new();
        registry.register(
            "a",
            factory(|module, exports, require| {
                assert!(module.is_loaded());
                exports.set("early", true);
                let b = require.require(&ModuleId::from("b"))?;
                exports.set("b_saw_early", b.get("saw_early").unwrap_or_default());
                Ok(())
            }),
        );
        registry.register(
            "b",
            factory(|_, exports, require| {
                let a = require.require(&ModuleId::from("a"))?;
                exports.set("saw_early", a.contains("early"));
                Ok(())
            }),
        );

        let a = registry.require(&ModuleId::from("a")).unwrap();
        assert_eq!(a.get("b_saw_early"), Some(Value::Bool(true)));
    }

    #[test]
    fn test_failed_factory_is_not_cached() {
        let registry = ModuleRegistry::new();
        registry.register(
            "broken",
            factory(|_, _, require| {
                require.require(&ModuleId::from("absent"))?;
                Ok(())
            }),
        );

        let id = ModuleId::from("broken");
        assert_eq!(
            registry.require(&id).unwrap_err(),
            RuntimeError::UnknownModule(ModuleId::from("absent"))
        );
        assert!(registry.module(&id).is_none());
        assert!(registry.is_registered(&id));
    }

    #[test]
    fn test_other_threads_wait_for_a_running_factory() {
        let registry = Arc::new(ModuleRegistry::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let (started, wait_started) = mpsc::channel();
        registry.register(
            1,
            factory(move |_, exports, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = started.send(());
                thread::sleep(Duration::from_millis(50));
                exports.define("run", |_, _| Ok(Value::I32(1)));
                Ok(())
            }),
        );

        let id = ModuleId::from(1);
        let first = {
            let registry = Arc::clone(&registry);
            let id = id.clone();
            thread::spawn(move || registry.require(&id))
        };
        wait_started.recv().unwrap();

        let exports = registry.require(&id).unwrap();
        assert!(exports.contains("run"));
        assert!(first.join().unwrap().unwrap().ptr_eq(&exports));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_waiters_see_the_factory_failure() {
        let registry = Arc::new(ModuleRegistry::new());
        let (started, wait_started) = mpsc::channel();
        registry.register(
            "flaky",
            factory(move |_, _, _| {
                let _ = started.send(());
                thread::sleep(Duration::from_millis(50));
                Err(RuntimeError::Config("boom".into()))
            }),
        );

        let id = ModuleId::from("flaky");
        let first = {
            let registry = Arc::clone(&registry);
            let id = id.clone();
            thread::spawn(move || registry.require(&id))
        };
        wait_started.recv().unwrap();

        let err = registry.require(&id).unwrap_err();
        assert_eq!(err, RuntimeError::Config("boom".into()));
        assert_eq!(first.join().unwrap().unwrap_err(), err);
        assert!(registry.module(&id).is_none());
    }
}
