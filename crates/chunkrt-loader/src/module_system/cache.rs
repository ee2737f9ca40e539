// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Cache of executed module instances

use crate::error::{Result, RuntimeError};
use crate::ids::ModuleId;
use crate::value::Exports;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

/// Progress of a module's factory
#[derive(Debug)]
enum Execution {
    /// Running on the given thread
    Running(ThreadId),
    Done,
    Failed(RuntimeError),
}

/// An executed (or executing) module
#[derive(Debug)]
pub struct Module {
    /// Module id
    id: ModuleId,
    /// The module's exports
    exports: Exports,
    /// Set before the factory runs, so circular requires see partial exports
    loaded: AtomicBool,
    /// Factory progress, guarded for waiters on other threads
    execution: Mutex<Execution>,
    settled: Condvar,
}

impl Module {
    fn new(id: ModuleId) -> Self {
        let exports = Exports::owned_by(id.as_str());
        Self {
            id,
            exports,
            loaded: AtomicBool::new(false),
            execution: Mutex::new(Execution::Running(thread::current().id())),
            settled: Condvar::new(),
        }
    }

    /// Module id
    pub fn id(&self) -> &ModuleId {
        &self.id
    }

    /// The module's exports
    pub fn exports(&self) -> &Exports {
        &self.exports
    }

    /// Whether the module has started executing
    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    pub(crate) fn mark_loaded(&self) {
        self.loaded.store(true, Ordering::Release);
    }

    /// Block until the factory has finished on whichever thread runs it
    ///
    /// The executing thread itself returns at once (a circular require). A
    /// failed factory reports its error to every waiter.
    pub(crate) fn wait_settled(&self) -> Result<()> {
        let current = thread::current().id();
        let mut execution = self.execution.lock();
        loop {
            match &*execution {
                Execution::Running(owner) if *owner == current => return Ok(()),
                Execution::Running(_) => self.settled.wait(&mut execution),
                Execution::Done => return Ok(()),
                Execution::Failed(err) => return Err(err.clone()),
            }
        }
    }

    pub(crate) fn settle(&self, outcome: &Result<()>) {
        *self.execution.lock() = match outcome {
            Ok(()) => Execution::Done,
            Err(err) => Execution::Failed(err.clone()),
        };
        self.settled.notify_all();
    }
}

/// Thread-safe module instance cache
pub struct ModuleCache {
    /// Cache mapping module ids to instances
    cache: DashMap<ModuleId, Arc<Module>>,
}

impl ModuleCache {
    /// Create a new empty cache
    pub fn new() -> Self {
        Self {
            cache: DashMap::new(),
        }
    }

    /// Get a cached module by id
    pub fn get(&self, id: &ModuleId) -> Option<Arc<Module>> {
        self.cache.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Check if a module is cached
    pub fn has(&self, id: &ModuleId) -> bool {
        self.cache.contains_key(id)
    }

    /// Get the cached module, or insert a fresh one
    ///
    /// Returns the module and whether this call created it. The shard lock is
    /// released before returning.
    pub fn get_or_create(&self, id: &ModuleId) -> (Arc<Module>, bool) {
        match self.cache.entry(id.clone()) {
            Entry::Occupied(entry) => (Arc::clone(entry.get()), false),
            Entry::Vacant(entry) => {
                let module = Arc::new(Module::new(id.clone()));
                entry.insert(Arc::clone(&module));
                (module, true)
            }
        }
    }

    /// Remove a module from the cache
    pub(crate) fn delete(&self, id: &ModuleId) -> Option<Arc<Module>> {
        self.cache.remove(id).map(|(_, v)| v)
    }

    /// Get all cached module ids
    pub fn keys(&self) -> Vec<ModuleId> {
        self.cache.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Get the number of cached modules
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

impl Default for ModuleCache {
    fn default() -> Self {
        Self::new()
    }
}
