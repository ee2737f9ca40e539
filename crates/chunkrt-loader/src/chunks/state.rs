// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Per-unit load state: unrequested, loading, installed

use crate::error::{Result, RuntimeError};
use futures::channel::oneshot;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use tracing::trace;

/// Completion signal shared by every caller waiting on the same unit
pub type Signal = Shared<BoxFuture<'static, Result<()>>>;

/// Observable state of a chunk or binary module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    /// Never requested, or the last attempt failed
    Unrequested,
    /// A fetch is in flight
    Loading,
    /// Code is registered
    Installed,
}

enum Slot {
    Loading {
        resolver: oneshot::Sender<Result<()>>,
        signal: Signal,
    },
    Installed,
}

/// Outcome of [`LoadTable::begin`]
pub(crate) enum Begin {
    /// Nothing to wait for
    Installed,
    /// Another caller started the load; wait on its signal
    Attached(Signal),
    /// This caller owns the load and must settle it
    Started(Signal),
}

/// State machine for a family of loadable units
///
/// States only advance `Unrequested -> Loading -> Installed`; a failed load
/// drops back to `Unrequested` so a later request starts over.
pub struct LoadTable<K> {
    label: &'static str,
    slots: Mutex<HashMap<K, Slot>>,
}

impl<K> LoadTable<K>
where
    K: Eq + Hash + Clone + Display,
{
    /// Create an empty table; `label` names the unit kind in logs
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Current state of `key`
    pub fn state(&self, key: &K) -> ChunkState {
        match self.slots.lock().get(key) {
            None => ChunkState::Unrequested,
            Some(Slot::Loading { .. }) => ChunkState::Loading,
            Some(Slot::Installed) => ChunkState::Installed,
        }
    }

    /// Every installed key
    pub fn installed(&self) -> Vec<K> {
        self.slots
            .lock()
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Installed))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Request `key`: attach to a load in flight or start a new one
    pub(crate) fn begin(&self, key: &K) -> Begin {
        let mut slots = self.slots.lock();
        match slots.get(key) {
            Some(Slot::Installed) => Begin::Installed,
            Some(Slot::Loading { signal, .. }) => {
                trace!("Attaching to pending {} {}", self.label, key);
                Begin::Attached(signal.clone())
            }
            None => {
                let (resolver, receiver) = oneshot::channel();
                let what = format!("{} {}", self.label, key);
                let signal = receiver
                    .map(move |outcome| outcome.unwrap_or_else(|_| Err(RuntimeError::Abandoned(what))))
                    .boxed()
                    .shared();
                slots.insert(
                    key.clone(),
                    Slot::Loading {
                        resolver,
                        signal: signal.clone(),
                    },
                );
                trace!("Started loading {} {}", self.label, key);
                Begin::Started(signal)
            }
        }
    }

    /// Mark `key` installed, resolving its pending signal
    ///
    /// Returns `true` if a load was pending. Installing a key nobody requested
    /// is allowed (preloaded payloads).
    pub fn install(&self, key: K) -> bool {
        let previous = self.slots.lock().insert(key.clone(), Slot::Installed);
        match previous {
            Some(Slot::Loading { resolver, .. }) => {
                trace!("Installed {} {}", self.label, key);
                let _ = resolver.send(Ok(()));
                true
            }
            _ => false,
        }
    }

    /// Reject the pending load of `key` and make it requestable again
    ///
    /// Installed keys are left alone; returns `true` if a load was pending.
    pub fn fail(&self, key: &K, error: RuntimeError) -> bool {
        let mut slots = self.slots.lock();
        if !matches!(slots.get(key), Some(Slot::Loading { .. })) {
            return false;
        }
        let Some(Slot::Loading { resolver, .. }) = slots.remove(key) else {
            return false;
        };
        drop(slots);

        trace!("Failed {} {}: {}", self.label, key, error);
        let _ = resolver.send(Err(error));
        true
    }
}
