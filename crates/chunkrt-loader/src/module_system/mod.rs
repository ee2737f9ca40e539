// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Module system
//!
//! Modules are registered as factories, keyed by [`ModuleId`](crate::ModuleId),
//! and executed at most once on first `require`:
//! - `module` / `exports` / `require` factory arguments
//! - exports cached for the lifetime of the registry
//! - circular requires observe partially populated exports

mod cache;
mod registry;

pub use cache::{Module, ModuleCache};
pub use registry::{factory, ModuleFactory, ModuleRegistry};
