// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Import tables: which host export answers each binary import

use crate::error::{Result, RuntimeError};
use crate::ids::{BinaryModuleId, ModuleId};
use crate::module_system::ModuleRegistry;
use std::collections::BTreeMap;

/// Host export an import forwards to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportTarget {
    /// Module whose exports are consulted at call time
    pub module: ModuleId,
    /// Export name within that module
    pub export: String,
}

/// Maps `(namespace, symbol)` pairs to host exports
///
/// Targets are resolved lazily: the module is required and the export looked
/// up on every call, so exports assigned after instantiation are still seen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportTable {
    entries: BTreeMap<(String, String), ImportTarget>,
}

impl ImportTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward `namespace.symbol` to `module`'s export of the same name
    pub fn forward(&mut self, namespace: &str, symbol: &str, module: &ModuleId) -> &mut Self {
        self.forward_as(namespace, symbol, module, symbol)
    }

    /// Forward `namespace.symbol` to `module.export`
    pub fn forward_as(
        &mut self,
        namespace: &str,
        symbol: &str,
        module: &ModuleId,
        export: &str,
    ) -> &mut Self {
        self.entries.insert(
            (namespace.to_string(), symbol.to_string()),
            ImportTarget {
                module: module.clone(),
                export: export.to_string(),
            },
        );
        self
    }

    /// Forward every symbol in `symbols`
    pub fn forward_all<S: AsRef<str>>(
        &mut self,
        namespace: &str,
        module: &ModuleId,
        symbols: &[S],
    ) -> &mut Self {
        for symbol in symbols {
            self.forward(namespace, symbol.as_ref(), module);
        }
        self
    }

    /// Target of an import
    pub fn get(&self, namespace: &str, symbol: &str) -> Option<&ImportTarget> {
        self.entries
            .get(&(namespace.to_string(), symbol.to_string()))
    }

    /// Every entry as `(namespace, symbol, target)`
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &ImportTarget)> {
        self.entries
            .iter()
            .map(|((namespace, symbol), target)| (namespace.as_str(), symbol.as_str(), target))
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check that every target module is registered
    pub fn resolve(&self, binary: &BinaryModuleId, registry: &ModuleRegistry) -> Result<()> {
        for (namespace, symbol, target) in self.iter() {
            if !registry.is_registered(&target.module) {
                return Err(RuntimeError::UnresolvedImport {
                    binary: binary.clone(),
                    namespace: namespace.to_string(),
                    symbol: symbol.to_string(),
                    module: target.module.clone(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module_system::factory;

    #[test]
    fn test_resolve_reports_first_unregistered_target() {
        let registry = ModuleRegistry::new();
        registry.register(1, factory(|_, _, _| Ok(())));

        let mut table = ImportTable::new();
        table
            .forward_all("./todomvc", &ModuleId::from(1), &["a", "b"])
            .forward_as("env", "log", &ModuleId::from(9), "print");

        assert_eq!(table.len(), 3);
        assert_eq!(table.get("env", "log").unwrap().export, "print");

        let err = table.resolve(&BinaryModuleId::from(2), &registry).unwrap_err();
        assert_eq!(
            err,
            RuntimeError::UnresolvedImport {
                binary: BinaryModuleId::from(2),
                namespace: "env".into(),
                symbol: "log".into(),
                module: ModuleId::from(9),
            }
        );

        registry.register(9, factory(|_, _, _| Ok(())));
        assert!(table.resolve(&BinaryModuleId::from(2), &registry).is_ok());
    }
}
