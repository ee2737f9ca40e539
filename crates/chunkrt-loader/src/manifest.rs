// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Build-time chunk manifest
//!
//! The bundler decides at build time which chunks exist, which binary units
//! each chunk carries, the content fingerprint of every binary payload, and
//! the host exports each binary imports. The runtime only ever loads what is
//! declared here.
//!
//! ```toml
//! installed = [0]
//!
//! [chunks.1]
//! binaries = [2]
//!
//! [binaries.2]
//! fingerprint = "3130f85ae8cd67784cd0"
//!
//! [[binaries.2.imports]]
//! namespace = "./todomvc"
//! module = 1
//! symbols = ["__wbindgen_object_drop_ref", "__wbindgen_string_new"]
//! ```

use crate::error::{Result, RuntimeError};
use crate::ids::{BinaryModuleId, ChunkId, ModuleId};
use crate::linker::ImportTable;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Static lookup tables emitted by the bundler
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Manifest {
    /// Chunks whose code ships with the entry bundle
    pub installed: Vec<ChunkId>,
    /// Chunks with non-default contents
    pub chunks: BTreeMap<ChunkId, ChunkEntry>,
    /// Binary units by id
    pub binaries: BTreeMap<BinaryModuleId, BinaryEntry>,
}

/// Contents of one chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkEntry {
    /// Whether the chunk has a script part
    #[serde(default = "default_script")]
    pub script: bool,
    /// Binary units bundled with the chunk
    #[serde(default)]
    pub binaries: Vec<BinaryModuleId>,
}

fn default_script() -> bool {
    true
}

impl Default for ChunkEntry {
    fn default() -> Self {
        Self {
            script: true,
            binaries: Vec::new(),
        }
    }
}

/// A binary unit's payload and imports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryEntry {
    /// Content hash naming the payload file
    pub fingerprint: String,
    /// Imports, grouped by namespace and target module
    #[serde(default)]
    pub imports: Vec<ImportGroup>,
}

/// Symbols of one import namespace forwarded to one module's exports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportGroup {
    /// Import namespace as written in the binary
    pub namespace: String,
    /// Module whose exports receive the calls
    pub module: ModuleId,
    /// Imported symbols; each forwards to the export of the same name
    pub symbols: Vec<String>,
}

impl BinaryEntry {
    /// Assemble the import table for instantiation
    pub fn import_table(&self) -> ImportTable {
        let mut table = ImportTable::new();
        for group in &self.imports {
            table.forward_all(&group.namespace, &group.module, &group.symbols);
        }
        table
    }
}

impl Manifest {
    /// Contents of `chunk`; undeclared chunks are script-only
    pub fn chunk(&self, chunk: &ChunkId) -> ChunkEntry {
        self.chunks.get(chunk).cloned().unwrap_or_default()
    }

    /// Entry for a binary unit
    pub fn binary(&self, id: &BinaryModuleId) -> Result<&BinaryEntry> {
        self.binaries
            .get(id)
            .ok_or_else(|| RuntimeError::Config(format!("binary module {} is not in the manifest", id)))
    }

    /// Check internal consistency
    pub fn validate(&self) -> Result<()> {
        for (chunk, entry) in &self.chunks {
            for binary in &entry.binaries {
                if !self.binaries.contains_key(binary) {
                    return Err(RuntimeError::Config(format!(
                        "chunk {} references unknown binary module {}",
                        chunk, binary
                    )));
                }
            }
        }

        for (id, entry) in &self.binaries {
            let fingerprint = entry.fingerprint.as_str();
            if fingerprint.is_empty()
                || !fingerprint
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            {
                return Err(RuntimeError::Config(format!(
                    "binary module {} has an invalid fingerprint '{}'",
                    id, fingerprint
                )));
            }
        }

        Ok(())
    }
}
