// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Error types for the chunk runtime

use crate::ids::{BinaryModuleId, ChunkId, ModuleId};
use std::fmt;
use thiserror::Error;

/// Result type for chunk runtime operations
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Why a chunk fetch failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureCategory {
    /// The fetch did not complete before the chunk timeout
    Timeout,
    /// The transport reported an error
    Network,
    /// The payload was retrieved but does not exist or did not register itself
    Missing,
}

impl FailureCategory {
    /// Name used in error messages
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Network => "network",
            Self::Missing => "missing",
        }
    }

    /// Whether an automatic retry can help
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::Network)
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A chunk could not be fetched
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Loading chunk {chunk} failed.\n({category}: {locator})")]
pub struct ChunkLoadError {
    /// Chunk whose load failed
    pub chunk: ChunkId,
    /// Failure category
    pub category: FailureCategory,
    /// Source locator that was attempted
    pub locator: String,
    /// Transport-specific detail, if any
    pub detail: Option<String>,
}

impl ChunkLoadError {
    /// Create a new chunk load error
    pub fn new(chunk: ChunkId, category: FailureCategory, locator: impl Into<String>) -> Self {
        Self {
            chunk,
            category,
            locator: locator.into(),
            detail: None,
        }
    }

    /// Attach transport detail
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Errors that can occur in the chunk runtime
///
/// Every variant is cheap to clone so one failure can be delivered to every
/// caller waiting on the same chunk.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    /// A module id that was never registered was required
    #[error("Cannot find module '{0}'")]
    UnknownModule(ModuleId),

    /// A chunk fetch failed
    #[error(transparent)]
    ChunkLoad(#[from] ChunkLoadError),

    /// An import table entry points at a module that is not registered
    #[error("Unresolved import '{namespace}'.'{symbol}' of binary module {binary}: module '{module}' is not registered")]
    UnresolvedImport {
        /// Binary module being linked
        binary: BinaryModuleId,
        /// Import namespace
        namespace: String,
        /// Imported symbol
        symbol: String,
        /// Module the import forwards to
        module: ModuleId,
    },

    /// Compilation or instantiation of a binary module was rejected
    #[error("Linking binary module {binary} failed: {reason}")]
    LinkFailure {
        /// Binary module being linked
        binary: BinaryModuleId,
        /// Reason for failure
        reason: String,
    },

    /// An export looked up by name does not exist
    #[error("Module '{module}' has no export '{name}'")]
    MissingExport {
        /// Module (or binary module) that was searched
        module: String,
        /// Export name
        name: String,
    },

    /// A value that is not a function was called
    #[error("TypeError: {0} is not a function")]
    NotCallable(String),

    /// A call into a binary module failed
    #[error("Call to binary export '{symbol}' failed: {reason}")]
    BinaryCall {
        /// Export name
        symbol: String,
        /// Reason for failure
        reason: String,
    },

    /// A value crossing the binary ABI has the wrong type
    #[error("ABI type mismatch: {0}")]
    Abi(String),

    /// A pending load was dropped without being resolved or rejected
    #[error("Load of {0} was abandoned before completion")]
    Abandoned(String),

    /// Configuration or manifest error
    #[error("Configuration error: {0}")]
    Config(String),

    /// File system error
    #[error("File system error: {0}")]
    Io(String),
}

impl RuntimeError {
    /// Create a link failure
    pub fn link(binary: &BinaryModuleId, reason: impl fmt::Display) -> Self {
        Self::LinkFailure {
            binary: binary.clone(),
            reason: reason.to_string(),
        }
    }

    /// Create a missing export error
    pub fn missing_export(module: impl fmt::Display, name: impl Into<String>) -> Self {
        Self::MissingExport {
            module: module.to_string(),
            name: name.into(),
        }
    }

    /// The chunk load failure, if this is one
    pub fn as_chunk_load(&self) -> Option<&ChunkLoadError> {
        match self {
            Self::ChunkLoad(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for RuntimeError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<toml::de::Error> for RuntimeError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<serde_json::Error> for RuntimeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(err.to_string())
    }
}
