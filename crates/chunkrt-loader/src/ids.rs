// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Opaque identifiers assigned at build time
//!
//! Bundlers number most units with small integers but may fall back to
//! strings (named chunks, hashed module paths). Both forms are stored as
//! text so a manifest key `"1"` and a literal `1` name the same unit.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::Arc;

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident, $expecting:literal) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(Arc<str>);

        impl $name {
            /// Create an identifier from its textual form
            pub fn new(id: impl AsRef<str>) -> Self {
                Self(Arc::from(id.as_ref()))
            }

            /// The identifier as text
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl From<u32> for $name {
            fn from(id: u32) -> Self {
                Self::new(id.to_string())
            }
        }

        impl From<i32> for $name {
            fn from(id: i32) -> Self {
                Self::new(id.to_string())
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self::new(id)
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(Arc::from(id))
            }
        }

        impl From<&$name> for $name {
            fn from(id: &$name) -> Self {
                id.clone()
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                struct IdVisitor;

                impl Visitor<'_> for IdVisitor {
                    type Value = $name;

                    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                        f.write_str($expecting)
                    }

                    fn visit_u64<E: de::Error>(self, v: u64) -> Result<$name, E> {
                        Ok($name::new(v.to_string()))
                    }

                    fn visit_i64<E: de::Error>(self, v: i64) -> Result<$name, E> {
                        if v < 0 {
                            return Err(E::invalid_value(de::Unexpected::Signed(v), &self));
                        }
                        Ok($name::new(v.to_string()))
                    }

                    fn visit_str<E: de::Error>(self, v: &str) -> Result<$name, E> {
                        if v.is_empty() {
                            return Err(E::invalid_length(0, &self));
                        }
                        Ok($name::new(v))
                    }
                }

                deserializer.deserialize_any(IdVisitor)
            }
        }
    };
}

opaque_id!(
    /// Identifier of a compiled code unit in the module registry
    ModuleId,
    "a module id (non-negative integer or non-empty string)"
);

opaque_id!(
    /// Identifier of a deployable chunk
    ChunkId,
    "a chunk id (non-negative integer or non-empty string)"
);

opaque_id!(
    /// Identifier of a WebAssembly unit bundled inside a chunk
    BinaryModuleId,
    "a binary module id (non-negative integer or non-empty string)"
);
