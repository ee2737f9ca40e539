// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Byte sources for binary payloads

use crate::error::FailureCategory;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use futures::StreamExt;
use futures::stream::BoxStream;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Transport-level failure of a single fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchFailure {
    /// How the fetch failed
    pub category: FailureCategory,
    /// Transport detail
    pub detail: String,
}

impl FetchFailure {
    /// The transport could not deliver the payload
    pub fn network(detail: impl Into<String>) -> Self {
        Self {
            category: FailureCategory::Network,
            detail: detail.into(),
        }
    }

    /// The payload does not exist
    pub fn missing(detail: impl Into<String>) -> Self {
        Self {
            category: FailureCategory::Missing,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.category, self.detail)
    }
}

impl std::error::Error for FetchFailure {}

/// A fetched payload
pub enum FetchBody {
    /// The whole payload at once
    Buffered(Bytes),
    /// The payload as it arrives
    Streaming(BoxStream<'static, Result<Bytes, FetchFailure>>),
}

impl FetchBody {
    /// Read the whole payload
    pub async fn into_bytes(self) -> Result<Bytes, FetchFailure> {
        match self {
            FetchBody::Buffered(bytes) => Ok(bytes),
            FetchBody::Streaming(mut stream) => {
                let mut buffer = BytesMut::new();
                while let Some(chunk) = stream.next().await {
                    buffer.extend_from_slice(&chunk?);
                }
                Ok(buffer.freeze())
            }
        }
    }

    /// Whether the payload streams
    pub fn is_streaming(&self) -> bool {
        matches!(self, FetchBody::Streaming(_))
    }
}

/// Retrieves binary payloads by locator
#[async_trait]
pub trait ByteSource: Send + Sync {
    /// Fetch the payload at `locator`
    async fn fetch(&self, locator: &str) -> Result<FetchBody, FetchFailure>;
}

/// Reads payloads from a directory
#[derive(Debug, Clone)]
pub struct FsSource {
    root: PathBuf,
}

impl FsSource {
    /// Serve locators relative to `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory locators are resolved against
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl ByteSource for FsSource {
    #[instrument(skip(self))]
    async fn fetch(&self, locator: &str) -> Result<FetchBody, FetchFailure> {
        let path = self.root.join(locator.trim_start_matches('/'));
        debug!("Reading {}", path.display());

        match tokio::fs::read(&path).await {
            Ok(data) => Ok(FetchBody::Buffered(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(FetchFailure::missing(format!("{} not found", path.display())))
            }
            Err(e) => Err(FetchFailure::network(format!("{}: {}", path.display(), e))),
        }
    }
}

/// Serves payloads held in memory
///
/// With a chunk size set, payloads are delivered as a stream of slices of
/// that size.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    payloads: Arc<DashMap<String, Bytes>>,
    chunk_size: Option<usize>,
}

impl MemorySource {
    /// Create an empty source
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver payloads as streams of `chunk_size` byte slices
    pub fn streaming(chunk_size: usize) -> Self {
        Self {
            payloads: Arc::default(),
            chunk_size: Some(chunk_size.max(1)),
        }
    }

    /// Serve `data` at `locator`
    pub fn insert(&self, locator: impl Into<String>, data: impl Into<Bytes>) {
        self.payloads.insert(locator.into(), data.into());
    }

    /// Stop serving `locator`
    pub fn remove(&self, locator: &str) {
        self.payloads.remove(locator);
    }
}

#[async_trait]
impl ByteSource for MemorySource {
    async fn fetch(&self, locator: &str) -> Result<FetchBody, FetchFailure> {
        let data = self
            .payloads
            .get(locator)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| FetchFailure::missing(format!("{} not found", locator)))?;

        match self.chunk_size {
            None => Ok(FetchBody::Buffered(data)),
            Some(size) => {
                let slices: Vec<Result<Bytes, FetchFailure>> = (0..data.len())
                    .step_by(size)
                    .map(|start| Ok(data.slice(start..(start + size).min(data.len()))))
                    .collect();
                Ok(FetchBody::Streaming(futures::stream::iter(slices).boxed()))
            }
        }
    }
}

#[cfg(feature = "http")]
pub use http::HttpSource;

#[cfg(feature = "http")]
mod http {
    use super::{ByteSource, FetchBody, FetchFailure};
    use async_trait::async_trait;
    use futures::StreamExt;
    use reqwest::Client;
    use tracing::{debug, instrument};
    use url::Url;

    /// Fetches payloads over HTTP(S)
    #[derive(Clone)]
    pub struct HttpSource {
        client: Client,
        base: Option<Url>,
    }

    impl HttpSource {
        /// Create a source; relative locators are joined onto `base`
        pub fn new(base: Option<&str>) -> Result<Self, FetchFailure> {
            let base = base
                .map(Url::parse)
                .transpose()
                .map_err(|e| FetchFailure::network(format!("invalid base URL: {}", e)))?;

            let client = Client::builder()
                .user_agent(format!("chunkrt/{}", env!("CARGO_PKG_VERSION")))
                .build()
                .map_err(|e| FetchFailure::network(e.to_string()))?;

            Ok(Self { client, base })
        }

        fn resolve(&self, locator: &str) -> Result<Url, FetchFailure> {
            let resolved = match &self.base {
                Some(base) => base.join(locator),
                None => Url::parse(locator),
            };
            resolved.map_err(|e| FetchFailure::network(format!("invalid locator '{}': {}", locator, e)))
        }
    }

    #[async_trait]
    impl ByteSource for HttpSource {
        #[instrument(skip(self))]
        async fn fetch(&self, locator: &str) -> Result<FetchBody, FetchFailure> {
            let url = self.resolve(locator)?;
            debug!("Fetching {}", url);

            let response = self
                .client
                .get(url.clone())
                .send()
                .await
                .map_err(|e| FetchFailure::network(e.to_string()))?;

            if response.status() == reqwest::StatusCode::NOT_FOUND {
                return Err(FetchFailure::missing(format!("{}: HTTP 404", url)));
            }

            if !response.status().is_success() {
                return Err(FetchFailure::network(format!("{}: HTTP {}", url, response.status())));
            }

            let stream = response
                .bytes_stream()
                .map(|chunk| chunk.map_err(|e| FetchFailure::network(e.to_string())));
            Ok(FetchBody::Streaming(stream.boxed()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fs_source_categories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("dist")).unwrap();
        std::fs::write(dir.path().join("dist/abc.module.wasm"), b"payload").unwrap();

        let source = FsSource::new(dir.path());
        let body = source.fetch("dist/abc.module.wasm").await.unwrap();
        assert_eq!(body.into_bytes().await.unwrap(), Bytes::from_static(b"payload"));

        let failure = source.fetch("dist/nope.module.wasm").await.err().unwrap();
        assert_eq!(failure.category, FailureCategory::Missing);

        let failure = source.fetch("dist").await.err().unwrap();
        assert_eq!(failure.category, FailureCategory::Network);
    }

    #[tokio::test]
    async fn test_memory_source_streams_slices() {
        let source = MemorySource::streaming(3);
        source.insert("a", Bytes::from_static(b"abcdefg"));

        let body = source.fetch("a").await.unwrap();
        assert!(body.is_streaming());
        assert_eq!(body.into_bytes().await.unwrap(), Bytes::from_static(b"abcdefg"));
        assert_eq!(
            source.fetch("b").await.err().unwrap().category,
            FailureCategory::Missing
        );
    }
}
