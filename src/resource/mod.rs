#[cfg(feature = "fs")]
pub mod file;

#[cfg(feature = "reqwest")]
pub mod reqwest;

#[cfg(all(feature = "fs", feature = "reqwest"))]
pub mod hybrid;

pub mod memory;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument};

pub type Headers = BTreeMap<String, String>;

#[async_trait]
pub trait ResourceClient: Send + Sync {
    async fn get(&self, url: &str, headers: Option<Headers>) -> Result<Vec<u8>, ResourceError>;

    /// Reads `length` bytes starting at `offset`, i.e. the inclusive range
    /// `offset..=offset + length - 1`.
    async fn get_range(
        &self,
        url: &str,
        offset: u64,
        length: u64,
        headers: Option<Headers>,
    ) -> Result<Vec<u8>, ResourceError> {
        let range_value = range_header(offset, length)?;

        // Merge headers
        let mut all_headers = headers.unwrap_or_default();
        all_headers.insert("Range".to_string(), range_value);

        self.get(url, Some(all_headers)).await
    }
}

#[async_trait]
impl<C: ResourceClient + ?Sized> ResourceClient for Arc<C> {
    async fn get(&self, url: &str, headers: Option<Headers>) -> Result<Vec<u8>, ResourceError> {
        (**self).get(url, headers).await
    }

    async fn get_range(
        &self,
        url: &str,
        offset: u64,
        length: u64,
        headers: Option<Headers>,
    ) -> Result<Vec<u8>, ResourceError> {
        (**self).get_range(url, offset, length, headers).await
    }
}

/// Value of the HTTP `Range` header covering `length` bytes from `offset`.
pub fn range_header(offset: u64, length: u64) -> Result<String, ResourceError> {
    let (first, last) = inclusive_range(offset, length)?;
    Ok(format!("bytes={}-{}", first, last))
}

pub fn inclusive_range(offset: u64, length: u64) -> Result<(u64, u64), ResourceError> {
    if length == 0 {
        return Err(ResourceError::EmptyRange(offset));
    }
    let last = offset
        .checked_add(length - 1)
        .ok_or(ResourceError::RangeOverflow { offset, length })?;
    Ok((offset, last))
}

#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unexpected HTTP status code: {0}")]
    Status(u16),

    #[error("File error: {0}")]
    File(#[from] std::io::Error),

    #[error("Range of {length} bytes at {offset} overflows")]
    RangeOverflow { offset: u64, length: u64 },

    #[error("Empty range at {0}")]
    EmptyRange(u64),

    #[error("Expected {expected} bytes, received {received}")]
    ShortRead { expected: u64, received: u64 },

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Unsupported scheme: {0}")]
    Unsupported(String),
}

/// Cloneable handle on a [`ResourceClient`] with headers applied to every request.
#[derive(Clone)]
pub struct ResourceLoader {
    client: Arc<dyn ResourceClient>,
    headers: Headers,
}

impl fmt::Debug for ResourceLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceLoader")
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl ResourceLoader {
    pub fn new(client: impl ResourceClient + 'static) -> Self {
        Self::from_arc(Arc::new(client))
    }

    pub fn from_arc(client: Arc<dyn ResourceClient>) -> Self {
        Self {
            client,
            headers: Headers::new(),
        }
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers.extend(headers);
        self
    }

    fn merged(&self, headers: Option<Headers>) -> Option<Headers> {
        match (self.headers.is_empty(), headers) {
            (true, headers) => headers,
            (false, None) => Some(self.headers.clone()),
            (false, Some(extra)) => {
                let mut all = self.headers.clone();
                all.extend(extra);
                Some(all)
            }
        }
    }

    pub async fn get(&self, url: &str, headers: Option<Headers>) -> Result<Vec<u8>, ResourceError> {
        self.client.get(url, self.merged(headers)).await
    }

    #[instrument(level = "debug", skip(self, headers))]
    pub async fn get_range(
        &self,
        url: &str,
        offset: u64,
        length: u64,
        headers: Option<Headers>,
    ) -> Result<Vec<u8>, ResourceError> {
        let bytes = self
            .client
            .get_range(url, offset, length, self.merged(headers))
            .await?;

        if bytes.len() as u64 != length {
            return Err(ResourceError::ShortRead {
                expected: length,
                received: bytes.len() as u64,
            });
        }
        debug!(received = bytes.len(), "range read");

        Ok(bytes)
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        headers: Option<Headers>,
    ) -> Result<T, ResourceError> {
        let bytes = self.get(url, headers).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
