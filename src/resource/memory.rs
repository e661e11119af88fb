use super::{inclusive_range, Headers, ResourceClient, ResourceError};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestRecord {
    pub url: String,
    pub range: Option<(u64, u64)>,
}

/// Serves resources from memory and records every request it answers.
#[derive(Clone, Default)]
pub struct MemoryClient {
    resources: Arc<Mutex<HashMap<String, Bytes>>>,
    requests: Arc<Mutex<Vec<RequestRecord>>>,
}

impl MemoryClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, url: impl Into<String>, data: impl Into<Bytes>) {
        self.resources.lock().insert(url.into(), data.into());
    }

    pub fn requests(&self) -> Vec<RequestRecord> {
        self.requests.lock().clone()
    }

    /// Number of requests made against `url`.
    pub fn request_count(&self, url: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|request| request.url == url)
            .count()
    }

    fn resource(&self, url: &str) -> Result<Bytes, ResourceError> {
        self.resources
            .lock()
            .get(url)
            .cloned()
            .ok_or_else(|| ResourceError::NotFound(url.to_string()))
    }
}

#[async_trait]
impl ResourceClient for MemoryClient {
    async fn get(&self, url: &str, _headers: Option<Headers>) -> Result<Vec<u8>, ResourceError> {
        self.requests.lock().push(RequestRecord {
            url: url.to_string(),
            range: None,
        });
        Ok(self.resource(url)?.to_vec())
    }

    async fn get_range(
        &self,
        url: &str,
        offset: u64,
        length: u64,
        _headers: Option<Headers>,
    ) -> Result<Vec<u8>, ResourceError> {
        let (first, last) = inclusive_range(offset, length)?;
        self.requests.lock().push(RequestRecord {
            url: url.to_string(),
            range: Some((first, last)),
        });

        let data = self.resource(url)?;
        if last >= data.len() as u64 {
            return Err(ResourceError::ShortRead {
                expected: length,
                received: (data.len() as u64).saturating_sub(first),
            });
        }

        Ok(data.slice(first as usize..=last as usize).to_vec())
    }
}
