use super::{Headers, ResourceClient, ResourceError};
use crate::resource::file::FileClient;
use async_trait::async_trait;

/// Sends `file://` urls to the filesystem and everything else to `inner`.
pub struct HybridClient<T: ResourceClient> {
    file_client: FileClient,
    inner: T,
}

impl<T: ResourceClient> HybridClient<T> {
    pub fn new(inner: T) -> Self {
        Self {
            file_client: FileClient,
            inner,
        }
    }
}

#[async_trait]
impl<T: ResourceClient> ResourceClient for HybridClient<T> {
    async fn get(&self, url: &str, headers: Option<Headers>) -> Result<Vec<u8>, ResourceError> {
        if url.starts_with("file://") {
            self.file_client.get(url, headers).await
        } else {
            self.inner.get(url, headers).await
        }
    }

    async fn get_range(
        &self,
        url: &str,
        offset: u64,
        length: u64,
        headers: Option<Headers>,
    ) -> Result<Vec<u8>, ResourceError> {
        if url.starts_with("file://") {
            self.file_client.get_range(url, offset, length, headers).await
        } else {
            self.inner.get_range(url, offset, length, headers).await
        }
    }
}
