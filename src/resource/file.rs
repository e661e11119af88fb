use super::{inclusive_range, Headers, ResourceClient, ResourceError};
use async_trait::async_trait;
use std::io::SeekFrom;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Reads `file://` urls from the local filesystem.
#[derive(Clone, Debug, Default)]
pub struct FileClient;

impl FileClient {
    fn path(url: &str) -> Result<&str, ResourceError> {
        url.strip_prefix("file://").ok_or_else(|| {
            ResourceError::Unsupported("This client supports only file:// urls.".to_string())
        })
    }
}

#[async_trait]
impl ResourceClient for FileClient {
    async fn get(&self, url: &str, _headers: Option<Headers>) -> Result<Vec<u8>, ResourceError> {
        let path = Self::path(url)?;
        Ok(tokio::fs::read(path).await?)
    }

    async fn get_range(
        &self,
        url: &str,
        offset: u64,
        length: u64,
        _headers: Option<Headers>,
    ) -> Result<Vec<u8>, ResourceError> {
        let path = Self::path(url)?;
        inclusive_range(offset, length)?;
        let capacity = usize::try_from(length)
            .map_err(|_| ResourceError::RangeOverflow { offset, length })?;

        let mut file = tokio::fs::File::open(path).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut bytes = vec![0; capacity];
        file.read_exact(&mut bytes).await?;
        Ok(bytes)
    }
}
