use super::{Headers, ResourceClient, ResourceError};
use async_trait::async_trait;

/// HTTP client; range reads go through the default `Range` header path.
#[derive(Clone, Debug, Default)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ResourceClient for ReqwestClient {
    async fn get(&self, url: &str, headers: Option<Headers>) -> Result<Vec<u8>, ResourceError> {
        let mut req = self.client.get(url);
        for (k, v) in headers.unwrap_or_default() {
            req = req.header(k, v);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| ResourceError::Network(e.to_string()))?;
        // 206 for range reads, 200 when the server ignores the range on a full read
        let status = resp.status().as_u16();
        if !(200..300).contains(&status) {
            return Err(ResourceError::Status(status));
        }
        Ok(resp
            .bytes()
            .await
            .map_err(|e| ResourceError::Network(e.to_string()))?
            .to_vec())
    }
}
