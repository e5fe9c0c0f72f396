//! HTTP byte fetch used for the catalog, downloads and streams

use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

use crate::{Error, Result};

#[async_trait::async_trait]
pub trait HttpFetcher: Send + Sync {
    /// Fetch the body at `url`. Bodies larger than `max_bytes` are rejected.
    async fn fetch(&self, url: &str, timeout: Duration, max_bytes: Option<usize>) -> Result<Bytes>;
}

/// `reqwest`-backed fetcher
#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    pub fn new(user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client })
    }
}

fn check_size(url: &str, len: u64, max_bytes: Option<usize>) -> Result<()> {
    match max_bytes {
        Some(max) if len > max as u64 => Err(Error::network(format!(
            "Response from {} is {} bytes, limit is {}",
            url, len, max
        ))),
        _ => Ok(()),
    }
}

fn append_limited(body: &mut BytesMut, chunk: &[u8], url: &str, max_bytes: Option<usize>) -> Result<()> {
    check_size(url, (body.len() + chunk.len()) as u64, max_bytes)?;
    body.put_slice(chunk);
    Ok(())
}

#[async_trait::async_trait]
impl HttpFetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str, timeout: Duration, max_bytes: Option<usize>) -> Result<Bytes> {
        let mut response = self.client.get(url).timeout(timeout).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::http(url, status.as_u16()));
        }

        if let Some(len) = response.content_length() {
            check_size(url, len, max_bytes)?;
        }

        // Content-Length may be absent, so the limit is enforced while reading
        let mut body = BytesMut::new();
        while let Some(chunk) = response.chunk().await? {
            append_limited(&mut body, &chunk, url, max_bytes)?;
        }
        let body = body.freeze();

        debug!("Fetched {} bytes from {}", body.len(), url);
        Ok(body)
    }
}
