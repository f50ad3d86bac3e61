//! Remote URL source backend
//!
//! Downloads CSV data over HTTP(S) with a bounded streaming read so an
//! oversized or runaway response never exhausts memory. Redirects are
//! followed; basic auth is applied when credentials are configured.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::HttpConfig;
use crate::errors::{ImportError, ImportResult};
use crate::models::SourceConfig;
use crate::sources::SourceFetcher;

pub struct RemoteSource {
    client: Client,
    max_download_bytes: u64,
}

impl RemoteSource {
    pub fn new(http: &HttpConfig) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(http.connect_timeout_secs))
            .timeout(Duration::from_secs(http.request_timeout_secs))
            .user_agent(http.user_agent.clone())
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            max_download_bytes: http.max_download_bytes,
        }
    }

    fn url_of<'a>(&self, source: &'a SourceConfig) -> ImportResult<&'a str> {
        source
            .url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| ImportError::config("remote source has no URL configured"))
    }

    fn request(&self, source: &SourceConfig, url: &str) -> reqwest::RequestBuilder {
        let mut request = self.client.get(url);
        if let Some(username) = &source.username {
            request = request.basic_auth(username, source.password.as_deref());
        }
        request
    }
}

#[async_trait]
impl SourceFetcher for RemoteSource {
    async fn fetch(&self, source: &SourceConfig) -> ImportResult<String> {
        let url = self.url_of(source)?;
        debug!("Downloading CSV from {}", url);

        let response = self
            .request(source, url)
            .send()
            .await
            .map_err(|e| ImportError::source_unavailable(format!("request to {url} failed: {e}")))?;

        if !response.status().is_success() {
            return Err(ImportError::source_unavailable(format!(
                "{url} returned HTTP {}",
                response.status()
            )));
        }

        let mut body: Vec<u8> = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                ImportError::source_unavailable(format!("download from {url} failed: {e}"))
            })?;
            if body.len() as u64 + chunk.len() as u64 > self.max_download_bytes {
                return Err(ImportError::source_unavailable(format!(
                    "{url} exceeded the {} byte download limit",
                    self.max_download_bytes
                )));
            }
            body.extend_from_slice(&chunk);
        }

        let text = String::from_utf8_lossy(&body).into_owned();
        if text.trim().is_empty() {
            return Err(ImportError::source_empty(url.to_string()));
        }

        debug!("Downloaded {} bytes from {}", body.len(), url);
        Ok(text)
    }

    async fn probe(&self, source: &SourceConfig) -> ImportResult<()> {
        let url = self.url_of(source)?;

        let mut head = self.client.head(url);
        if let Some(username) = &source.username {
            head = head.basic_auth(username, source.password.as_deref());
        }

        let status = match head.send().await {
            Ok(response) => response.status(),
            Err(e) => {
                return Err(ImportError::source_unavailable(format!(
                    "probe of {url} failed: {e}"
                )))
            }
        };

        // Some servers refuse HEAD outright; retry those with a plain GET
        let status = if matches!(
            status,
            StatusCode::METHOD_NOT_ALLOWED | StatusCode::NOT_IMPLEMENTED
        ) {
            warn!("{} rejected HEAD ({}), probing with GET", url, status);
            self.request(source, url)
                .send()
                .await
                .map_err(|e| {
                    ImportError::source_unavailable(format!("probe of {url} failed: {e}"))
                })?
                .status()
        } else {
            status
        };

        if status.is_success() {
            Ok(())
        } else {
            Err(ImportError::source_unavailable(format!(
                "{url} returned HTTP {status}"
            )))
        }
    }
}
