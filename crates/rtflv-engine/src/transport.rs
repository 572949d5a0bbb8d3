//! Transport seam.
//!
//! The engine only needs "GET a URL, obtain a byte stream with a MIME type".
//! [`HttpTransport`] is the reqwest-backed default; tests substitute their
//! own implementation.

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::Url;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;
use tracing::debug;

use crate::config::DownloadConfig;
use crate::error::DownloadError;

pub type BoxReader = Box<dyn AsyncRead + Send + Unpin>;

/// An open stream: the server's Content-Type plus the body.
pub struct MediaStream {
    pub content_type: String,
    pub reader: BoxReader,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, url: &str) -> Result<MediaStream, DownloadError>;
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: &DownloadConfig) -> Result<Self, DownloadError> {
        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open(&self, url: &str) -> Result<MediaStream, DownloadError> {
        let url = url
            .parse::<Url>()
            .map_err(|e| DownloadError::invalid_url(url, e.to_string()))?;

        debug!(url = %url, "sending stream request");
        let response = self.client.get(url.clone()).send().await?;

        if !response.status().is_success() {
            return Err(DownloadError::http_status(response.status(), url.as_str()));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.split(';').next().unwrap_or("").trim().to_ascii_lowercase())
            .unwrap_or_default();

        debug!(url = %url, content_type = %content_type, "stream opened");

        let reader = StreamReader::new(
            response
                .bytes_stream()
                .map_err(std::io::Error::other)
                .boxed(),
        );

        Ok(MediaStream {
            content_type,
            reader: Box::new(reader),
        })
    }
}
