//! MJPEG stream served by another host, relayed byte for byte.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::CONTENT_TYPE;
use std::pin::Pin;
use std::time::Duration;
use tracing::debug;

use super::{CameraFeed, CameraSource, StreamError};

/// mjpg-streamer's boundary, used when the upstream sends no content type
const DEFAULT_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=boundarydonotcross";

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

pub struct RemoteCamera {
    url: String,
    http_client: reqwest::Client,
}

impl RemoteCamera {
    pub fn new(url: String) -> Self {
        // no overall timeout: the body is an endless stream
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();

        Self { url, http_client }
    }
}

#[async_trait]
impl CameraSource for RemoteCamera {
    async fn open(&self) -> Result<Box<dyn CameraFeed>, StreamError> {
        let response = self
            .http_client
            .get(&self.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| StreamError::SourceFault(e.to_string()))?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();

        debug!(url = %self.url, content_type = %content_type, "Connected to remote camera");

        Ok(Box::new(RemoteFeed {
            content_type,
            body: Some(Box::pin(response.bytes_stream())),
        }))
    }
}

struct RemoteFeed {
    content_type: String,
    body: Option<ByteStream>,
}

#[async_trait]
impl CameraFeed for RemoteFeed {
    fn content_type(&self) -> String {
        self.content_type.clone()
    }

    async fn next_chunk(&mut self) -> Result<Bytes, StreamError> {
        let Some(body) = self.body.as_mut() else {
            return Err(StreamError::Ended);
        };
        loop {
            match body.next().await {
                Some(Ok(chunk)) if chunk.is_empty() => continue,
                Some(Ok(chunk)) => return Ok(chunk),
                Some(Err(e)) => return Err(StreamError::SourceFault(e.to_string())),
                None => return Err(StreamError::Ended),
            }
        }
    }

    fn release(&mut self) {
        // dropping the body closes the upstream connection
        self.body = None;
    }
}
