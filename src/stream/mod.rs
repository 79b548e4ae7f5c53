//! Live camera view.
//!
//! A [`CameraSource`] opens a [`CameraFeed`] per viewer. The feed is wrapped
//! in a [`FeedGuard`] that lives inside the response body stream, so the
//! camera is released exactly once however the stream ends: source fault,
//! end of data, or the viewer going away.

mod local;
mod remote;

pub use local::{JpegSplitter, LocalCamera};
pub use remote::RemoteCamera;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audit::AuditLog;
use crate::auth::Session;
use crate::config::{CameraConfig, CameraSourceType};

/// Content type of locally produced streams
pub const MJPEG_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

#[derive(Error, Debug)]
pub enum StreamError {
    /// The camera could not be opened or stopped producing data
    #[error("Camera source fault: {0}")]
    SourceFault(String),

    /// A single frame could not be encoded; the stream carries on
    #[error("Frame encode failed: {0}")]
    FrameEncode(String),

    #[error("Camera stream ended")]
    Ended,

    #[error("No camera configured")]
    NotConfigured,

    #[error("Server is shutting down")]
    ShuttingDown,
}

#[async_trait]
pub trait CameraSource: Send + Sync {
    async fn open(&self) -> Result<Box<dyn CameraFeed>, StreamError>;
}

/// One viewer's connection to the camera
#[async_trait]
pub trait CameraFeed: Send {
    fn content_type(&self) -> String;

    /// Next chunk ready to be sent as-is
    async fn next_chunk(&mut self) -> Result<Bytes, StreamError>;

    /// Stop the capture or upstream connection
    fn release(&mut self);
}

/// Releases the wrapped feed once, on [`FeedGuard::release`] or drop
pub struct FeedGuard {
    feed: Option<Box<dyn CameraFeed>>,
}

impl FeedGuard {
    pub fn new(feed: Box<dyn CameraFeed>) -> Self {
        Self { feed: Some(feed) }
    }

    pub async fn next_chunk(&mut self) -> Result<Bytes, StreamError> {
        match self.feed.as_mut() {
            Some(feed) => feed.next_chunk().await,
            None => Err(StreamError::Ended),
        }
    }

    pub fn release(&mut self) {
        if let Some(mut feed) = self.feed.take() {
            feed.release();
            debug!("Camera feed released");
        }
    }
}

impl Drop for FeedGuard {
    fn drop(&mut self) {
        self.release();
    }
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = Bytes> + Send>>;

/// An open camera stream ready to become a response body
pub struct CameraStream {
    pub content_type: String,
    pub chunks: ChunkStream,
}

/// Source used when no camera is set up
pub struct NoCamera;

#[async_trait]
impl CameraSource for NoCamera {
    async fn open(&self) -> Result<Box<dyn CameraFeed>, StreamError> {
        Err(StreamError::NotConfigured)
    }
}

pub fn create_source(config: &CameraConfig) -> Arc<dyn CameraSource> {
    match (&config.source, &config.remote_url) {
        (CameraSourceType::Local, _) => {
            info!(command = %config.capture_command, "Using local camera");
            Arc::new(LocalCamera::new(
                config.capture_command.clone(),
                config.capture_args.clone(),
                config.max_frame_bytes,
            ))
        }
        (CameraSourceType::Remote, Some(url)) => {
            info!(url = %url, "Using remote camera");
            Arc::new(RemoteCamera::new(url.clone()))
        }
        (CameraSourceType::Remote, None) => {
            warn!("Remote camera selected without camera.remote_url. Live view is disabled.");
            Arc::new(NoCamera)
        }
        (CameraSourceType::None, _) => Arc::new(NoCamera),
    }
}

pub struct StreamProxy {
    source: Arc<dyn CameraSource>,
    hardware_name: String,
    audit: AuditLog,
    /// Ends every open stream; streams are endless otherwise
    shutdown: CancellationToken,
}

impl StreamProxy {
    pub fn new(source: Arc<dyn CameraSource>, hardware_name: impl Into<String>, audit: AuditLog) -> Self {
        Self {
            source,
            hardware_name: hardware_name.into(),
            audit,
            shutdown: CancellationToken::new(),
        }
    }

    /// Close all open streams and refuse new ones
    pub fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            info!("Closing camera streams");
            self.shutdown.cancel();
        }
    }

    /// Open the camera for one viewer.
    ///
    /// The hardware event is recorded once here, after the source opened.
    /// The returned stream never restarts: once it ends the viewer has to
    /// request a new one.
    pub async fn open_stream(&self, session: &Session) -> Result<CameraStream, StreamError> {
        if self.shutdown.is_cancelled() {
            return Err(StreamError::ShuttingDown);
        }
        let feed = self.source.open().await?;
        let content_type = feed.content_type();
        let mut guard = FeedGuard::new(feed);

        self.audit
            .record_hardware_event(&self.hardware_name, Some(session))
            .await;
        info!(username = %session.username, hardware = %self.hardware_name, "Camera stream opened");

        let username = session.username.clone();
        let shutdown = self.shutdown.clone();
        let chunks = async_stream::stream! {
            let mut sent: u64 = 0;
            loop {
                let next = tokio::select! {
                    next = guard.next_chunk() => next,
                    _ = shutdown.cancelled() => {
                        info!(username = %username, chunks = sent, "Camera stream closed for shutdown");
                        break;
                    }
                };
                match next {
                    Ok(chunk) => {
                        sent += 1;
                        yield chunk;
                    }
                    Err(StreamError::FrameEncode(reason)) => {
                        debug!(reason = %reason, "Skipping frame");
                    }
                    Err(StreamError::Ended) => {
                        info!(username = %username, chunks = sent, "Camera stream ended");
                        break;
                    }
                    Err(e) => {
                        warn!(username = %username, chunks = sent, error = %e, "Camera stream aborted");
                        break;
                    }
                }
            }
            guard.release();
        };

        Ok(CameraStream {
            content_type,
            chunks: Box::pin(chunks),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{count_hardware_events, test_pool, UserRole};
    use chrono::Utc;
    use futures::StreamExt;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedSource {
        script: Vec<Result<&'static str, &'static str>>,
        releases: Arc<AtomicUsize>,
    }

    struct ScriptedFeed {
        script: VecDeque<Result<&'static str, &'static str>>,
        releases: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl CameraSource for ScriptedSource {
        async fn open(&self) -> Result<Box<dyn CameraFeed>, StreamError> {
            Ok(Box::new(ScriptedFeed {
                script: self.script.iter().cloned().collect(),
                releases: self.releases.clone(),
            }))
        }
    }

    #[async_trait]
    impl CameraFeed for ScriptedFeed {
        fn content_type(&self) -> String {
            MJPEG_CONTENT_TYPE.to_string()
        }

        async fn next_chunk(&mut self) -> Result<Bytes, StreamError> {
            match self.script.pop_front() {
                Some(Ok(chunk)) => Ok(Bytes::from_static(chunk.as_bytes())),
                Some(Err("encode")) => Err(StreamError::FrameEncode("bad frame".to_string())),
                Some(Err(reason)) => Err(StreamError::SourceFault(reason.to_string())),
                // endless once scripted chunks run out
                None => {
                    tokio::task::yield_now().await;
                    Ok(Bytes::from_static(b"tick"))
                }
            }
        }

        fn release(&mut self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn session() -> Session {
        Session {
            session_id: "sess".to_string(),
            user_id: 1,
            username: "alice".to_string(),
            role: UserRole::Read,
            created_at: Utc::now(),
            expires_at: Utc::now(),
        }
    }

    async fn proxy(script: Vec<Result<&'static str, &'static str>>) -> (StreamProxy, Arc<AtomicUsize>, crate::db::DbPool) {
        let db = test_pool().await;
        let releases = Arc::new(AtomicUsize::new(0));
        let source = ScriptedSource {
            script,
            releases: releases.clone(),
        };
        let proxy = StreamProxy::new(Arc::new(source), "Garage Camera", AuditLog::new(db.clone()));
        (proxy, releases, db)
    }

    #[tokio::test]
    async fn test_viewer_disconnect_releases_once() {
        let (proxy, releases, db) = proxy(vec![]).await;

        let mut stream = proxy.open_stream(&session()).await.unwrap();
        assert_eq!(stream.content_type, MJPEG_CONTENT_TYPE);
        for _ in 0..5 {
            assert_eq!(stream.chunks.next().await.unwrap(), "tick");
        }
        assert_eq!(releases.load(Ordering::SeqCst), 0);

        drop(stream);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert_eq!(count_hardware_events(&db, "Garage Camera").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unpolled_stream_still_releases() {
        let (proxy, releases, _db) = proxy(vec![]).await;
        let stream = proxy.open_stream(&session()).await.unwrap();
        drop(stream);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_encode_failures_are_skipped() {
        let (proxy, releases, _db) = proxy(vec![Ok("a"), Err("encode"), Ok("b"), Err("camera unplugged")]).await;

        let stream = proxy.open_stream(&session()).await.unwrap();
        let chunks: Vec<Bytes> = stream.chunks.collect().await;

        assert_eq!(chunks, vec![Bytes::from("a"), Bytes::from("b")]);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unconfigured_camera_records_nothing() {
        let db = test_pool().await;
        let proxy = StreamProxy::new(Arc::new(NoCamera), "Garage Camera", AuditLog::new(db.clone()));

        let result = proxy.open_stream(&session()).await;
        assert!(matches!(result, Err(StreamError::NotConfigured)));
        assert_eq!(count_hardware_events(&db, "Garage Camera").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_ends_open_streams() {
        let (proxy, releases, db) = proxy(vec![]).await;

        let mut stream = proxy.open_stream(&session()).await.unwrap();
        assert_eq!(stream.chunks.next().await.unwrap(), "tick");

        proxy.shutdown();
        let rest = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            stream.chunks.by_ref().collect::<Vec<_>>(),
        )
        .await
        .unwrap();
        assert!(rest.len() <= 1);
        assert!(stream.chunks.next().await.is_none());
        assert_eq!(releases.load(Ordering::SeqCst), 1);

        assert!(matches!(
            proxy.open_stream(&session()).await,
            Err(StreamError::ShuttingDown)
        ));
        assert_eq!(count_hardware_events(&db, "Garage Camera").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_remote_without_url_is_disabled() {
        let config = CameraConfig {
            source: CameraSourceType::Remote,
            remote_url: None,
            ..Default::default()
        };
        let source = create_source(&config);
        assert!(matches!(source.open().await, Err(StreamError::NotConfigured)));
    }
}
