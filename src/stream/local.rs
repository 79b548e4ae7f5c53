//! Camera attached to this machine, read through a capture command that
//! writes MJPEG to stdout.

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tracing::debug;

use super::{CameraFeed, CameraSource, StreamError, MJPEG_CONTENT_TYPE};

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];
const READ_CHUNK: usize = 16 * 1024;

pub struct LocalCamera {
    command: String,
    args: Vec<String>,
    max_frame_bytes: usize,
}

impl LocalCamera {
    pub fn new(command: String, args: Vec<String>, max_frame_bytes: usize) -> Self {
        Self {
            command,
            args,
            max_frame_bytes,
        }
    }
}

#[async_trait]
impl CameraSource for LocalCamera {
    async fn open(&self) -> Result<Box<dyn CameraFeed>, StreamError> {
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| StreamError::SourceFault(format!("failed to start {}: {}", self.command, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| StreamError::SourceFault("capture command has no stdout".to_string()))?;

        debug!(command = %self.command, pid = ?child.id(), "Started capture process");

        Ok(Box::new(LocalFeed {
            child,
            stdout,
            splitter: JpegSplitter::new(self.max_frame_bytes),
            read_buf: vec![0; READ_CHUNK],
        }))
    }
}

struct LocalFeed {
    child: Child,
    stdout: ChildStdout,
    splitter: JpegSplitter,
    read_buf: Vec<u8>,
}

#[async_trait]
impl CameraFeed for LocalFeed {
    fn content_type(&self) -> String {
        MJPEG_CONTENT_TYPE.to_string()
    }

    async fn next_chunk(&mut self) -> Result<Bytes, StreamError> {
        loop {
            if let Some(frame) = self.splitter.next_frame() {
                return frame.map(|jpeg| multipart_frame(&jpeg));
            }

            let n = self
                .stdout
                .read(&mut self.read_buf)
                .await
                .map_err(|e| StreamError::SourceFault(e.to_string()))?;
            if n == 0 {
                return Err(StreamError::Ended);
            }
            self.splitter.push(&self.read_buf[..n]);
        }
    }

    fn release(&mut self) {
        if let Err(e) = self.child.start_kill() {
            debug!(error = %e, "Capture process already exited");
        }
    }
}

/// Wrap one JPEG as a part of a `multipart/x-mixed-replace; boundary=frame` body
pub fn multipart_frame(jpeg: &[u8]) -> Bytes {
    let mut part = BytesMut::with_capacity(jpeg.len() + 48);
    part.put_slice(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n");
    part.put_slice(jpeg);
    part.put_slice(b"\r\n");
    part.freeze()
}

/// Cuts a raw MJPEG byte stream into individual JPEG images
pub struct JpegSplitter {
    buf: BytesMut,
    max_frame_bytes: usize,
    /// Offset already searched for an end marker
    scanned: usize,
}

impl JpegSplitter {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_frame_bytes,
            scanned: 0,
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Next complete frame, `None` if more input is needed.
    ///
    /// Malformed or oversized frames come back as
    /// [`StreamError::FrameEncode`] and are dropped from the buffer.
    pub fn next_frame(&mut self) -> Option<Result<Bytes, StreamError>> {
        let Some(start) = find(&self.buf, &SOI) else {
            // keep a trailing 0xFF, it may be the first half of a marker
            let keep = usize::from(self.buf.last() == Some(&0xFF));
            let _ = self.buf.split_to(self.buf.len() - keep);
            self.scanned = 0;
            return None;
        };
        if start > 0 {
            let _ = self.buf.split_to(start);
            self.scanned = 0;
        }

        let from = self.scanned.max(SOI.len());
        match find(&self.buf[from..], &EOI) {
            Some(offset) => {
                let end = from + offset + EOI.len();
                let frame = self.buf.split_to(end).freeze();
                self.scanned = 0;
                if frame.len() < 4 || frame[2] != 0xFF {
                    return Some(Err(StreamError::FrameEncode("malformed JPEG".to_string())));
                }
                if frame.len() > self.max_frame_bytes {
                    return Some(Err(StreamError::FrameEncode(format!(
                        "frame exceeds {} bytes",
                        self.max_frame_bytes
                    ))));
                }
                Some(Ok(frame))
            }
            None if self.buf.len() > self.max_frame_bytes => {
                self.buf.clear();
                self.scanned = 0;
                Some(Err(StreamError::FrameEncode(format!(
                    "frame exceeds {} bytes",
                    self.max_frame_bytes
                ))))
            }
            None => {
                // the last byte may start an end marker split across reads
                self.scanned = self.buf.len().saturating_sub(1);
                None
            }
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn jpeg(body: &[u8]) -> Vec<u8> {
        let mut v = vec![0xFF, 0xD8, 0xFF, 0xE0];
        v.extend_from_slice(body);
        v.extend_from_slice(&EOI);
        v
    }

    #[test]
    fn test_splits_frames_across_reads() {
        let mut data = jpeg(b"first");
        data.extend(jpeg(b"second"));

        let mut splitter = JpegSplitter::new(1024);
        let mut frames = Vec::new();
        for byte in data {
            splitter.push(&[byte]);
            while let Some(frame) = splitter.next_frame() {
                frames.push(frame.unwrap());
            }
        }

        assert_eq!(frames.len(), 2);
        assert_eq!(&frames[0][..], &jpeg(b"first")[..]);
        assert_eq!(&frames[1][..], &jpeg(b"second")[..]);
    }

    #[test]
    fn test_garbage_before_frame_is_dropped() {
        let mut splitter = JpegSplitter::new(1024);
        splitter.push(b"noise");
        assert!(splitter.next_frame().is_none());
        splitter.push(&jpeg(b"x"));
        assert_eq!(&splitter.next_frame().unwrap().unwrap()[..], &jpeg(b"x")[..]);
    }

    #[test]
    fn test_malformed_and_oversized_frames() {
        let mut splitter = JpegSplitter::new(16);
        splitter.push(&[0xFF, 0xD8, 0x00, 0xFF, 0xD9]);
        assert!(matches!(splitter.next_frame(), Some(Err(StreamError::FrameEncode(_)))));

        splitter.push(&jpeg(&[0u8; 64]));
        assert!(matches!(splitter.next_frame(), Some(Err(StreamError::FrameEncode(_)))));
        assert!(splitter.next_frame().is_none());
    }

    #[test]
    fn test_multipart_framing() {
        let part = multipart_frame(b"JPEG");
        assert_eq!(&part[..], b"--frame\r\nContent-Type: image/jpeg\r\n\r\nJPEG\r\n");
    }

    #[tokio::test]
    async fn test_capture_command_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.mjpeg");
        let mut data = jpeg(b"one");
        data.extend([0xFF, 0xD8, 0x00, 0xFF, 0xD9]);
        data.extend(jpeg(b"two"));
        std::fs::write(&path, &data).unwrap();

        let camera = LocalCamera::new(
            "cat".to_string(),
            vec![path.display().to_string()],
            1024,
        );
        let mut feed = camera.open().await.unwrap();
        assert_eq!(feed.content_type(), MJPEG_CONTENT_TYPE);

        assert_eq!(feed.next_chunk().await.unwrap(), multipart_frame(&jpeg(b"one")));
        assert!(matches!(feed.next_chunk().await, Err(StreamError::FrameEncode(_))));
        assert_eq!(feed.next_chunk().await.unwrap(), multipart_frame(&jpeg(b"two")));
        assert!(matches!(feed.next_chunk().await, Err(StreamError::Ended)));
        feed.release();
    }

    #[tokio::test]
    async fn test_missing_command_is_a_source_fault() {
        let camera = LocalCamera::new("/nonexistent/rpicam-vid".to_string(), vec![], 1024);
        assert!(matches!(camera.open().await, Err(StreamError::SourceFault(_))));
    }

    #[tokio::test]
    async fn test_proxy_over_capture_command() {
        use crate::audit::AuditLog;
        use crate::stream::StreamProxy;
        use std::sync::Arc;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.mjpeg");
        std::fs::write(&path, jpeg(b"frame")).unwrap();

        let db = crate::db::test_pool().await;
        let camera = LocalCamera::new("cat".to_string(), vec![path.display().to_string()], 1024);
        let proxy = StreamProxy::new(Arc::new(camera), "Garage Camera", AuditLog::new(db));
        let session = crate::auth::Session {
            session_id: "s".to_string(),
            user_id: 1,
            username: "alice".to_string(),
            role: crate::db::UserRole::Read,
            created_at: chrono::Utc::now(),
            expires_at: chrono::Utc::now(),
        };

        let stream = proxy.open_stream(&session).await.unwrap();
        let chunks: Vec<Bytes> = stream.chunks.collect().await;
        assert_eq!(chunks, vec![multipart_frame(&jpeg(b"frame"))]);
    }
}
