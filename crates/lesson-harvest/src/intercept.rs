//! Network interceptor — buffers media responses triggered by one item.
//!
//! One listener is attached for the whole enumeration phase. Each item gets
//! a [`CaptureSession`] that borrows the interceptor mutably, so two items
//! can never share a buffer; running items concurrently would need one
//! listener per request context instead.

use std::time::Duration;

use tokio::time::Instant;

use crate::renderer::{PageDriver, ResponseStream};
use crate::types::{CapturedEvent, HarvestResult, ResourceKind};

const PLAYLIST_EXTENSIONS: &[&str] = &["m3u8"];
const DIRECT_MEDIA_EXTENSIONS: &[&str] = &["mp4", "m4v", "webm", "mov"];
const SEGMENT_EXTENSIONS: &[&str] = &["ts", "m4s", "aac"];

/// Classify a response URL by the extension of its path.
pub fn classify(url: &str) -> ResourceKind {
    let path = match url::Url::parse(url) {
        Ok(parsed) => parsed.path().to_ascii_lowercase(),
        Err(_) => url
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase(),
    };
    let Some((_, ext)) = path.rsplit_once('.') else {
        return ResourceKind::Other;
    };
    if PLAYLIST_EXTENSIONS.contains(&ext) {
        ResourceKind::Playlist
    } else if DIRECT_MEDIA_EXTENSIONS.contains(&ext) {
        ResourceKind::DirectMedia
    } else if SEGMENT_EXTENSIONS.contains(&ext) {
        ResourceKind::Segment
    } else {
        ResourceKind::Other
    }
}

/// Bounds of one capture window.
#[derive(Debug, Clone, Copy)]
pub struct CaptureWindow {
    /// Give up if no media response arrives within this long.
    pub max_wait: Duration,
    /// Keep collecting this long after the first media response.
    pub grace: Duration,
}

/// Passive listener over a page's responses.
pub struct NetworkInterceptor {
    stream: ResponseStream,
}

impl NetworkInterceptor {
    /// Attach a listener to `page`.
    pub async fn attach(page: &dyn PageDriver) -> HarvestResult<Self> {
        let stream = page.subscribe_responses().await?;
        tracing::debug!("response listener attached");
        Ok(Self { stream })
    }

    pub fn from_stream(stream: ResponseStream) -> Self {
        Self { stream }
    }

    /// Start a capture for one item, discarding anything observed before now.
    pub fn begin_capture(&mut self) -> CaptureSession<'_> {
        let dropped = self.stream.drain();
        if dropped > 0 {
            tracing::trace!(dropped, "discarded responses from before the capture window");
        }
        CaptureSession {
            stream: &mut self.stream,
            events: Vec::new(),
        }
    }

    /// Detach the listener.
    pub fn detach(self) {
        drop(self.stream);
        tracing::debug!("response listener detached");
    }
}

/// The buffer of one item's capture window.
pub struct CaptureSession<'a> {
    stream: &'a mut ResponseStream,
    events: Vec<CapturedEvent>,
}

impl CaptureSession<'_> {
    /// Collect media responses until the window closes.
    ///
    /// The window closes `grace` after the first media response, or after
    /// `max_wait` if none arrives. Returns the number of buffered events.
    pub async fn collect(&mut self, window: CaptureWindow) -> usize {
        let start = Instant::now();
        let mut deadline = start + window.max_wait;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, self.stream.recv()).await {
                Ok(Some(url)) => {
                    if self.record(url) && self.events.len() == 1 {
                        deadline = deadline.min(Instant::now() + window.grace);
                    }
                }
                Ok(None) => {
                    tracing::warn!("response listener closed during capture");
                    break;
                }
                Err(_) => break,
            }
        }
        if self.events.is_empty() {
            tracing::debug!(
                waited_ms = start.elapsed().as_millis() as u64,
                "capture window closed without media"
            );
        }
        self.events.len()
    }

    /// Buffer `url` if it carries a media signature.
    fn record(&mut self, url: String) -> bool {
        let kind = classify(&url);
        if !kind.is_media_signature() {
            return false;
        }
        tracing::debug!(url = %url, ?kind, "captured media response");
        self.events.push(CapturedEvent { url, kind });
        true
    }

    /// Freeze the buffer and hand it over.
    pub fn end(self) -> Vec<CapturedEvent> {
        self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(max_ms: u64, grace_ms: u64) -> CaptureWindow {
        CaptureWindow {
            max_wait: Duration::from_millis(max_ms),
            grace: Duration::from_millis(grace_ms),
        }
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify("https://cdn/x/master.m3u8"), ResourceKind::Playlist);
        assert_eq!(
            classify("https://cdn/x/720p.M3U8?token=abc"),
            ResourceKind::Playlist
        );
        assert_eq!(classify("https://cdn/v/file.mp4"), ResourceKind::DirectMedia);
        assert_eq!(classify("https://cdn/x/seg-001.ts"), ResourceKind::Segment);
        assert_eq!(classify("https://cdn/app.js"), ResourceKind::Other);
        assert_eq!(classify("https://cdn/watch?f=a.mp4"), ResourceKind::Other);
        assert_eq!(classify("not a url/clip.webm"), ResourceKind::DirectMedia);
    }

    #[tokio::test]
    async fn test_begin_capture_clears_previous_responses() {
        let (tx, stream) = ResponseStream::channel();
        let mut interceptor = NetworkInterceptor::from_stream(stream);

        tx.send("https://cdn/old/master.m3u8".into()).unwrap();
        let mut capture = interceptor.begin_capture();
        tx.send("https://cdn/new/master.m3u8".into()).unwrap();
        capture.collect(window(200, 10)).await;

        let events = capture.end();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].url, "https://cdn/new/master.m3u8");
    }

    #[tokio::test]
    async fn test_non_media_responses_are_ignored() {
        let (tx, stream) = ResponseStream::channel();
        let mut interceptor = NetworkInterceptor::from_stream(stream);
        let mut capture = interceptor.begin_capture();

        tx.send("https://site/api/lesson.json".into()).unwrap();
        tx.send("https://cdn/x/seg1.ts".into()).unwrap();
        tx.send("https://cdn/x/clip.mp4".into()).unwrap();
        capture.collect(window(200, 10)).await;

        let events = capture.end();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, ResourceKind::DirectMedia);
    }

    #[tokio::test]
    async fn test_grace_collects_sibling_manifests() {
        let (tx, stream) = ResponseStream::channel();
        let mut interceptor = NetworkInterceptor::from_stream(stream);
        let mut capture = interceptor.begin_capture();

        tx.send("https://cdn/x/seg1.m3u8".into()).unwrap();
        tx.send("https://cdn/x/master.m3u8".into()).unwrap();
        let n = capture.collect(window(5_000, 50)).await;
        assert_eq!(n, 2);
    }

    #[tokio::test]
    async fn test_empty_window_times_out() {
        let (_tx, stream) = ResponseStream::channel();
        let mut interceptor = NetworkInterceptor::from_stream(stream);
        let mut capture = interceptor.begin_capture();

        let started = std::time::Instant::now();
        assert_eq!(capture.collect(window(50, 10)).await, 0);
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(capture.end().is_empty());
    }

    #[tokio::test]
    async fn test_closed_listener_ends_window_early() {
        let (tx, stream) = ResponseStream::channel();
        let mut interceptor = NetworkInterceptor::from_stream(stream);
        let mut capture = interceptor.begin_capture();
        drop(tx);

        let started = std::time::Instant::now();
        capture.collect(window(5_000, 10)).await;
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
