//! Renderer abstraction for the live browser session.
//!
//! Defines the `Renderer` and `PageDriver` traits that abstract over the
//! browser engine (currently Chromium via chromiumoxide). Controllers only
//! see these traits, so they can be driven by an in-memory page in tests.

pub mod chromium;
pub mod script;

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::selectors::Locator;
use crate::types::{HarvestResult, SeedCookie};

/// A browser engine that can open pages.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Open a new page (tab).
    async fn new_page(&self) -> HarvestResult<Box<dyn PageDriver>>;
    /// Shut down the browser engine.
    async fn shutdown(&self) -> HarvestResult<()>;
}

/// A single live page.
///
/// Element operations take a locator plus a positional index and re-query
/// the DOM on every call.
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Navigate to a URL, failing if the load exceeds `timeout`.
    async fn goto(&self, url: &str, timeout: Duration) -> HarvestResult<()>;
    /// Wait until network activity settles or `timeout` elapses.
    async fn wait_for_network_idle(&self, timeout: Duration) -> HarvestResult<()>;
    async fn title(&self) -> HarvestResult<String>;
    async fn url(&self) -> HarvestResult<String>;
    /// Number of elements currently matching `locator`.
    async fn count(&self, locator: &Locator) -> HarvestResult<usize>;
    async fn is_visible(&self, locator: &Locator, index: usize) -> HarvestResult<bool>;
    /// Script-dispatched click; does not require the element to be hit-testable.
    async fn click(&self, locator: &Locator, index: usize) -> HarvestResult<()>;
    async fn fill(&self, locator: &Locator, index: usize, value: &str) -> HarvestResult<()>;
    async fn attribute(
        &self,
        locator: &Locator,
        index: usize,
        name: &str,
    ) -> HarvestResult<Option<String>>;
    async fn inner_text(&self, locator: &Locator, index: usize) -> HarvestResult<String>;
    async fn scroll_into_view(&self, locator: &Locator, index: usize) -> HarvestResult<()>;
    /// Full page markup.
    async fn content(&self) -> HarvestResult<String>;
    async fn screenshot(&self, path: &Path) -> HarvestResult<()>;
    async fn set_cookies(&self, cookies: &[SeedCookie]) -> HarvestResult<()>;
    async fn set_local_storage(&self, entries: &BTreeMap<String, String>) -> HarvestResult<()>;
    /// Start listening for network responses.
    async fn subscribe_responses(&self) -> HarvestResult<ResponseStream>;
    async fn close(&self) -> HarvestResult<()>;
}

/// Response URLs observed on a page, in arrival order.
///
/// Dropping the stream detaches the underlying listener.
pub struct ResponseStream {
    rx: mpsc::UnboundedReceiver<String>,
    task: Option<JoinHandle<()>>,
}

impl ResponseStream {
    /// Wrap a receiver fed by a forwarding task owned by the stream.
    pub fn new(rx: mpsc::UnboundedReceiver<String>, task: Option<JoinHandle<()>>) -> Self {
        Self { rx, task }
    }

    /// Create a stream together with the sender that feeds it.
    pub fn channel() -> (mpsc::UnboundedSender<String>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self::new(rx, None))
    }

    /// Next URL, or `None` once the listener is gone.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Drop everything already queued; returns how many URLs were discarded.
    pub fn drain(&mut self) -> usize {
        let mut dropped = 0;
        while self.rx.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }
}

impl Drop for ResponseStream {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
