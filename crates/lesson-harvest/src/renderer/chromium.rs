//! Chromium-based renderer using chromiumoxide.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{CookieParam, EventResponseReceived};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use super::script::{build_dom_script, local_storage_script, network_idle_script, DomAction};
use super::{PageDriver, Renderer, ResponseStream};
use crate::selectors::Locator;
use crate::types::{HarvestError, HarvestResult, SeedCookie};

/// Quiet period that counts as network idle.
const NETWORK_QUIET_MS: u64 = 500;

/// Find the Chromium binary path.
pub fn find_chromium(explicit: Option<&Path>) -> Option<PathBuf> {
    // 1. Configured path
    if let Some(path) = explicit {
        if path.exists() {
            return Some(path.to_path_buf());
        }
    }

    // 2. LESSON_HARVEST_CHROMIUM env
    if let Ok(p) = std::env::var("LESSON_HARVEST_CHROMIUM") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    // 3. ~/.lesson-harvest/chromium/
    if let Some(home) = dirs::home_dir() {
        let candidates = if cfg!(target_os = "macos") {
            vec![
                home.join(".lesson-harvest/chromium/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
                home.join(".lesson-harvest/chromium/chrome"),
            ]
        } else {
            vec![
                home.join(".lesson-harvest/chromium/chrome-linux64/chrome"),
                home.join(".lesson-harvest/chromium/chrome"),
            ]
        };
        for c in candidates {
            if c.exists() {
                return Some(c);
            }
        }
    }

    // 4. System PATH
    for name in ["google-chrome", "chromium", "chromium-browser"] {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    // 5. Common macOS location
    if cfg!(target_os = "macos") {
        let common =
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if common.exists() {
            return Some(common);
        }
    }

    None
}

/// Chromium-based renderer.
pub struct ChromiumRenderer {
    browser: Mutex<Browser>,
    handler: JoinHandle<()>,
}

impl ChromiumRenderer {
    /// Launch Chromium. `headless = false` opens a visible window.
    pub async fn launch(headless: bool, chromium_path: Option<&Path>) -> HarvestResult<Self> {
        let chrome_path = find_chromium(chromium_path).ok_or_else(|| {
            HarvestError::Config(
                "Chromium not found. Set LESSON_HARVEST_CHROMIUM or browser.chromium_path."
                    .to_string(),
            )
        })?;

        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions");
        if headless {
            builder = builder.arg("--headless=new");
        } else {
            builder = builder.with_head();
        }
        let config = builder
            .build()
            .map_err(|e| HarvestError::Browser(format!("failed to build browser config: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| HarvestError::Browser(format!("failed to launch Chromium: {e}")))?;

        // The handler must be polled for the browser connection to make progress.
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!("browser handler event error: {e}");
                }
            }
        });

        Ok(Self {
            browser: Mutex::new(browser),
            handler,
        })
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn new_page(&self) -> HarvestResult<Box<dyn PageDriver>> {
        let page = self
            .browser
            .lock()
            .await
            .new_page("about:blank")
            .await
            .map_err(browser_err("failed to create new page"))?;
        Ok(Box::new(ChromiumPage { page }))
    }

    async fn shutdown(&self) -> HarvestResult<()> {
        let mut browser = self.browser.lock().await;
        if let Err(e) = browser.close().await {
            tracing::warn!("browser close failed: {e}");
        }
        let _ = browser.wait().await;
        self.handler.abort();
        Ok(())
    }
}

/// A single Chromium page.
pub struct ChromiumPage {
    page: Page,
}

#[derive(Deserialize)]
struct Lookup {
    found: bool,
    value: Option<String>,
}

impl ChromiumPage {
    async fn eval<T: DeserializeOwned>(&self, script: String) -> HarvestResult<T> {
        let params = EvaluateParams::builder()
            .expression(script)
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(HarvestError::Browser)?;
        let result = self
            .page
            .evaluate_expression(params)
            .await
            .map_err(browser_err("JS execution failed"))?;
        result
            .into_value()
            .map_err(|e| HarvestError::Browser(format!("failed to convert JS result: {e:?}")))
    }

    async fn dom<T: DeserializeOwned>(&self, locator: &Locator, action: DomAction) -> HarvestResult<T> {
        self.eval(build_dom_script(locator, &action)).await
    }

    async fn dom_ok(&self, locator: &Locator, action: DomAction) -> HarvestResult<()> {
        let index = match &action {
            DomAction::Click(i) | DomAction::Fill(i, _) | DomAction::ScrollIntoView(i) => *i,
            _ => 0,
        };
        if self.dom::<bool>(locator, action).await? {
            Ok(())
        } else {
            Err(HarvestError::Browser(format!(
                "no element #{index} for {locator}"
            )))
        }
    }
}

#[async_trait]
impl PageDriver for ChromiumPage {
    async fn goto(&self, url: &str, timeout: Duration) -> HarvestResult<()> {
        let navigate = async {
            self.page.goto(url).await?;
            if let Err(e) = self.page.wait_for_navigation().await {
                tracing::debug!("waiting for navigation failed: {e}");
            }
            Ok::<_, chromiumoxide::error::CdpError>(())
        };
        match tokio::time::timeout(timeout, navigate).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(HarvestError::Browser(format!("navigation failed: {e}"))),
            Err(_) => Err(HarvestError::Timeout {
                what: format!("navigation to {url}"),
                ms: timeout.as_millis() as u64,
            }),
        }
    }

    async fn wait_for_network_idle(&self, timeout: Duration) -> HarvestResult<()> {
        let ms = timeout.as_millis() as u64;
        let settled: bool = self.eval(network_idle_script(ms, NETWORK_QUIET_MS)).await?;
        if !settled {
            tracing::debug!(timeout_ms = ms, "network did not go idle");
        }
        Ok(())
    }

    async fn title(&self) -> HarvestResult<String> {
        Ok(self
            .page
            .get_title()
            .await
            .map_err(browser_err("failed to read title"))?
            .unwrap_or_default())
    }

    async fn url(&self) -> HarvestResult<String> {
        Ok(self
            .page
            .url()
            .await
            .map_err(browser_err("failed to get URL"))?
            .map(|u| u.to_string())
            .unwrap_or_default())
    }

    async fn count(&self, locator: &Locator) -> HarvestResult<usize> {
        self.dom(locator, DomAction::Count).await
    }

    async fn is_visible(&self, locator: &Locator, index: usize) -> HarvestResult<bool> {
        self.dom(locator, DomAction::IsVisible(index)).await
    }

    async fn click(&self, locator: &Locator, index: usize) -> HarvestResult<()> {
        self.dom_ok(locator, DomAction::Click(index)).await
    }

    async fn fill(&self, locator: &Locator, index: usize, value: &str) -> HarvestResult<()> {
        self.dom_ok(locator, DomAction::Fill(index, value.to_string()))
            .await
    }

    async fn attribute(
        &self,
        locator: &Locator,
        index: usize,
        name: &str,
    ) -> HarvestResult<Option<String>> {
        let lookup: Lookup = self
            .dom(locator, DomAction::Attribute(index, name.to_string()))
            .await?;
        if !lookup.found {
            return Err(HarvestError::Browser(format!("no element #{index} for {locator}")));
        }
        Ok(lookup.value)
    }

    async fn inner_text(&self, locator: &Locator, index: usize) -> HarvestResult<String> {
        let lookup: Lookup = self.dom(locator, DomAction::InnerText(index)).await?;
        if !lookup.found {
            return Err(HarvestError::Browser(format!("no element #{index} for {locator}")));
        }
        Ok(lookup.value.unwrap_or_default())
    }

    async fn scroll_into_view(&self, locator: &Locator, index: usize) -> HarvestResult<()> {
        self.dom_ok(locator, DomAction::ScrollIntoView(index)).await
    }

    async fn content(&self) -> HarvestResult<String> {
        self.page
            .content()
            .await
            .map_err(browser_err("failed to get HTML"))
    }

    async fn screenshot(&self, path: &Path) -> HarvestResult<()> {
        self.page
            .save_screenshot(ScreenshotParams::builder().full_page(true).build(), path)
            .await
            .map_err(browser_err("screenshot failed"))?;
        Ok(())
    }

    async fn set_cookies(&self, cookies: &[SeedCookie]) -> HarvestResult<()> {
        let mut params = Vec::with_capacity(cookies.len());
        for c in cookies {
            let param = CookieParam::builder()
                .name(c.name.clone())
                .value(c.value.clone())
                .domain(c.domain.clone())
                .path(c.path.clone())
                .build()
                .map_err(HarvestError::Browser)?;
            params.push(param);
        }
        self.page
            .set_cookies(params)
            .await
            .map_err(browser_err("failed to set cookies"))?;
        Ok(())
    }

    async fn set_local_storage(&self, entries: &BTreeMap<String, String>) -> HarvestResult<()> {
        let written: usize = self.eval(local_storage_script(entries)).await?;
        tracing::debug!(written, "local storage seeded");
        Ok(())
    }

    async fn subscribe_responses(&self) -> HarvestResult<ResponseStream> {
        let mut events = self
            .page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(browser_err("failed to attach response listener"))?;
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if tx.send(event.response.url.clone()).is_err() {
                    break;
                }
            }
        });
        Ok(ResponseStream::new(rx, Some(task)))
    }

    async fn close(&self) -> HarvestResult<()> {
        self.page
            .clone()
            .close()
            .await
            .map_err(browser_err("failed to close page"))
    }
}

fn browser_err<E: std::fmt::Display>(what: &'static str) -> impl Fn(E) -> HarvestError {
    move |e| HarvestError::Browser(format!("{what}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires Chromium to be installed
    async fn test_chromium_locates_and_clicks() {
        let renderer = ChromiumRenderer::launch(true, None)
            .await
            .expect("failed to launch renderer");
        let page = renderer.new_page().await.expect("failed to open page");

        page.goto(
            "data:text/html,<button id='b' onclick=\"this.setAttribute('aria-expanded','true')\" aria-expanded='false'>Section One</button>",
            Duration::from_secs(10),
        )
        .await
        .expect("navigation failed");

        let loc = Locator::scoped_text("button", "section one");
        assert_eq!(page.count(&loc).await.unwrap(), 1);
        assert!(page.is_visible(&loc, 0).await.unwrap());
        page.click(&loc, 0).await.unwrap();
        assert_eq!(
            page.attribute(&loc, 0, "aria-expanded").await.unwrap().as_deref(),
            Some("true")
        );

        page.close().await.expect("close failed");
        renderer.shutdown().await.expect("shutdown failed");
    }

    #[tokio::test]
    #[ignore] // Requires Chromium to be installed
    async fn test_goto_is_bounded_by_timeout() {
        // Accepts connections and never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _hold = tokio::spawn(async move {
            let mut open = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                open.push(stream);
            }
        });

        let renderer = ChromiumRenderer::launch(true, None)
            .await
            .expect("failed to launch renderer");
        let page = renderer.new_page().await.expect("failed to open page");

        let started = std::time::Instant::now();
        let result = page
            .goto(&format!("http://{addr}/"), Duration::from_millis(500))
            .await;
        assert!(matches!(result, Err(HarvestError::Timeout { .. })));
        assert!(started.elapsed() < Duration::from_secs(3));

        page.close().await.expect("close failed");
        renderer.shutdown().await.expect("shutdown failed");
    }
}
