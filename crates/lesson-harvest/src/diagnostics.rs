//! Operator diagnostics — page snapshots written at known failure points.
//!
//! Snapshots use fixed filenames and are overwritten on each occurrence.
//! Writing a snapshot never fails the caller; problems are logged.

use std::path::{Path, PathBuf};

use crate::renderer::PageDriver;
use crate::selectors::{first_present, SelectorChain};

/// Credential form still visible after submission.
pub const LOGIN_FAILED: &str = "debug_login_failed.png";
/// Credential form never appeared, or filling it failed.
pub const LOGIN_ERROR: &str = "debug_login_error.png";
/// Target hierarchy node could not be activated.
pub const TARGET_NODE: &str = "debug_course_list.png";
/// State of the page after the deep-link fallback.
pub const DEEP_LINK_PAGE: &str = "debug_level_page.png";
/// Markup when no collapsible sections were found.
pub const SECTIONS_DUMP: &str = "debug_dump.html";
/// Markup when no items were found.
pub const ITEMS_DUMP: &str = "debug_items.html";

/// Maximum number of controls listed in a control dump.
const MAX_LISTED_CONTROLS: usize = 20;

/// Writes snapshots into one directory.
#[derive(Debug, Clone)]
pub struct Diagnostics {
    dir: PathBuf,
}

impl Diagnostics {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Save a screenshot under `name`. Returns the path on success.
    pub async fn screenshot(&self, page: &dyn PageDriver, name: &str) -> Option<PathBuf> {
        let path = self.prepare(name)?;
        match page.screenshot(&path).await {
            Ok(()) => {
                tracing::info!(path = %path.display(), "saved diagnostic screenshot");
                Some(path)
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), "diagnostic screenshot failed: {e}");
                None
            }
        }
    }

    /// Save the page markup under `name`. Returns the path on success.
    pub async fn markup(&self, page: &dyn PageDriver, name: &str) -> Option<PathBuf> {
        let path = self.prepare(name)?;
        let html = match page.content().await {
            Ok(html) => html,
            Err(e) => {
                tracing::warn!("could not read page markup: {e}");
                return None;
            }
        };
        match tokio::fs::write(&path, html).await {
            Ok(()) => {
                tracing::info!(path = %path.display(), "saved diagnostic markup");
                Some(path)
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), "writing markup failed: {e}");
                None
            }
        }
    }

    /// Log the first controls matched by `chain` with their text and class.
    ///
    /// Returns the lines that were logged.
    pub async fn list_controls(&self, page: &dyn PageDriver, chain: &SelectorChain) -> Vec<String> {
        let Some((locator, count)) = first_present(page, chain).await else {
            tracing::info!("no interactive controls to list");
            return Vec::new();
        };
        tracing::info!(count, locator = %locator, "dumping interactive controls for triage");

        let mut lines = Vec::new();
        for index in 0..count.min(MAX_LISTED_CONTROLS) {
            let text = page.inner_text(&locator, index).await.unwrap_or_default();
            let class = page
                .attribute(&locator, index, "class")
                .await
                .ok()
                .flatten()
                .unwrap_or_default();
            let line = format!(
                "control {index}: {} | class: {class}",
                text.replace('\n', " ").trim()
            );
            tracing::info!("{line}");
            lines.push(line);
        }
        lines
    }

    fn prepare(&self, name: &str) -> Option<PathBuf> {
        if let Err(e) = ensure_dir(&self.dir) {
            tracing::warn!(dir = %self.dir.display(), "cannot create diagnostics dir: {e}");
            return None;
        }
        Some(self.path(name))
    }
}

fn ensure_dir(dir: &Path) -> std::io::Result<()> {
    if dir.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(dir)
}
