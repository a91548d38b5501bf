//! Core data types for harvest runs: items, captured traffic, and outcomes.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Authentication status of the browsing session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStatus {
    Anonymous,
    Authenticating,
    Authenticated,
    Failed,
}

/// A cookie installed into the browser before the first navigation.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeedCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "default_cookie_path")]
    pub path: String,
}

fn default_cookie_path() -> String {
    "/".to_string()
}

impl std::fmt::Debug for SeedCookie {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeedCookie")
            .field("name", &self.name)
            .field("value", &"<redacted>")
            .field("domain", &self.domain)
            .field("path", &self.path)
            .finish()
    }
}

/// Pre-captured session state that lets a run skip the interactive login.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionSeed {
    #[serde(default)]
    pub cookies: Vec<SeedCookie>,
    #[serde(default)]
    pub local_storage: std::collections::BTreeMap<String, String>,
}

impl SessionSeed {
    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty() && self.local_storage.is_empty()
    }
}

/// The authenticated browsing context for one run. Never persisted.
#[derive(Debug, Clone)]
pub struct Session {
    pub status: AuthStatus,
    pub seed: Option<SessionSeed>,
}

impl Session {
    pub fn new(seed: Option<SessionSeed>) -> Self {
        Self {
            status: AuthStatus::Anonymous,
            seed: seed.filter(|s| !s.is_empty()),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.status == AuthStatus::Authenticated
    }
}

/// One harvestable lesson, as listed on the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    /// 1-based position in DOM order.
    pub ordinal: usize,
    /// Raw display title, before sanitisation.
    pub title: String,
    pub level: u32,
}

impl ContentItem {
    /// Index into the live item list for this item.
    pub fn dom_index(&self) -> usize {
        self.ordinal.saturating_sub(1)
    }
}

/// Classification of an observed response URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Playlist,
    Segment,
    DirectMedia,
    Other,
}

impl ResourceKind {
    /// Whether responses of this kind are buffered by the interceptor.
    pub fn is_media_signature(self) -> bool {
        matches!(self, ResourceKind::Playlist | ResourceKind::DirectMedia)
    }
}

/// One network response observed inside a capture window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedEvent {
    pub url: String,
    pub kind: ResourceKind,
}

/// The best media URL resolved for an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaReference {
    pub url: String,
    pub kind: ResourceKind,
}

/// Terminal state of a download attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobStatus {
    SkippedExisting,
    Succeeded,
    Failed,
}

/// An attempt to materialise a media reference on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadJob {
    pub filename: String,
    pub path: PathBuf,
    pub status: JobStatus,
    pub error: Option<String>,
}

/// The single recorded outcome for an item in a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum ItemOutcome {
    NoMediaFound,
    InteractionFailed { error: String },
    Download(DownloadJob),
}

impl ItemOutcome {
    /// Short label used in report tables.
    pub fn label(&self) -> &'static str {
        match self {
            ItemOutcome::NoMediaFound => "no-media-found",
            ItemOutcome::InteractionFailed { .. } => "interaction-failed",
            ItemOutcome::Download(job) => match job.status {
                JobStatus::SkippedExisting => "skipped-existing",
                JobStatus::Succeeded => "succeeded",
                JobStatus::Failed => "failed",
            },
        }
    }

    pub fn detail(&self) -> Option<&str> {
        match self {
            ItemOutcome::InteractionFailed { error } => Some(error),
            ItemOutcome::Download(job) => job.error.as_deref(),
            ItemOutcome::NoMediaFound => None,
        }
    }
}

/// Per-item row of the run report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemReport {
    pub item: ContentItem,
    pub media: Option<MediaReference>,
    pub outcome: ItemOutcome,
}

/// How the target hierarchy node was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryRoute {
    Link,
    DeepLink,
    NotEntered,
}

/// Summary of the page-normalisation phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationReport {
    pub route: EntryRoute,
    pub popups_closed: usize,
    pub sections_expanded: usize,
    pub reauthenticated: bool,
}

impl Default for NavigationReport {
    fn default() -> Self {
        Self {
            route: EntryRoute::NotEntered,
            popups_closed: 0,
            sections_expanded: 0,
            reauthenticated: false,
        }
    }
}

/// Everything a run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub level: u32,
    pub auth: AuthStatus,
    pub navigation: NavigationReport,
    pub items: Vec<ItemReport>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    /// Number of items whose outcome carries the given label.
    pub fn count(&self, label: &str) -> usize {
        self.items
            .iter()
            .filter(|r| r.outcome.label() == label)
            .count()
    }
}

/// Errors that can occur while harvesting.
#[derive(thiserror::Error, Debug)]
pub enum HarvestError {
    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Timed out after {ms}ms waiting for {what}")]
    Timeout { what: String, ms: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Credentials not supplied (set LESSON_HARVEST_EMAIL and LESSON_HARVEST_PASSWORD)")]
    MissingCredentials,

    #[error("Fetch tool not found: {0}")]
    FetchToolNotFound(String),

    #[error("Fetch tool exited with {status}: {stderr}")]
    FetchFailed { status: String, stderr: String },
}

/// Convenience result type.
pub type HarvestResult<T> = Result<T, HarvestError>;
