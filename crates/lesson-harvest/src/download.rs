//! Download orchestrator — idempotent, atomic downloads through an external
//! fetch tool.
//!
//! The target filename is a pure function of `(level, ordinal, title)` and
//! doubles as the idempotency key: an existing file is never fetched again.
//! The tool writes to a hidden staging file that is renamed onto the final
//! name only after a zero exit, so no partial file ever carries that name.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;

use crate::config::FetchConfig;
use crate::types::{
    ContentItem, DownloadJob, HarvestError, HarvestResult, JobStatus, MediaReference,
};

/// Maximum number of stderr lines attached to a failed job.
const STDERR_TAIL_LINES: usize = 20;

/// Title used when sanitisation leaves nothing.
const EMPTY_TITLE: &str = "untitled";

fn illegal_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"[\\/*?:"<>|\x00-\x08\x0e-\x1f\x7f]"#).expect("valid regex"))
}

fn whitespace_runs() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("valid regex"))
}

/// Strip characters illegal in filenames and join words with `_`.
pub fn sanitize_title(raw: &str) -> String {
    let stripped = illegal_chars().replace_all(raw, "");
    let joined = whitespace_runs().replace_all(stripped.trim(), "_");
    let cleaned = joined.trim_matches('.');
    if cleaned.is_empty() {
        EMPTY_TITLE.to_string()
    } else {
        cleaned.to_string()
    }
}

/// `Level_<level>_<2-digit ordinal>_<sanitized title>.<ext>`
pub fn target_filename(level: u32, ordinal: usize, title: &str, extension: &str) -> String {
    format!(
        "Level_{level}_{ordinal:02}_{}.{}",
        sanitize_title(title),
        extension.trim_start_matches('.')
    )
}

/// Something that can materialise a URL at a path.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Write the resource at `url` to exactly `dest`.
    async fn fetch(&self, url: &str, dest: &Path) -> HarvestResult<()>;
}

/// Runs an external program (yt-dlp by default) once per job.
#[derive(Debug, Clone)]
pub struct ExternalFetcher {
    program: String,
    args: Vec<String>,
}

impl ExternalFetcher {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn from_config(config: &FetchConfig) -> Self {
        Self::new(config.program.clone(), config.args.clone())
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Argument list with `{url}` and `{output}` substituted.
    pub fn command_args(&self, url: &str, dest: &Path) -> Vec<String> {
        let output = dest.to_string_lossy();
        self.args
            .iter()
            .map(|a| a.replace("{url}", url).replace("{output}", &output))
            .collect()
    }
}

#[async_trait]
impl Fetcher for ExternalFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> HarvestResult<()> {
        let args = self.command_args(url, dest);
        tracing::debug!(program = %self.program, ?args, "spawning fetch tool");

        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    HarvestError::FetchToolNotFound(self.program.clone())
                } else {
                    HarvestError::Io(e)
                }
            })?;

        if output.status.success() {
            return Ok(());
        }
        Err(HarvestError::FetchFailed {
            status: output.status.to_string(),
            stderr: stderr_tail(&output.stderr),
        })
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

/// Turns resolved media references into files under one directory.
pub struct DownloadOrchestrator<F> {
    output_dir: PathBuf,
    extension: String,
    fetcher: F,
}

impl<F: Fetcher> DownloadOrchestrator<F> {
    pub fn new(output_dir: impl Into<PathBuf>, extension: impl Into<String>, fetcher: F) -> Self {
        Self {
            output_dir: output_dir.into(),
            extension: extension.into(),
            fetcher,
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn filename(&self, item: &ContentItem) -> String {
        target_filename(item.level, item.ordinal, &item.title, &self.extension)
    }

    pub fn target_path(&self, item: &ContentItem) -> PathBuf {
        self.output_dir.join(self.filename(item))
    }

    /// `skipped-existing` job if the item's target file is already on disk.
    pub fn existing(&self, item: &ContentItem) -> Option<DownloadJob> {
        let path = self.target_path(item);
        path.exists().then(|| DownloadJob {
            filename: self.filename(item),
            path,
            status: JobStatus::SkippedExisting,
            error: None,
        })
    }

    /// Download `media` for `item`. Failures are recorded, never returned.
    pub async fn dispatch(&self, item: &ContentItem, media: &MediaReference) -> DownloadJob {
        if let Some(job) = self.existing(item) {
            tracing::info!(file = %job.filename, "skipping, already exists");
            return job;
        }

        let filename = self.filename(item);
        let path = self.output_dir.join(&filename);
        let staging = self.staging_path(item);
        tracing::info!(file = %filename, url = %media.url, "downloading");

        let result = self.fetch_atomically(&media.url, &staging, &path).await;
        match result {
            Ok(()) => {
                tracing::info!(path = %path.display(), "saved");
                DownloadJob {
                    filename,
                    path,
                    status: JobStatus::Succeeded,
                    error: None,
                }
            }
            Err(e) => {
                tracing::error!(file = %filename, "download failed: {e}");
                if let Err(cleanup) = tokio::fs::remove_file(&staging).await {
                    if cleanup.kind() != std::io::ErrorKind::NotFound {
                        tracing::warn!(path = %staging.display(), "staging cleanup failed: {cleanup}");
                    }
                }
                DownloadJob {
                    filename,
                    path,
                    status: JobStatus::Failed,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn fetch_atomically(&self, url: &str, staging: &Path, path: &Path) -> HarvestResult<()> {
        tokio::fs::create_dir_all(&self.output_dir).await?;
        self.fetcher.fetch(url, staging).await?;
        if !tokio::fs::try_exists(staging).await.unwrap_or(false) {
            return Err(HarvestError::FetchFailed {
                status: "exit status: 0".to_string(),
                stderr: format!("no file produced at {}", staging.display()),
            });
        }
        tokio::fs::rename(staging, path).await?;
        Ok(())
    }

    /// Hidden sibling of the target that keeps the media extension, so tools
    /// that pick a container from the extension still work.
    fn staging_path(&self, item: &ContentItem) -> PathBuf {
        let tag = uuid::Uuid::new_v4().simple().to_string();
        self.output_dir.join(format!(
            ".Level_{}_{:02}_{}.{}.partial.{}",
            item.level,
            item.ordinal,
            sanitize_title(&item.title),
            &tag[..8],
            self.extension.trim_start_matches('.')
        ))
    }
}
