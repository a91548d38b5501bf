//! Configuration loading and resolution.
//!
//! Settings come from an optional TOML file; credentials come only from the
//! environment and session seeds only from a separate JSON file, so no secret
//! has a default value anywhere in the source.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::selectors::SelectorRegistry;
use crate::types::{HarvestError, HarvestResult, SessionSeed};

/// Env var naming the config file.
pub const CONFIG_ENV: &str = "LESSON_HARVEST_CONFIG";
/// Env var holding the account identifier.
pub const EMAIL_ENV: &str = "LESSON_HARVEST_EMAIL";
/// Env var holding the account secret.
pub const PASSWORD_ENV: &str = "LESSON_HARVEST_PASSWORD";

const DEFAULT_CONFIG_FILE: &str = "harvest.toml";

/// Resolve the config file path: explicit flag, then env, then `./harvest.toml`.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    if let Ok(env_path) = std::env::var(CONFIG_ENV) {
        return Some(PathBuf::from(env_path));
    }

    let cwd = PathBuf::from(DEFAULT_CONFIG_FILE);
    cwd.exists().then_some(cwd)
}

/// Account credentials for the interactive login.
#[derive(Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    /// Read credentials from the environment; `None` if either is unset or empty.
    pub fn from_env() -> Option<Self> {
        let email = std::env::var(EMAIL_ENV).ok()?;
        let password = std::env::var(PASSWORD_ENV).ok()?;
        Self::new(email, password)
    }

    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Option<Self> {
        let email = email.into();
        let password = password.into();
        if email.trim().is_empty() || password.is_empty() {
            return None;
        }
        Some(Self { email, password })
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    /// Page that hosts the sign-in entry point.
    pub base_url: String,
    /// Root of the content hierarchy.
    pub catalog_url: String,
    /// Direct link to the target node, tried when the link cannot be clicked.
    pub deep_link: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub extension: String,
    pub diagnostics_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("downloads"),
            extension: "mp4".to_string(),
            diagnostics_dir: PathBuf::from("."),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub headless: bool,
    pub chromium_path: Option<PathBuf>,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            chromium_path: None,
        }
    }
}

/// External fetch tool invocation.
///
/// `{url}` and `{output}` in `args` are replaced per job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            program: "yt-dlp".to_string(),
            args: ["{url}", "-o", "{output}", "--no-part"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// Every bounded wait and settle delay, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    pub entry_settle_ms: u64,
    pub email_choice_wait_ms: u64,
    pub credential_field_wait_ms: u64,
    pub post_login_settle_ms: u64,
    pub navigation_settle_ms: u64,
    pub target_node_wait_ms: u64,
    pub deep_link_timeout_ms: u64,
    pub deep_link_settle_ms: u64,
    pub popup_settle_ms: u64,
    pub popup_close_settle_ms: u64,
    pub accordion_wait_ms: u64,
    pub accordion_settle_ms: u64,
    pub item_wait_ms: u64,
    pub page_load_timeout_ms: u64,
    pub network_idle_timeout_ms: u64,
    /// Longest wait for the first media response after an item click.
    pub capture_max_wait_ms: u64,
    /// Extra collection time after the first media response.
    pub capture_grace_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            entry_settle_ms: 2_000,
            email_choice_wait_ms: 10_000,
            credential_field_wait_ms: 15_000,
            post_login_settle_ms: 5_000,
            navigation_settle_ms: 3_000,
            target_node_wait_ms: 10_000,
            deep_link_timeout_ms: 60_000,
            deep_link_settle_ms: 5_000,
            popup_settle_ms: 3_000,
            popup_close_settle_ms: 1_000,
            accordion_wait_ms: 10_000,
            accordion_settle_ms: 1_000,
            item_wait_ms: 10_000,
            page_load_timeout_ms: 60_000,
            network_idle_timeout_ms: 15_000,
            capture_max_wait_ms: 15_000,
            capture_grace_ms: 1_500,
            poll_interval_ms: 250,
        }
    }
}

impl Timings {
    pub fn poll(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Top-level harvester configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    pub level: u32,
    /// JSON file with cookies and local-storage entries.
    pub session_seed: Option<PathBuf>,
    pub site: SiteConfig,
    pub output: OutputConfig,
    pub browser: BrowserSettings,
    pub fetch: FetchConfig,
    pub timings: Timings,
    pub selectors: SelectorRegistry,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            level: 1,
            session_seed: None,
            site: SiteConfig::default(),
            output: OutputConfig::default(),
            browser: BrowserSettings::default(),
            fetch: FetchConfig::default(),
            timings: Timings::default(),
            selectors: SelectorRegistry::default(),
        }
    }
}

impl HarvestConfig {
    /// Load from `path`, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> HarvestResult<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path).map_err(|e| {
            HarvestError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> HarvestResult<Self> {
        toml::from_str(text).map_err(|e| HarvestError::Config(e.to_string()))
    }

    /// Check that everything needed to start a run is present.
    pub fn validate(&self) -> HarvestResult<()> {
        for (key, value) in [
            ("site.base_url", &self.site.base_url),
            ("site.catalog_url", &self.site.catalog_url),
        ] {
            if value.trim().is_empty() {
                return Err(HarvestError::Config(format!("{key} is required")));
            }
            url::Url::parse(value)
                .map_err(|e| HarvestError::Config(format!("{key} is not a valid URL: {e}")))?;
        }
        if let Some(link) = &self.site.deep_link {
            url::Url::parse(link)
                .map_err(|e| HarvestError::Config(format!("site.deep_link: {e}")))?;
        }
        if self.fetch.program.trim().is_empty() {
            return Err(HarvestError::Config("fetch.program is required".to_string()));
        }
        if !self.fetch.args.iter().any(|a| a.contains("{url}"))
            || !self.fetch.args.iter().any(|a| a.contains("{output}"))
        {
            return Err(HarvestError::Config(
                "fetch.args must contain {url} and {output}".to_string(),
            ));
        }
        Ok(())
    }

    /// Read the session seed file, if one is configured.
    pub fn load_session_seed(&self) -> HarvestResult<Option<SessionSeed>> {
        let Some(path) = &self.session_seed else {
            return Ok(None);
        };
        let text = std::fs::read_to_string(path).map_err(|e| {
            HarvestError::Config(format!("cannot read session seed {}: {e}", path.display()))
        })?;
        Ok(Some(serde_json::from_str(&text)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn minimal() -> HarvestConfig {
        HarvestConfig::from_toml(
            r#"
            [site]
            base_url = "https://example.com/"
            catalog_url = "https://example.com/courses"
            "#,
        )
        .unwrap()
    }

    #[test]
    fn test_defaults_fill_missing_tables() {
        let cfg = minimal();
        assert_eq!(cfg.level, 1);
        assert_eq!(cfg.output.extension, "mp4");
        assert_eq!(cfg.fetch.program, "yt-dlp");
        assert_eq!(cfg.timings.capture_grace_ms, 1_500);
        assert!(cfg.browser.headless);
        assert!(cfg.site.deep_link.is_none());
        cfg.validate().unwrap();
    }

    #[test]
    fn test_missing_catalog_url_rejected() {
        let cfg = HarvestConfig::from_toml("[site]\nbase_url = \"https://example.com\"").unwrap();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("site.catalog_url"));
    }

    #[test]
    fn test_fetch_args_need_placeholders() {
        let mut cfg = minimal();
        cfg.fetch.args = vec!["{url}".into()];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_timings_override() {
        let cfg = HarvestConfig::from_toml(
            "level = 2\n[timings]\ncapture_max_wait_ms = 30000\n",
        )
        .unwrap();
        assert_eq!(cfg.level, 2);
        assert_eq!(cfg.timings.capture_max_wait_ms, 30_000);
        assert_eq!(cfg.timings.accordion_settle_ms, 1_000);
    }

    #[test]
    fn test_unknown_key_type_is_config_error() {
        let err = HarvestConfig::from_toml("level = \"one\"").unwrap_err();
        assert!(matches!(err, HarvestError::Config(_)));
    }

    #[test]
    fn test_credentials_reject_blank() {
        assert!(Credentials::new("", "pw").is_none());
        assert!(Credentials::new("a@b.c", "").is_none());
        let creds = Credentials::new("a@b.c", "hunter2").unwrap();
        assert!(!format!("{creds:?}").contains("hunter2"));
    }

    #[test]
    fn test_session_seed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"cookies":[{{"name":"bSession","value":"v","domain":".example.com"}}],
               "local_storage":{{"member":"{{}}"}}}}"#
        )
        .unwrap();

        let mut cfg = minimal();
        cfg.session_seed = Some(file.path().to_path_buf());
        let seed = cfg.load_session_seed().unwrap().unwrap();
        assert_eq!(seed.cookies.len(), 1);
        assert_eq!(seed.cookies[0].path, "/");
        assert_eq!(seed.local_storage.get("member").map(String::as_str), Some("{}"));
    }

    #[test]
    fn test_explicit_config_path_wins() {
        let p = Path::new("/tmp/custom.toml");
        assert_eq!(resolve_config_path(Some(p)), Some(p.to_path_buf()));
    }
}
