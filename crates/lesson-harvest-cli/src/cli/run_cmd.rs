//! `lesson-harvest run` — one end-to-end harvest.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use lesson_harvest::config::resolve_config_path;
use lesson_harvest::{
    ChromiumRenderer, Credentials, ExternalFetcher, HarvestConfig, HarvestError, Harvester,
};

use super::output;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Config file (default: $LESSON_HARVEST_CONFIG, then ./harvest.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Course level to harvest
    #[arg(long)]
    pub level: Option<u32>,

    /// Directory that receives the videos
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// JSON file with cookies and local-storage entries to seed the session
    #[arg(long)]
    pub session_seed: Option<PathBuf>,

    /// Show the browser window
    #[arg(long)]
    pub headful: bool,

    /// Print the run report as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: RunArgs) -> Result<()> {
    let config = load_config(&args)?;

    let credentials = Credentials::from_env();
    let seed = config
        .load_session_seed()
        .context("loading session seed")?;
    match (&credentials, &seed) {
        (None, None) => tracing::error!(
            "{}; continuing anonymously",
            HarvestError::MissingCredentials
        ),
        (None, Some(_)) => {
            tracing::warn!("no credentials set, relying on the session seed alone")
        }
        _ => {}
    }

    let fetcher = ExternalFetcher::from_config(&config.fetch);
    if which::which(fetcher.program()).is_err() {
        tracing::warn!(
            program = fetcher.program(),
            "fetch tool not on PATH, downloads will fail"
        );
    }

    tracing::info!(
        level = config.level,
        output = %config.output.dir.display(),
        headless = config.browser.headless,
        "starting harvest"
    );
    let renderer = ChromiumRenderer::launch(
        config.browser.headless,
        config.browser.chromium_path.as_deref(),
    )
    .await
    .context("launching Chromium (run `lesson-harvest doctor`)")?;

    let harvester = Harvester::new(config, credentials, seed, fetcher);
    let report = harvester.run(&renderer).await?;

    if args.json {
        output::print_json(&report);
    } else {
        output::print_report(&report);
    }
    Ok(())
}

/// Load the config file and apply command-line overrides.
pub fn load_config(args: &RunArgs) -> Result<HarvestConfig> {
    let path = resolve_config_path(args.config.as_deref());
    let mut config = HarvestConfig::load(path.as_deref()).with_context(|| match &path {
        Some(p) => format!("loading config {}", p.display()),
        None => "loading default config".to_string(),
    })?;

    if let Some(level) = args.level {
        config.level = level;
    }
    if let Some(dir) = &args.output_dir {
        config.output.dir = dir.clone();
    }
    if let Some(seed) = &args.session_seed {
        config.session_seed = Some(seed.clone());
    }
    if args.headful {
        config.browser.headless = false;
    }

    config.validate()?;
    Ok(config)
}
