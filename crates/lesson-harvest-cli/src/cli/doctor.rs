//! Environment readiness check.

use std::path::Path;

use anyhow::Result;

use lesson_harvest::config::{resolve_config_path, EMAIL_ENV, PASSWORD_ENV};
use lesson_harvest::renderer::chromium::find_chromium;
use lesson_harvest::HarvestConfig;

/// Check the config, Chromium, the fetch tool, and credentials.
pub async fn run(config_path: Option<&Path>) -> Result<()> {
    println!("LessonHarvest Doctor");
    println!("====================");
    println!();

    let os = std::env::consts::OS;
    let arch = std::env::consts::ARCH;
    println!("OS:   {os}");
    println!("Arch: {arch}");
    println!();

    // Config
    let path = resolve_config_path(config_path);
    let config = match &path {
        Some(p) => match HarvestConfig::load(Some(p.as_path())) {
            Ok(cfg) => {
                println!("[OK] Config loaded: {}", p.display());
                cfg
            }
            Err(e) => {
                println!("[!!] Config {} unreadable: {e}", p.display());
                HarvestConfig::default()
            }
        },
        None => {
            println!("[??] No config file found, using defaults");
            HarvestConfig::default()
        }
    };
    let config_ok = match config.validate() {
        Ok(()) => {
            println!("[OK] Config is complete");
            true
        }
        Err(e) => {
            println!("[!!] {e}");
            false
        }
    };

    // Chromium
    let chromium = find_chromium(config.browser.chromium_path.as_deref());
    match &chromium {
        Some(path) => println!("[OK] Chromium found: {}", path.display()),
        None => println!(
            "[!!] Chromium NOT found. Install Chrome/Chromium or set browser.chromium_path."
        ),
    }

    // Fetch tool, plus ffmpeg which yt-dlp needs to merge HLS streams
    let fetch_tool = which::which(&config.fetch.program);
    match &fetch_tool {
        Ok(path) => println!("[OK] Fetch tool found: {}", path.display()),
        Err(_) => println!("[!!] Fetch tool `{}` NOT found on PATH", config.fetch.program),
    }
    match which::which("ffmpeg") {
        Ok(path) => println!("[OK] ffmpeg found: {}", path.display()),
        Err(_) => println!("[??] ffmpeg not found; playlist downloads may fail"),
    }

    // Credentials (presence only)
    let creds_set = [EMAIL_ENV, PASSWORD_ENV]
        .iter()
        .all(|var| std::env::var(var).is_ok_and(|v| !v.is_empty()));
    if creds_set {
        println!("[OK] Credentials set in {EMAIL_ENV} / {PASSWORD_ENV}");
    } else if config.session_seed.is_some() {
        println!("[??] Credentials not set; the session seed must be valid");
    } else {
        println!("[!!] Credentials not set: export {EMAIL_ENV} and {PASSWORD_ENV}");
    }

    println!();
    let ready = config_ok
        && chromium.is_some()
        && fetch_tool.is_ok()
        && (creds_set || config.session_seed.is_some());
    if ready {
        println!("Status: READY");
    } else {
        println!("Status: NOT READY");
    }

    Ok(())
}
