//! Run controller — sequences one harvest run.
//!
//! authenticate → navigate → normalise → enumerate → for each item
//! (capture → resolve → download) → report. Items are processed strictly one
//! at a time; every item gets exactly one recorded outcome and no item
//! failure stops the run.

use std::time::Duration;

use chrono::Utc;
use tracing::Instrument;

use crate::auth::{has_login_cues, Authenticator};
use crate::config::{Credentials, HarvestConfig};
use crate::diagnostics::Diagnostics;
use crate::download::{DownloadOrchestrator, Fetcher};
use crate::enumerate::{enumerate_items, locate_item, ItemListing};
use crate::intercept::{CaptureWindow, NetworkInterceptor};
use crate::navigation::Navigator;
use crate::renderer::{PageDriver, Renderer};
use crate::selectors::Locator;
use crate::resolve::resolve_media;
use crate::types::{
    AuthStatus, ContentItem, HarvestResult, ItemOutcome, ItemReport, RunReport, Session,
    SessionSeed,
};

/// Owns everything one run needs except the browser.
pub struct Harvester<F> {
    config: HarvestConfig,
    credentials: Option<Credentials>,
    seed: Option<SessionSeed>,
    orchestrator: DownloadOrchestrator<F>,
    diagnostics: Diagnostics,
}

impl<F: Fetcher> Harvester<F> {
    pub fn new(
        config: HarvestConfig,
        credentials: Option<Credentials>,
        seed: Option<SessionSeed>,
        fetcher: F,
    ) -> Self {
        let orchestrator = DownloadOrchestrator::new(
            config.output.dir.clone(),
            config.output.extension.clone(),
            fetcher,
        );
        let diagnostics = Diagnostics::new(config.output.diagnostics_dir.clone());
        Self {
            config,
            credentials,
            seed,
            orchestrator,
            diagnostics,
        }
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    /// Open a page, harvest, then tear the browser down.
    ///
    /// Only failing to open the page is an error; everything after that is
    /// recorded in the report.
    pub async fn run(&self, renderer: &dyn Renderer) -> HarvestResult<RunReport> {
        let page = renderer.new_page().await?;
        let report = self.harvest(page.as_ref()).await;

        if let Err(e) = page.close().await {
            tracing::warn!("closing page failed: {e}");
        }
        if let Err(e) = renderer.shutdown().await {
            tracing::warn!("browser shutdown failed: {e}");
        }
        Ok(report)
    }

    /// Harvest on an already-open page.
    pub async fn harvest(&self, page: &dyn PageDriver) -> RunReport {
        let started_at = Utc::now();
        let level = self.config.level;
        let mut session = Session::new(self.seed.clone());

        let auth = Authenticator::new(
            page,
            &self.config.selectors,
            &self.config.timings,
            self.credentials.as_ref(),
            &self.diagnostics,
        );
        self.sign_in(page, &mut session, &auth).await;

        let navigator = Navigator::new(
            page,
            &self.config.site,
            &self.config.selectors,
            &self.config.timings,
            &self.diagnostics,
        );
        let navigation = navigator.prepare(level, &mut session, &auth).await;

        tracing::info!("extracting lessons");
        let listing = enumerate_items(
            page,
            &self.config.selectors,
            &self.config.timings,
            &self.diagnostics,
            level,
        )
        .await;
        let items = self.process_items(page, &listing).await;

        let report = RunReport {
            level,
            auth: session.status,
            navigation,
            items,
            started_at,
            finished_at: Utc::now(),
        };
        tracing::info!(
            items = report.items.len(),
            succeeded = report.count("succeeded"),
            skipped = report.count("skipped-existing"),
            failed = report.count("failed"),
            no_media = report.count("no-media-found"),
            interaction_failed = report.count("interaction-failed"),
            "run complete"
        );
        report
    }

    /// Load the entry page and authenticate, using the seed when present.
    async fn sign_in(&self, page: &dyn PageDriver, session: &mut Session, auth: &Authenticator<'_>) {
        let base_url = &self.config.site.base_url;
        tracing::info!(url = %base_url, "starting login flow");
        self.load(page, base_url).await;

        if let Some(seed) = session.seed.clone() {
            tracing::info!(
                cookies = seed.cookies.len(),
                local_storage = seed.local_storage.len(),
                "applying session seed"
            );
            if let Err(e) = page.set_cookies(&seed.cookies).await {
                tracing::warn!("installing seed cookies failed: {e}");
            }
            if !seed.local_storage.is_empty() {
                if let Err(e) = page.set_local_storage(&seed.local_storage).await {
                    tracing::warn!("installing seed local storage failed: {e}");
                }
            }
            self.load(page, base_url).await;

            if !has_login_cues(page, &self.config.selectors).await {
                tracing::info!("seeded session accepted, skipping interactive login");
                session.status = AuthStatus::Authenticated;
                return;
            }
            tracing::warn!("seeded session still shows login cues, falling back to credentials");
        }

        let outcome = auth.authenticate(session).await;
        tracing::info!(state = ?outcome.final_state(), "login flow finished");
    }

    async fn load(&self, page: &dyn PageDriver, url: &str) {
        let timings = &self.config.timings;
        if let Err(e) = page
            .goto(url, Duration::from_millis(timings.page_load_timeout_ms))
            .await
        {
            tracing::warn!(url, "navigation failed: {e}");
        }
        if let Err(e) = page
            .wait_for_network_idle(Duration::from_millis(timings.network_idle_timeout_ms))
            .await
        {
            tracing::debug!("network idle wait failed: {e}");
        }
    }

    /// Capture, resolve and download every item, one at a time.
    async fn process_items(&self, page: &dyn PageDriver, listing: &ItemListing) -> Vec<ItemReport> {
        let items = &listing.items;
        let Some(locator) = listing.locator.as_ref().filter(|_| !items.is_empty()) else {
            return Vec::new();
        };

        let mut interceptor = match NetworkInterceptor::attach(page).await {
            Ok(interceptor) => Some(interceptor),
            Err(e) => {
                tracing::error!("could not attach response listener: {e}");
                None
            }
        };

        let total = items.len();
        let mut reports = Vec::with_capacity(total);
        for item in items {
            let span = tracing::info_span!("item", ordinal = item.ordinal, title = %item.title);
            let report = async {
                tracing::info!("processing ({}/{total}): {}", item.ordinal, item.title);
                self.process_item(page, interceptor.as_mut(), locator, item).await
            }
            .instrument(span)
            .await;
            reports.push(report);
        }

        if let Some(interceptor) = interceptor {
            interceptor.detach();
        }
        reports
    }

    async fn process_item(
        &self,
        page: &dyn PageDriver,
        interceptor: Option<&mut NetworkInterceptor>,
        locator: &Locator,
        item: &ContentItem,
    ) -> ItemReport {
        let report = |media, outcome| ItemReport {
            item: item.clone(),
            media,
            outcome,
        };

        if let Some(job) = self.orchestrator.existing(item) {
            tracing::info!(file = %job.filename, "skipping (already exists)");
            return report(None, ItemOutcome::Download(job));
        }

        let Some(interceptor) = interceptor else {
            return report(
                None,
                ItemOutcome::InteractionFailed {
                    error: "response listener unavailable".to_string(),
                },
            );
        };
        let Some(index) = locate_item(page, locator, item).await else {
            tracing::warn!("lesson no longer in the list, not clicking");
            return report(
                None,
                ItemOutcome::InteractionFailed {
                    error: "lesson list changed".to_string(),
                },
            );
        };

        let timings = &self.config.timings;
        let mut capture = interceptor.begin_capture();
        if let Err(e) = page.click(locator, index).await {
            tracing::error!("clicking lesson failed: {e}");
            return report(
                None,
                ItemOutcome::InteractionFailed {
                    error: e.to_string(),
                },
            );
        }
        capture
            .collect(CaptureWindow {
                max_wait: Duration::from_millis(timings.capture_max_wait_ms),
                grace: Duration::from_millis(timings.capture_grace_ms),
            })
            .await;
        let events = capture.end();

        match resolve_media(&events) {
            Some(media) => {
                tracing::info!(url = %media.url, kind = ?media.kind, "resolved media");
                let job = self.orchestrator.dispatch(item, &media).await;
                report(Some(media), ItemOutcome::Download(job))
            }
            None => {
                tracing::warn!(captured = events.len(), "no video URL intercepted for this lesson");
                report(None, ItemOutcome::NoMediaFound)
            }
        }
    }
}
