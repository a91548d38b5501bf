//! Navigation controller — reaches the target content node and normalises
//! the page (closes overlays, expands every collapsible section).
//!
//! Each step has a bounded wait and degrades gracefully on timeout; nothing
//! here aborts the run.

use std::time::Duration;

use crate::auth::{has_login_cues, is_login_redirect, Authenticator};
use crate::config::{SiteConfig, Timings};
use crate::diagnostics::{self, Diagnostics};
use crate::renderer::PageDriver;
use crate::selectors::{wait_for_present, wait_for_visible, SelectorChain, SelectorRegistry};
use crate::types::{EntryRoute, NavigationReport, Session};

pub struct Navigator<'a> {
    page: &'a dyn PageDriver,
    site: &'a SiteConfig,
    selectors: &'a SelectorRegistry,
    timings: &'a Timings,
    diagnostics: &'a Diagnostics,
}

impl<'a> Navigator<'a> {
    pub fn new(
        page: &'a dyn PageDriver,
        site: &'a SiteConfig,
        selectors: &'a SelectorRegistry,
        timings: &'a Timings,
        diagnostics: &'a Diagnostics,
    ) -> Self {
        Self {
            page,
            site,
            selectors,
            timings,
            diagnostics,
        }
    }

    /// Run every navigation step in order and summarise what happened.
    pub async fn prepare(
        &self,
        level: u32,
        session: &mut Session,
        auth: &Authenticator<'_>,
    ) -> NavigationReport {
        let mut report = NavigationReport::default();

        self.open_root().await;
        if has_login_cues(self.page, self.selectors).await {
            tracing::warn!("still seeing login cues on the catalog, retrying login");
            auth.authenticate(session).await;
            report.reauthenticated = true;
            self.open_root().await;
        }

        let route = self.enter_target(level, session, auth, &mut report).await;
        report.route = route;
        report.popups_closed = self.dismiss_overlays().await;
        report.sections_expanded = self.expand_sections().await;
        report
    }

    /// Load the hierarchy root and let it settle.
    pub async fn open_root(&self) {
        tracing::info!(url = %self.site.catalog_url, "opening catalog");
        if let Err(e) = self
            .page
            .goto(&self.site.catalog_url, ms(self.timings.page_load_timeout_ms))
            .await
        {
            tracing::warn!("catalog navigation failed: {e}");
        }
        self.wait_idle().await;
        self.settle(self.timings.navigation_settle_ms).await;
    }

    /// Activate the target node by text, falling back to the deep link.
    pub async fn enter_target(
        &self,
        level: u32,
        session: &mut Session,
        auth: &Authenticator<'_>,
        report: &mut NavigationReport,
    ) -> EntryRoute {
        let target = self.selectors.target_node(level);
        tracing::info!(locator = %target, "entering target node");

        let found = wait_for_visible(
            self.page,
            &SelectorChain::single(target.clone()),
            ms(self.timings.target_node_wait_ms),
            self.timings.poll(),
        )
        .await;

        if let Some(found) = found {
            let clicked = async {
                if let Err(e) = self.page.scroll_into_view(&found.locator, found.index).await {
                    tracing::debug!("scroll into view failed: {e}");
                }
                self.page.click(&found.locator, found.index).await
            }
            .await;
            match clicked {
                Ok(()) => {
                    self.wait_idle().await;
                    return EntryRoute::Link;
                }
                Err(e) => tracing::warn!("target node click failed: {e}"),
            }
        } else {
            tracing::warn!(
                timeout_ms = self.timings.target_node_wait_ms,
                "target node not found"
            );
        }

        if let Ok(title) = self.page.title().await {
            tracing::info!(title = %title, "current page");
        }
        self.diagnostics
            .screenshot(self.page, diagnostics::TARGET_NODE)
            .await;

        let Some(link) = self.site.deep_link.as_deref() else {
            tracing::warn!("no deep link configured, continuing on the current page");
            return EntryRoute::NotEntered;
        };

        tracing::info!(url = link, "attempting direct navigation");
        if let Err(e) = self
            .page
            .goto(link, ms(self.timings.deep_link_timeout_ms))
            .await
        {
            tracing::warn!("deep link navigation failed: {e}");
        }
        self.settle(self.timings.deep_link_settle_ms).await;

        if is_login_redirect(self.page, self.selectors).await {
            tracing::warn!("deep link redirected to login, authenticating");
            auth.authenticate(session).await;
            report.reauthenticated = true;
            self.settle(self.timings.deep_link_settle_ms).await;
        }

        self.diagnostics
            .screenshot(self.page, diagnostics::DEEP_LINK_PAGE)
            .await;
        EntryRoute::DeepLink
    }

    /// Click every close affordance that is visible when the check starts,
    /// once each. Returns how many were clicked.
    pub async fn dismiss_overlays(&self) -> usize {
        tracing::info!("checking for popups");
        self.settle(self.timings.popup_settle_ms).await;

        let mut closed = 0;
        for locator in self.selectors.close_popup.locators() {
            let mut visible = Vec::new();
            for index in 0..self.page.count(locator).await.unwrap_or(0) {
                if self.page.is_visible(locator, index).await.unwrap_or(false) {
                    visible.push(index);
                }
            }
            // Last first; a removed button must not shift the rest.
            for index in visible.into_iter().rev() {
                tracing::info!(locator = %locator, index, "closing popup");
                match self.page.click(locator, index).await {
                    Ok(()) => {
                        closed += 1;
                        self.settle(self.timings.popup_close_settle_ms).await;
                    }
                    Err(e) => tracing::debug!("popup close failed: {e}"),
                }
            }
        }
        closed
    }

    /// Expand every collapsed section. Already-expanded ones are untouched.
    /// Returns how many were expanded.
    pub async fn expand_sections(&self) -> usize {
        tracing::info!("expanding sections");
        let found = wait_for_present(
            self.page,
            &self.selectors.accordion,
            ms(self.timings.accordion_wait_ms),
            self.timings.poll(),
        )
        .await;
        let Some((locator, count)) = found else {
            tracing::warn!("no collapsible sections found");
            self.diagnostics
                .list_controls(self.page, &self.selectors.generic_control)
                .await;
            self.diagnostics
                .markup(self.page, diagnostics::SECTIONS_DUMP)
                .await;
            return 0;
        };
        tracing::info!(count, locator = %locator, "found sections");

        let attr = self.selectors.expansion_attribute.as_str();
        let mut expanded = 0;
        for index in 0..count {
            match self.page.attribute(&locator, index, attr).await {
                Ok(Some(state)) if state == "false" => {
                    tracing::info!(section = index + 1, "expanding section");
                    match self.page.click(&locator, index).await {
                        Ok(()) => {
                            expanded += 1;
                            self.settle(self.timings.accordion_settle_ms).await;
                        }
                        Err(e) => tracing::warn!(section = index + 1, "expand failed: {e}"),
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(section = index + 1, "reading section state failed: {e}"),
            }
        }
        expanded
    }

    async fn wait_idle(&self) {
        if let Err(e) = self
            .page
            .wait_for_network_idle(ms(self.timings.network_idle_timeout_ms))
            .await
        {
            tracing::debug!("network idle wait failed: {e}");
        }
    }

    async fn settle(&self, delay_ms: u64) {
        tokio::time::sleep(ms(delay_ms)).await;
    }
}

fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}
