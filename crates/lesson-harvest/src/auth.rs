//! Authentication controller — drives the login flow to an authenticated
//! session.
//!
//! States: `Anonymous → AwaitingEntryPoint → AwaitingCredentialForm →
//! Submitting → Authenticated`, with `Failed` reachable from any step.
//! Failure is reported, never raised: the run continues anonymously and
//! downstream steps degrade on their own.

use std::time::Duration;

use serde::Serialize;

use crate::config::{Credentials, Timings};
use crate::diagnostics::{self, Diagnostics};
use crate::renderer::PageDriver;
use crate::selectors::{first_visible, wait_for_visible, SelectorRegistry};
use crate::types::{AuthStatus, Session};

/// Why a login attempt ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthFailure {
    /// No credentials were supplied; nothing was submitted.
    MissingCredentials,
    /// Email or password field never became visible.
    CredentialFormTimeout,
    /// Filling or submitting the form raised an error.
    Interaction(String),
    /// The form was still showing after submission.
    StillOnLoginForm,
}

/// A state of the login machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum AuthState {
    Anonymous,
    AwaitingEntryPoint,
    AwaitingCredentialForm,
    Submitting,
    Authenticated,
    Failed(AuthFailure),
}

impl AuthState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AuthState::Authenticated | AuthState::Failed(_))
    }
}

/// Result of one pass through the machine.
#[derive(Debug, Clone)]
pub struct AuthOutcome {
    /// Every state visited, in order, ending in a terminal state.
    pub trace: Vec<AuthState>,
}

impl AuthOutcome {
    pub fn final_state(&self) -> &AuthState {
        // The trace always holds at least the starting state.
        self.trace.last().unwrap_or(&AuthState::Anonymous)
    }

    pub fn succeeded(&self) -> bool {
        *self.final_state() == AuthState::Authenticated
    }

    /// Whether the credential form was ever submitted.
    pub fn submitted(&self) -> bool {
        self.trace.contains(&AuthState::Submitting)
    }
}

/// Drives the login flow on a page.
pub struct Authenticator<'a> {
    page: &'a dyn PageDriver,
    selectors: &'a SelectorRegistry,
    timings: &'a Timings,
    credentials: Option<&'a Credentials>,
    diagnostics: &'a Diagnostics,
}

impl<'a> Authenticator<'a> {
    pub fn new(
        page: &'a dyn PageDriver,
        selectors: &'a SelectorRegistry,
        timings: &'a Timings,
        credentials: Option<&'a Credentials>,
        diagnostics: &'a Diagnostics,
    ) -> Self {
        Self {
            page,
            selectors,
            timings,
            credentials,
            diagnostics,
        }
    }

    /// Run the machine once against the current page, updating `session`.
    ///
    /// Safe to call again later; each pass restarts from the entry point.
    pub async fn authenticate(&self, session: &mut Session) -> AuthOutcome {
        let mut trace = vec![AuthState::Anonymous];
        session.status = AuthStatus::Authenticating;

        let Some(credentials) = self.credentials else {
            tracing::error!("no credentials supplied, skipping interactive login");
            trace.push(AuthState::Failed(AuthFailure::MissingCredentials));
            session.status = AuthStatus::Failed;
            return AuthOutcome { trace };
        };

        let mut state = AuthState::AwaitingEntryPoint;
        loop {
            trace.push(state.clone());
            if state.is_terminal() {
                break;
            }
            state = self.step(&state, credentials).await;
        }

        session.status = match trace.last() {
            Some(AuthState::Authenticated) => AuthStatus::Authenticated,
            _ => AuthStatus::Failed,
        };
        AuthOutcome { trace }
    }

    async fn step(&self, state: &AuthState, credentials: &Credentials) -> AuthState {
        match state {
            AuthState::Anonymous => AuthState::AwaitingEntryPoint,
            AuthState::AwaitingEntryPoint => {
                self.open_entry_point().await;
                self.choose_email_login().await;
                AuthState::AwaitingCredentialForm
            }
            AuthState::AwaitingCredentialForm => self.fill_and_submit(credentials).await,
            AuthState::Submitting => self.verify().await,
            AuthState::Authenticated | AuthState::Failed(_) => state.clone(),
        }
    }

    /// Activate the "sign in" control if it is showing.
    async fn open_entry_point(&self) {
        match first_visible(self.page, &self.selectors.sign_in_entry).await {
            Some(found) => {
                tracing::info!(locator = %found.locator, "opening sign-in entry point");
                if let Err(e) = self.page.click(&found.locator, found.index).await {
                    tracing::warn!("sign-in click failed: {e}");
                }
                tokio::time::sleep(ms(self.timings.entry_settle_ms)).await;
            }
            None => tracing::debug!("no sign-in entry point visible"),
        }
    }

    /// Pick the email login option; proceed regardless if it never shows.
    async fn choose_email_login(&self) {
        let found = wait_for_visible(
            self.page,
            &self.selectors.email_login_choice,
            ms(self.timings.email_choice_wait_ms),
            self.timings.poll(),
        )
        .await;
        match found {
            Some(found) => {
                tracing::info!(locator = %found.locator, "choosing email login");
                if let Err(e) = self.page.click(&found.locator, found.index).await {
                    tracing::warn!("email login click failed: {e}");
                }
            }
            None => tracing::warn!(
                "email login option not found, assuming the credential form is already up"
            ),
        }
    }

    async fn fill_and_submit(&self, credentials: &Credentials) -> AuthState {
        let wait = ms(self.timings.credential_field_wait_ms);
        let poll = self.timings.poll();

        let Some(email) = wait_for_visible(self.page, &self.selectors.email_input, wait, poll).await
        else {
            return self.form_timeout("email").await;
        };
        let Some(password) =
            wait_for_visible(self.page, &self.selectors.password_input, wait, poll).await
        else {
            return self.form_timeout("password").await;
        };

        tracing::info!("filling credentials");
        let filled = async {
            self.page
                .fill(&email.locator, email.index, &credentials.email)
                .await?;
            self.page
                .fill(&password.locator, password.index, &credentials.password)
                .await
        }
        .await;
        if let Err(e) = filled {
            tracing::error!("filling credentials failed: {e}");
            self.diagnostics
                .screenshot(self.page, diagnostics::LOGIN_ERROR)
                .await;
            return AuthState::Failed(AuthFailure::Interaction(e.to_string()));
        }

        let Some(submit) = first_visible(self.page, &self.selectors.submit).await else {
            tracing::error!("no visible submit control");
            self.diagnostics
                .screenshot(self.page, diagnostics::LOGIN_ERROR)
                .await;
            return AuthState::Failed(AuthFailure::Interaction(
                "submit control not visible".to_string(),
            ));
        };
        tracing::info!(locator = %submit.locator, "submitting credentials");
        if let Err(e) = self.page.click(&submit.locator, submit.index).await {
            tracing::error!("submit click failed: {e}");
            self.diagnostics
                .screenshot(self.page, diagnostics::LOGIN_ERROR)
                .await;
            return AuthState::Failed(AuthFailure::Interaction(e.to_string()));
        }
        AuthState::Submitting
    }

    async fn form_timeout(&self, field: &str) -> AuthState {
        tracing::error!(
            field,
            timeout_ms = self.timings.credential_field_wait_ms,
            "credential field never became visible"
        );
        self.diagnostics
            .screenshot(self.page, diagnostics::LOGIN_ERROR)
            .await;
        AuthState::Failed(AuthFailure::CredentialFormTimeout)
    }

    /// Wait for the page to settle, then check whether the form is gone.
    async fn verify(&self) -> AuthState {
        tracing::info!("waiting for login to complete");
        if let Err(e) = self
            .page
            .wait_for_network_idle(ms(self.timings.network_idle_timeout_ms))
            .await
        {
            tracing::debug!("network idle wait failed: {e}");
        }
        tokio::time::sleep(ms(self.timings.post_login_settle_ms)).await;

        if first_visible(self.page, &self.selectors.email_input)
            .await
            .is_some()
        {
            tracing::warn!("login form still visible after submit, login likely failed");
            self.diagnostics
                .screenshot(self.page, diagnostics::LOGIN_FAILED)
                .await;
            AuthState::Failed(AuthFailure::StillOnLoginForm)
        } else {
            tracing::info!("login successful (form closed)");
            AuthState::Authenticated
        }
    }
}

/// Whether the current page still shows signs of an unauthenticated session.
pub async fn has_login_cues(page: &dyn PageDriver, selectors: &SelectorRegistry) -> bool {
    if first_visible(page, &selectors.sign_in_entry).await.is_some() {
        return true;
    }
    title_looks_like_login(page, selectors).await
}

/// Whether the page is a login redirect: login title or login form present.
pub async fn is_login_redirect(page: &dyn PageDriver, selectors: &SelectorRegistry) -> bool {
    if title_looks_like_login(page, selectors).await {
        return true;
    }
    for locator in selectors.login_form_marker.locators() {
        if page.count(locator).await.unwrap_or(0) > 0 {
            return true;
        }
    }
    false
}

async fn title_looks_like_login(page: &dyn PageDriver, selectors: &SelectorRegistry) -> bool {
    let pattern = selectors.login_title_pattern.trim();
    if pattern.is_empty() {
        return false;
    }
    page.title()
        .await
        .map(|t| t.contains(pattern))
        .unwrap_or(false)
}

fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}
