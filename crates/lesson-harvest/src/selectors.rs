//! Selector registry — named, swappable locators for every UI element the
//! pipeline touches.
//!
//! The site markup is not ours and changes without notice, so every element
//! is addressed through a [`SelectorChain`] probed first-to-last, and every
//! entry can be overridden from the `[selectors]` table of the config file.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::renderer::PageDriver;

/// How to find elements on the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum Locator {
    /// A CSS selector passed to `querySelectorAll`.
    Css { css: String },
    /// Innermost elements whose normalised text contains (or equals) `text`.
    Text {
        text: String,
        /// CSS selector limiting the candidates, e.g. `button`.
        #[serde(default)]
        scope: Option<String>,
        #[serde(default)]
        exact: bool,
    },
}

impl Locator {
    pub fn css(css: impl Into<String>) -> Self {
        Locator::Css { css: css.into() }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Locator::Text {
            text: text.into(),
            scope: None,
            exact: false,
        }
    }

    pub fn exact_text(text: impl Into<String>) -> Self {
        Locator::Text {
            text: text.into(),
            scope: None,
            exact: true,
        }
    }

    pub fn scoped_text(scope: impl Into<String>, text: impl Into<String>) -> Self {
        Locator::Text {
            text: text.into(),
            scope: Some(scope.into()),
            exact: false,
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Css { css } => write!(f, "css={css}"),
            Locator::Text { text, scope, exact } => {
                let op = if *exact { "==" } else { "~=" };
                match scope {
                    Some(scope) => write!(f, "{scope}[text{op}{text:?}]"),
                    None => write!(f, "text{op}{text:?}"),
                }
            }
        }
    }
}

/// Ordered fallback list of locators for one logical element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SelectorChain(pub Vec<Locator>);

impl SelectorChain {
    pub fn of(locators: impl IntoIterator<Item = Locator>) -> Self {
        Self(locators.into_iter().collect())
    }

    pub fn single(locator: Locator) -> Self {
        Self(vec![locator])
    }

    pub fn locators(&self) -> &[Locator] {
        &self.0
    }

    /// The first locator in the chain.
    pub fn primary(&self) -> Option<&Locator> {
        self.0.first()
    }
}

/// A visible element found by probing a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Found {
    pub locator: Locator,
    pub index: usize,
}

/// All locators the harvester uses, keyed by role.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorRegistry {
    pub sign_in_entry: SelectorChain,
    pub email_login_choice: SelectorChain,
    pub email_input: SelectorChain,
    pub password_input: SelectorChain,
    pub submit: SelectorChain,
    /// Present only while the login form is showing.
    pub login_form_marker: SelectorChain,
    pub close_popup: SelectorChain,
    pub accordion: SelectorChain,
    /// Attribute on accordion headers that reads `"false"` when collapsed.
    pub expansion_attribute: String,
    pub lesson_item: SelectorChain,
    /// Broad locator listed in diagnostic dumps.
    pub generic_control: SelectorChain,
    /// Page-title fragment that marks a login page.
    pub login_title_pattern: String,
    /// Text of the target node; `{level}` is substituted.
    pub target_node_template: String,
}

impl Default for SelectorRegistry {
    fn default() -> Self {
        Self {
            sign_in_entry: SelectorChain::single(Locator::scoped_text("button", "Sign In")),
            email_login_choice: SelectorChain::of([
                Locator::text("Log in with Email"),
                Locator::css("button[aria-label='Log in with Email']"),
            ]),
            email_input: SelectorChain::single(Locator::css("input[id^='input_input_emailInput']")),
            password_input: SelectorChain::single(Locator::css(
                "input[id^='input_input_passwordInput']",
            )),
            submit: SelectorChain::of([
                Locator::css("button[aria-label='Log In']"),
                Locator::exact_text("Log In"),
            ]),
            login_form_marker: SelectorChain::single(Locator::css("button[aria-label='Log In']")),
            close_popup: SelectorChain::of([
                Locator::css("button[aria-label='Close']"),
                Locator::css("button.wixui-lightbox__close-button"),
            ]),
            accordion: SelectorChain::single(Locator::css("button[id^='accordion-section-']")),
            expansion_attribute: "aria-expanded".to_string(),
            lesson_item: SelectorChain::single(Locator::css("button.s__2SBGhr")),
            generic_control: SelectorChain::single(Locator::css("button")),
            login_title_pattern: "Log In".to_string(),
            target_node_template: "Level {level}".to_string(),
        }
    }
}

impl SelectorRegistry {
    /// Locator for the target hierarchy node at `level`.
    pub fn target_node(&self, level: u32) -> Locator {
        Locator::text(
            self.target_node_template
                .replace("{level}", &level.to_string()),
        )
    }
}

/// Return the first currently-visible match of any locator in the chain.
///
/// Probe errors count as "not visible".
pub async fn first_visible(page: &dyn PageDriver, chain: &SelectorChain) -> Option<Found> {
    for locator in chain.locators() {
        let count = page.count(locator).await.unwrap_or(0);
        for index in 0..count {
            if page.is_visible(locator, index).await.unwrap_or(false) {
                return Some(Found {
                    locator: locator.clone(),
                    index,
                });
            }
        }
    }
    None
}

/// Poll the chain until one of its locators has a visible match or `timeout`
/// elapses.
pub async fn wait_for_visible(
    page: &dyn PageDriver,
    chain: &SelectorChain,
    timeout: Duration,
    poll: Duration,
) -> Option<Found> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(found) = first_visible(page, chain).await {
            return Some(found);
        }
        if Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(poll.min(deadline.saturating_duration_since(Instant::now()))).await;
    }
}

/// First locator in the chain that matches at least one element, visible or
/// not, together with its match count.
pub async fn first_present(
    page: &dyn PageDriver,
    chain: &SelectorChain,
) -> Option<(Locator, usize)> {
    for locator in chain.locators() {
        let count = page.count(locator).await.unwrap_or(0);
        if count > 0 {
            return Some((locator.clone(), count));
        }
    }
    None
}

/// Poll the chain until one of its locators matches or `timeout` elapses.
pub async fn wait_for_present(
    page: &dyn PageDriver,
    chain: &SelectorChain,
    timeout: Duration,
    poll: Duration,
) -> Option<(Locator, usize)> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(found) = first_present(page, chain).await {
            return Some(found);
        }
        if Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(poll.min(deadline.saturating_duration_since(Instant::now()))).await;
    }
}
