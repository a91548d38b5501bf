//! In-memory page and fetcher used by the integration tests.
//!
//! Elements are keyed by the `Display` form of the locator that finds them,
//! so the fake never has to interpret CSS or text matching.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

use lesson_harvest::config::{HarvestConfig, SiteConfig, Timings};
use lesson_harvest::renderer::{PageDriver, Renderer, ResponseStream};
use lesson_harvest::selectors::{Locator, SelectorChain, SelectorRegistry};
use lesson_harvest::{Fetcher, HarvestError, HarvestResult, SeedCookie};

// ─────────────────────── page model ───────────────────────

/// What clicking an element does to the page.
#[derive(Debug, Clone, Default)]
pub enum Effect {
    #[default]
    None,
    /// The element disappears (sign-in buttons, popup close buttons).
    HideSelf,
    /// Remove every element under these keys (a successful login).
    RemoveKeys(Vec<String>),
    /// Flip the `aria-expanded` attribute to `"true"`.
    Expand,
    /// Emit these URLs as network responses.
    Emit(Vec<String>),
    /// Emit, then replace the list under `key` (a client-side re-render).
    Rerender {
        emit: Vec<String>,
        key: String,
        elements: Vec<FakeElement>,
    },
    /// The click raises a browser error.
    Fail,
}

#[derive(Debug, Clone, Default)]
pub struct FakeElement {
    pub text: String,
    pub visible: bool,
    pub attrs: HashMap<String, String>,
    pub on_click: Effect,
}

impl FakeElement {
    pub fn visible(text: &str) -> Self {
        Self {
            text: text.to_string(),
            visible: true,
            ..Default::default()
        }
    }

    pub fn hidden(text: &str) -> Self {
        Self {
            text: text.to_string(),
            ..Default::default()
        }
    }

    pub fn on_click(mut self, effect: Effect) -> Self {
        self.on_click = effect;
        self
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }
}

/// Something the harvester did to the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Goto(String),
    Click(String, usize),
    Fill(String, usize, String),
    Screenshot(PathBuf),
    SetCookies(usize),
    SetLocalStorage(usize),
    Close,
}

#[derive(Default)]
pub struct PageState {
    pub elements: HashMap<String, Vec<FakeElement>>,
    pub title: String,
    pub url: String,
    pub actions: Vec<Action>,
    pub responses: Option<UnboundedSender<String>>,
    pub cookies: Vec<SeedCookie>,
    /// Keys hidden on the next navigation once cookies are installed.
    pub seed_hides: Vec<String>,
    /// Fail `subscribe_responses`.
    pub refuse_listener: bool,
    /// Elements installed the first time a URL is loaded.
    pub on_goto: HashMap<String, Vec<(String, Vec<FakeElement>)>>,
}

impl PageState {
    fn emit(&self, urls: Vec<String>) {
        if let Some(tx) = &self.responses {
            for url in urls {
                let _ = tx.send(url);
            }
        }
    }
}

/// Cloneable handle to one shared in-memory page.
#[derive(Clone, Default)]
pub struct FakePage {
    pub state: Arc<Mutex<PageState>>,
}

pub fn key(locator: &Locator) -> String {
    locator.to_string()
}

pub fn primary(chain: &SelectorChain) -> &Locator {
    chain.primary().expect("chain has a locator")
}

impl FakePage {
    pub fn new() -> Self {
        let page = Self::default();
        page.state.lock().unwrap().title = "Catalog".to_string();
        page
    }

    pub fn put(&self, locator: &Locator, elements: Vec<FakeElement>) -> &Self {
        self.state
            .lock()
            .unwrap()
            .elements
            .insert(key(locator), elements);
        self
    }

    /// Install `elements` under `locator` once `url` is loaded.
    pub fn on_goto(&self, url: &str, locator: &Locator, elements: Vec<FakeElement>) -> &Self {
        self.state
            .lock()
            .unwrap()
            .on_goto
            .entry(url.to_string())
            .or_default()
            .push((key(locator), elements));
        self
    }

    pub fn actions(&self) -> Vec<Action> {
        self.state.lock().unwrap().actions.clone()
    }

    pub fn clicks_on(&self, locator: &Locator) -> Vec<usize> {
        let k = key(locator);
        self.actions()
            .into_iter()
            .filter_map(|a| match a {
                Action::Click(key, index) if key == k => Some(index),
                _ => None,
            })
            .collect()
    }

    pub fn fills(&self) -> Vec<String> {
        self.actions()
            .into_iter()
            .filter_map(|a| match a {
                Action::Fill(_, _, value) => Some(value),
                _ => None,
            })
            .collect()
    }

    pub fn attribute_of(&self, locator: &Locator, index: usize, name: &str) -> Option<String> {
        self.state.lock().unwrap().elements.get(&key(locator))?[index]
            .attrs
            .get(name)
            .cloned()
    }

    fn record(&self, action: Action) {
        self.state.lock().unwrap().actions.push(action);
    }

    fn with_element<T>(
        &self,
        locator: &Locator,
        index: usize,
        f: impl FnOnce(&FakeElement) -> T,
    ) -> HarvestResult<T> {
        let state = self.state.lock().unwrap();
        state
            .elements
            .get(&key(locator))
            .and_then(|els| els.get(index))
            .map(f)
            .ok_or_else(|| HarvestError::Browser(format!("no element {locator} at {index}")))
    }
}

#[async_trait]
impl PageDriver for FakePage {
    async fn goto(&self, url: &str, _timeout: Duration) -> HarvestResult<()> {
        let mut state = self.state.lock().unwrap();
        state.actions.push(Action::Goto(url.to_string()));
        state.url = url.to_string();
        if let Some(installs) = state.on_goto.remove(url) {
            for (k, elements) in installs {
                state.elements.insert(k, elements);
            }
        }
        if !state.cookies.is_empty() {
            let hides = std::mem::take(&mut state.seed_hides);
            for k in hides {
                if let Some(els) = state.elements.get_mut(&k) {
                    els.iter_mut().for_each(|e| e.visible = false);
                }
            }
        }
        Ok(())
    }

    async fn wait_for_network_idle(&self, _timeout: Duration) -> HarvestResult<()> {
        Ok(())
    }

    async fn title(&self) -> HarvestResult<String> {
        Ok(self.state.lock().unwrap().title.clone())
    }

    async fn url(&self) -> HarvestResult<String> {
        Ok(self.state.lock().unwrap().url.clone())
    }

    async fn count(&self, locator: &Locator) -> HarvestResult<usize> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .elements
            .get(&key(locator))
            .map_or(0, Vec::len))
    }

    async fn is_visible(&self, locator: &Locator, index: usize) -> HarvestResult<bool> {
        Ok(self.with_element(locator, index, |e| e.visible).unwrap_or(false))
    }

    async fn click(&self, locator: &Locator, index: usize) -> HarvestResult<()> {
        let k = key(locator);
        let mut state = self.state.lock().unwrap();
        state.actions.push(Action::Click(k.clone(), index));

        let effect = state
            .elements
            .get(&k)
            .and_then(|els| els.get(index))
            .map(|e| e.on_click.clone())
            .ok_or_else(|| HarvestError::Browser(format!("no element {k} at {index}")))?;

        match effect {
            Effect::None => {}
            Effect::HideSelf => {
                if let Some(el) = state.elements.get_mut(&k).and_then(|els| els.get_mut(index)) {
                    el.visible = false;
                }
            }
            Effect::RemoveKeys(keys) => {
                for removed in keys {
                    state.elements.remove(&removed);
                }
            }
            Effect::Expand => {
                if let Some(el) = state.elements.get_mut(&k).and_then(|els| els.get_mut(index)) {
                    el.attrs
                        .insert("aria-expanded".to_string(), "true".to_string());
                }
            }
            Effect::Emit(urls) => state.emit(urls),
            Effect::Rerender {
                emit,
                key,
                elements,
            } => {
                state.emit(emit);
                state.elements.insert(key, elements);
            }
            Effect::Fail => {
                return Err(HarvestError::Browser("element detached".to_string()));
            }
        }
        Ok(())
    }

    async fn fill(&self, locator: &Locator, index: usize, value: &str) -> HarvestResult<()> {
        self.with_element(locator, index, |_| ())?;
        self.record(Action::Fill(key(locator), index, value.to_string()));
        Ok(())
    }

    async fn attribute(
        &self,
        locator: &Locator,
        index: usize,
        name: &str,
    ) -> HarvestResult<Option<String>> {
        self.with_element(locator, index, |e| e.attrs.get(name).cloned())
    }

    async fn inner_text(&self, locator: &Locator, index: usize) -> HarvestResult<String> {
        self.with_element(locator, index, |e| e.text.clone())
    }

    async fn scroll_into_view(&self, locator: &Locator, index: usize) -> HarvestResult<()> {
        self.with_element(locator, index, |_| ())
    }

    async fn content(&self) -> HarvestResult<String> {
        Ok("<html><body>fake</body></html>".to_string())
    }

    async fn screenshot(&self, path: &Path) -> HarvestResult<()> {
        std::fs::write(path, b"png")?;
        self.record(Action::Screenshot(path.to_path_buf()));
        Ok(())
    }

    async fn set_cookies(&self, cookies: &[SeedCookie]) -> HarvestResult<()> {
        let mut state = self.state.lock().unwrap();
        state.cookies.extend(cookies.iter().cloned());
        state.actions.push(Action::SetCookies(cookies.len()));
        Ok(())
    }

    async fn set_local_storage(&self, entries: &BTreeMap<String, String>) -> HarvestResult<()> {
        self.record(Action::SetLocalStorage(entries.len()));
        Ok(())
    }

    async fn subscribe_responses(&self) -> HarvestResult<ResponseStream> {
        let mut state = self.state.lock().unwrap();
        if state.refuse_listener {
            return Err(HarvestError::Browser("network domain unavailable".to_string()));
        }
        let (tx, stream) = ResponseStream::channel();
        state.responses = Some(tx);
        Ok(stream)
    }

    async fn close(&self) -> HarvestResult<()> {
        self.record(Action::Close);
        Ok(())
    }
}

/// Hands out the one shared page.
pub struct FakeRenderer {
    pub page: FakePage,
    pub shut_down: AtomicBool,
}

impl FakeRenderer {
    pub fn new(page: FakePage) -> Self {
        Self {
            page,
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn was_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Renderer for FakeRenderer {
    async fn new_page(&self) -> HarvestResult<Box<dyn PageDriver>> {
        Ok(Box::new(self.page.clone()))
    }

    async fn shutdown(&self) -> HarvestResult<()> {
        self.shut_down.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ─────────────────────── fetcher ───────────────────────

/// Records every fetch and writes a small payload; URLs containing
/// `fail_marker` fail like a rejected download.
#[derive(Clone, Default)]
pub struct RecordingFetcher {
    pub calls: Arc<Mutex<Vec<(String, PathBuf)>>>,
    pub fail_marker: Option<String>,
}

impl RecordingFetcher {
    pub fn failing_on(marker: &str) -> Self {
        Self {
            fail_marker: Some(marker.to_string()),
            ..Default::default()
        }
    }

    pub fn urls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(url, _)| url.clone())
            .collect()
    }
}

#[async_trait]
impl Fetcher for RecordingFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> HarvestResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push((url.to_string(), dest.to_path_buf()));
        if let Some(marker) = &self.fail_marker {
            if url.contains(marker.as_str()) {
                std::fs::write(dest, b"partial")?;
                return Err(HarvestError::FetchFailed {
                    status: "exit status: 1".to_string(),
                    stderr: "ERROR: HTTP Error 403: Forbidden".to_string(),
                });
            }
        }
        std::fs::write(dest, b"video")?;
        Ok(())
    }
}

// ─────────────────────── scenarios ───────────────────────

/// Config with millisecond-scale waits rooted in `dir`.
pub fn fast_config(dir: &Path) -> HarvestConfig {
    let mut config = HarvestConfig {
        site: SiteConfig {
            base_url: "https://school.example.com/".to_string(),
            catalog_url: "https://school.example.com/courses".to_string(),
            deep_link: None,
        },
        timings: Timings {
            entry_settle_ms: 0,
            email_choice_wait_ms: 30,
            credential_field_wait_ms: 30,
            post_login_settle_ms: 0,
            navigation_settle_ms: 0,
            target_node_wait_ms: 30,
            deep_link_timeout_ms: 100,
            deep_link_settle_ms: 0,
            popup_settle_ms: 0,
            popup_close_settle_ms: 0,
            accordion_wait_ms: 30,
            accordion_settle_ms: 0,
            item_wait_ms: 30,
            page_load_timeout_ms: 100,
            network_idle_timeout_ms: 100,
            capture_max_wait_ms: 80,
            capture_grace_ms: 10,
            poll_interval_ms: 5,
        },
        ..HarvestConfig::default()
    };
    config.output.dir = dir.join("downloads");
    config.output.diagnostics_dir = dir.join("diag");
    config
}

/// Sign-in button, email choice and credential form. When `accept` is set,
/// submitting removes the form and the sign-in button.
pub fn install_login(page: &FakePage, sel: &SelectorRegistry, accept: bool) {
    let removed = if accept {
        vec![
            key(primary(&sel.email_input)),
            key(primary(&sel.password_input)),
            key(primary(&sel.submit)),
            key(primary(&sel.sign_in_entry)),
        ]
    } else {
        Vec::new()
    };
    page.put(
        primary(&sel.sign_in_entry),
        vec![FakeElement::visible("Sign In")],
    )
    .put(
        primary(&sel.email_login_choice),
        vec![FakeElement::visible("Log in with Email").on_click(Effect::HideSelf)],
    )
    .put(primary(&sel.email_input), vec![FakeElement::visible("")])
    .put(primary(&sel.password_input), vec![FakeElement::visible("")])
    .put(
        primary(&sel.submit),
        vec![FakeElement::visible("Log In").on_click(Effect::RemoveKeys(removed))],
    );
}

/// The target node for `level`.
pub fn install_target(page: &FakePage, sel: &SelectorRegistry, level: u32) {
    page.put(
        &sel.target_node(level),
        vec![FakeElement::visible(&format!("Level {level}"))],
    );
}

/// Accordion headers; `true` means already expanded.
pub fn install_sections(page: &FakePage, sel: &SelectorRegistry, expanded: &[bool]) {
    let elements = expanded
        .iter()
        .enumerate()
        .map(|(i, open)| {
            FakeElement::visible(&format!("Section {}", i + 1))
                .attr("aria-expanded", if *open { "true" } else { "false" })
                .on_click(Effect::Expand)
        })
        .collect();
    page.put(primary(&sel.accordion), elements);
}

/// Lesson controls; clicking one emits its response URLs.
pub fn lesson(title: &str, urls: &[&str]) -> FakeElement {
    FakeElement::visible(title)
        .on_click(Effect::Emit(urls.iter().map(|u| u.to_string()).collect()))
}

pub fn install_lessons(page: &FakePage, sel: &SelectorRegistry, lessons: Vec<(&str, Vec<&str>)>) {
    let elements = lessons
        .into_iter()
        .map(|(title, urls)| lesson(title, &urls))
        .collect();
    page.put(primary(&sel.lesson_item), elements);
}

/// Email, password and submit controls; submitting removes all three.
pub fn credential_form(sel: &SelectorRegistry) -> Vec<(Locator, Vec<FakeElement>)> {
    let removed = vec![
        key(primary(&sel.email_input)),
        key(primary(&sel.password_input)),
        key(primary(&sel.submit)),
    ];
    vec![
        (primary(&sel.email_input).clone(), vec![FakeElement::visible("")]),
        (primary(&sel.password_input).clone(), vec![FakeElement::visible("")]),
        (
            primary(&sel.submit).clone(),
            vec![FakeElement::visible("Log In").on_click(Effect::RemoveKeys(removed))],
        ),
    ]
}
