//! Item enumerator — lists the lessons on the current page in DOM order.

use std::time::Duration;

use crate::config::Timings;
use crate::diagnostics::{self, Diagnostics};
use crate::renderer::PageDriver;
use crate::selectors::{wait_for_present, Locator, SelectorRegistry};
use crate::types::ContentItem;

/// The lessons on the page and the locator that found them.
#[derive(Debug, Clone, Default)]
pub struct ItemListing {
    /// First locator of the lesson chain with any match; `None` when none did.
    pub locator: Option<Locator>,
    pub items: Vec<ContentItem>,
}

/// List every item control on the page.
///
/// The lesson chain is probed in order and the first locator with matches
/// is used for every item. Zero items is not an error: a control listing and
/// a markup dump are written for triage and an empty listing is returned.
pub async fn enumerate_items(
    page: &dyn PageDriver,
    selectors: &SelectorRegistry,
    timings: &Timings,
    diagnostics: &Diagnostics,
    level: u32,
) -> ItemListing {
    let found = wait_for_present(
        page,
        &selectors.lesson_item,
        Duration::from_millis(timings.item_wait_ms),
        timings.poll(),
    )
    .await;

    let Some((locator, count)) = found else {
        tracing::warn!(
            locators = selectors.lesson_item.locators().len(),
            "no lesson controls found"
        );
        diagnostics
            .list_controls(page, &selectors.generic_control)
            .await;
        diagnostics.markup(page, diagnostics::ITEMS_DUMP).await;
        return ItemListing::default();
    };

    let mut items = Vec::with_capacity(count);
    for index in 0..count {
        let raw = match page.inner_text(&locator, index).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(ordinal = index + 1, "could not read lesson title: {e}");
                String::new()
            }
        };
        items.push(ContentItem {
            ordinal: index + 1,
            title: display_title(&raw),
            level,
        });
    }
    tracing::info!(count = items.len(), locator = %locator, "found lessons");
    ItemListing {
        locator: Some(locator),
        items,
    }
}

/// Find the live index of `item` under `locator`.
///
/// The list may have re-rendered since enumeration, so the enumerated
/// position is only trusted while it still shows the same title; otherwise
/// the first control with that title wins. `None` means the lesson is gone.
pub async fn locate_item(
    page: &dyn PageDriver,
    locator: &Locator,
    item: &ContentItem,
) -> Option<usize> {
    let expected = item.dom_index();
    if let Ok(text) = page.inner_text(locator, expected).await {
        if display_title(&text) == item.title {
            return Some(expected);
        }
    }

    let count = page.count(locator).await.unwrap_or(0);
    for index in (0..count).filter(|i| *i != expected) {
        if let Ok(text) = page.inner_text(locator, index).await {
            if display_title(&text) == item.title {
                tracing::info!(from = expected, to = index, "lesson moved since enumeration");
                return Some(index);
            }
        }
    }
    None
}

/// First non-empty line of the control text; trailing lines carry durations.
pub fn display_title(raw: &str) -> String {
    raw.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default()
        .to_string()
}
