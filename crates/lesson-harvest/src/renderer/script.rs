//! JavaScript builders for DOM operations executed inside the page.
//!
//! Every element operation resolves its locator afresh in page context, so
//! no element handle outlives a single call. Caller-supplied values are
//! embedded as JSON literals and never spliced into code positions.

use std::collections::BTreeMap;

use crate::selectors::Locator;

/// An operation on the `index`-th element matched by a locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomAction {
    Count,
    IsVisible(usize),
    Click(usize),
    Fill(usize, String),
    Attribute(usize, String),
    InnerText(usize),
    ScrollIntoView(usize),
}

/// Shared prelude: locator resolution and visibility test.
const PRELUDE: &str = r#"
    const __norm = (s) => (s || '').replace(/\s+/g, ' ').trim().toLowerCase();
    const __resolve = (loc) => {
        if (loc.by === 'css') return Array.from(document.querySelectorAll(loc.css));
        const want = __norm(loc.text);
        const pool = Array.from(document.querySelectorAll(loc.scope || 'body *'));
        const hits = pool.filter((el) => {
            const t = __norm(el.innerText || el.textContent);
            return loc.exact ? t === want : t.includes(want);
        });
        return hits.filter((el) => !hits.some((o) => o !== el && el.contains(o)));
    };
    const __visible = (el) => {
        if (!el || !el.isConnected) return false;
        const st = window.getComputedStyle(el);
        if (st.display === 'none' || st.visibility === 'hidden') return false;
        const r = el.getBoundingClientRect();
        return r.width > 0 && r.height > 0;
    };
"#;

/// Build the script for `action` against `locator`.
///
/// Scripts evaluate to:
/// - `Count` → number
/// - `IsVisible` → boolean
/// - `Click`, `Fill`, `ScrollIntoView` → boolean (false when no element at index)
/// - `Attribute`, `InnerText` → `{ found: boolean, value: string | null }`
pub fn build_dom_script(locator: &Locator, action: &DomAction) -> String {
    let loc = json_literal(locator);
    let body = match action {
        DomAction::Count => "return __resolve(loc).length;".to_string(),
        DomAction::IsVisible(index) => {
            format!("return __visible(__resolve(loc)[{index}]);")
        }
        DomAction::Click(index) => format!(
            r#"const el = __resolve(loc)[{index}];
            if (!el) return false;
            el.scrollIntoView({{ block: 'center' }});
            el.click();
            return true;"#
        ),
        DomAction::Fill(index, value) => format!(
            r#"const el = __resolve(loc)[{index}];
            if (!el) return false;
            el.focus();
            const proto = el instanceof HTMLTextAreaElement
                ? HTMLTextAreaElement.prototype
                : HTMLInputElement.prototype;
            const setter = Object.getOwnPropertyDescriptor(proto, 'value').set;
            setter.call(el, {value});
            el.dispatchEvent(new Event('input', {{ bubbles: true }}));
            el.dispatchEvent(new Event('change', {{ bubbles: true }}));
            return true;"#,
            value = json_literal(value)
        ),
        DomAction::Attribute(index, name) => format!(
            r#"const el = __resolve(loc)[{index}];
            if (!el) return {{ found: false, value: null }};
            return {{ found: true, value: el.getAttribute({name}) }};"#,
            name = json_literal(name)
        ),
        DomAction::InnerText(index) => format!(
            r#"const el = __resolve(loc)[{index}];
            if (!el) return {{ found: false, value: null }};
            return {{ found: true, value: el.innerText || el.textContent || '' }};"#
        ),
        DomAction::ScrollIntoView(index) => format!(
            r#"const el = __resolve(loc)[{index}];
            if (!el) return false;
            el.scrollIntoView({{ block: 'center' }});
            return true;"#
        ),
    };
    format!("(() => {{ {PRELUDE}\n    const loc = {loc};\n    {body}\n}})()")
}

/// Resource-timing entries kept while polling; the browser default is 250.
const RESOURCE_BUFFER_SIZE: u32 = 10_000;

/// Resolves `true` once the resource-entry count has been stable for
/// `quiet_ms` with the document loaded, or `false` after `timeout_ms`.
///
/// The timing buffer is emptied and enlarged first so a full buffer never
/// reads as a quiet network.
pub fn network_idle_script(timeout_ms: u64, quiet_ms: u64) -> String {
    format!(
        r#"(async () => {{
            performance.setResourceTimingBufferSize({RESOURCE_BUFFER_SIZE});
            performance.clearResourceTimings();
            const start = Date.now();
            let last = performance.getEntriesByType('resource').length;
            let stableSince = Date.now();
            while (Date.now() - start < {timeout_ms}) {{
                await new Promise((r) => setTimeout(r, 100));
                const cur = performance.getEntriesByType('resource').length;
                if (cur !== last) {{
                    last = cur;
                    stableSince = Date.now();
                }} else if (document.readyState === 'complete' && Date.now() - stableSince >= {quiet_ms}) {{
                    return true;
                }}
            }}
            return false;
        }})()"#
    )
}

/// Writes every entry into `window.localStorage`; evaluates to the entry count.
pub fn local_storage_script(entries: &BTreeMap<String, String>) -> String {
    format!(
        r#"(() => {{
            const entries = {};
            for (const [k, v] of Object.entries(entries)) localStorage.setItem(k, v);
            return Object.keys(entries).length;
        }})()"#,
        json_literal(entries)
    )
}

fn json_literal<T: serde::Serialize + ?Sized>(value: &T) -> String {
    // Serialising strings, maps and locators cannot fail.
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}
