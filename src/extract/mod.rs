//! Extraction over a rendered page snapshot.
//!
//! The browser hands back the serialized DOM together with the few layout
//! facts that only a live page knows (element positions, the image source the
//! browser actually picked). Extractors parse the HTML with `scraper`, whose
//! types are `!Send`, so every entry point here is synchronous and builds its
//! own `Document` from the `Send` snapshot.
//!
//! Each field is extracted by an ordered list of independent strategies; the
//! first one that returns `Some` wins (see [`first_success`]).

pub mod detail;
pub mod listing;
pub mod website;

use std::sync::LazyLock;

use regex::Regex;
use scraper::html::Select;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use url::Url;

static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static BODY: LazyLock<Selector> = LazyLock::new(|| Selector::parse("body").unwrap());

/// Class of the badge explaining where a product's revenue figure comes from.
pub const BADGE_SELECTOR: &str = ".product-card__revenue-explanation";

const VERIFIED_MARKER: &str = "verified revenue";

/// Serialized DOM plus layout data captured from the live page.
#[derive(Debug, Clone)]
pub struct PageSnapshot {
    pub url: Url,
    pub html: String,
    pub layout: Layout,
}

impl PageSnapshot {
    pub fn new(url: Url, html: impl Into<String>) -> Self {
        Self {
            url,
            html: html.into(),
            layout: Layout::default(),
        }
    }

    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }
}

/// Positions and rendered sources, each list in document order of its selector:
/// `anchors` for every `a`, `badges` for every [`BADGE_SELECTOR`] match,
/// `current_sources` for every `img`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Layout {
    pub anchors: Vec<Rect>,
    pub badges: Vec<Rect>,
    pub current_sources: Vec<Option<String>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct Rect {
    pub top: f64,
    pub left: f64,
}

impl Rect {
    #[cfg(test)]
    pub fn new(top: f64, left: f64) -> Self {
        Self { top, left }
    }
}

/// Parsed view of a snapshot. Lives only inside synchronous extraction.
pub struct Document<'a> {
    html: Html,
    base: &'a Url,
    layout: &'a Layout,
}

impl<'a> Document<'a> {
    pub fn parse(snapshot: &'a PageSnapshot) -> Self {
        Self {
            html: Html::parse_document(&snapshot.html),
            base: &snapshot.url,
            layout: &snapshot.layout,
        }
    }

    pub fn select<'s>(&'s self, selector: &'s Selector) -> Select<'s, 's> {
        self.html.select(selector)
    }

    pub fn layout(&self) -> &Layout {
        self.layout
    }

    /// Resolve an `href`/`src` attribute the way the browser would.
    pub fn resolve(&self, reference: &str) -> Option<Url> {
        self.base.join(reference.trim()).ok()
    }

    /// Text of the whole document, `<head>` included.
    pub fn full_text(&self) -> String {
        self.html.root_element().text().collect()
    }

    pub fn body_text(&self) -> String {
        match self.html.select(&BODY).next() {
            Some(body) => body.text().collect(),
            None => self.full_text(),
        }
    }
}

/// A single extraction heuristic for one field.
pub type Strategy<T> = fn(&Document<'_>) -> Option<T>;

/// Try each strategy in order and keep the first hit.
pub fn first_success<T>(doc: &Document<'_>, strategies: &[Strategy<T>]) -> Option<T> {
    strategies.iter().find_map(|strategy| strategy(doc))
}

/// Trimmed text content of an element.
pub fn text_of(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

/// Lowercased with every whitespace run collapsed to one space.
pub fn normalize(text: &str) -> String {
    WHITESPACE_RE.replace_all(&text.to_lowercase(), " ").into_owned()
}

pub fn mentions_verified_revenue(text: &str) -> bool {
    normalize(text).contains(VERIFIED_MARKER)
}

/// `host` is `domain` or one of its subdomains.
pub fn host_matches(host: &str, domain: &str) -> bool {
    host == domain
        || host
            .strip_suffix(domain)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

pub(crate) fn parse_selectors(list: &[&str]) -> Vec<Selector> {
    list.iter().map(|s| Selector::parse(s).unwrap()).collect()
}

#[cfg(test)]
pub(crate) fn snapshot(url: &str, html: &str) -> PageSnapshot {
    PageSnapshot::new(Url::parse(url).unwrap(), html)
}
