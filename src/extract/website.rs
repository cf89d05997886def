use std::fmt;
use std::sync::LazyLock;

use scraper::Selector;

use super::{parse_selectors, text_of, Document, PageSnapshot};

static TITLE: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("h1, [class*='hero'] h1, [class*='headline']").unwrap()
});
static HERO: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    parse_selectors(&[
        "[class*='hero'] p",
        "[class*='hero'] [class*='description']",
        "[class*='hero'] [class*='subtitle']",
        "section[class*='hero'] p",
        "main > section:first-child p",
    ])
});
static FEATURES: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    parse_selectors(&[
        "[class*='feature']",
        "[class*='benefit']",
        "[class*='advantage']",
        "li[class*='feature']",
        "[class*='features'] li",
    ])
});
static DESCRIPTION: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    parse_selectors(&[
        "[class*='description']",
        "[class*='about']",
        "[class*='intro']",
        "main p",
        "section p",
    ])
});
static PRICING: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    parse_selectors(&[
        "[class*='pricing']",
        "[class*='price']",
        "[class*='plan']",
        "[class*='subscription']",
    ])
});

const MAX_FEATURES: usize = 6;

/// What a product's own landing page says about itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WebsiteSummary {
    pub title: String,
    pub hero: String,
    pub description: String,
    pub features: Vec<String>,
    pub pricing: String,
}

impl WebsiteSummary {
    pub fn is_empty(&self) -> bool {
        self.title.is_empty()
            && self.hero.is_empty()
            && self.description.is_empty()
            && self.features.is_empty()
            && self.pricing.is_empty()
    }
}

/// One `Label: value` line per non-empty field.
impl fmt::Display for WebsiteSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let features = self.features.join(", ");
        let lines = [
            ("Title", self.title.as_str()),
            ("Hero", self.hero.as_str()),
            ("Description", self.description.as_str()),
            ("Features", features.as_str()),
            ("Pricing", self.pricing.as_str()),
        ];
        let mut first = true;
        for (label, value) in lines.into_iter().filter(|(_, v)| !v.is_empty()) {
            if !first {
                writeln!(f)?;
            }
            write!(f, "{label}: {value}")?;
            first = false;
        }
        Ok(())
    }
}

pub fn extract_website_summary(snapshot: &PageSnapshot) -> WebsiteSummary {
    let doc = Document::parse(snapshot);
    WebsiteSummary {
        title: doc.select(&TITLE).next().map(text_of).unwrap_or_default(),
        hero: first_within(&doc, &HERO, 20, 500),
        description: first_within(&doc, &DESCRIPTION, 50, 1000),
        features: features(&doc),
        pricing: pricing(&doc),
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Text of the first match of the first selector whose text length is
/// strictly between `min` and `max`. Only each selector's first match is tried.
fn first_within(doc: &Document<'_>, selectors: &[Selector], min: usize, max: usize) -> String {
    selectors
        .iter()
        .filter_map(|sel| doc.select(sel).next().map(text_of))
        .find(|text| (min + 1..max).contains(&char_len(text)))
        .unwrap_or_default()
}

/// Items of the first selector with any match, filtered to reasonable lengths.
fn features(doc: &Document<'_>) -> Vec<String> {
    FEATURES
        .iter()
        .map(|sel| doc.select(sel).take(MAX_FEATURES).map(text_of).collect::<Vec<_>>())
        .find(|items| !items.is_empty())
        .unwrap_or_default()
        .into_iter()
        .filter(|item| (11..200).contains(&char_len(item)))
        .collect()
}

fn pricing(doc: &Document<'_>) -> String {
    PRICING
        .iter()
        .find_map(|sel| doc.select(sel).next())
        .map(text_of)
        .unwrap_or_default()
}
