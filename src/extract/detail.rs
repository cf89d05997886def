use std::sync::LazyLock;

use regex::Regex;
use scraper::Selector;

use super::{
    first_success, host_matches, mentions_verified_revenue, parse_selectors, text_of, Document,
    PageSnapshot, Strategy, BADGE_SELECTOR,
};

static MONTHLY_REVENUE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\$([\d,]+)\s*/?\s*(?:mo|month)").unwrap());
static ANY_REVENUE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\$([\d,]+)").unwrap());
static POST_DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:January|February|March|April|May|June|July|August|September|October|November|December)\s+\d{1,2},\s+\d{4}",
    )
    .unwrap()
});
static SENTENCE_END_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[.!?]\s+").unwrap());

static IMAGE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("img").unwrap());
static BADGE: LazyLock<Selector> = LazyLock::new(|| Selector::parse(BADGE_SELECTOR).unwrap());
static REVENUE_EXPLANATION: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("[class*='revenue-explanation']").unwrap());
static FEED_CONTAINERS: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    parse_selectors(&[
        "article",
        "[class*='post']",
        "[class*='feed']",
        "[class*='update']",
        "[class*='timeline']",
        "div[class*='Post']",
    ])
});
static FEED_TITLE: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("h1, h2, h3, h4, [class*='title'], [class*='headline']").unwrap()
});
static FEED_BODY: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("p, [class*='content'], [class*='body'], [class*='text']").unwrap()
});
static WEBSITE_LINKS: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    parse_selectors(&[
        "a[href^='http']",
        "a[target='_blank']",
        "[class*='website'] a",
        "[class*='link'] a",
        "a[href*='www']",
    ])
});

/// Product images are served from this host.
const ASSET_HOST: &str = "storage.googleapis.com";
/// Links to these hosts are never the product's own website.
const EXCLUDED_HOSTS: &[&str] = &[
    "indiehackers.com",
    "twitter.com",
    "x.com",
    "linkedin.com",
    "github.com",
];

const DATED_POST_WINDOW: usize = 500;
const MIN_SENTENCE_CHARS: usize = 20;
const MAX_SENTENCES: usize = 3;

/// Fields recovered from a product's detail page. `None` means no strategy
/// found a value and the listing-page value should stand.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetailInfo {
    pub thumbnail_url: Option<String>,
    pub revenue: Option<String>,
    pub first_feed_post: Option<String>,
    pub website_url: Option<String>,
    pub is_verified: bool,
}

pub fn extract_details(snapshot: &PageSnapshot) -> DetailInfo {
    let doc = Document::parse(snapshot);

    const THUMBNAIL: &[Strategy<String>] = &[thumbnail_from_images];
    const REVENUE: &[Strategy<String>] = &[monthly_revenue, any_revenue];
    const FEED_POST: &[Strategy<String>] = &[feed_post_from_container, feed_post_after_date];
    const WEBSITE: &[Strategy<String>] = &[website_link];
    const VERIFIED: &[Strategy<()>] = &[
        verified_by_badge,
        verified_by_explanation,
        verified_by_page_text,
    ];

    DetailInfo {
        thumbnail_url: first_success(&doc, THUMBNAIL),
        revenue: first_success(&doc, REVENUE),
        first_feed_post: first_success(&doc, FEED_POST),
        website_url: first_success(&doc, WEBSITE),
        is_verified: first_success(&doc, VERIFIED).is_some(),
    }
}

// ── Thumbnail ──

/// First image whose declared or rendered source lives on the asset host.
fn thumbnail_from_images(doc: &Document<'_>) -> Option<String> {
    let rendered = &doc.layout().current_sources;
    doc.select(&IMAGE).enumerate().find_map(|(i, img)| {
        let declared = img
            .value()
            .attr("src")
            .and_then(|src| doc.resolve(src))
            .map(|url| url.to_string());
        let current = rendered.get(i).cloned().flatten();
        [declared, current]
            .into_iter()
            .flatten()
            .find(|src| src.contains(ASSET_HOST))
    })
}

// ── Revenue ──

fn revenue_capture(re: &Regex, text: &str) -> Option<String> {
    let digits = re.captures(text)?[1].replace(',', "");
    (!digits.is_empty()).then_some(digits)
}

fn monthly_revenue(doc: &Document<'_>) -> Option<String> {
    revenue_capture(&MONTHLY_REVENUE_RE, &doc.full_text())
}

fn any_revenue(doc: &Document<'_>) -> Option<String> {
    revenue_capture(&ANY_REVENUE_RE, &doc.full_text())
}

// ── First feed post ──

/// Title and body of the first element matched by the first feed selector
/// that yields any text.
fn feed_post_from_container(doc: &Document<'_>) -> Option<String> {
    FEED_CONTAINERS.iter().find_map(|sel| {
        let container = doc.select(sel).next()?;
        let parts: Vec<String> = [&*FEED_TITLE, &*FEED_BODY]
            .into_iter()
            .filter_map(|part| container.select(part).next().map(text_of))
            .filter(|text| !text.is_empty())
            .collect();
        (!parts.is_empty()).then(|| parts.join("\n\n"))
    })
}

/// Up to three substantial sentences following the first "Month D, YYYY" date.
fn feed_post_after_date(doc: &Document<'_>) -> Option<String> {
    let text = doc.body_text();
    let date = POST_DATE_RE.find(&text)?;
    let window: String = text[date.end()..].chars().take(DATED_POST_WINDOW).collect();
    let sentences: Vec<&str> = SENTENCE_END_RE
        .split(&window)
        .map(str::trim)
        .filter(|s| s.chars().count() > MIN_SENTENCE_CHARS)
        .take(MAX_SENTENCES)
        .collect();
    (!sentences.is_empty()).then(|| sentences.join(". "))
}

// ── Website ──

fn website_link(doc: &Document<'_>) -> Option<String> {
    WEBSITE_LINKS.iter().find_map(|sel| {
        doc.select(sel)
            .filter_map(|a| a.value().attr("href"))
            .filter_map(|href| doc.resolve(href))
            .find(|url| {
                matches!(url.scheme(), "http" | "https")
                    && url
                        .host_str()
                        .is_some_and(|host| !EXCLUDED_HOSTS.iter().any(|d| host_matches(host, d)))
            })
            .map(|url| url.to_string())
    })
}

// ── Verification ──

fn verified_by_badge(doc: &Document<'_>) -> Option<()> {
    let badge = doc.select(&BADGE).next()?;
    mentions_verified_revenue(&text_of(badge)).then_some(())
}

fn verified_by_explanation(doc: &Document<'_>) -> Option<()> {
    doc.select(&REVENUE_EXPLANATION)
        .any(|el| mentions_verified_revenue(&text_of(el)))
        .then_some(())
}

fn verified_by_page_text(doc: &Document<'_>) -> Option<()> {
    mentions_verified_revenue(&doc.body_text()).then_some(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{snapshot, Layout};

    const DETAIL_URL: &str = "https://www.indiehackers.com/product/acme";

    fn details(html: &str) -> DetailInfo {
        extract_details(&snapshot(DETAIL_URL, html))
    }

    #[test]
    fn empty_page_yields_nothing() {
        assert_eq!(details("<html><body></body></html>"), DetailInfo::default());
    }

    #[test]
    fn monthly_figure_preferred_over_first_dollar_amount() {
        let d = details("<p>Raised $50,000 seed.</p><p>Now at $3,400 / month</p>");
        assert_eq!(d.revenue.as_deref(), Some("3400"));

        let d = details("<p>Revenue: $7,250</p>");
        assert_eq!(d.revenue.as_deref(), Some("7250"));

        let d = details("<p>$12/MO</p>");
        assert_eq!(d.revenue.as_deref(), Some("12"));
    }

    #[test]
    fn thumbnail_from_declared_src() {
        let html = r#"<img src="/logo.png">
            <img src="https://storage.googleapis.com/indie-hackers.appspot.com/product-avatars/acme/128x128_acme.webp">"#;
        assert_eq!(
            details(html).thumbnail_url.as_deref(),
            Some("https://storage.googleapis.com/indie-hackers.appspot.com/product-avatars/acme/128x128_acme.webp")
        );
    }

    #[test]
    fn thumbnail_from_rendered_src() {
        let html = r#"<img src="/placeholder.gif" srcset="x 2x">"#;
        let layout = Layout {
            current_sources: vec![Some("https://storage.googleapis.com/a/b.webp".into())],
            ..Default::default()
        };
        let d = extract_details(&snapshot(DETAIL_URL, html).with_layout(layout));
        assert_eq!(d.thumbnail_url.as_deref(), Some("https://storage.googleapis.com/a/b.webp"));
    }

    #[test]
    fn feed_post_from_article() {
        let html = r#"<article><h2>We hit $1k MRR</h2><p>It took eight months.</p></article>
            <article><h2>Older</h2></article>"#;
        assert_eq!(
            details(html).first_feed_post.as_deref(),
            Some("We hit $1k MRR\n\nIt took eight months.")
        );
    }

    #[test]
    fn feed_post_skips_empty_containers() {
        let html = r#"<article></article><div class="feed-item"><div class="text">Shipped v2 today</div></div>"#;
        assert_eq!(details(html).first_feed_post.as_deref(), Some("Shipped v2 today"));
    }

    #[test]
    fn feed_post_from_dated_text() {
        let html = "<body><div>Posted March 3, 2024 We finally launched the public beta this week. \
                    Short one. Signups doubled compared with the private alpha! \
                    Next up is a proper onboarding flow for teams? Trailing</div></body>";
        assert_eq!(
            details(html).first_feed_post.as_deref(),
            Some(
                "We finally launched the public beta this week. \
                 Signups doubled compared with the private alpha. \
                 Next up is a proper onboarding flow for teams"
            )
        );
    }

    #[test]
    fn website_skips_social_and_source_hosts() {
        let html = r#"<a href="https://twitter.com/acme">tw</a>
            <a href="https://www.indiehackers.com/acme">ih</a>
            <a href="https://x.com/acme">x</a>
            <a href="https://acme.io/">site</a>"#;
        assert_eq!(details(html).website_url.as_deref(), Some("https://acme.io/"));
    }

    #[test]
    fn website_found_through_later_selector() {
        let html = r#"<a href="/about">about</a><div class="website"><a href="//acme.dev/">acme.dev</a></div>"#;
        assert_eq!(details(html).website_url.as_deref(), Some("https://acme.dev/"));
    }

    #[test]
    fn verified_badge_variants() {
        let badge = r#"<div class="product-card__revenue-explanation">Stripe-verified revenue</div>"#;
        assert!(details(badge).is_verified);

        let explanation = r#"<span class="x-revenue-explanation">Verified   Revenue</span>"#;
        assert!(details(explanation).is_verified);

        let text = "<body><p>This product has verified revenue.</p></body>";
        assert!(details(text).is_verified);

        assert!(!details("<p>Self-reported revenue</p>").is_verified);
    }
}
