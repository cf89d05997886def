use std::sync::LazyLock;

use scraper::{ElementRef, Selector};
use tracing::debug;

use super::{mentions_verified_revenue, text_of, Document, PageSnapshot, Rect, BADGE_SELECTOR};
use crate::product::{parse_revenue, ProductListing, PRODUCT_PATH};

static PRODUCT_LINK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href^='/product/']").unwrap());
static PRODUCT_LINK_ANYWHERE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href*='/product/']").unwrap());
static ANCHOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());
static ANY_ANCHOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a").unwrap());
static STRONG: LazyLock<Selector> = LazyLock::new(|| Selector::parse("strong").unwrap());
static SPAN: LazyLock<Selector> = LazyLock::new(|| Selector::parse("span").unwrap());
static BADGE: LazyLock<Selector> = LazyLock::new(|| Selector::parse(BADGE_SELECTOR).unwrap());

/// Levels above an entry searched for its own revenue badge.
const ANCESTOR_DEPTH: usize = 5;
/// Entries and badges this close vertically sit on the same card row.
const SAME_ROW_MAX_DY: f64 = 100.0;
const NEARBY_MAX_DX: f64 = 600.0;

/// Every product entry on the listing page, in document order.
pub fn extract_listings(snapshot: &PageSnapshot) -> Vec<ProductListing> {
    let doc = Document::parse(snapshot);
    let links = locate_product_links(&doc);
    if links.is_empty() {
        return Vec::new();
    }

    let anchors: Vec<ElementRef> = doc.select(&ANY_ANCHOR).collect();
    let verified_badges: Vec<Rect> = doc
        .select(&BADGE)
        .zip(doc.layout().badges.iter())
        .filter(|(badge, _)| mentions_verified_revenue(&text_of(*badge)))
        .map(|(_, rect)| *rect)
        .collect();

    links
        .into_iter()
        .map(|link| {
            let rect = anchors
                .iter()
                .position(|a| *a == link)
                .and_then(|i| doc.layout().anchors.get(i).copied());
            build_listing(&doc, link, rect, &verified_badges)
        })
        .collect()
}

/// Product anchors, by the most specific selector that finds any.
fn locate_product_links<'a>(doc: &'a Document<'_>) -> Vec<ElementRef<'a>> {
    let exact: Vec<ElementRef> = doc.select(&PRODUCT_LINK).collect();
    if !exact.is_empty() {
        return exact;
    }

    let anywhere: Vec<ElementRef> = doc.select(&PRODUCT_LINK_ANYWHERE).collect();
    if !anywhere.is_empty() {
        debug!(count = anywhere.len(), "product links matched by substring");
        return anywhere;
    }

    let resolved: Vec<ElementRef> = doc
        .select(&ANCHOR)
        .filter(|a| {
            a.value()
                .attr("href")
                .and_then(|href| doc.resolve(href))
                .is_some_and(|url| url.as_str().contains(PRODUCT_PATH))
        })
        .collect();
    if !resolved.is_empty() {
        debug!(count = resolved.len(), "product links matched after resolving hrefs");
    }
    resolved
}

fn build_listing(
    doc: &Document<'_>,
    link: ElementRef<'_>,
    rect: Option<Rect>,
    verified_badges: &[Rect],
) -> ProductListing {
    let href = link.value().attr("href").unwrap_or_default();
    let url = doc
        .resolve(href)
        .map(|u| u.to_string())
        .unwrap_or_else(|| href.to_string());

    let mut listing = ProductListing::new(url);
    if let Some(name) = entry_name(link) {
        listing.name = name;
    }
    listing.description = entry_description(link);
    listing.revenue = parse_revenue(&link.text().collect::<String>());
    listing.is_verified = has_own_badge(link)
        || rect.is_some_and(|r| shares_row_with_badge(r, verified_badges));
    listing
}

/// First `strong`, else first `span`.
fn entry_name(link: ElementRef<'_>) -> Option<String> {
    [&*STRONG, &*SPAN]
        .into_iter()
        .filter_map(|sel| link.select(sel).next())
        .map(text_of)
        .find(|name| !name.is_empty())
}

/// Span following the name, else the entry's second span.
fn entry_description(link: ElementRef<'_>) -> String {
    let after_name = link
        .select(&STRONG)
        .next()
        .and_then(|strong| strong.next_siblings().find_map(ElementRef::wrap))
        .and_then(|sibling| sibling.select(&SPAN).next())
        .map(text_of)
        .filter(|text| !text.is_empty());

    after_name
        .or_else(|| link.select(&SPAN).nth(1).map(text_of))
        .unwrap_or_default()
}

/// Walk up from the entry and check the first badge inside each ancestor.
fn has_own_badge(link: ElementRef<'_>) -> bool {
    let mut container = link.parent().and_then(ElementRef::wrap);
    for _ in 0..ANCESTOR_DEPTH {
        let Some(el) = container else { break };
        if let Some(badge) = el.select(&BADGE).next() {
            if mentions_verified_revenue(&text_of(badge)) {
                return true;
            }
        }
        container = el.parent().and_then(ElementRef::wrap);
    }
    false
}

fn shares_row_with_badge(entry: Rect, badges: &[Rect]) -> bool {
    badges.iter().any(|badge| {
        (badge.top - entry.top).abs() < SAME_ROW_MAX_DY
            && (badge.left - entry.left).abs() < NEARBY_MAX_DX
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{snapshot, Layout};

    const LISTING_URL: &str = "https://www.indiehackers.com/products";

    fn card(slug: &str, name: &str, tagline: &str, revenue: &str) -> String {
        format!(
            "<a href=\"/product/{slug}\"><strong>{name}</strong><div><span>{tagline}</span></div><span>{revenue}</span></a>"
        )
    }

    #[test]
    fn extracts_entries_in_document_order() {
        let html = format!(
            "<html><body><div>{}{}</div></body></html>",
            card("acme", "Acme", "Invoices for freelancers", "$1,200/mo"),
            card("zed", "Zed", "Editor", "$0"),
        );
        let items = extract_listings(&snapshot(LISTING_URL, &html));
        assert_eq!(items.len(), 2);

        assert_eq!(items[0].name, "Acme");
        assert_eq!(items[0].description, "Invoices for freelancers");
        assert_eq!(items[0].revenue, "1200");
        assert_eq!(items[0].link, "https://www.indiehackers.com/product/acme");
        assert!(!items[0].is_verified);

        assert_eq!(items[1].name, "Zed");
        assert_eq!(items[1].revenue, "0");
    }

    #[test]
    fn missing_fields_fall_back() {
        let html = r#"<a href="/product/bare">no structure here</a>
            <a href="/product/spans"><span>First</span><span>Second</span></a>"#;
        let items = extract_listings(&snapshot(LISTING_URL, html));
        assert_eq!(items[0].name, "Unknown");
        assert_eq!(items[0].description, "");
        assert_eq!(items[0].revenue, "0");
        assert_eq!(items[1].name, "First");
        assert_eq!(items[1].description, "Second");
    }

    #[test]
    fn absolute_links_found_by_substring() {
        let html = r#"<a href="https://www.indiehackers.com/product/abs"><strong>Abs</strong></a>
            <a href="/about">About</a>"#;
        let items = extract_listings(&snapshot(LISTING_URL, html));
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].link, "https://www.indiehackers.com/product/abs");
    }

    #[test]
    fn relative_links_found_after_resolution() {
        let snap = snapshot("https://www.indiehackers.com/product/", r#"<a href="rel"><strong>Rel</strong></a>"#);
        let items = extract_listings(&snap);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].link, "https://www.indiehackers.com/product/rel");
    }

    #[test]
    fn no_links_no_entries() {
        let items = extract_listings(&snapshot(LISTING_URL, "<p>Loading…</p>"));
        assert!(items.is_empty());
    }

    #[test]
    fn badge_in_ancestor_marks_verified() {
        let html = r#"<div class="card">
              <a href="/product/other"><strong>Other</strong></a>
              <div class="product-card__revenue-explanation">Self-reported</div>
            </div>
            <div class="card">
              <a href="/product/acme"><strong>Acme</strong></a>
              <div class="product-card__revenue-explanation">Stripe-verified
                 Revenue</div>
            </div>"#;
        let items = extract_listings(&snapshot(LISTING_URL, html));
        assert!(!items[0].is_verified);
        assert!(items[1].is_verified);
    }

    #[test]
    fn only_first_badge_in_container_counts() {
        let html = r#"<div>
              <a href="/product/acme"><strong>Acme</strong></a>
              <div class="product-card__revenue-explanation">Self-reported</div>
              <div class="product-card__revenue-explanation">Verified revenue</div>
            </div>"#;
        let items = extract_listings(&snapshot(LISTING_URL, html));
        assert!(!items[0].is_verified);
    }

    // Entries nested too deep for the ancestor walk to reach the shared badge.
    fn row_html() -> String {
        let deep = |slug: &str| {
            format!(
                "<div><div><div><div><div><div><a href=\"/product/{slug}\"><strong>{slug}</strong></a></div></div></div></div></div></div>"
            )
        };
        format!(
            "<body>{}{}<div class=\"product-card__revenue-explanation\">Verified revenue</div></body>",
            deep("left"),
            deep("right"),
        )
    }

    #[test]
    fn badge_on_same_row_marks_both_entries() {
        let layout = Layout {
            anchors: vec![Rect::new(200.0, 100.0), Rect::new(230.0, 500.0)],
            badges: vec![Rect::new(250.0, 400.0)],
            current_sources: vec![],
        };
        let snap = snapshot(LISTING_URL, &row_html()).with_layout(layout);
        let items = extract_listings(&snap);
        assert!(items[0].is_verified);
        assert!(items[1].is_verified);
    }

    #[test]
    fn badge_on_another_row_is_ignored() {
        let layout = Layout {
            anchors: vec![Rect::new(100.0, 100.0), Rect::new(800.0, 100.0)],
            badges: vec![Rect::new(210.0, 100.0)],
            current_sources: vec![],
        };
        let snap = snapshot(LISTING_URL, &row_html()).with_layout(layout);
        let items = extract_listings(&snap);
        assert!(!items[0].is_verified);
        assert!(!items[1].is_verified);
    }

    #[test]
    fn badge_too_far_sideways_is_ignored() {
        let layout = Layout {
            anchors: vec![Rect::new(200.0, 0.0), Rect::new(200.0, 1500.0)],
            badges: vec![Rect::new(200.0, 700.0)],
            current_sources: vec![],
        };
        let snap = snapshot(LISTING_URL, &row_html()).with_layout(layout);
        let items = extract_listings(&snap);
        assert!(!items[0].is_verified);
        assert!(!items[1].is_verified);
    }
}
