use std::collections::HashMap;

use anyhow::{bail, Context, Result};
use futures::future::join_all;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};
use url::Url;

use crate::analyze;
use crate::browser::{LoadProfile, PageSource};
use crate::extract::detail::extract_details;
use crate::extract::listing::extract_listings;
use crate::extract::website::extract_website_summary;
use crate::llm::LanguageModel;
use crate::notion::{DocumentStore, Properties, PropertyValue};
use crate::parser::{parse_blocks, Block, TextSpan};
use crate::product::ProductListing;

pub const LISTING_URL: &str = "https://www.indiehackers.com/products";

/// Entries taken past the listing page in one run; later entries are dropped.
pub const MAX_ENRICHED: usize = 30;

pub const NAME: &str = "Name";
pub const DESCRIPTION: &str = "Description";
pub const REVENUE: &str = "Revenue";
pub const URL: &str = "URL";
pub const THUMBNAIL: &str = "Thumbnail";
pub const VERIFIED: &str = "Verified Stripe";

/// Which property set the target database carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schema {
    Basic,
    /// Adds the `Verified Stripe` checkbox, refreshed on every run.
    Verified,
}

/// The three outside services a run talks to.
pub struct Services<'a> {
    pub pages: &'a dyn PageSource,
    pub store: &'a dyn DocumentStore,
    pub model: &'a dyn LanguageModel,
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub database_id: String,
    pub schema: Schema,
    pub limit: usize,
    pub max_new: Option<usize>,
    /// Treat every listed entry as new.
    pub force: bool,
    /// Feed the product's own website into the analysis prompt.
    pub website_context: bool,
    pub language: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncSummary {
    /// Entries on the listing page before the cap.
    pub located: usize,
    /// Entries kept after the cap.
    pub listed: usize,
    pub existing: usize,
    pub new: usize,
    pub created: usize,
    pub failed: usize,
    pub detail_failures: usize,
    pub refreshed: usize,
    pub refresh_failures: usize,
}

impl SyncSummary {
    pub fn print(&self) {
        println!(
            "Located {} entries, considered {}: {} already stored, {} new.",
            self.located, self.listed, self.existing, self.new
        );
        println!(
            "Created {} pages ({} failed). Detail pages failed: {}.",
            self.created, self.failed, self.detail_failures
        );
        if self.refreshed + self.refresh_failures > 0 {
            println!(
                "Refreshed verification on {} pages ({} failed).",
                self.refreshed, self.refresh_failures
            );
        }
    }
}

fn progress_bar(len: usize, label: &'static str) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg} [{elapsed_precise}] {bar:40} {pos}/{len}")?
            .progress_chars("=> "),
    );
    pb.set_message(label);
    Ok(pb)
}

// ── Listing ──

/// Every entry on the listing page, in page order.
///
/// Fails when the page cannot be loaded or holds no product entries at all.
pub async fn load_all_listings(pages: &dyn PageSource) -> Result<Vec<ProductListing>> {
    let url = Url::parse(LISTING_URL)?;
    let snapshot = pages
        .load(&url, &LoadProfile::LISTING)
        .await
        .context("failed to load listing page")?;

    let listings = extract_listings(&snapshot);
    if listings.is_empty() {
        bail!("no product entries found on {LISTING_URL}");
    }
    info!(found = listings.len(), "listing extracted");
    Ok(listings)
}

/// The first `limit` entries of the listing page.
pub async fn load_listing(pages: &dyn PageSource, limit: usize) -> Result<Vec<ProductListing>> {
    let mut listings = load_all_listings(pages).await?;
    listings.truncate(limit);
    Ok(listings)
}

// ── Detail enrichment ──

async fn enrich(pages: &dyn PageSource, mut listing: ProductListing) -> (ProductListing, bool) {
    let url = match Url::parse(&listing.link) {
        Ok(url) => url,
        Err(e) => {
            warn!(link = %listing.link, "unusable product link: {e}");
            return (listing, false);
        }
    };

    match pages.load(&url, &LoadProfile::DETAIL).await {
        Ok(snapshot) => {
            listing.apply_details(extract_details(&snapshot));
            listing.ensure_thumbnail();
            debug!(link = %listing.link, verified = listing.is_verified, "detail enriched");
            (listing, true)
        }
        Err(e) => {
            warn!(link = %listing.link, "detail page failed, keeping listing values: {e:#}");
            (listing, false)
        }
    }
}

/// Visit every entry's detail page concurrently. A failed visit leaves that
/// entry as listed. Returns the entries in input order and the failure count.
pub async fn enrich_all(
    pages: &dyn PageSource,
    listings: Vec<ProductListing>,
) -> Result<(Vec<ProductListing>, usize)> {
    let pb = progress_bar(listings.len(), "details")?;
    let results = join_all(listings.into_iter().map(|listing| {
        let pb = pb.clone();
        async move {
            let result = enrich(pages, listing).await;
            pb.inc(1);
            result
        }
    }))
    .await;
    pb.finish_and_clear();

    let failures = results.iter().filter(|(_, ok)| !ok).count();
    Ok((results.into_iter().map(|(l, _)| l).collect(), failures))
}

// ── Persistence ──

pub fn product_properties(product: &ProductListing, translated: &str, schema: Schema) -> Properties {
    let name = if product.name.is_empty() { "Untitled" } else { product.name.as_str() };

    let mut props = Properties::new();
    props.insert(NAME.into(), PropertyValue::Title(name.to_string()));
    props.insert(DESCRIPTION.into(), PropertyValue::RichText(translated.to_string()));
    props.insert(REVENUE.into(), PropertyValue::Number(product.revenue_value()));
    props.insert(URL.into(), PropertyValue::Url(product.link.clone()));
    if product.has_http_thumbnail() {
        props.insert(
            THUMBNAIL.into(),
            PropertyValue::ExternalFile {
                name: if product.name.is_empty() { "thumbnail".into() } else { product.name.clone() },
                url: product.thumbnail_url.trim().to_string(),
            },
        );
    }
    if schema == Schema::Verified {
        props.insert(VERIFIED.into(), PropertyValue::Checkbox(product.is_verified));
    }
    props
}

/// Parsed analysis, or the raw text as one paragraph when nothing parsed.
pub fn analysis_blocks(analysis: &str) -> Vec<Block> {
    let blocks = parse_blocks(analysis);
    if blocks.is_empty() {
        return vec![Block::Paragraph(vec![TextSpan::plain(analysis)])];
    }
    blocks
}

pub fn description_line(date: &str, created: usize) -> String {
    format!("Last updated: {date}, {created} new entries")
}

/// Landing-page summary for the analysis prompt; empty on any failure.
async fn website_context(pages: &dyn PageSource, product: &ProductListing) -> String {
    if !product.website_url.starts_with("http") {
        return String::new();
    }
    let url = match Url::parse(&product.website_url) {
        Ok(url) => url,
        Err(_) => return String::new(),
    };
    match pages.load(&url, &LoadProfile::WEBSITE).await {
        Ok(snapshot) => {
            let summary = extract_website_summary(&snapshot);
            if summary.is_empty() {
                debug!(url = %url, "website had nothing to summarize");
            }
            summary.to_string()
        }
        Err(e) => {
            warn!(url = %url, "website visit failed: {e:#}");
            String::new()
        }
    }
}

/// Analyse, translate and store one new entry.
async fn publish(services: &Services<'_>, opts: &SyncOptions, product: &ProductListing) -> Result<String> {
    let website = if opts.website_context {
        website_context(services.pages, product).await
    } else {
        String::new()
    };

    let site = (!website.is_empty()).then_some(website.as_str());
    let (analysis, translated) = tokio::join!(
        analyze::analyze(services.model, product, site, &opts.language),
        analyze::translate(services.model, product, &opts.language),
    );
    let analysis = analysis.context("analysis failed")?;
    let translated = translated.context("translation failed")?;

    let props = product_properties(product, &translated, opts.schema);
    let blocks = analysis_blocks(&analysis);
    let page_id = services
        .store
        .create_page(&opts.database_id, &props, &blocks)
        .await
        .context("page create failed")?;
    Ok(page_id)
}

async fn refresh_verification(
    store: &dyn DocumentStore,
    stored: &[(String, ProductListing)],
) -> (usize, usize) {
    let results = join_all(stored.iter().map(|(page_id, product)| async move {
        let value = PropertyValue::Checkbox(product.is_verified);
        match store.update_page_property(page_id, VERIFIED, &value).await {
            Ok(()) => true,
            Err(e) => {
                warn!(link = %product.link, "verification refresh failed: {e}");
                false
            }
        }
    }))
    .await;
    let ok = results.iter().filter(|ok| **ok).count();
    (ok, results.len() - ok)
}

// ── Run ──

/// Listing → dedup → details → analysis → store, with per-entry isolation.
pub async fn sync(services: &Services<'_>, opts: &SyncOptions) -> Result<SyncSummary> {
    let stored = services
        .store
        .query_all_pages(&opts.database_id)
        .await
        .context("failed to read existing pages")?;
    let known: HashMap<String, String> = stored
        .iter()
        .filter_map(|page| Some((page.url_property(URL)?.to_string(), page.id.clone())))
        .collect();
    info!(known = known.len(), "existing pages loaded");

    let mut listings = load_all_listings(services.pages).await?;
    let located = listings.len();
    listings.truncate(opts.limit.min(MAX_ENRICHED));
    let mut summary = SyncSummary {
        located,
        listed: listings.len(),
        ..Default::default()
    };

    let (mut fresh, existing): (Vec<_>, Vec<_>) = listings
        .into_iter()
        .partition(|l| opts.force || !known.contains_key(&l.link));
    summary.existing = existing.len();
    if let Some(max) = opts.max_new {
        fresh.truncate(max);
    }
    summary.new = fresh.len();
    info!(new = fresh.len(), existing = existing.len(), "deduplicated");

    // Existing entries are enriched only to refresh their verification flag.
    let refresh = opts.schema == Schema::Verified;
    let fresh_count = fresh.len();
    let mut to_enrich = fresh;
    if refresh {
        to_enrich.extend(existing);
    }

    let (enriched, detail_failures) = enrich_all(services.pages, to_enrich).await?;
    summary.detail_failures = detail_failures;
    let mut enriched = enriched.into_iter();
    let fresh: Vec<ProductListing> = enriched.by_ref().take(fresh_count).collect();

    if refresh {
        let stored: Vec<(String, ProductListing)> = enriched
            .filter_map(|l| Some((known.get(&l.link)?.clone(), l)))
            .collect();
        let (ok, failed) = refresh_verification(services.store, &stored).await;
        summary.refreshed = ok;
        summary.refresh_failures = failed;
    }

    let pb = progress_bar(fresh.len(), "publish")?;
    let outcomes = join_all(fresh.iter().map(|product| {
        let pb = pb.clone();
        async move {
            let outcome = publish(services, opts, product).await;
            pb.inc(1);
            (product, outcome)
        }
    }))
    .await;
    pb.finish_and_clear();

    for (product, outcome) in outcomes {
        match outcome {
            Ok(page_id) => {
                summary.created += 1;
                info!(name = %product.name, %page_id, "page created");
            }
            Err(e) => {
                summary.failed += 1;
                warn!(name = %product.name, link = %product.link, "entry failed: {e:#}");
            }
        }
    }

    if summary.created > 0 {
        let today = chrono::Local::now().format("%Y-%m-%d").to_string();
        let line = description_line(&today, summary.created);
        match services
            .store
            .update_database_description(&opts.database_id, &line)
            .await
        {
            Ok(()) => info!("database description: {line}"),
            Err(e) => warn!("database description update failed: {e}"),
        }
    }

    Ok(summary)
}


#[cfg(test)]
mod tests {
    use super::testing::{listing_html, product_url, StaticPages};
    use super::*;
    use crate::analyze::testing::ScriptedModel;
    use crate::notion::testing::MemoryStore;

    fn options(schema: Schema) -> SyncOptions {
        SyncOptions {
            database_id: "db".into(),
            schema,
            limit: 30,
            max_new: None,
            force: false,
            website_context: false,
            language: "Korean".into(),
        }
    }

    fn detail_html(revenue: &str, verified: bool) -> String {
        let badge = if verified {
            r#"<div class="product-card__revenue-explanation">Stripe-verified revenue</div>"#
        } else {
            ""
        };
        format!("<html><body><p>{revenue}/mo</p>{badge}</body></html>")
    }

    #[tokio::test]
    async fn fifty_entries_are_capped_to_thirty() {
        let slugs: Vec<String> = (0..50).map(|i| format!("p{i}")).collect();
        let refs: Vec<&str> = slugs.iter().map(String::as_str).collect();
        let pages = StaticPages::default().with(LISTING_URL, listing_html(&refs));
        let store = MemoryStore::default();
        let model = ScriptedModel::answering("## Analysis");
        let services = Services { pages: &pages, store: &store, model: &model };

        let mut opts = options(Schema::Basic);
        opts.limit = 100;
        let summary = sync(&services, &opts).await.unwrap();

        assert_eq!(summary.located, 50);
        assert_eq!(summary.listed, 30);
        // one listing load plus one detail visit per capped entry
        assert_eq!(pages.visit_count(), 31);
        assert!(pages.visited(&product_url("p29")));
        assert!(!pages.visited(&product_url("p30")));
        // details all failed (not served) but every entry was still published
        assert_eq!(summary.detail_failures, 30);
        assert_eq!(summary.created, 30);
    }

    #[tokio::test]
    async fn stored_urls_are_not_republished() {
        let pages = StaticPages::default()
            .with(LISTING_URL, listing_html(&["old", "new"]))
            .with(&product_url("new"), detail_html("$900", false));
        let store = MemoryStore::with_urls(&[&product_url("old")]);
        let model = ScriptedModel::answering("Plain analysis");
        let services = Services { pages: &pages, store: &store, model: &model };

        let summary = sync(&services, &options(Schema::Basic)).await.unwrap();

        assert_eq!(summary.existing, 1);
        assert_eq!(summary.new, 1);
        assert!(!pages.visited(&product_url("old")));

        let created = store.created();
        assert_eq!(created.len(), 1);
        let props = &created[0].properties;
        assert_eq!(props[URL], PropertyValue::Url(product_url("new")));
        assert_eq!(props[REVENUE], PropertyValue::Number(900.0));
        assert!(props.contains_key(THUMBNAIL));
        assert!(!props.contains_key(VERIFIED));
        assert_eq!(
            created[0].children,
            vec![Block::Paragraph(vec![TextSpan::plain("Plain analysis")])]
        );

        let descriptions = store.descriptions.lock().unwrap();
        assert_eq!(descriptions.len(), 1);
        assert!(descriptions[0].1.ends_with(", 1 new entries"));
    }

    #[tokio::test]
    async fn force_republishes_everything() {
        let pages = StaticPages::default().with(LISTING_URL, listing_html(&["old"]));
        let store = MemoryStore::with_urls(&[&product_url("old")]);
        let model = ScriptedModel::answering("x");
        let services = Services { pages: &pages, store: &store, model: &model };

        let mut opts = options(Schema::Basic);
        opts.force = true;
        let summary = sync(&services, &opts).await.unwrap();
        assert_eq!(summary.new, 1);
        assert_eq!(summary.created, 1);
    }

    #[tokio::test]
    async fn max_new_limits_published_entries() {
        let pages = StaticPages::default().with(LISTING_URL, listing_html(&["a", "b", "c"]));
        let store = MemoryStore::default();
        let model = ScriptedModel::answering("x");
        let services = Services { pages: &pages, store: &store, model: &model };

        let mut opts = options(Schema::Basic);
        opts.max_new = Some(2);
        let summary = sync(&services, &opts).await.unwrap();
        assert_eq!(summary.new, 2);
        assert_eq!(store.created().len(), 2);
    }

    #[tokio::test]
    async fn one_failing_entry_does_not_stop_siblings() {
        let pages = StaticPages::default().with(LISTING_URL, listing_html(&["good", "bad"]));
        let store = MemoryStore {
            reject_titles: vec!["bad".into()],
            ..Default::default()
        };
        let model = ScriptedModel::answering("x");
        let services = Services { pages: &pages, store: &store, model: &model };

        let summary = sync(&services, &options(Schema::Basic)).await.unwrap();
        assert_eq!(summary.created, 1);
        assert_eq!(summary.failed, 1);
    }

    #[tokio::test]
    async fn llm_failure_is_isolated_per_entry() {
        let pages = StaticPages::default().with(LISTING_URL, listing_html(&["alpha", "beta"]));
        let store = MemoryStore::default();
        let model = ScriptedModel::answering("ok").failing_on("about beta");
        let services = Services { pages: &pages, store: &store, model: &model };

        let summary = sync(&services, &options(Schema::Basic)).await.unwrap();
        assert_eq!(summary.created, 1);
        assert_eq!(summary.failed, 1);
        let created = store.created();
        assert_eq!(created[0].properties[NAME], PropertyValue::Title("alpha".into()));
    }

    #[tokio::test]
    async fn verified_schema_refreshes_existing_pages() {
        let pages = StaticPages::default()
            .with(LISTING_URL, listing_html(&["old", "new"]))
            .with(&product_url("old"), detail_html("$10", true))
            .with(&product_url("new"), detail_html("$20", true));
        let store = MemoryStore::with_urls(&[&product_url("old")]);
        let model = ScriptedModel::answering("x");
        let services = Services { pages: &pages, store: &store, model: &model };

        let summary = sync(&services, &options(Schema::Verified)).await.unwrap();
        assert_eq!(summary.refreshed, 1);
        assert_eq!(summary.created, 1);

        let updates = store.updates.lock().unwrap();
        assert_eq!(
            updates[0],
            ("page-0".to_string(), VERIFIED.to_string(), PropertyValue::Checkbox(true))
        );
        assert_eq!(store.created()[0].properties[VERIFIED], PropertyValue::Checkbox(true));
    }

    #[tokio::test]
    async fn website_summary_reaches_the_prompt() {
        let detail = r#"<html><body><a href="https://acme.io/">site</a></body></html>"#;
        let site = r#"<html><body><h1>Acme Landing</h1></body></html>"#;
        let pages = StaticPages::default()
            .with(LISTING_URL, listing_html(&["acme"]))
            .with(&product_url("acme"), detail)
            .with("https://acme.io/", site);
        let store = MemoryStore::default();
        let model = ScriptedModel::answering("x");
        let services = Services { pages: &pages, store: &store, model: &model };

        let mut opts = options(Schema::Verified);
        opts.website_context = true;
        sync(&services, &opts).await.unwrap();

        let prompts = model.prompts.lock().unwrap();
        assert!(prompts
            .iter()
            .any(|(p, _)| p.contains("[Product website]\nTitle: Acme Landing")));
    }

    #[tokio::test]
    async fn unreachable_listing_is_fatal() {
        let pages = StaticPages::default();
        let store = MemoryStore::default();
        let model = ScriptedModel::answering("x");
        let services = Services { pages: &pages, store: &store, model: &model };
        assert!(sync(&services, &options(Schema::Basic)).await.is_err());
    }

    #[tokio::test]
    async fn empty_listing_is_fatal() {
        let pages = StaticPages::default().with(LISTING_URL, "<html><body>Just a moment...</body></html>");
        let err = load_listing(&pages, 30).await.unwrap_err();
        assert!(err.to_string().contains("no product entries"));
    }

    #[tokio::test]
    async fn store_read_failure_is_fatal() {
        let pages = StaticPages::default().with(LISTING_URL, listing_html(&["a"]));
        let store = MemoryStore {
            fail_query: true,
            ..Default::default()
        };
        let model = ScriptedModel::answering("x");
        let services = Services { pages: &pages, store: &store, model: &model };
        assert!(sync(&services, &options(Schema::Basic)).await.is_err());
        assert_eq!(pages.visit_count(), 0);
    }

    #[test]
    fn untitled_and_non_http_thumbnail() {
        let mut p = ProductListing::new(product_url("x"));
        p.name = String::new();
        p.thumbnail_url = "data:image/png;base64,xx".into();
        let props = product_properties(&p, "desc", Schema::Basic);
        assert_eq!(props[NAME], PropertyValue::Title("Untitled".into()));
        assert!(!props.contains_key(THUMBNAIL));
        assert_eq!(props[DESCRIPTION], PropertyValue::RichText("desc".into()));
    }

    #[test]
    fn description_line_format() {
        assert_eq!(description_line("2024-05-01", 3), "Last updated: 2024-05-01, 3 new entries");
    }
}
