//! Daily markdown report over the listing page.

use anyhow::{Context, Result};
use tracing::info;

use crate::analyze::summarize_trends;
use crate::browser::PageSource;
use crate::llm::LanguageModel;
use crate::notion::{DocumentStore, Properties, PropertyValue};
use crate::parser::parse_blocks;
use crate::pipeline::{load_listing, NAME};
use crate::product::ProductListing;

const BUILD_BOARD_SIZE: usize = 5;
const DATABASE_ROWS: usize = 20;
const BOARD_DESCRIPTION_CHARS: usize = 50;
const TABLE_DESCRIPTION_CHARS: usize = 40;

#[derive(Debug, Clone)]
pub struct Report {
    pub title: String,
    pub markdown: String,
}

/// `1234.5` → `1,234.5`.
fn money(value: f64) -> String {
    let raw = format!("{}", value);
    let (int, frac) = raw.split_once('.').unwrap_or((raw.as_str(), ""));
    let digits: Vec<char> = int.chars().collect();
    let mut grouped = String::new();
    for (i, c) in digits.iter().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(*c);
    }
    if frac.is_empty() {
        format!("${grouped}")
    } else {
        format!("${grouped}.{frac}")
    }
}

fn verification(p: &ProductListing) -> &'static str {
    if p.is_verified {
        "✅ Stripe Verified"
    } else {
        "Self-reported"
    }
}

/// First `max` chars, with `...` when anything was cut.
pub fn clip(text: &str, max: usize) -> String {
    let clipped: String = text.chars().take(max).collect();
    if text.chars().count() > max {
        format!("{clipped}...")
    } else {
        clipped
    }
}

/// Top entries with revenue or a verified badge; empty when none qualify.
pub fn build_board(products: &[ProductListing]) -> String {
    let top: Vec<&ProductListing> = products
        .iter()
        .filter(|p| p.revenue_value() > 0.0 || p.is_verified)
        .take(BUILD_BOARD_SIZE)
        .collect();
    if top.is_empty() {
        return String::new();
    }

    let mut section = String::from("## 🧩 The Build Board\n\n");
    section.push_str("Today's top products by reported revenue or verification\n\n");
    section.push_str("| Rank | Product | Description | MRR | Verification |\n");
    section.push_str("|------|---------|-------------|-----|--------------|\n");
    for (i, p) in top.iter().enumerate() {
        section.push_str(&format!(
            "| {} | {} | {} | {} | {} |\n",
            i + 1,
            p.name,
            clip(&p.description, BOARD_DESCRIPTION_CHARS),
            money(p.revenue_value()),
            verification(p),
        ));
    }
    section.push('\n');
    section
}

pub fn products_table(products: &[ProductListing]) -> String {
    let mut section = String::from("## 📦 Products Database\n\n");
    section.push_str("Products registered by indie makers, mostly with self-reported MRR\n\n");
    section.push_str("| Product | Description | MRR | Verification |\n");
    section.push_str("|---------|-------------|-----|--------------|\n");
    for p in products.iter().take(DATABASE_ROWS) {
        section.push_str(&format!(
            "| {} | {} | {} | {} |\n",
            p.name,
            clip(&p.description, TABLE_DESCRIPTION_CHARS),
            money(p.revenue_value()),
            verification(p),
        ));
    }
    section.push('\n');
    section
}

pub fn render(date: &str, products: &[ProductListing], trends: &str) -> String {
    let mut report = String::from("# IndieHackers Daily Report\n\n");
    report.push_str(&format!("**Generated**: {date}\n\n---\n\n"));

    let board = build_board(products);
    if !board.is_empty() {
        report.push_str(&board);
        report.push_str("---\n\n");
    }

    report.push_str(&products_table(products));
    report.push_str("---\n\n");
    report.push_str(trends);
    report
}

pub fn title(date: &str) -> String {
    format!("IndieHackers Report - {date}")
}

/// Listing only, no detail visits; the trend summary never fails the report.
pub async fn generate(
    pages: &dyn PageSource,
    model: &dyn LanguageModel,
    limit: usize,
    language: &str,
) -> Result<Report> {
    let products = load_listing(pages, limit).await?;
    info!(products = products.len(), "building report");

    let trends = summarize_trends(model, &products, language).await;
    let date = chrono::Local::now().format("%Y-%m-%d").to_string();
    Ok(Report {
        title: title(&date),
        markdown: render(&date, &products, &trends),
    })
}

pub async fn publish(store: &dyn DocumentStore, database_id: &str, report: &Report) -> Result<String> {
    let mut props = Properties::new();
    props.insert(NAME.into(), PropertyValue::Title(report.title.clone()));
    let blocks = parse_blocks(&report.markdown);
    store
        .create_page(database_id, &props, &blocks)
        .await
        .context("failed to store report")
}

/// Overwrite a standing report page with this report's blocks.
pub async fn replace(store: &dyn DocumentStore, page_id: &str, report: &Report) -> Result<()> {
    let blocks = parse_blocks(&report.markdown);
    store
        .replace_page_content(page_id, &blocks)
        .await
        .context("failed to replace report page")
}
