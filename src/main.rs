mod analyze;
mod browser;
mod config;
mod extract;
mod llm;
mod notion;
mod parser;
mod pipeline;
mod product;
mod report;

use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use tracing::{info, warn};

use crate::browser::{ChromiumSource, PageSource};
use crate::config::{require, Config};
use crate::llm::OpenAiClient;
use crate::notion::NotionClient;
use crate::pipeline::{Schema, Services, SyncOptions, MAX_ENRICHED};
use crate::report::clip;

#[derive(Parser)]
#[command(name = "ih_sync", about = "Indie Hackers products to Notion, with LLM analysis")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape the listing (and detail pages) and print a table
    Scrape {
        /// Max entries to show
        #[arg(short = 'n', long, default_value = "30")]
        limit: usize,
        /// Skip detail page visits
        #[arg(long)]
        no_details: bool,
    },
    /// Sync new products into NOTION_DB_ID
    Sync {
        /// Publish at most this many new entries
        #[arg(long)]
        max_new: Option<usize>,
        /// Skip the stored-URL check and publish every listed entry
        #[arg(long)]
        force: bool,
    },
    /// Sync into NOTION_DB_ID_2, refreshing Stripe verification on stored pages
    Latest {
        /// Listing entries to consider (at most 30)
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
    /// Build the daily trend report
    Report {
        /// Listing entries to include
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let config = Config::load();
    preflight(&cli.command, &config)?;

    let browser = ChromiumSource::launch(&config.browser_settings()).await?;
    let result = run(cli.command, &config, &browser).await;
    if let Err(e) = browser.shutdown().await {
        warn!("browser shutdown failed: {e:#}");
    }

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

async fn run(command: Commands, config: &Config, pages: &dyn PageSource) -> anyhow::Result<()> {
    match command {
        Commands::Scrape { limit, no_details } => {
            let cap = if no_details { limit } else { limit.min(MAX_ENRICHED) };
            let mut products = pipeline::load_listing(pages, cap).await?;
            if !no_details {
                let (enriched, failures) = pipeline::enrich_all(pages, products).await?;
                if failures > 0 {
                    println!("{} detail pages failed; listing values kept.", failures);
                }
                products = enriched;
            }

            println!(
                "{:>3} | {:<28} | {:>10} | {:<3} | {:<44}",
                "#", "Product", "MRR", "Ver", "Description"
            );
            println!("{}", "-".repeat(100));
            for (i, p) in products.iter().enumerate() {
                println!(
                    "{:>3} | {:<28} | {:>10} | {:<3} | {:<44}",
                    i + 1,
                    clip(&p.name, 28),
                    format!("${}", p.revenue),
                    if p.is_verified { "yes" } else { "" },
                    clip(&p.description, 44),
                );
            }
            let verified = products.iter().filter(|p| p.is_verified).count();
            println!("\n{} products | {} Stripe verified", products.len(), verified);
            Ok(())
        }
        Commands::Sync { max_new, force } => {
            let opts = SyncOptions {
                database_id: require(&config.database_id, "NOTION_DB_ID")?.to_string(),
                schema: Schema::Basic,
                limit: MAX_ENRICHED,
                max_new,
                force,
                website_context: false,
                language: config.language.clone(),
            };
            run_sync(config, pages, &opts).await
        }
        Commands::Latest { limit } => {
            let opts = SyncOptions {
                database_id: require(&config.verified_database_id, "NOTION_DB_ID_2")?.to_string(),
                schema: Schema::Verified,
                limit: limit.min(MAX_ENRICHED),
                max_new: None,
                force: false,
                website_context: true,
                language: config.language.clone(),
            };
            run_sync(config, pages, &opts).await
        }
        Commands::Report { limit } => {
            let model = language_model(config)?;
            let report = report::generate(pages, &model, limit, &config.language).await?;
            match (&config.report_database_id, &config.report_page_id) {
                (Some(db), _) => {
                    let store = NotionClient::new(require(&config.notion_api_key, "NOTION_API_KEY")?)?;
                    let page_id = report::publish(&store, db, &report).await?;
                    println!("Stored \"{}\" as page {}", report.title, page_id);
                }
                (None, Some(page_id)) => {
                    let store = NotionClient::new(require(&config.notion_api_key, "NOTION_API_KEY")?)?;
                    report::replace(&store, page_id, &report).await?;
                    println!("Replaced the content of page {}", page_id);
                }
                (None, None) => println!("{}", report.markdown),
            }
            Ok(())
        }
    }
}

/// Fail on missing configuration before any browser is launched.
fn preflight(command: &Commands, config: &Config) -> anyhow::Result<()> {
    match command {
        Commands::Scrape { .. } => {}
        Commands::Sync { .. } => {
            require(&config.database_id, "NOTION_DB_ID")?;
            require(&config.notion_api_key, "NOTION_API_KEY")?;
            require(&config.openai_api_key, "OPENAI_API_KEY")?;
        }
        Commands::Latest { .. } => {
            require(&config.verified_database_id, "NOTION_DB_ID_2")?;
            require(&config.notion_api_key, "NOTION_API_KEY")?;
            require(&config.openai_api_key, "OPENAI_API_KEY")?;
        }
        Commands::Report { .. } => {
            require(&config.openai_api_key, "OPENAI_API_KEY")?;
            if config.report_database_id.is_some() || config.report_page_id.is_some() {
                require(&config.notion_api_key, "NOTION_API_KEY")?;
            }
        }
    }
    Ok(())
}

async fn run_sync(config: &Config, pages: &dyn PageSource, opts: &SyncOptions) -> anyhow::Result<()> {
    let store = NotionClient::new(require(&config.notion_api_key, "NOTION_API_KEY")?)?;
    let model = language_model(config)?;
    let services = Services {
        pages,
        store: &store,
        model: &model,
    };
    let summary = pipeline::sync(&services, opts).await?;
    summary.print();
    Ok(())
}

fn language_model(config: &Config) -> anyhow::Result<OpenAiClient> {
    let client = OpenAiClient::new(
        require(&config.openai_api_key, "OPENAI_API_KEY")?,
        config.openai_model.clone(),
    )?;
    info!(model = client.model(), language = %config.language, "language model ready");
    Ok(client)
}

/// `1.5s`, `2m 5s` or `1h 2m 5s`.
fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let (h, m, s) = (secs / 3600, secs / 60 % 60, secs % 60);
    match (h, m) {
        (0, 0) => format!("{:.1}s", d.as_secs_f64()),
        (0, _) => format!("{m}m {s}s"),
        _ => format!("{h}h {m}m {s}s"),
    }
}
