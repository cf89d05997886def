use std::path::PathBuf;

use anyhow::{anyhow, Result};

use crate::browser::BrowserSettings;
use crate::llm::DEFAULT_MODEL;

const DEFAULT_LANGUAGE: &str = "Korean";

/// Settings read once from the environment (and `.env`, when present).
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub notion_api_key: Option<String>,
    pub database_id: Option<String>,
    pub verified_database_id: Option<String>,
    pub report_database_id: Option<String>,
    pub report_page_id: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub language: String,
    pub chrome_path: Option<PathBuf>,
    pub headless: bool,
}

impl Config {
    pub fn load() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        Self {
            notion_api_key: get("NOTION_API_KEY"),
            database_id: get("NOTION_DB_ID"),
            verified_database_id: get("NOTION_DB_ID_2"),
            report_database_id: get("NOTION_REPORT_DB_ID"),
            report_page_id: get("NOTION_REPORT_PAGE_ID"),
            openai_api_key: get("OPENAI_API_KEY"),
            openai_model: get("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            language: get("ANALYSIS_LANGUAGE").unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
            chrome_path: get("CHROME_PATH").map(PathBuf::from),
            headless: get("HEADLESS").is_some_and(|v| is_truthy(&v)),
        }
    }

    pub fn browser_settings(&self) -> BrowserSettings {
        BrowserSettings {
            chrome_path: self.chrome_path.clone(),
            headless: self.headless,
        }
    }
}

fn is_truthy(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

/// The value, or an error naming the missing variable.
pub fn require<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str> {
    value
        .as_deref()
        .ok_or_else(|| anyhow!("{name} is not set (environment or .env)"))
}
