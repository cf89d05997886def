//! Notion database access: the store trait the pipeline talks to and the
//! REST client behind it.

pub mod wire;

use async_trait::async_trait;
use reqwest::{header, Client, Method};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::parser::Block;
pub use wire::{Properties, PropertyValue};

const DEFAULT_BASE_URL: &str = "https://api.notion.com/v1";
const NOTION_VERSION: &str = "2022-06-28";
const PAGE_SIZE: usize = 100;
/// Children accepted per create or append call.
const MAX_CHILDREN_PER_REQUEST: usize = 100;

#[derive(Debug, Error)]
pub enum NotionError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// A page as returned by a database query.
#[derive(Debug, Clone, Deserialize)]
pub struct StoredPage {
    pub id: String,
    #[serde(default)]
    pub properties: Value,
}

impl StoredPage {
    /// Value of the `url` property named `name`, if set.
    pub fn url_property(&self, name: &str) -> Option<&str> {
        self.properties.get(name)?.get("url")?.as_str()
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn query_all_pages(&self, database_id: &str) -> Result<Vec<StoredPage>, NotionError>;

    /// Create one page with its content; returns the new page id.
    async fn create_page(
        &self,
        database_id: &str,
        properties: &Properties,
        children: &[Block],
    ) -> Result<String, NotionError>;

    async fn update_page_property(
        &self,
        page_id: &str,
        name: &str,
        value: &PropertyValue,
    ) -> Result<(), NotionError>;

    async fn update_database_description(
        &self,
        database_id: &str,
        text: &str,
    ) -> Result<(), NotionError>;

    /// Delete every child block of an existing page, then append `children`.
    async fn replace_page_content(&self, page_id: &str, children: &[Block]) -> Result<(), NotionError>;
}

#[derive(Clone)]
pub struct NotionClient {
    http_client: Client,
    api_key: String,
    base_url: String,
}

#[derive(Deserialize)]
struct QueryResponse {
    results: Vec<StoredPage>,
    #[serde(default)]
    has_more: bool,
    next_cursor: Option<String>,
}

#[derive(Deserialize)]
struct CreatedPage {
    id: String,
}

#[derive(Deserialize)]
struct ChildBlock {
    id: String,
}

#[derive(Deserialize)]
struct ChildrenResponse {
    results: Vec<ChildBlock>,
    #[serde(default)]
    has_more: bool,
    next_cursor: Option<String>,
}

impl NotionClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self, NotionError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(NotionError::Config("NOTION_API_KEY is empty".into()));
        }
        Ok(Self {
            http_client: Client::new(),
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    async fn send(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value, NotionError> {
        let mut request = self
            .http_client
            .request(method.clone(), format!("{}{}", self.base_url, path))
            .header(header::AUTHORIZATION, format!("Bearer {}", self.api_key))
            .header("Notion-Version", NOTION_VERSION);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request
            .send()
            .await
            .map_err(|e| NotionError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(%method, path, %status, "notion request failed");
            return Err(NotionError::Api(format!("{status}: {text}")));
        }

        response
            .json()
            .await
            .map_err(|e| NotionError::Parse(format!("Failed to parse response: {e}")))
    }

    /// Append blocks under `block_id`, at most 100 per request, in order.
    async fn append_children(&self, block_id: &str, children: &[Value]) -> Result<(), NotionError> {
        let path = format!("/blocks/{block_id}/children");
        for batch in children.chunks(MAX_CHILDREN_PER_REQUEST) {
            self.send(Method::PATCH, &path, Some(&json!({ "children": batch })))
                .await?;
        }
        Ok(())
    }

    async fn list_children(&self, block_id: &str) -> Result<Vec<String>, NotionError> {
        let mut ids = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut path = format!("/blocks/{block_id}/children?page_size={PAGE_SIZE}");
            if let Some(c) = &cursor {
                path.push_str(&format!("&start_cursor={c}"));
            }
            let raw = self.send(Method::GET, &path, None).await?;
            let batch: ChildrenResponse = serde_json::from_value(raw)
                .map_err(|e| NotionError::Parse(format!("Unexpected children response: {e}")))?;
            ids.extend(batch.results.into_iter().map(|b| b.id));

            match (batch.has_more, batch.next_cursor) {
                (true, Some(next)) => cursor = Some(next),
                _ => break,
            }
        }
        Ok(ids)
    }
}

#[async_trait]
impl DocumentStore for NotionClient {
    async fn query_all_pages(&self, database_id: &str) -> Result<Vec<StoredPage>, NotionError> {
        let path = format!("/databases/{database_id}/query");
        let mut pages = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut body = json!({ "page_size": PAGE_SIZE });
            if let Some(c) = &cursor {
                body["start_cursor"] = json!(c);
            }
            let raw = self.send(Method::POST, &path, Some(&body)).await?;
            let batch: QueryResponse = serde_json::from_value(raw)
                .map_err(|e| NotionError::Parse(format!("Unexpected query response: {e}")))?;

            debug!(database_id, batch = batch.results.len(), "queried pages");
            pages.extend(batch.results);

            match (batch.has_more, batch.next_cursor) {
                (true, Some(next)) => cursor = Some(next),
                _ => break,
            }
        }

        Ok(pages)
    }

    async fn create_page(
        &self,
        database_id: &str,
        properties: &Properties,
        children: &[Block],
    ) -> Result<String, NotionError> {
        let children = wire::blocks(children);
        let split = children.len().min(MAX_CHILDREN_PER_REQUEST);
        let (first, rest) = children.split_at(split);

        let body = json!({
            "parent": { "database_id": database_id },
            "properties": wire::properties(properties),
            "children": first,
        });
        let raw = self.send(Method::POST, "/pages", Some(&body)).await?;
        let created: CreatedPage = serde_json::from_value(raw)
            .map_err(|e| NotionError::Parse(format!("Unexpected create response: {e}")))?;

        // A page missing part of its content must not stay in the database.
        if let Err(e) = self.append_children(&created.id, rest).await {
            let archive = json!({ "archived": true });
            let path = format!("/pages/{}", created.id);
            if let Err(archive_err) = self.send(Method::PATCH, &path, Some(&archive)).await {
                warn!(page_id = %created.id, "archiving partial page failed: {archive_err}");
            }
            return Err(e);
        }

        Ok(created.id)
    }

    async fn update_page_property(
        &self,
        page_id: &str,
        name: &str,
        value: &PropertyValue,
    ) -> Result<(), NotionError> {
        let body = json!({ "properties": { name: wire::property(value) } });
        self.send(Method::PATCH, &format!("/pages/{page_id}"), Some(&body))
            .await?;
        Ok(())
    }

    async fn update_database_description(
        &self,
        database_id: &str,
        text: &str,
    ) -> Result<(), NotionError> {
        let body = json!({ "description": wire::plain_rich_text(text) });
        self.send(Method::PATCH, &format!("/databases/{database_id}"), Some(&body))
            .await?;
        Ok(())
    }

    async fn replace_page_content(&self, page_id: &str, children: &[Block]) -> Result<(), NotionError> {
        let existing = self.list_children(page_id).await?;
        debug!(page_id, blocks = existing.len(), "clearing page");
        for id in &existing {
            // A block that cannot be deleted is left behind; the new content still goes in.
            if let Err(e) = self.send(Method::DELETE, &format!("/blocks/{id}"), None).await {
                warn!(block_id = %id, "block delete failed: {e}");
            }
        }
        self.append_children(page_id, &wire::blocks(children)).await
    }
}
