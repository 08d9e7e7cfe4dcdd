// Reference tools backed by an item store

use crate::config::{GatewayConfig, ServerInfoConfig};
use crate::dispatch::Dispatcher;
use crate::registry::{
    Page, PageRequest, Pagination, RegistryError, ToolDescriptor, ToolError, ToolHandler, ToolOutput,
    ToolRegistry,
};
use crate::schema::{InputSchema, PropertySchema};
use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::path::Path;
use std::sync::Arc;

/// Full item record, as returned by `get_item`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: String,
    pub title: String,
    pub summary: String,
    pub body: String,
    pub score: f64,
    pub created_at: String,
    pub updated_at: String,
    pub url: String,
    pub metadata: ItemMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemMetadata {
    pub author: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Item {
    /// Compact form used in search listings
    pub fn search_hit(&self) -> Value {
        json!({
            "id": self.id,
            "title": self.title,
            "summary": self.summary,
            "score": self.score,
        })
    }

    fn matches(&self, needle: &str) -> bool {
        self.title.to_lowercase().contains(needle)
            || self.summary.to_lowercase().contains(needle)
            || self
                .metadata
                .tags
                .iter()
                .any(|tag| tag.to_lowercase().contains(needle))
    }
}

/// Downstream data source for the item tools
#[async_trait::async_trait]
pub trait ItemStore: Send + Sync {
    /// All items matching `query`, best first
    async fn search(&self, query: &str) -> Result<Vec<Item>>;

    async fn get(&self, id: &str) -> Result<Option<Item>>;
}

pub struct InMemoryItemStore {
    items: Vec<Item>,
}

impl InMemoryItemStore {
    pub fn new(items: Vec<Item>) -> Self {
        Self { items }
    }

    /// Load items from a JSON array file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read seed file {}", path.display()))?;
        let items: Vec<Item> =
            serde_json::from_str(&content).context("Failed to parse seed file")?;
        Ok(Self::new(items))
    }

    pub fn with_sample_items() -> Self {
        Self::new(sample_items())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[async_trait::async_trait]
impl ItemStore for InMemoryItemStore {
    async fn search(&self, query: &str) -> Result<Vec<Item>> {
        let needle = query.to_lowercase();
        let mut hits: Vec<Item> = self
            .items
            .iter()
            .filter(|item| item.matches(&needle))
            .cloned()
            .collect();
        // Stable order so offsets mean the same thing on every call
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        Ok(hits)
    }

    async fn get(&self, id: &str) -> Result<Option<Item>> {
        Ok(self.items.iter().find(|item| item.id == id).cloned())
    }
}

fn sample_items() -> Vec<Item> {
    let make = |id: &str, title: &str, summary: &str, score: f64, tags: &[&str]| Item {
        id: id.to_string(),
        title: title.to_string(),
        summary: summary.to_string(),
        body: format!("{} This record ships with the gateway as sample data.", summary),
        score,
        created_at: "2025-10-08T08:00:00Z".to_string(),
        updated_at: "2025-10-08T08:30:00Z".to_string(),
        url: format!("https://example.com/items/{}", id),
        metadata: ItemMetadata {
            author: "Sample Author".to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
        },
    };

    vec![
        make(
            "item_001",
            "Building tool-using AI agents",
            "How agents discover and call tools over MCP.",
            0.95,
            &["ai", "agents", "mcp"],
        ),
        make(
            "item_002",
            "Pagination patterns for AI search APIs",
            "Opaque cursors versus page numbers.",
            0.87,
            &["ai", "search", "pagination"],
        ),
        make(
            "item_003",
            "Rate limiting with sliding windows",
            "Bounding request rates per client.",
            0.76,
            &["networking", "quotas"],
        ),
    ]
}

/// `search_items`: paginated full-text lookup
pub struct SearchItemsTool {
    store: Arc<dyn ItemStore>,
}

impl SearchItemsTool {
    pub fn new(store: Arc<dyn ItemStore>) -> Self {
        Self { store }
    }

    pub fn descriptor() -> ToolDescriptor {
        ToolDescriptor::new(
            "search_items",
            "Search for items in the database. Returns a list of matching items with pagination support.",
            InputSchema::object()
                .required_property(
                    "query",
                    PropertySchema::string("Search query string").min_length(1),
                )
                .property(
                    "limit",
                    PropertySchema::integer("Maximum number of results to return")
                        .range(1.0, 50.0)
                        .with_default(json!(10)),
                )
                .property(
                    "cursor",
                    PropertySchema::string("Pagination cursor for fetching next page"),
                ),
        )
        .paginated(Pagination::new("cursor").page_size("limit"))
    }
}

#[async_trait::async_trait]
impl ToolHandler for SearchItemsTool {
    async fn call(&self, arguments: Map<String, Value>, page: Option<PageRequest>) -> Result<ToolOutput, ToolError> {
        let query = arguments.get("query").and_then(Value::as_str).unwrap_or_default();
        let limit = arguments.get("limit").and_then(Value::as_f64).unwrap_or(10.0) as usize;
        let offset = page.map_or(0, |p| p.offset) as usize;

        let hits = self.store.search(query).await?;
        let total = hits.len();
        let end = offset.saturating_add(limit).min(total);
        let items = hits
            .get(offset..end)
            .unwrap_or_default()
            .iter()
            .map(Item::search_hit)
            .collect();

        Ok(ToolOutput::Page(Page {
            items,
            next_offset: (end < total).then_some(end as u64),
            total: total as u64,
        }))
    }
}

/// `get_item`: fetch one full record
pub struct GetItemTool {
    store: Arc<dyn ItemStore>,
}

impl GetItemTool {
    pub fn new(store: Arc<dyn ItemStore>) -> Self {
        Self { store }
    }

    pub fn descriptor() -> ToolDescriptor {
        ToolDescriptor::new(
            "get_item",
            "Retrieve a single item by its ID. Returns detailed information about the item.",
            InputSchema::object().required_property(
                "id",
                PropertySchema::string("Unique identifier of the item").min_length(1),
            ),
        )
    }
}

#[async_trait::async_trait]
impl ToolHandler for GetItemTool {
    async fn call(&self, arguments: Map<String, Value>, _page: Option<PageRequest>) -> Result<ToolOutput, ToolError> {
        let id = arguments.get("id").and_then(Value::as_str).unwrap_or_default();

        match self.store.get(id).await? {
            Some(item) => {
                let record = serde_json::to_value(&item).context("Failed to serialize item")?;
                Ok(ToolOutput::Value(record))
            }
            None => Err(ToolError::NotFound("Item".to_string())),
        }
    }
}

/// `health`: static liveness report
pub struct HealthTool {
    server: ServerInfoConfig,
}

impl HealthTool {
    pub fn new(server: ServerInfoConfig) -> Self {
        Self { server }
    }

    pub fn descriptor() -> ToolDescriptor {
        ToolDescriptor::new(
            "health",
            "Check the health status of the server and any upstream dependencies.",
            InputSchema::object(),
        )
    }
}

#[async_trait::async_trait]
impl ToolHandler for HealthTool {
    async fn call(&self, _arguments: Map<String, Value>, _page: Option<PageRequest>) -> Result<ToolOutput, ToolError> {
        Ok(ToolOutput::Value(json!({
            "status": "healthy",
            "server": self.server.name,
            "version": self.server.version,
            "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        })))
    }
}

/// Register `search_items`, `get_item` and `health`, in that order
pub fn register_builtin_tools(
    registry: &mut ToolRegistry,
    store: Arc<dyn ItemStore>,
    server: &ServerInfoConfig,
) -> Result<(), RegistryError> {
    registry.register(
        SearchItemsTool::descriptor(),
        Arc::new(SearchItemsTool::new(store.clone())),
    )?;
    registry.register(GetItemTool::descriptor(), Arc::new(GetItemTool::new(store)))?;
    registry.register(
        HealthTool::descriptor(),
        Arc::new(HealthTool::new(server.clone())),
    )?;
    Ok(())
}

/// Build the shared dispatcher from configuration.
///
/// Any registration problem aborts startup here instead of surfacing per request.
pub fn build_dispatcher(config: &GatewayConfig) -> Result<Dispatcher> {
    let store = match &config.catalog.seed_file {
        Some(path) => InMemoryItemStore::from_file(path)?,
        None => InMemoryItemStore::with_sample_items(),
    };
    tracing::info!("Item catalog loaded with {} item(s)", store.len());

    let mut registry = ToolRegistry::new();
    register_builtin_tools(&mut registry, Arc::new(store), &config.server)
        .context("Failed to register tools")?;
    tracing::info!("Registered {} tools", registry.len());

    Ok(Dispatcher::new(registry, &config.dispatch))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_search_matches_title_summary_and_tags() {
        let store = InMemoryItemStore::with_sample_items();

        let ids = |items: Vec<Item>| items.into_iter().map(|i| i.id).collect::<Vec<_>>();
        assert_eq!(ids(store.search("AI").await.unwrap()), vec!["item_001", "item_002"]);
        assert_eq!(ids(store.search("quotas").await.unwrap()), vec!["item_003"]);
        assert_eq!(ids(store.search("cursors").await.unwrap()), vec!["item_002"]);
        assert!(store.search("zebra").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_tool_pages() {
        let tool = SearchItemsTool::new(Arc::new(InMemoryItemStore::with_sample_items()));
        let mut arguments = Map::new();
        arguments.insert("query".into(), json!("ai"));
        arguments.insert("limit".into(), json!(1));

        let first = tool.call(arguments.clone(), Some(PageRequest { offset: 0 })).await.unwrap();
        let ToolOutput::Page(first) = first else { panic!("expected a page") };
        assert_eq!(first.items.len(), 1);
        assert_eq!(first.next_offset, Some(1));
        assert_eq!(first.total, 2);

        let last = tool.call(arguments.clone(), Some(PageRequest { offset: 1 })).await.unwrap();
        let ToolOutput::Page(last) = last else { panic!("expected a page") };
        assert_eq!(last.items[0]["id"], "item_002");
        assert_eq!(last.next_offset, None);

        let past_end = tool.call(arguments, Some(PageRequest { offset: 9 })).await.unwrap();
        let ToolOutput::Page(past_end) = past_end else { panic!("expected a page") };
        assert!(past_end.items.is_empty());
        assert_eq!(past_end.next_offset, None);
    }

    #[test]
    fn test_search_hit_shape() {
        let hit = sample_items()[0].search_hit();
        let mut keys: Vec<_> = hit.as_object().unwrap().keys().cloned().collect();
        keys.sort();
        assert_eq!(keys, vec!["id", "score", "summary", "title"]);
    }

    #[test]
    fn test_seed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let items = serde_json::to_string(&sample_items()[..1]).unwrap();
        write!(file, "{}", items).unwrap();

        let store = InMemoryItemStore::from_file(file.path()).unwrap();
        assert_eq!(store.len(), 1);

        let mut bad = tempfile::NamedTempFile::new().unwrap();
        write!(bad, "{{\"not\": \"a list\"}}").unwrap();
        assert!(InMemoryItemStore::from_file(bad.path()).is_err());
    }

    #[test]
    fn test_build_dispatcher_registers_all_tools() {
        let dispatcher = build_dispatcher(&GatewayConfig::default()).unwrap();
        assert_eq!(dispatcher.registry().len(), 3);
        assert!(dispatcher.registry().resolve("search_items").unwrap().descriptor.is_paginated());
        assert!(!dispatcher.registry().resolve("get_item").unwrap().descriptor.is_paginated());
    }

    #[test]
    fn test_register_twice_fails() {
        let store: Arc<dyn ItemStore> = Arc::new(InMemoryItemStore::with_sample_items());
        let mut registry = ToolRegistry::new();
        register_builtin_tools(&mut registry, store.clone(), &ServerInfoConfig::default()).unwrap();
        let err = register_builtin_tools(&mut registry, store, &ServerInfoConfig::default()).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateName(name) if name == "search_items"));
    }
}
