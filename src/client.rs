//! External collaborator contracts: the remote workspace API and the
//! Markdown/block converter. The core depends only on these traits; concrete
//! implementations (HTTP wire client, Markdown parser) live outside this
//! crate (§6 of the design spec).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::CoreError;

/// Opaque page returned by the remote workspace API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub id: String,
    pub parent_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub properties: serde_json::Value,
}

/// Opaque block returned by the remote workspace API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: String,
    pub kind: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Opaque tabular record returned by a table query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    #[serde(default)]
    pub fields: serde_json::Value,
}

/// A table's schema/metadata, independent of its rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    pub id: String,
    pub title: String,
}

/// One page of a `query_table` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordPage {
    pub records: Vec<Record>,
    pub has_more: bool,
    pub next_cursor: Option<String>,
}

/// Query parameters for a single `query_table` page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryRequest {
    pub page_size: usize,
    pub cursor: Option<String>,
}

/// A child listing page of `stream_descendant_pages`'s underlying API call.
#[derive(Debug, Clone)]
pub struct ChildPage {
    pub records: Vec<Page>,
    pub has_more: bool,
    pub next_cursor: Option<String>,
}

/// The remote workspace API, as consumed by this crate. Implementations
/// MUST be safe to share across tasks (`Send + Sync`) and MUST treat a
/// cancelled token as grounds to abort in-flight work at the next
/// suspension point.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    async fn get_page(&self, cancel: &CancellationToken, id: &str) -> Result<Page, CoreError>;

    async fn get_page_blocks(
        &self,
        cancel: &CancellationToken,
        id: &str,
    ) -> Result<Vec<Block>, CoreError>;

    async fn get_table(&self, cancel: &CancellationToken, id: &str) -> Result<Table, CoreError>;

    async fn query_table(
        &self,
        cancel: &CancellationToken,
        id: &str,
        request: QueryRequest,
    ) -> Result<RecordPage, CoreError>;

    async fn list_children(
        &self,
        cancel: &CancellationToken,
        parent_id: &str,
        cursor: Option<String>,
    ) -> Result<ChildPage, CoreError>;

    async fn create_page(
        &self,
        cancel: &CancellationToken,
        parent_id: &str,
        properties: serde_json::Value,
    ) -> Result<Page, CoreError>;

    async fn update_page_blocks(
        &self,
        cancel: &CancellationToken,
        id: &str,
        blocks: Vec<Block>,
    ) -> Result<(), CoreError>;

    async fn delete_page(&self, cancel: &CancellationToken, id: &str) -> Result<(), CoreError>;
}

/// Pure Markdown <-> block conversion, no I/O.
pub trait Converter: Send + Sync {
    fn blocks_to_markdown(&self, blocks: &[Block]) -> Result<String, CoreError>;
    fn markdown_to_blocks(&self, markdown: &str) -> Result<Vec<Block>, CoreError>;
}
