//! End-to-end bulk sync: composes the worker pool with per-job ownership of
//! the remote client and converter, writing results to a local Markdown
//! tree. See §4.6 of the design spec.

use std::path::{Path, PathBuf};
use std::sync::Arc;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::client::{Converter, QueryRequest, RemoteClient};
use crate::error::CoreError;
use crate::pool::{Job, WorkerPool};

/// Per-identifier outcome of a sync call.
#[derive(Debug)]
pub struct SyncOutcome {
    pub id: String,
    pub result: Result<(), CoreError>,
}

/// Drives `sync_pages`/`sync_blocks`/`sync_tables` over a fresh worker pool
/// per call.
pub struct SyncOrchestrator<C, V> {
    client: Arc<C>,
    converter: Arc<V>,
    workers: i64,
    queue_capacity: i64,
    max_retries: u32,
    batch_size: usize,
    output_root: PathBuf,
}

impl<C: RemoteClient + 'static, V: Converter + 'static> SyncOrchestrator<C, V> {
    pub fn new(
        client: Arc<C>,
        converter: Arc<V>,
        workers: i64,
        queue_capacity: i64,
        max_retries: u32,
        batch_size: usize,
        output_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            client,
            converter,
            workers,
            queue_capacity,
            max_retries,
            batch_size,
            output_root: output_root.into(),
        }
    }

    pub async fn sync_pages(&self, cancel: &CancellationToken, identifiers: Vec<String>) -> Vec<SyncOutcome> {
        let jobs: Vec<Box<dyn Job>> = identifiers
            .into_iter()
            .map(|id| {
                Box::new(PageSyncJob {
                    id,
                    client: Arc::clone(&self.client),
                    converter: Arc::clone(&self.converter),
                    output_root: self.output_root.clone(),
                }) as Box<dyn Job>
            })
            .collect();
        self.run_sync(cancel, jobs).await
    }

    pub async fn sync_blocks(&self, cancel: &CancellationToken, identifiers: Vec<String>) -> Vec<SyncOutcome> {
        let jobs: Vec<Box<dyn Job>> = identifiers
            .into_iter()
            .map(|id| {
                Box::new(BlockSyncJob {
                    id,
                    client: Arc::clone(&self.client),
                    converter: Arc::clone(&self.converter),
                    output_root: self.output_root.clone(),
                }) as Box<dyn Job>
            })
            .collect();
        self.run_sync(cancel, jobs).await
    }

    pub async fn sync_tables(&self, cancel: &CancellationToken, identifiers: Vec<String>) -> Vec<SyncOutcome> {
        let jobs: Vec<Box<dyn Job>> = identifiers
            .into_iter()
            .map(|id| {
                Box::new(TableSyncJob {
                    id,
                    client: Arc::clone(&self.client),
                    output_root: self.output_root.clone(),
                }) as Box<dyn Job>
            })
            .collect();
        self.run_sync(cancel, jobs).await
    }

    async fn run_sync(&self, cancel: &CancellationToken, jobs: Vec<Box<dyn Job>>) -> Vec<SyncOutcome> {
        if jobs.is_empty() {
            return Vec::new();
        }

        let pool = WorkerPool::new(self.workers, self.queue_capacity, self.max_retries);
        pool.start().await;
        let mut results_rx = pool.take_results().await.expect("freshly started pool");

        let mut outcomes = Vec::new();
        let mut cancelled = false;
        let mut iter = jobs.into_iter();

        'dispatch: loop {
            let sub_batch: Vec<Box<dyn Job>> = (&mut iter).take(self.batch_size.max(1)).collect();
            if sub_batch.is_empty() {
                break;
            }

            let mut expected_results = 0;
            for job in sub_batch {
                let job_id = job.id();
                match pool.submit(job).await {
                    Ok(()) => expected_results += 1,
                    Err(err) => outcomes.push(SyncOutcome { id: job_id, result: Err(err) }),
                }
            }

            for _ in 0..expected_results {
                if cancel.is_cancelled() {
                    cancelled = true;
                    break 'dispatch;
                }
                match results_rx.recv().await {
                    Some(result) => outcomes.push(SyncOutcome {
                        id: result.job_id,
                        result: result.outcome,
                    }),
                    None => break,
                }
            }
        }

        if cancelled {
            warn!("sync aborted by caller cancellation");
            pool.shutdown_now().await;
            outcomes.push(SyncOutcome {
                id: String::new(),
                result: Err(CoreError::Cancelled("sync aborted by caller".to_string())),
            });
        } else {
            pool.shutdown().await;
        }

        info!(outcomes = outcomes.len(), "sync run complete");
        outcomes
    }
}

struct PageSyncJob<C, V> {
    id: String,
    client: Arc<C>,
    converter: Arc<V>,
    output_root: PathBuf,
}

#[async_trait]
impl<C: RemoteClient + 'static, V: Converter + 'static> Job for PageSyncJob<C, V> {
    fn id(&self) -> String {
        self.id.clone()
    }

    async fn execute(&self, cancel: &CancellationToken) -> Result<(), CoreError> {
        let page = self.client.get_page(cancel, &self.id).await?;
        let blocks = self.client.get_page_blocks(cancel, &self.id).await?;
        let markdown = self.converter.blocks_to_markdown(&blocks)?;
        let path = sanitize_path(&self.output_root, &page.id, "md");
        write_markdown(&path, &markdown, &self.id).await
    }
}

struct BlockSyncJob<C, V> {
    id: String,
    client: Arc<C>,
    converter: Arc<V>,
    output_root: PathBuf,
}

#[async_trait]
impl<C: RemoteClient + 'static, V: Converter + 'static> Job for BlockSyncJob<C, V> {
    fn id(&self) -> String {
        self.id.clone()
    }

    async fn execute(&self, cancel: &CancellationToken) -> Result<(), CoreError> {
        let blocks = self.client.get_page_blocks(cancel, &self.id).await?;
        let markdown = self.converter.blocks_to_markdown(&blocks)?;
        let path = sanitize_path(&self.output_root, &self.id, "md");
        write_markdown(&path, &markdown, &self.id).await
    }
}

struct TableSyncJob<C> {
    id: String,
    client: Arc<C>,
    output_root: PathBuf,
}

#[async_trait]
impl<C: RemoteClient + 'static> Job for TableSyncJob<C> {
    fn id(&self) -> String {
        self.id.clone()
    }

    async fn execute(&self, cancel: &CancellationToken) -> Result<(), CoreError> {
        let table = self.client.get_table(cancel, &self.id).await?;

        let mut records = Vec::new();
        let mut cursor = None;
        loop {
            if cancel.is_cancelled() {
                return Err(CoreError::Cancelled(self.id.clone()));
            }
            let request = QueryRequest {
                page_size: 100,
                cursor: cursor.clone(),
            };
            let page = self.client.query_table(cancel, &self.id, request).await?;
            records.extend(page.records);
            if !page.has_more {
                break;
            }
            cursor = page.next_cursor;
        }

        let body = serde_json::to_string_pretty(&records).map_err(|e| CoreError::ConversionFailure {
            target: self.id.clone(),
            message: e.to_string(),
        })?;
        let markdown = format!("# {}\n\n```json\n{}\n```\n", table.title, body);
        let path = sanitize_path(&self.output_root, &self.id, "md");
        write_markdown(&path, &markdown, &self.id).await
    }
}

/// Builds `output_root/<sanitized identifier>.<extension>`, stripping `..`,
/// absolute-path leaders, and separators out of each path component.
fn sanitize_path(output_root: &Path, identifier: &str, extension: &str) -> PathBuf {
    let mut components: Vec<String> = identifier
        .split(['/', '\\'])
        .filter(|part| !part.is_empty() && *part != "." && *part != "..")
        .map(sanitize_segment)
        .collect();

    if components.is_empty() {
        components.push(sanitize_segment(identifier));
    }

    let file_stem = components.pop().unwrap_or_else(|| "page".to_string());
    let mut path = output_root.to_path_buf();
    for dir in &components {
        path.push(dir);
    }
    path.push(format!("{file_stem}.{extension}"));
    path
}

fn sanitize_segment(segment: &str) -> String {
    let cleaned: String = segment
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

async fn write_markdown(path: &Path, content: &str, target: &str) -> Result<(), CoreError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| CoreError::IoFailure {
                target: target.to_string(),
                message: format!("create_dir_all failed: {e}"),
            })?;
        #[cfg(unix)]
        tokio::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o755))
            .await
            .map_err(|e| CoreError::IoFailure {
                target: target.to_string(),
                message: format!("chmod directory failed: {e}"),
            })?;
    }

    tokio::fs::write(path, content).await.map_err(|e| CoreError::IoFailure {
        target: target.to_string(),
        message: format!("write failed: {e}"),
    })?;

    #[cfg(unix)]
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644))
        .await
        .map_err(|e| CoreError::IoFailure {
            target: target.to_string(),
            message: format!("chmod file failed: {e}"),
        })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Block, ChildPage, Page, RecordPage, Table};
    use tempfile::tempdir;

    struct FixtureClient;

    #[async_trait]
    impl RemoteClient for FixtureClient {
        async fn get_page(&self, _cancel: &CancellationToken, id: &str) -> Result<Page, CoreError> {
            Ok(Page {
                id: id.to_string(),
                parent_id: None,
                title: "Title".into(),
                properties: serde_json::json!({}),
            })
        }

        async fn get_page_blocks(
            &self,
            _cancel: &CancellationToken,
            _id: &str,
        ) -> Result<Vec<Block>, CoreError> {
            Ok(vec![Block {
                id: "b1".into(),
                kind: "paragraph".into(),
                payload: serde_json::json!({"text": "hello"}),
            }])
        }

        async fn get_table(&self, _cancel: &CancellationToken, id: &str) -> Result<Table, CoreError> {
            Ok(Table {
                id: id.to_string(),
                title: "Table".into(),
            })
        }

        async fn query_table(
            &self,
            _cancel: &CancellationToken,
            _id: &str,
            _request: QueryRequest,
        ) -> Result<RecordPage, CoreError> {
            Ok(RecordPage {
                records: vec![],
                has_more: false,
                next_cursor: None,
            })
        }

        async fn list_children(
            &self,
            _cancel: &CancellationToken,
            _parent_id: &str,
            _cursor: Option<String>,
        ) -> Result<ChildPage, CoreError> {
            Ok(ChildPage {
                records: vec![],
                has_more: false,
                next_cursor: None,
            })
        }

        async fn create_page(
            &self,
            _cancel: &CancellationToken,
            _parent_id: &str,
            _properties: serde_json::Value,
        ) -> Result<Page, CoreError> {
            unimplemented!()
        }

        async fn update_page_blocks(
            &self,
            _cancel: &CancellationToken,
            _id: &str,
            _blocks: Vec<Block>,
        ) -> Result<(), CoreError> {
            Ok(())
        }

        async fn delete_page(&self, _cancel: &CancellationToken, _id: &str) -> Result<(), CoreError> {
            Ok(())
        }
    }

    struct UppercaseConverter;

    impl Converter for UppercaseConverter {
        fn blocks_to_markdown(&self, blocks: &[Block]) -> Result<String, CoreError> {
            Ok(blocks
                .iter()
                .map(|b| b.payload.to_string().to_uppercase())
                .collect::<Vec<_>>()
                .join("\n"))
        }

        fn markdown_to_blocks(&self, _markdown: &str) -> Result<Vec<Block>, CoreError> {
            Ok(vec![])
        }
    }

    #[test]
    fn sanitize_path_strips_traversal_components() {
        let root = Path::new("/out");
        let path = sanitize_path(root, "../../etc/passwd", "md");
        assert_eq!(path, PathBuf::from("/out/etc/passwd.md"));

        let path = sanitize_path(root, "a/b/../c", "md");
        assert_eq!(path, PathBuf::from("/out/a/b/c.md"));
    }

    #[tokio::test]
    async fn sync_pages_writes_one_file_per_identifier() {
        let dir = tempdir().unwrap();
        let orchestrator = SyncOrchestrator::new(
            Arc::new(FixtureClient),
            Arc::new(UppercaseConverter),
            2,
            4,
            1,
            10,
            dir.path(),
        );
        let cancel = CancellationToken::new();
        let outcomes = orchestrator
            .sync_pages(&cancel, vec!["p1".to_string(), "p2".to_string()])
            .await;

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.result.is_ok()));
        assert!(dir.path().join("p1.md").exists());
        assert!(dir.path().join("p2.md").exists());
    }

    #[tokio::test]
    async fn empty_identifier_list_returns_empty_without_starting_a_pool() {
        let dir = tempdir().unwrap();
        let orchestrator = SyncOrchestrator::new(
            Arc::new(FixtureClient),
            Arc::new(UppercaseConverter),
            2,
            4,
            1,
            10,
            dir.path(),
        );
        let cancel = CancellationToken::new();
        let outcomes = orchestrator.sync_pages(&cancel, vec![]).await;
        assert!(outcomes.is_empty());
    }

    #[tokio::test]
    async fn sync_tables_writes_json_payload() {
        let dir = tempdir().unwrap();
        let orchestrator = SyncOrchestrator::new(
            Arc::new(FixtureClient),
            Arc::new(UppercaseConverter),
            1,
            4,
            0,
            10,
            dir.path(),
        );
        let cancel = CancellationToken::new();
        let outcomes = orchestrator.sync_tables(&cancel, vec!["t1".to_string()]).await;
        assert!(outcomes[0].result.is_ok());
        assert!(dir.path().join("t1.md").exists());
    }
}
