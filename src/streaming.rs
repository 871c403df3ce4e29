//! Bounded producer/consumer streams for unbounded recursive page walks and
//! paginated table scans. See §4.5 of the design spec.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::client::{Page, QueryRequest, Record, RemoteClient};
use crate::error::CoreError;

const VALUES_CAPACITY: usize = 100;
const ERRORS_CAPACITY: usize = 10;

/// A lazy finite sequence with a bounded value channel, a bounded error
/// channel, and a done signal. Dropping the stream without draining it may
/// stall the producer once the buffer fills.
pub struct PageStream {
    pub values: mpsc::Receiver<Page>,
    pub errors: mpsc::Receiver<CoreError>,
    pub done: oneshot::Receiver<()>,
}

impl PageStream {
    /// Adapts the value channel into a `futures`-compatible `Stream`, for
    /// callers that want to `.map`/`.filter`/`for_each` instead of polling
    /// `recv()` directly. Errors and the done signal remain on their own
    /// channels.
    pub fn into_value_stream(self) -> ReceiverStream<Page> {
        ReceiverStream::new(self.values)
    }
}

pub struct RecordStream {
    pub values: mpsc::Receiver<Record>,
    pub errors: mpsc::Receiver<CoreError>,
    pub done: oneshot::Receiver<()>,
}

impl RecordStream {
    pub fn into_value_stream(self) -> ReceiverStream<Record> {
        ReceiverStream::new(self.values)
    }
}

/// Depth-first walk of `root_id`'s descendants. Parent pages are emitted
/// before their children; children are emitted in API-returned order.
/// Back-edges (a page revisited anywhere in the already-walked set) are
/// reported as warnings on the error channel and not descended into.
pub fn stream_descendant_pages<C: RemoteClient + 'static>(
    client: Arc<C>,
    cancel: CancellationToken,
    root_id: String,
) -> PageStream {
    let (values_tx, values) = mpsc::channel(VALUES_CAPACITY);
    let (errors_tx, errors) = mpsc::channel(ERRORS_CAPACITY);
    let (done_tx, done) = oneshot::channel();

    tokio::spawn(async move {
        walk_pages(client, cancel, root_id, values_tx, errors_tx).await;
        let _ = done_tx.send(());
    });

    PageStream { values, errors, done }
}

async fn walk_pages<C: RemoteClient>(
    client: Arc<C>,
    cancel: CancellationToken,
    root_id: String,
    values_tx: mpsc::Sender<Page>,
    errors_tx: mpsc::Sender<CoreError>,
) {
    let mut visited: HashSet<String> = HashSet::new();
    let mut stack: Vec<String> = vec![root_id];

    while let Some(id) = stack.pop() {
        if cancel.is_cancelled() {
            break;
        }
        if !visited.insert(id.clone()) {
            warn!(page_id = %id, "cycle detected, skipping already-visited page");
            let _ = errors_tx
                .send(CoreError::ConversionFailure {
                    target: id,
                    message: "cycle detected in descendant traversal".to_string(),
                })
                .await;
            continue;
        }

        let page = match client.get_page(&cancel, &id).await {
            Ok(page) => page,
            Err(err) => {
                let _ = errors_tx.send(err).await;
                continue;
            }
        };

        if values_tx.send(page).await.is_err() {
            // Consumer dropped the value channel; stop producing.
            break;
        }

        let children = match collect_children(&client, &cancel, &id, &errors_tx).await {
            Some(children) => children,
            None => continue,
        };

        for child in children.into_iter().rev() {
            stack.push(child.id);
        }
    }
}

async fn collect_children<C: RemoteClient>(
    client: &Arc<C>,
    cancel: &CancellationToken,
    parent_id: &str,
    errors_tx: &mpsc::Sender<CoreError>,
) -> Option<Vec<Page>> {
    let mut children = Vec::new();
    let mut cursor = None;

    loop {
        if cancel.is_cancelled() {
            return Some(children);
        }
        match client.list_children(cancel, parent_id, cursor.clone()).await {
            Ok(page) => {
                children.extend(page.records);
                if !page.has_more {
                    return Some(children);
                }
                cursor = page.next_cursor;
            }
            Err(err) => {
                let _ = errors_tx.send(err).await;
                return None;
            }
        }
    }
}

/// Paginated scan of `table_id`'s records, `page_size` rows at a time.
/// Terminates when the server reports no more pages or the caller cancels.
pub fn stream_table_records<C: RemoteClient + 'static>(
    client: Arc<C>,
    cancel: CancellationToken,
    table_id: String,
    page_size: usize,
) -> RecordStream {
    let (values_tx, values) = mpsc::channel(VALUES_CAPACITY);
    let (errors_tx, errors) = mpsc::channel(ERRORS_CAPACITY);
    let (done_tx, done) = oneshot::channel();

    tokio::spawn(async move {
        walk_records(client, cancel, table_id, page_size, values_tx, errors_tx).await;
        let _ = done_tx.send(());
    });

    RecordStream { values, errors, done }
}

async fn walk_records<C: RemoteClient>(
    client: Arc<C>,
    cancel: CancellationToken,
    table_id: String,
    page_size: usize,
    values_tx: mpsc::Sender<Record>,
    errors_tx: mpsc::Sender<CoreError>,
) {
    let page_size = if page_size == 0 { 100 } else { page_size };
    let mut cursor = None;

    loop {
        if cancel.is_cancelled() {
            return;
        }

        let request = QueryRequest {
            page_size,
            cursor: cursor.clone(),
        };
        match client.query_table(&cancel, &table_id, request).await {
            Ok(page) => {
                for record in page.records {
                    if values_tx.send(record).await.is_err() {
                        return;
                    }
                }
                if !page.has_more {
                    return;
                }
                cursor = page.next_cursor;
            }
            Err(err) => {
                let _ = errors_tx.send(err).await;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Block, ChildPage, RecordPage, Table};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct TreeClient {
        children: HashMap<String, Vec<String>>,
    }

    #[async_trait]
    impl RemoteClient for TreeClient {
        async fn get_page(&self, _cancel: &CancellationToken, id: &str) -> Result<Page, CoreError> {
            Ok(Page {
                id: id.to_string(),
                parent_id: None,
                title: id.to_string(),
                properties: serde_json::json!({}),
            })
        }

        async fn get_page_blocks(
            &self,
            _cancel: &CancellationToken,
            _id: &str,
        ) -> Result<Vec<Block>, CoreError> {
            Ok(vec![])
        }

        async fn get_table(&self, _cancel: &CancellationToken, id: &str) -> Result<Table, CoreError> {
            Ok(Table {
                id: id.to_string(),
                title: id.to_string(),
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
            parent_id: &str,
            _cursor: Option<String>,
        ) -> Result<ChildPage, CoreError> {
            let records = self
                .children
                .get(parent_id)
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .map(|id| Page {
                    id,
                    parent_id: Some(parent_id.to_string()),
                    title: "child".into(),
                    properties: serde_json::json!({}),
                })
                .collect();
            Ok(ChildPage {
                records,
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

    #[tokio::test]
    async fn walk_visits_parent_before_children_in_order() {
        let mut children = HashMap::new();
        children.insert("root".to_string(), vec!["a".to_string(), "b".to_string()]);
        children.insert("a".to_string(), vec!["a1".to_string()]);

        let client = Arc::new(TreeClient { children });
        let mut stream = stream_descendant_pages(client, CancellationToken::new(), "root".to_string());

        let mut seen = Vec::new();
        while let Some(page) = stream.values.recv().await {
            seen.push(page.id);
        }
        assert_eq!(seen, vec!["root", "a", "a1", "b"]);
        stream.done.await.unwrap();
    }

    #[tokio::test]
    async fn cycle_is_reported_and_does_not_loop_forever() {
        let mut children = HashMap::new();
        children.insert("root".to_string(), vec!["a".to_string()]);
        children.insert("a".to_string(), vec!["root".to_string()]);

        let client = Arc::new(TreeClient { children });
        let mut stream = stream_descendant_pages(client, CancellationToken::new(), "root".to_string());

        let mut seen = Vec::new();
        while let Some(page) = stream.values.recv().await {
            seen.push(page.id);
        }
        assert_eq!(seen, vec!["root", "a"]);
        assert!(stream.errors.recv().await.is_some());
    }

    struct PagedClient {
        pages: Mutex<Vec<RecordPage>>,
    }

    #[async_trait]
    impl RemoteClient for PagedClient {
        async fn get_page(&self, _cancel: &CancellationToken, id: &str) -> Result<Page, CoreError> {
            Ok(Page {
                id: id.to_string(),
                parent_id: None,
                title: "".into(),
                properties: serde_json::json!({}),
            })
        }

        async fn get_page_blocks(
            &self,
            _cancel: &CancellationToken,
            _id: &str,
        ) -> Result<Vec<Block>, CoreError> {
            Ok(vec![])
        }

        async fn get_table(&self, _cancel: &CancellationToken, id: &str) -> Result<Table, CoreError> {
            Ok(Table {
                id: id.to_string(),
                title: "".into(),
            })
        }

        async fn query_table(
            &self,
            _cancel: &CancellationToken,
            _id: &str,
            _request: QueryRequest,
        ) -> Result<RecordPage, CoreError> {
            let mut pages = self.pages.lock().unwrap();
            if pages.is_empty() {
                Ok(RecordPage {
                    records: vec![],
                    has_more: false,
                    next_cursor: None,
                })
            } else {
                Ok(pages.remove(0))
            }
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

    #[tokio::test]
    async fn record_stream_terminates_when_server_reports_no_more_pages() {
        let record = |id: &str| Record {
            id: id.to_string(),
            fields: serde_json::json!({}),
        };
        let client = Arc::new(PagedClient {
            pages: Mutex::new(vec![RecordPage {
                records: vec![record("r1"), record("r2")],
                has_more: false,
                next_cursor: None,
            }]),
        });

        let mut stream = stream_table_records(client, CancellationToken::new(), "t1".to_string(), 100);
        let mut seen = Vec::new();
        while let Some(record) = stream.values.recv().await {
            seen.push(record.id);
        }
        assert_eq!(seen, vec!["r1", "r2"]);
        stream.done.await.unwrap();
    }
}
