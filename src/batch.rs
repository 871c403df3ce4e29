//! Size-bounded batch processing over heterogeneous, tagged operations.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::CoreError;
use crate::metrics::{self, JobOutcome};

/// A declarative work item consumed by the batch processor. Translated to
/// concrete action by the handler registered under `tag`.
#[derive(Debug, Clone)]
pub struct Operation {
    pub id: String,
    pub tag: String,
    pub payload: serde_json::Value,
}

impl Operation {
    /// Builds an operation with a generated identifier, for callers that
    /// don't already have a stable one to assign.
    pub fn new(tag: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tag: tag.into(),
            payload,
        }
    }
}

/// Per-tag translation from [`Operation`] to concrete action.
#[async_trait]
pub trait OperationHandler: Send + Sync {
    async fn handle(&self, cancel: &CancellationToken, operation: &Operation) -> Result<(), CoreError>;
}

/// Aggregated outcome of one or many batches.
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub success: usize,
    pub failed: usize,
    pub errors: Vec<String>,
    pub duration: Duration,
    pub metadata: HashMap<String, String>,
}

impl BatchResult {
    fn empty() -> Self {
        Self {
            success: 0,
            failed: 0,
            errors: Vec::new(),
            duration: Duration::ZERO,
            metadata: HashMap::new(),
        }
    }
}

struct ChunkOutcome {
    success: usize,
    failed: usize,
    errors: Vec<String>,
}

/// Divides an operation list into chunks, dispatches chunks concurrently
/// (bounded by `max_concurrency`), and aggregates results. See §4.3 of the
/// design spec.
pub struct BatchProcessor {
    config: Config,
    handlers: HashMap<String, Arc<dyn OperationHandler>>,
}

impl BatchProcessor {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            handlers: HashMap::new(),
        }
    }

    pub fn with_handler(mut self, tag: impl Into<String>, handler: Arc<dyn OperationHandler>) -> Self {
        self.handlers.insert(tag.into(), handler);
        self
    }

    pub async fn process_batch(
        &self,
        cancel: &CancellationToken,
        operations: Vec<Operation>,
    ) -> BatchResult {
        if operations.is_empty() {
            return BatchResult::empty();
        }

        let start = Instant::now();
        let chunks: Vec<Vec<Operation>> = operations
            .chunks(self.config.batch_size.max(1))
            .map(|c| c.to_vec())
            .collect();
        let chunk_count = chunks.len();

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let mut join_set: JoinSet<ChunkOutcome> = JoinSet::new();

        for chunk in chunks {
            let semaphore = Arc::clone(&semaphore);
            let handlers = self.handlers.clone();
            let cancel = cancel.clone();
            let retry_attempts = self.config.retry_attempts;
            let retry_delay = self.config.retry_delay;
            let timeout = self.config.per_operation_timeout;

            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                process_chunk(chunk, &cancel, timeout, &handlers, retry_attempts, retry_delay).await
            });
        }

        let mut success = 0;
        let mut failed = 0;
        let mut errors = Vec::new();

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(outcome) => {
                    success += outcome.success;
                    failed += outcome.failed;
                    errors.extend(outcome.errors);
                }
                Err(join_error) => {
                    failed += 1;
                    errors.push(format!("chunk dispatch failed: {join_error}"));
                }
            }
        }

        let mut metadata = HashMap::new();
        metadata.insert("batches_processed".to_string(), chunk_count.to_string());
        metadata.insert(
            "operations_per_batch".to_string(),
            self.config.batch_size.to_string(),
        );

        BatchResult {
            success,
            failed,
            errors,
            duration: start.elapsed(),
            metadata,
        }
    }
}

async fn process_chunk(
    chunk: Vec<Operation>,
    parent_cancel: &CancellationToken,
    timeout: Duration,
    handlers: &HashMap<String, Arc<dyn OperationHandler>>,
    retry_attempts: u32,
    retry_delay: Duration,
) -> ChunkOutcome {
    let chunk_ctx = parent_cancel.child_token();
    let timeout_guard = chunk_ctx.clone();
    let timeout_task = tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(timeout) => timeout_guard.cancel(),
            _ = timeout_guard.cancelled() => {}
        }
    });

    let mut success = 0;
    let mut failed = 0;
    let mut errors = Vec::new();

    for operation in &chunk {
        if chunk_ctx.is_cancelled() {
            failed += 1;
            errors.push(format!("{}: cancelled", operation.id));
            metrics::record_batch_operations(&operation.tag, JobOutcome::Cancelled);
            continue;
        }

        match run_operation_with_retry(operation, &chunk_ctx, handlers, retry_attempts, retry_delay)
            .await
        {
            Ok(()) => {
                success += 1;
                metrics::record_batch_operations(&operation.tag, JobOutcome::Success);
            }
            Err(err) => {
                failed += 1;
                errors.push(format!("{}: {err}", operation.id));
                metrics::record_batch_operations(&operation.tag, JobOutcome::Failed);
            }
        }
    }

    chunk_ctx.cancel();
    timeout_task.abort();

    ChunkOutcome {
        success,
        failed,
        errors,
    }
}

async fn run_operation_with_retry(
    operation: &Operation,
    chunk_ctx: &CancellationToken,
    handlers: &HashMap<String, Arc<dyn OperationHandler>>,
    retry_attempts: u32,
    retry_delay: Duration,
) -> Result<(), CoreError> {
    let Some(handler) = handlers.get(&operation.tag) else {
        return Err(CoreError::UnknownOperationType(operation.id.clone()));
    };

    let mut last_error = None;
    for attempt in 0..=retry_attempts {
        match handler.handle(chunk_ctx, operation).await {
            Ok(()) => return Ok(()),
            Err(err) => {
                warn!(operation_id = %operation.id, attempt, error = %err, "operation attempt failed");
                last_error = Some(err);
                if attempt < retry_attempts {
                    metrics::record_retry(attempt + 1);
                    tokio::select! {
                        _ = tokio::time::sleep(retry_delay) => {}
                        _ = chunk_ctx.cancelled() => break,
                    }
                }
            }
        }
    }

    let last_error = last_error.unwrap_or_else(|| CoreError::Cancelled(operation.id.clone()));
    debug!(operation_id = %operation.id, "operation exhausted retries");
    Err(last_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopHandler;

    #[async_trait]
    impl OperationHandler for NoopHandler {
        async fn handle(&self, _cancel: &CancellationToken, _operation: &Operation) -> Result<(), CoreError> {
            Ok(())
        }
    }

    struct AlwaysFailsHandler;

    #[async_trait]
    impl OperationHandler for AlwaysFailsHandler {
        async fn handle(&self, _cancel: &CancellationToken, operation: &Operation) -> Result<(), CoreError> {
            Err(CoreError::RemoteFailure {
                target: operation.id.clone(),
                status: 500,
                message: "boom".into(),
            })
        }
    }

    fn op(id: &str, tag: &str) -> Operation {
        Operation {
            id: id.to_string(),
            tag: tag.to_string(),
            payload: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn empty_input_returns_zero_result_immediately() {
        let processor = BatchProcessor::new(Config::default());
        let cancel = CancellationToken::new();
        let result = processor.process_batch(&cancel, vec![]).await;
        assert_eq!(result.success, 0);
        assert_eq!(result.failed, 0);
        assert!(result.errors.is_empty());
    }

    #[tokio::test]
    async fn mixed_outcome_batch_reports_unknown_tag_as_failure() {
        let processor = BatchProcessor::new(Config::default())
            .with_handler("page_sync", Arc::new(NoopHandler))
            .with_handler("block_sync", Arc::new(NoopHandler));
        let cancel = CancellationToken::new();

        let ops = vec![
            op("op1", "page_sync"),
            op("op2", "unknown_type"),
            op("op3", "block_sync"),
        ];
        let result = processor.process_batch(&cancel, ops).await;

        assert_eq!(result.success, 2);
        assert_eq!(result.failed, 1);
        assert!(result.errors.iter().any(|e| e.contains("op2")));
    }

    #[tokio::test]
    async fn large_batch_is_chunked_by_batch_size() {
        let config = Config::default().with_batch_size(3).with_max_concurrency(4);
        let processor = BatchProcessor::new(config).with_handler("page_sync", Arc::new(NoopHandler));
        let cancel = CancellationToken::new();

        let ops: Vec<Operation> = (0..10).map(|i| op(&format!("op{i}"), "page_sync")).collect();
        let result = processor.process_batch(&cancel, ops).await;

        assert_eq!(result.success, 10);
        assert_eq!(result.failed, 0);
        assert_eq!(result.metadata.get("batches_processed").unwrap(), "4");
    }

    #[tokio::test]
    async fn retry_exhaustion_is_reported_per_operation() {
        let config = Config::default().with_retry_attempts(1).with_retry_delay(Duration::from_millis(1));
        let processor = BatchProcessor::new(config).with_handler("page_sync", Arc::new(AlwaysFailsHandler));
        let cancel = CancellationToken::new();

        let result = processor.process_batch(&cancel, vec![op("op1", "page_sync")]).await;
        assert_eq!(result.failed, 1);
        assert_eq!(result.success, 0);
    }

    #[tokio::test]
    async fn pre_cancelled_context_reports_a_failure() {
        let processor = BatchProcessor::new(Config::default()).with_handler("page_sync", Arc::new(NoopHandler));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = processor
            .process_batch(&cancel, vec![op("op1", "page_sync"), op("op2", "page_sync")])
            .await;
        assert!(result.failed >= 1);
    }
}
