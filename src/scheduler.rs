//! Priority scheduling for heterogeneous, tagged operations.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::batch::{BatchProcessor, BatchResult, Operation, OperationHandler};
use crate::config::Config;

const DEFAULT_PRIORITIES: &[(&str, i32)] = &[("page_sync", 1), ("block_sync", 2), ("record_sync", 3)];

/// Per-tag FIFO queues flushed in ascending priority order. See §4.4 of the
/// design spec.
pub struct PriorityScheduler {
    config: Config,
    priorities: HashMap<String, i32>,
    queues: RwLock<HashMap<String, Vec<Operation>>>,
    handlers: HashMap<String, Arc<dyn OperationHandler>>,
}

impl PriorityScheduler {
    pub fn new(config: Config) -> Self {
        let priorities = DEFAULT_PRIORITIES
            .iter()
            .map(|(tag, priority)| (tag.to_string(), *priority))
            .collect();
        Self {
            config,
            priorities,
            queues: RwLock::new(HashMap::new()),
            handlers: HashMap::new(),
        }
    }

    pub fn with_handler(mut self, tag: impl Into<String>, handler: Arc<dyn OperationHandler>) -> Self {
        self.handlers.insert(tag.into(), handler);
        self
    }

    /// Overrides (or adds) the priority for a tag. Lower numbers run first.
    pub fn with_priority(mut self, tag: impl Into<String>, priority: i32) -> Self {
        self.priorities.insert(tag.into(), priority);
        self
    }

    /// Appends `operation` to its tag's queue.
    pub fn schedule(&self, operation: Operation) {
        let mut queues = self.queues.write().unwrap();
        queues.entry(operation.tag.clone()).or_default().push(operation);
    }

    /// Drains every queue into one priority-ordered list (stable within a
    /// tag), then dispatches it through a fresh batch processor. Queues are
    /// emptied before the lock is released, regardless of outcome.
    pub async fn process_scheduled(&self, cancel: &CancellationToken) -> BatchResult {
        let ordered = {
            let mut queues = self.queues.write().unwrap();
            let mut tags: Vec<String> = queues.keys().cloned().collect();
            tags.sort_by_key(|tag| self.priorities.get(tag).copied().unwrap_or(i32::MAX));

            let mut ordered = Vec::new();
            for tag in tags {
                if let Some(mut ops) = queues.remove(&tag) {
                    ordered.append(&mut ops);
                }
            }
            debug!(operations = ordered.len(), "drained scheduler queues");
            ordered
        };

        let mut processor = BatchProcessor::new(self.config.clone());
        for (tag, handler) in &self.handlers {
            processor = processor.with_handler(tag.clone(), Arc::clone(handler));
        }
        processor.process_batch(cancel, ordered).await
    }

    /// Snapshot of queue depths. Empty queues may be omitted.
    pub fn queue_stats(&self) -> HashMap<String, usize> {
        self.queues
            .read()
            .unwrap()
            .iter()
            .filter(|(_, ops)| !ops.is_empty())
            .map(|(tag, ops)| (tag.clone(), ops.len()))
            .collect()
    }
}
