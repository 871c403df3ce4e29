//! Concurrent execution core for a bidirectional page/block/record
//! synchronizer.
//!
//! This crate owns scheduling, batching, caching, and streaming; the
//! Markdown converter and the remote workspace client are external
//! collaborators, expressed here only as the traits in [`client`] that this
//! crate consumes.
//!
//! Typical composition, leaves-first:
//! [`cache::CachedClient`] wraps a [`client::RemoteClient`] impl, a
//! [`batch::BatchProcessor`] or [`scheduler::PriorityScheduler`] drives
//! batches of [`batch::Operation`]s, and [`orchestrator::SyncOrchestrator`]
//! composes a [`pool::WorkerPool`] for bulk page/block/table sync.

pub mod batch;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod pool;
pub mod scheduler;
pub mod streaming;
pub mod tracing_init;

pub use batch::{BatchProcessor, BatchResult, Operation, OperationHandler};
pub use cache::{Cache, CacheStats, CachedClient};
pub use client::{Block, ChildPage, Converter, Page, QueryRequest, Record, RecordPage, RemoteClient, Table};
pub use config::{Config, Environment};
pub use error::{ConfigError, CoreError};
pub use orchestrator::{SyncOrchestrator, SyncOutcome};
pub use pool::{Job, JobResult, WorkerPool};
pub use scheduler::PriorityScheduler;
pub use streaming::{stream_descendant_pages, stream_table_records, PageStream, RecordStream};
pub use tracing_init::init_tracing;
