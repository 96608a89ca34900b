//! Coordinated snapshot backups of a clustered vector database.
//!
//! One invocation resolves the cluster's member nodes and, for every
//! (collection, node) pair, drives a snapshot lifecycle — cleanup,
//! create, stream-upload with gzip, cleanup — under a bounded
//! exponential-backoff retry policy, then reports successes against the
//! total task count.

pub mod config;
pub mod discovery;
pub mod error;
pub mod orchestrator;
pub mod retry;
pub mod snapshots;
pub mod transfer;

pub use config::Config;
pub use discovery::{discover_nodes, DnsResolver, Node, Resolver};
pub use error::{BackupError, Result};
pub use orchestrator::{run_prefix, BackupOrchestrator, RunReport};
pub use retry::{retry_with_backoff, RetryPolicy};
pub use snapshots::{
    remove_all_snapshots, HttpSnapshotApi, SnapshotApi, SnapshotDescription, SnapshotStream,
};
pub use transfer::{compression_level, upload_compressed};
