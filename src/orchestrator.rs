//! Fan-out of backup tasks across the collections × nodes cross-product.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use flate2::Compression;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::discovery::Node;
use crate::error::Result;
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::snapshots::remove_all_snapshots;
use crate::transfer::upload_compressed;

/// Outcome counters for one full run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    /// Tasks issued: |collections| × |nodes|.
    pub total: usize,
    /// Tasks that finished successfully.
    pub successes: usize,
}

impl RunReport {
    pub fn all_succeeded(&self) -> bool {
        self.successes == self.total
    }
}

/// Sortable second-precision prefix shared by every upload of one run.
///
/// A fresh prefix per invocation keeps failed runs from colliding with
/// retried runs.
pub fn run_prefix() -> String {
    Utc::now().format("%Y-%m-%dT%H%M%S").to_string()
}

/// Drives one backup pass across every (collection, node) pair.
pub struct BackupOrchestrator {
    store: Arc<dyn ObjectStore>,
    policy: RetryPolicy,
    level: Compression,
    key_prefix: String,
    max_concurrency: Option<usize>,
}

impl BackupOrchestrator {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        policy: RetryPolicy,
        level: Compression,
        key_prefix: String,
    ) -> Self {
        Self {
            store,
            policy,
            level,
            key_prefix,
            max_concurrency: None,
        }
    }

    /// Cap the number of simultaneously running tasks.
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit);
        self
    }

    /// Object-store key for one (collection, node) pair in this run.
    ///
    /// Deterministic for the run, so retries of a task always target the
    /// same key.
    fn upload_key(&self, collection: &str, node: &Node) -> ObjectPath {
        ObjectPath::from(format!(
            "{}/{}/{}.snapshot.gz",
            self.key_prefix, collection, node.name
        ))
    }

    /// Launch every task and wait for all of them to finish.
    ///
    /// Tasks are independent; one pair exhausting its retries never
    /// cancels its siblings. Success accounting goes through an atomic
    /// counter shared by all tasks.
    pub async fn run(&self, collections: &[String], nodes: &[Node]) -> RunReport {
        let total = collections.len() * nodes.len();
        let successes = Arc::new(AtomicUsize::new(0));
        let semaphore = self
            .max_concurrency
            .map(|limit| Arc::new(Semaphore::new(limit)));

        let mut tasks = JoinSet::new();
        for collection in collections {
            for node in nodes {
                let collection = collection.clone();
                let node = node.clone();
                let store = Arc::clone(&self.store);
                let policy = self.policy.clone();
                let level = self.level;
                let key = self.upload_key(&collection, &node);
                let successes = Arc::clone(&successes);
                let semaphore = semaphore.clone();

                tasks.spawn(async move {
                    // The semaphore lives for the whole run and is never
                    // closed, so acquire cannot fail.
                    let _permit = match &semaphore {
                        Some(semaphore) => {
                            Some(semaphore.acquire().await.expect("semaphore closed"))
                        }
                        None => None,
                    };

                    let outcome = retry_with_backoff(&policy, || {
                        backup_node(store.as_ref(), &node, &collection, &key, level)
                    })
                    .await;

                    match outcome {
                        Ok(()) => {
                            successes.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(err) => {
                            error!(
                                collection = %collection,
                                node = %node.name,
                                error = %err,
                                "could not back up after all retries"
                            );
                        }
                    }
                });
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                error!(error = %err, "backup task panicked");
            }
        }

        RunReport {
            total,
            successes: successes.load(Ordering::SeqCst),
        }
    }
}

/// One backup attempt: cleanup, create, stream-upload, trailing cleanup.
async fn backup_node(
    store: &dyn ObjectStore,
    node: &Node,
    collection: &str,
    key: &ObjectPath,
    level: Compression,
) -> Result<()> {
    info!(collection, node = %node.name, "removing stale snapshots to free disk space");
    remove_all_snapshots(node.api.as_ref(), collection).await?;

    info!(collection, node = %node.name, "creating snapshot");
    let snapshot = node.api.create_snapshot(collection).await?;

    info!(collection, node = %node.name, snapshot = %snapshot.name, "uploading snapshot");
    let body = node.api.download_snapshot(collection, &snapshot.name).await?;
    upload_compressed(store, key, body, level).await?;

    info!(collection, node = %node.name, "cleaning up");
    if let Err(err) = remove_all_snapshots(node.api.as_ref(), collection).await {
        // The snapshot is already durably uploaded; a stray snapshot on
        // the node is a resource leak, not a failed backup.
        warn!(collection, node = %node.name, error = %err, "trailing cleanup failed");
    }

    Ok(())
}
