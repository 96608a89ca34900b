use thiserror::Error;

/// Canonical result type for backup operations.
pub type Result<T> = std::result::Result<T, BackupError>;

/// Canonical error type for a backup run.
///
/// Variants carry a pre-formatted message naming the failing step and,
/// where it exists, the (collection, node) pair, so errors stay useful
/// after they cross the retry loop.
#[derive(Debug, Error)]
pub enum BackupError {
    /// Forward or reverse DNS resolution failed.
    #[error("resolve error: {0}")]
    Resolve(String),

    /// Discovery could not produce a usable node set.
    #[error("discovery error: {0}")]
    Discovery(String),

    /// The snapshot management API rejected or failed a request.
    #[error("snapshot API error: {0}")]
    Api(String),

    /// Snapshot download failed before or during streaming.
    #[error("download error: {0}")]
    Download(String),

    /// Object storage failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// I/O error in the compression pipe.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),
}
