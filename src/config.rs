//! Environment-driven configuration.

use std::sync::Arc;

use clap::Parser;
use object_store::aws::AmazonS3Builder;
use object_store::ObjectStore;

use crate::error::{BackupError, Result};

/// Backup configuration, read from flags or environment.
#[derive(Parser, Debug, Clone)]
#[command(name = "vectorsnap")]
#[command(about = "Coordinated snapshot backups of a clustered vector database", long_about = None)]
#[command(version)]
pub struct Config {
    /// Cluster service DNS name resolved into member nodes
    #[arg(long, env = "VECTORSNAP_SERVICE_ADDRESS")]
    pub service_address: String,

    /// Port of the snapshot-management API on each node
    #[arg(long, env = "VECTORSNAP_CONTROL_PORT", default_value_t = 6333)]
    pub control_port: u16,

    /// Port of the snapshot download API on each node
    #[arg(long, env = "VECTORSNAP_DATA_PORT", default_value_t = 6333)]
    pub data_port: u16,

    /// Access token attached to management and download requests
    #[arg(long, env = "VECTORSNAP_API_KEY", default_value = "", hide_env_values = true)]
    pub api_key: String,

    /// Object-storage access key
    #[arg(long, env = "OBJECT_STORAGE_ACCESS_KEY")]
    pub storage_access_key: String,

    /// Object-storage access secret
    #[arg(long, env = "OBJECT_STORAGE_ACCESS_SECRET", hide_env_values = true)]
    pub storage_access_secret: String,

    /// Destination bucket
    #[arg(long, env = "OBJECT_STORAGE_BUCKET_NAME")]
    pub bucket: String,

    /// Object-storage endpoint, e.g. http://minio:9000 for S3-compatible stores
    #[arg(long, env = "OBJECT_STORAGE_ADDRESS", default_value = "")]
    pub storage_endpoint: String,

    /// Object-storage region
    #[arg(long, env = "OBJECT_STORAGE_REGION", default_value = "us-east-1")]
    pub storage_region: String,

    /// Comma-separated collection names to back up
    #[arg(long, env = "COLLECTIONS_TO_BACKUP", value_delimiter = ',')]
    pub collections: Vec<String>,

    /// Cap on simultaneously running backup tasks (unbounded when unset)
    #[arg(long, env = "VECTORSNAP_MAX_CONCURRENCY")]
    pub max_concurrency: Option<usize>,

    /// Gzip level for snapshot uploads (0-9)
    #[arg(long, env = "VECTORSNAP_COMPRESSION_LEVEL", default_value_t = 6)]
    pub compression_level: u32,
}

impl Config {
    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.service_address.is_empty() {
            return Err(BackupError::Config(
                "service address cannot be empty".to_string(),
            ));
        }
        if self.control_port == 0 || self.data_port == 0 {
            return Err(BackupError::Config("ports cannot be zero".to_string()));
        }
        if self.bucket.is_empty() {
            return Err(BackupError::Config(
                "bucket name cannot be empty".to_string(),
            ));
        }
        if self.collections.is_empty() {
            return Err(BackupError::Config(
                "at least one collection must be configured".to_string(),
            ));
        }
        if self.collections.iter().any(|name| name.is_empty()) {
            return Err(BackupError::Config(
                "collection names cannot be empty".to_string(),
            ));
        }
        if self.compression_level > 9 {
            return Err(BackupError::Config(format!(
                "invalid compression level: {} (max: 9)",
                self.compression_level
            )));
        }

        Ok(())
    }

    /// Build the S3 client for the configured destination.
    pub fn object_store(&self) -> Result<Arc<dyn ObjectStore>> {
        let mut builder = AmazonS3Builder::new()
            .with_region(&self.storage_region)
            .with_bucket_name(&self.bucket)
            .with_access_key_id(&self.storage_access_key)
            .with_secret_access_key(&self.storage_access_secret);

        if !self.storage_endpoint.is_empty() {
            builder = builder.with_endpoint(&self.storage_endpoint);
            // Allow plain HTTP for local development (MinIO)
            if self.storage_endpoint.starts_with("http://") {
                builder = builder.with_allow_http(true);
            }
        }

        let store = builder.build().map_err(|e| {
            BackupError::Config(format!("could not create object-storage client: {e}"))
        })?;

        Ok(Arc::new(store))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> Vec<String> {
        [
            "vectorsnap",
            "--service-address",
            "vectors.default.svc",
            "--api-key",
            "token",
            "--storage-access-key",
            "key",
            "--storage-access-secret",
            "secret",
            "--bucket",
            "backups",
            "--storage-endpoint",
            "http://localhost:9000",
            "--collections",
            "a,b",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    #[test]
    fn parses_comma_separated_collections_keeping_duplicates() {
        let mut args = base_args();
        let index = args.iter().position(|a| a == "a,b").unwrap();
        args[index] = "a,b,a".to_string();

        let config = Config::try_parse_from(args).unwrap();

        assert_eq!(config.collections, vec!["a", "b", "a"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn default_ports_and_level() {
        let config = Config::try_parse_from(base_args()).unwrap();

        assert_eq!(config.control_port, 6333);
        assert_eq!(config.data_port, 6333);
        assert_eq!(config.compression_level, 6);
        assert_eq!(config.max_concurrency, None);
    }

    #[test]
    fn rejects_invalid_compression_level() {
        let mut args = base_args();
        args.push("--compression-level".to_string());
        args.push("12".to_string());

        let config = Config::try_parse_from(args).unwrap();

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("compression level"));
    }

    #[test]
    fn rejects_empty_collection_names() {
        let mut args = base_args();
        let index = args.iter().position(|a| a == "a,b").unwrap();
        args[index] = "a,,b".to_string();

        let config = Config::try_parse_from(args).unwrap();

        assert!(config.validate().is_err());
    }

    #[test]
    fn builds_store_for_http_endpoint() {
        let config = Config::try_parse_from(base_args()).unwrap();

        assert!(config.object_store().is_ok());
    }
}
