//! Streaming gzip transfer from a node download into object storage.

use std::io::Write;

use flate2::write::GzEncoder;
use flate2::Compression;
use futures::StreamExt;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, WriteMultipart};
use tracing::debug;

use crate::error::{BackupError, Result};
use crate::snapshots::SnapshotStream;

/// Compressed bytes buffered before a part is handed to the uploader.
const PART_THRESHOLD: usize = 8 * 1024 * 1024;

/// Upper bound on upload parts in flight per transfer.
const MAX_IN_FLIGHT_PARTS: usize = 4;

/// Map a configured level (0-9) onto flate2's presets.
pub fn compression_level(level: u32) -> Compression {
    match level {
        0 => Compression::none(),
        1 => Compression::fast(),
        6 => Compression::default(),
        9 => Compression::best(),
        n => Compression::new(n),
    }
}

/// Stream `body` through gzip into a multipart upload at `key`.
///
/// Download, compression, and upload overlap: compressed output is handed
/// to the uploader part by part, and `wait_for_capacity` stalls the
/// producer whenever too many parts are in flight. The whole object is
/// never held in memory. A read, compression, or part upload error aborts
/// the multipart upload, so a truncated object is never completed.
///
/// Returns the number of compressed bytes shipped.
pub async fn upload_compressed(
    store: &dyn ObjectStore,
    key: &ObjectPath,
    body: SnapshotStream,
    level: Compression,
) -> Result<u64> {
    upload_in_parts(store, key, body, level, PART_THRESHOLD).await
}

async fn upload_in_parts(
    store: &dyn ObjectStore,
    key: &ObjectPath,
    mut body: SnapshotStream,
    level: Compression,
    part_threshold: usize,
) -> Result<u64> {
    let upload = store.put_multipart(key).await.map_err(|e| {
        BackupError::Storage(format!("could not start upload to `{key}`: {e}"))
    })?;
    let mut writer = WriteMultipart::new(upload);
    let mut encoder = GzEncoder::new(Vec::new(), level);
    let mut compressed_bytes: u64 = 0;

    loop {
        let chunk = match body.next().await {
            Some(Ok(chunk)) => chunk,
            Some(Err(err)) => {
                writer.abort().await.ok();
                return Err(BackupError::Download(format!(
                    "snapshot stream failed mid-transfer: {err}"
                )));
            }
            None => break,
        };

        if let Err(err) = encoder.write_all(&chunk) {
            writer.abort().await.ok();
            return Err(err.into());
        }

        if encoder.get_ref().len() >= part_threshold {
            let part = std::mem::take(encoder.get_mut());
            compressed_bytes += part.len() as u64;
            writer.write(&part);
            if let Err(err) = writer.wait_for_capacity(MAX_IN_FLIGHT_PARTS).await {
                writer.abort().await.ok();
                return Err(BackupError::Storage(format!(
                    "upload to `{key}` failed: {err}"
                )));
            }
        }
    }

    let tail = match encoder.finish() {
        Ok(tail) => tail,
        Err(err) => {
            writer.abort().await.ok();
            return Err(err.into());
        }
    };
    compressed_bytes += tail.len() as u64;
    writer.write(&tail);

    // `finish` consumes the writer, so drain in-flight parts first: a part
    // failure must surface here while the upload can still be aborted.
    if let Err(err) = writer.wait_for_capacity(0).await {
        writer.abort().await.ok();
        return Err(BackupError::Storage(format!(
            "upload to `{key}` failed: {err}"
        )));
    }

    writer.finish().await.map_err(|e| {
        BackupError::Storage(format!("could not complete upload to `{key}`: {e}"))
    })?;

    debug!(key = %key, compressed_bytes, "upload complete");
    Ok(compressed_bytes)
}
