//! Cloud-backed file handles.
//!
//! `ReadableCloudFile` serves engine reads straight from an object via ranged
//! gets. `WritableCloudFile` buffers engine writes in a local file and
//! finalises them to the cloud: sorted data files upload once on close,
//! manifests upload periodically on sync and always on close.

use crate::cloud::clock::SharedClock;
use crate::cloud::error::{CloudError, CloudResult};
use crate::cloud::filename::{classify, parse_file_number, FileType};
use crate::cloud::storage_client::CloudStorageClient;
use crate::cloud::telemetry::{CloudStatistics, HistogramKind, Ticker};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error};

// ============================================================================
// ReadableCloudFile
// ============================================================================

/// Random/sequential reader over one cloud object.
///
/// A head probe at open caches size and mtime. If the probe fails, the handle
/// is still constructed but carries the failure; every read returns it. The
/// environment inspects `status()` to decide whether to fall back elsewhere.
pub struct ReadableCloudFile {
    client: CloudStorageClient,
    bucket: String,
    key: String,
    logical_path: String,
    size: u64,
    mtime_ms: u64,
    /// Sequential read cursor
    offset: u64,
    status: Option<CloudError>,
}

impl ReadableCloudFile {
    pub async fn open(
        client: CloudStorageClient,
        bucket: &str,
        key: &str,
        logical_path: &str,
    ) -> Self {
        let (size, mtime_ms, status) = match client.head(bucket, key).await {
            Ok(meta) => (meta.size, meta.mtime_ms, None),
            Err(e) => {
                debug!(bucket, key, "cloud file open probe failed: {}", e);
                (0, 0, Some(e))
            }
        };
        ReadableCloudFile {
            client,
            bucket: bucket.to_string(),
            key: key.to_string(),
            logical_path: logical_path.to_string(),
            size,
            mtime_ms,
            offset: 0,
            status,
        }
    }

    /// Outcome of the open probe
    pub fn status(&self) -> CloudResult<()> {
        match &self.status {
            None => Ok(()),
            Some(e) => Err(e.clone()),
        }
    }

    /// Random-access read of up to `n` bytes at `offset`. Past end-of-file
    /// the result is short or empty, never an error. A zero-length read still
    /// probes the object (ranges are inclusive on the wire, so one byte is
    /// fetched and dropped).
    pub async fn read_at(&self, offset: u64, n: usize) -> CloudResult<Vec<u8>> {
        self.status()?;
        if offset >= self.size {
            return Ok(Vec::new());
        }
        let n = (n as u64).min(self.size - offset);
        let range_len = n.max(1);
        let data = self
            .client
            .get(&self.bucket, &self.key, Some(offset..offset + range_len))
            .await?;
        if n == 0 {
            return Ok(Vec::new());
        }
        Ok(data)
    }

    /// Sequential read from the cursor
    pub async fn read(&mut self, n: usize) -> CloudResult<Vec<u8>> {
        let data = self.read_at(self.offset, n).await?;
        self.offset += data.len() as u64;
        Ok(data)
    }

    /// Advance the cursor without reading; clamps at end-of-file
    pub fn skip(&mut self, n: u64) {
        self.offset = (self.offset + n).min(self.size);
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn mtime_ms(&self) -> u64 {
        self.mtime_ms
    }

    /// Stable identity for the engine's persistent read cache: the parsed
    /// file number when this is a sorted data file, which survives the copy
    /// between local and cloud storage.
    pub fn unique_id(&self) -> Option<u64> {
        if classify(&self.logical_path) == FileType::SortedData {
            parse_file_number(&self.logical_path)
        } else {
            None
        }
    }
}

// ============================================================================
// WritableCloudFile
// ============================================================================

/// How a writable cloud file finalises
#[derive(Debug, Clone)]
pub struct WritableOptions {
    /// Manifest files upload periodically and keep their local copy
    pub is_manifest: bool,
    /// Delete the local temp after a successful close upload
    pub delete_local_on_close: bool,
    /// Minimum interval between manifest uploads
    pub manifest_periodicity: Duration,
}

/// Buffered writer whose bytes go to a local file first and reach the cloud
/// on sync (manifests) or close (everything).
pub struct WritableCloudFile {
    client: CloudStorageClient,
    clock: SharedClock,
    statistics: Option<Arc<CloudStatistics>>,
    local_path: PathBuf,
    bucket: String,
    key: String,
    opts: WritableOptions,
    /// `None` until the first successful upload, so the first sync always
    /// makes the manifest durable
    last_manifest_upload_micros: Option<u64>,
    file: Option<tokio::fs::File>,
}

impl WritableCloudFile {
    /// Open the local temp file under the logical path. The cloud key is
    /// fixed here and never changes.
    pub async fn create(
        client: CloudStorageClient,
        clock: SharedClock,
        statistics: Option<Arc<CloudStatistics>>,
        local_path: &Path,
        bucket: &str,
        key: &str,
        opts: WritableOptions,
    ) -> CloudResult<Self> {
        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::File::create(local_path).await?;
        debug!(
            path = %local_path.display(),
            bucket,
            key,
            manifest = opts.is_manifest,
            "opened writable cloud file"
        );
        Ok(WritableCloudFile {
            client,
            clock,
            statistics,
            local_path: local_path.to_path_buf(),
            bucket: bucket.to_string(),
            key: key.to_string(),
            opts,
            last_manifest_upload_micros: None,
            file: Some(file),
        })
    }

    pub async fn append(&mut self, data: &[u8]) -> CloudResult<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| CloudError::Io(already_closed(&self.local_path)))?;
        file.write_all(data).await?;
        Ok(())
    }

    /// Sync the local file; for manifests, additionally upload if the
    /// durability interval has elapsed.
    pub async fn sync(&mut self) -> CloudResult<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| CloudError::Io(already_closed(&self.local_path)))?;
        file.sync_all().await?;
        if self.opts.is_manifest {
            self.upload_manifest(false).await?;
        }
        Ok(())
    }

    /// Flush and finalise. Sorted data uploads as one atomic put and the
    /// local temp is deleted when configured so; manifests upload
    /// unconditionally and always keep the local file.
    pub async fn close(&mut self) -> CloudResult<()> {
        let mut file = match self.file.take() {
            Some(file) => file,
            // Second close is a no-op
            None => return Ok(()),
        };
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        if self.opts.is_manifest {
            return self.upload_manifest(true).await;
        }

        // upload_file rejects zero-byte bodies: a truncated local file must
        // never become an empty cloud object
        self.client
            .upload_file(&self.local_path, &self.bucket, &self.key)
            .await?;

        if self.opts.delete_local_on_close {
            tokio::fs::remove_file(&self.local_path).await?;
        }
        debug!(path = %self.local_path.display(), "closed and uploaded cloud file");
        Ok(())
    }

    /// Upload the manifest if forced or the durability interval has elapsed.
    /// A successful upload advances the gate and feeds statistics.
    async fn upload_manifest(&mut self, force: bool) -> CloudResult<()> {
        let now = self.clock.now_micros();
        let interval_micros = self.opts.manifest_periodicity.as_micros() as u64;
        if !force {
            if let Some(last) = self.last_manifest_upload_micros {
                if now.saturating_sub(last) < interval_micros {
                    return Ok(());
                }
            }
        }
        match self
            .client
            .upload_file(&self.local_path, &self.bucket, &self.key)
            .await
        {
            Ok(sample) => {
                self.last_manifest_upload_micros = Some(now);
                if let Some(stats) = &self.statistics {
                    stats.record_tick(Ticker::ManifestWrites, 1);
                    stats.measure_time(HistogramKind::ManifestWriteMillis, sample.micros / 1000);
                }
                debug!(path = %self.local_path.display(), "manifest made durable");
                Ok(())
            }
            Err(e) => {
                error!(path = %self.local_path.display(), "manifest upload failed: {}", e);
                Err(e)
            }
        }
    }

    pub fn local_path(&self) -> &Path {
        &self.local_path
    }
}

fn already_closed(path: &Path) -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::Other,
        format!("{}: file already closed", path.display()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::clock::{SimulatedClock, SystemClock};
    use crate::cloud::object_store::{InMemoryObjectStore, ObjectStore};
    use crate::cloud::retry::NoRetry;

    async fn test_client() -> (InMemoryObjectStore, CloudStorageClient) {
        let store = InMemoryObjectStore::new();
        store.create_bucket("b", "r").await.unwrap();
        let client = CloudStorageClient::new(Arc::new(store.clone()), Arc::new(NoRetry), None);
        (store, client)
    }

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "cloudenv-file-test-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("system time before Unix epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn sst_options() -> WritableOptions {
        WritableOptions {
            is_manifest: false,
            delete_local_on_close: true,
            manifest_periodicity: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_readable_reads_and_cursor() {
        let (_store, client) = test_client().await;
        client.put("b", "p/000001.sst", b"0123456789", None).await.unwrap();

        let mut file =
            ReadableCloudFile::open(client, "b", "p/000001.sst", "/db/000001.sst").await;
        assert!(file.status().is_ok());
        assert_eq!(file.size(), 10);

        assert_eq!(file.read_at(2, 4).await.unwrap(), b"2345");

        // Sequential cursor advances with reads and skips
        assert_eq!(file.read(3).await.unwrap(), b"012");
        file.skip(4);
        assert_eq!(file.read(10).await.unwrap(), b"789");
        assert!(file.read(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_readable_short_read_past_eof() {
        let (_store, client) = test_client().await;
        client.put("b", "k", b"abcdef", None).await.unwrap();

        let file = ReadableCloudFile::open(client, "b", "k", "/db/000001.sst").await;
        assert_eq!(file.read_at(4, 100).await.unwrap(), b"ef");
        assert!(file.read_at(6, 10).await.unwrap().is_empty());
        assert!(file.read_at(100, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_readable_zero_length_read_probes() {
        let (_store, client) = test_client().await;
        client.put("b", "k", b"abc", None).await.unwrap();

        let file = ReadableCloudFile::open(client, "b", "k", "/db/x.sst").await;
        assert!(file.read_at(0, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_readable_missing_object_propagates_open_error() {
        let (_store, client) = test_client().await;
        let file = ReadableCloudFile::open(client, "b", "ghost", "/db/000009.sst").await;

        assert!(file.status().unwrap_err().is_not_found());
        assert!(file.read_at(0, 4).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_readable_unique_id() {
        let (_store, client) = test_client().await;
        client.put("b", "k", b"x", None).await.unwrap();

        let file =
            ReadableCloudFile::open(client.clone(), "b", "k", "/db/000123.sst").await;
        assert_eq!(file.unique_id(), Some(123));

        let file = ReadableCloudFile::open(client, "b", "k", "/db/MANIFEST-000001").await;
        assert_eq!(file.unique_id(), None);
    }

    #[tokio::test]
    async fn test_writable_sst_uploads_on_close_and_deletes_local() {
        let (store, client) = test_client().await;
        let dir = temp_dir();
        let local = dir.join("000001.sst");
        let clock: SharedClock = Arc::new(SystemClock::new());

        let mut file = WritableCloudFile::create(
            client.clone(),
            clock,
            None,
            &local,
            "b",
            "p/000001.sst",
            sst_options(),
        )
        .await
        .unwrap();

        file.append(&vec![9u8; 1024]).await.unwrap();
        file.sync().await.unwrap();
        file.close().await.unwrap();

        let meta = client.head("b", "p/000001.sst").await.unwrap();
        assert_eq!(meta.size, 1024);
        assert!(!local.exists(), "local temp deleted after upload");
        assert!(store.contains("b", "p/000001.sst"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_writable_sst_keeps_local_when_configured() {
        let (_store, client) = test_client().await;
        let dir = temp_dir();
        let local = dir.join("000002.sst");
        let clock: SharedClock = Arc::new(SystemClock::new());

        let mut file = WritableCloudFile::create(
            client,
            clock,
            None,
            &local,
            "b",
            "p/000002.sst",
            WritableOptions {
                delete_local_on_close: false,
                ..sst_options()
            },
        )
        .await
        .unwrap();
        file.append(b"contents").await.unwrap();
        file.close().await.unwrap();

        assert!(local.exists());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_writable_zero_byte_close_is_io_error() {
        let (store, client) = test_client().await;
        let dir = temp_dir();
        let local = dir.join("000003.sst");
        let clock: SharedClock = Arc::new(SystemClock::new());

        let mut file = WritableCloudFile::create(
            client,
            clock,
            None,
            &local,
            "b",
            "p/000003.sst",
            sst_options(),
        )
        .await
        .unwrap();
        let err = file.close().await.unwrap_err();
        assert!(matches!(err, CloudError::Io(_)));
        assert!(!store.contains("b", "p/000003.sst"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_manifest_periodicity_gates_sync_uploads() {
        let (store, client) = test_client().await;
        let dir = temp_dir();
        let local = dir.join("MANIFEST-000001");
        let sim = Arc::new(SimulatedClock::new(1_000_000));
        let clock: SharedClock = sim.clone();
        let stats = Arc::new(CloudStatistics::new());

        let mut file = WritableCloudFile::create(
            client,
            clock,
            Some(Arc::clone(&stats)),
            &local,
            "b",
            "p/MANIFEST-000001",
            WritableOptions {
                is_manifest: true,
                delete_local_on_close: false,
                manifest_periodicity: Duration::from_millis(60_000),
            },
        )
        .await
        .unwrap();

        file.append(b"version-edit-1").await.unwrap();
        // First sync uploads (nothing uploaded yet)
        file.sync().await.unwrap();
        assert_eq!(stats.ticker_count(Ticker::ManifestWrites), 1);

        // Within the interval: no upload
        sim.advance_millis(59_999);
        file.append(b"version-edit-2").await.unwrap();
        file.sync().await.unwrap();
        assert_eq!(stats.ticker_count(Ticker::ManifestWrites), 1);

        // Past the interval: uploads again
        sim.advance_millis(2);
        file.sync().await.unwrap();
        assert_eq!(stats.ticker_count(Ticker::ManifestWrites), 2);

        // Close uploads unconditionally and keeps the local file
        file.append(b"version-edit-3").await.unwrap();
        file.close().await.unwrap();
        assert_eq!(stats.ticker_count(Ticker::ManifestWrites), 3);
        assert!(local.exists());

        let body = store.contains("b", "p/MANIFEST-000001");
        assert!(body);
        let hist = stats.histogram_data(HistogramKind::ManifestWriteMillis);
        assert_eq!(hist.count, 3);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_manifest_upload_carries_full_contents() {
        let (_store, client) = test_client().await;
        let dir = temp_dir();
        let local = dir.join("MANIFEST-000007");
        let clock: SharedClock = Arc::new(SimulatedClock::new(0));

        let mut file = WritableCloudFile::create(
            client.clone(),
            clock,
            None,
            &local,
            "b",
            "p/MANIFEST-000007",
            WritableOptions {
                is_manifest: true,
                delete_local_on_close: false,
                manifest_periodicity: Duration::from_secs(60),
            },
        )
        .await
        .unwrap();
        file.append(b"edit-a;").await.unwrap();
        file.append(b"edit-b;").await.unwrap();
        file.close().await.unwrap();

        let body = client.get("b", "p/MANIFEST-000007", None).await.unwrap();
        assert_eq!(body, b"edit-a;edit-b;");

        std::fs::remove_dir_all(&dir).ok();
    }
}
