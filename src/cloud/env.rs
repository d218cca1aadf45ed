//! The cloud storage environment facade.
//!
//! `CloudEnv` gives the engine an ordinary filesystem surface and routes each
//! operation by file class:
//!
//! ```text
//!                 ┌─> local filesystem (write-through cache, plain files)
//! engine ─> CloudEnv ─> object store (sorted data, manifests, identity)
//!                 └─> log stream (write-ahead log) ─> tailer ─> local cache
//! ```
//!
//! Sorted data files are uploaded on close and read back with ranged gets or
//! from the warmed local cache. Manifests upload periodically. Log files turn
//! into stream records when local log files are disabled. Everything else is
//! plain local I/O.

use crate::cloud::clock::{SharedClock, SystemClock};
use crate::cloud::config::CloudEnvOptions;
use crate::cloud::deletion::{spawn_deletion_queue, DeletionQueueHandle};
use crate::cloud::dbid::DbidRegistry;
use crate::cloud::error::{CloudError, CloudResult};
use crate::cloud::file::{ReadableCloudFile, WritableCloudFile, WritableOptions};
use crate::cloud::filename::{basename, classify, parse_file_number, FileType, PathMapper};
use crate::cloud::log_stream::LogStream;
use crate::cloud::log_writer::CloudLogFile;
use crate::cloud::object_store::ObjectStore;
use crate::cloud::retry::{ExponentialBackoff, RetryStrategy};
use crate::cloud::storage_client::CloudStorageClient;
use crate::cloud::tailer::{retry_file_op, LogTailer};
use parking_lot::Mutex;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, warn};

// ============================================================================
// File handles handed to the engine
// ============================================================================

/// Local random/sequential reader
pub struct LocalReadFile {
    file: tokio::fs::File,
    size: u64,
    mtime_ms: u64,
    /// Sequential read cursor
    offset: u64,
    path: PathBuf,
}

impl LocalReadFile {
    pub async fn open(path: &Path) -> CloudResult<Self> {
        let file = tokio::fs::File::open(path).await?;
        let meta = file.metadata().await?;
        let mtime_ms = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Ok(LocalReadFile {
            file,
            size: meta.len(),
            mtime_ms,
            offset: 0,
            path: path.to_path_buf(),
        })
    }

    async fn read_at(&mut self, offset: u64, n: usize) -> CloudResult<Vec<u8>> {
        if offset >= self.size {
            return Ok(Vec::new());
        }
        self.file.seek(SeekFrom::Start(offset)).await?;
        let want = n.min((self.size - offset) as usize);
        let mut buf = vec![0u8; want];
        let mut filled = 0;
        while filled < want {
            let got = self.file.read(&mut buf[filled..]).await?;
            if got == 0 {
                break;
            }
            filled += got;
        }
        buf.truncate(filled);
        Ok(buf)
    }
}

/// Local append-only writer
pub struct LocalWriteFile {
    file: Option<tokio::fs::File>,
    path: PathBuf,
}

impl LocalWriteFile {
    pub async fn create(path: &Path) -> CloudResult<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::File::create(path).await?;
        Ok(LocalWriteFile {
            file: Some(file),
            path: path.to_path_buf(),
        })
    }
}

/// Read handle returned by `open_for_read`
pub enum ReadFile {
    Local(LocalReadFile),
    Cloud(ReadableCloudFile),
}

impl ReadFile {
    pub async fn read_at(&mut self, offset: u64, n: usize) -> CloudResult<Vec<u8>> {
        match self {
            ReadFile::Local(f) => f.read_at(offset, n).await,
            ReadFile::Cloud(f) => f.read_at(offset, n).await,
        }
    }

    /// Sequential read; each handle keeps its own cursor
    pub async fn read(&mut self, n: usize) -> CloudResult<Vec<u8>> {
        match self {
            ReadFile::Local(f) => {
                let offset = f.offset;
                let data = f.read_at(offset, n).await?;
                f.offset += data.len() as u64;
                Ok(data)
            }
            ReadFile::Cloud(f) => f.read(n).await,
        }
    }

    pub fn size(&self) -> u64 {
        match self {
            ReadFile::Local(f) => f.size,
            ReadFile::Cloud(f) => f.size(),
        }
    }

    /// Stable cache identity for sorted data files
    pub fn unique_id(&self) -> Option<u64> {
        match self {
            ReadFile::Local(f) => {
                let path = f.path.to_string_lossy();
                if classify(&path) == FileType::SortedData {
                    parse_file_number(&path)
                } else {
                    None
                }
            }
            ReadFile::Cloud(f) => f.unique_id(),
        }
    }
}

/// Write handle returned by `open_for_write`
pub enum WriteFile {
    Local(LocalWriteFile),
    Cloud(WritableCloudFile),
    Log(CloudLogFile),
}

impl WriteFile {
    pub async fn append(&mut self, data: &[u8]) -> CloudResult<()> {
        match self {
            WriteFile::Local(f) => {
                let file = f
                    .file
                    .as_mut()
                    .ok_or_else(|| closed_error(&f.path))?;
                file.write_all(data).await?;
                Ok(())
            }
            WriteFile::Cloud(f) => f.append(data).await,
            WriteFile::Log(f) => f.append(data).await,
        }
    }

    pub async fn sync(&mut self) -> CloudResult<()> {
        match self {
            WriteFile::Local(f) => {
                let file = f
                    .file
                    .as_mut()
                    .ok_or_else(|| closed_error(&f.path))?;
                file.sync_all().await?;
                Ok(())
            }
            WriteFile::Cloud(f) => f.sync().await,
            WriteFile::Log(f) => f.sync().await,
        }
    }

    pub async fn close(&mut self) -> CloudResult<()> {
        match self {
            WriteFile::Local(f) => {
                if let Some(mut file) = f.file.take() {
                    file.flush().await?;
                    file.sync_all().await?;
                }
                Ok(())
            }
            WriteFile::Cloud(f) => f.close().await,
            WriteFile::Log(f) => f.close().await,
        }
    }
}

fn closed_error(path: &Path) -> CloudError {
    CloudError::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        format!("{}: file already closed", path.display()),
    ))
}

// ============================================================================
// CloudEnv
// ============================================================================

/// The storage environment. One per database instance.
pub struct CloudEnv {
    options: CloudEnvOptions,
    mapper: PathMapper,
    storage: CloudStorageClient,
    registry: DbidRegistry,
    stream: Option<Arc<dyn LogStream>>,
    stream_name: String,
    tailer: Option<LogTailer>,
    deletion: DeletionQueueHandle,
    deletion_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    clock: SharedClock,
    /// Construction failure, if any; every operation checks this first
    status: Option<CloudError>,
}

impl CloudEnv {
    /// Build an environment over the given adapters, using the system clock.
    ///
    /// Configuration errors fail fast with `InvalidArgument`. Failures while
    /// provisioning cloud state (bucket creation, stream creation, tailer
    /// start) return a constructed env whose `status()` carries the error and
    /// whose operations all refuse to run.
    pub async fn new(
        options: CloudEnvOptions,
        store: Arc<dyn ObjectStore>,
        stream: Option<Arc<dyn LogStream>>,
    ) -> CloudResult<CloudEnv> {
        Self::with_clock(options, store, stream, Arc::new(SystemClock::new())).await
    }

    /// Build a production environment over S3. The adapter is constructed
    /// from the options: credentials, bucket region, custom endpoint, and the
    /// connect/request timeouts.
    #[cfg(feature = "s3")]
    pub async fn new_s3(
        mut options: CloudEnvOptions,
        stream: Option<Arc<dyn LogStream>>,
    ) -> CloudResult<CloudEnv> {
        use crate::cloud::s3_store::S3ObjectStore;

        // Resolve regions before the adapter is built; with_clock normalizes
        // again, which is harmless
        options.normalize();
        let region = options
            .dest_bucket
            .as_ref()
            .or(options.src_bucket.as_ref())
            .map(|b| b.region.clone())
            .unwrap_or_else(|| crate::cloud::config::DEFAULT_REGION.to_string());
        let store: Arc<dyn ObjectStore> = Arc::new(S3ObjectStore::new(
            options.credentials.clone(),
            &region,
            options.s3_endpoint.clone(),
            options.connect_timeout,
            options.request_timeout,
        ));
        Self::new(options, store, stream).await
    }

    pub async fn with_clock(
        mut options: CloudEnvOptions,
        store: Arc<dyn ObjectStore>,
        stream: Option<Arc<dyn LogStream>>,
        clock: SharedClock,
    ) -> CloudResult<CloudEnv> {
        options.normalize();
        options.validate()?;

        let retry: Arc<dyn RetryStrategy> = options
            .retry_strategy
            .clone()
            .unwrap_or_else(|| Arc::new(ExponentialBackoff::default()));
        let storage = CloudStorageClient::new(
            store,
            retry,
            options.cloud_request_callback.clone(),
        );

        let mapper = PathMapper::new(
            options
                .src_bucket
                .as_ref()
                .map(|b| b.object_prefix.as_str()),
            options
                .dest_bucket
                .as_ref()
                .map(|b| b.object_prefix.as_str()),
        );

        let mut status: Option<CloudError> = None;

        if let Some(dest) = &options.dest_bucket {
            if let Err(e) = storage.create_bucket(&dest.bucket, &dest.region).await {
                warn!(bucket = %dest.bucket, "destination bucket creation failed: {}", e);
                status = Some(e);
            }
        }

        // The log stream chain only runs when the WAL leaves the local disk
        let stream_name = Self::wal_stream_name(&options);
        let mut tailer = None;
        if !options.keep_local_log_files && status.is_none() {
            match &stream {
                Some(stream) => {
                    let cache_root = Self::wal_cache_root(&options);
                    match LogTailer::start(Arc::clone(stream), &stream_name, cache_root).await
                    {
                        Ok(t) => tailer = Some(t),
                        Err(e) => {
                            warn!("log tailer failed to start: {}", e);
                            status = Some(e);
                        }
                    }
                }
                None => {
                    status = Some(CloudError::InvalidArgument(
                        "a log stream adapter is required when local log files are disabled"
                            .to_string(),
                    ));
                }
            }
        }

        let (deletion, deletion_task) =
            spawn_deletion_queue(storage.clone(), options.file_deletion_delay)?;

        let registry = DbidRegistry::new(storage.clone());

        info!(
            src = options.src_bucket.as_ref().map(|b| b.bucket.as_str()),
            dest = options.dest_bucket.as_ref().map(|b| b.bucket.as_str()),
            ready = status.is_none(),
            "cloud env constructed"
        );

        Ok(CloudEnv {
            options,
            mapper,
            storage,
            registry,
            stream,
            stream_name,
            tailer,
            deletion,
            deletion_task: Mutex::new(Some(deletion_task)),
            clock,
            status,
        })
    }

    fn wal_stream_name(options: &CloudEnvOptions) -> String {
        let bucket = options
            .src_bucket
            .as_ref()
            .or(options.dest_bucket.as_ref())
            .map(|b| b.bucket.as_str())
            .unwrap_or("unconfigured");
        format!("{}-wal", bucket)
    }

    /// Per-env cache directory: unique suffix so a second env on the same
    /// host can never share (and corrupt) a tailer cache.
    fn wal_cache_root(options: &CloudEnvOptions) -> PathBuf {
        let bucket = options
            .src_bucket
            .as_ref()
            .or(options.dest_bucket.as_ref())
            .map(|b| b.bucket.as_str())
            .unwrap_or("unconfigured");
        std::env::temp_dir()
            .join("cloudenv-wal-cache")
            .join(bucket)
            .join(format!(
                "{}",
                std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .expect("system time before Unix epoch")
                    .as_nanos()
            ))
    }

    /// Construction outcome; `Ok` means the env is serving
    pub fn status(&self) -> CloudResult<()> {
        match &self.status {
            None => Ok(()),
            Some(e) => Err(e.clone()),
        }
    }

    fn ready(&self) -> CloudResult<()> {
        self.status()
    }

    pub fn options(&self) -> &CloudEnvOptions {
        &self.options
    }

    pub fn storage(&self) -> &CloudStorageClient {
        &self.storage
    }

    pub fn registry(&self) -> &DbidRegistry {
        &self.registry
    }

    pub fn tailer(&self) -> Option<&LogTailer> {
        self.tailer.as_ref()
    }

    fn dest_bucket(&self) -> Option<&str> {
        self.options.dest_bucket.as_ref().map(|b| b.bucket.as_str())
    }

    fn src_bucket(&self) -> Option<&str> {
        self.options.src_bucket.as_ref().map(|b| b.bucket.as_str())
    }

    fn cloud_log_files(&self) -> bool {
        !self.options.keep_local_log_files
    }

    /// A destination object with an outstanding delayed delete is already
    /// deleted as far as the engine is concerned
    fn dest_hidden(&self, key: &str) -> bool {
        match self.dest_bucket() {
            Some(bucket) => self.deletion.is_pending(bucket, key),
            None => false,
        }
    }

    // ------------------------------------------------------------------
    // Filesystem surface
    // ------------------------------------------------------------------

    /// Open a file for reading.
    ///
    /// Cloud-owned classes try the local copy first, then (in warm-cache
    /// mode) pull the object down, then fall back to reading the object
    /// directly: destination before source, so a fresh writer sees its own
    /// writes and a replica falls through to the possibly-stale source.
    pub async fn open_for_read(&self, path: &str) -> CloudResult<ReadFile> {
        self.ready()?;
        match classify(path) {
            FileType::SortedData | FileType::Manifest | FileType::Identity => {
                let local = Path::new(path);
                if tokio::fs::metadata(local).await.is_ok() {
                    return Ok(ReadFile::Local(LocalReadFile::open(local).await?));
                }

                if self.options.keep_local_sst_files {
                    // Warm the local cache from the cloud, then serve locally
                    if self.warm_local_copy(path).await {
                        return Ok(ReadFile::Local(LocalReadFile::open(local).await?));
                    }
                }

                if let Some(bucket) = self.dest_bucket() {
                    let key = self.mapper.destname(path);
                    if !self.dest_hidden(&key) {
                        let file =
                            ReadableCloudFile::open(self.storage.clone(), bucket, &key, path)
                                .await;
                        if file.status().is_ok() {
                            return Ok(ReadFile::Cloud(file));
                        }
                    }
                }
                if let Some(bucket) = self.src_bucket() {
                    let file = ReadableCloudFile::open(
                        self.storage.clone(),
                        bucket,
                        &self.mapper.srcname(path),
                        path,
                    )
                    .await;
                    if file.status().is_ok() {
                        return Ok(ReadFile::Cloud(file));
                    }
                }
                Err(CloudError::NotFound(path.to_string()))
            }
            FileType::Log if self.cloud_log_files() => {
                let tailer = self.require_tailer()?;
                let cache = tailer.cache_path(path);
                let file =
                    retry_file_op(|| async { LocalReadFile::open(&cache).await }).await?;
                Ok(ReadFile::Local(file))
            }
            _ => Ok(ReadFile::Local(LocalReadFile::open(Path::new(path)).await?)),
        }
    }

    /// Download `path` from dest, then src, into its local location.
    /// Returns whether a copy landed. Not-found falls through silently;
    /// the caller has more fallbacks to try.
    async fn warm_local_copy(&self, path: &str) -> bool {
        let local = Path::new(path);
        if let Some(bucket) = self.dest_bucket() {
            let key = self.mapper.destname(path);
            if !self.dest_hidden(&key) {
                match self.storage.download_file(bucket, &key, local).await {
                    Ok(_) => return true,
                    Err(e) if e.is_not_found() => {}
                    Err(e) => warn!(path, "warming from destination failed: {}", e),
                }
            }
        }
        if let Some(bucket) = self.src_bucket() {
            match self
                .storage
                .download_file(bucket, &self.mapper.srcname(path), local)
                .await
            {
                Ok(_) => return true,
                Err(e) if e.is_not_found() => {}
                Err(e) => warn!(path, "warming from source failed: {}", e),
            }
        }
        false
    }

    /// Open a file for writing.
    pub async fn open_for_write(&self, path: &str) -> CloudResult<WriteFile> {
        self.ready()?;
        let file_type = classify(path);
        match file_type {
            FileType::SortedData | FileType::Identity if self.options.has_dest() => {
                let bucket = self.dest_bucket().expect("has_dest checked");
                // Re-creating a name revokes any delayed delete queued for it
                self.deletion.cancel(bucket, &self.mapper.destname(path));
                let delete_local_on_close =
                    file_type == FileType::SortedData && !self.options.keep_local_sst_files;
                let file = WritableCloudFile::create(
                    self.storage.clone(),
                    Arc::clone(&self.clock),
                    self.options.cloud_statistics.clone(),
                    Path::new(path),
                    bucket,
                    &self.mapper.destname(path),
                    WritableOptions {
                        is_manifest: false,
                        delete_local_on_close,
                        manifest_periodicity: std::time::Duration::ZERO,
                    },
                )
                .await?;
                Ok(WriteFile::Cloud(file))
            }
            FileType::Manifest
                if self.options.has_dest()
                    && !self.options.manifest_durable_periodicity.is_zero() =>
            {
                let bucket = self.dest_bucket().expect("has_dest checked");
                self.deletion.cancel(bucket, &self.mapper.destname(path));
                let file = WritableCloudFile::create(
                    self.storage.clone(),
                    Arc::clone(&self.clock),
                    self.options.cloud_statistics.clone(),
                    Path::new(path),
                    bucket,
                    &self.mapper.destname(path),
                    WritableOptions {
                        is_manifest: true,
                        delete_local_on_close: false,
                        manifest_periodicity: self.options.manifest_durable_periodicity,
                    },
                )
                .await?;
                Ok(WriteFile::Cloud(file))
            }
            FileType::Log if self.cloud_log_files() => {
                let stream = self.require_stream()?;
                Ok(WriteFile::Log(CloudLogFile::new(
                    stream,
                    &self.stream_name,
                    path,
                )))
            }
            _ => Ok(WriteFile::Local(
                LocalWriteFile::create(Path::new(path)).await?,
            )),
        }
    }

    /// Delete a file. Cloud-owned classes unlink locally right away and post
    /// the cloud object to the delayed deletion queue; late readers keep
    /// working until the delay passes.
    pub async fn delete_file(&self, path: &str) -> CloudResult<()> {
        self.ready()?;
        match classify(path) {
            FileType::SortedData | FileType::Manifest | FileType::Identity
                if self.options.has_dest() =>
            {
                match tokio::fs::remove_file(path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
                let bucket = self.dest_bucket().expect("has_dest checked");
                self.deletion.enqueue(bucket, &self.mapper.destname(path));
                debug!(path, "scheduled delayed cloud delete");
                Ok(())
            }
            FileType::Log if self.cloud_log_files() => {
                let stream = self.require_stream()?;
                CloudLogFile::log_delete(&stream, &self.stream_name, path).await
            }
            _ => {
                tokio::fs::remove_file(path).await?;
                Ok(())
            }
        }
    }

    /// Rename a file. Only identity files (and plain local files) support
    /// rename; the engine must never rely on rename for sorted data,
    /// manifests, or logs.
    pub async fn rename_file(&self, src: &str, dst: &str) -> CloudResult<()> {
        self.ready()?;
        match classify(src) {
            FileType::SortedData | FileType::Manifest | FileType::Log => {
                debug_assert!(false, "engine renamed a cloud-owned file: {}", src);
                Err(CloudError::NotSupported(format!(
                    "rename of {} is not supported",
                    src
                )))
            }
            FileType::Identity if self.options.has_dest() => {
                self.publish_identity(src, dst).await?;
                tokio::fs::rename(src, dst).await?;
                Ok(())
            }
            _ => {
                tokio::fs::rename(src, dst).await?;
                Ok(())
            }
        }
    }

    /// Upload the identity object and write the registry entry keyed by the
    /// identity contents. This is the publication point: after it succeeds,
    /// the instance is discoverable by dbid.
    async fn publish_identity(&self, src: &str, dst: &str) -> CloudResult<()> {
        let contents = tokio::fs::read_to_string(src).await?;
        let dbid = contents.trim().to_string();
        if dbid.is_empty() {
            return Err(CloudError::InvalidArgument(format!(
                "{}: identity file is empty",
                src
            )));
        }
        let bucket = self.dest_bucket().expect("caller checked has_dest");
        self.storage
            .put(bucket, &self.mapper.destname(dst), contents.as_bytes(), None)
            .await?;
        let dirname = self.mapper.dest_prefix().expect("has_dest checked");
        self.registry.save(bucket, &dbid, dirname).await?;
        info!(dbid = %dbid, "published database identity");
        Ok(())
    }

    /// Whether a file exists in any backend, probed in `open_for_read` order
    pub async fn file_exists(&self, path: &str) -> CloudResult<bool> {
        self.ready()?;
        match classify(path) {
            FileType::SortedData | FileType::Manifest | FileType::Identity => {
                if tokio::fs::metadata(path).await.is_ok() {
                    return Ok(true);
                }
                if let Some(bucket) = self.dest_bucket() {
                    let key = self.mapper.destname(path);
                    if !self.dest_hidden(&key) && self.storage.exists(bucket, &key).await? {
                        return Ok(true);
                    }
                }
                if let Some(bucket) = self.src_bucket() {
                    if self.storage.exists(bucket, &self.mapper.srcname(path)).await? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            FileType::Log if self.cloud_log_files() => {
                let tailer = self.require_tailer()?;
                let cache = tailer.cache_path(path);
                match retry_file_op(|| async {
                    tokio::fs::metadata(&cache).await.map_err(CloudError::from)
                })
                .await
                {
                    Ok(_) => Ok(true),
                    Err(e) if e.is_not_found() => Ok(false),
                    Err(CloudError::TimedOut(_)) => Ok(false),
                    Err(e) => Err(e),
                }
            }
            _ => Ok(tokio::fs::metadata(path).await.is_ok()),
        }
    }

    /// Size of a file, preferring the local copy and falling back to a cloud
    /// head probe for cloud-owned classes
    pub async fn file_size(&self, path: &str) -> CloudResult<u64> {
        self.ready()?;
        match classify(path) {
            FileType::Log if self.cloud_log_files() => {
                let tailer = self.require_tailer()?;
                let cache = tailer.cache_path(path);
                let meta = retry_file_op(|| async {
                    tokio::fs::metadata(&cache).await.map_err(CloudError::from)
                })
                .await?;
                Ok(meta.len())
            }
            file_type => {
                if let Ok(meta) = tokio::fs::metadata(path).await {
                    return Ok(meta.len());
                }
                if cloud_owned(file_type) {
                    if let Some(meta) = self.cloud_head(path).await? {
                        return Ok(meta.size);
                    }
                }
                Err(CloudError::NotFound(path.to_string()))
            }
        }
    }

    /// Modification time in Unix milliseconds
    pub async fn file_mtime(&self, path: &str) -> CloudResult<u64> {
        self.ready()?;
        match classify(path) {
            FileType::Log if self.cloud_log_files() => {
                let tailer = self.require_tailer()?;
                let cache = tailer.cache_path(path);
                let meta = retry_file_op(|| async {
                    tokio::fs::metadata(&cache).await.map_err(CloudError::from)
                })
                .await?;
                Ok(meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|d| d.as_millis() as u64)
                    .unwrap_or(0))
            }
            file_type => {
                if let Ok(meta) = tokio::fs::metadata(path).await {
                    return Ok(meta
                        .modified()
                        .ok()
                        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                        .map(|d| d.as_millis() as u64)
                        .unwrap_or(0));
                }
                if cloud_owned(file_type) {
                    if let Some(meta) = self.cloud_head(path).await? {
                        return Ok(meta.mtime_ms);
                    }
                }
                Err(CloudError::NotFound(path.to_string()))
            }
        }
    }

    /// Head against dest then src; `Ok(None)` when the object is in neither
    async fn cloud_head(
        &self,
        path: &str,
    ) -> CloudResult<Option<crate::cloud::object_store::ObjectMeta>> {
        if let Some(bucket) = self.dest_bucket() {
            let key = self.mapper.destname(path);
            if !self.dest_hidden(&key) {
                match self.storage.head(bucket, &key).await {
                    Ok(meta) => return Ok(Some(meta)),
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e),
                }
            }
        }
        if let Some(bucket) = self.src_bucket() {
            match self.storage.head(bucket, &self.mapper.srcname(path)).await {
                Ok(meta) => return Ok(Some(meta)),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    /// Names under a directory: the union of the local listing and the
    /// configured bucket listings, each bucket listed with its own prefix.
    /// Duplicates are tolerated; callers de-duplicate by name.
    pub async fn get_children(&self, path: &str) -> CloudResult<Vec<String>> {
        self.ready()?;
        let mut names = Vec::new();

        if let (Some(bucket), Some(prefix)) = (self.src_bucket(), self.mapper.src_prefix()) {
            self.list_bucket_children(bucket, prefix, &mut names).await?;
        }
        // Skip the destination only when it is literally the same listing
        let same_listing = self.src_bucket() == self.dest_bucket()
            && self.mapper.src_prefix() == self.mapper.dest_prefix();
        if !same_listing {
            if let (Some(bucket), Some(prefix)) = (self.dest_bucket(), self.mapper.dest_prefix())
            {
                self.list_bucket_children(bucket, prefix, &mut names).await?;
            }
        }

        match tokio::fs::read_dir(path).await {
            Ok(mut dir) => {
                while let Some(entry) = dir.next_entry().await? {
                    if let Some(name) = entry.file_name().to_str() {
                        names.push(name.to_string());
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        Ok(names)
    }

    async fn list_bucket_children(
        &self,
        bucket: &str,
        prefix: &str,
        out: &mut Vec<String>,
    ) -> CloudResult<()> {
        let list_prefix = format!("{}/", prefix);
        match self.storage.list_all(bucket, &list_prefix).await {
            Ok(objects) => {
                for obj in objects {
                    let name = basename(&obj.key);
                    if !name.is_empty() {
                        out.push(name.to_string());
                    }
                }
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Create a directory locally and mark it in the destination bucket so
    /// listings can reveal it
    pub async fn create_dir(&self, path: &str) -> CloudResult<()> {
        self.ready()?;
        tokio::fs::create_dir(path).await?;
        self.put_dir_marker(path).await
    }

    pub async fn create_dir_if_missing(&self, path: &str) -> CloudResult<()> {
        self.ready()?;
        tokio::fs::create_dir_all(path).await?;
        self.put_dir_marker(path).await
    }

    async fn put_dir_marker(&self, path: &str) -> CloudResult<()> {
        if let Some(bucket) = self.dest_bucket() {
            let marker = format!("{}/", self.mapper.destname(path));
            self.storage.put(bucket, &marker, &[], None).await?;
        }
        Ok(())
    }

    /// Delete a directory. Fails if the destination still lists anything
    /// under the directory marker; children are never deleted silently.
    pub async fn delete_dir(&self, path: &str) -> CloudResult<()> {
        self.ready()?;
        if let Some(bucket) = self.dest_bucket() {
            let marker = format!("{}/", self.mapper.destname(path));
            let children = self.storage.list_all(bucket, &marker).await?;
            let non_marker = children.iter().filter(|o| o.key != marker).count();
            if non_marker > 0 {
                return Err(CloudError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    format!("{}: directory not empty", path),
                )));
            }
            match self.storage.delete(bucket, &marker).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        match tokio::fs::remove_dir(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Create the engine's info-log file locally
    pub async fn new_logger(&self, path: &str) -> CloudResult<()> {
        self.ready()?;
        if let Some(parent) = Path::new(path).parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(())
    }

    /// No-op: the object store offers no atomic create-if-absent primitive,
    /// so cross-process locking is not provided here
    pub fn lock_file(&self, _path: &str) -> CloudResult<()> {
        Ok(())
    }

    /// No-op counterpart of `lock_file`
    pub fn unlock_file(&self, _path: &str) -> CloudResult<()> {
        Ok(())
    }

    fn require_stream(&self) -> CloudResult<Arc<dyn LogStream>> {
        self.stream
            .as_ref()
            .cloned()
            .ok_or_else(|| CloudError::InvalidArgument("no log stream configured".to_string()))
    }

    fn require_tailer(&self) -> CloudResult<&LogTailer> {
        self.tailer
            .as_ref()
            .ok_or_else(|| CloudError::InvalidArgument("no log tailer running".to_string()))
    }

    /// Tear down in reverse construction order: tailer first, then the
    /// deletion worker. Pending delayed deletes are abandoned.
    pub async fn shutdown(&self) {
        if let Some(tailer) = &self.tailer {
            tailer.stop().await;
        }
        self.deletion.shutdown().await;
        let task = self.deletion_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        info!("cloud env shut down");
    }
}

fn cloud_owned(file_type: FileType) -> bool {
    matches!(
        file_type,
        FileType::SortedData | FileType::Manifest | FileType::Identity
    )
}
