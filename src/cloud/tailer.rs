//! Log stream tailer.
//!
//! One background worker per environment consumes every partition of the log
//! stream and materialises a local cache directory the engine reads log files
//! from. The cache path for a logical file is a content-independent,
//! collision-resistant function of its path: `cache_root/hex(sha256(path))`.
//!
//! Cache writes are not synchronised with engine reads; a reader that misses
//! a file gives the tailer time to catch up via `retry_file_op`.

use crate::cloud::error::{CloudError, CloudResult};
use crate::cloud::log_format::{LogRecord, LogRecordOp};
use crate::cloud::log_stream::{LogStream, StreamCursor, StreamState};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

/// How long a reader waits for the tailer to surface a missing cache file
pub const LOG_CACHE_RETRY_PERIOD: Duration = Duration::from_secs(30);
/// Poll interval inside the reader retry loop
const RETRY_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Worker sleep when every partition came back empty
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Records fetched per partition per iteration
const BATCH_SIZE: usize = 256;
/// How long `start` waits for the stream to become active
const STREAM_ACTIVE_TIMEOUT: Duration = Duration::from_secs(30);

/// Derive the cache file path for a logical log file path
pub fn cache_path(cache_root: &Path, logical_path: &str) -> PathBuf {
    let digest = Sha256::digest(logical_path.as_bytes());
    let mut name = String::with_capacity(digest.len() * 2);
    for byte in digest {
        name.push_str(&format!("{:02x}", byte));
    }
    cache_root.join(name)
}

/// Retry a filesystem probe until it stops reporting `NotFound`, the bound
/// expires (`TimedOut`), or it fails for a different reason.
pub async fn retry_file_op<T, F, Fut>(op: F) -> CloudResult<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = CloudResult<T>>,
{
    let deadline = tokio::time::Instant::now() + LOG_CACHE_RETRY_PERIOD;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_not_found() => {
                if tokio::time::Instant::now() >= deadline {
                    return Err(CloudError::TimedOut(
                        "log cache file did not appear".to_string(),
                    ));
                }
                tokio::time::sleep(RETRY_POLL_INTERVAL).await;
            }
            Err(e) => return Err(e),
        }
    }
}

struct TailerInner {
    stream: Arc<dyn LogStream>,
    stream_name: String,
    cache_root: PathBuf,
    running: AtomicBool,
    /// Last-acknowledged position per partition; absent until the first
    /// batch resolves the tail.
    cursors: Mutex<HashMap<String, u64>>,
}

/// Background consumer projecting the log stream into the local cache.
/// One per environment; two tailers on one cache root would collide.
pub struct LogTailer {
    inner: Arc<TailerInner>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl LogTailer {
    /// Create the stream if absent, wait until it is active, create the cache
    /// directory, and spawn the worker.
    pub async fn start(
        stream: Arc<dyn LogStream>,
        stream_name: &str,
        cache_root: PathBuf,
    ) -> CloudResult<LogTailer> {
        match stream.create_stream(stream_name).await {
            Ok(()) => info!(stream = stream_name, "created log stream"),
            Err(CloudError::AlreadyExists(_)) => {}
            Err(e) => return Err(e),
        }

        let deadline = tokio::time::Instant::now() + STREAM_ACTIVE_TIMEOUT;
        loop {
            let desc = stream.describe_stream(stream_name).await?;
            if desc.state == StreamState::Active {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(CloudError::TimedOut(format!(
                    "stream {} did not become active",
                    stream_name
                )));
            }
            tokio::time::sleep(RETRY_POLL_INTERVAL).await;
        }

        tokio::fs::create_dir_all(&cache_root).await?;

        // Pin every partition's tail now, so any record written after this
        // call returns is guaranteed to be applied
        let mut cursors = HashMap::new();
        let desc = stream.describe_stream(stream_name).await?;
        for shard_id in &desc.shard_ids {
            let batch = stream
                .get_records(stream_name, shard_id, StreamCursor::Latest, 1)
                .await?;
            cursors.insert(shard_id.clone(), batch.next_cursor);
        }

        let inner = Arc::new(TailerInner {
            stream,
            stream_name: stream_name.to_string(),
            cache_root,
            running: AtomicBool::new(true),
            cursors: Mutex::new(cursors),
        });
        let worker = Arc::clone(&inner);
        let task = tokio::spawn(async move { run(worker).await });
        info!(stream = stream_name, "log tailer started");

        Ok(LogTailer {
            inner,
            task: Mutex::new(Some(task)),
        })
    }

    /// Cache file path for a logical log file
    pub fn cache_path(&self, logical_path: &str) -> PathBuf {
        cache_path(&self.inner.cache_root, logical_path)
    }

    pub fn cache_root(&self) -> &Path {
        &self.inner.cache_root
    }

    /// Read-only snapshot of the per-partition cursors
    pub fn cursor_snapshot(&self) -> HashMap<String, u64> {
        self.inner.cursors.lock().clone()
    }

    /// Signal shutdown and join the worker
    pub async fn stop(&self) {
        self.inner.running.store(false, Ordering::Release);
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("log tailer worker panicked: {}", e);
            }
        }
        info!("log tailer stopped");
    }
}

async fn run(inner: Arc<TailerInner>) {
    while inner.running.load(Ordering::Acquire) {
        let desc = match inner.stream.describe_stream(&inner.stream_name).await {
            Ok(desc) => desc,
            Err(e) => {
                warn!("tailer failed to describe stream: {}", e);
                tokio::time::sleep(IDLE_POLL_INTERVAL).await;
                continue;
            }
        };

        let mut progressed = false;
        for shard_id in &desc.shard_ids {
            if !inner.running.load(Ordering::Acquire) {
                return;
            }
            match tail_shard(&inner, shard_id).await {
                Ok(applied) => progressed |= applied,
                Err(e) => warn!(shard = %shard_id, "tailer batch failed: {}", e),
            }
        }

        if !progressed {
            tokio::time::sleep(IDLE_POLL_INTERVAL).await;
        }
    }
}

/// Read one batch from a partition and apply it. Returns whether any record
/// was applied. The cursor advances past a record only after its filesystem
/// mutation succeeded.
async fn tail_shard(inner: &Arc<TailerInner>, shard_id: &str) -> CloudResult<bool> {
    let cursor = match inner.cursors.lock().get(shard_id) {
        Some(&seq) => StreamCursor::AfterSequence(seq),
        // First contact with this partition: start at the tail
        None => StreamCursor::Latest,
    };

    let batch = inner
        .stream
        .get_records(&inner.stream_name, shard_id, cursor, BATCH_SIZE)
        .await?;

    if batch.records.is_empty() {
        // Still record the resolved position so a Latest cursor pins the tail
        inner
            .cursors
            .lock()
            .insert(shard_id.to_string(), batch.next_cursor);
        return Ok(false);
    }

    let mut applied = false;
    for record in &batch.records {
        match LogRecord::decode(&record.data) {
            Some(log_record) => {
                if let Err(e) = apply(inner, &log_record).await {
                    // Leave the cursor where it is; this record is retried
                    // on the next iteration.
                    error!(path = %log_record.path, "tailer failed to apply record: {}", e);
                    return Ok(applied);
                }
            }
            None => {
                // A frame that fails its checksum can never become applicable
                error!(
                    sequence = record.sequence,
                    "tailer skipping undecodable record"
                );
            }
        }
        inner
            .cursors
            .lock()
            .insert(shard_id.to_string(), record.sequence);
        applied = true;
    }
    Ok(applied)
}

async fn apply(inner: &Arc<TailerInner>, record: &LogRecord) -> CloudResult<()> {
    let path = cache_path(&inner.cache_root, &record.path);
    match record.op {
        LogRecordOp::Append => {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await?;
            file.write_all(&record.payload).await?;
            debug!(
                logical = %record.path,
                bytes = record.payload.len(),
                "tailer appended to cache"
            );
            Ok(())
        }
        LogRecordOp::Delete => {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            debug!(logical = %record.path, "tailer removed cache file");
            Ok(())
        }
    }
}
