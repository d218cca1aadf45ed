//! Instrumented, retrying client over an object store adapter.
//!
//! Every attempt against the adapter runs under an `OpTimer` guard, so one
//! `(kind, bytes, micros, ok)` sample reaches the request callback per
//! attempt regardless of how the attempt exits. Transient faults are retried
//! per the configured `RetryStrategy`; definite faults surface immediately.
//! Retries are invisible to callers except as latency.

use crate::cloud::error::{CloudError, CloudResult};
use crate::cloud::object_store::{ListPage, ObjectMeta, ObjectStore};
use crate::cloud::retry::RetryStrategy;
use crate::cloud::telemetry::{CloudOpKind, CloudRequestCallback, OpSample, OpTimer};
use std::collections::HashMap;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Page size used when walking a whole prefix
const LIST_PAGE_SIZE: usize = 1000;

/// Client the rest of the environment uses for all object storage access
pub struct CloudStorageClient {
    store: Arc<dyn ObjectStore>,
    retry: Arc<dyn RetryStrategy>,
    callback: Option<CloudRequestCallback>,
}

impl Clone for CloudStorageClient {
    fn clone(&self) -> Self {
        CloudStorageClient {
            store: Arc::clone(&self.store),
            retry: Arc::clone(&self.retry),
            callback: self.callback.clone(),
        }
    }
}

impl CloudStorageClient {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        retry: Arc<dyn RetryStrategy>,
        callback: Option<CloudRequestCallback>,
    ) -> Self {
        CloudStorageClient {
            store,
            retry,
            callback,
        }
    }

    /// Sleep-and-retry bookkeeping shared by all operations. Returns `true`
    /// when the caller should try again.
    async fn should_retry(&self, error: &CloudError, attempt: u32) -> bool {
        if !error.is_retryable() {
            return false;
        }
        match self.retry.next_delay(error, attempt) {
            Some(delay) => {
                debug!(attempt, ?delay, %error, "retrying cloud operation");
                tokio::time::sleep(delay).await;
                true
            }
            None => false,
        }
    }

    pub async fn head(&self, bucket: &str, key: &str) -> CloudResult<ObjectMeta> {
        let mut attempt = 0;
        loop {
            let mut timer = OpTimer::new(CloudOpKind::Info, 0, self.callback.clone());
            match self.store.head(bucket, key).await {
                Ok(meta) => {
                    timer.succeed();
                    return Ok(meta);
                }
                Err(e) => {
                    drop(timer);
                    if !self.should_retry(&e, attempt).await {
                        return Err(e);
                    }
                    attempt += 1;
                }
            }
        }
    }

    pub async fn get(
        &self,
        bucket: &str,
        key: &str,
        range: Option<Range<u64>>,
    ) -> CloudResult<Vec<u8>> {
        let size_hint = range.as_ref().map(|r| r.end - r.start).unwrap_or(0);
        let mut attempt = 0;
        loop {
            let mut timer = OpTimer::new(CloudOpKind::Read, size_hint, self.callback.clone());
            match self.store.get(bucket, key, range.clone()).await {
                Ok(data) => {
                    timer.set_bytes(data.len() as u64);
                    timer.succeed();
                    return Ok(data);
                }
                Err(e) => {
                    drop(timer);
                    if !self.should_retry(&e, attempt).await {
                        return Err(e);
                    }
                    attempt += 1;
                }
            }
        }
    }

    pub async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: &[u8],
        metadata: Option<&HashMap<String, String>>,
    ) -> CloudResult<()> {
        self.put_sampled(bucket, key, data, metadata).await.map(|_| ())
    }

    /// `put` returning the timing sample of the successful attempt, for
    /// callers that feed latency into statistics directly.
    pub async fn put_sampled(
        &self,
        bucket: &str,
        key: &str,
        data: &[u8],
        metadata: Option<&HashMap<String, String>>,
    ) -> CloudResult<OpSample> {
        let mut attempt = 0;
        loop {
            let mut timer =
                OpTimer::new(CloudOpKind::Write, data.len() as u64, self.callback.clone());
            match self.store.put(bucket, key, data, metadata).await {
                Ok(()) => {
                    timer.succeed();
                    return Ok(timer.sample());
                }
                Err(e) => {
                    drop(timer);
                    if !self.should_retry(&e, attempt).await {
                        return Err(e);
                    }
                    attempt += 1;
                }
            }
        }
    }

    pub async fn delete(&self, bucket: &str, key: &str) -> CloudResult<()> {
        let mut attempt = 0;
        loop {
            let mut timer = OpTimer::new(CloudOpKind::Delete, 0, self.callback.clone());
            match self.store.delete(bucket, key).await {
                Ok(()) => {
                    timer.succeed();
                    return Ok(());
                }
                Err(e) => {
                    drop(timer);
                    if !self.should_retry(&e, attempt).await {
                        return Err(e);
                    }
                    attempt += 1;
                }
            }
        }
    }

    pub async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> CloudResult<()> {
        let mut attempt = 0;
        loop {
            let mut timer = OpTimer::new(CloudOpKind::Copy, 0, self.callback.clone());
            match self
                .store
                .copy(src_bucket, src_key, dst_bucket, dst_key)
                .await
            {
                Ok(()) => {
                    timer.succeed();
                    return Ok(());
                }
                Err(e) => {
                    drop(timer);
                    if !self.should_retry(&e, attempt).await {
                        return Err(e);
                    }
                    attempt += 1;
                }
            }
        }
    }

    pub async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        marker: Option<&str>,
        max_keys: usize,
    ) -> CloudResult<ListPage> {
        let mut attempt = 0;
        loop {
            let mut timer = OpTimer::new(CloudOpKind::List, 0, self.callback.clone());
            match self.store.list(bucket, prefix, marker, max_keys).await {
                Ok(page) => {
                    timer.set_bytes(page.objects.len() as u64);
                    timer.succeed();
                    return Ok(page);
                }
                Err(e) => {
                    drop(timer);
                    if !self.should_retry(&e, attempt).await {
                        return Err(e);
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// Create the bucket, treating `AlreadyExists` as success
    pub async fn create_bucket(&self, bucket: &str, region: &str) -> CloudResult<()> {
        let mut attempt = 0;
        loop {
            let mut timer = OpTimer::new(CloudOpKind::Create, 0, self.callback.clone());
            match self.store.create_bucket(bucket, region).await {
                Ok(()) | Err(CloudError::AlreadyExists(_)) => {
                    timer.succeed();
                    return Ok(());
                }
                Err(e) => {
                    drop(timer);
                    if !self.should_retry(&e, attempt).await {
                        return Err(e);
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// Whether an object exists. `NotFound` maps to `false`; other errors
    /// propagate.
    pub async fn exists(&self, bucket: &str, key: &str) -> CloudResult<bool> {
        match self.head(bucket, key).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Walk an entire prefix, paging by marker until the listing is complete
    pub async fn list_all(&self, bucket: &str, prefix: &str) -> CloudResult<Vec<ObjectMeta>> {
        let mut out = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let page = self
                .list(bucket, prefix, marker.as_deref(), LIST_PAGE_SIZE)
                .await?;
            out.extend(page.objects);
            if !page.truncated {
                return Ok(out);
            }
            marker = page.next_marker;
        }
    }

    /// Upload a complete local file as one atomic object.
    ///
    /// Zero-byte files are rejected: the store cannot distinguish a truncated
    /// upload from an intended empty object, so an empty body here always
    /// means a truncated local file.
    pub async fn upload_file(
        &self,
        local_path: &Path,
        bucket: &str,
        key: &str,
    ) -> CloudResult<OpSample> {
        let size = tokio::fs::metadata(local_path).await?.len();
        if size == 0 {
            return Err(CloudError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("{}: refusing zero-byte upload", local_path.display()),
            )));
        }
        let body = tokio::fs::read(local_path).await?;
        let sample = self.put_sampled(bucket, key, &body, None).await?;
        debug!(path = %local_path.display(), bucket, key, size, "uploaded file");
        Ok(sample)
    }

    /// Download an object into a local file: stream to `<dst>.tmp`, fsync,
    /// then atomically rename into place. On failure the temp file is left
    /// behind and the destination never exists partially.
    pub async fn download_file(
        &self,
        bucket: &str,
        key: &str,
        local_path: &Path,
    ) -> CloudResult<u64> {
        let body = self.get(bucket, key, None).await?;
        if body.is_empty() {
            warn!(bucket, key, "downloaded object is empty");
            return Err(CloudError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("{}/{}: zero-byte object", bucket, key),
            )));
        }

        let mut tmp_path = local_path.as_os_str().to_owned();
        tmp_path.push(".tmp");
        let tmp_path = std::path::PathBuf::from(tmp_path);

        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(&tmp_path).await?;
        file.write_all(&body).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp_path, local_path).await?;
        debug!(bucket, key, path = %local_path.display(), bytes = body.len(), "downloaded file");
        Ok(body.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::object_store::InMemoryObjectStore;
    use crate::cloud::retry::{ExponentialBackoff, NoRetry};
    use parking_lot::Mutex;

    fn client_with(
        store: &InMemoryObjectStore,
        retry: Arc<dyn RetryStrategy>,
        callback: Option<CloudRequestCallback>,
    ) -> CloudStorageClient {
        CloudStorageClient::new(Arc::new(store.clone()), retry, callback)
    }

    async fn test_store() -> InMemoryObjectStore {
        let store = InMemoryObjectStore::new();
        store.create_bucket("b", "r").await.unwrap();
        store
    }

    fn temp_file(name: &str, contents: &[u8]) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "cloudenv-client-test-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("system time before Unix epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[tokio::test]
    async fn test_transient_faults_are_retried() {
        let store = test_store().await;
        let client = client_with(&store, Arc::new(ExponentialBackoff::test()), None);

        store.inject_transient_faults(2);
        client.put("b", "k", b"payload", None).await.unwrap();
        assert_eq!(client.get("b", "k", None).await.unwrap(), b"payload");
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let store = test_store().await;
        let client = client_with(&store, Arc::new(ExponentialBackoff::test()), None);

        let err = client.get("b", "missing", None).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_retries_give_up_eventually() {
        let store = test_store().await;
        let client = client_with(&store, Arc::new(ExponentialBackoff::test()), None);

        // More faults than max_attempts
        store.inject_transient_faults(100);
        let err = client.put("b", "k", b"x", None).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_callback_sees_every_attempt() {
        let samples: Arc<Mutex<Vec<(CloudOpKind, bool)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&samples);
        let cb: CloudRequestCallback =
            Arc::new(move |kind, _bytes, _micros, ok| sink.lock().push((kind, ok)));

        let store = test_store().await;
        let client = client_with(&store, Arc::new(ExponentialBackoff::test()), Some(cb));

        store.inject_transient_faults(1);
        client.put("b", "k", b"x", None).await.unwrap();

        let got = samples.lock();
        assert_eq!(got.len(), 2, "one sample per attempt");
        assert_eq!(got[0], (CloudOpKind::Write, false));
        assert_eq!(got[1], (CloudOpKind::Write, true));
    }

    #[tokio::test]
    async fn test_read_sample_reports_payload_bytes() {
        let samples: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&samples);
        let cb: CloudRequestCallback = Arc::new(move |kind, bytes, _micros, ok| {
            if kind == CloudOpKind::Read && ok {
                sink.lock().push(bytes);
            }
        });

        let store = test_store().await;
        let client = client_with(&store, Arc::new(NoRetry), Some(cb));
        client.put("b", "k", b"0123456789", None).await.unwrap();
        client.get("b", "k", Some(0..4)).await.unwrap();

        assert_eq!(*samples.lock(), vec![4]);
    }

    #[tokio::test]
    async fn test_create_bucket_is_idempotent() {
        let store = InMemoryObjectStore::new();
        let client = client_with(&store, Arc::new(NoRetry), None);
        client.create_bucket("b", "r").await.unwrap();
        client.create_bucket("b", "r").await.unwrap();
    }

    #[tokio::test]
    async fn test_upload_rejects_zero_byte_file() {
        let store = test_store().await;
        let client = client_with(&store, Arc::new(NoRetry), None);
        let path = temp_file("empty.sst", b"");

        let err = client.upload_file(&path, "b", "p/empty.sst").await.unwrap_err();
        assert!(matches!(err, CloudError::Io(_)));
        assert!(!store.contains("b", "p/empty.sst"));

        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[tokio::test]
    async fn test_upload_then_head_sizes_match() {
        let store = test_store().await;
        let client = client_with(&store, Arc::new(NoRetry), None);
        let path = temp_file("000001.sst", &vec![7u8; 4096]);

        let sample = client.upload_file(&path, "b", "p/000001.sst").await.unwrap();
        assert_eq!(sample.bytes, 4096);
        assert!(sample.ok);

        let meta = client.head("b", "p/000001.sst").await.unwrap();
        assert_eq!(meta.size, 4096);

        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[tokio::test]
    async fn test_download_renames_into_place() {
        let store = test_store().await;
        let client = client_with(&store, Arc::new(NoRetry), None);
        client.put("b", "k", b"cloud bytes", None).await.unwrap();

        let dst = temp_file("target.sst", b"old");
        std::fs::remove_file(&dst).unwrap();

        let n = client.download_file("b", "k", &dst).await.unwrap();
        assert_eq!(n, 11);
        assert_eq!(std::fs::read(&dst).unwrap(), b"cloud bytes");
        // No temp residue on success
        let tmp = dst.with_extension("sst.tmp");
        assert!(!tmp.exists());

        std::fs::remove_dir_all(dst.parent().unwrap()).ok();
    }

    #[tokio::test]
    async fn test_list_all_pages() {
        let store = test_store().await;
        let client = client_with(&store, Arc::new(NoRetry), None);
        for i in 0..7 {
            client
                .put("b", &format!("x/{:02}", i), b"d", None)
                .await
                .unwrap();
        }
        let all = client.list_all("b", "x/").await.unwrap();
        assert_eq!(all.len(), 7);
    }
}
