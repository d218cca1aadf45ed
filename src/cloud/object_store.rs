//! Object store adapter abstraction.
//!
//! The environment talks to cloud storage exclusively through this trait;
//! concrete SDKs plug in underneath it.
//!
//! Implementations:
//! - `InMemoryObjectStore`: for unit tests and the integration scenarios
//! - `S3ObjectStore`: for production (feature-gated, see `s3_store.rs`)
//!
//! Semantics every implementation must honour:
//! - `put` is atomic and read-your-writes for single objects
//! - `head` on a missing object is `NotFound`, never a synthesized size 0
//! - ranged `get` past end-of-file returns the available suffix (possibly
//!   empty) without error
//! - `list` pages by marker; keys are returned in lexicographic order and
//!   each key appears exactly once across pages

use crate::cloud::error::{CloudError, CloudResult};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::ops::Bound;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Metadata for a stored object
#[derive(Debug, Clone, Default)]
pub struct ObjectMeta {
    /// Object key inside its bucket
    pub key: String,
    /// Size in bytes
    pub size: u64,
    /// Last-modified timestamp (Unix ms)
    pub mtime_ms: u64,
    /// User metadata headers attached at put time
    pub metadata: HashMap<String, String>,
}

/// One page of a listing
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectMeta>,
    /// Marker to pass for the next page
    pub next_marker: Option<String>,
    /// Whether more keys remain after this page
    pub truncated: bool,
}

/// Object store adapter trait.
///
/// Async via explicit boxed futures so implementations stay object-safe and
/// the environment can hold an `Arc<dyn ObjectStore>`.
pub trait ObjectStore: Send + Sync + 'static {
    /// Object size and mtime without the body
    fn head<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = CloudResult<ObjectMeta>> + Send + 'a>>;

    /// Object body, optionally a half-open byte range `[start, end)`
    fn get<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        range: Option<std::ops::Range<u64>>,
    ) -> Pin<Box<dyn Future<Output = CloudResult<Vec<u8>>> + Send + 'a>>;

    /// Create or overwrite an object, with optional user metadata
    fn put<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        data: &'a [u8],
        metadata: Option<&'a HashMap<String, String>>,
    ) -> Pin<Box<dyn Future<Output = CloudResult<()>> + Send + 'a>>;

    /// Delete an object. `NotFound` when it does not exist.
    fn delete<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = CloudResult<()>> + Send + 'a>>;

    /// Server-side copy between buckets/keys
    fn copy<'a>(
        &'a self,
        src_bucket: &'a str,
        src_key: &'a str,
        dst_bucket: &'a str,
        dst_key: &'a str,
    ) -> Pin<Box<dyn Future<Output = CloudResult<()>> + Send + 'a>>;

    /// One page of keys under `prefix`, starting after `marker`
    fn list<'a>(
        &'a self,
        bucket: &'a str,
        prefix: &'a str,
        marker: Option<&'a str>,
        max_keys: usize,
    ) -> Pin<Box<dyn Future<Output = CloudResult<ListPage>> + Send + 'a>>;

    /// Create a bucket in the given region. `AlreadyExists` when it is
    /// already there.
    fn create_bucket<'a>(
        &'a self,
        bucket: &'a str,
        region: &'a str,
    ) -> Pin<Box<dyn Future<Output = CloudResult<()>> + Send + 'a>>;
}

// ============================================================================
// InMemoryObjectStore - for tests
// ============================================================================

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    mtime_ms: u64,
    metadata: HashMap<String, String>,
}

#[derive(Debug, Clone)]
struct BucketData {
    region: String,
    objects: BTreeMap<String, StoredObject>,
}

/// In-memory object store for unit tests and scenario tests.
/// Clones share state.
#[derive(Debug)]
pub struct InMemoryObjectStore {
    buckets: Arc<RwLock<HashMap<String, BucketData>>>,
    /// Remaining operations that should fail with a transient fault
    transient_faults: Arc<AtomicU32>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        InMemoryObjectStore {
            buckets: Arc::new(RwLock::new(HashMap::new())),
            transient_faults: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Make the next `n` operations fail with `Transient` (for retry tests)
    pub fn inject_transient_faults(&self, n: u32) {
        self.transient_faults.store(n, Ordering::SeqCst);
    }

    fn maybe_fault(&self) -> CloudResult<()> {
        let remaining = self.transient_faults.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_faults.fetch_sub(1, Ordering::SeqCst);
            return Err(CloudError::Transient("injected fault".to_string()));
        }
        Ok(())
    }

    fn now_ms() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system time before Unix epoch")
            .as_millis() as u64
    }

    /// Number of objects in a bucket (for tests)
    pub fn object_count(&self, bucket: &str) -> usize {
        self.buckets
            .read()
            .get(bucket)
            .map(|b| b.objects.len())
            .unwrap_or(0)
    }

    /// Whether an object exists (for tests)
    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.buckets
            .read()
            .get(bucket)
            .map(|b| b.objects.contains_key(key))
            .unwrap_or(false)
    }

    fn meta_of(key: &str, obj: &StoredObject) -> ObjectMeta {
        ObjectMeta {
            key: key.to_string(),
            size: obj.data.len() as u64,
            mtime_ms: obj.mtime_ms,
            metadata: obj.metadata.clone(),
        }
    }
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for InMemoryObjectStore {
    fn clone(&self) -> Self {
        InMemoryObjectStore {
            buckets: Arc::clone(&self.buckets),
            transient_faults: Arc::clone(&self.transient_faults),
        }
    }
}

impl ObjectStore for InMemoryObjectStore {
    fn head<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = CloudResult<ObjectMeta>> + Send + 'a>> {
        Box::pin(async move {
            self.maybe_fault()?;
            let buckets = self.buckets.read();
            let data = buckets
                .get(bucket)
                .ok_or_else(|| CloudError::NoSuchBucket(bucket.to_string()))?;
            data.objects
                .get(key)
                .map(|obj| Self::meta_of(key, obj))
                .ok_or_else(|| CloudError::NotFound(format!("{}/{}", bucket, key)))
        })
    }

    fn get<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        range: Option<std::ops::Range<u64>>,
    ) -> Pin<Box<dyn Future<Output = CloudResult<Vec<u8>>> + Send + 'a>> {
        Box::pin(async move {
            self.maybe_fault()?;
            let buckets = self.buckets.read();
            let data = buckets
                .get(bucket)
                .ok_or_else(|| CloudError::NoSuchBucket(bucket.to_string()))?;
            let obj = data
                .objects
                .get(key)
                .ok_or_else(|| CloudError::NotFound(format!("{}/{}", bucket, key)))?;
            match range {
                None => Ok(obj.data.clone()),
                Some(r) => {
                    // Reads past end-of-file yield the available suffix
                    let len = obj.data.len() as u64;
                    let start = r.start.min(len) as usize;
                    let end = r.end.min(len) as usize;
                    Ok(obj.data[start..end].to_vec())
                }
            }
        })
    }

    fn put<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        data: &'a [u8],
        metadata: Option<&'a HashMap<String, String>>,
    ) -> Pin<Box<dyn Future<Output = CloudResult<()>> + Send + 'a>> {
        Box::pin(async move {
            self.maybe_fault()?;
            let mut buckets = self.buckets.write();
            let bucket_data = buckets
                .get_mut(bucket)
                .ok_or_else(|| CloudError::NoSuchBucket(bucket.to_string()))?;
            bucket_data.objects.insert(
                key.to_string(),
                StoredObject {
                    data: data.to_vec(),
                    mtime_ms: Self::now_ms(),
                    metadata: metadata.cloned().unwrap_or_default(),
                },
            );
            Ok(())
        })
    }

    fn delete<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = CloudResult<()>> + Send + 'a>> {
        Box::pin(async move {
            self.maybe_fault()?;
            let mut buckets = self.buckets.write();
            let bucket_data = buckets
                .get_mut(bucket)
                .ok_or_else(|| CloudError::NoSuchBucket(bucket.to_string()))?;
            match bucket_data.objects.remove(key) {
                Some(_) => Ok(()),
                None => Err(CloudError::NotFound(format!("{}/{}", bucket, key))),
            }
        })
    }

    fn copy<'a>(
        &'a self,
        src_bucket: &'a str,
        src_key: &'a str,
        dst_bucket: &'a str,
        dst_key: &'a str,
    ) -> Pin<Box<dyn Future<Output = CloudResult<()>> + Send + 'a>> {
        Box::pin(async move {
            self.maybe_fault()?;
            let mut buckets = self.buckets.write();
            let obj = buckets
                .get(src_bucket)
                .ok_or_else(|| CloudError::NoSuchBucket(src_bucket.to_string()))?
                .objects
                .get(src_key)
                .ok_or_else(|| CloudError::NotFound(format!("{}/{}", src_bucket, src_key)))?
                .clone();
            let dst = buckets
                .get_mut(dst_bucket)
                .ok_or_else(|| CloudError::NoSuchBucket(dst_bucket.to_string()))?;
            dst.objects.insert(
                dst_key.to_string(),
                StoredObject {
                    mtime_ms: Self::now_ms(),
                    ..obj
                },
            );
            Ok(())
        })
    }

    fn list<'a>(
        &'a self,
        bucket: &'a str,
        prefix: &'a str,
        marker: Option<&'a str>,
        max_keys: usize,
    ) -> Pin<Box<dyn Future<Output = CloudResult<ListPage>> + Send + 'a>> {
        Box::pin(async move {
            self.maybe_fault()?;
            let buckets = self.buckets.read();
            let data = buckets
                .get(bucket)
                .ok_or_else(|| CloudError::NoSuchBucket(bucket.to_string()))?;

            let lower = match marker {
                Some(m) => Bound::Excluded(m.to_string()),
                None => Bound::Unbounded,
            };
            let mut objects = Vec::new();
            let mut truncated = false;
            for (key, obj) in data.objects.range((lower, Bound::Unbounded)) {
                // A key is included iff it begins with the requested prefix
                if !key.starts_with(prefix) {
                    continue;
                }
                if objects.len() == max_keys {
                    truncated = true;
                    break;
                }
                objects.push(Self::meta_of(key, obj));
            }
            let next_marker = if truncated {
                objects.last().map(|o| o.key.clone())
            } else {
                None
            };
            Ok(ListPage {
                objects,
                next_marker,
                truncated,
            })
        })
    }

    fn create_bucket<'a>(
        &'a self,
        bucket: &'a str,
        region: &'a str,
    ) -> Pin<Box<dyn Future<Output = CloudResult<()>> + Send + 'a>> {
        Box::pin(async move {
            self.maybe_fault()?;
            let mut buckets = self.buckets.write();
            if buckets.contains_key(bucket) {
                return Err(CloudError::AlreadyExists(bucket.to_string()));
            }
            buckets.insert(
                bucket.to_string(),
                BucketData {
                    region: region.to_string(),
                    objects: BTreeMap::new(),
                },
            );
            Ok(())
        })
    }
}
