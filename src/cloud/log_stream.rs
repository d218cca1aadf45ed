//! Log stream adapter abstraction.
//!
//! When local log files are disabled, write-ahead-log writes become records
//! on a partitioned append-only stream and the tailer projects them back into
//! a local cache. This module is the seam to the stream service.
//!
//! Semantics every implementation must honour:
//! - records within one partition are totally ordered and carry an opaque
//!   monotonic sequence number assigned by the stream
//! - the partition for a record is a deterministic function of its partition
//!   key, so all records of one logical file land on one partition
//! - `put_record` rejects payloads above `MAX_STREAM_RECORD_BYTES`

use crate::cloud::error::{CloudError, CloudResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Per-record size limit (Kinesis-like). Writers split larger payloads.
pub const MAX_STREAM_RECORD_BYTES: usize = 1024 * 1024;

/// Stream lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Creating,
    Active,
}

/// Result of `describe_stream`
#[derive(Debug, Clone)]
pub struct StreamDescription {
    pub shard_ids: Vec<String>,
    pub state: StreamState,
}

/// One record read back from a partition
#[derive(Debug, Clone)]
pub struct StreamRecord {
    /// Monotonic sequence number within the partition
    pub sequence: u64,
    /// Approximate arrival timestamp (Unix ms)
    pub arrival_ms: u64,
    /// Partition key the producer supplied
    pub partition_key: String,
    pub data: Vec<u8>,
}

/// Read position within one partition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamCursor {
    /// Start at the partition tail: only records written after now
    Latest,
    /// Start just after the given sequence number
    AfterSequence(u64),
}

/// One batch read from a partition.
///
/// `next_cursor` is always valid to resume from, even when `records` is
/// empty — a `Latest` cursor resolves to a concrete position on the first
/// call and consumers continue with `AfterSequence(next_cursor)`.
#[derive(Debug, Clone)]
pub struct RecordBatch {
    pub records: Vec<StreamRecord>,
    pub next_cursor: u64,
}

/// Log stream adapter trait
pub trait LogStream: Send + Sync + 'static {
    /// Create the stream. `AlreadyExists` when it is already there.
    fn create_stream<'a>(
        &'a self,
        name: &'a str,
    ) -> Pin<Box<dyn Future<Output = CloudResult<()>> + Send + 'a>>;

    fn describe_stream<'a>(
        &'a self,
        name: &'a str,
    ) -> Pin<Box<dyn Future<Output = CloudResult<StreamDescription>> + Send + 'a>>;

    /// Append one record; the partition is chosen from `partition_key`.
    /// Returns the assigned sequence number.
    fn put_record<'a>(
        &'a self,
        name: &'a str,
        partition_key: &'a str,
        data: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = CloudResult<u64>> + Send + 'a>>;

    /// Read up to `max` records from one partition at `cursor`
    fn get_records<'a>(
        &'a self,
        name: &'a str,
        shard_id: &'a str,
        cursor: StreamCursor,
        max: usize,
    ) -> Pin<Box<dyn Future<Output = CloudResult<RecordBatch>> + Send + 'a>>;
}

// ============================================================================
// InMemoryLogStream - for tests
// ============================================================================

#[derive(Debug, Default)]
struct StreamData {
    /// One record vector per shard; a record's index + 1 is its sequence
    shards: Vec<Vec<StreamRecord>>,
}

/// In-memory partitioned stream for unit tests and scenario tests.
/// Clones share state. Streams become `Active` immediately on creation.
#[derive(Debug)]
pub struct InMemoryLogStream {
    num_shards: usize,
    streams: Arc<RwLock<HashMap<String, StreamData>>>,
}

impl InMemoryLogStream {
    pub fn new(num_shards: usize) -> Self {
        debug_assert!(num_shards > 0, "a stream needs at least one shard");
        InMemoryLogStream {
            num_shards,
            streams: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn shard_for(&self, partition_key: &str) -> usize {
        (crc32fast::hash(partition_key.as_bytes()) as usize) % self.num_shards
    }

    fn shard_id(index: usize) -> String {
        format!("shard-{:04}", index)
    }

    fn shard_index(shard_id: &str) -> Option<usize> {
        shard_id.strip_prefix("shard-")?.parse().ok()
    }

    fn now_ms() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system time before Unix epoch")
            .as_millis() as u64
    }

    /// Total records across all shards (for tests)
    pub fn record_count(&self, name: &str) -> usize {
        self.streams
            .read()
            .get(name)
            .map(|s| s.shards.iter().map(|shard| shard.len()).sum())
            .unwrap_or(0)
    }
}

impl Clone for InMemoryLogStream {
    fn clone(&self) -> Self {
        InMemoryLogStream {
            num_shards: self.num_shards,
            streams: Arc::clone(&self.streams),
        }
    }
}

impl LogStream for InMemoryLogStream {
    fn create_stream<'a>(
        &'a self,
        name: &'a str,
    ) -> Pin<Box<dyn Future<Output = CloudResult<()>> + Send + 'a>> {
        Box::pin(async move {
            let mut streams = self.streams.write();
            if streams.contains_key(name) {
                return Err(CloudError::AlreadyExists(name.to_string()));
            }
            streams.insert(
                name.to_string(),
                StreamData {
                    shards: vec![Vec::new(); self.num_shards],
                },
            );
            Ok(())
        })
    }

    fn describe_stream<'a>(
        &'a self,
        name: &'a str,
    ) -> Pin<Box<dyn Future<Output = CloudResult<StreamDescription>> + Send + 'a>> {
        Box::pin(async move {
            let streams = self.streams.read();
            let data = streams
                .get(name)
                .ok_or_else(|| CloudError::NotFound(name.to_string()))?;
            Ok(StreamDescription {
                shard_ids: (0..data.shards.len()).map(Self::shard_id).collect(),
                state: StreamState::Active,
            })
        })
    }

    fn put_record<'a>(
        &'a self,
        name: &'a str,
        partition_key: &'a str,
        data: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = CloudResult<u64>> + Send + 'a>> {
        Box::pin(async move {
            if data.len() > MAX_STREAM_RECORD_BYTES {
                return Err(CloudError::InvalidArgument(format!(
                    "record of {} bytes exceeds the {} byte limit",
                    data.len(),
                    MAX_STREAM_RECORD_BYTES
                )));
            }
            let shard = self.shard_for(partition_key);
            let mut streams = self.streams.write();
            let stream = streams
                .get_mut(name)
                .ok_or_else(|| CloudError::NotFound(name.to_string()))?;
            let records = &mut stream.shards[shard];
            let sequence = records.len() as u64 + 1;
            records.push(StreamRecord {
                sequence,
                arrival_ms: Self::now_ms(),
                partition_key: partition_key.to_string(),
                data: data.to_vec(),
            });
            Ok(sequence)
        })
    }

    fn get_records<'a>(
        &'a self,
        name: &'a str,
        shard_id: &'a str,
        cursor: StreamCursor,
        max: usize,
    ) -> Pin<Box<dyn Future<Output = CloudResult<RecordBatch>> + Send + 'a>> {
        Box::pin(async move {
            let streams = self.streams.read();
            let stream = streams
                .get(name)
                .ok_or_else(|| CloudError::NotFound(name.to_string()))?;
            let index = Self::shard_index(shard_id)
                .filter(|&i| i < stream.shards.len())
                .ok_or_else(|| CloudError::InvalidArgument(format!("unknown shard {}", shard_id)))?;
            let all = &stream.shards[index];
            let start = match cursor {
                StreamCursor::Latest => all.len(),
                StreamCursor::AfterSequence(seq) => (seq as usize).min(all.len()),
            };
            let records: Vec<StreamRecord> =
                all.iter().skip(start).take(max).cloned().collect();
            let next_cursor = (start + records.len()) as u64;
            Ok(RecordBatch {
                records,
                next_cursor,
            })
        })
    }
}
