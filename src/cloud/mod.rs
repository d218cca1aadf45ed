//! Cloud-Backed Storage Environment
//!
//! Extends an embedded key-value storage engine so that its durable artifacts
//! live in a remote object store while the engine keeps its filesystem-shaped
//! contract. The local filesystem acts as a write-through cache; immutable
//! sorted data files, manifests and identity files become objects; the
//! write-ahead log becomes records on a partitioned stream, projected back
//! into a local cache by a background tailer.
//!
//! ## Architecture
//!
//! ```text
//!                  ┌─> local filesystem (cache + plain files)
//! engine ─> CloudEnv ─> CloudStorageClient ─> ObjectStore adapter
//!                  └─> CloudLogFile ─> LogStream adapter ─> LogTailer ─> cache
//! ```
//!
//! ## Key properties
//!
//! - **Read-your-writes**: a freshly closed sorted data file is immediately
//!   readable through the destination bucket
//! - **Delayed deletes**: cloud objects outlive the engine's delete by a
//!   grace period so in-flight readers finish
//! - **Instrumented**: every cloud call attempt reports
//!   `(kind, bytes, micros, ok)` to a pluggable hook

pub mod clock;
pub mod config;
pub mod dbid;
pub mod deletion;
pub mod env;
pub mod error;
pub mod file;
pub mod filename;
pub mod log_format;
pub mod log_stream;
pub mod log_writer;
pub mod object_store;
pub mod retry;
pub mod storage_client;
pub mod tailer;
pub mod telemetry;
#[cfg(feature = "s3")]
pub mod s3_store;

pub use clock::{CloudClock, SharedClock, SimulatedClock, SystemClock};
pub use config::{BucketOptions, CloudCredentials, CloudEnvOptions, DEFAULT_REGION};
pub use dbid::{DbidRegistry, DBID_REGISTRY_PREFIX};
pub use deletion::{spawn_deletion_queue, DeletionQueueHandle};
pub use env::{CloudEnv, LocalReadFile, LocalWriteFile, ReadFile, WriteFile};
pub use error::{CloudError, CloudResult};
pub use file::{ReadableCloudFile, WritableCloudFile, WritableOptions};
pub use filename::{basename, classify, parse_file_number, FileType, PathMapper};
pub use log_format::{encode_appends, LogRecord, LogRecordOp};
pub use log_stream::{
    InMemoryLogStream, LogStream, RecordBatch, StreamCursor, StreamDescription, StreamRecord,
    StreamState, MAX_STREAM_RECORD_BYTES,
};
pub use log_writer::CloudLogFile;
pub use object_store::{InMemoryObjectStore, ListPage, ObjectMeta, ObjectStore};
pub use retry::{ExponentialBackoff, NoRetry, RetryStrategy};
pub use storage_client::CloudStorageClient;
pub use tailer::{cache_path, retry_file_op, LogTailer, LOG_CACHE_RETRY_PERIOD};
pub use telemetry::{
    CloudOpKind, CloudRequestCallback, CloudStatistics, HistogramData, HistogramKind, OpSample,
    OpTimer, Ticker,
};
#[cfg(feature = "s3")]
pub use s3_store::S3ObjectStore;
