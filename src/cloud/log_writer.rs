//! Writable-file facade over the log stream.
//!
//! When local log files are disabled, the environment hands the engine a
//! `CloudLogFile` instead of a local file handle. Every `append` becomes one
//! or more framed records on the file's partition; a delete becomes a delete
//! record. The stream itself is the durability boundary, so `sync` has
//! nothing left to do.

use crate::cloud::error::CloudResult;
use crate::cloud::log_format::{encode_appends, LogRecord};
use crate::cloud::log_stream::LogStream;
use std::sync::Arc;
use tracing::debug;

/// Writable log file whose bytes land on the stream
pub struct CloudLogFile {
    stream: Arc<dyn LogStream>,
    stream_name: String,
    /// Logical path of the engine's log file; also the partition key, which
    /// pins all of this file's records to one partition.
    path: String,
    /// Bytes appended through this handle
    written: u64,
}

impl CloudLogFile {
    pub fn new(stream: Arc<dyn LogStream>, stream_name: &str, path: &str) -> Self {
        CloudLogFile {
            stream,
            stream_name: stream_name.to_string(),
            path: path.to_string(),
            written: 0,
        }
    }

    /// Push one engine write as framed records, splitting oversized payloads.
    /// Frames go out in byte order on one partition, so the tailer reassembles
    /// the exact append sequence.
    pub async fn append(&mut self, data: &[u8]) -> CloudResult<()> {
        for frame in encode_appends(&self.path, data) {
            self.stream
                .put_record(&self.stream_name, &self.path, &frame)
                .await?;
        }
        self.written += data.len() as u64;
        Ok(())
    }

    /// Records are durable once `put_record` returns
    pub async fn sync(&mut self) -> CloudResult<()> {
        Ok(())
    }

    pub async fn close(&mut self) -> CloudResult<()> {
        debug!(path = %self.path, bytes = self.written, "closed log stream file");
        Ok(())
    }

    pub fn size(&self) -> u64 {
        self.written
    }

    /// Emit a delete record for a logical log file. Used by the environment's
    /// delete path; needs no open handle.
    pub async fn log_delete(
        stream: &Arc<dyn LogStream>,
        stream_name: &str,
        path: &str,
    ) -> CloudResult<()> {
        let frame = LogRecord::delete(path).encode();
        stream.put_record(stream_name, path, &frame).await?;
        debug!(path, "logged delete record");
        Ok(())
    }
}
