//! Log record framing.
//!
//! Each stream record carries one framed operation against one logical log
//! file:
//!
//! ```text
//! ┌──────────────────────────────────┐
//! │ op: u8 (1 = append, 2 = delete)  │
//! │ checksum: u32 LE (CRC32)         │
//! │ path_len: u32 LE                 │
//! │ path: [u8; path_len]             │
//! │ payload_len: u32 LE              │
//! │ payload: [u8; payload_len]       │
//! └──────────────────────────────────┘
//! ```
//!
//! The checksum covers path and payload. `decode` returns `None` for
//! truncated or corrupted frames; the tailer skips such records instead of
//! applying garbage.

use crate::cloud::log_stream::MAX_STREAM_RECORD_BYTES;

/// op(1) + checksum(4) + path_len(4) + payload_len(4)
pub const LOG_RECORD_OVERHEAD: usize = 13;

const OP_APPEND: u8 = 1;
const OP_DELETE: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRecordOp {
    /// Bytes the engine appended to the logical file
    Append,
    /// The engine unlinked the logical file
    Delete,
}

/// One framed write-ahead-log operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub op: LogRecordOp,
    pub path: String,
    pub payload: Vec<u8>,
}

impl LogRecord {
    pub fn append(path: &str, payload: Vec<u8>) -> Self {
        LogRecord {
            op: LogRecordOp::Append,
            path: path.to_string(),
            payload,
        }
    }

    /// Delete records carry no payload
    pub fn delete(path: &str) -> Self {
        LogRecord {
            op: LogRecordOp::Delete,
            path: path.to_string(),
            payload: Vec::new(),
        }
    }

    fn checksum(path: &[u8], payload: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(path);
        hasher.update(payload);
        hasher.finalize()
    }

    pub fn encode(&self) -> Vec<u8> {
        let path = self.path.as_bytes();
        let mut buf = Vec::with_capacity(LOG_RECORD_OVERHEAD + path.len() + self.payload.len());
        buf.push(match self.op {
            LogRecordOp::Append => OP_APPEND,
            LogRecordOp::Delete => OP_DELETE,
        });
        buf.extend_from_slice(&Self::checksum(path, &self.payload).to_le_bytes());
        buf.extend_from_slice(&(path.len() as u32).to_le_bytes());
        buf.extend_from_slice(path);
        buf.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.payload);

        debug_assert!(
            buf.len() == LOG_RECORD_OVERHEAD + path.len() + self.payload.len(),
            "Postcondition: encoded size must match expected"
        );
        buf
    }

    /// Decode one frame. Returns `None` if the frame is truncated, carries an
    /// unknown op, or fails its checksum.
    pub fn decode(data: &[u8]) -> Option<LogRecord> {
        if data.len() < LOG_RECORD_OVERHEAD {
            return None;
        }
        let op = match data[0] {
            OP_APPEND => LogRecordOp::Append,
            OP_DELETE => LogRecordOp::Delete,
            _ => return None,
        };
        let checksum = u32::from_le_bytes([data[1], data[2], data[3], data[4]]);
        let path_len = u32::from_le_bytes([data[5], data[6], data[7], data[8]]) as usize;

        let path_end = 9usize.checked_add(path_len)?;
        if data.len() < path_end + 4 {
            return None;
        }
        let path_bytes = &data[9..path_end];
        let payload_len = u32::from_le_bytes([
            data[path_end],
            data[path_end + 1],
            data[path_end + 2],
            data[path_end + 3],
        ]) as usize;

        let payload_start = path_end + 4;
        let payload_end = payload_start.checked_add(payload_len)?;
        if data.len() < payload_end {
            return None;
        }
        let payload = &data[payload_start..payload_end];

        if Self::checksum(path_bytes, payload) != checksum {
            return None;
        }
        let path = std::str::from_utf8(path_bytes).ok()?.to_string();
        Some(LogRecord {
            op,
            path,
            payload: payload.to_vec(),
        })
    }
}

/// Frame an engine append, splitting the payload so every encoded record fits
/// under the stream's per-record limit. Chunk order matches byte order; the
/// stream's per-partition ordering keeps it that way on the far side.
///
/// An empty append still produces one record, so the tailer creates the cache
/// file even before the first payload byte arrives.
pub fn encode_appends(path: &str, data: &[u8]) -> Vec<Vec<u8>> {
    let max_payload = MAX_STREAM_RECORD_BYTES - LOG_RECORD_OVERHEAD - path.len();
    debug_assert!(max_payload > 0, "path longer than a stream record");

    if data.is_empty() {
        return vec![LogRecord::append(path, Vec::new()).encode()];
    }
    data.chunks(max_payload)
        .map(|chunk| LogRecord::append(path, chunk.to_vec()).encode())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_round_trip() {
        let record = LogRecord::append("/db/000007.log", b"some wal bytes".to_vec());
        let encoded = record.encode();
        let decoded = LogRecord::decode(&encoded).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_delete_round_trip() {
        let record = LogRecord::delete("/db/000007.log");
        let decoded = LogRecord::decode(&record.encode()).unwrap();
        assert_eq!(decoded.op, LogRecordOp::Delete);
        assert_eq!(decoded.path, "/db/000007.log");
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn test_truncated_frame_fails_decode() {
        let encoded = LogRecord::append("/db/x.log", b"payload".to_vec()).encode();
        for cut in 0..encoded.len() {
            assert!(
                LogRecord::decode(&encoded[..cut]).is_none(),
                "truncation at {} must fail",
                cut
            );
        }
    }

    #[test]
    fn test_corrupted_frame_fails_decode() {
        let mut encoded = LogRecord::append("/db/x.log", b"payload".to_vec()).encode();
        let last = encoded.len() - 1;
        encoded[last] ^= 0xFF;
        assert!(LogRecord::decode(&encoded).is_none());
    }

    #[test]
    fn test_unknown_op_fails_decode() {
        let mut encoded = LogRecord::append("/db/x.log", b"p".to_vec()).encode();
        encoded[0] = 0x7F;
        assert!(LogRecord::decode(&encoded).is_none());
    }

    #[test]
    fn test_split_preserves_order_and_bytes() {
        let path = "/db/000001.log";
        let data: Vec<u8> = (0..3_000_000u32).map(|i| (i % 251) as u8).collect();

        let frames = encode_appends(path, &data);
        assert!(frames.len() >= 3, "3 MB must split into several records");
        assert!(frames
            .iter()
            .all(|f| f.len() <= MAX_STREAM_RECORD_BYTES));

        let mut reassembled = Vec::new();
        for frame in &frames {
            let record = LogRecord::decode(frame).unwrap();
            assert_eq!(record.op, LogRecordOp::Append);
            assert_eq!(record.path, path);
            reassembled.extend_from_slice(&record.payload);
        }
        assert_eq!(reassembled, data);
    }

    #[test]
    fn test_empty_append_produces_one_record() {
        let frames = encode_appends("/db/000001.log", b"");
        assert_eq!(frames.len(), 1);
        let record = LogRecord::decode(&frames[0]).unwrap();
        assert!(record.payload.is_empty());
    }
}
