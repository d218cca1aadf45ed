//! File classification and local-path to object-key mapping.
//!
//! Classification is by filename shape alone, never by probing:
//! - `*.sst`       -> sorted data file (immutable, lives in the object store)
//! - `*.log`       -> write-ahead log file
//! - `MANIFEST*`   -> version manifest
//! - `IDENTITY*`   -> identity file
//! - anything else -> plain local file

/// File classes the environment routes on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    SortedData,
    Log,
    Manifest,
    Identity,
    Other,
}

/// Classify a path by the shape of its basename.
pub fn classify(path: &str) -> FileType {
    let name = basename(path);
    if name.ends_with(".sst") {
        FileType::SortedData
    } else if name.ends_with(".log") {
        FileType::Log
    } else if name.starts_with("MANIFEST") {
        FileType::Manifest
    } else if name.starts_with("IDENTITY") {
        FileType::Identity
    } else {
        FileType::Other
    }
}

/// Final component of a slash-separated path. Trailing slashes are stripped,
/// so `basename("/a/b/") == "b"`.
pub fn basename(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

/// Parse the numeric file number out of an engine-generated name like
/// `000123.sst` or `000042.log`. Returns `None` for names without a numeric
/// prefix.
pub fn parse_file_number(path: &str) -> Option<u64> {
    let name = basename(path);
    let digits: &str = match name.find('.') {
        Some(idx) => &name[..idx],
        None => name,
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Maps local logical paths to object keys under the per-env source and
/// destination prefixes.
///
/// The mapper is intentionally strict: asking for a source name on an env
/// without a source bucket is a caller bug, and panics. Callers check
/// `has_src()` / `has_dest()` first.
#[derive(Debug, Clone)]
pub struct PathMapper {
    src_prefix: Option<String>,
    dest_prefix: Option<String>,
}

impl PathMapper {
    /// Prefixes are trimmed of surrounding whitespace and trailing slashes at
    /// construction.
    pub fn new(src_prefix: Option<&str>, dest_prefix: Option<&str>) -> Self {
        let norm = |p: &str| p.trim().trim_end_matches('/').to_string();
        PathMapper {
            src_prefix: src_prefix.map(norm),
            dest_prefix: dest_prefix.map(norm),
        }
    }

    pub fn has_src(&self) -> bool {
        self.src_prefix.is_some()
    }

    pub fn has_dest(&self) -> bool {
        self.dest_prefix.is_some()
    }

    /// Object key for `path` in the source bucket. Panics if no source bucket
    /// is configured.
    pub fn srcname(&self, path: &str) -> String {
        let prefix = self
            .src_prefix
            .as_deref()
            .expect("srcname called without a source bucket");
        format!("{}/{}", prefix, basename(path))
    }

    /// Object key for `path` in the destination bucket. Panics if no
    /// destination bucket is configured.
    pub fn destname(&self, path: &str) -> String {
        let prefix = self
            .dest_prefix
            .as_deref()
            .expect("destname called without a destination bucket");
        format!("{}/{}", prefix, basename(path))
    }

    pub fn src_prefix(&self) -> Option<&str> {
        self.src_prefix.as_deref()
    }

    pub fn dest_prefix(&self) -> Option<&str> {
        self.dest_prefix.as_deref()
    }
}
