//! Configuration for the cloud storage environment.
//!
//! An environment is configured with up to two buckets: a source bucket the
//! instance replicates from, and a destination bucket it writes to. A writer
//! has a destination; a read-only replica has only a source; an instance that
//! owns its data end-to-end has both pointing at the same bucket.

use crate::cloud::error::{CloudError, CloudResult};
use crate::cloud::retry::RetryStrategy;
use crate::cloud::telemetry::{CloudRequestCallback, CloudStatistics};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Region used when neither the configuration nor the environment names one.
/// Buckets in the default region of the provider may not give read-your-writes,
/// so an explicit region is always resolved.
pub const DEFAULT_REGION: &str = "us-west-2";

/// One side (source or destination) of the environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketOptions {
    /// Bucket name
    pub bucket: String,
    /// Object prefix inside the bucket under which this env's files live
    pub object_prefix: String,
    /// Bucket region; filled from credentials/environment when empty
    pub region: String,
}

impl BucketOptions {
    pub fn new(bucket: &str, object_prefix: &str, region: &str) -> Self {
        let mut opts = BucketOptions {
            bucket: bucket.to_string(),
            object_prefix: object_prefix.to_string(),
            region: region.to_string(),
        };
        opts.trim();
        opts
    }

    /// Strip surrounding whitespace and trailing prefix slashes
    pub fn trim(&mut self) {
        self.bucket = self.bucket.trim().to_string();
        self.object_prefix = self
            .object_prefix
            .trim()
            .trim_end_matches('/')
            .to_string();
        self.region = self.region.trim().to_string();
    }

    pub fn is_valid(&self) -> bool {
        !self.bucket.is_empty() && !self.object_prefix.is_empty()
    }
}

/// Static credentials for the object-store and stream adapters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CloudCredentials {
    pub access_key_id: String,
    pub secret_key: String,
    /// Default region applied to buckets that do not name one
    pub region: Option<String>,
}

impl CloudCredentials {
    pub fn new(access_key_id: &str, secret_key: &str) -> Self {
        CloudCredentials {
            access_key_id: access_key_id.to_string(),
            secret_key: secret_key.to_string(),
            region: None,
        }
    }

    /// Read credentials from the well-known environment variables, accepting
    /// upper- or lowercase names. Returns `None` when no key pair is set.
    pub fn from_env() -> Option<Self> {
        let access = env_either("AWS_ACCESS_KEY_ID", "aws_access_key_id")?;
        let secret = env_either("AWS_SECRET_ACCESS_KEY", "aws_secret_access_key")?;
        Some(CloudCredentials {
            access_key_id: access,
            secret_key: secret,
            region: env_either("AWS_DEFAULT_REGION", "aws_default_region"),
        })
    }
}

fn env_either(upper: &str, lower: &str) -> Option<String> {
    std::env::var(upper)
        .or_else(|_| std::env::var(lower))
        .ok()
        .filter(|v| !v.is_empty())
}

/// Options controlling the cloud environment
#[derive(Clone, Serialize, Deserialize)]
pub struct CloudEnvOptions {
    /// Bucket this instance replicates from (read-only side)
    pub src_bucket: Option<BucketOptions>,
    /// Bucket this instance writes new artifacts to
    pub dest_bucket: Option<BucketOptions>,

    /// Credentials handed to the adapters
    pub credentials: CloudCredentials,

    /// If true, sorted data files are retained locally after upload and reads
    /// prefer the local copy. If false, the local copy is deleted on close
    /// and reads are served by ranged gets against the cloud object.
    pub keep_local_sst_files: bool,

    /// If true, write-ahead-log files stay on the local filesystem and the
    /// log stream is not used. If false, every log write becomes a stream
    /// record and reads are served from the tailer's cache.
    pub keep_local_log_files: bool,

    /// Memory-mapped reads require the local sorted-data copy
    pub use_mmap_reads: bool,

    /// Minimum interval between successive manifest uploads.
    /// Zero disables manifest uploads entirely.
    #[serde(with = "duration_millis")]
    pub manifest_durable_periodicity: Duration,

    /// Sweep interval for the external purger
    #[serde(with = "duration_millis")]
    pub purger_periodicity: Duration,

    /// How long a cloud object outlives the engine's delete request, so that
    /// in-flight readers holding the old version can finish
    #[serde(with = "duration_millis")]
    pub file_deletion_delay: Duration,

    /// Adapter connect timeout
    #[serde(with = "duration_millis")]
    pub connect_timeout: Duration,

    /// Adapter per-request timeout
    #[serde(with = "duration_millis")]
    pub request_timeout: Duration,

    /// Custom endpoint for S3-compatible services (MinIO, LocalStack)
    pub s3_endpoint: Option<String>,

    /// Retry policy for cloud calls; bounded exponential backoff when unset
    #[serde(skip)]
    pub retry_strategy: Option<Arc<dyn RetryStrategy>>,

    /// Invoked after every cloud call attempt with
    /// `(kind, bytes, elapsed_micros, ok)`. Must not panic.
    #[serde(skip)]
    pub cloud_request_callback: Option<CloudRequestCallback>,

    /// Counter/histogram sink
    #[serde(skip)]
    pub cloud_statistics: Option<Arc<CloudStatistics>>,
}

impl std::fmt::Debug for CloudEnvOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudEnvOptions")
            .field("src_bucket", &self.src_bucket)
            .field("dest_bucket", &self.dest_bucket)
            .field("keep_local_sst_files", &self.keep_local_sst_files)
            .field("keep_local_log_files", &self.keep_local_log_files)
            .field("use_mmap_reads", &self.use_mmap_reads)
            .field(
                "manifest_durable_periodicity",
                &self.manifest_durable_periodicity,
            )
            .field("purger_periodicity", &self.purger_periodicity)
            .field("file_deletion_delay", &self.file_deletion_delay)
            .field("s3_endpoint", &self.s3_endpoint)
            .field("has_retry_strategy", &self.retry_strategy.is_some())
            .field("has_request_callback", &self.cloud_request_callback.is_some())
            .field("has_statistics", &self.cloud_statistics.is_some())
            .finish()
    }
}

impl Default for CloudEnvOptions {
    fn default() -> Self {
        CloudEnvOptions {
            src_bucket: None,
            dest_bucket: None,
            credentials: CloudCredentials::default(),
            keep_local_sst_files: false,
            keep_local_log_files: true,
            use_mmap_reads: false,
            manifest_durable_periodicity: Duration::from_secs(60),
            purger_periodicity: Duration::from_secs(10 * 60),
            file_deletion_delay: Duration::from_secs(5 * 60),
            connect_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(600),
            s3_endpoint: None,
            retry_strategy: None,
            cloud_request_callback: None,
            cloud_statistics: None,
        }
    }
}

impl CloudEnvOptions {
    /// Options for tests: destination-only writer with short intervals
    pub fn test(bucket: &str, prefix: &str) -> Self {
        CloudEnvOptions {
            dest_bucket: Some(BucketOptions::new(bucket, prefix, "test-region")),
            manifest_durable_periodicity: Duration::from_millis(100),
            file_deletion_delay: Duration::from_millis(100),
            ..CloudEnvOptions::default()
        }
    }

    pub fn has_src(&self) -> bool {
        self.src_bucket.is_some()
    }

    pub fn has_dest(&self) -> bool {
        self.dest_bucket.is_some()
    }

    /// Source and destination are both configured and name different buckets
    pub fn two_unique_buckets(&self) -> bool {
        match (&self.src_bucket, &self.dest_bucket) {
            (Some(src), Some(dest)) => src.bucket != dest.bucket,
            _ => false,
        }
    }

    /// Trim bucket fields and resolve empty regions from credentials,
    /// environment, or the default.
    pub fn normalize(&mut self) {
        let fallback_region = self
            .credentials
            .region
            .clone()
            .filter(|r| !r.is_empty())
            .or_else(|| env_either("AWS_DEFAULT_REGION", "aws_default_region"))
            .unwrap_or_else(|| DEFAULT_REGION.to_string());

        for side in [&mut self.src_bucket, &mut self.dest_bucket]
            .into_iter()
            .flatten()
        {
            side.trim();
            if side.region.is_empty() {
                side.region = fallback_region.clone();
            }
        }
    }

    /// Validate the invariants the rest of the environment relies on.
    /// Call after `normalize`.
    pub fn validate(&self) -> CloudResult<()> {
        if let Some(src) = &self.src_bucket {
            if !src.is_valid() {
                return Err(CloudError::InvalidArgument(
                    "source bucket requires a name and an object prefix".to_string(),
                ));
            }
        }
        if let Some(dest) = &self.dest_bucket {
            if !dest.is_valid() {
                return Err(CloudError::InvalidArgument(
                    "destination bucket requires a name and an object prefix".to_string(),
                ));
            }
        }
        if !self.has_src() && !self.has_dest() {
            return Err(CloudError::InvalidArgument(
                "at least one of source and destination bucket must be configured".to_string(),
            ));
        }
        if self.two_unique_buckets() {
            let src = self.src_bucket.as_ref().expect("checked");
            let dest = self.dest_bucket.as_ref().expect("checked");
            if src.region != dest.region {
                return Err(CloudError::InvalidArgument(format!(
                    "source and destination buckets must share a region ({} vs {})",
                    src.region, dest.region
                )));
            }
        }
        if !self.manifest_durable_periodicity.is_zero() && !self.keep_local_log_files {
            return Err(CloudError::InvalidArgument(
                "manifest durability requires keep_local_log_files".to_string(),
            ));
        }
        if self.use_mmap_reads && !self.keep_local_sst_files {
            return Err(CloudError::InvalidArgument(
                "use_mmap_reads requires keep_local_sst_files".to_string(),
            ));
        }
        Ok(())
    }
}

/// Serde helper for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = CloudEnvOptions::default();
        assert!(!opts.keep_local_sst_files);
        assert!(opts.keep_local_log_files);
        assert_eq!(opts.manifest_durable_periodicity, Duration::from_secs(60));
        assert_eq!(opts.purger_periodicity, Duration::from_secs(600));
        assert_eq!(opts.connect_timeout, Duration::from_secs(30));
        assert_eq!(opts.request_timeout, Duration::from_secs(600));
        assert!(opts.s3_endpoint.is_none());
        assert!(opts.retry_strategy.is_none());
    }

    #[test]
    fn test_bucket_trim() {
        let bucket = BucketOptions::new("  my-bucket ", " db/prefix/ ", " us-west-2 ");
        assert_eq!(bucket.bucket, "my-bucket");
        assert_eq!(bucket.object_prefix, "db/prefix");
        assert_eq!(bucket.region, "us-west-2");
    }

    #[test]
    fn test_normalize_fills_region() {
        let mut opts = CloudEnvOptions {
            dest_bucket: Some(BucketOptions::new("b", "p", "")),
            ..CloudEnvOptions::default()
        };
        opts.credentials.region = Some("eu-central-1".to_string());
        opts.normalize();
        assert_eq!(opts.dest_bucket.as_ref().unwrap().region, "eu-central-1");
    }

    #[test]
    fn test_validate_requires_a_bucket() {
        let opts = CloudEnvOptions::default();
        assert!(matches!(
            opts.validate(),
            Err(CloudError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_validate_two_bucket_regions() {
        let mut opts = CloudEnvOptions {
            src_bucket: Some(BucketOptions::new("a", "p", "us-east-1")),
            dest_bucket: Some(BucketOptions::new("b", "q", "us-west-2")),
            ..CloudEnvOptions::default()
        };
        assert!(matches!(
            opts.validate(),
            Err(CloudError::InvalidArgument(_))
        ));

        opts.dest_bucket.as_mut().unwrap().region = "us-east-1".to_string();
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_validate_manifest_requires_local_logs() {
        let opts = CloudEnvOptions {
            dest_bucket: Some(BucketOptions::new("b", "p", "r")),
            keep_local_log_files: false,
            ..CloudEnvOptions::default()
        };
        // default periodicity is 60s > 0
        assert!(matches!(
            opts.validate(),
            Err(CloudError::InvalidArgument(_))
        ));

        let opts = CloudEnvOptions {
            dest_bucket: Some(BucketOptions::new("b", "p", "r")),
            keep_local_log_files: false,
            manifest_durable_periodicity: Duration::ZERO,
            ..CloudEnvOptions::default()
        };
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_validate_mmap_requires_local_sst() {
        let opts = CloudEnvOptions {
            dest_bucket: Some(BucketOptions::new("b", "p", "r")),
            use_mmap_reads: true,
            ..CloudEnvOptions::default()
        };
        assert!(matches!(
            opts.validate(),
            Err(CloudError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_options_serialization_round_trip() {
        let opts = CloudEnvOptions::test("bucket", "prefix");
        let json = serde_json::to_string(&opts).unwrap();
        let parsed: CloudEnvOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.dest_bucket, opts.dest_bucket);
        assert_eq!(
            parsed.manifest_durable_periodicity,
            opts.manifest_durable_periodicity
        );
        assert_eq!(parsed.file_deletion_delay, opts.file_deletion_delay);
    }
}
