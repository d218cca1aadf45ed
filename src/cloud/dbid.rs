//! Database-identifier registry.
//!
//! Every database instance publishes its identity as a marker object in the
//! destination bucket: key `.rockset/dbid/<dbid>`, empty body, and the
//! instance's object prefix carried in a `dirname` metadata header. Uploading
//! the identity file is the publication point; lookups and bootstrap
//! discovery read the markers back.

use crate::cloud::error::{CloudError, CloudResult};
use crate::cloud::storage_client::CloudStorageClient;
use std::collections::HashMap;

/// Reserved object prefix for registry markers
pub const DBID_REGISTRY_PREFIX: &str = ".rockset/dbid/";

/// Metadata header carrying the instance's object prefix
const DIRNAME_HEADER: &str = "dirname";

/// Registry view over a bucket
#[derive(Clone)]
pub struct DbidRegistry {
    client: CloudStorageClient,
}

impl DbidRegistry {
    pub fn new(client: CloudStorageClient) -> Self {
        DbidRegistry { client }
    }

    fn marker_key(dbid: &str) -> String {
        format!("{}{}", DBID_REGISTRY_PREFIX, dbid)
    }

    /// Publish `dbid -> dirname`. Overwrites any previous mapping.
    pub async fn save(&self, bucket: &str, dbid: &str, dirname: &str) -> CloudResult<()> {
        if dbid.is_empty() {
            return Err(CloudError::InvalidArgument(
                "dbid must not be empty".to_string(),
            ));
        }
        let mut metadata = HashMap::new();
        metadata.insert(DIRNAME_HEADER.to_string(), dirname.to_string());
        self.client
            .put(bucket, &Self::marker_key(dbid), &[], Some(&metadata))
            .await
    }

    /// Object prefix registered for `dbid`, or `NotFound`
    pub async fn lookup(&self, bucket: &str, dbid: &str) -> CloudResult<String> {
        let meta = self.client.head(bucket, &Self::marker_key(dbid)).await?;
        meta.metadata
            .get(DIRNAME_HEADER)
            .cloned()
            .ok_or_else(|| {
                CloudError::Other(format!(
                    "registry marker for {} lacks a {} header",
                    dbid, DIRNAME_HEADER
                ))
            })
    }

    /// All registered instances in the bucket. Linear in registry size: one
    /// head per marker after the listing. Acceptable; this runs at bootstrap
    /// and in tooling, not on the data path.
    pub async fn list(&self, bucket: &str) -> CloudResult<HashMap<String, String>> {
        let markers = self.client.list_all(bucket, DBID_REGISTRY_PREFIX).await?;
        let mut out = HashMap::new();
        for marker in markers {
            let dbid = match marker.key.strip_prefix(DBID_REGISTRY_PREFIX) {
                Some(rest) if !rest.is_empty() => rest.to_string(),
                _ => continue,
            };
            let dirname = self.lookup(bucket, &dbid).await?;
            out.insert(dbid, dirname);
        }
        Ok(out)
    }

    pub async fn delete(&self, bucket: &str, dbid: &str) -> CloudResult<()> {
        self.client.delete(bucket, &Self::marker_key(dbid)).await
    }
}
