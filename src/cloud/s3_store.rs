//! S3 object store adapter.
//!
//! Production implementation of the `ObjectStore` trait over the
//! `object_store` crate from the Arrow ecosystem. Supports AWS S3 and
//! S3-compatible services (MinIO, LocalStack) via a custom endpoint.
//!
//! The crate binds one bucket per client, so this adapter keeps a lazily
//! built client per bucket. It cannot create buckets — `create_bucket` is a
//! no-op and bucket provisioning is an operator concern. The crate also
//! carries its own transient-fault retry policy; errors that surface here are
//! treated as definite.

use crate::cloud::config::CloudCredentials;
use crate::cloud::error::{CloudError, CloudResult};
use crate::cloud::object_store::{ListPage, ObjectMeta, ObjectStore};
use bytes::Bytes;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::{
    Attribute, AttributeValue, Attributes, ClientOptions, GetOptions, ObjectStore as S3Trait,
    PutOptions,
};
use parking_lot::RwLock;
use std::borrow::Cow;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Object store adapter over AWS S3
pub struct S3ObjectStore {
    credentials: CloudCredentials,
    /// Custom endpoint for S3-compatible services
    endpoint: Option<String>,
    region: String,
    connect_timeout: Duration,
    request_timeout: Duration,
    /// One crate client per bucket, built on first use
    clients: RwLock<HashMap<String, Arc<dyn S3Trait>>>,
}

impl S3ObjectStore {
    /// Credentials fall back to the well-known environment variables when
    /// the explicit pair is empty.
    pub fn new(
        credentials: CloudCredentials,
        region: &str,
        endpoint: Option<String>,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Self {
        let credentials = if credentials.access_key_id.is_empty() {
            CloudCredentials::from_env().unwrap_or(credentials)
        } else {
            credentials
        };
        S3ObjectStore {
            credentials,
            endpoint,
            region: region.to_string(),
            connect_timeout,
            request_timeout,
            clients: RwLock::new(HashMap::new()),
        }
    }

    fn client_for(&self, bucket: &str) -> CloudResult<Arc<dyn S3Trait>> {
        if let Some(client) = self.clients.read().get(bucket) {
            return Ok(Arc::clone(client));
        }

        let client_options = ClientOptions::new()
            .with_connect_timeout(self.connect_timeout)
            .with_timeout(self.request_timeout);
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(bucket)
            .with_region(&self.region)
            .with_access_key_id(&self.credentials.access_key_id)
            .with_secret_access_key(&self.credentials.secret_key)
            .with_client_options(client_options);
        if let Some(endpoint) = &self.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"));
        }
        let client: Arc<dyn S3Trait> = Arc::new(builder.build().map_err(Self::map_error)?);

        self.clients
            .write()
            .insert(bucket.to_string(), Arc::clone(&client));
        Ok(client)
    }

    fn map_error(err: object_store::Error) -> CloudError {
        match &err {
            object_store::Error::NotFound { .. } => CloudError::NotFound(err.to_string()),
            object_store::Error::AlreadyExists { .. } => {
                CloudError::AlreadyExists(err.to_string())
            }
            object_store::Error::Precondition { .. } => {
                CloudError::InvalidArgument(err.to_string())
            }
            // The crate retries transient faults internally; whatever
            // reaches us is definite
            _ => CloudError::Other(err.to_string()),
        }
    }

    fn meta_from(meta: &object_store::ObjectMeta, attributes: Option<&Attributes>) -> ObjectMeta {
        let mut user_metadata = HashMap::new();
        if let Some(attributes) = attributes {
            for (attribute, value) in attributes.iter() {
                if let Attribute::Metadata(name) = attribute {
                    user_metadata.insert(name.to_string(), value.as_ref().to_string());
                }
            }
        }
        ObjectMeta {
            key: meta.location.to_string(),
            size: meta.size as u64,
            mtime_ms: meta.last_modified.timestamp_millis().try_into().unwrap_or(0),
            metadata: user_metadata,
        }
    }
}

impl ObjectStore for S3ObjectStore {
    fn head<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = CloudResult<ObjectMeta>> + Send + 'a>> {
        Box::pin(async move {
            let client = self.client_for(bucket)?;
            let path = ObjectPath::from(key);
            // A head through get_opts carries the user metadata attributes,
            // which a plain head() drops
            let mut options = GetOptions::default();
            options.head = true;
            let result = client
                .get_opts(&path, options)
                .await
                .map_err(Self::map_error)?;
            Ok(Self::meta_from(&result.meta, Some(&result.attributes)))
        })
    }

    fn get<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        range: Option<std::ops::Range<u64>>,
    ) -> Pin<Box<dyn Future<Output = CloudResult<Vec<u8>>> + Send + 'a>> {
        Box::pin(async move {
            let client = self.client_for(bucket)?;
            let path = ObjectPath::from(key);
            match range {
                Some(range) => {
                    // Clamp to the object size so past-EOF reads come back
                    // short instead of erroring
                    let meta = client.head(&path).await.map_err(Self::map_error)?;
                    let size = meta.size;
                    let start = (range.start as usize).min(size);
                    let end = (range.end as usize).min(size);
                    if start >= end {
                        return Ok(Vec::new());
                    }
                    let data = client
                        .get_range(&path, start..end)
                        .await
                        .map_err(Self::map_error)?;
                    Ok(data.to_vec())
                }
                None => {
                    let result = client.get(&path).await.map_err(Self::map_error)?;
                    let data = result.bytes().await.map_err(Self::map_error)?;
                    Ok(data.to_vec())
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
            let client = self.client_for(bucket)?;
            let path = ObjectPath::from(key);
            let payload = Bytes::copy_from_slice(data);
            match metadata {
                Some(metadata) => {
                    let mut attributes = Attributes::new();
                    for (name, value) in metadata {
                        attributes.insert(
                            Attribute::Metadata(Cow::Owned(name.clone())),
                            AttributeValue::from(value.clone()),
                        );
                    }
                    let mut options = PutOptions::default();
                    options.attributes = attributes;
                    client
                        .put_opts(&path, payload.into(), options)
                        .await
                        .map_err(Self::map_error)?;
                }
                None => {
                    client
                        .put(&path, payload.into())
                        .await
                        .map_err(Self::map_error)?;
                }
            }
            Ok(())
        })
    }

    fn delete<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = CloudResult<()>> + Send + 'a>> {
        Box::pin(async move {
            let client = self.client_for(bucket)?;
            let path = ObjectPath::from(key);
            match client.delete(&path).await {
                Ok(()) => Ok(()),
                Err(object_store::Error::NotFound { .. }) => {
                    Err(CloudError::NotFound(format!("{}/{}", bucket, key)))
                }
                Err(e) => Err(Self::map_error(e)),
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
            let src = ObjectPath::from(src_key);
            let dst = ObjectPath::from(dst_key);
            if src_bucket == dst_bucket {
                let client = self.client_for(src_bucket)?;
                client.copy(&src, &dst).await.map_err(Self::map_error)?;
                return Ok(());
            }
            // The crate binds a client per bucket; cross-bucket copies go
            // through the caller
            let src_client = self.client_for(src_bucket)?;
            let dst_client = self.client_for(dst_bucket)?;
            let result = src_client.get(&src).await.map_err(Self::map_error)?;
            let data = result.bytes().await.map_err(Self::map_error)?;
            dst_client
                .put(&dst, data.into())
                .await
                .map_err(Self::map_error)?;
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
            use futures::TryStreamExt;

            let client = self.client_for(bucket)?;
            let prefix_path = ObjectPath::from(prefix);
            let mut stream = match marker {
                Some(marker) => {
                    let offset = ObjectPath::from(marker);
                    client.list_with_offset(Some(&prefix_path), &offset)
                }
                None => client.list(Some(&prefix_path)),
            };

            let mut objects = Vec::new();
            let mut truncated = false;
            while let Some(meta) = stream.try_next().await.map_err(Self::map_error)? {
                if objects.len() == max_keys {
                    truncated = true;
                    break;
                }
                objects.push(Self::meta_from(&meta, None));
            }
            let next_marker = if truncated {
                objects.last().map(|o: &ObjectMeta| o.key.clone())
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
        _bucket: &'a str,
        _region: &'a str,
    ) -> Pin<Box<dyn Future<Output = CloudResult<()>> + Send + 'a>> {
        // The crate exposes no bucket-creation API; buckets are provisioned
        // by the operator and an existing bucket is the success case anyway
        Box::pin(async move { Ok(()) })
    }
}

impl std::fmt::Debug for S3ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3ObjectStore")
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}
