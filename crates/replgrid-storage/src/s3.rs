//! S3-compatible `ObjectStore` backed by `aws-sdk-s3`.
//!
//! The bucket must have versioning enabled; snapshots reference version ids.
//! Credentials come from the standard provider chain, which in a cluster is
//! usually the environment injected from the storage secret.

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::Client;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use tracing::{debug, info};

use replgrid_core::config::StorageConfig;

use crate::error::{StorageError, StorageResult};
use crate::object::{
    ObjectEntry, ObjectPage, ObjectStore, VersionEntry, VersionMarker, VersionPage,
};

const MAX_KEYS: i32 = 1000;

/// Characters left unescaped in a `CopySource` key.
const COPY_SOURCE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Characters left unescaped in the `versionId` query value.
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

#[derive(Clone)]
pub struct S3Store {
    client: Client,
    bucket: String,
}

impl S3Store {
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Build a client from the storage section of the config.
    pub async fn connect(config: &StorageConfig) -> StorageResult<Self> {
        if config.bucket.is_empty() {
            return Err(StorageError::Config("storage.bucket is not set".to_string()));
        }
        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;
        let mut builder =
            aws_sdk_s3::config::Builder::from(&shared).force_path_style(config.force_path_style);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        info!(bucket = %config.bucket, endpoint = ?config.endpoint, "s3 store configured");
        Ok(Self::new(Client::from_conf(builder.build()), config.bucket.clone()))
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn copy_source(&self, key: &str, version: Option<&str>) -> String {
        let encoded = utf8_percent_encode(key, COPY_SOURCE);
        match version {
            Some(v) => {
                let v = utf8_percent_encode(v, QUERY_VALUE);
                format!("{}/{encoded}?versionId={v}", self.bucket)
            }
            None => format!("{}/{encoded}", self.bucket),
        }
    }
}

fn request_error<E: std::error::Error>(err: E) -> StorageError {
    StorageError::Request(DisplayErrorContext(err).to_string())
}

fn size_of(size: Option<i64>) -> u64 {
    size.and_then(|s| u64::try_from(s).ok()).unwrap_or(0)
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn list_objects(&self, prefix: &str, token: Option<String>) -> StorageResult<ObjectPage> {
        let out = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .max_keys(MAX_KEYS)
            .set_continuation_token(token)
            .send()
            .await
            .map_err(request_error)?;

        let entries = out
            .contents()
            .iter()
            .filter_map(|obj| {
                obj.key().map(|key| ObjectEntry {
                    key: key.to_string(),
                    size: size_of(obj.size()),
                })
            })
            .collect();
        let next_token = if out.is_truncated().unwrap_or(false) {
            out.next_continuation_token().map(str::to_owned)
        } else {
            None
        };
        debug!(prefix, more = next_token.is_some(), "listed objects");
        Ok(ObjectPage { entries, next_token })
    }

    async fn list_versions(
        &self,
        prefix: &str,
        marker: Option<VersionMarker>,
    ) -> StorageResult<VersionPage> {
        let (key_marker, version_id_marker) = match marker {
            Some(m) => (Some(m.key_marker), m.version_id_marker),
            None => (None, None),
        };
        let out = self
            .client
            .list_object_versions()
            .bucket(&self.bucket)
            .prefix(prefix)
            .max_keys(MAX_KEYS)
            .set_key_marker(key_marker)
            .set_version_id_marker(version_id_marker)
            .send()
            .await
            .map_err(request_error)?;

        let versions = out
            .versions()
            .iter()
            .filter_map(|v| {
                Some(VersionEntry {
                    key: v.key()?.to_string(),
                    version_id: v.version_id()?.to_string(),
                    size: size_of(v.size()),
                    is_latest: v.is_latest().unwrap_or(false),
                })
            })
            .collect();
        let next_marker = match (out.is_truncated().unwrap_or(false), out.next_key_marker()) {
            (true, Some(key)) => Some(VersionMarker {
                key_marker: key.to_string(),
                version_id_marker: out.next_version_id_marker().map(str::to_owned),
            }),
            _ => None,
        };
        Ok(VersionPage {
            versions,
            next_marker,
        })
    }

    async fn put_object(&self, key: &str, body: Bytes) -> StorageResult<Option<String>> {
        let out = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(request_error)?;
        Ok(out.version_id().map(str::to_owned))
    }

    async fn get_object(&self, key: &str, version: Option<&str>) -> StorageResult<Bytes> {
        let out = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .set_version_id(version.map(str::to_owned))
            .send()
            .await
            .map_err(|e| {
                let service = e.into_service_error();
                if service.is_no_such_key() {
                    StorageError::NotFound {
                        key: key.to_string(),
                    }
                } else {
                    request_error(service)
                }
            })?;
        let body = out.body.collect().await.map_err(request_error)?;
        Ok(body.into_bytes())
    }

    async fn copy_object(
        &self,
        src_key: &str,
        src_version: Option<&str>,
        dest_key: &str,
    ) -> StorageResult<()> {
        self.client
            .copy_object()
            .bucket(&self.bucket)
            .key(dest_key)
            .copy_source(self.copy_source(src_key, src_version))
            .send()
            .await
            .map_err(request_error)?;
        Ok(())
    }
}
