//! [`ObjectStore`](crate::ObjectStore) backed by S3 or an S3 compatible service.

use anyhow::Context;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ObjectCannedAcl;

use crate::{Error, ListPage, ObjectSummary};

/// How to reach the store. Credentials always come from the standard AWS provider chain.
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    /// Custom endpoint, e.g. a MinIO deployment
    pub endpoint_url: Option<String>,
    /// Overrides the region resolved from the environment
    pub region: Option<String>,
    /// Address buckets as `endpoint/bucket` instead of `bucket.endpoint`
    pub force_path_style: bool,
}

pub struct S3Store {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3Store {
    pub async fn connect(bucket: &str, options: &ConnectOptions) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &options.region {
            loader = loader.region(aws_sdk_s3::config::Region::new(region.clone()));
        }
        let base_config = loader.load().await;
        let mut s3_config = aws_sdk_s3::config::Builder::from(&base_config);
        if let Some(endpoint_url) = &options.endpoint_url {
            s3_config = s3_config.endpoint_url(endpoint_url);
        }
        s3_config = s3_config.force_path_style(options.force_path_style);
        tracing::debug!(
            bucket,
            endpoint_url = ?options.endpoint_url,
            region = ?base_config.region(),
            "created s3 client"
        );
        Self {
            client: aws_sdk_s3::Client::from_conf(s3_config.build()),
            bucket: bucket.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl crate::ObjectStore for S3Store {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn list_page(
        &self,
        prefix: &str,
        continuation: Option<String>,
    ) -> Result<ListPage, Error> {
        let mut request = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix);
        if let Some(token) = continuation {
            request = request.continuation_token(token);
        }
        let response = request.send().await.map_err(|err| Error::List {
            bucket: self.bucket.clone(),
            prefix: prefix.to_string(),
            source: anyhow::anyhow!("{}", DisplayErrorContext(err)),
        })?;
        let objects = response
            .contents()
            .iter()
            .filter_map(|object| {
                object.key().map(|key| ObjectSummary {
                    key: key.to_string(),
                    fingerprint: crate::strip_etag(object.e_tag().unwrap_or_default()),
                })
            })
            .collect();
        let continuation = if response.is_truncated().unwrap_or(false) {
            response.next_continuation_token().map(str::to_string)
        } else {
            None
        };
        tracing::trace!(prefix, truncated = continuation.is_some(), "listed page");
        Ok(ListPage {
            objects,
            continuation,
        })
    }

    async fn put_object(&self, key: &str, path: &std::path::Path) -> Result<u64, Error> {
        let read_error = |source: anyhow::Error| Error::Read {
            path: path.to_path_buf(),
            source,
        };
        let size = tokio::fs::metadata(path)
            .await
            .context("failed reading metadata")
            .map_err(read_error)?
            .len();
        let body = ByteStream::from_path(path)
            .await
            .context("failed opening file for streaming")
            .map_err(read_error)?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .acl(ObjectCannedAcl::Private)
            .content_length(i64::try_from(size).unwrap_or(i64::MAX))
            .body(body)
            .send()
            .await
            .map_err(|err| Error::Put {
                bucket: self.bucket.clone(),
                key: key.to_string(),
                source: anyhow::anyhow!("{}", DisplayErrorContext(err)),
            })?;
        Ok(size)
    }
}
