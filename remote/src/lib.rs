//! Remote object store protocol
//!
//! The upload pipeline needs exactly two things from the destination namespace:
//!
//! - a paginated listing of the objects under a key prefix, each exposing its key and an opaque
//!   content fingerprint (the entity tag)
//! - a write of a local file's contents under a key, always with private access
//!
//! [`ObjectStore`] captures that surface. [`s3::S3Store`] talks to S3 (or any S3 compatible
//! endpoint) and [`memory::MemoryStore`] keeps everything in memory, which makes it suitable for
//! exercising the pipeline without a network.

pub mod memory;
pub mod s3;

/// One listed remote object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    /// Entity tag with the surrounding quotes stripped, empty if the store did not report one.
    pub fingerprint: String,
}

/// One page of a listing.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectSummary>,
    /// Token to pass to the next `list_page` call, `None` on the last page.
    pub continuation: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed listing objects in bucket {bucket:?} under prefix {prefix:?}: {source:#}")]
    List {
        bucket: String,
        prefix: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed reading {path:?}: {source:#}")]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed writing {key:?} to bucket {bucket:?}: {source:#}")]
    Put {
        bucket: String,
        key: String,
        #[source]
        source: anyhow::Error,
    },
}

#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// Name of the destination namespace, used for logging.
    fn bucket(&self) -> &str;

    /// Fetches a single page of objects whose keys start with `prefix`. Pass `None` for the
    /// first page and the previous page's `continuation` afterwards.
    async fn list_page(&self, prefix: &str, continuation: Option<String>)
    -> Result<ListPage, Error>;

    /// Streams the contents of the local file at `path` to `key` with private access.
    /// Returns the number of bytes sent.
    async fn put_object(&self, key: &str, path: &std::path::Path) -> Result<u64, Error>;
}

/// Normalizes an entity tag as reported by the store: `"abc"` becomes `abc`.
pub fn strip_etag(etag: &str) -> String {
    etag.trim_matches('"').to_string()
}
