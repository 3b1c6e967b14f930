//! In-memory [`ObjectStore`](crate::ObjectStore) with paged listings and failure injection.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, anyhow};

use crate::{Error, ListPage, ObjectSummary};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub fingerprint: String,
}

#[derive(Debug)]
pub struct MemoryStore {
    bucket: String,
    page_size: usize,
    objects: Mutex<std::collections::BTreeMap<String, StoredObject>>,
    failing_keys: Mutex<std::collections::HashSet<String>>,
    failing_listing: AtomicBool,
    generation: AtomicU64,
    puts: AtomicU64,
    pages_listed: AtomicU64,
}

impl MemoryStore {
    /// `page_size` is the maximum number of objects returned per listing page (at least 1).
    pub fn new(bucket: &str, page_size: usize) -> Self {
        Self {
            bucket: bucket.to_string(),
            page_size: page_size.max(1),
            objects: Mutex::default(),
            failing_keys: Mutex::default(),
            failing_listing: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            puts: AtomicU64::new(0),
            pages_listed: AtomicU64::new(0),
        }
    }

    fn objects(
        &self,
    ) -> std::sync::MutexGuard<'_, std::collections::BTreeMap<String, StoredObject>> {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_fingerprint(&self) -> String {
        format!("{:016x}", self.generation.fetch_add(1, Ordering::Relaxed))
    }

    /// Seeds an object directly; this does not count as a put.
    pub fn insert(&self, key: &str, body: &[u8]) {
        let object = StoredObject {
            body: body.to_vec(),
            fingerprint: self.next_fingerprint(),
        };
        self.objects().insert(key.to_string(), object);
    }

    pub fn get(&self, key: &str) -> Option<StoredObject> {
        self.objects().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects().keys().cloned().collect()
    }

    /// Number of successful `put_object` calls so far.
    pub fn put_count(&self) -> u64 {
        self.puts.load(Ordering::Relaxed)
    }

    pub fn pages_listed(&self) -> u64 {
        self.pages_listed.load(Ordering::Relaxed)
    }

    /// Every subsequent `put_object` for `key` fails.
    pub fn fail_puts_for(&self, key: &str) {
        self.failing_keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string());
    }

    /// Every subsequent listing page after the first one fails.
    pub fn fail_listing(&self) {
        self.failing_listing.store(true, Ordering::Release);
    }
}

#[async_trait::async_trait]
impl crate::ObjectStore for MemoryStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn list_page(
        &self,
        prefix: &str,
        continuation: Option<String>,
    ) -> Result<ListPage, Error> {
        if continuation.is_some() && self.failing_listing.load(Ordering::Acquire) {
            return Err(Error::List {
                bucket: self.bucket.clone(),
                prefix: prefix.to_string(),
                source: anyhow!("injected listing failure"),
            });
        }
        self.pages_listed.fetch_add(1, Ordering::Relaxed);
        let objects = self.objects();
        let start = match &continuation {
            Some(token) => std::ops::Bound::Excluded(token.clone()),
            None => std::ops::Bound::Unbounded,
        };
        let mut matching = objects
            .range((start, std::ops::Bound::Unbounded))
            .filter(|(key, _)| key.starts_with(prefix));
        let page: Vec<ObjectSummary> = matching
            .by_ref()
            .take(self.page_size)
            .map(|(key, object)| ObjectSummary {
                key: key.clone(),
                fingerprint: object.fingerprint.clone(),
            })
            .collect();
        let continuation = match matching.next() {
            Some(_) => page.last().map(|object| object.key.clone()),
            None => None,
        };
        Ok(ListPage {
            objects: page,
            continuation,
        })
    }

    async fn put_object(&self, key: &str, path: &std::path::Path) -> Result<u64, Error> {
        let body = tokio::fs::read(path)
            .await
            .context("failed reading file contents")
            .map_err(|source| Error::Read {
                path: path.to_path_buf(),
                source,
            })?;
        let failing = self
            .failing_keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key);
        if failing {
            return Err(Error::Put {
                bucket: self.bucket.clone(),
                key: key.to_string(),
                source: anyhow!("injected write failure"),
            });
        }
        let size = body.len() as u64;
        let object = StoredObject {
            body,
            fingerprint: self.next_fingerprint(),
        };
        self.objects().insert(key.to_string(), object);
        self.puts.fetch_add(1, Ordering::Relaxed);
        Ok(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ObjectStore;

    async fn list_all(store: &MemoryStore, prefix: &str) -> Result<Vec<Vec<String>>, Error> {
        let mut pages = vec![];
        let mut continuation = None;
        loop {
            let page = store.list_page(prefix, continuation).await?;
            pages.push(page.objects.into_iter().map(|object| object.key).collect());
            match page.continuation {
                Some(token) => continuation = Some(token),
                None => return Ok(pages),
            }
        }
    }

    #[tokio::test]
    async fn listing_is_paged_and_filtered() -> Result<(), Error> {
        let store = MemoryStore::new("bucket", 2);
        for key in ["a/1", "a/2", "a/3", "b/1", "a/4", "a/5"] {
            store.insert(key, key.as_bytes());
        }
        let pages = list_all(&store, "a/").await?;
        assert_eq!(
            pages,
            vec![
                vec!["a/1".to_string(), "a/2".to_string()],
                vec!["a/3".to_string(), "a/4".to_string()],
                vec!["a/5".to_string()],
            ]
        );
        assert_eq!(list_all(&store, "c/").await?, vec![Vec::<String>::new()]);
        Ok(())
    }

    #[tokio::test]
    async fn exact_multiple_of_page_size_has_no_empty_trailing_page() -> Result<(), Error> {
        let store = MemoryStore::new("bucket", 2);
        for key in ["1", "2", "3", "4"] {
            store.insert(key, b"x");
        }
        assert_eq!(list_all(&store, "").await?.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn put_stores_file_contents() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("file.txt");
        tokio::fs::write(&path, "hello").await?;
        let store = MemoryStore::new("bucket", 10);
        assert_eq!(store.put_object("k/file.txt", &path).await?, 5);
        assert_eq!(store.get("k/file.txt").map(|object| object.body), Some(b"hello".to_vec()));
        assert_eq!(store.put_count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn injected_failures() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("file.txt");
        tokio::fs::write(&path, "hello").await?;
        let store = MemoryStore::new("bucket", 1);
        store.fail_puts_for("bad");
        assert!(matches!(
            store.put_object("bad", &path).await,
            Err(Error::Put { .. })
        ));
        assert!(matches!(
            store.put_object("good", &dir.path().join("missing")).await,
            Err(Error::Read { .. })
        ));
        assert_eq!(store.put_count(), 0);
        store.insert("x", b"1");
        store.insert("y", b"2");
        store.fail_listing();
        let first = store.list_page("", None).await?;
        assert!(first.continuation.is_some());
        assert!(store.list_page("", first.continuation).await.is_err());
        Ok(())
    }
}
