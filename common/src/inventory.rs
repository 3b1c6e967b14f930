//! Snapshot of the keys that already exist under the destination prefix.
//!
//! The only way to obtain an [`Inventory`] is [`Inventory::build`], which returns after every
//! listing page has been fetched and every page-insert task has joined. Copy decisions are made
//! against the returned value, so none of them can observe a partially populated inventory.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Opaque content tag reported by the store for an object.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Fingerprint(pub String);

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Listing(#[from] remote::Error),
    #[error("inventory page task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, Default)]
pub struct Inventory {
    entries: RwLock<HashMap<String, Fingerprint>>,
}

impl Inventory {
    /// Lists every object under `prefix` and records its fingerprint.
    ///
    /// Pages are fetched one after another (each continuation depends on the previous page)
    /// while inserting a page's entries runs in a spawned task, with at most `max_width` such
    /// tasks outstanding. Any listing failure aborts the build; the tasks still in flight are
    /// cancelled and nothing of the partial listing is returned.
    pub async fn build(
        store: &std::sync::Arc<dyn remote::ObjectStore>,
        prefix: &str,
        max_width: usize,
    ) -> Result<std::sync::Arc<Self>, Error> {
        let max_width = max_width.max(1);
        let inventory = std::sync::Arc::new(Self::default());
        let mut join_set = tokio::task::JoinSet::new();
        let mut continuation = None;
        let mut pages = 0u64;
        loop {
            let remote::ListPage {
                objects,
                continuation: next,
            } = store.list_page(prefix, continuation.take()).await?;
            pages += 1;
            if join_set.len() >= max_width {
                join_set.join_next().await.transpose()?;
            }
            let page_inventory = inventory.clone();
            join_set.spawn(async move { page_inventory.insert_page(objects) });
            match next {
                Some(token) => continuation = Some(token),
                None => break,
            }
        }
        while let Some(res) = join_set.join_next().await {
            res?;
        }
        tracing::info!(
            bucket = store.bucket(),
            prefix,
            entries = inventory.len(),
            pages,
            "cached remote objects"
        );
        Ok(inventory)
    }

    fn insert_page(&self, objects: Vec<remote::ObjectSummary>) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        for object in objects {
            entries.insert(object.key, Fingerprint(object.fingerprint));
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<Fingerprint> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remote::memory::MemoryStore;
    use tracing_test::traced_test;

    fn seeded_store(count: usize, page_size: usize) -> std::sync::Arc<MemoryStore> {
        let store = std::sync::Arc::new(MemoryStore::new("bucket", page_size));
        for idx in 0..count {
            store.insert(&format!("backup/{idx:04}"), b"x");
        }
        store.insert("other/0000", b"x");
        store
    }

    #[tokio::test]
    #[traced_test]
    async fn build_collects_every_page() -> Result<(), Error> {
        let store = seeded_store(95, 10);
        let dyn_store: std::sync::Arc<dyn remote::ObjectStore> = store.clone();
        let inventory = Inventory::build(&dyn_store, "backup/", 3).await?;
        assert_eq!(inventory.len(), 95);
        assert_eq!(store.pages_listed(), 10);
        assert!(inventory.contains("backup/0000"));
        assert!(inventory.contains("backup/0094"));
        assert!(!inventory.contains("backup/0095"));
        assert!(!inventory.contains("other/0000"));
        assert!(logs_contain("cached remote objects"));
        Ok(())
    }

    #[tokio::test]
    async fn fingerprints_are_kept() -> Result<(), Error> {
        let store = std::sync::Arc::new(MemoryStore::new("bucket", 1));
        store.insert("a", b"1");
        store.insert("b", b"2");
        let dyn_store: std::sync::Arc<dyn remote::ObjectStore> = store.clone();
        let inventory = Inventory::build(&dyn_store, "", 1).await?;
        let a = store.get("a").map(|object| Fingerprint(object.fingerprint));
        assert_eq!(inventory.get("a"), a);
        assert_ne!(inventory.get("a"), inventory.get("b"));
        assert_eq!(inventory.get("c"), None);
        Ok(())
    }

    #[tokio::test]
    async fn empty_namespace() -> Result<(), Error> {
        let dyn_store: std::sync::Arc<dyn remote::ObjectStore> =
            std::sync::Arc::new(MemoryStore::new("bucket", 10));
        let inventory = Inventory::build(&dyn_store, "prefix/", 4).await?;
        assert!(inventory.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn listing_failure_aborts_build() {
        let store = seeded_store(30, 5);
        store.fail_listing();
        let dyn_store: std::sync::Arc<dyn remote::ObjectStore> = store;
        let result = Inventory::build(&dyn_store, "backup/", 2).await;
        assert!(matches!(result, Err(Error::Listing(remote::Error::List { .. }))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_readers_see_complete_entries() -> Result<(), Error> {
        let store = seeded_store(500, 7);
        let dyn_store: std::sync::Arc<dyn remote::ObjectStore> = store.clone();
        let inventory = Inventory::build(&dyn_store, "backup/", 8).await?;
        let mut join_set = tokio::task::JoinSet::new();
        for reader in 0..16 {
            let inventory = inventory.clone();
            let store = store.clone();
            join_set.spawn(async move {
                for idx in (reader..500).step_by(3) {
                    let key = format!("backup/{idx:04}");
                    assert!(inventory.contains(&key));
                    let expected = store.get(&key).map(|object| Fingerprint(object.fingerprint));
                    assert_eq!(inventory.get(&key), expected);
                }
            });
        }
        while let Some(res) = join_set.join_next().await {
            res?;
        }
        Ok(())
    }
}
