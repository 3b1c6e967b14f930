//! Concurrent discovery of regular files under a directory.
//!
//! Every directory is listed by exactly one traversal. A traversal publishes the regular files
//! it finds into the work queue as it reads them, then descends into its subdirectories: each
//! one is handed to a newly spawned traversal if the shared [`throttle::Budget`] has a free
//! slot, and walked inline otherwise. A traversal returns only after every traversal it spawned
//! has returned, so when [`walk`] returns the whole tree has been published.

use async_recursion::async_recursion;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub files_found: u64,
    pub directories_visited: u64,
    pub directories_unreadable: u64,
    /// Symlinks, sockets and other entries that are not regular files or directories
    pub entries_ignored: u64,
}

impl std::ops::Add for Summary {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self {
            files_found: self.files_found + other.files_found,
            directories_visited: self.directories_visited + other.directories_visited,
            directories_unreadable: self.directories_unreadable + other.directories_unreadable,
            entries_ignored: self.entries_ignored + other.entries_ignored,
        }
    }
}

struct Walker {
    queue: async_channel::Sender<std::path::PathBuf>,
    budget: throttle::Budget,
}

/// Publishes the absolute path of every regular file under `root` into `queue`.
///
/// At most `max_width` traversals run as spawned tasks at any time. Directories that cannot
/// be listed are skipped with a warning. The queue is not closed here: the caller closes it
/// once this returns. If the queue is closed early (every consumer is gone) the walk stops.
pub async fn walk(
    root: &std::path::Path,
    queue: async_channel::Sender<std::path::PathBuf>,
    max_width: usize,
) -> Summary {
    let walker = std::sync::Arc::new(Walker {
        queue,
        budget: throttle::Budget::new(max_width),
    });
    let summary = walk_dir(walker, root.to_path_buf()).await;
    tracing::debug!(
        root = %root.display(),
        files = summary.files_found,
        directories = summary.directories_visited,
        unreadable = summary.directories_unreadable,
        "traversal joined"
    );
    summary
}

#[async_recursion]
async fn walk_dir(walker: std::sync::Arc<Walker>, dir: std::path::PathBuf) -> Summary {
    let mut summary = Summary {
        directories_visited: 1,
        ..Default::default()
    };
    let mut entries = match tokio::fs::read_dir(&dir).await {
        Ok(entries) => entries,
        Err(error) => {
            tracing::warn!(
                directory = %dir.display(),
                error = %error,
                "cannot list directory, its subtree is not uploaded"
            );
            summary.directories_unreadable = 1;
            return summary;
        }
    };
    let mut subdirs = vec![];
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(error) => {
                tracing::warn!(
                    directory = %dir.display(),
                    error = %error,
                    "failed reading directory entries, remaining entries are not uploaded"
                );
                summary.directories_unreadable += 1;
                break;
            }
        };
        let path = entry.path();
        let file_type = match entry.file_type().await {
            Ok(file_type) => file_type,
            Err(error) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %error,
                    "cannot read file type, ignoring"
                );
                summary.entries_ignored += 1;
                continue;
            }
        };
        if file_type.is_dir() {
            subdirs.push(path);
        } else if file_type.is_file() {
            if walker.queue.send(path).await.is_err() {
                tracing::debug!(
                    directory = %dir.display(),
                    "work queue closed, stopping traversal"
                );
                return summary;
            }
            summary.files_found += 1;
        } else {
            tracing::debug!(path = %path.display(), "not a regular file, ignoring");
            summary.entries_ignored += 1;
        }
    }
    // release the directory handle before descending
    drop(entries);
    let mut join_set = tokio::task::JoinSet::new();
    for subdir in subdirs {
        match walker.budget.try_claim() {
            Some(permit) => {
                let walker = walker.clone();
                join_set.spawn(async move {
                    let _permit = permit;
                    walk_dir(walker, subdir).await
                });
            }
            None => summary = summary + walk_dir(walker.clone(), subdir).await,
        }
    }
    while let Some(res) = join_set.join_next().await {
        match res {
            Ok(child_summary) => summary = summary + child_summary,
            Err(error) => {
                tracing::error!(directory = %dir.display(), "traversal task failed: {:#}", &error);
            }
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils;
    use tracing_test::traced_test;

    async fn collect(
        root: &std::path::Path,
        width: usize,
        depth: usize,
    ) -> (Summary, Vec<std::path::PathBuf>) {
        let (tx, rx) = async_channel::bounded(depth);
        let drain = tokio::spawn(async move {
            let mut paths = vec![];
            while let Ok(path) = rx.recv().await {
                paths.push(path);
            }
            paths.sort();
            paths
        });
        let summary = walk(root, tx.clone(), width).await;
        tx.close();
        (summary, drain.await.unwrap())
    }

    #[tokio::test]
    async fn finds_every_regular_file() -> anyhow::Result<()> {
        let tmp_dir = testutils::setup_test_dir().await?;
        let root = tmp_dir.join("foo");
        let (summary, paths) = collect(&root, 4, 1).await;
        let expected: Vec<_> = ["0.txt", "bar/1.txt", "bar/2.txt", "bar/3.txt", "baz/4.txt"]
            .iter()
            .map(|rel| root.join(rel))
            .collect();
        assert_eq!(paths, expected);
        assert_eq!(summary.files_found, 5);
        assert_eq!(summary.directories_visited, 3);
        // 5.txt and 6.txt are symlinks
        assert_eq!(summary.entries_ignored, 2);
        assert_eq!(summary.directories_unreadable, 0);
        Ok(())
    }

    #[tokio::test]
    async fn zero_width_walks_inline() -> anyhow::Result<()> {
        let tmp_dir = testutils::setup_test_dir().await?;
        let root = tmp_dir.join("foo");
        let (inline_summary, inline_paths) = collect(&root, 0, 1).await;
        let (spawned_summary, spawned_paths) = collect(&root, 64, 1000).await;
        assert_eq!(inline_paths, spawned_paths);
        assert_eq!(inline_summary, spawned_summary);
        Ok(())
    }

    #[tokio::test]
    async fn deep_tree_with_narrow_budget() -> anyhow::Result<()> {
        let tmp_dir = testutils::create_temp_dir().await?;
        let mut dir = tmp_dir.clone();
        for level in 0..40 {
            dir = dir.join(format!("d{level}"));
            tokio::fs::create_dir(&dir).await?;
            for sibling in 0..3 {
                let side = dir.join(format!("s{sibling}"));
                tokio::fs::create_dir(&side).await?;
                tokio::fs::write(side.join("f"), "x").await?;
            }
            tokio::fs::write(dir.join("f"), "x").await?;
        }
        let (summary, paths) = collect(&tmp_dir, 2, 1).await;
        assert_eq!(summary.files_found, 160);
        assert_eq!(paths.len(), 160);
        assert_eq!(summary.directories_visited, 1 + 40 * 4);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn unreadable_root_is_reported() {
        let missing = std::env::temp_dir().join("rput_test_definitely_missing_dir");
        let (summary, paths) = collect(&missing, 4, 1).await;
        assert!(paths.is_empty());
        assert_eq!(summary.directories_unreadable, 1);
        assert!(logs_contain("cannot list directory"));
    }

    #[tokio::test]
    async fn stops_when_queue_is_closed() -> anyhow::Result<()> {
        let tmp_dir = testutils::setup_test_dir().await?;
        let (tx, rx) = async_channel::bounded(1);
        drop(rx);
        let summary = walk(&tmp_dir.join("foo"), tx, 4).await;
        assert_eq!(summary.files_found, 0);
        Ok(())
    }
}
