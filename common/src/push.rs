//! Uploads every local file whose destination key is not already present in the bucket.
//!
//! # Stages
//!
//! ```text
//! Idle -> InventoryBuild -> ConcurrentDiscoveryAndCopy -> Drain -> Done
//! ```
//!
//! 1. **InventoryBuild** - the remote [`Inventory`] is listed to completion. A failure here ends
//!    the run before anything is written.
//! 2. **ConcurrentDiscoveryAndCopy** - the tree walker publishes paths into a bounded queue,
//!    `concurrency` workers pull from it, decide skip or copy against the inventory, report the
//!    decision to the progress aggregator and, unless dry-running, upload.
//! 3. **Drain** - the walker has joined and the queue is closed; workers finish what is left.
//! 4. **Done** - every worker has returned, the status channel closes and the aggregator stops.
//!
//! A worker whose upload fails logs the error and stops; the other workers, the walker and the
//! aggregator carry on, and the run still finishes. Failures are counted in the [`Summary`].

use crate::inventory::{self, Inventory};
use crate::progress;
use crate::walk;

/// Capacity of the queue between the walker and the workers.
pub const WORK_QUEUE_DEPTH: usize = 1000;
/// Capacity of the channel between the workers and the progress aggregator.
pub const STATUS_QUEUE_DEPTH: usize = 100;

#[derive(Copy, Clone, Debug, PartialEq, Eq, enum_map::Enum)]
pub enum Decision {
    Skip,
    Copy,
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Decision::Skip => write!(f, "skip"),
            Decision::Copy => write!(f, "copy"),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Stage {
    InventoryBuild,
    ConcurrentDiscoveryAndCopy,
    Drain,
    Done,
}

#[derive(Debug, Clone)]
pub struct Settings {
    /// Absolute path of the directory to mirror
    pub root: std::path::PathBuf,
    /// Prepended to every relative path to form the destination key
    pub prefix: String,
    /// Number of copy workers
    pub concurrency: usize,
    /// Decide and report, but never write to the store
    pub dry_run: bool,
    /// Don't draw the status line or print notes on stderr
    pub suppress_progress: bool,
    /// Maximum number of concurrently spawned directory traversals
    pub walk_width: usize,
    /// Maximum number of concurrently running listing page-insert tasks
    pub list_width: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("{path:?} is not under the root directory {root:?}")]
    OutsideRoot {
        root: std::path::PathBuf,
        path: std::path::PathBuf,
    },
    #[error("{path:?} is not valid UTF-8 and cannot form a key")]
    NotUtf8 { path: std::path::PathBuf },
}

/// Destination key for `path`: `prefix` followed by the path relative to `root`, with `/`
/// between components.
pub fn remote_key(
    root: &std::path::Path,
    prefix: &str,
    path: &std::path::Path,
) -> Result<String, KeyError> {
    let relative = path
        .strip_prefix(root)
        .map_err(|_| KeyError::OutsideRoot {
            root: root.to_path_buf(),
            path: path.to_path_buf(),
        })?;
    let mut key = String::from(prefix);
    for (idx, component) in relative.components().enumerate() {
        let part = component
            .as_os_str()
            .to_str()
            .ok_or_else(|| KeyError::NotUtf8 {
                path: path.to_path_buf(),
            })?;
        if idx > 0 {
            key.push('/');
        }
        key.push_str(part);
    }
    Ok(key)
}

#[derive(Copy, Clone, Debug, Default)]
pub struct Summary {
    /// Decisions as counted by the progress aggregator; copies include failed uploads
    pub tally: progress::Tally,
    pub files_uploaded: u64,
    pub bytes_uploaded: u64,
    pub keys_invalid: u64,
    pub workers_failed: u64,
    pub walk: walk::Summary,
    pub remote_objects: usize,
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{}\n\
            remote objects cached: {}\n\
            files found: {}\n\
            files skipped: {}\n\
            files to copy: {}\n\
            files uploaded: {}\n\
            bytes uploaded: {}\n\
            invalid keys: {}\n\
            failed workers: {}\n\
            unreadable directories: {}",
            self.tally,
            self.remote_objects,
            self.walk.files_found,
            self.tally.skipped(),
            self.tally.copied(),
            self.files_uploaded,
            bytesize::ByteSize(self.bytes_uploaded),
            self.keys_invalid,
            self.workers_failed,
            self.walk.directories_unreadable,
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed building the inventory of remote objects: {0:#}")]
    Inventory(#[from] inventory::Error),
    #[error("failed setting up the status line: {0}")]
    StatusLine(#[from] indicatif::style::TemplateError),
    #[error("task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Copy, Clone, Debug, Default)]
struct WorkerSummary {
    files_uploaded: u64,
    bytes_uploaded: u64,
    keys_invalid: u64,
}

impl std::ops::Add for WorkerSummary {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self {
            files_uploaded: self.files_uploaded + other.files_uploaded,
            bytes_uploaded: self.bytes_uploaded + other.bytes_uploaded,
            keys_invalid: self.keys_invalid + other.keys_invalid,
        }
    }
}

/// Upload failure that stopped a worker, with what the worker got done before it.
#[derive(Debug, thiserror::Error)]
#[error("{source:#}")]
struct WorkerError {
    #[source]
    source: remote::Error,
    summary: WorkerSummary,
}

struct Worker {
    id: usize,
    settings: std::sync::Arc<Settings>,
    store: std::sync::Arc<dyn remote::ObjectStore>,
    inventory: std::sync::Arc<Inventory>,
    queue: async_channel::Receiver<std::path::PathBuf>,
    status: tokio::sync::mpsc::Sender<Decision>,
}

impl Worker {
    async fn run(self) -> Result<WorkerSummary, WorkerError> {
        let mut summary = WorkerSummary::default();
        while let Ok(path) = self.queue.recv().await {
            let key = match remote_key(&self.settings.root, &self.settings.prefix, &path) {
                Ok(key) => key,
                Err(error) => {
                    tracing::error!(worker = self.id, "{:#}", &error);
                    summary.keys_invalid += 1;
                    continue;
                }
            };
            let decision = if self.inventory.contains(&key) {
                Decision::Skip
            } else {
                Decision::Copy
            };
            if self.status.send(decision).await.is_err() {
                tracing::debug!(worker = self.id, "status channel closed");
            }
            tracing::info!(
                operation = %decision,
                source = %path.display(),
                key = %key,
                "decision"
            );
            match decision {
                Decision::Skip => {
                    if let Some(fingerprint) = self.inventory.get(&key) {
                        tracing::debug!(key = %key, fingerprint = %fingerprint, "already present");
                    }
                }
                Decision::Copy if self.settings.dry_run => {}
                Decision::Copy => {
                    throttle::get_ops_token().await;
                    let _open_file_guard = throttle::open_file_permit().await;
                    match self.store.put_object(&key, &path).await {
                        Ok(bytes) => {
                            summary.files_uploaded += 1;
                            summary.bytes_uploaded += bytes;
                        }
                        Err(error) => {
                            tracing::error!(
                                worker = self.id,
                                source = %path.display(),
                                key = %key,
                                "upload failed, worker is stopping: {:#}",
                                &error
                            );
                            return Err(WorkerError {
                                source: error,
                                summary,
                            });
                        }
                    }
                }
            }
        }
        tracing::debug!(worker = self.id, "work queue drained");
        Ok(summary)
    }
}

fn enter(stage: Stage) {
    tracing::debug!(stage = ?stage, "entering stage");
}

/// Mirrors `settings.root` into `store` under `settings.prefix`.
///
/// Returns an error only if the inventory cannot be built (nothing has been written at that
/// point) or if a pipeline task panics. Upload failures are reported in the returned summary.
pub async fn push(
    store: std::sync::Arc<dyn remote::ObjectStore>,
    settings: Settings,
) -> Result<Summary, Error> {
    let settings = std::sync::Arc::new(settings);
    let status_line = progress::StatusLine::new(settings.suppress_progress)?;
    enter(Stage::InventoryBuild);
    let inventory = Inventory::build(&store, &settings.prefix, settings.list_width).await?;
    status_line.note(&format!(
        "Remote objects cached: bucket=`{}`, prefix=`{}`, size=`{}`",
        store.bucket(),
        settings.prefix,
        inventory.len()
    ));
    enter(Stage::ConcurrentDiscoveryAndCopy);
    let (work_tx, work_rx) = async_channel::bounded(WORK_QUEUE_DEPTH);
    let (status_tx, status_rx) = tokio::sync::mpsc::channel(STATUS_QUEUE_DEPTH);
    let aggregator = tokio::spawn(progress::aggregate(status_rx, status_line));
    let mut workers = tokio::task::JoinSet::new();
    for id in 0..settings.concurrency.max(1) {
        let worker = Worker {
            id,
            settings: settings.clone(),
            store: store.clone(),
            inventory: inventory.clone(),
            queue: work_rx.clone(),
            status: status_tx.clone(),
        };
        workers.spawn(worker.run());
    }
    // only the workers may keep these ends alive, otherwise the walker could block on a queue
    // nobody reads and the aggregator would never see the status channel close
    drop(work_rx);
    drop(status_tx);
    let walk_summary = walk::walk(&settings.root, work_tx.clone(), settings.walk_width).await;
    work_tx.close();
    enter(Stage::Drain);
    let mut worker_summary = WorkerSummary::default();
    let mut workers_failed = 0;
    while let Some(res) = workers.join_next().await {
        match res? {
            Ok(summary) => worker_summary = worker_summary + summary,
            Err(error) => {
                worker_summary = worker_summary + error.summary;
                workers_failed += 1;
            }
        }
    }
    let tally = aggregator.await?;
    enter(Stage::Done);
    let summary = Summary {
        tally,
        files_uploaded: worker_summary.files_uploaded,
        bytes_uploaded: worker_summary.bytes_uploaded,
        keys_invalid: worker_summary.keys_invalid,
        workers_failed,
        walk: walk_summary,
        remote_objects: inventory.len(),
    };
    tracing::info!(
        skipped = tally.skipped(),
        copied = tally.copied(),
        uploaded = summary.files_uploaded,
        failed_workers = workers_failed,
        dry_run = settings.dry_run,
        "finished"
    );
    Ok(summary)
}
