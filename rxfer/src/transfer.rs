use anyhow::{Context, anyhow};
use async_recursion::async_recursion;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::instrument;

use remote::RemoteFs;

use crate::summary::{Completion, Summary};

/// Priority of leaf downloads in the work queue.
pub const DOWNLOAD_PRIORITY: i32 = 2;

/// Counters and first error of one top-level invocation, shared with the tasks it queues.
#[derive(Debug, Default)]
struct Tracker {
    directories_entered: AtomicUsize,
    files_queued: AtomicUsize,
    files_transferred: AtomicUsize,
    files_failed: AtomicUsize,
    bytes_transferred: AtomicU64,
    first_error: std::sync::OnceLock<String>,
}

impl Tracker {
    fn directory_entered(&self) {
        self.directories_entered.fetch_add(1, Ordering::Relaxed);
    }

    fn file_queued(&self) {
        self.files_queued.fetch_add(1, Ordering::Relaxed);
    }

    fn file_transferred(&self, bytes: u64) {
        self.files_transferred.fetch_add(1, Ordering::Relaxed);
        self.bytes_transferred.fetch_add(bytes, Ordering::Relaxed);
    }

    fn file_failed(&self, error: &anyhow::Error) {
        self.files_failed.fetch_add(1, Ordering::Relaxed);
        self.record_error(error);
    }

    fn record_error(&self, error: &anyhow::Error) {
        // only the first one sticks
        let _ = self.first_error.set(format!("{error:#}"));
    }

    fn summary(&self) -> Summary {
        Summary {
            directories_entered: self.directories_entered.load(Ordering::Relaxed),
            files_queued: self.files_queued.load(Ordering::Relaxed),
            files_transferred: self.files_transferred.load(Ordering::Relaxed),
            files_failed: self.files_failed.load(Ordering::Relaxed),
            bytes_transferred: self.bytes_transferred.load(Ordering::Relaxed),
        }
    }

    fn completion(&self) -> Completion {
        let summary = self.summary();
        match self.first_error.get() {
            None => Completion::Completed(summary),
            Some(reason) => Completion::Failed {
                summary,
                reason: reason.clone(),
            },
        }
    }
}

/// Remote names that would escape or alias the directory they were listed in are rejected.
fn check_entry_name(remote_dir: &str, name: &str) -> anyhow::Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(anyhow!(
            "refusing unsafe entry name {name:?} listed in remote directory {remote_dir}"
        ));
    }
    Ok(())
}

/// Local directory entries sorted by name, as `(name, is_directory)`.
///
/// Symlinks are followed, so a link to a directory is listed as a directory.
async fn list_local(dir: &std::path::Path) -> anyhow::Result<Vec<(String, bool)>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("cannot open directory {dir:?} for reading"))?;
    let mut listing = vec![];
    while let Some(entry) = entries
        .next_entry()
        .await
        .with_context(|| format!("failed traversing directory {dir:?}"))?
    {
        let name = entry
            .file_name()
            .into_string()
            .map_err(|name| anyhow!("file name {name:?} in {dir:?} is not valid UTF-8"))?;
        let metadata = tokio::fs::metadata(entry.path())
            .await
            .with_context(|| format!("failed reading metadata of {:?}", entry.path()))?;
        listing.push((name, metadata.is_dir()));
    }
    listing.sort();
    Ok(listing)
}

/// Synchronizes directory trees between the local filesystem and two remote sessions.
///
/// Downloads read from `source` and run as queued tasks; uploads write to `target` one file at a
/// time. Both directions finish by waiting for the shared queue to drain.
pub struct FileTransfer<S, T> {
    source: Arc<S>,
    target: Arc<T>,
    queue: throttle::WorkQueue,
}

impl<S, T> std::fmt::Debug for FileTransfer<S, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("FileTransfer")
            .field("queue", &self.queue)
            .finish()
    }
}

impl<S: RemoteFs, T: RemoteFs> FileTransfer<S, T> {
    pub fn new(source: Arc<S>, target: Arc<T>, queue: throttle::WorkQueue) -> Self {
        Self {
            source,
            target,
            queue,
        }
    }

    pub fn queue(&self) -> &throttle::WorkQueue {
        &self.queue
    }

    /// Mirror `remote_dir` on the source endpoint into `local_dir`.
    ///
    /// Directories are walked one at a time, depth first; every file found becomes a queued
    /// download. Returns once the queue is idle.
    #[instrument(skip(self))]
    pub async fn download_directory(
        &self,
        remote_dir: &str,
        local_dir: &std::path::Path,
    ) -> Completion {
        let tracker = Arc::new(Tracker::default());
        self.download_tree(remote_dir, local_dir, &tracker).await;
        self.queue.await_idle().await;
        let completion = tracker.completion();
        tracing::info!("Download of {} finished:\n{}", remote_dir, completion.summary());
        completion
    }

    #[async_recursion]
    async fn download_tree(
        &self,
        remote_dir: &str,
        local_dir: &std::path::Path,
        tracker: &Arc<Tracker>,
    ) {
        if let Err(error) = tokio::fs::create_dir_all(local_dir)
            .await
            .with_context(|| format!("cannot create local directory {local_dir:?}"))
        {
            tracing::error!("{:#}", error);
            tracker.record_error(&error);
            return;
        }
        let entries = match self
            .source
            .list(remote_dir)
            .await
            .with_context(|| format!("failed to list remote directory {remote_dir}"))
        {
            Ok(entries) => entries,
            Err(error) => {
                tracing::error!("{:#}", error);
                tracker.record_error(&error);
                return;
            }
        };
        tracing::debug!("{} has {} entries", remote_dir, entries.len());
        for entry in entries {
            if let Err(error) = check_entry_name(remote_dir, &entry.name) {
                tracing::error!("{:#}", error);
                tracker.record_error(&error);
                continue;
            }
            let remote_path = remote::sftp::join(remote_dir, &entry.name);
            let local_path = local_dir.join(&entry.name);
            if entry.is_directory() {
                tracker.directory_entered();
                self.download_tree(&remote_path, &local_path, tracker).await;
            } else {
                self.queue_download(remote_path, local_path, tracker);
            }
        }
    }

    fn queue_download(
        &self,
        remote_path: String,
        local_path: std::path::PathBuf,
        tracker: &Arc<Tracker>,
    ) {
        tracker.file_queued();
        let source = self.source.clone();
        let tracker = tracker.clone();
        let label = format!("download {remote_path}");
        self.queue.submit(label, DOWNLOAD_PRIORITY, async move {
            match source
                .get(&remote_path, &local_path)
                .await
                .with_context(|| format!("failed downloading {remote_path} to {local_path:?}"))
            {
                Ok(bytes) => {
                    tracker.file_transferred(bytes);
                    Ok(())
                }
                Err(error) => {
                    tracker.file_failed(&error);
                    Err(error)
                }
            }
        });
    }

    /// Mirror `local_dir` into `remote_dir` on the target endpoint.
    ///
    /// Every upload is awaited before the next one starts; a failed file is logged and skipped.
    /// Returns once the shared queue is idle as well.
    #[instrument(skip(self))]
    pub async fn upload_directory(
        &self,
        local_dir: &std::path::Path,
        remote_dir: &str,
    ) -> Completion {
        let tracker = Tracker::default();
        self.upload_tree(local_dir, remote_dir, &tracker).await;
        self.queue.await_idle().await;
        let completion = tracker.completion();
        tracing::info!("Upload of {:?} finished:\n{}", local_dir, completion.summary());
        completion
    }

    #[async_recursion]
    async fn upload_tree(&self, local_dir: &std::path::Path, remote_dir: &str, tracker: &Tracker) {
        if let Err(error) = self.ensure_remote_dir(remote_dir).await {
            tracing::error!("{:#}", error);
            tracker.record_error(&error);
            return;
        }
        let entries = match list_local(local_dir).await {
            Ok(entries) => entries,
            Err(error) => {
                tracing::error!("{:#}", error);
                tracker.record_error(&error);
                return;
            }
        };
        for (name, is_directory) in entries {
            let local_path = local_dir.join(&name);
            let remote_path = remote::sftp::join(remote_dir, &name);
            if is_directory {
                tracker.directory_entered();
                self.upload_tree(&local_path, &remote_path, tracker).await;
            } else {
                self.upload_one(&local_path, &remote_path, tracker).await;
            }
        }
    }

    async fn upload_one(&self, local_path: &std::path::Path, remote_path: &str, tracker: &Tracker) {
        tracker.file_queued();
        match self
            .target
            .put(local_path, remote_path)
            .await
            .with_context(|| format!("failed uploading {local_path:?} to {remote_path}"))
        {
            Ok(bytes) => {
                tracing::debug!("uploaded {:?} ({})", local_path, bytesize::ByteSize(bytes));
                tracker.file_transferred(bytes);
            }
            Err(error) => {
                tracing::error!("{:#}", error);
                tracker.file_failed(&error);
            }
        }
    }

    /// Make sure `remote_dir` exists on the target, creating it and its ancestors if needed.
    async fn ensure_remote_dir(&self, remote_dir: &str) -> anyhow::Result<()> {
        if self
            .target
            .exists(remote_dir)
            .await
            .with_context(|| format!("failed checking remote path {remote_dir}"))?
        {
            let stat = self
                .target
                .stat(remote_dir)
                .await
                .with_context(|| format!("failed to stat remote path {remote_dir}"))?;
            if !stat.is_directory {
                return Err(anyhow!(
                    "remote path {remote_dir} exists and is not a directory"
                ));
            }
            return Ok(());
        }
        self.target
            .mkdir(remote_dir, true)
            .await
            .with_context(|| format!("cannot create remote directory {remote_dir}"))
    }

    /// Upload a single file to the target endpoint.
    #[instrument(skip(self))]
    pub async fn upload_file(&self, local: &std::path::Path, remote: &str) -> Completion {
        let tracker = Tracker::default();
        self.upload_one(local, remote, &tracker).await;
        let completion = tracker.completion();
        if completion.is_completed() {
            tracing::info!("Uploaded {:?} to {}", local, remote);
        }
        completion
    }
}
