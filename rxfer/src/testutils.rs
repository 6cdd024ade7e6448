use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use remote::{RemoteEntry, RemoteFs, RemoteStat};

fn parent(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

fn io_error(kind: std::io::ErrorKind, message: String) -> remote::Error {
    remote::Error::Io(std::io::Error::new(kind, message))
}

#[derive(Default)]
struct MemoryState {
    dirs: BTreeSet<String>,
    files: BTreeMap<String, Vec<u8>>,
    list_calls: Vec<String>,
    mkdir_calls: Vec<String>,
    puts: Vec<String>,
}

/// In-memory remote filesystem with absolute `/`-separated paths.
///
/// Records listings, directory creation and uploads, and tracks how many get/put operations
/// overlap.
#[derive(Default)]
pub struct MemoryFs {
    state: std::sync::Mutex<MemoryState>,
    failing_lists: HashSet<String>,
    failing_transfers: HashSet<String>,
    raw_entries: BTreeMap<String, Vec<RemoteEntry>>,
    reversed: bool,
    transfer_delay_ms: u64,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl MemoryFs {
    pub fn new() -> Self {
        let fs = Self::default();
        fs.state().dirs.insert("/".to_string());
        fs
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap()
    }

    fn add_dir_all(state: &mut MemoryState, path: &str) {
        let mut current = Some(path);
        while let Some(dir) = current {
            state.dirs.insert(dir.to_string());
            current = parent(dir);
        }
    }

    pub fn with_dir(self, path: &str) -> Self {
        Self::add_dir_all(&mut self.state(), path);
        self
    }

    pub fn with_file(self, path: &str, contents: impl Into<Vec<u8>>) -> Self {
        {
            let mut state = self.state();
            if let Some(dir) = parent(path) {
                Self::add_dir_all(&mut state, dir);
            }
            state.files.insert(path.to_string(), contents.into());
        }
        self
    }

    pub fn failing_list(mut self, path: &str) -> Self {
        self.failing_lists.insert(path.to_string());
        self
    }

    /// Make both `get` and `put` of `path` fail.
    pub fn failing_transfer(mut self, path: &str) -> Self {
        self.failing_transfers.insert(path.to_string());
        self
    }

    /// Add `entry` verbatim to every listing of `dir`, whatever its name.
    pub fn with_raw_entry(mut self, dir: &str, entry: RemoteEntry) -> Self {
        self.raw_entries
            .entry(dir.to_string())
            .or_default()
            .push(entry);
        self
    }

    pub fn reversed_listing(mut self) -> Self {
        self.reversed = true;
        self
    }

    /// Every get/put sleeps for a random duration of up to `max_ms` milliseconds.
    pub fn with_transfer_delay(mut self, max_ms: u64) -> Self {
        self.transfer_delay_ms = max_ms;
        self
    }

    pub fn list_calls(&self) -> Vec<String> {
        self.state().list_calls.clone()
    }

    pub fn mkdir_calls(&self) -> Vec<String> {
        self.state().mkdir_calls.clone()
    }

    pub fn puts(&self) -> Vec<String> {
        self.state().puts.clone()
    }

    pub fn read(&self, path: &str) -> Option<String> {
        self.state()
            .files
            .get(path)
            .map(|contents| String::from_utf8_lossy(contents).into_owned())
    }

    pub fn is_dir(&self, path: &str) -> bool {
        self.state().dirs.contains(path)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    async fn transfer_started(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        if self.transfer_delay_ms > 0 {
            let delay = {
                use rand::Rng;
                rand::thread_rng().gen_range(1..=self.transfer_delay_ms)
            };
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
        }
    }

    fn transfer_finished(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    fn check_transfer(&self, path: &str) -> remote::Result<()> {
        if self.failing_transfers.contains(path) {
            return Err(io_error(
                std::io::ErrorKind::PermissionDenied,
                format!("transfer of {path} refused"),
            ));
        }
        Ok(())
    }
}

impl RemoteFs for MemoryFs {
    async fn list(&self, dir: &str) -> remote::Result<Vec<RemoteEntry>> {
        let mut state = self.state();
        state.list_calls.push(dir.to_string());
        if self.failing_lists.contains(dir) {
            return Err(io_error(
                std::io::ErrorKind::PermissionDenied,
                format!("cannot read {dir}"),
            ));
        }
        if !state.dirs.contains(dir) {
            return Err(io_error(
                std::io::ErrorKind::NotFound,
                format!("no such directory {dir}"),
            ));
        }
        let mut entries: Vec<RemoteEntry> = state
            .dirs
            .iter()
            .filter(|path| parent(path) == Some(dir))
            .map(|path| RemoteEntry::directory(basename(path)))
            .chain(
                state
                    .files
                    .keys()
                    .filter(|path| parent(path) == Some(dir))
                    .map(|path| RemoteEntry::file(basename(path))),
            )
            .chain(self.raw_entries.get(dir).into_iter().flatten().cloned())
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        if self.reversed {
            entries.reverse();
        }
        Ok(entries)
    }

    async fn get(&self, remote: &str, local: &std::path::Path) -> remote::Result<u64> {
        self.transfer_started().await;
        let contents = self.check_transfer(remote).and_then(|()| {
            self.state().files.get(remote).cloned().ok_or_else(|| {
                io_error(std::io::ErrorKind::NotFound, format!("no such file {remote}"))
            })
        });
        let res = match contents {
            Ok(contents) => tokio::fs::write(local, &contents)
                .await
                .map(|()| contents.len() as u64)
                .map_err(remote::Error::Io),
            Err(error) => Err(error),
        };
        self.transfer_finished();
        res
    }

    async fn put(&self, local: &std::path::Path, remote: &str) -> remote::Result<u64> {
        self.transfer_started().await;
        self.state().puts.push(remote.to_string());
        let res = match self.check_transfer(remote) {
            Ok(()) => tokio::fs::read(local)
                .await
                .map_err(remote::Error::Io)
                .and_then(|contents| {
                    let mut state = self.state();
                    match parent(remote) {
                        Some(dir) if state.dirs.contains(dir) => {
                            let len = contents.len() as u64;
                            state.files.insert(remote.to_string(), contents);
                            Ok(len)
                        }
                        _ => Err(io_error(
                            std::io::ErrorKind::NotFound,
                            format!("parent of {remote} does not exist"),
                        )),
                    }
                }),
            Err(error) => Err(error),
        };
        self.transfer_finished();
        res
    }

    async fn exists(&self, path: &str) -> remote::Result<bool> {
        let state = self.state();
        Ok(state.dirs.contains(path) || state.files.contains_key(path))
    }

    async fn mkdir(&self, path: &str, recursive: bool) -> remote::Result<()> {
        let mut state = self.state();
        state.mkdir_calls.push(path.to_string());
        if recursive {
            Self::add_dir_all(&mut state, path);
            return Ok(());
        }
        if state.dirs.contains(path) || state.files.contains_key(path) {
            return Err(io_error(
                std::io::ErrorKind::AlreadyExists,
                format!("{path} already exists"),
            ));
        }
        match parent(path) {
            Some(dir) if state.dirs.contains(dir) => {
                state.dirs.insert(path.to_string());
                Ok(())
            }
            _ => Err(io_error(
                std::io::ErrorKind::NotFound,
                format!("parent of {path} does not exist"),
            )),
        }
    }

    async fn stat(&self, path: &str) -> remote::Result<RemoteStat> {
        let state = self.state();
        if state.dirs.contains(path) {
            Ok(RemoteStat { is_directory: true })
        } else if state.files.contains_key(path) {
            Ok(RemoteStat {
                is_directory: false,
            })
        } else {
            Err(io_error(
                std::io::ErrorKind::NotFound,
                format!("no such path {path}"),
            ))
        }
    }
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Creates a local tree in a fresh temporary directory:
///
/// ```text
/// foo
/// |- 0.txt
/// |- bar
///    |- 1.txt
///    |- 2.txt
///    |- 3.txt
/// |- baz
///    |- 4.txt
/// ```
pub async fn setup_local_tree() -> anyhow::Result<tempfile::TempDir> {
    let tmp_dir = tempfile::tempdir()?;
    let foo_path = tmp_dir.path().join("foo");
    tokio::fs::create_dir(&foo_path).await?;
    tokio::fs::write(foo_path.join("0.txt"), "0").await?;
    let bar_path = foo_path.join("bar");
    tokio::fs::create_dir(&bar_path).await?;
    tokio::fs::write(bar_path.join("1.txt"), "1").await?;
    tokio::fs::write(bar_path.join("2.txt"), "2").await?;
    tokio::fs::write(bar_path.join("3.txt"), "3").await?;
    let baz_path = foo_path.join("baz");
    tokio::fs::create_dir(&baz_path).await?;
    tokio::fs::write(baz_path.join("4.txt"), "4").await?;
    Ok(tmp_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_of_paths() {
        assert_eq!(parent("/"), None);
        assert_eq!(parent("/a"), Some("/"));
        assert_eq!(parent("/a/b"), Some("/a"));
    }
}
