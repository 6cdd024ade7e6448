//! Remote filesystem operations over an SFTP subsystem

use std::future::Future;

use crate::credential::{Credential, HostKeyPolicy};
use crate::error::{Error, Result};
use crate::handler::{SshHandle, connect};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// One child of a listed directory. `name` is a bare file name, never a path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub kind: EntryKind,
}

impl RemoteEntry {
    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::File,
        }
    }

    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::Directory,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RemoteStat {
    pub is_directory: bool,
}

/// Filesystem operations available on one remote endpoint.
///
/// Implementations must be shareable across tasks; the directory synchronizer clones an `Arc`
/// of the session into every transfer it queues.
pub trait RemoteFs: Send + Sync + 'static {
    /// Entries of `dir` in the order the server reports them, without `.` and `..`.
    fn list(&self, dir: &str) -> impl Future<Output = Result<Vec<RemoteEntry>>> + Send;

    /// Copy `remote` into `local`, returning the number of bytes written.
    fn get(
        &self,
        remote: &str,
        local: &std::path::Path,
    ) -> impl Future<Output = Result<u64>> + Send;

    /// Copy `local` into `remote`, returning the number of bytes written.
    fn put(
        &self,
        local: &std::path::Path,
        remote: &str,
    ) -> impl Future<Output = Result<u64>> + Send;

    fn exists(&self, path: &str) -> impl Future<Output = Result<bool>> + Send;

    /// Create `path`. With `recursive` every missing ancestor is created and existing components
    /// are left alone.
    fn mkdir(&self, path: &str, recursive: bool) -> impl Future<Output = Result<()>> + Send;

    fn stat(&self, path: &str) -> impl Future<Output = Result<RemoteStat>> + Send;
}

/// Join a remote directory and a child name using `/` separators.
pub fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else if dir.ends_with('/') {
        format!("{dir}{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// Prefixes of `path` from the outermost ancestor down to `path` itself.
fn ancestors(path: &str) -> Vec<String> {
    let absolute = path.starts_with('/');
    let mut current = if absolute {
        String::from("/")
    } else {
        String::new()
    };
    let mut result = Vec::new();
    for component in path.split('/').filter(|c| !c.is_empty() && *c != ".") {
        current = join(&current, component);
        result.push(current.clone());
    }
    result
}

/// An authenticated SFTP session to a single endpoint.
pub struct SftpSession {
    endpoint: String,
    sftp: russh_sftp::client::SftpSession,
    // keeps the underlying connection open for as long as the session lives
    _handle: SshHandle,
}

impl std::fmt::Debug for SftpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("SftpSession")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl SftpSession {
    #[tracing::instrument(skip(credential), fields(endpoint = %credential.endpoint()))]
    pub async fn connect(credential: &Credential, policy: HostKeyPolicy) -> Result<Self> {
        let handle = connect(credential, policy).await?;
        let channel = handle.channel_open_session().await.map_err(Error::Channel)?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(Error::Channel)?;
        let sftp = russh_sftp::client::SftpSession::new(channel.into_stream()).await?;
        tracing::info!("SFTP session ready");
        Ok(Self {
            endpoint: credential.endpoint(),
            sftp,
            _handle: handle,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl RemoteFs for SftpSession {
    async fn list(&self, dir: &str) -> Result<Vec<RemoteEntry>> {
        let entries = self.sftp.read_dir(dir).await?;
        Ok(entries
            .filter_map(|entry| {
                let name = entry.file_name();
                if name == "." || name == ".." {
                    return None;
                }
                Some(if entry.file_type().is_dir() {
                    RemoteEntry::directory(name)
                } else {
                    RemoteEntry::file(name)
                })
            })
            .collect())
    }

    async fn get(&self, remote: &str, local: &std::path::Path) -> Result<u64> {
        let mut source = self.sftp.open(remote).await?;
        let mut destination = tokio::fs::File::create(local).await?;
        let bytes = tokio::io::copy(&mut source, &mut destination).await?;
        tokio::io::AsyncWriteExt::flush(&mut destination).await?;
        tracing::debug!("downloaded {} -> {:?} ({} bytes)", remote, local, bytes);
        Ok(bytes)
    }

    async fn put(&self, local: &std::path::Path, remote: &str) -> Result<u64> {
        let mut source = tokio::fs::File::open(local).await?;
        let mut destination = self.sftp.create(remote).await?;
        let bytes = tokio::io::copy(&mut source, &mut destination).await?;
        tokio::io::AsyncWriteExt::shutdown(&mut destination).await?;
        tracing::debug!("uploaded {:?} -> {} ({} bytes)", local, remote, bytes);
        Ok(bytes)
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.sftp.try_exists(path).await?)
    }

    async fn mkdir(&self, path: &str, recursive: bool) -> Result<()> {
        if !recursive {
            self.sftp.create_dir(path).await?;
            return Ok(());
        }
        for prefix in ancestors(path) {
            if self.sftp.try_exists(prefix.as_str()).await? {
                continue;
            }
            tracing::debug!("creating remote directory {}", prefix);
            self.sftp.create_dir(prefix.as_str()).await?;
        }
        Ok(())
    }

    async fn stat(&self, path: &str) -> Result<RemoteStat> {
        let metadata = self.sftp.metadata(path).await?;
        Ok(RemoteStat {
            is_directory: metadata.is_dir(),
        })
    }
}
