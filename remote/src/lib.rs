//! SSH plumbing for rxfer tools
//!
//! Two kinds of session are provided, each owning its own authenticated connection:
//!
//! - [`SftpSession`] implements [`RemoteFs`] (list/get/put/exists/mkdir/stat) over the SFTP
//!   subsystem
//! - [`SshShell`] implements [`ShellChannel`]; wrap it in a [`CommandRunner`] to execute
//!   commands with a success/failure outcome decided by exit status
//!
//! Connections are never shared between roles and are not re-established when dropped.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> anyhow::Result<()> {
//! use remote::{Credential, HostKeyPolicy, RemoteFs};
//!
//! let credential = Credential::with_password("10.0.0.5", 22, "deploy", "hunter2");
//! let sftp = remote::SftpSession::connect(&credential, HostKeyPolicy::AcceptAny).await?;
//! for entry in sftp.list("/srv/uploads").await? {
//!     println!("{} {:?}", entry.name, entry.kind);
//! }
//!
//! let shell = remote::SshShell::connect(&credential, HostKeyPolicy::AcceptAny).await?;
//! let runner = remote::CommandRunner::new(std::sync::Arc::new(shell));
//! let uptime = runner.capture("uptime").await?;
//! # let _ = uptime;
//! # Ok(())
//! # }
//! ```

pub mod credential;
pub mod error;
pub mod handler;
pub mod runner;
pub mod sftp;
pub mod shell;

pub use credential::{Credential, HostKeyPolicy, Secret};
pub use error::{Error, Result};
pub use runner::{CommandError, CommandRunner, ExecOutput};
pub use sftp::{EntryKind, RemoteEntry, RemoteFs, RemoteStat, SftpSession};
pub use shell::{ChannelEvent, ShellChannel, SshShell};
