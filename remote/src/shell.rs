//! Command execution channels

use std::future::Future;

use crate::credential::{Credential, HostKeyPolicy};
use crate::error::{Error, Result};
use crate::handler::{SshHandle, connect};

/// Events emitted by a running remote command, in arrival order.
///
/// The stream ends when the receiver yields `None`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelEvent {
    Stdout(bytes::Bytes),
    Stderr(bytes::Bytes),
    ExitStatus(u32),
    ExitSignal(String),
}

/// Something that can start a command and stream back its events.
pub trait ShellChannel: Send + Sync + 'static {
    /// Start `command`. An error here means the command never ran.
    fn exec(
        &self,
        command: &str,
    ) -> impl Future<Output = Result<tokio::sync::mpsc::Receiver<ChannelEvent>>> + Send;
}

const EVENT_BUFFER: usize = 64;

/// A persistent SSH connection; every command runs on a fresh channel of that connection.
pub struct SshShell {
    endpoint: String,
    handle: SshHandle,
}

impl std::fmt::Debug for SshShell {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("SshShell")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl SshShell {
    #[tracing::instrument(skip(credential), fields(endpoint = %credential.endpoint()))]
    pub async fn connect(credential: &Credential, policy: HostKeyPolicy) -> Result<Self> {
        let handle = connect(credential, policy).await?;
        Ok(Self {
            endpoint: credential.endpoint(),
            handle,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// How a single channel message affects a running command.
#[derive(Debug, PartialEq, Eq)]
enum Reply {
    Event(ChannelEvent),
    Accepted,
    Rejected,
    Ignored,
}

fn translate(msg: russh::ChannelMsg) -> Reply {
    match msg {
        russh::ChannelMsg::Success => Reply::Accepted,
        russh::ChannelMsg::Failure => Reply::Rejected,
        russh::ChannelMsg::Data { ref data } => {
            Reply::Event(ChannelEvent::Stdout(bytes::Bytes::copy_from_slice(data)))
        }
        russh::ChannelMsg::ExtendedData { ref data, ext: 1 } => {
            Reply::Event(ChannelEvent::Stderr(bytes::Bytes::copy_from_slice(data)))
        }
        russh::ChannelMsg::ExitStatus { exit_status } => {
            Reply::Event(ChannelEvent::ExitStatus(exit_status))
        }
        russh::ChannelMsg::ExitSignal {
            ref signal_name, ..
        } => Reply::Event(ChannelEvent::ExitSignal(format!("{signal_name:?}"))),
        _ => Reply::Ignored,
    }
}

impl ShellChannel for SshShell {
    async fn exec(&self, command: &str) -> Result<tokio::sync::mpsc::Receiver<ChannelEvent>> {
        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(Error::Channel)?;
        channel.exec(true, command).await.map_err(Error::Channel)?;
        // events that arrive ahead of the exec reply are held back until it is accepted
        let mut early = Vec::new();
        loop {
            match channel.wait().await.map(translate) {
                Some(Reply::Accepted) => break,
                Some(Reply::Rejected) | None => {
                    tracing::error!("{} refused to run: {}", self.endpoint, command);
                    return Err(Error::ExecRejected {
                        command: command.to_string(),
                    });
                }
                Some(Reply::Event(event)) => early.push(event),
                Some(Reply::Ignored) => {}
            }
        }
        let (tx, rx) = tokio::sync::mpsc::channel(EVENT_BUFFER);
        tokio::spawn(async move {
            for event in early {
                if tx.send(event).await.is_err() {
                    return;
                }
            }
            while let Some(msg) = channel.wait().await {
                let event = match translate(msg) {
                    Reply::Event(event) => event,
                    _ => continue,
                };
                if tx.send(event).await.is_err() {
                    tracing::debug!("command output receiver dropped, abandoning channel");
                    break;
                }
            }
        });
        Ok(rx)
    }
}
