//! Remote command execution with a deterministic outcome
//!
//! A [`CommandRunner`] issues one command at a time over a [`ShellChannel`], gathers the
//! streamed output and classifies the result by exit status:
//!
//! - the command could not be started: [`CommandError::Channel`]
//! - exit status 0: `Ok(ExecOutput)`
//! - non-zero status, an exit signal, or no status at all: [`CommandError::Failed`]
//!
//! Output on stderr is logged as it arrives but never fails a command by itself.

use std::sync::Arc;

use crate::error::Error;
use crate::shell::{ChannelEvent, ShellChannel};

/// Resolved output of a successful command.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: u32,
    pub signal: Option<String>,
    /// empty when stdout was streamed into a file
    pub stdout: String,
    pub stderr: String,
    pub stdout_bytes: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("failed to start remote command")]
    Channel(#[source] Error),
    #[error("remote command failed (exit code: {exit_code:?}, signal: {signal:?}): {}", .stderr.trim())]
    Failed {
        exit_code: Option<u32>,
        signal: Option<String>,
        stdout: String,
        stderr: String,
    },
    #[error("failed writing command output")]
    Output(#[source] std::io::Error),
}

enum Sink {
    Memory(Vec<u8>),
    File(tokio::fs::File),
}

impl Sink {
    async fn write(&mut self, chunk: &[u8]) -> std::io::Result<()> {
        match self {
            Sink::Memory(buffer) => {
                buffer.extend_from_slice(chunk);
                Ok(())
            }
            Sink::File(file) => tokio::io::AsyncWriteExt::write_all(file, chunk).await,
        }
    }

    async fn finish(self) -> std::io::Result<Vec<u8>> {
        match self {
            Sink::Memory(buffer) => Ok(buffer),
            Sink::File(mut file) => {
                tokio::io::AsyncWriteExt::flush(&mut file).await?;
                Ok(Vec::new())
            }
        }
    }
}

/// State gathered while a command is in flight; consumed once when the stream closes.
struct Accumulator {
    stdout: Sink,
    stdout_bytes: u64,
    stderr: Vec<u8>,
    exit_code: Option<u32>,
    signal: Option<String>,
}

impl Accumulator {
    fn new(stdout: Sink) -> Self {
        Self {
            stdout,
            stdout_bytes: 0,
            stderr: Vec::new(),
            exit_code: None,
            signal: None,
        }
    }

    async fn feed(&mut self, command: &str, event: ChannelEvent) -> Result<(), CommandError> {
        match event {
            ChannelEvent::Stdout(chunk) => {
                self.stdout_bytes += chunk.len() as u64;
                self.stdout.write(&chunk).await.map_err(CommandError::Output)?;
            }
            ChannelEvent::Stderr(chunk) => {
                tracing::warn!(
                    "{}: {}",
                    command,
                    String::from_utf8_lossy(&chunk).trim_end()
                );
                self.stderr.extend_from_slice(&chunk);
            }
            ChannelEvent::ExitStatus(code) => self.exit_code = Some(code),
            ChannelEvent::ExitSignal(signal) => self.signal = Some(signal),
        }
        Ok(())
    }

    async fn resolve(self) -> Result<ExecOutput, CommandError> {
        let stdout = self.stdout.finish().await.map_err(CommandError::Output)?;
        let stdout = String::from_utf8_lossy(&stdout).into_owned();
        let stderr = String::from_utf8_lossy(&self.stderr).into_owned();
        match (self.exit_code, self.signal) {
            (Some(0), None) => Ok(ExecOutput {
                exit_code: 0,
                signal: None,
                stdout,
                stderr,
                stdout_bytes: self.stdout_bytes,
            }),
            (exit_code, signal) => Err(CommandError::Failed {
                exit_code,
                signal,
                stdout,
                stderr,
            }),
        }
    }
}

/// Runs commands over one shell channel, strictly one at a time.
#[derive(Debug)]
pub struct CommandRunner<C> {
    channel: Arc<C>,
    in_flight: tokio::sync::Mutex<()>,
}

impl<C: ShellChannel> CommandRunner<C> {
    pub fn new(channel: Arc<C>) -> Self {
        Self {
            channel,
            in_flight: tokio::sync::Mutex::new(()),
        }
    }

    pub fn channel(&self) -> &Arc<C> {
        &self.channel
    }

    async fn drive(&self, command: &str, stdout: Sink) -> Result<ExecOutput, CommandError> {
        let _turn = self.in_flight.lock().await;
        tracing::info!("Executing: {}", command);
        let mut events = self
            .channel
            .exec(command)
            .await
            .map_err(CommandError::Channel)?;
        let mut accumulator = Accumulator::new(stdout);
        while let Some(event) = events.recv().await {
            accumulator.feed(command, event).await?;
        }
        let result = accumulator.resolve().await;
        match &result {
            Ok(output) => tracing::debug!(
                "Command succeeded: {} ({} stdout bytes)",
                command,
                output.stdout_bytes
            ),
            Err(error) => tracing::error!("Command {} failed: {}", command, error),
        }
        result
    }

    /// Run `command`, keeping stdout and stderr in memory.
    #[tracing::instrument(skip(self))]
    pub async fn run(&self, command: &str) -> Result<ExecOutput, CommandError> {
        self.drive(command, Sink::Memory(Vec::new())).await
    }

    /// Run `command` streaming its stdout into `path`, creating parent directories as needed.
    ///
    /// The returned output has an empty `stdout`; `stdout_bytes` holds the size written.
    #[tracing::instrument(skip(self))]
    pub async fn run_to_file(
        &self,
        command: &str,
        path: &std::path::Path,
    ) -> Result<ExecOutput, CommandError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(CommandError::Output)?;
        }
        let file = tokio::fs::File::create(path)
            .await
            .map_err(CommandError::Output)?;
        self.drive(command, Sink::File(file)).await
    }

    /// Run `command` and return its stdout with surrounding whitespace removed.
    pub async fn capture(&self, command: &str) -> Result<String, CommandError> {
        let output = self.run(command).await?;
        Ok(output.stdout.trim().to_string())
    }
}
