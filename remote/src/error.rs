/// Errors raised by SSH and SFTP sessions.
///
/// `Connection`, `Authentication` and `InvalidKey` can only happen while a session is being
/// established and are fatal for that session. The remaining variants are per-operation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to connect to {endpoint}")]
    Connection {
        endpoint: String,
        #[source]
        source: russh::Error,
    },
    #[error("authentication rejected by {endpoint}")]
    Authentication { endpoint: String },
    #[error("invalid private key")]
    InvalidKey(#[source] russh::keys::Error),
    #[error("ssh channel error")]
    Channel(#[source] russh::Error),
    #[error("remote host refused to run {command}")]
    ExecRejected { command: String },
    #[error("sftp error")]
    Sftp(#[from] russh_sftp::client::error::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for errors that mean the session itself is unusable.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Error::Connection { .. } | Error::Authentication { .. } | Error::InvalidKey(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
