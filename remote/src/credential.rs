//! Endpoint credentials and host key policy

/// How the remote end proves who we are.
#[derive(Clone)]
pub enum Secret {
    Password(String),
    PrivateKey {
        /// entire contents of an OpenSSH/PEM private key
        key_data: String,
        passphrase: Option<String>,
    },
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Secret::Password(_) => f.write_str("Password(<redacted>)"),
            Secret::PrivateKey { passphrase, .. } => f
                .debug_struct("PrivateKey")
                .field("key_data", &"<redacted>")
                .field("has_passphrase", &passphrase.is_some())
                .finish(),
        }
    }
}

/// Identifies one remote peer. Immutable once a session has been established with it.
#[derive(Clone, Debug)]
pub struct Credential {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub secret: Secret,
}

impl Credential {
    pub const DEFAULT_PORT: u16 = 22;

    pub fn with_password(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            secret: Secret::Password(password.into()),
        }
    }

    pub fn with_key(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        key_data: impl Into<String>,
        passphrase: Option<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            secret: Secret::PrivateKey {
                key_data: key_data.into(),
                passphrase,
            },
        }
    }

    /// `user@host:port`, used in logs and error messages.
    pub fn endpoint(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }
}

/// What to do with the host key the server presents.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum HostKeyPolicy {
    /// Accept any host key
    #[default]
    AcceptAny,
    /// Require the key to be listed in the user's `~/.ssh/known_hosts`
    KnownHosts,
}
