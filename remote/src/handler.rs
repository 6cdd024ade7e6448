//! SSH connection establishment shared by SFTP and shell sessions

use std::sync::Arc;

use crate::credential::{Credential, HostKeyPolicy, Secret};
use crate::error::{Error, Result};

/// Client-side callbacks for russh; only host key verification is customized.
#[derive(Debug, Clone)]
pub struct ClientHandler {
    host: String,
    port: u16,
    policy: HostKeyPolicy,
}

impl russh::client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        match self.policy {
            HostKeyPolicy::AcceptAny => Ok(true),
            HostKeyPolicy::KnownHosts => {
                match russh::keys::check_known_hosts(&self.host, self.port, server_public_key) {
                    Ok(known) => {
                        if !known {
                            tracing::error!(
                                "Host key for {}:{} is not in known_hosts",
                                self.host,
                                self.port
                            );
                        }
                        Ok(known)
                    }
                    Err(error) => {
                        tracing::error!(
                            "Host key for {}:{} failed verification: {}",
                            self.host,
                            self.port,
                            error
                        );
                        Ok(false)
                    }
                }
            }
        }
    }
}

pub type SshHandle = russh::client::Handle<ClientHandler>;

/// Open an authenticated SSH connection.
///
/// Any failure here is fatal for the session being established; nothing is retried.
pub async fn connect(credential: &Credential, policy: HostKeyPolicy) -> Result<SshHandle> {
    let endpoint = credential.endpoint();
    tracing::debug!("Connecting to SSH endpoint: {}", endpoint);
    let config = Arc::new(russh::client::Config::default());
    let handler = ClientHandler {
        host: credential.host.clone(),
        port: credential.port,
        policy,
    };
    let mut handle = russh::client::connect(
        config,
        (credential.host.as_str(), credential.port),
        handler,
    )
    .await
    .map_err(|source| Error::Connection {
        endpoint: endpoint.clone(),
        source,
    })?;
    let auth = match &credential.secret {
        Secret::Password(password) => {
            handle
                .authenticate_password(credential.username.as_str(), password.as_str())
                .await
        }
        Secret::PrivateKey {
            key_data,
            passphrase,
        } => {
            let key = russh::keys::decode_secret_key(key_data, passphrase.as_deref())
                .map_err(Error::InvalidKey)?;
            let hash_alg = handle
                .best_supported_rsa_hash()
                .await
                .map_err(|source| Error::Connection {
                    endpoint: endpoint.clone(),
                    source,
                })?
                .flatten();
            handle
                .authenticate_publickey(
                    credential.username.as_str(),
                    russh::keys::PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg),
                )
                .await
        }
    }
    .map_err(|source| Error::Connection {
        endpoint: endpoint.clone(),
        source,
    })?;
    if !auth.success() {
        return Err(Error::Authentication { endpoint });
    }
    tracing::info!("Authenticated to {}", endpoint);
    Ok(handle)
}
