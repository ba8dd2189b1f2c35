use crate::config::KnownHostsPolicy;
use crate::constants::network;
use crate::errors::ToolError;
use crate::services::keystore::Credential;
use crate::services::logger::Logger;
use crate::services::pool::{Connector, HostKey};
use async_trait::async_trait;
use base64::Engine;
use ssh2::{CheckResult, KnownHostFileKind, Session};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Dials, verifies and authenticates one ssh2 session per call. All libssh2
/// work happens on the blocking thread pool.
pub struct SshConnector {
    policy: KnownHostsPolicy,
    logger: Logger,
}

impl SshConnector {
    pub fn new(policy: KnownHostsPolicy, logger: Logger) -> Self {
        Self {
            policy,
            logger: logger.child("connector"),
        }
    }
}

#[async_trait]
impl Connector for SshConnector {
    type Conn = Session;

    async fn connect(&self, key: &HostKey, credential: &Credential) -> Result<Session, ToolError> {
        let key = key.clone();
        let host_for_err = key.host.clone();
        let credential = credential.clone();
        let policy = self.policy;
        let logger = self.logger.clone();
        tokio::task::spawn_blocking(move || connect_blocking(&key, &credential, policy, &logger))
            .await
            .map_err(|_| ToolError::connect("connect task aborted").with_host(host_for_err))?
    }

    fn close(&self, conn: Session) {
        let _ = conn.disconnect(None, "closing", None);
    }
}

fn connect_blocking(
    key: &HostKey,
    credential: &Credential,
    policy: KnownHostsPolicy,
    logger: &Logger,
) -> Result<Session, ToolError> {
    let timeout = Duration::from_millis(network::TCP_CONNECT_TIMEOUT_MS);
    let addr = (key.host.as_str(), key.port)
        .to_socket_addrs()
        .map_err(|err| {
            ToolError::connect(format!("DNS resolution failed for {}: {}", key.host, err))
                .with_host(key.host.clone())
        })?
        .next()
        .ok_or_else(|| {
            ToolError::connect(format!("No addresses for {}", key.host)).with_host(key.host.clone())
        })?;

    let tcp = TcpStream::connect_timeout(&addr, timeout).map_err(|err| {
        ToolError::connect(format!("TCP connect to {} failed: {}", addr, err))
            .with_host(key.host.clone())
    })?;
    tcp.set_read_timeout(Some(timeout)).ok();
    tcp.set_write_timeout(Some(timeout)).ok();

    let mut session = Session::new().map_err(|err| {
        ToolError::connect(format!("Failed to create SSH session: {}", err))
            .with_host(key.host.clone())
    })?;
    session.set_tcp_stream(tcp);
    session.handshake().map_err(|err| {
        ToolError::connect(format!("SSH handshake failed: {}", err)).with_host(key.host.clone())
    })?;

    verify_host_key(&session, key, policy, logger)?;

    match credential {
        Credential::Password(password) => {
            session
                .userauth_password(&key.username, password)
                .map_err(|err| {
                    ToolError::auth(format!("Password authentication failed: {}", err))
                        .with_host(key.host.clone())
                })?;
        }
        Credential::PrivateKey { path, passphrase } => {
            session
                .userauth_pubkey_file(
                    &key.username,
                    None,
                    Path::new(path),
                    passphrase.as_deref(),
                )
                .map_err(|err| {
                    ToolError::auth(format!("Private key authentication failed: {}", err))
                        .with_host(key.host.clone())
                })?;
        }
    }
    if !session.authenticated() {
        return Err(ToolError::auth("SSH authentication rejected").with_host(key.host.clone()));
    }

    session.set_keepalive(true, network::KEEPALIVE_INTERVAL_SECS);
    Ok(session)
}

fn verify_host_key(
    session: &Session,
    key: &HostKey,
    policy: KnownHostsPolicy,
    logger: &Logger,
) -> Result<(), ToolError> {
    if policy == KnownHostsPolicy::Ignore {
        return Ok(());
    }

    let Some((host_key, _key_type)) = session.host_key() else {
        return match policy {
            KnownHostsPolicy::Reject => Err(ToolError::connect("Server offered no host key")
                .with_host(key.host.clone())),
            _ => Ok(()),
        };
    };

    let mut known_hosts = session.known_hosts().map_err(|err| {
        ToolError::connect(format!("Failed to init known-hosts check: {}", err))
            .with_host(key.host.clone())
    })?;
    // Missing file just means every host is unknown.
    let _ = known_hosts.read_file(&known_hosts_path(), KnownHostFileKind::OpenSSH);

    let fingerprint = fingerprint_sha256(session);
    match known_hosts.check_port(&key.host, key.port, host_key) {
        CheckResult::Match => Ok(()),
        CheckResult::Mismatch => match policy {
            KnownHostsPolicy::Reject => Err(ToolError::connect(format!(
                "Host key mismatch for {} (offered {})",
                key.host,
                fingerprint.as_deref().unwrap_or("unknown")
            ))
            .with_host(key.host.clone())),
            _ => {
                logger.warn(
                    "host key mismatch",
                    Some(&serde_json::json!({"host": key.host, "fingerprint": fingerprint})),
                );
                Ok(())
            }
        },
        CheckResult::NotFound | CheckResult::Failure => match policy {
            KnownHostsPolicy::Reject => Err(ToolError::connect(format!(
                "Unknown host key for {} (offered {})",
                key.host,
                fingerprint.as_deref().unwrap_or("unknown")
            ))
            .with_host(key.host.clone())),
            _ => {
                logger.warn(
                    "host key not in known_hosts",
                    Some(&serde_json::json!({"host": key.host, "fingerprint": fingerprint})),
                );
                Ok(())
            }
        },
    }
}

fn known_hosts_path() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/root"))
        .join(".ssh")
        .join("known_hosts")
}

fn fingerprint_sha256(session: &Session) -> Option<String> {
    let hash = session.host_key_hash(ssh2::HashType::Sha256)?;
    let encoded = base64::engine::general_purpose::STANDARD_NO_PAD.encode(hash);
    Some(format!("SHA256:{}", encoded))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_hosts_path_lives_under_home() {
        let path = known_hosts_path();
        assert!(path.ends_with(".ssh/known_hosts"));
    }
}
