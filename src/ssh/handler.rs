//! SSH client handler implementation
//!
//! Implements the `russh::client::Handler` trait to handle SSH connection events.

use russh::keys::known_hosts::check_known_hosts_path;
use tracing::warn;

use super::config::HostKeyPolicy;

/// SSH client handler for russh
///
/// Decides whether the server's host key is trusted according to the
/// configured [`HostKeyPolicy`].
#[derive(Debug, Clone)]
pub struct SshHandler {
    host: String,
    port: u16,
    policy: HostKeyPolicy,
}

impl SshHandler {
    /// Create a new SSH handler for one endpoint
    pub fn new(host: impl Into<String>, port: u16, policy: HostKeyPolicy) -> Self {
        Self {
            host: host.into(),
            port,
            policy,
        }
    }

    /// Host key policy this handler enforces
    pub fn policy(&self) -> &HostKeyPolicy {
        &self.policy
    }
}

impl russh::client::Handler for SshHandler {
    type Error = russh::Error;

    /// Verify the server's host key
    ///
    /// # Security Note
    /// With [`HostKeyPolicy::AcceptAny`] every key is accepted. A warning is
    /// logged each time so the gap stays visible in the logs.
    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        match &self.policy {
            HostKeyPolicy::AcceptAny => {
                warn!(
                    "Accepting unverified host key for {}:{}",
                    self.host, self.port
                );
                Ok(true)
            }
            HostKeyPolicy::KnownHosts(path) => {
                match check_known_hosts_path(&self.host, self.port, server_public_key, path) {
                    Ok(true) => Ok(true),
                    Ok(false) => {
                        warn!(
                            "Host key for {}:{} not found in {}",
                            self.host,
                            self.port,
                            path.display()
                        );
                        Ok(false)
                    }
                    Err(e) => {
                        warn!(
                            "Host key check for {}:{} failed: {}",
                            self.host, self.port, e
                        );
                        Ok(false)
                    }
                }
            }
        }
    }
}
