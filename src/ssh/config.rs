//! SSH connection configuration and validation
//!
//! [`ConnectionConfig`] is built once per connection attempt and normalized by
//! [`ConnectionConfig::validate`] before any network I/O happens.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, SshRunError};

/// Default SSH port
pub const DEFAULT_PORT: u16 = 22;

/// Default timeout for dial + authentication
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// How the remote host key is checked during the handshake
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum HostKeyPolicy {
    /// Accept any host key.
    ///
    /// This is the historical default and leaves the connection open to
    /// man-in-the-middle attacks. Real deployments should use `KnownHosts`.
    #[default]
    AcceptAny,

    /// Only accept keys already present in the given known_hosts file
    KnownHosts(PathBuf),
}

/// SSH connection configuration
#[derive(Debug, Clone, Default)]
pub struct ConnectionConfig {
    /// Username for authentication
    pub username: String,

    /// Password for password authentication
    pub password: Option<String>,

    /// Private key content (not path!) for key authentication
    pub private_key: Option<String>,

    /// Path to a private key file, read when `private_key` is empty
    pub private_key_path: Option<PathBuf>,

    /// Remote hostname or IP address
    pub address: String,

    /// SSH port (0 means default)
    pub port: u16,

    /// Dial + authentication timeout (zero means default)
    pub timeout: Duration,

    /// Host key verification policy
    pub host_key_policy: HostKeyPolicy,
}

impl ConnectionConfig {
    /// Create a new configuration with minimal required fields
    pub fn new(address: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            username: username.into(),
            ..Default::default()
        }
    }

    /// Set the SSH port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set password authentication
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set private key authentication (key content, not path)
    pub fn with_private_key(mut self, key: impl Into<String>) -> Self {
        self.private_key = Some(key.into());
        self
    }

    /// Set private key authentication from a file
    pub fn with_private_key_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.private_key_path = Some(path.into());
        self
    }

    /// Set the dial timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the host key policy
    pub fn with_host_key_policy(mut self, policy: HostKeyPolicy) -> Self {
        self.host_key_policy = policy;
        self
    }

    /// `address:port`, with IPv6 literals bracketed
    pub fn endpoint(&self) -> String {
        if self.address.contains(':') && !self.address.starts_with('[') {
            format!("[{}]:{}", self.address, self.port)
        } else {
            format!("{}:{}", self.address, self.port)
        }
    }

    /// Validate and normalize the configuration.
    ///
    /// Empty strings count as absent. A key path alone is not a credential:
    /// the file is read into `private_key` only after that check, and only
    /// when no key material was given. The path is cleared afterwards.
    /// Port and timeout fall back to [`DEFAULT_PORT`] and [`DEFAULT_TIMEOUT`].
    pub fn validate(mut self) -> Result<Self> {
        if self.username.is_empty() {
            return Err(SshRunError::MissingField("username"));
        }

        if self.address.is_empty() {
            return Err(SshRunError::MissingField("address"));
        }

        self.password = non_empty(self.password);
        self.private_key = non_empty(self.private_key);
        self.private_key_path = self
            .private_key_path
            .filter(|p| !p.as_os_str().is_empty());

        if self.password.is_none() && self.private_key.is_none() {
            return Err(SshRunError::MissingCredential);
        }

        if self.private_key.is_none() {
            if let Some(path) = self.private_key_path.take() {
                let content = std::fs::read_to_string(&path)
                    .map_err(|source| SshRunError::KeyRead { path, source })?;
                self.private_key = Some(content);
            }
        }

        if self.port == 0 {
            self.port = DEFAULT_PORT;
        }

        if self.timeout.is_zero() {
            self.timeout = DEFAULT_TIMEOUT;
        }

        Ok(self)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}
