//! sshrun - run a shell command on a list of SSH hosts
//!
//! Each host from an inventory file is dialed with its own credentials
//! (password or private key), the command runs on a fresh pseudo-terminal
//! channel, and `sudo`-style password prompts appearing in the output are
//! answered with the host password. Every host yields its output and exit
//! code; failures are collected without stopping the batch.
//!
//! # Example Usage (CLI)
//!
//! ```bash
//! sshrun --config hosts.yaml --cmd "sudo systemctl restart nginx"
//! ```
//!
//! # Example Usage (library)
//!
//! ```no_run
//! use sshrun::{Connection, HostRecord};
//!
//! # async fn demo() -> sshrun::Result<()> {
//! let host = HostRecord {
//!     address: "192.168.1.100".into(),
//!     user: "admin".into(),
//!     password: "secret".into(),
//!     ..Default::default()
//! };
//! let conn = Connection::open(host.connection_config()?).await?;
//! let out = conn.exec(&host, "sudo whoami").await?;
//! assert_eq!(out.output, "root");
//! conn.close().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Security
//!
//! Host keys are accepted without verification unless a known_hosts file is
//! configured ([`HostKeyPolicy::KnownHosts`], `--known-hosts`).

pub mod config;
pub mod error;
pub mod runner;
pub mod ssh;

// Re-exports for convenience
pub use config::{Args, Config, HostRecord, Inventory};
pub use error::{Result, SshRunError, UNKNOWN_EXIT_CODE};
pub use runner::{Dialer, HostFailure, HostReport, HostRunner, RemoteExec, RunSummary, SshDialer};
pub use ssh::{Connection, ConnectionConfig, ExecOptions, ExecOutput, HostKeyPolicy};
