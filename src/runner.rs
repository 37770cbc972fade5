//! Host runner
//!
//! Dials every host of an inventory, runs one command on it and collects a
//! report per host. A failing host never aborts the batch: its error is
//! accumulated and the runner moves on.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::HostRecord;
use crate::error::{Result, SshRunError};
use crate::ssh::{Connection, ConnectionConfig, ExecOptions, ExecOutput, HostKeyPolicy};

/// Something that can run commands on an already connected host
#[async_trait]
pub trait RemoteExec: Send + Sync {
    /// Run `command`, answering prompts with `host.password`
    async fn exec(&self, host: &HostRecord, command: &str) -> Result<ExecOutput>;

    /// Release the connection
    async fn close(&self);
}

/// Opens connections for the runner
#[async_trait]
pub trait Dialer: Send + Sync {
    type Connection: RemoteExec;

    /// Connect and authenticate
    async fn dial(&self, config: ConnectionConfig) -> Result<Self::Connection>;
}

#[async_trait]
impl RemoteExec for Connection {
    async fn exec(&self, host: &HostRecord, command: &str) -> Result<ExecOutput> {
        Connection::exec(self, host, command).await
    }

    async fn close(&self) {
        Connection::close(self).await
    }
}

/// Dials real SSH connections
#[derive(Debug, Clone, Default)]
pub struct SshDialer {
    /// Dial timeout applied to every host (zero = default)
    pub connect_timeout: Duration,

    /// Host key policy applied to every host
    pub host_key_policy: HostKeyPolicy,

    /// Execution options applied to every connection
    pub exec: ExecOptions,
}

#[async_trait]
impl Dialer for SshDialer {
    type Connection = Connection;

    async fn dial(&self, config: ConnectionConfig) -> Result<Connection> {
        let config = config
            .with_timeout(self.connect_timeout)
            .with_host_key_policy(self.host_key_policy.clone());

        Ok(Connection::open(config)
            .await?
            .with_exec_options(self.exec.clone()))
    }
}

/// Result of running the command on one host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostReport {
    /// Host name (address if unnamed)
    pub host: String,

    /// Host address
    pub address: String,

    /// Captured output
    pub output: String,

    /// Exit code, -1 when unknown
    pub exit_code: i32,
}

/// An error attributed to one host
#[derive(Debug)]
pub struct HostFailure {
    /// Host name (address if unnamed)
    pub host: String,

    /// What went wrong
    pub error: SshRunError,
}

/// Everything a run produced
#[derive(Debug, Default)]
pub struct RunSummary {
    /// One report per host whose command ran, in inventory order
    pub reports: Vec<HostReport>,

    /// Every error, in inventory order
    pub failures: Vec<HostFailure>,
}

impl RunSummary {
    /// Check if every host succeeded
    pub fn success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// What happened on one host
struct HostOutcome {
    report: Option<HostReport>,
    failure: Option<HostFailure>,
}

/// Runs one command across a list of hosts
#[derive(Debug, Clone)]
pub struct HostRunner<D> {
    dialer: D,
    concurrency: usize,
}

impl<D: Dialer> HostRunner<D> {
    /// Create a sequential runner
    pub fn new(dialer: D) -> Self {
        Self {
            dialer,
            concurrency: 1,
        }
    }

    /// Process up to `concurrency` hosts at once (minimum 1)
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Run `command` on every host.
    ///
    /// Results keep the order of `hosts` whatever the concurrency.
    pub async fn run(&self, hosts: &[HostRecord], command: &str) -> RunSummary {
        info!(
            "Running on {} host(s), concurrency {}: {}",
            hosts.len(),
            self.concurrency,
            command
        );

        let outcomes: Vec<HostOutcome> = stream::iter(hosts)
            .map(|host| self.run_host(host, command))
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut summary = RunSummary::default();
        for outcome in outcomes {
            summary.reports.extend(outcome.report);
            summary.failures.extend(outcome.failure);
        }

        info!(
            "Finished: {} report(s), {} failure(s)",
            summary.reports.len(),
            summary.failures.len()
        );

        summary
    }

    async fn run_host(&self, host: &HostRecord, command: &str) -> HostOutcome {
        let label = host.label().to_string();

        let dialed = match host.connection_config() {
            Ok(config) => self.dialer.dial(config).await,
            Err(error) => Err(error),
        };

        let connection = match dialed {
            Ok(connection) => connection,
            Err(error) => {
                warn!("{}: {}", label, error);
                return HostOutcome {
                    report: None,
                    failure: Some(HostFailure { host: label, error }),
                };
            }
        };

        let result = connection.exec(host, command).await;
        connection.close().await;

        let report = |output: String, exit_code: i32| HostReport {
            host: label.clone(),
            address: host.address.clone(),
            output,
            exit_code,
        };

        match result {
            Ok(out) => HostOutcome {
                report: Some(report(out.output, out.exit_code)),
                failure: None,
            },
            Err(error) => {
                warn!("{}: {}", label, error);
                let output = error.output().unwrap_or_default().to_string();
                HostOutcome {
                    report: Some(report(output, error.exit_code())),
                    failure: Some(HostFailure {
                        host: label.clone(),
                        error,
                    }),
                }
            }
        }
    }
}
