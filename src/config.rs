//! Configuration: CLI arguments and the host inventory file

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SshRunError};
use crate::ssh::{ConnectionConfig, ExecOptions, HostKeyPolicy};

/// Default inventory file, relative to the working directory
pub const DEFAULT_INVENTORY: &str = "sshrun.yaml";

/// Default number of hosts processed at once
pub const DEFAULT_CONCURRENCY: usize = 1;

/// One remote host from the inventory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRecord {
    /// Display name
    #[serde(default)]
    pub name: String,

    /// Hostname or IP address
    pub address: String,

    /// Login user
    pub user: String,

    /// Login password, also used to answer sudo prompts
    #[serde(default)]
    pub password: String,

    /// SSH port (default 22)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Path to a private key file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<PathBuf>,
}

impl HostRecord {
    /// Name if set, otherwise the address
    pub fn label(&self) -> &str {
        if self.name.is_empty() {
            &self.address
        } else {
            &self.name
        }
    }

    /// Connection parameters for dialing this host.
    ///
    /// The key file is read here, so a host listed with only `key` carries
    /// key material and passes validation.
    pub fn connection_config(&self) -> Result<ConnectionConfig> {
        let mut config = ConnectionConfig::new(&self.address, &self.user)
            .with_password(&self.password)
            .with_port(self.port.unwrap_or_default());

        if let Some(ref key) = self.key {
            let path = expand_home(key);
            let content = std::fs::read_to_string(&path)
                .map_err(|source| SshRunError::KeyRead { path, source })?;
            config = config.with_private_key(content);
        }

        Ok(config)
    }
}

/// Host list plus the commands to run on them
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Inventory {
    /// Hosts, processed in order
    #[serde(default)]
    pub hosts: Vec<HostRecord>,

    /// Command to run
    #[serde(default, rename = "do")]
    pub run: String,

    /// Command that reverts `do`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub undo: Option<String>,
}

impl Inventory {
    /// Parse an inventory from YAML text
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Read and parse an inventory file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SshRunError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    /// Pick the command to run: an explicit override, `undo`, or `do`
    pub fn command(&self, override_cmd: Option<&str>, undo: bool) -> Result<String> {
        let command = match (override_cmd, undo) {
            (Some(cmd), _) => cmd.to_string(),
            (None, true) => self
                .undo
                .clone()
                .ok_or_else(|| SshRunError::config("inventory has no `undo` command"))?,
            (None, false) => self.run.clone(),
        };

        if command.trim().is_empty() {
            return Err(SshRunError::config("no command to run"));
        }

        Ok(command)
    }
}

/// sshrun CLI Arguments
#[derive(Parser, Debug, Clone)]
#[command(name = "sshrun")]
#[command(version)]
#[command(about = "Run a shell command on every host of an inventory over SSH")]
pub struct Args {
    /// Inventory file (YAML with `hosts`, `do` and optional `undo`)
    #[arg(long, default_value = DEFAULT_INVENTORY, env = "SSHRUN_CONFIG")]
    pub config: PathBuf,

    /// Command to run instead of the inventory's `do`
    #[arg(long, env = "SSHRUN_CMD", conflicts_with = "undo")]
    pub cmd: Option<String>,

    /// Run the inventory's `undo` command
    #[arg(long, default_value = "false")]
    pub undo: bool,

    /// Number of hosts processed at once
    #[arg(long, default_value_t = DEFAULT_CONCURRENCY, env = "SSHRUN_CONCURRENCY")]
    pub concurrency: usize,

    /// Per-host command timeout in milliseconds (0 = no timeout)
    #[arg(long, default_value = "0", env = "SSHRUN_EXEC_TIMEOUT")]
    pub exec_timeout: u64,

    /// Dial and authentication timeout in seconds
    #[arg(long, default_value = "15", env = "SSHRUN_CONNECT_TIMEOUT")]
    pub connect_timeout: u64,

    /// Verify host keys against this known_hosts file instead of accepting any
    #[arg(long, env = "SSHRUN_KNOWN_HOSTS")]
    pub known_hosts: Option<PathBuf>,

    /// Extra prompt prefix answered with the host password (repeatable)
    #[arg(long = "prompt")]
    pub prompts: Vec<String>,

    /// Print one JSON object per host instead of plain text
    #[arg(long, default_value = "false")]
    pub json: bool,
}

/// Parsed and validated configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Hosts to run on
    pub hosts: Vec<HostRecord>,

    /// Command to run on each host
    pub command: String,

    /// Number of hosts processed at once
    pub concurrency: usize,

    /// Dial timeout
    pub connect_timeout: Duration,

    /// Host key verification policy
    pub host_key_policy: HostKeyPolicy,

    /// Prompt patterns and execution timeout
    pub exec: ExecOptions,

    /// JSON output
    pub json: bool,
}

impl Config {
    /// Create Config from CLI Args, loading the inventory file
    pub fn from_args(args: Args) -> Result<Self> {
        let inventory = Inventory::load(&args.config)?;
        Self::from_parts(args, inventory)
    }

    /// Create Config from CLI Args and an already loaded inventory
    pub fn from_parts(args: Args, inventory: Inventory) -> Result<Self> {
        validate_args(&args)?;

        let command = inventory.command(args.cmd.as_deref(), args.undo)?;

        let mut exec = ExecOptions::default();
        for prompt in args.prompts.into_iter().filter(|p| !p.is_empty()) {
            exec = exec.with_prompt_pattern(prompt);
        }
        if args.exec_timeout > 0 {
            exec = exec.with_timeout(Duration::from_millis(args.exec_timeout));
        }

        let host_key_policy = match args.known_hosts {
            Some(path) => HostKeyPolicy::KnownHosts(expand_home(&path)),
            None => HostKeyPolicy::AcceptAny,
        };

        Ok(Config {
            hosts: inventory.hosts,
            command,
            concurrency: args.concurrency,
            connect_timeout: Duration::from_secs(args.connect_timeout),
            host_key_policy,
            exec,
            json: args.json,
        })
    }
}

/// Validate CLI arguments
fn validate_args(args: &Args) -> Result<()> {
    let mut errors = Vec::new();

    if args.concurrency == 0 {
        errors.push("--concurrency must be at least 1".to_string());
    }

    if let Some(ref path) = args.known_hosts {
        if !expand_home(path).exists() {
            errors.push(format!("known_hosts file not found: {}", path.display()));
        }
    }

    if !errors.is_empty() {
        return Err(SshRunError::Config(errors.join("\n")));
    }

    Ok(())
}

/// Expand a leading `~/` to `$HOME`
fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), std::env::var_os("HOME")) {
        (Ok(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => path.to_path_buf(),
    }
}
