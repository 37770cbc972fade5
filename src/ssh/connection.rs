//! SSH Connection
//!
//! One authenticated transport to one remote host. Commands run on fresh
//! channels multiplexed over that transport; the handle itself is guarded by
//! a mutex that is only held to check, clone or take it.

use std::sync::Arc;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::keys::{decode_secret_key, PrivateKey, PrivateKeyWithHashAlg};
use russh::{Channel, ChannelMsg, Disconnect, Pty};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::command::{execute, execute_piped, ChannelEvent, ExecChannel, ExecOptions, ExecOutput};
use super::config::ConnectionConfig;
use super::handler::SshHandler;
use super::sanitize::sanitize_command;
use crate::config::HostRecord;
use crate::error::{Result, SshRunError};

/// Terminal type requested for every session
pub const PTY_TERM: &str = "xterm";

/// Terminal width in columns
pub const PTY_COLUMNS: u32 = 100;

/// Terminal height in rows
pub const PTY_ROWS: u32 = 50;

/// Echo off, 14.4 kbaud in and out
const PTY_MODES: &[(Pty, u32)] = &[
    (Pty::ECHO, 0),
    (Pty::TTY_OP_ISPEED, 14400),
    (Pty::TTY_OP_OSPEED, 14400),
];

/// Authentication method, in the order they are tried
enum AuthMethod {
    Password(String),
    PublicKey(Arc<PrivateKey>),
}

impl AuthMethod {
    fn name(&self) -> &'static str {
        match self {
            AuthMethod::Password(_) => "password",
            AuthMethod::PublicKey(_) => "publickey",
        }
    }
}

/// Password first, then the parsed private key
fn auth_methods(config: &ConnectionConfig) -> Result<Vec<AuthMethod>> {
    let mut methods = Vec::new();

    if let Some(ref password) = config.password {
        methods.push(AuthMethod::Password(password.clone()));
    }

    if let Some(ref key_content) = config.private_key {
        let key = decode_secret_key(key_content, None)
            .map_err(|e| SshRunError::AuthKeyParse(e.to_string()))?;
        methods.push(AuthMethod::PublicKey(Arc::new(key)));
    }

    Ok(methods)
}

async fn authenticate(
    session: &mut Handle<SshHandler>,
    username: &str,
    method: &AuthMethod,
) -> std::result::Result<bool, russh::Error> {
    let result = match method {
        AuthMethod::Password(password) => {
            session
                .authenticate_password(username, password.as_str())
                .await?
        }
        AuthMethod::PublicKey(key) => {
            let hash_alg = session.best_supported_rsa_hash().await?.flatten();
            session
                .authenticate_publickey(username, PrivateKeyWithHashAlg::new(key.clone(), hash_alg))
                .await?
        }
    };

    Ok(result.success())
}

/// Connect and authenticate, trying each method in order
async fn dial(
    config: &ConnectionConfig,
    methods: &[AuthMethod],
    endpoint: &str,
) -> Result<Handle<SshHandler>> {
    let ssh_config = Arc::new(client::Config::default());
    let handler = SshHandler::new(
        config.address.clone(),
        config.port,
        config.host_key_policy.clone(),
    );

    let mut session = client::connect(
        ssh_config,
        (config.address.as_str(), config.port),
        handler,
    )
    .await
    .map_err(|e| SshRunError::dial(endpoint, e))?;

    for method in methods {
        debug!(
            "Attempting {} authentication for user '{}'",
            method.name(),
            config.username
        );

        let accepted = authenticate(&mut session, &config.username, method)
            .await
            .map_err(|e| SshRunError::dial(endpoint, e))?;

        if accepted {
            info!("{} authentication successful", method.name());
            return Ok(session);
        }

        debug!("{} authentication rejected", method.name());
    }

    Err(SshRunError::dial(endpoint, "all authentication methods rejected"))
}

/// Attribute a session failure to `command`, keeping its reason
fn session_error(command: &str, err: SshRunError) -> SshRunError {
    match err {
        SshRunError::Session { reason, .. } => SshRunError::session(command, reason),
        other => SshRunError::session(command, other),
    }
}

/// Authenticated SSH transport to one host
pub struct Connection {
    endpoint: String,

    /// Open transport, `None` once closed
    client: Mutex<Option<Arc<Handle<SshHandler>>>>,

    /// Cancelled on close; running commands observe a child token
    cancel: CancellationToken,

    options: ExecOptions,
}

impl Connection {
    /// Validate `config`, then dial and authenticate.
    ///
    /// The config timeout bounds connect + authentication, not later
    /// command execution.
    pub async fn open(config: ConnectionConfig) -> Result<Self> {
        let config = config.validate()?;
        let methods = auth_methods(&config)?;
        let endpoint = config.endpoint();

        info!("Connecting to {}@{}...", config.username, endpoint);

        let session = match timeout(config.timeout, dial(&config, &methods, &endpoint)).await {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                error!("SSH connection failed: {}", e);
                return Err(e);
            }
            Err(_) => {
                error!("SSH connection timeout after {:?}", config.timeout);
                return Err(SshRunError::dial(
                    &endpoint,
                    format!("timeout after {:?}", config.timeout),
                ));
            }
        };

        info!(
            "Successfully connected to {}@{}",
            config.username, endpoint
        );

        Ok(Self {
            endpoint,
            client: Mutex::new(Some(Arc::new(session))),
            cancel: CancellationToken::new(),
            options: ExecOptions::default(),
        })
    }

    /// Set prompt patterns and execution timeout used by `exec`
    pub fn with_exec_options(mut self, options: ExecOptions) -> Self {
        self.options = options;
        self
    }

    /// `address:port` this connection was dialed to
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Check if the transport is still held
    pub async fn is_open(&self) -> bool {
        self.client.lock().await.is_some()
    }

    /// Open a channel with a pseudo-terminal attached.
    ///
    /// The lock is released before the channel is opened, so several
    /// sessions can be created concurrently. Channel and PTY failures are
    /// [`SshRunError::Session`] errors with no command attached.
    pub async fn new_session(&self) -> Result<Session> {
        let client = {
            let guard = self.client.lock().await;
            guard.as_ref().cloned().ok_or(SshRunError::ConnectionClosed)?
        };

        let channel = client
            .channel_open_session()
            .await
            .map_err(|e| SshRunError::session("", format!("channel open failed: {}", e)))?;

        channel
            .request_pty(true, PTY_TERM, PTY_COLUMNS, PTY_ROWS, 0, 0, PTY_MODES)
            .await
            .map_err(|e| SshRunError::session("", format!("pty request failed: {}", e)))?;

        debug!("Opened session on {}", self.endpoint);

        Ok(Session { channel })
    }

    /// Run `command` and capture its output.
    ///
    /// Elevation prompts are answered with `host.password`. Closing the
    /// connection while this runs ends it with [`SshRunError::Interrupted`].
    pub async fn exec(&self, host: &HostRecord, command: &str) -> Result<ExecOutput> {
        let command = sanitize_command(command)?;

        let mut session = self
            .new_session()
            .await
            .map_err(|e| session_error(command, e))?;

        debug!("Executing on {}: {}", self.endpoint, command);

        let cancel = self.cancel.child_token();
        let result = execute(&mut session, host, command, &self.options, &cancel).await;
        session.close().await;
        result
    }

    /// Run `command`, forwarding `stdin` and streaming output to the writers.
    ///
    /// Returns the exit code, 0 on success.
    pub async fn pipe_exec<R, W, E>(
        &self,
        host: &HostRecord,
        command: &str,
        stdin: R,
        stdout: W,
        stderr: E,
    ) -> Result<i32>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
        E: AsyncWrite + Unpin + Send,
    {
        let command = sanitize_command(command)?;

        let mut session = self
            .new_session()
            .await
            .map_err(|e| session_error(command, e))?;

        let cancel = self.cancel.child_token();
        let result = execute_piped(
            &mut session,
            host,
            command,
            &self.options,
            &cancel,
            stdin,
            stdout,
            stderr,
        )
        .await;
        session.close().await;
        result
    }

    /// Close the SSH connection. Calling it again is a no-op.
    ///
    /// The handle is taken under the lock; the disconnect itself runs after
    /// the lock is released.
    pub async fn close(&self) {
        let client = {
            let mut guard = self.client.lock().await;
            let Some(client) = guard.take() else {
                debug!("Connection to {} already closed", self.endpoint);
                return;
            };
            self.cancel.cancel();
            client
        };

        if let Err(e) = client
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            debug!("Disconnect from {} failed: {}", self.endpoint, e);
        }

        info!("SSH connection to {} closed", self.endpoint);
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.endpoint)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

/// One command channel with a pseudo-terminal attached
pub struct Session {
    channel: Channel<client::Msg>,
}

#[async_trait]
impl ExecChannel for Session {
    async fn start(&mut self, command: &str) -> std::io::Result<()> {
        self.channel
            .exec(true, command)
            .await
            .map_err(std::io::Error::other)
    }

    async fn next_event(&mut self) -> Option<ChannelEvent> {
        loop {
            if let Some(event) = channel_event(self.channel.wait().await?) {
                return Some(event);
            }
        }
    }

    async fn write(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.channel.data(data).await.map_err(std::io::Error::other)
    }

    async fn send_eof(&mut self) -> std::io::Result<()> {
        self.channel.eof().await.map_err(std::io::Error::other)
    }

    async fn close(&mut self) {
        let _ = self.channel.close().await;
    }
}

/// Map a russh channel message to an executor event; others are skipped
fn channel_event(msg: ChannelMsg) -> Option<ChannelEvent> {
    let event = match msg {
        ChannelMsg::Data { data } => ChannelEvent::Data(data.to_vec()),
        ChannelMsg::ExtendedData { data, .. } => ChannelEvent::ExtendedData(data.to_vec()),
        ChannelMsg::ExitStatus { exit_status } => ChannelEvent::ExitStatus(exit_status),
        ChannelMsg::ExitSignal { signal_name, .. } => {
            ChannelEvent::ExitSignal(format!("{:?}", signal_name))
        }
        ChannelMsg::Eof => ChannelEvent::Eof,
        ChannelMsg::Close => ChannelEvent::Close,
        _ => return None,
    };
    Some(event)
}

#[cfg(test)]
impl Connection {
    /// A connection whose transport is already gone
    fn closed(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            client: Mutex::new(None),
            cancel: CancellationToken::new(),
            options: ExecOptions::default(),
        }
    }
}
