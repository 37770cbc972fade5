//! Command execution over an SSH channel
//!
//! The executor drives one remote command on one channel: it starts the
//! command, streams output byte by byte through a [`PromptMatcher`] so
//! elevation prompts get the host password written back, and resolves the
//! exit status once the channel closes.
//!
//! The channel itself sits behind [`ExecChannel`], implemented for real SSH
//! sessions in [`super::connection`].

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::elevation::{password_reply, strip_sudo_prompt, PromptMatcher, DEFAULT_PROMPT_PATTERNS};
use crate::config::HostRecord;
use crate::error::{Result, SshRunError, UNKNOWN_EXIT_CODE};

/// One message received on a command channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Bytes on the command's output stream
    Data(Vec<u8>),
    /// Bytes on the extended (stderr) stream
    ExtendedData(Vec<u8>),
    /// The remote side reported an exit status
    ExitStatus(u32),
    /// The remote command was killed by a signal
    ExitSignal(String),
    /// No more output will follow
    Eof,
    /// The channel is closed
    Close,
}

/// A channel able to run exactly one remote command
#[async_trait]
pub trait ExecChannel: Send {
    /// Start `command` without waiting for it to finish
    async fn start(&mut self, command: &str) -> std::io::Result<()>;

    /// Next event, or `None` once the channel is gone
    async fn next_event(&mut self) -> Option<ChannelEvent>;

    /// Write bytes to the command's input stream
    async fn write(&mut self, data: &[u8]) -> std::io::Result<()>;

    /// Signal end of input
    async fn send_eof(&mut self) -> std::io::Result<()>;

    /// Release the channel
    async fn close(&mut self);
}

/// Per-execution options
#[derive(Debug, Clone)]
pub struct ExecOptions {
    /// Prompt prefixes answered with the host password
    pub prompt_patterns: Vec<String>,

    /// Upper bound on the whole execution (None = wait indefinitely)
    pub timeout: Option<Duration>,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            prompt_patterns: DEFAULT_PROMPT_PATTERNS.iter().map(|p| p.to_string()).collect(),
            timeout: None,
        }
    }
}

impl ExecOptions {
    /// Set the execution timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Add a prompt prefix to answer
    pub fn with_prompt_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.prompt_patterns.push(pattern.into());
        self
    }
}

/// Output of a successful command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Captured output, sudo prompt echo stripped and trimmed
    pub output: String,

    /// Exit code (always 0 for a successful command)
    pub exit_code: i32,
}

/// How the remote command ended, as far as the channel told us
#[derive(Debug, Clone, Default, PartialEq, Eq)]
enum Completion {
    #[default]
    Unknown,
    Status(u32),
    Signal(String),
}

impl Completion {
    fn exit_code(&self) -> i32 {
        match self {
            Completion::Status(status) => i32::try_from(*status).unwrap_or(UNKNOWN_EXIT_CODE),
            Completion::Unknown | Completion::Signal(_) => UNKNOWN_EXIT_CODE,
        }
    }
}

enum Finish {
    Closed,
    Cancelled,
    TimedOut(Duration),
}

enum Step {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
    Finished(Finish),
}

/// Reads channel events and answers prompts while the output is streaming
struct Driver<'a, C: ExecChannel + ?Sized> {
    channel: &'a mut C,
    matcher: PromptMatcher,
    reply: Vec<u8>,
    cancel: &'a CancellationToken,
    timeout: Option<Duration>,
    deadline: Option<Instant>,
    /// Prompts are answered only while streaming
    streaming: bool,
    /// Output is kept only while capturing
    capturing: bool,
    completion: Completion,
}

impl<'a, C: ExecChannel + ?Sized> Driver<'a, C> {
    fn new(
        channel: &'a mut C,
        host: &HostRecord,
        options: &ExecOptions,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            channel,
            matcher: PromptMatcher::new(options.prompt_patterns.iter().cloned()),
            reply: password_reply(&host.password),
            cancel,
            timeout: options.timeout,
            deadline: options.timeout.map(|t| Instant::now() + t),
            streaming: true,
            capturing: true,
            completion: Completion::default(),
        }
    }

    async fn step(&mut self) -> Step {
        loop {
            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Step::Finished(Finish::Cancelled),
                _ = sleep_until(self.deadline) => {
                    return Step::Finished(Finish::TimedOut(self.timeout.unwrap_or_default()))
                }
                event = self.channel.next_event() => event,
            };

            match event {
                None | Some(ChannelEvent::Close) => return Step::Finished(Finish::Closed),
                Some(ChannelEvent::Eof) => self.streaming = false,
                Some(ChannelEvent::ExitStatus(status)) => {
                    self.completion = Completion::Status(status)
                }
                Some(ChannelEvent::ExitSignal(signal)) => {
                    self.completion = Completion::Signal(signal)
                }
                // Drained for the exit status only
                Some(ChannelEvent::Data(_)) | Some(ChannelEvent::ExtendedData(_))
                    if !self.capturing => {}
                Some(ChannelEvent::Data(mut data)) => {
                    if self.streaming {
                        if let Some(end) = self.answer_prompts(&data).await {
                            data.truncate(end + 1);
                        }
                    }
                    return Step::Stdout(data);
                }
                Some(ChannelEvent::ExtendedData(data)) => return Step::Stderr(data),
            }
        }
    }

    /// Answer every prompt completed by `data`.
    ///
    /// Returns the index of the prompt byte whose answer could not be
    /// written. Streaming and capture both end there.
    async fn answer_prompts(&mut self, data: &[u8]) -> Option<usize> {
        for (idx, &byte) in data.iter().enumerate() {
            if !self.matcher.push(byte) {
                continue;
            }

            debug!("Elevation prompt detected, sending password");
            if let Err(e) = self.channel.write(&self.reply).await {
                warn!("Failed to answer elevation prompt: {}", e);
                self.streaming = false;
                self.capturing = false;
                return Some(idx);
            }
        }

        None
    }

    /// Turn the way the channel ended into an exit code or an error
    fn resolve(&self, finish: Finish, command: &str, output: String) -> Result<i32> {
        match finish {
            Finish::Cancelled => Err(SshRunError::Interrupted {
                command: command.to_string(),
                output,
            }),
            Finish::TimedOut(timeout) => Err(SshRunError::Timeout {
                command: command.to_string(),
                output,
                timeout,
            }),
            Finish::Closed => match &self.completion {
                Completion::Status(0) => Ok(0),
                completion => {
                    if let Completion::Signal(signal) = completion {
                        debug!("Command killed by signal {}", signal);
                    }
                    Err(SshRunError::AbnormalExit {
                        command: command.to_string(),
                        output,
                        exit_code: completion.exit_code(),
                    })
                }
            },
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Run `command` on `channel` and collect its output.
///
/// Output (both streams) is captured in arrival order. Elevation prompts are
/// answered with `host.password`. Any non-zero or unknown exit status is
/// returned as [`SshRunError::AbnormalExit`] carrying the captured output.
pub async fn execute<C>(
    channel: &mut C,
    host: &HostRecord,
    command: &str,
    options: &ExecOptions,
    cancel: &CancellationToken,
) -> Result<ExecOutput>
where
    C: ExecChannel + ?Sized,
{
    channel
        .start(command)
        .await
        .map_err(|e| SshRunError::session(command, e))?;

    let mut driver = Driver::new(channel, host, options, cancel);
    let mut captured = Vec::new();

    let finish = loop {
        match driver.step().await {
            Step::Stdout(data) | Step::Stderr(data) => captured.extend_from_slice(&data),
            Step::Finished(finish) => break finish,
        }
    };

    let output = strip_sudo_prompt(&String::from_utf8_lossy(&captured), &host.user);
    debug!(
        "Command finished on {}: output_len={}",
        host.address,
        output.len()
    );

    let exit_code = driver.resolve(finish, command, output.clone())?;
    Ok(ExecOutput { output, exit_code })
}

/// Run `command` on `channel`, streaming instead of capturing.
///
/// `stdin` is read to the end and forwarded before EOF is sent. Output is
/// written to `stdout`, extended data to `stderr`, as it arrives. Prompts are
/// answered as in [`execute`].
#[allow(clippy::too_many_arguments)]
pub async fn execute_piped<C, R, W, E>(
    channel: &mut C,
    host: &HostRecord,
    command: &str,
    options: &ExecOptions,
    cancel: &CancellationToken,
    mut stdin: R,
    mut stdout: W,
    mut stderr: E,
) -> Result<i32>
where
    C: ExecChannel + ?Sized,
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
    E: AsyncWrite + Unpin + Send,
{
    channel
        .start(command)
        .await
        .map_err(|e| SshRunError::session(command, e))?;

    let mut input = Vec::new();
    stdin.read_to_end(&mut input).await?;
    if !input.is_empty() {
        channel
            .write(&input)
            .await
            .map_err(|e| SshRunError::session(command, e))?;
    }
    channel
        .send_eof()
        .await
        .map_err(|e| SshRunError::session(command, e))?;

    let mut driver = Driver::new(channel, host, options, cancel);

    let finish = loop {
        match driver.step().await {
            Step::Stdout(data) => stdout.write_all(&data).await?,
            Step::Stderr(data) => stderr.write_all(&data).await?,
            Step::Finished(finish) => break finish,
        }
    };

    stdout.flush().await?;
    stderr.flush().await?;

    driver.resolve(finish, command, String::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Scripted channel replaying a fixed list of events
    #[derive(Debug, Default)]
    struct FakeChannel {
        pub events: VecDeque<ChannelEvent>,
        pub started: Option<String>,
        pub fail_start: bool,
        pub fail_write: bool,
        /// (events delivered so far, bytes written)
        pub writes: Vec<(usize, Vec<u8>)>,
        pub delivered: usize,
        pub eof_sent: bool,
        pub closed: bool,
        /// Block forever once the script runs out
        pub hang: bool,
    }

    impl FakeChannel {
        pub fn new(events: impl IntoIterator<Item = ChannelEvent>) -> Self {
            Self {
                events: events.into_iter().collect(),
                ..Default::default()
            }
        }

        pub fn finished(output: &str, status: u32) -> Self {
            Self::new([
                ChannelEvent::Data(output.as_bytes().to_vec()),
                ChannelEvent::Eof,
                ChannelEvent::ExitStatus(status),
                ChannelEvent::Close,
            ])
        }

        pub fn written(&self) -> Vec<u8> {
            self.writes.iter().flat_map(|(_, w)| w.clone()).collect()
        }
    }

    #[async_trait]
    impl ExecChannel for FakeChannel {
        async fn start(&mut self, command: &str) -> std::io::Result<()> {
            if self.fail_start {
                return Err(std::io::Error::other("exec request rejected"));
            }
            self.started = Some(command.to_string());
            Ok(())
        }

        async fn next_event(&mut self) -> Option<ChannelEvent> {
            match self.events.pop_front() {
                Some(event) => {
                    self.delivered += 1;
                    Some(event)
                }
                None if self.hang => std::future::pending().await,
                None => None,
            }
        }

        async fn write(&mut self, data: &[u8]) -> std::io::Result<()> {
            if self.fail_write {
                return Err(std::io::Error::other("broken pipe"));
            }
            self.writes.push((self.delivered, data.to_vec()));
            Ok(())
        }

        async fn send_eof(&mut self) -> std::io::Result<()> {
            self.eof_sent = true;
            Ok(())
        }

        async fn close(&mut self) {
            self.closed = true;
        }
    }

    fn host() -> HostRecord {
        HostRecord {
            name: "web-1".to_string(),
            address: "10.0.0.5".to_string(),
            user: "root".to_string(),
            password: "pw".to_string(),
            ..Default::default()
        }
    }

    async fn run(channel: &mut FakeChannel, command: &str) -> Result<ExecOutput> {
        execute(
            channel,
            &host(),
            command,
            &ExecOptions::default(),
            &CancellationToken::new(),
        )
        .await
    }

    #[tokio::test]
    async fn test_exec_simple_output() {
        let mut channel = FakeChannel::finished("hi\n", 0);
        let result = run(&mut channel, "echo hi").await.unwrap();

        assert_eq!(
            result,
            ExecOutput {
                output: "hi".to_string(),
                exit_code: 0
            }
        );
        assert_eq!(channel.started.as_deref(), Some("echo hi"));
        assert!(channel.writes.is_empty());
    }

    #[tokio::test]
    async fn test_exec_no_output() {
        let mut channel = FakeChannel::new([ChannelEvent::ExitStatus(0), ChannelEvent::Close]);
        let result = run(&mut channel, "true").await.unwrap();
        assert_eq!(result.output, "");
        assert_eq!(result.exit_code, 0);
    }

    #[tokio::test]
    async fn test_exec_answers_sudo_prompt() {
        let mut channel = FakeChannel::new([
            ChannelEvent::Data(b"[sudo] password for root: ".to_vec()),
            ChannelEvent::Data(b"\r\nLinux box 6.1\r\n".to_vec()),
            ChannelEvent::Eof,
            ChannelEvent::ExitStatus(0),
            ChannelEvent::Close,
        ]);

        let result = run(&mut channel, "sudo uname -a").await.unwrap();

        assert_eq!(channel.writes, vec![(1, b"pw\n".to_vec())]);
        assert_eq!(result.output, "Linux box 6.1");
    }

    #[tokio::test]
    async fn test_exec_prompt_split_across_chunks() {
        let mut channel = FakeChannel::new([
            ChannelEvent::Data(b"Pass".to_vec()),
            ChannelEvent::Data(b"word:".to_vec()),
            ChannelEvent::Data(b" ".to_vec()),
            ChannelEvent::Data(b"\nok\n".to_vec()),
            ChannelEvent::ExitStatus(0),
            ChannelEvent::Close,
        ]);

        let result = run(&mut channel, "su -c id").await.unwrap();

        // Written only once the trailing space arrived
        assert_eq!(channel.writes, vec![(3, b"pw\n".to_vec())]);
        assert_eq!(result.output, "Password: \nok");
    }

    #[tokio::test]
    async fn test_exec_unknown_prompt_not_answered() {
        let mut channel = FakeChannel::finished("Enter passphrase: ", 1);
        let err = run(&mut channel, "ssh-add").await.unwrap_err();
        assert!(channel.writes.is_empty());
        assert_eq!(err.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_exec_custom_prompt_pattern() {
        let mut channel = FakeChannel::finished("Enter passphrase: ", 0);
        let options = ExecOptions::default().with_prompt_pattern("Enter passphrase");

        execute(
            &mut channel,
            &host(),
            "ssh-add",
            &options,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(channel.written(), b"pw\n".to_vec());
    }

    #[tokio::test]
    async fn test_exec_nonzero_exit() {
        let mut channel = FakeChannel::finished("ls: cannot access '/nope'\n", 2);
        let err = run(&mut channel, "ls /nope").await.unwrap_err();

        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("ls /nope"));
        assert_eq!(err.output(), Some("ls: cannot access '/nope'"));
    }

    #[tokio::test]
    async fn test_exec_signal_is_unknown_exit() {
        let mut channel = FakeChannel::new([
            ChannelEvent::Data(b"partial".to_vec()),
            ChannelEvent::ExitSignal("KILL".to_string()),
            ChannelEvent::Close,
        ]);
        let err = run(&mut channel, "sleep 100").await.unwrap_err();
        assert_eq!(err.exit_code(), UNKNOWN_EXIT_CODE);
        assert_eq!(err.output(), Some("partial"));
    }

    #[tokio::test]
    async fn test_exec_channel_lost_without_status() {
        let mut channel = FakeChannel::new([ChannelEvent::Data(b"x\n".to_vec())]);
        let err = run(&mut channel, "reboot").await.unwrap_err();
        assert!(matches!(
            err,
            SshRunError::AbnormalExit { exit_code: -1, .. }
        ));
    }

    #[tokio::test]
    async fn test_exec_start_failure_is_session_error() {
        let mut channel = FakeChannel {
            fail_start: true,
            ..Default::default()
        };
        let err = run(&mut channel, "uptime").await.unwrap_err();
        assert!(matches!(err, SshRunError::Session { ref command, .. } if command == "uptime"));
    }

    #[tokio::test]
    async fn test_exec_write_failure_stops_streaming() {
        let mut channel = FakeChannel::new([
            ChannelEvent::Data(b"Password: trailing".to_vec()),
            ChannelEvent::Data(b"\nPassword: ".to_vec()),
            ChannelEvent::ExtendedData(b"sudo: 1 incorrect password attempt".to_vec()),
            ChannelEvent::ExitStatus(1),
            ChannelEvent::Close,
        ]);
        channel.fail_write = true;

        let err = run(&mut channel, "sudo -k true").await.unwrap_err();

        // Capture ends at the unanswered prompt, the status is still read
        assert_eq!(err.output(), Some("Password:"));
        assert_eq!(err.exit_code(), 1);
        assert_eq!(channel.delivered, 5);
        assert!(channel.writes.is_empty());
    }

    #[tokio::test]
    async fn test_exec_timeout_keeps_partial_output() {
        let mut channel = FakeChannel::new([ChannelEvent::Data(b"Passcode: ".to_vec())]);
        channel.hang = true;
        let options = ExecOptions::default().with_timeout(Duration::from_millis(50));

        let err = execute(
            &mut channel,
            &host(),
            "read x",
            &options,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        match err {
            SshRunError::Timeout {
                output, timeout, ..
            } => {
                assert_eq!(output, "Passcode:");
                assert_eq!(timeout, Duration::from_millis(50));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_exec_cancelled() {
        let mut channel = FakeChannel::new([ChannelEvent::Data(b"working\n".to_vec())]);
        channel.hang = true;
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = execute(
            &mut channel,
            &host(),
            "tail -f log",
            &ExecOptions::default(),
            &cancel,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, SshRunError::Interrupted { ref output, .. } if output == "working"));
    }

    #[tokio::test]
    async fn test_piped_exec_streams_both_outputs() {
        let mut channel = FakeChannel::new([
            ChannelEvent::Data(b"out".to_vec()),
            ChannelEvent::ExtendedData(b"err".to_vec()),
            ChannelEvent::Eof,
            ChannelEvent::ExitStatus(0),
            ChannelEvent::Close,
        ]);
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        let code = execute_piped(
            &mut channel,
            &host(),
            "cat",
            &ExecOptions::default(),
            &CancellationToken::new(),
            &b"input"[..],
            &mut stdout,
            &mut stderr,
        )
        .await
        .unwrap();

        assert_eq!(code, 0);
        assert_eq!(stdout, b"out");
        assert_eq!(stderr, b"err");
        assert_eq!(channel.written(), b"input".to_vec());
        assert!(channel.eof_sent);
    }

    #[tokio::test]
    async fn test_piped_exec_exit_status() {
        let mut channel = FakeChannel::finished("", 3);
        let mut stdout = Vec::new();

        let err = execute_piped(
            &mut channel,
            &host(),
            "exit 3",
            &ExecOptions::default(),
            &CancellationToken::new(),
            tokio::io::empty(),
            &mut stdout,
            tokio::io::sink(),
        )
        .await
        .unwrap_err();

        assert_eq!(err.exit_code(), 3);
        assert!(channel.writes.is_empty());
    }
}
