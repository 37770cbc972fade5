//! Error types for sshrun

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Exit code reported when the remote command's real status is unknown
pub const UNKNOWN_EXIT_CODE: i32 = -1;

/// Main error type for sshrun
#[derive(Debug, Error)]
pub enum SshRunError {
    /// A required connection field is empty
    #[error("No {0} specified for SSH connection")]
    MissingField(&'static str),

    /// Neither a password nor a private key was supplied
    #[error("Must specify at least one of password, private key")]
    MissingCredential,

    /// The private key file could not be read
    #[error("Failed to read keyfile {path:?}: {source}")]
    KeyRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The private key material could not be parsed
    #[error("The given SSH key could not be parsed: {0}")]
    AuthKeyParse(String),

    /// TCP connect, handshake or authentication failed
    #[error("could not establish connection to {endpoint}: {reason}")]
    Dial { endpoint: String, reason: String },

    /// The connection was closed before the operation
    #[error("connection closed")]
    ConnectionClosed,

    /// No channel could be opened for the command
    #[error("failed to get SSH session for command {command:?}: {reason}")]
    Session { command: String, reason: String },

    /// The command was empty after trimming
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// The remote command finished with a non-zero or unknown status
    #[error("Failed to exec command: {command} (exit status {exit_code})\n{output}")]
    AbnormalExit {
        command: String,
        output: String,
        exit_code: i32,
    },

    /// The command did not finish within the execution timeout
    #[error("Command timed out after {timeout:?}: {command}\n{output}")]
    Timeout {
        command: String,
        output: String,
        timeout: Duration,
    },

    /// The connection was closed while the command was running
    #[error("connection closed while running command: {command}\n{output}")]
    Interrupted { command: String, output: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Inventory file could not be parsed
    #[error("Inventory parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type alias using SshRunError
pub type Result<T> = std::result::Result<T, SshRunError>;

impl SshRunError {
    /// Create a dial error for an endpoint
    pub fn dial(endpoint: impl Into<String>, reason: impl ToString) -> Self {
        SshRunError::Dial {
            endpoint: endpoint.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a session error for a command
    pub fn session(command: impl Into<String>, reason: impl ToString) -> Self {
        SshRunError::Session {
            command: command.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        SshRunError::Config(msg.into())
    }

    /// Exit code to report for this failure.
    ///
    /// Remote-reported statuses are passed through; every other failure maps
    /// to [`UNKNOWN_EXIT_CODE`].
    pub fn exit_code(&self) -> i32 {
        match self {
            SshRunError::AbnormalExit { exit_code, .. } => *exit_code,
            _ => UNKNOWN_EXIT_CODE,
        }
    }

    /// Output captured before the failure, if the command got that far
    pub fn output(&self) -> Option<&str> {
        match self {
            SshRunError::AbnormalExit { output, .. }
            | SshRunError::Timeout { output, .. }
            | SshRunError::Interrupted { output, .. } => Some(output),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SshRunError::MissingField("username");
        assert_eq!(err.to_string(), "No username specified for SSH connection");

        let err = SshRunError::dial("10.0.0.1:22", "connection refused");
        assert_eq!(
            err.to_string(),
            "could not establish connection to 10.0.0.1:22: connection refused"
        );
    }

    #[test]
    fn test_abnormal_exit_embeds_command_and_output() {
        let err = SshRunError::AbnormalExit {
            command: "ls /nope".to_string(),
            output: "ls: cannot access '/nope'".to_string(),
            exit_code: 2,
        };
        let msg = err.to_string();
        assert!(msg.contains("ls /nope"));
        assert!(msg.contains("cannot access"));
        assert_eq!(err.exit_code(), 2);
        assert_eq!(err.output(), Some("ls: cannot access '/nope'"));
    }

    #[test]
    fn test_exit_code_sentinel() {
        assert_eq!(SshRunError::ConnectionClosed.exit_code(), UNKNOWN_EXIT_CODE);
        assert_eq!(SshRunError::MissingCredential.exit_code(), -1);
        assert!(SshRunError::ConnectionClosed.output().is_none());
    }
}
