//! Command sanitization
//!
//! Validates commands before they are sent to a remote host.

use crate::error::{Result, SshRunError};

/// Sanitize a command before execution
///
/// Trims surrounding whitespace and rejects commands that are empty
/// afterwards.
///
/// # Examples
/// ```
/// use sshrun::ssh::sanitize::sanitize_command;
///
/// let cmd = sanitize_command("  ls -la  ").unwrap();
/// assert_eq!(cmd, "ls -la");
///
/// assert!(sanitize_command("   ").is_err());
/// ```
pub fn sanitize_command(command: &str) -> Result<&str> {
    let trimmed = command.trim();

    if trimmed.is_empty() {
        return Err(SshRunError::InvalidCommand(
            "Command cannot be empty".to_string(),
        ));
    }

    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_command_valid() {
        assert_eq!(sanitize_command("ls -la").unwrap(), "ls -la");
    }

    #[test]
    fn test_sanitize_command_trims_whitespace() {
        assert_eq!(sanitize_command("  ls -la \n").unwrap(), "ls -la");
    }

    #[test]
    fn test_sanitize_command_empty() {
        let result = sanitize_command("");
        assert!(result.unwrap_err().to_string().contains("cannot be empty"));
    }

    #[test]
    fn test_sanitize_command_whitespace_only() {
        let result = sanitize_command(" \t ");
        assert!(matches!(result, Err(SshRunError::InvalidCommand(_))));
    }
}
