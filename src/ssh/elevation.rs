//! Privilege elevation prompt handling
//!
//! Remote commands such as `sudo` ask for a password on their output stream.
//! [`PromptMatcher`] watches the current output line and reports when a
//! password should be written back; [`strip_sudo_prompt`] removes the prompt
//! echo from captured output afterwards.

/// Prompt prefixes answered by default
pub const DEFAULT_PROMPT_PATTERNS: &[&str] = &["[sudo] password for ", "Password"];

/// A line that ends with this suffix is waiting for input
pub const PROMPT_SUFFIX: &str = ": ";

/// Detects elevation prompts in a byte stream.
///
/// Detection is a textual heuristic: a line must start with one of the
/// configured patterns and currently end with [`PROMPT_SUFFIX`]. A prompt
/// that differs from every pattern is never answered.
#[derive(Debug, Clone)]
pub struct PromptMatcher {
    patterns: Vec<String>,
    line: Vec<u8>,
}

impl Default for PromptMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_PROMPT_PATTERNS.iter().map(|p| p.to_string()))
    }
}

impl PromptMatcher {
    /// Create a matcher for the given prompt prefixes
    pub fn new(patterns: impl IntoIterator<Item = String>) -> Self {
        Self {
            patterns: patterns.into_iter().filter(|p| !p.is_empty()).collect(),
            line: Vec::new(),
        }
    }

    /// Prompt prefixes this matcher recognizes
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Feed one output byte.
    ///
    /// Returns `true` when the current line now looks like a password prompt.
    pub fn push(&mut self, byte: u8) -> bool {
        if byte == b'\n' {
            self.line.clear();
            return false;
        }

        self.line.push(byte);
        self.is_prompt()
    }

    /// Forget the current line
    pub fn reset(&mut self) {
        self.line.clear();
    }

    fn is_prompt(&self) -> bool {
        self.line.ends_with(PROMPT_SUFFIX.as_bytes())
            && self
                .patterns
                .iter()
                .any(|p| self.line.starts_with(p.as_bytes()))
    }
}

/// Removes the leading `[sudo] password for <user>:` echo, then trims.
///
/// # Examples
///
/// ```
/// use sshrun::ssh::elevation::strip_sudo_prompt;
///
/// assert_eq!(strip_sudo_prompt("[sudo] password for root: \nok\n", "root"), "ok");
/// assert_eq!(strip_sudo_prompt("  plain  ", "root"), "plain");
/// ```
pub fn strip_sudo_prompt(output: &str, user: &str) -> String {
    let prefix = format!("[sudo] password for {}:", user);
    output
        .strip_prefix(prefix.as_str())
        .unwrap_or(output)
        .trim()
        .to_string()
}

/// Line written to the remote side in answer to a prompt
pub fn password_reply(password: &str) -> Vec<u8> {
    format!("{}\n", password).into_bytes()
}
