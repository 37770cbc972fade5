//! SSH connector
//!
//! Connection establishment and authentication, per-command sessions,
//! streaming execution with elevation prompt answering, and teardown.

pub mod command;
pub mod config;
pub mod connection;
pub mod elevation;
pub mod handler;
pub mod sanitize;

// Re-exports
pub use command::{ChannelEvent, ExecChannel, ExecOptions, ExecOutput};
pub use config::{ConnectionConfig, HostKeyPolicy};
pub use connection::{Connection, Session};
pub use elevation::{strip_sudo_prompt, PromptMatcher};
pub use handler::SshHandler;
pub use sanitize::sanitize_command;
