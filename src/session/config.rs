//! Process-wide session settings

use std::time::Duration;

use crate::net::ReadRequest;

/// Default cap on a command line, terminator excluded.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 1024;

/// Default idle timeout for any outstanding read.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Default number of bad commands tolerated before the session is dropped.
pub const DEFAULT_MAX_BAD_COMMANDS: usize = 30;

/// Settings shared read-only by every session of a server.
///
/// Built once at startup and handed to each session behind an `Arc`.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Name the server announces in greetings.
    pub host_name: String,
    pub max_line_length: usize,
    pub idle_timeout: Duration,
    pub max_bad_commands: usize,
    /// Disable Nagle on accepted sockets.
    pub nodelay: bool,
}

impl ServerConfig {
    pub fn new(host_name: &str) -> Self {
        Self {
            host_name: host_name.to_owned(),
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_bad_commands: DEFAULT_MAX_BAD_COMMANDS,
            nodelay: true,
        }
    }

    pub fn with_max_line_length(mut self, max: usize) -> Self {
        self.max_line_length = max;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_max_bad_commands(mut self, max: usize) -> Self {
        self.max_bad_commands = max;
        self
    }

    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    /// The read issued while waiting for the next command.
    pub fn command_request(&self) -> ReadRequest {
        ReadRequest::line(self.max_line_length).with_idle_timeout(Some(self.idle_timeout))
    }

    /// Fill in the idle timeout of a protocol-supplied bulk read.
    pub fn bulk_request(&self, request: ReadRequest) -> ReadRequest {
        if request.idle_timeout.is_some() {
            request
        } else {
            request.with_idle_timeout(Some(self.idle_timeout))
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new("localhost")
    }
}
