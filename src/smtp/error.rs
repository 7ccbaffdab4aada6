//! Error types and limits for the SMTP receiver and client

use thiserror::Error;

use crate::net::NetError;

#[derive(Error, Debug)]
pub enum SmtpError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection error: {0}")]
    Net(#[from] NetError),

    #[error("Invalid command")]
    InvalidCommand,

    #[error("Invalid state for command")]
    InvalidState(String),

    #[error("Invalid syntax")]
    InvalidSyntax(String),

    #[error("Line too long (max {max} characters)")]
    LineTooLong { max: usize },

    #[error("Path too long (max {max} characters)")]
    PathTooLong { max: usize },

    #[error("Too many recipients (max {max})")]
    TooManyRecipients { max: usize },

    #[error("Too much mail data (max {max} bytes)")]
    TooMuchData { max: usize },

    #[error("Domain name too long (max {max} characters)")]
    DomainTooLong { max: usize },

    #[error("User name too long (max {max} characters)")]
    UserTooLong { max: usize },

    #[error("Unexpected reply {code} {message}")]
    UnexpectedReply { code: String, message: String },

    #[error("Malformed reply: {0}")]
    MalformedReply(String),
}

/// SMTP size limits as defined in RFC 821
pub struct SmtpLimits;

impl SmtpLimits {
    /// Maximum length of a user name
    pub const USER_MAX_LENGTH: usize = 64;

    /// Maximum length of a domain name
    pub const DOMAIN_MAX_LENGTH: usize = 64;

    /// Maximum length of a path (reverse-path or forward-path)
    pub const PATH_MAX_LENGTH: usize = 256;

    /// Maximum length of a command line including CRLF
    pub const COMMAND_LINE_MAX_LENGTH: usize = 512;

    /// Maximum length of a reply line including CRLF
    pub const REPLY_LINE_MAX_LENGTH: usize = 512;

    /// Maximum number of recipients per message
    pub const MAX_RECIPIENTS: usize = 100;

    /// Maximum total size of email data (reasonable limit for in-memory storage)
    pub const MAX_DATA_SIZE: usize = 10 * 1024 * 1024; // 10MB
}

/// Per-server SMTP settings
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    /// Largest message body accepted, after dot-unstuffing for DATA and
    /// summed over all chunks for BDAT
    pub max_message_size: usize,
    pub max_recipients: usize,
}

impl SmtpConfig {
    pub fn with_max_message_size(mut self, max: usize) -> Self {
        self.max_message_size = max;
        self
    }

    pub fn with_max_recipients(mut self, max: usize) -> Self {
        self.max_recipients = max;
        self
    }
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            max_message_size: SmtpLimits::MAX_DATA_SIZE,
            max_recipients: SmtpLimits::MAX_RECIPIENTS,
        }
    }
}

/// Maps SMTP errors to appropriate response codes
impl SmtpError {
    pub fn to_response_code(&self) -> &'static str {
        match self {
            SmtpError::Io(_) | SmtpError::Net(_) => "421",
            SmtpError::InvalidCommand => "500",
            SmtpError::InvalidState(_) => "503",
            SmtpError::InvalidSyntax(_) => "501",
            SmtpError::LineTooLong { .. } => "500",
            SmtpError::PathTooLong { .. } => "501",
            SmtpError::TooManyRecipients { .. } => "452",
            SmtpError::TooMuchData { .. } => "552",
            SmtpError::DomainTooLong { .. } => "501",
            SmtpError::UserTooLong { .. } => "501",
            SmtpError::UnexpectedReply { .. } | SmtpError::MalformedReply(_) => "500",
        }
    }

    pub fn to_response_message(&self) -> String {
        match self {
            SmtpError::Io(_) | SmtpError::Net(_) => "Service not available".to_string(),
            SmtpError::InvalidCommand => "Syntax error, command unrecognized".to_string(),
            SmtpError::InvalidState(msg) => format!("Bad sequence of commands: {msg}"),
            SmtpError::InvalidSyntax(msg) => format!("Syntax error: {msg}"),
            SmtpError::LineTooLong { max } => format!("Line too long (max {max} characters)"),
            SmtpError::PathTooLong { max } => format!("Path too long (max {max} characters)"),
            SmtpError::TooManyRecipients { max } => format!("Too many recipients (max {max})"),
            SmtpError::TooMuchData { max } => format!("Too much mail data (max {max} bytes)"),
            SmtpError::DomainTooLong { max } => {
                format!("Domain name too long (max {max} characters)")
            }
            SmtpError::UserTooLong { max } => {
                format!("User name too long (max {max} characters)")
            }
            other => other.to_string(),
        }
    }

    /// Whether the error counts against the session's bad-command budget
    pub fn is_bad_command(&self) -> bool {
        matches!(
            self,
            SmtpError::InvalidCommand | SmtpError::InvalidSyntax(_) | SmtpError::InvalidState(_)
        )
    }
}
