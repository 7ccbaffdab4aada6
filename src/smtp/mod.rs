//! Minimal SMTP receiver and client on the session loop

pub mod client;
pub mod commands;
pub mod email;
pub mod error;
pub mod protocol;
pub mod response;
pub mod server;
pub mod session;

pub use client::SmtpClient;
pub use commands::{CommandAction, SmtpCommandHandler};
pub use email::Email;
pub use error::{SmtpConfig, SmtpError, SmtpLimits};
pub use protocol::SmtpProtocol;
pub use response::SmtpResponse;
pub use server::SmtpServer;
pub use session::{SmtpSession, SmtpState};
