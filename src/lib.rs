//! # MogiWire
//!
//! MogiWire is the connection layer for line-oriented text protocols
//! (SMTP, POP3, IMAP, FTP control).
//!
//! It provides buffered connections with push-back, incremental reads that
//! stop at an arbitrary terminator or after an exact byte count, dot-stuffing
//! for "."-framed bodies, and a session loop that a protocol plugs into
//! through a small set of hooks. Both blocking (`std::net`) and tokio
//! connections are supported.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mogiwire::SmtpServer;
//! use std::sync::mpsc;
//! use std::thread;
//! use std::time::Duration;
//!
//! // Create and start server
//! let (tx, rx) = mpsc::channel();
//! let server = SmtpServer::new("test.local");
//!
//! thread::spawn(move || {
//!     server.start("127.0.0.1:2525", tx).unwrap();
//! });
//!
//! // Application sends email to localhost:2525
//! // ...
//!
//! // Check the contents of the sent email
//! if let Ok(email) = rx.recv_timeout(Duration::from_millis(100)) {
//!   println!("Received email from: {}", email.from);
//! }
//! ```
//!
//! ## Reading from a connection
//!
//! ```rust,no_run
//! use mogiwire::net::{BufferedConnection, ReadRequest};
//!
//! let mut conn = BufferedConnection::connect("127.0.0.1:110").unwrap();
//! let greeting = conn.read(&ReadRequest::line(512)).into_result().unwrap();
//! conn.send_all(b"LIST\r\n").unwrap();
//! let listing = conn.read(&ReadRequest::dot_body(1 << 20)).into_result().unwrap();
//! let listing = mogiwire::net::dot::decode(&listing);
//! ```
//!
//! ## Modules
//!
//! - [`net`] - connections, terminator/count reads, dot-stuffing
//! - [`session`] - the `Protocol` hooks, session drivers and listeners
//! - [`smtp`] - an SMTP receiver and client built on the two above
//!
//! ## SMTP commands
//!
//! `HELO`, `MAIL FROM`, `RCPT TO`, `DATA`, `BDAT`, `RSET`, `NOOP` and
//! `QUIT`. Enabling the `ehlo` feature also allows `EHLO`.
//!
//! ## Notes
//!
//! - Runs in-memory only. Email persistence is not supported.
//! - SMTP authentication is not supported.
//! - SSL/TLS connection is not supported.
//! - Mail relay is not supported.

pub mod net;
pub mod session;
pub mod smtp;

pub use net::{BufferedConnection, NetError, ReadOutcome, ReadRequest};
pub use session::{Protocol, ServerConfig};
pub use smtp::{
    Email, SmtpClient, SmtpConfig, SmtpError, SmtpLimits, SmtpResponse, SmtpServer, SmtpSession,
    SmtpState,
};
