//! Generic session lifecycle for line protocols
//!
//! A [`Protocol`] supplies the hooks; the drivers in [`blocking`] and
//! [`driver`] own the connection and run the accept, greet, command,
//! bulk-read and close cycle.

pub mod blocking;
pub mod config;
pub mod context;
pub mod driver;
pub mod protocol;
pub mod server;

pub use config::ServerConfig;
pub use context::{Activity, SessionContext, SessionPhase};
pub use protocol::{Bulk, Next, Outbox, Protocol};
pub use server::{Server, serve_blocking};
