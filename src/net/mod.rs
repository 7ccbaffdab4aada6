//! Buffered connections and incremental reads shared by every protocol

pub mod async_connection;
pub mod buffer;
pub mod connection;
pub mod dot;
pub mod error;
pub mod matcher;
pub mod reader;

pub use async_connection::{AsyncCloseHandle, AsyncConnection};
pub use connection::{BufferedConnection, CloseHandle, Transport};
pub use error::{NetError, ReadOutcome};
pub use matcher::TerminatorMatcher;
pub use reader::{BODY_TERMINATOR, LINE_TERMINATOR, ReadKind, ReadRequest};
