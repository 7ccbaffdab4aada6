//! Read outcomes and transport errors

use std::io;

use thiserror::Error;

/// Errors surfaced by connection operations.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Idle timeout elapsed")]
    TimedOut,

    #[error("Maximum read length exceeded")]
    LengthExceeded,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Terminal result of a single read request.
///
/// The variants are mutually exclusive; every read produces exactly one.
#[derive(Debug)]
pub enum ReadOutcome {
    /// The read completed. `data` holds the payload without its terminator
    /// (empty when the payload was streamed into an external sink) and
    /// `length` the number of bytes consumed from the connection.
    Ok { data: Vec<u8>, length: usize },
    /// The payload exceeded the length cap. The connection has already been
    /// advanced past the end of the oversized unit.
    LengthExceeded,
    /// No data arrived within the idle timeout.
    TimedOut,
    /// The peer closed the connection, or it was closed locally.
    ConnectionClosed,
    /// Transport failure.
    Error(io::Error),
}

impl ReadOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, ReadOutcome::Ok { .. })
    }

    /// Whether the session can continue after this outcome.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ReadOutcome::Ok { .. } | ReadOutcome::LengthExceeded)
    }

    /// Convert into a `Result`, keeping only the payload.
    pub fn into_result(self) -> Result<Vec<u8>, NetError> {
        match self {
            ReadOutcome::Ok { data, .. } => Ok(data),
            ReadOutcome::LengthExceeded => Err(NetError::LengthExceeded),
            ReadOutcome::TimedOut => Err(NetError::TimedOut),
            ReadOutcome::ConnectionClosed => Err(NetError::ConnectionClosed),
            ReadOutcome::Error(e) => Err(NetError::Io(e)),
        }
    }

    /// Map a transport error to the matching outcome.
    pub(crate) fn from_io(error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => ReadOutcome::TimedOut,
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected => ReadOutcome::ConnectionClosed,
            _ => ReadOutcome::Error(error),
        }
    }
}

impl NetError {
    /// Map a write error, folding peer resets into `ConnectionClosed`.
    pub(crate) fn from_send(error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected => NetError::ConnectionClosed,
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => NetError::TimedOut,
            _ => NetError::Io(error),
        }
    }
}
