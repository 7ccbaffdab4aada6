//! The contract between the session loop and a line protocol

use tracing::{debug, info, trace, warn};

use crate::net::{ReadOutcome, ReadRequest};
use crate::session::config::ServerConfig;
use crate::session::context::{SessionContext, SessionPhase};

/// What the loop should do after a protocol hook returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Next {
    /// Wait for the next command line.
    Command,
    /// Issue this read and hand its result to [`Protocol::on_bulk`].
    Read(ReadRequest),
    /// Flush pending replies and end the session.
    Close,
}

/// Result of a protocol-requested read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Bulk {
    Data(Vec<u8>),
    /// The payload went over the request's cap and was discarded.
    LengthExceeded,
}

/// Replies queued by protocol hooks, flushed by the loop in order.
#[derive(Debug, Default)]
pub struct Outbox {
    buf: Vec<u8>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue raw bytes.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Queue `line` followed by CRLF.
    pub fn line(&mut self, line: &str) {
        self.buf.extend_from_slice(line.as_bytes());
        self.buf.extend_from_slice(b"\r\n");
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }
}

/// Hooks a line protocol implements to run on top of the session loop.
///
/// Hooks never touch the connection directly: they queue replies in the
/// [`Outbox`] and tell the loop what to read next.
pub trait Protocol {
    /// Decide whether to serve a new connection. Rejected connections are
    /// closed right after any queued reply is flushed.
    fn on_accept(&mut self, _ctx: &SessionContext, _out: &mut Outbox) -> bool {
        true
    }

    /// Queue the banner sent once the connection is accepted.
    fn greeting(&mut self, ctx: &SessionContext, out: &mut Outbox);

    /// Handle one command line, terminator stripped.
    fn on_command(&mut self, line: &[u8], ctx: &mut SessionContext, out: &mut Outbox) -> Next;

    /// Handle the result of a read requested with [`Next::Read`].
    fn on_bulk(
        &mut self,
        _request: &ReadRequest,
        _bulk: Bulk,
        _ctx: &mut SessionContext,
        _out: &mut Outbox,
    ) -> Next {
        Next::Command
    }

    /// A command line went over the configured cap. The loop keeps waiting
    /// for commands afterwards.
    fn on_line_too_long(&mut self, ctx: &mut SessionContext, out: &mut Outbox);

    /// The peer stayed idle too long. The session closes after this.
    fn on_session_timeout(&mut self, _ctx: &SessionContext, _out: &mut Outbox) {}

    /// Too many bad commands. The session closes after this.
    fn on_bad_command_threshold_exceeded(&mut self, _ctx: &SessionContext, _out: &mut Outbox) {}

    /// The session is ending, for whatever reason.
    fn on_close(&mut self, _ctx: &SessionContext) {}
}

/// The read the loop issues for `next`, or `None` when it should close.
pub(crate) fn request_for(next: &Next, config: &ServerConfig) -> Option<ReadRequest> {
    match next {
        Next::Command => Some(config.command_request()),
        Next::Read(request) => Some(config.bulk_request(request.clone())),
        Next::Close => None,
    }
}

/// Feed one read outcome to the protocol and work out the next step.
///
/// Shared by the blocking and async drivers. On return, `out` holds the
/// bytes to flush before acting on the result.
pub(crate) fn advance<P: Protocol + ?Sized>(
    protocol: &mut P,
    pending: Next,
    request: &ReadRequest,
    outcome: ReadOutcome,
    ctx: &mut SessionContext,
    out: &mut Outbox,
    config: &ServerConfig,
) -> Next {
    let next = match (pending, outcome) {
        (Next::Command, ReadOutcome::Ok { data, .. }) => {
            ctx.set_phase(SessionPhase::Dispatching);
            debug!(command = %String::from_utf8_lossy(&data), "command");
            protocol.on_command(&data, ctx, out)
        }
        (Next::Command, ReadOutcome::LengthExceeded) => {
            debug!(max = config.max_line_length, "command line too long");
            protocol.on_line_too_long(ctx, out);
            Next::Command
        }
        (Next::Read(_), ReadOutcome::Ok { data, length }) => {
            ctx.set_phase(SessionPhase::Dispatching);
            trace!(payload = data.len(), consumed = length, "bulk read complete");
            protocol.on_bulk(request, Bulk::Data(data), ctx, out)
        }
        (Next::Read(_), ReadOutcome::LengthExceeded) => {
            debug!(max = request.max_length, "bulk read too long");
            ctx.set_phase(SessionPhase::Dispatching);
            protocol.on_bulk(request, Bulk::LengthExceeded, ctx, out)
        }
        (_, ReadOutcome::TimedOut) => {
            info!(idle_ms = ctx.idle_for().as_millis() as u64, "session timed out");
            protocol.on_session_timeout(ctx, out);
            return Next::Close;
        }
        (_, ReadOutcome::ConnectionClosed) => {
            debug!("peer closed connection");
            out.clear();
            return Next::Close;
        }
        (_, ReadOutcome::Error(e)) => {
            warn!(error = %e, "transport error");
            out.clear();
            return Next::Close;
        }
        (Next::Close, _) => return Next::Close,
    };

    if ctx.bad_commands() > config.max_bad_commands {
        info!(bad_commands = ctx.bad_commands(), "too many bad commands");
        protocol.on_bad_command_threshold_exceeded(ctx, out);
        return Next::Close;
    }
    next
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Minimal protocol used to exercise the drivers.
    ///
    /// `ECHO x` replies `+x`, `BODY` reads a dot body, `BLOB n` reads `n`
    /// bytes, `QUIT` closes, anything else counts as a bad command.
    #[derive(Default)]
    pub struct EchoProtocol {
        pub accept: bool,
        pub bulks: Vec<Bulk>,
        pub timed_out: bool,
        pub closed: bool,
    }

    impl EchoProtocol {
        pub fn new() -> Self {
            Self {
                accept: true,
                ..Self::default()
            }
        }
    }

    impl Protocol for EchoProtocol {
        fn on_accept(&mut self, _ctx: &SessionContext, out: &mut Outbox) -> bool {
            if !self.accept {
                out.line("-ERR go away");
            }
            self.accept
        }

        fn greeting(&mut self, _ctx: &SessionContext, out: &mut Outbox) {
            out.line("+OK ready");
        }

        fn on_command(&mut self, line: &[u8], ctx: &mut SessionContext, out: &mut Outbox) -> Next {
            let line = String::from_utf8_lossy(line);
            let (verb, arg) = line.split_once(' ').unwrap_or((&line, ""));
            match verb {
                "ECHO" => {
                    out.line(&format!("+{arg}"));
                    Next::Command
                }
                "BODY" => {
                    out.line("+go");
                    Next::Read(ReadRequest::dot_body(64))
                }
                "BLOB" => match arg.parse() {
                    Ok(n) => Next::Read(ReadRequest::exact(n, 64, true)),
                    Err(_) => {
                        ctx.record_bad_command();
                        out.line("-ERR size");
                        Next::Command
                    }
                },
                "QUIT" => {
                    out.line("+bye");
                    Next::Close
                }
                _ => {
                    ctx.record_bad_command();
                    out.line("-ERR unknown");
                    Next::Command
                }
            }
        }

        fn on_bulk(
            &mut self,
            _request: &ReadRequest,
            bulk: Bulk,
            _ctx: &mut SessionContext,
            out: &mut Outbox,
        ) -> Next {
            match &bulk {
                Bulk::Data(data) => out.line(&format!("+got {}", data.len())),
                Bulk::LengthExceeded => out.line("-ERR too big"),
            }
            self.bulks.push(bulk);
            Next::Command
        }

        fn on_line_too_long(&mut self, _ctx: &mut SessionContext, out: &mut Outbox) {
            out.line("-ERR line too long");
        }

        fn on_session_timeout(&mut self, _ctx: &SessionContext, out: &mut Outbox) {
            self.timed_out = true;
            out.line("-ERR timeout");
        }

        fn on_bad_command_threshold_exceeded(&mut self, _ctx: &SessionContext, out: &mut Outbox) {
            out.line("-ERR too many errors");
        }

        fn on_close(&mut self, _ctx: &SessionContext) {
            self.closed = true;
        }
    }

    fn ok(data: &[u8]) -> ReadOutcome {
        ReadOutcome::Ok {
            data: data.to_vec(),
            length: data.len() + 2,
        }
    }

    #[test]
    fn test_outbox() {
        let mut out = Outbox::new();
        out.line("250 OK");
        out.push(b"x");
        assert_eq!(out.as_bytes(), b"250 OK\r\nx");
        assert_eq!(out.take(), b"250 OK\r\nx");
        assert!(out.is_empty());
    }

    #[test]
    fn test_request_for() {
        let config = ServerConfig::default();
        assert_eq!(request_for(&Next::Command, &config), Some(config.command_request()));
        assert!(request_for(&Next::Close, &config).is_none());
        let bulk = request_for(&Next::Read(ReadRequest::exact(3, 3, true)), &config).unwrap();
        assert_eq!(bulk.idle_timeout, Some(config.idle_timeout));
    }

    #[test]
    fn test_advance_dispatches_command() {
        let config = ServerConfig::default();
        let mut protocol = EchoProtocol::new();
        let mut ctx = SessionContext::new(1, None, None);
        let mut out = Outbox::new();
        let request = config.command_request();
        let next = advance(
            &mut protocol,
            Next::Command,
            &request,
            ok(b"ECHO hi"),
            &mut ctx,
            &mut out,
            &config,
        );
        assert_eq!(next, Next::Command);
        assert_eq!(out.as_bytes(), b"+hi\r\n");
        assert_eq!(ctx.phase(), SessionPhase::Dispatching);
    }

    #[test]
    fn test_advance_line_too_long_keeps_session() {
        let config = ServerConfig::default();
        let mut protocol = EchoProtocol::new();
        let mut ctx = SessionContext::new(1, None, None);
        let mut out = Outbox::new();
        let request = config.command_request();
        let next = advance(
            &mut protocol,
            Next::Command,
            &request,
            ReadOutcome::LengthExceeded,
            &mut ctx,
            &mut out,
            &config,
        );
        assert_eq!(next, Next::Command);
        assert_eq!(out.as_bytes(), b"-ERR line too long\r\n");
    }

    #[test]
    fn test_advance_timeout_closes_with_reply() {
        let config = ServerConfig::default();
        let mut protocol = EchoProtocol::new();
        let mut ctx = SessionContext::new(1, None, None);
        let mut out = Outbox::new();
        let request = config.command_request();
        let next = advance(
            &mut protocol,
            Next::Command,
            &request,
            ReadOutcome::TimedOut,
            &mut ctx,
            &mut out,
            &config,
        );
        assert_eq!(next, Next::Close);
        assert!(protocol.timed_out);
        assert_eq!(out.as_bytes(), b"-ERR timeout\r\n");
    }

    #[test]
    fn test_advance_peer_close_drops_replies() {
        let config = ServerConfig::default();
        let mut protocol = EchoProtocol::new();
        let mut ctx = SessionContext::new(1, None, None);
        let mut out = Outbox::new();
        out.line("stale");
        let request = config.command_request();
        let next = advance(
            &mut protocol,
            Next::Command,
            &request,
            ReadOutcome::ConnectionClosed,
            &mut ctx,
            &mut out,
            &config,
        );
        assert_eq!(next, Next::Close);
        assert!(out.is_empty());
    }

    #[test]
    fn test_advance_bad_command_threshold() {
        let config = ServerConfig::default().with_max_bad_commands(1);
        let mut protocol = EchoProtocol::new();
        let mut ctx = SessionContext::new(1, None, None);
        let mut out = Outbox::new();
        let request = config.command_request();

        let first = advance(
            &mut protocol,
            Next::Command,
            &request,
            ok(b"BOGUS"),
            &mut ctx,
            &mut out,
            &config,
        );
        assert_eq!(first, Next::Command);

        let second = advance(
            &mut protocol,
            Next::Command,
            &request,
            ok(b"BOGUS"),
            &mut ctx,
            &mut out,
            &config,
        );
        assert_eq!(second, Next::Close);
        assert!(out.as_bytes().ends_with(b"-ERR too many errors\r\n"));
    }

    #[test]
    fn test_advance_bulk_length_exceeded() {
        let config = ServerConfig::default();
        let mut protocol = EchoProtocol::new();
        let mut ctx = SessionContext::new(1, None, None);
        let mut out = Outbox::new();
        let request = ReadRequest::dot_body(4);
        let next = advance(
            &mut protocol,
            Next::Read(request.clone()),
            &request,
            ReadOutcome::LengthExceeded,
            &mut ctx,
            &mut out,
            &config,
        );
        assert_eq!(next, Next::Command);
        assert_eq!(protocol.bulks, vec![Bulk::LengthExceeded]);
    }
}
