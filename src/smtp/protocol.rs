//! SMTP receiver hooks for the session loop

use std::sync::Arc;
use std::sync::mpsc;

use tracing::{debug, info};

use crate::net::dot;
use crate::net::{ReadKind, ReadRequest};
use crate::session::{Bulk, Next, Outbox, Protocol, ServerConfig, SessionContext};
use crate::smtp::commands::{CommandAction, SmtpCommandHandler};
use crate::smtp::email::Email;
use crate::smtp::error::{SmtpConfig, SmtpError};
use crate::smtp::response::SmtpResponse;
use crate::smtp::session::SmtpSession;

/// One SMTP conversation; built fresh for every connection
pub struct SmtpProtocol {
    server: Arc<ServerConfig>,
    config: Arc<SmtpConfig>,
    session: SmtpSession,
    email_sender: mpsc::Sender<Email>,
    /// Error to report once the chunk being discarded has been read
    rejected_chunk: Option<SmtpError>,
}

impl SmtpProtocol {
    pub fn new(
        server: Arc<ServerConfig>,
        config: Arc<SmtpConfig>,
        email_sender: mpsc::Sender<Email>,
    ) -> Self {
        Self {
            server,
            config,
            session: SmtpSession::new(),
            email_sender,
            rejected_chunk: None,
        }
    }

    pub fn session(&self) -> &SmtpSession {
        &self.session
    }

    fn reply(out: &mut Outbox, response: &SmtpResponse) {
        out.push(response.format_bounded().as_bytes());
    }

    fn reply_error(&mut self, error: &SmtpError, ctx: &mut SessionContext, out: &mut Outbox) {
        if error.is_bad_command() {
            ctx.record_bad_command();
        }
        debug!(code = error.to_response_code(), "{error}");
        Self::reply(out, &SmtpResponse::error(error));
    }

    fn deliver(&mut self, email: Email, out: &mut Outbox) {
        info!(
            from = %email.from,
            recipients = email.to.len(),
            size = email.data_size(),
            "message accepted"
        );
        // Nobody listening is not an error for the client.
        if self.email_sender.send(email).is_err() {
            debug!("no receiver for accepted message");
        }
        Self::reply(out, &SmtpResponse::ok());
    }

    fn on_body(&mut self, payload: &[u8], ctx: &mut SessionContext, out: &mut Outbox) {
        let body = dot::decode(payload);
        match self.session.finish_data(&body) {
            Ok(email) => self.deliver(email, out),
            Err(e) => {
                self.session.reset();
                self.reply_error(&e, ctx, out);
            }
        }
    }

    fn on_chunk(
        &mut self,
        chunk: &[u8],
        last: bool,
        ctx: &mut SessionContext,
        out: &mut Outbox,
    ) {
        let stored = self
            .session
            .append_chunk(chunk, self.config.max_message_size);
        if let Err(e) = stored {
            if !matches!(e, SmtpError::InvalidState(_)) {
                self.session.reset();
            }
            self.reply_error(&e, ctx, out);
            return;
        }

        if !last {
            Self::reply(out, &SmtpResponse::chunk_received(chunk.len()));
            return;
        }
        match self.session.finish_chunks() {
            Ok(email) => self.deliver(email, out),
            Err(e) => self.reply_error(&e, ctx, out),
        }
    }
}

impl Protocol for SmtpProtocol {
    fn on_accept(&mut self, ctx: &SessionContext, _out: &mut Outbox) -> bool {
        debug!(peer = ?ctx.remote_addr(), "accepting SMTP client");
        true
    }

    fn greeting(&mut self, _ctx: &SessionContext, out: &mut Outbox) {
        Self::reply(out, &SmtpResponse::greeting(&self.server.host_name));
    }

    fn on_command(&mut self, line: &[u8], ctx: &mut SessionContext, out: &mut Outbox) -> Next {
        let line = String::from_utf8_lossy(line);
        let handler = SmtpCommandHandler::new(&self.server.host_name, &self.config);

        match handler.process_command(line.trim(), &mut self.session) {
            Ok(CommandAction::Reply(response)) => {
                Self::reply(out, &response);
                Next::Command
            }
            Ok(CommandAction::ReadBody(response)) => {
                Self::reply(out, &response);
                Next::Read(ReadRequest::dot_body(self.config.max_message_size))
            }
            Ok(CommandAction::ReadChunk { size, last }) => {
                let cap = self
                    .session
                    .remaining_capacity(self.config.max_message_size);
                Next::Read(ReadRequest::exact(size, cap, last))
            }
            Ok(CommandAction::DiscardChunk { size, reason }) => {
                self.rejected_chunk = Some(SmtpError::InvalidSyntax(reason));
                // A zero cap drains the chunk without keeping it.
                Next::Read(ReadRequest::exact(size, 0, false))
            }
            Ok(CommandAction::Quit(response)) => {
                Self::reply(out, &response);
                Next::Close
            }
            Err(e) => {
                self.reply_error(&e, ctx, out);
                Next::Command
            }
        }
    }

    fn on_bulk(
        &mut self,
        request: &ReadRequest,
        bulk: Bulk,
        ctx: &mut SessionContext,
        out: &mut Outbox,
    ) -> Next {
        if let Some(error) = self.rejected_chunk.take() {
            self.reply_error(&error, ctx, out);
            return Next::Command;
        }

        match (bulk, &request.kind) {
            (Bulk::Data(payload), ReadKind::Terminator { .. }) => self.on_body(&payload, ctx, out),
            (Bulk::Data(chunk), ReadKind::Count { last, .. }) => {
                self.on_chunk(&chunk, *last, ctx, out)
            }
            (Bulk::LengthExceeded, _) => {
                self.session.reset();
                let error = SmtpError::TooMuchData {
                    max: self.config.max_message_size,
                };
                self.reply_error(&error, ctx, out);
            }
        }
        Next::Command
    }

    fn on_line_too_long(&mut self, _ctx: &mut SessionContext, out: &mut Outbox) {
        let error = SmtpError::LineTooLong {
            max: self.server.max_line_length,
        };
        Self::reply(out, &SmtpResponse::error(&error));
    }

    fn on_session_timeout(&mut self, _ctx: &SessionContext, out: &mut Outbox) {
        Self::reply(
            out,
            &SmtpResponse::closing(&self.server.host_name, "Timeout exceeded"),
        );
    }

    fn on_bad_command_threshold_exceeded(&mut self, _ctx: &SessionContext, out: &mut Outbox) {
        Self::reply(
            out,
            &SmtpResponse::closing(&self.server.host_name, "Too many errors"),
        );
    }

    fn on_close(&mut self, ctx: &SessionContext) {
        debug!(state = ?self.session.state, bad_commands = ctx.bad_commands(), "SMTP session closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::BufferedConnection;
    use crate::net::connection::tests::ScriptedTransport;
    use crate::session::blocking::run_session;
    use crate::smtp::session::SmtpState;

    fn converse(
        input: &[&[u8]],
        config: SmtpConfig,
    ) -> (String, SmtpProtocol, mpsc::Receiver<Email>) {
        let (tx, rx) = mpsc::channel();
        let server = Arc::new(ServerConfig::new("test.local"));
        let mut protocol = SmtpProtocol::new(Arc::clone(&server), Arc::new(config), tx);
        let mut conn = BufferedConnection::new(ScriptedTransport::from_slices(input));
        run_session(&mut conn, &mut protocol, &server, 1);
        let written = String::from_utf8(conn.get_ref().written.clone()).unwrap();
        (written, protocol, rx)
    }

    const ENVELOPE: &[u8] = b"HELO client.local\r\nMAIL FROM:<a@example.com>\r\nRCPT TO:<b@example.com>\r\n";

    #[test]
    fn test_data_transaction() {
        let (written, _, rx) = converse(
            &[
                ENVELOPE,
                b"DATA\r\nSubject: Hi\r\n\r\n..dotted\r\n",
                b".\r\nQUIT\r\n",
            ],
            SmtpConfig::default(),
        );

        let replies: Vec<&str> = written.lines().map(|l| &l[..3]).collect();
        assert_eq!(replies, ["220", "250", "250", "250", "354", "250", "221"]);

        let email = rx.try_recv().unwrap();
        assert_eq!(email.from, "a@example.com");
        assert_eq!(email.to, vec!["b@example.com".to_string()]);
        assert_eq!(email.data, "Subject: Hi\r\n\r\n.dotted\r\n");
        assert_eq!(email.get_subject(), Some("Hi"));
    }

    #[test]
    fn test_empty_data_body() {
        let (written, _, rx) = converse(&[ENVELOPE, b"DATA\r\n.\r\n"], SmtpConfig::default());
        assert!(written.ends_with("354 End data with <CR><LF>.<CR><LF>\r\n250 OK\r\n"));
        assert_eq!(rx.try_recv().unwrap().data, "");
    }

    #[test]
    fn test_data_too_large() {
        let config = SmtpConfig::default().with_max_message_size(8);
        let (written, protocol, rx) = converse(
            &[ENVELOPE, b"DATA\r\nthis body is too long\r\n.\r\nNOOP\r\n"],
            config,
        );
        assert!(written.contains("552 Too much mail data (max 8 bytes)\r\n"));
        assert!(written.ends_with("250 OK\r\n"));
        assert!(rx.try_recv().is_err());
        assert_eq!(protocol.session().state, SmtpState::GreetingReceived);
    }

    #[test]
    fn test_bdat_chunks() {
        let (written, _, rx) = converse(
            &[ENVELOPE, b"BDAT 6\r\nHello,BDAT 7 LAST\r\n world\n"],
            SmtpConfig::default(),
        );
        assert!(written.contains("250 6 octets received\r\n"));
        assert!(written.ends_with("250 OK\r\n"));
        assert_eq!(rx.try_recv().unwrap().data, "Hello, world\n");
    }

    #[test]
    fn test_bdat_over_limit_is_drained() {
        let config = SmtpConfig::default().with_max_message_size(4);
        let (written, _, rx) = converse(&[ENVELOPE, b"BDAT 6 LAST\r\n123456NOOP\r\n"], config);
        assert!(written.contains("552 "));
        assert!(written.ends_with("250 OK\r\n"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_bdat_bad_flag_skips_chunk() {
        let (written, protocol, rx) = converse(
            &[ENVELOPE, b"BDAT 6 FINAL\r\nRSET\r\nNOOP\r\n"],
            SmtpConfig::default(),
        );
        assert!(written.ends_with(
            "501 Syntax error: BDAT command must be 'BDAT <size> [LAST]'\r\n250 OK\r\n"
        ));
        // The chunk bytes look like RSET but must never run as one.
        assert_eq!(written.matches("250 ").count(), 4);
        assert!(rx.try_recv().is_err());
        assert_eq!(protocol.session().state, SmtpState::RecipientsReceived);
    }

    #[test]
    fn test_bdat_without_transaction() {
        let (written, _, _) = converse(
            &[b"HELO client.local\r\nBDAT 3 LAST\r\nabcNOOP\r\n"],
            SmtpConfig::default(),
        );
        assert!(written.contains("503 "));
        assert!(written.ends_with("250 OK\r\n"));
    }

    #[test]
    fn test_line_too_long_reply() {
        let long = format!("NOOP {}\r\nNOOP\r\n", "x".repeat(2000));
        let (written, _, _) = converse(&[long.as_bytes()], SmtpConfig::default());
        assert!(written.contains("500 Line too long (max 1024 characters)\r\n"));
        assert!(written.ends_with("250 OK\r\n"));
    }

    #[test]
    fn test_bad_command_threshold() {
        let input = "BOGUS\r\n".repeat(40);
        let (written, _, _) = converse(&[input.as_bytes()], SmtpConfig::default());
        assert!(written.ends_with("421 test.local Too many errors, closing connection\r\n"));
        assert_eq!(written.matches("500 ").count(), 31);
    }
}
