//! Blocking SMTP client on a buffered connection

use std::net::TcpStream;
use std::time::Duration;

use tracing::debug;

use crate::net::dot;
use crate::net::{BufferedConnection, LINE_TERMINATOR, Transport};
use crate::smtp::error::{SmtpError, SmtpLimits};
use crate::smtp::response::SmtpResponse;

/// Default time to wait for each reply line
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(30);

/// Submits messages to an SMTP server, one command at a time
pub struct SmtpClient<S: Transport = TcpStream> {
    conn: BufferedConnection<S>,
    reply_timeout: Option<Duration>,
    greeting: SmtpResponse,
}

impl SmtpClient<TcpStream> {
    /// Connect and wait for the 220 greeting
    pub fn connect(addr: impl std::net::ToSocketAddrs) -> Result<Self, SmtpError> {
        let conn = BufferedConnection::connect(addr)?;
        Self::from_connection(conn, Some(DEFAULT_REPLY_TIMEOUT))
    }
}

impl<S: Transport> SmtpClient<S> {
    /// Take over an established connection and read the greeting
    pub fn from_connection(
        conn: BufferedConnection<S>,
        reply_timeout: Option<Duration>,
    ) -> Result<Self, SmtpError> {
        let mut client = Self {
            conn,
            reply_timeout,
            greeting: SmtpResponse::new("000", ""),
        };
        let greeting = client.read_reply()?;
        client.greeting = Self::expect(greeting, "220")?;
        Ok(client)
    }

    pub fn greeting(&self) -> &SmtpResponse {
        &self.greeting
    }

    /// Read one reply, joining continuation lines
    pub fn read_reply(&mut self) -> Result<SmtpResponse, SmtpError> {
        let mut first: Option<(String, String)> = None;
        let mut continuation = Vec::new();

        loop {
            let line = self
                .conn
                .read_until_terminator(
                    LINE_TERMINATOR,
                    SmtpLimits::REPLY_LINE_MAX_LENGTH,
                    self.reply_timeout,
                )
                .into_result()?;
            let line = String::from_utf8_lossy(&line);
            let (code, more, text) = SmtpResponse::parse_line(&line)?;

            match &first {
                Some((first_code, _)) if first_code != code => {
                    return Err(SmtpError::MalformedReply(line.to_string()));
                }
                Some(_) => continuation.push(text.to_string()),
                None => {}
            }
            if first.is_none() {
                first = Some((code.to_string(), text.to_string()));
            }

            if !more {
                break;
            }
        }

        let (code, message) = first.ok_or_else(|| SmtpError::MalformedReply(String::new()))?;
        debug!(%code, %message, "reply");
        Ok(if continuation.is_empty() {
            SmtpResponse::new(&code, &message)
        } else {
            SmtpResponse::new_multiline(&code, &message, continuation)
        })
    }

    /// Send one command line and read its reply
    pub fn command(&mut self, line: &str) -> Result<SmtpResponse, SmtpError> {
        debug!(command = line, "send");
        let mut bytes = Vec::with_capacity(line.len() + LINE_TERMINATOR.len());
        bytes.extend_from_slice(line.as_bytes());
        bytes.extend_from_slice(LINE_TERMINATOR);
        self.conn.send_all(&bytes)?;
        self.read_reply()
    }

    pub fn helo(&mut self, domain: &str) -> Result<SmtpResponse, SmtpError> {
        let response = self.command(&format!("HELO {domain}"))?;
        Self::expect(response, "250")
    }

    /// EHLO; the capabilities are in the reply's continuation lines
    pub fn ehlo(&mut self, domain: &str) -> Result<SmtpResponse, SmtpError> {
        let response = self.command(&format!("EHLO {domain}"))?;
        Self::expect(response, "250")
    }

    pub fn mail_from(&mut self, sender: &str) -> Result<SmtpResponse, SmtpError> {
        let response = self.command(&format!("MAIL FROM:<{sender}>"))?;
        Self::expect(response, "250")
    }

    pub fn rcpt_to(&mut self, recipient: &str) -> Result<SmtpResponse, SmtpError> {
        let response = self.command(&format!("RCPT TO:<{recipient}>"))?;
        Self::expect(response, "250")
    }

    /// Send `body` with DATA, dot-stuffed and terminated
    pub fn data(&mut self, body: &[u8]) -> Result<SmtpResponse, SmtpError> {
        let response = self.command("DATA")?;
        Self::expect(response, "354")?;
        self.conn.send_all(&dot::frame_body(body))?;
        let response = self.read_reply()?;
        Self::expect(response, "250")
    }

    /// Send one BDAT chunk
    pub fn bdat(&mut self, chunk: &[u8], last: bool) -> Result<SmtpResponse, SmtpError> {
        let header = if last {
            format!("BDAT {} LAST\r\n", chunk.len())
        } else {
            format!("BDAT {}\r\n", chunk.len())
        };
        let mut bytes = Vec::with_capacity(header.len() + chunk.len());
        bytes.extend_from_slice(header.as_bytes());
        bytes.extend_from_slice(chunk);
        self.conn.send_all(&bytes)?;
        let response = self.read_reply()?;
        Self::expect(response, "250")
    }

    /// One complete transaction with DATA
    pub fn send_mail(
        &mut self,
        sender: &str,
        recipients: &[&str],
        body: &[u8],
    ) -> Result<SmtpResponse, SmtpError> {
        self.mail_from(sender)?;
        for recipient in recipients {
            self.rcpt_to(recipient)?;
        }
        self.data(body)
    }

    pub fn rset(&mut self) -> Result<SmtpResponse, SmtpError> {
        let response = self.command("RSET")?;
        Self::expect(response, "250")
    }

    pub fn noop(&mut self) -> Result<SmtpResponse, SmtpError> {
        let response = self.command("NOOP")?;
        Self::expect(response, "250")
    }

    /// QUIT and close the connection
    pub fn quit(mut self) -> Result<SmtpResponse, SmtpError> {
        let response = self.command("QUIT");
        self.conn.close();
        Self::expect(response?, "221")
    }

    fn expect(response: SmtpResponse, code: &str) -> Result<SmtpResponse, SmtpError> {
        if response.code == code {
            Ok(response)
        } else {
            Err(SmtpError::UnexpectedReply {
                code: response.code,
                message: response.message,
            })
        }
    }
}
