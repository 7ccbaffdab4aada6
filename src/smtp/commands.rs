//! Implementation of SMTP commands

use crate::smtp::error::{SmtpConfig, SmtpError, SmtpLimits};
use crate::smtp::response::SmtpResponse;
use crate::smtp::session::SmtpSession;

/// What the receiver does after a command has been handled
#[derive(Debug, Clone, PartialEq)]
pub enum CommandAction {
    /// Send the reply and wait for the next command
    Reply(SmtpResponse),
    /// Send the 354 reply and read a dot-framed body
    ReadBody(SmtpResponse),
    /// Read a BDAT chunk of `size` bytes, then reply
    ReadChunk { size: usize, last: bool },
    /// Discard a BDAT chunk of `size` bytes, then reply with a syntax error
    DiscardChunk { size: usize, reason: String },
    /// Send the reply and close the connection
    Quit(SmtpResponse),
}

/// Handles SMTP commands and returns appropriate responses
#[derive(Debug)]
pub struct SmtpCommandHandler<'a> {
    hostname: &'a str,
    config: &'a SmtpConfig,
}

impl<'a> SmtpCommandHandler<'a> {
    /// Create a new command handler
    pub fn new(hostname: &'a str, config: &'a SmtpConfig) -> Self {
        Self { hostname, config }
    }

    /// Process a command line and decide what happens next
    pub fn process_command(
        &self,
        command_line: &str,
        session: &mut SmtpSession,
    ) -> Result<CommandAction, SmtpError> {
        let parts: Vec<&str> = command_line.split_whitespace().collect();
        if parts.is_empty() {
            return Err(SmtpError::InvalidCommand);
        }

        let cmd = parts[0].to_uppercase();

        match cmd.as_str() {
            "HELO" => self.handle_helo(&parts, session).map(CommandAction::Reply),
            #[cfg(feature = "ehlo")]
            "EHLO" => self.handle_ehlo(&parts, session).map(CommandAction::Reply),
            "MAIL" => self.handle_mail(&parts, session).map(CommandAction::Reply),
            "RCPT" => self.handle_rcpt(&parts, session).map(CommandAction::Reply),
            "DATA" => self.handle_data(&parts, session),
            "BDAT" => Self::handle_bdat(&parts),
            "RSET" => self.handle_rset(session).map(CommandAction::Reply),
            "NOOP" => Ok(CommandAction::Reply(SmtpResponse::ok())),
            "QUIT" => Ok(CommandAction::Quit(SmtpResponse::quit(self.hostname))),
            _ => Err(SmtpError::InvalidCommand),
        }
    }

    fn handle_helo(
        &self,
        parts: &[&str],
        session: &mut SmtpSession,
    ) -> Result<SmtpResponse, SmtpError> {
        let client_domain = Self::client_domain(parts, "HELO")?;
        session.set_client_domain(client_domain.clone())?;
        Ok(SmtpResponse::helo(self.hostname, &client_domain))
    }

    #[cfg(feature = "ehlo")]
    fn handle_ehlo(
        &self,
        parts: &[&str],
        session: &mut SmtpSession,
    ) -> Result<SmtpResponse, SmtpError> {
        let client_domain = Self::client_domain(parts, "EHLO")?;
        session.set_client_domain(client_domain.clone())?;
        Ok(SmtpResponse::ehlo(
            self.hostname,
            &client_domain,
            self.config.max_message_size,
        ))
    }

    fn client_domain(parts: &[&str], verb: &str) -> Result<String, SmtpError> {
        match parts.get(1) {
            Some(domain) => Ok((*domain).to_string()),
            None => Err(SmtpError::InvalidSyntax(format!(
                "{verb} requires domain argument"
            ))),
        }
    }

    fn handle_mail(
        &self,
        parts: &[&str],
        session: &mut SmtpSession,
    ) -> Result<SmtpResponse, SmtpError> {
        if !session.can_execute_command("MAIL") {
            return Err(SmtpError::InvalidState(
                "MAIL command requires HELO first".to_string(),
            ));
        }

        let addr = Self::path_argument(parts, "FROM:")?;
        self.validate_email_address(&addr)?;
        session.set_sender(addr)?;

        Ok(SmtpResponse::ok())
    }

    fn handle_rcpt(
        &self,
        parts: &[&str],
        session: &mut SmtpSession,
    ) -> Result<SmtpResponse, SmtpError> {
        if !session.can_execute_command("RCPT") {
            return Err(SmtpError::InvalidState(
                "RCPT command requires MAIL first".to_string(),
            ));
        }

        let addr = Self::path_argument(parts, "TO:")?;
        self.validate_email_address(&addr)?;
        session.add_recipient(addr, self.config.max_recipients)?;

        Ok(SmtpResponse::ok())
    }

    /// Extract `<address>` from `MAIL FROM:<address>` or `RCPT TO:<address>`
    fn path_argument(parts: &[&str], keyword: &str) -> Result<String, SmtpError> {
        let verb = parts[0].to_uppercase();
        let argument = parts[1..].join(" ");
        let path = argument
            .get(..keyword.len())
            .filter(|prefix| prefix.eq_ignore_ascii_case(keyword))
            .map(|_| argument[keyword.len()..].trim())
            .ok_or_else(|| {
                SmtpError::InvalidSyntax(format!(
                    "{verb} command must be '{verb} {keyword}<address>'"
                ))
            })?;
        // ESMTP parameters after the path (`BODY=8BITMIME`, `SIZE=n`) are ignored
        let addr = path
            .strip_prefix('<')
            .and_then(|rest| rest.split_once('>'))
            .filter(|(_, params)| params.is_empty() || params.starts_with(' '))
            .map(|(addr, _)| addr)
            .ok_or_else(|| {
                SmtpError::InvalidSyntax("Address must be enclosed in angle brackets".to_string())
            })?;
        if addr.is_empty() {
            return Err(SmtpError::InvalidSyntax(
                "Address cannot be empty".to_string(),
            ));
        }

        Ok(addr.to_string())
    }

    fn handle_data(
        &self,
        parts: &[&str],
        session: &mut SmtpSession,
    ) -> Result<CommandAction, SmtpError> {
        if !session.can_execute_command("DATA") {
            return Err(SmtpError::InvalidState(
                "DATA command requires RCPT first".to_string(),
            ));
        }

        if parts.len() > 1 {
            return Err(SmtpError::InvalidSyntax(
                "DATA command takes no arguments".to_string(),
            ));
        }

        session.start_data_mode()?;
        Ok(CommandAction::ReadBody(SmtpResponse::data_start()))
    }

    /// `BDAT <size> [LAST]` (RFC 3030)
    /// The chunk follows on the wire regardless, so sequencing is only checked
    /// once it has been read.
    fn handle_bdat(parts: &[&str]) -> Result<CommandAction, SmtpError> {
        let size = parts
            .get(1)
            .and_then(|size| size.parse::<usize>().ok())
            .ok_or_else(|| SmtpError::InvalidSyntax("BDAT requires a chunk size".to_string()))?;
        let last = match parts.get(2) {
            None => false,
            Some(flag) if flag.eq_ignore_ascii_case("LAST") && parts.len() == 3 => true,
            // The client sends the chunk anyway, so it still has to be read.
            Some(_) => {
                return Ok(CommandAction::DiscardChunk {
                    size,
                    reason: "BDAT command must be 'BDAT <size> [LAST]'".to_string(),
                });
            }
        };

        Ok(CommandAction::ReadChunk { size, last })
    }

    fn handle_rset(&self, session: &mut SmtpSession) -> Result<SmtpResponse, SmtpError> {
        if !session.can_execute_command("RSET") {
            return Err(SmtpError::InvalidState(
                "RSET command requires HELO first".to_string(),
            ));
        }

        session.reset();
        Ok(SmtpResponse::ok())
    }

    /// Validate email address format and size limits
    fn validate_email_address(&self, addr: &str) -> Result<(), SmtpError> {
        let Some((user_part, domain_part)) = addr.split_once('@') else {
            return Err(SmtpError::InvalidSyntax(
                "Email address must contain @ symbol".to_string(),
            ));
        };

        if user_part.len() > SmtpLimits::USER_MAX_LENGTH {
            return Err(SmtpError::UserTooLong {
                max: SmtpLimits::USER_MAX_LENGTH,
            });
        }

        if domain_part.len() > SmtpLimits::DOMAIN_MAX_LENGTH {
            return Err(SmtpError::DomainTooLong {
                max: SmtpLimits::DOMAIN_MAX_LENGTH,
            });
        }

        if user_part.is_empty() || domain_part.is_empty() {
            return Err(SmtpError::InvalidSyntax(
                "Invalid email address format".to_string(),
            ));
        }

        Ok(())
    }
}
