//! SMTP transaction state for one connection

use crate::smtp::email::Email;
use crate::smtp::error::{SmtpError, SmtpLimits};

/// Represents the current state of an SMTP session
#[derive(Debug, Clone, PartialEq)]
pub enum SmtpState {
    /// Initial state - waiting for HELO
    Initial,
    /// HELO received - ready for MAIL command
    GreetingReceived,
    /// MAIL FROM received - ready for RCPT commands
    MailReceived,
    /// At least one RCPT TO received - ready for DATA, BDAT or more RCPT commands
    RecipientsReceived,
    /// DATA accepted - the dot-framed body is being read
    DataMode,
    /// At least one non-final BDAT chunk stored
    ChunkMode,
}

/// Manages the state and data for a single SMTP session
#[derive(Debug)]
pub struct SmtpSession {
    /// Current state of the session
    pub state: SmtpState,
    /// Sender address from MAIL FROM command
    pub from: Option<String>,
    /// List of recipients from RCPT TO commands
    pub to: Vec<String>,
    /// BDAT chunks received so far
    pub body: Vec<u8>,
    /// Client domain from HELO command
    pub client_domain: Option<String>,
}

impl SmtpSession {
    /// Create a new SMTP session
    pub fn new() -> Self {
        Self {
            state: SmtpState::Initial,
            from: None,
            to: Vec::new(),
            body: Vec::new(),
            client_domain: None,
        }
    }

    /// Reset the session to post-HELO state (clears transaction data)
    pub fn reset(&mut self) {
        self.state = if self.client_domain.is_some() {
            SmtpState::GreetingReceived
        } else {
            SmtpState::Initial
        };
        self.from = None;
        self.to.clear();
        self.body.clear();
    }

    /// Set the client domain from HELO command
    pub fn set_client_domain(&mut self, domain: String) -> Result<(), SmtpError> {
        if domain.len() > SmtpLimits::DOMAIN_MAX_LENGTH {
            return Err(SmtpError::DomainTooLong {
                max: SmtpLimits::DOMAIN_MAX_LENGTH,
            });
        }

        self.client_domain = Some(domain);
        self.reset();
        Ok(())
    }

    /// Set the sender address
    pub fn set_sender(&mut self, sender: String) -> Result<(), SmtpError> {
        if sender.len() > SmtpLimits::PATH_MAX_LENGTH {
            return Err(SmtpError::PathTooLong {
                max: SmtpLimits::PATH_MAX_LENGTH,
            });
        }

        self.from = Some(sender);
        self.to.clear();
        self.body.clear();
        self.state = SmtpState::MailReceived;
        Ok(())
    }

    /// Add a recipient address
    pub fn add_recipient(&mut self, recipient: String, max: usize) -> Result<(), SmtpError> {
        if recipient.len() > SmtpLimits::PATH_MAX_LENGTH {
            return Err(SmtpError::PathTooLong {
                max: SmtpLimits::PATH_MAX_LENGTH,
            });
        }

        if self.to.len() >= max {
            return Err(SmtpError::TooManyRecipients { max });
        }

        self.to.push(recipient);
        self.state = SmtpState::RecipientsReceived;
        Ok(())
    }

    /// Enter DATA mode
    pub fn start_data_mode(&mut self) -> Result<(), SmtpError> {
        if self.state != SmtpState::RecipientsReceived {
            return Err(SmtpError::InvalidState(
                "DATA command requires RCPT first".to_string(),
            ));
        }

        self.body.clear();
        self.state = SmtpState::DataMode;
        Ok(())
    }

    /// Finish DATA with the decoded body and create an email
    pub fn finish_data(&mut self, body: &[u8]) -> Result<Email, SmtpError> {
        if self.state != SmtpState::DataMode {
            return Err(SmtpError::InvalidState(
                "Not in data collection mode".to_string(),
            ));
        }
        self.build_email(body)
    }

    /// Store one BDAT chunk; `max` caps the whole message
    pub fn append_chunk(&mut self, chunk: &[u8], max: usize) -> Result<(), SmtpError> {
        if !matches!(
            self.state,
            SmtpState::RecipientsReceived | SmtpState::ChunkMode
        ) {
            return Err(SmtpError::InvalidState(
                "BDAT command requires RCPT first".to_string(),
            ));
        }

        if self.body.len() + chunk.len() > max {
            return Err(SmtpError::TooMuchData { max });
        }

        self.body.extend_from_slice(chunk);
        self.state = SmtpState::ChunkMode;
        Ok(())
    }

    /// Finish a BDAT transfer and create an email from the stored chunks
    pub fn finish_chunks(&mut self) -> Result<Email, SmtpError> {
        if self.state != SmtpState::ChunkMode {
            return Err(SmtpError::InvalidState("No chunks received".to_string()));
        }
        let body = std::mem::take(&mut self.body);
        self.build_email(&body)
    }

    /// Bytes the message may still grow by before hitting `max`
    pub fn remaining_capacity(&self, max: usize) -> usize {
        max.saturating_sub(self.body.len())
    }

    fn build_email(&mut self, body: &[u8]) -> Result<Email, SmtpError> {
        let from = self
            .from
            .take()
            .ok_or_else(|| SmtpError::InvalidState("No sender specified".to_string()))?;

        if self.to.is_empty() {
            return Err(SmtpError::InvalidState(
                "No recipients specified".to_string(),
            ));
        }

        let to = std::mem::take(&mut self.to);
        let email = Email::new(from, to, String::from_utf8_lossy(body).into_owned());
        self.reset();
        Ok(email)
    }

    /// Check if the session is ready for a specific command
    pub fn can_execute_command(&self, command: &str) -> bool {
        match command.to_uppercase().as_str() {
            #[cfg(feature = "ehlo")]
            "EHLO" => true, // EHLO can be sent at any time
            "HELO" => true, // HELO can be sent at any time
            "MAIL" => self.state == SmtpState::GreetingReceived,
            "RCPT" => {
                self.state == SmtpState::MailReceived || self.state == SmtpState::RecipientsReceived
            }
            "DATA" => self.state == SmtpState::RecipientsReceived,
            "BDAT" => matches!(
                self.state,
                SmtpState::RecipientsReceived | SmtpState::ChunkMode
            ),
            "RSET" => self.state != SmtpState::Initial,
            "NOOP" => true, // NOOP can be sent at any time
            "QUIT" => true, // QUIT can be sent at any time
            _ => false,
        }
    }

    /// Get the current recipient count
    pub fn recipient_count(&self) -> usize {
        self.to.len()
    }
}

impl Default for SmtpSession {
    fn default() -> Self {
        Self::new()
    }
}
