//! Messages handed over by the receiver

use std::time::SystemTime;

/// Represents an email message received by the SMTP server
#[derive(Debug, Clone)]
pub struct Email {
    /// The sender's email address
    pub from: String,

    /// List of recipient email addresses
    pub to: Vec<String>,

    /// The message as received, headers and body, line endings preserved
    pub data: String,

    /// When the email was received by the server
    pub timestamp: SystemTime,
}

impl Email {
    /// Create a new email, stamped with the current time
    pub fn new(from: String, to: Vec<String>, data: String) -> Self {
        Self {
            from,
            to,
            data,
            timestamp: SystemTime::now(),
        }
    }

    /// Check if this email was sent to a specific recipient
    pub fn has_recipient(&self, recipient: &str) -> bool {
        self.to.iter().any(|addr| addr == recipient)
    }

    /// Check if this email was sent from a specific sender
    pub fn is_from_sender(&self, sender: &str) -> bool {
        self.from == sender
    }

    /// Get the size of the email data in bytes
    pub fn data_size(&self) -> usize {
        self.data.len()
    }

    /// Value of the first header named `name`, matched case-insensitively
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.data
            .lines()
            .take_while(|line| !line.is_empty())
            .filter_map(|line| line.split_once(':'))
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.trim())
    }

    pub fn get_subject(&self) -> Option<&str> {
        self.get_header("Subject")
    }

    /// Get the message body (content after the first empty line)
    pub fn get_body(&self) -> Option<&str> {
        let start = ["\r\n\r\n", "\n\n"]
            .iter()
            .filter_map(|sep| self.data.find(sep).map(|pos| pos + sep.len()))
            .min()?;
        let body = &self.data[start..];
        (!body.is_empty()).then_some(body)
    }

    /// Check if the email contains a specific text in headers or body
    pub fn contains_text(&self, text: &str) -> bool {
        self.data.contains(text)
    }
}
