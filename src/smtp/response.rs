//! SMTP replies, as sent by the receiver and parsed by the client

use crate::smtp::error::{SmtpError, SmtpLimits};

/// Represents an SMTP response that can be sent to a client
#[derive(Debug, Clone, PartialEq)]
pub struct SmtpResponse {
    /// The SMTP response code (e.g., "250", "354", "500")
    pub code: String,
    /// The human-readable message
    pub message: String,
    /// Continuation lines after the first one (EHLO capabilities)
    pub multiline: Option<Vec<String>>,
}

impl SmtpResponse {
    /// Create a new SMTP response
    pub fn new(code: &str, message: &str) -> Self {
        Self {
            code: code.to_string(),
            message: message.to_string(),
            multiline: None,
        }
    }

    /// Create a new multiline SMTP response
    pub fn new_multiline(code: &str, message: &str, lines: Vec<String>) -> Self {
        Self {
            code: code.to_owned(),
            message: message.to_owned(),
            multiline: Some(lines),
        }
    }

    /// Create a success response (250 OK)
    pub fn ok() -> Self {
        Self::new("250", "OK")
    }

    /// Create a greeting response (220)
    pub fn greeting(hostname: &str) -> Self {
        Self::new("220", &format!("{hostname} ESMTP MogiWire ready"))
    }

    /// Create a HELO response (250)
    pub fn helo(hostname: &str, client_domain: &str) -> Self {
        Self::new("250", &format!("{hostname} Hello {client_domain}"))
    }

    /// Create an EHLO response (250) with capabilities
    #[cfg(feature = "ehlo")]
    pub fn ehlo(hostname: &str, client_domain: &str, max_message_size: usize) -> Self {
        let capabilities = vec![
            "PIPELINING".to_owned(),
            "8BITMIME".to_owned(),
            "CHUNKING".to_owned(),
            format!("SIZE {max_message_size}"),
        ];
        Self::new_multiline(
            "250",
            &format!("{hostname} Hello {client_domain}"),
            capabilities,
        )
    }

    /// Create a DATA intermediate response (354)
    pub fn data_start() -> Self {
        Self::new("354", "End data with <CR><LF>.<CR><LF>")
    }

    /// A non-final BDAT chunk was stored
    pub fn chunk_received(size: usize) -> Self {
        Self::new("250", &format!("{size} octets received"))
    }

    /// Create a QUIT response (221)
    pub fn quit(hostname: &str) -> Self {
        Self::new("221", &format!("{hostname} Bye"))
    }

    /// The server is ending the session on its own (421)
    pub fn closing(hostname: &str, reason: &str) -> Self {
        Self::new("421", &format!("{hostname} {reason}, closing connection"))
    }

    /// Create an error response from an error
    pub fn error(error: &SmtpError) -> Self {
        Self::new(error.to_response_code(), &error.to_response_message())
    }

    /// Format the response for sending over the wire
    pub fn format(&self) -> String {
        if let Some(ref lines) = self.multiline {
            let mut result = format!("{}-{}\r\n", self.code, self.message);
            for (i, line) in lines.iter().enumerate() {
                if i == lines.len() - 1 {
                    // Last line uses space instead of dash
                    result.push_str(&format!("{} {}\r\n", self.code, line));
                } else {
                    result.push_str(&format!("{}-{}\r\n", self.code, line));
                }
            }
            result
        } else {
            format!("{} {}\r\n", self.code, self.message)
        }
    }

    /// Wire form, truncated when a single line would exceed the reply limit
    pub fn format_bounded(&self) -> String {
        let formatted = self.format();
        let too_long = formatted
            .split_inclusive("\r\n")
            .any(|line| line.len() > SmtpLimits::REPLY_LINE_MAX_LENGTH);
        if too_long {
            Self::new(&self.code, "Response too long (truncated)").format()
        } else {
            formatted
        }
    }

    /// Split one reply line into its code, continuation flag and text
    pub fn parse_line(line: &str) -> Result<(&str, bool, &str), SmtpError> {
        let code = line
            .get(..3)
            .filter(|code| code.bytes().all(|b| b.is_ascii_digit()))
            .ok_or_else(|| SmtpError::MalformedReply(line.to_string()))?;
        match line.as_bytes().get(3) {
            None => Ok((code, false, "")),
            Some(b' ') => Ok((code, false, &line[4..])),
            Some(b'-') => Ok((code, true, &line[4..])),
            Some(_) => Err(SmtpError::MalformedReply(line.to_string())),
        }
    }

    /// Check if this is a success response (2xx)
    pub fn is_success(&self) -> bool {
        self.code.starts_with('2')
    }

    /// Check if this is an intermediate response (3xx)
    pub fn is_intermediate(&self) -> bool {
        self.code.starts_with('3')
    }

    /// Check if this is an error response (4xx or 5xx)
    pub fn is_error(&self) -> bool {
        self.code.starts_with('4') || self.code.starts_with('5')
    }
}
