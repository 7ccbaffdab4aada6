//! Basic usage example for the MogiWire SMTP receiver
//!
//! Starts an in-memory SMTP server, submits two messages with the bundled
//! client and inspects what arrived.

use mogiwire::{SmtpClient, SmtpServer};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

const ADDR: &str = "127.0.0.1:2525";

fn main() {
    println!("MogiWire Basic Usage Example");
    println!("============================");

    let (tx, rx) = mpsc::channel();
    let server = SmtpServer::new("example.local");
    println!("Created SMTP server with hostname: example.local");

    let _server_thread = thread::spawn(move || {
        if let Err(e) = server.start(ADDR, tx) {
            eprintln!("Server error: {e}");
        }
    });
    thread::sleep(Duration::from_millis(100));
    println!("Server started on {ADDR}");

    println!("\nSending test email...");
    if let Err(e) = send_test_email() {
        eprintln!("Failed to send email: {e}");
        return;
    }

    println!("\nWaiting for email...");
    match rx.recv_timeout(Duration::from_secs(1)) {
        Ok(email) => {
            println!("Email received:");
            println!("  From: {}", email.from);
            println!("  To: {:?}", email.to);
            println!("  Subject: {:?}", email.get_subject());
            println!("  Timestamp: {:?}", email.timestamp);
            println!("  Body:");
            for line in email.get_body().unwrap_or("").lines() {
                println!("    {line}");
            }
        }
        Err(_) => {
            eprintln!("Timeout: No email received within 1 second");
            return;
        }
    }

    println!("\nSending second test email in chunks...");
    if let Err(e) = send_chunked_email() {
        eprintln!("Failed to send second email: {e}");
        return;
    }

    println!("\nCollecting emails...");
    let mut emails = Vec::new();
    while let Ok(email) = rx.recv_timeout(Duration::from_millis(100)) {
        emails.push(email);
    }
    println!("Collected {} email(s)", emails.len());

    let for_another = emails
        .iter()
        .filter(|email| email.has_recipient("another@example.com"))
        .count();
    println!("Emails for another@example.com: {for_another}");
}

fn send_test_email() -> Result<(), mogiwire::SmtpError> {
    let mut client = SmtpClient::connect(ADDR)?;
    println!("S: {} {}", client.greeting().code, client.greeting().message);

    let reply = client.helo("client.example.com")?;
    println!("S: {} {}", reply.code, reply.message);

    let body = b"From: sender@example.com\r\n\
To: recipient@example.com\r\n\
Subject: Test Email from MogiWire\r\n\
\r\n\
This is a test email.\r\n\
.A line starting with a dot survives the trip.\r\n\
\r\n\
Best regards,\r\n\
MogiWire Example\r\n";
    let reply = client.send_mail("sender@example.com", &["recipient@example.com"], body)?;
    println!("S: {} {}", reply.code, reply.message);

    let reply = client.quit()?;
    println!("S: {} {}", reply.code, reply.message);
    Ok(())
}

fn send_chunked_email() -> Result<(), mogiwire::SmtpError> {
    let mut client = SmtpClient::connect(ADDR)?;
    client.helo("client.example.com")?;
    client.mail_from("sender@example.com")?;
    client.rcpt_to("recipient@example.com")?;
    client.rcpt_to("another@example.com")?;
    client.bdat(b"Subject: Second Test Email\r\n\r\n", false)?;
    client.bdat(b"Sent as two BDAT chunks.\r\n", true)?;
    client.quit()?;
    Ok(())
}
