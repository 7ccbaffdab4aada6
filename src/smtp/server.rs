//! SMTP server implementation

use std::net::TcpListener;
use std::sync::Arc;
use std::sync::mpsc;

use tracing::info;

use crate::session::{self, Server, ServerConfig};
use crate::smtp::email::Email;
use crate::smtp::error::{SmtpConfig, SmtpError, SmtpLimits};
use crate::smtp::protocol::SmtpProtocol;

/// SMTP receiver that hands every accepted message to a channel
#[derive(Debug, Clone)]
pub struct SmtpServer {
    server: Arc<ServerConfig>,
    config: Arc<SmtpConfig>,
}

impl SmtpServer {
    /// Create a new SMTP server
    pub fn new(hostname: &str) -> Self {
        let server = ServerConfig::new(hostname)
            .with_max_line_length(SmtpLimits::COMMAND_LINE_MAX_LENGTH - 2);
        Self::with_config(server, SmtpConfig::default())
    }

    pub fn with_config(server: ServerConfig, config: SmtpConfig) -> Self {
        Self {
            server: Arc::new(server),
            config: Arc::new(config),
        }
    }

    pub fn hostname(&self) -> &str {
        &self.server.host_name
    }

    pub fn server_config(&self) -> &ServerConfig {
        &self.server
    }

    /// Builds one protocol value per accepted connection
    pub fn protocol_factory(
        &self,
        email_sender: mpsc::Sender<Email>,
    ) -> impl Fn() -> SmtpProtocol + Send + 'static {
        let server = Arc::clone(&self.server);
        let config = Arc::clone(&self.config);
        move || SmtpProtocol::new(Arc::clone(&server), Arc::clone(&config), email_sender.clone())
    }

    /// Start the server on the specified address (blocking)
    /// Emails will be sent to the provided channel as they are received
    pub fn start(&self, addr: &str, email_sender: mpsc::Sender<Email>) -> Result<(), SmtpError> {
        let listener = TcpListener::bind(addr)?;
        self.start_with_listener(listener, email_sender)
    }

    /// Start the server with an existing listener (blocking)
    pub fn start_with_listener(
        &self,
        listener: TcpListener,
        email_sender: mpsc::Sender<Email>,
    ) -> Result<(), SmtpError> {
        info!(hostname = %self.server.host_name, "starting SMTP server");
        session::serve_blocking(
            listener,
            Arc::clone(&self.server),
            self.protocol_factory(email_sender),
        )?;
        Ok(())
    }

    /// Bind a tokio listener configured for this server
    pub async fn bind(&self, addr: &str) -> Result<Server, SmtpError> {
        Ok(Server::bind(addr, (*self.server).clone()).await?)
    }

    /// Serve on a bound listener until its shutdown signal fires
    pub async fn serve(
        &self,
        server: Server,
        email_sender: mpsc::Sender<Email>,
    ) -> Result<(), SmtpError> {
        info!(hostname = %self.server.host_name, "starting SMTP server");
        server.serve(self.protocol_factory(email_sender)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpStream;
    use std::thread;
    use std::time::Duration;

    fn start_test_server() -> (String, mpsc::Receiver<Email>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = SmtpServer::new("test.local");
        let (tx, rx) = mpsc::channel();

        thread::spawn(move || server.start_with_listener(listener, tx));

        (addr, rx)
    }

    fn send_command(
        stream: &mut TcpStream,
        reader: &mut BufReader<TcpStream>,
        command: &str,
    ) -> String {
        write!(stream, "{command}\r\n").unwrap();
        stream.flush().unwrap();

        let mut response = String::new();
        reader.read_line(&mut response).unwrap();
        response.trim_end().to_string()
    }

    fn connect(addr: &str) -> (TcpStream, BufReader<TcpStream>) {
        let stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut greeting = String::new();
        reader.read_line(&mut greeting).unwrap();
        assert!(greeting.starts_with("220 test.local"));
        (stream, reader)
    }

    #[test]
    fn test_server_creation() {
        let server = SmtpServer::new("test.local");
        assert_eq!(server.hostname(), "test.local");
        assert_eq!(server.server_config().max_line_length, 510);
    }

    #[test]
    fn test_complete_smtp_session() {
        let (addr, rx) = start_test_server();
        let (mut stream, mut reader) = connect(&addr);

        assert!(send_command(&mut stream, &mut reader, "HELO client.local").starts_with("250"));
        assert!(
            send_command(&mut stream, &mut reader, "MAIL FROM:<test@example.com>")
                .starts_with("250")
        );
        assert!(
            send_command(&mut stream, &mut reader, "RCPT TO:<recipient@example.com>")
                .starts_with("250")
        );
        assert!(send_command(&mut stream, &mut reader, "DATA").starts_with("354"));

        let response = send_command(
            &mut stream,
            &mut reader,
            "Subject: Test Email\r\n\r\nThis is a test email.\r\n.",
        );
        assert!(response.starts_with("250"));
        assert!(send_command(&mut stream, &mut reader, "QUIT").starts_with("221"));

        let email = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(email.from, "test@example.com");
        assert_eq!(email.to, vec!["recipient@example.com"]);
        assert_eq!(email.get_subject(), Some("Test Email"));
        assert!(email.data.contains("This is a test email."));
    }

    #[test]
    fn test_error_handling() {
        let (addr, _rx) = start_test_server();
        let (mut stream, mut reader) = connect(&addr);

        assert!(send_command(&mut stream, &mut reader, "INVALID").starts_with("500"));
        assert!(
            send_command(&mut stream, &mut reader, "MAIL FROM:<test@example.com>")
                .starts_with("503")
        );
        assert!(send_command(&mut stream, &mut reader, "QUIT").starts_with("221"));
    }

    #[test]
    fn test_rset_command() {
        let (addr, rx) = start_test_server();
        let (mut stream, mut reader) = connect(&addr);

        send_command(&mut stream, &mut reader, "HELO client.local");
        send_command(&mut stream, &mut reader, "MAIL FROM:<sender@example.com>");
        send_command(&mut stream, &mut reader, "RCPT TO:<recipient@example.com>");
        assert!(send_command(&mut stream, &mut reader, "RSET").starts_with("250"));

        send_command(&mut stream, &mut reader, "MAIL FROM:<newsender@example.com>");
        send_command(&mut stream, &mut reader, "RCPT TO:<newrecipient@example.com>");
        send_command(&mut stream, &mut reader, "DATA");
        let response = send_command(
            &mut stream,
            &mut reader,
            "Subject: After Reset\r\n\r\nThis message came after RSET\r\n.",
        );
        assert!(response.starts_with("250"));
        send_command(&mut stream, &mut reader, "QUIT");

        let email = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(email.from, "newsender@example.com");
        assert_eq!(email.to, vec!["newrecipient@example.com"]);
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_async_serve_and_shutdown() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let smtp = SmtpServer::new("test.local");
            let server = smtp.bind("127.0.0.1:0").await.unwrap();
            let addr = server.local_addr().unwrap().to_string();
            let shutdown = server.shutdown_signal();
            let (tx, rx) = mpsc::channel();
            let serving = tokio::spawn(async move { smtp.serve(server, tx).await });

            let client = tokio::task::spawn_blocking(move || {
                let (mut stream, mut reader) = connect(&addr);
                send_command(&mut stream, &mut reader, "HELO client.local");
                send_command(&mut stream, &mut reader, "MAIL FROM:<a@example.com>");
                send_command(&mut stream, &mut reader, "RCPT TO:<b@example.com>");
                write!(stream, "BDAT 5 LAST\r\nhello").unwrap();
                let mut response = String::new();
                reader.read_line(&mut response).unwrap();
                response
            });
            assert!(client.await.unwrap().starts_with("250"));
            assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap().data, "hello");

            shutdown.send(()).unwrap();
            serving.await.unwrap().unwrap();
        });
    }
}
