//! Session loop on a tokio connection, one task per session

use std::time::Instant;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{Instrument, info, info_span, warn};

use crate::net::AsyncConnection;
use crate::session::config::ServerConfig;
use crate::session::context::{SessionContext, SessionPhase};
use crate::session::protocol::{Next, Outbox, Protocol, advance, request_for};

/// Run `protocol` on `conn` until the session ends.
///
/// Always closes the connection and returns the final context.
pub async fn run_session<S, P>(
    conn: &mut AsyncConnection<S>,
    protocol: &mut P,
    config: &ServerConfig,
    id: u64,
) -> SessionContext
where
    S: AsyncRead + AsyncWrite + Unpin,
    P: Protocol + ?Sized,
{
    let ctx = SessionContext::new(id, conn.local_addr(), conn.peer_addr());
    let span = info_span!("session", id, peer = ?ctx.remote_addr());
    drive(conn, protocol, config, ctx).instrument(span).await
}

async fn drive<S, P>(
    conn: &mut AsyncConnection<S>,
    protocol: &mut P,
    config: &ServerConfig,
    mut ctx: SessionContext,
) -> SessionContext
where
    S: AsyncRead + AsyncWrite + Unpin,
    P: Protocol + ?Sized,
{
    let activity = ctx.activity();
    conn.on_activity(move || activity.touch());
    info!("session started");

    let mut out = Outbox::new();
    let mut next = if protocol.on_accept(&ctx, &mut out) {
        protocol.greeting(&ctx, &mut out);
        ctx.set_phase(SessionPhase::Greeted);
        Next::Command
    } else {
        info!("connection rejected");
        Next::Close
    };
    if !flush(conn, &mut out).await {
        next = Next::Close;
    }

    while let Some(request) = request_for(&next, config) {
        ctx.set_phase(match next {
            Next::Command => SessionPhase::CommandWait,
            _ => SessionPhase::BulkReadWait,
        });
        let outcome = conn.read(&request).await;
        next = advance(protocol, next, &request, outcome, &mut ctx, &mut out, config);
        if !flush(conn, &mut out).await {
            next = Next::Close;
        }
    }

    ctx.set_phase(SessionPhase::Closing);
    protocol.on_close(&ctx);
    conn.close().await;
    ctx.set_phase(SessionPhase::Closed);
    info!(
        duration_ms = Instant::now().duration_since(ctx.started()).as_millis() as u64,
        bad_commands = ctx.bad_commands(),
        "session ended"
    );
    ctx
}

async fn flush<S>(conn: &mut AsyncConnection<S>, out: &mut Outbox) -> bool
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if out.is_empty() {
        return true;
    }
    let bytes = out.take();
    match conn.send_all(&bytes).await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "failed to send reply");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};

    use crate::session::protocol::Bulk;
    use crate::session::protocol::tests::EchoProtocol;

    async fn read_reply(client: &mut tokio::io::DuplexStream, expected: &str) {
        let mut buf = vec![0u8; expected.len()];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), expected);
    }

    #[tokio::test]
    async fn test_session_over_duplex() {
        let (mut client, server) = duplex(1024);
        let handle = tokio::spawn(async move {
            let mut conn = AsyncConnection::new(server);
            let mut protocol = EchoProtocol::new();
            let ctx = run_session(&mut conn, &mut protocol, &ServerConfig::default(), 3).await;
            (ctx, protocol)
        });

        read_reply(&mut client, "+OK ready\r\n").await;
        client.write_all(b"ECHO one\r\nBODY\r\n").await.unwrap();
        read_reply(&mut client, "+one\r\n+go\r\n").await;
        client.write_all(b"line\r\n..dot\r\n.\r\n").await.unwrap();
        read_reply(&mut client, "+got 13\r\n").await;
        client.write_all(b"QUIT\r\n").await.unwrap();
        read_reply(&mut client, "+bye\r\n").await;

        let (ctx, protocol) = handle.await.unwrap();
        assert_eq!(ctx.id(), 3);
        assert_eq!(ctx.phase(), SessionPhase::Closed);
        assert_eq!(protocol.bulks, vec![Bulk::Data(b"line\r\n..dot\r\n".to_vec())]);
        assert!(protocol.closed);
    }

    #[tokio::test]
    async fn test_idle_timeout_closes_session() {
        let (mut client, server) = duplex(1024);
        let config = ServerConfig::default().with_idle_timeout(Duration::from_millis(50));
        let handle = tokio::spawn(async move {
            let mut conn = AsyncConnection::new(server);
            let mut protocol = EchoProtocol::new();
            run_session(&mut conn, &mut protocol, &config, 1).await;
            protocol
        });

        read_reply(&mut client, "+OK ready\r\n").await;
        read_reply(&mut client, "-ERR timeout\r\n").await;
        let protocol = handle.await.unwrap();
        assert!(protocol.timed_out);
    }

    #[tokio::test]
    async fn test_peer_drop_ends_session() {
        let (mut client, server) = duplex(1024);
        let handle = tokio::spawn(async move {
            let mut conn = AsyncConnection::new(server);
            let mut protocol = EchoProtocol::new();
            run_session(&mut conn, &mut protocol, &ServerConfig::default(), 1).await
        });

        read_reply(&mut client, "+OK ready\r\n").await;
        client.write_all(b"ECHO half").await.unwrap();
        drop(client);
        let ctx = handle.await.unwrap();
        assert_eq!(ctx.phase(), SessionPhase::Closed);
    }

    #[tokio::test]
    async fn test_close_handle_interrupts_session() {
        let (mut client, server) = duplex(1024);
        let mut conn = AsyncConnection::new(server);
        let close = conn.close_handle();
        let handle = tokio::spawn(async move {
            let mut protocol = EchoProtocol::new();
            run_session(&mut conn, &mut protocol, &ServerConfig::default(), 1).await;
            protocol
        });

        read_reply(&mut client, "+OK ready\r\n").await;
        close.close();
        let protocol = handle.await.unwrap();
        assert!(protocol.closed);
        assert!(!protocol.timed_out);
    }
}
