//! Session loop on a blocking connection, one thread per session

use std::time::Instant;

use tracing::{info, info_span, warn};

use crate::net::{BufferedConnection, Transport};
use crate::session::config::ServerConfig;
use crate::session::context::{SessionContext, SessionPhase};
use crate::session::protocol::{Next, Outbox, Protocol, advance, request_for};

/// Run `protocol` on `conn` until the session ends.
///
/// Always closes the connection and returns the final context.
pub fn run_session<S, P>(
    conn: &mut BufferedConnection<S>,
    protocol: &mut P,
    config: &ServerConfig,
    id: u64,
) -> SessionContext
where
    S: Transport,
    P: Protocol + ?Sized,
{
    let mut ctx = SessionContext::new(id, conn.local_addr().ok(), conn.peer_addr().ok());
    let span = info_span!("session", id, peer = ?ctx.remote_addr());
    let _enter = span.enter();

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
    if !flush(conn, &mut out) {
        next = Next::Close;
    }

    while let Some(request) = request_for(&next, config) {
        ctx.set_phase(match next {
            Next::Command => SessionPhase::CommandWait,
            _ => SessionPhase::BulkReadWait,
        });
        let outcome = conn.read(&request);
        next = advance(protocol, next, &request, outcome, &mut ctx, &mut out, config);
        if !flush(conn, &mut out) {
            next = Next::Close;
        }
    }

    ctx.set_phase(SessionPhase::Closing);
    protocol.on_close(&ctx);
    conn.close();
    ctx.set_phase(SessionPhase::Closed);
    info!(
        duration_ms = Instant::now().duration_since(ctx.started()).as_millis() as u64,
        bad_commands = ctx.bad_commands(),
        "session ended"
    );
    ctx
}

fn flush<S: Transport>(conn: &mut BufferedConnection<S>, out: &mut Outbox) -> bool {
    if out.is_empty() {
        return true;
    }
    let bytes = out.take();
    match conn.send_all(&bytes) {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "failed to send reply");
            false
        }
    }
}
