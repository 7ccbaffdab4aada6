//! TCP listeners that run one session per accepted connection

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;

use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::net::{AsyncConnection, BufferedConnection};
use crate::session::config::ServerConfig;
use crate::session::protocol::Protocol;
use crate::session::{blocking, driver};

/// Accept on `listener` forever, running each session on its own thread.
///
/// `factory` builds a fresh protocol value per connection.
pub fn serve_blocking<F, P>(
    listener: std::net::TcpListener,
    config: Arc<ServerConfig>,
    factory: F,
) -> io::Result<()>
where
    F: Fn() -> P,
    P: Protocol + Send + 'static,
{
    info!(addr = ?listener.local_addr().ok(), "listening");

    let mut next_id = 0u64;
    for stream in listener.incoming() {
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };

        next_id += 1;
        let id = next_id;
        let mut protocol = factory();
        let config = Arc::clone(&config);
        thread::Builder::new()
            .name(format!("session-{id}"))
            .spawn(move || {
                let mut conn = BufferedConnection::new(stream);
                if let Err(e) = conn.set_nodelay(config.nodelay) {
                    debug!(error = %e, "could not set TCP_NODELAY");
                }
                blocking::run_session(&mut conn, &mut protocol, &config, id);
            })?;
    }

    Ok(())
}

/// Tokio listener with one task per session and broadcast shutdown.
pub struct Server {
    listener: TcpListener,
    config: Arc<ServerConfig>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    pub async fn bind(addr: impl ToSocketAddrs, config: ServerConfig) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self::from_listener(listener, config))
    }

    pub fn from_listener(listener: TcpListener, config: ServerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            listener,
            config: Arc::new(config),
            shutdown_tx,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn config(&self) -> &Arc<ServerConfig> {
        &self.config
    }

    /// Sending on the returned channel stops accepting and closes every
    /// live session.
    pub fn shutdown_signal(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Serve connections until shutdown is requested, then wait for the
    /// remaining sessions to finish.
    pub async fn serve<F, P>(self, factory: F) -> io::Result<()>
    where
        F: Fn() -> P,
        P: Protocol + Send + 'static,
    {
        info!(addr = ?self.listener.local_addr().ok(), "listening");

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut sessions = JoinSet::new();
        let mut next_id = 0u64;

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    let (stream, peer) = match result {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    if let Err(e) = stream.set_nodelay(self.config.nodelay) {
                        debug!(%peer, error = %e, "could not set TCP_NODELAY");
                    }

                    next_id += 1;
                    let id = next_id;
                    let mut protocol = factory();
                    let config = Arc::clone(&self.config);
                    let mut session_shutdown = self.shutdown_tx.subscribe();

                    sessions.spawn(async move {
                        let mut conn = AsyncConnection::from_tcp(stream);
                        let close = conn.close_handle();
                        let watcher = tokio::spawn(async move {
                            if session_shutdown.recv().await.is_ok() {
                                close.close();
                            }
                        });
                        driver::run_session(&mut conn, &mut protocol, &config, id).await;
                        watcher.abort();
                    });
                }

                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "session task failed");
                    }
                }

                _ = shutdown_rx.recv() => {
                    info!(live = sessions.len(), "shutting down");
                    break;
                }
            }
        }

        while let Some(joined) = sessions.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "session task failed");
            }
        }
        Ok(())
    }
}
