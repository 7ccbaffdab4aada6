//! Non-blocking buffered connection on tokio
//!
//! Same buffering and scanning as [`BufferedConnection`](super::BufferedConnection),
//! driven by `AsyncRead`/`AsyncWrite`. Reads come in two shapes: `async fn`s
//! that resolve to a [`ReadOutcome`], and [`AsyncConnection::begin_read`],
//! which moves the connection into a spawned task and hands it back together
//! with the outcome to a single completion callback.

use std::io::{self, Write};
use std::net::SocketAddr;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{trace, warn};

use crate::net::buffer::{PendingBuffer, READ_CHUNK_SIZE};
use crate::net::connection::ActivityCallback;
use crate::net::error::{NetError, ReadOutcome};
use crate::net::reader::ReadRequest;

/// Closes an [`AsyncConnection`] from another task.
///
/// An outstanding read observes the close and completes with
/// [`ReadOutcome::ConnectionClosed`].
#[derive(Debug, Clone)]
pub struct AsyncCloseHandle {
    closed: watch::Sender<bool>,
}

impl AsyncCloseHandle {
    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

enum Received {
    Data(Bytes),
    Closed,
    TimedOut,
    Failed(io::Error),
}

/// Tokio counterpart of [`BufferedConnection`](super::BufferedConnection).
pub struct AsyncConnection<S> {
    stream: S,
    pending: PendingBuffer,
    closed: watch::Sender<bool>,
    shut_down: bool,
    local: Option<SocketAddr>,
    remote: Option<SocketAddr>,
    on_activity: Option<ActivityCallback>,
}

impl AsyncConnection<TcpStream> {
    /// Wrap an accepted or connected TCP stream, recording both endpoints.
    pub fn from_tcp(stream: TcpStream) -> Self {
        let local = stream.local_addr().ok();
        let remote = stream.peer_addr().ok();
        Self::new(stream).with_addrs(local, remote)
    }

    pub async fn connect(addr: impl tokio::net::ToSocketAddrs) -> io::Result<Self> {
        Ok(Self::from_tcp(TcpStream::connect(addr).await?))
    }

    pub fn set_nodelay(&self, nodelay: bool) -> io::Result<()> {
        self.stream.set_nodelay(nodelay)
    }

    /// Buffered bytes plus what the socket can hand over without waiting.
    ///
    /// The socket side is a non-blocking peek. Until the reactor has seen the
    /// socket become readable it counts as zero.
    pub fn available(&self) -> io::Result<usize> {
        let mut probe = vec![0u8; 64 * 1024];
        let mut buf = ReadBuf::new(&mut probe);
        let mut cx = Context::from_waker(Waker::noop());

        let ready = match self.stream.poll_peek(&mut cx, &mut buf) {
            Poll::Ready(Ok(n)) => n,
            Poll::Ready(Err(e)) if e.kind() == io::ErrorKind::WouldBlock => 0,
            Poll::Ready(Err(e)) => return Err(e),
            Poll::Pending => 0,
        };
        Ok(self.buffered() + ready)
    }
}

impl<S> AsyncConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            stream,
            pending: PendingBuffer::new(),
            closed,
            shut_down: false,
            local: None,
            remote: None,
            on_activity: None,
        }
    }

    pub fn with_addrs(mut self, local: Option<SocketAddr>, remote: Option<SocketAddr>) -> Self {
        self.local = local;
        self.remote = remote;
        self
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.remote
    }

    pub fn on_activity(&mut self, callback: impl FnMut() + Send + 'static) {
        self.on_activity = Some(Box::new(callback));
    }

    pub fn close_handle(&self) -> AsyncCloseHandle {
        AsyncCloseHandle {
            closed: self.closed.clone(),
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Bytes already buffered.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    pub fn append_buffer(&mut self, data: &[u8]) {
        self.pending.push_front(data);
    }

    /// Return up to `max` bytes, reading from the stream only when nothing is
    /// buffered. An empty result means end of stream.
    pub async fn receive(&mut self, max: usize) -> io::Result<Bytes> {
        if self.is_closed() {
            return Err(io::ErrorKind::NotConnected.into());
        }

        if self.pending.is_empty() {
            let mut chunk = BytesMut::with_capacity(READ_CHUNK_SIZE);
            let n = self.stream.read_buf(&mut chunk).await?;
            if n == 0 {
                return Ok(Bytes::new());
            }
            self.touch();
            self.pending.fill(chunk);
        }

        Ok(self.pending.take(max))
    }

    pub async fn send(&mut self, bytes: &[u8]) -> Result<usize, NetError> {
        if self.is_closed() {
            return Err(NetError::ConnectionClosed);
        }

        let n = self
            .stream
            .write(bytes)
            .await
            .map_err(NetError::from_send)?;
        if n == 0 && !bytes.is_empty() {
            return Err(NetError::ConnectionClosed);
        }
        if n > 0 {
            self.touch();
        }
        Ok(n)
    }

    pub async fn send_all(&mut self, bytes: &[u8]) -> Result<(), NetError> {
        let mut sent = 0;
        while sent < bytes.len() {
            sent += self.send(&bytes[sent..]).await?;
        }
        self.stream.flush().await.map_err(NetError::from_send)
    }

    pub async fn read_until_terminator(
        &mut self,
        terminator: &[u8],
        max_length: usize,
        idle_timeout: Option<Duration>,
    ) -> ReadOutcome {
        let request = ReadRequest::until(terminator, max_length).with_idle_timeout(idle_timeout);
        self.read(&request).await
    }

    pub async fn read_exact_count(
        &mut self,
        count: usize,
        max_length: usize,
        is_final: bool,
    ) -> ReadOutcome {
        self.read(&ReadRequest::exact(count, max_length, is_final)).await
    }

    pub async fn read(&mut self, request: &ReadRequest) -> ReadOutcome {
        let mut data = Vec::new();
        match self.read_into(request, &mut data).await {
            ReadOutcome::Ok { length, .. } => ReadOutcome::Ok { data, length },
            other => other,
        }
    }

    /// Run `request`, streaming the payload into `sink`.
    pub async fn read_into<W: Write>(&mut self, request: &ReadRequest, sink: &mut W) -> ReadOutcome {
        if self.is_closed() {
            return ReadOutcome::ConnectionClosed;
        }

        let mut scan = match request.scan() {
            Ok(scan) => scan,
            Err(e) => return ReadOutcome::Error(e),
        };
        let mut closed = self.closed.subscribe();
        while !scan.is_done() {
            let received = tokio::select! {
                biased;
                _ = closed.wait_for(|closed| *closed) => Received::Closed,
                received = self.receive_within(scan.next_read_len(), request.idle_timeout) => received,
            };

            let chunk = match received {
                Received::Data(chunk) => chunk,
                Received::Closed => return ReadOutcome::ConnectionClosed,
                Received::TimedOut => return ReadOutcome::TimedOut,
                Received::Failed(e) => return ReadOutcome::from_io(e),
            };

            match scan.feed(&chunk, sink) {
                Ok(progress) => {
                    if progress.consumed < chunk.len() {
                        self.append_buffer(&chunk[progress.consumed..]);
                    }
                }
                Err(e) => return ReadOutcome::Error(e),
            }
        }

        scan.finish()
    }

    async fn receive_within(&mut self, max: usize, idle: Option<Duration>) -> Received {
        let received = match idle.filter(|t| !t.is_zero()) {
            Some(idle) => match timeout(idle, self.receive(max)).await {
                Ok(received) => received,
                Err(_) => return Received::TimedOut,
            },
            None => self.receive(max).await,
        };

        match received {
            Ok(chunk) if chunk.is_empty() => {
                trace!("peer closed the stream mid-read");
                Received::Closed
            }
            Ok(chunk) => Received::Data(chunk),
            Err(_) if self.is_closed() => Received::Closed,
            Err(e) => Received::Failed(e),
        }
    }

    /// Shut the write side down and mark the connection closed. Idempotent.
    pub async fn shutdown(&mut self) {
        self.closed.send_replace(true);
        if !self.shut_down {
            self.shut_down = true;
            if let Err(e) = self.stream.shutdown().await {
                trace!("shutdown failed: {e}");
            }
        }
    }

    /// Shut down and discard anything buffered. Idempotent.
    pub async fn close(&mut self) {
        self.shutdown().await;
        self.pending.clear();
    }

    fn touch(&mut self) {
        if let Some(callback) = self.on_activity.as_mut() {
            callback();
        }
    }
}

impl<S> AsyncConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Start `request` on a spawned task.
    ///
    /// `on_complete` runs exactly once with the connection and the outcome;
    /// issuing the next read is up to it.
    pub fn begin_read<F>(mut self, request: ReadRequest, on_complete: F) -> JoinHandle<()>
    where
        F: FnOnce(AsyncConnection<S>, ReadOutcome) + Send + 'static,
    {
        tokio::spawn(async move {
            let outcome = self.read(&request).await;
            if let ReadOutcome::Error(e) = &outcome {
                warn!("read failed: {e}");
            }
            on_complete(self, outcome);
        })
    }
}
