//! Blocking buffered connection

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tracing::{trace, warn};

use crate::net::buffer::{PendingBuffer, READ_CHUNK_SIZE};
use crate::net::error::{NetError, ReadOutcome};
use crate::net::reader::ReadRequest;

/// Callback fired whenever bytes move in either direction.
pub type ActivityCallback = Box<dyn FnMut() + Send>;

/// Unblocks a read that is waiting on the transport.
pub type Interrupter = Arc<dyn Fn() + Send + Sync>;

/// Byte stream underneath a [`BufferedConnection`].
pub trait Transport: Read + Write {
    /// Bound how long a single read may block. `None` blocks indefinitely.
    fn set_idle_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;

    /// Bytes the OS already holds for this stream.
    fn available(&self) -> io::Result<usize> {
        Ok(0)
    }

    fn local_addr(&self) -> io::Result<SocketAddr>;

    fn peer_addr(&self) -> io::Result<SocketAddr>;

    fn set_nodelay(&mut self, _nodelay: bool) -> io::Result<()> {
        Ok(())
    }

    /// Shut down both directions.
    fn shutdown(&mut self) -> io::Result<()>;

    /// A handle that can unblock a pending read from another thread.
    fn interrupter(&self) -> Option<Interrupter> {
        None
    }
}

impl Transport for TcpStream {
    fn set_idle_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.set_read_timeout(timeout.filter(|t| !t.is_zero()))
    }

    fn available(&self) -> io::Result<usize> {
        let mut probe = vec![0u8; 64 * 1024];
        self.set_nonblocking(true)?;
        let peeked = self.peek(&mut probe);
        self.set_nonblocking(false)?;

        match peeked {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::local_addr(self)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::peer_addr(self)
    }

    fn set_nodelay(&mut self, nodelay: bool) -> io::Result<()> {
        TcpStream::set_nodelay(self, nodelay)
    }

    fn shutdown(&mut self) -> io::Result<()> {
        match TcpStream::shutdown(self, Shutdown::Both) {
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }

    fn interrupter(&self) -> Option<Interrupter> {
        let clone = self.try_clone().ok()?;
        Some(Arc::new(move || {
            let _ = clone.shutdown(Shutdown::Both);
        }))
    }
}

/// Closes a connection from outside the thread that owns it.
///
/// A read outstanding at the time of the close completes with
/// [`ReadOutcome::ConnectionClosed`].
#[derive(Clone)]
pub struct CloseHandle {
    closed: Arc<AtomicBool>,
    interrupt: Option<Interrupter>,
}

impl CloseHandle {
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            if let Some(interrupt) = &self.interrupt {
                interrupt();
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// A transport with a read-ahead buffer and push-back.
///
/// Owned by exactly one session; `&mut self` on every read serializes
/// operations, so at most one read is ever outstanding.
pub struct BufferedConnection<S: Transport> {
    transport: S,
    pending: PendingBuffer,
    closed: Arc<AtomicBool>,
    shut_down: bool,
    on_activity: Option<ActivityCallback>,
}

impl<S: Transport> BufferedConnection<S> {
    pub fn new(transport: S) -> Self {
        Self {
            transport,
            pending: PendingBuffer::new(),
            closed: Arc::new(AtomicBool::new(false)),
            shut_down: false,
            on_activity: None,
        }
    }

    /// Register the activity callback, replacing any previous one.
    pub fn on_activity(&mut self, callback: impl FnMut() + Send + 'static) {
        self.on_activity = Some(Box::new(callback));
    }

    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle {
            closed: self.closed.clone(),
            interrupt: self.transport.interrupter(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.transport.local_addr()
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.transport.peer_addr()
    }

    pub fn set_nodelay(&mut self, nodelay: bool) -> io::Result<()> {
        self.transport.set_nodelay(nodelay)
    }

    pub fn get_ref(&self) -> &S {
        &self.transport
    }

    /// Bytes already buffered.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    /// Buffered bytes plus what the OS reports as readable.
    pub fn available(&self) -> io::Result<usize> {
        Ok(self.pending.len() + self.transport.available()?)
    }

    /// Return up to `max` bytes, reading from the transport only when nothing
    /// is buffered. An empty result means end of stream.
    pub fn receive(&mut self, max: usize) -> io::Result<Bytes> {
        if self.is_closed() {
            return Err(io::ErrorKind::NotConnected.into());
        }

        if self.pending.is_empty() {
            let mut chunk = BytesMut::zeroed(READ_CHUNK_SIZE);
            let n = loop {
                match self.transport.read(&mut chunk) {
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    other => break other?,
                }
            };
            if n == 0 {
                return Ok(Bytes::new());
            }
            self.touch();
            chunk.truncate(n);
            self.pending.fill(chunk);
        }

        Ok(self.pending.take(max))
    }

    /// Push bytes back so the next [`receive`](Self::receive) returns them
    /// before anything else.
    pub fn append_buffer(&mut self, data: &[u8]) {
        self.pending.push_front(data);
    }

    /// Single write; returns how many bytes the transport accepted.
    pub fn send(&mut self, bytes: &[u8]) -> Result<usize, NetError> {
        if self.is_closed() {
            return Err(NetError::ConnectionClosed);
        }

        let n = self.transport.write(bytes).map_err(NetError::from_send)?;
        if n == 0 && !bytes.is_empty() {
            return Err(NetError::ConnectionClosed);
        }
        if n > 0 {
            self.touch();
        }
        Ok(n)
    }

    /// Write all of `bytes`, looping over partial writes.
    pub fn send_all(&mut self, bytes: &[u8]) -> Result<(), NetError> {
        let mut sent = 0;
        while sent < bytes.len() {
            match self.send(&bytes[sent..]) {
                Ok(n) => sent += n,
                Err(NetError::Io(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        self.transport.flush().map_err(NetError::from_send)
    }

    /// Read until the given terminator; the terminator is stripped.
    pub fn read_until_terminator(
        &mut self,
        terminator: &[u8],
        max_length: usize,
        idle_timeout: Option<Duration>,
    ) -> ReadOutcome {
        self.read(&ReadRequest::until(terminator, max_length).with_idle_timeout(idle_timeout))
    }

    /// Read exactly `count` bytes. `is_final` is not interpreted here.
    pub fn read_exact_count(
        &mut self,
        count: usize,
        max_length: usize,
        is_final: bool,
    ) -> ReadOutcome {
        self.read(&ReadRequest::exact(count, max_length, is_final))
    }

    /// Run `request`, collecting the payload in memory.
    pub fn read(&mut self, request: &ReadRequest) -> ReadOutcome {
        let mut data = Vec::new();
        match self.read_into(request, &mut data) {
            ReadOutcome::Ok { length, .. } => ReadOutcome::Ok { data, length },
            other => other,
        }
    }

    /// Run `request`, streaming the payload into `sink`.
    ///
    /// On `LengthExceeded` the sink holds whatever arrived before the cap was
    /// hit.
    pub fn read_into<W: Write>(&mut self, request: &ReadRequest, sink: &mut W) -> ReadOutcome {
        if self.is_closed() {
            return ReadOutcome::ConnectionClosed;
        }
        if let Err(e) = self.transport.set_idle_timeout(request.idle_timeout) {
            return self.read_failed(e);
        }

        let mut scan = match request.scan() {
            Ok(scan) => scan,
            Err(e) => return ReadOutcome::Error(e),
        };
        while !scan.is_done() {
            let chunk = match self.receive(scan.next_read_len()) {
                Ok(chunk) => chunk,
                Err(e) => return self.read_failed(e),
            };
            if chunk.is_empty() {
                trace!("peer closed the stream mid-read");
                return ReadOutcome::ConnectionClosed;
            }

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

    /// Shut the transport down. Idempotent.
    pub fn shutdown(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        if !self.shut_down {
            self.shut_down = true;
            if let Err(e) = self.transport.shutdown() {
                warn!("shutdown failed: {e}");
            }
        }
    }

    /// Shut down and discard anything buffered. Idempotent.
    pub fn close(&mut self) {
        self.shutdown();
        self.pending.clear();
    }

    fn read_failed(&self, error: io::Error) -> ReadOutcome {
        if self.is_closed() {
            ReadOutcome::ConnectionClosed
        } else {
            ReadOutcome::from_io(error)
        }
    }

    fn touch(&mut self) {
        if let Some(callback) = self.on_activity.as_mut() {
            callback();
        }
    }
}

impl BufferedConnection<TcpStream> {
    /// Connect to `addr` over TCP.
    pub fn connect(addr: impl std::net::ToSocketAddrs) -> io::Result<Self> {
        Ok(Self::new(TcpStream::connect(addr)?))
    }
}
