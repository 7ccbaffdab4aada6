//! Read-ahead buffer shared by the blocking and tokio connections

use bytes::{Bytes, BytesMut};

/// Size of a single transport read.
pub const READ_CHUNK_SIZE: usize = 8192;

/// FIFO of bytes received from the transport but not yet consumed.
///
/// Bytes leave through [`take`](Self::take) and only come back through
/// [`push_front`](Self::push_front).
#[derive(Debug, Default)]
pub struct PendingBuffer {
    buf: BytesMut,
}

impl PendingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of unread bytes.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Replace the (empty) buffer with a freshly received chunk.
    pub fn fill(&mut self, chunk: BytesMut) {
        debug_assert!(self.is_empty());
        self.buf = chunk;
    }

    /// Take up to `max` bytes from the front.
    pub fn take(&mut self, max: usize) -> Bytes {
        let n = max.min(self.buf.len());
        self.buf.split_to(n).freeze()
    }

    /// Put bytes back in front of everything still buffered.
    pub fn push_front(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }

        let mut rebuilt = BytesMut::with_capacity(data.len() + self.buf.len());
        rebuilt.extend_from_slice(data);
        rebuilt.extend_from_slice(&self.buf);
        self.buf = rebuilt;
    }

    /// Drop everything buffered.
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}
