//! Read requests and the incremental scan shared by both execution models
//!
//! A [`ReadRequest`] describes what to read. The connection types turn it
//! into a [`Scan`], feed it whatever chunks the transport delivers, and push
//! back any bytes the scan did not consume. The scan itself never touches the
//! transport, so blocking and tokio reads behave identically.

use std::io::{self, Write};
use std::time::Duration;

use crate::net::buffer::READ_CHUNK_SIZE;
use crate::net::error::ReadOutcome;
use crate::net::matcher::TerminatorMatcher;

/// Line break used by every supported protocol.
pub const LINE_TERMINATOR: &[u8] = b"\r\n";

/// End-of-body marker for dot-framed bodies.
pub const BODY_TERMINATOR: &[u8] = b"\r\n.\r\n";

/// What a read waits for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadKind {
    /// Read until `terminator`. With `line_start`, the scan starts as if a
    /// line break had just been consumed.
    Terminator { terminator: Vec<u8>, line_start: bool },
    /// Read exactly `count` bytes. `last` is only meaningful to the caller
    /// chaining several counted reads into one payload.
    Count { count: usize, last: bool },
}

/// A single read on a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRequest {
    pub kind: ReadKind,
    /// Maximum payload length in bytes, terminator excluded.
    pub max_length: usize,
    /// Maximum time to wait for the next chunk. `None` waits forever.
    pub idle_timeout: Option<Duration>,
}

impl ReadRequest {
    /// Read until `terminator`.
    pub fn until(terminator: &[u8], max_length: usize) -> Self {
        Self {
            kind: ReadKind::Terminator {
                terminator: terminator.to_vec(),
                line_start: false,
            },
            max_length,
            idle_timeout: None,
        }
    }

    /// Read one CRLF-terminated line.
    pub fn line(max_length: usize) -> Self {
        Self::until(LINE_TERMINATOR, max_length)
    }

    /// Read a dot-framed body that starts right after a line break.
    ///
    /// The payload keeps the line break in front of the final `.` and is
    /// still dot-stuffed; pass it to [`decode`](crate::net::dot::decode).
    pub fn dot_body(max_length: usize) -> Self {
        Self {
            kind: ReadKind::Terminator {
                terminator: BODY_TERMINATOR.to_vec(),
                line_start: true,
            },
            max_length,
            idle_timeout: None,
        }
    }

    /// Read exactly `count` bytes.
    pub fn exact(count: usize, max_length: usize, last: bool) -> Self {
        Self {
            kind: ReadKind::Count { count, last },
            max_length,
            idle_timeout: None,
        }
    }

    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// The caller-side "final chunk" flag of a counted read.
    pub fn is_final(&self) -> bool {
        matches!(self.kind, ReadKind::Count { last: true, .. })
    }

    /// Start scanning for this request. An empty terminator is rejected with
    /// `InvalidInput` before anything is read.
    pub(crate) fn scan(&self) -> io::Result<Scan> {
        Ok(match &self.kind {
            ReadKind::Terminator { terminator, .. } if terminator.is_empty() => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "terminator must not be empty",
                ));
            }
            ReadKind::Terminator {
                terminator,
                line_start,
            } => {
                let (matcher, line_break) = if *line_start {
                    let line_break = LINE_TERMINATOR.len().min(terminator.len() - 1);
                    (TerminatorMatcher::primed(terminator, line_break), line_break)
                } else {
                    (TerminatorMatcher::new(terminator), 0)
                };
                Scan::Terminator(TerminatorScan {
                    phantom: matcher.matched(),
                    line_break,
                    matcher,
                    max_length: self.max_length,
                    payload: 0,
                    consumed: 0,
                    exceeded: false,
                })
            }
            ReadKind::Count { count, .. } => Scan::Count(CountScan {
                remaining: *count,
                consumed: 0,
                exceeded: *count > self.max_length,
            }),
        })
    }
}

/// How much of a chunk the scan used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Progress {
    pub consumed: usize,
    pub done: bool,
}

pub(crate) enum Scan {
    Terminator(TerminatorScan),
    Count(CountScan),
}

impl Scan {
    pub fn is_done(&self) -> bool {
        match self {
            Scan::Terminator(scan) => scan.matcher.is_complete(),
            Scan::Count(scan) => scan.remaining == 0,
        }
    }

    /// Largest chunk that may be requested from the connection next.
    pub fn next_read_len(&self) -> usize {
        match self {
            Scan::Terminator(scan) => scan.matcher.next_read_len(),
            Scan::Count(scan) => scan.remaining.min(READ_CHUNK_SIZE),
        }
    }

    /// Consume bytes from `chunk`, stopping at the end of the unit.
    pub fn feed<W: Write>(&mut self, chunk: &[u8], sink: &mut W) -> io::Result<Progress> {
        match self {
            Scan::Terminator(scan) => scan.feed(chunk, sink),
            Scan::Count(scan) => scan.feed(chunk, sink),
        }
    }

    /// Outcome once [`is_done`](Self::is_done) holds. `data` is left empty;
    /// the caller owns the sink.
    pub fn finish(&self) -> ReadOutcome {
        let (exceeded, consumed) = match self {
            Scan::Terminator(scan) => (scan.exceeded, scan.consumed),
            Scan::Count(scan) => (scan.exceeded, scan.consumed),
        };
        if exceeded {
            ReadOutcome::LengthExceeded
        } else {
            ReadOutcome::Ok {
                data: Vec::new(),
                length: consumed,
            }
        }
    }
}

pub(crate) struct TerminatorScan {
    matcher: TerminatorMatcher,
    /// Primed terminator bytes that never came from the connection.
    phantom: usize,
    /// Leading terminator bytes that belong to the payload once matched.
    line_break: usize,
    max_length: usize,
    payload: usize,
    consumed: usize,
    exceeded: bool,
}

impl TerminatorScan {
    fn feed<W: Write>(&mut self, chunk: &[u8], sink: &mut W) -> io::Result<Progress> {
        let mut out = Vec::with_capacity(chunk.len());
        let mut used = 0;

        for &byte in chunk {
            let held = self.matcher.matched();
            let step = self.matcher.push(byte);
            used += 1;

            let skip = step.released.min(self.phantom);
            self.phantom -= skip;
            if step.released > skip && !self.exceeded {
                let count = step.released - skip;
                if self.payload + count > self.max_length {
                    self.exceeded = true;
                } else {
                    // Released bytes are the held prefix followed by `byte`.
                    let from_prefix = step.released.min(held);
                    if from_prefix > skip {
                        out.extend_from_slice(&self.matcher.terminator()[skip..from_prefix]);
                    }
                    if step.released > held {
                        out.push(byte);
                    }
                    self.payload += count;
                }
            }

            if step.complete {
                if self.line_break > self.phantom && !self.exceeded {
                    let tail = &self.matcher.terminator()[self.phantom..self.line_break];
                    if self.payload + tail.len() > self.max_length {
                        self.exceeded = true;
                    } else {
                        out.extend_from_slice(tail);
                        self.payload += tail.len();
                    }
                }
                break;
            }
        }

        self.consumed += used;
        if !out.is_empty() {
            sink.write_all(&out)?;
        }

        Ok(Progress {
            consumed: used,
            done: self.matcher.is_complete(),
        })
    }
}

pub(crate) struct CountScan {
    remaining: usize,
    consumed: usize,
    exceeded: bool,
}

impl CountScan {
    fn feed<W: Write>(&mut self, chunk: &[u8], sink: &mut W) -> io::Result<Progress> {
        let n = chunk.len().min(self.remaining);
        if !self.exceeded && n > 0 {
            sink.write_all(&chunk[..n])?;
        }
        self.remaining -= n;
        self.consumed += n;

        Ok(Progress {
            consumed: n,
            done: self.remaining == 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Run `request` over `chunks`, returning the outcome, the sink and the
    /// bytes left over after the unit.
    fn run(request: &ReadRequest, chunks: &[&[u8]]) -> (ReadOutcome, Vec<u8>, Vec<u8>) {
        let mut scan = request.scan().unwrap();
        let mut sink = Vec::new();
        let mut rest = Vec::new();

        for chunk in chunks {
            if scan.is_done() {
                rest.extend_from_slice(chunk);
                continue;
            }
            let progress = scan.feed(chunk, &mut sink).unwrap();
            rest.extend_from_slice(&chunk[progress.consumed..]);
        }

        let outcome = if scan.is_done() {
            scan.finish()
        } else {
            ReadOutcome::ConnectionClosed
        };
        (outcome, sink, rest)
    }

    #[test]
    fn test_line_single_chunk() {
        let (outcome, sink, rest) = run(&ReadRequest::line(1024), &[b"USER bob\r\nPASS x\r\n"]);
        assert!(matches!(outcome, ReadOutcome::Ok { length: 10, .. }));
        assert_eq!(sink, b"USER bob");
        assert_eq!(rest, b"PASS x\r\n");
    }

    #[test]
    fn test_every_split_matches_single_chunk() {
        let input: &[u8] = b"a.\r\n..\r\r\n.x\r\n.\r\nNEXT";
        let request = ReadRequest::until(BODY_TERMINATOR, 1024);
        let (_, expected, expected_rest) = run(&request, &[input]);
        assert_eq!(expected, b"a.\r\n..\r\r\n.x");
        assert_eq!(expected_rest, b"NEXT");

        for size in 1..input.len() {
            let chunks: Vec<&[u8]> = input.chunks(size).collect();
            let (outcome, sink, rest) = run(&request, &chunks);
            assert!(outcome.is_ok(), "chunk size {size}");
            assert_eq!(sink, expected, "chunk size {size}");
            assert_eq!(rest, expected_rest, "chunk size {size}");
        }
    }

    #[test]
    fn test_length_cap_keeps_scanning() {
        let (outcome, _, rest) = run(&ReadRequest::line(4), &[b"abcdefgh\r\nok\r\n"]);
        assert!(matches!(outcome, ReadOutcome::LengthExceeded));
        assert_eq!(rest, b"ok\r\n");
    }

    #[test]
    fn test_length_cap_is_inclusive() {
        let (outcome, sink, _) = run(&ReadRequest::line(4), &[b"abcd\r\n"]);
        assert!(outcome.is_ok());
        assert_eq!(sink, b"abcd");
    }

    #[test]
    fn test_dot_body_may_be_empty() {
        let (outcome, sink, rest) = run(&ReadRequest::dot_body(100), &[b".\r\nQUIT\r\n"]);
        assert!(matches!(outcome, ReadOutcome::Ok { length: 3, .. }));
        assert!(sink.is_empty());
        assert_eq!(rest, b"QUIT\r\n");
    }

    #[test]
    fn test_dot_body_keeps_last_line_break() {
        let input: &[u8] = b"line1\r\n.line2\r\n.\r\nQUIT\r\n";
        for size in 1..input.len() {
            let chunks: Vec<&[u8]> = input.chunks(size).collect();
            let (outcome, sink, rest) = run(&ReadRequest::dot_body(100), &chunks);
            assert!(matches!(outcome, ReadOutcome::Ok { length: 18, .. }), "chunk size {size}");
            assert_eq!(sink, b"line1\r\n.line2\r\n", "chunk size {size}");
            assert_eq!(rest, b"QUIT\r\n", "chunk size {size}");
        }
    }

    #[test]
    fn test_dot_body_single_empty_line() {
        let (outcome, sink, _) = run(&ReadRequest::dot_body(100), &[b"\r\n.\r\n"]);
        assert!(matches!(outcome, ReadOutcome::Ok { length: 5, .. }));
        assert_eq!(sink, b"\r\n");
    }

    #[test]
    fn test_dot_body_cap_includes_line_break() {
        let (outcome, _, _) = run(&ReadRequest::dot_body(4), &[b"abcd\r\n.\r\n"]);
        assert!(matches!(outcome, ReadOutcome::LengthExceeded));
        let (outcome, sink, _) = run(&ReadRequest::dot_body(6), &[b"abcd\r\n.\r\n"]);
        assert!(outcome.is_ok());
        assert_eq!(sink, b"abcd\r\n");
    }

    #[test]
    fn test_exact_count_one_byte_chunks() {
        let input = b"12345678";
        let chunks: Vec<&[u8]> = input.chunks(1).collect();
        let (outcome, sink, rest) = run(&ReadRequest::exact(5, 100, false), &chunks);
        assert!(matches!(outcome, ReadOutcome::Ok { length: 5, .. }));
        assert_eq!(sink, b"12345");
        assert_eq!(rest, b"678");
    }

    #[test]
    fn test_exact_count_over_cap_is_drained() {
        let (outcome, sink, rest) = run(&ReadRequest::exact(5, 3, true), &[b"12345NEXT"]);
        assert!(matches!(outcome, ReadOutcome::LengthExceeded));
        assert!(sink.is_empty());
        assert_eq!(rest, b"NEXT");
    }

    #[test]
    fn test_zero_count_is_done() {
        let request = ReadRequest::exact(0, 10, true);
        assert!(request.is_final());
        assert!(request.scan().unwrap().is_done());
    }

    #[test]
    fn test_empty_terminator_is_invalid_input() {
        let err = ReadRequest::until(b"", 10).scan().err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);

        let primed = ReadRequest {
            kind: ReadKind::Terminator {
                terminator: Vec::new(),
                line_start: true,
            },
            max_length: 10,
            idle_timeout: None,
        };
        assert_eq!(primed.scan().err().unwrap().kind(), io::ErrorKind::InvalidInput);
    }
}
