//! Incremental terminator detection

/// Chunk size requested from the connection while no partial match is pending.
pub const GREEDY_READ_LEN: usize = 4096;

/// Result of feeding one byte to a [`TerminatorMatcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    /// Number of previously held bytes (plus possibly the new byte) that can
    /// no longer be part of the terminator and belong to the payload.
    pub released: usize,
    /// The terminator has been seen in full.
    pub complete: bool,
}

/// Detects a fixed byte sequence across arbitrary chunk boundaries.
///
/// The matcher keeps the length `k` of the longest terminator prefix that is
/// also a suffix of the input seen so far. On a mismatch it falls back
/// through the failure table instead of rescanning, so terminators with
/// internal repetition (`"\r\n.\r\n"`, `"aab"`) are matched at their true
/// position and the whole scan stays linear.
///
/// While a partial match is pending, the held-back input is exactly
/// `terminator[..k]`.
#[derive(Debug, Clone)]
pub struct TerminatorMatcher {
    terminator: Vec<u8>,
    failure: Vec<usize>,
    matched: usize,
}

impl TerminatorMatcher {
    /// Create a matcher for `terminator`. An empty terminator is complete
    /// from the start.
    pub fn new(terminator: &[u8]) -> Self {
        Self {
            terminator: terminator.to_vec(),
            failure: failure_table(terminator),
            matched: 0,
        }
    }

    /// Create a matcher that behaves as if `prefix` bytes of the terminator
    /// had already been seen.
    ///
    /// Used for dot-framed bodies, where the line break that ended the
    /// command line is also the first half of the end-of-body marker.
    pub fn primed(terminator: &[u8], prefix: usize) -> Self {
        let mut matcher = Self::new(terminator);
        matcher.matched = prefix.min(terminator.len().saturating_sub(1));
        matcher
    }

    /// Terminator bytes this matcher looks for.
    pub fn terminator(&self) -> &[u8] {
        &self.terminator
    }

    /// Length of the currently matched terminator prefix.
    pub fn matched(&self) -> usize {
        self.matched
    }

    /// Whether the full terminator has been seen.
    pub fn is_complete(&self) -> bool {
        self.matched == self.terminator.len()
    }

    /// How many bytes may be requested from the connection next.
    ///
    /// Exactly one while a partial match is pending, so the read never runs
    /// past the terminator; a larger chunk otherwise.
    pub fn next_read_len(&self) -> usize {
        if self.matched > 0 { 1 } else { GREEDY_READ_LEN }
    }

    /// Feed one byte.
    /// Feeding a complete matcher releases the byte and leaves it complete.
    pub fn push(&mut self, byte: u8) -> Step {
        if self.is_complete() {
            return Step {
                released: 1,
                complete: true,
            };
        }

        let held = self.matched;
        let mut k = self.matched;
        loop {
            if self.terminator[k] == byte {
                k += 1;
                break;
            }
            if k == 0 {
                break;
            }
            k = self.failure[k - 1];
        }
        self.matched = k;

        Step {
            released: held + 1 - k,
            complete: k == self.terminator.len(),
        }
    }
}

/// Classic prefix function: `table[i]` is the length of the longest proper
/// prefix of `pattern[..=i]` that is also its suffix.
fn failure_table(pattern: &[u8]) -> Vec<usize> {
    let mut table = vec![0; pattern.len()];
    let mut k = 0;
    for i in 1..pattern.len() {
        while k > 0 && pattern[i] != pattern[k] {
            k = table[k - 1];
        }
        if pattern[i] == pattern[k] {
            k += 1;
        }
        table[i] = k;
    }
    table
}
