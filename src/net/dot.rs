//! Dot-stuffing for bodies framed by a lone "." line (RFC 5321 4.5.2)
//!
//! Lines are split after each `\n`; line terminators are carried through
//! unchanged, so `decode(&encode(x)) == x` for any input.

use crate::net::reader::LINE_TERMINATOR;

/// Double the leading `.` of every line that starts with one.
pub fn encode(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + body.len() / 64 + 1);
    for line in body.split_inclusive(|&b| b == b'\n') {
        if line.first() == Some(&b'.') {
            out.push(b'.');
        }
        out.extend_from_slice(line);
    }
    out
}

/// Remove one leading `.` from every line that starts with one.
pub fn decode(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len());
    for line in body.split_inclusive(|&b| b == b'\n') {
        match line.strip_prefix(b".") {
            Some(rest) => out.extend_from_slice(rest),
            None => out.extend_from_slice(line),
        }
    }
    out
}

/// Encode `body` for transmission and append the end-of-body marker.
///
/// An unterminated last line is closed with CRLF first, so the marker always
/// sits on its own line.
pub fn frame_body(body: &[u8]) -> Vec<u8> {
    let mut out = encode(body);
    if !out.is_empty() && !out.ends_with(LINE_TERMINATOR) {
        if out.ends_with(b"\n") {
            out.pop();
        }
        out.extend_from_slice(LINE_TERMINATOR);
    }
    out.extend_from_slice(b".\r\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_escapes_leading_dots() {
        assert_eq!(encode(b"a\r\n.\r\n..b\r\n"), b"a\r\n..\r\n...b\r\n");
        assert_eq!(encode(b".start"), b"..start");
        assert_eq!(encode(b"mid.dle\r\n"), b"mid.dle\r\n");
    }

    #[test]
    fn test_decode_removes_one_dot() {
        assert_eq!(decode(b"line1\r\n.line2\r\n"), b"line1\r\nline2\r\n");
        assert_eq!(decode(b"...\r\n"), b"..\r\n");
    }

    #[test]
    fn test_roundtrip_edge_inputs() {
        let inputs: [&[u8]; 8] = [
            b"",
            b".",
            b"\n.",
            b".\r\n.\r\n",
            b"no dots",
            b"a\n.b\r\n..c",
            b"\r\n\r\n.",
            &[0, b'.', b'\n', b'.', 0xff],
        ];
        for input in inputs {
            assert_eq!(decode(&encode(input)), input);
        }
    }

    #[test]
    fn test_encode_never_emits_bare_dot_line() {
        let encoded = encode(b"x\r\n.\r\ny");
        assert!(!encoded.split(|&b| b == b'\n').any(|line| line == b"." || line == b".\r"));
    }

    #[test]
    fn test_frame_body() {
        assert_eq!(frame_body(b"hello"), b"hello\r\n.\r\n");
        assert_eq!(frame_body(b"hello\r\n"), b"hello\r\n.\r\n");
        assert_eq!(frame_body(b"hello\n"), b"hello\r\n.\r\n");
        assert_eq!(frame_body(b".\r\n"), b"..\r\n.\r\n");
        assert_eq!(frame_body(b""), b".\r\n");
    }
}
