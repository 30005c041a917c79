//! Transport framing.
//!
//! A caller may speak either LSP-style `Content-Length` framing or bare
//! newline-delimited JSON. [`Framer`] works out which from the first message
//! that parses and pins that choice for the rest of the session. It performs
//! no I/O: bytes go in through [`Framer::push`], complete messages come out.

use serde_json::Value;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
const CONTENT_LENGTH: &str = "content-length";
/// Largest body a `Content-Length` header may announce.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Message delimiting convention of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Framing {
    /// Nothing has parsed yet.
    #[default]
    Undetermined,
    /// `Content-Length: N\r\n\r\n` followed by N bytes of JSON.
    LengthPrefixed,
    /// One JSON value per line.
    LineDelimited,
}

impl Framing {
    pub fn as_str(self) -> &'static str {
        match self {
            Framing::Undetermined => "undetermined",
            Framing::LengthPrefixed => "length-prefixed",
            Framing::LineDelimited => "line-delimited",
        }
    }

    /// Serialize one outgoing message. Undetermined sessions answer in line mode.
    pub fn encode(self, message: &Value) -> Vec<u8> {
        let body = message.to_string();
        match self {
            Framing::LengthPrefixed => {
                let mut out = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
                out.extend_from_slice(body.as_bytes());
                out
            }
            Framing::Undetermined | Framing::LineDelimited => {
                let mut out = body.into_bytes();
                out.push(b'\n');
                out
            }
        }
    }
}

impl std::fmt::Display for Framing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one extraction attempt.
enum Step {
    /// A complete message was consumed.
    Message(Value),
    /// Bytes were consumed without producing a message.
    Skipped,
    /// The buffer needs more data.
    Wait,
}

/// Per-connection reassembly buffer.
#[derive(Debug, Default)]
pub struct Framer {
    buf: Vec<u8>,
    framing: Framing,
}

impl Framer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Bytes held back waiting for the rest of a message.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Append `bytes` and return every message that is now complete.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Value> {
        self.buf.extend_from_slice(bytes);
        let mut messages = Vec::new();
        loop {
            self.skip_leading_whitespace();
            if self.buf.is_empty() {
                break;
            }
            let step = match self.framing {
                Framing::LengthPrefixed => self.next_length_prefixed(),
                Framing::LineDelimited => self.next_line(),
                Framing::Undetermined => self.next_undetermined(),
            };
            match step {
                Step::Message(value) => messages.push(value),
                Step::Skipped => continue,
                Step::Wait => break,
            }
        }
        messages
    }

    /// Serialize a reply with the session's framing.
    pub fn encode(&self, message: &Value) -> Vec<u8> {
        self.framing.encode(message)
    }

    fn next_undetermined(&mut self) -> Step {
        if starts_like_json(&self.buf) {
            return self.next_line();
        }
        if find(&self.buf, HEADER_TERMINATOR).is_some() {
            return self.next_length_prefixed();
        }
        let Some(end) = self.buf.iter().position(|b| *b == b'\n') else {
            return Step::Wait;
        };
        let line = trim_line(&self.buf[..end]);
        if looks_like_header(line) {
            // Rest of the header block has not arrived yet.
            return Step::Wait;
        }
        tracing::warn!(
            bytes = end + 1,
            "Dropping unrecognised input before framing was established"
        );
        self.buf.drain(..=end);
        Step::Skipped
    }

    fn next_length_prefixed(&mut self) -> Step {
        if starts_like_json(&self.buf) {
            let Some(end) = self.buf.iter().position(|b| *b == b'\n') else {
                return Step::Wait;
            };
            tracing::warn!(
                framing = %self.framing,
                bytes = end + 1,
                "Dropping unframed line on a length-prefixed session"
            );
            self.buf.drain(..=end);
            return Step::Skipped;
        }
        let Some(header_end) = find(&self.buf, HEADER_TERMINATOR) else {
            return Step::Wait;
        };
        let body_start = header_end + HEADER_TERMINATOR.len();

        let Some(length) = content_length(&self.buf[..header_end]) else {
            tracing::warn!(
                bytes = body_start,
                "Malformed header block, dropping through terminator"
            );
            self.buf.drain(..body_start);
            return Step::Skipped;
        };
        let Some(frame_end) = body_start
            .checked_add(length)
            .filter(|_| length <= MAX_FRAME_BYTES)
        else {
            tracing::warn!(
                length,
                max = MAX_FRAME_BYTES,
                "Content-Length out of range, dropping through terminator"
            );
            self.buf.drain(..body_start);
            return Step::Skipped;
        };
        if self.buf.len() < frame_end {
            return Step::Wait;
        }

        let frame: Vec<u8> = self.buf.drain(..frame_end).collect();
        match serde_json::from_slice::<Value>(&frame[body_start..]) {
            Ok(value) => {
                self.pin(Framing::LengthPrefixed);
                Step::Message(value)
            }
            Err(e) => {
                tracing::warn!(error = %e, length, "Dropping unparseable framed body");
                Step::Skipped
            }
        }
    }

    fn next_line(&mut self) -> Step {
        let Some(end) = self.buf.iter().position(|b| *b == b'\n') else {
            return Step::Wait;
        };
        let line: Vec<u8> = self.buf.drain(..=end).collect();
        let line = trim_line(&line);
        if line.is_empty() {
            return Step::Skipped;
        }
        match serde_json::from_slice::<Value>(line) {
            Ok(value) => {
                self.pin(Framing::LineDelimited);
                Step::Message(value)
            }
            Err(e) => {
                tracing::warn!(
                    framing = %self.framing,
                    error = %e,
                    bytes = line.len(),
                    "Dropping unparseable line"
                );
                Step::Skipped
            }
        }
    }

    fn pin(&mut self, framing: Framing) {
        if self.framing == Framing::Undetermined {
            tracing::debug!(framing = %framing, "Framing detected");
            self.framing = framing;
        }
    }

    fn skip_leading_whitespace(&mut self) {
        let n = self
            .buf
            .iter()
            .take_while(|b| matches!(b, b' ' | b'\t' | b'\r' | b'\n'))
            .count();
        if n > 0 {
            self.buf.drain(..n);
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn starts_like_json(buf: &[u8]) -> bool {
    matches!(buf.first(), Some(b'{') | Some(b'['))
}

fn trim_line(line: &[u8]) -> &[u8] {
    line.trim_ascii()
}

/// `Name: value` with a token-character name.
fn looks_like_header(line: &[u8]) -> bool {
    let Some(colon) = line.iter().position(|b| *b == b':') else {
        return false;
    };
    colon > 0
        && line[..colon]
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || *b == b'-')
}

fn content_length(header: &[u8]) -> Option<usize> {
    let header = std::str::from_utf8(header).ok()?;
    header.split('\n').find_map(|line| {
        let (name, value) = line.trim_end_matches('\r').split_once(':')?;
        if name.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
            value.trim().parse().ok()
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn framed(value: &Value) -> Vec<u8> {
        Framing::LengthPrefixed.encode(value)
    }

    fn lined(value: &Value) -> Vec<u8> {
        Framing::LineDelimited.encode(value)
    }

    fn one_byte_at_a_time(stream: &[u8]) -> (Vec<Value>, Framing) {
        let mut framer = Framer::new();
        let mut out = Vec::new();
        for b in stream {
            out.extend(framer.push(std::slice::from_ref(b)));
        }
        (out, framer.framing())
    }

    #[test]
    fn test_line_delimited() {
        let mut framer = Framer::new();
        let msgs = framer.push(b"{\"id\":1,\"method\":\"ping\"}\n{\"id\":2,\"method\":\"ping\"}\n");
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[1]["id"], 2);
        assert_eq!(framer.framing(), Framing::LineDelimited);
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn test_line_with_crlf_and_blank_lines() {
        let mut framer = Framer::new();
        let msgs = framer.push(b"\r\n{\"id\":1}\r\n\r\n\n{\"id\":2}\r\n");
        assert_eq!(msgs, vec![json!({"id": 1}), json!({"id": 2})]);
    }

    #[test]
    fn test_partial_line_is_retained() {
        let mut framer = Framer::new();
        assert!(framer.push(b"{\"id\":1,").is_empty());
        assert_eq!(framer.framing(), Framing::Undetermined);
        let msgs = framer.push(b"\"method\":\"x\"}\n");
        assert_eq!(msgs, vec![json!({"id": 1, "method": "x"})]);
    }

    #[test]
    fn test_length_prefixed() {
        let a = json!({"id": 1, "method": "initialize"});
        let b = json!({"id": 2, "method": "tools/list"});
        let mut stream = framed(&a);
        stream.extend(framed(&b));

        let mut framer = Framer::new();
        assert_eq!(framer.push(&stream), vec![a, b]);
        assert_eq!(framer.framing(), Framing::LengthPrefixed);
    }

    #[test]
    fn test_header_name_is_case_insensitive() {
        let mut framer = Framer::new();
        let msgs = framer.push(b"content-length: 8\r\nContent-Type: application/json\r\n\r\n{\"id\":7}");
        assert_eq!(msgs, vec![json!({"id": 7})]);
    }

    #[test]
    fn test_incomplete_body_waits() {
        let mut framer = Framer::new();
        assert!(framer.push(b"Content-Length: 8\r\n\r\n{\"id\"").is_empty());
        assert_eq!(framer.framing(), Framing::Undetermined);
        assert_eq!(framer.push(b":7}"), vec![json!({"id": 7})]);
    }

    #[test]
    fn test_chunking_invariance() {
        let messages = vec![
            json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}),
            json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
            json!({"jsonrpc": "2.0", "id": "b", "method": "tools/call", "params": {"name": "a__b", "arguments": {"q": "line\nbreak"}}}),
        ];

        for encode in [framed as fn(&Value) -> Vec<u8>, lined] {
            let stream: Vec<u8> = messages.iter().flat_map(encode).collect();

            let mut whole = Framer::new();
            let expected = whole.push(&stream);
            assert_eq!(expected, messages);

            let (bytewise, framing) = one_byte_at_a_time(&stream);
            assert_eq!(bytewise, expected);
            assert_eq!(framing, whole.framing());

            for split in [3, 17, 64] {
                let mut framer = Framer::new();
                let mut out = Vec::new();
                for chunk in stream.chunks(split) {
                    out.extend(framer.push(chunk));
                }
                assert_eq!(out, expected, "chunk size {split}");
            }
        }
    }

    #[test]
    fn test_line_mode_stays_pinned() {
        let mut framer = Framer::new();
        framer.push(&lined(&json!({"id": 1})));
        assert_eq!(framer.framing(), Framing::LineDelimited);

        // A framed message is not accepted once line mode is pinned.
        let mut stream = framed(&json!({"id": 2}));
        stream.extend(lined(&json!({"id": 3})));
        assert!(framer.push(&stream).is_empty());
        assert_eq!(framer.framing(), Framing::LineDelimited);

        assert_eq!(framer.push(&lined(&json!({"id": 4}))), vec![json!({"id": 4})]);
    }

    #[test]
    fn test_length_prefixed_stays_pinned() {
        let mut framer = Framer::new();
        framer.push(&framed(&json!({"id": 1})));
        assert_eq!(framer.framing(), Framing::LengthPrefixed);

        let mut stream = lined(&json!({"id": 2}));
        stream.extend(framed(&json!({"id": 3})));
        assert_eq!(framer.push(&stream), vec![json!({"id": 3})]);
        assert_eq!(framer.framing(), Framing::LengthPrefixed);
    }

    #[test]
    fn test_malformed_header_is_dropped() {
        let mut framer = Framer::new();
        let mut stream = b"Content-Type: text/plain\r\n\r\n".to_vec();
        stream.extend(framed(&json!({"id": 9})));
        assert_eq!(framer.push(&stream), vec![json!({"id": 9})]);
    }

    #[test]
    fn test_overflowing_content_length_is_dropped() {
        let mut framer = Framer::new();
        assert!(framer.push(b"Content-Length: 18446744073709551615\r\n\r\n").is_empty());
        assert_eq!(framer.pending(), 0);
        assert_eq!(framer.push(&framed(&json!({"id": 2}))), vec![json!({"id": 2})]);
    }

    #[test]
    fn test_oversized_frame_mid_session() {
        let mut framer = Framer::new();
        framer.push(&framed(&json!({"id": 1})));

        let mut stream = format!("Content-Length: {}\r\n\r\n", MAX_FRAME_BYTES + 1).into_bytes();
        stream.extend(b"{\"id\":2}\n");
        stream.extend(framed(&json!({"id": 3})));
        assert_eq!(framer.push(&stream), vec![json!({"id": 3})]);
        assert_eq!(framer.pending(), 0);
        assert_eq!(framer.framing(), Framing::LengthPrefixed);
    }

    #[test]
    fn test_stray_line_before_header_block() {
        let mut framer = Framer::new();
        let msgs = framer.push(b"stray\nContent-Length: 8\r\n\r\n{\"id\":5}");
        assert_eq!(msgs, vec![json!({"id": 5})]);
        assert_eq!(framer.framing(), Framing::LengthPrefixed);

        let (bytewise, framing) = one_byte_at_a_time(b"stray\nContent-Length: 8\r\n\r\n{\"id\":5}");
        assert_eq!(bytewise, msgs);
        assert_eq!(framing, Framing::LengthPrefixed);
    }

    #[test]
    fn test_garbage_line_before_detection_is_dropped() {
        let mut framer = Framer::new();
        let msgs = framer.push(b"hello there\n{\"id\":1}\n");
        assert_eq!(msgs, vec![json!({"id": 1})]);
        assert_eq!(framer.framing(), Framing::LineDelimited);
    }

    #[test]
    fn test_encode_follows_framing() {
        let value = json!({"id": 1, "result": {}});
        let mut framer = Framer::new();
        assert_eq!(framer.encode(&value), lined(&value));

        framer.push(&framed(&json!({"id": 0})));
        let bytes = framer.encode(&value);
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with(&format!("Content-Length: {}\r\n\r\n", value.to_string().len())));
    }
}
