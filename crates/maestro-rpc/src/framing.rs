//! Stream framings for JSON-RPC 2.0 over stdio.

use serde_json::Value;

/// How JSON-RPC objects are delimited on the byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// `Content-Length: N\r\n\r\n` header followed by N body bytes.
    ///
    /// Used by language servers (the upstream assistant and LSP bridge).
    ContentLength,
    /// One JSON object per `\n`-terminated line, no embedded newlines.
    ///
    /// Used by MCP stdio servers and subprocess workers.
    Line,
}

impl Framing {
    /// Encode one message for this framing.
    #[must_use]
    pub fn encode(self, msg: &Value) -> Vec<u8> {
        let body = msg.to_string().into_bytes();
        match self {
            Self::ContentLength => {
                let header = format!("Content-Length: {}\r\n\r\n", body.len());
                let mut out = header.into_bytes();
                out.extend_from_slice(&body);
                out
            },
            Self::Line => {
                let mut out = body;
                out.push(b'\n');
                out
            },
        }
    }

    /// Extract the next complete message from `buf`, removing exactly the
    /// bytes it occupied.
    ///
    /// Returns `None` when the buffer does not yet hold a complete frame.
    /// Decoding is all-or-nothing: a partial frame consumes nothing.
    /// Malformed frames (bad header, bad JSON line) are dropped and decoding
    /// continues with the following bytes.
    #[must_use]
    pub fn decode(self, buf: &mut Vec<u8>) -> Option<Value> {
        match self {
            Self::ContentLength => decode_content_length(buf),
            Self::Line => decode_line(buf),
        }
    }
}

fn decode_content_length(buf: &mut Vec<u8>) -> Option<Value> {
    loop {
        let header_end = find_subsequence(buf, b"\r\n\r\n")?;
        let header = String::from_utf8_lossy(&buf[..header_end]).into_owned();

        let content_length = header.split("\r\n").find_map(|line| {
            let (name, value) = line.split_once(':')?;
            if name.eq_ignore_ascii_case("content-length") {
                value.trim().parse::<usize>().ok()
            } else {
                None
            }
        });

        let body_start = header_end.checked_add(4)?;
        let Some(content_length) = content_length else {
            // Unusable header block: drop it and try again.
            tracing::debug!(header = %header, "dropping frame without Content-Length");
            buf.drain(..body_start);
            continue;
        };

        let body_end = body_start.checked_add(content_length)?;
        if buf.len() < body_end {
            return None;
        }

        let msg = serde_json::from_slice(&buf[body_start..body_end]);
        buf.drain(..body_end);
        match msg {
            Ok(value) => return Some(value),
            Err(e) => {
                tracing::debug!(error = %e, "dropping frame with malformed JSON body");
            },
        }
    }
}

fn decode_line(buf: &mut Vec<u8>) -> Option<Value> {
    loop {
        let newline = buf.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = buf.drain(..=newline).collect();
        let trimmed = String::from_utf8_lossy(&line).trim().to_string();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str(&trimmed) {
            Ok(value) => return Some(value),
            Err(_) => {
                // Non-JSON noise on stdout (e.g. a server printing a banner).
                tracing::debug!(line = %trimmed, "dropping non-JSON line");
            },
        }
    }
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
