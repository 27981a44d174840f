//! Incremental server-sent-events decoder.
//!
//! Chat-completion streams only use the `data` field. `event`, `id` and
//! `retry` fields are accepted and dropped, comment lines are skipped.
//! Lines may end in `\n`, `\r\n` or a bare `\r`.

use std::str::Utf8Error;

use bytes::BytesMut;

/// Payload the backend sends as its final event.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Buffers raw body bytes and yields the `data` payload of each complete event.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: BytesMut,
    data: Option<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk of the response body.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Pop the next complete event's data, if a full event is buffered.
    ///
    /// Lines are only decoded once their terminator has arrived, so a
    /// multi-byte character split across two network reads is fine.
    pub fn next_event(&mut self) -> Result<Option<String>, Utf8Error> {
        while let Some(line) = self.take_line() {
            let line = std::str::from_utf8(&line)?;
            if line.is_empty() {
                // Blank line dispatches the event.
                if let Some(data) = self.data.take() {
                    return Ok(Some(data));
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            if field == "data" {
                match self.data.as_mut() {
                    Some(data) => {
                        data.push('\n');
                        data.push_str(value);
                    }
                    None => self.data = Some(value.to_string()),
                }
            }
        }
        Ok(None)
    }

    /// Split off the next complete line without its terminator.
    fn take_line(&mut self) -> Option<BytesMut> {
        let pos = self.buf.iter().position(|&b| b == b'\n' || b == b'\r')?;
        let terminator = match self.buf[pos] {
            b'\n' => 1,
            _ => match self.buf.get(pos + 1) {
                Some(b'\n') => 2,
                Some(_) => 1,
                // The matching `\n` may arrive with the next read.
                None => return None,
            },
        };
        let mut line = self.buf.split_to(pos + terminator);
        line.truncate(pos);
        Some(line)
    }

    /// Flush whatever is left once the body has ended.
    ///
    /// Servers are allowed to close the body without a trailing blank line;
    /// a pending event is still dispatched in that case.
    pub fn finish(&mut self) -> Result<Vec<String>, Utf8Error> {
        let mut events = Vec::new();
        if !self.buf.is_empty() {
            self.buf.extend_from_slice(b"\n");
        }
        while let Some(data) = self.next_event()? {
            events.push(data);
        }
        if let Some(data) = self.data.take() {
            events.push(data);
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(decoder: &mut SseDecoder) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(data) = decoder.next_event().unwrap() {
            out.push(data);
        }
        out
    }

    #[test]
    fn test_event_split_across_reads() {
        let mut decoder = SseDecoder::new();
        decoder.push(b"data: {\"a\"");
        assert!(drain(&mut decoder).is_empty());
        decoder.push(b":1}\n");
        assert!(drain(&mut decoder).is_empty());
        decoder.push(b"\ndata: [DONE]\n\n");
        assert_eq!(drain(&mut decoder), vec!["{\"a\":1}", DONE_SENTINEL]);
    }

    #[test]
    fn test_crlf_and_comments() {
        let mut decoder = SseDecoder::new();
        decoder.push(b": keep-alive\r\n\r\nevent: message\r\ndata: hi\r\n\r\n");
        assert_eq!(drain(&mut decoder), vec!["hi"]);
    }

    #[test]
    fn test_bare_cr_line_endings() {
        let mut decoder = SseDecoder::new();
        decoder.push(b"data: one\rdata: two\r\rdata: three\r");
        assert_eq!(drain(&mut decoder), vec!["one\ntwo"]);
        // A trailing `\r` is held back until the next read shows whether `\n` follows.
        decoder.push(b"\n\n");
        assert_eq!(drain(&mut decoder), vec!["three"]);
    }

    #[test]
    fn test_trailing_cr_flushed_at_end_of_body() {
        let mut decoder = SseDecoder::new();
        decoder.push(b"data: last\r");
        assert!(drain(&mut decoder).is_empty());
        assert_eq!(decoder.finish().unwrap(), vec!["last"]);
    }

    #[test]
    fn test_multiline_data_is_joined() {
        let mut decoder = SseDecoder::new();
        decoder.push(b"data: one\ndata:two\n\n");
        assert_eq!(drain(&mut decoder), vec!["one\ntwo"]);
    }

    #[test]
    fn test_utf8_split_inside_a_line() {
        let text = "data: héllo\n\n".as_bytes();
        // Split in the middle of the two-byte 'é'.
        let split = text.iter().position(|&b| b == 0xC3).unwrap() + 1;
        let mut decoder = SseDecoder::new();
        decoder.push(&text[..split]);
        assert!(drain(&mut decoder).is_empty());
        decoder.push(&text[split..]);
        assert_eq!(drain(&mut decoder), vec!["héllo"]);
    }

    #[test]
    fn test_finish_flushes_unterminated_event() {
        let mut decoder = SseDecoder::new();
        decoder.push(b"data: tail");
        assert!(drain(&mut decoder).is_empty());
        assert_eq!(decoder.finish().unwrap(), vec!["tail"]);
        assert!(decoder.finish().unwrap().is_empty());
    }
}
