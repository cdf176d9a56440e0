//! Line framing for server-sent-event responses.
//!
//! The transport hands us arbitrary byte chunks. A line is only decodable once
//! its terminating newline has arrived, so the tail of every chunk is held back
//! until the next one. Buffering happens on raw bytes, which keeps multi-byte
//! UTF-8 sequences intact when a chunk boundary falls inside one.

#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk, returning every line it completed (without the newline).
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            lines.push(decode_line(&line[..line.len() - 1]));
        }
        lines
    }

    /// Remainder left in the buffer once the transport is exhausted.
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        Some(decode_line(&rest))
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

#[derive(Debug, PartialEq, Eq)]
pub enum SseLine<'a> {
    Data(&'a str),
    Done,
    /// Blank separators, comments, `event:`/`id:` fields.
    Other,
}

pub fn classify(line: &str) -> SseLine<'_> {
    let line = line.trim();
    match line.strip_prefix("data:") {
        Some(data) => {
            let data = data.trim_start();
            if data == "[DONE]" {
                SseLine::Done
            } else if data.is_empty() {
                SseLine::Other
            } else {
                SseLine::Data(data)
            }
        }
        None => SseLine::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_holds_back_partial_line() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(b"data: {\"a\"").is_empty());
        let lines = decoder.push(b":1}\ndata: x");
        assert_eq!(lines, vec!["data: {\"a\":1}".to_string()]);
        assert_eq!(decoder.finish().as_deref(), Some("data: x"));
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn test_crlf_and_multiple_lines_in_one_chunk() {
        let mut decoder = FrameDecoder::new();
        let lines = decoder.push(b"data: one\r\n\r\ndata: two\n");
        assert_eq!(lines, vec!["data: one", "", "data: two"]);
    }

    #[test]
    fn test_split_inside_utf8_sequence() {
        let bytes = "data: caf\u{e9}\n".as_bytes();
        let (head, tail) = bytes.split_at(bytes.len() - 2);
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(head).is_empty());
        assert_eq!(decoder.push(tail), vec!["data: caf\u{e9}".to_string()]);
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify("data: {\"x\":1}"), SseLine::Data("{\"x\":1}"));
        assert_eq!(classify("data:{}"), SseLine::Data("{}"));
        assert_eq!(classify("data: [DONE]"), SseLine::Done);
        assert_eq!(classify(""), SseLine::Other);
        assert_eq!(classify(": keep-alive"), SseLine::Other);
        assert_eq!(classify("event: message"), SseLine::Other);
    }
}
