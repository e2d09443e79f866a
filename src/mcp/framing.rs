//! Newline-delimited JSON frame reassembly
//!
//! Stdout of the server arrives in arbitrary chunks: one read may carry half
//! a message, or three messages and the start of a fourth. The reassembler
//! keeps the unterminated tail between reads and hands back every complete
//! line parsed as JSON.

use serde_json::Value;

/// A complete line that was not valid JSON. Never escapes the reader task.
#[derive(Debug, Clone, PartialEq)]
pub struct MalformedFrame {
    pub line: String,
    pub reason: String,
}

pub type Frame = Result<Value, MalformedFrame>;

#[derive(Debug, Default)]
pub struct FrameReassembler {
    pending: Vec<u8>,
}

impl FrameReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return the frames it completed, in stream order.
    ///
    /// The buffer is bytes rather than text so a multi-byte character split
    /// across two reads is reassembled before decoding.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.pending.extend_from_slice(chunk);

        let Some(last_newline) = self.pending.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };

        let tail = self.pending.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.pending, tail);

        complete
            .split(|b| *b == b'\n')
            .filter_map(parse_line)
            .collect()
    }

    /// Bytes received after the last newline
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Flush whatever is left when the stream ends. A tail without a
    /// terminating newline is still offered as a frame.
    pub fn finish(&mut self) -> Option<Frame> {
        let rest = std::mem::take(&mut self.pending);
        parse_line(&rest)
    }
}

fn parse_line(raw: &[u8]) -> Option<Frame> {
    let text = String::from_utf8_lossy(raw);
    let line = text.trim();
    if line.is_empty() {
        return None;
    }
    Some(
        serde_json::from_str::<Value>(line).map_err(|e| MalformedFrame {
            line: line.to_string(),
            reason: e.to_string(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn values(frames: Vec<Frame>) -> Vec<Value> {
        frames.into_iter().map(|f| f.unwrap()).collect()
    }

    #[test]
    fn test_single_complete_line() {
        let mut r = FrameReassembler::new();
        let frames = r.push(b"{\"id\":1}\n");
        assert_eq!(values(frames), vec![json!({"id":1})]);
        assert_eq!(r.pending_len(), 0);
    }

    #[test]
    fn test_split_at_every_offset_yields_one_frame() {
        let doc = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {"tools": [{"name": "find"}, {"name": "aggregate"}], "note": "prix €"}
        });
        let wire = serde_json::to_string(&doc).unwrap() + "\n";
        let bytes = wire.as_bytes();

        for offset in 0..=bytes.len() {
            let mut r = FrameReassembler::new();
            let mut frames = r.push(&bytes[..offset]);
            frames.extend(r.push(&bytes[offset..]));
            assert_eq!(values(frames), vec![doc.clone()], "offset {}", offset);
            assert_eq!(r.pending_len(), 0);
        }
    }

    #[test]
    fn test_batched_lines_in_one_chunk() {
        let mut r = FrameReassembler::new();
        let frames = r.push(b"{\"id\":1}\n{\"id\":2}\n{\"id\":");
        assert_eq!(values(frames), vec![json!({"id":1}), json!({"id":2})]);
        assert_eq!(r.pending_len(), 6);

        let frames = r.push(b"3}\n");
        assert_eq!(values(frames), vec![json!({"id":3})]);
    }

    #[test]
    fn test_blank_lines_are_skipped() {
        let mut r = FrameReassembler::new();
        let frames = r.push(b"\n\r\n  \n{\"ok\":true}\r\n\n");
        assert_eq!(values(frames), vec![json!({"ok":true})]);
    }

    #[test]
    fn test_malformed_line_does_not_poison_stream() {
        let mut r = FrameReassembler::new();
        let frames = r.push(b"MongoDB MCP Server starting...\n{\"id\":7}\n");
        assert_eq!(frames.len(), 2);
        let bad = frames[0].as_ref().unwrap_err();
        assert_eq!(bad.line, "MongoDB MCP Server starting...");
        assert_eq!(frames[1].as_ref().unwrap(), &json!({"id":7}));
    }

    #[test]
    fn test_chunk_without_newline_emits_nothing() {
        let mut r = FrameReassembler::new();
        assert!(r.push(b"{\"id\":").is_empty());
        assert!(r.push(b"1").is_empty());
        assert_eq!(r.pending_len(), 7);
    }

    #[test]
    fn test_finish_flushes_unterminated_tail() {
        let mut r = FrameReassembler::new();
        assert!(r.push(b"{\"id\":1}").is_empty());
        assert_eq!(r.finish(), Some(Ok(json!({"id":1}))));
        assert_eq!(r.finish(), None);
    }
}
