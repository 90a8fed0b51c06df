//! Line framing for `text/event-stream` bodies.
//!
//! Network reads do not respect line boundaries, so bytes are held
//! until a full line (terminated by `\n`, optionally preceded by `\r`)
//! is available. Decoding to UTF-8 is left to the caller and happens
//! per complete line, which also keeps multi-byte characters that
//! straddle two reads intact.

/// Sentinel payload that marks the end of a stream.
pub const DONE: &str = "[DONE]";

#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes from one read and return every line completed by
    /// them, without the line terminator.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.pending.extend_from_slice(bytes);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.pending[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            let mut line = &self.pending[start..end];
            if let Some(stripped) = line.strip_suffix(b"\r") {
                line = stripped;
            }
            lines.push(line.to_vec());
            start = end + 1;
        }
        self.pending.drain(..start);
        lines
    }

    /// Flush a trailing line that was never terminated. Called once the
    /// source reports end of stream.
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        if self.pending.is_empty() {
            return None;
        }
        let mut line = std::mem::take(&mut self.pending);
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(line)
    }
}

/// Value of a `data:` field, with the single optional space after the
/// colon removed. Returns `None` for any other field.
pub fn data_field(line: &str) -> Option<&str> {
    let value = line.strip_prefix("data:")?;
    Some(value.strip_prefix(' ').unwrap_or(value))
}
