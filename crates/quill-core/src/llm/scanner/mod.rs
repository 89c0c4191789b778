//! Buffered record scanner for streamed provider responses
//!
//! Providers frame their streams differently: the local server emits
//! newline-delimited JSON objects, the hosted APIs emit SSE `data:` lines or
//! a streamed JSON array. One scanner covers both by splitting on either
//! newlines or balanced top-level JSON objects; brace scanning tracks string
//! and escape state so a `{` or `}` inside a JSON string value never splits a
//! record.
//!
//! The scanner also handles:
//! - Records split across arbitrary chunk boundaries
//! - Incomplete UTF-8 sequences at chunk boundaries
//! - Framing noise (SSE prefixes, array separators, `[DONE]`) around records

/// Record-boundary strategy of a provider's stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// One JSON object per line
    NewlineDelimited,
    /// Balanced top-level JSON objects anywhere in the byte stream
    BraceDelimited,
}

/// Buffered scanner yielding complete records from a chunked byte stream
#[derive(Debug)]
pub struct RecordScanner {
    framing: Framing,
    /// Accumulated text not yet split into records (valid UTF-8)
    buffer: String,
    /// Incomplete UTF-8 byte sequence from the previous chunk boundary
    incomplete_utf8: Vec<u8>,
}

impl RecordScanner {
    pub fn new(framing: Framing) -> Self {
        Self {
            framing,
            buffer: String::new(),
            incomplete_utf8: Vec::new(),
        }
    }

    /// Feed raw bytes and extract the records they complete
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        let bytes_to_decode = if self.incomplete_utf8.is_empty() {
            chunk.to_vec()
        } else {
            let mut combined = std::mem::take(&mut self.incomplete_utf8);
            combined.extend_from_slice(chunk);
            combined
        };

        let (valid_str, remaining_bytes) = Self::decode_utf8_with_remainder(&bytes_to_decode);
        self.incomplete_utf8 = remaining_bytes;
        self.buffer.push_str(&valid_str);

        match self.framing {
            Framing::NewlineDelimited => self.take_lines(),
            Framing::BraceDelimited => self.take_objects(),
        }
    }

    /// Flush any buffered tail at end of stream (a final newline-delimited
    /// record may lack its terminator)
    pub fn finish(&mut self) -> Option<String> {
        let tail = self.buffer.trim();
        if tail.is_empty() {
            self.buffer.clear();
            return None;
        }
        let record = match self.framing {
            Framing::NewlineDelimited => Some(tail.to_string()),
            // A partial object is unparseable; drop it
            Framing::BraceDelimited => None,
        };
        self.buffer.clear();
        record
    }

    /// True if undelivered bytes remain buffered
    pub fn has_remaining(&self) -> bool {
        !self.buffer.trim().is_empty() || !self.incomplete_utf8.is_empty()
    }

    fn take_lines(&mut self) -> Vec<String> {
        let mut records = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            let line = line.trim();
            if !line.is_empty() {
                records.push(line.to_string());
            }
        }
        records
    }

    /// Extract balanced top-level objects, discarding bytes between them.
    ///
    /// Rescans the buffered tail each call; the tail is either framing noise
    /// or one partial object, so state reconstructs correctly from the start.
    fn take_objects(&mut self) -> Vec<String> {
        let mut records = Vec::new();
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;
        let mut record_start = None;
        let mut consumed = 0usize;

        for (pos, ch) in self.buffer.char_indices() {
            if in_string {
                if escaped {
                    escaped = false;
                } else if ch == '\\' {
                    escaped = true;
                } else if ch == '"' {
                    in_string = false;
                }
                continue;
            }
            match ch {
                '"' if depth > 0 => in_string = true,
                '{' => {
                    if depth == 0 {
                        record_start = Some(pos);
                    }
                    depth += 1;
                }
                '}' if depth > 0 => {
                    depth -= 1;
                    if depth == 0 {
                        if let Some(start) = record_start.take() {
                            let end = pos + ch.len_utf8();
                            records.push(self.buffer[start..end].to_string());
                            consumed = end;
                        }
                    }
                }
                _ => {}
            }
        }

        if record_start.is_none() {
            // No partial object pending: everything scanned is either a
            // delivered record or framing noise
            self.buffer.clear();
        } else if consumed > 0 {
            self.buffer.drain(..consumed);
        }
        records
    }

    /// Decode bytes as UTF-8, returning the valid prefix and any trailing
    /// incomplete sequence
    fn decode_utf8_with_remainder(bytes: &[u8]) -> (String, Vec<u8>) {
        if let Ok(s) = std::str::from_utf8(bytes) {
            return (s.to_string(), Vec::new());
        }

        // Scan backwards for a split multi-byte character
        let mut valid_end = bytes.len();
        for i in 1..=4.min(bytes.len()) {
            let pos = bytes.len() - i;
            let byte = bytes[pos];
            if !Self::is_continuation_byte(byte) {
                let expected_len = Self::utf8_char_len(byte);
                if bytes.len() - pos < expected_len {
                    valid_end = pos;
                }
                break;
            }
        }

        let valid_bytes = &bytes[..valid_end];
        match std::str::from_utf8(valid_bytes) {
            Ok(s) => (s.to_string(), bytes[valid_end..].to_vec()),
            Err(e) => {
                // Corrupt bytes mid-stream: salvage the valid prefix
                let valid_up_to = e.valid_up_to();
                let s = std::str::from_utf8(&valid_bytes[..valid_up_to])
                    .unwrap_or_default()
                    .to_string();
                tracing::warn!(
                    "invalid UTF-8 in stream at offset {}, salvaged {} bytes",
                    valid_up_to,
                    s.len()
                );
                (s, bytes[valid_up_to..].to_vec())
            }
        }
    }

    /// Check if a byte is a UTF-8 continuation byte (10xxxxxx)
    #[inline]
    fn is_continuation_byte(byte: u8) -> bool {
        (byte & 0b1100_0000) == 0b1000_0000
    }

    /// Expected length of a UTF-8 character from its first byte
    #[inline]
    fn utf8_char_len(first_byte: u8) -> usize {
        if first_byte & 0b1000_0000 == 0 {
            1
        } else if first_byte & 0b1110_0000 == 0b1100_0000 {
            2
        } else if first_byte & 0b1111_0000 == 0b1110_0000 {
            3
        } else if first_byte & 0b1111_1000 == 0b1111_0000 {
            4
        } else {
            1
        }
    }
}

#[cfg(test)]
mod tests;
