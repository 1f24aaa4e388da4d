// Copyright 2026 The Fleetrelay Project
// SPDX-License-Identifier: Apache-2.0

// Frame splitter
//
// Turns arbitrarily fragmented upstream bytes into text, then into
// newline-terminated lines. Neither stage can fail: bad input degrades to
// replacement characters or to an opaque line.

/// Incremental UTF-8 decoder.
///
/// A multi-byte sequence split across two chunks is held back until the
/// rest arrives, so chunk boundaries never introduce U+FFFD. Bytes that
/// are invalid on their own are replaced lossily.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the next chunk, carrying any incomplete trailing sequence.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let mut bytes = std::mem::take(&mut self.pending);
        bytes.extend_from_slice(chunk);

        let mut out = String::with_capacity(bytes.len());
        let mut rest: &[u8] = &bytes;
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(e) => {
                    let (valid, tail) = rest.split_at(e.valid_up_to());
                    out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &tail[bad..];
                        }
                        None => {
                            // Incomplete sequence at the end: wait for more input.
                            self.pending = tail.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Flush a dangling partial sequence at end of input.
    pub fn finish(&mut self) -> String {
        let pending = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&pending).into_owned()
    }

    #[cfg(test)]
    pub(crate) fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// Splits a text stream into lines, keeping each line's `\n` as data.
///
/// Content after the last newline stays buffered until more input arrives
/// or the stream ends.
#[derive(Debug, Default)]
pub struct LineSplitter {
    buffer: String,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed, in order.
    pub fn feed(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(pos) = self.buffer[start..].find('\n') {
            let end = start + pos + 1;
            lines.push(self.buffer[start..end].to_string());
            start = end;
        }
        self.buffer.drain(..start);
        lines
    }

    /// Emit the unterminated remainder once, at end of stream.
    pub fn flush(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }

    /// Drop the buffered remainder without emitting it.
    pub fn discard(&mut self) -> usize {
        let len = self.buffer.len();
        self.buffer.clear();
        len
    }

    #[cfg(test)]
    pub(crate) fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}
