// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Line reassembly for the RFCOMM byte stream.

use tracing::{debug, warn};

/// Longest partial line kept while waiting for a newline.
pub const MAX_LINE_LEN: usize = 4096;

/// Reassembles arbitrarily fragmented reads into newline-delimited lines.
pub struct LineDecoder {
    buffer: Vec<u8>,
    /// Set after an oversized partial was dropped; the rest of that line
    /// is skipped up to its newline.
    discarding: bool,
}

impl LineDecoder {
    /// Create a new line decoder.
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(256),
            discarding: false,
        }
    }

    /// Process an incoming chunk.
    ///
    /// Returns every line completed by this chunk, trimmed, in arrival
    /// order. Blank lines are skipped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            let head = &rest[..pos];
            rest = &rest[pos + 1..];

            if self.discarding {
                debug!("Skipped {} byte(s) of an oversized line", head.len());
                self.discarding = false;
                continue;
            }

            self.buffer.extend_from_slice(head);
            let raw = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&raw);
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                lines.push(trimmed.to_string());
            }
        }

        if !self.discarding {
            self.buffer.extend_from_slice(rest);
            if self.buffer.len() > MAX_LINE_LEN {
                warn!(
                    "Discarding {} bytes without a line terminator",
                    self.buffer.len()
                );
                self.buffer.clear();
                self.discarding = true;
            }
        }

        if !lines.is_empty() {
            debug!(
                "Decoded {} line(s), {} byte(s) pending",
                lines.len(),
                self.buffer.len()
            );
        }

        lines
    }

    /// Number of bytes waiting for a line terminator.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_line() {
        let mut decoder = LineDecoder::new();
        assert_eq!(decoder.push(b"FALL DETECTED\n"), vec!["FALL DETECTED"]);
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn test_line_split_across_chunks() {
        let mut decoder = LineDecoder::new();
        assert!(decoder.push(b"FALL DE").is_empty());
        assert_eq!(decoder.pending(), 7);
        assert_eq!(decoder.push(b"TECTED\nCANC"), vec!["FALL DETECTED"]);
        assert_eq!(decoder.push(b"ELLED\n"), vec!["CANCELLED"]);
    }

    #[test]
    fn test_multiple_lines_in_one_chunk() {
        let mut decoder = LineDecoder::new();
        let lines = decoder.push(b"POSSIBLE FREE FALL\nFALL DETECTED\nCANCELLED\n");
        assert_eq!(
            lines,
            vec!["POSSIBLE FREE FALL", "FALL DETECTED", "CANCELLED"]
        );
    }

    #[test]
    fn test_blank_lines_and_crlf() {
        let mut decoder = LineDecoder::new();
        let lines = decoder.push(b"\n\r\n  \nFALL DETECTED\r\n\n");
        assert_eq!(lines, vec!["FALL DETECTED"]);
    }

    #[test]
    fn test_empty_chunk() {
        let mut decoder = LineDecoder::new();
        assert!(decoder.push(b"").is_empty());
    }

    #[test]
    fn test_utf8_split_across_chunks() {
        let mut decoder = LineDecoder::new();
        let bytes = "temp 21°C\n".as_bytes();
        // Split inside the two-byte degree sign.
        let split = bytes.iter().position(|&b| b == 0xC2).unwrap() + 1;
        assert!(decoder.push(&bytes[..split]).is_empty());
        assert_eq!(decoder.push(&bytes[split..]), vec!["temp 21°C"]);
    }

    #[test]
    fn test_oversized_partial_discarded() {
        let mut decoder = LineDecoder::new();
        let junk = vec![b'x'; MAX_LINE_LEN + 1];
        assert!(decoder.push(&junk).is_empty());
        assert_eq!(decoder.pending(), 0);
        assert_eq!(decoder.push(b"\nCANCELLED\n"), vec!["CANCELLED"]);
    }

    #[test]
    fn test_oversized_line_tail_is_dropped() {
        let mut decoder = LineDecoder::new();
        let junk = vec![b'x'; MAX_LINE_LEN + 1];
        assert!(decoder.push(&junk).is_empty());

        // The remainder belongs to the dropped line, even across chunks.
        assert!(decoder.push(b"xxxx FALL DETECTED").is_empty());
        assert_eq!(decoder.pending(), 0);
        assert_eq!(
            decoder.push(b" tail of same line\nCANCELLED\n"),
            vec!["CANCELLED"]
        );
        assert_eq!(decoder.push(b"FALL DETECTED\n"), vec!["FALL DETECTED"]);
    }
}
