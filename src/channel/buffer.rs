//! Accumulation buffer for terminal output.
//!
//! Output arrives in arbitrary chunks; patterns must match across chunk
//! boundaries, and matched text must be consumed so the next expect starts
//! after it. ANSI escape sequences are stripped on ingest so prompt
//! patterns never have to account for color codes.

use regex::bytes::Regex;

/// Buffer of unconsumed terminal output.
#[derive(Debug, Default)]
pub struct PatternBuffer {
    buffer: Vec<u8>,
}

impl PatternBuffer {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(4096),
        }
    }

    /// Append new raw output, stripping ANSI escape codes.
    pub fn extend(&mut self, data: &[u8]) {
        let cleaned = strip_ansi_escapes::strip(data);
        self.buffer.extend_from_slice(&cleaned);
    }

    /// The unconsumed region.
    pub fn unconsumed(&self) -> &[u8] {
        &self.buffer
    }

    /// Find `pattern` in the unconsumed region.
    pub fn find(&self, pattern: &Regex) -> Option<(usize, usize)> {
        pattern.find(&self.buffer).map(|m| (m.start(), m.end()))
    }

    /// Consume everything up to `end`, returning the consumed text split at
    /// `start`: `(before_match, matched)`.
    pub fn consume(&mut self, start: usize, end: usize) -> (String, String) {
        let before = String::from_utf8_lossy(&self.buffer[..start]).into_owned();
        let matched = String::from_utf8_lossy(&self.buffer[start..end]).into_owned();
        self.buffer.drain(..end);
        (before, matched)
    }

    /// Consume and return the whole buffer.
    pub fn drain(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.buffer).into_owned();
        self.buffer.clear();
        text
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extend_and_consume() {
        let mut buffer = PatternBuffer::new();
        buffer.extend(b"some output\nrouter#");

        let pattern = Regex::new(r"router#").unwrap();
        let (start, end) = buffer.find(&pattern).unwrap();
        let (before, matched) = buffer.consume(start, end);
        assert_eq!(before, "some output\n");
        assert_eq!(matched, "router#");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_ansi_stripping() {
        let mut buffer = PatternBuffer::new();
        buffer.extend(b"\x1b[32mrouter\x1b[0m#");
        assert_eq!(buffer.unconsumed(), b"router#");
    }

    #[test]
    fn test_match_across_chunks() {
        let mut buffer = PatternBuffer::new();
        buffer.extend(b"rout");
        buffer.extend(b"er# ");
        let pattern = Regex::new(r"router#").unwrap();
        assert!(buffer.find(&pattern).is_some());
    }

    #[test]
    fn test_drain() {
        let mut buffer = PatternBuffer::new();
        buffer.extend(b"leftover");
        assert_eq!(buffer.drain(), "leftover");
        assert!(buffer.is_empty());
    }
}
