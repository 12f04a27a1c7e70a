//! Buffered expect primitive over a [`Terminal`].
//!
//! A [`Channel`] owns one terminal plus the accumulation buffer and offers
//! the single blocking operation everything else is built on: wait until
//! one of an ordered pattern list matches the unconsumed output. Pattern
//! list order is match priority: the first pattern in the list that
//! matches anywhere in the buffer wins, so more specific patterns must be
//! listed before generic fallbacks such as a bare prompt.

use std::io;
use std::time::{Duration, Instant};

use log::trace;
use regex::bytes::Regex;

use super::buffer::PatternBuffer;
use super::terminal::{ReadEvent, Terminal};

/// Outcome of one expect call.
#[derive(Debug)]
pub enum Expectation {
    /// A pattern matched. `index` is its position in the supplied list;
    /// `before` is the text preceding the match, `matched` the match itself.
    Match {
        index: usize,
        before: String,
        matched: String,
    },
    /// No pattern matched within the timeout.
    Timeout,
    /// The stream ended before any pattern matched.
    Closed,
}

/// One terminal with buffered pattern matching.
pub struct Channel {
    terminal: Box<dyn Terminal>,
    buffer: PatternBuffer,
    closed: bool,
}

impl Channel {
    pub fn new(terminal: Box<dyn Terminal>) -> Self {
        Self {
            terminal,
            buffer: PatternBuffer::new(),
            closed: false,
        }
    }

    /// Write raw text.
    pub fn send(&mut self, text: &str) -> io::Result<()> {
        trace!("send: {:?}", text);
        self.terminal.write(text.as_bytes())
    }

    /// Write text followed by a line terminator.
    pub fn send_line(&mut self, text: &str) -> io::Result<()> {
        trace!("send_line: {:?}", text);
        self.terminal.write(text.as_bytes())?;
        self.terminal.write(b"\n")
    }

    /// Wait until one of `patterns` matches the unconsumed output.
    ///
    /// Matched text and everything before it are consumed from the buffer;
    /// output after the match stays buffered for the next call.
    pub async fn expect(&mut self, patterns: &[&Regex], timeout: Duration) -> Expectation {
        let deadline = Instant::now() + timeout;
        loop {
            for (index, pattern) in patterns.iter().enumerate() {
                if let Some((start, end)) = self.buffer.find(pattern) {
                    let (before, matched) = self.buffer.consume(start, end);
                    trace!("matched pattern {}: {:?}", index, matched);
                    return Expectation::Match {
                        index,
                        before,
                        matched,
                    };
                }
            }

            if self.closed {
                return Expectation::Closed;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Expectation::Timeout;
            }

            match self.terminal.read_chunk(remaining).await {
                ReadEvent::Data(data) => self.buffer.extend(&data),
                ReadEvent::Idle => return Expectation::Timeout,
                // Run one more match pass over what already arrived before
                // reporting the close.
                ReadEvent::Closed => self.closed = true,
            }
        }
    }

    /// Consume and return everything currently buffered.
    pub fn drain(&mut self) -> String {
        self.buffer.drain()
    }

    /// Pull output for `window`, then return the buffered text without
    /// consuming it. Used for raw prompt probing.
    pub async fn peek(&mut self, window: Duration) -> String {
        let deadline = Instant::now() + window;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || self.closed {
                break;
            }
            match self.terminal.read_chunk(remaining).await {
                ReadEvent::Data(data) => self.buffer.extend(&data),
                ReadEvent::Idle => break,
                ReadEvent::Closed => {
                    self.closed = true;
                    break;
                }
            }
        }
        String::from_utf8_lossy(self.buffer.unconsumed()).into_owned()
    }

    pub fn is_alive(&mut self) -> bool {
        !self.closed && self.terminal.is_alive()
    }

    /// Close the underlying terminal. Idempotent.
    pub fn close(&mut self) {
        self.closed = true;
        self.terminal.close();
    }
}
