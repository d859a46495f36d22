//! Byte-stream to line framing for the modem's response channel.

use heapless::{String, Vec};

/// What one received byte turned into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LineEvent {
    /// Byte consumed, nothing to dispatch yet.
    None,
    /// A complete line is ready in the buffer; collect it with
    /// [`LineBuffer::take`].
    Line,
    /// The `>` data prompt. It arrives without a terminator and is
    /// dispatched the moment it is seen at the start of a line.
    Prompt,
}

/// Accumulates bytes into newline-terminated lines.
///
/// `\r` is discarded, `\n` terminates, empty lines are skipped. Lines
/// longer than `LEN` are truncated; the excess is dropped silently.
pub(crate) struct LineBuffer<const LEN: usize> {
    buf: Vec<u8, LEN>,
    complete: bool,
}

impl<const LEN: usize> LineBuffer<LEN> {
    pub const fn new() -> Self {
        Self {
            buf: Vec::new(),
            complete: false,
        }
    }

    pub fn push_byte(&mut self, byte: u8) -> LineEvent {
        if self.complete {
            self.buf.clear();
            self.complete = false;
        }
        match byte {
            b'\r' => LineEvent::None,
            b'\n' => {
                if self.buf.is_empty() {
                    LineEvent::None
                } else if core::str::from_utf8(&self.buf).is_ok() {
                    self.complete = true;
                    LineEvent::Line
                } else {
                    // not valid text, drop the whole line
                    self.buf.clear();
                    LineEvent::None
                }
            }
            b'>' if self.buf.is_empty() => LineEvent::Prompt,
            _ => {
                let _ = self.buf.push(byte);
                LineEvent::None
            }
        }
    }

    /// Copies the completed line out and readies the buffer for the next.
    pub fn take(&mut self) -> String<LEN> {
        let mut line = String::new();
        if self.complete {
            if let Ok(s) = core::str::from_utf8(&self.buf) {
                line.push_str(s).ok();
            }
            self.buf.clear();
            self.complete = false;
        }
        line
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.complete = false;
    }
}
