//! Fixed byte ring used to stage connection payload.

/// Ring buffer failure modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// No room for another byte.
    Full,
    /// No byte to yield.
    Empty,
}

/// Byte ring over a fixed array, writer head and reader tail kept mod `C`.
///
/// One slot always stays free so a full ring can be told from an empty
/// one: capacity `C` stores at most `C - 1` bytes.
pub struct RingBuffer<const C: usize> {
    buffer: [u8; C],
    head: usize,
    tail: usize,
}

impl<const C: usize> RingBuffer<C> {
    pub const fn new() -> Self {
        Self {
            buffer: [0; C],
            head: 0,
            tail: 0,
        }
    }

    pub fn push(&mut self, byte: u8) -> Result<(), Error> {
        let next = (self.head + 1) % C;
        if next == self.tail {
            return Err(Error::Full);
        }
        self.buffer[self.head] = byte;
        self.head = next;
        Ok(())
    }

    pub fn pop(&mut self) -> Result<u8, Error> {
        if self.tail == self.head {
            return Err(Error::Empty);
        }
        let byte = self.buffer[self.tail];
        self.tail = (self.tail + 1) % C;
        Ok(byte)
    }

    pub fn len(&self) -> usize {
        (self.head + C - self.tail) % C
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    pub fn is_full(&self) -> bool {
        (self.head + 1) % C == self.tail
    }

    pub const fn capacity(&self) -> usize {
        C - 1
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
    }
}

impl<const C: usize> Default for RingBuffer<C> {
    fn default() -> Self {
        Self::new()
    }
}
