/*!
The byte input consumed by the matcher.

The matcher pulls one byte at a time and asks four zero-width questions
about the current position. This implementation reads from an in-memory
buffer of UTF-8 bytes; transcoding from other encodings is the business
of whatever fills the buffer, and the matcher is oblivious to it (it
operates on raw bytes, so invalid UTF-8 passes through unharmed).
*/

/// A cursor over a haystack of bytes.
#[derive(Clone, Debug)]
pub struct Input<'h> {
    haystack: &'h [u8],
    pos: usize,
}

impl<'h> Input<'h> {
    /// Create an input positioned at the start of the haystack.
    #[inline]
    pub fn new<H: ?Sized + AsRef<[u8]>>(haystack: &'h H) -> Input<'h> {
        Input { haystack: haystack.as_ref(), pos: 0 }
    }

    /// The whole haystack.
    #[inline]
    pub fn haystack(&self) -> &'h [u8] {
        self.haystack
    }

    /// Current byte offset.
    #[inline]
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Reposition the cursor.
    #[inline]
    pub fn seek(&mut self, pos: usize) {
        debug_assert!(pos <= self.haystack.len());
        self.pos = pos;
    }

    /// The byte `n` positions ahead, without consuming.
    #[inline]
    pub fn peek(&self, n: usize) -> Option<u8> {
        self.haystack.get(self.pos + n).copied()
    }

    /// Consume and return the next byte.
    #[inline]
    pub fn advance(&mut self) -> Option<u8> {
        let b = self.peek(0)?;
        self.pos += 1;
        Some(b)
    }

    /// Push the last consumed byte back.
    #[inline]
    pub fn unget(&mut self) {
        debug_assert!(self.pos > 0);
        self.pos -= 1;
    }

    /// The byte just before the cursor.
    #[inline]
    pub fn prev(&self) -> Option<u8> {
        self.pos.checked_sub(1).map(|i| self.haystack[i])
    }

    /// At the beginning of the buffer.
    #[inline]
    pub fn at_bob(&self) -> bool {
        self.pos == 0
    }

    /// At the end of the buffer.
    #[inline]
    pub fn at_eob(&self) -> bool {
        self.pos == self.haystack.len()
    }

    /// At the beginning of a line.
    #[inline]
    pub fn at_bol(&self) -> bool {
        match self.prev() {
            None => true,
            Some(b) => b == b'\n',
        }
    }

    /// At the end of a line: the next byte is a newline, or the buffer
    /// ends here.
    #[inline]
    pub fn at_eol(&self) -> bool {
        match self.peek(0) {
            None => true,
            Some(b) => b == b'\n',
        }
    }
}
