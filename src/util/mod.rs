pub(crate) mod charset;
pub(crate) mod position;
pub(crate) mod ranges;

/// Returns true when the byte is an ASCII word byte: `[A-Za-z0-9_]`.
#[inline]
pub(crate) fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}
