//! MSBuild percent-escape decoding.
//!
//! MSBuild escapes special characters in item specs as `%XX` where `XX` is
//! the two-digit hexadecimal code of the character (`%3B` for `;`, `%24` for
//! `$`, ...). Evaluated item paths handed back to the IDE must be decoded.

use std::borrow::Cow;

/// Decodes every `%XX` sequence in `s`.
///
/// A `%` that is not followed by exactly two hexadecimal digits is kept as
/// is. Decoded characters are not scanned again, so `%2541` becomes `%41`.
#[must_use]
pub fn unescape(s: &str) -> Cow<'_, str> {
    if !s.contains('%') {
        return Cow::Borrowed(s);
    }

    let bytes = s.as_bytes();
    let mut out = String::with_capacity(s.len());
    let mut copied = 0;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                out.push_str(&s[copied..i]);
                out.push(char::from((hi << 4) | lo));
                i += 3;
                copied = i;
                continue;
            }
        }
        i += 1;
    }

    out.push_str(&s[copied..]);
    Cow::Owned(out)
}

const fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}
