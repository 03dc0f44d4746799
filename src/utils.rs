//! Utility functions for the ble-uart-terminal crate.

use std::borrow::Cow;
use std::fmt::Write as _;

/// Line terminator appended to outgoing text commands.
pub const CRLF: &str = "\r\n";

/// Render bytes as an uppercase hex string with no separators.
///
/// # Example
///
/// ```
/// use ble_uart_terminal::hex_compact;
///
/// assert_eq!(hex_compact(&[0x0a, 0xff, 0x00]), "0AFF00");
/// ```
pub fn hex_compact(data: &[u8]) -> String {
    hex::encode_upper(data)
}

/// Render bytes as space-separated uppercase hex.
///
/// # Example
///
/// ```
/// use ble_uart_terminal::hex_spaced;
///
/// assert_eq!(hex_spaced(&[0xde, 0xad, 0xbe, 0xef]), "DE AD BE EF");
/// ```
pub fn hex_spaced(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 3);
    for (i, byte) in data.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{:02X}", byte);
    }
    out
}

/// Ensure outgoing text ends with a line terminator.
///
/// Text that already ends in `\n` is left untouched; anything else gets CRLF.
///
/// # Example
///
/// ```
/// use ble_uart_terminal::ensure_line_terminator;
///
/// assert_eq!(ensure_line_terminator("AT"), "AT\r\n");
/// assert_eq!(ensure_line_terminator("AT\n"), "AT\n");
/// ```
pub fn ensure_line_terminator(text: &str) -> Cow<'_, str> {
    if text.ends_with('\n') {
        Cow::Borrowed(text)
    } else {
        Cow::Owned(format!("{}{}", text, CRLF))
    }
}

/// Strip any trailing `\r` / `\n` characters.
#[inline]
pub fn strip_line_terminator(text: &str) -> &str {
    text.trim_end_matches(['\r', '\n'])
}

/// Escape interior `\r` / `\n` so a text always renders on one line.
///
/// # Example
///
/// ```
/// use ble_uart_terminal::escape_line_breaks;
///
/// assert_eq!(escape_line_breaks("OK\r\nREADY"), "OK\\r\\nREADY");
/// ```
pub fn escape_line_breaks(text: &str) -> Cow<'_, str> {
    if !text.contains(['\r', '\n']) {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len() + 4);
    for c in text.chars() {
        match c {
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_compact() {
        assert_eq!(hex_compact(&[]), "");
        assert_eq!(hex_compact(&[0x01, 0xab]), "01AB");
    }

    #[test]
    fn test_hex_spaced() {
        assert_eq!(hex_spaced(&[]), "");
        assert_eq!(hex_spaced(&[0x7f]), "7F");
        assert_eq!(hex_spaced(&[0xc3, 0x28]), "C3 28");
    }

    #[test]
    fn test_ensure_line_terminator() {
        assert_eq!(ensure_line_terminator(""), "\r\n");
        assert_eq!(ensure_line_terminator("AT\r"), "AT\r\r\n");
        assert_eq!(ensure_line_terminator("AT\r\n"), "AT\r\n");
        assert!(matches!(ensure_line_terminator("x\n"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_strip_line_terminator() {
        assert_eq!(strip_line_terminator("AT\r\n"), "AT");
        assert_eq!(strip_line_terminator("AT\n\n"), "AT");
        assert_eq!(strip_line_terminator("a\nb\r\n"), "a\nb");
        assert_eq!(strip_line_terminator("  AT  "), "  AT  ");
    }

    #[test]
    fn test_escape_line_breaks() {
        assert!(matches!(escape_line_breaks("plain"), Cow::Borrowed("plain")));
        assert_eq!(escape_line_breaks("a\nb"), "a\\nb");
        assert_eq!(escape_line_breaks("OK\r\nREADY\r\n"), "OK\\r\\nREADY\\r\\n");
    }
}
