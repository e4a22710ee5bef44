//! JSON string escaping.
//!
//! Unescaped runs are copied verbatim; only bytes that need an escape interrupt the
//! copy. Control bytes become `\u00XX` except for the shorthand escapes `\"`, `\\`,
//! `\n`, `\r` and `\t`. With HTML escaping on (the default) `<`, `>` and `&` are
//! escaped too. U+2028 and U+2029 are always escaped because they terminate lines in
//! some script contexts.
//!
//! ```rust
//! use planjson::escape::{append_quoted, Escape};
//!
//! let mut out = Vec::new();
//! append_quoted(&mut out, b"a<b\n", Escape::default());
//! assert_eq!(out, br#""a\u003cb\n""#);
//! ```

const HEX: &[u8; 16] = b"0123456789abcdef";

/// How strings are escaped. Derived from the call's options.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Escape {
    /// Escape `<`, `>` and `&`.
    pub html: bool,
    /// Replace invalid UTF-8 with U+FFFD.
    pub coerce_utf8: bool,
    /// Copy the bytes verbatim between the quotes.
    pub disabled: bool,
}

impl Default for Escape {
    fn default() -> Self {
        Escape {
            html: true,
            coerce_utf8: true,
            disabled: false,
        }
    }
}

// true for ASCII bytes that can be copied without escaping
static SAFE: [bool; 128] = build_safe_table(false);
static HTML_SAFE: [bool; 128] = build_safe_table(true);

const fn build_safe_table(html: bool) -> [bool; 128] {
    let mut table = [false; 128];
    let mut b = 0x20;
    while b < 128 {
        let unsafe_byte = b == b'"' as usize
            || b == b'\\' as usize
            || (html && (b == b'<' as usize || b == b'>' as usize || b == b'&' as usize));
        table[b] = !unsafe_byte;
        b += 1;
    }
    table
}

/// Appends `s` as a quoted JSON string.
#[inline]
pub fn append_quoted(out: &mut Vec<u8>, s: &[u8], mode: Escape) {
    out.reserve(s.len() + 2);
    out.push(b'"');
    append_escaped(out, s, mode);
    out.push(b'"');
}

/// Appends the escaped body of `s` without surrounding quotes.
pub fn append_escaped(out: &mut Vec<u8>, s: &[u8], mode: Escape) {
    if mode.disabled {
        out.extend_from_slice(s);
        return;
    }
    let table = if mode.html { &HTML_SAFE } else { &SAFE };

    let mut start = 0;
    let mut i = 0;
    while i < s.len() {
        let b = s[i];
        if b < 0x80 {
            if table[b as usize] {
                i += 1;
                continue;
            }
            out.extend_from_slice(&s[start..i]);
            match b {
                b'"' | b'\\' => out.extend_from_slice(&[b'\\', b]),
                b'\n' => out.extend_from_slice(b"\\n"),
                b'\r' => out.extend_from_slice(b"\\r"),
                b'\t' => out.extend_from_slice(b"\\t"),
                _ => out.extend_from_slice(&[
                    b'\\',
                    b'u',
                    b'0',
                    b'0',
                    HEX[(b >> 4) as usize],
                    HEX[(b & 0xF) as usize],
                ]),
            }
            i += 1;
            start = i;
            continue;
        }

        let size = utf8_sequence_len(&s[i..]);
        if size == 0 {
            if mode.coerce_utf8 {
                out.extend_from_slice(&s[start..i]);
                out.extend_from_slice(b"\\ufffd");
                i += 1;
                start = i;
            } else {
                i += 1;
            }
            continue;
        }
        // U+2028 LINE SEPARATOR and U+2029 PARAGRAPH SEPARATOR
        if size == 3 && s[i] == 0xE2 && s[i + 1] == 0x80 && (s[i + 2] == 0xA8 || s[i + 2] == 0xA9)
        {
            out.extend_from_slice(&s[start..i]);
            out.extend_from_slice(b"\\u202");
            out.push(HEX[(s[i + 2] & 0xF) as usize]);
            i += 3;
            start = i;
            continue;
        }
        i += size;
    }
    out.extend_from_slice(&s[start..]);
}

/// Length of the valid UTF-8 sequence starting at `s[0]`, or 0 if it is invalid.
#[inline]
fn utf8_sequence_len(s: &[u8]) -> usize {
    let width = match s[0] {
        0xC2..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF4 => 4,
        _ => return 0,
    };
    if s.len() < width || std::str::from_utf8(&s[..width]).is_err() {
        return 0;
    }
    width
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quoted(s: &[u8], mode: Escape) -> String {
        let mut out = Vec::new();
        append_quoted(&mut out, s, mode);
        String::from_utf8_lossy(&out).into_owned()
    }

    #[test]
    fn test_control_bytes() {
        assert_eq!(quoted(b"\x00", Escape::default()), r#""\u0000""#);
        assert_eq!(quoted(b"\t", Escape::default()), r#""\t""#);
        assert_eq!(quoted(b"\x08\x0c", Escape::default()), r#""\u0008\u000c""#);
        assert_eq!(quoted(b"\x1f", Escape::default()), r#""\u001f""#);
        assert_eq!(quoted(b"a\"b\\c", Escape::default()), r#""a\"b\\c""#);
    }

    #[test]
    fn test_html_toggle() {
        assert_eq!(quoted(b"<&>", Escape::default()), r#""\u003c\u0026\u003e""#);
        let mode = Escape {
            html: false,
            ..Escape::default()
        };
        assert_eq!(quoted(b"<&>", mode), r#""<&>""#);
    }

    #[test]
    fn test_invalid_utf8() {
        assert_eq!(quoted(b"a\x80b", Escape::default()), r#""a\ufffdb""#);
        let mode = Escape {
            coerce_utf8: false,
            ..Escape::default()
        };
        let mut out = Vec::new();
        append_quoted(&mut out, b"a\x80b", mode);
        assert_eq!(out, b"\"a\x80b\"");
    }

    #[test]
    fn test_truncated_sequence_is_replaced_per_byte() {
        // two bytes of a three-byte sequence
        assert_eq!(quoted(b"\xE2\x82", Escape::default()), r#""\ufffd\ufffd""#);
    }

    #[test]
    fn test_line_separators_always_escaped() {
        let mode = Escape {
            html: false,
            ..Escape::default()
        };
        assert_eq!(quoted("x\u{2028}y\u{2029}".as_bytes(), mode), r#""x\u2028y\u2029""#);
    }

    #[test]
    fn test_multibyte_passthrough() {
        assert_eq!(quoted("héllo 👋".as_bytes(), Escape::default()), "\"héllo 👋\"");
    }

    #[test]
    fn test_disabled_copies_verbatim() {
        let mode = Escape {
            disabled: true,
            ..Escape::default()
        };
        assert_eq!(quoted(b"<\n>", mode), "\"<\n>\"");
    }
}
