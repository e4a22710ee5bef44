//! Byte sequences and pre-encoded payloads.
//!
//! Byte slices render as standard padded base64 by default. Pre-encoded JSON (raw
//! payloads and the output of byte-producing hooks) is validated and compacted in a
//! single pass before it is spliced into the output.

use crate::escape::{append_quoted, Escape};
use crate::number::is_valid_number;

const BASE64: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// Appends `bytes` as a quoted base64 string.
///
/// ```rust
/// use planjson::bytes::append_base64;
///
/// let mut out = Vec::new();
/// append_base64(&mut out, b"hello");
/// assert_eq!(out, br#""aGVsbG8=""#);
/// ```
pub fn append_base64(out: &mut Vec<u8>, bytes: &[u8]) {
    out.reserve(bytes.len().div_ceil(3) * 4 + 2);
    out.push(b'"');
    let mut chunks = bytes.chunks_exact(3);
    for chunk in &mut chunks {
        let n = (u32::from(chunk[0]) << 16) | (u32::from(chunk[1]) << 8) | u32::from(chunk[2]);
        out.extend_from_slice(&[
            BASE64[(n >> 18) as usize & 63],
            BASE64[(n >> 12) as usize & 63],
            BASE64[(n >> 6) as usize & 63],
            BASE64[n as usize & 63],
        ]);
    }
    match *chunks.remainder() {
        [a] => {
            let n = u32::from(a) << 16;
            out.extend_from_slice(&[
                BASE64[(n >> 18) as usize & 63],
                BASE64[(n >> 12) as usize & 63],
                b'=',
                b'=',
            ]);
        }
        [a, b] => {
            let n = (u32::from(a) << 16) | (u32::from(b) << 8);
            out.extend_from_slice(&[
                BASE64[(n >> 18) as usize & 63],
                BASE64[(n >> 12) as usize & 63],
                BASE64[(n >> 6) as usize & 63],
                b'=',
            ]);
        }
        _ => {}
    }
    out.push(b'"');
}

/// Appends `bytes` through string escaping instead of base64.
#[inline]
pub fn append_raw_string(out: &mut Vec<u8>, bytes: &[u8], escape: Escape) {
    append_quoted(out, bytes, escape);
}

/// Appends a fixed-length byte array as a JSON array of numbers.
pub fn append_byte_array(out: &mut Vec<u8>, bytes: &[u8]) {
    out.push(b'[');
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(b',');
        }
        crate::number::append_u64(out, u64::from(*b));
    }
    out.push(b']');
}

#[inline]
fn skip_ws(src: &[u8], mut i: usize) -> usize {
    while matches!(src.get(i), Some(b' ' | b'\t' | b'\n' | b'\r')) {
        i += 1;
    }
    i
}

/// Validates `src` as exactly one JSON value and appends it without insignificant
/// whitespace. With `escape_html`, `<`, `>`, `&`, U+2028 and U+2029 inside strings
/// are escaped.
///
/// On error nothing is appended and a description of the problem is returned.
///
/// ```rust
/// use planjson::bytes::compact;
///
/// let mut out = Vec::new();
/// compact(&mut out, b" { \"a\" : [1, 2] } ", true).unwrap();
/// assert_eq!(out, br#"{"a":[1,2]}"#);
/// assert!(compact(&mut out, b"{\"a\":}", true).is_err());
/// ```
pub fn compact(out: &mut Vec<u8>, src: &[u8], escape_html: bool) -> Result<(), String> {
    let start = out.len();
    let result = compact_inner(out, src, escape_html);
    if result.is_err() {
        out.truncate(start);
    }
    result
}

fn compact_inner(out: &mut Vec<u8>, src: &[u8], escape_html: bool) -> Result<(), String> {
    let mut stack: Vec<u8> = Vec::new();
    let mut i = 0;

    'value: loop {
        i = skip_ws(src, i);
        match src.get(i) {
            Some(b'{') => {
                out.push(b'{');
                i = skip_ws(src, i + 1);
                if src.get(i) == Some(&b'}') {
                    out.push(b'}');
                    i += 1;
                } else {
                    stack.push(b'{');
                    i = compact_key(out, src, i, escape_html)?;
                    continue 'value;
                }
            }
            Some(b'[') => {
                out.push(b'[');
                i = skip_ws(src, i + 1);
                if src.get(i) == Some(&b']') {
                    out.push(b']');
                    i += 1;
                } else {
                    stack.push(b'[');
                    continue 'value;
                }
            }
            Some(b'"') => i = compact_string(out, src, i, escape_html)?,
            Some(b't') => i = literal(out, src, i, b"true")?,
            Some(b'f') => i = literal(out, src, i, b"false")?,
            Some(b'n') => i = literal(out, src, i, b"null")?,
            Some(b'-' | b'0'..=b'9') => {
                let end = i + src[i..]
                    .iter()
                    .position(|b| !matches!(b, b'-' | b'+' | b'.' | b'e' | b'E' | b'0'..=b'9'))
                    .unwrap_or(src.len() - i);
                if !is_valid_number(&src[i..end]) {
                    return Err(format!("invalid number literal at offset {}", i));
                }
                out.extend_from_slice(&src[i..end]);
                i = end;
            }
            Some(&b) => return Err(format!("unexpected byte {:?} at offset {}", b as char, i)),
            None => return Err("unexpected end of input".to_string()),
        }

        // a value just ended; close containers until one expects another value
        loop {
            i = skip_ws(src, i);
            match stack.last() {
                None => {
                    if i != src.len() {
                        return Err(format!("trailing data at offset {}", i));
                    }
                    return Ok(());
                }
                Some(b'{') => match src.get(i) {
                    Some(b',') => {
                        out.push(b',');
                        i = compact_key(out, src, skip_ws(src, i + 1), escape_html)?;
                        continue 'value;
                    }
                    Some(b'}') => {
                        out.push(b'}');
                        stack.pop();
                        i += 1;
                    }
                    _ => return Err(format!("expected ',' or '}}' at offset {}", i)),
                },
                Some(_) => match src.get(i) {
                    Some(b',') => {
                        out.push(b',');
                        i += 1;
                        continue 'value;
                    }
                    Some(b']') => {
                        out.push(b']');
                        stack.pop();
                        i += 1;
                    }
                    _ => return Err(format!("expected ',' or ']' at offset {}", i)),
                },
            }
        }
    }
}

fn compact_key(out: &mut Vec<u8>, src: &[u8], i: usize, escape_html: bool) -> Result<usize, String> {
    if src.get(i) != Some(&b'"') {
        return Err(format!("expected object key at offset {}", i));
    }
    let i = skip_ws(src, compact_string(out, src, i, escape_html)?);
    if src.get(i) != Some(&b':') {
        return Err(format!("expected ':' at offset {}", i));
    }
    out.push(b':');
    Ok(i + 1)
}

fn literal(out: &mut Vec<u8>, src: &[u8], i: usize, word: &[u8]) -> Result<usize, String> {
    if src.len() >= i + word.len() && &src[i..i + word.len()] == word {
        out.extend_from_slice(word);
        Ok(i + word.len())
    } else {
        Err(format!("invalid literal at offset {}", i))
    }
}

fn compact_string(
    out: &mut Vec<u8>,
    src: &[u8],
    start: usize,
    escape_html: bool,
) -> Result<usize, String> {
    let mut i = start + 1;
    let mut copied = start;
    loop {
        match src.get(i) {
            None => return Err("unterminated string".to_string()),
            Some(b'"') => {
                out.extend_from_slice(&src[copied..=i]);
                return Ok(i + 1);
            }
            Some(b'\\') => match src.get(i + 1) {
                Some(b'"' | b'\\' | b'/' | b'b' | b'f' | b'n' | b'r' | b't') => i += 2,
                Some(b'u') => {
                    let hex = src.get(i + 2..i + 6).ok_or("truncated \\u escape")?;
                    if !hex.iter().all(u8::is_ascii_hexdigit) {
                        return Err(format!("invalid \\u escape at offset {}", i));
                    }
                    i += 6;
                }
                _ => return Err(format!("invalid escape at offset {}", i)),
            },
            Some(&b) if b < 0x20 => {
                return Err(format!("control character in string at offset {}", i))
            }
            Some(&b) if escape_html && matches!(b, b'<' | b'>' | b'&') => {
                out.extend_from_slice(&src[copied..i]);
                out.extend_from_slice(match b {
                    b'<' => b"\\u003c",
                    b'>' => b"\\u003e",
                    _ => b"\\u0026",
                });
                i += 1;
                copied = i;
            }
            Some(0xE2)
                if escape_html
                    && src.get(i + 1) == Some(&0x80)
                    && matches!(src.get(i + 2), Some(0xA8 | 0xA9)) =>
            {
                out.extend_from_slice(&src[copied..i]);
                out.extend_from_slice(if src[i + 2] == 0xA8 { b"\\u2028" } else { b"\\u2029" });
                i += 3;
                copied = i;
            }
            Some(_) => i += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b64(bytes: &[u8]) -> String {
        let mut out = Vec::new();
        append_base64(&mut out, bytes);
        String::from_utf8(out).unwrap()
    }

    fn compacted(src: &str, html: bool) -> Result<String, String> {
        let mut out = Vec::new();
        compact(&mut out, src.as_bytes(), html).map(|_| String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_base64_padding() {
        assert_eq!(b64(b""), "\"\"");
        assert_eq!(b64(b"f"), "\"Zg==\"");
        assert_eq!(b64(b"fo"), "\"Zm8=\"");
        assert_eq!(b64(b"foo"), "\"Zm9v\"");
        assert_eq!(b64(&[0xFF, 0xFE, 0xFD, 0xFC]), "\"//79/A==\"");
    }

    #[test]
    fn test_byte_array_numbers() {
        let mut out = Vec::new();
        append_byte_array(&mut out, &[1, 2, 255]);
        assert_eq!(out, b"[1,2,255]");
    }

    #[test]
    fn test_compact_strips_whitespace() {
        assert_eq!(
            compacted(" {\n \"a\" : [ 1 , true , null ] ,\"b\":{ } } ", false).unwrap(),
            r#"{"a":[1,true,null],"b":{}}"#
        );
        assert_eq!(compacted("\"a b\"", false).unwrap(), "\"a b\"");
        assert_eq!(compacted("-1.5e3", false).unwrap(), "-1.5e3");
    }

    #[test]
    fn test_compact_escapes_html_in_strings() {
        assert_eq!(
            compacted(r#"{"k":"<a&b>"}"#, true).unwrap(),
            r#"{"k":"\u003ca\u0026b\u003e"}"#
        );
        assert_eq!(compacted(r#""<""#, false).unwrap(), r#""<""#);
    }

    #[test]
    fn test_compact_rejects_invalid() {
        for bad in ["", "{", "[1,]", "{\"a\" 1}", "01", "tru", "\"\\x\"", "1 2", "{1:2}", "\"a\nb\""] {
            assert!(compacted(bad, true).is_err(), "{bad:?}");
        }
        let mut out = b"keep".to_vec();
        assert!(compact(&mut out, b"[1,", true).is_err());
        assert_eq!(out, b"keep");
    }
}
