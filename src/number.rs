//! Integer, float and number-literal rendering.
//!
//! Integers are written right to left into a stack buffer and copied out in one
//! piece. Floats use the shortest decimal form that round-trips, switching to
//! exponential notation below `1e-6` and at or above `1e21`.

use crate::{Error, Result};
use std::io::Write;

/// Width of the float being rendered; shortest form depends on it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FloatBits {
    F32,
    F64,
}

const DIGITS_LUT: &[u8; 200] = b"\
0001020304050607080910111213141516171819\
2021222324252627282930313233343536373839\
4041424344454647484950515253545556575859\
6061626364656667686970717273747576777879\
8081828384858687888990919293949596979899";

/// Fills `buf` from the right with the decimal digits of `v`; returns the start index.
#[inline]
pub(crate) fn fill_u64(buf: &mut [u8; 20], mut v: u64) -> usize {
    let mut pos = buf.len();
    while v >= 100 {
        let rem = (v % 100) as usize * 2;
        v /= 100;
        pos -= 2;
        buf[pos] = DIGITS_LUT[rem];
        buf[pos + 1] = DIGITS_LUT[rem + 1];
    }
    if v >= 10 {
        let rem = v as usize * 2;
        pos -= 2;
        buf[pos] = DIGITS_LUT[rem];
        buf[pos + 1] = DIGITS_LUT[rem + 1];
    } else {
        pos -= 1;
        buf[pos] = b'0' + v as u8;
    }
    pos
}

#[inline]
pub fn append_u64(out: &mut Vec<u8>, v: u64) {
    let mut buf = [0u8; 20];
    let start = fill_u64(&mut buf, v);
    out.extend_from_slice(&buf[start..]);
}

#[inline]
pub fn append_i64(out: &mut Vec<u8>, v: i64) {
    if v < 0 {
        out.push(b'-');
    }
    append_u64(out, v.unsigned_abs());
}

/// Appends the shortest round-tripping rendering of `v`.
///
/// # Errors
///
/// Returns [`Error::UnsupportedValue`] for NaN and infinities.
///
/// # Examples
///
/// ```rust
/// use planjson::number::{append_float, FloatBits};
///
/// let mut out = Vec::new();
/// append_float(&mut out, 1e21, FloatBits::F64).unwrap();
/// assert_eq!(out, b"1e+21");
/// ```
pub fn append_float(out: &mut Vec<u8>, v: f64, bits: FloatBits) -> Result<()> {
    if !v.is_finite() {
        return Err(Error::unsupported_value(format!(
            "{} cannot be represented in JSON",
            v
        )));
    }

    let abs = v.abs();
    let exponential = abs != 0.0
        && match bits {
            FloatBits::F64 => abs < 1e-6 || abs >= 1e21,
            FloatBits::F32 => {
                let a = abs as f32;
                a < 1e-6 || a >= 1e21
            }
        };

    let written = match (bits, exponential) {
        (FloatBits::F64, false) => write!(out, "{}", v),
        (FloatBits::F32, false) => write!(out, "{}", v as f32),
        (FloatBits::F64, true) => write!(out, "{:e}", v),
        (FloatBits::F32, true) => write!(out, "{:e}", v as f32),
    };
    written.map_err(|e| Error::io(&e.to_string()))?;

    if exponential {
        // exponents carry an explicit sign: 1e21 -> 1e+21
        if let Some(e) = out.iter().rposition(|&b| b == b'e') {
            if out.get(e + 1) != Some(&b'-') {
                out.insert(e + 1, b'+');
            }
        }
    }
    Ok(())
}

/// Returns `true` if `s` is a valid JSON number literal.
///
/// ```rust
/// use planjson::number::is_valid_number;
///
/// assert!(is_valid_number(b"-12.5e+3"));
/// assert!(!is_valid_number(b"01"));
/// assert!(!is_valid_number(b"1."));
/// ```
#[must_use]
pub fn is_valid_number(s: &[u8]) -> bool {
    let mut i = 0;
    if s.get(i) == Some(&b'-') {
        i += 1;
    }
    match s.get(i) {
        Some(b'0') => i += 1,
        Some(b'1'..=b'9') => {
            while matches!(s.get(i), Some(b'0'..=b'9')) {
                i += 1;
            }
        }
        _ => return false,
    }
    if s.get(i) == Some(&b'.') {
        i += 1;
        if !matches!(s.get(i), Some(b'0'..=b'9')) {
            return false;
        }
        while matches!(s.get(i), Some(b'0'..=b'9')) {
            i += 1;
        }
    }
    if matches!(s.get(i), Some(b'e' | b'E')) {
        i += 1;
        if matches!(s.get(i), Some(b'+' | b'-')) {
            i += 1;
        }
        if !matches!(s.get(i), Some(b'0'..=b'9')) {
            return false;
        }
        while matches!(s.get(i), Some(b'0'..=b'9')) {
            i += 1;
        }
    }
    i == s.len()
}
