//! Time instant and duration rendering.
//!
//! The two RFC 3339 layouts are rendered by [`fill_rfc3339`], which converts the
//! day count to a civil date inline and fills a fixed buffer. Any other layout goes
//! through chrono's formatter.

use crate::escape::{append_quoted, Escape};
use crate::number::{append_float, append_i64, FloatBits};
use crate::options::DurationFormat;
use crate::{Error, Result};
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, FixedOffset};
use std::fmt::Write as _;

/// RFC 3339 with whole seconds, `Z` for UTC.
pub const RFC3339: &str = "%Y-%m-%dT%H:%M:%S%:z";
/// RFC 3339 with fractional seconds, trailing zeros trimmed. The default layout.
pub const RFC3339_NANO: &str = "%Y-%m-%dT%H:%M:%S%.f%:z";

const NANOS_PER_SEC: u32 = 1_000_000_000;
const SECS_PER_DAY: i64 = 86_400;

/// Returns `true` if chrono can format with `layout`.
pub(crate) fn is_valid_layout(layout: &str) -> bool {
    matches!(layout, RFC3339 | RFC3339_NANO)
        || !StrftimeItems::new(layout).any(|item| matches!(item, Item::Error))
}

/// Appends `t` as a quoted string in `layout`.
///
/// # Errors
///
/// Fails with [`Error::UnsupportedValue`] if the year is outside `0..=9999`.
pub fn append_time(
    out: &mut Vec<u8>,
    t: &DateTime<FixedOffset>,
    layout: &str,
    escape: Escape,
) -> Result<()> {
    let (year, month, day, hour, minute, second, nanos) = civil_parts(t);
    if !(0..=9999).contains(&year) {
        return Err(Error::unsupported_value(format!(
            "year {} outside of range [0,9999]",
            year
        )));
    }

    let fractional = match layout {
        RFC3339 => Some(false),
        RFC3339_NANO => Some(true),
        _ => None,
    };
    if let Some(fractional) = fractional {
        let mut buf = [0u8; 40];
        let parts = CivilTime {
            year: year as u32,
            month,
            day,
            hour,
            minute,
            second,
            nanos: if fractional { nanos } else { 0 },
            offset_secs: t.offset().local_minus_utc(),
        };
        let n = fill_rfc3339(&mut buf, &parts);
        out.reserve(n + 2);
        out.push(b'"');
        out.extend_from_slice(&buf[..n]);
        out.push(b'"');
        return Ok(());
    }

    let mut text = String::with_capacity(40);
    write!(text, "{}", t.format(layout))
        .map_err(|_| Error::invalid_option(format!("cannot format time with layout {:?}", layout)))?;
    append_quoted(out, text.as_bytes(), escape);
    Ok(())
}

/// Appends the instant as integer seconds since the Unix epoch.
#[inline]
pub fn append_unix(out: &mut Vec<u8>, t: &DateTime<FixedOffset>) {
    append_i64(out, t.timestamp());
}

/// Broken-down wall-clock time at a fixed offset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CivilTime {
    pub year: u32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
    /// Zero suppresses the fractional part.
    pub nanos: u32,
    pub offset_secs: i32,
}

fn civil_parts(t: &DateTime<FixedOffset>) -> (i64, u32, u32, u32, u32, u32, u32) {
    let local = t.timestamp() + i64::from(t.offset().local_minus_utc());
    let mut nanos = t.timestamp_subsec_nanos();
    let days = local.div_euclid(SECS_PER_DAY);
    let secs_of_day = local.rem_euclid(SECS_PER_DAY) as u32;
    let (year, month, day) = civil_from_days(days);
    let hour = secs_of_day / 3600;
    let minute = secs_of_day / 60 % 60;
    let mut second = secs_of_day % 60;
    if nanos >= NANOS_PER_SEC {
        // leap second, carried by chrono as an overlong fraction
        nanos -= NANOS_PER_SEC;
        second += 1;
    }
    (year, month, day, hour, minute, second, nanos)
}

/// Converts days since 1970-01-01 to a proleptic Gregorian (year, month, day).
pub(crate) fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}

#[inline]
fn put2(buf: &mut [u8], at: usize, v: u32) {
    buf[at] = b'0' + (v / 10) as u8;
    buf[at + 1] = b'0' + (v % 10) as u8;
}

/// Fills `buf` with the RFC 3339 rendering of `t`; returns the number of bytes written.
///
/// ```rust
/// use planjson::time::{fill_rfc3339, CivilTime};
///
/// let mut buf = [0u8; 40];
/// let t = CivilTime {
///     year: 2024, month: 1, day: 15, hour: 10, minute: 30, second: 0,
///     nanos: 120_000_000, offset_secs: 0,
/// };
/// let n = fill_rfc3339(&mut buf, &t);
/// assert_eq!(&buf[..n], b"2024-01-15T10:30:00.12Z");
/// ```
pub fn fill_rfc3339(buf: &mut [u8; 40], t: &CivilTime) -> usize {
    put2(buf, 0, t.year / 100);
    put2(buf, 2, t.year % 100);
    buf[4] = b'-';
    put2(buf, 5, t.month);
    buf[7] = b'-';
    put2(buf, 8, t.day);
    buf[10] = b'T';
    put2(buf, 11, t.hour);
    buf[13] = b':';
    put2(buf, 14, t.minute);
    buf[16] = b':';
    put2(buf, 17, t.second);
    let mut n = 19;

    if t.nanos != 0 {
        buf[n] = b'.';
        let mut frac = t.nanos;
        let mut digits = [0u8; 9];
        for slot in digits.iter_mut().rev() {
            *slot = b'0' + (frac % 10) as u8;
            frac /= 10;
        }
        let keep = 9 - digits.iter().rev().take_while(|&&d| d == b'0').count();
        buf[n + 1..n + 1 + keep].copy_from_slice(&digits[..keep]);
        n += 1 + keep;
    }

    if t.offset_secs == 0 {
        buf[n] = b'Z';
        return n + 1;
    }
    let (sign, abs) = if t.offset_secs < 0 {
        (b'-', t.offset_secs.unsigned_abs())
    } else {
        (b'+', t.offset_secs as u32)
    };
    buf[n] = sign;
    put2(buf, n + 1, abs / 3600);
    buf[n + 3] = b':';
    put2(buf, n + 4, abs / 60 % 60);
    n + 6
}

const NANOSECOND: u64 = 1;
const MICROSECOND: u64 = 1_000 * NANOSECOND;
const MILLISECOND: u64 = 1_000 * MICROSECOND;
const SECOND: u64 = 1_000 * MILLISECOND;
const MINUTE: i64 = 60 * SECOND as i64;

/// Writes the fraction `v / 10^prec` right to left, dropping trailing zeros.
fn fill_frac(buf: &mut [u8], mut w: usize, mut v: u64, prec: usize) -> (usize, u64) {
    let mut print = false;
    for _ in 0..prec {
        let digit = v % 10;
        print = print || digit != 0;
        if print {
            w -= 1;
            buf[w] = b'0' + digit as u8;
        }
        v /= 10;
    }
    if print {
        w -= 1;
        buf[w] = b'.';
    }
    (w, v)
}

fn fill_int(buf: &mut [u8], mut w: usize, mut v: u64) -> usize {
    if v == 0 {
        w -= 1;
        buf[w] = b'0';
        return w;
    }
    while v > 0 {
        w -= 1;
        buf[w] = b'0' + (v % 10) as u8;
        v /= 10;
    }
    w
}

/// Fills `buf` from the right with the human rendering of `nanos`, e.g. `1h2m3.004s`.
/// Returns the start index.
pub fn fill_duration(buf: &mut [u8; 32], nanos: i64) -> usize {
    let mut w = buf.len();
    let neg = nanos < 0;
    let mut u = nanos.unsigned_abs();

    if u < SECOND {
        w -= 1;
        buf[w] = b's';
        let prec;
        if u == 0 {
            w -= 1;
            buf[w] = b'0';
            return w;
        } else if u < MICROSECOND {
            prec = 0;
            w -= 1;
            buf[w] = b'n';
        } else if u < MILLISECOND {
            prec = 3;
            // U+00B5 MICRO SIGN
            w -= 2;
            buf[w] = 0xC2;
            buf[w + 1] = 0xB5;
        } else {
            prec = 6;
            w -= 1;
            buf[w] = b'm';
        }
        let (nw, nu) = fill_frac(buf, w, u, prec);
        w = fill_int(buf, nw, nu);
    } else {
        w -= 1;
        buf[w] = b's';
        let (nw, nu) = fill_frac(buf, w, u, 9);
        w = fill_int(buf, nw, nu % 60);
        u = nu / 60;
        if u > 0 {
            w -= 1;
            buf[w] = b'm';
            w = fill_int(buf, w, u % 60);
            u /= 60;
            if u > 0 {
                w -= 1;
                buf[w] = b'h';
                w = fill_int(buf, w, u);
            }
        }
    }

    if neg {
        w -= 1;
        buf[w] = b'-';
    }
    w
}

/// Appends a duration given in nanoseconds using `format`.
pub fn append_duration(out: &mut Vec<u8>, nanos: i64, format: DurationFormat) -> Result<()> {
    match format {
        DurationFormat::String => {
            let mut buf = [0u8; 32];
            let start = fill_duration(&mut buf, nanos);
            out.push(b'"');
            out.extend_from_slice(&buf[start..]);
            out.push(b'"');
        }
        DurationFormat::Nanoseconds => append_i64(out, nanos),
        DurationFormat::Microseconds => append_i64(out, nanos / MICROSECOND as i64),
        DurationFormat::Milliseconds => append_i64(out, nanos / MILLISECOND as i64),
        DurationFormat::Seconds => {
            let whole = nanos / SECOND as i64;
            let rest = nanos % SECOND as i64;
            append_float(out, whole as f64 + rest as f64 / 1e9, FloatBits::F64)?;
        }
        DurationFormat::Minutes => {
            let whole = nanos / MINUTE;
            let rest = nanos % MINUTE;
            append_float(out, whole as f64 + rest as f64 / (60.0 * 1e9), FloatBits::F64)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn duration(nanos: i64) -> String {
        let mut buf = [0u8; 32];
        let start = fill_duration(&mut buf, nanos);
        String::from_utf8(buf[start..].to_vec()).unwrap()
    }

    fn time_in(t: &DateTime<FixedOffset>, layout: &str) -> String {
        let mut out = Vec::new();
        append_time(&mut out, t, layout, Escape::default()).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_civil_from_days() {
        assert_eq!(civil_from_days(0), (1970, 1, 1));
        assert_eq!(civil_from_days(-1), (1969, 12, 31));
        assert_eq!(civil_from_days(11_016), (2000, 2, 29));
        assert_eq!(civil_from_days(19_737), (2024, 1, 15));
        assert_eq!(civil_from_days(-719_528), (0, 1, 1));
    }

    #[test]
    fn test_rfc3339_fast_path_matches_chrono() {
        let t = FixedOffset::east_opt(5 * 3600 + 30 * 60)
            .unwrap()
            .with_ymd_and_hms(2023, 11, 5, 7, 8, 9)
            .unwrap();
        assert_eq!(time_in(&t, RFC3339), "\"2023-11-05T07:08:09+05:30\"");
        assert_eq!(time_in(&t, RFC3339_NANO), "\"2023-11-05T07:08:09+05:30\"");

        let utc = FixedOffset::east_opt(0).unwrap();
        let t = utc.timestamp_opt(1_700_000_000, 123_456_000).unwrap();
        assert_eq!(time_in(&t, RFC3339_NANO), "\"2023-11-14T22:13:20.123456Z\"");
        assert_eq!(time_in(&t, RFC3339), "\"2023-11-14T22:13:20Z\"");

        let west = FixedOffset::west_opt(8 * 3600).unwrap();
        let t = west.timestamp_opt(0, 0).unwrap();
        assert_eq!(time_in(&t, RFC3339), "\"1969-12-31T16:00:00-08:00\"");
    }

    #[test]
    fn test_custom_layout_uses_chrono() {
        let t = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 3, 9, 0, 0, 0)
            .unwrap();
        assert_eq!(time_in(&t, "%d/%m/%Y"), "\"09/03/2024\"");
        assert!(is_valid_layout("%Y"));
        assert!(!is_valid_layout("%Y%"));
    }

    #[test]
    fn test_year_out_of_range() {
        let t = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(10_000, 1, 1, 0, 0, 0)
            .unwrap();
        let err = append_time(&mut Vec::new(), &t, RFC3339, Escape::default()).unwrap_err();
        assert!(matches!(err, Error::UnsupportedValue(_)));

        let mut out = Vec::new();
        append_unix(&mut out, &t);
        assert_eq!(out, b"253402300800");
    }

    #[test]
    fn test_duration_strings() {
        assert_eq!(duration(0), "0s");
        assert_eq!(duration(1), "1ns");
        assert_eq!(duration(1_100), "1.1µs");
        assert_eq!(duration(2_200_000), "2.2ms");
        assert_eq!(duration(3_723_004_000_000), "1h2m3.004s");
        assert_eq!(duration(-60_000_000_000), "-1m0s");
        assert_eq!(duration(i64::MIN), "-2562047h47m16.854775808s");
    }

    #[test]
    fn test_duration_numeric_formats() {
        let render = |d, f| {
            let mut out = Vec::new();
            append_duration(&mut out, d, f).unwrap();
            String::from_utf8(out).unwrap()
        };
        let d = 90_000_000_000;
        assert_eq!(render(d, DurationFormat::String), "\"1m30s\"");
        assert_eq!(render(d, DurationFormat::Nanoseconds), "90000000000");
        assert_eq!(render(d, DurationFormat::Microseconds), "90000000");
        assert_eq!(render(d, DurationFormat::Milliseconds), "90000");
        assert_eq!(render(d, DurationFormat::Seconds), "90");
        assert_eq!(render(d, DurationFormat::Minutes), "1.5");
        assert_eq!(render(1_500_000_000, DurationFormat::Seconds), "1.5");
        assert_eq!(render(-1_999_999, DurationFormat::Milliseconds), "-1");
    }
}
