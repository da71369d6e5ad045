//! String Values and Bitmaps
//!
//! Strings are plain byte sequences. Numeric commands interpret them as
//! 64-bit integers or doubles, and the bit commands treat them as a bitmap
//! where bit 0 is the most significant bit of byte 0.

use crate::error::CommandError;

/// Largest string a write may produce (512 MB).
pub const MAX_STRING_LEN: usize = 512 * 1024 * 1024;

/// Largest bit offset accepted by SETBIT/GETBIT.
pub const MAX_BIT_OFFSET: u64 = (MAX_STRING_LEN as u64) * 8 - 1;

/// Parses a strict base-10 integer: no sign prefix `+`, no padding, no
/// leading zeros.
pub fn parse_i64(raw: &[u8]) -> Result<i64, CommandError> {
    let text = std::str::from_utf8(raw).map_err(|_| CommandError::NotAnInteger)?;
    text.parse::<i64>()
        .ok()
        .filter(|n| n.to_string() == text)
        .ok_or(CommandError::NotAnInteger)
}

/// Parses a double. NaN is never a valid input.
pub fn parse_f64(raw: &[u8]) -> Result<f64, CommandError> {
    let text = std::str::from_utf8(raw).map_err(|_| CommandError::NotAFloat)?;
    if text.is_empty() || text.trim() != text {
        return Err(CommandError::NotAFloat);
    }
    match text.parse::<f64>() {
        Ok(n) if !n.is_nan() => Ok(n),
        _ => Err(CommandError::NotAFloat),
    }
}

/// Formats a double the way replies carry it: `10`, `10.5`, `inf`.
pub fn format_f64(n: f64) -> String {
    format!("{}", n)
}

/// Formats the result of INCRBYFLOAT or HINCRBYFLOAT.
///
/// A sum that lands within a few ULPs of a 15-digit decimal is printed as
/// that decimal, so `0.1 + 0.2` reads `0.3`. Anything further away keeps
/// its shortest exact form.
pub fn format_float_counter(n: f64) -> String {
    if !n.is_finite() || n == 0.0 {
        return format_f64(n);
    }
    let rounded = format!("{:.14e}", n).parse::<f64>().unwrap_or(n);
    let ulps = (rounded.to_bits() as i64).wrapping_sub(n.to_bits() as i64).unsigned_abs();
    if rounded.is_sign_negative() == n.is_sign_negative() && ulps <= 4 {
        format_f64(rounded)
    } else {
        format_f64(n)
    }
}

/// Adds `delta` to the integer held in `current` (absent counts as 0).
pub fn incr_by(current: Option<&[u8]>, delta: i64) -> Result<i64, CommandError> {
    let base = match current {
        Some(raw) => parse_i64(raw)?,
        None => 0,
    };
    base.checked_add(delta).ok_or(CommandError::Overflow)
}

/// Adds `delta` to the double held in `current` (absent counts as 0).
pub fn incr_by_float(current: Option<&[u8]>, delta: f64) -> Result<f64, CommandError> {
    let base = match current {
        Some(raw) => parse_f64(raw)?,
        None => 0.0,
    };
    let result = base + delta;
    if result.is_finite() {
        Ok(result)
    } else {
        Err(CommandError::NanOrInfinity)
    }
}

/// Resolves an inclusive `[start, end]` range with negative indices counted
/// from the end. Returns `None` when the range selects nothing.
pub fn resolve_range(len: usize, start: i64, end: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    if len == 0 || (start < 0 && end < 0 && start > end) {
        return None;
    }
    let mut start = if start < 0 { len + start } else { start };
    let mut end = if end < 0 { len + end } else { end };
    start = start.max(0);
    end = end.max(0);
    if end >= len {
        end = len - 1;
    }
    if start > end {
        return None;
    }
    Some((start as usize, end as usize))
}

/// GETRANGE: the substring between two inclusive offsets.
pub fn get_range(s: &[u8], start: i64, end: i64) -> &[u8] {
    match resolve_range(s.len(), start, end) {
        Some((from, to)) => &s[from..=to],
        None => &[],
    }
}

/// SETRANGE: overwrites `buf` at `offset`, zero-padding as needed.
///
/// Returns the new length.
pub fn set_range(buf: &mut Vec<u8>, offset: usize, value: &[u8]) -> Result<usize, CommandError> {
    if value.is_empty() {
        return Ok(buf.len());
    }
    let end = offset
        .checked_add(value.len())
        .filter(|end| *end <= MAX_STRING_LEN)
        .ok_or(CommandError::StringTooLong)?;
    if buf.len() < end {
        buf.resize(end, 0);
    }
    buf[offset..end].copy_from_slice(value);
    Ok(buf.len())
}

// ============================================================================
// BITMAPS
// ============================================================================

/// Unit for BITCOUNT ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitUnit {
    Byte,
    Bit,
}

/// Bitwise operator for BITOP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitOp {
    And,
    Or,
    Xor,
    Not,
}

impl BitOp {
    pub fn parse(raw: &[u8]) -> Result<Self, CommandError> {
        match raw.to_ascii_uppercase().as_slice() {
            b"AND" => Ok(BitOp::And),
            b"OR" => Ok(BitOp::Or),
            b"XOR" => Ok(BitOp::Xor),
            b"NOT" => Ok(BitOp::Not),
            _ => Err(CommandError::Syntax),
        }
    }
}

/// Parses a SETBIT/GETBIT offset.
pub fn parse_bit_offset(raw: &[u8]) -> Result<u64, CommandError> {
    let offset = parse_i64(raw).map_err(|_| CommandError::BitOffsetOutOfRange)?;
    if offset < 0 || offset as u64 > MAX_BIT_OFFSET {
        return Err(CommandError::BitOffsetOutOfRange);
    }
    Ok(offset as u64)
}

/// Reads the bit at `offset`; bits past the end are 0.
pub fn get_bit(s: &[u8], offset: u64) -> u8 {
    let byte = (offset >> 3) as usize;
    let shift = 7 - (offset & 7) as u8;
    s.get(byte).map_or(0, |b| (b >> shift) & 1)
}

/// Writes the bit at `offset`, growing the buffer with zero bytes.
///
/// Returns the previous bit.
pub fn set_bit(buf: &mut Vec<u8>, offset: u64, on: bool) -> u8 {
    let byte = (offset >> 3) as usize;
    let shift = 7 - (offset & 7) as u8;
    if buf.len() <= byte {
        buf.resize(byte + 1, 0);
    }
    let old = (buf[byte] >> shift) & 1;
    if on {
        buf[byte] |= 1 << shift;
    } else {
        buf[byte] &= !(1 << shift);
    }
    old
}

/// BITCOUNT over the whole string or an inclusive range.
pub fn bit_count(s: &[u8], range: Option<(i64, i64, BitUnit)>) -> usize {
    match range {
        None => s.iter().map(|b| b.count_ones() as usize).sum(),
        Some((start, end, BitUnit::Byte)) => get_range(s, start, end)
            .iter()
            .map(|b| b.count_ones() as usize)
            .sum(),
        Some((start, end, BitUnit::Bit)) => match resolve_range(s.len() * 8, start, end) {
            Some((from, to)) => (from..=to)
                .filter(|bit| get_bit(s, *bit as u64) == 1)
                .count(),
            None => 0,
        },
    }
}

/// BITOP: combines the sources into a new string as long as the longest
/// source. Missing sources behave as empty strings.
pub fn bit_op(op: BitOp, sources: &[&[u8]]) -> Vec<u8> {
    let len = sources.iter().map(|s| s.len()).max().unwrap_or(0);
    if op == BitOp::Not {
        return sources
            .first()
            .map(|s| s.iter().map(|b| !b).collect())
            .unwrap_or_default();
    }

    (0..len)
        .map(|i| {
            let mut bytes = sources.iter().map(|s| s.get(i).copied().unwrap_or(0));
            let first = bytes.next().unwrap_or(0);
            bytes.fold(first, |acc, b| match op {
                BitOp::And => acc & b,
                BitOp::Or => acc | b,
                BitOp::Xor => acc ^ b,
                BitOp::Not => acc,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_i64_strict() {
        assert_eq!(parse_i64(b"42"), Ok(42));
        assert_eq!(parse_i64(b"-7"), Ok(-7));
        assert!(parse_i64(b"+7").is_err());
        assert!(parse_i64(b"007").is_err());
        assert!(parse_i64(b" 1").is_err());
        assert!(parse_i64(b"abc").is_err());
        assert!(parse_i64(b"99999999999999999999").is_err());
    }

    #[test]
    fn test_parse_f64() {
        assert_eq!(parse_f64(b"1.5"), Ok(1.5));
        assert_eq!(parse_f64(b"-inf"), Ok(f64::NEG_INFINITY));
        assert!(parse_f64(b"nan").is_err());
        assert!(parse_f64(b"").is_err());
        assert_eq!(format_f64(150.0), "150");
        assert_eq!(format_f64(1.5), "1.5");
        assert_eq!(format_f64(f64::INFINITY), "inf");
    }

    #[test]
    fn test_format_float_counter() {
        assert_eq!(format_float_counter(0.1 + 0.2), "0.3");
        assert_eq!(format_float_counter(10.5 + 2.3), "12.8");
        assert_eq!(format_float_counter(-(0.1 + 0.2)), "-0.3");
        assert_eq!(format_float_counter(1.2345678901234567), format_f64(1.2345678901234567));
        assert_eq!(format_float_counter(3.0), "3");
        assert_eq!(format_float_counter(0.0), "0");
        assert_eq!(format_float_counter(f64::NEG_INFINITY), "-inf");
    }

    #[test]
    fn test_incr() {
        assert_eq!(incr_by(None, 5), Ok(5));
        assert_eq!(incr_by(Some(&b"10"[..]), -3), Ok(7));
        assert_eq!(incr_by(Some(&b"x"[..]), 1), Err(CommandError::NotAnInteger));
        assert_eq!(
            incr_by(Some(i64::MAX.to_string().as_bytes()), 1),
            Err(CommandError::Overflow)
        );
        let n = incr_by_float(Some(&b"10.5"[..]), 0.1).unwrap();
        assert!((n - 10.6).abs() < 1e-9);
    }

    #[test]
    fn test_get_range() {
        let s = b"This is a string";
        assert_eq!(get_range(s, 0, 3), b"This");
        assert_eq!(get_range(s, -3, -1), b"ing");
        assert_eq!(get_range(s, 0, -1), s);
        assert_eq!(get_range(s, 10, 100), b"string");
        assert_eq!(get_range(s, 5, 3), b"");
        assert_eq!(get_range(b"", 0, -1), b"");
    }

    #[test]
    fn test_set_range_pads_with_zeros() {
        let mut buf = b"Hello".to_vec();
        assert_eq!(set_range(&mut buf, 6, b"World"), Ok(11));
        assert_eq!(buf, b"Hello\0World");

        let mut buf = b"Hello World".to_vec();
        assert_eq!(set_range(&mut buf, 6, b"Redis"), Ok(11));
        assert_eq!(buf, b"Hello Redis");
    }

    #[test]
    fn test_bits() {
        let mut buf = Vec::new();
        assert_eq!(set_bit(&mut buf, 7, true), 0);
        assert_eq!(buf, vec![1]);
        assert_eq!(get_bit(&buf, 7), 1);
        assert_eq!(get_bit(&buf, 100), 0);
        assert_eq!(set_bit(&mut buf, 7, false), 1);
        assert_eq!(buf, vec![0]);
        assert!(parse_bit_offset(b"-1").is_err());
        assert!(parse_bit_offset(b"4294967296").is_err());
    }

    #[test]
    fn test_bit_count() {
        let s = b"foobar";
        assert_eq!(bit_count(s, None), 26);
        assert_eq!(bit_count(s, Some((0, 0, BitUnit::Byte))), 4);
        assert_eq!(bit_count(s, Some((1, 1, BitUnit::Byte))), 6);
        assert_eq!(bit_count(s, Some((5, 30, BitUnit::Bit))), 17);
    }

    #[test]
    fn test_bit_op() {
        assert_eq!(bit_op(BitOp::And, &[b"abc", b"ab"]), b"ab\0".to_vec());
        assert_eq!(bit_op(BitOp::Or, &[&[0x0f], &[0xf0]]), vec![0xff]);
        assert_eq!(bit_op(BitOp::Xor, &[&[0xff], &[0x0f]]), vec![0xf0]);
        assert_eq!(bit_op(BitOp::Not, &[&[0x0f]]), vec![0xf0]);
    }
}
