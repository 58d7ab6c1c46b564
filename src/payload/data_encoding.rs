//! # M-Bus Data Encoding and Decoding
//!
//! This module provides functions for encoding and decoding the data types
//! carried in M-Bus data records: BCD (Type A), signed little-endian integers
//! (Type B), IEEE-754 reals (Type H) and compound time points (Types F and G).
//!
//! All multi-byte values on the wire are least significant byte first.

use crate::error::MBusError;
use chrono::{NaiveDate, NaiveDateTime};

/// Decodes packed BCD, least significant byte first.
///
/// A high nibble of `0xF` in the most significant byte marks a negative
/// value (EN 13757-3 Type A); any other nibble above 9 is rejected, as is a
/// value too large for an `i64`. An empty slice decodes to 0.
pub fn decode_bcd(input: &[u8]) -> Result<i64, MBusError> {
    let mut value: i64 = 0;
    let mut negative = false;

    for (idx, &byte) in input.iter().enumerate().rev() {
        let hi = byte >> 4;
        let lo = byte & 0x0F;
        let is_msb = idx + 1 == input.len();

        if is_msb && hi == 0x0F {
            negative = true;
        } else if hi > 9 {
            return Err(MBusError::InvalidBcd(byte));
        } else {
            value = push_digit(value, hi).ok_or(MBusError::InvalidBcd(byte))?;
        }

        if lo > 9 {
            return Err(MBusError::InvalidBcd(byte));
        }
        value = push_digit(value, lo).ok_or(MBusError::InvalidBcd(byte))?;
    }

    Ok(if negative { -value } else { value })
}

fn push_digit(value: i64, digit: u8) -> Option<i64> {
    value.checked_mul(10)?.checked_add(i64::from(digit))
}

/// Encodes a non-negative value as `len` bytes of packed BCD, least significant byte first.
///
/// Digits that do not fit are dropped, matching what a meter register does on overflow.
pub fn encode_bcd(mut value: u64, len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    for _ in 0..len {
        let lo = (value % 10) as u8;
        value /= 10;
        let hi = (value % 10) as u8;
        value /= 10;
        out.push((hi << 4) | lo);
    }
    out
}

/// Decodes an unsigned little-endian integer of up to eight bytes.
pub fn decode_uint_le(input: &[u8]) -> u64 {
    input
        .iter()
        .rev()
        .fold(0u64, |acc, b| (acc << 8) | *b as u64)
}

/// Decodes a signed (two's complement) little-endian integer of up to eight bytes.
pub fn decode_int_le(input: &[u8]) -> i64 {
    let raw = decode_uint_le(input);
    match input.len() {
        0 => 0,
        n if n >= 8 => raw as i64,
        n => {
            let shift = 64 - 8 * n as u32;
            ((raw << shift) as i64) >> shift
        }
    }
}

/// Decodes a 32-bit IEEE-754 real, little-endian.
pub fn decode_real_le(input: &[u8]) -> Option<f32> {
    let bytes: [u8; 4] = input.try_into().ok()?;
    Some(f32::from_le_bytes(bytes))
}

/// Decodes the three-letter manufacturer code (EN 62056-21 flag id).
pub fn decode_manufacturer(bytes: [u8; 2]) -> String {
    let id = u16::from_le_bytes(bytes);
    [(id >> 10) & 0x1F, (id >> 5) & 0x1F, id & 0x1F]
        .iter()
        .map(|&c| match c {
            1..=26 => (b'@' + c as u8) as char,
            _ => '?',
        })
        .collect()
}

/// Encodes a three-letter manufacturer code into its little-endian wire form.
pub fn encode_manufacturer(code: &str) -> Option<[u8; 2]> {
    let bytes = code.as_bytes();
    if bytes.len() != 3 || !bytes.iter().all(|b| b.is_ascii_uppercase()) {
        return None;
    }
    let id = bytes
        .iter()
        .fold(0u16, |acc, b| (acc << 5) | (b - b'@') as u16);
    Some(id.to_le_bytes())
}

/// Decodes a Type F (CP32) date and time. Returns `None` for the
/// "time invalid" flag or impossible calendar values.
pub fn decode_time_point_f(input: &[u8]) -> Option<NaiveDateTime> {
    if input.len() != 4 || input[0] & 0x80 != 0 {
        return None;
    }
    let minute = (input[0] & 0x3F) as u32;
    let hour = (input[1] & 0x1F) as u32;
    let date = decode_date_bits(input[2], input[3])?;
    date.and_hms_opt(hour, minute, 0)
}

/// Decodes a Type G (CP16) date.
pub fn decode_date_g(input: &[u8]) -> Option<NaiveDate> {
    if input.len() != 2 {
        return None;
    }
    decode_date_bits(input[0], input[1])
}

fn decode_date_bits(day_byte: u8, month_byte: u8) -> Option<NaiveDate> {
    let day = (day_byte & 0x1F) as u32;
    let month = (month_byte & 0x0F) as u32;
    let year = (((day_byte & 0xE0) >> 5) | ((month_byte & 0xF0) >> 1)) as i32;
    // Two-digit year; 81-99 belong to the previous century.
    let year = if year > 80 { 1900 + year } else { 2000 + year };
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Decodes the text of an ASCII data field or plain-text VIF; the wire order is reversed.
pub fn decode_ascii_reversed(input: &[u8]) -> String {
    input
        .iter()
        .rev()
        .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
        .collect()
}
