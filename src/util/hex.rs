//! # Hex Encoding/Decoding Utilities
//!
//! Hex helpers for captured frames: the CLI `decode` command, golden-frame
//! tests and the trace-level frame dumps.
//!
//! ```rust
//! use ultralite_mbus::util::hex::{decode_hex, encode_hex_upper};
//!
//! let data = decode_hex("68 03 03 68").unwrap();
//! assert_eq!(encode_hex_upper(&data), "68030368");
//! ```

use crate::error::MBusError;

/// Encode bytes to uppercase hex string
pub fn encode_hex_upper(data: &[u8]) -> String {
    hex::encode_upper(data)
}

/// Decode a hex string to bytes.
///
/// Accepts upper and lower case, an optional `0x` prefix, and whitespace,
/// `:` or `-` between bytes as captured by serial sniffers.
pub fn decode_hex(input: &str) -> Result<Vec<u8>, MBusError> {
    let trimmed = input.trim();
    let trimmed = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    let cleaned: String = trimmed
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':' && *c != '-')
        .collect();

    if cleaned.is_empty() || cleaned.len() % 2 != 0 {
        return Err(MBusError::InvalidHexString);
    }
    hex::decode(&cleaned).map_err(|_| MBusError::InvalidHexString)
}

/// Pretty-print hex data with an offset column and an ASCII column.
pub fn pretty_hex(data: &[u8], bytes_per_line: usize) -> String {
    let per_line = bytes_per_line.max(1);
    let mut result = String::new();

    for (i, chunk) in data.chunks(per_line).enumerate() {
        if i > 0 {
            result.push('\n');
        }
        result.push_str(&format!("{:04x}: ", i * per_line));

        let hex: Vec<String> = chunk.iter().map(|b| format!("{b:02X}")).collect();
        result.push_str(&hex.join(" "));

        let pad = (per_line - chunk.len()) * 3;
        result.push_str(&" ".repeat(pad));

        result.push_str("  |");
        for &byte in chunk {
            if byte.is_ascii_graphic() || byte == b' ' {
                result.push(byte as char);
            } else {
                result.push('.');
            }
        }
        result.push('|');
    }

    result
}
