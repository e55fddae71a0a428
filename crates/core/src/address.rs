//! Address, offset and byte-pattern parsing
//!
//! Configuration files spell addresses as strings (`"0x4A3F10"` or decimal)
//! because TOML integers are signed and awkward for pointers.

use crate::error::{ConfigError, ConfigResult};
use regex::Regex;

/// Placeholder byte written as `XX` in patch patterns
pub const PLACEHOLDER_BYTE: u8 = 0xFF;

/// Parse an absolute address written in hex (`0x` prefix) or decimal
pub fn parse_address(value: &str) -> ConfigResult<usize> {
    let trimmed = value.trim();
    let parsed = match strip_hex_prefix(trimmed) {
        Some(hex) => usize::from_str_radix(hex, 16),
        None => trimmed.parse::<usize>(),
    };
    parsed.map_err(|e| ConfigError::InvalidFormat(format!("invalid address '{value}': {e}")))
}

/// Parse a signed offset such as `"0x2A"`, `"-0x10"` or `"12"`
pub fn parse_offset(value: &str) -> ConfigResult<isize> {
    let trimmed = value.trim();
    let (negative, magnitude) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };

    let parsed = match strip_hex_prefix(magnitude) {
        Some(hex) => isize::from_str_radix(hex, 16),
        None => magnitude.parse::<isize>(),
    }
    .map_err(|e| ConfigError::InvalidFormat(format!("invalid offset '{value}': {e}")))?;

    Ok(if negative { -parsed } else { parsed })
}

/// Parse a byte pattern like `"8D 86 XX XX XX XX"`
///
/// Every two-digit hex token becomes a byte and every `XX` becomes
/// [`PLACEHOLDER_BYTE`]. Other characters are ignored. A pattern without any
/// byte is rejected.
pub fn parse_bytes(pattern: &str) -> ConfigResult<Vec<u8>> {
    let token = Regex::new("[0-9A-Fa-f]{2}|XX")
        .map_err(|e| ConfigError::InvalidFormat(format!("byte pattern regex: {e}")))?;

    let mut bytes = Vec::new();
    for m in token.find_iter(pattern) {
        let text = m.as_str();
        if text == "XX" {
            bytes.push(PLACEHOLDER_BYTE);
        } else {
            let byte = u8::from_str_radix(text, 16).map_err(|e| {
                ConfigError::InvalidFormat(format!("invalid byte '{text}' in '{pattern}': {e}"))
            })?;
            bytes.push(byte);
        }
    }

    if bytes.is_empty() {
        return Err(ConfigError::InvalidFormat(format!(
            "no valid bytes found in '{pattern}'"
        )));
    }

    Ok(bytes)
}

fn strip_hex_prefix(value: &str) -> Option<&str> {
    value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
}
