//! Hex and raw-binary framing for assembled programs: one 128-bit
//! instruction word per line as 32 uppercase hex digits, or 16
//! little-endian bytes per word in the `--bin` form.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HexError {
    #[error("line {line}: '{text}' is not a 128-bit hex instruction word")]
    InvalidLine { line: usize, text: String },
}

/// Render one instruction word as a 32-digit uppercase hex line.
pub fn format_hex_line(word: u128) -> String {
    format!("{word:032X}")
}

/// Render a full program as hex text, one line per word, trailing newline.
pub fn write_hex(words: &[u128]) -> String {
    let mut out = String::with_capacity(words.len() * 33);
    for word in words {
        out.push_str(&format_hex_line(*word));
        out.push('\n');
    }
    out
}

/// Render a full program as raw bytes: each word as 16 little-endian bytes.
pub fn write_bin(words: &[u128]) -> Vec<u8> {
    let mut out = Vec::with_capacity(words.len() * 16);
    for word in words {
        out.extend_from_slice(&word.to_le_bytes());
    }
    out
}

/// Parse hex text back into instruction words. Hex digits may be upper or
/// lower case; blank lines are skipped.
pub fn load_hex(text: &str) -> Result<Vec<u128>, HexError> {
    let mut words = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if line.len() != 32 || !line.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(HexError::InvalidLine {
                line: idx + 1,
                text: line.to_string(),
            });
        }
        let word = u128::from_str_radix(line, 16).map_err(|_| HexError::InvalidLine {
            line: idx + 1,
            text: line.to_string(),
        })?;
        words.push(word);
    }
    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_line_is_32_uppercase_digits() {
        let line = format_hex_line(0xabu128);
        assert_eq!(line.len(), 32);
        assert!(line.ends_with("AB"));
        assert_eq!(u128::from_str_radix(&line, 16).unwrap(), 0xab);
    }

    #[test]
    fn load_hex_is_case_insensitive() {
        let words = load_hex("ab\nAB\n").unwrap();
        assert_eq!(words, vec![0xab, 0xab]);
    }

    #[test]
    fn load_hex_rejects_non_hex_line() {
        assert!(load_hex("not hex").is_err());
    }

    #[test]
    fn bin_round_trips_little_endian() {
        let words = vec![0x0102030405060708090a0b0c0d0e0f10u128];
        let bytes = write_bin(&words);
        assert_eq!(bytes.len(), 16);
        assert_eq!(u128::from_le_bytes(bytes.try_into().unwrap()), words[0]);
    }
}
