//! Line-oriented tokenizer. Strips `;`/`#` comments, preserves parenthesized
//! immediates as single tokens, and classifies register/bank-id/integer/
//! real/complex-immediate tokens.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LexError {
    #[error("invalid register, expected s0..s7 or v0..v7, got '{0}'")]
    BadRegister(String),
    #[error("invalid integer literal '{0}'")]
    BadInteger(String),
    #[error("invalid real literal '{0}'")]
    BadReal(String),
    #[error("invalid bank id, expected mb0..mb3 or 0..3, got '{0}'")]
    BadBankId(String),
}

/// Strip a trailing `;` or `#` comment (whichever occurs first, outside
/// parentheses) and trailing whitespace. Returns `None` for a blank or
/// comment-only line.
pub fn strip_comment(line: &str) -> Option<&str> {
    let mut paren = 0i32;
    let mut end = line.len();
    for (i, ch) in line.char_indices() {
        match ch {
            '(' => paren += 1,
            ')' => paren = (paren - 1).max(0),
            ';' | '#' if paren == 0 => {
                end = i;
                break;
            }
            _ => {}
        }
    }
    let trimmed = line[..end].trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

/// Split a comment-stripped line into comma/whitespace-separated tokens,
/// treating text inside one level of parentheses as opaque (so `c(1.5,
/// -2.25)` and `(0.5, 0.25)` survive as single tokens).
pub fn tokenize(line: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut buf = String::new();
    let mut paren = 0i32;
    for ch in line.chars() {
        match ch {
            '(' => {
                paren += 1;
                buf.push(ch);
            }
            ')' => {
                paren = (paren - 1).max(0);
                buf.push(ch);
            }
            ',' | ' ' | '\t' | '\r' | '\n' if paren == 0 => {
                if !buf.is_empty() {
                    out.push(std::mem::take(&mut buf));
                }
            }
            _ => buf.push(ch),
        }
    }
    if !buf.is_empty() {
        out.push(buf);
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegClass {
    Scalar,
    Vector,
}

/// Parse a register token (`s0`..`s7`, `v0`..`v7`, case-insensitive).
pub fn parse_reg(token: &str) -> Result<(RegClass, u8), LexError> {
    let t = token.trim();
    let mut chars = t.chars();
    let class = match chars.next() {
        Some(c) if c.eq_ignore_ascii_case(&'s') => RegClass::Scalar,
        Some(c) if c.eq_ignore_ascii_case(&'v') => RegClass::Vector,
        _ => return Err(LexError::BadRegister(token.to_string())),
    };
    let rest: String = chars.collect();
    if rest.len() != 1 {
        return Err(LexError::BadRegister(token.to_string()));
    }
    let idx = rest
        .chars()
        .next()
        .and_then(|c| c.to_digit(10))
        .filter(|d| *d <= 7)
        .ok_or_else(|| LexError::BadRegister(token.to_string()))?;
    Ok((class, idx as u8))
}

pub fn is_scalar_reg(token: &str) -> bool {
    matches!(parse_reg(token), Ok((RegClass::Scalar, _)))
}

pub fn is_vector_reg(token: &str) -> bool {
    matches!(parse_reg(token), Ok((RegClass::Vector, _)))
}

/// Parse a decimal or `0x`-prefixed hex integer literal, with an optional
/// leading `-`, and range-check it against a signed or unsigned bit width.
pub fn parse_int(token: &str, signed: bool, bits: u32) -> Result<i64, LexError> {
    let t = token.trim();
    let (neg, rest) = match t.strip_prefix('-') {
        Some(r) => (true, r),
        None => (false, t),
    };
    let val: i64 = if let Some(hex) = rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X")) {
        if hex.is_empty() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(LexError::BadInteger(token.to_string()));
        }
        i64::from_str_radix(hex, 16).map_err(|_| LexError::BadInteger(token.to_string()))?
    } else {
        if rest.is_empty() || !rest.chars().all(|c| c.is_ascii_digit()) {
            return Err(LexError::BadInteger(token.to_string()));
        }
        rest.parse::<i64>()
            .map_err(|_| LexError::BadInteger(token.to_string()))?
    };
    let val = if neg { -val } else { val };
    let (min, max) = if signed {
        (-(1i64 << (bits - 1)), (1i64 << (bits - 1)) - 1)
    } else {
        (0, (1i64 << bits) - 1)
    };
    if val < min || val > max {
        return Err(LexError::BadInteger(token.to_string()));
    }
    Ok(val)
}

/// Parse a bank-id token: `mb0`..`mb3` or a plain integer `0`..`3`.
pub fn parse_bank_id(token: &str) -> Result<u8, LexError> {
    let t = token.trim();
    if let Some(digits) = t.strip_prefix("mb").or_else(|| t.strip_prefix("MB")) {
        let n: u8 = digits
            .parse()
            .map_err(|_| LexError::BadBankId(token.to_string()))?;
        if n > 3 {
            return Err(LexError::BadBankId(token.to_string()));
        }
        return Ok(n);
    }
    match parse_int(t, false, 4) {
        Ok(n) if n <= 3 => Ok(n as u8),
        _ => Err(LexError::BadBankId(token.to_string())),
    }
}

/// An exact rational used to hold a real literal without any precision
/// loss before it is checked against Q22.23 for exact representability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExactRational {
    pub numerator: i128,
    pub denominator: i128,
}

impl ExactRational {
    fn from_int(v: i64) -> Self {
        ExactRational {
            numerator: v as i128,
            denominator: 1,
        }
    }

    /// Multiply by `2^shift` and check the result is an integer, returning
    /// it. Used to pack a real literal into a fixed-point field without
    /// rounding.
    pub fn scale_pow2_exact(&self, shift: u32) -> Option<i64> {
        let scaled_num = self.numerator << shift;
        if scaled_num % self.denominator != 0 {
            return None;
        }
        let v = scaled_num / self.denominator;
        if v > i64::MAX as i128 || v < i64::MIN as i128 {
            None
        } else {
            Some(v as i64)
        }
    }
}

/// Parse a real literal: signed decimal, optional fractional part and
/// exponent (e.g. `-1.25`, `2`, `3.0`, `1.5e-3`). A bare `0x`-prefixed token
/// is treated as an exact integer.
pub fn parse_real(token: &str) -> Result<ExactRational, LexError> {
    let t = token.trim();
    if t.to_ascii_lowercase().starts_with("0x") || t.to_ascii_lowercase().starts_with("-0x") {
        let v = parse_int(t, true, 64)?;
        return Ok(ExactRational::from_int(v));
    }

    let (neg, body) = match t.strip_prefix('-') {
        Some(r) => (true, r),
        None => (false, t),
    };

    let (mantissa, exponent) = match body.find(['e', 'E']) {
        Some(idx) => {
            let exp_str = &body[idx + 1..];
            let exp: i32 = exp_str
                .parse()
                .map_err(|_| LexError::BadReal(token.to_string()))?;
            (&body[..idx], exp)
        }
        None => (body, 0),
    };

    let (int_part, frac_part) = match mantissa.split_once('.') {
        Some((i, f)) => (i, f),
        None => (mantissa, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(LexError::BadReal(token.to_string()));
    }
    if !int_part.chars().all(|c| c.is_ascii_digit())
        || !frac_part.chars().all(|c| c.is_ascii_digit())
    {
        return Err(LexError::BadReal(token.to_string()));
    }
    let int_val: i128 = if int_part.is_empty() {
        0
    } else {
        int_part
            .parse()
            .map_err(|_| LexError::BadReal(token.to_string()))?
    };
    let frac_len = frac_part.len() as u32;
    let frac_val: i128 = if frac_part.is_empty() {
        0
    } else {
        frac_part
            .parse()
            .map_err(|_| LexError::BadReal(token.to_string()))?
    };
    let denom_digits: i128 = 10i128.pow(frac_len);
    let mut numerator = int_val * denom_digits + frac_val;
    let mut denominator = denom_digits;
    if exponent >= 0 {
        numerator *= 10i128.pow(exponent as u32);
    } else {
        denominator *= 10i128.pow((-exponent) as u32);
    }
    if neg {
        numerator = -numerator;
    }
    Ok(ExactRational {
        numerator,
        denominator,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_semicolon_and_hash_comments() {
        assert_eq!(strip_comment("cadd s1, s2, s3 ; a comment"), Some("cadd s1, s2, s3"));
        assert_eq!(strip_comment("# just a comment"), None);
        assert_eq!(strip_comment("  "), None);
    }

    #[test]
    fn tokenize_preserves_parenthesized_immediate() {
        let toks = tokenize("cloadi s2, c(1.5, -2.25)");
        assert_eq!(toks, vec!["cloadi", "s2", "c(1.5, -2.25)"]);
    }

    #[test]
    fn parse_reg_rejects_out_of_range_index() {
        assert!(parse_reg("s9").is_err());
        assert_eq!(parse_reg("V3").unwrap(), (RegClass::Vector, 3));
    }

    #[test]
    fn parse_int_accepts_hex_and_decimal() {
        assert_eq!(parse_int("0x1A", false, 16).unwrap(), 26);
        assert_eq!(parse_int("-5", true, 8).unwrap(), -5);
    }

    #[test]
    fn parse_real_is_exact_for_q22_23() {
        let r = parse_real("1.5").unwrap();
        assert_eq!(r.scale_pow2_exact(23), Some(1i64 << 23 | (1 << 22)));
    }

    #[test]
    fn parse_real_rejects_inexact_scaling() {
        // 1/3 has no exact base-2 fractional representation
        let r = parse_real("0.1").unwrap();
        assert_eq!(r.scale_pow2_exact(23), None);
    }

    #[test]
    fn parse_bank_id_accepts_both_forms() {
        assert_eq!(parse_bank_id("mb2").unwrap(), 2);
        assert_eq!(parse_bank_id("3").unwrap(), 3);
        assert!(parse_bank_id("4").is_err());
    }
}
