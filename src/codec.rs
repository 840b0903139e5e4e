//! Instruction encoder/decoder: bit-field packing and unpacking of the
//! 128-bit instruction word, and the tagged [`Instruction`] sum type that
//! replaces a string-keyed sub-opcode table.

use std::fmt;
use thiserror::Error;

/// Build an n-bit mask (n <= 128).
macro_rules! mask {
    ($n:expr) => {
        if $n >= 128 {
            u128::MAX
        } else {
            (1u128 << $n) - 1
        }
    };
}

/// Extract `word[hi:lo]` as an unsigned value.
macro_rules! bits {
    ($word:expr, $hi:expr, $lo:expr) => {{
        let width = $hi - $lo + 1;
        (mask!(width) & ($word >> $lo)) as u128
    }};
}

/// Extract `word[hi:lo]` and sign-extend it to i64.
macro_rules! bits_signed {
    ($word:expr, $hi:expr, $lo:expr) => {{
        let width = $hi - $lo + 1;
        let val = bits!($word, $hi, $lo);
        let sign = 1u128 << (width - 1);
        ((val ^ sign) as i128 - sign as i128) as i64
    }};
}

/// Set `word[hi:lo]` to `val`, zeroing it first. Callers range-check operands
/// against their field widths before encoding (see `asm.rs`'s `parse_int`/
/// `parse_bank_id` and this module's [`signed_to_field`] for the signed case).
fn set_bits(word: u128, val: u128, hi: u32, lo: u32) -> u128 {
    let width = hi - lo + 1;
    let mask = mask!(width) << lo;
    (word & !mask) | ((val << lo) & mask)
}

/// Two's complement encoding of a signed value into an unsigned field of
/// `width` bits. Caller has already range-checked the value against the
/// field width.
fn signed_to_field(val: i64, width: u32) -> u128 {
    if val >= 0 {
        val as u128
    } else {
        (1u128 << width) + val as u128
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("got unrecognized opcode 0x{0:02x}")]
    InvalidOpcode(u8),
}

pub const OPCODE_R: u8 = 0x01;
pub const OPCODE_I: u8 = 0x02;
pub const OPCODE_J: u8 = 0x03;
pub const OPCODE_S: u8 = 0x04;

/// Two-bit operand-mapping code living in bits 97:96 of an R-type word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mapping {
    /// scalar, scalar -> scalar
    ScalarScalarToScalar,
    /// vector, vector -> vector
    VectorVectorToVector,
    /// vector, vector -> scalar (reductions)
    VectorVectorToScalar,
    /// vector, scalar -> vector (broadcast)
    VectorScalarToVector,
}

impl Mapping {
    fn code(self) -> u128 {
        match self {
            Mapping::ScalarScalarToScalar => 0b00,
            Mapping::VectorVectorToVector => 0b01,
            Mapping::VectorVectorToScalar => 0b10,
            Mapping::VectorScalarToVector => 0b11,
        }
    }

    fn from_code(code: u128) -> Mapping {
        match code {
            0b00 => Mapping::ScalarScalarToScalar,
            0b01 => Mapping::VectorVectorToVector,
            0b10 => Mapping::VectorVectorToScalar,
            _ => Mapping::VectorScalarToVector,
        }
    }
}

/// Row- vs. column-major traversal, bit 111 of an S-type word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    RowMajor,
    ColumnMajor,
}

impl Orientation {
    fn bit(self) -> u128 {
        match self {
            Orientation::RowMajor => 0,
            Orientation::ColumnMajor => 1,
        }
    }

    fn from_bit(bit: u128) -> Orientation {
        if bit == 0 {
            Orientation::RowMajor
        } else {
            Orientation::ColumnMajor
        }
    }
}

/// A fully decoded LAPU-128 instruction word, one variant per addressing
/// family. Execution (`emu.rs`) and assembly (`asm.rs`) both build and
/// pattern-match on this type rather than consulting a runtime mnemonic
/// table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    R {
        subop: u8,
        mapping: Mapping,
        rd: u8,
        rs1: u8,
        rs2: u8,
    },
    I {
        subop: u8,
        rd: u8,
        rs1: u8,
        imm90: u128,
    },
    J {
        subop: u8,
        offs33: i64,
    },
    S {
        subop: u8,
        orientation: Orientation,
        reg3: u8,
        mbid: u8,
        i16: u16,
        j16: u16,
    },
}

impl Instruction {
    pub fn decode(word: u128) -> Result<Instruction, CodecError> {
        let opcode = bits!(word, 127, 120) as u8;
        match opcode {
            OPCODE_R => Ok(Instruction::R {
                subop: bits!(word, 119, 112) as u8,
                mapping: Mapping::from_code(bits!(word, 97, 96)),
                rd: bits!(word, 95, 93) as u8,
                rs1: bits!(word, 92, 90) as u8,
                rs2: bits!(word, 89, 87) as u8,
            }),
            OPCODE_I => Ok(Instruction::I {
                subop: bits!(word, 119, 112) as u8,
                rd: bits!(word, 95, 93) as u8,
                rs1: bits!(word, 92, 90) as u8,
                imm90: bits!(word, 89, 0),
            }),
            OPCODE_J => Ok(Instruction::J {
                subop: bits!(word, 119, 112) as u8,
                offs33: bits_signed!(word, 92, 60),
            }),
            OPCODE_S => Ok(Instruction::S {
                subop: bits!(word, 119, 112) as u8,
                orientation: Orientation::from_bit(bits!(word, 111, 111)),
                reg3: bits!(word, 95, 93) as u8,
                mbid: bits!(word, 92, 89) as u8,
                i16: bits!(word, 88, 73) as u16,
                j16: bits!(word, 72, 57) as u16,
            }),
            other => Err(CodecError::InvalidOpcode(other)),
        }
    }

    pub fn encode(&self) -> u128 {
        match *self {
            Instruction::R {
                subop,
                mapping,
                rd,
                rs1,
                rs2,
            } => {
                let mut w = 0u128;
                w = set_bits(w, OPCODE_R as u128, 127, 120);
                w = set_bits(w, subop as u128, 119, 112);
                w = set_bits(w, mapping.code(), 97, 96);
                w = set_bits(w, rd as u128, 95, 93);
                w = set_bits(w, rs1 as u128, 92, 90);
                w = set_bits(w, rs2 as u128, 89, 87);
                w
            }
            Instruction::I {
                subop,
                rd,
                rs1,
                imm90,
            } => {
                let mut w = 0u128;
                w = set_bits(w, OPCODE_I as u128, 127, 120);
                w = set_bits(w, subop as u128, 119, 112);
                w = set_bits(w, rd as u128, 95, 93);
                w = set_bits(w, rs1 as u128, 92, 90);
                w = set_bits(w, imm90, 89, 0);
                w
            }
            Instruction::J { subop, offs33 } => {
                let mut w = 0u128;
                w = set_bits(w, OPCODE_J as u128, 127, 120);
                w = set_bits(w, subop as u128, 119, 112);
                w = set_bits(w, 1, 95, 93); // rs1 fixed to s1
                w = set_bits(w, signed_to_field(offs33, 33), 92, 60);
                w
            }
            Instruction::S {
                subop,
                orientation,
                reg3,
                mbid,
                i16,
                j16,
            } => {
                let mut w = 0u128;
                w = set_bits(w, OPCODE_S as u128, 127, 120);
                w = set_bits(w, subop as u128, 119, 112);
                w = set_bits(w, orientation.bit(), 111, 111);
                w = set_bits(w, reg3 as u128, 95, 93);
                w = set_bits(w, mbid as u128, 92, 89);
                w = set_bits(w, i16 as u128, 88, 73);
                w = set_bits(w, j16 as u128, 72, 57);
                w
            }
        }
    }
}

/// Pack two sign-extended 45-bit Q22.23 halves into the 90-bit I-type
/// immediate field (real in bits 44:0, imaginary in 89:45).
pub fn pack_imm90(re45: i64, im45: i64) -> u128 {
    let re_field = signed_to_field(re45, 45);
    let im_field = signed_to_field(im45, 45);
    (im_field << 45) | re_field
}

/// Inverse of [`pack_imm90`]: split and sign-extend each 45-bit half.
pub fn unpack_imm90(imm90: u128) -> (i64, i64) {
    let re_field = imm90 & mask!(45u32);
    let im_field = (imm90 >> 45) & mask!(45u32);
    let sign_extend = |val: u128| -> i64 {
        let sign = 1u128 << 44;
        ((val ^ sign) as i128 - sign as i128) as i64
    };
    (sign_extend(re_field), sign_extend(im_field))
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::R {
                subop,
                mapping,
                rd,
                rs1,
                rs2,
            } => write!(
                f,
                "R subop=0x{subop:02x} map={mapping:?} rd={rd} rs1={rs1} rs2={rs2}"
            ),
            Instruction::I {
                subop,
                rd,
                rs1,
                imm90,
            } => write!(f, "I subop=0x{subop:02x} rd={rd} rs1={rs1} imm90=0x{imm90:x}"),
            Instruction::J { subop, offs33 } => {
                write!(f, "J subop=0x{subop:02x} offs33={offs33}")
            }
            Instruction::S {
                subop,
                orientation,
                reg3,
                mbid,
                i16,
                j16,
            } => write!(
                f,
                "S subop=0x{subop:02x} orient={orientation:?} reg3={reg3} mbid={mbid} i16={i16} j16={j16}"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn r_type_round_trips() {
        let instr = Instruction::R {
            subop: 0x0a,
            mapping: Mapping::ScalarScalarToScalar,
            rd: 4,
            rs1: 2,
            rs2: 3,
        };
        let word = instr.encode();
        assert_eq!(Instruction::decode(word).unwrap(), instr);
        // all bits outside the defined fields must be zero
        assert_eq!(word & mask!(87u32), 0);
    }

    #[test]
    fn i_type_round_trips_with_negative_immediate() {
        let imm90 = pack_imm90(-1, 42);
        let instr = Instruction::I {
            subop: 0x01,
            rd: 5,
            rs1: 2,
            imm90,
        };
        let word = instr.encode();
        assert_eq!(Instruction::decode(word).unwrap(), instr);
        assert_eq!(unpack_imm90(imm90), (-1, 42));
    }

    #[test]
    fn j_type_offset_relative_to_self_round_trips() {
        let instr = Instruction::J {
            subop: 0x00,
            offs33: -3,
        };
        let word = instr.encode();
        assert_eq!(Instruction::decode(word).unwrap(), instr);
    }

    #[test]
    fn s_type_round_trips() {
        let instr = Instruction::S {
            subop: 0x00,
            orientation: Orientation::ColumnMajor,
            reg3: 1,
            mbid: 2,
            i16: 300,
            j16: 12,
        };
        let word = instr.encode();
        assert_eq!(Instruction::decode(word).unwrap(), instr);
        // len16 and other reserved S-type bits are zero
        assert_eq!(word & mask!(57u32), 0);
    }

    #[test]
    fn unknown_opcode_is_rejected() {
        let word = 0x0fu128 << 120;
        assert_eq!(Instruction::decode(word), Err(CodecError::InvalidOpcode(0x0f)));
    }
}
