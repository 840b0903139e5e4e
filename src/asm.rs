//! Two-pass assembler: pass 1 resolves labels and splits source lines into
//! per-mnemonic instruction chunks; pass 2 encodes each chunk via [`codec`].

use crate::codec::{pack_imm90, Instruction, Mapping, Orientation};
use crate::lex::{self, parse_bank_id, parse_int, parse_real, parse_reg, tokenize, RegClass};
use itertools::Itertools;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Lexical,
    Semantic,
}

#[derive(Debug, Error)]
#[error("Line {line}: {message}")]
pub struct AsmError {
    pub kind: ErrorKind,
    pub line: usize,
    pub message: String,
}

fn sem(line: usize, message: impl Into<String>) -> AsmError {
    AsmError {
        kind: ErrorKind::Semantic,
        line,
        message: message.into(),
    }
}

fn lex_err(line: usize, e: lex::LexError) -> AsmError {
    AsmError {
        kind: ErrorKind::Lexical,
        line,
        message: e.to_string(),
    }
}

const R_SCALAR_UNARY: &[(&str, u8)] = &[
    ("cneg", 0x00),
    ("conj", 0x01),
    ("csqrt", 0x02),
    ("cabs2", 0x03),
    ("cabs", 0x04),
    ("creal", 0x05),
    ("cimag", 0x06),
    ("crecip", 0x07),
];
const R_SCALAR_BINARY: &[(&str, u8)] = &[
    ("cadd", 0x08),
    ("csub", 0x09),
    ("cmul", 0x0A),
    ("cdiv", 0x0B),
    ("cmaxabs", 0x0C),
    ("cminabs", 0x0D),
    ("cmplt.re", 0x0E),
    ("cmpgt.re", 0x0F),
    ("cmple.re", 0x10),
];
const R_VECTOR_BINARY: &[(&str, u8)] = &[
    ("vadd", 0x00),
    ("vsub", 0x01),
    ("vmul", 0x02),
    ("vmac", 0x03),
    ("vdiv", 0x04),
];
const R_VECTOR_UNARY: &[(&str, u8)] = &[("vconj", 0x05)];
const R_REDUCTION_BINARY: &[(&str, u8)] = &[("dotc", 0x00), ("dotu", 0x01)];
const R_REDUCTION_UNARY: &[(&str, u8)] = &[("iamax", 0x02), ("sum", 0x03), ("asum", 0x04)];
const R_VEC_SCALAR: &[(&str, u8)] = &[
    ("vsadd", 0x18),
    ("vssub", 0x19),
    ("vsmul", 0x1A),
    ("vsdiv", 0x1B),
];
const I_SUBOPS: &[(&str, u8)] = &[
    ("cloadi", 0x00),
    ("cadd_i", 0x01),
    ("cmul_i", 0x02),
    ("csub_i", 0x03),
    ("cdiv_i", 0x04),
    ("cmaxabs_i", 0x05),
    ("cminabs_i", 0x06),
];
const S_SUBOPS: &[(&str, u8)] = &[
    ("vld", 0x00),
    ("vst", 0x01),
    ("sld.xy", 0x02),
    ("sst.xy", 0x03),
];

fn lookup(table: &[(&str, u8)], mn: &str) -> Option<u8> {
    table.iter().find(|(name, _)| *name == mn).map(|(_, s)| *s)
}

fn is_mnemonic(tok: &str) -> bool {
    let mn = tok.to_ascii_lowercase();
    if mn == "jrel" || mn == "org" {
        return true;
    }
    if mn == "vld.rm" || mn == "vld.cm" || mn == "vst.rm" || mn == "vst.cm" {
        return true;
    }
    R_SCALAR_UNARY.iter().any(|(n, _)| *n == mn)
        || R_SCALAR_BINARY.iter().any(|(n, _)| *n == mn)
        || R_VECTOR_BINARY.iter().any(|(n, _)| *n == mn)
        || R_VECTOR_UNARY.iter().any(|(n, _)| *n == mn)
        || R_REDUCTION_BINARY.iter().any(|(n, _)| *n == mn)
        || R_REDUCTION_UNARY.iter().any(|(n, _)| *n == mn)
        || R_VEC_SCALAR.iter().any(|(n, _)| *n == mn)
        || I_SUBOPS.iter().any(|(n, _)| *n == mn)
        || S_SUBOPS.iter().any(|(n, _)| *n == mn)
}

struct Chunk {
    line: usize,
    tokens: Vec<String>,
}

/// Split a label-stripped, already-tokenized line into one chunk per
/// recognized mnemonic, so that several instructions may share a line.
fn split_chunks(line: usize, tokens: &[String]) -> Result<Vec<Chunk>, AsmError> {
    if tokens.is_empty() {
        return Ok(vec![]);
    }
    if !is_mnemonic(&tokens[0]) {
        return Err(sem(line, format!("unknown mnemonic '{}'", tokens[0])));
    }
    let mut chunks = Vec::new();
    let mut current: Vec<String> = vec![tokens[0].clone()];
    for tok in &tokens[1..] {
        if is_mnemonic(tok) {
            chunks.push(Chunk {
                line,
                tokens: std::mem::take(&mut current),
            });
            current.push(tok.clone());
        } else {
            current.push(tok.clone());
        }
    }
    chunks.push(Chunk {
        line,
        tokens: current,
    });
    Ok(chunks)
}

/// Pass 1: build the label table and the flat list of instruction chunks,
/// honoring `ORG <decimal>` and multi-instruction lines.
fn pass_one(source: &str) -> Result<(HashMap<String, i64>, Vec<Chunk>), AsmError> {
    let mut labels: HashMap<String, i64> = HashMap::new();
    let mut chunks: Vec<Chunk> = Vec::new();
    let mut pc: i64 = 0;

    for (idx, raw) in source.lines().enumerate() {
        let line_no = idx + 1;
        let Some(stripped) = lex::strip_comment(raw) else {
            continue;
        };
        let mut token_iter = tokenize(stripped).into_iter().peekable();
        let leading_labels: Vec<String> = token_iter
            .peeking_take_while(|t| t.ends_with(':'))
            .collect();
        for label_tok in leading_labels {
            let name = label_tok.strip_suffix(':').unwrap();
            if !is_identifier(name) {
                return Err(sem(line_no, format!("invalid label '{name}'")));
            }
            if labels.contains_key(name) {
                return Err(sem(line_no, format!("duplicate label '{name}'")));
            }
            labels.insert(name.to_string(), pc);
        }
        let tokens: Vec<String> = token_iter.collect();
        if tokens.is_empty() {
            continue;
        }

        if tokens[0].eq_ignore_ascii_case("org") {
            if tokens.len() != 2 {
                return Err(sem(line_no, "ORG expects exactly one decimal operand"));
            }
            pc = tokens[1]
                .parse::<i64>()
                .map_err(|_| sem(line_no, format!("invalid ORG address '{}'", tokens[1])))?;
            continue;
        }

        for chunk in split_chunks(line_no, &tokens)? {
            chunks.push(chunk);
            pc += 1;
        }
    }

    Ok((labels, chunks))
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn require_reg(
    tok: &str,
    want: RegClass,
    line: usize,
    what: &str,
) -> Result<u8, AsmError> {
    let (class, idx) = parse_reg(tok).map_err(|e| lex_err(line, e))?;
    if class != want {
        return Err(sem(line, format!("{what} requires a register of the matching class, got '{tok}'")));
    }
    Ok(idx)
}

fn check_write(reg: u8, line: usize, what: &str) -> Result<(), AsmError> {
    if reg == 0 {
        Err(sem(line, format!("writing to {what} is illegal (hard error)")))
    } else {
        Ok(())
    }
}

/// Parse a complex immediate into a packed Q22.23 `imm90`. Accepts both
/// `c(RE, IM)` (units of 1.0) and bare `(re, im)` (real numbers); both are
/// packed identically, since Q22.23 exact-representability is checked the
/// same way regardless of which spelling produced the value.
fn parse_complex_immediate(tok: &str, line: usize) -> Result<u128, AsmError> {
    let without_c = tok
        .strip_prefix('c')
        .or_else(|| tok.strip_prefix('C'))
        .unwrap_or(tok);
    let inner = without_c
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(|| sem(line, format!("expected c(re,im) or (re,im) immediate, got '{tok}'")))?;
    let parts: Vec<&str> = inner.split(',').collect();
    if parts.len() != 2 {
        return Err(sem(line, "cIMM must be c(re, im)"));
    }
    let re = parse_real(parts[0].trim()).map_err(|e| lex_err(line, e))?;
    let im = parse_real(parts[1].trim()).map_err(|e| lex_err(line, e))?;
    let re45 = re
        .scale_pow2_exact(23)
        .ok_or_else(|| sem(line, format!("Re(cIMM)={} is not exactly representable in Q22.23", parts[0])))?;
    let im45 = im
        .scale_pow2_exact(23)
        .ok_or_else(|| sem(line, format!("Im(cIMM)={} is not exactly representable in Q22.23", parts[1])))?;
    if !(-(1i64 << 44)..(1i64 << 44)).contains(&re45) || !(-(1i64 << 44)..(1i64 << 44)).contains(&im45) {
        return Err(sem(line, "cIMM component out of signed 45-bit range"));
    }
    Ok(pack_imm90(re45, im45))
}

fn resolve_offset(tok: &str, line: usize, labels: &HashMap<String, i64>, pc: i64) -> Result<i64, AsmError> {
    if is_identifier(tok) && !tok.chars().next().unwrap().is_ascii_digit() {
        match labels.get(tok) {
            Some(target) => Ok(target - pc),
            None => Err(sem(line, format!("unknown label '{tok}'"))),
        }
    } else {
        parse_int(tok, true, 33).map_err(|e| lex_err(line, e))
    }
}

fn encode_chunk(chunk: &Chunk, labels: &HashMap<String, i64>, pc: i64) -> Result<u128, AsmError> {
    let line = chunk.line;
    let tokens = &chunk.tokens;
    let mn = tokens[0].to_ascii_lowercase();

    if let Some(subop) = lookup(R_SCALAR_UNARY, &mn) {
        expect_operand_count(tokens, 2, line, &mn)?;
        let rd = require_reg(&tokens[1], RegClass::Scalar, line, &mn)?;
        let rs1 = require_reg(&tokens[2], RegClass::Scalar, line, &mn)?;
        check_write(rd, line, "s0")?;
        return Ok(Instruction::R {
            subop,
            mapping: Mapping::ScalarScalarToScalar,
            rd,
            rs1,
            rs2: 0,
        }
        .encode());
    }
    if let Some(subop) = lookup(R_SCALAR_BINARY, &mn) {
        expect_operand_count(tokens, 3, line, &mn)?;
        let rd = require_reg(&tokens[1], RegClass::Scalar, line, &mn)?;
        let rs1 = require_reg(&tokens[2], RegClass::Scalar, line, &mn)?;
        let rs2 = require_reg(&tokens[3], RegClass::Scalar, line, &mn)?;
        check_write(rd, line, "s0")?;
        return Ok(Instruction::R {
            subop,
            mapping: Mapping::ScalarScalarToScalar,
            rd,
            rs1,
            rs2,
        }
        .encode());
    }
    if let Some(subop) = lookup(R_VECTOR_UNARY, &mn) {
        expect_operand_count(tokens, 2, line, &mn)?;
        let rd = require_reg(&tokens[1], RegClass::Vector, line, &mn)?;
        let rs1 = require_reg(&tokens[2], RegClass::Vector, line, &mn)?;
        check_write(rd, line, "v0")?;
        return Ok(Instruction::R {
            subop,
            mapping: Mapping::VectorVectorToVector,
            rd,
            rs1,
            rs2: 0,
        }
        .encode());
    }
    if let Some(subop) = lookup(R_VECTOR_BINARY, &mn) {
        expect_operand_count(tokens, 3, line, &mn)?;
        let rd = require_reg(&tokens[1], RegClass::Vector, line, &mn)?;
        let rs1 = require_reg(&tokens[2], RegClass::Vector, line, &mn)?;
        let rs2 = require_reg(&tokens[3], RegClass::Vector, line, &mn)?;
        check_write(rd, line, "v0")?;
        return Ok(Instruction::R {
            subop,
            mapping: Mapping::VectorVectorToVector,
            rd,
            rs1,
            rs2,
        }
        .encode());
    }
    if let Some(subop) = lookup(R_REDUCTION_BINARY, &mn) {
        expect_operand_count(tokens, 3, line, &mn)?;
        let rd = require_reg(&tokens[1], RegClass::Scalar, line, &mn)?;
        let rs1 = require_reg(&tokens[2], RegClass::Vector, line, &mn)?;
        let rs2 = require_reg(&tokens[3], RegClass::Vector, line, &mn)?;
        check_write(rd, line, "s0")?;
        return Ok(Instruction::R {
            subop,
            mapping: Mapping::VectorVectorToScalar,
            rd,
            rs1,
            rs2,
        }
        .encode());
    }
    if let Some(subop) = lookup(R_REDUCTION_UNARY, &mn) {
        expect_operand_count(tokens, 2, line, &mn)?;
        let rd = require_reg(&tokens[1], RegClass::Scalar, line, &mn)?;
        let rs1 = require_reg(&tokens[2], RegClass::Vector, line, &mn)?;
        check_write(rd, line, "s0")?;
        return Ok(Instruction::R {
            subop,
            mapping: Mapping::VectorVectorToScalar,
            rd,
            rs1,
            rs2: 0,
        }
        .encode());
    }
    if let Some(subop) = lookup(R_VEC_SCALAR, &mn) {
        expect_operand_count(tokens, 3, line, &mn)?;
        let rd = require_reg(&tokens[1], RegClass::Vector, line, &mn)?;
        let rs1 = require_reg(&tokens[2], RegClass::Vector, line, &mn)?;
        let rs2 = require_reg(&tokens[3], RegClass::Scalar, line, &mn)?;
        check_write(rd, line, "v0")?;
        return Ok(Instruction::R {
            subop,
            mapping: Mapping::VectorScalarToVector,
            rd,
            rs1,
            rs2,
        }
        .encode());
    }

    if mn == "cloadi" {
        expect_operand_count(tokens, 2, line, &mn)?;
        let rd = require_reg(&tokens[1], RegClass::Scalar, line, &mn)?;
        check_write(rd, line, "s0")?;
        let imm90 = parse_complex_immediate(&tokens[2], line)?;
        return Ok(Instruction::I {
            subop: 0x00,
            rd,
            rs1: 0,
            imm90,
        }
        .encode());
    }
    if let Some(subop) = lookup(I_SUBOPS, &mn) {
        expect_operand_count(tokens, 3, line, &mn)?;
        let rd = require_reg(&tokens[1], RegClass::Scalar, line, &mn)?;
        let rs1 = require_reg(&tokens[2], RegClass::Scalar, line, &mn)?;
        check_write(rd, line, "s0")?;
        let imm90 = parse_complex_immediate(&tokens[3], line)?;
        return Ok(Instruction::I {
            subop,
            rd,
            rs1,
            imm90,
        }
        .encode());
    }

    if mn == "jrel" {
        expect_operand_count(tokens, 1, line, &mn)?;
        let offs33 = resolve_offset(&tokens[1], line, labels, pc)?;
        if !(-(1i64 << 32)..(1i64 << 32)).contains(&offs33) {
            return Err(sem(line, format!("jump offset {offs33} out of signed 33-bit range")));
        }
        return Ok(Instruction::J { subop: 0x00, offs33 }.encode());
    }

    if mn == "vld" || mn == "vld.rm" || mn == "vld.cm" || mn == "vst" || mn == "vst.rm" || mn == "vst.cm" {
        expect_operand_count(tokens, 4, line, &mn)?;
        let orientation = if mn.ends_with(".cm") {
            Orientation::ColumnMajor
        } else {
            Orientation::RowMajor
        };
        let subop = if mn.starts_with("vld") { 0x00 } else { 0x01 };
        let reg3 = require_reg(&tokens[1], RegClass::Vector, line, &mn)?;
        if subop == 0x00 {
            check_write(reg3, line, "v0")?;
        }
        let mbid = parse_bank_id(&tokens[2]).map_err(|e| lex_err(line, e))?;
        let i16 = parse_int(&tokens[3], false, 16).map_err(|e| lex_err(line, e))? as u16;
        let j16 = parse_int(&tokens[4], false, 16).map_err(|e| lex_err(line, e))? as u16;
        return Ok(Instruction::S {
            subop,
            orientation,
            reg3,
            mbid,
            i16,
            j16,
        }
        .encode());
    }
    if mn == "sld.xy" || mn == "sst.xy" {
        expect_operand_count(tokens, 4, line, &mn)?;
        let subop = if mn == "sld.xy" { 0x02 } else { 0x03 };
        let reg3 = require_reg(&tokens[1], RegClass::Scalar, line, &mn)?;
        if subop == 0x02 {
            check_write(reg3, line, "s0")?;
        }
        let mbid = parse_bank_id(&tokens[2]).map_err(|e| lex_err(line, e))?;
        let x16 = parse_int(&tokens[3], false, 16).map_err(|e| lex_err(line, e))? as u16;
        let y16 = parse_int(&tokens[4], false, 16).map_err(|e| lex_err(line, e))? as u16;
        return Ok(Instruction::S {
            subop,
            orientation: Orientation::RowMajor,
            reg3,
            mbid,
            i16: x16,
            j16: y16,
        }
        .encode());
    }

    Err(sem(line, format!("unrecognized mnemonic '{mn}'")))
}

fn expect_operand_count(tokens: &[String], n: usize, line: usize, mn: &str) -> Result<(), AsmError> {
    if tokens.len() != n + 1 {
        Err(sem(line, format!("{mn} expects {n} operand(s), got {}", tokens.len() - 1)))
    } else {
        Ok(())
    }
}

/// Assemble a complete source file into the sequence of 128-bit instruction
/// words. Stops on the first hard error.
pub fn assemble(source: &str) -> Result<Vec<u128>, AsmError> {
    let (labels, chunks) = pass_one(source)?;
    let mut words = Vec::with_capacity(chunks.len());
    for (pc, chunk) in chunks.iter().enumerate() {
        words.push(encode_chunk(chunk, &labels, pc as i64)?);
    }
    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Instruction as I;

    #[test]
    fn assembles_scalar_multiply_scenario() {
        let src = "cloadi s2, c(1,0)\ncloadi s3, c(0,1)\ncmul s4, s2, s3\n";
        let words = assemble(src).unwrap();
        assert_eq!(words.len(), 3);
        assert_eq!(I::decode(words[2]).unwrap(), I::R {
            subop: 0x0A,
            mapping: Mapping::ScalarScalarToScalar,
            rd: 4,
            rs1: 2,
            rs2: 3,
        });
    }

    #[test]
    fn rejects_write_to_s0() {
        let src = "cloadi s0, c(1,0)\n";
        let err = assemble(src).unwrap_err();
        assert_eq!(err.line, 1);
    }

    #[test]
    fn labels_resolve_relative_to_jrel() {
        let src = "top:\ncloadi s1, c(1,0)\njrel top\n";
        let words = assemble(src).unwrap();
        match I::decode(words[1]).unwrap() {
            I::J { offs33, .. } => assert_eq!(offs33, -1),
            other => panic!("expected J, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_label_is_a_hard_error() {
        let src = "a:\ncloadi s1, c(1,0)\na:\ncloadi s2, c(1,0)\n";
        assert!(assemble(src).is_err());
    }

    #[test]
    fn multi_instruction_line_splits_into_two_chunks() {
        let src = "cloadi s1, c(1,0) cloadi s2, c(0,1)\n";
        let words = assemble(src).unwrap();
        assert_eq!(words.len(), 2);
    }

    #[test]
    fn org_sets_absolute_pc_for_labels() {
        let src = "ORG 5\ntarget:\ncloadi s1, c(1,0)\n";
        let (labels, _) = pass_one(src).unwrap();
        assert_eq!(labels["target"], 5);
    }

    #[test]
    fn vld_rm_cm_suffix_selects_orientation() {
        let src = "vld.cm v1, mb0, 3, 0\n";
        let words = assemble(src).unwrap();
        match I::decode(words[0]).unwrap() {
            I::S { orientation, .. } => assert_eq!(orientation, Orientation::ColumnMajor),
            other => panic!("expected S, got {other:?}"),
        }
    }
}
