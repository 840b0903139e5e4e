//! Fetch/decode/execute loop: scalar and vector register files, matrix
//! banks, and the per-opcode-family execution semantics.

use crate::codec::{CodecError, Instruction, Mapping, Orientation};
use crate::fpk::{self, Complex};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("decode error at pc={pc}: {source}")]
    Decode { pc: i64, source: CodecError },
    #[error("write to reserved register {0} is illegal")]
    WriteToReserved(&'static str),
    #[error("bank {mbid} index ({row},{col}) out of range for {dim}x{dim}")]
    BankIndexOutOfRange {
        mbid: u8,
        row: usize,
        col: usize,
        dim: usize,
    },
    #[error("unrecognized {family}-type sub-opcode 0x{subop:02x}")]
    UnknownSubopcode { family: &'static str, subop: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltReason {
    PcOutOfRange,
    MaxStepsReached,
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HaltReason::PcOutOfRange => write!(f, "terminated: PC out of range"),
            HaltReason::MaxStepsReached => write!(f, "stopped after reaching max steps"),
        }
    }
}

/// Scale a sign-extended 45-bit Q22.23 half into a Q32.32 lane (multiply by
/// `2^9`), saturating the rare case that pushes out of `i64` range.
fn scale_q22_23(v45: i64) -> i64 {
    let wide = (v45 as i128) << (fpk::FRAC_BITS - 23);
    if wide > i64::MAX as i128 {
        i64::MAX
    } else if wide < i64::MIN as i128 {
        i64::MIN
    } else {
        wide as i64
    }
}

fn bool_complex(b: bool) -> Complex {
    if b {
        (1i64 << fpk::FRAC_BITS, 0)
    } else {
        (0, 0)
    }
}

fn maxabs(a: Complex, b: Complex) -> Complex {
    if fpk::c_abs2(a) >= fpk::c_abs2(b) {
        a
    } else {
        b
    }
}

fn minabs(a: Complex, b: Complex) -> Complex {
    if fpk::c_abs2(a) <= fpk::c_abs2(b) {
        a
    } else {
        b
    }
}

/// Machine state: 8 scalar and 8 vector complex registers (register 0 of
/// each class hardwired to zero, write-forbidden), four square matrix banks,
/// and the program counter.
pub struct Machine {
    pub pc: i64,
    pub scalars: [Complex; 8],
    pub vectors: [Vec<Complex>; 8],
    pub banks: [Vec<Vec<Complex>>; 4],
    pub vlen: usize,
    pub bank_dim: usize,
    pub predicate_imag: bool,
    pub steps: u64,
}

impl Machine {
    pub fn new(vlen: usize, n_mult: usize, predicate_imag: bool) -> Self {
        let bank_dim = n_mult * vlen;
        Machine {
            pc: 0,
            scalars: [fpk::ZERO; 8],
            vectors: std::array::from_fn(|_| vec![fpk::ZERO; vlen]),
            banks: std::array::from_fn(|_| vec![vec![fpk::ZERO; bank_dim]; bank_dim]),
            vlen,
            bank_dim,
            predicate_imag,
            steps: 0,
        }
    }

    fn write_scalar(&mut self, idx: u8, val: Complex) -> Result<(), RuntimeError> {
        if idx == 0 {
            return Err(RuntimeError::WriteToReserved("s0"));
        }
        self.scalars[idx as usize] = val;
        Ok(())
    }

    fn write_vector(&mut self, idx: u8, val: Vec<Complex>) -> Result<(), RuntimeError> {
        if idx == 0 {
            return Err(RuntimeError::WriteToReserved("v0"));
        }
        self.vectors[idx as usize] = val;
        Ok(())
    }

    fn pred_true(&self) -> bool {
        let (re, im) = self.scalars[1];
        if self.predicate_imag {
            re != 0 || im != 0
        } else {
            re != 0
        }
    }

    fn bank_index(&self, mbid: u8, row: usize, col: usize) -> Result<Complex, RuntimeError> {
        if mbid as usize >= self.banks.len() || row >= self.bank_dim || col >= self.bank_dim {
            return Err(RuntimeError::BankIndexOutOfRange {
                mbid,
                row,
                col,
                dim: self.bank_dim,
            });
        }
        Ok(self.banks[mbid as usize][row][col])
    }

    fn bank_set(&mut self, mbid: u8, row: usize, col: usize, val: Complex) -> Result<(), RuntimeError> {
        if mbid as usize >= self.banks.len() || row >= self.bank_dim || col >= self.bank_dim {
            return Err(RuntimeError::BankIndexOutOfRange {
                mbid,
                row,
                col,
                dim: self.bank_dim,
            });
        }
        self.banks[mbid as usize][row][col] = val;
        Ok(())
    }

    fn exec_r(&mut self, subop: u8, mapping: Mapping, rd: u8, rs1: u8, rs2: u8) -> Result<(), RuntimeError> {
        match mapping {
            Mapping::ScalarScalarToScalar => {
                let a = self.scalars[rs1 as usize];
                let b = self.scalars[rs2 as usize];
                let result = match subop {
                    0x00 => fpk::c_sub(fpk::ZERO, a),
                    0x01 => fpk::c_conj(a),
                    0x02 => fpk::c_sqrt(a),
                    0x03 => (fpk::c_abs2(a), 0),
                    0x04 => (fpk::c_abs(a), 0),
                    0x05 => (a.0, 0),
                    0x06 => (a.1, 0),
                    0x07 => fpk::c_div((1i64 << fpk::FRAC_BITS, 0), a),
                    0x08 => fpk::c_add(a, b),
                    0x09 => fpk::c_sub(a, b),
                    0x0A => fpk::c_mul(a, b),
                    0x0B => fpk::c_div(a, b),
                    0x0C => maxabs(a, b),
                    0x0D => minabs(a, b),
                    0x0E => bool_complex(a.0 < b.0),
                    0x0F => bool_complex(a.0 > b.0),
                    0x10 => bool_complex(a.0 <= b.0),
                    other => {
                        return Err(RuntimeError::UnknownSubopcode {
                            family: "R-scalar",
                            subop: other,
                        })
                    }
                };
                self.write_scalar(rd, result)
            }
            Mapping::VectorVectorToVector => {
                let a = self.vectors[rs1 as usize].clone();
                let result: Vec<Complex> = match subop {
                    0x00 => a.iter().zip(&self.vectors[rs2 as usize]).map(|(x, y)| fpk::c_add(*x, *y)).collect(),
                    0x01 => a.iter().zip(&self.vectors[rs2 as usize]).map(|(x, y)| fpk::c_sub(*x, *y)).collect(),
                    0x02 => a.iter().zip(&self.vectors[rs2 as usize]).map(|(x, y)| fpk::c_mul(*x, *y)).collect(),
                    0x03 => {
                        let b = &self.vectors[rs2 as usize];
                        let d = self.vectors[rd as usize].clone();
                        a.iter()
                            .zip(b)
                            .zip(&d)
                            .map(|((x, y), acc)| fpk::c_add(*acc, fpk::c_mul(*x, *y)))
                            .collect()
                    }
                    0x04 => a.iter().zip(&self.vectors[rs2 as usize]).map(|(x, y)| fpk::c_div(*x, *y)).collect(),
                    0x05 => a.iter().map(|x| fpk::c_conj(*x)).collect(),
                    other => {
                        return Err(RuntimeError::UnknownSubopcode {
                            family: "R-vector",
                            subop: other,
                        })
                    }
                };
                self.write_vector(rd, result)
            }
            Mapping::VectorVectorToScalar => {
                let a = &self.vectors[rs1 as usize];
                let result = match subop {
                    0x00 => {
                        let b = &self.vectors[rs2 as usize];
                        a.iter().zip(b).fold(fpk::ZERO, |acc, (x, y)| fpk::c_add(acc, fpk::c_mul(fpk::c_conj(*x), *y)))
                    }
                    0x01 => {
                        let b = &self.vectors[rs2 as usize];
                        a.iter().zip(b).fold(fpk::ZERO, |acc, (x, y)| fpk::c_add(acc, fpk::c_mul(*x, *y)))
                    }
                    0x02 => {
                        let mut best_idx = 0usize;
                        let mut best_mag = fpk::c_abs2(a[0]);
                        for (i, x) in a.iter().enumerate().skip(1) {
                            let mag = fpk::c_abs2(*x);
                            if mag > best_mag {
                                best_mag = mag;
                                best_idx = i;
                            }
                        }
                        ((best_idx as i64) << fpk::FRAC_BITS, 0)
                    }
                    0x03 => a.iter().fold(fpk::ZERO, |acc, x| fpk::c_add(acc, *x)),
                    0x04 => (a.iter().fold(0i64, |acc, x| fpk::add(acc, fpk::abs(x.0))), 0),
                    other => {
                        return Err(RuntimeError::UnknownSubopcode {
                            family: "R-reduction",
                            subop: other,
                        })
                    }
                };
                self.write_scalar(rd, result)
            }
            Mapping::VectorScalarToVector => {
                let a = self.vectors[rs1 as usize].clone();
                let s = self.scalars[rs2 as usize];
                let result: Vec<Complex> = match subop {
                    0x18 => a.iter().map(|x| fpk::c_add(*x, s)).collect(),
                    0x19 => a.iter().map(|x| fpk::c_sub(*x, s)).collect(),
                    0x1A => a.iter().map(|x| fpk::c_mul(*x, s)).collect(),
                    0x1B => a.iter().map(|x| fpk::c_div(*x, s)).collect(),
                    other => {
                        return Err(RuntimeError::UnknownSubopcode {
                            family: "R-broadcast",
                            subop: other,
                        })
                    }
                };
                self.write_vector(rd, result)
            }
        }
    }

    fn exec_i(&mut self, subop: u8, rd: u8, rs1: u8, imm90: u128) -> Result<(), RuntimeError> {
        let (re45, im45) = crate::codec::unpack_imm90(imm90);
        let imm = (scale_q22_23(re45), scale_q22_23(im45));
        let a = self.scalars[rs1 as usize];
        let result = match subop {
            0x00 => imm,
            0x01 => fpk::c_add(a, imm),
            0x02 => fpk::c_mul(a, imm),
            0x03 => fpk::c_sub(a, imm),
            0x04 => fpk::c_div(a, imm),
            0x05 => maxabs(a, imm),
            0x06 => minabs(a, imm),
            other => {
                return Err(RuntimeError::UnknownSubopcode {
                    family: "I",
                    subop: other,
                })
            }
        };
        self.write_scalar(rd, result)
    }

    /// Returns the next pc. The jump is taken (relative to this
    /// instruction's own address) only if the `s1` predicate is true;
    /// otherwise execution falls through to `here + 1`.
    fn exec_j(&mut self, _subop: u8, offs33: i64, here: i64) -> i64 {
        if self.pred_true() {
            here + offs33
        } else {
            here + 1
        }
    }

    fn exec_s(
        &mut self,
        subop: u8,
        orientation: Orientation,
        reg3: u8,
        mbid: u8,
        i16: u16,
        j16: u16,
    ) -> Result<(), RuntimeError> {
        match subop {
            0x00 => {
                let mut values = Vec::with_capacity(self.vlen);
                for k in 0..self.vlen {
                    let (row, col) = match orientation {
                        Orientation::RowMajor => (i16 as usize, j16 as usize + k),
                        Orientation::ColumnMajor => (i16 as usize + k, j16 as usize),
                    };
                    values.push(self.bank_index(mbid, row, col)?);
                }
                self.write_vector(reg3, values)
            }
            0x01 => {
                let values = self.vectors[reg3 as usize].clone();
                for (k, val) in values.into_iter().enumerate() {
                    let (row, col) = match orientation {
                        Orientation::RowMajor => (i16 as usize, j16 as usize + k),
                        Orientation::ColumnMajor => (i16 as usize + k, j16 as usize),
                    };
                    self.bank_set(mbid, row, col, val)?;
                }
                Ok(())
            }
            0x02 => {
                // (x, y) = (i16, j16); bank storage is row-major by (y, x).
                let val = self.bank_index(mbid, j16 as usize, i16 as usize)?;
                self.write_scalar(reg3, val)
            }
            0x03 => {
                let val = self.scalars[reg3 as usize];
                self.bank_set(mbid, j16 as usize, i16 as usize, val)
            }
            other => Err(RuntimeError::UnknownSubopcode {
                family: "S",
                subop: other,
            }),
        }
    }

    /// Decode and execute the instruction at `word`, fetched from `pc`.
    /// Returns the next pc.
    fn step_word(&mut self, word: u128, pc: i64) -> Result<i64, RuntimeError> {
        let instr = Instruction::decode(word).map_err(|source| RuntimeError::Decode { pc, source })?;
        let next_pc = match instr {
            Instruction::R { subop, mapping, rd, rs1, rs2 } => {
                self.exec_r(subop, mapping, rd, rs1, rs2)?;
                pc + 1
            }
            Instruction::I { subop, rd, rs1, imm90 } => {
                self.exec_i(subop, rd, rs1, imm90)?;
                pc + 1
            }
            Instruction::J { subop, offs33 } => self.exec_j(subop, offs33, pc),
            Instruction::S { subop, orientation, reg3, mbid, i16, j16 } => {
                self.exec_s(subop, orientation, reg3, mbid, i16, j16)?;
                pc + 1
            }
        };
        self.steps += 1;
        Ok(next_pc)
    }
}

/// Run `program` to completion (pc leaving `0..program.len()`, or
/// `max_steps` reached), printing a trace line after every instruction if
/// `trace` is set. Returns the halt reason.
pub fn run(
    machine: &mut Machine,
    program: &[u128],
    max_steps: u64,
    trace: bool,
) -> Result<HaltReason, RuntimeError> {
    loop {
        if machine.pc < 0 || machine.pc as usize >= program.len() {
            return Ok(HaltReason::PcOutOfRange);
        }
        if machine.steps >= max_steps {
            return Ok(HaltReason::MaxStepsReached);
        }
        let pc = machine.pc;
        let word = program[pc as usize];
        if trace {
            match Instruction::decode(word) {
                Ok(instr) => println!("pc={pc:>6} {instr}"),
                Err(e) => println!("pc={pc:>6} <decode error: {e}>"),
            }
        }
        machine.pc = machine.step_word(word, pc)?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Instruction as I;

    fn prog(words: &[Instruction]) -> Vec<u128> {
        words.iter().map(|i| i.encode()).collect()
    }

    #[test]
    fn scalar_multiply_unit_imaginary() {
        let mut m = Machine::new(4, 1, false);
        let program = prog(&[
            I::I { subop: 0x00, rd: 2, rs1: 0, imm90: crate::codec::pack_imm90(1 << 23, 0) },
            I::I { subop: 0x00, rd: 3, rs1: 0, imm90: crate::codec::pack_imm90(0, 1 << 23) },
            I::R { subop: 0x0A, mapping: Mapping::ScalarScalarToScalar, rd: 4, rs1: 2, rs2: 3 },
        ]);
        let reason = run(&mut m, &program, 100, false).unwrap();
        assert_eq!(reason, HaltReason::PcOutOfRange);
        assert_eq!(m.scalars[4], (0, 1i64 << fpk::FRAC_BITS));
    }

    #[test]
    fn write_to_s0_is_a_runtime_error() {
        let mut m = Machine::new(4, 1, false);
        let program = prog(&[I::I { subop: 0x00, rd: 0, rs1: 0, imm90: 0 }]);
        assert!(run(&mut m, &program, 10, false).is_err());
    }

    #[test]
    fn iamax_breaks_ties_toward_earliest_index() {
        let mut m = Machine::new(2, 1, false);
        m.vectors[1] = vec![(3i64 << fpk::FRAC_BITS, 0), (-3i64 << fpk::FRAC_BITS, 0)];
        let program = prog(&[I::R {
            subop: 0x02,
            mapping: Mapping::VectorVectorToScalar,
            rd: 1,
            rs1: 1,
            rs2: 0,
        }]);
        run(&mut m, &program, 10, false).unwrap();
        assert_eq!(m.scalars[1].0, 0);
    }

    #[test]
    fn jrel_offset_is_relative_to_jump_instruction_itself() {
        let mut m = Machine::new(2, 1, false);
        m.scalars[1] = (1i64 << fpk::FRAC_BITS, 0); // predicate true
        let program = prog(&[I::J { subop: 0x00, offs33: 5 }]);
        run(&mut m, &program, 1, false).unwrap();
        assert_eq!(m.pc, 5);
    }

    #[test]
    fn jrel_falls_through_when_predicate_is_false() {
        let mut m = Machine::new(2, 1, false);
        let program = prog(&[
            I::J { subop: 0x00, offs33: 5 },
            I::I { subop: 0x00, rd: 2, rs1: 0, imm90: 0 },
        ]);
        run(&mut m, &program, 10, false).unwrap();
        assert_eq!(m.pc, 2);
    }

    #[test]
    fn vld_vst_round_trip_row_major() {
        let mut m = Machine::new(2, 1, false);
        m.banks[0][0][0] = (1i64 << fpk::FRAC_BITS, 0);
        m.banks[0][0][1] = (2i64 << fpk::FRAC_BITS, 0);
        let program = prog(&[
            I::S { subop: 0x00, orientation: Orientation::RowMajor, reg3: 1, mbid: 0, i16: 0, j16: 0 },
            I::S { subop: 0x01, orientation: Orientation::RowMajor, reg3: 1, mbid: 1, i16: 0, j16: 0 },
        ]);
        run(&mut m, &program, 10, false).unwrap();
        assert_eq!(m.banks[1][0][0], (1i64 << fpk::FRAC_BITS, 0));
        assert_eq!(m.banks[1][0][1], (2i64 << fpk::FRAC_BITS, 0));
    }

    #[test]
    fn bank_index_out_of_range_is_an_error() {
        let mut m = Machine::new(2, 1, false);
        let program = prog(&[I::S {
            subop: 0x02,
            orientation: Orientation::RowMajor,
            reg3: 1,
            mbid: 0,
            i16: 99,
            j16: 0,
        }]);
        assert!(run(&mut m, &program, 10, false).is_err());
    }

    #[test]
    fn bank_id_out_of_the_4_bit_range_is_an_error_not_a_panic() {
        let mut m = Machine::new(2, 1, false);
        let program = prog(&[I::S {
            subop: 0x02,
            orientation: Orientation::RowMajor,
            reg3: 1,
            mbid: 5,
            i16: 0,
            j16: 0,
        }]);
        assert!(run(&mut m, &program, 10, false).is_err());
    }

    #[test]
    fn sld_xy_reads_row_y_column_x() {
        let mut m = Machine::new(4, 1, false);
        m.banks[0][1][2] = (7i64 << fpk::FRAC_BITS, 0);
        let program = prog(&[I::S {
            subop: 0x02,
            orientation: Orientation::RowMajor,
            reg3: 1,
            mbid: 0,
            i16: 2, // x
            j16: 1, // y
        }]);
        run(&mut m, &program, 10, false).unwrap();
        assert_eq!(m.scalars[1], (7i64 << fpk::FRAC_BITS, 0));
    }

    #[test]
    fn sst_xy_writes_row_y_column_x() {
        let mut m = Machine::new(4, 1, false);
        m.scalars[1] = (9i64 << fpk::FRAC_BITS, 0);
        let program = prog(&[I::S {
            subop: 0x03,
            orientation: Orientation::RowMajor,
            reg3: 1,
            mbid: 0,
            i16: 2, // x
            j16: 1, // y
        }]);
        run(&mut m, &program, 10, false).unwrap();
        assert_eq!(m.banks[0][1][2], (9i64 << fpk::FRAC_BITS, 0));
    }

    #[test]
    fn maxabs_and_minabs_pick_by_magnitude() {
        let a = (3i64 << fpk::FRAC_BITS, 0);
        let b = (0, 4i64 << fpk::FRAC_BITS);
        assert_eq!(maxabs(a, b), b);
        assert_eq!(minabs(a, b), a);
    }
}
