//! Whole-pipeline scenarios: assemble a literal source string, run it to
//! completion, and assert on final machine state.

use lapu128::asm::assemble;
use lapu128::emu::{run, HaltReason, Machine};
use lapu128::fpk::{Complex, FRAC_BITS};

fn q32(n: i64) -> i64 {
    n << FRAC_BITS
}

fn assemble_and_run(source: &str, machine: &mut Machine, max_steps: u64) -> HaltReason {
    let words = assemble(source).expect("assembly should succeed");
    run(machine, &words, max_steps, false).expect("execution should succeed")
}

#[test]
fn scalar_multiply_by_unit_imaginary_rotates_ninety_degrees() {
    let source = "\
        cloadi s2, c(1,0)\n\
        cloadi s3, c(0,1)\n\
        cmul s4, s2, s3\n";
    let mut m = Machine::new(4, 1, false);
    let reason = assemble_and_run(source, &mut m, 100);
    assert_eq!(reason, HaltReason::PcOutOfRange);
    assert_eq!(m.scalars[4], (0, q32(1)));
}

#[test]
fn vector_broadcast_add_shifts_every_lane_by_a_scalar() {
    let source = "\
        vld.rm v1, mb0, 0, 0\n\
        cloadi s2, c(1,0)\n\
        vsadd v3, v1, s2\n\
        vst.rm v3, mb1, 0, 0\n";
    let mut m = Machine::new(4, 1, false);
    for k in 0..m.vlen {
        m.banks[0][0][k] = (q32(k as i64), 0);
    }
    let reason = assemble_and_run(source, &mut m, 100);
    assert_eq!(reason, HaltReason::PcOutOfRange);
    for k in 0..m.vlen {
        assert_eq!(m.banks[1][0][k], (q32(k as i64 + 1), 0));
    }
}

#[test]
fn dot_product_of_two_loaded_vectors() {
    let source = "\
        vld.rm v1, mb0, 0, 0\n\
        vld.rm v2, mb1, 0, 0\n\
        dotu s3, v1, v2\n";
    let mut m = Machine::new(4, 1, false);
    let mut expected: Complex = (0, 0);
    for k in 0..m.vlen {
        let a: Complex = (q32(k as i64 + 1), 0);
        let b: Complex = (q32(2), 0);
        m.banks[0][0][k] = a;
        m.banks[1][0][k] = b;
        expected = lapu128::fpk::c_add(expected, lapu128::fpk::c_mul(a, b));
    }
    let reason = assemble_and_run(source, &mut m, 100);
    assert_eq!(reason, HaltReason::PcOutOfRange);
    assert_eq!(m.scalars[3], expected);
}

#[test]
fn iamax_keeps_the_earliest_index_on_a_magnitude_tie() {
    let source = "\
        vld.rm v1, mb0, 0, 0\n\
        iamax s2, v1\n";
    let mut m = Machine::new(4, 1, false);
    m.banks[0][0][0] = (q32(3), 0);
    m.banks[0][0][1] = (q32(-3), 0);
    m.banks[0][0][2] = (q32(1), 0);
    m.banks[0][0][3] = (0, 0);
    let reason = assemble_and_run(source, &mut m, 100);
    assert_eq!(reason, HaltReason::PcOutOfRange);
    assert_eq!(m.scalars[2], (0, 0));
}

#[test]
fn matrix_transpose_via_row_load_and_column_store() {
    let source = "\
        vld.rm v1, mb0, 0, 0\n\
        vst.cm v1, mb1, 0, 0\n\
        vld.rm v2, mb0, 1, 0\n\
        vst.cm v2, mb1, 0, 1\n";
    let mut m = Machine::new(2, 1, false);
    m.banks[0][0][0] = (q32(11), 0);
    m.banks[0][0][1] = (q32(12), 0);
    m.banks[0][1][0] = (q32(21), 0);
    m.banks[0][1][1] = (q32(22), 0);
    let reason = assemble_and_run(source, &mut m, 100);
    assert_eq!(reason, HaltReason::PcOutOfRange);
    for row in 0..2 {
        for col in 0..2 {
            assert_eq!(m.banks[1][row][col], m.banks[0][col][row]);
        }
    }
}

#[test]
fn predicated_loop_accumulates_while_the_counter_register_is_nonzero() {
    let source = "\
        cloadi s1, c(3,0)\n\
        cloadi s2, c(1,0)\n\
        cloadi s3, c(0,0)\n\
        start:\n\
        cadd s3, s3, s2\n\
        csub_i s1, s1, c(1,0)\n\
        jrel start\n";
    let mut m = Machine::new(4, 1, false);
    let reason = assemble_and_run(source, &mut m, 100);
    assert_eq!(reason, HaltReason::PcOutOfRange);
    assert_eq!(m.scalars[1], (0, 0));
    assert_eq!(m.scalars[3], (q32(3), 0));
}
