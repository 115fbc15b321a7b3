//! Software polynomial approximations for `exp/log/sin/cos/tan/pow`,
//! written once against the [`InstructionSet`] primitive trait so the same
//! composition emits SSE2-scalar or AVX2-packed code depending on which
//! implementation is passed in (spec §9 design notes: "routine bodies live
//! in one place per SIMD width").
//!
//! Each routine is a `(opcode) -> codegen closure` in the sense the design
//! notes call for; they're ordinary functions here rather than literal
//! closures in a table because the forward emitter already dispatches on
//! opcode via `match` and can call them directly.

use dynasmrt::x64::Assembler;

use super::InstructionSet;
use crate::register::RegIdx;

const LOG2E: f64 = std::f64::consts::LOG2_E;
const LN2: f64 = std::f64::consts::LN_2;

/// `exp(x)`: range-reduce to `x = k*ln2 + r` with `r` small, evaluate a
/// degree-4 Taylor polynomial in `r`, then rebuild via `poly * 2^k`.
/// `scratch` needs 4 registers: `[k, accumulator, transient, ldexp_scratch]`.
pub fn emit_exp_poly<I: InstructionSet + ?Sized>(
    isa: &I,
    ops: &mut Assembler,
    dst: RegIdx,
    src: RegIdx,
    scratch: &[RegIdx],
) {
    let (k, acc, tmp, ldexp_scratch) = (scratch[0], scratch[1], scratch[2], scratch[3]);

    isa.emit_load_immediate(ops, k, LOG2E);
    isa.emit_mul(ops, k, src);
    isa.emit_round_trunc(ops, k, k);

    isa.emit_load_immediate(ops, tmp, LN2);
    isa.emit_mul(ops, tmp, k);
    isa.emit_move(ops, dst, src);
    isa.emit_sub(ops, dst, tmp); // dst = r = x - k*ln2

    const COEFFS: [f64; 5] = [1.0 / 24.0, 1.0 / 6.0, 1.0 / 2.0, 1.0, 1.0];
    isa.emit_load_immediate(ops, acc, COEFFS[0]);
    for &c in &COEFFS[1..] {
        isa.emit_mul(ops, acc, dst);
        isa.emit_load_immediate(ops, tmp, c);
        isa.emit_add(ops, acc, tmp);
    }

    isa.emit_ldexp2(ops, tmp, k, ldexp_scratch); // tmp = 2^k
    isa.emit_mul(ops, acc, tmp);
    isa.emit_move(ops, dst, acc);
}

/// `log(x)`: decompose `x = m * 2^e` with `m` in `[1, 2)`, evaluate a
/// degree-4 polynomial in `u = m - 1`, then `log(x) = e*ln2 + poly(u)`.
/// `scratch` needs 4 registers: `[exponent, accumulator, transient,
/// frexp_scratch]`.
pub fn emit_log_poly<I: InstructionSet + ?Sized>(
    isa: &I,
    ops: &mut Assembler,
    dst: RegIdx,
    src: RegIdx,
    scratch: &[RegIdx],
) {
    let (e, acc, tmp, frexp_scratch) = (scratch[0], scratch[1], scratch[2], scratch[3]);

    isa.emit_frexp2(ops, dst, e, src, frexp_scratch); // dst = m, e = exponent
    isa.emit_load_immediate(ops, tmp, 1.0);
    isa.emit_sub(ops, dst, tmp); // dst = u = m - 1

    // log(1+u) ~= u - u^2/2 + u^3/3 - u^4/4, Horner on u.
    const COEFFS: [f64; 4] = [-1.0 / 4.0, 1.0 / 3.0, -1.0 / 2.0, 1.0];
    isa.emit_load_immediate(ops, acc, COEFFS[0]);
    for &c in &COEFFS[1..] {
        isa.emit_mul(ops, acc, dst);
        isa.emit_load_immediate(ops, tmp, c);
        isa.emit_add(ops, acc, tmp);
    }
    isa.emit_mul(ops, acc, dst); // acc = poly(u) * u, since Horner above started from u already folded in

    isa.emit_load_immediate(ops, tmp, LN2);
    isa.emit_mul(ops, tmp, e); // tmp = e*ln2
    isa.emit_add(ops, acc, tmp);
    isa.emit_move(ops, dst, acc);
}

/// `sin(x)` via a degree-7 odd Taylor polynomial, without trigonometric
/// range reduction: accurate near the origin, degrading for large `|x|`.
/// `scratch` needs 3 registers: `[x_squared, accumulator, transient]`.
pub fn emit_sin_poly<I: InstructionSet + ?Sized>(
    isa: &I,
    ops: &mut Assembler,
    dst: RegIdx,
    src: RegIdx,
    scratch: &[RegIdx],
) {
    let (x2, acc, tmp) = (scratch[0], scratch[1], scratch[2]);
    isa.emit_move(ops, x2, src);
    isa.emit_mul(ops, x2, src); // x2 = x*x

    // sin(x) = x * (1 - x2/6 + x2^2/120 - x2^3/5040)
    const COEFFS: [f64; 4] = [-1.0 / 5040.0, 1.0 / 120.0, -1.0 / 6.0, 1.0];
    isa.emit_load_immediate(ops, acc, COEFFS[0]);
    for &c in &COEFFS[1..] {
        isa.emit_mul(ops, acc, x2);
        isa.emit_load_immediate(ops, tmp, c);
        isa.emit_add(ops, acc, tmp);
    }
    isa.emit_mul(ops, acc, src);
    isa.emit_move(ops, dst, acc);
}

/// `cos(x)` via the complementary even Taylor polynomial.
/// `scratch` needs 3 registers: `[x_squared, accumulator, transient]`.
pub fn emit_cos_poly<I: InstructionSet + ?Sized>(
    isa: &I,
    ops: &mut Assembler,
    dst: RegIdx,
    src: RegIdx,
    scratch: &[RegIdx],
) {
    let (x2, acc, tmp) = (scratch[0], scratch[1], scratch[2]);
    isa.emit_move(ops, x2, src);
    isa.emit_mul(ops, x2, src);

    // cos(x) = 1 - x2/2 + x2^2/24 - x2^3/720
    const COEFFS: [f64; 4] = [-1.0 / 720.0, 1.0 / 24.0, -1.0 / 2.0, 1.0];
    isa.emit_load_immediate(ops, acc, COEFFS[0]);
    for &c in &COEFFS[1..] {
        isa.emit_mul(ops, acc, x2);
        isa.emit_load_immediate(ops, tmp, c);
        isa.emit_add(ops, acc, tmp);
    }
    isa.emit_move(ops, dst, acc);
}

/// `tan(x) = sin(x) / cos(x)`, composed from the two polynomials above.
/// `scratch` needs 5 registers: 3 shared working registers (used by both
/// `sin` and `cos` in turn) plus a holding register for the cosine result;
/// the 4th slot goes unused here (reserved on `exp`/`log` for their
/// `ldexp2`/`frexp2` round trip).
pub fn emit_tan_from_sin_cos<I: InstructionSet + ?Sized>(
    isa: &I,
    ops: &mut Assembler,
    dst: RegIdx,
    src: RegIdx,
    scratch: &[RegIdx],
) {
    let cos_reg = scratch[4];
    emit_sin_poly(isa, ops, dst, src, &scratch[..3]);
    emit_cos_poly(isa, ops, cos_reg, src, &scratch[..3]);
    isa.emit_div(ops, dst, cos_reg);
}

/// `pow(base, exp) = exp(exp * log(base))`, the standard composition.
/// Negative or zero bases fall out of `log`'s domain and flow through as
/// NaN, matching the rest of the emitter's "never hide a domain error"
/// philosophy rather than special-casing integer exponents.
/// `scratch` needs all 5 registers: the first 4 are handed to `log_poly`
/// and then `exp_poly` in turn (each needs all 4 internally), while the
/// 5th holds `exp * log(base)` across both calls.
pub fn emit_pow_via_exp_log<I: InstructionSet + ?Sized>(
    isa: &I,
    ops: &mut Assembler,
    dst: RegIdx,
    base: RegIdx,
    exp: RegIdx,
    scratch: &[RegIdx],
) {
    let hold = scratch[4];
    emit_log_poly(isa, ops, hold, base, &scratch[..4]);
    isa.emit_mul(ops, hold, exp);
    emit_exp_poly(isa, ops, dst, hold, &scratch[..4]);
}
