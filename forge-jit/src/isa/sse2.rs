//! SSE2 scalar instruction-set strategy: one double per XMM register, one
//! lane per node. Grounded on the same dynamic-register dynasm idiom the
//! aarch64 NEON backend uses (`V(reg(..))`), generalised here to x64's
//! `Rx(..)` register-index operand.

use dynasmrt::{dynasm, x64::Assembler, DynasmApi};

use forge_ir::NodeId;

use super::{InstructionSet, InstructionSetKind, Predicate};
use crate::register::RegIdx;

/// Every `dynasm!` invocation has to restate the target architecture (the
/// macro is parsed independently per call site), so this wrapper folds
/// `.arch x64` into every emission instead of repeating it by hand, the
/// same trick the thompson-pike x64 backend uses via its `__!` macro.
macro_rules! x64asm {
    ($ops:expr; $($t:tt)*) => {
        dynasm!($ops; .arch x64; $($t)*)
    };
}

/// Scratch general-purpose register used to stage 64-bit immediates before
/// moving them into the vector unit. Caller-saved under SysV, so no
/// save/restore is required around its use.
const IMM_GPR: u8 = 0; // rax

fn predicate_imm(pred: Predicate) -> (i8, bool) {
    match pred {
        Predicate::Eq => (0, false),
        Predicate::Lt => (1, false),
        Predicate::Le => (2, false),
        Predicate::Ne => (4, false),
        Predicate::Gt => (1, true),
        Predicate::Ge => (2, true),
    }
}

/// SSE2-scalar instruction set: `XMM0..XMM15`, 8-byte slots.
pub struct Sse2;

impl InstructionSet for Sse2 {
    fn kind(&self) -> InstructionSetKind {
        InstructionSetKind::Sse2Scalar
    }

    fn emit_prologue(&self, _ops: &mut Assembler) {
        // SysV: rdi already holds the buffer pointer; every XMM register is
        // caller-saved, so there is nothing to preserve.
    }

    fn emit_epilogue(&self, ops: &mut Assembler) {
        x64asm!(ops; ret);
    }

    fn emit_load(&self, ops: &mut Assembler, reg: RegIdx, node: NodeId) {
        let offset = node as i32 * self.kind().slot_size() as i32;
        x64asm!(ops; movsd Rx(reg as u8), [rdi + offset]);
    }

    fn emit_store(&self, ops: &mut Assembler, reg: RegIdx, node: NodeId) {
        let offset = node as i32 * self.kind().slot_size() as i32;
        x64asm!(ops; movsd [rdi + offset], Rx(reg as u8));
    }

    fn emit_load_adjoint(&self, ops: &mut Assembler, reg: RegIdx, node: NodeId, num_nodes: u32) {
        let offset = (num_nodes + node) as i32 * self.kind().slot_size() as i32;
        x64asm!(ops; movsd Rx(reg as u8), [rdi + offset]);
    }

    fn emit_store_adjoint(&self, ops: &mut Assembler, reg: RegIdx, node: NodeId, num_nodes: u32) {
        let offset = (num_nodes + node) as i32 * self.kind().slot_size() as i32;
        x64asm!(ops; movsd [rdi + offset], Rx(reg as u8));
    }

    fn emit_accumulate_adjoint(
        &self,
        ops: &mut Assembler,
        reg: RegIdx,
        node: NodeId,
        num_nodes: u32,
        tmp: RegIdx,
    ) {
        let offset = (num_nodes + node) as i32 * self.kind().slot_size() as i32;
        x64asm!(ops
            ; movsd Rx(tmp as u8), [rdi + offset]
            ; addsd Rx(tmp as u8), Rx(reg as u8)
            ; movsd [rdi + offset], Rx(tmp as u8)
        );
    }

    fn emit_load_from_pool(&self, ops: &mut Assembler, reg: RegIdx, offset: i32) {
        x64asm!(ops; movsd Rx(reg as u8), [->const_pool + offset]);
    }

    fn emit_zero(&self, ops: &mut Assembler, reg: RegIdx) {
        x64asm!(ops; xorpd Rx(reg as u8), Rx(reg as u8));
    }

    fn emit_load_immediate(&self, ops: &mut Assembler, reg: RegIdx, literal: f64) {
        let bits = literal.to_bits() as i64;
        x64asm!(ops
            ; mov Rq(IMM_GPR), QWORD bits
            ; movq Rx(reg as u8), Rq(IMM_GPR)
        );
    }

    fn emit_move(&self, ops: &mut Assembler, dst: RegIdx, src: RegIdx) {
        if dst != src {
            x64asm!(ops; movapd Rx(dst as u8), Rx(src as u8));
        }
    }

    fn emit_create_all_ones(&self, ops: &mut Assembler, reg: RegIdx) {
        x64asm!(ops; pcmpeqd Rx(reg as u8), Rx(reg as u8));
    }

    fn emit_shift_left(&self, ops: &mut Assembler, reg: RegIdx, bits: u8) {
        x64asm!(ops; psllq Rx(reg as u8), BYTE bits as i8);
    }

    fn emit_shift_right(&self, ops: &mut Assembler, reg: RegIdx, bits: u8) {
        x64asm!(ops; psrlq Rx(reg as u8), BYTE bits as i8);
    }

    fn emit_add(&self, ops: &mut Assembler, dst: RegIdx, src: RegIdx) {
        x64asm!(ops; addsd Rx(dst as u8), Rx(src as u8));
    }

    fn emit_sub(&self, ops: &mut Assembler, dst: RegIdx, src: RegIdx) {
        x64asm!(ops; subsd Rx(dst as u8), Rx(src as u8));
    }

    fn emit_mul(&self, ops: &mut Assembler, dst: RegIdx, src: RegIdx) {
        x64asm!(ops; mulsd Rx(dst as u8), Rx(src as u8));
    }

    fn emit_div(&self, ops: &mut Assembler, dst: RegIdx, src: RegIdx) {
        x64asm!(ops; divsd Rx(dst as u8), Rx(src as u8));
    }

    fn emit_sqrt(&self, ops: &mut Assembler, dst: RegIdx, src: RegIdx) {
        x64asm!(ops; sqrtsd Rx(dst as u8), Rx(src as u8));
    }

    fn emit_square(&self, ops: &mut Assembler, dst: RegIdx, src: RegIdx) {
        self.emit_move(ops, dst, src);
        x64asm!(ops; mulsd Rx(dst as u8), Rx(src as u8));
    }

    fn emit_min(&self, ops: &mut Assembler, dst: RegIdx, a: RegIdx, b: RegIdx) {
        self.emit_move(ops, dst, a);
        x64asm!(ops; minsd Rx(dst as u8), Rx(b as u8));
    }

    fn emit_max(&self, ops: &mut Assembler, dst: RegIdx, a: RegIdx, b: RegIdx) {
        self.emit_move(ops, dst, a);
        x64asm!(ops; maxsd Rx(dst as u8), Rx(b as u8));
    }

    fn emit_round_trunc(&self, ops: &mut Assembler, dst: RegIdx, src: RegIdx) {
        // imm8 0b0011: round toward zero, precision exception suppressed.
        x64asm!(ops; roundsd Rx(dst as u8), Rx(src as u8), 0b0011);
    }

    fn emit_and(&self, ops: &mut Assembler, dst: RegIdx, src: RegIdx) {
        x64asm!(ops; andpd Rx(dst as u8), Rx(src as u8));
    }

    fn emit_xor(&self, ops: &mut Assembler, dst: RegIdx, src: RegIdx) {
        x64asm!(ops; xorpd Rx(dst as u8), Rx(src as u8));
    }

    fn emit_cmp_mask(&self, ops: &mut Assembler, dst: RegIdx, a: RegIdx, b: RegIdx, pred: Predicate) {
        let (imm, swap) = predicate_imm(pred);
        let (first, second) = if swap { (b, a) } else { (a, b) };
        self.emit_move(ops, dst, first);
        x64asm!(ops; cmppd Rx(dst as u8), Rx(second as u8), imm);
    }

    fn emit_mask_to_bool(&self, ops: &mut Assembler, dst: RegIdx, one_bits: RegIdx) {
        x64asm!(ops; andpd Rx(dst as u8), Rx(one_bits as u8));
    }

    fn emit_select(&self, ops: &mut Assembler, dst: RegIdx, cond: RegIdx, t: RegIdx, f: RegIdx, tmp: RegIdx) {
        // dst = (cond & t) | (~cond & f)
        self.emit_move(ops, dst, cond);
        x64asm!(ops; andpd Rx(dst as u8), Rx(t as u8));
        self.emit_move(ops, tmp, cond);
        x64asm!(ops
            ; andnpd Rx(tmp as u8), Rx(f as u8)
            ; orpd Rx(dst as u8), Rx(tmp as u8)
        );
    }

    fn emit_ldexp2(&self, ops: &mut Assembler, dst: RegIdx, k: RegIdx, _scratch: RegIdx) {
        // Scalar SSE2 round-trips through a GPR directly, so the extra
        // vector scratch register AVX2 needs goes unused here.
        x64asm!(ops
            ; cvttsd2si Rq(IMM_GPR), Rx(k as u8)
            ; add Rq(IMM_GPR), 1023
            ; shl Rq(IMM_GPR), 52
            ; movq Rx(dst as u8), Rq(IMM_GPR)
        );
    }

    fn emit_frexp2(
        &self,
        ops: &mut Assembler,
        mantissa_dst: RegIdx,
        exponent_dst: RegIdx,
        src: RegIdx,
        _scratch: RegIdx,
    ) {
        const EXP_MASK: i64 = 0x7FF0_0000_0000_0000u64 as i64;
        const MANTISSA_KEEP: i64 = 0x800F_FFFF_FFFF_FFFFu64 as i64;
        const UNIT_EXPONENT: i64 = 0x3FF0_0000_0000_0000u64 as i64;
        x64asm!(ops
            ; movq Rq(IMM_GPR), Rx(src as u8)
            ; mov rcx, Rq(IMM_GPR)
            ; mov rdx, QWORD EXP_MASK
            ; and rcx, rdx
            ; shr rcx, 52
            ; sub rcx, 1023
            ; cvtsi2sd Rx(exponent_dst as u8), rcx
            ; mov rdx, QWORD MANTISSA_KEEP
            ; and Rq(IMM_GPR), rdx
            ; mov rdx, QWORD UNIT_EXPONENT
            ; or Rq(IMM_GPR), rdx
            ; movq Rx(mantissa_dst as u8), Rq(IMM_GPR)
        );
    }

    fn emit_exp(&self, ops: &mut Assembler, dst: RegIdx, src: RegIdx, scratch: &[RegIdx]) {
        super::transcendental::emit_exp_poly(self, ops, dst, src, scratch);
    }

    fn emit_log(&self, ops: &mut Assembler, dst: RegIdx, src: RegIdx, scratch: &[RegIdx]) {
        super::transcendental::emit_log_poly(self, ops, dst, src, scratch);
    }

    fn emit_sin(&self, ops: &mut Assembler, dst: RegIdx, src: RegIdx, scratch: &[RegIdx]) {
        super::transcendental::emit_sin_poly(self, ops, dst, src, scratch);
    }

    fn emit_cos(&self, ops: &mut Assembler, dst: RegIdx, src: RegIdx, scratch: &[RegIdx]) {
        super::transcendental::emit_cos_poly(self, ops, dst, src, scratch);
    }

    fn emit_tan(&self, ops: &mut Assembler, dst: RegIdx, src: RegIdx, scratch: &[RegIdx]) {
        super::transcendental::emit_tan_from_sin_cos(self, ops, dst, src, scratch);
    }

    fn emit_pow(&self, ops: &mut Assembler, dst: RegIdx, base: RegIdx, exp: RegIdx, scratch: &[RegIdx]) {
        super::transcendental::emit_pow_via_exp_log(self, ops, dst, base, exp, scratch);
    }
}
