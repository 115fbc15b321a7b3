//! AVX2 packed instruction-set strategy: four doubles per YMM register, one
//! lane per SIMD invocation slot. The polynomial arithmetic for
//! transcendentals stays fully packed; the exponent bit-manipulation that
//! `ldexp`/`frexp` need falls back to per-lane scalar processing through a
//! stack scratch area in the SysV red zone (128 bytes below `rsp` a leaf
//! function may use without adjusting the stack pointer — this kernel never
//! calls out, so it qualifies), since AVX2 has no single packed instruction
//! for rebuilding a double's exponent field from an integer.

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

/// AVX2-packed instruction set: `YMM0..YMM15`, 32-byte slots (4 lanes).
pub struct Avx2;

impl InstructionSet for Avx2 {
    fn kind(&self) -> InstructionSetKind {
        InstructionSetKind::Avx2Packed
    }

    fn emit_prologue(&self, _ops: &mut Assembler) {
        // SysV: rdi holds the buffer pointer; YMM registers are
        // caller-saved, nothing to preserve. `vzeroupper` is deliberately
        // omitted: this kernel never transitions back into legacy-SSE
        // caller code that would benefit from it.
    }

    fn emit_epilogue(&self, ops: &mut Assembler) {
        x64asm!(ops; ret);
    }

    fn emit_load(&self, ops: &mut Assembler, reg: RegIdx, node: NodeId) {
        let offset = node as i32 * self.kind().slot_size() as i32;
        x64asm!(ops; vmovupd Rx(reg as u8), [rdi + offset]);
    }

    fn emit_store(&self, ops: &mut Assembler, reg: RegIdx, node: NodeId) {
        let offset = node as i32 * self.kind().slot_size() as i32;
        x64asm!(ops; vmovupd [rdi + offset], Rx(reg as u8));
    }

    fn emit_load_adjoint(&self, ops: &mut Assembler, reg: RegIdx, node: NodeId, num_nodes: u32) {
        let offset = (num_nodes + node) as i32 * self.kind().slot_size() as i32;
        x64asm!(ops; vmovupd Rx(reg as u8), [rdi + offset]);
    }

    fn emit_store_adjoint(&self, ops: &mut Assembler, reg: RegIdx, node: NodeId, num_nodes: u32) {
        let offset = (num_nodes + node) as i32 * self.kind().slot_size() as i32;
        x64asm!(ops; vmovupd [rdi + offset], Rx(reg as u8));
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
            ; vmovupd Rx(tmp as u8), [rdi + offset]
            ; vaddpd Rx(tmp as u8), Rx(tmp as u8), Rx(reg as u8)
            ; vmovupd [rdi + offset], Rx(tmp as u8)
        );
    }

    fn emit_load_from_pool(&self, ops: &mut Assembler, reg: RegIdx, offset: i32) {
        x64asm!(ops; vbroadcastsd Rx(reg as u8), [->const_pool + offset]);
    }

    fn emit_zero(&self, ops: &mut Assembler, reg: RegIdx) {
        x64asm!(ops; vxorpd Rx(reg as u8), Rx(reg as u8), Rx(reg as u8));
    }

    fn emit_load_immediate(&self, ops: &mut Assembler, reg: RegIdx, literal: f64) {
        let bits = literal.to_bits() as i64;
        x64asm!(ops
            ; mov Rq(IMM_GPR), QWORD bits
            ; movq Rx(reg as u8), Rq(IMM_GPR)
            ; vbroadcastsd Rx(reg as u8), Rx(reg as u8)
        );
    }

    fn emit_move(&self, ops: &mut Assembler, dst: RegIdx, src: RegIdx) {
        if dst != src {
            x64asm!(ops; vmovapd Rx(dst as u8), Rx(src as u8));
        }
    }

    fn emit_create_all_ones(&self, ops: &mut Assembler, reg: RegIdx) {
        x64asm!(ops; vpcmpeqd Rx(reg as u8), Rx(reg as u8), Rx(reg as u8));
    }

    fn emit_shift_left(&self, ops: &mut Assembler, reg: RegIdx, bits: u8) {
        x64asm!(ops; vpsllq Rx(reg as u8), Rx(reg as u8), BYTE bits as i8);
    }

    fn emit_shift_right(&self, ops: &mut Assembler, reg: RegIdx, bits: u8) {
        x64asm!(ops; vpsrlq Rx(reg as u8), Rx(reg as u8), BYTE bits as i8);
    }

    fn emit_add(&self, ops: &mut Assembler, dst: RegIdx, src: RegIdx) {
        x64asm!(ops; vaddpd Rx(dst as u8), Rx(dst as u8), Rx(src as u8));
    }

    fn emit_sub(&self, ops: &mut Assembler, dst: RegIdx, src: RegIdx) {
        x64asm!(ops; vsubpd Rx(dst as u8), Rx(dst as u8), Rx(src as u8));
    }

    fn emit_mul(&self, ops: &mut Assembler, dst: RegIdx, src: RegIdx) {
        x64asm!(ops; vmulpd Rx(dst as u8), Rx(dst as u8), Rx(src as u8));
    }

    fn emit_div(&self, ops: &mut Assembler, dst: RegIdx, src: RegIdx) {
        x64asm!(ops; vdivpd Rx(dst as u8), Rx(dst as u8), Rx(src as u8));
    }

    fn emit_sqrt(&self, ops: &mut Assembler, dst: RegIdx, src: RegIdx) {
        x64asm!(ops; vsqrtpd Rx(dst as u8), Rx(src as u8));
    }

    fn emit_square(&self, ops: &mut Assembler, dst: RegIdx, src: RegIdx) {
        x64asm!(ops; vmulpd Rx(dst as u8), Rx(src as u8), Rx(src as u8));
    }

    fn emit_min(&self, ops: &mut Assembler, dst: RegIdx, a: RegIdx, b: RegIdx) {
        x64asm!(ops; vminpd Rx(dst as u8), Rx(a as u8), Rx(b as u8));
    }

    fn emit_max(&self, ops: &mut Assembler, dst: RegIdx, a: RegIdx, b: RegIdx) {
        x64asm!(ops; vmaxpd Rx(dst as u8), Rx(a as u8), Rx(b as u8));
    }

    fn emit_round_trunc(&self, ops: &mut Assembler, dst: RegIdx, src: RegIdx) {
        x64asm!(ops; vroundpd Rx(dst as u8), Rx(src as u8), 0b0011);
    }

    fn emit_and(&self, ops: &mut Assembler, dst: RegIdx, src: RegIdx) {
        x64asm!(ops; vandpd Rx(dst as u8), Rx(dst as u8), Rx(src as u8));
    }

    fn emit_xor(&self, ops: &mut Assembler, dst: RegIdx, src: RegIdx) {
        x64asm!(ops; vxorpd Rx(dst as u8), Rx(dst as u8), Rx(src as u8));
    }

    fn emit_cmp_mask(&self, ops: &mut Assembler, dst: RegIdx, a: RegIdx, b: RegIdx, pred: Predicate) {
        let (imm, swap) = predicate_imm(pred);
        let (first, second) = if swap { (b, a) } else { (a, b) };
        x64asm!(ops; vcmppd Rx(dst as u8), Rx(first as u8), Rx(second as u8), imm);
    }

    fn emit_mask_to_bool(&self, ops: &mut Assembler, dst: RegIdx, one_bits: RegIdx) {
        x64asm!(ops; vandpd Rx(dst as u8), Rx(dst as u8), Rx(one_bits as u8));
    }

    fn emit_select(&self, ops: &mut Assembler, dst: RegIdx, cond: RegIdx, t: RegIdx, f: RegIdx, _tmp: RegIdx) {
        x64asm!(ops; vblendvpd Rx(dst as u8), Rx(f as u8), Rx(t as u8), Rx(cond as u8));
    }

    fn emit_ldexp2(&self, ops: &mut Assembler, dst: RegIdx, k: RegIdx, scratch: RegIdx) {
        // Stage through the SysV red zone: store the 4 integer-valued
        // lanes, rebuild each lane's exponent field with scalar GPR
        // bit-twiddling, reload packed. `scratch` takes the place of a
        // hardcoded xmm register, since every abstract index here (0..15)
        // is also something the register allocator may have a live value
        // parked in.
        x64asm!(ops; vmovupd [rsp - 32], Rx(k as u8));
        for lane in 0..4i32 {
            let off = lane * 8 - 32;
            x64asm!(ops
                ; movsd Rx(scratch as u8), [rsp + off]
                ; cvttsd2si Rq(IMM_GPR), Rx(scratch as u8)
                ; add Rq(IMM_GPR), 1023
                ; shl Rq(IMM_GPR), 52
                ; mov [rsp + off], Rq(IMM_GPR)
            );
        }
        x64asm!(ops; vmovupd Rx(dst as u8), [rsp - 32]);
    }

    fn emit_frexp2(
        &self,
        ops: &mut Assembler,
        mantissa_dst: RegIdx,
        exponent_dst: RegIdx,
        src: RegIdx,
        scratch: RegIdx,
    ) {
        const EXP_MASK: i64 = 0x7FF0_0000_0000_0000u64 as i64;
        const MANTISSA_KEEP: i64 = 0x800F_FFFF_FFFF_FFFFu64 as i64;
        const UNIT_EXPONENT: i64 = 0x3FF0_0000_0000_0000u64 as i64;

        // src/mantissa share a 32-byte scratch region at rsp-64; the
        // exponent lanes are built separately at rsp-32.
        x64asm!(ops; vmovupd [rsp - 64], Rx(src as u8));
        for lane in 0..4i32 {
            let src_off = lane * 8 - 64;
            let exp_off = lane * 8 - 32;
            x64asm!(ops
                ; mov Rq(IMM_GPR), [rsp + src_off]
                ; mov rcx, Rq(IMM_GPR)
                ; mov rdx, QWORD EXP_MASK
                ; and rcx, rdx
                ; shr rcx, 52
                ; sub rcx, 1023
                ; cvtsi2sd Rx(scratch as u8), rcx
                ; movsd [rsp + exp_off], Rx(scratch as u8)
                ; mov rdx, QWORD MANTISSA_KEEP
                ; and Rq(IMM_GPR), rdx
                ; mov rdx, QWORD UNIT_EXPONENT
                ; or Rq(IMM_GPR), rdx
                ; mov [rsp + src_off], Rq(IMM_GPR)
            );
        }
        x64asm!(ops
            ; vmovupd Rx(mantissa_dst as u8), [rsp - 64]
            ; vmovupd Rx(exponent_dst as u8), [rsp - 32]
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
