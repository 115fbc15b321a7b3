//! Instruction-set strategy (spec §4.5): the primitives that differ between
//! SSE2-scalar and AVX2-packed code generation, behind one trait so the
//! forward/reverse emitters stay opcode-switched without caring which width
//! they are targeting.

mod avx2;
mod sse2;
mod transcendental;

pub use avx2::Avx2;
pub use sse2::Sse2;

use dynasmrt::x64::Assembler;

use forge_ir::NodeId;

use crate::register::RegIdx;

/// Which concrete instruction set a [`crate::Kernel`] was compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstructionSetKind {
    /// One double per lane (XMM0-15).
    Sse2Scalar,
    /// Four doubles per lane (YMM0-15).
    Avx2Packed,
}

impl InstructionSetKind {
    /// Bytes occupied by one node's slot in the value buffer.
    pub fn slot_size(self) -> usize {
        match self {
            InstructionSetKind::Sse2Scalar => 8,
            InstructionSetKind::Avx2Packed => 32,
        }
    }

    /// Number of parallel lanes a kernel compiled for this set processes.
    pub fn vector_width(self) -> usize {
        match self {
            InstructionSetKind::Sse2Scalar => 1,
            InstructionSetKind::Avx2Packed => 4,
        }
    }

    /// Builds the corresponding [`InstructionSet`] implementation.
    pub fn build(self) -> Box<dyn InstructionSet> {
        match self {
            InstructionSetKind::Sse2Scalar => Box::new(Sse2),
            InstructionSetKind::Avx2Packed => Box::new(Avx2),
        }
    }
}

/// Lane-wise comparison predicate, shared by the real and truncated-integer
/// comparison opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Predicate {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

/// Every code-emission primitive the forward/reverse emitters need,
/// parametrised so the same call sites work for both instruction sets.
///
/// Registers are addressed by abstract index (0..=15); each implementation
/// maps that index onto its concrete XMM/YMM register name. All `_pd`-style
/// operations act on the whole lane width of the target set.
#[allow(missing_docs)]
pub trait InstructionSet {
    /// Which set this is.
    fn kind(&self) -> InstructionSetKind;

    /// Emits the kernel's entry prologue: establishes the base-pointer
    /// register (`rdi` on SysV, `rcx` on Windows) and, if the target ABI
    /// has callee-saved SIMD registers, preserves them. Under SysV all
    /// XMM/YMM registers are caller-saved, so this is a no-op there; kept
    /// as a method so a Windows ABI variant has somewhere to hook in.
    fn emit_prologue(&self, ops: &mut Assembler);

    /// Emits the matching `ret` (and any register restores the prologue
    /// performed).
    fn emit_epilogue(&self, ops: &mut Assembler);

    // --- memory ---

    /// Loads `node`'s current buffer slot into `reg`.
    fn emit_load(&self, ops: &mut Assembler, reg: RegIdx, node: NodeId);
    /// Stores `reg` into `node`'s buffer slot.
    fn emit_store(&self, ops: &mut Assembler, reg: RegIdx, node: NodeId);
    /// Loads `node`'s adjoint slot (buffer offset `num_nodes + node`) into
    /// `reg`.
    fn emit_load_adjoint(&self, ops: &mut Assembler, reg: RegIdx, node: NodeId, num_nodes: u32);
    /// Stores `reg` into `node`'s adjoint slot.
    fn emit_store_adjoint(&self, ops: &mut Assembler, reg: RegIdx, node: NodeId, num_nodes: u32);
    /// Accumulates `reg` into `node`'s adjoint slot (`slot += reg`), using
    /// `tmp` to stage the read-modify-write. Used by every reverse-pass
    /// contribution except the seed step.
    fn emit_accumulate_adjoint(
        &self,
        ops: &mut Assembler,
        reg: RegIdx,
        node: NodeId,
        num_nodes: u32,
        tmp: RegIdx,
    );
    /// Loads a RIP-relative constant-pool entry at `offset` into `reg`,
    /// broadcasting across all lanes for AVX2.
    fn emit_load_from_pool(&self, ops: &mut Assembler, reg: RegIdx, offset: i32);
    /// Zeros `reg` (`xorpd`/`vxorpd reg, reg, reg`); the canonical way to
    /// materialise the constant zero, which is never pool-allocated.
    fn emit_zero(&self, ops: &mut Assembler, reg: RegIdx);
    /// Materialises a one-off literal (e.g. a polynomial coefficient used
    /// only inside a transcendental routine) without a pool entry, via a
    /// scratch GPR and a move into the vector unit.
    fn emit_load_immediate(&self, ops: &mut Assembler, reg: RegIdx, literal: f64);
    /// Copies `src` into `dst`.
    fn emit_move(&self, ops: &mut Assembler, dst: RegIdx, src: RegIdx);
    /// Fills `reg` with all-one bits in every lane (used to build masks for
    /// sign manipulation).
    fn emit_create_all_ones(&self, ops: &mut Assembler, reg: RegIdx);
    /// Logical left shift of each lane's bit pattern.
    fn emit_shift_left(&self, ops: &mut Assembler, reg: RegIdx, bits: u8);
    /// Logical right shift of each lane's bit pattern.
    fn emit_shift_right(&self, ops: &mut Assembler, reg: RegIdx, bits: u8);

    // --- real arithmetic, in place on dst ---

    fn emit_add(&self, ops: &mut Assembler, dst: RegIdx, src: RegIdx);
    fn emit_sub(&self, ops: &mut Assembler, dst: RegIdx, src: RegIdx);
    fn emit_mul(&self, ops: &mut Assembler, dst: RegIdx, src: RegIdx);
    fn emit_div(&self, ops: &mut Assembler, dst: RegIdx, src: RegIdx);
    fn emit_sqrt(&self, ops: &mut Assembler, dst: RegIdx, src: RegIdx);
    /// `dst = src * src`, cheaper than a generic `Pow` lowering.
    fn emit_square(&self, ops: &mut Assembler, dst: RegIdx, src: RegIdx);
    fn emit_min(&self, ops: &mut Assembler, dst: RegIdx, a: RegIdx, b: RegIdx);
    fn emit_max(&self, ops: &mut Assembler, dst: RegIdx, a: RegIdx, b: RegIdx);
    /// Truncates (toward zero) every lane of `src` into `dst`; the
    /// building block for `Mod` and every integer opcode.
    fn emit_round_trunc(&self, ops: &mut Assembler, dst: RegIdx, src: RegIdx);

    // --- bitwise ---

    fn emit_and(&self, ops: &mut Assembler, dst: RegIdx, src: RegIdx);
    fn emit_xor(&self, ops: &mut Assembler, dst: RegIdx, src: RegIdx);

    /// Lane-wise comparison, result left in canonical mask form (all-ones /
    /// all-zeros per lane) — not yet a 0.0/1.0 boolean double.
    fn emit_cmp_mask(&self, ops: &mut Assembler, dst: RegIdx, a: RegIdx, b: RegIdx, pred: Predicate);

    /// Converts a canonical mask (all-ones/all-zeros) into a 0.0/1.0
    /// boolean double by ANDing with the bit pattern of 1.0.
    fn emit_mask_to_bool(&self, ops: &mut Assembler, dst: RegIdx, one_bits: RegIdx);

    /// `dst = cond ? t : f`, where `cond` is a canonical mask (all-ones /
    /// all-zeros per lane, *not* a 0.0/1.0 boolean double — the forward
    /// emitter re-derives the mask from the comparison that produced the
    /// condition rather than reinterpreting a stored boolean). SSE2 does
    /// this branch-free via `(cond & t) | (~cond & f)`, using `tmp` to hold
    /// the second term; AVX2 uses a single `vblendvpd` keyed on the mask's
    /// sign bit and ignores `tmp`.
    fn emit_select(&self, ops: &mut Assembler, dst: RegIdx, cond: RegIdx, t: RegIdx, f: RegIdx, tmp: RegIdx);

    // --- transcendentals: software polynomial approximations, may use
    // scratch registers beyond dst/src ---

    fn emit_exp(&self, ops: &mut Assembler, dst: RegIdx, src: RegIdx, scratch: &[RegIdx]);
    fn emit_log(&self, ops: &mut Assembler, dst: RegIdx, src: RegIdx, scratch: &[RegIdx]);
    fn emit_sin(&self, ops: &mut Assembler, dst: RegIdx, src: RegIdx, scratch: &[RegIdx]);
    fn emit_cos(&self, ops: &mut Assembler, dst: RegIdx, src: RegIdx, scratch: &[RegIdx]);
    fn emit_tan(&self, ops: &mut Assembler, dst: RegIdx, src: RegIdx, scratch: &[RegIdx]);
    fn emit_pow(&self, ops: &mut Assembler, dst: RegIdx, base: RegIdx, exp: RegIdx, scratch: &[RegIdx]);

    /// Reconstructs `2^k` (`k` holding an already-truncated integer-valued
    /// double in every lane) directly in the bit pattern of a double, via
    /// the exponent field: `(k + 1023) << 52`. The building block `exp`
    /// uses to undo range reduction.
    /// Uses `rax` as GPR scratch (safe: the kernel ABI reserves no
    /// general-purpose register beyond the buffer base pointer) plus
    /// `scratch`, an abstract vector register the caller must not have
    /// anything live in — AVX2's per-lane staging needs a real vector
    /// register to round-trip through, and `scratch` is how the register
    /// allocator's bookkeeping stays correct instead of a hardcoded name
    /// silently colliding with a live value.
    fn emit_ldexp2(&self, ops: &mut Assembler, dst: RegIdx, k: RegIdx, scratch: RegIdx);

    /// Decomposes `src` into a unit-range mantissa (`[1, 2)`) and an
    /// unbiased power-of-two exponent (as a double), the inverse of
    /// [`emit_ldexp2`]. The building block `log` uses for range reduction.
    /// Uses `rax`/`rcx`/`rdx` as GPR scratch, plus `scratch` as in
    /// [`emit_ldexp2`].
    fn emit_frexp2(
        &self,
        ops: &mut Assembler,
        mantissa_dst: RegIdx,
        exponent_dst: RegIdx,
        src: RegIdx,
        scratch: RegIdx,
    );

    /// Number of scratch registers each transcendental needs beyond its
    /// destination and source operands, for the forward emitter's
    /// register-avoid set. `Pow` is the widest: a holding register for
    /// `exp * log(base)` plus the 4 working registers `log`/`exp` each need
    /// internally (3 for the polynomial evaluation, 1 for the `ldexp2`/
    /// `frexp2` lane round trip). All callers request this uniform maximum
    /// so one register-avoid set works for every transcendental.
    fn transcendental_scratch_count(&self) -> usize {
        5
    }
}
