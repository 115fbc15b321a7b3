//! Forward code emitter (spec §4.6): walks the graph in order and, per
//! node, asks the instruction-set strategy to materialise operands,
//! allocate a destination, and emit the opcode's primitive.

use std::collections::HashSet;

use dynasmrt::x64::Assembler;

use forge_ir::{Graph, Node, NodeId, OpCode};

use crate::const_pool::ConstPoolPlan;
use crate::isa::{InstructionSet, Predicate};
use crate::register::{RegIdx, RegisterAllocator};

/// Drives one forward pass. Consumes a fresh [`RegisterAllocator`]; the
/// reverse emitter (if any) starts its own, since live ranges do not cross
/// the forward/reverse boundary.
pub struct ForwardEmitter<'a> {
    isa: &'a dyn InstructionSet,
    pool: &'a ConstPoolPlan,
    materialized: HashSet<NodeId>,
}

impl<'a> ForwardEmitter<'a> {
    /// Creates an emitter targeting `isa`, using `pool` to resolve constant
    /// pool offsets.
    pub fn new(isa: &'a dyn InstructionSet, pool: &'a ConstPoolPlan) -> Self {
        Self {
            isa,
            pool,
            materialized: HashSet::new(),
        }
    }

    /// Emits the forward pass body for every non-dead node in `graph`,
    /// then flushes any value left dirty in a register. Returns the
    /// allocator so the reverse emitter can start fresh without
    /// re-deriving register state from scratch (it doesn't reuse it, but
    /// returning it documents that the pass is over).
    pub fn emit(&mut self, ops: &mut Assembler, graph: &Graph) -> RegisterAllocator {
        let mut alloc = RegisterAllocator::new();

        for node in &graph.nodes {
            if node.is_dead || node.op == OpCode::Input {
                continue;
            }
            self.emit_node(ops, graph, &mut alloc, node);
        }

        for (reg, node) in alloc.dirty_occupants() {
            self.isa.emit_store(ops, reg, node);
            alloc.mark_clean(node);
        }

        alloc
    }

    fn ensure_in_register(
        &mut self,
        ops: &mut Assembler,
        graph: &Graph,
        alloc: &mut RegisterAllocator,
        node_id: NodeId,
        avoid: &[RegIdx],
    ) -> RegIdx {
        if let Some(reg) = alloc.find_node(node_id) {
            return reg;
        }

        let allocation = alloc.allocate_avoiding(avoid);
        if let Some(spill) = allocation.spill {
            self.isa.emit_store(ops, allocation.reg, spill);
        }
        let reg = allocation.reg;
        let node = graph.node(node_id);

        match node.op {
            OpCode::Constant => {
                let value = graph.const_pool[node.imm as usize];
                if value == 0.0 {
                    self.isa.emit_zero(ops, reg);
                    if !self.materialized.contains(&node_id) {
                        self.isa.emit_store(ops, reg, node_id);
                        self.materialized.insert(node_id);
                    }
                } else if self.materialized.contains(&node_id) {
                    self.isa.emit_load(ops, reg, node_id);
                } else {
                    let offset = self
                        .pool
                        .offset_of(node_id)
                        .expect("nonzero constant missing a pool slot");
                    self.isa.emit_load_from_pool(ops, reg, offset as i32);
                    self.isa.emit_store(ops, reg, node_id);
                    self.materialized.insert(node_id);
                }
            }
            OpCode::BoolConstant | OpCode::IntConstant => {
                if self.materialized.contains(&node_id) {
                    self.isa.emit_load(ops, reg, node_id);
                } else {
                    self.isa.emit_load_immediate(ops, reg, node.imm);
                    self.isa.emit_store(ops, reg, node_id);
                    self.materialized.insert(node_id);
                }
            }
            _ => self.isa.emit_load(ops, reg, node_id),
        }

        alloc.set_register(reg, node_id, false);
        reg
    }

    fn fresh_dest(&self, ops: &mut Assembler, alloc: &mut RegisterAllocator, avoid: &[RegIdx]) -> RegIdx {
        let allocation = alloc.allocate_avoiding(avoid);
        if let Some(spill) = allocation.spill {
            self.isa.emit_store(ops, allocation.reg, spill);
        }
        allocation.reg
    }

    /// Places `a` in the destination (commutative ops may use either
    /// operand; we always normalise to the first for simplicity — see
    /// `DESIGN.md` on why the register allocator does not attempt the
    /// "reuse a dying operand's register" optimisation here).
    fn select_commutative(
        &self,
        ops: &mut Assembler,
        alloc: &mut RegisterAllocator,
        a: RegIdx,
        b: RegIdx,
    ) -> RegIdx {
        let dest = self.fresh_dest(ops, alloc, &[a, b]);
        self.isa.emit_move(ops, dest, a);
        dest
    }

    /// Places the non-commutative first operand `a` in the destination.
    fn select_noncommutative(
        &self,
        ops: &mut Assembler,
        alloc: &mut RegisterAllocator,
        a: RegIdx,
        b: RegIdx,
    ) -> RegIdx {
        let dest = self.fresh_dest(ops, alloc, &[a, b]);
        self.isa.emit_move(ops, dest, a);
        dest
    }

    fn emit_mod(&self, ops: &mut Assembler, alloc: &mut RegisterAllocator, a: RegIdx, b: RegIdx) -> RegIdx {
        let t = self.fresh_dest(ops, alloc, &[a, b]);
        self.isa.emit_move(ops, t, a);
        self.isa.emit_div(ops, t, b);
        self.isa.emit_round_trunc(ops, t, t);
        self.isa.emit_mul(ops, t, b);
        let dest = self.fresh_dest(ops, alloc, &[a, b, t]);
        self.isa.emit_move(ops, dest, a);
        self.isa.emit_sub(ops, dest, t);
        dest
    }

    fn emit_real_cmp(
        &self,
        ops: &mut Assembler,
        alloc: &mut RegisterAllocator,
        a: RegIdx,
        b: RegIdx,
        pred: Predicate,
    ) -> RegIdx {
        let dest = self.fresh_dest(ops, alloc, &[a, b]);
        self.isa.emit_cmp_mask(ops, dest, a, b, pred);
        let one = self.fresh_dest(ops, alloc, &[a, b, dest]);
        self.isa.emit_load_immediate(ops, one, 1.0);
        self.isa.emit_mask_to_bool(ops, dest, one);
        dest
    }

    fn emit_conditional(
        &self,
        ops: &mut Assembler,
        alloc: &mut RegisterAllocator,
        cond: RegIdx,
        t: RegIdx,
        f: RegIdx,
    ) -> RegIdx {
        let zero = self.fresh_dest(ops, alloc, &[cond, t, f]);
        self.isa.emit_zero(ops, zero);
        let mask = self.fresh_dest(ops, alloc, &[cond, t, f, zero]);
        self.isa.emit_cmp_mask(ops, mask, cond, zero, Predicate::Ne);
        let dest = self.fresh_dest(ops, alloc, &[cond, t, f, zero, mask]);
        let tmp = self.fresh_dest(ops, alloc, &[cond, t, f, zero, mask, dest]);
        self.isa.emit_select(ops, dest, mask, t, f, tmp);
        dest
    }

    /// Truncates `src` toward zero into a fresh register, the shared first
    /// step of every integer opcode (spec §4.5 integer lowering).
    fn truncate(&self, ops: &mut Assembler, alloc: &mut RegisterAllocator, src: RegIdx, avoid: &[RegIdx]) -> RegIdx {
        let dest = self.fresh_dest(ops, alloc, avoid);
        self.isa.emit_round_trunc(ops, dest, src);
        dest
    }

    fn emit_node(&mut self, ops: &mut Assembler, graph: &Graph, alloc: &mut RegisterAllocator, node: &Node) {
        let a = || node.a;
        let b = || node.b;
        let c = || node.c;

        if matches!(node.op, OpCode::Constant | OpCode::BoolConstant | OpCode::IntConstant) {
            // `ensure_in_register` already materialises and stores constants
            // lazily on first use; visiting the node here only needs to make
            // sure that has happened, without re-marking it dirty.
            self.ensure_in_register(ops, graph, alloc, node.dst, &[]);
            return;
        }

        let dest = match node.op {
            OpCode::Input => unreachable!("filtered out by emit()"),
            OpCode::Constant | OpCode::BoolConstant | OpCode::IntConstant => unreachable!("handled above"),

            OpCode::Add => {
                let ra = self.ensure_in_register(ops, graph, alloc, a(), &[]);
                let rb = self.ensure_in_register(ops, graph, alloc, b(), &[ra]);
                let dest = self.select_commutative(ops, alloc, ra, rb);
                self.isa.emit_add(ops, dest, rb);
                dest
            }
            OpCode::Sub => {
                let ra = self.ensure_in_register(ops, graph, alloc, a(), &[]);
                let rb = self.ensure_in_register(ops, graph, alloc, b(), &[ra]);
                let dest = self.select_noncommutative(ops, alloc, ra, rb);
                self.isa.emit_sub(ops, dest, rb);
                dest
            }
            OpCode::Mul => {
                let ra = self.ensure_in_register(ops, graph, alloc, a(), &[]);
                let rb = self.ensure_in_register(ops, graph, alloc, b(), &[ra]);
                let dest = self.select_commutative(ops, alloc, ra, rb);
                self.isa.emit_mul(ops, dest, rb);
                dest
            }
            OpCode::Div => {
                let ra = self.ensure_in_register(ops, graph, alloc, a(), &[]);
                let rb = self.ensure_in_register(ops, graph, alloc, b(), &[ra]);
                let dest = self.select_noncommutative(ops, alloc, ra, rb);
                self.isa.emit_div(ops, dest, rb);
                dest
            }
            OpCode::Mod => {
                let ra = self.ensure_in_register(ops, graph, alloc, a(), &[]);
                let rb = self.ensure_in_register(ops, graph, alloc, b(), &[ra]);
                self.emit_mod(ops, alloc, ra, rb)
            }
            OpCode::Neg => {
                let ra = self.ensure_in_register(ops, graph, alloc, a(), &[]);
                let dest = self.fresh_dest(ops, alloc, &[ra]);
                self.isa.emit_create_all_ones(ops, dest);
                self.isa.emit_shift_left(ops, dest, 63);
                self.isa.emit_xor(ops, dest, ra);
                dest
            }
            OpCode::Abs => {
                let ra = self.ensure_in_register(ops, graph, alloc, a(), &[]);
                let dest = self.fresh_dest(ops, alloc, &[ra]);
                self.isa.emit_create_all_ones(ops, dest);
                self.isa.emit_shift_right(ops, dest, 1);
                self.isa.emit_and(ops, dest, ra);
                dest
            }
            OpCode::Square => {
                let ra = self.ensure_in_register(ops, graph, alloc, a(), &[]);
                let dest = self.fresh_dest(ops, alloc, &[ra]);
                self.isa.emit_square(ops, dest, ra);
                dest
            }
            OpCode::Recip => {
                let ra = self.ensure_in_register(ops, graph, alloc, a(), &[]);
                let dest = self.fresh_dest(ops, alloc, &[ra]);
                self.isa.emit_load_immediate(ops, dest, 1.0);
                self.isa.emit_div(ops, dest, ra);
                dest
            }
            OpCode::Sqrt => {
                let ra = self.ensure_in_register(ops, graph, alloc, a(), &[]);
                let dest = self.fresh_dest(ops, alloc, &[ra]);
                self.isa.emit_sqrt(ops, dest, ra);
                dest
            }
            OpCode::Min => {
                let ra = self.ensure_in_register(ops, graph, alloc, a(), &[]);
                let rb = self.ensure_in_register(ops, graph, alloc, b(), &[ra]);
                let dest = self.fresh_dest(ops, alloc, &[ra, rb]);
                self.isa.emit_min(ops, dest, ra, rb);
                dest
            }
            OpCode::Max => {
                let ra = self.ensure_in_register(ops, graph, alloc, a(), &[]);
                let rb = self.ensure_in_register(ops, graph, alloc, b(), &[ra]);
                let dest = self.fresh_dest(ops, alloc, &[ra, rb]);
                self.isa.emit_max(ops, dest, ra, rb);
                dest
            }

            OpCode::Exp | OpCode::Log | OpCode::Sin | OpCode::Cos | OpCode::Tan => {
                let ra = self.ensure_in_register(ops, graph, alloc, a(), &[]);
                let dest = self.fresh_dest(ops, alloc, &[ra]);
                let count = self.isa.transcendental_scratch_count();
                let mut avoid = vec![ra, dest];
                let mut scratch = Vec::with_capacity(count);
                for _ in 0..count {
                    let r = self.fresh_dest(ops, alloc, &avoid);
                    avoid.push(r);
                    scratch.push(r);
                }
                match node.op {
                    OpCode::Exp => self.isa.emit_exp(ops, dest, ra, &scratch),
                    OpCode::Log => self.isa.emit_log(ops, dest, ra, &scratch),
                    OpCode::Sin => self.isa.emit_sin(ops, dest, ra, &scratch),
                    OpCode::Cos => self.isa.emit_cos(ops, dest, ra, &scratch),
                    OpCode::Tan => self.isa.emit_tan(ops, dest, ra, &scratch),
                    _ => unreachable!(),
                }
                dest
            }
            OpCode::Pow => {
                let ra = self.ensure_in_register(ops, graph, alloc, a(), &[]);
                let rb = self.ensure_in_register(ops, graph, alloc, b(), &[ra]);
                let dest = self.fresh_dest(ops, alloc, &[ra, rb]);
                let count = self.isa.transcendental_scratch_count();
                let mut avoid = vec![ra, rb, dest];
                let mut scratch = Vec::with_capacity(count);
                for _ in 0..count {
                    let r = self.fresh_dest(ops, alloc, &avoid);
                    avoid.push(r);
                    scratch.push(r);
                }
                self.isa.emit_pow(ops, dest, ra, rb, &scratch);
                dest
            }

            OpCode::CmpLT => self.real_cmp(ops, graph, alloc, a(), b(), Predicate::Lt),
            OpCode::CmpLE => self.real_cmp(ops, graph, alloc, a(), b(), Predicate::Le),
            OpCode::CmpGT => self.real_cmp(ops, graph, alloc, a(), b(), Predicate::Gt),
            OpCode::CmpGE => self.real_cmp(ops, graph, alloc, a(), b(), Predicate::Ge),
            OpCode::CmpEQ => self.real_cmp(ops, graph, alloc, a(), b(), Predicate::Eq),
            OpCode::CmpNE => self.real_cmp(ops, graph, alloc, a(), b(), Predicate::Ne),

            OpCode::If => {
                let rcond = self.ensure_in_register(ops, graph, alloc, a(), &[]);
                let rt = self.ensure_in_register(ops, graph, alloc, b(), &[rcond]);
                let rf = self.ensure_in_register(ops, graph, alloc, c(), &[rcond, rt]);
                self.emit_conditional(ops, alloc, rcond, rt, rf)
            }

            OpCode::BoolAnd => {
                let ra = self.ensure_in_register(ops, graph, alloc, a(), &[]);
                let rb = self.ensure_in_register(ops, graph, alloc, b(), &[ra]);
                let dest = self.select_commutative(ops, alloc, ra, rb);
                self.isa.emit_mul(ops, dest, rb);
                dest
            }
            OpCode::BoolOr => {
                let ra = self.ensure_in_register(ops, graph, alloc, a(), &[]);
                let rb = self.ensure_in_register(ops, graph, alloc, b(), &[ra]);
                let dest = self.select_commutative(ops, alloc, ra, rb);
                let t = self.fresh_dest(ops, alloc, &[ra, rb, dest]);
                self.isa.emit_move(ops, t, ra);
                self.isa.emit_mul(ops, t, rb);
                self.isa.emit_add(ops, dest, rb);
                self.isa.emit_sub(ops, dest, t);
                dest
            }
            OpCode::BoolNot => {
                let ra = self.ensure_in_register(ops, graph, alloc, a(), &[]);
                let dest = self.fresh_dest(ops, alloc, &[ra]);
                self.isa.emit_load_immediate(ops, dest, 1.0);
                self.isa.emit_sub(ops, dest, ra);
                dest
            }
            OpCode::BoolEq => self.real_cmp(ops, graph, alloc, a(), b(), Predicate::Eq),
            OpCode::BoolNe => self.real_cmp(ops, graph, alloc, a(), b(), Predicate::Ne),

            OpCode::IntAdd => self.int_binary(ops, graph, alloc, a(), b(), |isa, ops, d, s| isa.emit_add(ops, d, s)),
            OpCode::IntSub => self.int_binary(ops, graph, alloc, a(), b(), |isa, ops, d, s| isa.emit_sub(ops, d, s)),
            OpCode::IntMul => self.int_binary(ops, graph, alloc, a(), b(), |isa, ops, d, s| isa.emit_mul(ops, d, s)),
            OpCode::IntDiv => self.int_binary(ops, graph, alloc, a(), b(), |isa, ops, d, s| isa.emit_div(ops, d, s)),
            OpCode::IntMod => {
                let ra = self.ensure_in_register(ops, graph, alloc, a(), &[]);
                let rb = self.ensure_in_register(ops, graph, alloc, b(), &[ra]);
                let ta = self.truncate(ops, alloc, ra, &[ra, rb]);
                let tb = self.truncate(ops, alloc, rb, &[ra, rb, ta]);
                let dest = self.emit_mod(ops, alloc, ta, tb);
                self.isa.emit_round_trunc(ops, dest, dest);
                dest
            }
            OpCode::IntNeg => {
                let ra = self.ensure_in_register(ops, graph, alloc, a(), &[]);
                let ta = self.truncate(ops, alloc, ra, &[ra]);
                let dest = self.fresh_dest(ops, alloc, &[ra, ta]);
                self.isa.emit_create_all_ones(ops, dest);
                self.isa.emit_shift_left(ops, dest, 63);
                self.isa.emit_xor(ops, dest, ta);
                dest
            }

            OpCode::IntCmpLT => self.int_cmp(ops, graph, alloc, a(), b(), Predicate::Lt),
            OpCode::IntCmpLE => self.int_cmp(ops, graph, alloc, a(), b(), Predicate::Le),
            OpCode::IntCmpGT => self.int_cmp(ops, graph, alloc, a(), b(), Predicate::Gt),
            OpCode::IntCmpGE => self.int_cmp(ops, graph, alloc, a(), b(), Predicate::Ge),
            OpCode::IntCmpEQ => self.int_cmp(ops, graph, alloc, a(), b(), Predicate::Eq),
            OpCode::IntCmpNE => self.int_cmp(ops, graph, alloc, a(), b(), Predicate::Ne),

            OpCode::IntIf => {
                let rcond = self.ensure_in_register(ops, graph, alloc, a(), &[]);
                let rt = self.ensure_in_register(ops, graph, alloc, b(), &[rcond]);
                let rf = self.ensure_in_register(ops, graph, alloc, c(), &[rcond, rt]);
                self.emit_conditional(ops, alloc, rcond, rt, rf)
            }

            // Reserved, never emitted by the recorder (array indexing is
            // lowered to an If-chain at recording time). Falls through to
            // the unimplemented-opcode path below so a stray occurrence is
            // numerically visible rather than a silent miscompile.
            OpCode::ArrayIndex => {
                let dest = self.fresh_dest(ops, alloc, &[]);
                self.isa.emit_zero(ops, dest);
                self.isa.emit_div(ops, dest, dest);
                dest
            }
        };

        alloc.set_register(dest, node.dst, true);
    }

    fn real_cmp(
        &self,
        ops: &mut Assembler,
        graph: &Graph,
        alloc: &mut RegisterAllocator,
        a: NodeId,
        b: NodeId,
        pred: Predicate,
    ) -> RegIdx {
        let ra = self.ensure_in_register(ops, graph, alloc, a, &[]);
        let rb = self.ensure_in_register(ops, graph, alloc, b, &[ra]);
        self.emit_real_cmp(ops, alloc, ra, rb, pred)
    }

    fn int_cmp(
        &self,
        ops: &mut Assembler,
        graph: &Graph,
        alloc: &mut RegisterAllocator,
        a: NodeId,
        b: NodeId,
        pred: Predicate,
    ) -> RegIdx {
        let ra = self.ensure_in_register(ops, graph, alloc, a, &[]);
        let rb = self.ensure_in_register(ops, graph, alloc, b, &[ra]);
        let ta = self.truncate(ops, alloc, ra, &[ra, rb]);
        let tb = self.truncate(ops, alloc, rb, &[ra, rb, ta]);
        self.emit_real_cmp(ops, alloc, ta, tb, pred)
    }

    fn int_binary<F>(
        &self,
        ops: &mut Assembler,
        graph: &Graph,
        alloc: &mut RegisterAllocator,
        a: NodeId,
        b: NodeId,
        op: F,
    ) -> RegIdx
    where
        F: Fn(&dyn InstructionSet, &mut Assembler, RegIdx, RegIdx),
    {
        let ra = self.ensure_in_register(ops, graph, alloc, a, &[]);
        let rb = self.ensure_in_register(ops, graph, alloc, b, &[ra]);
        let ta = self.truncate(ops, alloc, ra, &[ra, rb]);
        let tb = self.truncate(ops, alloc, rb, &[ra, rb, ta]);
        op(self.isa, ops, ta, tb);
        self.isa.emit_round_trunc(ops, ta, ta);
        ta
    }
}
