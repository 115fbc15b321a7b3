//! Reverse-mode adjoint emitter (spec §4.7): seeds each differentiated
//! output's adjoint with 1.0, then walks the graph backward accumulating
//! partial derivatives into every operand's adjoint slot.

use dynasmrt::x64::Assembler;

use forge_ir::{Graph, Node, NodeId, OpCode};

use crate::isa::InstructionSet;
use crate::register::{RegIdx, RegisterAllocator};

/// Drives the reverse pass. Like [`crate::forward::ForwardEmitter`], uses a
/// fresh register allocator since live ranges do not cross the pass
/// boundary: every value the reverse pass needs (forward results, adjoints)
/// is read back from the buffer rather than assumed still resident.
pub struct ReverseEmitter<'a> {
    isa: &'a dyn InstructionSet,
    num_nodes: u32,
}

impl<'a> ReverseEmitter<'a> {
    /// Creates an emitter targeting `isa` for a graph of `num_nodes` nodes
    /// (the adjoint region starts at buffer offset `num_nodes`).
    pub fn new(isa: &'a dyn InstructionSet, num_nodes: u32) -> Self {
        Self { isa, num_nodes }
    }

    /// Emits the seed step and the full backward accumulation.
    pub fn emit(&mut self, ops: &mut Assembler, graph: &Graph) {
        let mut alloc = RegisterAllocator::new();

        for &output in &graph.outputs {
            let one = self.fresh(ops, &mut alloc, &[]);
            self.isa.emit_load_immediate(ops, one, 1.0);
            self.isa.emit_store_adjoint(ops, one, output, self.num_nodes);
        }

        for node in graph.nodes.iter().rev() {
            if node.is_dead || !node.op.has_derivative() {
                continue;
            }
            self.emit_node_adjoint(ops, graph, &mut alloc, node);
        }
    }

    fn fresh(&self, ops: &mut Assembler, alloc: &mut RegisterAllocator, avoid: &[RegIdx]) -> RegIdx {
        let allocation = alloc.allocate_avoiding(avoid);
        if let Some(spill) = allocation.spill {
            self.isa.emit_store_adjoint(ops, allocation.reg, spill, self.num_nodes);
        }
        allocation.reg
    }

    fn load_value(&self, ops: &mut Assembler, alloc: &mut RegisterAllocator, node: NodeId, avoid: &[RegIdx]) -> RegIdx {
        let reg = self.fresh(ops, alloc, avoid);
        self.isa.emit_load(ops, reg, node);
        reg
    }

    fn load_adjoint(&self, ops: &mut Assembler, alloc: &mut RegisterAllocator, node: NodeId, avoid: &[RegIdx]) -> RegIdx {
        let reg = self.fresh(ops, alloc, avoid);
        self.isa.emit_load_adjoint(ops, reg, node, self.num_nodes);
        reg
    }

    /// Adds `contribution` to `operand`'s adjoint slot.
    fn accumulate(&self, ops: &mut Assembler, alloc: &mut RegisterAllocator, operand: NodeId, contribution: RegIdx) {
        let tmp = self.fresh(ops, alloc, &[contribution]);
        self.isa.emit_accumulate_adjoint(ops, contribution, operand, self.num_nodes, tmp);
    }

    fn emit_node_adjoint(&self, ops: &mut Assembler, graph: &Graph, alloc: &mut RegisterAllocator, node: &Node) {
        let seed = self.load_adjoint(ops, alloc, node.dst, &[]);

        match node.op {
            OpCode::Add => {
                self.accumulate(ops, alloc, node.a, seed);
                self.accumulate(ops, alloc, node.b, seed);
            }
            OpCode::Sub => {
                self.accumulate(ops, alloc, node.a, seed);
                let neg = self.negate(ops, alloc, seed);
                self.accumulate(ops, alloc, node.b, neg);
            }
            OpCode::Mul => {
                let b_val = self.load_value(ops, alloc, node.b, &[seed]);
                let contrib_a = self.fresh(ops, alloc, &[seed, b_val]);
                self.isa.emit_move(ops, contrib_a, seed);
                self.isa.emit_mul(ops, contrib_a, b_val);
                self.accumulate(ops, alloc, node.a, contrib_a);

                let a_val = self.load_value(ops, alloc, node.a, &[seed]);
                let contrib_b = self.fresh(ops, alloc, &[seed, a_val]);
                self.isa.emit_move(ops, contrib_b, seed);
                self.isa.emit_mul(ops, contrib_b, a_val);
                self.accumulate(ops, alloc, node.b, contrib_b);
            }
            OpCode::Div => {
                // d/da (a/b) = 1/b ; d/db (a/b) = -a/b^2
                let b_val = self.load_value(ops, alloc, node.b, &[seed]);
                let contrib_a = self.fresh(ops, alloc, &[seed, b_val]);
                self.isa.emit_move(ops, contrib_a, seed);
                self.isa.emit_div(ops, contrib_a, b_val);
                self.accumulate(ops, alloc, node.a, contrib_a);

                let a_val = self.load_value(ops, alloc, node.a, &[seed, b_val]);
                let b2 = self.fresh(ops, alloc, &[seed, b_val, a_val]);
                self.isa.emit_square(ops, b2, b_val);
                let ratio = self.fresh(ops, alloc, &[seed, b_val, a_val, b2]);
                self.isa.emit_move(ops, ratio, a_val);
                self.isa.emit_div(ops, ratio, b2);
                let contrib_b = self.fresh(ops, alloc, &[seed, ratio]);
                self.isa.emit_move(ops, contrib_b, seed);
                self.isa.emit_mul(ops, contrib_b, ratio);
                let neg = self.negate(ops, alloc, contrib_b);
                self.accumulate(ops, alloc, node.b, neg);
            }
            OpCode::Neg => {
                let neg = self.negate(ops, alloc, seed);
                self.accumulate(ops, alloc, node.a, neg);
            }
            OpCode::Abs => {
                // d/da |a| = sign(a); reuse the source value's sign bit
                // against the seed rather than materialising `sign()`.
                let a_val = self.load_value(ops, alloc, node.a, &[seed]);
                let sign_mask = self.fresh(ops, alloc, &[seed, a_val]);
                self.isa.emit_create_all_ones(ops, sign_mask);
                self.isa.emit_shift_left(ops, sign_mask, 63);
                self.isa.emit_and(ops, sign_mask, a_val);
                let contrib = self.fresh(ops, alloc, &[seed, a_val, sign_mask]);
                self.isa.emit_move(ops, contrib, seed);
                self.isa.emit_xor(ops, contrib, sign_mask);
                self.accumulate(ops, alloc, node.a, contrib);
            }
            OpCode::Square => {
                // d/da a^2 = 2a
                let a_val = self.load_value(ops, alloc, node.a, &[seed]);
                let two_a = self.fresh(ops, alloc, &[seed, a_val]);
                self.isa.emit_move(ops, two_a, a_val);
                self.isa.emit_add(ops, two_a, a_val);
                let contrib = self.fresh(ops, alloc, &[seed, two_a]);
                self.isa.emit_move(ops, contrib, seed);
                self.isa.emit_mul(ops, contrib, two_a);
                self.accumulate(ops, alloc, node.a, contrib);
            }
            OpCode::Recip => {
                // d/da (1/a) = -1/a^2
                let result = self.load_value(ops, alloc, node.dst, &[seed]);
                let sq = self.fresh(ops, alloc, &[seed, result]);
                self.isa.emit_square(ops, sq, result);
                let contrib = self.fresh(ops, alloc, &[seed, sq]);
                self.isa.emit_move(ops, contrib, seed);
                self.isa.emit_mul(ops, contrib, sq);
                let neg = self.negate(ops, alloc, contrib);
                self.accumulate(ops, alloc, node.a, neg);
            }
            OpCode::Sqrt => {
                // d/da sqrt(a) = 1 / (2*sqrt(a)) = 1 / (2*result)
                let result = self.load_value(ops, alloc, node.dst, &[seed]);
                let two_r = self.fresh(ops, alloc, &[seed, result]);
                self.isa.emit_move(ops, two_r, result);
                self.isa.emit_add(ops, two_r, result);
                let contrib = self.fresh(ops, alloc, &[seed, two_r]);
                self.isa.emit_move(ops, contrib, seed);
                self.isa.emit_div(ops, contrib, two_r);
                self.accumulate(ops, alloc, node.a, contrib);
            }
            OpCode::Mod => {
                // a mod b is piecewise linear in a with slope 1 almost
                // everywhere; treat like Sub's left term and drop b's
                // (measure-zero, discontinuous) contribution.
                self.accumulate(ops, alloc, node.a, seed);
            }
            OpCode::Exp => {
                let result = self.load_value(ops, alloc, node.dst, &[seed]);
                let contrib = self.fresh(ops, alloc, &[seed, result]);
                self.isa.emit_move(ops, contrib, seed);
                self.isa.emit_mul(ops, contrib, result);
                self.accumulate(ops, alloc, node.a, contrib);
            }
            OpCode::Log => {
                let a_val = self.load_value(ops, alloc, node.a, &[seed]);
                let contrib = self.fresh(ops, alloc, &[seed, a_val]);
                self.isa.emit_move(ops, contrib, seed);
                self.isa.emit_div(ops, contrib, a_val);
                self.accumulate(ops, alloc, node.a, contrib);
            }
            OpCode::Sin => {
                let a_val = self.load_value(ops, alloc, node.a, &[seed]);
                let cos_val = self.fresh(ops, alloc, &[seed, a_val]);
                let scratch = self.scratch_set(ops, alloc, &[seed, a_val, cos_val]);
                self.isa.emit_cos(ops, cos_val, a_val, &scratch);
                let contrib = self.fresh(ops, alloc, &[seed, cos_val]);
                self.isa.emit_move(ops, contrib, seed);
                self.isa.emit_mul(ops, contrib, cos_val);
                self.accumulate(ops, alloc, node.a, contrib);
            }
            OpCode::Cos => {
                let a_val = self.load_value(ops, alloc, node.a, &[seed]);
                let sin_val = self.fresh(ops, alloc, &[seed, a_val]);
                let scratch = self.scratch_set(ops, alloc, &[seed, a_val, sin_val]);
                self.isa.emit_sin(ops, sin_val, a_val, &scratch);
                let contrib = self.fresh(ops, alloc, &[seed, sin_val]);
                self.isa.emit_move(ops, contrib, seed);
                self.isa.emit_mul(ops, contrib, sin_val);
                let neg = self.negate(ops, alloc, contrib);
                self.accumulate(ops, alloc, node.a, neg);
            }
            OpCode::Tan => {
                // d/da tan(a) = 1 + tan(a)^2
                let result = self.load_value(ops, alloc, node.dst, &[seed]);
                let sq = self.fresh(ops, alloc, &[seed, result]);
                self.isa.emit_square(ops, sq, result);
                let one = self.fresh(ops, alloc, &[seed, sq]);
                self.isa.emit_load_immediate(ops, one, 1.0);
                self.isa.emit_add(ops, sq, one);
                let contrib = self.fresh(ops, alloc, &[seed, sq]);
                self.isa.emit_move(ops, contrib, seed);
                self.isa.emit_mul(ops, contrib, sq);
                self.accumulate(ops, alloc, node.a, contrib);
            }
            OpCode::Pow => {
                // d/d(base) = exp * base^(exp-1) = exp * result / base
                // d/d(exp)  = result * log(base)
                let base = self.load_value(ops, alloc, node.a, &[seed]);
                let exp = self.load_value(ops, alloc, node.b, &[seed, base]);
                let result = self.load_value(ops, alloc, node.dst, &[seed, base, exp]);

                let d_base = self.fresh(ops, alloc, &[seed, base, exp, result]);
                self.isa.emit_move(ops, d_base, result);
                self.isa.emit_mul(ops, d_base, exp);
                self.isa.emit_div(ops, d_base, base);
                let contrib_base = self.fresh(ops, alloc, &[seed, d_base]);
                self.isa.emit_move(ops, contrib_base, seed);
                self.isa.emit_mul(ops, contrib_base, d_base);
                self.accumulate(ops, alloc, node.a, contrib_base);

                let log_base = self.fresh(ops, alloc, &[seed, base, exp, result]);
                let scratch = self.scratch_set(ops, alloc, &[seed, base, exp, result, log_base]);
                self.isa.emit_log(ops, log_base, base, &scratch);
                let d_exp = self.fresh(ops, alloc, &[seed, result, log_base]);
                self.isa.emit_move(ops, d_exp, result);
                self.isa.emit_mul(ops, d_exp, log_base);
                let contrib_exp = self.fresh(ops, alloc, &[seed, d_exp]);
                self.isa.emit_move(ops, contrib_exp, seed);
                self.isa.emit_mul(ops, contrib_exp, d_exp);
                self.accumulate(ops, alloc, node.b, contrib_exp);
            }
            OpCode::Min | OpCode::Max => {
                // Propagate along whichever operand the forward pass
                // actually selected, recomputed here via the same
                // comparison rather than trusting any stashed selector.
                let a_val = self.load_value(ops, alloc, node.a, &[seed]);
                let b_val = self.load_value(ops, alloc, node.b, &[seed, a_val]);
                let pred = if node.op == OpCode::Min {
                    crate::isa::Predicate::Lt
                } else {
                    crate::isa::Predicate::Gt
                };
                let mask = self.fresh(ops, alloc, &[seed, a_val, b_val]);
                self.isa.emit_cmp_mask(ops, mask, a_val, b_val, pred);
                let zero = self.fresh(ops, alloc, &[seed, a_val, b_val, mask]);
                self.isa.emit_zero(ops, zero);
                let tmp = self.fresh(ops, alloc, &[seed, a_val, b_val, mask, zero]);

                let contrib_a = self.fresh(ops, alloc, &[seed, a_val, b_val, mask, zero, tmp]);
                self.isa.emit_select(ops, contrib_a, mask, seed, zero, tmp);
                self.accumulate(ops, alloc, node.a, contrib_a);

                let contrib_b = self.fresh(ops, alloc, &[seed, a_val, b_val, mask, zero, tmp]);
                self.isa.emit_select(ops, contrib_b, mask, zero, seed, tmp);
                self.accumulate(ops, alloc, node.b, contrib_b);
            }
            OpCode::If | OpCode::IntIf => {
                let cond = self.load_value(ops, alloc, node.a, &[seed]);
                let zero = self.fresh(ops, alloc, &[seed, cond]);
                self.isa.emit_zero(ops, zero);
                let mask = self.fresh(ops, alloc, &[seed, cond, zero]);
                self.isa.emit_cmp_mask(ops, mask, cond, zero, crate::isa::Predicate::Ne);
                let tmp = self.fresh(ops, alloc, &[seed, cond, zero, mask]);

                let contrib_t = self.fresh(ops, alloc, &[seed, cond, zero, mask, tmp]);
                self.isa.emit_select(ops, contrib_t, mask, seed, zero, tmp);
                self.accumulate(ops, alloc, node.b, contrib_t);

                let contrib_f = self.fresh(ops, alloc, &[seed, cond, zero, mask, tmp]);
                self.isa.emit_select(ops, contrib_f, mask, zero, seed, tmp);
                self.accumulate(ops, alloc, node.c, contrib_f);
            }
            _ => {
                // Every other opcode with `has_derivative() == true` is
                // covered above; this arm only exists so new opcodes fail
                // loudly in review rather than silently dropping gradient.
                unreachable!("opcode {:?} claims a derivative but reverse.rs has no rule for it", node.op);
            }
        }
    }

    fn negate(&self, ops: &mut Assembler, alloc: &mut RegisterAllocator, src: RegIdx) -> RegIdx {
        let dest = self.fresh(ops, alloc, &[src]);
        self.isa.emit_create_all_ones(ops, dest);
        self.isa.emit_shift_left(ops, dest, 63);
        self.isa.emit_xor(ops, dest, src);
        dest
    }

    fn scratch_set(&self, ops: &mut Assembler, alloc: &mut RegisterAllocator, avoid: &[RegIdx]) -> Vec<RegIdx> {
        let count = self.isa.transcendental_scratch_count();
        let mut avoid = avoid.to_vec();
        let mut scratch = Vec::with_capacity(count);
        for _ in 0..count {
            let r = self.fresh(ops, alloc, &avoid);
            avoid.push(r);
            scratch.push(r);
        }
        scratch
    }
}
