//! Constant pool layout (spec §4.3).
//!
//! A deduplicated, aligned scratch region holding every distinct double
//! literal a graph references, plus a map from the node that first
//! introduced each value to its byte offset. Zero is special-cased: it is
//! never given a slot because both instruction sets can materialise it with
//! a single `xorpd`/`vxorpd` against itself.

use std::collections::HashMap;

use forge_ir::{Graph, NodeId, OpCode};

/// Byte alignment of pool entries: one SSE2 lane (8 bytes) is always
/// sufficient for correctness, but AVX2 broadcasts request 32-byte aligned
/// storage so a single `vbroadcastsd`/aligned `vmovapd` can source it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolAlignment {
    /// 16-byte aligned entries, one double wide (SSE2 scalar kernels).
    Sixteen,
    /// 32-byte aligned entries, broadcast four-wide (AVX2 packed kernels).
    ThirtyTwo,
}

impl PoolAlignment {
    fn bytes(self) -> usize {
        match self {
            PoolAlignment::Sixteen => 16,
            PoolAlignment::ThirtyTwo => 32,
        }
    }

    /// Bytes occupied by a single pool entry once broadcast/padded.
    fn entry_size(self) -> usize {
        match self {
            PoolAlignment::Sixteen => 8,
            PoolAlignment::ThirtyTwo => 32,
        }
    }
}

/// A planned constant pool: deduplicated values in emission order, plus the
/// byte offset (from the start of the pool region) backing each one.
#[derive(Debug, Clone, Default)]
pub struct ConstPoolPlan {
    /// Values in the order they will be written into the pool region,
    /// already deduplicated. Does not include zero.
    pub values: Vec<f64>,
    /// Byte offsets for each entry in `values`, matching alignment.
    offsets: Vec<usize>,
    /// NodeId -> index into `values`/`offsets`, for every Constant node
    /// whose value is nonzero.
    node_to_slot: HashMap<NodeId, usize>,
}

impl ConstPoolPlan {
    /// Walks every Constant node in `graph`, assigns pool slots to the
    /// distinct nonzero values it references (zero is never pooled), and
    /// returns the plan.
    pub fn build(graph: &Graph, alignment: PoolAlignment) -> Self {
        let mut values: Vec<f64> = Vec::new();
        let mut offsets: Vec<usize> = Vec::new();
        let mut node_to_slot = HashMap::new();
        let mut seen: HashMap<u64, usize> = HashMap::new();

        for node in &graph.nodes {
            if node.op != OpCode::Constant {
                continue;
            }
            let pool_index = node.imm as usize;
            let value = graph.const_pool[pool_index];
            if value == 0.0 {
                continue;
            }

            let bits = value.to_bits();
            let slot = *seen.entry(bits).or_insert_with(|| {
                let offset = values.len() * alignment.entry_size();
                values.push(value);
                offsets.push(offset);
                values.len() - 1
            });
            node_to_slot.insert(node.dst, slot);
        }

        log::trace!(
            "const_pool: {} distinct nonzero constants, {} bytes",
            values.len(),
            values.len() * alignment.entry_size()
        );

        Self {
            values,
            offsets,
            node_to_slot,
        }
    }

    /// Byte offset of `node`'s constant within the pool region, if it has a
    /// nonzero value (callers must special-case zero separately).
    pub fn offset_of(&self, node: NodeId) -> Option<usize> {
        self.node_to_slot
            .get(&node)
            .map(|&slot| self.offsets[slot])
    }

    /// Total size in bytes of the pool region.
    pub fn size_bytes(&self, alignment: PoolAlignment) -> usize {
        self.values.len() * alignment.entry_size()
    }

    /// The pool's required base alignment.
    pub fn base_alignment(alignment: PoolAlignment) -> usize {
        alignment.bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_ir::OpCode;

    fn graph_with_constants(values: &[f64]) -> Graph {
        let mut g = Graph::new();
        for &v in values {
            g.add_constant(v).unwrap();
        }
        g
    }

    #[test]
    fn zero_never_gets_a_slot() {
        let g = graph_with_constants(&[0.0, 1.0, 0.0, 2.0]);
        let plan = ConstPoolPlan::build(&g, PoolAlignment::Sixteen);
        assert_eq!(plan.values, vec![1.0, 2.0]);
    }

    #[test]
    fn equal_constants_share_a_slot() {
        let g = graph_with_constants(&[3.0, 3.0]);
        let plan = ConstPoolPlan::build(&g, PoolAlignment::Sixteen);
        assert_eq!(plan.values, vec![3.0]);
        let ids: Vec<NodeId> = g
            .nodes
            .iter()
            .filter(|n| n.op == OpCode::Constant)
            .map(|n| n.dst)
            .collect();
        assert_eq!(plan.offset_of(ids[0]), plan.offset_of(ids[1]));
    }

    #[test]
    fn avx2_entries_are_32_bytes_apart() {
        let g = graph_with_constants(&[1.0, 2.0]);
        let plan = ConstPoolPlan::build(&g, PoolAlignment::ThirtyTwo);
        let ids: Vec<NodeId> = g
            .nodes
            .iter()
            .filter(|n| n.op == OpCode::Constant)
            .map(|n| n.dst)
            .collect();
        assert_eq!(plan.offset_of(ids[0]).unwrap(), 0);
        assert_eq!(plan.offset_of(ids[1]).unwrap(), 32);
    }

}
