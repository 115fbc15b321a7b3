use crate::error::{Error, Result};
use crate::node::{Node, NodeId, OpCode};

/// Immutable-after-`stop` record of a recorded expression graph.
///
/// A bag of arrays, in the teacher's style (compare
/// `sunscreen_frontend_types::FrontendCompilation`, which wraps a single
/// `petgraph::StableGraph`): `nodes`, `const_pool`, `outputs`, and
/// `diff_inputs`. Node ids are dense and double as value-buffer offsets, so
/// the store is a flat `Vec<Node>` rather than a general graph structure —
/// the topological-by-construction invariant (§3) falls directly out of
/// `add_node` only ever appending.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    /// Topologically ordered (by construction) operation list.
    pub nodes: Vec<Node>,
    /// Deduplicated pool of double literals; `Constant` nodes index into it.
    pub const_pool: Vec<f64>,
    /// Node ids marked as outputs, in the order they were marked.
    pub outputs: Vec<NodeId>,
    /// Input node ids also requiring a gradient, in mark order.
    pub diff_inputs: Vec<NodeId>,
}

impl Graph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether no nodes have been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of nodes recorded so far.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Looks up a node by id. Panics if `id` is out of range; callers never
    /// hold a `NodeId` that didn't come from this graph.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id as usize]
    }

    /// Appends `node`, stamping its `dst` with the freshly assigned id.
    ///
    /// Validates the topologicality invariant: every operand the opcode
    /// actually uses must already be present (id strictly less than the new
    /// node's own id).
    pub fn add_node(&mut self, mut node: Node) -> Result<NodeId> {
        let id = self.nodes.len() as NodeId;

        for &slot in node.op.operands() {
            let operand = match slot {
                0 => node.a,
                1 => node.b,
                _ => node.c,
            };
            if operand >= id {
                return Err(Error::OperandOutOfRange {
                    node: id,
                    operand,
                });
            }
        }

        node.dst = id;
        self.nodes.push(node);
        log::trace!("graph: appended node {id} ({:?})", self.nodes[id as usize].op);
        Ok(id)
    }

    /// Appends a `Constant` node, pushing `value` into the constant pool
    /// unless an identical value is already there (teacher's
    /// `Context::add_literal` dedups the same way).
    pub fn add_constant(&mut self, value: f64) -> Result<NodeId> {
        let index = match self.const_pool.iter().position(|&v| v.to_bits() == value.to_bits()) {
            Some(i) => i,
            None => {
                self.const_pool.push(value);
                self.const_pool.len() - 1
            }
        };

        let mut node = Node::new(OpCode::Constant);
        node.imm = index as f64;
        node.is_active = false;
        self.add_node(node)
    }

    /// Appends a boolean constant (0.0 or 1.0 stored directly in `imm`, no
    /// pool entry — booleans are small enough to inline).
    pub fn add_bool_constant(&mut self, value: bool) -> Result<NodeId> {
        let mut node = Node::new(OpCode::BoolConstant);
        node.imm = if value { 1.0 } else { 0.0 };
        node.is_active = false;
        self.add_node(node)
    }

    /// Appends an integer constant, stored as a double in `imm`.
    pub fn add_int_constant(&mut self, value: i64) -> Result<NodeId> {
        let mut node = Node::new(OpCode::IntConstant);
        node.imm = value as f64;
        node.is_active = false;
        self.add_node(node)
    }

    /// Appends an `Input` node and records it in the input list (tracked
    /// implicitly: every `Input` node in `nodes` is an input; there is no
    /// separate input list because the graph only needs it for codegen,
    /// which walks `nodes` directly).
    pub fn add_input(&mut self) -> Result<NodeId> {
        let mut node = Node::new(OpCode::Input);
        node.is_active = true;
        self.add_node(node)
    }

    /// Appends an `Input` node seeded for differentiation and records it in
    /// `diff_inputs`.
    pub fn add_diff_input(&mut self) -> Result<NodeId> {
        let mut node = Node::new(OpCode::Input);
        node.is_active = true;
        node.needs_gradient = true;
        let id = self.add_node(node)?;
        self.diff_inputs.push(id);
        Ok(id)
    }

    /// Appends a one-operand node, propagating `a`'s `is_active`/
    /// `needs_gradient` flags. Used by the façade crate, which cannot
    /// construct a bare [`Node`] itself (`Node::new` is crate-private here).
    pub fn add_unary(&mut self, op: OpCode, a: NodeId) -> Result<NodeId> {
        let mut node = Node::new(op);
        node.a = a;
        node.is_active = self.node(a).is_active;
        node.needs_gradient = self.node(a).needs_gradient;
        self.add_node(node)
    }

    /// Appends a two-operand node, propagating the OR of both operands'
    /// `is_active`/`needs_gradient` flags.
    pub fn add_binary(&mut self, op: OpCode, a: NodeId, b: NodeId) -> Result<NodeId> {
        let mut node = Node::new(op);
        node.a = a;
        node.b = b;
        node.is_active = self.node(a).is_active || self.node(b).is_active;
        node.needs_gradient = self.node(a).needs_gradient || self.node(b).needs_gradient;
        self.add_node(node)
    }

    /// Appends a three-operand `If`/`IntIf` node, propagating the OR of all
    /// three operands' flags.
    pub fn add_ternary(&mut self, op: OpCode, a: NodeId, b: NodeId, c: NodeId) -> Result<NodeId> {
        let mut node = Node::new(op);
        node.a = a;
        node.b = b;
        node.c = c;
        node.is_active = self.node(a).is_active || self.node(b).is_active || self.node(c).is_active;
        node.needs_gradient =
            self.node(a).needs_gradient || self.node(b).needs_gradient || self.node(c).needs_gradient;
        self.add_node(node)
    }

    /// Marks `node` as an output, in the order outputs are marked.
    pub fn mark_output(&mut self, node: NodeId) {
        self.outputs.push(node);
    }

    /// Resolves every `Constant` node's `imm` against `const_pool`, failing
    /// if any index is out of range. Called once by [`crate::Recorder::stop`].
    pub fn validate(&self) -> Result<()> {
        for node in &self.nodes {
            if node.op == OpCode::Constant {
                let index = node.imm as usize;
                if index >= self.const_pool.len() {
                    return Err(Error::InvalidConstPoolIndex {
                        node: node.dst,
                        index,
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_node_rejects_forward_reference() {
        let mut g = Graph::new();
        let x = g.add_input().unwrap();
        let mut bad = Node::new(OpCode::Add);
        bad.a = x;
        bad.b = x + 1; // does not exist yet
        assert!(matches!(g.add_node(bad), Err(Error::OperandOutOfRange { .. })));
    }

    #[test]
    fn constant_pool_dedups_equal_values() {
        let mut g = Graph::new();
        let a = g.add_constant(1.5).unwrap();
        let b = g.add_constant(1.5).unwrap();
        let c = g.add_constant(2.5).unwrap();
        assert_eq!(g.node(a).imm, g.node(b).imm);
        assert_ne!(g.node(a).imm, g.node(c).imm);
        assert_eq!(g.const_pool.len(), 2);
    }

    #[test]
    fn diff_input_is_tracked_separately() {
        let mut g = Graph::new();
        let x = g.add_input().unwrap();
        let y = g.add_diff_input().unwrap();
        assert_eq!(g.diff_inputs, vec![y]);
        assert!(!g.node(x).needs_gradient);
        assert!(g.node(y).needs_gradient);
    }

    #[test]
    fn validate_catches_out_of_range_const_pool_index() {
        let mut g = Graph::new();
        let mut bad = Node::new(OpCode::Constant);
        bad.imm = 3.0;
        g.add_node(bad).unwrap();
        assert!(matches!(g.validate(), Err(Error::InvalidConstPoolIndex { .. })));
    }
}
