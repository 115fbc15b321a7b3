//! Value buffer (spec §4.9): the flat, layout-aware storage a [`Kernel`]
//! reads and writes through its single `double*` argument.

use forge_ir::{Graph, NodeId};
use forge_jit::Kernel;

use crate::error::{Error, Result};

/// Per-node value (and optional gradient) storage, shaped to match a
/// specific [`Kernel`]'s vector width.
///
/// Layout mirrors spec §4.9 exactly: `num_nodes * vector_width` forward
/// slots, followed by an equally sized adjoint region when the kernel
/// carries a reverse pass. Each "slot" holds `vector_width` contiguous
/// `f64` lanes (1 for an SSE2-scalar kernel, 4 for an AVX2-packed one).
pub struct Buffer {
    data: Vec<f64>,
    num_nodes: usize,
    vector_width: usize,
    has_gradient: bool,
}

impl Buffer {
    /// Builds a buffer sized for `kernel`, validating that `graph` is the
    /// same shape the kernel was compiled from (spec: "factory that
    /// inspects the Graph for size and Kernel for lane width").
    pub fn new(graph: &Graph, kernel: &Kernel) -> Result<Self> {
        if graph.len() != kernel.num_nodes() {
            return Err(Error::NodeOutOfRange {
                node: graph.len() as u32,
                num_nodes: kernel.num_nodes(),
            });
        }

        let vector_width = kernel.instruction_set().vector_width();
        let num_nodes = kernel.num_nodes();
        let region_len = num_nodes * vector_width;
        let total = if kernel.has_gradient() { 2 * region_len } else { region_len };

        log::debug!(
            "buffer: allocating {num_nodes} nodes x {vector_width} lanes, gradient region = {}",
            kernel.has_gradient()
        );

        Ok(Self {
            data: vec![0.0; total],
            num_nodes,
            vector_width,
            has_gradient: kernel.has_gradient(),
        })
    }

    /// Number of nodes this buffer is shaped for.
    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    /// Lanes per slot (1 for scalar, 4 for AVX2-packed).
    pub fn vector_width(&self) -> usize {
        self.vector_width
    }

    /// Whether this buffer has an adjoint region at all.
    pub fn has_gradient(&self) -> bool {
        self.has_gradient
    }

    /// Invokes `kernel` against this buffer, after validating its shape
    /// matches (delegated to [`Kernel::execute_raw`]).
    pub fn execute(&mut self, kernel: &Kernel) -> Result<()> {
        // SAFETY: `self.data` is sized exactly `2 * num_nodes * vector_width`
        // (or half that with no gradient region) by `Buffer::new`, matching
        // the contract `Kernel::execute_raw` documents; the shape check
        // inside it catches any mismatch against a different kernel.
        unsafe {
            kernel.execute_raw(self.data.as_mut_ptr(), self.num_nodes, self.vector_width)?;
        }
        Ok(())
    }

    fn slot_offset(&self, node: NodeId) -> Result<usize> {
        let node = node as usize;
        if node >= self.num_nodes {
            return Err(Error::NodeOutOfRange {
                node: node as u32,
                num_nodes: self.num_nodes,
            });
        }
        Ok(node * self.vector_width)
    }

    fn adjoint_offset(&self, node: NodeId) -> Result<usize> {
        if !self.has_gradient {
            return Err(Error::NoGradientRegion { node });
        }
        let base = self.slot_offset(node)?;
        Ok(base + self.num_nodes * self.vector_width)
    }

    /// Sets a scalar value at `node`'s slot. Only valid for a vector width
    /// of 1 (an SSE2-scalar kernel's buffer); use [`Self::set_lanes`] for
    /// AVX2-packed buffers.
    pub fn set_value(&mut self, node: NodeId, value: f64) -> Result<()> {
        self.set_lanes(node, &[value])
    }

    /// Reads the scalar value at `node`'s slot. Only valid for a vector
    /// width of 1.
    pub fn get_value(&self, node: NodeId) -> Result<f64> {
        let mut out = [0.0];
        self.get_lanes(node, &mut out)?;
        Ok(out[0])
    }

    /// Writes `lanes` (one entry per SIMD lane) into `node`'s slot.
    pub fn set_lanes(&mut self, node: NodeId, lanes: &[f64]) -> Result<()> {
        self.check_lane_width(lanes.len())?;
        let offset = self.slot_offset(node)?;
        self.data[offset..offset + self.vector_width].copy_from_slice(lanes);
        Ok(())
    }

    /// Copies `node`'s slot into `out` (one entry per SIMD lane).
    pub fn get_lanes(&self, node: NodeId, out: &mut [f64]) -> Result<()> {
        self.check_lane_width(out.len())?;
        let offset = self.slot_offset(node)?;
        out.copy_from_slice(&self.data[offset..offset + self.vector_width]);
        Ok(())
    }

    /// Sets a scalar gradient at `node`'s adjoint slot. Only valid for a
    /// vector width of 1.
    pub fn set_gradient(&mut self, node: NodeId, value: f64) -> Result<()> {
        self.set_gradient_lanes(node, &[value])
    }

    /// Reads the scalar gradient at `node`'s adjoint slot. Only valid for a
    /// vector width of 1.
    pub fn get_gradient(&self, node: NodeId) -> Result<f64> {
        let mut out = [0.0];
        self.get_gradient_lanes(node, &mut out)?;
        Ok(out[0])
    }

    /// Writes `lanes` into `node`'s adjoint slot.
    pub fn set_gradient_lanes(&mut self, node: NodeId, lanes: &[f64]) -> Result<()> {
        self.check_lane_width(lanes.len())?;
        let offset = self.adjoint_offset(node)?;
        self.data[offset..offset + self.vector_width].copy_from_slice(lanes);
        Ok(())
    }

    /// Copies `node`'s adjoint slot into `out`.
    pub fn get_gradient_lanes(&self, node: NodeId, out: &mut [f64]) -> Result<()> {
        self.check_lane_width(out.len())?;
        let offset = self.adjoint_offset(node)?;
        out.copy_from_slice(&self.data[offset..offset + self.vector_width]);
        Ok(())
    }

    /// Zeros the entire adjoint region, ready for a fresh reverse pass with
    /// different seeds. A no-op (but not an error) on a buffer with no
    /// gradient region.
    pub fn clear_gradients(&mut self) {
        if !self.has_gradient {
            return;
        }
        let region_len = self.num_nodes * self.vector_width;
        self.data[region_len..].fill(0.0);
    }

    fn check_lane_width(&self, actual: usize) -> Result<()> {
        if actual != self.vector_width {
            return Err(Error::LaneWidthMismatch {
                expected: self.vector_width,
                actual,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use forge_ir::{Node, OpCode};
    use forge_jit::InstructionSetKind;

    use super::*;

    /// `y = 2*x + 3`, `x` a diff-input.
    fn linear_graph() -> Graph {
        let mut g = Graph::new();
        let x = g.add_diff_input().unwrap();
        let two = g.add_constant(2.0).unwrap();
        let three = g.add_constant(3.0).unwrap();
        let mut mul = Node::new(OpCode::Mul);
        mul.a = x;
        mul.b = two;
        let mul_id = g.add_node(mul).unwrap();
        let mut add = Node::new(OpCode::Add);
        add.a = mul_id;
        add.b = three;
        let y = g.add_node(add).unwrap();
        g.mark_output(y);
        g
    }

    #[test]
    fn scalar_buffer_round_trips_value_and_gradient() {
        let graph = linear_graph();
        let kernel = Kernel::compile(&graph, InstructionSetKind::Sse2Scalar).unwrap();
        let mut buffer = Buffer::new(&graph, &kernel).unwrap();

        buffer.set_value(0, 4.0).unwrap();
        buffer.execute(&kernel).unwrap();

        assert_eq!(buffer.get_value(4).unwrap(), 11.0);
        assert_eq!(buffer.get_gradient(0).unwrap(), 2.0);
    }

    #[test]
    fn rejects_lane_width_mismatch() {
        let graph = linear_graph();
        let kernel = Kernel::compile(&graph, InstructionSetKind::Sse2Scalar).unwrap();
        let mut buffer = Buffer::new(&graph, &kernel).unwrap();
        assert!(matches!(
            buffer.set_lanes(0, &[1.0, 2.0]),
            Err(Error::LaneWidthMismatch { .. })
        ));
    }

    #[test]
    fn rejects_out_of_range_node() {
        let graph = linear_graph();
        let kernel = Kernel::compile(&graph, InstructionSetKind::Sse2Scalar).unwrap();
        let buffer = Buffer::new(&graph, &kernel).unwrap();
        assert!(matches!(
            buffer.get_value(100),
            Err(Error::NodeOutOfRange { .. })
        ));
    }

    #[test]
    fn clear_gradients_zeros_adjoint_region() {
        let graph = linear_graph();
        let kernel = Kernel::compile(&graph, InstructionSetKind::Sse2Scalar).unwrap();
        let mut buffer = Buffer::new(&graph, &kernel).unwrap();

        buffer.set_value(0, 4.0).unwrap();
        buffer.execute(&kernel).unwrap();
        assert_eq!(buffer.get_gradient(0).unwrap(), 2.0);

        buffer.clear_gradients();
        assert_eq!(buffer.get_gradient(0).unwrap(), 0.0);
    }
}
