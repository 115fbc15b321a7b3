//! Compiled kernel object (spec §4.8): owns the executable code, its
//! read-only constant pool, and the metadata needed to validate a value
//! buffer before invoking the compiled entry point.

use std::mem;

use dynasmrt::{dynasm, x64::Assembler, AssemblyOffset, DynasmApi, DynasmLabelApi, ExecutableBuffer};

use forge_ir::Graph;

use crate::const_pool::{ConstPoolPlan, PoolAlignment};
use crate::error::{Error, Result};
use crate::forward::ForwardEmitter;
use crate::isa::{InstructionSet, InstructionSetKind};
use crate::reverse::ReverseEmitter;

/// See the identical wrapper in `isa::sse2`/`isa::avx2`: each `dynasm!` call
/// site parses independently and needs its own `.arch x64` restated.
macro_rules! x64asm {
    ($ops:expr; $($t:tt)*) => {
        dynasm!($ops; .arch x64; $($t)*)
    };
}

/// `rdi`-in, no return value: the buffer pointer is the sole argument
/// under the SysV calling convention this crate targets exclusively.
type EntrySig = extern "sysv64" fn(*mut f64);

/// A JIT-compiled graph, ready to run against a matching value buffer.
///
/// Grounded on the `ExecutableBuffer` + `extern "sysv64" fn(...)` +
/// `mem::transmute` pattern real dynasm-rs backends use to hand a raw code
/// pointer back to safe Rust as a callable function.
pub struct Kernel {
    code: ExecutableBuffer,
    entry: AssemblyOffset,
    kind: InstructionSetKind,
    num_nodes: usize,
    has_gradient: bool,
}

impl Kernel {
    /// Compiles `graph` for `kind`, emitting a reverse (adjoint) pass as
    /// well as the forward pass when `graph.diff_inputs` is non-empty.
    pub fn compile(graph: &Graph, kind: InstructionSetKind) -> Result<Self> {
        graph.validate()?;

        let isa: Box<dyn InstructionSet> = kind.build();
        let alignment = match kind {
            InstructionSetKind::Sse2Scalar => PoolAlignment::Sixteen,
            InstructionSetKind::Avx2Packed => PoolAlignment::ThirtyTwo,
        };
        let pool = ConstPoolPlan::build(graph, alignment);
        let has_gradient = !graph.diff_inputs.is_empty();

        let mut ops = Assembler::new().map_err(|_| Error::CodeBufferAllocationFailed)?;
        let entry = ops.offset();

        isa.emit_prologue(&mut ops);
        ForwardEmitter::new(isa.as_ref(), &pool).emit(&mut ops, graph);
        if has_gradient {
            ReverseEmitter::new(isa.as_ref(), graph.len() as u32).emit(&mut ops, graph);
        }
        isa.emit_epilogue(&mut ops);

        Self::emit_const_pool(&mut ops, &pool, alignment);

        let code = ops.finalize().map_err(|_| Error::CodeBufferAllocationFailed)?;

        log::debug!(
            "kernel: compiled {} nodes ({:?}, gradient={}), {} bytes of code",
            graph.len(),
            kind,
            has_gradient,
            code.len()
        );

        Ok(Self {
            code,
            entry,
            kind,
            num_nodes: graph.len(),
            has_gradient,
        })
    }

    /// Lays the constant pool out as a flat byte blob under the
    /// `->const_pool` global label the instruction sets address via
    /// RIP-relative loads, broadcasting each value across a whole AVX2
    /// entry when the alignment calls for it.
    fn emit_const_pool(ops: &mut Assembler, pool: &ConstPoolPlan, alignment: PoolAlignment) {
        if pool.values.is_empty() {
            return;
        }

        let lanes_per_entry = match alignment {
            PoolAlignment::Sixteen => 1,
            PoolAlignment::ThirtyTwo => 4,
        };
        let mut bytes = Vec::with_capacity(pool.size_bytes(alignment));
        for &value in &pool.values {
            for _ in 0..lanes_per_entry {
                bytes.extend_from_slice(&value.to_le_bytes());
            }
        }

        x64asm!(ops
            ; .align ConstPoolPlan::base_alignment(alignment) as u8
            ; ->const_pool:
            ; .bytes &bytes
        );
    }

    /// Which instruction set this kernel was compiled for.
    pub fn instruction_set(&self) -> InstructionSetKind {
        self.kind
    }

    /// Number of graph nodes this kernel expects the value buffer to hold.
    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    /// Whether this kernel also runs a reverse (adjoint) pass.
    pub fn has_gradient(&self) -> bool {
        self.has_gradient
    }

    /// Invokes the compiled kernel against a raw value-buffer pointer,
    /// validating the caller's declared shape first. `buffer_node_count`
    /// and `buffer_vector_width` describe the buffer the caller actually
    /// built; `forge-runtime::Buffer` is the only intended caller.
    ///
    /// # Safety
    /// `ptr` must point to a buffer of at least
    /// `2 * num_nodes() * instruction_set().slot_size()` bytes (forward
    /// region plus adjoint region), valid for the duration of the call.
    pub unsafe fn execute_raw(
        &self,
        ptr: *mut f64,
        buffer_node_count: usize,
        buffer_vector_width: usize,
    ) -> Result<()> {
        if buffer_node_count != self.num_nodes || buffer_vector_width != self.kind.vector_width() {
            return Err(Error::BufferShapeMismatch {
                expected_nodes: self.num_nodes,
                expected_width: self.kind.vector_width(),
                actual_nodes: buffer_node_count,
                actual_width: buffer_vector_width,
            });
        }

        let f: EntrySig = mem::transmute::<*const u8, EntrySig>(self.code.ptr(self.entry));
        f(ptr);
        Ok(())
    }
}
