//! Compiler configuration (spec §6).
//!
//! A plain struct with a `Default` impl, not parsed from environment
//! variables, CLI arguments, or any persisted state: spec §6 is explicit
//! that "no environment variables, CLI, or persisted state are part of the
//! core."

use forge_jit::InstructionSetKind;

/// Options controlling [`crate::Compiler::compile`]'s instruction-set
/// choice and diagnostic output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompilerConfig {
    /// `SSE2_SCALAR` (1-wide) or `AVX2_PACKED` (4-wide) code generation.
    pub instruction_set: InstructionSetKind,
    /// Logs the recorded graph, as-is, through `log::info!` before any
    /// passes run.
    pub print_original_graph: bool,
    /// Logs the graph again after optional passes. No optimisation passes
    /// are implemented in this core (spec §4.2: CSE, if desired, is an
    /// external pass consuming and producing a `Graph`), so today this logs
    /// the same graph as `print_original_graph`.
    pub print_optimized_graph: bool,
    /// Logs node/constant/output/diff-input counts.
    pub print_optimization_stats: bool,
    /// Logs each node's `is_active`/`needs_gradient` flags.
    pub print_node_flags: bool,
    /// Logs the compiled kernel's gradient-pass metadata.
    pub print_gradient_debug: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            instruction_set: InstructionSetKind::Sse2Scalar,
            print_original_graph: false,
            print_optimized_graph: false,
            print_optimization_stats: false,
            print_node_flags: false,
            print_gradient_debug: false,
        }
    }
}

impl CompilerConfig {
    /// Every diagnostic flag off, default instruction set. Carried forward
    /// from the original's `CompilerConfig::NoOptimization()` convenience
    /// constructor; identical to [`Default::default`] since this core has
    /// no optimisation passes to disable.
    pub fn no_optimization() -> Self {
        Self::default()
    }
}
