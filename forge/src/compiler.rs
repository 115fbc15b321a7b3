//! Top-level compiler (spec §6): wires a finished [`forge_ir::Graph`] into
//! `forge-jit`, handing back a [`Kernel`] paired with a freshly sized
//! [`Buffer`].

use forge_ir::Graph;
use forge_jit::Kernel;
use forge_runtime::Buffer;

use crate::config::CompilerConfig;
use crate::error::Result;

/// Compiles recorded graphs into runnable `(Kernel, Buffer)` pairs.
///
/// Stateless: every method takes the graph and config it needs, mirroring
/// the teacher's `sunscreen_frontend_types::Compiler`, which likewise holds
/// no state between calls beyond what's threaded through its builder
/// methods.
pub struct Compiler;

impl Compiler {
    /// Compiles `graph` per `config`.
    ///
    /// Diagnostic flags render through `log::info!` rather than printing
    /// directly, so an embedding application controls output via its own
    /// logger (spec §6).
    pub fn compile(graph: &Graph, config: &CompilerConfig) -> Result<(Kernel, Buffer)> {
        if config.print_original_graph {
            log::info!("compiler: original graph = {:#?}", graph);
        }
        // No optimisation passes exist in this core (spec §4.2), so the
        // "optimized" graph dump is the same graph, logged again only if
        // asked for separately.
        if config.print_optimized_graph {
            log::info!("compiler: optimized graph = {:#?}", graph);
        }
        if config.print_optimization_stats {
            log::info!(
                "compiler: {} nodes, {} constants, {} outputs, {} diff-inputs",
                graph.len(),
                graph.const_pool.len(),
                graph.outputs.len(),
                graph.diff_inputs.len(),
            );
        }
        if config.print_node_flags {
            for node in &graph.nodes {
                log::info!(
                    "compiler: node {} op={:?} active={} needs_gradient={}",
                    node.dst,
                    node.op,
                    node.is_active,
                    node.needs_gradient
                );
            }
        }

        let kernel = Kernel::compile(graph, config.instruction_set)?;

        if config.print_gradient_debug {
            log::info!(
                "compiler: kernel has_gradient={} num_nodes={} vector_width={}",
                kernel.has_gradient(),
                kernel.num_nodes(),
                kernel.instruction_set().vector_width()
            );
        }

        let buffer = Buffer::new(graph, &kernel)?;
        Ok((kernel, buffer))
    }
}
