//! Thread-local recording session (spec §4.1).
//!
//! Mirrors the teacher's `CURRENT_CTX` / `with_ctx` idiom
//! (`sunscreen_frontend_types::{CURRENT_CTX, with_ctx}`): a thread-local
//! cell holds a raw pointer to the graph currently being built so that
//! tracing-scalar operators deep in user code can reach it without a
//! context argument threaded through every operator overload. Unlike
//! Sunscreen's single always-nested context, recording here does not nest
//! (spec §4.1, §5): starting a second recorder on the same thread is an
//! error rather than a push onto a stack.

use std::cell::Cell;
use std::ptr::NonNull;

use crate::error::{Error, Result};
use crate::graph::Graph;
use crate::node::NodeId;

thread_local! {
    /// The graph under construction on this thread, or `None` if no
    /// recorder is active. A raw pointer (rather than a borrow) because the
    /// pointee is owned by a [`Recorder`] living on the caller's stack for
    /// the duration of the session; see [`Recorder::start`].
    static ACTIVE_GRAPH: Cell<Option<NonNull<Graph>>> = Cell::new(None);
}

/// Runs `f` with mutable access to the thread's active graph.
///
/// Returns `Err(Error::RecordingNotActive)` if no recorder is active on the
/// calling thread. Tracing-scalar operators call this for every recorded
/// operation; when it errs, the operator falls back to passive evaluation
/// (spec §4.1: "If absent, arithmetic produces passive results and no IR is
/// emitted").
pub fn with_active_graph<F, R>(f: F) -> Result<R>
where
    F: FnOnce(&mut Graph) -> Result<R>,
{
    ACTIVE_GRAPH.with(|cell| match cell.get() {
        // SAFETY: the pointer is only ever installed by `Recorder::start`,
        // which borrows the `Recorder`'s own `Graph` for exactly the
        // lifetime between `start` and `stop`/`Drop`, both of which run on
        // this thread (recorders are not `Send`).
        Some(mut ptr) => f(unsafe { ptr.as_mut() }),
        None => Err(Error::RecordingNotActive),
    })
}

/// Whether a recorder is currently active on the calling thread.
pub fn is_recording() -> bool {
    ACTIVE_GRAPH.with(|cell| cell.get().is_some())
}

/// The thread-local recording session that mediates between tracing-scalar
/// code and a [`Graph`].
///
/// A `Recorder` owns the `Graph` being built. `start` installs a pointer to
/// it in [`ACTIVE_GRAPH`]; `stop` validates and uninstalls it. Recording
/// sessions do not nest within a thread, but distinct threads may record
/// independently and concurrently (spec §5).
pub struct Recorder {
    graph: Graph,
    recording: bool,
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new()
    }
}

impl Recorder {
    /// Creates an idle recorder with an empty graph.
    pub fn new() -> Self {
        Self {
            graph: Graph::new(),
            recording: false,
        }
    }

    /// Whether this particular recorder (as opposed to some recorder on the
    /// calling thread) is the one currently active.
    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Begins recording: clears the owned graph and installs the
    /// thread-local pointer. Fails if another recorder is already active on
    /// this thread.
    pub fn start(&mut self) -> Result<()> {
        if ACTIVE_GRAPH.with(|cell| cell.get().is_some()) {
            return Err(Error::RecorderAlreadyActive);
        }

        self.graph = Graph::new();
        self.recording = true;

        let ptr = NonNull::from(&mut self.graph);
        ACTIVE_GRAPH.with(|cell| cell.set(Some(ptr)));
        log::debug!("recorder: started");
        Ok(())
    }

    /// Ends recording: verifies at least one output was marked, validates
    /// constant-pool references, clears the thread-local pointer, and
    /// returns the frozen graph ready for the JIT.
    pub fn stop(&mut self) -> Result<&Graph> {
        if !self.recording {
            return Err(Error::RecordingNotActive);
        }

        // Always uninstall, even on failure, so a failed `stop` leaves the
        // thread able to start a fresh recording (matches
        // `GraphRecorder::stop` in the original: the recorder returns to
        // the idle state regardless of outcome).
        self.recording = false;
        ACTIVE_GRAPH.with(|cell| cell.set(None));

        if self.graph.outputs.is_empty() {
            return Err(Error::NoOutputsMarked);
        }

        self.graph.validate()?;
        log::debug!(
            "recorder: stopped with {} nodes, {} outputs, {} diff-inputs",
            self.graph.len(),
            self.graph.outputs.len(),
            self.graph.diff_inputs.len()
        );
        Ok(&self.graph)
    }

    /// The graph built so far, whether or not recording has stopped.
    pub fn graph(&self) -> &Graph {
        &self.graph
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if self.recording {
            ACTIVE_GRAPH.with(|cell| {
                if cell.get().map(|p| p.as_ptr() as *const Graph) == Some(&self.graph as *const Graph) {
                    cell.set(None);
                }
            });
        }
    }
}

/// Convenience used by the façade's `markInput`/`markInputAndDiff`: appends
/// an `Input` node, optionally seeded for differentiation.
pub fn mark_input(needs_gradient: bool) -> Result<NodeId> {
    with_active_graph(|g| {
        if needs_gradient {
            g.add_diff_input()
        } else {
            g.add_input()
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_active_graph_errors_when_idle() {
        assert!(!is_recording());
        let result = with_active_graph(|g| g.add_input());
        assert!(matches!(result, Err(Error::RecordingNotActive)));
    }

    #[test]
    fn start_then_start_again_is_an_error() {
        let mut r1 = Recorder::new();
        r1.start().unwrap();
        let mut r2 = Recorder::new();
        assert!(matches!(r2.start(), Err(Error::RecorderAlreadyActive)));
        r1.stop().ok(); // outputs empty, but this also clears the thread-local
    }

    #[test]
    fn stop_without_marking_output_fails() {
        let mut r = Recorder::new();
        r.start().unwrap();
        mark_input(true).unwrap();
        assert!(matches!(r.stop(), Err(Error::NoOutputsMarked)));
        // a fresh recorder can start on this thread even after a failed stop
        let mut r2 = Recorder::new();
        assert!(r2.start().is_ok());
        r2.stop().ok();
    }

    #[test]
    fn full_session_round_trip() {
        let mut r = Recorder::new();
        r.start().unwrap();
        let x = mark_input(true).unwrap();
        let result = with_active_graph(|g| {
            let two = g.add_constant(2.0)?;
            g.add_node({
                let mut n = crate::node::Node::new(crate::node::OpCode::Mul);
                n.a = x;
                n.b = two;
                n
            })
        })
        .unwrap();
        with_active_graph(|g| {
            g.mark_output(result);
            Ok(())
        })
        .unwrap();
        let graph = r.stop().unwrap();
        assert_eq!(graph.outputs, vec![result]);
        assert!(!is_recording());
    }
}
