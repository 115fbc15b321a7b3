use std::ops::Not;

use forge_ir::{is_recording, with_active_graph, NodeId, OpCode, NO_NODE};

use crate::error::Result;

/// Tracing boolean scalar (spec §6).
///
/// Stored as a mask-form bool at the Rust level (a plain `bool`), matching
/// the node-level convention (spec §4.6: comparisons and boolean ops
/// produce a 0.0/1.0-valued double node) only at the JIT boundary — here,
/// `Fbool` itself just remembers the passive `bool` and, while recording,
/// the node id of the boolean-domain op that produced it. Plain `Copy`
/// data, same tradeoff as [`super::fdouble::Fdouble`]: a literal's node is
/// materialised fresh on each independent use rather than cached, since
/// `Copy` rules out an interior-mutable cache field.
#[derive(Clone, Copy, Debug)]
pub struct Fbool {
    value: bool,
    node: NodeId,
    is_active: bool,
}

impl Fbool {
    fn passive(value: bool) -> Self {
        Self {
            value,
            node: NO_NODE,
            is_active: false,
        }
    }

    /// Builds an `Fbool` from a comparison's already-computed passive
    /// result, recording the comparison node lazily via `record` only if a
    /// recorder is active. Used by `Fdouble`/`Fint`'s comparison methods,
    /// which already know how to append their own `CmpXX`/`IntCmpXX` node.
    pub(super) fn from_comparison(
        value: bool,
        is_active: bool,
        record: impl FnOnce() -> Result<NodeId>,
    ) -> Self {
        let node = if is_recording() {
            record().unwrap_or(NO_NODE)
        } else {
            NO_NODE
        };
        Self {
            value,
            node,
            is_active,
        }
    }

    /// The eagerly computed passive value.
    pub fn value(&self) -> bool {
        self.value
    }

    /// Whether this value depends transitively on an input.
    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub(crate) fn node_id(&self) -> Result<NodeId> {
        if self.node != NO_NODE {
            return Ok(self.node);
        }
        with_active_graph(|g| g.add_bool_constant(self.value)).map_err(crate::error::Error::from)
    }

    fn binary(self, rhs: Self, op: OpCode, value: bool) -> Self {
        let is_active = self.is_active || rhs.is_active;
        let node = if is_recording() {
            self.record_binary(rhs, op).unwrap_or(NO_NODE)
        } else {
            NO_NODE
        };
        Self {
            value,
            node,
            is_active,
        }
    }

    fn record_binary(&self, rhs: Self, op: OpCode) -> Result<NodeId> {
        let a = self.node_id()?;
        let b = rhs.node_id()?;
        with_active_graph(|g| g.add_binary(op, a, b)).map_err(crate::error::Error::from)
    }

    /// `self && rhs`.
    pub fn and(self, rhs: Self) -> Self {
        let v = self.value && rhs.value;
        self.binary(rhs, OpCode::BoolAnd, v)
    }

    /// `self || rhs`.
    pub fn or(self, rhs: Self) -> Self {
        let v = self.value || rhs.value;
        self.binary(rhs, OpCode::BoolOr, v)
    }

    /// `self == rhs`.
    pub fn eq(self, rhs: Self) -> Self {
        let v = self.value == rhs.value;
        self.binary(rhs, OpCode::BoolEq, v)
    }

    /// `self != rhs`.
    pub fn ne(self, rhs: Self) -> Self {
        let v = self.value != rhs.value;
        self.binary(rhs, OpCode::BoolNe, v)
    }

    /// `cond ? t : f`, generic over whichever tracing type `t`/`f` are
    /// (spec §6: "`.If(true_val, false_val)` ... returns fdouble or fint").
    /// Dispatches through [`Selectable`] to sidestep `Fbool` needing direct
    /// knowledge of either concrete type's internals (spec §9 design note
    /// on the three-way circular dependency).
    pub fn if_<T: Selectable>(self, t: T, f: T) -> Result<T> {
        T::select(self, t, f)
    }
}

impl From<bool> for Fbool {
    fn from(value: bool) -> Self {
        Self::passive(value)
    }
}

impl Not for Fbool {
    type Output = Self;

    fn not(self) -> Self {
        let v = !self.value;
        let node = if is_recording() {
            self.node_id()
                .and_then(|a| with_active_graph(|g| g.add_unary(OpCode::BoolNot, a)).map_err(crate::error::Error::from))
                .unwrap_or(NO_NODE)
        } else {
            NO_NODE
        };
        Self {
            value: v,
            node,
            is_active: self.is_active,
        }
    }
}

/// Implemented by every tracing type `Fbool::if_` can select between.
///
/// One `impl` per concrete type (`Fdouble`, `Fint`) records that type's own
/// `If`/`IntIf` opcode; `Fbool` itself needs no knowledge of either.
pub trait Selectable: Sized {
    /// Records `cond ? t : f` and returns the resulting value, whose
    /// passive value is `t`'s or `f`'s depending on `cond`'s passive value.
    fn select(cond: Fbool, t: Self, f: Self) -> Result<Self>;
}

#[cfg(test)]
mod tests {
    use forge_ir::Recorder;

    use super::*;
    use crate::types::Fdouble;

    #[test]
    fn passive_bool_ops_need_no_recorder() {
        let a = Fbool::from(true);
        let b = Fbool::from(false);
        assert!(a.or(b).value());
        assert!(!a.and(b).value());
        assert!((!a).eq(b).value());
    }

    #[test]
    fn if_selects_fdouble_by_passive_condition() {
        let mut r = Recorder::new();
        r.start().unwrap();
        let x = Fdouble::mark_input_and_diff(-1.0).unwrap();
        let cond = x.lt(Fdouble::from(0.0));
        let y = cond.if_(Fdouble::from(2.0), Fdouble::from(-2.0)).unwrap();
        assert_eq!(y.value(), 2.0);
        y.mark_output().unwrap();
        r.stop().unwrap();
    }
}
