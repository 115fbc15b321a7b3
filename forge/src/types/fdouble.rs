use std::ops::{Add, Div, Mul, Neg, Sub};

use forge_ir::{is_recording, with_active_graph, NodeId, OpCode, NO_NODE};

use super::fbool::Fbool;
use crate::error::{Error, Result};

/// Tracing real scalar (spec §6).
///
/// Behaves like a plain `f64` — every operation computes its passive result
/// eagerly (spec §9: "tests depend on the passive value being correct even
/// during recording") — and, while a recorder is active on this thread,
/// additionally appends a node to the graph and remembers its id.
///
/// A literal constructed via [`From<f64>`] carries no node until it first
/// participates in a recorded operation. Each independent copy of such a
/// literal that reaches an operation materialises its own `Constant` node on
/// first use rather than sharing one cached id across copies — the constant
/// pool already dedups by value (`Graph::add_constant`), so a repeatedly
/// reused literal costs a few extra `Constant` opcodes, never a distinct
/// pool entry or a wrong value. This trades the source's write-once cached
/// id for a plain, fully `Copy` value type, which is what lets expressions
/// like `x * x + 2.0 * x + 1.0` read exactly like native `f64` arithmetic.
#[derive(Clone, Copy, Debug)]
pub struct Fdouble {
    value: f64,
    node: NodeId,
    is_active: bool,
    needs_gradient: bool,
}

impl Fdouble {
    fn passive(value: f64) -> Self {
        Self {
            value,
            node: NO_NODE,
            is_active: false,
            needs_gradient: false,
        }
    }

    /// Appends an `Input` node and returns the resulting tracing value.
    /// `value` seeds the eager passive computation any surrounding passive
    /// arithmetic performs; the real value used at kernel execution time
    /// comes from the buffer slot the caller writes before `execute`.
    pub fn mark_input(value: f64) -> Result<Self> {
        let id = forge_ir::mark_input(false)?;
        Ok(Self {
            value,
            node: id,
            is_active: true,
            needs_gradient: false,
        })
    }

    /// Like [`Self::mark_input`], additionally marking the input for
    /// gradient computation.
    pub fn mark_input_and_diff(value: f64) -> Result<Self> {
        let id = forge_ir::mark_input(true)?;
        Ok(Self {
            value,
            node: id,
            is_active: true,
            needs_gradient: true,
        })
    }

    /// Records this value in the graph's output list.
    ///
    /// Marking a passive value as an output is allowed but emits a warning
    /// and yields a zero gradient (spec §4.1): a `Constant` node is still
    /// recorded so the output list always indexes a real node.
    pub fn mark_output(&self) -> Result<NodeId> {
        let id = self.node_id()?;
        if !self.is_active {
            log::warn!("marking a passive fdouble as output; its gradient will be zero");
        }
        with_active_graph(|g| {
            g.mark_output(id);
            Ok(())
        })?;
        Ok(id)
    }

    /// The eagerly computed passive value.
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Whether this value depends transitively on an input.
    pub fn is_active(&self) -> bool {
        self.is_active
    }

    /// Converts to a native `f64`, failing if this value is active while a
    /// recorder is running on this thread — the only sound way to extract
    /// or branch on a recorded value mid-session is the graph's own `If`
    /// operator (spec §6, §4.1 "Failure modes").
    pub fn to_native(&self) -> Result<f64> {
        if self.is_active && is_recording() {
            return Err(Error::from(forge_ir::Error::ActiveBoolInBranch));
        }
        Ok(self.value)
    }

    /// The node id backing this value, materialising a `Constant` node if
    /// this value came from a bare literal never before recorded.
    pub(crate) fn node_id(&self) -> Result<NodeId> {
        if self.node != NO_NODE {
            return Ok(self.node);
        }
        with_active_graph(|g| g.add_constant(self.value)).map_err(Error::from)
    }

    fn binary(self, rhs: Self, op: OpCode, value: f64) -> Self {
        let is_active = self.is_active || rhs.is_active;
        let needs_gradient = self.needs_gradient || rhs.needs_gradient;
        let node = if is_recording() {
            self.record_binary(rhs, op).unwrap_or(NO_NODE)
        } else {
            NO_NODE
        };
        Self {
            value,
            node,
            is_active,
            needs_gradient,
        }
    }

    fn record_binary(&self, rhs: Self, op: OpCode) -> Result<NodeId> {
        let a = self.node_id()?;
        let b = rhs.node_id()?;
        with_active_graph(|g| g.add_binary(op, a, b)).map_err(Error::from)
    }

    fn unary(self, op: OpCode, value: f64) -> Self {
        let node = if is_recording() {
            self.record_unary(op).unwrap_or(NO_NODE)
        } else {
            NO_NODE
        };
        Self {
            value,
            node,
            is_active: self.is_active,
            needs_gradient: self.needs_gradient,
        }
    }

    fn record_unary(&self, op: OpCode) -> Result<NodeId> {
        let a = self.node_id()?;
        with_active_graph(|g| g.add_unary(op, a)).map_err(Error::from)
    }

    fn compare(self, rhs: Self, op: OpCode, result: bool) -> Fbool {
        Fbool::from_comparison(result, self.is_active || rhs.is_active, || self.record_binary(rhs, op))
    }

    /// `|self|`.
    pub fn abs(self) -> Self {
        let v = self.value.abs();
        self.unary(OpCode::Abs, v)
    }

    /// `self * self`.
    pub fn square(self) -> Self {
        let v = self.value * self.value;
        self.unary(OpCode::Square, v)
    }

    /// `1 / self`.
    pub fn recip(self) -> Self {
        let v = 1.0 / self.value;
        self.unary(OpCode::Recip, v)
    }

    /// `sqrt(self)`.
    pub fn sqrt(self) -> Self {
        let v = self.value.sqrt();
        self.unary(OpCode::Sqrt, v)
    }

    /// `exp(self)`.
    pub fn exp(self) -> Self {
        let v = self.value.exp();
        self.unary(OpCode::Exp, v)
    }

    /// `log(self)`.
    pub fn log(self) -> Self {
        let v = self.value.ln();
        self.unary(OpCode::Log, v)
    }

    /// `sin(self)`.
    pub fn sin(self) -> Self {
        let v = self.value.sin();
        self.unary(OpCode::Sin, v)
    }

    /// `cos(self)`.
    pub fn cos(self) -> Self {
        let v = self.value.cos();
        self.unary(OpCode::Cos, v)
    }

    /// `tan(self)`.
    pub fn tan(self) -> Self {
        let v = self.value.tan();
        self.unary(OpCode::Tan, v)
    }

    /// `self - rhs * trunc(self / rhs)`, matching the lowering `emit_mod`
    /// in `forge-jit` uses.
    pub fn modulo(self, rhs: Self) -> Self {
        let v = self.value - rhs.value * (self.value / rhs.value).trunc();
        self.binary(rhs, OpCode::Mod, v)
    }

    /// `self.powf(rhs)`.
    pub fn pow(self, rhs: Self) -> Self {
        let v = self.value.powf(rhs.value);
        self.binary(rhs, OpCode::Pow, v)
    }

    /// `min(self, rhs)`.
    pub fn min(self, rhs: Self) -> Self {
        let v = self.value.min(rhs.value);
        self.binary(rhs, OpCode::Min, v)
    }

    /// `max(self, rhs)`.
    pub fn max(self, rhs: Self) -> Self {
        let v = self.value.max(rhs.value);
        self.binary(rhs, OpCode::Max, v)
    }

    /// `self < rhs`.
    pub fn lt(self, rhs: Self) -> Fbool {
        let r = self.value < rhs.value;
        self.compare(rhs, OpCode::CmpLT, r)
    }

    /// `self <= rhs`.
    pub fn le(self, rhs: Self) -> Fbool {
        let r = self.value <= rhs.value;
        self.compare(rhs, OpCode::CmpLE, r)
    }

    /// `self > rhs`.
    pub fn gt(self, rhs: Self) -> Fbool {
        let r = self.value > rhs.value;
        self.compare(rhs, OpCode::CmpGT, r)
    }

    /// `self >= rhs`.
    pub fn ge(self, rhs: Self) -> Fbool {
        let r = self.value >= rhs.value;
        self.compare(rhs, OpCode::CmpGE, r)
    }

    /// `self == rhs`.
    pub fn eq(self, rhs: Self) -> Fbool {
        let r = self.value == rhs.value;
        self.compare(rhs, OpCode::CmpEQ, r)
    }

    /// `self != rhs`.
    pub fn ne(self, rhs: Self) -> Fbool {
        let r = self.value != rhs.value;
        self.compare(rhs, OpCode::CmpNE, r)
    }
}

impl From<f64> for Fdouble {
    fn from(value: f64) -> Self {
        Self::passive(value)
    }
}

impl Neg for Fdouble {
    type Output = Self;

    fn neg(self) -> Self {
        let v = -self.value;
        self.unary(OpCode::Neg, v)
    }
}

macro_rules! impl_binop {
    ($trait:ident, $method:ident, $op:path, $expr:expr) => {
        impl $trait for Fdouble {
            type Output = Self;

            fn $method(self, rhs: Self) -> Self {
                let f: fn(f64, f64) -> f64 = $expr;
                let v = f(self.value, rhs.value);
                self.binary(rhs, $op, v)
            }
        }

        impl $trait<f64> for Fdouble {
            type Output = Self;

            fn $method(self, rhs: f64) -> Self {
                $trait::$method(self, Fdouble::from(rhs))
            }
        }

        impl $trait<Fdouble> for f64 {
            type Output = Fdouble;

            fn $method(self, rhs: Fdouble) -> Fdouble {
                $trait::$method(Fdouble::from(self), rhs)
            }
        }
    };
}

impl_binop!(Add, add, OpCode::Add, |a, b| a + b);
impl_binop!(Sub, sub, OpCode::Sub, |a, b| a - b);
impl_binop!(Mul, mul, OpCode::Mul, |a, b| a * b);
impl_binop!(Div, div, OpCode::Div, |a, b| a / b);

impl super::fbool::Selectable for Fdouble {
    fn select(cond: super::fbool::Fbool, t: Self, f: Self) -> Result<Self> {
        let value = if cond.value() { t.value } else { f.value };
        let is_active = cond.is_active() || t.is_active || f.is_active;
        let needs_gradient = t.needs_gradient || f.needs_gradient;
        let node = if is_recording() {
            let cond_id = cond.node_id()?;
            let t_id = t.node_id()?;
            let f_id = f.node_id()?;
            with_active_graph(|g| g.add_ternary(OpCode::If, cond_id, t_id, f_id))?
        } else {
            NO_NODE
        };
        Ok(Self {
            value,
            node,
            is_active,
            needs_gradient,
        })
    }
}

#[cfg(test)]
mod tests {
    use forge_ir::Recorder;

    use super::*;

    #[test]
    fn passive_arithmetic_needs_no_recorder() {
        let x = Fdouble::from(2.0);
        let y = Fdouble::from(3.0);
        assert_eq!((x + y).value(), 5.0);
        assert!(!(x + y).is_active());
    }

    #[test]
    fn recorded_linear_expression_appends_nodes() {
        let mut r = Recorder::new();
        r.start().unwrap();
        let x = Fdouble::mark_input_and_diff(4.0).unwrap();
        let y = x * 2.0 + 3.0;
        assert_eq!(y.value(), 11.0);
        y.mark_output().unwrap();
        let graph = r.stop().unwrap();
        assert_eq!(graph.outputs.len(), 1);
        assert!(graph.len() >= 4); // x, 2.0, mul, 3.0, add
    }

    #[test]
    fn to_native_on_active_value_fails_while_recording() {
        let mut r = Recorder::new();
        r.start().unwrap();
        let x = Fdouble::mark_input(1.0).unwrap();
        assert!(matches!(x.to_native(), Err(Error::Ir(forge_ir::Error::ActiveBoolInBranch))));
        x.mark_output().unwrap();
        r.stop().unwrap();
    }
}
