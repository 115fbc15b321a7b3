use std::ops::{Add, Div, Mul, Neg, Rem, Sub};

use forge_ir::{is_recording, with_active_graph, NodeId, OpCode, NO_NODE};

use super::fbool::{Fbool, Selectable};
use super::fdouble::Fdouble;
use crate::error::{Error, Result};

/// Tracing integer scalar (spec §6).
///
/// Carried as a passive `i64` at the Rust level; the IR stores integers as
/// truncated doubles (spec §4.1: "the integer domain reuses the double
/// node representation, truncated"), so every recorded op here still
/// produces an `Int*` opcode rather than a real-domain one. Plain `Copy`
/// data, same tradeoff as [`super::fdouble::Fdouble`]: no cached node id,
/// since an interior-mutable cache field would rule out `Copy`.
#[derive(Clone, Copy, Debug)]
pub struct Fint {
    value: i64,
    node: NodeId,
    is_active: bool,
}

impl Fint {
    fn passive(value: i64) -> Self {
        Self {
            value,
            node: NO_NODE,
            is_active: false,
        }
    }

    /// Appends an `Input` node truncated into the integer domain. Integer
    /// inputs never require a gradient (spec §4.7: only real-domain nodes
    /// carry a derivative), so there is no `mark_input_and_diff` counterpart.
    pub fn mark_input(value: i64) -> Result<Self> {
        let id = forge_ir::mark_input(false)?;
        Ok(Self {
            value,
            node: id,
            is_active: true,
        })
    }

    /// The eagerly computed passive value.
    pub fn value(&self) -> i64 {
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
        with_active_graph(|g| g.add_int_constant(self.value)).map_err(Error::from)
    }

    fn binary(self, rhs: Self, op: OpCode, value: i64) -> Self {
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
        with_active_graph(|g| g.add_binary(op, a, b)).map_err(Error::from)
    }

    fn compare(self, rhs: Self, op: OpCode, result: bool) -> Fbool {
        Fbool::from_comparison(result, self.is_active || rhs.is_active, || self.record_binary(rhs, op))
    }

    /// `self < rhs`.
    pub fn lt(self, rhs: Self) -> Fbool {
        let r = self.value < rhs.value;
        self.compare(rhs, OpCode::IntCmpLT, r)
    }

    /// `self <= rhs`.
    pub fn le(self, rhs: Self) -> Fbool {
        let r = self.value <= rhs.value;
        self.compare(rhs, OpCode::IntCmpLE, r)
    }

    /// `self > rhs`.
    pub fn gt(self, rhs: Self) -> Fbool {
        let r = self.value > rhs.value;
        self.compare(rhs, OpCode::IntCmpGT, r)
    }

    /// `self >= rhs`.
    pub fn ge(self, rhs: Self) -> Fbool {
        let r = self.value >= rhs.value;
        self.compare(rhs, OpCode::IntCmpGE, r)
    }

    /// `self == rhs`.
    pub fn eq(self, rhs: Self) -> Fbool {
        let r = self.value == rhs.value;
        self.compare(rhs, OpCode::IntCmpEQ, r)
    }

    /// `self != rhs`.
    pub fn ne(self, rhs: Self) -> Fbool {
        let r = self.value != rhs.value;
        self.compare(rhs, OpCode::IntCmpNE, r)
    }

    /// `array[self]`, lowered at recording time to a chain of
    /// `If(self == k, array[k], ...)` bottoming out at `array[0]` — there is
    /// no dedicated `ArrayIndex` opcode (spec: "Array indexing lowering").
    ///
    /// Fails with [`forge_ir::Error::EmptyArrayIndex`] if `array` is empty or
    /// if this index's passive value is out of `array`'s bounds, matching the
    /// original's recording-time bounds check against the passive value (both
    /// are treated as the caller having called `index` incorrectly, so both
    /// reuse the same error).
    pub fn index(self, array: &[Fdouble]) -> Result<Fdouble> {
        if array.is_empty() || self.value < 0 || self.value as usize >= array.len() {
            return Err(Error::from(forge_ir::Error::EmptyArrayIndex));
        }

        let mut acc = array[0];
        for (k, &candidate) in array.iter().enumerate().skip(1) {
            let matches = self.eq(Self::from(k as i64));
            acc = matches.if_(candidate, acc)?;
        }
        Ok(acc)
    }
}

impl From<i64> for Fint {
    fn from(value: i64) -> Self {
        Self::passive(value)
    }
}

impl Neg for Fint {
    type Output = Self;

    fn neg(self) -> Self {
        let v = -self.value;
        let node = if is_recording() {
            self.node_id()
                .and_then(|a| with_active_graph(|g| g.add_unary(OpCode::IntNeg, a)).map_err(Error::from))
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

macro_rules! impl_binop {
    ($trait:ident, $method:ident, $op:path, $expr:expr) => {
        impl $trait for Fint {
            type Output = Self;

            fn $method(self, rhs: Self) -> Self {
                let f: fn(i64, i64) -> i64 = $expr;
                let v = f(self.value, rhs.value);
                self.binary(rhs, $op, v)
            }
        }

        impl $trait<i64> for Fint {
            type Output = Self;

            fn $method(self, rhs: i64) -> Self {
                $trait::$method(self, Fint::from(rhs))
            }
        }

        impl $trait<Fint> for i64 {
            type Output = Fint;

            fn $method(self, rhs: Fint) -> Fint {
                $trait::$method(Fint::from(self), rhs)
            }
        }
    };
}

impl_binop!(Add, add, OpCode::IntAdd, |a, b| a.wrapping_add(b));
impl_binop!(Sub, sub, OpCode::IntSub, |a, b| a.wrapping_sub(b));
impl_binop!(Mul, mul, OpCode::IntMul, |a, b| a.wrapping_mul(b));
impl_binop!(Div, div, OpCode::IntDiv, |a, b| a.wrapping_div(b));
impl_binop!(Rem, rem, OpCode::IntMod, |a, b| a.wrapping_rem(b));

impl Selectable for Fint {
    fn select(cond: Fbool, t: Self, f: Self) -> Result<Self> {
        let value = if cond.value() { t.value } else { f.value };
        let is_active = cond.is_active() || t.is_active || f.is_active;
        let node = if is_recording() {
            let cond_id = cond.node_id()?;
            let t_id = t.node_id()?;
            let f_id = f.node_id()?;
            with_active_graph(|g| g.add_ternary(OpCode::IntIf, cond_id, t_id, f_id))?
        } else {
            NO_NODE
        };
        Ok(Self {
            value,
            node,
            is_active,
        })
    }
}

#[cfg(test)]
mod tests {
    use forge_ir::Recorder;

    use super::*;

    #[test]
    fn passive_arithmetic_needs_no_recorder() {
        let a = Fint::from(3);
        let b = Fint::from(4);
        assert_eq!((a + b).value(), 7);
        assert_eq!((a * b).value(), 12);
    }

    #[test]
    fn index_empty_array_fails() {
        assert!(matches!(
            Fint::from(0).index(&[]),
            Err(Error::Ir(forge_ir::Error::EmptyArrayIndex))
        ));
    }

    #[test]
    fn index_out_of_range_fails() {
        let array = [Fdouble::from(7.0), Fdouble::from(13.0)];
        assert!(matches!(
            Fint::from(2).index(&array),
            Err(Error::Ir(forge_ir::Error::EmptyArrayIndex))
        ));
        assert!(matches!(
            Fint::from(-1).index(&array),
            Err(Error::Ir(forge_ir::Error::EmptyArrayIndex))
        ));
    }

    #[test]
    fn chain_of_ifs_selects_by_passive_value() {
        let mut r = Recorder::new();
        r.start().unwrap();
        let x = Fdouble::mark_input_and_diff(-1.0).unwrap();
        let cond = x.lt(Fdouble::from(0.0));
        let i = cond.if_(Fint::from(0), Fint::from(1)).unwrap();
        let y = i.index(&[Fdouble::from(7.0), Fdouble::from(13.0)]).unwrap();
        assert_eq!(y.value(), 7.0);
        y.mark_output().unwrap();
        r.stop().unwrap();
    }
}
