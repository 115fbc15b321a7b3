//! Tracing-scalar facade (spec §6, §9 design notes).
//!
//! Three tagged-value types — [`Fdouble`], [`Fbool`], [`Fint`] — share one
//! recording protocol: each carries a passive value, a lazily materialised
//! [`forge_ir::NodeId`], and the `is_active`/`needs_gradient` flags the
//! recorded IR needs. The three-way circular dependency between them (an
//! `Fbool` comparison returns from `Fdouble`/`Fint` ops; `Fbool::select`
//! hands one of either back) is resolved per spec §9's design note: one
//! module exposing all three types, each operating against the shared
//! thread-local graph handle rather than holding a reference to one
//! another's types behind a trait object.

mod fbool;
mod fdouble;
mod fint;

pub use fbool::{Fbool, Selectable};
pub use fdouble::Fdouble;
pub use fint::Fint;
