//! Typed intermediate representation for the MinZ compiler, plus the
//! machine-aware mid-level optimization passes that run on it.
//!
//! The semantic analyzer (the `minz-semantic` crate) lowers a syntax tree
//! into the [`ir::Module`] defined here; the Z80 backend consumes the module
//! after the passes in [`fold`] and [`dce`] have run. The IR is a flat
//! three-address form: virtual registers, explicit labels, and typed
//! instructions carrying symbolic targets that the backend resolves during
//! register assignment and emission.
//!
//! The [`verifier`] checks the representation invariants the backend relies
//! on; the analyzer never hands over a module that fails it.

#![deny(missing_docs)]

pub mod callconv;
pub mod dce;
pub mod fold;
pub mod ir;
pub mod verifier;

mod effects;
