//! IR entity references.
//!
//! Registers and labels are compact `u32` newtypes rather than Rust
//! references; instructions refer to everything else symbolically. There is
//! a separate index type per entity so we don't lose type safety.

use cranelift_entity::entity_impl;

/// An opaque reference to a virtual register.
///
/// Registers are function-local; the backend maps them onto physical Z80
/// registers, honoring any [`RegHint`](super::RegHint) carried by the
/// defining instruction.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reg(u32);
entity_impl!(Reg, "r");

/// An opaque reference to a code label.
///
/// Labels are minted from a per-compilation counter and are unique within
/// the compilation; within one function every jump target resolves to
/// exactly one `Label` instruction.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(u32);
entity_impl!(Label, "L");

#[cfg(test)]
mod tests {
    use super::*;
    use cranelift_entity::EntityRef;

    #[test]
    fn display() {
        assert_eq!(Reg::new(0).to_string(), "r0");
        assert_eq!(Label::new(7).to_string(), "L7");
    }
}
