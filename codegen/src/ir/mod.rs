//! Representation of MinZ IR.
//!
//! The IR is a flat three-address form. A [`Module`] owns an ordered list of
//! [`Function`]s, the module globals, and the interned string table; each
//! function owns its typed instruction stream. Instructions reference other
//! entities symbolically (by label, by symbol name, by parameter index) and
//! the backend resolves them during emission.

mod entities;
mod function;
mod instructions;
mod module;
mod types;

pub use self::entities::{Label, Reg};
pub use self::function::{Function, FunctionFlags, Local, Param, SmcSlot};
pub use self::instructions::{Inst, Opcode, RegHint, Target};
pub use self::module::{ExternalFunc, Global, GlobalInit, Module, StringTable};
pub use self::types::{
    demangle, mangle, BitField, BitStructType, EnumType, FunctionType, StructField, StructType,
    Type,
};
