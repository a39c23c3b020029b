//! Calling conventions.
//!
//! The convention is carried on every IR function as a closed enum; the
//! backend switches on it when laying out the prologue and call sites. The
//! string forms here are the labels accepted by `@abi` attributes and
//! emitted into listings.

use core::fmt;
use core::str::FromStr;

/// A calling convention for a MinZ function.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub enum CallConv {
    /// Self-modifying code: the caller patches argument bytes directly into
    /// instruction immediates inside the callee body.
    Smc,
    /// Arguments in registers, picked by the backend.
    Register,
    /// Arguments in registers with an explicit user mapping, carried in the
    /// function's `register_mappings` metadata (e.g. `A=x, HL=ptr`).
    RegisterMapped,
    /// Arguments pushed on the machine stack.
    Stack,
    /// Arguments in the shadow register set (EXX).
    Shadow,
    /// Virtual method dispatch; the backend emits an indirect call thunk.
    Virtual,
    /// No prologue or epilogue at all; the body is emitted verbatim.
    Naked,
}

impl CallConv {
    /// All conventions, in declaration order.
    pub fn all() -> &'static [Self] {
        &[
            Self::Smc,
            Self::Register,
            Self::RegisterMapped,
            Self::Stack,
            Self::Shadow,
            Self::Virtual,
            Self::Naked,
        ]
    }

    /// Does this convention patch arguments into the callee body?
    pub fn is_smc(self) -> bool {
        self == Self::Smc
    }
}

impl fmt::Display for CallConv {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Smc => "smc",
            Self::Register => "register",
            Self::RegisterMapped => "register_mapped",
            Self::Stack => "stack",
            Self::Shadow => "shadow",
            Self::Virtual => "virtual",
            Self::Naked => "naked",
        })
    }
}

impl FromStr for CallConv {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "smc" => Ok(Self::Smc),
            "register" => Ok(Self::Register),
            "register_mapped" => Ok(Self::RegisterMapped),
            "stack" => Ok(Self::Stack),
            "shadow" => Ok(Self::Shadow),
            "virtual" => Ok(Self::Virtual),
            "naked" => Ok(Self::Naked),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_parse_roundtrip() {
        for &cc in CallConv::all() {
            assert_eq!(cc.to_string().parse::<CallConv>(), Ok(cc));
        }
    }

    #[test]
    fn rejects_unknown() {
        assert!("fastcall".parse::<CallConv>().is_err());
        assert!("".parse::<CallConv>().is_err());
    }
}
