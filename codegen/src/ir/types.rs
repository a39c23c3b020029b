//! Semantic types.
//!
//! Every value in the IR has a [`Type`]. Types know their byte size on the
//! Z80, their canonical string form (used for name mangling and in every
//! diagnostic), the assignment-compatibility rules, and which explicit casts
//! are valid.
//!
//! Aggregate types are reference-counted so that the many expressions
//! referring to one struct or enum share a single definition; the analyzer
//! is single-threaded by contract, so `Rc` suffices.

use core::fmt;
use std::rc::Rc;

/// A field of a [`StructType`].
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct StructField {
    /// Field name.
    pub name: String,
    /// Field type.
    pub ty: Type,
}

/// A struct type. Field order is declaration order and is semantically
/// significant: offsets are a running sum of field sizes.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct StructType {
    /// Type name.
    pub name: String,
    /// Fields in declaration order.
    pub fields: Vec<StructField>,
}

impl StructType {
    /// Look up a field, returning its byte offset and type.
    pub fn field(&self, name: &str) -> Option<(u32, &Type)> {
        let mut offset = 0;
        for f in &self.fields {
            if f.name == name {
                return Some((offset, &f.ty));
            }
            offset += f.ty.size();
        }
        None
    }
}

/// An enum type: a closed set of named integer values.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct EnumType {
    /// Type name.
    pub name: String,
    /// Variants in declaration order, with their values.
    pub variants: Vec<(String, i64)>,
}

impl EnumType {
    /// Look up a variant's value.
    pub fn variant(&self, name: &str) -> Option<i64> {
        self.variants
            .iter()
            .find(|(n, _)| n == name)
            .map(|&(_, v)| v)
    }
}

/// A field of a [`BitStructType`]: a sub-range of the underlying integer.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct BitField {
    /// Offset of the field's least significant bit.
    pub bit_offset: u8,
    /// Width of the field in bits.
    pub bit_width: u8,
}

/// A bit-struct type: named bit ranges over a single u8 or u16.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct BitStructType {
    /// Type name.
    pub name: String,
    /// The underlying machine integer; always `u8` or `u16`.
    pub underlying: Type,
    /// Fields in declaration order, packed from bit 0.
    pub fields: Vec<(String, BitField)>,
}

impl BitStructType {
    /// Look up a field's bit range.
    pub fn field(&self, name: &str) -> Option<BitField> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|&(_, f)| f)
    }
}

/// A function type.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct FunctionType {
    /// Parameter types.
    pub params: Vec<Type>,
    /// Return type.
    pub ret: Type,
}

/// The type sum.
///
/// `Iterator` is internal to the analyzer's iterator-fusion machinery and
/// never reaches the backend.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Type {
    /// Unsigned 8-bit integer.
    U8,
    /// Unsigned 16-bit integer.
    U16,
    /// Unsigned 24-bit integer.
    U24,
    /// Signed 8-bit integer.
    I8,
    /// Signed 16-bit integer.
    I16,
    /// Signed 24-bit integer.
    I24,
    /// Boolean; one byte.
    Bool,
    /// The unit type of functions without a result.
    Void,
    /// A null-terminated string reference.
    Str,
    /// A length-prefixed string reference.
    LStr,
    /// A pointer to a base type.
    Pointer(Box<Type>),
    /// An array with element type and length; length -1 means unknown.
    Array {
        /// Element type.
        elem: Box<Type>,
        /// Number of elements, or -1 when unknown.
        len: i32,
    },
    /// A struct.
    Struct(Rc<StructType>),
    /// An enum.
    Enum(Rc<EnumType>),
    /// A bit-struct.
    Bits(Rc<BitStructType>),
    /// A function.
    Function(Rc<FunctionType>),
    /// An iterator over elements; analyzer-internal.
    Iterator(Box<Type>),
}

impl Type {
    /// Byte size of a value of this type.
    ///
    /// Arrays of unknown length and iterators size as a Z80 address (2),
    /// which is what they decay to wherever a size is actually needed.
    pub fn size(&self) -> u32 {
        match self {
            Self::U8 | Self::I8 | Self::Bool => 1,
            Self::U16 | Self::I16 => 2,
            Self::U24 | Self::I24 => 3,
            Self::Void => 0,
            Self::Str | Self::LStr | Self::Pointer(_) | Self::Function(_) => 2,
            Self::Array { elem, len } => {
                if *len < 0 {
                    2
                } else {
                    elem.size() * *len as u32
                }
            }
            Self::Struct(s) => s.fields.iter().map(|f| f.ty.size()).sum(),
            Self::Enum(_) => 1,
            Self::Bits(b) => b.underlying.size(),
            Self::Iterator(_) => 2,
        }
    }

    /// Is this one of the six machine integer kinds?
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            Self::U8 | Self::U16 | Self::U24 | Self::I8 | Self::I16 | Self::I24
        )
    }

    /// Is this a signed integer kind?
    pub fn is_signed(&self) -> bool {
        matches!(self, Self::I8 | Self::I16 | Self::I24)
    }

    /// Can a value of type `src` be assigned to a slot of this type without
    /// an explicit cast?
    ///
    /// Identity is always compatible. The only implicit widenings are
    /// `u8 -> u16`, `u8 -> i16` and `i8 -> i16`; narrowing and same-width
    /// sign changes require a cast. An array of unknown length accepts any
    /// array with the same element type. Everything else falls back to
    /// canonical-string equality.
    pub fn is_assignable_from(&self, src: &Type) -> bool {
        if self == src {
            return true;
        }
        match (self, src) {
            (Self::U16, Self::U8) | (Self::I16, Self::U8) | (Self::I16, Self::I8) => true,
            (
                Self::Array { elem: de, len: -1 },
                Self::Array { elem: se, .. },
            ) => de == se,
            _ => self.to_string() == src.to_string(),
        }
    }

    /// Is an explicit cast from this type to `to` valid?
    ///
    /// Any integer kind casts to any integer kind; a bit-struct casts to
    /// and from its underlying basic type; identity casts are allowed.
    pub fn can_cast_to(&self, to: &Type) -> bool {
        if self == to {
            return true;
        }
        if self.is_integer() && to.is_integer() {
            return true;
        }
        match (self, to) {
            (Self::Bits(b), other) | (other, Self::Bits(b)) => b.underlying == *other,
            _ => false,
        }
    }

    /// The element type, for arrays, pointers and iterators.
    pub fn element(&self) -> Option<&Type> {
        match self {
            Self::Array { elem, .. } => Some(elem),
            Self::Pointer(base) => Some(base),
            Self::Iterator(elem) => Some(elem),
            _ => None,
        }
    }
}

impl fmt::Display for Type {
    /// The canonical string form, e.g. `u8`, `p_u8`, `a5_u8`, `Sprite`,
    /// `f_u8_r_u16`. This form is stable: it is what name mangling and all
    /// diagnostics use.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::U8 => f.write_str("u8"),
            Self::U16 => f.write_str("u16"),
            Self::U24 => f.write_str("u24"),
            Self::I8 => f.write_str("i8"),
            Self::I16 => f.write_str("i16"),
            Self::I24 => f.write_str("i24"),
            Self::Bool => f.write_str("bool"),
            Self::Void => f.write_str("void"),
            Self::Str => f.write_str("string"),
            Self::LStr => f.write_str("lstring"),
            Self::Pointer(base) => write!(f, "p_{base}"),
            Self::Array { elem, len } => {
                if *len < 0 {
                    write!(f, "a_{elem}")
                } else {
                    write!(f, "a{len}_{elem}")
                }
            }
            Self::Struct(s) => f.write_str(&s.name),
            Self::Enum(e) => f.write_str(&e.name),
            Self::Bits(b) => f.write_str(&b.name),
            Self::Function(ft) => {
                f.write_str("f")?;
                for p in &ft.params {
                    write!(f, "_{p}")?;
                }
                write!(f, "_r_{}", ft.ret)
            }
            Self::Iterator(elem) => write!(f, "it_{elem}"),
        }
    }
}

/// Mangle a function name by its parameter types: `base$t1$t2$...`.
///
/// A parameterless function mangles to its base name unchanged.
pub fn mangle(base: &str, params: &[Type]) -> String {
    let mut out = String::from(base);
    for p in params {
        out.push('$');
        out.push_str(&p.to_string());
    }
    out
}

/// Recover the base name from a mangled name.
pub fn demangle(mangled: &str) -> &str {
    match mangled.find('$') {
        Some(i) => &mangled[..i],
        None => mangled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sprite() -> Type {
        Type::Struct(Rc::new(StructType {
            name: "Sprite".to_string(),
            fields: vec![
                StructField {
                    name: "x".to_string(),
                    ty: Type::U8,
                },
                StructField {
                    name: "y".to_string(),
                    ty: Type::U8,
                },
                StructField {
                    name: "addr".to_string(),
                    ty: Type::U16,
                },
            ],
        }))
    }

    #[test]
    fn sizes() {
        assert_eq!(Type::U8.size(), 1);
        assert_eq!(Type::Bool.size(), 1);
        assert_eq!(Type::I16.size(), 2);
        assert_eq!(Type::U24.size(), 3);
        assert_eq!(Type::Pointer(Box::new(Type::U8)).size(), 2);
        assert_eq!(
            Type::Array {
                elem: Box::new(Type::U16),
                len: 5
            }
            .size(),
            10
        );
        assert_eq!(sprite().size(), 4);
    }

    #[test]
    fn struct_field_offsets_are_running_sums() {
        let ty = sprite();
        let Type::Struct(s) = &ty else { unreachable!() };
        assert_eq!(s.field("x"), Some((0, &Type::U8)));
        assert_eq!(s.field("y"), Some((1, &Type::U8)));
        assert_eq!(s.field("addr"), Some((2, &Type::U16)));
        assert_eq!(s.field("nope"), None);
    }

    #[test]
    fn canonical_strings() {
        assert_eq!(Type::U8.to_string(), "u8");
        assert_eq!(Type::Pointer(Box::new(Type::U8)).to_string(), "p_u8");
        assert_eq!(
            Type::Array {
                elem: Box::new(Type::U8),
                len: 5
            }
            .to_string(),
            "a5_u8"
        );
        assert_eq!(sprite().to_string(), "Sprite");
        assert_eq!(
            Type::Function(Rc::new(FunctionType {
                params: vec![Type::U8],
                ret: Type::U16,
            }))
            .to_string(),
            "f_u8_r_u16"
        );
    }

    #[test]
    fn widening_rules() {
        assert!(Type::U16.is_assignable_from(&Type::U8));
        assert!(Type::I16.is_assignable_from(&Type::U8));
        assert!(Type::I16.is_assignable_from(&Type::I8));
        // Narrowing is never implicit.
        assert!(!Type::U8.is_assignable_from(&Type::U16));
        // Same width, different signedness.
        assert!(!Type::U8.is_assignable_from(&Type::I8));
        assert!(!Type::I8.is_assignable_from(&Type::U8));
        assert!(!Type::U16.is_assignable_from(&Type::I16));
        // Identity always holds.
        assert!(sprite().is_assignable_from(&sprite()));
    }

    #[test]
    fn cast_rules() {
        assert!(Type::U16.can_cast_to(&Type::I8));
        assert!(Type::I24.can_cast_to(&Type::U8));
        assert!(!Type::Bool.can_cast_to(&Type::U8));
        assert!(!sprite().can_cast_to(&Type::U16));

        let flags = Type::Bits(Rc::new(BitStructType {
            name: "Attr".to_string(),
            underlying: Type::U8,
            fields: vec![(
                "ink".to_string(),
                BitField {
                    bit_offset: 0,
                    bit_width: 3,
                },
            )],
        }));
        assert!(flags.can_cast_to(&Type::U8));
        assert!(Type::U8.can_cast_to(&flags));
        assert!(!flags.can_cast_to(&Type::U16));
    }

    #[test]
    fn mangling() {
        assert_eq!(mangle("f", &[Type::U16]), "f$u16");
        assert_eq!(mangle("draw", &[Type::U8, Type::U8]), "draw$u8$u8");
        assert_eq!(mangle("main", &[]), "main");
        assert_eq!(demangle("draw$u8$u8"), "draw");
        assert_eq!(demangle("main"), "main");
    }
}
