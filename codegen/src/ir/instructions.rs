//! Instruction formats and opcodes.
//!
//! Instructions are flat records rather than a deep tree: an opcode, an
//! optional destination register, up to two source registers, optional
//! immediates, an optional type, a symbolic target, and a call-argument
//! list. The backend consumes them in linear order; labels are defined by
//! `Label` instructions in the stream.

use super::{Label, Reg, Type};
use core::fmt;
use smallvec::SmallVec;

/// An instruction opcode.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub enum Opcode {
    // Arithmetic and bitwise.
    /// dest = src1 + src2.
    Add,
    /// dest = src1 - src2.
    Sub,
    /// dest = src1 * src2.
    Mul,
    /// dest = src1 / src2.
    Div,
    /// dest = src1 % src2.
    Mod,
    /// dest = -src1.
    Neg,
    /// dest = src1 & src2 (logical `and` on bool).
    And,
    /// dest = src1 | src2 (logical `or` on bool).
    Or,
    /// dest = src1 ^ src2.
    Xor,
    /// dest = !src1 (logical not).
    Not,
    /// dest = ~src1 (bitwise complement).
    BitNot,
    /// dest = src1 << src2.
    Shl,
    /// dest = src1 >> src2.
    Shr,

    // Comparison; dest is always bool.
    /// dest = src1 == src2.
    Eq,
    /// dest = src1 != src2.
    Ne,
    /// dest = src1 < src2.
    Lt,
    /// dest = src1 <= src2.
    Le,
    /// dest = src1 > src2.
    Gt,
    /// dest = src1 >= src2.
    Ge,

    // Loads and stores.
    /// dest = imm.
    LoadConst,
    /// dest = value of the variable or global named by the target.
    LoadVar,
    /// variable or global named by the target = src1.
    StoreVar,
    /// dest = value of the parameter slot `target: Param(i)`. Emitted
    /// inside SMC functions, where the backend reads the patched immediate.
    LoadParam,
    /// dest = field at byte offset imm of the struct addressed by src1.
    LoadField,
    /// field at byte offset imm of the struct addressed by src1 = src2.
    StoreField,
    /// dest = element src2 of the array addressed by src1.
    LoadIndex,
    /// element addressed by src1 = src2. The address is the array base plus
    /// the scaled index, computed by the preceding instructions; the type
    /// annotation is the element type.
    StoreIndex,
    /// dest = byte(s) at the address in src1.
    LoadPtr,
    /// byte(s) at the address in src1 = src2.
    StorePtr,
    /// dest = byte(s) at the absolute address imm.
    LoadDirect,
    /// byte(s) at the absolute address imm = src1.
    StoreDirect,
    /// dest = address of the label, string or symbol named by the target.
    LoadLabel,
    /// dest = bit field (imm = bit offset, imm2 = bit width) of src1.
    LoadBits,
    /// bit field (imm = bit offset, imm2 = bit width) of src1 = src2;
    /// dest receives the updated underlying value.
    StoreBits,

    // Control flow.
    /// Defines the jump target `target: Label(l)`.
    Label,
    /// Unconditional jump to the target label.
    Jump,
    /// Jump to the target label when src1 is true.
    JumpIf,
    /// Jump to the target label when src1 is false.
    JumpIfNot,
    /// Decrement the counter in src1 and jump to the target label while it
    /// is non-zero; the Z80 `DJNZ` back edge.
    Djnz,
    /// Call the function named by the target with `args`; dest receives the
    /// result for non-void callees.
    Call,
    /// Return src1 (or nothing for void functions).
    Return,

    // Memory and assembly.
    /// dest = address of a freshly reserved buffer of imm bytes.
    Alloc,
    /// Inline assembly pass-through; the text rides in the comment field.
    Asm,
    /// Copy imm bytes from the element addressed by src1 into the static
    /// buffer at absolute address imm2 (iterator INTO mode entry).
    CopyIn,
    /// Copy imm bytes from the static buffer at absolute address imm2 back
    /// to the element addressed by src1 (iterator INTO mode write-back).
    CopyOut,
}

impl Opcode {
    /// Is this an unconditional transfer that ends straight-line execution?
    pub fn is_terminator(self) -> bool {
        matches!(self, Self::Jump | Self::Return)
    }

    /// Is this any branch (conditional or not)?
    pub fn is_branch(self) -> bool {
        matches!(self, Self::Jump | Self::JumpIf | Self::JumpIfNot | Self::Djnz)
    }

    /// Is this a comparison producing a bool?
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::Eq | Self::Ne | Self::Lt | Self::Le | Self::Gt | Self::Ge
        )
    }

    /// Does this opcode write memory or otherwise have an effect beyond its
    /// destination register? Calls are classified separately against the
    /// side-effect database.
    pub fn is_store(self) -> bool {
        matches!(
            self,
            Self::StoreVar
                | Self::StoreField
                | Self::StoreIndex
                | Self::StorePtr
                | Self::StoreDirect
                | Self::StoreBits
                | Self::CopyIn
                | Self::CopyOut
        )
    }

    /// Can this instruction be removed when its destination is unread?
    ///
    /// Branches, labels, stores, calls, returns and inline assembly can
    /// never be removed on liveness grounds alone.
    pub fn is_removable_def(self) -> bool {
        !(self.is_branch()
            || self.is_store()
            || matches!(self, Self::Label | Self::Call | Self::Return | Self::Asm))
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::Mod => "mod",
            Self::Neg => "neg",
            Self::And => "and",
            Self::Or => "or",
            Self::Xor => "xor",
            Self::Not => "not",
            Self::BitNot => "bitnot",
            Self::Shl => "shl",
            Self::Shr => "shr",
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Lt => "lt",
            Self::Le => "le",
            Self::Gt => "gt",
            Self::Ge => "ge",
            Self::LoadConst => "load_const",
            Self::LoadVar => "load_var",
            Self::StoreVar => "store_var",
            Self::LoadParam => "load_param",
            Self::LoadField => "load_field",
            Self::StoreField => "store_field",
            Self::LoadIndex => "load_index",
            Self::StoreIndex => "store_index",
            Self::LoadPtr => "load_ptr",
            Self::StorePtr => "store_ptr",
            Self::LoadDirect => "load_direct",
            Self::StoreDirect => "store_direct",
            Self::LoadLabel => "load_label",
            Self::LoadBits => "load_bits",
            Self::StoreBits => "store_bits",
            Self::Label => "label",
            Self::Jump => "jump",
            Self::JumpIf => "jump_if",
            Self::JumpIfNot => "jump_if_not",
            Self::Djnz => "djnz",
            Self::Call => "call",
            Self::Return => "return",
            Self::Alloc => "alloc",
            Self::Asm => "asm",
            Self::CopyIn => "copy_in",
            Self::CopyOut => "copy_out",
        };
        f.write_str(s)
    }
}

/// A symbolic instruction target.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Target {
    /// A code label within the current function.
    Label(Label),
    /// A named symbol: a local, global or function, resolved against the
    /// owning function's tables and then the module.
    Symbol(String),
    /// An entry in the module string table, by label.
    StringLit(String),
    /// A parameter slot, by index, for SMC parameter loads.
    Param(u8),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Label(l) => write!(f, "{l}"),
            Self::Symbol(s) => write!(f, "{s}"),
            Self::StringLit(s) => write!(f, "{s}"),
            Self::Param(i) => write!(f, "param{i}"),
        }
    }
}

/// A physical-register preference passed through to the backend.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum RegHint {
    /// Prefer B; used for DJNZ loop counters.
    B,
    /// Prefer HL; used for element pointers.
    Hl,
    /// Prefer DE; used for element strides.
    De,
    /// Prefer the HL/DE pair; used for 16-bit pointer advances.
    HlDe,
    /// Prefer the shadow register set.
    Shadow,
}

impl fmt::Display for RegHint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::B => "b",
            Self::Hl => "hl",
            Self::De => "de",
            Self::HlDe => "hl+de",
            Self::Shadow => "shadow",
        })
    }
}

/// One IR instruction.
///
/// Fields not used by an opcode are `None`; the verifier enforces the
/// per-opcode shape the backend assumes.
#[derive(Clone, PartialEq, Debug)]
pub struct Inst {
    /// The operation.
    pub opcode: Opcode,
    /// Destination register.
    pub dest: Option<Reg>,
    /// First source register.
    pub src1: Option<Reg>,
    /// Second source register.
    pub src2: Option<Reg>,
    /// Primary immediate.
    pub imm: Option<i64>,
    /// Secondary immediate (bit widths, buffer addresses).
    pub imm2: Option<i64>,
    /// Result or operand type.
    pub ty: Option<Type>,
    /// Symbolic target.
    pub target: Option<Target>,
    /// Call arguments.
    pub args: SmallVec<[Reg; 4]>,
    /// Free-form annotation carried into listings; also the text payload of
    /// `Asm` instructions.
    pub comment: Option<String>,
    /// Physical-register preference for the backend.
    pub hint: Option<RegHint>,
}

impl Inst {
    /// Create an instruction with every optional field empty.
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            dest: None,
            src1: None,
            src2: None,
            imm: None,
            imm2: None,
            ty: None,
            target: None,
            args: SmallVec::new(),
            comment: None,
            hint: None,
        }
    }

    /// Set the destination register.
    pub fn dest(mut self, r: Reg) -> Self {
        self.dest = Some(r);
        self
    }

    /// Set the first source register.
    pub fn src1(mut self, r: Reg) -> Self {
        self.src1 = Some(r);
        self
    }

    /// Set the second source register.
    pub fn src2(mut self, r: Reg) -> Self {
        self.src2 = Some(r);
        self
    }

    /// Set the primary immediate.
    pub fn imm(mut self, v: i64) -> Self {
        self.imm = Some(v);
        self
    }

    /// Set the secondary immediate.
    pub fn imm2(mut self, v: i64) -> Self {
        self.imm2 = Some(v);
        self
    }

    /// Set the type annotation.
    pub fn ty(mut self, ty: Type) -> Self {
        self.ty = Some(ty);
        self
    }

    /// Set the symbolic target.
    pub fn target(mut self, t: Target) -> Self {
        self.target = Some(t);
        self
    }

    /// Set the call-argument list.
    pub fn args<I: IntoIterator<Item = Reg>>(mut self, regs: I) -> Self {
        self.args = regs.into_iter().collect();
        self
    }

    /// Set the comment.
    pub fn comment(mut self, text: impl Into<String>) -> Self {
        self.comment = Some(text.into());
        self
    }

    /// Set the register hint.
    pub fn hint(mut self, hint: RegHint) -> Self {
        self.hint = Some(hint);
        self
    }

    /// Registers read by this instruction, in operand order.
    pub fn uses(&self) -> impl Iterator<Item = Reg> + '_ {
        self.src1
            .into_iter()
            .chain(self.src2)
            .chain(self.args.iter().copied())
    }
}

impl fmt::Display for Inst {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.opcode == Opcode::Label {
            if let Some(t) = &self.target {
                return write!(f, "{t}:");
            }
        }
        write!(f, "  {}", self.opcode)?;
        if let Some(ty) = &self.ty {
            write!(f, ".{ty}")?;
        }
        let mut sep = " ";
        if let Some(d) = self.dest {
            write!(f, "{sep}{d}")?;
            sep = ", ";
        }
        if let Some(s) = self.src1 {
            write!(f, "{sep}{s}")?;
            sep = ", ";
        }
        if let Some(s) = self.src2 {
            write!(f, "{sep}{s}")?;
            sep = ", ";
        }
        if let Some(v) = self.imm {
            write!(f, "{sep}{v}")?;
            sep = ", ";
        }
        if let Some(v) = self.imm2 {
            write!(f, "{sep}{v}")?;
            sep = ", ";
        }
        if let Some(t) = &self.target {
            write!(f, "{sep}{t}")?;
            sep = ", ";
        }
        for a in &self.args {
            write!(f, "{sep}{a}")?;
            sep = ", ";
        }
        if let Some(h) = self.hint {
            write!(f, " !{h}")?;
        }
        if let Some(c) = &self.comment {
            write!(f, " ; {c}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cranelift_entity::EntityRef;

    #[test]
    fn opcode_classes() {
        assert!(Opcode::Jump.is_terminator());
        assert!(Opcode::Return.is_terminator());
        assert!(!Opcode::JumpIfNot.is_terminator());
        assert!(Opcode::Djnz.is_branch());
        assert!(Opcode::StoreIndex.is_store());
        assert!(Opcode::Add.is_removable_def());
        assert!(!Opcode::Call.is_removable_def());
        assert!(!Opcode::Asm.is_removable_def());
    }

    #[test]
    fn display() {
        let inst = Inst::new(Opcode::Add)
            .dest(Reg::new(2))
            .src1(Reg::new(0))
            .src2(Reg::new(1))
            .ty(Type::U16);
        assert_eq!(inst.to_string(), "  add.u16 r2, r0, r1");

        let counter = Inst::new(Opcode::LoadConst)
            .dest(Reg::new(3))
            .imm(4)
            .ty(Type::U8)
            .hint(RegHint::B);
        assert_eq!(counter.to_string(), "  load_const.u8 r3, 4 !b");
    }
}
