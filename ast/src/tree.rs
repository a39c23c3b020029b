//! The syntax tree proper: declarations, statements, expressions and
//! syntax-level types.
//!
//! Every sum here is closed; the analyzer relies on exhaustive matching
//! rather than runtime kind tests. Nodes are immutable after parsing.

use crate::{ExprId, Pos};
use core::fmt;

/// A syntax-level type, before resolution against the type environment.
#[derive(Clone, PartialEq, Debug)]
pub enum TypeExpr {
    /// A named type: a built-in scalar, a user type, or `module.Type`.
    Named(String),
    /// A pointer to a base type.
    Pointer(Box<TypeExpr>),
    /// An array with an element type and a length expression. The length
    /// must resolve to a constant literal during analysis.
    Array {
        /// Element type.
        elem: Box<TypeExpr>,
        /// Length expression.
        len: Box<Expr>,
    },
    /// A function type, used for operator arguments in iterator chains.
    Fun {
        /// Parameter types.
        params: Vec<TypeExpr>,
        /// Return type.
        ret: Box<TypeExpr>,
    },
}

/// A binary operator.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BinOp {
    /// Addition.
    Add,
    /// Subtraction.
    Sub,
    /// Multiplication.
    Mul,
    /// Division.
    Div,
    /// Remainder.
    Mod,
    /// Bitwise or logical and.
    And,
    /// Bitwise or logical or.
    Or,
    /// Bitwise or logical exclusive or.
    Xor,
    /// Left shift.
    Shl,
    /// Right shift.
    Shr,
    /// Equality.
    Eq,
    /// Inequality.
    Ne,
    /// Less than.
    Lt,
    /// Less than or equal.
    Le,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Ge,
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::And => "&",
            Self::Or => "|",
            Self::Xor => "^",
            Self::Shl => "<<",
            Self::Shr => ">>",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        };
        f.write_str(s)
    }
}

/// A unary operator.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum UnOp {
    /// Arithmetic negation.
    Neg,
    /// Logical not.
    Not,
    /// Bitwise complement.
    BitNot,
    /// Address-of; yields a pointer to the operand.
    AddrOf,
}

impl fmt::Display for UnOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Neg => "-",
            Self::Not => "!",
            Self::BitNot => "~",
            Self::AddrOf => "&",
        };
        f.write_str(s)
    }
}

/// An iterator-chain operator name.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum IterMethod {
    /// Transform each element.
    Map,
    /// Keep elements satisfying a predicate.
    Filter,
    /// Consume each element for its side effect.
    ForEach,
    /// Keep the first `n` elements.
    Take,
    /// Drop the first `n` elements.
    Skip,
    /// Keep elements while a predicate holds.
    TakeWhile,
    /// Drop elements while a predicate holds.
    SkipWhile,
    /// Pair each element with its index.
    Enumerate,
    /// Observe each element without consuming it.
    Peek,
    /// Observe each element without consuming it.
    Inspect,
    /// Concatenate with a second source.
    Chain,
    /// Map each element to a sequence and flatten.
    FlatMap,
    /// Materialize the chain into an array.
    Collect,
    /// Fold the chain into an accumulator.
    Reduce,
    /// Pair elements with a second source.
    Zip,
}

impl fmt::Display for IterMethod {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Map => "map",
            Self::Filter => "filter",
            Self::ForEach => "forEach",
            Self::Take => "take",
            Self::Skip => "skip",
            Self::TakeWhile => "takeWhile",
            Self::SkipWhile => "skipWhile",
            Self::Enumerate => "enumerate",
            Self::Peek => "peek",
            Self::Inspect => "inspect",
            Self::Chain => "chain",
            Self::FlatMap => "flatMap",
            Self::Collect => "collect",
            Self::Reduce => "reduce",
            Self::Zip => "zip",
        };
        f.write_str(s)
    }
}

/// One operator application in an iterator chain.
#[derive(Clone, PartialEq, Debug)]
pub struct IterOp {
    /// Which operator.
    pub method: IterMethod,
    /// Operator arguments (a function reference, a count, a second source).
    pub args: Vec<Expr>,
    /// Position of the operator application.
    pub pos: Pos,
}

/// A lambda parameter.
#[derive(Clone, PartialEq, Debug)]
pub struct LambdaParam {
    /// Parameter name.
    pub name: String,
    /// Optional declared type; inferred from context when absent.
    pub ty: Option<TypeExpr>,
}

/// An expression node.
#[derive(Clone, PartialEq, Debug)]
pub struct Expr {
    /// Compilation-unique node identity.
    pub id: ExprId,
    /// Source position.
    pub pos: Pos,
    /// The expression itself.
    pub kind: ExprKind,
}

/// The expression sum.
#[derive(Clone, PartialEq, Debug)]
pub enum ExprKind {
    /// Integer literal. Width is inferred during analysis.
    IntLit(i64),
    /// Boolean literal.
    BoolLit(bool),
    /// String literal; interned into the module string table when lowered.
    StrLit(String),
    /// Identifier reference.
    Ident(String),
    /// Array literal.
    ArrayLit(Vec<Expr>),
    /// Binary operation.
    Binary {
        /// Operator.
        op: BinOp,
        /// Left operand.
        lhs: Box<Expr>,
        /// Right operand.
        rhs: Box<Expr>,
    },
    /// Unary operation.
    Unary {
        /// Operator.
        op: UnOp,
        /// Operand.
        operand: Box<Expr>,
    },
    /// Function call. The callee is an identifier or a module-qualified
    /// field access.
    Call {
        /// Callee expression.
        callee: Box<Expr>,
        /// Argument expressions.
        args: Vec<Expr>,
    },
    /// Struct literal `Name { field: value, .. }`.
    StructLit {
        /// Struct type name.
        name: String,
        /// Field initializers in written order.
        fields: Vec<(String, Expr)>,
    },
    /// Field access `base.field`, including module-qualified references,
    /// enum variants and bit-struct fields.
    Field {
        /// Base expression.
        base: Box<Expr>,
        /// Field name.
        field: String,
    },
    /// Index access `base[index]`.
    Index {
        /// Base expression.
        base: Box<Expr>,
        /// Index expression.
        index: Box<Expr>,
    },
    /// Explicit cast `value as ty`.
    Cast {
        /// Value being cast.
        value: Box<Expr>,
        /// Target type.
        ty: TypeExpr,
    },
    /// Half-open integer range `lo..hi`.
    Range {
        /// Lower bound, inclusive.
        lo: Box<Expr>,
        /// Upper bound, exclusive.
        hi: Box<Expr>,
    },
    /// An iterator chain rooted at a source expression.
    IterChain {
        /// The source being iterated (an array-typed expression).
        source: Box<Expr>,
        /// Operator applications in written order.
        ops: Vec<IterOp>,
    },
    /// A lambda literal.
    Lambda {
        /// Parameters.
        params: Vec<LambdaParam>,
        /// Body expression.
        body: Box<Expr>,
    },
    /// Inline assembly yielding a value.
    Asm(String),
    /// A compile-time `@`-function reference such as `@hex(n)` or
    /// `@build_time`. Evaluated during analysis; lowers to the evaluated
    /// constant, or 0 when evaluation fails.
    CompileTime {
        /// Name without the `@` sigil, e.g. `hex` or `log.info`.
        name: String,
        /// Arguments.
        args: Vec<Expr>,
    },
}

/// Iterator-loop element binding mode.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LoopMode {
    /// The element is addressed in place through a pointer.
    Ref,
    /// The element is copied into a fixed static buffer before the body
    /// runs and copied back afterwards.
    Into,
}

/// A statement node.
#[derive(Clone, PartialEq, Debug)]
pub struct Stmt {
    /// Source position.
    pub pos: Pos,
    /// The statement itself.
    pub kind: StmtKind,
}

/// The statement sum.
#[derive(Clone, PartialEq, Debug)]
pub enum StmtKind {
    /// Local variable declaration.
    Let {
        /// Variable name.
        name: String,
        /// Declared type; inferred from the initializer when absent.
        ty: Option<TypeExpr>,
        /// Initializer.
        value: Option<Expr>,
        /// Whether the binding is mutable.
        mutable: bool,
    },
    /// Assignment to an identifier, indexed element, struct field or
    /// bit-struct field.
    Assign {
        /// Assignment target.
        target: Expr,
        /// Value.
        value: Expr,
    },
    /// Return, with an optional value.
    Return(Option<Expr>),
    /// Conditional.
    If {
        /// Condition.
        cond: Expr,
        /// Then branch.
        then_body: Vec<Stmt>,
        /// Optional else branch.
        else_body: Option<Vec<Stmt>>,
    },
    /// While loop.
    While {
        /// Condition.
        cond: Expr,
        /// Body.
        body: Vec<Stmt>,
    },
    /// A bare block with its own scope.
    Block(Vec<Stmt>),
    /// Range-for: `for i in lo..hi { .. }`.
    For {
        /// Induction variable name.
        var: String,
        /// Lower bound, inclusive.
        lo: Expr,
        /// Upper bound, exclusive.
        hi: Expr,
        /// Body.
        body: Vec<Stmt>,
    },
    /// Countdown loop: `do n times { .. }`.
    Times {
        /// Iteration count.
        count: Expr,
        /// Body.
        body: Vec<Stmt>,
    },
    /// Typed iterator loop: `loop at array -> item { .. }`.
    LoopAt {
        /// The array being iterated.
        array: Expr,
        /// Element binding name.
        item: String,
        /// Element binding mode.
        mode: LoopMode,
        /// Body.
        body: Vec<Stmt>,
    },
    /// Inline assembly.
    Asm(String),
    /// An expression evaluated for its effect.
    Expr(Expr),
}

/// A function parameter declaration.
#[derive(Clone, PartialEq, Debug)]
pub struct ParamDecl {
    /// Parameter name.
    pub name: String,
    /// Declared type.
    pub ty: TypeExpr,
    /// Position of the declaration.
    pub pos: Pos,
}

/// An attribute attached to a declaration, e.g. `@abi("smc")`.
#[derive(Clone, PartialEq, Debug)]
pub struct Attribute {
    /// Attribute name without the `@` sigil.
    pub name: String,
    /// Optional string payload.
    pub value: Option<String>,
    /// Position of the attribute.
    pub pos: Pos,
}

/// A function declaration.
#[derive(Clone, PartialEq, Debug)]
pub struct FunctionDecl {
    /// Source-level (unmangled) name.
    pub name: String,
    /// Formal parameters.
    pub params: Vec<ParamDecl>,
    /// Declared return type; `void` when absent.
    pub return_type: Option<TypeExpr>,
    /// Optional error type from the `?` suffix form.
    pub error_type: Option<TypeExpr>,
    /// Attributes, notably `@abi`.
    pub attributes: Vec<Attribute>,
    /// Body statements.
    pub body: Vec<Stmt>,
    /// Whether the function is exported from the module.
    pub public: bool,
}

/// A struct field declaration.
#[derive(Clone, PartialEq, Debug)]
pub struct FieldDecl {
    /// Field name.
    pub name: String,
    /// Field type.
    pub ty: TypeExpr,
}

/// An enum variant declaration.
#[derive(Clone, PartialEq, Debug)]
pub struct EnumVariant {
    /// Variant name.
    pub name: String,
    /// Explicit value; successor of the previous variant when absent.
    pub value: Option<i64>,
}

/// A bit-struct field declaration. Bit offsets are assigned in declaration
/// order during analysis.
#[derive(Clone, PartialEq, Debug)]
pub struct BitFieldDecl {
    /// Field name.
    pub name: String,
    /// Width in bits.
    pub width: u8,
}

/// The body of an `@minz { .. }` block.
#[derive(Clone, PartialEq, Debug)]
pub enum MinzBody {
    /// Structured statements, when the block parsed as such.
    Stmts(Vec<Stmt>),
    /// Raw text fallback.
    Raw(String),
}

/// A top-level declaration node.
#[derive(Clone, PartialEq, Debug)]
pub struct Decl {
    /// Source position.
    pub pos: Pos,
    /// The declaration itself.
    pub kind: DeclKind,
}

/// The declaration sum.
#[derive(Clone, PartialEq, Debug)]
pub enum DeclKind {
    /// A function.
    Function(FunctionDecl),
    /// A struct type.
    Struct {
        /// Type name.
        name: String,
        /// Fields in declaration order.
        fields: Vec<FieldDecl>,
    },
    /// An enum type.
    Enum {
        /// Type name.
        name: String,
        /// Variants in declaration order.
        variants: Vec<EnumVariant>,
    },
    /// A bit-struct over a u8 or u16 underlying type.
    BitStruct {
        /// Type name.
        name: String,
        /// Underlying type expression.
        underlying: TypeExpr,
        /// Fields in declaration order, packed from bit 0.
        fields: Vec<BitFieldDecl>,
    },
    /// A type alias.
    TypeAlias {
        /// Alias name.
        name: String,
        /// Aliased type.
        ty: TypeExpr,
    },
    /// A constant.
    Const {
        /// Constant name.
        name: String,
        /// Declared type; inferred when absent.
        ty: Option<TypeExpr>,
        /// Initializer.
        value: Expr,
        /// Whether the constant is exported.
        public: bool,
    },
    /// A global variable.
    Global {
        /// Global name.
        name: String,
        /// Declared type; inferred from the initializer when absent.
        ty: Option<TypeExpr>,
        /// Optional initializer.
        value: Option<Expr>,
        /// Whether the global is exported.
        public: bool,
    },
    /// A module import.
    Import {
        /// Dotted module path, e.g. `zx.screen`.
        path: String,
        /// Optional local alias.
        alias: Option<String>,
    },
    /// An `@define` template definition. Dropped from the tree by the
    /// template expander.
    TemplateDef {
        /// Placeholder parameter names.
        params: Vec<String>,
        /// Body text with `{0}`..`{N-1}` placeholders.
        body: String,
    },
    /// A template invocation, replaced by the expansion's declarations.
    TemplateUse {
        /// Argument expressions; must be literals or identifiers.
        args: Vec<Expr>,
    },
    /// An `@incbin("path")` directive: the backend includes the file's
    /// bytes verbatim.
    Incbin(String),
    /// An `@minz { .. }` compile-time execution block.
    MinzBlock(MinzBody),
}
