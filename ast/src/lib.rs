//! Syntax tree definitions for the MinZ compiler.
//!
//! This crate is the data model shared between the parser and the semantic
//! analyzer. The parser produces a list of [`Decl`] nodes; the analyzer
//! consumes them and never mutates them, keeping any inferred information in
//! side tables keyed by [`ExprId`].
//!
//! Nodes carry their source position ([`Pos`]) so that every diagnostic can
//! point back at the offending construct. Expression nodes additionally
//! carry a compilation-unique [`ExprId`] minted from a [`NodeIds`] allocator;
//! re-parses of generated source (template expansion, `@emit` output) share
//! the same allocator so identities never collide.

#![deny(missing_docs)]

mod sourceloc;
mod tree;

pub use crate::sourceloc::Pos;
pub use crate::tree::{
    Attribute, BinOp, BitFieldDecl, Decl, DeclKind, EnumVariant, Expr, ExprKind, FieldDecl,
    FunctionDecl, IterMethod, IterOp, LambdaParam, LoopMode, MinzBody, ParamDecl, Stmt, StmtKind,
    TypeExpr, UnOp,
};

use cranelift_entity::entity_impl;

/// An opaque reference to an expression node.
///
/// Expression identities are stable for the lifetime of one compilation and
/// are the keys of the analyzer's expression-type side table.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExprId(u32);
entity_impl!(ExprId, "expr");

/// Allocator for [`ExprId`]s.
///
/// One allocator is shared by every parse performed during a compilation,
/// including re-parses of compile-time generated source.
#[derive(Default)]
pub struct NodeIds {
    next: u32,
}

impl NodeIds {
    /// Create a fresh allocator starting at id 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint the next expression id.
    pub fn next(&mut self) -> ExprId {
        let id = ExprId::from_u32(self.next);
        self.next += 1;
        id
    }
}
