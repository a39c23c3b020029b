//! Semantic analysis for the MinZ compiler.
//!
//! This crate turns a parsed syntax tree into a typed, optimized
//! [`Module`](minz_codegen::ir::Module) ready for the Z80 backend. The
//! pipeline, driven by [`analyze`], runs in a fixed order:
//!
//! 1. `@define` template expansion (re-parsing expansions through the
//!    parser collaborator);
//! 2. built-in and imported symbol seeding;
//! 3. a declaration pre-pass registering types, constants and function
//!    signatures, so forward references are legal;
//! 4. the body pass: lowering statements and expressions to IR, fusing
//!    iterator chains, executing `@minz` blocks, resolving overloads;
//! 5. constant folding and dead-code elimination from `minz-codegen`.
//!
//! Analysis never stops at the first problem: diagnostics accumulate in an
//! [`ErrorCollector`](errors::ErrorCollector) and the pipeline keeps going
//! wherever the rest of the tree is independently analyzable. The final
//! call returns the module only when the collector is empty.

#![deny(missing_docs)]

pub mod analyzer;
pub mod builtins;
pub mod environ;
pub mod errors;
pub mod loader;
pub mod scopes;

mod comptime;
mod declarations;
mod iterator;
mod lower;
mod overload;
mod prune;
mod template;

pub use crate::analyzer::{analyze, analyze_source, Analyzer};
pub use crate::comptime::LogLevel;
pub use crate::environ::{LoadedModule, ModuleLoader, ParseError, Parser};
pub use crate::errors::{AnalyzeError, Diagnostic, ErrorCollector};
