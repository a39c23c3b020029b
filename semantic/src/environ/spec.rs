//! Trait definitions of the parser and module-loader collaborators.

use minz_ast::{Decl, NodeIds, Pos};
use thiserror::Error;

/// A parse failure, surfaced verbatim into the diagnostics.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("{pos}: {message}")]
pub struct ParseError {
    /// What went wrong.
    pub message: String,
    /// Where it went wrong.
    pub pos: Pos,
}

/// The syntax-tree producer.
///
/// Implementations must preserve source positions on every node and must
/// mint expression identities from the supplied [`NodeIds`] allocator so
/// that re-parses share the identity space of the original parse. The
/// analyzer may call `parse` re-entrantly while a parse result is being
/// analyzed (template expansion, `@emit` output).
pub trait Parser {
    /// Parse a source buffer into top-level declarations.
    fn parse(&mut self, source: &str, file: &str, ids: &mut NodeIds)
        -> Result<Vec<Decl>, ParseError>;
}

/// A successfully loaded module.
#[derive(Debug)]
pub struct LoadedModule {
    /// The module's declarations.
    pub decls: Vec<Decl>,
    /// The name under which the module's symbols are prefixed.
    pub module_name: String,
}

/// A module-load failure.
#[derive(Debug, Error)]
pub enum LoadError {
    /// No file matched the module path on any search path.
    #[error("module `{0}` not found on any search path")]
    NotFound(String),
    /// The module file could not be read.
    #[error("module `{path}`: {source}")]
    Io {
        /// The module path as written.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The module file did not parse.
    #[error("module `{path}`: {source}")]
    Parse {
        /// The module path as written.
        path: String,
        /// The parse failure.
        #[source]
        source: ParseError,
    },
}

/// The module resolver.
///
/// Built-in module names (`std`, `zx.screen`, `zx.input`, `zx.sound`) are
/// seeded directly by the analyzer and never reach the loader.
pub trait ModuleLoader {
    /// Resolve a dotted module path and parse the module file.
    fn load(
        &mut self,
        path: &str,
        parser: &mut dyn Parser,
        ids: &mut NodeIds,
    ) -> Result<LoadedModule, LoadError>;
}
