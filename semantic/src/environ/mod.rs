//! Collaborator interfaces of the analyzer.
//!
//! The analyzer is deliberately ignorant of the concrete front end: it
//! speaks to a [`Parser`] for source text (including text it generates
//! itself during template expansion and compile-time execution) and to a
//! [`ModuleLoader`] for imported modules. [`DummyParser`] is a minimal
//! parser over the tested subset of the surface language, for driving the
//! pipeline without the production front end.

mod dummy;
mod spec;

pub use self::dummy::DummyParser;
pub use self::spec::{LoadError, LoadedModule, ModuleLoader, ParseError, Parser};
