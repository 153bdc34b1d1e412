//! rulecraft: compile builder-style CDN delivery rules into a rule tree document.
//!
//! Operators describe rules with [`application::RuleScope`] handles or import JSON
//! fragments. Every criteria, behavior and variable records where it came from, so a
//! validation error reported as a JSON pointer into the compiled document can be traced
//! back to a source file and line with [`domain::resolve_provenance`].

pub mod application;
pub mod cli;
pub mod config;
pub mod domain;
pub mod exitcode;
pub mod infrastructure;
pub mod util;

pub use application::{Compilation, Compiler, CriteriaSet, RuleScope};
pub use config::Settings;
pub use domain::{
    resolve_provenance, CapabilityDescriptor, CapabilityKind, Catalog, CompileError,
    CompileResult, Document, RuleArena,
};
