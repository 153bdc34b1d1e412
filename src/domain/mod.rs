//! Domain layer: rule tree model and the pure parts of the compiler
//!
//! This layer is independent of external concerns (no file I/O, no CLI, no config loading).

pub mod arena;
pub mod catalog;
pub mod error;
pub mod pointer;
pub mod provenance;
pub mod serialize;
pub mod variables;

pub use arena::{Capability, MatchPolicy, RuleArena, RuleId, RuleNode, Variable, VariableTable};
pub use catalog::{CapabilityDescriptor, CapabilityKind, Catalog, CatalogFile, VariableHandling};
pub use error::{CompileError, CompileResult, FragmentFailure};
pub use pointer::{locate_in_text, resolve_provenance, TextPosition};
pub use provenance::Provenance;
pub use serialize::{serialize, serialize_rules, Document};
