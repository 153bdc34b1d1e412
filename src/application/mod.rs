//! Application layer: the compiler and fragment import
//!
//! This layer orchestrates domain logic and depends on I/O boundary traits.

pub mod builder;
pub mod error;
pub mod error_ext;
pub mod fragment;
pub mod schema;

pub use builder::{Compilation, Compiler, CompileSession, CriteriaSet, RuleScope};
pub use error::{ApplicationError, ApplicationResult};
pub use error_ext::{IoResultExt, JsonResultExt};
pub use fragment::{resolve_fragment_path, FragmentImporter};
pub use schema::{rule_format_schema, SchemaRegistry, SchemaViolation, DEFAULT_RULE_FORMAT};
