//! Compile-time errors (no I/O concerns)

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::domain::catalog::CapabilityKind;

/// Why a fragment was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FragmentFailure {
    /// The file is not valid JSON.
    Parse {
        message: String,
        line: usize,
        column: usize,
    },
    /// The document violates the rule-format schema. Only the first violation is kept.
    Invalid {
        message: String,
        pointer: String,
        line: usize,
        excerpt: String,
    },
    /// The file includes itself, directly or through other fragments.
    IncludeCycle,
}

impl FragmentFailure {
    /// 1-based line in the fragment text, when known.
    pub fn line(&self) -> Option<usize> {
        match self {
            FragmentFailure::Parse { line, .. } | FragmentFailure::Invalid { line, .. } => {
                Some(*line)
            }
            FragmentFailure::IncludeCycle => None,
        }
    }
}

impl fmt::Display for FragmentFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FragmentFailure::Parse {
                message,
                line,
                column,
            } => write!(f, "invalid JSON at line {line}, column {column}: {message}"),
            FragmentFailure::Invalid {
                message,
                pointer,
                line,
                excerpt,
            } => write!(
                f,
                "line {line}: {message} (at {pointer})\n  {line} | {excerpt}"
            ),
            FragmentFailure::IncludeCycle => write!(f, "fragment includes itself"),
        }
    }
}

/// Errors raised while building or importing into a rule tree.
///
/// All of them abort the compile run; nothing is retried and no partial tree is returned.
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("type mismatch in {capability} option '{option}': expected {expected}")]
    TypeMismatch {
        capability: String,
        option: String,
        expected: &'static str,
    },

    #[error("bad fragment {path}: {failure}")]
    BadFragment {
        path: PathBuf,
        failure: FragmentFailure,
    },

    #[error("cannot read fragment {path}: {source}")]
    FragmentIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unknown {kind} '{name}'")]
    UnknownCapability { kind: CapabilityKind, name: String },

    #[error("invalid descriptor for {kind} '{name}': {reason}")]
    InvalidDescriptor {
        kind: CapabilityKind,
        name: String,
        reason: String,
    },

    #[error("unknown rule format '{0}'")]
    UnknownRuleFormat(String),
}

impl CompileError {
    pub fn type_mismatch(
        capability: impl Into<String>,
        option: impl Into<String>,
        expected: &'static str,
    ) -> Self {
        Self::TypeMismatch {
            capability: capability.into(),
            option: option.into(),
            expected,
        }
    }

    pub fn bad_fragment(path: impl Into<PathBuf>, failure: FragmentFailure) -> Self {
        Self::BadFragment {
            path: path.into(),
            failure,
        }
    }
}

/// Result type for tree building.
pub type CompileResult<T> = Result<T, CompileError>;
