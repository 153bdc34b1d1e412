//! Application-level errors (wraps compile errors)

use thiserror::Error;

use crate::domain::CompileError;

/// Application errors wrap compile errors and add application-level context.
#[derive(Error, Debug)]
pub enum ApplicationError {
    #[error("{0}")]
    Compile(#[from] CompileError),

    #[error("config error: {message}")]
    Config { message: String },

    #[error("invalid schema {version}: {message}")]
    Schema { version: String, message: String },

    #[error("operation failed: {context}")]
    OperationFailed {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Result type for application layer operations.
pub type ApplicationResult<T> = Result<T, ApplicationError>;
