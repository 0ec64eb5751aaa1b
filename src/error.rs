//! Error types for the table engine.
//!
//! Storage primitives (`Sequence`, `Column`) report plain `String` errors;
//! everything above them returns `EngineError` so callers can match on the
//! failure category.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// Update data does not match the table schema.
    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    /// View or table configuration references unknown or colliding columns.
    #[error("configuration error: {0}")]
    Config(String),

    /// Computed-column dependency graph contains a cycle (names on the cycle).
    #[error("computed column cycle: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    /// A computed column would shadow an existing column.
    #[error("computed column '{0}' collides with an existing column")]
    NameCollision(String),

    /// Function arity or input/output type mismatch.
    #[error("type error: {0}")]
    Type(String),

    /// Operation on a deleted table or view.
    #[error("{0} used after delete")]
    UseAfterFree(&'static str),

    /// Malformed JSON or filter text.
    #[error("parse error: {0}")]
    Parse(String),

    /// Row or slot lookup outside the store.
    #[error("out of range: {0}")]
    OutOfRange(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Parse(err.to_string())
    }
}
