//! Gate errors

use thiserror::Error;

/// Errors surfaced by registry queries and configuration.
///
/// Validation problems are never errors: they are collected as issues on a
/// [`ValidationReport`](crate::skills::ValidationReport).
#[derive(Error, Debug)]
pub enum GateError {
    #[error("Skill '{0}' not found")]
    SkillNotFound(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, GateError>;
