//! Error types for netc-opt.

use thiserror::Error;

use netc_core::{CoreError, PrimitiveId};

/// A failure reported by a [`Backend`](crate::backend::Backend).
#[derive(Debug, Error)]
#[error("backend failed on '{id}': {message}")]
pub struct BackendError {
    pub id: PrimitiveId,
    pub message: String,
}

impl BackendError {
    pub fn new(id: impl Into<PrimitiveId>, message: impl Into<String>) -> Self {
        BackendError {
            id: id.into(),
            message: message.into(),
        }
    }
}

/// Errors produced while building a program.
#[derive(Debug, Error)]
pub enum OptError {
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A pass left a node ahead of one of its dependencies.
    #[error("processing order check failed after pass '{pass}': node '{node}' precedes a dependency")]
    InvariantViolation { pass: String, node: PrimitiveId },

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("failed to write graph dump: {0}")]
    Dump(#[source] std::io::Error),
}
