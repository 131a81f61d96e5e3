//! Core error types for netc-core.
//!
//! Uses `thiserror` for structured, matchable error variants covering
//! malformed topologies, cycles and misuse of the surgery primitives.
//! Precondition failures that passes are expected to probe for
//! (`extract_and_remove`, `remove_if_dangling`) are reported as `bool`
//! results instead.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::id::{NodeKey, PrimitiveId};
use crate::primitive::PrimitiveType;

/// Errors produced by the netc-core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Two primitives (or a rename target) share one id.
    #[error("duplicate primitive id: '{id}'")]
    DuplicateId { id: PrimitiveId },

    /// A primitive names an input that does not exist in the program.
    #[error("program doesn't contain primitive '{dependency}' that is input to '{id}'")]
    UnresolvedDependency {
        id: PrimitiveId,
        dependency: PrimitiveId,
    },

    /// No node with this id.
    #[error("node not found: '{id}'")]
    NodeNotFound { id: PrimitiveId },

    /// A key that does not (or no longer) belongs to a live node.
    #[error("unknown node key {key}")]
    UnknownKey { key: NodeKey },

    /// Typed lookup found a node of another primitive type.
    #[error("node '{id}' is {actual:?}, expected {expected:?}")]
    TypeMismatch {
        id: PrimitiveId,
        expected: PrimitiveType,
        actual: PrimitiveType,
    },

    /// The graph contains (or an edit would create) a dependency cycle.
    #[error("dependency cycle through '{id}'")]
    Cycle { id: PrimitiveId },

    /// Two nodes are not connected the way the operation requires.
    #[error("invalid connection: {reason}")]
    InvalidConnection { reason: String },

    /// A dependency position past the end of a node's dependency list.
    #[error("node '{id}' has {count} dependencies, index {index} is out of range")]
    DependencyIndex {
        id: PrimitiveId,
        index: usize,
        count: usize,
    },

    /// A node that must be detached still has edges (or is an output).
    #[error("node '{id}' must be detached: {reason}")]
    NotDetached { id: PrimitiveId, reason: String },

    /// Output nodes keep their ids.
    #[error("trying to rename output node '{id}'")]
    RenameOutput { id: PrimitiveId },

    /// A declared topology input has dependencies.
    #[error("declared input '{id}' has dependencies")]
    InputHasDependencies { id: PrimitiveId },
}

/// Failure to load a topology or options file.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The file could not be read.
    #[error("failed to read '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file was read but is not a valid description.
    #[error("malformed '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl LoadError {
    /// Reads `path` and deserializes its JSON content.
    pub(crate) fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, LoadError> {
        let data = std::fs::read_to_string(path).map_err(|source| LoadError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&data).map_err(|source| LoadError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}
