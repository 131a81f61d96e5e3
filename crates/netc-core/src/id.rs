//! Identifier newtypes for program entities.
//!
//! A [`PrimitiveId`] is the user-visible name of a primitive (and therefore of
//! the node wrapping it). A [`NodeKey`] is the stable, non-owning handle into
//! the node store; every structure other than the store itself (processing
//! order, input/output lists, pass working sets) holds keys, never nodes.

use std::borrow::Borrow;
use std::fmt;

use petgraph::graph::NodeIndex;
use serde::{Deserialize, Serialize};

/// Unique name of a primitive within one program.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrimitiveId(String);

impl PrimitiveId {
    /// Creates an id from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        PrimitiveId(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Id of the crop helper standing for output `part` of split `self`.
    pub fn split_part(&self, part: &str) -> PrimitiveId {
        PrimitiveId(format!("{}:{}", self.0, part))
    }
}

impl From<&str> for PrimitiveId {
    fn from(id: &str) -> Self {
        PrimitiveId(id.to_string())
    }
}

impl From<String> for PrimitiveId {
    fn from(id: String) -> Self {
        PrimitiveId(id)
    }
}

impl Borrow<str> for PrimitiveId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PrimitiveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable node handle. Maps to a petgraph `NodeIndex<u32>`.
///
/// Keys of removed nodes may be reused by the store for nodes created later,
/// so a key must not outlive the node it was obtained for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeKey(pub u32);

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// Bridge between NodeKey and petgraph's NodeIndex<u32>.

impl From<NodeIndex<u32>> for NodeKey {
    fn from(idx: NodeIndex<u32>) -> Self {
        NodeKey(idx.index() as u32)
    }
}

impl From<NodeKey> for NodeIndex<u32> {
    fn from(key: NodeKey) -> Self {
        NodeIndex::new(key.0 as usize)
    }
}
