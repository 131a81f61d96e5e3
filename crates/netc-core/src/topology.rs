//! The topology descriptor consumed by program construction.
//!
//! A topology is an unordered collection of primitive descriptors plus the
//! declared network inputs and outputs. It is produced by an upstream front
//! end and treated as immutable input; all validation happens when a
//! [`Program`](crate::program::Program) is built from it.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::LoadError;
use crate::id::PrimitiveId;
use crate::primitive::Primitive;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    pub primitives: Vec<Primitive>,
    /// Declared network inputs. Each must name a primitive without inputs.
    #[serde(default)]
    pub inputs: Vec<PrimitiveId>,
    /// Declared network outputs. Empty means "every primitive nobody reads".
    #[serde(default)]
    pub outputs: Vec<PrimitiveId>,
}

impl Topology {
    pub fn new() -> Self {
        Topology::default()
    }

    /// Appends a primitive, builder style.
    pub fn add(mut self, primitive: Primitive) -> Self {
        self.primitives.push(primitive);
        self
    }

    pub fn with_outputs(mut self, outputs: &[&str]) -> Self {
        self.outputs = outputs.iter().map(|&o| PrimitiveId::from(o)).collect();
        self
    }

    pub fn with_inputs(mut self, inputs: &[&str]) -> Self {
        self.inputs = inputs.iter().map(|&i| PrimitiveId::from(i)).collect();
        self
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Load a topology from a JSON file.
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        LoadError::load_json(path)
    }
}
