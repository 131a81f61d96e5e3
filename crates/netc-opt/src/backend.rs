//! The code-generation collaborator.
//!
//! Kernel selection and code generation are outside the compiler core. The
//! pipeline hands every node to a [`Backend`] during graph compilation, and
//! hands compiled constant sub-programs to it for evaluation during constant
//! propagation.

use netc_core::{NodeKey, Program};

use crate::error::BackendError;
use crate::pipeline::CompiledProgram;

pub trait Backend {
    /// Prepares an implementation for `node`. Called once per node, in
    /// processing order, after pre-optimization.
    fn compile_node(&mut self, program: &Program, node: NodeKey) -> Result<(), BackendError>;

    /// Evaluates a compiled constant sub-program so its outputs can be
    /// stored as constant buffers.
    fn fold_constants(&mut self, _program: &CompiledProgram) -> Result<(), BackendError> {
        Ok(())
    }
}

/// Accepts every node and folds nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullBackend;

impl Backend for NullBackend {
    fn compile_node(&mut self, _program: &Program, _node: NodeKey) -> Result<(), BackendError> {
        Ok(())
    }
}
