//! Optimization pipeline for netc programs.
//!
//! [`build_program`] turns a [`Topology`](netc_core::Topology) into a
//! [`CompiledProgram`]: it builds the graph, runs the init, pre-optimization,
//! graph-compilation and post-optimization phases over it, and finishes with
//! a cleanup. Every phase is an ordered list of [`Pass`]es run by a
//! [`PassManager`], which checks the processing order after each pass and can
//! dump the graph to disk.

pub mod backend;
pub mod error;
pub mod memory;
pub mod pass;
pub mod passes;
pub mod pipeline;

pub use backend::{Backend, NullBackend};
pub use error::{BackendError, OptError};
pub use memory::compute_memory_dependencies;
pub use pass::{Pass, PassContext, PassManager};
pub use pipeline::{build_internal, build_program, CompiledProgram};
