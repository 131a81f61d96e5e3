//! Build configuration.
//!
//! [`BuildOptions`] is fixed for the lifetime of one program. It can be
//! constructed in code, loaded from a JSON file, or assembled by the CLI from
//! flags layered over a file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::LoadError;

/// Execution-queue model of the target device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueType {
    /// Commands complete in submission order.
    #[default]
    InOrder,
    /// Commands may complete out of submission order; only data flow orders
    /// them.
    OutOfOrder,
}

/// Conflict relation used for buffer-aliasing analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryDependencyStrategy {
    /// Overlapping processing-order live ranges conflict.
    Basic,
    /// Basic, minus nodes that never run and own no buffer.
    SkippedBranchAware,
    /// Skipped-branch-aware, with live ranges bounded by data flow instead of
    /// processing order.
    OutOfOrderAware,
}

impl MemoryDependencyStrategy {
    /// Default strategy for a queue model.
    pub fn for_queue(queue: QueueType) -> Self {
        match queue {
            QueueType::InOrder => MemoryDependencyStrategy::SkippedBranchAware,
            QueueType::OutOfOrder => MemoryDependencyStrategy::OutOfOrderAware,
        }
    }
}

/// Options controlling how a program is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildOptions {
    /// Debug build: order checks after every pass, every node kept as an
    /// output after cleanup.
    pub debug: bool,

    /// Build only the graph structure (init phase); skip both optimization
    /// phases and graph compilation. Used by unit tests of graph shape.
    pub no_optimizations: bool,

    /// Enable layout-changing optimizations (fusing, buffer fusing, input
    /// reordering).
    pub optimize_data: bool,

    /// Force output-size handling on or off. `None` lets the analysis decide.
    pub output_size_handling: Option<bool>,

    /// Compute memory dependencies for the memory pool.
    pub enable_memory_pool: bool,

    pub queue_type: QueueType,

    /// Override of the strategy implied by `queue_type`.
    pub memory_dependency_strategy: Option<MemoryDependencyStrategy>,

    /// Names of passes to skip.
    pub disabled_passes: Vec<String>,

    /// Write a textual dump of the graph after every pass into this directory.
    pub graph_dumps_dir: Option<PathBuf>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        BuildOptions {
            debug: false,
            no_optimizations: false,
            optimize_data: true,
            output_size_handling: None,
            enable_memory_pool: true,
            queue_type: QueueType::InOrder,
            memory_dependency_strategy: None,
            disabled_passes: Vec::new(),
            graph_dumps_dir: None,
        }
    }
}

impl BuildOptions {
    /// Strategy in effect for this build.
    pub fn memory_dependency_strategy(&self) -> MemoryDependencyStrategy {
        self.memory_dependency_strategy
            .unwrap_or_else(|| MemoryDependencyStrategy::for_queue(self.queue_type))
    }

    pub fn is_pass_enabled(&self, name: &str) -> bool {
        !self.disabled_passes.iter().any(|p| p == name)
    }

    /// Load options from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, LoadError> {
        LoadError::load_json(path)
    }
}
