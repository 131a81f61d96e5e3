//! Program build pipeline.
//!
//! The phases run in a fixed order:
//!
//! 1. init: [`GraphInitializations`], [`MarkNodes`]
//! 2. pre-optimization (skipped with `no_optimizations`)
//! 3. graph compilation (skipped with `no_optimizations`)
//! 4. post-optimization (skipped with `no_optimizations`)
//! 5. [`Cleanup`]
//!
//! Each phase is a pass list assembled from the build options, so a pass
//! that does not apply to a build is simply not in the list.

use std::ops::Deref;

use netc_core::{BuildOptions, Program, QueueType, Topology};

use crate::backend::Backend;
use crate::error::OptError;
use crate::memory::PrepareMemoryDependencies;
use crate::pass::{Pass, PassContext, PassManager};
use crate::passes::{
    AnalyzeOutputSizeHandling, BfsProcessingOrder, Cleanup, CompileGraph, GraphInitializations,
    MarkNodes, PrepareBufferFusing, PreparePadding, PreparePrimitiveFusing, PropagateConstants,
    RemoveRedundantReorders, ReorderInputs, TrimToOutputs,
};

/// A fully built program. Read-only: passes are over.
#[derive(Debug)]
pub struct CompiledProgram {
    program: Program,
}

impl CompiledProgram {
    pub fn program(&self) -> &Program {
        &self.program
    }
}

impl Deref for CompiledProgram {
    type Target = Program;

    fn deref(&self) -> &Program {
        &self.program
    }
}

/// Ordered list of passes for one phase.
#[derive(Default)]
pub struct PassList {
    passes: Vec<Box<dyn Pass>>,
}

impl PassList {
    pub fn new() -> Self {
        PassList::default()
    }

    pub fn pass(&mut self, pass: impl Pass + 'static) {
        self.passes.push(Box::new(pass));
    }

    pub fn pass_if(&mut self, enabled: bool, pass: impl Pass + 'static) {
        if enabled {
            self.pass(pass);
        }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    pub fn finish(self) -> Vec<Box<dyn Pass>> {
        self.passes
    }
}

pub fn init_passes() -> PassList {
    let mut p = PassList::new();
    p.pass(GraphInitializations);
    p.pass(MarkNodes);
    p
}

pub fn pre_optimization_passes(options: &BuildOptions, is_internal: bool) -> PassList {
    let mut p = PassList::new();
    p.pass(TrimToOutputs);
    p.pass_if(options.queue_type == QueueType::OutOfOrder, BfsProcessingOrder);
    p.pass(AnalyzeOutputSizeHandling);
    p.pass_if(options.optimize_data, PreparePrimitiveFusing);
    p.pass(PreparePadding);
    p.pass(RemoveRedundantReorders);
    p.pass_if(!is_internal, PropagateConstants);
    p.pass_if(options.optimize_data, PrepareBufferFusing);
    p
}

pub fn post_optimization_passes(options: &BuildOptions) -> PassList {
    let mut p = PassList::new();
    p.pass_if(options.optimize_data, ReorderInputs);
    p.pass_if(options.enable_memory_pool, PrepareMemoryDependencies);
    p
}

/// Builds `topology` into a compiled program.
pub fn build_program(
    topology: &Topology,
    options: BuildOptions,
    backend: &mut dyn Backend,
) -> Result<CompiledProgram, OptError> {
    let program = Program::from_topology(topology, options, false)?;
    build(program, backend)
}

/// Builds an internal program assembled by the compiler itself, e.g. the
/// constant sub-graph during constant propagation.
pub fn build_internal(
    program: Program,
    backend: &mut dyn Backend,
) -> Result<CompiledProgram, OptError> {
    build(program, backend)
}

fn build(mut program: Program, backend: &mut dyn Backend) -> Result<CompiledProgram, OptError> {
    let options = program.options().clone();
    let mut ctx = PassContext::new(backend);
    let mut manager = PassManager::new();

    tracing::info!(
        program = program.prog_id(),
        nodes = program.node_count(),
        internal = program.is_internal(),
        "building program"
    );
    manager.run_all(&mut program, &mut ctx, &mut init_passes().finish())?;

    if options.no_optimizations {
        tracing::info!(program = program.prog_id(), "optimizations disabled");
    } else {
        let pre = pre_optimization_passes(&options, program.is_internal());
        tracing::info!(program = program.prog_id(), passes = ?pre.names(), "pre-optimization");
        manager.run_all(&mut program, &mut ctx, &mut pre.finish())?;

        tracing::info!(program = program.prog_id(), "compiling graph");
        manager.run(&mut program, &mut ctx, &mut CompileGraph)?;

        let post = post_optimization_passes(&options);
        tracing::info!(program = program.prog_id(), passes = ?post.names(), "post-optimization");
        manager.run_all(&mut program, &mut ctx, &mut post.finish())?;
    }

    manager.run(&mut program, &mut ctx, &mut Cleanup)?;
    tracing::info!(
        program = program.prog_id(),
        nodes = program.node_count(),
        optimized_out = program.optimized_out().len(),
        passes = manager.runs(),
        "program built"
    );
    Ok(CompiledProgram { program })
}
