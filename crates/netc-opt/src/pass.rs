//! Pass trait and the pass manager.
//!
//! A [`Pass`] is a named graph transformation over a `&mut Program`. The
//! [`PassManager`] runs passes in the order given, skips the ones named in
//! `BuildOptions::disabled_passes`, verifies the processing order after each
//! pass in debug builds (or when the program is built with `debug`), and
//! writes a graph dump after each pass when a dump directory is configured.

use std::path::Path;

use netc_core::Program;

use crate::backend::Backend;
use crate::error::OptError;

/// State shared by the passes of one build.
pub struct PassContext<'a> {
    pub backend: &'a mut dyn Backend,
    /// Whether explicit convolution/pooling output sizes must be honoured
    /// with input padding. Set by `analyze_output_size_handling`.
    pub output_size_handling: bool,
}

impl<'a> PassContext<'a> {
    pub fn new(backend: &'a mut dyn Backend) -> Self {
        PassContext {
            backend,
            output_size_handling: false,
        }
    }
}

/// A graph transformation.
pub trait Pass {
    /// Stable name, used for logging, dumps and `disabled_passes`.
    fn name(&self) -> &'static str;

    fn run(&mut self, program: &mut Program, ctx: &mut PassContext<'_>) -> Result<(), OptError>;
}

/// Runs passes over one program.
#[derive(Debug, Default)]
pub struct PassManager {
    /// Number of passes run so far; numbers the dump files.
    runs: usize,
}

impl PassManager {
    pub fn new() -> Self {
        PassManager::default()
    }

    pub fn runs(&self) -> usize {
        self.runs
    }

    /// Runs `passes` in order, stopping at the first error.
    pub fn run_all(
        &mut self,
        program: &mut Program,
        ctx: &mut PassContext<'_>,
        passes: &mut [Box<dyn Pass>],
    ) -> Result<(), OptError> {
        for pass in passes.iter_mut() {
            self.run(program, ctx, pass.as_mut())?;
        }
        Ok(())
    }

    pub fn run(
        &mut self,
        program: &mut Program,
        ctx: &mut PassContext<'_>,
        pass: &mut dyn Pass,
    ) -> Result<(), OptError> {
        let name = pass.name();
        if !program.options().is_pass_enabled(name) {
            tracing::warn!(pass = name, program = program.prog_id(), "pass disabled, skipping");
            return Ok(());
        }

        let before = program.node_count();
        pass.run(program, ctx)?;
        self.runs += 1;
        tracing::debug!(
            pass = name,
            program = program.prog_id(),
            nodes_before = before,
            nodes_after = program.node_count(),
            "pass finished"
        );

        if cfg!(debug_assertions) || program.is_debug_build() {
            if let Some(node) = program.first_misplaced_node() {
                return Err(OptError::InvariantViolation {
                    pass: name.to_string(),
                    node: program[node].id().clone(),
                });
            }
        }

        if let Some(dir) = program.options().graph_dumps_dir.clone() {
            self.dump(program, &dir, name)?;
        }
        Ok(())
    }

    fn dump(&self, program: &Program, dir: &Path, pass: &str) -> Result<(), OptError> {
        std::fs::create_dir_all(dir).map_err(OptError::Dump)?;
        let file = dir.join(format!(
            "program_{}_{:02}_{}.graph",
            program.prog_id(),
            self.runs,
            pass
        ));
        std::fs::write(&file, program.dump(pass, true, None)).map_err(OptError::Dump)?;
        tracing::trace!(path = %file.display(), "graph dump written");
        Ok(())
    }
}
