//! Graph compilation and the final cleanup.

use netc_core::{PrimitiveType, Program};

use crate::error::OptError;
use crate::pass::{Pass, PassContext};

/// Hands every node, in processing order, to the backend.
pub struct CompileGraph;

impl Pass for CompileGraph {
    fn name(&self) -> &'static str {
        "compile_graph"
    }

    fn run(&mut self, program: &mut Program, ctx: &mut PassContext<'_>) -> Result<(), OptError> {
        for key in program.processing_order().iter() {
            ctx.backend.compile_node(program, key)?;
        }
        Ok(())
    }
}

/// Recomputes output layouts. In debug builds every non-constant node also
/// becomes an output, so every intermediate buffer can be read back.
pub struct Cleanup;

impl Pass for Cleanup {
    fn name(&self) -> &'static str {
        "cleanup"
    }

    fn run(&mut self, program: &mut Program, _ctx: &mut PassContext<'_>) -> Result<(), OptError> {
        program.recalc_output_layouts();
        if program.is_debug_build() {
            for key in program.processing_order().to_vec() {
                if !program[key].is_type(PrimitiveType::Data) {
                    program.set_output(key, true);
                }
            }
        }
        Ok(())
    }
}
