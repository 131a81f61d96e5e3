//! Processing-order passes.

use netc_core::Program;

use crate::error::OptError;
use crate::pass::{Pass, PassContext};

/// Regroups the processing order by breadth-first level, so independent
/// nodes are submitted together to an out-of-order queue.
pub struct BfsProcessingOrder;

impl Pass for BfsProcessingOrder {
    fn name(&self) -> &'static str {
        "bfs_processing_order"
    }

    fn run(&mut self, program: &mut Program, _ctx: &mut PassContext<'_>) -> Result<(), OptError> {
        program.calc_bfs_processing_order();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use netc_core::{ActivationFunc, BuildOptions, EltwiseMode, Primitive, PrimitiveKind, Topology};

    use super::*;
    use crate::passes::test_util::{ids, initialized, layout, run};

    #[test]
    fn branches_are_interleaved_by_level() {
        let topology = Topology::new()
            .add(Primitive::input_layout("in", layout(1, 2)))
            .add(Primitive::activation("l1", "in", ActivationFunc::Relu))
            .add(Primitive::activation("l2", "l1", ActivationFunc::Relu))
            .add(Primitive::activation("r1", "in", ActivationFunc::Relu))
            .add(Primitive::activation("r2", "r1", ActivationFunc::Relu))
            .add(Primitive::new(
                "join",
                PrimitiveKind::Eltwise {
                    mode: EltwiseMode::Sum,
                },
                &["l2", "r2"],
            ))
            .with_outputs(&["join"]);
        let mut program = initialized(&topology, BuildOptions::default());
        assert_eq!(ids(&program), vec!["in", "l1", "l2", "r1", "r2", "join"]);
        run(&mut program, &mut BfsProcessingOrder);
        assert_eq!(ids(&program), vec!["in", "l1", "r1", "l2", "r2", "join"]);
    }
}
