//! Primitive fusing and in-place buffer fusing.

use netc_core::{Format, PrimitiveKind, PrimitiveType, Program};

use crate::error::OptError;
use crate::pass::{Pass, PassContext};

/// Folds an activation into the convolution, eltwise or fully-connected node
/// it reads, when that node has no other reader and no activation yet. The
/// activation node is removed.
pub struct PreparePrimitiveFusing;

impl Pass for PreparePrimitiveFusing {
    fn name(&self) -> &'static str {
        "prepare_primitive_fusing"
    }

    fn run(&mut self, program: &mut Program, _ctx: &mut PassContext<'_>) -> Result<(), OptError> {
        for key in program.processing_order().to_vec() {
            let PrimitiveKind::Activation { func } = *program[key].kind() else {
                continue;
            };
            if program[key].is_output() {
                continue;
            }
            let deps = program.dependencies(key);
            let [input] = deps.as_slice() else {
                continue;
            };
            let input = *input;
            let target = &program[input];
            let fusable = matches!(
                target.primitive_type(),
                PrimitiveType::Convolution | PrimitiveType::Eltwise | PrimitiveType::FullyConnected
            );
            if !fusable
                || target.fused_activation.is_some()
                || target.is_output()
                || program.user_count(input) != 1
            {
                continue;
            }

            if program.extract_and_remove(key) {
                tracing::debug!(
                    activation = ?func,
                    into = %program[input].id(),
                    "fused activation"
                );
                program[input].fused_activation = Some(func);
            }
        }
        Ok(())
    }
}

/// Marks nodes that can run in place on their input's buffer: reshapes
/// without padding on either side, and feature crops of a single-batch
/// `bfyx` tensor.
pub struct PrepareBufferFusing;

impl Pass for PrepareBufferFusing {
    fn name(&self) -> &'static str {
        "prepare_buffer_fusing"
    }

    fn run(&mut self, program: &mut Program, _ctx: &mut PassContext<'_>) -> Result<(), OptError> {
        for key in program.processing_order().to_vec() {
            let Some(input) = program.dependency(key, 0) else {
                continue;
            };
            if program.dependencies(key).len() != 1 {
                continue;
            }
            let node = &program[key];
            let source = &program[input];
            if !node.output_padding().is_zero() || !source.output_padding().is_zero() {
                continue;
            }
            let in_place = match node.kind() {
                PrimitiveKind::Reshape { .. } => true,
                PrimitiveKind::Crop { .. } => source
                    .output_layout()
                    .is_some_and(|l| l.format == Format::Bfyx && l.shape.batch == 1),
                _ => false,
            };
            if in_place {
                program[key].can_be_optimized = true;
            }
        }
        Ok(())
    }
}
