//! Reorder insertion and removal.

use netc_core::{Format, NodeKey, Primitive, PrimitiveKind, PrimitiveType, Program};

use crate::error::OptError;
use crate::pass::{Pass, PassContext};

/// Removes reorders that change nothing: same format as their input, no
/// output padding, not an output.
pub struct RemoveRedundantReorders;

impl Pass for RemoveRedundantReorders {
    fn name(&self) -> &'static str {
        "remove_redundant_reorders"
    }

    fn run(&mut self, program: &mut Program, _ctx: &mut PassContext<'_>) -> Result<(), OptError> {
        for key in program.processing_order().to_vec() {
            let node = &program[key];
            let PrimitiveKind::Reorder { format } = *node.kind() else {
                continue;
            };
            if node.is_output() || !node.output_padding().is_zero() {
                continue;
            }
            let Some(input) = program.dependency(key, 0) else {
                continue;
            };
            let same_format = program[input]
                .output_layout()
                .is_some_and(|l| l.format == format);
            if same_format && program.extract_and_remove(key) {
                tracing::debug!(reorder = %key, "removed redundant reorder");
            }
        }
        Ok(())
    }
}

/// Format convolutions prefer for their data input.
fn preferred_conv_format(batch: u32) -> Format {
    if batch >= 16 {
        Format::Yxfb
    } else {
        Format::Bfyx
    }
}

/// Converts network inputs read by convolutions to the format those
/// convolutions prefer. One reorder per input is shared by all its users.
/// Inserted reorders are compiled on the spot.
pub struct ReorderInputs;

impl Pass for ReorderInputs {
    fn name(&self) -> &'static str {
        "reorder_inputs"
    }

    fn run(&mut self, program: &mut Program, ctx: &mut PassContext<'_>) -> Result<(), OptError> {
        let mut inserted = Vec::new();
        for input in program.inputs().to_vec() {
            if !program[input].is_type(PrimitiveType::InputLayout) {
                continue;
            }
            let Some(layout) = program[input].output_layout() else {
                continue;
            };
            let conv_user = program.users(input).into_iter().find(|&u| {
                program[u].is_type(PrimitiveType::Convolution) && program.dependency(u, 0) == Some(input)
            });
            let Some(conv_user) = conv_user else {
                continue;
            };
            let preferred = preferred_conv_format(layout.shape.batch);
            if layout.format == preferred {
                continue;
            }

            let id = format!(
                "{}_reorder_{}",
                program[input].id(),
                format!("{:?}", preferred).to_lowercase()
            );
            let reorder = Primitive::reorder(id, program[input].id().as_str(), preferred);
            let key = program.add_intermediate_primitive(reorder, conv_user, 0, true, true)?;
            inserted.push(key);
        }

        if inserted.is_empty() {
            return Ok(());
        }
        program.recalc_output_layouts();
        for key in inserted {
            compile_inserted(program, ctx, key)?;
        }
        Ok(())
    }
}

fn compile_inserted(program: &Program, ctx: &mut PassContext<'_>, key: NodeKey) -> Result<(), OptError> {
    tracing::debug!(reorder = %program[key].id(), "compiling inserted input reorder");
    ctx.backend.compile_node(program, key)?;
    Ok(())
}
