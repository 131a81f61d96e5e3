//! Input padding for windowed primitives.

use netc_core::{Format, NodeKey, Padding, Primitive, PrimitiveKind, PrimitiveType, Program};

use crate::error::OptError;
use crate::pass::{Pass, PassContext};

/// Grows the output padding of convolution and pooling inputs so the
/// kernels can read their whole window without bounds checks.
///
/// With output-size handling on, every convolution and pooling with an
/// explicit output size gets the padding that size needs. Independently,
/// `bfyx` convolutions get the padding their input offset and window need.
/// Network inputs and constants can't be padded in place; a padded reorder
/// is inserted in front of the consumer instead.
pub struct PreparePadding;

impl Pass for PreparePadding {
    fn name(&self) -> &'static str {
        "prepare_padding"
    }

    fn run(&mut self, program: &mut Program, ctx: &mut PassContext<'_>) -> Result<(), OptError> {
        for key in program.processing_order().to_vec() {
            let Some(input) = program.dependency(key, 0) else {
                continue;
            };
            let Some(input_layout) = program[input].output_layout() else {
                continue;
            };
            let spatial = input_layout.shape.spatial();

            let needed = match *program[key].kind() {
                PrimitiveKind::Convolution {
                    window,
                    output_size: Some(size),
                    ..
                }
                | PrimitiveKind::Pooling {
                    window,
                    output_size: Some(size),
                    ..
                } if ctx.output_size_handling => window.needed_input_padding(spatial, size),
                PrimitiveKind::Convolution {
                    window,
                    output_size: None,
                    ..
                } if input_layout.format == Format::Bfyx => {
                    window.needed_input_padding(spatial, window.output_size(spatial))
                }
                _ => continue,
            };
            if needed.is_zero() {
                continue;
            }
            apply_needed_padding(program, key, input, needed)?;
        }
        Ok(())
    }
}

fn apply_needed_padding(
    program: &mut Program,
    node: NodeKey,
    input: NodeKey,
    padding: Padding,
) -> Result<(), OptError> {
    let source = &program[input];
    if source.is_type(PrimitiveType::InputLayout) || source.is_type(PrimitiveType::Data) {
        let format = source.output_layout().map(|l| l.format).unwrap_or_default();
        let id = format!("{}_padding_reorder_{}", source.id(), program[node].id());
        let reorder =
            Primitive::reorder(id, source.id().as_str(), format).with_output_padding(padding);
        let key = program.add_intermediate_primitive(reorder, node, 0, true, false)?;
        program.recalc_output_layout(key);
        tracing::debug!(reorder = %program[key].id(), %padding, "inserted padded reorder");
    } else {
        program[input].merge_output_padding(padding);
    }
    Ok(())
}
