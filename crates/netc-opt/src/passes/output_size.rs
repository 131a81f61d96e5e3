//! Output-size handling analysis.

use netc_core::{PrimitiveKind, Program};

use crate::error::OptError;
use crate::pass::{Pass, PassContext};

/// Decides whether explicit output sizes must be honoured with padding: true
/// when some convolution or pooling asks for an output size that differs
/// from the size its window produces naturally. `BuildOptions::
/// output_size_handling` overrides the decision. Never changes the graph.
pub struct AnalyzeOutputSizeHandling;

impl Pass for AnalyzeOutputSizeHandling {
    fn name(&self) -> &'static str {
        "analyze_output_size_handling"
    }

    fn run(&mut self, program: &mut Program, ctx: &mut PassContext<'_>) -> Result<(), OptError> {
        if let Some(forced) = program.options().output_size_handling {
            ctx.output_size_handling = forced;
            return Ok(());
        }

        ctx.output_size_handling = program.processing_order().iter().any(|key| {
            let (window, output_size) = match program[key].kind() {
                PrimitiveKind::Convolution {
                    window,
                    output_size: Some(size),
                    ..
                }
                | PrimitiveKind::Pooling {
                    window,
                    output_size: Some(size),
                    ..
                } => (window, size),
                _ => return false,
            };
            let Some(input) = program
                .dependency(key, 0)
                .and_then(|d| program[d].output_layout())
            else {
                return false;
            };
            window.output_size(input.shape.spatial()) != *output_size
        });
        tracing::debug!(needed = ctx.output_size_handling, "output size handling");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use netc_core::{BuildOptions, PoolingMode, Primitive, Topology, Window};

    use super::*;
    use crate::backend::NullBackend;
    use crate::pass::PassManager;
    use crate::passes::test_util::{initialized, layout};

    fn pooling(output_size: Option<[u32; 2]>) -> Topology {
        Topology::new()
            .add(Primitive::input_layout("in", layout(1, 8)))
            .add(Primitive::new(
                "pool",
                PrimitiveKind::Pooling {
                    mode: PoolingMode::Max,
                    window: Window::new([2, 2]).with_stride([2, 2]),
                    output_size,
                },
                &["in"],
            ))
            .with_outputs(&["pool"])
    }

    fn analyze(topology: &Topology, options: BuildOptions) -> bool {
        let mut program = initialized(topology, options);
        let mut backend = NullBackend;
        let mut ctx = crate::pass::PassContext::new(&mut backend);
        PassManager::new()
            .run(&mut program, &mut ctx, &mut AnalyzeOutputSizeHandling)
            .unwrap();
        ctx.output_size_handling
    }

    #[test]
    fn natural_size_needs_no_handling() {
        assert!(!analyze(&pooling(None), BuildOptions::default()));
        assert!(!analyze(&pooling(Some([4, 4])), BuildOptions::default()));
    }

    #[test]
    fn larger_explicit_size_needs_handling() {
        assert!(analyze(&pooling(Some([5, 5])), BuildOptions::default()));
    }

    #[test]
    fn option_forces_decision() {
        let options = BuildOptions {
            output_size_handling: Some(false),
            ..BuildOptions::default()
        };
        assert!(!analyze(&pooling(Some([5, 5])), options));
    }
}
