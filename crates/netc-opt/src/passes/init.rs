//! Init-phase passes: graph setup and node flags.

use netc_core::{PrimitiveType, Program};

use crate::error::OptError;
use crate::pass::{Pass, PassContext};

/// Removes split nodes (replaced by crop helpers at construction), marks
/// outputs, computes the first processing order and the output layouts.
///
/// When the topology declares no outputs, every node nobody reads becomes an
/// output.
pub struct GraphInitializations;

impl Pass for GraphInitializations {
    fn name(&self) -> &'static str {
        "graph_initializations"
    }

    fn run(&mut self, program: &mut Program, _ctx: &mut PassContext<'_>) -> Result<(), OptError> {
        let splits: Vec<_> = program
            .keys()
            .filter(|&k| program[k].is_type(PrimitiveType::Split))
            .collect();
        for split in splits {
            if !program.remove_if_dangling(split) {
                tracing::warn!(split = %program[split].id(), "split node is read directly, keeping it");
            }
        }

        if program.outputs().is_empty() {
            let sinks: Vec<_> = program.keys().filter(|&k| program.user_count(k) == 0).collect();
            for key in sinks {
                program.set_output(key, true);
            }
        }

        program.calc_processing_order()?;
        program.recalc_output_layouts();
        Ok(())
    }
}

/// Marks constant and data-flow nodes, in processing order so every node
/// sees its dependencies' flags.
pub struct MarkNodes;

impl Pass for MarkNodes {
    fn name(&self) -> &'static str {
        "mark_nodes"
    }

    fn run(&mut self, program: &mut Program, _ctx: &mut PassContext<'_>) -> Result<(), OptError> {
        for key in program.processing_order().to_vec() {
            program.mark_if_constant(key);
            program.mark_if_data_flow(key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use netc_core::{
        ActivationFunc, BuildOptions, Primitive, PrimitiveKind, SplitOutput, Topology,
    };

    use crate::passes::test_util::{ids, initialized, layout};

    #[test]
    fn split_node_is_dropped_after_init() {
        let topology = Topology::new()
            .add(Primitive::input_layout("in", layout(4, 2)))
            .add(Primitive::new(
                "split",
                PrimitiveKind::Split {
                    outputs: vec![
                        SplitOutput {
                            name: "a".into(),
                            feature_offset: 0,
                        },
                        SplitOutput {
                            name: "b".into(),
                            feature_offset: 2,
                        },
                    ],
                },
                &["in"],
            ))
            .add(Primitive::activation("relu", "split:b", ActivationFunc::Relu));
        let program = initialized(&topology, BuildOptions::default());
        assert!(!program.has_node("split"));
        // No declared outputs: every sink is an output, including the unused
        // crop helper.
        let outputs: Vec<String> = program
            .outputs()
            .iter()
            .map(|&k| program[k].id().to_string())
            .collect();
        assert!(outputs.contains(&"relu".to_string()));
        assert!(outputs.contains(&"split:a".to_string()));
        let relu = program.node("relu").unwrap().output_layout().unwrap();
        assert_eq!(relu.shape.features, 2);
        assert_eq!(ids(&program).len(), 4);
    }

    #[test]
    fn flags_follow_dependencies() {
        let topology = Topology::new()
            .add(Primitive::input_layout("in", layout(2, 2)))
            .add(Primitive::data("w", layout(2, 2)))
            .add(Primitive::activation("w_act", "w", ActivationFunc::Abs))
            .add(Primitive::activation("x", "in", ActivationFunc::Relu))
            .with_outputs(&["x", "w_act"]);
        let program = initialized(&topology, BuildOptions::default());
        let w_act = program.node("w_act").unwrap();
        assert!(w_act.is_constant());
        assert!(!w_act.is_in_data_flow());
        let x = program.node("x").unwrap();
        assert!(!x.is_constant());
        assert!(x.is_in_data_flow());
    }
}
