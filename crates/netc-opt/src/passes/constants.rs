//! Constant propagation.

use std::collections::HashSet;

use netc_core::{BuildOptions, NodeKey, Primitive, PrimitiveType, Program};

use crate::error::OptError;
use crate::pass::{Pass, PassContext};
use crate::pipeline::build_internal;

/// Evaluates the constant part of the graph ahead of time.
///
/// The constant nodes (all inputs constant, not themselves `Data`) are
/// copied into an internal program together with the `Data` buffers they
/// read. That program is built and handed to the backend for evaluation.
/// Each constant node read by a non-constant node (or that is an output)
/// is then replaced by a `Data` node of the same id and layout, and the
/// constant nodes left without readers are removed.
pub struct PropagateConstants;

impl Pass for PropagateConstants {
    fn name(&self) -> &'static str {
        "propagate_constants"
    }

    fn run(&mut self, program: &mut Program, ctx: &mut PassContext<'_>) -> Result<(), OptError> {
        let order = program.processing_order().to_vec();
        let computed: HashSet<NodeKey> = order
            .iter()
            .copied()
            .filter(|&k| program[k].is_constant() && !program[k].is_type(PrimitiveType::Data))
            .collect();
        if computed.is_empty() {
            return Ok(());
        }

        let boundary: Vec<NodeKey> = order
            .iter()
            .copied()
            .filter(|k| computed.contains(k))
            .filter(|&k| {
                program[k].is_output()
                    || program
                        .users(k)
                        .iter()
                        .any(|&u| !program[u].is_constant())
            })
            .collect();

        let subset: Vec<NodeKey> = order
            .iter()
            .copied()
            .filter(|&k| {
                computed.contains(&k)
                    || (program[k].is_type(PrimitiveType::Data)
                        && program.users(k).iter().any(|u| computed.contains(u)))
            })
            .collect();

        let mut sub = Program::from_nodes(
            program,
            &subset,
            BuildOptions {
                optimize_data: program.options().optimize_data,
                enable_memory_pool: false,
                ..BuildOptions::default()
            },
        )?;
        for &key in &boundary {
            if let Some(k) = sub.key_of(program[key].id().as_str()) {
                sub.set_output(k, true);
            }
        }
        let compiled = build_internal(sub, ctx.backend)?;
        ctx.backend.fold_constants(&compiled)?;

        for &key in &boundary {
            let Some(layout) = program[key].output_layout() else {
                continue;
            };
            // The folded value stands alone; only the users are handed over.
            for dep in program.dependencies(key) {
                program.remove_connection(dep, key)?;
            }
            let data = Primitive::data(format!("_const_prop_{}", program[key].id()), layout);
            let folded = program.get_or_create(data);
            program.replace(key, folded)?;
        }

        let mut removed = 0;
        for key in order.into_iter().rev() {
            let is_candidate = computed.contains(&key) || subset.contains(&key);
            if is_candidate && program.contains_key(key) && program.remove_if_dangling(key) {
                removed += 1;
            }
        }
        tracing::debug!(
            folded = boundary.len(),
            removed,
            "propagated constants"
        );
        Ok(())
    }
}
