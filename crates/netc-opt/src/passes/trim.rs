//! Dead-branch removal.

use std::collections::HashSet;

use netc_core::{NodeKey, PrimitiveType, Program};

use crate::error::OptError;
use crate::pass::{Pass, PassContext};

/// Removes every node no output depends on. Network inputs stay, so the
/// caller can still bind them.
pub struct TrimToOutputs;

impl Pass for TrimToOutputs {
    fn name(&self) -> &'static str {
        "trim_to_outputs"
    }

    fn run(&mut self, program: &mut Program, _ctx: &mut PassContext<'_>) -> Result<(), OptError> {
        let mut needed: HashSet<NodeKey> = HashSet::new();
        let mut stack: Vec<NodeKey> = program.outputs().to_vec();
        while let Some(key) = stack.pop() {
            if needed.insert(key) {
                stack.extend(program.dependencies(key));
            }
        }

        let dead: Vec<NodeKey> = program
            .processing_order()
            .iter()
            .filter(|k| !needed.contains(k) && !program[*k].is_type(PrimitiveType::InputLayout))
            .collect();
        if dead.is_empty() {
            return Ok(());
        }
        tracing::debug!(removed = dead.len(), "trimming nodes unreachable from outputs");
        program.remove_nodes(&dead);
        Ok(())
    }
}
