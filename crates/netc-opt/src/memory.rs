//! Memory dependency analysis.
//!
//! Two nodes have a memory dependency when their output buffers must not
//! share storage. The analysis is one base relation refined by two layers,
//! selected through [`MemoryDependencyStrategy`]:
//!
//! - `Basic`: a node's buffer is live from its own position in the
//!   processing order to the position of its last reader (or to the end of
//!   the order for outputs). Overlapping live ranges conflict.
//! - `SkippedBranchAware`: nodes marked `can_be_optimized` never run and own
//!   no buffer; they are left out, and their readers count as readers of the
//!   buffer they alias.
//! - `OutOfOrderAware`: with an out-of-order queue positions no longer bound
//!   execution. Two buffers may share storage only if one of them, with all
//!   its readers, is a strict data-flow ancestor of the other.
//!
//! Constant `Data` buffers are never pooled and take no part.

use std::collections::{HashMap, HashSet};

use indexmap::IndexSet;
use netc_core::{MemoryDependencyStrategy, NodeKey, PrimitiveType, Program};

use crate::error::OptError;
use crate::pass::{Pass, PassContext};

/// Buffer-owning node with the data needed to test conflicts.
struct Buffer {
    key: NodeKey,
    start: usize,
    end: usize,
    readers: Vec<NodeKey>,
    output: bool,
}

/// Recomputes every node's memory dependencies with `strategy`.
pub fn compute_memory_dependencies(program: &mut Program, strategy: MemoryDependencyStrategy) {
    program.clear_memory_dependencies();
    let skip_optimized = strategy != MemoryDependencyStrategy::Basic;
    let buffers = collect_buffers(program, skip_optimized);

    let conflicts = match strategy {
        MemoryDependencyStrategy::Basic | MemoryDependencyStrategy::SkippedBranchAware => {
            live_range_conflicts(&buffers)
        }
        MemoryDependencyStrategy::OutOfOrderAware => {
            let ancestors = ancestor_sets(program);
            data_flow_conflicts(&buffers, &ancestors)
        }
    };

    tracing::debug!(
        program = program.prog_id(),
        ?strategy,
        buffers = buffers.len(),
        conflicts = conflicts.len(),
        "memory dependencies computed"
    );
    for (a, b) in conflicts {
        program.add_memory_dependency(a, b);
    }
}

fn owns_buffer(program: &Program, key: NodeKey, skip_optimized: bool) -> bool {
    let node = &program[key];
    !node.is_type(PrimitiveType::Data) && !(skip_optimized && node.can_be_optimized)
}

/// Readers of `key`'s buffer. Optimized-out readers alias the buffer, so
/// their own readers are followed when `skip_optimized` is set. The flag is
/// true when the buffer escapes through an aliasing output.
fn buffer_readers(program: &Program, key: NodeKey, skip_optimized: bool) -> (Vec<NodeKey>, bool) {
    let mut readers = IndexSet::new();
    let mut escapes = false;
    let mut stack: Vec<NodeKey> = program.users(key).to_vec();
    let mut seen = HashSet::new();
    while let Some(user) = stack.pop() {
        if !seen.insert(user) {
            continue;
        }
        let node = &program[user];
        if skip_optimized && node.can_be_optimized {
            escapes |= node.is_output();
            stack.extend(program.users(user));
        } else {
            readers.insert(user);
        }
    }
    (readers.into_iter().collect(), escapes)
}

fn collect_buffers(program: &Program, skip_optimized: bool) -> Vec<Buffer> {
    let order = program.processing_order();
    let last = order.len();
    let mut buffers = Vec::new();
    for (start, key) in order.iter().enumerate() {
        if !owns_buffer(program, key, skip_optimized) {
            continue;
        }
        let (readers, escapes) = buffer_readers(program, key, skip_optimized);
        let output = program[key].is_output() || escapes;
        let end = if output {
            last
        } else {
            readers
                .iter()
                .filter_map(|&r| order.position(r))
                .max()
                .unwrap_or(start)
                .max(start)
        };
        buffers.push(Buffer {
            key,
            start,
            end,
            readers,
            output,
        });
    }
    buffers
}

/// Pairs whose processing-order live ranges overlap. `buffers` is sorted by
/// start position.
fn live_range_conflicts(buffers: &[Buffer]) -> Vec<(NodeKey, NodeKey)> {
    let mut conflicts = Vec::new();
    for (i, a) in buffers.iter().enumerate() {
        for b in &buffers[i + 1..] {
            if b.start > a.end {
                continue;
            }
            conflicts.push((a.key, b.key));
        }
    }
    conflicts
}

/// Strict data-flow ancestors of every node, built in processing order.
fn ancestor_sets(program: &Program) -> HashMap<NodeKey, HashSet<NodeKey>> {
    let mut ancestors: HashMap<NodeKey, HashSet<NodeKey>> = HashMap::new();
    for key in program.processing_order().iter() {
        let mut set = HashSet::new();
        for dep in program.dependencies(key) {
            set.insert(dep);
            if let Some(up) = ancestors.get(&dep) {
                set.extend(up.iter().copied());
            }
        }
        ancestors.insert(key, set);
    }
    ancestors
}

fn data_flow_conflicts(
    buffers: &[Buffer],
    ancestors: &HashMap<NodeKey, HashSet<NodeKey>>,
) -> Vec<(NodeKey, NodeKey)> {
    let precedes = |a: &Buffer, b: &Buffer| -> bool {
        let Some(up) = ancestors.get(&b.key) else {
            return false;
        };
        !a.output && up.contains(&a.key) && a.readers.iter().all(|r| up.contains(r))
    };
    let mut conflicts = Vec::new();
    for (i, a) in buffers.iter().enumerate() {
        for b in &buffers[i + 1..] {
            if !precedes(a, b) && !precedes(b, a) {
                conflicts.push((a.key, b.key));
            }
        }
    }
    conflicts
}

/// Fills the memory dependencies used by the memory pool.
pub struct PrepareMemoryDependencies;

impl Pass for PrepareMemoryDependencies {
    fn name(&self) -> &'static str {
        "prepare_memory_dependencies"
    }

    fn run(&mut self, program: &mut Program, _ctx: &mut PassContext<'_>) -> Result<(), OptError> {
        let strategy = program.options().memory_dependency_strategy();
        compute_memory_dependencies(program, strategy);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netc_core::{
        ActivationFunc, BuildOptions, EltwiseMode, Format, Layout, Primitive, PrimitiveKind,
        Shape, Topology,
    };

    fn layout() -> Layout {
        Layout::new(Format::Bfyx, Shape::new(1, 2, 4, 4))
    }

    fn build(topology: &Topology) -> Program {
        let mut program = Program::from_topology(topology, BuildOptions::default(), false).unwrap();
        program.calc_processing_order().unwrap();
        program
    }

    fn deps_of(program: &Program, id: &str) -> Vec<String> {
        program
            .node(id)
            .unwrap()
            .memory_dependencies()
            .iter()
            .map(|d| d.to_string())
            .collect()
    }

    /// in -> a -> b -> c -> d (output)
    fn chain() -> Topology {
        Topology::new()
            .add(Primitive::input_layout("in", layout()))
            .add(Primitive::activation("a", "in", ActivationFunc::Relu))
            .add(Primitive::activation("b", "a", ActivationFunc::Relu))
            .add(Primitive::activation("c", "b", ActivationFunc::Relu))
            .add(Primitive::activation("d", "c", ActivationFunc::Relu))
            .with_outputs(&["d"])
    }

    #[test]
    fn chain_only_conflicts_with_neighbours() {
        let mut program = build(&chain());
        compute_memory_dependencies(&mut program, MemoryDependencyStrategy::Basic);
        assert_eq!(deps_of(&program, "a"), vec!["b", "in"]);
        assert_eq!(deps_of(&program, "b"), vec!["a", "c"]);
        // `in` is dead once `a` ran, so it may share storage with `b`.
        assert!(!deps_of(&program, "in").contains(&"b".to_string()));
    }

    #[test]
    fn live_ancestor_conflicts_with_descendant() {
        // a is read by both b and d, so it is live while c runs.
        let topology = Topology::new()
            .add(Primitive::input_layout("in", layout()))
            .add(Primitive::activation("a", "in", ActivationFunc::Relu))
            .add(Primitive::activation("b", "a", ActivationFunc::Relu))
            .add(Primitive::activation("c", "b", ActivationFunc::Relu))
            .add(Primitive::new(
                "d",
                PrimitiveKind::Eltwise {
                    mode: EltwiseMode::Sum,
                },
                &["c", "a"],
            ))
            .with_outputs(&["d"]);
        let mut program = build(&topology);
        compute_memory_dependencies(&mut program, MemoryDependencyStrategy::Basic);
        assert!(deps_of(&program, "a").contains(&"c".to_string()));
        assert!(deps_of(&program, "c").contains(&"a".to_string()));
    }

    #[test]
    fn outputs_stay_live_to_the_end() {
        let topology = chain().with_outputs(&["a", "d"]);
        let mut program = build(&topology);
        compute_memory_dependencies(&mut program, MemoryDependencyStrategy::Basic);
        assert_eq!(deps_of(&program, "a"), vec!["b", "c", "d", "in"]);
    }

    #[test]
    fn data_buffers_are_excluded() {
        let topology = Topology::new()
            .add(Primitive::input_layout("in", layout()))
            .add(Primitive::data("w", layout()))
            .add(Primitive::new(
                "sum",
                PrimitiveKind::Eltwise {
                    mode: EltwiseMode::Sum,
                },
                &["in", "w"],
            ))
            .with_outputs(&["sum"]);
        let mut program = build(&topology);
        compute_memory_dependencies(&mut program, MemoryDependencyStrategy::Basic);
        assert!(deps_of(&program, "w").is_empty());
        assert_eq!(deps_of(&program, "sum"), vec!["in"]);
    }

    #[test]
    fn skipped_nodes_extend_the_aliased_live_range() {
        let mut program = build(&chain());
        let b = program.key_of("b").unwrap();
        program[b].can_be_optimized = true;

        compute_memory_dependencies(&mut program, MemoryDependencyStrategy::SkippedBranchAware);
        assert!(deps_of(&program, "b").is_empty());
        // a's buffer is read through b by c.
        assert_eq!(deps_of(&program, "a"), vec!["c", "in"]);
        assert!(!deps_of(&program, "a").contains(&"d".to_string()));
    }

    #[test]
    fn out_of_order_independent_branches_conflict() {
        // Two branches off `in` with no data-flow order between them.
        let topology = Topology::new()
            .add(Primitive::input_layout("in", layout()))
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
        let mut in_order = build(&topology);
        compute_memory_dependencies(&mut in_order, MemoryDependencyStrategy::SkippedBranchAware);
        let mut ooo = build(&topology);
        compute_memory_dependencies(&mut ooo, MemoryDependencyStrategy::OutOfOrderAware);

        // Sequentially l1 is dead before r1 starts; out of order they may run
        // concurrently.
        assert!(!deps_of(&in_order, "l1").contains(&"r1".to_string()));
        assert!(deps_of(&ooo, "l1").contains(&"r1".to_string()));
        // l1 and join are ordered by data flow through l2.
        assert!(!deps_of(&ooo, "l1").contains(&"join".to_string()));
    }

    #[test]
    fn relation_is_symmetric() {
        let mut program = build(&chain());
        compute_memory_dependencies(&mut program, MemoryDependencyStrategy::OutOfOrderAware);
        for key in program.keys() {
            let id = program[key].id().clone();
            for other in program[key].memory_dependencies() {
                assert!(program.node(other.as_str()).unwrap().memory_dependencies().contains(&id));
            }
        }
    }
}
