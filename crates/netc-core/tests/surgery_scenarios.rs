//! End-to-end graph surgery scenarios on small hand-built programs.

use netc_core::{
    ActivationFunc, BuildOptions, CoreError, EltwiseMode, Format, Layout, NodeKey, Primitive,
    PrimitiveKind, Program, Shape, Topology,
};

fn layout() -> Layout {
    Layout::new(Format::Bfyx, Shape::new(1, 8, 16, 16))
}

/// A (input), B = f(A), C = g(A), D = h(B, C) (output)
fn diamond() -> Program {
    let topology = Topology::new()
        .add(Primitive::input_layout("A", layout()))
        .add(Primitive::activation("B", "A", ActivationFunc::Relu))
        .add(Primitive::activation("C", "A", ActivationFunc::Sigmoid))
        .add(Primitive::new(
            "D",
            PrimitiveKind::Eltwise {
                mode: EltwiseMode::Prod,
            },
            &["B", "C"],
        ))
        .with_outputs(&["D"]);
    let mut program = Program::from_topology(&topology, BuildOptions::default(), false).unwrap();
    program.calc_processing_order().unwrap();
    program
}

fn key(program: &Program, id: &str) -> NodeKey {
    program.key_of(id).unwrap()
}

fn edges(program: &Program) -> Vec<(String, String, usize)> {
    let mut edges = Vec::new();
    for k in program.keys() {
        for (slot, dep) in program.dependencies(k).into_iter().enumerate() {
            edges.push((program[dep].id().to_string(), program[k].id().to_string(), slot));
        }
    }
    edges.sort();
    edges
}

#[test]
fn get_or_create_is_idempotent() {
    let mut program = diamond();
    let first = program.get_or_create(Primitive::activation("E", "D", ActivationFunc::Abs));
    let second = program.get_or_create(Primitive::activation("E", "D", ActivationFunc::Tanh));
    assert_eq!(first, second);
    assert_eq!(program.node_count(), 5);
}

#[test]
fn intermediate_then_extract_restores_direct_edge() {
    let mut program = diamond();
    let before = edges(&program);
    let d = key(&program, "D");
    let r = program
        .add_intermediate_primitive(Primitive::reorder("R", "C", Format::Byxf), d, 1, true, false)
        .unwrap();
    assert_ne!(edges(&program), before);
    assert!(program.extract_and_remove(r));
    assert_eq!(edges(&program), before);
    assert_eq!(program.first_misplaced_node(), None);
}

#[test]
fn replace_preserves_edge_multiset() {
    let mut program = diamond();
    let before: Vec<_> = edges(&program);
    let b = key(&program, "B");
    let new = program.get_or_create(Primitive::activation("B2", "A", ActivationFunc::Linear));
    program.replace(b, new).unwrap();
    assert!(!program.contains_key(b));
    // The replacement took over the id, so the edge list reads the same.
    assert_eq!(edges(&program), before);
    assert_eq!(key(&program, "B"), new);
}

#[test]
fn reverse_connection_places_user_first() {
    let mut program = diamond();
    let d = key(&program, "D");
    let e = program.get_or_create(Primitive::activation("E", "D", ActivationFunc::Abs));
    program.add_connection(d, e).unwrap();
    program.calc_processing_order().unwrap();

    program.reverse_connection(d, e).unwrap();
    let order = program.processing_order();
    assert!(order.position(e).unwrap() < order.position(d).unwrap());
    assert_eq!(program.first_misplaced_node(), None);
}

#[test]
fn reverse_connection_refuses_cycle() {
    let mut program = diamond();
    let a = key(&program, "A");
    let b = key(&program, "B");
    let d = key(&program, "D");
    // A reaches D through B and through C, but there is no direct edge.
    assert!(matches!(
        program.reverse_connection(a, d),
        Err(CoreError::InvalidConnection { .. })
    ));
    program.add_connection(a, d).unwrap();
    let before = edges(&program);
    assert!(matches!(program.reverse_connection(a, d), Err(CoreError::Cycle { .. })));
    assert_eq!(edges(&program), before);
    assert!(program.reverse_connection(a, b).is_ok());
}

#[test]
fn remove_if_dangling_after_last_user_goes() {
    let mut program = diamond();
    let c = key(&program, "C");
    let d = key(&program, "D");
    let before = edges(&program);
    assert!(!program.remove_if_dangling(c));
    assert_eq!(edges(&program), before);

    program.remove_connection(c, d).unwrap();
    assert!(program.remove_if_dangling(c));
    assert!(!program.has_node("C"));
    assert!(!program.contains_key(c));
}

#[test]
fn extract_refuses_output() {
    let mut program = diamond();
    let topology = Topology::new()
        .add(Primitive::input_layout("in", layout()))
        .add(Primitive::activation("out", "in", ActivationFunc::Relu))
        .with_outputs(&["out"]);
    let mut single = Program::from_topology(&topology, BuildOptions::default(), false).unwrap();
    single.calc_processing_order().unwrap();
    let out = key(&single, "out");
    assert!(!single.extract_and_remove(out));
    assert!(single.has_node("out"));

    let d = key(&program, "D");
    let before = edges(&program);
    assert!(!program.extract_and_remove(d));
    assert_eq!(edges(&program), before);
}
