//! Program nodes and dependency edges.
//!
//! A [`ProgramNode`] wraps one [`Primitive`] with the state the compiler derives
//! for it: constant and data-flow flags, the output flag, the output padding
//! merged from consumer requirements, a fused activation, the cached output
//! layout, and the memory-dependency set.
//!
//! Connectivity is not stored on the node. Edges live in the program's node
//! store and run from a dependency to its user; the edge weight
//! ([`DependencyEdge`]) records the input slot on the user, so a node's
//! dependency list is its incoming edges sorted by slot and its user set is
//! the targets of its outgoing edges.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::id::PrimitiveId;
use crate::primitive::{ActivationFunc, Layout, Padding, Primitive, PrimitiveKind, PrimitiveType};

/// Edge from a dependency to its user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEdge {
    /// Input position on the user.
    pub slot: u32,
}

/// A vertex of the program graph.
#[derive(Debug, Clone)]
pub struct ProgramNode {
    desc: Primitive,
    pub(crate) constant: bool,
    pub(crate) data_flow: bool,
    pub(crate) output: bool,
    /// Runs as a no-op at execution time (e.g. an in-place reshape).
    pub can_be_optimized: bool,
    pub fused_activation: Option<ActivationFunc>,
    output_padding: Padding,
    output_layout: Option<Layout>,
    pub(crate) memory_dependencies: BTreeSet<PrimitiveId>,
}

impl ProgramNode {
    pub(crate) fn new(desc: Primitive) -> Self {
        let constant = matches!(desc.kind, PrimitiveKind::Data { .. });
        let output_padding = desc.output_padding;
        ProgramNode {
            desc,
            constant,
            data_flow: false,
            output: false,
            can_be_optimized: false,
            fused_activation: None,
            output_padding,
            output_layout: None,
            memory_dependencies: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> &PrimitiveId {
        &self.desc.id
    }

    pub(crate) fn set_id(&mut self, id: PrimitiveId) {
        self.desc.id = id;
    }

    pub fn primitive(&self) -> &Primitive {
        &self.desc
    }

    pub fn kind(&self) -> &PrimitiveKind {
        &self.desc.kind
    }

    pub fn primitive_type(&self) -> PrimitiveType {
        self.desc.kind.primitive_type()
    }

    pub fn is_type(&self, ty: PrimitiveType) -> bool {
        self.primitive_type() == ty
    }

    /// All inputs are constant (or the node is a `Data` buffer).
    pub fn is_constant(&self) -> bool {
        self.constant
    }

    /// Depends, directly or transitively, on a network input.
    pub fn is_in_data_flow(&self) -> bool {
        self.data_flow
    }

    pub fn is_output(&self) -> bool {
        self.output
    }

    pub fn output_padding(&self) -> Padding {
        self.output_padding
    }

    pub fn set_output_padding(&mut self, padding: Padding) {
        self.output_padding = padding;
        if let Some(layout) = self.output_layout.as_mut() {
            layout.padding = padding;
        }
    }

    /// Grows the output padding to cover `padding` as well.
    pub fn merge_output_padding(&mut self, padding: Padding) {
        self.set_output_padding(Padding::max(self.output_padding, padding));
    }

    /// Layout computed by the last layout recalculation, if any.
    pub fn output_layout(&self) -> Option<Layout> {
        self.output_layout
    }

    pub(crate) fn set_output_layout(&mut self, layout: Option<Layout>) {
        self.output_layout = layout.map(|l| l.with_padding(self.output_padding));
    }

    /// Ids of nodes whose buffers must not alias this node's buffer.
    pub fn memory_dependencies(&self) -> &BTreeSet<PrimitiveId> {
        &self.memory_dependencies
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitive::{Format, Shape};

    #[test]
    fn data_nodes_start_constant() {
        let layout = Layout::new(Format::Bfyx, Shape::new(1, 1, 1, 1));
        assert!(ProgramNode::new(Primitive::data("w", layout)).is_constant());
        assert!(!ProgramNode::new(Primitive::input_layout("in", layout)).is_constant());
    }

    #[test]
    fn merge_output_padding_takes_maximum() {
        let prim = Primitive::activation("relu", "in", ActivationFunc::Relu)
            .with_output_padding(Padding::new([1, 0], [0, 0]));
        let mut node = ProgramNode::new(prim);
        node.merge_output_padding(Padding::new([0, 2], [1, 1]));
        assert_eq!(node.output_padding(), Padding::new([1, 2], [1, 1]));
    }

    #[test]
    fn layout_carries_current_padding() {
        let mut node = ProgramNode::new(Primitive::activation("relu", "in", ActivationFunc::Relu));
        node.set_output_layout(Some(Layout::new(Format::Bfyx, Shape::new(1, 2, 3, 3))));
        node.set_output_padding(Padding::new([1, 1], [1, 1]));
        assert_eq!(
            node.output_layout().unwrap().padding,
            Padding::new([1, 1], [1, 1])
        );
    }
}
