//! Graph surgery primitives.
//!
//! Every edit here keeps the node store, the dependency/user views, the id
//! map, the input/output lists and the processing order consistent with each
//! other. Edits that only make sense under a precondition passes routinely
//! probe for (`extract_and_remove`, `remove_if_dangling`) return `bool`;
//! misuse of the other primitives is a [`CoreError`].
//!
//! The processing order is only maintained once it exists: before the first
//! order calculation, surgery leaves it empty.

use petgraph::algo::has_path_connecting;
use petgraph::stable_graph::EdgeIndex;
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use crate::error::CoreError;
use crate::id::{NodeKey, PrimitiveId};
use crate::node::{DependencyEdge, ProgramNode};
use crate::primitive::Primitive;
use crate::program::{ix, Program};

impl Program {
    // -----------------------------------------------------------------------
    // Node creation and raw edges
    // -----------------------------------------------------------------------

    /// Returns the node for `prim.id`, creating it if the id is new. The node
    /// is created detached and outside the processing order.
    pub fn get_or_create(&mut self, prim: Primitive) -> NodeKey {
        if let Some(&key) = self.ids.get(&prim.id) {
            return key;
        }
        let id = prim.id.clone();
        let key = NodeKey::from(self.graph.add_node(ProgramNode::new(prim)));
        self.ids.insert(id, key);
        key
    }

    /// Appends `prev` as the last dependency of `next`.
    pub fn add_connection(&mut self, prev: NodeKey, next: NodeKey) -> Result<(), CoreError> {
        self.check_key(prev)?;
        self.check_key(next)?;
        self.connect(prev, next);
        Ok(())
    }

    pub(crate) fn connect(&mut self, prev: NodeKey, next: NodeKey) {
        let slot = self.dependency_count(next) as u32;
        self.graph.add_edge(ix(prev), ix(next), DependencyEdge { slot });
    }

    /// Removes every edge `prev -> next`; the remaining dependencies of
    /// `next` close the gap.
    pub fn remove_connection(&mut self, prev: NodeKey, next: NodeKey) -> Result<(), CoreError> {
        self.check_key(prev)?;
        self.check_key(next)?;
        let edges: Vec<EdgeIndex<u32>> = self
            .graph
            .edges_connecting(ix(prev), ix(next))
            .map(|e| e.id())
            .collect();
        if edges.is_empty() {
            return Ok(());
        }
        for edge in edges {
            self.graph.remove_edge(edge);
        }
        self.renumber_slots(next);
        Ok(())
    }

    /// Detaches `node` from all its dependencies and users.
    pub fn remove_all_connections(&mut self, node: NodeKey) -> Result<(), CoreError> {
        self.check_key(node)?;
        self.detach(node);
        Ok(())
    }

    fn detach(&mut self, node: NodeKey) {
        let users = self.users(node);
        let edges: Vec<EdgeIndex<u32>> = self
            .graph
            .edges_directed(ix(node), Direction::Incoming)
            .chain(self.graph.edges_directed(ix(node), Direction::Outgoing))
            .map(|e| e.id())
            .collect();
        for edge in edges {
            self.graph.remove_edge(edge);
        }
        for user in users {
            self.renumber_slots(user);
        }
    }

    /// Compacts the input slots of `key` to `0..n`, keeping their order.
    fn renumber_slots(&mut self, key: NodeKey) {
        let mut edges: Vec<(u32, EdgeIndex<u32>)> = self
            .graph
            .edges_directed(ix(key), Direction::Incoming)
            .map(|e| (e.weight().slot, e.id()))
            .collect();
        edges.sort_by_key(|&(slot, _)| slot);
        for (slot, (_, edge)) in edges.into_iter().enumerate() {
            if let Some(weight) = self.graph.edge_weight_mut(edge) {
                weight.slot = slot as u32;
            }
        }
    }

    /// Makes every slot of `user` that reads `from` read `to` instead.
    fn redirect_dependency(&mut self, user: NodeKey, from: NodeKey, to: NodeKey) {
        let edges: Vec<(EdgeIndex<u32>, DependencyEdge)> = self
            .graph
            .edges_connecting(ix(from), ix(user))
            .map(|e| (e.id(), *e.weight()))
            .collect();
        for (edge, weight) in edges {
            self.graph.remove_edge(edge);
            self.graph.add_edge(ix(to), ix(user), weight);
        }
    }

    /// Drops `key` from every index and from the store.
    fn erase_node(&mut self, key: NodeKey, optimized: bool) {
        self.order.erase(key);
        self.inputs.retain(|&k| k != key);
        self.outputs.retain(|&k| k != key);
        if let Some(node) = self.graph.remove_node(ix(key)) {
            self.ids.shift_remove(node.id());
            if optimized {
                self.optimized_out.push(node.id().clone());
            }
        }
    }

    // -----------------------------------------------------------------------
    // Intermediates
    // -----------------------------------------------------------------------

    /// Inserts `node` between `next` and its dependency at `slot`.
    ///
    /// With `connect_to_prev`, `node` (which must have no dependencies yet)
    /// is wired to read the old dependency. With `move_users`, every user of
    /// the old dependency switches to `node` and `node` is placed right
    /// after the old dependency; otherwise only `next` switches and `node`
    /// is placed right before `next`.
    pub fn add_intermediate(
        &mut self,
        node: NodeKey,
        next: NodeKey,
        slot: usize,
        connect_to_prev: bool,
        move_users: bool,
    ) -> Result<(), CoreError> {
        self.check_key(node)?;
        self.check_key(next)?;
        let deps = self.dependencies(next);
        let prev = *deps.get(slot).ok_or_else(|| CoreError::DependencyIndex {
            id: self[next].id().clone(),
            index: slot,
            count: deps.len(),
        })?;
        if connect_to_prev && self.dependency_count(node) != 0 {
            return Err(CoreError::NotDetached {
                id: self[node].id().clone(),
                reason: "intermediate already has dependencies".to_string(),
            });
        }

        if connect_to_prev {
            self.connect(prev, node);
        }

        if move_users {
            for user in self.users(prev) {
                if user != node {
                    self.redirect_dependency(user, prev, node);
                }
            }
            if !self.order.is_empty() {
                self.order.insert_after(prev, node);
            }
            self.mark_if_constant(node);
            self.mark_if_data_flow(node);
        } else {
            let edge = self
                .graph
                .edges_directed(ix(next), Direction::Incoming)
                .find(|e| e.weight().slot as usize == slot)
                .map(|e| (e.id(), *e.weight()));
            if let Some((edge, weight)) = edge {
                self.graph.remove_edge(edge);
                self.graph.add_edge(ix(node), ix(next), weight);
            }
            if !self.order.is_empty() {
                self.order.insert_before(next, node);
            }
            let (constant, data_flow) = (self[prev].constant, self[prev].data_flow);
            let inserted = &mut self[node];
            inserted.constant = constant;
            inserted.data_flow = data_flow;
        }
        if self.dependency_count(node) != 0 {
            self.inputs.retain(|&k| k != node);
        }
        Ok(())
    }

    /// Creates a node for `prim` and inserts it as an intermediate.
    pub fn add_intermediate_primitive(
        &mut self,
        prim: Primitive,
        next: NodeKey,
        slot: usize,
        connect_to_prev: bool,
        move_users: bool,
    ) -> Result<NodeKey, CoreError> {
        if self.ids.contains_key(&prim.id) {
            return Err(CoreError::DuplicateId { id: prim.id });
        }
        let key = self.get_or_create(prim);
        self.add_intermediate(key, next, slot, connect_to_prev, move_users)?;
        Ok(key)
    }

    /// Like [`add_intermediate`](Self::add_intermediate), addressing the
    /// dependency by node instead of slot (its first slot is used).
    pub fn add_intermediate_between(
        &mut self,
        node: NodeKey,
        next: NodeKey,
        prev: NodeKey,
        connect_to_prev: bool,
        move_users: bool,
    ) -> Result<(), CoreError> {
        self.check_key(prev)?;
        let slot = self
            .dependencies(next)
            .iter()
            .position(|&d| d == prev)
            .ok_or_else(|| CoreError::InvalidConnection {
                reason: format!("'{}' is not a dependency of '{}'", self[prev].id(), self[next].id()),
            })?;
        self.add_intermediate(node, next, slot, connect_to_prev, move_users)
    }

    // -----------------------------------------------------------------------
    // Removal
    // -----------------------------------------------------------------------

    /// Removes a single-input, non-output node, rewiring its users to read
    /// its input in the same slots. Returns `false` (graph untouched) when
    /// the node does not qualify.
    pub fn extract_and_remove(&mut self, node: NodeKey) -> bool {
        let Some(n) = self.get(node) else {
            return false;
        };
        if n.is_output() {
            return false;
        }
        let deps = self.dependencies(node);
        let [input] = deps.as_slice() else {
            return false;
        };
        let input = *input;
        for user in self.users(node) {
            self.redirect_dependency(user, node, input);
        }
        self.detach(node);
        self.erase_node(node, true);
        true
    }

    /// Removes `node` if nothing reads it and it is not an output. Its
    /// dependencies lose it as a user.
    pub fn remove_if_dangling(&mut self, node: NodeKey) -> bool {
        let Some(n) = self.get(node) else {
            return false;
        };
        if n.is_output() || self.user_count(node) != 0 {
            return false;
        }
        self.detach(node);
        self.erase_node(node, true);
        true
    }

    /// Removes a batch of nodes together with all their edges. Unknown keys
    /// are skipped.
    pub fn remove_nodes(&mut self, nodes: &[NodeKey]) {
        for &key in nodes {
            if !self.contains_key(key) {
                continue;
            }
            self.detach(key);
            self.erase_node(key, true);
        }
    }

    // -----------------------------------------------------------------------
    // Replacement and renaming
    // -----------------------------------------------------------------------

    /// Puts the detached node `new` in place of `old`: same dependency
    /// slots, same users, same order position, same flags and same id.
    /// `old` is removed.
    pub fn replace(&mut self, old: NodeKey, new: NodeKey) -> Result<(), CoreError> {
        self.check_key(old)?;
        self.check_key(new)?;
        if old == new {
            return Ok(());
        }
        let new_id = self[new].id().clone();
        if self.dependency_count(new) != 0 || self.user_count(new) != 0 {
            return Err(CoreError::NotDetached {
                id: new_id,
                reason: "replacement node already has connections".to_string(),
            });
        }
        if self[new].is_output() {
            return Err(CoreError::NotDetached {
                id: new_id,
                reason: "replacement node is an output".to_string(),
            });
        }

        let incoming: Vec<(NodeKey, DependencyEdge)> = self
            .graph
            .edges_directed(ix(old), Direction::Incoming)
            .map(|e| (NodeKey::from(e.source()), *e.weight()))
            .collect();
        let outgoing: Vec<(NodeKey, DependencyEdge)> = self
            .graph
            .edges_directed(ix(old), Direction::Outgoing)
            .map(|e| (NodeKey::from(e.target()), *e.weight()))
            .collect();
        for (dep, weight) in incoming {
            self.graph.add_edge(ix(dep), ix(new), weight);
        }
        for (user, weight) in outgoing {
            self.graph.add_edge(ix(new), ix(user), weight);
        }

        let (constant, data_flow, output) = {
            let o = &self[old];
            (o.constant, o.data_flow, o.output)
        };
        {
            let n = &mut self[new];
            n.constant = constant;
            n.data_flow = data_flow;
            n.output = output;
        }
        for list in [&mut self.inputs, &mut self.outputs] {
            for k in list.iter_mut() {
                if *k == old {
                    *k = new;
                }
            }
        }
        if self.order.contains(old) {
            self.order.replace(old, new);
        } else {
            self.order.erase(new);
        }

        let old_id = self[old].id().clone();
        let _ = self.graph.remove_node(ix(old));
        self.ids.shift_remove(&new_id);
        if let Some(slot) = self.ids.get_mut(&old_id) {
            *slot = new;
        }
        self[new].set_id(old_id);
        Ok(())
    }

    /// Points every user of `old` at `new`, keeping slots. `new` itself is
    /// left reading `old` if it did.
    pub fn replace_all_usages(&mut self, old: NodeKey, new: NodeKey) -> Result<(), CoreError> {
        self.check_key(old)?;
        self.check_key(new)?;
        for user in self.users(old) {
            if user != new {
                self.redirect_dependency(user, old, new);
            }
        }
        Ok(())
    }

    /// Gives `node` a new id. Output nodes keep their ids.
    pub fn rename(&mut self, node: NodeKey, new_id: impl Into<PrimitiveId>) -> Result<(), CoreError> {
        self.check_key(node)?;
        let new_id = new_id.into();
        match self.ids.get(&new_id) {
            Some(&k) if k == node => return Ok(()),
            Some(_) => return Err(CoreError::DuplicateId { id: new_id }),
            None => {}
        }
        if self[node].is_output() {
            return Err(CoreError::RenameOutput {
                id: self[node].id().clone(),
            });
        }
        let old_id = self[node].id().clone();
        if let Some(index) = self.ids.get_index_of(&old_id) {
            self.ids.shift_remove_index(index);
            self.ids.shift_insert(index, new_id.clone(), node);
        }
        self[node].set_id(new_id);
        Ok(())
    }

    /// Exchanges the ids of two nodes.
    pub fn swap_names(&mut self, a: NodeKey, b: NodeKey) -> Result<(), CoreError> {
        self.check_key(a)?;
        self.check_key(b)?;
        let id_a = self[a].id().clone();
        let id_b = self[b].id().clone();
        if let Some(slot) = self.ids.get_mut(&id_a) {
            *slot = b;
        }
        if let Some(slot) = self.ids.get_mut(&id_b) {
            *slot = a;
        }
        self[a].set_id(id_b);
        self[b].set_id(id_a);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Edge reversal
    // -----------------------------------------------------------------------

    /// Turns the edge `dep -> user` into `user -> dep` (appended as the last
    /// dependency of `dep`) and recomputes the processing order.
    ///
    /// Fails without touching the graph if the edge does not exist or if
    /// `dep` reaches `user` along another path, since the flip would close
    /// a cycle.
    pub fn reverse_connection(&mut self, dep: NodeKey, user: NodeKey) -> Result<(), CoreError> {
        self.check_key(dep)?;
        self.check_key(user)?;
        if self.graph.find_edge(ix(dep), ix(user)).is_none() {
            return Err(CoreError::InvalidConnection {
                reason: format!("'{}' is not a dependency of '{}'", self[dep].id(), self[user].id()),
            });
        }
        let other_path = self
            .users(dep)
            .into_iter()
            .filter(|&u| u != user)
            .any(|u| has_path_connecting(&self.graph, ix(u), ix(user), None));
        if other_path {
            return Err(CoreError::Cycle {
                id: self[user].id().clone(),
            });
        }

        self.remove_connection(dep, user)?;
        self.connect(user, dep);
        if self.dependency_count(user) == 0 && !self.inputs.contains(&user) {
            self.inputs.push(user);
        }
        self.inputs.retain(|&k| k != dep);
        if !self.order.is_empty() {
            self.calc_processing_order()?;
        }
        Ok(())
    }
}
