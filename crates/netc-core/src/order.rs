//! Processing order: the topological sequence nodes are prepared and executed in.
//!
//! [`ProcessingOrder`] is a sequence of node keys plus a reverse index from key
//! to position. Both live in one `IndexSet`, so every insert or erase updates
//! the sequence and the index together and a rank query never recomputes the
//! order.
//!
//! The two construction algorithms (depth-first postorder and breadth-first
//! level order) are implemented here over a read-only [`OrderSource`] view of
//! the graph; the program supplies that view.

use std::collections::{HashMap, HashSet, VecDeque};

use indexmap::IndexSet;

use crate::error::CoreError;
use crate::id::NodeKey;

/// Graph view the order algorithms traverse.
pub trait OrderSource {
    /// Dependencies of `key` in slot order.
    fn dependencies_of(&self, key: NodeKey) -> Vec<NodeKey>;
    /// Users of `key`, each listed once.
    fn users_of(&self, key: NodeKey) -> Vec<NodeKey>;
    /// Every live node key, in a deterministic order.
    fn all_keys(&self) -> Vec<NodeKey>;
    /// Error describing a cycle through `key`.
    fn cycle_error(&self, key: NodeKey) -> CoreError;
}

#[derive(Debug, Clone, Default)]
pub struct ProcessingOrder {
    seq: IndexSet<NodeKey>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    Active,
    Done,
}

impl ProcessingOrder {
    pub fn new() -> Self {
        ProcessingOrder::default()
    }

    pub fn len(&self) -> usize {
        self.seq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seq.is_empty()
    }

    pub fn contains(&self, key: NodeKey) -> bool {
        self.seq.contains(&key)
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = NodeKey> + ExactSizeIterator + '_ {
        self.seq.iter().copied()
    }

    /// Snapshot of the order, for passes that mutate the graph while walking it.
    pub fn to_vec(&self) -> Vec<NodeKey> {
        self.seq.iter().copied().collect()
    }

    pub fn get(&self, position: usize) -> Option<NodeKey> {
        self.seq.get_index(position).copied()
    }

    /// Zero-based position of `key`.
    pub fn position(&self, key: NodeKey) -> Option<usize> {
        self.seq.get_index_of(&key)
    }

    /// One-based processing number of `key`.
    pub fn processing_number(&self, key: NodeKey) -> Option<usize> {
        self.position(key).map(|p| p + 1)
    }

    pub fn push_back(&mut self, key: NodeKey) {
        self.seq.insert(key);
    }

    /// Inserts `key` at `position`, shifting later nodes. A key already present
    /// is moved.
    pub fn insert_at(&mut self, position: usize, key: NodeKey) {
        let position = position.min(self.seq.len());
        self.seq.shift_remove(&key);
        let position = position.min(self.seq.len());
        self.seq.shift_insert(position, key);
    }

    /// Inserts `key` immediately before `anchor`; appends if `anchor` is absent.
    pub fn insert_before(&mut self, anchor: NodeKey, key: NodeKey) {
        self.seq.shift_remove(&key);
        match self.position(anchor) {
            Some(pos) => {
                self.seq.shift_insert(pos, key);
            }
            None => {
                self.seq.insert(key);
            }
        }
    }

    /// Inserts `key` immediately after `anchor`; appends if `anchor` is absent.
    pub fn insert_after(&mut self, anchor: NodeKey, key: NodeKey) {
        self.seq.shift_remove(&key);
        match self.position(anchor) {
            Some(pos) => {
                self.seq.shift_insert(pos + 1, key);
            }
            None => {
                self.seq.insert(key);
            }
        }
    }

    /// Puts `new` at the position of `old`, removing `old`.
    pub fn replace(&mut self, old: NodeKey, new: NodeKey) {
        if let Some(pos) = self.position(old) {
            self.seq.shift_remove(&new);
            let pos = self.position(old).unwrap_or(pos);
            self.seq.shift_insert(pos, new);
            self.seq.shift_remove(&old);
        }
    }

    pub fn erase(&mut self, key: NodeKey) -> bool {
        self.seq.shift_remove(&key)
    }

    pub fn clear(&mut self) {
        self.seq.clear();
    }

    /// `key` sits strictly after every dependency and strictly before every
    /// user.
    pub fn is_correct(&self, source: &impl OrderSource, key: NodeKey) -> bool {
        let Some(pos) = self.position(key) else {
            return false;
        };
        let deps_ok = source
            .dependencies_of(key)
            .into_iter()
            .all(|dep| self.position(dep).is_some_and(|p| p < pos));
        let users_ok = source
            .users_of(key)
            .into_iter()
            .all(|user| self.position(user).is_some_and(|p| p > pos));
        deps_ok && users_ok
    }

    /// Depth-first postorder over dependency edges.
    ///
    /// Traversal starts from `roots` (the declared outputs) and then from every
    /// remaining node without users, so nodes outside the output cones are
    /// ordered as well. Meeting a node on the active path is a cycle.
    pub fn calc_dfs(&mut self, source: &impl OrderSource, roots: &[NodeKey]) -> Result<(), CoreError> {
        let mut state: HashMap<NodeKey, Visit> = HashMap::new();
        let mut seq = IndexSet::new();

        let all = source.all_keys();
        let sinks = all
            .iter()
            .copied()
            .filter(|&k| source.users_of(k).is_empty());
        let starts: Vec<NodeKey> = roots.iter().copied().chain(sinks).collect();

        for start in starts {
            if state.contains_key(&start) {
                continue;
            }
            // (node, index of the next dependency to visit)
            let mut stack: Vec<(NodeKey, usize, Vec<NodeKey>)> =
                vec![(start, 0, source.dependencies_of(start))];
            state.insert(start, Visit::Active);

            while let Some((node, next, deps)) = stack.last_mut() {
                if let Some(&dep) = deps.get(*next) {
                    *next += 1;
                    match state.get(&dep) {
                        Some(Visit::Done) => {}
                        Some(Visit::Active) => return Err(source.cycle_error(dep)),
                        None => {
                            state.insert(dep, Visit::Active);
                            let dep_deps = source.dependencies_of(dep);
                            stack.push((dep, 0, dep_deps));
                        }
                    }
                } else {
                    let node = *node;
                    state.insert(node, Visit::Done);
                    seq.insert(node);
                    stack.pop();
                }
            }
        }

        // Nodes on a cycle with no sink are never reached from a start.
        if let Some(&stray) = all.iter().find(|k| !state.contains_key(k)) {
            return Err(source.cycle_error(stray));
        }

        self.seq = seq;
        Ok(())
    }

    /// Breadth-first level order.
    ///
    /// A node's level is its shortest hop distance from a source (a node
    /// without dependencies). Nodes are emitted level by level, keeping the
    /// current relative order inside a level. A node whose dependencies are
    /// not all emitted yet is deferred and placed immediately after the last of
    /// them once it is emitted.
    pub fn calc_bfs(&mut self, source: &impl OrderSource) {
        let keys: Vec<NodeKey> = if self.seq.is_empty() {
            source.all_keys()
        } else {
            self.to_vec()
        };

        let mut level: HashMap<NodeKey, usize> = HashMap::new();
        let mut queue: VecDeque<NodeKey> = VecDeque::new();
        for &k in &keys {
            if source.dependencies_of(k).is_empty() {
                level.insert(k, 0);
                queue.push_back(k);
            }
        }
        while let Some(k) = queue.pop_front() {
            let next = level[&k] + 1;
            for user in source.users_of(k) {
                if !level.contains_key(&user) {
                    level.insert(user, next);
                    queue.push_back(user);
                }
            }
        }

        let mut by_level = keys.clone();
        by_level.sort_by_key(|k| level.get(k).copied().unwrap_or(usize::MAX));

        let mut pending: HashMap<NodeKey, usize> = HashMap::new();
        let mut waiting: HashMap<NodeKey, Vec<NodeKey>> = HashMap::new();
        let mut seq: IndexSet<NodeKey> = IndexSet::with_capacity(keys.len());
        for k in by_level {
            let deps: HashSet<NodeKey> = source.dependencies_of(k).into_iter().collect();
            let missing: Vec<NodeKey> = deps.into_iter().filter(|d| !seq.contains(d)).collect();
            if missing.is_empty() {
                let end = seq.len();
                Self::emit(&mut seq, k, end, &mut pending, &mut waiting);
            } else {
                pending.insert(k, missing.len());
                for d in missing {
                    waiting.entry(d).or_default().push(k);
                }
            }
        }

        // Anything still waiting sits on a cycle; keep it rather than drop it.
        for k in keys {
            seq.insert(k);
        }
        self.seq = seq;
    }

    /// Places `key` at `position`, then every node it releases right after it,
    /// each released node directly followed by the ones it releases in turn.
    /// Returns the position following the placed run.
    fn emit(
        seq: &mut IndexSet<NodeKey>,
        key: NodeKey,
        position: usize,
        pending: &mut HashMap<NodeKey, usize>,
        waiting: &mut HashMap<NodeKey, Vec<NodeKey>>,
    ) -> usize {
        seq.shift_insert(position, key);
        let mut next = position + 1;
        let mut stack = vec![waiting.remove(&key).unwrap_or_default().into_iter()];
        while let Some(released) = stack.last_mut() {
            let Some(dependent) = released.next() else {
                stack.pop();
                continue;
            };
            let Some(count) = pending.get_mut(&dependent) else {
                continue;
            };
            *count -= 1;
            if *count == 0 {
                pending.remove(&dependent);
                seq.shift_insert(next, dependent);
                next += 1;
                stack.push(waiting.remove(&dependent).unwrap_or_default().into_iter());
            }
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Adjacency-list graph for exercising the algorithms without a program.
    struct Dag {
        deps: Vec<Vec<u32>>,
        users: Vec<Vec<u32>>,
    }

    impl Dag {
        fn new(deps: &[&[u32]]) -> Self {
            Dag::from_lists(deps.iter().map(|d| d.to_vec()).collect())
        }

        fn from_lists(deps: Vec<Vec<u32>>) -> Self {
            let mut users = vec![Vec::new(); deps.len()];
            for (user, list) in deps.iter().enumerate() {
                for &dep in list {
                    if !users[dep as usize].contains(&(user as u32)) {
                        users[dep as usize].push(user as u32);
                    }
                }
            }
            Dag { deps, users }
        }
    }

    impl OrderSource for Dag {
        fn dependencies_of(&self, key: NodeKey) -> Vec<NodeKey> {
            self.deps[key.0 as usize].iter().map(|&d| NodeKey(d)).collect()
        }

        fn users_of(&self, key: NodeKey) -> Vec<NodeKey> {
            self.users[key.0 as usize].iter().map(|&u| NodeKey(u)).collect()
        }

        fn all_keys(&self) -> Vec<NodeKey> {
            (0..self.deps.len() as u32).map(NodeKey).collect()
        }

        fn cycle_error(&self, key: NodeKey) -> CoreError {
            CoreError::Cycle {
                id: format!("n{}", key.0).into(),
            }
        }
    }

    fn assert_topological(order: &ProcessingOrder, dag: &Dag) {
        assert_eq!(order.len(), dag.deps.len());
        for key in dag.all_keys() {
            assert!(order.is_correct(dag, key), "node {} misplaced", key);
        }
    }

    #[test]
    fn dfs_orders_diamond() {
        // 0 -> 1, 0 -> 2, (1, 2) -> 3
        let dag = Dag::new(&[&[], &[0], &[0], &[1, 2]]);
        let mut order = ProcessingOrder::new();
        order.calc_dfs(&dag, &[NodeKey(3)]).unwrap();
        assert_topological(&order, &dag);
        assert_eq!(order.get(0), Some(NodeKey(0)));
        assert_eq!(order.processing_number(NodeKey(3)), Some(4));
    }

    #[test]
    fn dfs_includes_nodes_outside_output_cone() {
        // 0 -> 1 (output), 0 -> 2 (dead end)
        let dag = Dag::new(&[&[], &[0], &[0]]);
        let mut order = ProcessingOrder::new();
        order.calc_dfs(&dag, &[NodeKey(1)]).unwrap();
        assert_topological(&order, &dag);
    }

    #[test]
    fn dfs_detects_cycle() {
        // 0 -> 1 -> 2 -> 1, 2 -> 3
        let dag = Dag::new(&[&[], &[0, 2], &[1], &[2]]);
        let mut order = ProcessingOrder::new();
        let err = order.calc_dfs(&dag, &[NodeKey(3)]).unwrap_err();
        assert!(matches!(err, CoreError::Cycle { .. }));
    }

    #[test]
    fn dfs_detects_cycle_without_sink() {
        let dag = Dag::new(&[&[1], &[0]]);
        let mut order = ProcessingOrder::new();
        assert!(order.calc_dfs(&dag, &[]).is_err());
    }

    #[test]
    fn bfs_groups_by_level() {
        // 0 -> 1 -> 2, 0 -> 3, 3 -> 4
        let dag = Dag::new(&[&[], &[0], &[1], &[0], &[3]]);
        let mut order = ProcessingOrder::new();
        order.calc_dfs(&dag, &[NodeKey(2), NodeKey(4)]).unwrap();
        order.calc_bfs(&dag);
        assert_topological(&order, &dag);
        let pos = |k| order.position(NodeKey(k)).unwrap();
        // level 1 nodes (1, 3) precede level 2 nodes (2, 4)
        assert!(pos(1) < pos(2) && pos(1) < pos(4));
        assert!(pos(3) < pos(2) && pos(3) < pos(4));
    }

    #[test]
    fn bfs_defers_node_behind_deeper_dependency() {
        // 0 -> 1 -> 2 -> 3, and 4 = f(0, 3): level 1 but must follow 3.
        let dag = Dag::new(&[&[], &[0], &[1], &[2], &[0, 3]]);
        let mut order = ProcessingOrder::new();
        order.calc_bfs(&dag);
        assert_topological(&order, &dag);
        assert_eq!(
            order.position(NodeKey(4)),
            order.position(NodeKey(3)).map(|p| p + 1)
        );
    }

    #[test]
    fn bfs_releases_long_deferral_chain() {
        // 0 is the source, 1..=200 a chain off it, then y_0 = f(0, 200) and
        // y_j = f(0, y_{j-1}). Every y sits on level 1 but waits on the one
        // before it, so releasing them nests 20_000 deep.
        const CHAIN: u32 = 200;
        const WAITERS: u32 = 20_000;
        let mut deps: Vec<Vec<u32>> = vec![vec![]];
        for c in 1..=CHAIN {
            deps.push(vec![c - 1]);
        }
        for j in 0..WAITERS {
            let prev = if j == 0 { CHAIN } else { CHAIN + j };
            deps.push(vec![0, prev]);
        }
        let dag = Dag::from_lists(deps);

        let mut order = ProcessingOrder::new();
        order.calc_dfs(&dag, &[NodeKey(CHAIN + WAITERS)]).unwrap();
        order.calc_bfs(&dag);
        assert_topological(&order, &dag);
        let last_chain = order.position(NodeKey(CHAIN)).unwrap();
        assert_eq!(order.position(NodeKey(CHAIN + 1)), Some(last_chain + 1));
        assert_eq!(order.get(order.len() - 1), Some(NodeKey(CHAIN + WAITERS)));
    }

    #[test]
    fn insert_and_erase_keep_index_in_sync() {
        let mut order = ProcessingOrder::new();
        for k in 0..3 {
            order.push_back(NodeKey(k));
        }
        order.insert_before(NodeKey(1), NodeKey(9));
        assert_eq!(order.to_vec(), vec![NodeKey(0), NodeKey(9), NodeKey(1), NodeKey(2)]);
        assert_eq!(order.position(NodeKey(1)), Some(2));

        order.insert_after(NodeKey(2), NodeKey(8));
        assert_eq!(order.position(NodeKey(8)), Some(4));

        assert!(order.erase(NodeKey(9)));
        assert_eq!(order.position(NodeKey(1)), Some(1));
        assert!(!order.erase(NodeKey(9)));
    }

    #[test]
    fn replace_takes_position() {
        let mut order = ProcessingOrder::new();
        for k in 0..3 {
            order.push_back(NodeKey(k));
        }
        order.replace(NodeKey(1), NodeKey(7));
        assert_eq!(order.to_vec(), vec![NodeKey(0), NodeKey(7), NodeKey(2)]);
        assert!(!order.contains(NodeKey(1)));
    }
}
