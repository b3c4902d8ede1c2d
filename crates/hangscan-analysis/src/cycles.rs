//! Connectivity graph of visit requests and cycle search.
//!
//! Every `add_to_frontier` call records a `requester -> requested` edge,
//! including repeats and the synthetic root edge that starts a traversal.
//! When no traversal reported a hang, the graph is searched for a cycle as a
//! last-resort signal for fork/join deadlocks.

use std::collections::{HashMap, HashSet};

use petgraph::graphmap::DiGraphMap;

use hangscan_core::id::StreamId;

/// A node of the connectivity graph. `Root` stands for "no requester".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GraphNode {
    Root,
    Stream(StreamId),
}

impl From<Option<StreamId>> for GraphNode {
    fn from(stream: Option<StreamId>) -> Self {
        match stream {
            Some(s) => GraphNode::Stream(s),
            None => GraphNode::Root,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConnectivityGraph {
    graph: DiGraphMap<GraphNode, ()>,
}

impl ConnectivityGraph {
    pub fn new() -> Self {
        ConnectivityGraph::default()
    }

    /// Records `source -> dest`. Re-adding an edge is a no-op.
    pub fn add_edge(&mut self, source: Option<StreamId>, dest: StreamId) {
        self.graph
            .add_edge(GraphNode::from(source), GraphNode::Stream(dest), ());
    }

    pub fn remove_edge(&mut self, source: StreamId, dest: StreamId) -> bool {
        self.graph
            .remove_edge(GraphNode::Stream(source), GraphNode::Stream(dest))
            .is_some()
    }

    pub fn has_edge(&self, source: Option<StreamId>, dest: StreamId) -> bool {
        self.graph
            .contains_edge(GraphNode::from(source), GraphNode::Stream(dest))
    }

    /// Streams `stream` asked to visit, in edge insertion order.
    pub fn successors(&self, stream: StreamId) -> Vec<StreamId> {
        self.graph
            .neighbors(GraphNode::Stream(stream))
            .filter_map(|n| match n {
                GraphNode::Stream(s) => Some(s),
                GraphNode::Root => None,
            })
            .collect()
    }

    /// Every stream node, in insertion order.
    pub fn streams(&self) -> Vec<StreamId> {
        self.graph
            .nodes()
            .filter_map(|n| match n {
                GraphNode::Stream(s) => Some(s),
                GraphNode::Root => None,
            })
            .collect()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Drops `dest -> source` wherever an op stream `source` (as decided by
    /// `is_op_source`) has an edge to `dest` that has an edge back. Such
    /// pairs are siblings on one core that asked to visit each other, not a
    /// causal cycle. A `dest` whose back edge is dropped is not itself
    /// treated as a source afterwards. Returns the edges removed.
    pub fn remove_false_back_edges(
        &mut self,
        is_op_source: impl Fn(StreamId) -> bool,
    ) -> Vec<(StreamId, StreamId)> {
        let mut demoted: HashSet<StreamId> = HashSet::new();
        let mut removed: Vec<(StreamId, StreamId)> = Vec::new();

        for source in self.streams() {
            if demoted.contains(&source) || !is_op_source(source) {
                continue;
            }
            for dest in self.successors(source) {
                if self.has_edge(Some(dest), source) && !removed.contains(&(dest, source)) {
                    removed.push((dest, source));
                    demoted.insert(dest);
                }
            }
        }

        for (source, dest) in &removed {
            self.remove_edge(*source, *dest);
        }
        removed
    }

    /// Returns the first cycle found, as the streams on it in edge order
    /// without repeating the closing stream.
    ///
    /// Start nodes are tried in insertion order. The search is an iterative
    /// DFS with an explicit stack of `(node, next successor index)` and a
    /// visitor count per node; a successor with a non-zero count is on the
    /// stack and closes a cycle. Nodes whose successors were fully explored
    /// are not entered again.
    pub fn find_cycle(&self) -> Option<Vec<StreamId>> {
        let mut done: HashSet<StreamId> = HashSet::new();
        let successors: HashMap<StreamId, Vec<StreamId>> = self
            .streams()
            .into_iter()
            .map(|s| (s, self.successors(s)))
            .collect();

        for start in self.streams() {
            if done.contains(&start) {
                continue;
            }
            let mut visitors: HashMap<StreamId, u32> = HashMap::from([(start, 1)]);
            let mut stack: Vec<(StreamId, usize)> = vec![(start, 0)];

            while let Some(&(node, index)) = stack.last() {
                let next = successors.get(&node).and_then(|s| s.get(index)).copied();
                let Some(next) = next else {
                    stack.pop();
                    if let Some(count) = visitors.get_mut(&node) {
                        *count -= 1;
                    }
                    done.insert(node);
                    if let Some(top) = stack.last_mut() {
                        top.1 += 1;
                    }
                    continue;
                };

                if visitors.get(&next).copied().unwrap_or(0) > 0 {
                    let from = stack.iter().position(|(s, _)| *s == next).unwrap_or(0);
                    return Some(stack[from..].iter().map(|(s, _)| *s).collect());
                }
                if done.contains(&next) {
                    if let Some(top) = stack.last_mut() {
                        top.1 += 1;
                    }
                    continue;
                }
                *visitors.entry(next).or_insert(0) += 1;
                stack.push((next, 0));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hangscan_core::id::{ChipId, CoreCoord};

    fn s(index: u32) -> StreamId {
        StreamId::new(ChipId(0), CoreCoord::new(1, 1), index)
    }

    fn graph(edges: &[(Option<u32>, u32)]) -> ConnectivityGraph {
        let mut g = ConnectivityGraph::new();
        for (from, to) in edges {
            g.add_edge(from.map(s), s(*to));
        }
        g
    }

    fn is_rotation(cycle: &[StreamId], expected: &[StreamId]) -> bool {
        cycle.len() == expected.len()
            && (0..expected.len()).any(|r| {
                cycle
                    .iter()
                    .zip(expected.iter().cycle().skip(r))
                    .all(|(a, b)| a == b)
            })
    }

    #[test]
    fn finds_three_cycle() {
        let g = graph(&[(None, 1), (Some(1), 2), (Some(2), 3), (Some(3), 1)]);
        let cycle = g.find_cycle().unwrap();
        assert!(is_rotation(&cycle, &[s(1), s(2), s(3)]), "{cycle:?}");
    }

    #[test]
    fn finds_cycle_behind_a_tail() {
        let g = graph(&[(None, 5), (Some(5), 6), (Some(6), 1), (Some(1), 2), (Some(2), 3), (Some(3), 1)]);
        let cycle = g.find_cycle().unwrap();
        assert!(is_rotation(&cycle, &[s(1), s(2), s(3)]), "{cycle:?}");
    }

    #[test]
    fn acyclic_graph_has_no_cycle() {
        // diamond: 1 -> {2, 3} -> 4
        let g = graph(&[(None, 1), (Some(1), 2), (Some(1), 3), (Some(2), 4), (Some(3), 4)]);
        assert_eq!(g.find_cycle(), None);
        assert_eq!(ConnectivityGraph::new().find_cycle(), None);
    }

    #[test]
    fn duplicate_edges_collapse() {
        let g = graph(&[(Some(1), 2), (Some(1), 2), (None, 1), (None, 1)]);
        assert_eq!(g.edge_count(), 2);
        assert_eq!(g.successors(s(1)), vec![s(2)]);
        assert!(g.has_edge(None, s(1)));
    }

    #[test]
    fn false_back_edges_are_removed_once_per_pair() {
        let mut g = graph(&[(None, 1), (Some(1), 2), (Some(2), 1)]);
        let removed = g.remove_false_back_edges(|_| true);
        assert_eq!(removed, vec![(s(2), s(1))]);
        assert!(g.has_edge(Some(s(1)), s(2)));
        assert!(!g.has_edge(Some(s(2)), s(1)));
        assert_eq!(g.find_cycle(), None);
    }

    #[test]
    fn back_edges_of_non_op_streams_stay() {
        let mut g = graph(&[(None, 1), (Some(1), 2), (Some(2), 1)]);
        let removed = g.remove_false_back_edges(|_| false);
        assert!(removed.is_empty());
        assert!(g.find_cycle().is_some());
    }
}
