// Extends graph
//
// Configuration documents form a DAG through their `extends` lists. Edges are added as
// documents are loaded; an edge that would close a cycle is rejected with the full
// cycle path.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;

use crate::error::{Result, WeaverError};

#[derive(Debug, Default)]
pub struct ExtendsGraph {
    /// The directed graph structure
    graph: DiGraph<String, ()>,
    /// Fast lookup from document id to graph node index
    node_map: FxHashMap<String, NodeIndex>,
}

impl ExtendsGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn node(&mut self, id: &str) -> NodeIndex {
        if let Some(index) = self.node_map.get(id) {
            return *index;
        }
        let index = self.graph.add_node(id.to_string());
        self.node_map.insert(id.to_string(), index);
        index
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.node_map.contains_key(id)
    }

    /// Record that `from` extends `to`.
    pub fn add_edge(&mut self, from: &str, to: &str) -> Result<()> {
        let from_idx = self.node(from);
        let to_idx = self.node(to);
        if let Some(path) = self.path_between(to_idx, from_idx) {
            let mut cycle: Vec<String> = path
                .into_iter()
                .map(|index| self.graph[index].clone())
                .collect();
            cycle.push(to.to_string());
            return Err(WeaverError::ConfigCycle { cycle });
        }
        if self.graph.find_edge(from_idx, to_idx).is_none() {
            self.graph.add_edge(from_idx, to_idx, ());
        }
        Ok(())
    }

    /// Shortest path from `start` to `goal`, both included.
    fn path_between(&self, start: NodeIndex, goal: NodeIndex) -> Option<Vec<NodeIndex>> {
        let mut came_from: FxHashMap<NodeIndex, NodeIndex> = FxHashMap::default();
        let mut queue: VecDeque<NodeIndex> = VecDeque::new();
        queue.push_back(start);

        while let Some(current) = queue.pop_front() {
            if current == goal {
                let mut path = vec![current];
                let mut at = current;
                while let Some(previous) = came_from.get(&at) {
                    path.push(*previous);
                    at = *previous;
                }
                path.reverse();
                return Some(path);
            }
            for edge in self.graph.edges(current) {
                let neighbor = edge.target();
                if neighbor != start && !came_from.contains_key(&neighbor) {
                    came_from.insert(neighbor, current);
                    queue.push_back(neighbor);
                }
            }
        }
        None
    }
}
