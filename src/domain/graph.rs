//! Dependency graph for modules
//!
//! Mirrors the declared dependencies of every registered module, kept in
//! lockstep with registration. Used for diagnostics only: resolution walks
//! the live definitions instead. Uses petgraph for graph analysis.

use std::collections::{BTreeMap, HashMap};

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::dot::{Config, Dot};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum GraphError {
    #[error("Dependency cycle involves module: {0}")]
    CycleDetected(String),
}

/// A dependency graph over module names
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    /// The underlying directed graph; edge direction is dependency -> dependent
    graph: DiGraph<String, ()>,

    /// Map from module name to node index
    node_map: HashMap<String, NodeIndex>,

    /// Declared dependencies of each registered module, in declaration order
    declared: BTreeMap<String, Vec<String>>,
}

impl DependencyGraph {
    /// Creates an empty dependency graph
    pub fn new() -> Self {
        Self::default()
    }

    fn node(&mut self, name: &str) -> NodeIndex {
        if let Some(idx) = self.node_map.get(name) {
            return *idx;
        }
        let idx = self.graph.add_node(name.to_string());
        self.node_map.insert(name.to_string(), idx);
        idx
    }

    /// Records (or replaces) the declared dependencies of a module
    ///
    /// Dependencies that are not registered yet still get a node so the
    /// graph shows what is missing.
    pub fn set_dependencies(&mut self, name: &str, dependencies: &[String]) {
        let idx = self.node(name);

        // remove_edge swaps indices, so drop edges one at a time
        while let Some(edge) = self.graph.first_edge(idx, Direction::Incoming) {
            self.graph.remove_edge(edge);
        }

        for dep in dependencies {
            let dep_idx = self.node(dep);
            if self.graph.find_edge(dep_idx, idx).is_none() {
                self.graph.add_edge(dep_idx, idx, ());
            }
        }

        self.declared.insert(name.to_string(), dependencies.to_vec());
    }

    /// Declared dependencies of a module, in declaration order
    pub fn dependencies(&self, name: &str) -> Vec<String> {
        self.declared.get(name).cloned().unwrap_or_default()
    }

    /// Modules that declare a dependency on `name`, sorted
    pub fn dependents(&self, name: &str) -> Vec<String> {
        let idx = match self.node_map.get(name) {
            Some(idx) => *idx,
            None => return vec![],
        };

        let mut dependents: Vec<String> = self
            .graph
            .neighbors_directed(idx, Direction::Outgoing)
            .filter_map(|idx| self.graph.node_weight(idx).cloned())
            .collect();
        dependents.sort();
        dependents
    }

    /// Names referenced as dependencies but never registered
    pub fn missing(&self) -> Vec<String> {
        let mut missing: Vec<String> = self
            .node_map
            .keys()
            .filter(|name| !self.declared.contains_key(*name))
            .cloned()
            .collect();
        missing.sort();
        missing
    }

    /// Groups of modules that depend on each other cyclically
    ///
    /// Each group is sorted; self-dependencies form single-member groups.
    pub fn cycles(&self) -> Vec<Vec<String>> {
        let mut cycles: Vec<Vec<String>> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|component| {
                component.len() > 1
                    || component
                        .first()
                        .map(|idx| self.graph.find_edge(*idx, *idx).is_some())
                        .unwrap_or(false)
            })
            .map(|component| {
                let mut names: Vec<String> = component
                    .into_iter()
                    .filter_map(|idx| self.graph.node_weight(idx).cloned())
                    .collect();
                names.sort();
                names
            })
            .collect();
        cycles.sort();
        cycles
    }

    /// All modules in topological order (dependencies before dependents)
    pub fn topological_order(&self) -> Result<Vec<String>, GraphError> {
        toposort(&self.graph, None)
            .map(|order| {
                order
                    .into_iter()
                    .filter_map(|idx| self.graph.node_weight(idx).cloned())
                    .collect()
            })
            .map_err(|cycle| {
                let name = self
                    .graph
                    .node_weight(cycle.node_id())
                    .cloned()
                    .unwrap_or_default();
                GraphError::CycleDetected(name)
            })
    }

    /// Name -> declared dependencies, for display
    pub fn snapshot(&self) -> BTreeMap<String, Vec<String>> {
        self.declared.clone()
    }

    /// Renders the graph in Graphviz DOT format
    pub fn to_dot(&self) -> String {
        format!("{:?}", Dot::with_config(&self.graph, &[Config::EdgeNoLabel]))
    }

    /// Returns true if the module is registered in the graph
    pub fn contains(&self, name: &str) -> bool {
        self.declared.contains_key(name)
    }

    /// Returns the number of registered modules
    pub fn len(&self) -> usize {
        self.declared.len()
    }

    /// Returns true if no module is registered
    pub fn is_empty(&self) -> bool {
        self.declared.is_empty()
    }

    /// Forgets everything
    pub fn clear(&mut self) {
        self.graph.clear();
        self.node_map.clear();
        self.declared.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deps(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_graph() {
        let graph = DependencyGraph::new();
        assert!(graph.is_empty());
        assert_eq!(graph.len(), 0);
        assert!(graph.cycles().is_empty());
    }

    #[test]
    fn declared_order_is_kept() {
        let mut graph = DependencyGraph::new();
        graph.set_dependencies("service", &deps(&["logger", "config", "http"]));

        assert_eq!(graph.dependencies("service"), deps(&["logger", "config", "http"]));
        assert_eq!(graph.dependents("logger"), deps(&["service"]));
        assert!(graph.contains("service"));
        assert!(!graph.contains("logger"));
        assert_eq!(graph.missing(), deps(&["config", "http", "logger"]));
    }

    #[test]
    fn redefinition_replaces_edges() {
        let mut graph = DependencyGraph::new();
        graph.set_dependencies("service", &deps(&["logger"]));
        graph.set_dependencies("service", &deps(&["config"]));

        assert_eq!(graph.dependencies("service"), deps(&["config"]));
        assert!(graph.dependents("logger").is_empty());
        assert_eq!(graph.dependents("config"), deps(&["service"]));
    }

    #[test]
    fn cycle_groups() {
        let mut graph = DependencyGraph::new();
        graph.set_dependencies("x", &deps(&["y"]));
        graph.set_dependencies("y", &deps(&["x"]));
        graph.set_dependencies("z", &deps(&["z"]));
        graph.set_dependencies("leaf", &[]);

        assert_eq!(graph.cycles(), vec![deps(&["x", "y"]), deps(&["z"])]);
        assert!(matches!(
            graph.topological_order(),
            Err(GraphError::CycleDetected(_))
        ));
    }

    #[test]
    fn topological_order() {
        let mut graph = DependencyGraph::new();
        graph.set_dependencies("app", &deps(&["service"]));
        graph.set_dependencies("service", &deps(&["logger"]));
        graph.set_dependencies("logger", &[]);

        let order = graph.topological_order().unwrap();
        let pos = |name: &str| order.iter().position(|n| n == name).unwrap();

        assert!(pos("logger") < pos("service"));
        assert!(pos("service") < pos("app"));
    }

    #[test]
    fn snapshot_lists_registered_modules() {
        let mut graph = DependencyGraph::new();
        graph.set_dependencies("a", &[]);
        graph.set_dependencies("b", &deps(&["a"]));

        let snapshot = graph.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot["b"], deps(&["a"]));

        graph.clear();
        assert!(graph.is_empty());
        assert!(graph.snapshot().is_empty());
    }

    #[test]
    fn dot_output_mentions_nodes() {
        let mut graph = DependencyGraph::new();
        graph.set_dependencies("service", &deps(&["logger"]));

        let dot = graph.to_dot();
        assert!(dot.starts_with("digraph"));
        assert!(dot.contains("service"));
        assert!(dot.contains("logger"));
        assert!(dot.contains("->"));
    }
}
