//! Dependency graph over the artifact store.
//!
//! Nodes are artifact names, edges are "A depends on B". The graph is
//! derived state: it is rebuilt from the current store whenever
//! dependency-aware grouping is needed, and never persisted (checkpoints
//! carry a [`DependencySnapshot`] instead).
//!
//! Two rules shape the graph:
//!
//! - **Upload redirection**: when both `X` and `XUpload` exist, edges into
//!   `X` are rewritten to `XUpload`, `XUpload` inherits `X`'s dependencies,
//!   and `X` is dropped from the independently-tested node set. The
//!   ingestion path is what gets tested when both exist.
//! - **Deterministic ordering**: strongly-connected components are emitted
//!   in a topological order of the condensation, with ties broken by
//!   first-registration order. Hash-map iteration order never leaks into
//!   the result.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::artifact::upload_counterpart;
use crate::store::ArtifactStore;

/// Serializable image of the graph state at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencySnapshot {
    /// Full adjacency (internal and unresolved names alike), keyed by node.
    pub dependencies: BTreeMap<String, Vec<String>>,
}

/// Directed graph of artifact dependencies.
#[derive(Debug)]
pub struct DependencyGraph {
    /// Node names in first-registration order (after upload redirection).
    nodes: Vec<String>,
    index: HashMap<String, usize>,
    /// Internal dependency edges, neighbor order = declaration order.
    adj: Vec<Vec<usize>>,
    /// Unresolved dependency names per node (framework base classes etc.).
    external: Vec<Vec<String>>,
}

impl DependencyGraph {
    /// Build the graph from the current store state.
    ///
    /// A dependency referencing an unknown artifact is retained as an
    /// external placeholder; it is not an error.
    #[must_use]
    pub fn build(store: &ArtifactStore) -> Self {
        // Entities shadowed by an upload counterpart are tested only as part
        // of testing that counterpart.
        let shadowed: HashSet<String> = store
            .names()
            .filter(|name| store.contains(&upload_counterpart(name)))
            .map(str::to_string)
            .collect();

        let nodes: Vec<String> = store
            .names()
            .filter(|name| !shadowed.contains(*name))
            .map(str::to_string)
            .collect();
        let index: HashMap<String, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), i))
            .collect();

        let mut adj = vec![Vec::new(); nodes.len()];
        let mut external = vec![Vec::new(); nodes.len()];

        for (i, name) in nodes.iter().enumerate() {
            let mut declared: Vec<String> = Vec::new();
            if let Ok(artifact) = store.get(name) {
                declared.extend(artifact.declared_dependencies.iter().cloned());
            }
            // An upload node inherits its shadowed entity's dependencies.
            if let Some(base) = crate::artifact::base_of_upload(name) {
                if shadowed.contains(base) {
                    if let Ok(base_artifact) = store.get(base) {
                        declared.extend(base_artifact.declared_dependencies.iter().cloned());
                    }
                }
            }

            let mut seen = HashSet::new();
            for dep in declared {
                // Redirect edges aimed at a shadowed entity to its upload.
                let target = if shadowed.contains(&dep) {
                    upload_counterpart(&dep)
                } else {
                    dep
                };
                if target == *name || !seen.insert(target.clone()) {
                    continue;
                }
                match index.get(&target) {
                    Some(&j) => adj[i].push(j),
                    None => external[i].push(target),
                }
            }
        }

        debug!(
            nodes = nodes.len(),
            shadowed = shadowed.len(),
            "Dependency graph built"
        );

        Self {
            nodes,
            index,
            adj,
            external,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Node names in first-registration order.
    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(String::as_str)
    }

    /// Direct dependencies of a node (internal names only).
    #[must_use]
    pub fn dependencies_of(&self, name: &str) -> Vec<&str> {
        match self.index.get(name) {
            Some(&i) => self.adj[i].iter().map(|&j| self.nodes[j].as_str()).collect(),
            None => Vec::new(),
        }
    }

    /// Nodes that directly depend on `name`.
    #[must_use]
    pub fn dependents_of(&self, name: &str) -> Vec<&str> {
        let Some(&target) = self.index.get(name) else {
            return Vec::new();
        };
        self.nodes
            .iter()
            .enumerate()
            .filter(|(i, _)| self.adj[*i].contains(&target))
            .map(|(_, n)| n.as_str())
            .collect()
    }

    /// Unresolved dependency names of a node.
    #[must_use]
    pub fn externals_of(&self, name: &str) -> &[String] {
        match self.index.get(name) {
            Some(&i) => &self.external[i],
            None => &[],
        }
    }

    /// Strongly-connected components in processing order.
    ///
    /// Every node appears in exactly one component. Components follow a
    /// topological order of the condensation (dependencies before
    /// dependents); components with no relative order keep
    /// first-registration order.
    #[must_use]
    pub fn strongly_connected_components(&self) -> Vec<Vec<String>> {
        let comp_of = self.tarjan();
        let comp_count = comp_of.iter().copied().max().map_or(0, |m| m + 1);

        // Members per component, in registration order.
        let mut members: Vec<Vec<usize>> = vec![Vec::new(); comp_count];
        for (node, &comp) in comp_of.iter().enumerate() {
            members[comp].push(node);
        }

        // Condensation: which components each component depends on.
        let mut comp_deps: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); comp_count];
        for (v, targets) in self.adj.iter().enumerate() {
            for &w in targets {
                if comp_of[v] != comp_of[w] {
                    comp_deps[comp_of[v]].insert(comp_of[w]);
                }
            }
        }

        // Kahn over the condensation. Among ready components, pick the one
        // whose earliest-registered member is earliest; this keeps the order
        // reproducible across runs.
        let mut emitted = vec![false; comp_count];
        let mut order = Vec::with_capacity(comp_count);
        while order.len() < comp_count {
            let next = (0..comp_count)
                .filter(|&c| !emitted[c])
                .filter(|&c| comp_deps[c].iter().all(|&d| emitted[d]))
                .min_by_key(|&c| members[c][0]);
            let Some(c) = next else {
                // Unreachable: the condensation of an SCC partition is acyclic.
                break;
            };
            emitted[c] = true;
            order.push(c);
        }

        order
            .into_iter()
            .map(|c| {
                members[c]
                    .iter()
                    .map(|&n| self.nodes[n].clone())
                    .collect()
            })
            .collect()
    }

    /// Dependencies of a member set that fall outside the set, internal and
    /// unresolved alike.
    #[must_use]
    pub fn external_dependencies_of_group(&self, members: &[String]) -> BTreeSet<String> {
        let member_set: HashSet<&str> = members.iter().map(String::as_str).collect();
        let mut out = BTreeSet::new();
        for member in members {
            for dep in self.dependencies_of(member) {
                if !member_set.contains(dep) {
                    out.insert(dep.to_string());
                }
            }
            for dep in self.externals_of(member) {
                out.insert(dep.clone());
            }
        }
        out
    }

    /// Transitive closure of internal dependencies, excluding the start set.
    ///
    /// Iterative BFS with a visited set; cycle-safe by construction.
    #[must_use]
    pub fn transitive_dependencies(&self, start: &[String]) -> BTreeSet<String> {
        let mut visited: HashSet<usize> = start
            .iter()
            .filter_map(|n| self.index.get(n).copied())
            .collect();
        let mut queue: Vec<usize> = visited.iter().copied().collect();
        let mut closure = BTreeSet::new();

        while let Some(v) = queue.pop() {
            for &w in &self.adj[v] {
                if visited.insert(w) {
                    closure.insert(self.nodes[w].clone());
                    queue.push(w);
                }
            }
        }
        // Nodes in the start set reached through a cycle are not part of
        // their own closure.
        for name in start {
            closure.remove(name);
        }
        closure
    }

    /// Serializable image of the current graph state.
    #[must_use]
    pub fn snapshot(&self) -> DependencySnapshot {
        let mut dependencies = BTreeMap::new();
        for (i, name) in self.nodes.iter().enumerate() {
            let mut deps: Vec<String> = self.adj[i]
                .iter()
                .map(|&j| self.nodes[j].clone())
                .collect();
            deps.extend(self.external[i].iter().cloned());
            dependencies.insert(name.clone(), deps);
        }
        DependencySnapshot { dependencies }
    }

    /// Iterative Tarjan; returns the component id of each node.
    fn tarjan(&self) -> Vec<usize> {
        const UNVISITED: usize = usize::MAX;

        let n = self.nodes.len();
        let mut index = vec![UNVISITED; n];
        let mut lowlink = vec![0usize; n];
        let mut on_stack = vec![false; n];
        let mut stack: Vec<usize> = Vec::new();
        let mut comp_of = vec![0usize; n];
        let mut next_index = 0usize;
        let mut comp_count = 0usize;

        for root in 0..n {
            if index[root] != UNVISITED {
                continue;
            }
            // Explicit DFS frames: (node, next neighbor position).
            let mut frames: Vec<(usize, usize)> = vec![(root, 0)];
            while let Some(&(v, pos)) = frames.last() {
                if pos == 0 {
                    index[v] = next_index;
                    lowlink[v] = next_index;
                    next_index += 1;
                    stack.push(v);
                    on_stack[v] = true;
                }

                if pos < self.adj[v].len() {
                    if let Some(frame) = frames.last_mut() {
                        frame.1 = pos + 1;
                    }
                    let w = self.adj[v][pos];
                    if index[w] == UNVISITED {
                        frames.push((w, 0));
                    } else if on_stack[w] {
                        lowlink[v] = lowlink[v].min(index[w]);
                    }
                } else {
                    frames.pop();
                    if let Some(&(parent, _)) = frames.last() {
                        lowlink[parent] = lowlink[parent].min(lowlink[v]);
                    }
                    if lowlink[v] == index[v] {
                        while let Some(w) = stack.pop() {
                            on_stack[w] = false;
                            comp_of[w] = comp_count;
                            if w == v {
                                break;
                            }
                        }
                        comp_count += 1;
                    }
                }
            }
        }

        comp_of
    }
}
