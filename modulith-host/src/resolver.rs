//! Dependency resolution and load ordering.
//!
//! The resolver turns the declared dependency edges into a deterministic
//! total load order: a depth-first topological sort with three colour marks,
//! visiting roots and neighbours in lexicographic name order so incomparable
//! extensions always come out in the same sequence. Cycles and edges to
//! unknown extensions are registration-time fatal errors, never warnings.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::host_error::HostError;

/// One node of the dependency graph.
#[derive(Debug, Clone)]
pub struct DependencyNode {
    pub name: String,
    pub version: String,
    pub dependencies: Vec<String>,
}

impl DependencyNode {
    pub fn new(name: impl Into<String>, version: impl Into<String>, deps: &[&str]) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
        }
    }
}

/// A version window an extension demands of one of its dependencies.
///
/// Versions are opaque strings compared lexicographically; the bounds are
/// inclusive.
#[derive(Debug, Clone)]
pub struct VersionConstraint {
    pub extension: String,
    pub min: Option<String>,
    pub max: Option<String>,
}

impl VersionConstraint {
    pub fn satisfied_by(&self, version: &str) -> bool {
        if let Some(min) = &self.min {
            if version < min.as_str() {
                return false;
            }
        }
        if let Some(max) = &self.max {
            if version > max.as_str() {
                return false;
            }
        }
        true
    }
}

/// DFS colour marks.
#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Dependency resolver over a set of `(name, version, dependencies)` triples.
#[derive(Debug, Default)]
pub struct DependencyResolver {
    nodes: BTreeMap<String, DependencyNode>,
}

impl DependencyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_nodes(nodes: impl IntoIterator<Item = DependencyNode>) -> Self {
        let mut resolver = Self::new();
        for node in nodes {
            resolver.add(node);
        }
        resolver
    }

    pub fn add(&mut self, node: DependencyNode) {
        self.nodes.insert(node.name.clone(), node);
    }

    pub fn remove(&mut self, name: &str) {
        self.nodes.remove(name);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Check that every declared edge points at a registered extension.
    pub fn validate(&self) -> Result<(), HostError> {
        for node in self.nodes.values() {
            for dep in &node.dependencies {
                if !self.nodes.contains_key(dep) {
                    return Err(HostError::MissingDependency {
                        from: node.name.clone(),
                        to: dep.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Produce a total order in which no extension appears before any of its
    /// transitive dependencies. Ties between incomparable nodes break by
    /// lexicographic name order.
    pub fn resolve(&self) -> Result<Vec<String>, HostError> {
        self.validate()?;

        let mut marks: HashMap<&str, Mark> =
            self.nodes.keys().map(|n| (n.as_str(), Mark::Unvisited)).collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        // BTreeMap iteration gives the lexicographic root order; visit()
        // sorts neighbour lists the same way.
        for name in self.nodes.keys() {
            if marks[name.as_str()] == Mark::Unvisited {
                self.visit(name, &mut marks, &mut order)?;
            }
        }
        Ok(order)
    }

    fn visit<'a>(
        &'a self,
        name: &'a str,
        marks: &mut HashMap<&'a str, Mark>,
        order: &mut Vec<String>,
    ) -> Result<(), HostError> {
        match marks[name] {
            Mark::Done => return Ok(()),
            // An in-progress node on the stack closed a cycle.
            Mark::InProgress => return Err(HostError::CycleDetected(name.to_string())),
            Mark::Unvisited => {}
        }
        marks.insert(name, Mark::InProgress);

        let node = &self.nodes[name];
        let mut deps: Vec<&str> = node.dependencies.iter().map(String::as_str).collect();
        deps.sort_unstable();
        deps.dedup();
        for dep in deps {
            self.visit(dep, marks, order)?;
        }

        marks.insert(name, Mark::Done);
        order.push(name.to_string());
        Ok(())
    }

    /// Whether `name` may be disabled while the extensions in
    /// `currently_enabled` stay up: false iff any of them (other than `name`
    /// itself) declares a dependency on `name`.
    pub fn can_disable(&self, name: &str, currently_enabled: &HashSet<String>) -> bool {
        !self.nodes.values().any(|node| {
            node.name != name
                && currently_enabled.contains(&node.name)
                && node.dependencies.iter().any(|d| d == name)
        })
    }

    /// The enabled extensions that block a disable of `name`.
    pub fn dependents_of(&self, name: &str, currently_enabled: &HashSet<String>) -> Vec<String> {
        let mut dependents: Vec<String> = self
            .nodes
            .values()
            .filter(|node| {
                node.name != name
                    && currently_enabled.contains(&node.name)
                    && node.dependencies.iter().any(|d| d == name)
            })
            .map(|node| node.name.clone())
            .collect();
        dependents.sort_unstable();
        dependents
    }

    /// Check a set of version constraints against the registered versions.
    pub fn check_constraints(&self, constraints: &[VersionConstraint]) -> Result<(), HostError> {
        for constraint in constraints {
            let Some(node) = self.nodes.get(&constraint.extension) else {
                return Err(HostError::NotFound(constraint.extension.clone()));
            };
            if !constraint.satisfied_by(&node.version) {
                return Err(HostError::Incompatible {
                    name: constraint.extension.clone(),
                    host_version: node.version.clone(),
                });
            }
        }
        Ok(())
    }
}
