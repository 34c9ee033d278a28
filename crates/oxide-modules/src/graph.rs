//! Module dependency graph.
//!
//! Built once at boot. Modules whose dependencies are missing, disabled or
//! cyclic are disabled, repeatedly, until a full scan disables nothing. So
//! are normal modules depending on a last-phase module. Other cross-phase
//! edges order boot only: per request, a phase waits on its own members. The surviving edges form the notify lists: a module
//! notifies the modules that depend on it.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;
use tracing::warn;

use crate::module::Phase;

/// The graph-relevant part of a module descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphNode {
    /// Module name.
    pub name: String,
    /// Whether the module is enabled.
    pub enabled: bool,
    /// Declared dependencies.
    pub depends: Vec<String>,
    /// Execution phase.
    pub phase: Phase,
}

/// Why a module was disabled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokenDependency {
    /// The dependency does not exist.
    #[error("module `{module}` depends on `{dependency}`, which does not exist")]
    Missing { module: String, dependency: String },

    /// The dependency is disabled.
    #[error("module `{module}` depends on `{dependency}`, which is disabled")]
    Disabled { module: String, dependency: String },

    /// A normal module depends on a last-phase module, which only routes
    /// after every normal module finished.
    #[error("module `{module}` depends on `{dependency}`, which runs in the last phase")]
    PhaseInversion { module: String, dependency: String },

    /// The module is on, or depends on, a dependency cycle.
    #[error("module `{module}` is part of or depends on a dependency cycle")]
    Cycle { module: String },
}

impl BrokenDependency {
    /// Returns the disabled module.
    pub fn module(&self) -> &str {
        match self {
            Self::Missing { module, .. }
            | Self::Disabled { module, .. }
            | Self::PhaseInversion { module, .. }
            | Self::Cycle { module } => module,
        }
    }
}

/// Validated dependency graph.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: BTreeMap<String, GraphNode>,
    notify: BTreeMap<String, Vec<String>>,
    order: Vec<String>,
    diagnostics: Vec<BrokenDependency>,
    passes: usize,
}

impl DependencyGraph {
    /// Builds and validates the graph.
    ///
    /// A later node with the same name replaces an earlier one.
    pub fn build(nodes: impl IntoIterator<Item = GraphNode>) -> Self {
        let mut graph = Self {
            nodes: nodes.into_iter().map(|n| (n.name.clone(), n)).collect(),
            ..Self::default()
        };
        graph.disable_broken();
        graph.disable_cycles();
        graph.wire_notify();
        graph
    }

    fn disable_broken(&mut self) {
        loop {
            self.passes += 1;
            let names: Vec<String> = self.nodes.keys().cloned().collect();
            let mut disabled = 0;
            for name in &names {
                if let Some(broken) = self.broken_dependency(name) {
                    self.disable(broken);
                    disabled += 1;
                }
            }
            if disabled == 0 || self.nodes.values().all(|n| !n.enabled) {
                break;
            }
        }
    }

    fn broken_dependency(&self, name: &str) -> Option<BrokenDependency> {
        let node = self.nodes.get(name).filter(|n| n.enabled)?;
        node.depends
            .iter()
            .find_map(|dep| match self.nodes.get(dep) {
                None => Some(BrokenDependency::Missing {
                    module: name.to_string(),
                    dependency: dep.clone(),
                }),
                Some(d) if !d.enabled => Some(BrokenDependency::Disabled {
                    module: name.to_string(),
                    dependency: dep.clone(),
                }),
                Some(d) if node.phase == Phase::Normal && d.phase == Phase::Last => {
                    Some(BrokenDependency::PhaseInversion {
                        module: name.to_string(),
                        dependency: dep.clone(),
                    })
                }
                Some(_) => None,
            })
    }

    fn disable(&mut self, broken: BrokenDependency) {
        warn!(module = broken.module(), reason = %broken, "disabling module");
        if let Some(node) = self.nodes.get_mut(broken.module()) {
            node.enabled = false;
        }
        self.diagnostics.push(broken);
    }

    /// Kahn's algorithm over the enabled modules. Whatever cannot be
    /// ordered sits on or behind a cycle.
    fn disable_cycles(&mut self) {
        let mut waiting: BTreeMap<&str, usize> = BTreeMap::new();
        let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for node in self.nodes.values().filter(|n| n.enabled) {
            let deps: BTreeSet<&str> = node.depends.iter().map(String::as_str).collect();
            waiting.insert(&node.name, deps.len());
            for dep in deps {
                dependents.entry(dep).or_default().push(&node.name);
            }
        }

        let mut ready: BTreeSet<&str> = waiting
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(name, _)| *name)
            .collect();
        let mut order = Vec::new();
        while let Some(name) = ready.pop_first() {
            order.push(name.to_string());
            for dependent in dependents.get(name).into_iter().flatten() {
                if let Some(n) = waiting.get_mut(dependent) {
                    *n -= 1;
                    if *n == 0 {
                        ready.insert(*dependent);
                    }
                }
            }
        }

        let ordered: BTreeSet<&str> = order.iter().map(String::as_str).collect();
        let cyclic: Vec<String> = waiting
            .keys()
            .filter(|name| !ordered.contains(*name))
            .map(|name| (*name).to_string())
            .collect();
        self.order = order;
        for module in cyclic {
            self.disable(BrokenDependency::Cycle { module });
        }
    }

    fn wire_notify(&mut self) {
        for node in self.nodes.values().filter(|n| n.enabled) {
            for dep in &node.depends {
                let list = self.notify.entry(dep.clone()).or_default();
                if !list.contains(&node.name) {
                    list.push(node.name.clone());
                }
            }
        }
    }

    /// Returns whether `module` exists and survived validation.
    pub fn is_enabled(&self, module: &str) -> bool {
        self.nodes.get(module).is_some_and(|n| n.enabled)
    }

    /// Returns the enabled modules by name.
    pub fn enabled(&self) -> impl Iterator<Item = &str> {
        self.nodes
            .values()
            .filter(|n| n.enabled)
            .map(|n| n.name.as_str())
    }

    /// Returns the enabled modules of `phase` by name.
    pub fn enabled_in(&self, phase: Phase) -> impl Iterator<Item = &str> {
        self.nodes
            .values()
            .filter(move |n| n.enabled && n.phase == phase)
            .map(|n| n.name.as_str())
    }

    /// Returns the disabled modules by name.
    pub fn disabled(&self) -> impl Iterator<Item = &str> {
        self.nodes
            .values()
            .filter(|n| !n.enabled)
            .map(|n| n.name.as_str())
    }

    /// Returns the declared dependencies of `module`.
    pub fn dependencies(&self, module: &str) -> &[String] {
        self.nodes
            .get(module)
            .map(|n| n.depends.as_slice())
            .unwrap_or_default()
    }

    /// Returns the enabled modules depending on `module`.
    pub fn dependents(&self, module: &str) -> &[String] {
        self.notify
            .get(module)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Returns the phase of `module`.
    pub fn phase(&self, module: &str) -> Option<Phase> {
        self.nodes.get(module).map(|n| n.phase)
    }

    /// Returns the enabled modules in a dependency-respecting order.
    pub fn boot_order(&self) -> &[String] {
        &self.order
    }

    /// Returns why modules were disabled, in the order it happened.
    pub fn diagnostics(&self) -> &[BrokenDependency] {
        &self.diagnostics
    }

    /// Returns how many full scans the broken-dependency pass needed.
    pub fn passes(&self) -> usize {
        self.passes
    }

    /// Returns the number of modules, enabled or not.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns whether the graph has no modules.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, depends: &[&str]) -> GraphNode {
        GraphNode {
            name: name.to_string(),
            enabled: true,
            depends: depends.iter().map(|d| (*d).to_string()).collect(),
            phase: Phase::Normal,
        }
    }

    #[test]
    fn test_notify_lists() {
        let graph = DependencyGraph::build([
            node("content", &[]),
            node("search", &["content"]),
            node("feeds", &["content"]),
        ]);
        assert_eq!(graph.dependents("content"), ["feeds", "search"]);
        assert!(graph.dependents("search").is_empty());
        assert!(graph.diagnostics().is_empty());
        assert_eq!(graph.passes(), 1);
    }

    #[test]
    fn test_missing_dependency_disables() {
        let graph = DependencyGraph::build([node("search", &["content"])]);
        assert!(!graph.is_enabled("search"));
        assert_eq!(
            graph.diagnostics(),
            [BrokenDependency::Missing {
                module: "search".into(),
                dependency: "content".into()
            }]
        );
    }

    #[test]
    fn test_cascading_disable() {
        let mut c = node("c", &[]);
        c.enabled = false;
        let graph = DependencyGraph::build([node("a", &["b"]), node("b", &["c"]), c]);
        assert!(!graph.is_enabled("a"));
        assert!(!graph.is_enabled("b"));
        assert!(graph.passes() <= graph.len());
        assert_eq!(graph.enabled().count(), 0);
        assert!(graph.dependents("c").is_empty());
    }

    #[test]
    fn test_cascade_stops_at_fixed_point() {
        let graph = DependencyGraph::build([
            node("a", &["b"]),
            node("b", &["gone"]),
            node("x", &[]),
            node("y", &["x"]),
        ]);
        assert_eq!(graph.disabled().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(graph.enabled().collect::<Vec<_>>(), vec!["x", "y"]);
        assert!(graph.passes() <= graph.len());
    }

    #[test]
    fn test_phase_inversion() {
        let mut stats = node("stats", &[]);
        stats.phase = Phase::Last;
        let graph = DependencyGraph::build([stats, node("content", &["stats"])]);
        assert!(!graph.is_enabled("content"));
        assert!(matches!(
            graph.diagnostics()[0],
            BrokenDependency::PhaseInversion { .. }
        ));
    }

    #[test]
    fn test_later_phase_may_depend_on_earlier() {
        let mut user = node("user", &[]);
        user.phase = Phase::First;
        let graph = DependencyGraph::build([user, node("content", &["user"])]);
        assert!(graph.is_enabled("content"));
        assert_eq!(graph.dependents("user"), ["content"]);
    }

    #[test]
    fn test_first_and_last_keep_cross_phase_edges() {
        let mut session = node("session", &["content"]);
        session.phase = Phase::First;
        let mut stats = node("stats", &["content", "session"]);
        stats.phase = Phase::Last;
        let graph = DependencyGraph::build([session, node("content", &[]), stats]);
        assert!(graph.is_enabled("session"));
        assert!(graph.is_enabled("stats"));
        assert!(graph.diagnostics().is_empty());
        assert_eq!(graph.boot_order(), ["content", "session", "stats"]);
        assert_eq!(graph.dependents("content"), ["session", "stats"]);
    }

    #[test]
    fn test_cycles_are_disabled() {
        let graph = DependencyGraph::build([
            node("a", &["b"]),
            node("b", &["a"]),
            node("c", &["a"]),
            node("d", &[]),
        ]);
        assert_eq!(graph.enabled().collect::<Vec<_>>(), vec!["d"]);
        assert_eq!(graph.diagnostics().len(), 3);
        assert!(graph
            .diagnostics()
            .iter()
            .all(|d| matches!(d, BrokenDependency::Cycle { .. })));
    }

    #[test]
    fn test_boot_order_respects_dependencies() {
        let graph = DependencyGraph::build([
            node("search", &["content", "taxonomy"]),
            node("taxonomy", &["content"]),
            node("content", &[]),
        ]);
        assert_eq!(graph.boot_order(), ["content", "taxonomy", "search"]);
    }
}
