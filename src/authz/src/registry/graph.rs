//! Scope tree ordering with Kahn's algorithm
//!
//! Scopes may be declared in any order. Before freezing, the parent links are
//! sorted so every scope comes after its parent, and cycles are rejected.

use std::collections::{HashMap, VecDeque};

use thiserror::Error;

/// Scope tree errors
#[derive(Debug, Error, PartialEq)]
pub enum GraphError {
    /// Parent links form a loop
    #[error("Circular scope nesting: {0}")]
    CircularNesting(String),

    /// Parent scope was never defined
    #[error("Scope '{scope}' is nested under unknown scope '{parent}'")]
    UnknownParent { scope: String, parent: String },
}

/// Parent links between scope names
#[derive(Debug, Default)]
pub struct ScopeGraph {
    /// Scope name -> parent name, in declaration order
    links: Vec<(String, Option<String>)>,
}

impl ScopeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_scope(&mut self, name: &str, parent: Option<&str>) {
        self.links
            .push((name.to_string(), parent.map(|p| p.to_string())));
    }

    /// Returns scope names ordered parents-first
    ///
    /// Roots keep their declaration order, children follow in declaration order.
    pub fn resolve_order(&self) -> Result<Vec<String>, GraphError> {
        let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
        let mut in_degree: HashMap<&str, usize> = HashMap::new();

        for (name, _) in &self.links {
            in_degree.insert(name.as_str(), 0);
            children.entry(name.as_str()).or_default();
        }

        for (name, parent) in &self.links {
            if let Some(parent) = parent {
                let Some(siblings) = children.get_mut(parent.as_str()) else {
                    return Err(GraphError::UnknownParent {
                        scope: name.clone(),
                        parent: parent.clone(),
                    });
                };
                siblings.push(name.as_str());
                if let Some(degree) = in_degree.get_mut(name.as_str()) {
                    *degree += 1;
                }
            }
        }

        let mut queue: VecDeque<&str> = self
            .links
            .iter()
            .map(|(name, _)| name.as_str())
            .filter(|name| in_degree.get(name) == Some(&0))
            .collect();

        let mut sorted = Vec::with_capacity(self.links.len());
        while let Some(current) = queue.pop_front() {
            sorted.push(current.to_string());
            if let Some(nested) = children.get(current) {
                for child in nested {
                    if let Some(degree) = in_degree.get_mut(child) {
                        *degree -= 1;
                        if *degree == 0 {
                            queue.push_back(*child);
                        }
                    }
                }
            }
        }

        if sorted.len() != self.links.len() {
            let stuck: Vec<&str> = self
                .links
                .iter()
                .map(|(name, _)| name.as_str())
                .filter(|name| !sorted.iter().any(|s| s.as_str() == *name))
                .collect();
            return Err(GraphError::CircularNesting(stuck.join(" -> ")));
        }

        Ok(sorted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parents_come_first() {
        let mut graph = ScopeGraph::new();
        graph.add_scope("team", Some("project"));
        graph.add_scope("project", Some("organization"));
        graph.add_scope("organization", None);

        let order = graph.resolve_order().unwrap();
        assert_eq!(order, vec!["organization", "project", "team"]);
    }

    #[test]
    fn test_multiple_roots_keep_declaration_order() {
        let mut graph = ScopeGraph::new();
        graph.add_scope("billing", None);
        graph.add_scope("organization", None);
        graph.add_scope("project", Some("organization"));

        let order = graph.resolve_order().unwrap();
        assert_eq!(order, vec!["billing", "organization", "project"]);
    }

    #[test]
    fn test_unknown_parent() {
        let mut graph = ScopeGraph::new();
        graph.add_scope("project", Some("organization"));

        assert_eq!(
            graph.resolve_order(),
            Err(GraphError::UnknownParent {
                scope: "project".to_string(),
                parent: "organization".to_string(),
            })
        );
    }

    #[test]
    fn test_cycle_detection() {
        let mut graph = ScopeGraph::new();
        graph.add_scope("a", Some("b"));
        graph.add_scope("b", Some("a"));
        graph.add_scope("root", None);

        let result = graph.resolve_order();
        assert!(matches!(result, Err(GraphError::CircularNesting(_))));
    }
}
