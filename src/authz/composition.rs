//! Permission composition — compound permissions whose effective set is the
//! transitive union of their children.
//!
//! Compositions form a DAG per (tenant, app). `has_circular_dependency`
//! runs before every insert; the expansion walk still tracks visited nodes
//! so a cycle that slipped past the check (it cannot, post-check) would
//! terminate rather than recurse forever.

use dashmap::DashMap;

use crate::error::{Error, Result};

/// The composition edges for all scopes.
pub struct CompositionGraph {
    /// `{tenant}:{app}:{parent}` → child permission names.
    edges: DashMap<String, Vec<String>>,
}

impl CompositionGraph {
    /// Empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self { edges: DashMap::new() }
    }

    fn key(tenant_id: &str, app_id: &str, permission: &str) -> String {
        format!("{tenant_id}:{app_id}:{permission}")
    }

    /// Whether adding `parent → child` would create a cycle: `true` when
    /// `parent` is reachable from `child`.
    #[must_use]
    pub fn has_circular_dependency(
        &self,
        tenant_id: &str,
        app_id: &str,
        parent: &str,
        child: &str,
    ) -> bool {
        if parent == child {
            return true;
        }
        let mut stack = vec![child.to_string()];
        let mut visited = std::collections::HashSet::new();
        while let Some(current) = stack.pop() {
            if current == parent {
                return true;
            }
            if !visited.insert(current.clone()) {
                continue;
            }
            if let Some(children) = self.edges.get(&Self::key(tenant_id, app_id, &current)) {
                stack.extend(children.iter().cloned());
            }
        }
        false
    }

    /// Add a composition edge. Fails with `CircularComposition` when the
    /// edge would close a cycle. Set semantics on the child list.
    pub fn add(&self, tenant_id: &str, app_id: &str, parent: &str, child: &str) -> Result<()> {
        if self.has_circular_dependency(tenant_id, app_id, parent, child) {
            return Err(Error::CircularComposition(format!("{parent} -> {child}")));
        }
        let mut children = self.edges.entry(Self::key(tenant_id, app_id, parent)).or_default();
        if !children.iter().any(|c| c == child) {
            children.push(child.to_string());
        }
        Ok(())
    }

    /// Remove a composition edge.
    pub fn remove(&self, tenant_id: &str, app_id: &str, parent: &str, child: &str) {
        if let Some(mut children) = self.edges.get_mut(&Self::key(tenant_id, app_id, parent)) {
            children.retain(|c| c != child);
        }
    }

    /// The direct children of a permission, as a copy.
    #[must_use]
    pub fn children(&self, tenant_id: &str, app_id: &str, parent: &str) -> Vec<String> {
        self.edges
            .get(&Self::key(tenant_id, app_id, parent))
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    /// The effective permission set of `root`: itself plus every
    /// transitively-composed child, de-duplicated via a visited set.
    #[must_use]
    pub fn effective_permissions(&self, tenant_id: &str, app_id: &str, root: &str) -> Vec<String> {
        let mut visited = std::collections::HashSet::new();
        let mut result = Vec::new();
        let mut stack = vec![root.to_string()];

        while let Some(current) = stack.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }
            result.push(current.clone());
            if let Some(children) = self.edges.get(&Self::key(tenant_id, app_id, &current)) {
                stack.extend(children.iter().cloned());
            }
        }
        result
    }
}

impl Default for CompositionGraph {
    fn default() -> Self {
        Self::new()
    }
}
