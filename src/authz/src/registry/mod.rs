//! Role registry
//!
//! Process-wide definition of scopes, the roles defined in each scope, the
//! permission patterns each role grants and the roles each role may assign.
//! Built once at startup from a [`RegistryConfig`], validated as a unit and
//! read-only afterwards, so concurrent readers need no locking.
//!
//! # Example
//!
//! ```
//! use rolegate_authz::registry::RoleRegistry;
//!
//! let registry = RoleRegistry::builder()
//!     .define_scope("organization")
//!         .role("admin").permissions(["*"]).can_assign(["*"])
//!     .define_scope("project").within("organization")
//!         .role("developer").permissions(["project.read", "task.*"])
//!     .build()
//!     .unwrap();
//!
//! let admin = registry.resolve("admin", "organization").unwrap();
//! let developer = registry.resolve("developer", "project").unwrap();
//! assert!(registry.may_assign(admin, developer));
//! ```

mod config;
mod graph;

#[cfg(test)]
mod tests;

pub use config::{RegistryBuilder, RegistryConfig, RoleConfig, ScopeConfig, ASSIGN_ANY};
pub use graph::{GraphError, ScopeGraph};

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::error::{AuthzError, Result};
use crate::permission::PermissionPattern;

/// Which roles a role may assign to others
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assignable {
    /// Nothing
    Nothing,
    /// Any role defined at the granting role's scope or below
    Any,
    /// Named roles at the granting role's scope or below
    Roles(BTreeSet<String>),
}

impl Assignable {
    fn from_entries(entries: &[String]) -> Self {
        if entries.iter().any(|e| e == ASSIGN_ANY) {
            Self::Any
        } else if entries.is_empty() {
            Self::Nothing
        } else {
            Self::Roles(entries.iter().cloned().collect())
        }
    }

    pub fn includes(&self, role: &str) -> bool {
        match self {
            Self::Nothing => false,
            Self::Any => true,
            Self::Roles(roles) => roles.contains(role),
        }
    }
}

/// A validated, frozen role definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleDefinition {
    pub name: String,
    /// Scope the role is defined in
    pub scope: String,
    /// Granted permission patterns in declaration order
    pub permissions: Vec<PermissionPattern>,
    pub can_assign: Assignable,
}

impl RoleDefinition {
    /// Whether any granted pattern covers `permission`
    pub fn grants(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p.matches(permission))
    }
}

#[derive(Debug)]
struct ScopeNode {
    parent: Option<String>,
    children: Vec<String>,
    /// Roles in declaration order
    roles: Vec<Arc<RoleDefinition>>,
    by_name: HashMap<String, usize>,
}

/// Frozen scope/role registry
#[derive(Debug)]
pub struct RoleRegistry {
    scopes: HashMap<String, ScopeNode>,
    /// Scope names ordered parents-first
    order: Vec<String>,
}

impl RoleRegistry {
    /// Starts a fluent definition
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Validates a configuration and freezes it
    ///
    /// Duplicate scope entries are merged (their parents must agree) and
    /// duplicate role entries within a scope have their patterns unioned.
    pub fn from_config(config: RegistryConfig) -> Result<Self> {
        let merged = merge_duplicates(config)?;

        let mut graph = ScopeGraph::new();
        for scope in &merged.scopes {
            if scope.name.is_empty() {
                return Err(AuthzError::InvalidConfig("Scope name cannot be empty".to_string()));
            }
            graph.add_scope(&scope.name, scope.parent.as_deref());
        }
        let order = graph
            .resolve_order()
            .map_err(|e| AuthzError::InvalidConfig(e.to_string()))?;

        let mut scopes: HashMap<String, ScopeNode> = HashMap::new();
        for scope in &merged.scopes {
            let mut roles = Vec::with_capacity(scope.roles.len());
            let mut by_name = HashMap::new();

            for role in &scope.roles {
                if role.name.is_empty() || role.name == ASSIGN_ANY {
                    return Err(AuthzError::InvalidConfig(format!(
                        "Invalid role name '{}' in scope '{}'",
                        role.name, scope.name
                    )));
                }

                let permissions = role
                    .permissions
                    .iter()
                    .map(|p| {
                        PermissionPattern::new(p).map_err(|e| {
                            AuthzError::InvalidConfig(format!(
                                "Role '{}' in scope '{}': {}",
                                role.name, scope.name, e
                            ))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;

                by_name.insert(role.name.clone(), roles.len());
                roles.push(Arc::new(RoleDefinition {
                    name: role.name.clone(),
                    scope: scope.name.clone(),
                    permissions,
                    can_assign: Assignable::from_entries(&role.can_assign),
                }));
            }

            scopes.insert(
                scope.name.clone(),
                ScopeNode {
                    parent: scope.parent.clone(),
                    children: Vec::new(),
                    roles,
                    by_name,
                },
            );
        }

        for name in &order {
            let parent = scopes.get(name).and_then(|node| node.parent.clone());
            if let Some(node) = parent.and_then(|p| scopes.get_mut(&p)) {
                node.children.push(name.clone());
            }
        }

        let registry = Self { scopes, order };
        registry.validate_delegation(&merged)?;

        tracing::info!(
            "Role registry frozen: {} scopes, {} roles",
            registry.order.len(),
            registry.scopes.values().map(|s| s.roles.len()).sum::<usize>()
        );

        Ok(registry)
    }

    /// Every named `can_assign` entry must be a role at the same scope or below
    fn validate_delegation(&self, config: &RegistryConfig) -> Result<()> {
        for scope in &config.scopes {
            for role in &scope.roles {
                for target in role.can_assign.iter().filter(|t| *t != ASSIGN_ANY) {
                    let reachable = self
                        .scope_and_descendants(&scope.name)
                        .iter()
                        .any(|s| self.resolve(target, s).is_some());

                    if !reachable {
                        return Err(AuthzError::InvalidConfig(format!(
                            "Role '{}' in scope '{}' can assign '{}', which is not defined at '{}' or below",
                            role.name, scope.name, target, scope.name
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Looks up a role definition
    pub fn resolve(&self, role: &str, scope: &str) -> Option<&Arc<RoleDefinition>> {
        let node = self.scopes.get(scope)?;
        node.by_name.get(role).map(|idx| &node.roles[*idx])
    }

    /// Looks up a role definition, distinguishing unknown scopes from unknown roles
    pub fn require(&self, role: &str, scope: &str) -> Result<&Arc<RoleDefinition>> {
        let node = self
            .scopes
            .get(scope)
            .ok_or_else(|| AuthzError::UnknownScope(scope.to_string()))?;

        node.by_name
            .get(role)
            .map(|idx| &node.roles[*idx])
            .ok_or_else(|| AuthzError::UnknownRole {
                role: role.to_string(),
                scope: scope.to_string(),
            })
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains_key(scope)
    }

    /// Scope names ordered parents-first
    pub fn scopes(&self) -> &[String] {
        &self.order
    }

    /// Roles defined in a scope, in declaration order
    pub fn roles_in(&self, scope: &str) -> &[Arc<RoleDefinition>] {
        self.scopes
            .get(scope)
            .map(|node| node.roles.as_slice())
            .unwrap_or(&[])
    }

    pub fn parent_of(&self, scope: &str) -> Option<&str> {
        self.scopes.get(scope)?.parent.as_deref()
    }

    pub fn children_of(&self, scope: &str) -> &[String] {
        self.scopes
            .get(scope)
            .map(|node| node.children.as_slice())
            .unwrap_or(&[])
    }

    /// Whether `scope` is strictly nested below `ancestor`
    pub fn is_descendant(&self, scope: &str, ancestor: &str) -> bool {
        let mut current = self.parent_of(scope);
        while let Some(parent) = current {
            if parent == ancestor {
                return true;
            }
            current = self.parent_of(parent);
        }
        false
    }

    /// Whether `scope` equals `ancestor` or is nested below it
    pub fn is_within(&self, scope: &str, ancestor: &str) -> bool {
        scope == ancestor || self.is_descendant(scope, ancestor)
    }

    /// `scope` followed by every scope nested below it, parents-first
    pub fn scope_and_descendants(&self, scope: &str) -> Vec<String> {
        self.order
            .iter()
            .filter(|s| self.is_within(s, scope))
            .cloned()
            .collect()
    }

    /// Whether holding `granting` allows assigning `target` to others
    ///
    /// The target role must live at the granting role's scope or below;
    /// assigning upward is never allowed.
    pub fn may_assign(&self, granting: &RoleDefinition, target: &RoleDefinition) -> bool {
        self.is_within(&target.scope, &granting.scope) && granting.can_assign.includes(&target.name)
    }
}

fn merge_duplicates(config: RegistryConfig) -> Result<RegistryConfig> {
    let mut merged: Vec<ScopeConfig> = Vec::with_capacity(config.scopes.len());

    for scope in config.scopes {
        match merged.iter_mut().find(|s| s.name == scope.name) {
            Some(existing) => {
                if let (Some(a), Some(b)) = (&existing.parent, &scope.parent) {
                    if a != b {
                        return Err(AuthzError::InvalidConfig(format!(
                            "Scope '{}' declared under both '{}' and '{}'",
                            scope.name, a, b
                        )));
                    }
                }
                if existing.parent.is_none() {
                    existing.parent = scope.parent.clone();
                }
                merge_roles(&mut existing.roles, scope.roles);
            }
            None => {
                let mut fresh = ScopeConfig {
                    name: scope.name,
                    parent: scope.parent,
                    roles: Vec::new(),
                };
                merge_roles(&mut fresh.roles, scope.roles);
                merged.push(fresh);
            }
        }
    }

    Ok(RegistryConfig { scopes: merged })
}

fn merge_roles(target: &mut Vec<RoleConfig>, roles: Vec<RoleConfig>) {
    for role in roles {
        match target.iter_mut().find(|r| r.name == role.name) {
            Some(existing) => {
                config::extend_unique(&mut existing.permissions, role.permissions);
                config::extend_unique(&mut existing.can_assign, role.can_assign);
            }
            None => {
                let mut fresh = RoleConfig::new(role.name);
                config::extend_unique(&mut fresh.permissions, role.permissions);
                config::extend_unique(&mut fresh.can_assign, role.can_assign);
                target.push(fresh);
            }
        }
    }
}
