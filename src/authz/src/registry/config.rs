//! Registry configuration structure and fluent builder
//!
//! The scope/role tree is described by a plain [`RegistryConfig`] (ordered
//! scopes, each with ordered roles). It can be deserialized from JSON or
//! assembled with [`RegistryBuilder`], then validated and frozen into a
//! [`RoleRegistry`](super::RoleRegistry) in one step.

use serde::{Deserialize, Serialize};

use super::RoleRegistry;
use crate::error::{AuthzError, Result};

/// Wildcard entry for `can_assign`: any role at the granting role's scope or below
pub const ASSIGN_ANY: &str = "*";

/// Complete scope/role tree definition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Scope definitions in declaration order
    #[serde(default)]
    pub scopes: Vec<ScopeConfig>,
}

/// One scope level and the roles defined in it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeConfig {
    pub name: String,

    /// Enclosing scope; `None` for root scopes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,

    #[serde(default)]
    pub roles: Vec<RoleConfig>,
}

/// Role definition within a scope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleConfig {
    pub name: String,

    /// Granted permission patterns
    #[serde(default)]
    pub permissions: Vec<String>,

    /// Roles this role may assign to others (`"*"` for any at this scope or below)
    #[serde(default)]
    pub can_assign: Vec<String>,
}

impl RegistryConfig {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Parses a JSON registry document
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| AuthzError::InvalidConfig(format!("Malformed registry document: {}", e)))
    }

    /// Validates and freezes this configuration
    pub fn build(self) -> Result<RoleRegistry> {
        RoleRegistry::from_config(self)
    }
}

impl ScopeConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            roles: Vec::new(),
        }
    }
}

impl RoleConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            permissions: Vec::new(),
            can_assign: Vec::new(),
        }
    }
}

/// Fluent registry builder
///
/// Calls apply to the most recently selected scope and role:
///
/// ```
/// use rolegate_authz::registry::RegistryBuilder;
///
/// let registry = RegistryBuilder::new()
///     .define_scope("organization")
///         .role("super_admin").permissions(["*"]).can_assign(["*"])
///         .role("viewer").permissions(["project.read", "team.read", "task.read"])
///     .define_scope("project").within("organization")
///         .role("maintainer").permissions(["project.*"])
///     .build()
///     .unwrap();
///
/// assert!(registry.resolve("viewer", "organization").is_some());
/// ```
///
/// Misuse (a role before any scope, permissions before any role) is recorded
/// and reported by [`build`](Self::build), so startup fails instead of a
/// later request.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    config: RegistryConfig,
    current_scope: Option<usize>,
    current_role: Option<usize>,
    errors: Vec<String>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Selects a scope, creating it on first use
    pub fn define_scope(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        let idx = match self.config.scopes.iter().position(|s| s.name == name) {
            Some(idx) => idx,
            None => {
                self.config.scopes.push(ScopeConfig::new(name));
                self.config.scopes.len() - 1
            }
        };
        self.current_scope = Some(idx);
        self.current_role = None;
        self
    }

    /// Nests the current scope under `parent`
    pub fn within(mut self, parent: impl Into<String>) -> Self {
        let parent = parent.into();
        match self.current_scope {
            Some(idx) => {
                let scope = &mut self.config.scopes[idx];
                let conflict = scope.parent.clone().filter(|existing| *existing != parent);
                match conflict {
                    Some(existing) => self.errors.push(format!(
                        "Scope '{}' already nested under '{}', cannot move under '{}'",
                        scope.name, existing, parent
                    )),
                    None => scope.parent = Some(parent),
                }
            }
            None => self
                .errors
                .push(format!("within('{}') called before define_scope", parent)),
        }
        self
    }

    /// Selects a role in the current scope, creating it on first use
    pub fn role(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        let Some(scope_idx) = self.current_scope else {
            self.errors
                .push(format!("role('{}') called before define_scope", name));
            return self;
        };

        let roles = &mut self.config.scopes[scope_idx].roles;
        let idx = match roles.iter().position(|r| r.name == name) {
            Some(idx) => idx,
            None => {
                roles.push(RoleConfig::new(name));
                roles.len() - 1
            }
        };
        self.current_role = Some(idx);
        self
    }

    /// Adds permission patterns to the current role (union with earlier calls)
    pub fn permissions<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        match self.current_role_mut() {
            Some(role) => extend_unique(&mut role.permissions, patterns),
            None => self
                .errors
                .push("permissions() called before role()".to_string()),
        }
        self
    }

    /// Adds roles the current role may assign to others
    pub fn can_assign<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        match self.current_role_mut() {
            Some(role) => extend_unique(&mut role.can_assign, roles),
            None => self
                .errors
                .push("can_assign() called before role()".to_string()),
        }
        self
    }

    /// Returns the assembled configuration without validating the tree
    pub fn into_config(self) -> Result<RegistryConfig> {
        if !self.errors.is_empty() {
            return Err(AuthzError::InvalidConfig(self.errors.join("; ")));
        }
        Ok(self.config)
    }

    /// Validates and freezes the registry
    pub fn build(self) -> Result<RoleRegistry> {
        self.into_config()?.build()
    }

    fn current_role_mut(&mut self) -> Option<&mut RoleConfig> {
        let scope = self.current_scope?;
        let role = self.current_role?;
        self.config.scopes.get_mut(scope)?.roles.get_mut(role)
    }
}

pub(crate) fn extend_unique<I, S>(target: &mut Vec<String>, items: I)
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    for item in items {
        let item = item.into();
        if !target.contains(&item) {
            target.push(item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_define_scope_is_idempotent() {
        let config = RegistryBuilder::new()
            .define_scope("organization")
            .role("viewer")
            .permissions(["project.read"])
            .define_scope("organization")
            .role("viewer")
            .permissions(["team.read", "project.read"])
            .into_config()
            .unwrap();

        assert_eq!(config.scopes.len(), 1);
        assert_eq!(config.scopes[0].roles.len(), 1);
        assert_eq!(
            config.scopes[0].roles[0].permissions,
            vec!["project.read".to_string(), "team.read".to_string()]
        );
    }

    #[test]
    fn test_role_before_scope_is_reported() {
        let result = RegistryBuilder::new().role("viewer").into_config();
        assert!(matches!(result, Err(AuthzError::InvalidConfig(_))));
    }

    #[test]
    fn test_permissions_before_role_is_reported() {
        let result = RegistryBuilder::new()
            .define_scope("organization")
            .permissions(["*"])
            .into_config();
        assert!(matches!(result, Err(AuthzError::InvalidConfig(_))));
    }

    #[test]
    fn test_conflicting_parent_is_reported() {
        let result = RegistryBuilder::new()
            .define_scope("team")
            .within("organization")
            .define_scope("team")
            .within("project")
            .into_config();
        assert!(matches!(result, Err(AuthzError::InvalidConfig(_))));
    }

    #[test]
    fn test_json_document() {
        let config = RegistryConfig::from_json(
            r#"{
                "scopes": [
                    {"name": "organization", "roles": [
                        {"name": "owner", "permissions": ["*"], "can_assign": ["*"]}
                    ]},
                    {"name": "project", "parent": "organization"}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(config.scopes.len(), 2);
        assert_eq!(config.scopes[1].parent.as_deref(), Some("organization"));
        assert!(config.scopes[1].roles.is_empty());
    }

    #[test]
    fn test_malformed_json_document() {
        assert!(matches!(
            RegistryConfig::from_json("{\"scopes\": 3}"),
            Err(AuthzError::InvalidConfig(_))
        ));
    }
}
