/// Scope instance hierarchy
///
/// The registry knows that `project` nests under `organization`; it does not
/// know which organization a given project belongs to. A [`ScopeHierarchy`]
/// answers that per instance, and is injected into the service so callers
/// can back it with their own data.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

use crate::error::{AuthzError, Result};
use crate::registry::RoleRegistry;
use crate::types::ScopeRef;

/// Resolves the enclosing scope instance of a scope instance
#[async_trait]
pub trait ScopeHierarchy: Send + Sync {
    /// Returns the direct parent of `target`, or `None` at a root
    async fn parent(&self, target: &ScopeRef) -> Result<Option<ScopeRef>>;
}

/// Hierarchy with no parent links
///
/// Roles only apply at exactly the scope instance they were granted at.
#[derive(Debug, Default, Clone, Copy)]
pub struct FlatHierarchy;

#[async_trait]
impl ScopeHierarchy for FlatHierarchy {
    async fn parent(&self, _target: &ScopeRef) -> Result<Option<ScopeRef>> {
        Ok(None)
    }
}

/// In-memory child -> parent links between scope instances
///
/// Links are validated against the registry's scope tree: the parent's scope
/// must enclose the child's scope.
///
/// # Examples
///
/// ```
/// use rolegate_authz::registry::RoleRegistry;
/// use rolegate_authz::scope::InMemoryHierarchy;
/// use rolegate_authz::types::ScopeRef;
/// use std::sync::Arc;
///
/// let registry = Arc::new(
///     RoleRegistry::builder()
///         .define_scope("organization")
///         .define_scope("project").within("organization")
///         .build()
///         .unwrap(),
/// );
/// let hierarchy = InMemoryHierarchy::new(registry);
/// hierarchy
///     .link(ScopeRef::new("project", "web"), ScopeRef::new("organization", "acme"))
///     .unwrap();
/// ```
pub struct InMemoryHierarchy {
    registry: Arc<RoleRegistry>,
    links: DashMap<ScopeRef, ScopeRef>,
}

impl InMemoryHierarchy {
    pub fn new(registry: Arc<RoleRegistry>) -> Self {
        Self {
            registry,
            links: DashMap::new(),
        }
    }

    /// Records that `child` lives inside `parent`, replacing any earlier link
    pub fn link(&self, child: ScopeRef, parent: ScopeRef) -> Result<()> {
        for scope in [&child.scope, &parent.scope] {
            if !self.registry.has_scope(scope) {
                return Err(AuthzError::UnknownScope(scope.clone()));
            }
        }

        if !self.registry.is_descendant(&child.scope, &parent.scope) {
            return Err(AuthzError::InvalidConfig(format!(
                "Scope '{}' is not nested under '{}'",
                child.scope, parent.scope
            )));
        }

        self.links.insert(child, parent);
        Ok(())
    }

    /// Removes the parent link of `child`, returning the old parent
    pub fn unlink(&self, child: &ScopeRef) -> Option<ScopeRef> {
        self.links.remove(child).map(|(_, parent)| parent)
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

#[async_trait]
impl ScopeHierarchy for InMemoryHierarchy {
    async fn parent(&self, target: &ScopeRef) -> Result<Option<ScopeRef>> {
        Ok(self.links.get(target).map(|entry| entry.value().clone()))
    }
}
