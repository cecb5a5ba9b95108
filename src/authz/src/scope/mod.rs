//! Scope instance hierarchy and ancestor-chain resolution
//!
//! A role granted at a scope instance also applies to every instance nested
//! below it. This module answers "which instances enclose this one".
//!
//! # Examples
//!
//! ```
//! use rolegate_authz::registry::RoleRegistry;
//! use rolegate_authz::scope::{InMemoryHierarchy, ScopeResolver};
//! use rolegate_authz::types::ScopeRef;
//! use std::sync::Arc;
//!
//! # async fn example() -> rolegate_authz::Result<()> {
//! let registry = Arc::new(
//!     RoleRegistry::builder()
//!         .define_scope("organization")
//!         .define_scope("project").within("organization")
//!         .build()?,
//! );
//! let hierarchy = Arc::new(InMemoryHierarchy::new(registry.clone()));
//! hierarchy.link(ScopeRef::new("project", "web"), ScopeRef::new("organization", "acme"))?;
//!
//! let resolver = ScopeResolver::new(registry, hierarchy);
//! let chain = resolver.build_chain(&ScopeRef::new("project", "web")).await?;
//! assert_eq!(chain.len(), 2);
//! # Ok(())
//! # }
//! ```

mod hierarchy;
mod resolver;

pub use hierarchy::{FlatHierarchy, InMemoryHierarchy, ScopeHierarchy};
pub use resolver::{CacheStats, ScopeResolver, DEFAULT_CACHE_TTL};
