//! # Rolegate Authorization Service
//!
//! Scope-hierarchical role-based access control backed by a relational store.
//!
//! ## Features
//!
//! - **Role registry** of scopes, roles, permission patterns and delegation
//!   rules, validated once at startup and read-only afterwards
//! - **Wildcard permissions** (`project.*`, `*.read`, `*`)
//! - **Scope inheritance**: a role held at an organization applies to the
//!   projects and teams linked beneath it
//! - **Delegation**: actors may only grant roles their own roles allow
//! - **Transactions and bulk mutations** with exact progress reporting on
//!   failure or cancellation
//! - **Pooled storage** over PostgreSQL or SQLite via `sqlx`
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rolegate_authz::{
//!     AuthzService, Grant, InMemoryIdentities, RequestContext, RoleRegistry, ServiceConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = RoleRegistry::builder()
//!         .define_scope("organization")
//!             .role("super_admin").permissions(["*"]).can_assign(["*"])
//!             .role("viewer").permissions(["project.read", "team.read", "task.read"])
//!         .build()?;
//!
//!     let identities = Arc::new(InMemoryIdentities::with_users(["root", "alice"]));
//!     let service =
//!         AuthzService::connect(&ServiceConfig::from_env(), Arc::new(registry), identities).await?;
//!     service.run_migrations().await?;
//!
//!     let system = RequestContext::system();
//!     service
//!         .assign(&system, &Grant::new("root", "super_admin", "organization", "acme"))
//!         .await?;
//!
//!     let root = RequestContext::new("root");
//!     service
//!         .assign(&root, &Grant::new("alice", "viewer", "organization", "acme"))
//!         .await?;
//!
//!     let ctx = RequestContext::new("alice");
//!     assert!(service.can(&ctx, "alice", "task.read", "organization", "acme").await?);
//!     assert!(!service.can(&ctx, "alice", "task.create", "organization", "acme").await?);
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod identity;
pub mod permission;
pub mod pool;
pub mod registry;
pub mod scope;
pub mod service;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use config::ServiceConfig;
pub use context::RequestContext;
pub use error::{AuthzError, BulkError, Result};
pub use identity::{IdentityProvider, InMemoryIdentities, SqlIdentities};
pub use permission::{matches, PermissionPattern};
pub use pool::{PoolConfig, PoolManager, PoolStats};
pub use registry::{RegistryConfig, RoleDefinition, RoleRegistry};
pub use scope::{FlatHierarchy, InMemoryHierarchy, ScopeHierarchy, ScopeResolver};
pub use service::{AuthzService, AuthzServiceBuilder, ServiceMetrics, TxScope};
pub use store::AssignmentStore;
pub use types::{AssignmentEvent, Grant, RoleAssignment, ScopeRef, UserRoles};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
