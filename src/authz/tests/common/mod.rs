//! Shared fixtures for integration tests
//!
//! Each environment gets its own SQLite database file inside a temporary
//! directory, migrated and ready to use.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use rolegate_authz::{
    AuthzService, Grant, InMemoryHierarchy, InMemoryIdentities, PoolConfig, PoolManager,
    RequestContext, RoleRegistry,
};
use tempfile::TempDir;

pub const ORG: &str = "organization";
pub const PROJECT: &str = "project";
pub const TEAM: &str = "team";

/// Users known to the identity provider
pub const USERS: &[&str] = &[
    "root", "alice", "bob", "carol", "dave", "erin", "viewer_user", "other_user",
];

pub fn sample_registry() -> RoleRegistry {
    RoleRegistry::builder()
        .define_scope(ORG)
        .role("super_admin")
        .permissions(["*"])
        .can_assign(["*"])
        .role("org_admin")
        .permissions(["organization.*", "project.*"])
        .can_assign(["project_admin", "viewer"])
        .role("viewer")
        .permissions(["project.read", "team.read", "task.read"])
        .define_scope(PROJECT)
        .within(ORG)
        .role("project_admin")
        .permissions(["project.*", "task.*"])
        .can_assign(["contributor"])
        .role("contributor")
        .permissions(["task.create", "task.update"])
        .define_scope(TEAM)
        .within(PROJECT)
        .role("lead")
        .permissions(["team.*"])
        .build()
        .unwrap()
}

pub struct TestEnv {
    pub dir: TempDir,
    pub url: String,
    pub registry: Arc<RoleRegistry>,
    pub pool: Arc<PoolManager>,
    pub identities: Arc<InMemoryIdentities>,
    pub hierarchy: Arc<InMemoryHierarchy>,
    pub service: AuthzService,
}

impl TestEnv {
    pub async fn new() -> Self {
        Self::build(false, PoolConfig::new(4, 1, Duration::from_secs(300))).await
    }

    pub async fn with_audit_trail() -> Self {
        Self::build(true, PoolConfig::new(4, 1, Duration::from_secs(300))).await
    }

    pub async fn with_pool(config: PoolConfig) -> Self {
        Self::build(false, config).await
    }

    async fn build(audit_trail: bool, config: PoolConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("rolegate.db").display());
        let pool = Arc::new(PoolManager::connect(&url, config).await.unwrap());

        let registry = Arc::new(sample_registry());
        let identities = Arc::new(InMemoryIdentities::with_users(USERS.iter().copied()));

        // acme encloses web and its frontend team; globex encloses api
        let hierarchy = Arc::new(InMemoryHierarchy::new(registry.clone()));
        hierarchy
            .link(scope(PROJECT, "web"), scope(ORG, "acme"))
            .unwrap();
        hierarchy
            .link(scope(TEAM, "frontend"), scope(PROJECT, "web"))
            .unwrap();
        hierarchy
            .link(scope(PROJECT, "api"), scope(ORG, "globex"))
            .unwrap();

        let service = AuthzService::builder(registry.clone(), pool.clone(), identities.clone())
            .hierarchy(hierarchy.clone())
            .audit_trail(audit_trail)
            .build();
        service.run_migrations().await.unwrap();

        Self {
            dir,
            url,
            registry,
            pool,
            identities,
            hierarchy,
            service,
        }
    }

    /// Grants `role` at `scope`/`instance` through the system actor
    pub async fn bootstrap(&self, user: &str, role: &str, scope: &str, instance: &str) {
        self.service
            .assign(&RequestContext::system(), &Grant::new(user, role, scope, instance))
            .await
            .unwrap();
    }

    pub async fn total(&self) -> i64 {
        self.service
            .count_all_roles(&RequestContext::system())
            .await
            .unwrap()
    }
}

pub fn scope(name: &str, instance: &str) -> rolegate_authz::ScopeRef {
    rolegate_authz::ScopeRef::new(name, instance)
}

pub fn org_grant(user: &str, role: &str) -> Grant {
    Grant::new(user, role, ORG, "acme")
}
