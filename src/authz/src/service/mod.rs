//! Authorization service
//!
//! Combines the [`RoleRegistry`], the [`AssignmentStore`] and the scope
//! hierarchy to answer permission checks and to apply assignments under
//! delegation rules.
//!
//! Every mutation moves through the same steps: the registry validates the
//! role, the identity provider confirms the target user, delegation rules
//! check the actor, and only then is the change written. A rejected request
//! never touches the store.

mod bulk;
mod delegation;
mod metrics;
mod transaction;


pub use metrics::{MetricsCollector, ServiceMetrics};
pub use transaction::TxScope;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use sqlx::{AnyConnection, Connection};
use tracing::{debug, info, warn};

use crate::config::ServiceConfig;
use crate::context::RequestContext;
use crate::error::{AuthzError, Result};
use crate::identity::IdentityProvider;
use crate::permission::{validate_requested, PermissionPattern};
use crate::pool::{PoolConfig, PoolManager, PoolStats};
use crate::registry::RoleRegistry;
use crate::scope::{FlatHierarchy, ScopeHierarchy, ScopeResolver, DEFAULT_CACHE_TTL};
use crate::store::AssignmentStore;
use crate::types::{AssignmentEvent, Grant, RoleAssignment, ScopeRef, UserRoles};
use metrics::MutationOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mutation {
    Assign,
    Revoke,
}

impl Mutation {
    fn verb(self) -> &'static str {
        match self {
            Self::Assign => "assign",
            Self::Revoke => "revoke",
        }
    }

    fn done(self) -> &'static str {
        match self {
            Self::Assign => "Granted",
            Self::Revoke => "Revoked",
        }
    }
}

/// Scope-hierarchical RBAC service
///
/// Cheap to clone; clones share the registry, store, pool and metrics.
#[derive(Clone)]
pub struct AuthzService {
    registry: Arc<RoleRegistry>,
    store: Arc<AssignmentStore>,
    pool: Arc<PoolManager>,
    identities: Arc<dyn IdentityProvider>,
    resolver: Arc<ScopeResolver>,
    metrics: Arc<MetricsCollector>,
}

/// Builder for [`AuthzService`]
pub struct AuthzServiceBuilder {
    registry: Arc<RoleRegistry>,
    pool: Arc<PoolManager>,
    identities: Arc<dyn IdentityProvider>,
    hierarchy: Option<Arc<dyn ScopeHierarchy>>,
    audit_trail: bool,
    cache_ttl: Duration,
}

impl AuthzServiceBuilder {
    /// Instance-level parent links used for inheritance; defaults to none
    pub fn hierarchy(mut self, hierarchy: Arc<dyn ScopeHierarchy>) -> Self {
        self.hierarchy = Some(hierarchy);
        self
    }

    pub fn audit_trail(mut self, enabled: bool) -> Self {
        self.audit_trail = enabled;
        self
    }

    /// TTL for cached ancestor chains; zero disables caching
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn build(self) -> AuthzService {
        let hierarchy = self
            .hierarchy
            .unwrap_or_else(|| Arc::new(FlatHierarchy));

        AuthzService {
            resolver: Arc::new(ScopeResolver::with_ttl(
                self.registry.clone(),
                hierarchy,
                self.cache_ttl,
            )),
            store: Arc::new(AssignmentStore::new(self.pool.clone(), self.audit_trail)),
            registry: self.registry,
            pool: self.pool,
            identities: self.identities,
            metrics: Arc::new(MetricsCollector::new()),
        }
    }
}

impl AuthzService {
    pub fn builder(
        registry: Arc<RoleRegistry>,
        pool: Arc<PoolManager>,
        identities: Arc<dyn IdentityProvider>,
    ) -> AuthzServiceBuilder {
        AuthzServiceBuilder {
            registry,
            pool,
            identities,
            hierarchy: None,
            audit_trail: false,
            cache_ttl: DEFAULT_CACHE_TTL,
        }
    }

    /// Connects the pool described by `config` and builds a service on it
    pub async fn connect(
        config: &ServiceConfig,
        registry: Arc<RoleRegistry>,
        identities: Arc<dyn IdentityProvider>,
    ) -> Result<Self> {
        let pool = PoolManager::connect(&config.database_url, config.pool.clone()).await?;

        Ok(Self::builder(registry, Arc::new(pool), identities)
            .audit_trail(config.audit_trail)
            .cache_ttl(config.hierarchy_cache_ttl)
            .build())
    }

    pub fn registry(&self) -> &Arc<RoleRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<AssignmentStore> {
        &self.store
    }

    pub fn scope_resolver(&self) -> &Arc<ScopeResolver> {
        &self.resolver
    }

    /// Applies the store's schema; safe to call on every startup
    pub async fn run_migrations(&self) -> Result<usize> {
        self.store.run_migrations().await
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Assigns a role, returning whether a new assignment was written
    ///
    /// Re-assigning an existing tuple succeeds without writing anything.
    pub async fn assign(&self, ctx: &RequestContext, grant: &Grant) -> Result<bool> {
        let mut conn = ctx.run(self.pool.acquire()).await?;
        self.mutate_on(ctx, &mut conn, Mutation::Assign, grant, true)
            .await
    }

    /// Revokes a role, returning whether an assignment was deleted
    ///
    /// Revoking an assignment that does not exist is a no-op.
    pub async fn revoke(&self, ctx: &RequestContext, grant: &Grant) -> Result<bool> {
        let mut conn = ctx.run(self.pool.acquire()).await?;
        self.mutate_on(ctx, &mut conn, Mutation::Revoke, grant, true)
            .await
    }

    /// Validates, authorizes and writes one mutation on `conn`
    ///
    /// With `own_tx` the write runs in its own transaction, which is rolled
    /// back instead of committed if the request was cancelled meanwhile.
    /// Without it the write joins whatever transaction `conn` is in.
    pub(crate) async fn mutate_on(
        &self,
        ctx: &RequestContext,
        conn: &mut AnyConnection,
        mutation: Mutation,
        grant: &Grant,
        own_tx: bool,
    ) -> Result<bool> {
        match self.mutate_inner(ctx, conn, mutation, grant, own_tx).await {
            Ok(changed) => {
                let outcome = match (mutation, changed) {
                    (_, false) => MutationOutcome::Unchanged,
                    (Mutation::Assign, true) => MutationOutcome::Granted,
                    (Mutation::Revoke, true) => MutationOutcome::Revoked,
                };
                self.metrics.record_mutation(outcome).await;
                Ok(changed)
            }
            Err(e) => {
                match &e {
                    AuthzError::NotAuthorized { .. } => {
                        self.metrics.record_rejection().await;
                        info!("Rejected {} of {} by '{}': {}", mutation.verb(), grant, ctx.actor(), e);
                    }
                    _ => {
                        self.metrics.record_error().await;
                        debug!("Failed to {} {}: {}", mutation.verb(), grant, e);
                    }
                }
                Err(e)
            }
        }
    }

    async fn mutate_inner(
        &self,
        ctx: &RequestContext,
        conn: &mut AnyConnection,
        mutation: Mutation,
        grant: &Grant,
        own_tx: bool,
    ) -> Result<bool> {
        ctx.ensure_active()?;

        let target_role = self.registry.require(&grant.role, grant.scope())?.clone();

        // Revocation must still work for users removed from the identity store
        if mutation == Mutation::Assign
            && !ctx.run(self.identities.user_exists(conn, &grant.user)).await?
        {
            return Err(AuthzError::UnknownSubject(grant.user.clone()));
        }

        if ctx.is_system() {
            info!(
                "System actor '{}' applying {} of {} without delegation check",
                ctx.actor(),
                mutation.verb(),
                grant
            );
        } else {
            ctx.run(self.authorize_delegation(ctx, conn, &target_role, grant))
                .await?;
        }

        let changed = if own_tx {
            let mut tx = conn.begin().await?;
            let changed = self.write(&mut tx, mutation, grant, ctx.actor()).await?;
            if ctx.is_cancelled() {
                tx.rollback().await?;
                return Err(AuthzError::Cancelled);
            }
            tx.commit().await?;
            changed
        } else {
            ctx.ensure_active()?;
            self.write(conn, mutation, grant, ctx.actor()).await?
        };

        if changed {
            info!("{} {} (actor '{}')", mutation.done(), grant, ctx.actor());
        }
        Ok(changed)
    }

    async fn write(
        &self,
        conn: &mut AnyConnection,
        mutation: Mutation,
        grant: &Grant,
        actor: &str,
    ) -> Result<bool> {
        match mutation {
            Mutation::Assign => self.store.insert(conn, grant, actor).await,
            Mutation::Revoke => self.store.delete(conn, grant, actor).await,
        }
    }

    // ========================================================================
    // Permission checks
    // ========================================================================

    /// Whether `user` holds `permission` at `scope`/`instance`
    ///
    /// Roles held at the instance itself or at any instance enclosing it
    /// count. Unknown users and users without roles both get `false`; only
    /// store failures and cancellation produce an error.
    pub async fn can(
        &self,
        ctx: &RequestContext,
        user: &str,
        permission: &str,
        scope: &str,
        instance: &str,
    ) -> Result<bool> {
        let started = Instant::now();
        let result = ctx
            .run(async {
                let mut conn = self.pool.acquire().await?;
                self.can_on(&mut conn, user, permission, &ScopeRef::new(scope, instance))
                    .await
            })
            .await;
        self.record_check(&result, started).await;
        result
    }

    pub(crate) async fn can_on(
        &self,
        conn: &mut AnyConnection,
        user: &str,
        permission: &str,
        target: &ScopeRef,
    ) -> Result<bool> {
        validate_requested(permission)?;

        let patterns = self.effective_patterns(conn, user, target).await?;
        let allowed = patterns.iter().any(|p| p.matches(permission));

        debug!(
            "Check {} '{}' at {}: {}",
            user,
            permission,
            target,
            if allowed { "allow" } else { "deny" }
        );
        Ok(allowed)
    }

    pub(crate) async fn record_check(&self, result: &Result<bool>, started: Instant) {
        match result {
            Ok(allowed) => self.metrics.record_check(*allowed, started.elapsed()).await,
            Err(_) => self.metrics.record_error().await,
        }
    }

    /// The de-duplicated union of patterns `can` evaluates for `user`
    pub async fn permissions_for(
        &self,
        ctx: &RequestContext,
        user: &str,
        scope: &str,
        instance: &str,
    ) -> Result<Vec<PermissionPattern>> {
        ctx.run(async {
            let mut conn = self.pool.acquire().await?;
            self.effective_patterns(&mut conn, user, &ScopeRef::new(scope, instance))
                .await
        })
        .await
    }

    pub(crate) async fn effective_patterns(
        &self,
        conn: &mut AnyConnection,
        user: &str,
        target: &ScopeRef,
    ) -> Result<Vec<PermissionPattern>> {
        if !self.registry.has_scope(&target.scope) {
            debug!("Scope '{}' is not defined, no permissions apply", target.scope);
            return Ok(Vec::new());
        }

        let chain = self.resolver.build_chain(target).await?;
        let held = self.store.user_roles_on(conn, user).await?;

        let mut seen = HashSet::new();
        let mut patterns = Vec::new();
        for role in held.iter().filter(|h| chain.contains(&h.target)) {
            let Some(definition) = self.registry.resolve(&role.role, &role.target.scope) else {
                warn!(
                    "User '{}' holds role '{}' at {}, which is no longer defined",
                    user, role.role, role.target
                );
                continue;
            };
            for pattern in &definition.permissions {
                if seen.insert(pattern.as_str()) {
                    patterns.push(pattern.clone());
                }
            }
        }

        Ok(patterns)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// All roles currently assigned to `user`
    pub async fn get_user_roles(&self, ctx: &RequestContext, user: &str) -> Result<UserRoles> {
        ctx.run(async {
            let mut conn = self.pool.acquire().await?;
            self.store.user_roles_on(&mut conn, user).await
        })
        .await
    }

    /// Whether `user` holds exactly `role` at `scope`/`instance`
    ///
    /// Unlike [`can`](Self::can) this ignores inheritance.
    pub async fn has_role(
        &self,
        ctx: &RequestContext,
        user: &str,
        role: &str,
        scope: &str,
        instance: &str,
    ) -> Result<bool> {
        ctx.run(async {
            let mut conn = self.pool.acquire().await?;
            self.store
                .exists_on(&mut conn, &Grant::new(user, role, scope, instance))
                .await
        })
        .await
    }

    /// Assignment rows for `user` with grantor and grant time
    pub async fn assignments(
        &self,
        ctx: &RequestContext,
        user: &str,
    ) -> Result<Vec<RoleAssignment>> {
        ctx.run(self.store.assignments(user)).await
    }

    /// Number of assignments at `scope`/`instance`; a `role` of `"*"` counts all roles
    pub async fn count_roles(
        &self,
        ctx: &RequestContext,
        scope: &str,
        instance: &str,
        role: &str,
    ) -> Result<i64> {
        ctx.run(self.store.count_roles(scope, instance, role)).await
    }

    pub async fn count_all_roles(&self, ctx: &RequestContext) -> Result<i64> {
        ctx.run(self.store.count_all_roles()).await
    }

    /// Grant and revocation events for `user`, oldest first
    pub async fn assignment_history(
        &self,
        ctx: &RequestContext,
        user: &str,
    ) -> Result<Vec<AssignmentEvent>> {
        ctx.run(self.store.history(user)).await
    }

    // ========================================================================
    // Pool management and observability
    // ========================================================================

    pub async fn configure_connection_pool(&self, config: PoolConfig) -> Result<()> {
        self.pool.configure(config).await
    }

    pub fn get_connection_pool_config(&self) -> PoolConfig {
        self.pool.config()
    }

    pub fn get_pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub async fn is_healthy(&self) -> bool {
        self.pool.is_healthy().await
    }

    /// Service metrics with current scope cache statistics
    pub async fn metrics(&self) -> ServiceMetrics {
        let mut snapshot = self.metrics.snapshot().await;
        let cache = self.resolver.stats();
        snapshot.cache_hits = cache.hits as u64;
        snapshot.cache_misses = (cache.misses + cache.expirations) as u64;
        snapshot
    }

    pub async fn reset_metrics(&self) {
        self.metrics.reset().await;
        self.resolver.reset_stats();
    }
}

impl std::fmt::Debug for AuthzService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthzService")
            .field("scopes", &self.registry.scopes())
            .field("store", &self.store)
            .field("pool", &self.pool)
            .finish()
    }
}
