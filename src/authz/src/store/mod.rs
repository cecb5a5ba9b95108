//! Assignment store
//!
//! Durable `(user, role, scope, instance)` facts in the `role_assignments`
//! table, with an optional append-only event log in
//! `role_assignment_events`. The store only persists; authorization and
//! delegation rules live in [`crate::service`].
//!
//! Mutations take the connection to run on, so the caller decides whether a
//! write lands in its own per-item transaction or inside a wider one.

mod migrations;
mod queries;

pub use migrations::known_migrations;
pub use queries::ANY_ROLE;

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use sqlx::AnyConnection;
use tracing::{debug, info};

use crate::error::{AuthzError, Result};
use crate::pool::PoolManager;
use crate::types::{AssignmentEvent, AssignmentEventKind, Grant, RoleAssignment, UserRoles};

/// Persistence for role assignments and their audit trail
pub struct AssignmentStore {
    pool: Arc<PoolManager>,
    audit_trail: bool,
    /// Orders events written within the same millisecond
    event_seq: AtomicI64,
}

impl AssignmentStore {
    pub fn new(pool: Arc<PoolManager>, audit_trail: bool) -> Self {
        Self {
            pool,
            audit_trail,
            event_seq: AtomicI64::new(0),
        }
    }

    pub fn audit_trail(&self) -> bool {
        self.audit_trail
    }

    pub fn pool(&self) -> &Arc<PoolManager> {
        &self.pool
    }

    /// Applies pending schema migrations
    pub async fn run_migrations(&self) -> Result<usize> {
        let mut conn = self.pool.acquire().await?;
        let applied = migrations::run(&mut conn).await?;
        info!(
            "Schema migrations complete: {} applied, {} known",
            applied,
            known_migrations()
        );
        Ok(applied)
    }

    /// Writes an assignment; an existing identical tuple is left as is
    ///
    /// Returns whether a new row was written. The audit event, if enabled,
    /// is written on the same connection only when the row is new.
    pub(crate) async fn insert(
        &self,
        conn: &mut AnyConnection,
        grant: &Grant,
        actor: &str,
    ) -> Result<bool> {
        let now = Utc::now().timestamp_millis();
        let inserted = match queries::insert_assignment(conn, grant, actor, now).await {
            Ok(inserted) => inserted,
            Err(AuthzError::Conflict(message)) => {
                debug!("Duplicate assignment {} absorbed: {}", grant, message);
                false
            }
            Err(e) => return Err(e),
        };

        if inserted {
            self.record(conn, AssignmentEventKind::Granted, grant, actor, now)
                .await?;
        } else {
            debug!("Assignment {} already present", grant);
        }
        Ok(inserted)
    }

    /// Deletes an assignment; a missing tuple is a no-op
    pub(crate) async fn delete(
        &self,
        conn: &mut AnyConnection,
        grant: &Grant,
        actor: &str,
    ) -> Result<bool> {
        let deleted = queries::delete_assignment(conn, grant).await?;

        if deleted {
            let now = Utc::now().timestamp_millis();
            self.record(conn, AssignmentEventKind::Revoked, grant, actor, now)
                .await?;
        } else {
            debug!("Assignment {} not present, nothing to revoke", grant);
        }
        Ok(deleted)
    }

    async fn record(
        &self,
        conn: &mut AnyConnection,
        kind: AssignmentEventKind,
        grant: &Grant,
        actor: &str,
        at_millis: i64,
    ) -> Result<()> {
        if !self.audit_trail {
            return Ok(());
        }
        let seq = self.event_seq.fetch_add(1, Ordering::Relaxed);
        queries::insert_event(conn, kind, grant, actor, at_millis, seq).await
    }

    pub(crate) async fn user_roles_on(
        &self,
        conn: &mut AnyConnection,
        user: &str,
    ) -> Result<UserRoles> {
        queries::select_user_roles(conn, user).await
    }

    pub(crate) async fn exists_on(&self, conn: &mut AnyConnection, grant: &Grant) -> Result<bool> {
        queries::assignment_exists(conn, grant).await
    }

    pub(crate) async fn count_roles_on(
        &self,
        conn: &mut AnyConnection,
        scope: &str,
        instance: &str,
        role: &str,
    ) -> Result<i64> {
        queries::count_roles(conn, scope, instance, role).await
    }

    pub(crate) async fn count_all_on(&self, conn: &mut AnyConnection) -> Result<i64> {
        queries::count_all(conn).await
    }

    /// All roles currently held by `user`
    pub async fn user_roles(&self, user: &str) -> Result<UserRoles> {
        let mut conn = self.pool.acquire().await?;
        self.user_roles_on(&mut conn, user).await
    }

    /// Full assignment rows for `user`, including grantor and grant time
    pub async fn assignments(&self, user: &str) -> Result<Vec<RoleAssignment>> {
        let mut conn = self.pool.acquire().await?;
        queries::select_assignments(&mut conn, user).await
    }

    /// Counts assignments at a scope instance; `"*"` counts every role
    pub async fn count_roles(&self, scope: &str, instance: &str, role: &str) -> Result<i64> {
        let mut conn = self.pool.acquire().await?;
        self.count_roles_on(&mut conn, scope, instance, role).await
    }

    pub async fn count_all_roles(&self) -> Result<i64> {
        let mut conn = self.pool.acquire().await?;
        self.count_all_on(&mut conn).await
    }

    /// Audit events for `user` in insertion order
    ///
    /// Empty when the audit trail is disabled.
    pub async fn history(&self, user: &str) -> Result<Vec<AssignmentEvent>> {
        if !self.audit_trail {
            return Ok(Vec::new());
        }
        let mut conn = self.pool.acquire().await?;
        queries::select_events(&mut conn, user).await
    }
}

impl std::fmt::Debug for AssignmentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssignmentStore")
            .field("audit_trail", &self.audit_trail)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolConfig;
    use crate::types::ScopeRef;
    use sqlx::Connection;
    use std::time::Duration;

    async fn test_store(audit_trail: bool) -> (tempfile::TempDir, AssignmentStore) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("store.db").display());
        let pool = PoolManager::connect(&url, PoolConfig::new(4, 1, Duration::from_secs(60)))
            .await
            .unwrap();
        let store = AssignmentStore::new(Arc::new(pool), audit_trail);
        store.run_migrations().await.unwrap();
        (dir, store)
    }

    fn grant(user: &str, role: &str) -> Grant {
        Grant::new(user, role, "organization", "acme")
    }

    // ============================================================================
    // Migrations
    // ============================================================================

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let (_dir, store) = test_store(false).await;
        assert_eq!(store.run_migrations().await.unwrap(), 0);
        assert_eq!(store.count_all_roles().await.unwrap(), 0);
    }

    // ============================================================================
    // Mutations
    // ============================================================================

    #[tokio::test]
    async fn test_insert_is_conflict_free() {
        let (_dir, store) = test_store(false).await;
        let mut conn = store.pool().acquire().await.unwrap();

        assert!(store.insert(&mut conn, &grant("alice", "viewer"), "root").await.unwrap());
        assert!(!store.insert(&mut conn, &grant("alice", "viewer"), "root").await.unwrap());
        drop(conn);

        assert_eq!(store.count_all_roles().await.unwrap(), 1);
        let assignments = store.assignments("alice").await.unwrap();
        assert_eq!(assignments.len(), 1);
        assert_eq!(assignments[0].granted_by, "root");
        assert_eq!(assignments[0].target, ScopeRef::new("organization", "acme"));
    }

    #[tokio::test]
    async fn test_unique_violation_maps_to_conflict() {
        let (_dir, store) = test_store(false).await;
        let mut conn = store.pool().acquire().await.unwrap();
        store.insert(&mut conn, &grant("alice", "viewer"), "root").await.unwrap();

        let err: AuthzError = sqlx::query(
            "INSERT INTO role_assignments (user_id, role_name, scope_name, scope_instance, granted_by, granted_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind("alice")
        .bind("viewer")
        .bind("organization")
        .bind("acme")
        .bind("root")
        .bind(0_i64)
        .execute(&mut *conn)
        .await
        .unwrap_err()
        .into();

        assert!(matches!(err, AuthzError::Conflict(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_delete_missing_is_noop() {
        let (_dir, store) = test_store(false).await;
        let mut conn = store.pool().acquire().await.unwrap();
        assert!(!store.delete(&mut conn, &grant("ghost", "viewer"), "root").await.unwrap());
    }

    #[tokio::test]
    async fn test_rolled_back_insert_leaves_no_row() {
        let (_dir, store) = test_store(true).await;
        let mut conn = store.pool().acquire().await.unwrap();
        {
            let mut tx = conn.begin().await.unwrap();
            store.insert(&mut tx, &grant("alice", "viewer"), "root").await.unwrap();
            tx.rollback().await.unwrap();
        }
        drop(conn);

        assert_eq!(store.count_all_roles().await.unwrap(), 0);
        assert!(store.history("alice").await.unwrap().is_empty());
    }

    // ============================================================================
    // Queries
    // ============================================================================

    #[tokio::test]
    async fn test_counts_by_role_pattern() {
        let (_dir, store) = test_store(false).await;
        let mut conn = store.pool().acquire().await.unwrap();
        store.insert(&mut conn, &grant("alice", "viewer"), "root").await.unwrap();
        store.insert(&mut conn, &grant("bob", "viewer"), "root").await.unwrap();
        store.insert(&mut conn, &grant("carol", "admin"), "root").await.unwrap();
        store
            .insert(&mut conn, &Grant::new("dave", "viewer", "organization", "globex"), "root")
            .await
            .unwrap();
        drop(conn);

        assert_eq!(store.count_roles("organization", "acme", ANY_ROLE).await.unwrap(), 3);
        assert_eq!(store.count_roles("organization", "acme", "viewer").await.unwrap(), 2);
        assert_eq!(store.count_roles("organization", "acme", "owner").await.unwrap(), 0);
        assert_eq!(store.count_all_roles().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_user_roles_set() {
        let (_dir, store) = test_store(false).await;
        let mut conn = store.pool().acquire().await.unwrap();
        store.insert(&mut conn, &grant("alice", "viewer"), "root").await.unwrap();
        store
            .insert(&mut conn, &Grant::new("alice", "developer", "project", "web"), "root")
            .await
            .unwrap();
        drop(conn);

        let roles = store.user_roles("alice").await.unwrap();
        assert_eq!(roles.len(), 2);
        assert!(roles.has_role("viewer", "organization", "acme"));
        assert!(roles.has_role("developer", "project", "web"));
        assert!(!roles.has_role("developer", "project", "api"));
        assert!(store.user_roles("nobody").await.unwrap().is_empty());
    }

    // ============================================================================
    // Audit trail
    // ============================================================================

    #[tokio::test]
    async fn test_history_records_effective_changes_only() {
        let (_dir, store) = test_store(true).await;
        let mut conn = store.pool().acquire().await.unwrap();
        store.insert(&mut conn, &grant("alice", "viewer"), "root").await.unwrap();
        store.insert(&mut conn, &grant("alice", "viewer"), "root").await.unwrap();
        store.delete(&mut conn, &grant("alice", "viewer"), "ops").await.unwrap();
        store.delete(&mut conn, &grant("alice", "viewer"), "ops").await.unwrap();
        drop(conn);

        let history = store.history("alice").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].kind, AssignmentEventKind::Granted);
        assert_eq!(history[0].actor, "root");
        assert_eq!(history[1].kind, AssignmentEventKind::Revoked);
        assert_eq!(history[1].actor, "ops");
        assert_eq!(history[1].grant, grant("alice", "viewer"));
    }

    #[tokio::test]
    async fn test_history_disabled() {
        let (_dir, store) = test_store(false).await;
        let mut conn = store.pool().acquire().await.unwrap();
        store.insert(&mut conn, &grant("alice", "viewer"), "root").await.unwrap();
        drop(conn);
        assert!(store.history("alice").await.unwrap().is_empty());
    }
}
