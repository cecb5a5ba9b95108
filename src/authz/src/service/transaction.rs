//! Transactional scopes
//!
//! [`AuthzService::transaction`] runs a closure against a [`TxScope`] bound to
//! one database transaction. Returning `Ok` commits; returning `Err` or
//! panicking rolls back every mutation made through the scope.

use std::panic::AssertUnwindSafe;
use std::time::Instant;

use futures::future::BoxFuture;
use futures::FutureExt;
use sqlx::{Any, Transaction};
use tracing::{debug, error, warn};

use super::{AuthzService, Mutation};
use crate::context::RequestContext;
use crate::error::{AuthzError, Result};
use crate::permission::PermissionPattern;
use crate::types::{Grant, ScopeRef, UserRoles};

/// Operations bound to a single open transaction
///
/// Mutations are visible to later calls on the same scope, and to nobody
/// else until the transaction commits.
pub struct TxScope {
    service: AuthzService,
    tx: Transaction<'static, Any>,
}

impl AuthzService {
    /// Runs `f` inside a database transaction
    ///
    /// ```no_run
    /// # use rolegate_authz::{AuthzService, Grant, RequestContext};
    /// # async fn example(service: AuthzService) -> rolegate_authz::Result<()> {
    /// let ctx = RequestContext::new("alice");
    /// service
    ///     .transaction(&ctx.clone(), move |tx| {
    ///         Box::pin(async move {
    ///             tx.assign(&ctx, &Grant::new("bob", "viewer", "organization", "acme")).await?;
    ///             tx.revoke(&ctx, &Grant::new("bob", "editor", "organization", "acme")).await?;
    ///             Ok(())
    ///         })
    ///     })
    ///     .await
    /// # }
    /// ```
    ///
    /// `ctx` bounds the wait for a connection. If it is cancelled or past its
    /// deadline once `f` returns, the transaction rolls back instead of
    /// committing.
    pub async fn transaction<F, T>(&self, ctx: &RequestContext, f: F) -> Result<T>
    where
        F: for<'t> FnOnce(&'t mut TxScope) -> BoxFuture<'t, Result<T>> + Send,
        T: Send,
    {
        let started = Instant::now();
        let tx = ctx.run(self.pool.begin()).await?;
        let mut scope = TxScope {
            service: self.clone(),
            tx,
        };

        let outcome = AssertUnwindSafe(f(&mut scope)).catch_unwind().await;

        match outcome {
            Ok(Ok(_)) if ctx.is_cancelled() => {
                rollback(scope.tx).await;
                debug!("Transaction rolled back: request cancelled before commit");
                Err(AuthzError::Cancelled)
            }
            Ok(Ok(value)) => {
                scope.tx.commit().await?;
                debug!("Transaction committed after {:?}", started.elapsed());
                Ok(value)
            }
            Ok(Err(e)) => {
                rollback(scope.tx).await;
                debug!("Transaction rolled back: {}", e);
                Err(e)
            }
            Err(panic) => {
                rollback(scope.tx).await;
                let message = panic_message(panic.as_ref());
                error!("Transaction closure panicked, rolled back: {}", message);
                Err(AuthzError::Internal(format!(
                    "transaction closure panicked: {}",
                    message
                )))
            }
        }
    }
}

impl TxScope {
    pub fn service(&self) -> &AuthzService {
        &self.service
    }

    pub async fn assign(&mut self, ctx: &RequestContext, grant: &Grant) -> Result<bool> {
        self.service
            .mutate_on(ctx, &mut self.tx, Mutation::Assign, grant, false)
            .await
    }

    pub async fn revoke(&mut self, ctx: &RequestContext, grant: &Grant) -> Result<bool> {
        self.service
            .mutate_on(ctx, &mut self.tx, Mutation::Revoke, grant, false)
            .await
    }

    /// Bulk assign inside the transaction
    ///
    /// A failure reports how many items were applied before it; those
    /// items are only committed if the surrounding closure succeeds.
    pub async fn assign_multiple(&mut self, ctx: &RequestContext, grants: &[Grant]) -> Result<usize> {
        self.service
            .run_batch(ctx, &mut self.tx, Mutation::Assign, grants, false)
            .await
    }

    pub async fn revoke_multiple(&mut self, ctx: &RequestContext, grants: &[Grant]) -> Result<usize> {
        self.service
            .run_batch(ctx, &mut self.tx, Mutation::Revoke, grants, false)
            .await
    }

    /// Permission check that sees uncommitted changes made in this scope
    pub async fn can(
        &mut self,
        ctx: &RequestContext,
        user: &str,
        permission: &str,
        scope: &str,
        instance: &str,
    ) -> Result<bool> {
        let started = Instant::now();
        let target = ScopeRef::new(scope, instance);
        let result = ctx
            .run(self.service.can_on(&mut self.tx, user, permission, &target))
            .await;
        self.service.record_check(&result, started).await;
        result
    }

    pub async fn permissions_for(
        &mut self,
        ctx: &RequestContext,
        user: &str,
        scope: &str,
        instance: &str,
    ) -> Result<Vec<PermissionPattern>> {
        let target = ScopeRef::new(scope, instance);
        ctx.run(self.service.effective_patterns(&mut self.tx, user, &target))
            .await
    }

    pub async fn get_user_roles(&mut self, ctx: &RequestContext, user: &str) -> Result<UserRoles> {
        ctx.run(self.service.store.user_roles_on(&mut self.tx, user))
            .await
    }

    pub async fn has_role(
        &mut self,
        ctx: &RequestContext,
        user: &str,
        role: &str,
        scope: &str,
        instance: &str,
    ) -> Result<bool> {
        let grant = Grant::new(user, role, scope, instance);
        ctx.run(self.service.store.exists_on(&mut self.tx, &grant))
            .await
    }

    pub async fn count_roles(
        &mut self,
        ctx: &RequestContext,
        scope: &str,
        instance: &str,
        role: &str,
    ) -> Result<i64> {
        ctx.run(self.service.store.count_roles_on(&mut self.tx, scope, instance, role))
            .await
    }

    pub async fn count_all_roles(&mut self, ctx: &RequestContext) -> Result<i64> {
        ctx.run(self.service.store.count_all_on(&mut self.tx)).await
    }

    /// Nested transactions share this scope; no savepoint is created
    ///
    /// An error from `f` is returned to the enclosing closure, which decides
    /// whether the whole transaction rolls back.
    pub async fn transaction<F, T>(&mut self, f: F) -> Result<T>
    where
        F: for<'t> FnOnce(&'t mut TxScope) -> BoxFuture<'t, Result<T>> + Send,
        T: Send,
    {
        debug!("Nested transaction joins the enclosing scope");
        f(self).await
    }
}

async fn rollback(tx: Transaction<'static, Any>) {
    if let Err(e) = tx.rollback().await {
        // Dropping the connection still discards the transaction
        warn!("Explicit rollback failed: {}", e);
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
