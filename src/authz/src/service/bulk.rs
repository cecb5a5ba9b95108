//! Bulk assignment and revocation
//!
//! Items are applied in order on one leased connection, each in its own
//! transaction, with the same checks as a single call. The first failure
//! stops the batch and reports its position and how many items before it
//! were committed. Committed items stay committed.

use sqlx::AnyConnection;
use tracing::{info, warn};

use super::{AuthzService, Mutation};
use crate::context::RequestContext;
use crate::error::{AuthzError, BulkError, Result};
use crate::types::Grant;

impl AuthzService {
    /// Assigns each grant in order, returning how many were committed
    pub async fn assign_multiple(&self, ctx: &RequestContext, grants: &[Grant]) -> Result<usize> {
        self.apply_batch(ctx, Mutation::Assign, grants).await
    }

    /// Revokes each grant in order, returning how many were committed
    pub async fn revoke_multiple(&self, ctx: &RequestContext, grants: &[Grant]) -> Result<usize> {
        self.apply_batch(ctx, Mutation::Revoke, grants).await
    }

    async fn apply_batch(
        &self,
        ctx: &RequestContext,
        mutation: Mutation,
        grants: &[Grant],
    ) -> Result<usize> {
        if grants.is_empty() {
            return Ok(0);
        }

        let mut conn = ctx
            .run(self.pool.acquire())
            .await
            .map_err(|e| bulk_failure(0, 0, e))?;

        self.run_batch(ctx, &mut conn, mutation, grants, true).await
    }

    /// Applies `grants` on `conn`; see [`AuthzService::mutate_on`] for `own_tx`
    pub(super) async fn run_batch(
        &self,
        ctx: &RequestContext,
        conn: &mut AnyConnection,
        mutation: Mutation,
        grants: &[Grant],
        own_tx: bool,
    ) -> Result<usize> {
        let mut committed = 0;

        for (index, grant) in grants.iter().enumerate() {
            if let Err(e) = self.mutate_on(ctx, conn, mutation, grant, own_tx).await {
                warn!(
                    "Bulk {} stopped at item {} ({}) after {} committed: {}",
                    mutation.verb(),
                    index,
                    grant,
                    committed,
                    e
                );
                return Err(bulk_failure(index, committed, e));
            }
            committed += 1;
        }

        info!("Bulk {} applied {} items", mutation.verb(), committed);
        Ok(committed)
    }
}

fn bulk_failure(index: usize, committed: usize, source: AuthzError) -> AuthzError {
    AuthzError::Bulk(BulkError {
        index,
        committed,
        source: Box::new(source),
    })
}
