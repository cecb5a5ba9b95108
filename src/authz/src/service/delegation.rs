//! Delegation rules
//!
//! An actor may assign or revoke a role at a scope instance when some role
//! the actor holds at that instance, or at an instance enclosing it, lists
//! the target role in its assignable set. Roles can only be handed down the
//! scope tree, never up.

use sqlx::AnyConnection;
use tracing::{debug, warn};

use super::AuthzService;
use crate::context::RequestContext;
use crate::error::{AuthzError, Result};
use crate::registry::RoleDefinition;
use crate::types::Grant;

impl AuthzService {
    pub(super) async fn authorize_delegation(
        &self,
        ctx: &RequestContext,
        conn: &mut AnyConnection,
        target_role: &RoleDefinition,
        grant: &Grant,
    ) -> Result<()> {
        let chain = self.resolver.build_chain(&grant.target).await?;
        let held = self.store.user_roles_on(conn, ctx.actor()).await?;

        let mut holds_any = false;
        for role in held.iter().filter(|h| chain.contains(&h.target)) {
            holds_any = true;

            let Some(granting) = self.registry.resolve(&role.role, &role.target.scope) else {
                warn!(
                    "Actor '{}' holds role '{}' at {}, which is no longer defined",
                    ctx.actor(),
                    role.role,
                    role.target
                );
                continue;
            };

            if self.registry.may_assign(granting, target_role) {
                debug!(
                    "Actor '{}' may delegate '{}' via '{}' at {}",
                    ctx.actor(),
                    target_role.name,
                    granting.name,
                    role.target
                );
                return Ok(());
            }
        }

        let reason = if holds_any {
            format!(
                "no role held at {} or above may assign '{}'",
                grant.target, target_role.name
            )
        } else {
            format!("actor holds no role at {} or above", grant.target)
        };

        Err(AuthzError::not_authorized(
            ctx.actor(),
            &grant.role,
            grant.scope(),
            grant.instance(),
            reason,
        ))
    }
}
