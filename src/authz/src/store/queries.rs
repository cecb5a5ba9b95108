//! SQL statements for the assignment store
//!
//! Every function runs on a caller-supplied connection, so the same code
//! serves pooled leases, per-item transactions and caller transactions.

use sqlx::any::AnyRow;
use sqlx::{AnyConnection, Row};

use crate::error::Result;
use crate::types::{
    from_millis, AssignmentEvent, AssignmentEventKind, Grant, HeldRole, RoleAssignment, ScopeRef,
    UserRoles,
};

/// Matches every role in `count_roles`
pub const ANY_ROLE: &str = "*";

/// Inserts an assignment, returning false if the tuple already existed
pub(crate) async fn insert_assignment(
    conn: &mut AnyConnection,
    grant: &Grant,
    actor: &str,
    at_millis: i64,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO role_assignments (user_id, role_name, scope_name, scope_instance, granted_by, granted_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (user_id, role_name, scope_name, scope_instance) DO NOTHING
        "#,
    )
    .bind(&grant.user)
    .bind(&grant.role)
    .bind(grant.scope())
    .bind(grant.instance())
    .bind(actor)
    .bind(at_millis)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Deletes an assignment, returning false if it did not exist
pub(crate) async fn delete_assignment(conn: &mut AnyConnection, grant: &Grant) -> Result<bool> {
    let result = sqlx::query(
        r#"
        DELETE FROM role_assignments
        WHERE user_id = $1 AND role_name = $2 AND scope_name = $3 AND scope_instance = $4
        "#,
    )
    .bind(&grant.user)
    .bind(&grant.role)
    .bind(grant.scope())
    .bind(grant.instance())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub(crate) async fn select_user_roles(conn: &mut AnyConnection, user: &str) -> Result<UserRoles> {
    let rows = sqlx::query(
        r#"
        SELECT role_name, scope_name, scope_instance
        FROM role_assignments
        WHERE user_id = $1
        "#,
    )
    .bind(user)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(HeldRole {
                role: row.try_get("role_name")?,
                target: ScopeRef::new(
                    row.try_get::<String, _>("scope_name")?,
                    row.try_get::<String, _>("scope_instance")?,
                ),
            })
        })
        .collect()
}

pub(crate) async fn select_assignments(
    conn: &mut AnyConnection,
    user: &str,
) -> Result<Vec<RoleAssignment>> {
    let rows = sqlx::query(
        r#"
        SELECT user_id, role_name, scope_name, scope_instance, granted_by, granted_at
        FROM role_assignments
        WHERE user_id = $1
        ORDER BY scope_name, scope_instance, role_name
        "#,
    )
    .bind(user)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(assignment_from_row).collect()
}

pub(crate) async fn assignment_exists(conn: &mut AnyConnection, grant: &Grant) -> Result<bool> {
    let row = sqlx::query(
        r#"
        SELECT COUNT(*) AS total FROM role_assignments
        WHERE user_id = $1 AND role_name = $2 AND scope_name = $3 AND scope_instance = $4
        "#,
    )
    .bind(&grant.user)
    .bind(&grant.role)
    .bind(grant.scope())
    .bind(grant.instance())
    .fetch_one(&mut *conn)
    .await?;

    Ok(row.try_get::<i64, _>("total")? > 0)
}

/// Counts assignments at a scope instance; `role` of `"*"` counts every role
pub(crate) async fn count_roles(
    conn: &mut AnyConnection,
    scope: &str,
    instance: &str,
    role: &str,
) -> Result<i64> {
    let row = if role == ANY_ROLE {
        sqlx::query(
            "SELECT COUNT(*) AS total FROM role_assignments WHERE scope_name = $1 AND scope_instance = $2",
        )
        .bind(scope)
        .bind(instance)
        .fetch_one(&mut *conn)
        .await?
    } else {
        sqlx::query(
            r#"
            SELECT COUNT(*) AS total FROM role_assignments
            WHERE scope_name = $1 AND scope_instance = $2 AND role_name = $3
            "#,
        )
        .bind(scope)
        .bind(instance)
        .bind(role)
        .fetch_one(&mut *conn)
        .await?
    };

    Ok(row.try_get("total")?)
}

pub(crate) async fn count_all(conn: &mut AnyConnection) -> Result<i64> {
    let row = sqlx::query("SELECT COUNT(*) AS total FROM role_assignments")
        .fetch_one(&mut *conn)
        .await?;
    Ok(row.try_get("total")?)
}

pub(crate) async fn insert_event(
    conn: &mut AnyConnection,
    kind: AssignmentEventKind,
    grant: &Grant,
    actor: &str,
    at_millis: i64,
    seq: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO role_assignment_events (
            id, event_kind, user_id, role_name, scope_name, scope_instance, actor_id, occurred_at, seq
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(kind.as_str())
    .bind(&grant.user)
    .bind(&grant.role)
    .bind(grant.scope())
    .bind(grant.instance())
    .bind(actor)
    .bind(at_millis)
    .bind(seq)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub(crate) async fn select_events(
    conn: &mut AnyConnection,
    user: &str,
) -> Result<Vec<AssignmentEvent>> {
    let rows = sqlx::query(
        r#"
        SELECT id, event_kind, user_id, role_name, scope_name, scope_instance, actor_id, occurred_at
        FROM role_assignment_events
        WHERE user_id = $1
        ORDER BY occurred_at, seq
        "#,
    )
    .bind(user)
    .fetch_all(&mut *conn)
    .await?;

    let mut events = Vec::with_capacity(rows.len());
    for row in &rows {
        let kind: String = row.try_get("event_kind")?;
        let Some(kind) = AssignmentEventKind::parse(&kind) else {
            tracing::warn!("Skipping audit event with unknown kind '{}'", kind);
            continue;
        };
        events.push(AssignmentEvent {
            id: row.try_get("id")?,
            kind,
            grant: Grant::new(
                row.try_get::<String, _>("user_id")?,
                row.try_get::<String, _>("role_name")?,
                row.try_get::<String, _>("scope_name")?,
                row.try_get::<String, _>("scope_instance")?,
            ),
            actor: row.try_get("actor_id")?,
            occurred_at: from_millis(row.try_get("occurred_at")?),
        });
    }

    Ok(events)
}

fn assignment_from_row(row: &AnyRow) -> Result<RoleAssignment> {
    Ok(RoleAssignment {
        user: row.try_get("user_id")?,
        role: row.try_get("role_name")?,
        target: ScopeRef::new(
            row.try_get::<String, _>("scope_name")?,
            row.try_get::<String, _>("scope_instance")?,
        ),
        granted_by: row.try_get("granted_by")?,
        granted_at: from_millis(row.try_get("granted_at")?),
    })
}
