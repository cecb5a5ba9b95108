//! Schema migrations for the assignment store
//!
//! Each migration runs in its own transaction and is recorded in
//! `rolegate_schema_migrations`, so running the set on every startup only
//! applies what is missing. Statements are portable between PostgreSQL and
//! SQLite.

use std::collections::HashSet;

use sqlx::{AnyConnection, Connection, Row};
use tracing::{debug, info};

use crate::error::Result;

struct Migration {
    version: i64,
    description: &'static str,
    statements: &'static [&'static str],
}

const CREATE_MIGRATIONS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS rolegate_schema_migrations (
        version BIGINT PRIMARY KEY,
        description VARCHAR(255) NOT NULL,
        applied_at BIGINT NOT NULL
    )
"#;

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create role_assignments",
        statements: &[
            r#"
            CREATE TABLE IF NOT EXISTS role_assignments (
                user_id VARCHAR(255) NOT NULL,
                role_name VARCHAR(255) NOT NULL,
                scope_name VARCHAR(255) NOT NULL,
                scope_instance VARCHAR(255) NOT NULL,
                granted_by VARCHAR(255) NOT NULL,
                granted_at BIGINT NOT NULL,
                PRIMARY KEY (user_id, role_name, scope_name, scope_instance)
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_role_assignments_scope ON role_assignments (scope_name, scope_instance, role_name)",
        ],
    },
    Migration {
        version: 2,
        description: "create role_assignment_events",
        statements: &[
            r#"
            CREATE TABLE IF NOT EXISTS role_assignment_events (
                id VARCHAR(36) PRIMARY KEY,
                event_kind VARCHAR(16) NOT NULL,
                user_id VARCHAR(255) NOT NULL,
                role_name VARCHAR(255) NOT NULL,
                scope_name VARCHAR(255) NOT NULL,
                scope_instance VARCHAR(255) NOT NULL,
                actor_id VARCHAR(255) NOT NULL,
                occurred_at BIGINT NOT NULL,
                seq BIGINT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_role_assignment_events_user ON role_assignment_events (user_id, occurred_at, seq)",
        ],
    },
];

/// Number of migrations this build knows about
pub fn known_migrations() -> usize {
    MIGRATIONS.len()
}

/// Applies pending migrations, returning how many were applied by this call
pub(crate) async fn run(conn: &mut AnyConnection) -> Result<usize> {
    sqlx::query(CREATE_MIGRATIONS_TABLE).execute(&mut *conn).await?;

    let applied: HashSet<i64> = sqlx::query("SELECT version FROM rolegate_schema_migrations")
        .fetch_all(&mut *conn)
        .await?
        .iter()
        .map(|row| row.try_get::<i64, _>("version"))
        .collect::<std::result::Result<_, _>>()?;

    let mut count = 0;
    for migration in MIGRATIONS {
        if applied.contains(&migration.version) {
            debug!("Migration {} already applied", migration.version);
            continue;
        }

        let mut tx = conn.begin().await?;
        for statement in migration.statements {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        let recorded = sqlx::query(
            r#"
            INSERT INTO rolegate_schema_migrations (version, description, applied_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (version) DO NOTHING
            "#,
        )
        .bind(migration.version)
        .bind(migration.description)
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(&mut *tx)
        .await?
        .rows_affected();
        tx.commit().await?;

        // A concurrent startup may have recorded it first
        if recorded > 0 {
            info!("Applied migration {}: {}", migration.version, migration.description);
            count += 1;
        }
    }

    Ok(count)
}
