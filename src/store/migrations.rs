//! Version-tracked schema migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones, each inside its own
//! transaction together with its `_migrations` record.

use libsql::Connection;

use crate::error::DatabaseError;
use crate::store::traits::AppliedMigration;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "org_identity",
        sql: r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                role TEXT NOT NULL DEFAULT 'user',
                organization_type TEXT NOT NULL DEFAULT 'cvc',
                company TEXT,
                department TEXT,
                job_title TEXT,
                password_hash TEXT NOT NULL,
                force_password_change INTEGER NOT NULL DEFAULT 0,
                status TEXT,
                relationship_type TEXT,
                access_types TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_users_name ON users(name);

            CREATE TABLE IF NOT EXISTS organizations (
                name TEXT PRIMARY KEY,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            CREATE TABLE IF NOT EXISTS departments (
                name TEXT PRIMARY KEY,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            CREATE TABLE IF NOT EXISTS locations (
                name TEXT PRIMARY KEY,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS belongs_to (
                user_id TEXT NOT NULL,
                organization TEXT NOT NULL,
                PRIMARY KEY (user_id, organization)
            );
            CREATE TABLE IF NOT EXISTS member_of (
                user_id TEXT NOT NULL,
                department TEXT NOT NULL,
                PRIMARY KEY (user_id, department)
            );
            CREATE TABLE IF NOT EXISTS works_at (
                user_id TEXT NOT NULL,
                location TEXT NOT NULL,
                PRIMARY KEY (user_id, location)
            );
            CREATE TABLE IF NOT EXISTS has_access_to (
                user_id TEXT NOT NULL,
                department TEXT NOT NULL,
                PRIMARY KEY (user_id, department)
            );
            CREATE TABLE IF NOT EXISTS reports_to (
                user_id TEXT PRIMARY KEY,
                manager_id TEXT NOT NULL,
                CHECK (user_id <> manager_id)
            );
            CREATE INDEX IF NOT EXISTS idx_reports_to_manager ON reports_to(manager_id);
            CREATE TABLE IF NOT EXISTS has_department (
                organization TEXT NOT NULL,
                department TEXT NOT NULL,
                PRIMARY KEY (organization, department)
            );
        "#,
    },
    Migration {
        version: 2,
        name: "first_run_onboarding",
        sql: r#"
            CREATE TABLE IF NOT EXISTS onboarding_sessions (
                user_email TEXT PRIMARY KEY,
                state TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS first_run_onboardings (
                id TEXT PRIMARY KEY,
                user_email TEXT NOT NULL UNIQUE,
                full_name TEXT NOT NULL,
                job_role TEXT NOT NULL,
                company TEXT NOT NULL,
                department TEXT NOT NULL,
                profile_description TEXT NOT NULL,
                role_description TEXT NOT NULL,
                department_description TEXT NOT NULL,
                competencies TEXT NOT NULL DEFAULT '[]',
                primary_objective TEXT NOT NULL,
                top_challenges TEXT NOT NULL,
                org_chart_validated INTEGER NOT NULL DEFAULT 0,
                memory_level TEXT NOT NULL,
                default_visibility TEXT NOT NULL,
                source_type TEXT NOT NULL DEFAULT 'user_input',
                confidence REAL NOT NULL DEFAULT 1.0,
                version TEXT NOT NULL DEFAULT 'v1',
                status TEXT NOT NULL DEFAULT 'active',
                session_id TEXT NOT NULL,
                duration_seconds INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                completed_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS ai_profiles (
                id TEXT PRIMARY KEY,
                user_email TEXT NOT NULL UNIQUE,
                ai_experience_level TEXT NOT NULL,
                technical_path INTEGER NOT NULL DEFAULT 0,
                preferred_communication TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                source TEXT NOT NULL,
                source_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS persona_versions (
                id TEXT PRIMARY KEY,
                user_email TEXT NOT NULL,
                ai_profile_id TEXT NOT NULL,
                version TEXT NOT NULL,
                persona_summary TEXT NOT NULL,
                core_competencies TEXT NOT NULL DEFAULT '[]',
                organizational_context TEXT NOT NULL,
                primary_goals TEXT NOT NULL,
                key_challenges TEXT NOT NULL,
                status TEXT NOT NULL,
                is_current INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                UNIQUE (user_email, version)
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_persona_versions_current
                ON persona_versions(user_email) WHERE is_current = 1;

            CREATE TABLE IF NOT EXISTS competencies (
                name TEXT PRIMARY KEY,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS user_competencies (
                user_email TEXT NOT NULL,
                competency TEXT NOT NULL,
                source TEXT NOT NULL,
                source_id TEXT NOT NULL,
                confidence REAL NOT NULL DEFAULT 1.0,
                declared_at TEXT NOT NULL,
                PRIMARY KEY (user_email, competency)
            );
        "#,
    },
    Migration {
        version: 3,
        name: "position_validation_and_company_profile",
        sql: r#"
            ALTER TABLE users ADD COLUMN position_validated INTEGER NOT NULL DEFAULT 0;
            ALTER TABLE users ADD COLUMN position_validated_at TEXT;

            CREATE TABLE IF NOT EXISTS org_chart_issues (
                id TEXT PRIMARY KEY,
                user_email TEXT NOT NULL,
                description TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'open',
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_org_chart_issues_status ON org_chart_issues(status);

            ALTER TABLE organizations ADD COLUMN description TEXT;
            ALTER TABLE organizations ADD COLUMN industry TEXT;
            ALTER TABLE organizations ADD COLUMN size TEXT;
            ALTER TABLE organizations ADD COLUMN mission TEXT;
            ALTER TABLE organizations ADD COLUMN vision TEXT;
            ALTER TABLE organizations ADD COLUMN "values" TEXT NOT NULL DEFAULT '[]';
            ALTER TABLE organizations ADD COLUMN updated_by TEXT;
            ALTER TABLE organizations ADD COLUMN updated_at TEXT;
        "#,
    },
];

/// Latest schema version this build knows about.
pub fn latest_version() -> i64 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

/// Run all pending migrations against the given connection.
///
/// Creates the `_migrations` table if it doesn't exist. Returns the
/// migrations applied by this call.
pub async fn run_migrations(conn: &Connection) -> Result<Vec<AppliedMigration>, DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;
    let mut applied = Vec::new();

    for migration in MIGRATIONS {
        if migration.version <= current_version {
            continue;
        }
        tracing::info!(
            version = migration.version,
            name = migration.name,
            "Applying migration"
        );
        let tx = conn.transaction().await.map_err(|e| {
            DatabaseError::Migration(format!("V{}: failed to begin: {e}", migration.version))
        })?;
        tx.execute_batch(migration.sql).await.map_err(|e| {
            DatabaseError::Migration(format!(
                "Migration V{} ({}) failed: {e}",
                migration.version, migration.name
            ))
        })?;
        seed_version(&tx, migration.version, migration.name).await?;
        tx.commit().await.map_err(|e| {
            DatabaseError::Migration(format!("V{}: failed to commit: {e}", migration.version))
        })?;
        applied.push(AppliedMigration {
            version: migration.version,
            name: migration.name.to_string(),
        });
    }

    let version = get_current_version(conn).await?;
    tracing::info!(
        version,
        applied = applied.len(),
        "Database migrations complete"
    );

    Ok(applied)
}

/// Get the highest applied migration version, or 0 if none.
pub async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => {
            let version: i64 = row.get(0).map_err(|e| {
                DatabaseError::Migration(format!("Failed to parse migration version: {e}"))
            })?;
            Ok(version)
        }
        None => Ok(0),
    }
}

/// Insert a version record into `_migrations`.
async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_conn() -> Connection {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .unwrap();
        db.connect().unwrap()
    }

    async fn table_exists(conn: &Connection, table: &str) -> bool {
        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                libsql::params![table],
            )
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        row.get::<i64>(0).unwrap() == 1
    }

    #[tokio::test]
    async fn migrations_create_all_tables() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();

        for table in &[
            "_migrations",
            "users",
            "organizations",
            "departments",
            "locations",
            "belongs_to",
            "member_of",
            "works_at",
            "has_access_to",
            "reports_to",
            "has_department",
            "onboarding_sessions",
            "first_run_onboardings",
            "ai_profiles",
            "persona_versions",
            "competencies",
            "user_competencies",
            "org_chart_issues",
        ] {
            assert!(table_exists(&conn, table).await, "Table '{table}' should exist");
        }
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let conn = test_conn().await;
        let first = run_migrations(&conn).await.unwrap();
        assert_eq!(first.len(), MIGRATIONS.len());

        let second = run_migrations(&conn).await.unwrap();
        assert!(second.is_empty());

        let version = get_current_version(&conn).await.unwrap();
        assert_eq!(version, latest_version());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn migrations_run_on_spawned_task() {
        let conn = test_conn().await;
        let applied = tokio::spawn(async move { run_migrations(&conn).await })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(applied.len(), MIGRATIONS.len());
    }

    #[tokio::test]
    async fn version_tracking() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();

        let mut rows = conn
            .query("SELECT version, name FROM _migrations ORDER BY version", ())
            .await
            .unwrap();
        let mut seen = Vec::new();
        while let Some(row) = rows.next().await.unwrap() {
            let v: i64 = row.get(0).unwrap();
            let n: String = row.get(1).unwrap();
            seen.push((v, n));
        }
        assert_eq!(
            seen,
            vec![
                (1, "org_identity".to_string()),
                (2, "first_run_onboarding".to_string()),
                (3, "position_validation_and_company_profile".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn resumes_from_partial_schema() {
        let conn = test_conn().await;
        conn.execute(
            "CREATE TABLE _migrations (version INTEGER PRIMARY KEY, name TEXT NOT NULL, applied_at TEXT NOT NULL DEFAULT (datetime('now')))",
            (),
        )
        .await
        .unwrap();
        conn.execute_batch(MIGRATIONS[0].sql).await.unwrap();
        seed_version(&conn, 1, "org_identity").await.unwrap();

        let applied = run_migrations(&conn).await.unwrap();
        let versions: Vec<i64> = applied.iter().map(|m| m.version).collect();
        assert_eq!(versions, vec![2, 3]);
        assert!(table_exists(&conn, "org_chart_issues").await);
    }

    #[tokio::test]
    async fn one_current_persona_per_user() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();
        let insert = "INSERT INTO persona_versions (id, user_email, ai_profile_id, version, persona_summary, organizational_context, primary_goals, key_challenges, status, is_current, created_at) VALUES (?1, 'a@b.com', 'p', ?2, '', '', '', '', 'active', 1, '2026-01-01')";
        conn.execute(insert, libsql::params!["1", "v1"]).await.unwrap();
        assert!(conn.execute(insert, libsql::params!["2", "v2"]).await.is_err());
    }
}
