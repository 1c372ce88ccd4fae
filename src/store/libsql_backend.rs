//! libSQL backend — relational rendition of the knowledge graph.
//!
//! Nodes become tables keyed by their natural identity (email, name) and
//! relationships become link tables named after the edge they mirror
//! (`member_of`, `reports_to`, ...). Supports local file and in-memory
//! databases.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::params::IntoParams;
use libsql::{Connection, Database as LibSqlDatabase, params};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::company::model::{
    CompanyProfile, CompanyProfileUpdate, DepartmentSummary, OrganizationalStructure, ProfileData,
};
use crate::error::DatabaseError;
use crate::onboarding::model::{
    AiProfile, CompetencyLink, CompletionOutcome, FirstRunOnboarding, FirstRunRecord,
    PersonaVersion, SOURCE_FIRST_RUN, persona_version_label,
};
use crate::orgchart::model::{OrgChartIssue, OrgChartView, PersonRef};
use crate::store::migrations;
use crate::store::parse_datetime;
use crate::store::traits::{AppliedMigration, GraphCounts, GraphStore};
use crate::users::model::{
    NewUser, Role, RosterUser, UpsertOutcome, User, UserUpdate, normalize_email,
};

/// Longest `REPORTS_TO` chain followed when computing hierarchy levels.
const MAX_HIERARCHY_DEPTH: u32 = 64;

/// libSQL database backend.
///
/// One connection guarded by an async mutex. A transaction belongs to the
/// connection, not to the caller, so every operation holds the lock until
/// it is done; an in-memory database also only exists on that connection.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Mutex<Connection>,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn: Mutex::new(conn),
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn: Mutex::new(conn),
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    /// Lock the connection. Never call another locking method while the
    /// guard is alive.
    async fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().await
    }

    async fn require_user_id(&self, email: &str) -> Result<String, DatabaseError> {
        let email = normalize_email(email);
        user_id_for(&*self.conn().await, &email)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "User".into(),
                id: email,
            })
    }
}

// ── Helper functions ────────────────────────────────────────────────

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn json_list(values: &[String]) -> Result<String, DatabaseError> {
    serde_json::to_string(values).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

fn parse_json_list(s: &str) -> Vec<String> {
    serde_json::from_str(s).unwrap_or_default()
}

fn text(row: &libsql::Row, idx: i32) -> String {
    row.get::<String>(idx).unwrap_or_default()
}

fn opt(row: &libsql::Row, idx: i32) -> Option<String> {
    row.get::<Option<String>>(idx).ok().flatten()
}

fn flag(row: &libsql::Row, idx: i32) -> bool {
    row.get::<i64>(idx).unwrap_or(0) != 0
}

const USER_COLUMNS: &str = "id, email, name, role, organization_type, company, department, job_title, password_hash, force_password_change, status, relationship_type, access_types, position_validated, position_validated_at, created_at, updated_at";

/// Same columns, qualified with the `u` alias for joins.
const USER_COLUMNS_U: &str = "u.id, u.email, u.name, u.role, u.organization_type, u.company, u.department, u.job_title, u.password_hash, u.force_password_change, u.status, u.relationship_type, u.access_types, u.position_validated, u.position_validated_at, u.created_at, u.updated_at";

fn row_to_user(row: &libsql::Row) -> Result<User, DatabaseError> {
    let id: String = row
        .get(0)
        .map_err(|e| DatabaseError::Query(format!("row_to_user: {e}")))?;
    Ok(User {
        id,
        email: text(row, 1),
        name: text(row, 2),
        role: Role::from_label(&text(row, 3)),
        organization_type: text(row, 4).parse().unwrap_or_default(),
        company: opt(row, 5),
        department: opt(row, 6),
        job_title: opt(row, 7),
        password_hash: text(row, 8),
        force_password_change: flag(row, 9),
        status: opt(row, 10),
        relationship_type: opt(row, 11),
        access_types: parse_json_list(&text(row, 12)),
        position_validated: flag(row, 13),
        position_validated_at: parse_optional_datetime(&opt(row, 14)),
        created_at: parse_datetime(&text(row, 15)),
        updated_at: parse_datetime(&text(row, 16)),
    })
}

fn person_ref(user: &User) -> PersonRef {
    PersonRef {
        id: user.id.clone(),
        email: user.email.clone(),
        name: user.name.clone(),
        job_title: user.job_title.clone(),
        department: user.department.clone(),
    }
}

const FRO_COLUMNS: &str = "id, user_email, full_name, job_role, company, department, profile_description, role_description, department_description, competencies, primary_objective, top_challenges, org_chart_validated, memory_level, default_visibility, source_type, confidence, version, status, session_id, duration_seconds, created_at, completed_at, updated_at";

fn row_to_first_run(row: &libsql::Row) -> Result<FirstRunOnboarding, DatabaseError> {
    let id: String = row
        .get(0)
        .map_err(|e| DatabaseError::Query(format!("row_to_first_run: {e}")))?;
    Ok(FirstRunOnboarding {
        id,
        user_email: text(row, 1),
        full_name: text(row, 2),
        job_role: text(row, 3),
        company: text(row, 4),
        department: text(row, 5),
        profile_description: text(row, 6),
        role_description: text(row, 7),
        department_description: text(row, 8),
        competencies: parse_json_list(&text(row, 9)),
        primary_objective: text(row, 10),
        top_challenges: text(row, 11),
        org_chart_validated: flag(row, 12),
        memory_level: text(row, 13),
        default_visibility: text(row, 14),
        source_type: text(row, 15),
        confidence: row.get::<f64>(16).unwrap_or(1.0),
        version: text(row, 17),
        status: text(row, 18),
        session_id: text(row, 19),
        duration_seconds: row.get::<i64>(20).unwrap_or(0),
        created_at: parse_datetime(&text(row, 21)),
        completed_at: parse_datetime(&text(row, 22)),
        updated_at: parse_datetime(&text(row, 23)),
    })
}

const PERSONA_COLUMNS: &str = "id, version, persona_summary, core_competencies, organizational_context, primary_goals, key_challenges, status, created_at";

fn row_to_persona(row: &libsql::Row) -> Result<PersonaVersion, DatabaseError> {
    let id: String = row
        .get(0)
        .map_err(|e| DatabaseError::Query(format!("row_to_persona: {e}")))?;
    Ok(PersonaVersion {
        id,
        version: text(row, 1),
        persona_summary: text(row, 2),
        core_competencies: parse_json_list(&text(row, 3)),
        organizational_context: text(row, 4),
        primary_goals: text(row, 5),
        key_challenges: text(row, 6),
        status: text(row, 7),
        created_at: parse_datetime(&text(row, 8)),
    })
}

const ORG_COLUMNS: &str =
    r#"name, description, industry, size, mission, vision, "values", updated_by, updated_at"#;

fn row_to_company(row: &libsql::Row) -> Result<CompanyProfile, DatabaseError> {
    let name: String = row
        .get(0)
        .map_err(|e| DatabaseError::Query(format!("row_to_company: {e}")))?;
    Ok(CompanyProfile {
        name,
        description: opt(row, 1),
        industry: opt(row, 2),
        size: opt(row, 3),
        mission: opt(row, 4),
        vision: opt(row, 5),
        values: parse_json_list(&text(row, 6)),
        updated_by: opt(row, 7),
        updated_at: parse_optional_datetime(&opt(row, 8)),
    })
}

fn row_to_issue(row: &libsql::Row) -> Result<OrgChartIssue, DatabaseError> {
    let id: String = row
        .get(0)
        .map_err(|e| DatabaseError::Query(format!("row_to_issue: {e}")))?;
    Ok(OrgChartIssue {
        id,
        user_email: text(row, 1),
        description: text(row, 2),
        status: text(row, 3),
        created_at: parse_datetime(&text(row, 4)),
    })
}

/// Run a query and map every row.
async fn fetch_all<T>(
    conn: &Connection,
    sql: &str,
    params: impl IntoParams,
    ctx: &str,
    map: fn(&libsql::Row) -> Result<T, DatabaseError>,
) -> Result<Vec<T>, DatabaseError> {
    let mut rows = conn
        .query(sql, params)
        .await
        .map_err(|e| DatabaseError::Query(format!("{ctx}: {e}")))?;
    let mut out = Vec::new();
    loop {
        match rows.next().await {
            Ok(Some(row)) => out.push(map(&row)?),
            Ok(None) => break,
            Err(e) => return Err(DatabaseError::Query(format!("{ctx}: {e}"))),
        }
    }
    Ok(out)
}

/// Run a query and map the first row, if any.
async fn fetch_optional<T>(
    conn: &Connection,
    sql: &str,
    params: impl IntoParams,
    ctx: &str,
    map: fn(&libsql::Row) -> Result<T, DatabaseError>,
) -> Result<Option<T>, DatabaseError> {
    let mut rows = conn
        .query(sql, params)
        .await
        .map_err(|e| DatabaseError::Query(format!("{ctx}: {e}")))?;
    match rows.next().await {
        Ok(Some(row)) => Ok(Some(map(&row)?)),
        Ok(None) => Ok(None),
        Err(e) => Err(DatabaseError::Query(format!("{ctx}: {e}"))),
    }
}

async fn scalar_i64(
    conn: &Connection,
    sql: &str,
    params: impl IntoParams,
    ctx: &str,
) -> Result<i64, DatabaseError> {
    let value = fetch_optional(conn, sql, params, ctx, |row| {
        Ok(row.get::<i64>(0).unwrap_or(0))
    })
    .await?;
    Ok(value.unwrap_or(0))
}

fn first_text(row: &libsql::Row) -> Result<String, DatabaseError> {
    row.get::<String>(0)
        .map_err(|e| DatabaseError::Query(format!("first_text: {e}")))
}

async fn user_id_for(conn: &Connection, email: &str) -> Result<Option<String>, DatabaseError> {
    fetch_optional(
        conn,
        "SELECT id FROM users WHERE email = ?1",
        params![email],
        "user_id_for",
        first_text,
    )
    .await
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl GraphStore for LibSqlBackend {
    fn backend_name(&self) -> &'static str {
        "libsql"
    }

    async fn run_migrations(&self) -> Result<Vec<AppliedMigration>, DatabaseError> {
        migrations::run_migrations(&*self.conn().await).await
    }

    async fn schema_version(&self) -> Result<i64, DatabaseError> {
        migrations::get_current_version(&*self.conn().await).await
    }

    // ── Users ───────────────────────────────────────────────────────

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, DatabaseError> {
        fetch_optional(
            &*self.conn().await,
            &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
            params![normalize_email(email)],
            "find_user_by_email",
            row_to_user,
        )
        .await
    }

    async fn find_user_by_id(&self, id: &str) -> Result<Option<User>, DatabaseError> {
        fetch_optional(
            &*self.conn().await,
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            params![id],
            "find_user_by_id",
            row_to_user,
        )
        .await
    }

    async fn create_user(&self, user: &NewUser) -> Result<User, DatabaseError> {
        let guard = self.conn().await;
        let conn = &*guard;
        let email = normalize_email(&user.email);
        if user_id_for(conn, &email).await?.is_some() {
            return Err(DatabaseError::Constraint(format!(
                "user with email {email} already exists"
            )));
        }

        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO users (id, email, name, role, organization_type, company, department, job_title, password_hash, force_password_change, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
            params![
                id.clone(),
                email.clone(),
                user.name.trim(),
                user.role.as_str(),
                user.organization_type.as_str(),
                opt_text(user.company.as_deref()),
                opt_text(user.department.as_deref()),
                opt_text(user.job_title.as_deref()),
                user.password_hash.clone(),
                user.force_password_change as i64,
                now,
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("create_user: {e}")))?;
        drop(guard);

        debug!(email = %email, "User created");
        self.find_user_by_id(&id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "User".into(),
                id,
            })
    }

    async fn upsert_roster_user(
        &self,
        entry: &RosterUser,
        default_password_hash: &str,
    ) -> Result<UpsertOutcome, DatabaseError> {
        let guard = self.conn().await;
        let conn = &*guard;
        let email = normalize_email(&entry.email);
        let now = Utc::now().to_rfc3339();
        let access_types = json_list(&entry.access_types)?;

        if let Some(id) = user_id_for(conn, &email).await? {
            conn.execute(
                "UPDATE users SET name = ?2, company = ?3, job_title = ?4, department = ?5, status = ?6, relationship_type = ?7, access_types = ?8,
                    role = CASE WHEN lower(role) IN ('admin', 'administrador') THEN role ELSE ?9 END,
                    updated_at = ?10
                 WHERE id = ?1",
                params![
                    id.clone(),
                    entry.name.clone(),
                    entry.company.clone(),
                    entry.job_title.clone(),
                    entry.department.clone(),
                    entry.status.clone(),
                    entry.relationship_type.clone(),
                    access_types,
                    entry.role.as_str(),
                    now,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_roster_user: {e}")))?;
            return Ok(UpsertOutcome {
                user_id: id,
                created: false,
            });
        }

        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO users (id, email, name, role, organization_type, company, department, job_title, password_hash, force_password_change, status, relationship_type, access_types, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, 'cvc', ?5, ?6, ?7, ?8, 1, ?9, ?10, ?11, ?12, ?12)",
            params![
                id.clone(),
                email,
                entry.name.clone(),
                entry.role.as_str(),
                entry.company.clone(),
                entry.department.clone(),
                entry.job_title.clone(),
                default_password_hash,
                entry.status.clone(),
                entry.relationship_type.clone(),
                access_types,
                now,
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("upsert_roster_user: {e}")))?;

        Ok(UpsertOutcome {
            user_id: id,
            created: true,
        })
    }

    async fn update_user(
        &self,
        id: &str,
        update: &UserUpdate,
    ) -> Result<Option<User>, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let count = self
            .conn()
            .await
            .execute(
                "UPDATE users SET
                    name = COALESCE(?2, name),
                    role = COALESCE(?3, role),
                    organization_type = COALESCE(?4, organization_type),
                    company = COALESCE(?5, company),
                    department = COALESCE(?6, department),
                    job_title = COALESCE(?7, job_title),
                    status = COALESCE(?8, status),
                    updated_at = ?9
                 WHERE id = ?1",
                params![
                    id,
                    opt_text(update.name.as_deref()),
                    opt_text(update.role.map(|r| r.as_str())),
                    opt_text(update.organization_type.map(|o| o.as_str())),
                    opt_text(update.company.as_deref()),
                    opt_text(update.department.as_deref()),
                    opt_text(update.job_title.as_deref()),
                    opt_text(update.status.as_deref()),
                    now,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_user: {e}")))?;
        if count == 0 {
            return Ok(None);
        }
        self.find_user_by_id(id).await
    }

    async fn delete_user(&self, id: &str) -> Result<bool, DatabaseError> {
        let Some(user) = self.find_user_by_id(id).await? else {
            return Ok(false);
        };
        let guard = self.conn().await;
        let tx = guard
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_user: {e}")))?;
        let by_id = [
            "DELETE FROM belongs_to WHERE user_id = ?1",
            "DELETE FROM member_of WHERE user_id = ?1",
            "DELETE FROM works_at WHERE user_id = ?1",
            "DELETE FROM has_access_to WHERE user_id = ?1",
            "DELETE FROM reports_to WHERE user_id = ?1 OR manager_id = ?1",
            "DELETE FROM users WHERE id = ?1",
        ];
        for sql in by_id {
            tx.execute(sql, params![user.id.clone()])
                .await
                .map_err(|e| DatabaseError::Query(format!("delete_user: {e}")))?;
        }
        let by_email = [
            "DELETE FROM onboarding_sessions WHERE user_email = ?1",
            "DELETE FROM user_competencies WHERE user_email = ?1",
            "DELETE FROM persona_versions WHERE user_email = ?1",
            "DELETE FROM ai_profiles WHERE user_email = ?1",
            "DELETE FROM first_run_onboardings WHERE user_email = ?1",
        ];
        for sql in by_email {
            tx.execute(sql, params![user.email.clone()])
                .await
                .map_err(|e| DatabaseError::Query(format!("delete_user: {e}")))?;
        }
        tx.commit()
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_user: {e}")))?;
        Ok(true)
    }

    async fn list_users(&self) -> Result<Vec<User>, DatabaseError> {
        fetch_all(
            &*self.conn().await,
            &format!("SELECT {USER_COLUMNS} FROM users ORDER BY name, email"),
            (),
            "list_users",
            row_to_user,
        )
        .await
    }

    async fn sample_users(&self, limit: usize) -> Result<Vec<User>, DatabaseError> {
        fetch_all(
            &*self.conn().await,
            &format!("SELECT {USER_COLUMNS} FROM users ORDER BY name, email LIMIT ?1"),
            params![limit as i64],
            "sample_users",
            row_to_user,
        )
        .await
    }

    async fn set_password(
        &self,
        email: &str,
        password_hash: &str,
        force_change: bool,
    ) -> Result<bool, DatabaseError> {
        let count = self
            .conn()
            .await
            .execute(
                "UPDATE users SET password_hash = ?2, force_password_change = ?3, updated_at = ?4 WHERE email = ?1",
                params![
                    normalize_email(email),
                    password_hash,
                    force_change as i64,
                    Utc::now().to_rfc3339()
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_password: {e}")))?;
        Ok(count > 0)
    }

    // ── Org structure ───────────────────────────────────────────────

    async fn link_organization(
        &self,
        email: &str,
        organization: &str,
    ) -> Result<(), DatabaseError> {
        let user_id = self.require_user_id(email).await?;
        let guard = self.conn().await;
        let conn = &*guard;
        conn.execute(
            "INSERT OR IGNORE INTO organizations (name) VALUES (?1)",
            params![organization],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("link_organization: {e}")))?;
        conn.execute(
            "INSERT OR IGNORE INTO belongs_to (user_id, organization) VALUES (?1, ?2)",
            params![user_id, organization],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("link_organization: {e}")))?;
        Ok(())
    }

    async fn link_department(&self, email: &str, department: &str) -> Result<(), DatabaseError> {
        let user_id = self.require_user_id(email).await?;
        let guard = self.conn().await;
        let conn = &*guard;
        conn.execute(
            "INSERT OR IGNORE INTO departments (name) VALUES (?1)",
            params![department],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("link_department: {e}")))?;
        conn.execute(
            "INSERT OR IGNORE INTO member_of (user_id, department) VALUES (?1, ?2)",
            params![user_id, department],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("link_department: {e}")))?;
        Ok(())
    }

    async fn link_location(&self, email: &str, location: &str) -> Result<(), DatabaseError> {
        let user_id = self.require_user_id(email).await?;
        let guard = self.conn().await;
        let conn = &*guard;
        conn.execute(
            "INSERT OR IGNORE INTO locations (name) VALUES (?1)",
            params![location],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("link_location: {e}")))?;
        conn.execute(
            "INSERT OR IGNORE INTO works_at (user_id, location) VALUES (?1, ?2)",
            params![user_id, location],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("link_location: {e}")))?;
        Ok(())
    }

    async fn replace_access_areas(
        &self,
        email: &str,
        areas: &[String],
    ) -> Result<usize, DatabaseError> {
        let user_id = self.require_user_id(email).await?;
        let guard = self.conn().await;
        let tx = guard
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("replace_access_areas: {e}")))?;
        tx.execute(
            "DELETE FROM has_access_to WHERE user_id = ?1",
            params![user_id.clone()],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("replace_access_areas: {e}")))?;
        for area in areas.iter().map(|a| a.trim()).filter(|a| !a.is_empty()) {
            tx.execute(
                "INSERT OR IGNORE INTO departments (name) VALUES (?1)",
                params![area],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("replace_access_areas: {e}")))?;
            tx.execute(
                "INSERT OR IGNORE INTO has_access_to (user_id, department) VALUES (?1, ?2)",
                params![user_id.clone(), area],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("replace_access_areas: {e}")))?;
        }
        let count = scalar_i64(
            &tx,
            "SELECT COUNT(*) FROM has_access_to WHERE user_id = ?1",
            params![user_id],
            "replace_access_areas",
        )
        .await?;
        tx.commit()
            .await
            .map_err(|e| DatabaseError::Query(format!("replace_access_areas: {e}")))?;
        Ok(count as usize)
    }

    async fn set_manager(&self, email: &str, manager_email: &str) -> Result<bool, DatabaseError> {
        let email = normalize_email(email);
        let manager_email = normalize_email(manager_email);
        if email == manager_email {
            return Ok(false);
        }
        let guard = self.conn().await;
        let conn = &*guard;
        let (Some(user_id), Some(manager_id)) = (
            user_id_for(conn, &email).await?,
            user_id_for(conn, &manager_email).await?,
        ) else {
            return Ok(false);
        };
        conn.execute(
            "INSERT INTO reports_to (user_id, manager_id) VALUES (?1, ?2)
             ON CONFLICT (user_id) DO UPDATE SET manager_id = excluded.manager_id",
            params![user_id, manager_id],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("set_manager: {e}")))?;
        Ok(true)
    }

    async fn link_organization_departments(&self) -> Result<usize, DatabaseError> {
        let count = self
            .conn()
            .await
            .execute(
                "INSERT OR IGNORE INTO has_department (organization, department)
                 SELECT DISTINCT b.organization, m.department
                 FROM belongs_to b JOIN member_of m ON m.user_id = b.user_id",
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("link_organization_departments: {e}")))?;
        Ok(count as usize)
    }

    async fn graph_counts(&self) -> Result<GraphCounts, DatabaseError> {
        let counts = fetch_optional(
            &*self.conn().await,
            "SELECT
                (SELECT COUNT(*) FROM users),
                (SELECT COUNT(*) FROM departments),
                (SELECT COUNT(*) FROM organizations),
                (SELECT COUNT(*) FROM locations),
                (SELECT COUNT(*) FROM member_of),
                (SELECT COUNT(*) FROM has_access_to),
                (SELECT COUNT(*) FROM belongs_to),
                (SELECT COUNT(*) FROM works_at),
                (SELECT COUNT(*) FROM reports_to)",
            (),
            "graph_counts",
            |row| {
                let n = |i: i32| row.get::<i64>(i).unwrap_or(0).max(0) as u64;
                Ok(GraphCounts {
                    users: n(0),
                    departments: n(1),
                    organizations: n(2),
                    locations: n(3),
                    member_of: n(4),
                    has_access_to: n(5),
                    belongs_to: n(6),
                    works_at: n(7),
                    reports_to: n(8),
                })
            },
        )
        .await?;
        Ok(counts.unwrap_or_default())
    }

    // ── Org chart ───────────────────────────────────────────────────

    async fn org_chart(&self, email: &str) -> Result<Option<OrgChartView>, DatabaseError> {
        let Some(user) = self.find_user_by_email(email).await? else {
            return Ok(None);
        };
        let guard = self.conn().await;
        let conn = &*guard;

        let manager = fetch_optional(
            conn,
            &format!(
                "SELECT {USER_COLUMNS_U} FROM reports_to r JOIN users u ON u.id = r.manager_id WHERE r.user_id = ?1"
            ),
            params![user.id.clone()],
            "org_chart",
            row_to_user,
        )
        .await?;

        let peers = match &manager {
            Some(m) => fetch_all(
                conn,
                &format!(
                    "SELECT {USER_COLUMNS_U} FROM reports_to r JOIN users u ON u.id = r.user_id WHERE r.manager_id = ?1 AND r.user_id <> ?2 ORDER BY u.name"
                ),
                params![m.id.clone(), user.id.clone()],
                "org_chart",
                row_to_user,
            )
            .await?,
            None => Vec::new(),
        };

        let subordinates = fetch_all(
            conn,
            &format!(
                "SELECT {USER_COLUMNS_U} FROM reports_to r JOIN users u ON u.id = r.user_id WHERE r.manager_id = ?1 ORDER BY u.name"
            ),
            params![user.id.clone()],
            "org_chart",
            row_to_user,
        )
        .await?;

        // Walk up the chain; cycles in imported data stop the walk.
        let mut hierarchy_level = 0;
        let mut visited = HashSet::from([user.id.clone()]);
        let mut cursor = user.id.clone();
        while hierarchy_level < MAX_HIERARCHY_DEPTH {
            let next = fetch_optional(
                conn,
                "SELECT manager_id FROM reports_to WHERE user_id = ?1",
                params![cursor.clone()],
                "org_chart",
                first_text,
            )
            .await?;
            match next {
                Some(id) if visited.insert(id.clone()) => {
                    hierarchy_level += 1;
                    cursor = id;
                }
                _ => break,
            }
        }

        Ok(Some(OrgChartView {
            user: person_ref(&user),
            manager: manager.as_ref().map(person_ref),
            peers: peers.iter().map(person_ref).collect(),
            subordinates: subordinates.iter().map(person_ref).collect(),
            hierarchy_level,
            validated_by_user: user.position_validated,
            validated_at: user.position_validated_at,
        }))
    }

    async fn mark_position_validated(
        &self,
        email: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let count = self
            .conn()
            .await
            .execute(
                "UPDATE users SET position_validated = 1, position_validated_at = ?2, updated_at = ?2 WHERE email = ?1",
                params![normalize_email(email), at.to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("mark_position_validated: {e}")))?;
        Ok(count > 0)
    }

    async fn record_org_chart_issue(
        &self,
        email: &str,
        description: &str,
    ) -> Result<OrgChartIssue, DatabaseError> {
        self.require_user_id(email).await?;
        let issue = OrgChartIssue {
            id: Uuid::new_v4().to_string(),
            user_email: normalize_email(email),
            description: description.trim().to_string(),
            status: "open".into(),
            created_at: Utc::now(),
        };
        self.conn()
            .await
            .execute(
                "INSERT INTO org_chart_issues (id, user_email, description, status, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    issue.id.clone(),
                    issue.user_email.clone(),
                    issue.description.clone(),
                    issue.status.clone(),
                    issue.created_at.to_rfc3339()
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record_org_chart_issue: {e}")))?;
        Ok(issue)
    }

    async fn list_org_chart_issues(&self) -> Result<Vec<OrgChartIssue>, DatabaseError> {
        fetch_all(
            &*self.conn().await,
            "SELECT id, user_email, description, status, created_at FROM org_chart_issues WHERE status = 'open' ORDER BY created_at DESC",
            (),
            "list_org_chart_issues",
            row_to_issue,
        )
        .await
    }

    // ── Onboarding ──────────────────────────────────────────────────

    async fn get_session(&self, email: &str) -> Result<Option<serde_json::Value>, DatabaseError> {
        let raw = fetch_optional(
            &*self.conn().await,
            "SELECT state FROM onboarding_sessions WHERE user_email = ?1",
            params![normalize_email(email)],
            "get_session",
            first_text,
        )
        .await?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                warn!(email = %normalize_email(email), error = %e, "Discarding unreadable onboarding session");
                Ok(None)
            }
        }
    }

    async fn save_session(
        &self,
        email: &str,
        session: &serde_json::Value,
    ) -> Result<(), DatabaseError> {
        let state = serde_json::to_string(session)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        self.conn()
            .await
            .execute(
                "INSERT INTO onboarding_sessions (user_email, state, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT (user_email) DO UPDATE SET state = ?2, updated_at = ?3",
                params![normalize_email(email), state, Utc::now().to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("save_session: {e}")))?;
        Ok(())
    }

    async fn record_first_run_onboarding(
        &self,
        record: &FirstRunRecord,
    ) -> Result<CompletionOutcome, DatabaseError> {
        let email = normalize_email(&record.user_email);
        let now = Utc::now().to_rfc3339();
        let completed_at = record.completed_at.to_rfc3339();
        let competencies = json_list(&record.competencies)?;
        let err = |e: libsql::Error| DatabaseError::Query(format!("record_first_run_onboarding: {e}"));

        let guard = self.conn().await;
        let tx = guard.transaction().await.map_err(err)?;

        // FirstRunOnboarding: one per email, updated in place on resubmission.
        let existing = fetch_optional(
            &tx,
            "SELECT id FROM first_run_onboardings WHERE user_email = ?1",
            params![email.clone()],
            "record_first_run_onboarding",
            first_text,
        )
        .await?;
        let created = existing.is_none();
        let first_run_id = existing.unwrap_or_else(|| record.id.clone());

        tx.execute(
            "INSERT INTO first_run_onboardings (id, user_email, full_name, job_role, company, department, profile_description, role_description, department_description, competencies, primary_objective, top_challenges, org_chart_validated, memory_level, default_visibility, source_type, confidence, version, status, session_id, duration_seconds, created_at, completed_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, 'user_input', 1.0, 'v1', 'active', ?16, ?17, ?18, ?19, ?18)
             ON CONFLICT (user_email) DO UPDATE SET
                full_name = excluded.full_name, job_role = excluded.job_role, company = excluded.company,
                department = excluded.department, profile_description = excluded.profile_description,
                role_description = excluded.role_description, department_description = excluded.department_description,
                competencies = excluded.competencies, primary_objective = excluded.primary_objective,
                top_challenges = excluded.top_challenges, org_chart_validated = excluded.org_chart_validated,
                memory_level = excluded.memory_level, default_visibility = excluded.default_visibility,
                session_id = excluded.session_id, duration_seconds = excluded.duration_seconds,
                completed_at = excluded.completed_at, updated_at = excluded.updated_at, status = 'active'",
            params![
                first_run_id.clone(),
                email.clone(),
                record.full_name.clone(),
                record.job_role.clone(),
                record.company.clone(),
                record.department.clone(),
                record.profile_description.clone(),
                record.role_description.clone(),
                record.department_description.clone(),
                competencies,
                record.primary_objective.clone(),
                record.top_challenges.clone(),
                record.org_chart_validated as i64,
                record.memory_level.clone(),
                record.default_visibility.clone(),
                record.session_id.clone(),
                record.duration_seconds,
                now.clone(),
                completed_at,
            ],
        )
        .await
        .map_err(err)?;

        // AIProfile: one per email.
        let ai_profile_id = fetch_optional(
            &tx,
            "SELECT id FROM ai_profiles WHERE user_email = ?1",
            params![email.clone()],
            "record_first_run_onboarding",
            first_text,
        )
        .await?
        .unwrap_or_else(|| Uuid::new_v4().to_string());
        tx.execute(
            "INSERT INTO ai_profiles (id, user_email, ai_experience_level, technical_path, preferred_communication, status, source, source_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'active', ?6, ?7, ?8, ?8)
             ON CONFLICT (user_email) DO UPDATE SET
                ai_experience_level = excluded.ai_experience_level, technical_path = excluded.technical_path,
                preferred_communication = excluded.preferred_communication, source = excluded.source,
                source_id = excluded.source_id, status = 'active', updated_at = excluded.updated_at",
            params![
                ai_profile_id.clone(),
                email.clone(),
                record.ai_profile.ai_experience_level.clone(),
                record.ai_profile.technical_path as i64,
                record.ai_profile.preferred_communication.clone(),
                SOURCE_FIRST_RUN,
                first_run_id.clone(),
                now.clone(),
            ],
        )
        .await
        .map_err(err)?;

        // PersonaVersion: always a new version; the previous current one is superseded.
        let existing_versions = scalar_i64(
            &tx,
            "SELECT COUNT(*) FROM persona_versions WHERE user_email = ?1",
            params![email.clone()],
            "record_first_run_onboarding",
        )
        .await?;
        let persona_version = persona_version_label(existing_versions as usize);
        tx.execute(
            "UPDATE persona_versions SET is_current = 0, status = 'superseded' WHERE user_email = ?1",
            params![email.clone()],
        )
        .await
        .map_err(err)?;
        tx.execute(
            "INSERT INTO persona_versions (id, user_email, ai_profile_id, version, persona_summary, core_competencies, organizational_context, primary_goals, key_challenges, status, is_current, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'active', 1, ?10)",
            params![
                Uuid::new_v4().to_string(),
                email.clone(),
                ai_profile_id.clone(),
                persona_version.clone(),
                record.persona.persona_summary.clone(),
                json_list(&record.persona.core_competencies)?,
                record.persona.organizational_context.clone(),
                record.persona.primary_goals.clone(),
                record.persona.key_challenges.clone(),
                now.clone(),
            ],
        )
        .await
        .map_err(err)?;

        // Competencies are global, deduplicated by name. Only a stored User
        // gets links; the bootstrap admin has no row.
        let has_user = user_id_for(&tx, &email).await?.is_some();
        let mut competencies_linked = 0;
        for name in record.competencies.iter().map(|c| c.trim()).filter(|c| !c.is_empty()) {
            tx.execute(
                "INSERT OR IGNORE INTO competencies (name, created_at) VALUES (?1, ?2)",
                params![name, now.clone()],
            )
            .await
            .map_err(err)?;
            competencies_linked += 1;
            if !has_user {
                continue;
            }
            tx.execute(
                "INSERT INTO user_competencies (user_email, competency, source, source_id, confidence, declared_at)
                 VALUES (?1, ?2, ?3, ?4, 1.0, ?5)
                 ON CONFLICT (user_email, competency) DO UPDATE SET
                    source = excluded.source, source_id = excluded.source_id,
                    confidence = excluded.confidence, declared_at = excluded.declared_at",
                params![email.clone(), name, SOURCE_FIRST_RUN, first_run_id.clone(), now.clone()],
            )
            .await
            .map_err(err)?;
        }

        tx.commit().await.map_err(err)?;

        info!(
            email = %email,
            created,
            persona_version = %persona_version,
            "First-run onboarding recorded"
        );
        Ok(CompletionOutcome {
            first_run_id,
            created,
            ai_profile_id,
            persona_version,
            competencies_linked,
        })
    }

    async fn first_run_onboarding(
        &self,
        email: &str,
    ) -> Result<Option<FirstRunOnboarding>, DatabaseError> {
        fetch_optional(
            &*self.conn().await,
            &format!("SELECT {FRO_COLUMNS} FROM first_run_onboardings WHERE user_email = ?1"),
            params![normalize_email(email)],
            "first_run_onboarding",
            row_to_first_run,
        )
        .await
    }

    async fn ai_profile(&self, email: &str) -> Result<Option<AiProfile>, DatabaseError> {
        fetch_optional(
            &*self.conn().await,
            "SELECT a.id, a.user_email, a.ai_experience_level, a.technical_path, a.preferred_communication, a.status, a.source, a.source_id,
                (SELECT p.version FROM persona_versions p WHERE p.user_email = a.user_email AND p.is_current = 1)
             FROM ai_profiles a WHERE a.user_email = ?1",
            params![normalize_email(email)],
            "ai_profile",
            |row| {
                let id: String = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("ai_profile: {e}")))?;
                Ok(AiProfile {
                    id,
                    user_email: text(row, 1),
                    ai_experience_level: text(row, 2),
                    technical_path: flag(row, 3),
                    preferred_communication: text(row, 4),
                    status: text(row, 5),
                    source: text(row, 6),
                    source_id: text(row, 7),
                    current_persona: opt(row, 8),
                })
            },
        )
        .await
    }

    async fn persona_versions(&self, email: &str) -> Result<Vec<PersonaVersion>, DatabaseError> {
        fetch_all(
            &*self.conn().await,
            &format!(
                "SELECT {PERSONA_COLUMNS} FROM persona_versions WHERE user_email = ?1 ORDER BY CAST(substr(version, 2) AS INTEGER)"
            ),
            params![normalize_email(email)],
            "persona_versions",
            row_to_persona,
        )
        .await
    }

    async fn user_competencies(&self, email: &str) -> Result<Vec<CompetencyLink>, DatabaseError> {
        fetch_all(
            &*self.conn().await,
            "SELECT competency, source, source_id, confidence, declared_at FROM user_competencies WHERE user_email = ?1 ORDER BY competency",
            params![normalize_email(email)],
            "user_competencies",
            |row| {
                Ok(CompetencyLink {
                    name: text(row, 0),
                    source: text(row, 1),
                    source_id: text(row, 2),
                    confidence: row.get::<f64>(3).unwrap_or(1.0),
                    declared_at: parse_datetime(&text(row, 4)),
                })
            },
        )
        .await
    }

    // ── Company ─────────────────────────────────────────────────────

    async fn company_profile(
        &self,
        name: Option<&str>,
    ) -> Result<Option<CompanyProfile>, DatabaseError> {
        match name {
            Some(name) => {
                fetch_optional(
                    &*self.conn().await,
                    &format!("SELECT {ORG_COLUMNS} FROM organizations WHERE name = ?1"),
                    params![name],
                    "company_profile",
                    row_to_company,
                )
                .await
            }
            None => {
                fetch_optional(
                    &*self.conn().await,
                    &format!("SELECT {ORG_COLUMNS} FROM organizations ORDER BY name LIMIT 1"),
                    (),
                    "company_profile",
                    row_to_company,
                )
                .await
            }
        }
    }

    async fn save_company_profile(
        &self,
        update: &CompanyProfileUpdate,
        updated_by: &str,
    ) -> Result<Option<CompanyProfile>, DatabaseError> {
        let Some(current) = self.company_profile(update.name.as_deref()).await? else {
            return Ok(None);
        };
        self.conn()
            .await
            .execute(
                r#"UPDATE organizations SET description = ?2, industry = ?3, size = ?4, mission = ?5, vision = ?6, "values" = ?7, updated_by = ?8, updated_at = ?9 WHERE name = ?1"#,
                params![
                    current.name.clone(),
                    update.description.trim(),
                    opt_text(update.industry.as_deref()),
                    opt_text(update.size.as_deref()),
                    opt_text(update.mission.as_deref()),
                    opt_text(update.vision.as_deref()),
                    json_list(&update.values)?,
                    updated_by,
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("save_company_profile: {e}")))?;
        self.company_profile(Some(&current.name)).await
    }

    async fn organizational_structure(&self) -> Result<OrganizationalStructure, DatabaseError> {
        let guard = self.conn().await;
        let conn = &*guard;
        let organizations = fetch_all(
            conn,
            "SELECT name FROM organizations ORDER BY name",
            (),
            "organizational_structure",
            first_text,
        )
        .await?;
        let departments = fetch_all(
            conn,
            "SELECT d.name, COUNT(m.user_id) FROM departments d
             LEFT JOIN member_of m ON m.department = d.name
             GROUP BY d.name ORDER BY d.name",
            (),
            "organizational_structure",
            |row| {
                Ok(DepartmentSummary {
                    name: text(row, 0),
                    member_count: row.get::<i64>(1).unwrap_or(0).max(0) as u64,
                })
            },
        )
        .await?;
        let total = scalar_i64(conn, "SELECT COUNT(*) FROM users", (), "organizational_structure")
            .await?;
        let with_onboarding = scalar_i64(
            conn,
            "SELECT COUNT(*) FROM users u WHERE EXISTS (SELECT 1 FROM first_run_onboardings f WHERE f.user_email = u.email)",
            (),
            "organizational_structure",
        )
        .await?;
        Ok(OrganizationalStructure::new(
            organizations,
            departments,
            total.max(0) as u64,
            with_onboarding.max(0) as u64,
        ))
    }

    async fn profile_data(&self, email: &str) -> Result<Option<ProfileData>, DatabaseError> {
        let Some(user) = self.find_user_by_email(email).await? else {
            return Ok(None);
        };
        let guard = self.conn().await;
        let conn = &*guard;
        let departments = fetch_all(
            conn,
            "SELECT department FROM member_of WHERE user_id = ?1 ORDER BY department",
            params![user.id.clone()],
            "profile_data",
            first_text,
        )
        .await?;
        let organizations = fetch_all(
            conn,
            "SELECT organization FROM belongs_to WHERE user_id = ?1 ORDER BY organization",
            params![user.id.clone()],
            "profile_data",
            first_text,
        )
        .await?;
        let location = fetch_optional(
            conn,
            "SELECT location FROM works_at WHERE user_id = ?1 ORDER BY location LIMIT 1",
            params![user.id.clone()],
            "profile_data",
            first_text,
        )
        .await?;
        let access_areas = fetch_all(
            conn,
            "SELECT department FROM has_access_to WHERE user_id = ?1 ORDER BY department",
            params![user.id.clone()],
            "profile_data",
            first_text,
        )
        .await?;
        drop(guard);
        let first_run_onboarding = self.first_run_onboarding(&user.email).await?;
        Ok(Some(ProfileData {
            user,
            first_run_onboarding,
            departments,
            organizations,
            location,
            access_areas,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::onboarding::model::{AiProfileInput, PersonaDraft};
    use crate::users::model::OrganizationType;

    async fn test_db() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    fn new_user(email: &str, name: &str) -> NewUser {
        NewUser {
            email: email.into(),
            name: name.into(),
            password_hash: "hash".into(),
            role: Role::User,
            organization_type: OrganizationType::Cvc,
            company: Some("Acme".into()),
            department: Some("Finanças".into()),
            job_title: Some("Analista".into()),
            force_password_change: false,
        }
    }

    fn roster(email: &str, role: Role) -> RosterUser {
        RosterUser {
            email: email.into(),
            name: "Roster Person".into(),
            company: "Acme".into(),
            job_title: "Coordenador".into(),
            department: "Operações".into(),
            role,
            status: "ativo".into(),
            relationship_type: "colaborador".into(),
            access_types: vec!["Finanças".into()],
        }
    }

    fn record(email: &str, competencies: &[&str]) -> FirstRunRecord {
        FirstRunRecord {
            id: Uuid::new_v4().to_string(),
            user_email: email.into(),
            full_name: "Ana".into(),
            job_role: "Gerente".into(),
            company: "Acme".into(),
            department: "Finanças".into(),
            profile_description: "desc".into(),
            role_description: "role".into(),
            department_description: "dept".into(),
            competencies: competencies.iter().map(|c| c.to_string()).collect(),
            primary_objective: "goal".into(),
            top_challenges: "challenge".into(),
            org_chart_validated: true,
            memory_level: "long".into(),
            default_visibility: "corporate".into(),
            session_id: "s1".into(),
            duration_seconds: 120,
            completed_at: Utc::now(),
            ai_profile: AiProfileInput {
                ai_experience_level: "iniciante".into(),
                technical_path: false,
                preferred_communication: "direto".into(),
            },
            persona: PersonaDraft {
                persona_summary: "Ana é Gerente".into(),
                core_competencies: vec![],
                organizational_context: "ctx".into(),
                primary_goals: "goal".into(),
                key_challenges: "challenge".into(),
            },
        }
    }

    // ── User tests ──────────────────────────────────────────────────

    #[tokio::test]
    async fn open_creates_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("eks.db");
        let db = LibSqlBackend::new_local(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(db.schema_version().await.unwrap(), migrations::latest_version());
    }

    #[tokio::test]
    async fn create_and_find_user() {
        let db = test_db().await;
        let created = db.create_user(&new_user(" Ana@Acme.com ", "Ana")).await.unwrap();
        assert_eq!(created.email, "ana@acme.com");

        let found = db.find_user_by_email("ANA@acme.com").await.unwrap().unwrap();
        assert_eq!(found.id, created.id);
        assert_eq!(found.department.as_deref(), Some("Finanças"));
        assert!(!found.force_password_change);

        assert!(db.find_user_by_email("nobody@acme.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let db = test_db().await;
        db.create_user(&new_user("ana@acme.com", "Ana")).await.unwrap();
        let err = db
            .create_user(&new_user("ANA@acme.com", "Ana 2"))
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Constraint(_)));
        assert_eq!(db.list_users().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn roster_upsert_never_duplicates() {
        let db = test_db().await;
        let first = db
            .upsert_roster_user(&roster("bia@acme.com", Role::User), "default-hash")
            .await
            .unwrap();
        assert!(first.created);
        let second = db
            .upsert_roster_user(&roster("BIA@acme.com", Role::User), "other-hash")
            .await
            .unwrap();
        assert!(!second.created);
        assert_eq!(first.user_id, second.user_id);

        let users = db.list_users().await.unwrap();
        assert_eq!(users.len(), 1);
        // password only set on create
        assert_eq!(users[0].password_hash, "default-hash");
        assert!(users[0].force_password_change);
        assert_eq!(users[0].access_types, vec!["Finanças"]);
    }

    #[tokio::test]
    async fn roster_upsert_keeps_admin_role() {
        let db = test_db().await;
        let mut admin = new_user("root@acme.com", "Root");
        admin.role = Role::Admin;
        db.create_user(&admin).await.unwrap();

        db.upsert_roster_user(&roster("root@acme.com", Role::User), "h")
            .await
            .unwrap();
        let user = db.find_user_by_email("root@acme.com").await.unwrap().unwrap();
        assert_eq!(user.role, Role::Admin);
        assert_eq!(user.job_title.as_deref(), Some("Coordenador"));
    }

    #[tokio::test]
    async fn update_and_delete_user() {
        let db = test_db().await;
        let user = db.create_user(&new_user("ana@acme.com", "Ana")).await.unwrap();
        let updated = db
            .update_user(
                &user.id,
                &UserUpdate {
                    name: Some("Ana Souza".into()),
                    role: Some(Role::Admin),
                    ..UserUpdate::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.name, "Ana Souza");
        assert_eq!(updated.role, Role::Admin);
        assert_eq!(updated.company.as_deref(), Some("Acme"));

        assert!(db.update_user("missing", &UserUpdate::default()).await.unwrap().is_none());

        db.link_department("ana@acme.com", "Finanças").await.unwrap();
        assert!(db.delete_user(&user.id).await.unwrap());
        assert!(!db.delete_user(&user.id).await.unwrap());
        assert_eq!(db.graph_counts().await.unwrap().member_of, 0);
    }

    #[tokio::test]
    async fn set_password_by_email() {
        let db = test_db().await;
        db.create_user(&new_user("ana@acme.com", "Ana")).await.unwrap();
        assert!(db.set_password("ANA@acme.com", "new-hash", true).await.unwrap());
        assert!(!db.set_password("ghost@acme.com", "x", false).await.unwrap());
        let user = db.find_user_by_email("ana@acme.com").await.unwrap().unwrap();
        assert_eq!(user.password_hash, "new-hash");
        assert!(user.force_password_change);
    }

    // ── Structure tests ─────────────────────────────────────────────

    #[tokio::test]
    async fn links_are_idempotent() {
        let db = test_db().await;
        db.create_user(&new_user("ana@acme.com", "Ana")).await.unwrap();
        for _ in 0..2 {
            db.link_organization("ana@acme.com", "Acme").await.unwrap();
            db.link_department("ana@acme.com", "Finanças").await.unwrap();
            db.link_location("ana@acme.com", "São Paulo").await.unwrap();
        }
        let counts = db.graph_counts().await.unwrap();
        assert_eq!(counts.organizations, 1);
        assert_eq!(counts.belongs_to, 1);
        assert_eq!(counts.member_of, 1);
        assert_eq!(counts.works_at, 1);
        assert!(!counts.is_empty());
    }

    #[tokio::test]
    async fn linking_unknown_user_fails() {
        let db = test_db().await;
        let err = db.link_department("ghost@acme.com", "TI").await.unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }

    #[tokio::test]
    async fn access_areas_are_replaced() {
        let db = test_db().await;
        db.create_user(&new_user("ana@acme.com", "Ana")).await.unwrap();
        let n = db
            .replace_access_areas("ana@acme.com", &["TI".into(), "RH".into(), "TI".into()])
            .await
            .unwrap();
        assert_eq!(n, 2);
        let n = db
            .replace_access_areas("ana@acme.com", &["Jurídico".into()])
            .await
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(db.graph_counts().await.unwrap().has_access_to, 1);
    }

    #[tokio::test]
    async fn manager_link_is_unique_and_never_self() {
        let db = test_db().await;
        db.create_user(&new_user("ana@acme.com", "Ana")).await.unwrap();
        db.create_user(&new_user("bia@acme.com", "Bia")).await.unwrap();
        db.create_user(&new_user("caio@acme.com", "Caio")).await.unwrap();

        assert!(db.set_manager("bia@acme.com", "ana@acme.com").await.unwrap());
        assert!(db.set_manager("bia@acme.com", "ana@acme.com").await.unwrap());
        assert_eq!(db.graph_counts().await.unwrap().reports_to, 1);

        // a new manager replaces the old edge
        assert!(db.set_manager("bia@acme.com", "caio@acme.com").await.unwrap());
        assert_eq!(db.graph_counts().await.unwrap().reports_to, 1);

        assert!(!db.set_manager("ana@acme.com", "ANA@acme.com").await.unwrap());
        assert!(!db.set_manager("ana@acme.com", "ghost@acme.com").await.unwrap());
        assert_eq!(db.graph_counts().await.unwrap().reports_to, 1);
    }

    #[tokio::test]
    async fn org_chart_view() {
        let db = test_db().await;
        for (email, name) in [
            ("boss@acme.com", "Zeca"),
            ("ana@acme.com", "Ana"),
            ("bia@acme.com", "Bia"),
            ("caio@acme.com", "Caio"),
            ("duda@acme.com", "Duda"),
        ] {
            db.create_user(&new_user(email, name)).await.unwrap();
        }
        db.set_manager("ana@acme.com", "boss@acme.com").await.unwrap();
        db.set_manager("caio@acme.com", "boss@acme.com").await.unwrap();
        db.set_manager("bia@acme.com", "boss@acme.com").await.unwrap();
        db.set_manager("duda@acme.com", "ana@acme.com").await.unwrap();

        let view = db.org_chart("ana@acme.com").await.unwrap().unwrap();
        assert_eq!(view.manager.unwrap().email, "boss@acme.com");
        let peers: Vec<_> = view.peers.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(peers, vec!["Bia", "Caio"]);
        assert_eq!(view.subordinates.len(), 1);
        assert_eq!(view.hierarchy_level, 1);

        let duda = db.org_chart("duda@acme.com").await.unwrap().unwrap();
        assert_eq!(duda.hierarchy_level, 2);

        let boss = db.org_chart("boss@acme.com").await.unwrap().unwrap();
        assert!(boss.manager.is_none());
        assert!(boss.peers.is_empty());
        assert_eq!(boss.subordinates.len(), 3);

        assert!(db.org_chart("ghost@acme.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cyclic_chain_terminates() {
        let db = test_db().await;
        db.create_user(&new_user("a@acme.com", "A")).await.unwrap();
        db.create_user(&new_user("b@acme.com", "B")).await.unwrap();
        db.set_manager("a@acme.com", "b@acme.com").await.unwrap();
        db.set_manager("b@acme.com", "a@acme.com").await.unwrap();
        let view = db.org_chart("a@acme.com").await.unwrap().unwrap();
        assert_eq!(view.hierarchy_level, 1);
    }

    #[tokio::test]
    async fn organization_departments_linked_once() {
        let db = test_db().await;
        db.create_user(&new_user("ana@acme.com", "Ana")).await.unwrap();
        db.create_user(&new_user("bia@acme.com", "Bia")).await.unwrap();
        for email in ["ana@acme.com", "bia@acme.com"] {
            db.link_organization(email, "Acme").await.unwrap();
            db.link_department(email, "Finanças").await.unwrap();
        }
        assert_eq!(db.link_organization_departments().await.unwrap(), 1);
        assert_eq!(db.link_organization_departments().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn position_validation_and_issues() {
        let db = test_db().await;
        db.create_user(&new_user("ana@acme.com", "Ana")).await.unwrap();
        let at = Utc::now();
        assert!(db.mark_position_validated("ana@acme.com", at).await.unwrap());
        let view = db.org_chart("ana@acme.com").await.unwrap().unwrap();
        assert!(view.validated_by_user);
        assert!(view.validated_at.is_some());

        let issue = db
            .record_org_chart_issue("ana@acme.com", "  Meu gestor mudou  ")
            .await
            .unwrap();
        assert_eq!(issue.description, "Meu gestor mudou");
        let issues = db.list_org_chart_issues().await.unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].id, issue.id);
    }

    // ── Onboarding tests ────────────────────────────────────────────

    #[tokio::test]
    async fn session_roundtrip() {
        let db = test_db().await;
        assert!(db.get_session("ana@acme.com").await.unwrap().is_none());
        let value = serde_json::json!({"status": "in_progress"});
        db.save_session("ana@acme.com", &value).await.unwrap();
        db.save_session("ANA@acme.com", &value).await.unwrap();
        assert_eq!(db.get_session("ana@acme.com").await.unwrap(), Some(value));
    }

    #[tokio::test]
    async fn first_completion_creates_v1() {
        let db = test_db().await;
        let outcome = db
            .record_first_run_onboarding(&record("ana@acme.com", &["SQL", "Liderança", " "]))
            .await
            .unwrap();
        assert!(outcome.created);
        assert_eq!(outcome.persona_version, "v1");
        assert_eq!(outcome.competencies_linked, 2);

        let fro = db.first_run_onboarding("ana@acme.com").await.unwrap().unwrap();
        assert_eq!(fro.id, outcome.first_run_id);
        assert_eq!(fro.source_type, "user_input");
        assert_eq!(fro.version, "v1");
        assert_eq!(fro.status, "active");
        assert!(fro.org_chart_validated);
        assert!((fro.confidence - 1.0).abs() < f64::EPSILON);

        let profile = db.ai_profile("ana@acme.com").await.unwrap().unwrap();
        assert_eq!(profile.source, SOURCE_FIRST_RUN);
        assert_eq!(profile.source_id, fro.id);
        assert_eq!(profile.current_persona.as_deref(), Some("v1"));
    }

    #[tokio::test]
    async fn resubmission_adds_persona_version() {
        let db = test_db().await;
        db.create_user(&new_user("ana@acme.com", "Ana")).await.unwrap();
        let first = db
            .record_first_run_onboarding(&record("ana@acme.com", &["SQL"]))
            .await
            .unwrap();
        let second = db
            .record_first_run_onboarding(&record("ana@acme.com", &["SQL", "Python"]))
            .await
            .unwrap();
        assert!(!second.created);
        assert_eq!(second.first_run_id, first.first_run_id);
        assert_eq!(second.ai_profile_id, first.ai_profile_id);
        assert_eq!(second.persona_version, "v2");

        let versions = db.persona_versions("ana@acme.com").await.unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].status, "superseded");
        assert_eq!(versions[1].status, "active");
        assert_eq!(
            db.ai_profile("ana@acme.com").await.unwrap().unwrap().current_persona.as_deref(),
            Some("v2")
        );

        let competencies = db.user_competencies("ana@acme.com").await.unwrap();
        let names: Vec<_> = competencies.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Python", "SQL"]);
    }

    #[tokio::test]
    async fn unreadable_session_reads_as_absent() {
        let db = test_db().await;
        db.conn()
            .await
            .execute(
                "INSERT INTO onboarding_sessions (user_email, state, updated_at) VALUES (?1, ?2, ?3)",
                params!["ana@acme.com", "{not json", Utc::now().to_rfc3339()],
            )
            .await
            .unwrap();
        assert!(db.get_session("ana@acme.com").await.unwrap().is_none());

        let value = serde_json::json!({"status": "in_progress"});
        db.save_session("ana@acme.com", &value).await.unwrap();
        assert_eq!(db.get_session("ana@acme.com").await.unwrap(), Some(value));
    }

    #[tokio::test]
    async fn competencies_without_user_row_are_not_linked() {
        let db = test_db().await;
        let outcome = db
            .record_first_run_onboarding(&record("admin@acme.com", &["SQL", "Python"]))
            .await
            .unwrap();
        assert_eq!(outcome.competencies_linked, 2);
        assert!(db.user_competencies("admin@acme.com").await.unwrap().is_empty());
        let dangling = scalar_i64(
            &*db.conn().await,
            "SELECT COUNT(*) FROM user_competencies WHERE user_email = ?1",
            params!["admin@acme.com"],
            "t",
        )
        .await
        .unwrap();
        assert_eq!(dangling, 0);
        let total = scalar_i64(&*db.conn().await, "SELECT COUNT(*) FROM competencies", (), "t")
            .await
            .unwrap();
        assert_eq!(total, 2);
        assert!(db.first_run_onboarding("admin@acme.com").await.unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writers_keep_their_transactions() {
        let tmp = tempfile::tempdir().unwrap();
        let db = Arc::new(LibSqlBackend::new_local(&tmp.path().join("eks.db")).await.unwrap());
        let emails: Vec<String> = (0..32).map(|i| format!("user{i}@acme.com")).collect();
        for email in &emails {
            db.create_user(&new_user(email, "Pessoa")).await.unwrap();
        }

        let mut handles = Vec::new();
        for (i, email) in emails.iter().cloned().enumerate() {
            let db = Arc::clone(&db);
            handles.push(tokio::spawn(async move {
                db.record_first_run_onboarding(&record(&email, &["SQL", "Python"]))
                    .await?;
                let areas = vec![format!("Área {i}"), "Finanças".to_string()];
                db.replace_access_areas(&email, &areas).await?;
                db.record_first_run_onboarding(&record(&email, &["SQL"])).await
            }));
        }
        for handle in handles {
            let outcome = handle.await.unwrap().unwrap();
            assert!(!outcome.created);
            assert_eq!(outcome.persona_version, "v2");
        }

        for email in &emails {
            assert!(db.first_run_onboarding(email).await.unwrap().is_some());
            assert_eq!(db.persona_versions(email).await.unwrap().len(), 2);
            assert_eq!(db.user_competencies(email).await.unwrap().len(), 2);
            let profile = db.profile_data(email).await.unwrap().unwrap();
            assert_eq!(profile.access_areas.len(), 2);
        }
        let counts = db.graph_counts().await.unwrap();
        assert_eq!(counts.users, 32);
        assert_eq!(counts.has_access_to, 64);
        let first_runs = scalar_i64(
            &*db.conn().await,
            "SELECT COUNT(*) FROM first_run_onboardings",
            (),
            "t",
        )
        .await
        .unwrap();
        assert_eq!(first_runs, 32);
    }

    #[tokio::test]
    async fn competencies_are_global() {
        let db = test_db().await;
        db.record_first_run_onboarding(&record("ana@acme.com", &["SQL"]))
            .await
            .unwrap();
        db.record_first_run_onboarding(&record("bia@acme.com", &["SQL"]))
            .await
            .unwrap();
        let total = scalar_i64(&*db.conn().await, "SELECT COUNT(*) FROM competencies", (), "t")
            .await
            .unwrap();
        assert_eq!(total, 1);
    }

    // ── Company tests ───────────────────────────────────────────────

    #[tokio::test]
    async fn company_profile_update() {
        let db = test_db().await;
        assert!(db.company_profile(None).await.unwrap().is_none());
        db.create_user(&new_user("ana@acme.com", "Ana")).await.unwrap();
        db.link_organization("ana@acme.com", "Acme").await.unwrap();

        let saved = db
            .save_company_profile(
                &CompanyProfileUpdate {
                    description: "Agência de viagens".into(),
                    values: vec!["Ética".into()],
                    ..CompanyProfileUpdate::default()
                },
                "admin@acme.com",
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(saved.name, "Acme");
        assert_eq!(saved.description.as_deref(), Some("Agência de viagens"));
        assert_eq!(saved.values, vec!["Ética"]);
        assert_eq!(saved.updated_by.as_deref(), Some("admin@acme.com"));

        let missing = db
            .save_company_profile(
                &CompanyProfileUpdate {
                    name: Some("Other".into()),
                    description: "x".into(),
                    ..CompanyProfileUpdate::default()
                },
                "admin@acme.com",
            )
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn structure_and_profile_data() {
        let db = test_db().await;
        db.create_user(&new_user("ana@acme.com", "Ana")).await.unwrap();
        db.create_user(&new_user("bia@acme.com", "Bia")).await.unwrap();
        db.link_organization("ana@acme.com", "Acme").await.unwrap();
        db.link_department("ana@acme.com", "Finanças").await.unwrap();
        db.link_department("bia@acme.com", "Finanças").await.unwrap();
        db.link_location("ana@acme.com", "Recife").await.unwrap();
        db.record_first_run_onboarding(&record("ana@acme.com", &[]))
            .await
            .unwrap();

        let structure = db.organizational_structure().await.unwrap();
        assert_eq!(structure.organizations, vec!["Acme"]);
        assert_eq!(structure.departments[0].member_count, 2);
        assert_eq!(structure.total_users, 2);
        assert_eq!(structure.with_onboarding, 1);
        assert_eq!(structure.coverage_percent, 50.0);

        let data = db.profile_data("ana@acme.com").await.unwrap().unwrap();
        assert_eq!(data.location.as_deref(), Some("Recife"));
        assert_eq!(data.organizations, vec!["Acme"]);
        assert!(data.first_run_onboarding.is_some());
        assert!(db.profile_data("ghost@acme.com").await.unwrap().is_none());
    }
}
