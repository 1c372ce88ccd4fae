//! Neo4j backend over Bolt, used in production.
//!
//! Nodes and relationship types are the ones the rest of the organization's
//! tooling reads (`User`, `FirstRunOnboarding`, `AIProfile`,
//! `PersonaVersion`, `Competency`, `REPORTS_TO`, ...). Onboarding nodes keep
//! snake_case properties keyed by `user_email`; `User` keeps camelCase.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use neo4rs::{BoltNull, BoltType, ConfigBuilder, Graph, Query, Row, query};
use secrecy::ExposeSecret;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::company::model::{
    CompanyProfile, CompanyProfileUpdate, DepartmentSummary, OrganizationalStructure, ProfileData,
};
use crate::config::Neo4jConfig;
use crate::error::DatabaseError;
use crate::onboarding::model::{
    AiProfile, CompetencyLink, CompletionOutcome, FirstRunOnboarding, FirstRunRecord,
    PersonaVersion, SOURCE_FIRST_RUN, persona_version_label,
};
use crate::orgchart::model::{OrgChartIssue, OrgChartView, PersonRef};
use crate::store::parse_datetime;
use crate::store::traits::{AppliedMigration, GraphCounts, GraphStore};
use crate::users::model::{
    NewUser, Role, RosterUser, UpsertOutcome, User, UserUpdate, normalize_email,
};

/// Longest `REPORTS_TO` chain followed when computing hierarchy levels.
const MAX_HIERARCHY_DEPTH: u32 = 64;

/// A versioned graph migration. Schema statements (constraints, indexes)
/// cannot share a transaction with data writes, so they run one by one.
struct GraphMigration {
    version: i64,
    name: &'static str,
    schema: bool,
    statements: &'static [&'static str],
}

static MIGRATIONS: &[GraphMigration] = &[
    GraphMigration {
        version: 1,
        name: "constraints",
        schema: true,
        statements: &[
            "CREATE CONSTRAINT user_email IF NOT EXISTS FOR (u:User) REQUIRE u.email IS UNIQUE",
            "CREATE CONSTRAINT user_id IF NOT EXISTS FOR (u:User) REQUIRE u.id IS UNIQUE",
            "CREATE CONSTRAINT first_run_onboarding_email IF NOT EXISTS FOR (f:FirstRunOnboarding) REQUIRE f.user_email IS UNIQUE",
            "CREATE CONSTRAINT ai_profile_email IF NOT EXISTS FOR (a:AIProfile) REQUIRE a.user_email IS UNIQUE",
            "CREATE CONSTRAINT persona_version_id IF NOT EXISTS FOR (p:PersonaVersion) REQUIRE p.id IS UNIQUE",
            "CREATE CONSTRAINT competency_name IF NOT EXISTS FOR (c:Competency) REQUIRE c.name IS UNIQUE",
            "CREATE CONSTRAINT organization_name IF NOT EXISTS FOR (o:Organization) REQUIRE o.name IS UNIQUE",
            "CREATE CONSTRAINT department_name IF NOT EXISTS FOR (d:Department) REQUIRE d.name IS UNIQUE",
            "CREATE CONSTRAINT location_name IF NOT EXISTS FOR (l:Location) REQUIRE l.name IS UNIQUE",
            "CREATE CONSTRAINT onboarding_session_email IF NOT EXISTS FOR (s:OnboardingSession) REQUIRE s.user_email IS UNIQUE",
            "CREATE INDEX persona_version_email IF NOT EXISTS FOR (p:PersonaVersion) ON (p.user_email)",
            "CREATE INDEX org_chart_issue_status IF NOT EXISTS FOR (i:OrgChartIssue) ON (i.status)",
        ],
    },
    GraphMigration {
        version: 2,
        name: "first_run_onboarding_from_legacy_responses",
        schema: false,
        statements: &[r#"
            MATCH (u:User)-[:HAS_ONBOARDING_RESPONSE]->(r:OnboardingResponse)
            WHERE coalesce(r.status, '') <> 'migrated_to_first_run_onboarding'
              AND NOT EXISTS { MATCH (:FirstRunOnboarding {user_email: u.email}) }
            CREATE (f:FirstRunOnboarding {
                id: randomUUID(),
                user_email: u.email,
                full_name: coalesce(u.name, r.fullName, ''),
                job_role: coalesce(u.jobTitle, r.jobRole, ''),
                company: coalesce(u.company, r.company, ''),
                department: coalesce(u.department, r.department, ''),
                profile_description: coalesce(r.profileDescription, ''),
                role_description: coalesce(r.roleDescription, ''),
                department_description: coalesce(r.departmentDescription, ''),
                competencies: coalesce(r.competencies, []),
                primary_objective: coalesce(r.primaryObjective, ''),
                top_challenges: coalesce(r.topChallenges, ''),
                org_chart_validated: coalesce(r.orgChartValidated, false),
                memory_level: coalesce(r.memoryLevel, 'long'),
                default_visibility: coalesce(r.defaultVisibility, 'corporate'),
                source_type: 'user_input',
                confidence: 1.0,
                version: 'v1',
                status: 'active',
                session_id: 'migrated-' + coalesce(r.id, ''),
                duration_seconds: 0,
                created_at: toString(coalesce(r.createdAt, datetime())),
                completed_at: toString(datetime()),
                updated_at: toString(datetime())
            })
            CREATE (u)-[:COMPLETED_FIRST_RUN_ONBOARDING]->(f)
            CREATE (f)-[:CONFIRMS_POSITION {validated: coalesce(r.orgChartValidated, false)}]->(u)
            SET r.status = 'migrated_to_first_run_onboarding',
                r.migrated_at = toString(datetime()),
                r.migrated_to = f.id
        "#],
    },
    GraphMigration {
        version: 3,
        name: "ai_profiles_and_competencies",
        schema: false,
        statements: &[
            r#"
            MATCH (u:User)-[:COMPLETED_FIRST_RUN_ONBOARDING]->(f:FirstRunOnboarding)
            WHERE NOT EXISTS { MATCH (:AIProfile {user_email: u.email}) }
            CREATE (a:AIProfile {
                id: randomUUID(),
                user_email: u.email,
                ai_experience_level: 'intermediário',
                technical_path: false,
                preferred_communication: 'direto',
                status: 'active',
                source: 'first_run_onboarding',
                source_id: f.id,
                created_at: toString(datetime()),
                updated_at: toString(datetime())
            })
            CREATE (p:PersonaVersion {
                id: randomUUID(),
                user_email: u.email,
                version: 'v1',
                persona_summary: rTrim(coalesce(u.name, '') + ' é ' + coalesce(u.jobTitle, '')
                    + ' na área de ' + coalesce(u.department, 'N/A') + '. '
                    + left(coalesce(f.profile_description, ''), 150)),
                core_competencies: coalesce(f.competencies, []),
                organizational_context: left(coalesce(f.role_description, ''), 200),
                primary_goals: coalesce(f.primary_objective, ''),
                key_challenges: coalesce(f.top_challenges, ''),
                status: 'active',
                created_at: toString(datetime())
            })
            CREATE (u)-[:HAS_AI_PROFILE]->(a)
            CREATE (f)-[:INITIATES]->(a)
            CREATE (f)-[:GENERATES]->(p)
            CREATE (a)-[:CURRENT_PERSONA]->(p)
            CREATE (u)-[:HAS_PERSONA_VERSION]->(p)
            "#,
            r#"
            MATCH (u:User)-[:COMPLETED_FIRST_RUN_ONBOARDING]->(f:FirstRunOnboarding)
            UNWIND coalesce(f.competencies, []) AS raw
            WITH u, f, trim(raw) AS name
            WHERE name <> ''
            MERGE (c:Competency {name: name})
              ON CREATE SET c.id = randomUUID(), c.created_at = toString(datetime())
            MERGE (u)-[r:HAS_COMPETENCY]->(c)
              ON CREATE SET r.source = 'first_run_onboarding', r.source_id = f.id,
                            r.confidence = 1.0, r.declared_at = toString(datetime())
            "#,
        ],
    },
    GraphMigration {
        version: 4,
        name: "organization_departments",
        schema: false,
        statements: &[r#"
            MATCH (o:Organization)<-[:BELONGS_TO]-(:User)-[:MEMBER_OF]->(d:Department)
            WITH DISTINCT o, d
            MERGE (o)-[:HAS_DEPARTMENT]->(d)
        "#],
    },
];

const RECORD_VERSION: &str = "MERGE (v:SchemaVersion {version: $version}) ON CREATE SET v.name = $name, v.applied_at = $applied_at";

const USER_FIELDS: &str = "u.id AS id, u.email AS email, u.name AS name, u.role AS role, \
    u.organizationType AS organizationType, u.company AS company, u.department AS department, \
    u.jobTitle AS jobTitle, u.passwordHash AS passwordHash, \
    u.forcePasswordChange AS forcePasswordChange, u.status AS status, \
    u.relationshipType AS relationshipType, u.accessTypes AS accessTypes, \
    u.positionValidated AS positionValidated, toString(u.positionValidatedAt) AS positionValidatedAt, \
    toString(u.createdAt) AS createdAt, toString(u.updatedAt) AS updatedAt";

const FRO_FIELDS: &str = "f.id AS id, f.user_email AS user_email, f.full_name AS full_name, \
    f.job_role AS job_role, f.company AS company, f.department AS department, \
    f.profile_description AS profile_description, f.role_description AS role_description, \
    f.department_description AS department_description, f.competencies AS competencies, \
    f.primary_objective AS primary_objective, f.top_challenges AS top_challenges, \
    f.org_chart_validated AS org_chart_validated, f.memory_level AS memory_level, \
    f.default_visibility AS default_visibility, f.source_type AS source_type, \
    f.confidence AS confidence, f.version AS version, f.status AS status, \
    f.session_id AS session_id, f.duration_seconds AS duration_seconds, \
    toString(f.created_at) AS created_at, toString(f.completed_at) AS completed_at, \
    toString(f.updated_at) AS updated_at";

const ORG_FIELDS: &str = "o.name AS name, o.description AS description, o.industry AS industry, \
    o.size AS size, o.mission AS mission, o.vision AS vision, o.values AS values, \
    o.updatedBy AS updatedBy, toString(o.updatedAt) AS updatedAt";

fn person_fields(alias: &str) -> String {
    format!(
        "{alias}.id AS id, {alias}.email AS email, {alias}.name AS name, \
         {alias}.jobTitle AS jobTitle, {alias}.department AS department"
    )
}

// ── Row mapping ─────────────────────────────────────────────────────

fn text(row: &Row, key: &str) -> String {
    row.get::<String>(key).unwrap_or_default()
}

fn opt(row: &Row, key: &str) -> Option<String> {
    row.get::<Option<String>>(key).ok().flatten()
}

fn list(row: &Row, key: &str) -> Vec<String> {
    row.get::<Vec<String>>(key).unwrap_or_default()
}

fn flag(row: &Row, key: &str) -> bool {
    row.get::<bool>(key).unwrap_or(false)
}

fn count(row: &Row, key: &str) -> u64 {
    row.get::<i64>(key).unwrap_or(0).max(0) as u64
}

fn nullable(value: Option<&str>) -> BoltType {
    match value {
        Some(v) => BoltType::from(v),
        None => BoltType::Null(BoltNull),
    }
}

fn required_id(row: &Row, ctx: &str) -> Result<String, DatabaseError> {
    row.get::<String>("id")
        .map_err(|e| DatabaseError::Query(format!("{ctx}: {e}")))
}

fn row_to_user(row: &Row) -> Result<User, DatabaseError> {
    Ok(User {
        id: required_id(row, "row_to_user")?,
        email: text(row, "email"),
        name: text(row, "name"),
        role: Role::from_label(&text(row, "role")),
        organization_type: text(row, "organizationType").parse().unwrap_or_default(),
        company: opt(row, "company"),
        department: opt(row, "department"),
        job_title: opt(row, "jobTitle"),
        password_hash: text(row, "passwordHash"),
        force_password_change: flag(row, "forcePasswordChange"),
        status: opt(row, "status"),
        relationship_type: opt(row, "relationshipType"),
        access_types: list(row, "accessTypes"),
        position_validated: flag(row, "positionValidated"),
        position_validated_at: opt(row, "positionValidatedAt").map(|s| parse_datetime(&s)),
        created_at: parse_datetime(&text(row, "createdAt")),
        updated_at: parse_datetime(&text(row, "updatedAt")),
    })
}

fn row_to_person(row: &Row) -> Result<PersonRef, DatabaseError> {
    Ok(PersonRef {
        id: required_id(row, "row_to_person")?,
        email: text(row, "email"),
        name: text(row, "name"),
        job_title: opt(row, "jobTitle"),
        department: opt(row, "department"),
    })
}

fn row_to_first_run(row: &Row) -> Result<FirstRunOnboarding, DatabaseError> {
    Ok(FirstRunOnboarding {
        id: required_id(row, "row_to_first_run")?,
        user_email: text(row, "user_email"),
        full_name: text(row, "full_name"),
        job_role: text(row, "job_role"),
        company: text(row, "company"),
        department: text(row, "department"),
        profile_description: text(row, "profile_description"),
        role_description: text(row, "role_description"),
        department_description: text(row, "department_description"),
        competencies: list(row, "competencies"),
        primary_objective: text(row, "primary_objective"),
        top_challenges: text(row, "top_challenges"),
        org_chart_validated: flag(row, "org_chart_validated"),
        memory_level: text(row, "memory_level"),
        default_visibility: text(row, "default_visibility"),
        source_type: text(row, "source_type"),
        confidence: row.get::<f64>("confidence").unwrap_or(1.0),
        version: text(row, "version"),
        status: text(row, "status"),
        session_id: text(row, "session_id"),
        duration_seconds: row.get::<i64>("duration_seconds").unwrap_or(0),
        created_at: parse_datetime(&text(row, "created_at")),
        completed_at: parse_datetime(&text(row, "completed_at")),
        updated_at: parse_datetime(&text(row, "updated_at")),
    })
}

fn row_to_company(row: &Row) -> Result<CompanyProfile, DatabaseError> {
    Ok(CompanyProfile {
        name: text(row, "name"),
        description: opt(row, "description"),
        industry: opt(row, "industry"),
        size: opt(row, "size"),
        mission: opt(row, "mission"),
        vision: opt(row, "vision"),
        values: list(row, "values"),
        updated_by: opt(row, "updatedBy"),
        updated_at: opt(row, "updatedAt").map(|s| parse_datetime(&s)),
    })
}

/// Neo4j database backend. `Graph` pools Bolt connections internally.
pub struct Neo4jBackend {
    graph: Graph,
}

impl Neo4jBackend {
    /// Connect and run pending migrations.
    pub async fn connect(config: &Neo4jConfig) -> Result<Self, DatabaseError> {
        let neo_config = ConfigBuilder::default()
            .uri(config.uri.as_str())
            .user(config.username.as_str())
            .password(config.password.expose_secret())
            .db(config.database.as_str())
            .build()
            .map_err(|e| DatabaseError::Pool(format!("Invalid Neo4j configuration: {e}")))?;
        let graph = Graph::connect(neo_config)
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to connect to Neo4j: {e}")))?;

        let backend = Self { graph };
        backend.run_migrations().await?;
        info!(uri = %config.uri, database = %config.database, "Neo4j connected");
        Ok(backend)
    }

    async fn fetch(&self, q: Query, ctx: &str) -> Result<Vec<Row>, DatabaseError> {
        let mut result = self
            .graph
            .execute(q)
            .await
            .map_err(|e| DatabaseError::Query(format!("{ctx}: {e}")))?;
        let mut rows = Vec::new();
        while let Some(row) = result
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("{ctx}: {e}")))?
        {
            rows.push(row);
        }
        Ok(rows)
    }

    async fn fetch_one(&self, q: Query, ctx: &str) -> Result<Option<Row>, DatabaseError> {
        Ok(self.fetch(q, ctx).await?.into_iter().next())
    }

    async fn fetch_count(&self, q: Query, ctx: &str) -> Result<u64, DatabaseError> {
        Ok(self
            .fetch_one(q, ctx)
            .await?
            .map(|row| count(&row, "n"))
            .unwrap_or(0))
    }

    async fn run(&self, q: Query, ctx: &str) -> Result<(), DatabaseError> {
        self.graph
            .run(q)
            .await
            .map_err(|e| DatabaseError::Query(format!("{ctx}: {e}")))
    }

    /// Run `queries` in one transaction.
    async fn run_in_txn(&self, queries: Vec<Query>, ctx: &str) -> Result<(), DatabaseError> {
        let mut txn = self
            .graph
            .start_txn()
            .await
            .map_err(|e| DatabaseError::Query(format!("{ctx}: begin: {e}")))?;
        txn.run_queries(queries)
            .await
            .map_err(|e| DatabaseError::Query(format!("{ctx}: {e}")))?;
        txn.commit()
            .await
            .map_err(|e| DatabaseError::Query(format!("{ctx}: commit: {e}")))
    }

    async fn user_id_for(&self, email: &str) -> Result<Option<String>, DatabaseError> {
        let row = self
            .fetch_one(
                query("MATCH (u:User {email: $email}) RETURN u.id AS id").param("email", email),
                "user_id_for",
            )
            .await?;
        row.map(|r| required_id(&r, "user_id_for")).transpose()
    }

    async fn require_user(&self, email: &str) -> Result<String, DatabaseError> {
        let email = normalize_email(email);
        match self.user_id_for(&email).await? {
            Some(_) => Ok(email),
            None => Err(DatabaseError::NotFound {
                entity: "User".into(),
                id: email,
            }),
        }
    }

    async fn persons(&self, q: Query, ctx: &str) -> Result<Vec<PersonRef>, DatabaseError> {
        self.fetch(q, ctx)
            .await?
            .iter()
            .map(row_to_person)
            .collect()
    }

    async fn single_strings(&self, q: Query, ctx: &str) -> Result<Vec<String>, DatabaseError> {
        Ok(self
            .fetch(q, ctx)
            .await?
            .iter()
            .map(|row| text(row, "value"))
            .collect())
    }
}

#[async_trait]
impl GraphStore for Neo4jBackend {
    fn backend_name(&self) -> &'static str {
        "neo4j"
    }

    async fn run_migrations(&self) -> Result<Vec<AppliedMigration>, DatabaseError> {
        let current = self.schema_version().await?;
        let mut applied = Vec::new();

        for migration in MIGRATIONS {
            if migration.version <= current {
                continue;
            }
            info!(
                version = migration.version,
                name = migration.name,
                "Applying graph migration"
            );
            let record = query(RECORD_VERSION)
                .param("version", migration.version)
                .param("name", migration.name)
                .param("applied_at", Utc::now().to_rfc3339());

            if migration.schema {
                for statement in migration.statements {
                    self.graph.run(query(statement)).await.map_err(|e| {
                        DatabaseError::Migration(format!(
                            "Graph migration V{} ({}) failed: {e}",
                            migration.version, migration.name
                        ))
                    })?;
                }
                self.graph.run(record).await.map_err(|e| {
                    DatabaseError::Migration(format!(
                        "Failed to record graph migration V{}: {e}",
                        migration.version
                    ))
                })?;
            } else {
                let mut queries: Vec<Query> =
                    migration.statements.iter().map(|s| query(s)).collect();
                queries.push(record);
                self.run_in_txn(queries, migration.name)
                    .await
                    .map_err(|e| {
                        DatabaseError::Migration(format!(
                            "Graph migration V{} ({}) failed: {e}",
                            migration.version, migration.name
                        ))
                    })?;
            }

            applied.push(AppliedMigration {
                version: migration.version,
                name: migration.name.to_string(),
            });
        }

        info!(applied = applied.len(), "Graph migrations complete");
        Ok(applied)
    }

    async fn schema_version(&self) -> Result<i64, DatabaseError> {
        let row = self
            .fetch_one(
                query("MATCH (v:SchemaVersion) RETURN coalesce(max(v.version), 0) AS version"),
                "schema_version",
            )
            .await
            .map_err(|e| DatabaseError::Migration(e.to_string()))?;
        Ok(row
            .and_then(|r| r.get::<i64>("version").ok())
            .unwrap_or(0))
    }

    // ── Users ───────────────────────────────────────────────────────

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, DatabaseError> {
        let q = query(&format!(
            "MATCH (u:User {{email: $email}}) RETURN {USER_FIELDS}"
        ))
        .param("email", normalize_email(email));
        self.fetch_one(q, "find_user_by_email")
            .await?
            .map(|r| row_to_user(&r))
            .transpose()
    }

    async fn find_user_by_id(&self, id: &str) -> Result<Option<User>, DatabaseError> {
        let q = query(&format!("MATCH (u:User {{id: $id}}) RETURN {USER_FIELDS}")).param("id", id);
        self.fetch_one(q, "find_user_by_id")
            .await?
            .map(|r| row_to_user(&r))
            .transpose()
    }

    async fn create_user(&self, user: &NewUser) -> Result<User, DatabaseError> {
        let email = normalize_email(&user.email);
        if self.user_id_for(&email).await?.is_some() {
            return Err(DatabaseError::Constraint(format!(
                "user with email {email} already exists"
            )));
        }
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let q = query(
            "CREATE (u:User {
                id: $id, email: $email, name: $name, role: $role,
                organizationType: $organizationType, company: $company,
                department: $department, jobTitle: $jobTitle,
                passwordHash: $passwordHash, forcePasswordChange: $forcePasswordChange,
                accessTypes: [], positionValidated: false,
                createdAt: $now, updatedAt: $now
            })",
        )
        .param("id", id.clone())
        .param("email", email.clone())
        .param("name", user.name.trim())
        .param("role", user.role.as_str())
        .param("organizationType", user.organization_type.as_str())
        .param("company", nullable(user.company.as_deref()))
        .param("department", nullable(user.department.as_deref()))
        .param("jobTitle", nullable(user.job_title.as_deref()))
        .param("passwordHash", user.password_hash.clone())
        .param("forcePasswordChange", user.force_password_change)
        .param("now", now);
        self.run(q, "create_user").await?;
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
        let email = normalize_email(&entry.email);
        let now = Utc::now().to_rfc3339();
        let existing = self.user_id_for(&email).await?;
        let created = existing.is_none();
        let user_id = existing.unwrap_or_else(|| Uuid::new_v4().to_string());

        // MERGE keeps re-ingestion idempotent even if two rows race.
        let q = query(
            "MERGE (u:User {email: $email})
             ON CREATE SET u.id = $id, u.passwordHash = $passwordHash,
                           u.forcePasswordChange = true, u.organizationType = 'cvc',
                           u.positionValidated = false, u.createdAt = $now, u.role = $role
             SET u.name = $name, u.company = $company, u.jobTitle = $jobTitle,
                 u.department = $department, u.status = $status,
                 u.relationshipType = $relationshipType, u.accessTypes = $accessTypes,
                 u.role = CASE WHEN toLower(coalesce(u.role, '')) IN ['admin', 'administrador']
                               THEN u.role ELSE $role END,
                 u.updatedAt = $now",
        )
        .param("email", email)
        .param("id", user_id.clone())
        .param("passwordHash", default_password_hash)
        .param("now", now)
        .param("role", entry.role.as_str())
        .param("name", entry.name.clone())
        .param("company", entry.company.clone())
        .param("jobTitle", entry.job_title.clone())
        .param("department", entry.department.clone())
        .param("status", entry.status.clone())
        .param("relationshipType", entry.relationship_type.clone())
        .param("accessTypes", entry.access_types.clone());
        self.run(q, "upsert_roster_user").await?;

        Ok(UpsertOutcome { user_id, created })
    }

    async fn update_user(
        &self,
        id: &str,
        update: &UserUpdate,
    ) -> Result<Option<User>, DatabaseError> {
        let q = query(
            "MATCH (u:User {id: $id})
             SET u.name = coalesce($name, u.name),
                 u.role = coalesce($role, u.role),
                 u.organizationType = coalesce($organizationType, u.organizationType),
                 u.company = coalesce($company, u.company),
                 u.department = coalesce($department, u.department),
                 u.jobTitle = coalesce($jobTitle, u.jobTitle),
                 u.status = coalesce($status, u.status),
                 u.updatedAt = $now
             RETURN count(u) AS n",
        )
        .param("id", id)
        .param("name", nullable(update.name.as_deref()))
        .param("role", nullable(update.role.map(|r| r.as_str())))
        .param(
            "organizationType",
            nullable(update.organization_type.map(|o| o.as_str())),
        )
        .param("company", nullable(update.company.as_deref()))
        .param("department", nullable(update.department.as_deref()))
        .param("jobTitle", nullable(update.job_title.as_deref()))
        .param("status", nullable(update.status.as_deref()))
        .param("now", Utc::now().to_rfc3339());
        if self.fetch_count(q, "update_user").await? == 0 {
            return Ok(None);
        }
        self.find_user_by_id(id).await
    }

    async fn delete_user(&self, id: &str) -> Result<bool, DatabaseError> {
        let Some(user) = self.find_user_by_id(id).await? else {
            return Ok(false);
        };
        let owned = query(
            "MATCH (n) WHERE (n:FirstRunOnboarding OR n:AIProfile OR n:PersonaVersion OR n:OnboardingSession)
               AND n.user_email = $email
             DETACH DELETE n",
        )
        .param("email", user.email.clone());
        let node = query("MATCH (u:User {id: $id}) DETACH DELETE u").param("id", user.id.clone());
        self.run_in_txn(vec![owned, node], "delete_user").await?;
        Ok(true)
    }

    async fn list_users(&self) -> Result<Vec<User>, DatabaseError> {
        let q = query(&format!(
            "MATCH (u:User) RETURN {USER_FIELDS} ORDER BY u.name, u.email"
        ));
        self.fetch(q, "list_users").await?.iter().map(row_to_user).collect()
    }

    async fn sample_users(&self, limit: usize) -> Result<Vec<User>, DatabaseError> {
        let q = query(&format!(
            "MATCH (u:User) RETURN {USER_FIELDS} ORDER BY u.name, u.email LIMIT $limit"
        ))
        .param("limit", limit as i64);
        self.fetch(q, "sample_users").await?.iter().map(row_to_user).collect()
    }

    async fn set_password(
        &self,
        email: &str,
        password_hash: &str,
        force_change: bool,
    ) -> Result<bool, DatabaseError> {
        let q = query(
            "MATCH (u:User {email: $email})
             SET u.passwordHash = $hash, u.forcePasswordChange = $force, u.updatedAt = $now
             RETURN count(u) AS n",
        )
        .param("email", normalize_email(email))
        .param("hash", password_hash)
        .param("force", force_change)
        .param("now", Utc::now().to_rfc3339());
        Ok(self.fetch_count(q, "set_password").await? > 0)
    }

    // ── Org structure ───────────────────────────────────────────────

    async fn link_organization(
        &self,
        email: &str,
        organization: &str,
    ) -> Result<(), DatabaseError> {
        let email = self.require_user(email).await?;
        let q = query(
            "MATCH (u:User {email: $email})
             MERGE (o:Organization {name: $name})
             MERGE (u)-[:BELONGS_TO]->(o)",
        )
        .param("email", email)
        .param("name", organization);
        self.run(q, "link_organization").await
    }

    async fn link_department(&self, email: &str, department: &str) -> Result<(), DatabaseError> {
        let email = self.require_user(email).await?;
        let q = query(
            "MATCH (u:User {email: $email})
             MERGE (d:Department {name: $name})
             MERGE (u)-[:MEMBER_OF]->(d)",
        )
        .param("email", email)
        .param("name", department);
        self.run(q, "link_department").await
    }

    async fn link_location(&self, email: &str, location: &str) -> Result<(), DatabaseError> {
        let email = self.require_user(email).await?;
        let q = query(
            "MATCH (u:User {email: $email})
             MERGE (l:Location {name: $name})
             MERGE (u)-[:WORKS_AT]->(l)",
        )
        .param("email", email)
        .param("name", location);
        self.run(q, "link_location").await
    }

    async fn replace_access_areas(
        &self,
        email: &str,
        areas: &[String],
    ) -> Result<usize, DatabaseError> {
        let email = self.require_user(email).await?;
        let areas: Vec<String> = areas
            .iter()
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .collect();
        let clear = query("MATCH (:User {email: $email})-[r:HAS_ACCESS_TO]->() DELETE r")
            .param("email", email.clone());
        let link = query(
            "MATCH (u:User {email: $email})
             UNWIND $areas AS area
             MERGE (d:Department {name: area})
             MERGE (u)-[:HAS_ACCESS_TO]->(d)",
        )
        .param("email", email.clone())
        .param("areas", areas);
        self.run_in_txn(vec![clear, link], "replace_access_areas")
            .await?;

        let n = self
            .fetch_count(
                query("MATCH (:User {email: $email})-[r:HAS_ACCESS_TO]->() RETURN count(r) AS n")
                    .param("email", email),
                "replace_access_areas",
            )
            .await?;
        Ok(n as usize)
    }

    async fn set_manager(&self, email: &str, manager_email: &str) -> Result<bool, DatabaseError> {
        let email = normalize_email(email);
        let manager_email = normalize_email(manager_email);
        if email == manager_email {
            return Ok(false);
        }
        if self.user_id_for(&email).await?.is_none()
            || self.user_id_for(&manager_email).await?.is_none()
        {
            return Ok(false);
        }
        let clear = query(
            "MATCH (:User {email: $email})-[r:REPORTS_TO]->(m:User) WHERE m.email <> $manager DELETE r",
        )
        .param("email", email.clone())
        .param("manager", manager_email.clone());
        let link = query(
            "MATCH (u:User {email: $email}), (m:User {email: $manager})
             MERGE (u)-[:REPORTS_TO]->(m)",
        )
        .param("email", email)
        .param("manager", manager_email);
        self.run_in_txn(vec![clear, link], "set_manager").await?;
        Ok(true)
    }

    async fn link_organization_departments(&self) -> Result<usize, DatabaseError> {
        let q = query(
            "MATCH (o:Organization)<-[:BELONGS_TO]-(:User)-[:MEMBER_OF]->(d:Department)
             WITH DISTINCT o, d
             WHERE NOT (o)-[:HAS_DEPARTMENT]->(d)
             MERGE (o)-[:HAS_DEPARTMENT]->(d)
             RETURN count(*) AS n",
        );
        Ok(self.fetch_count(q, "link_organization_departments").await? as usize)
    }

    async fn graph_counts(&self) -> Result<GraphCounts, DatabaseError> {
        let q = query(
            "RETURN COUNT { (:User) } AS users,
                    COUNT { (:Department) } AS departments,
                    COUNT { (:Organization) } AS organizations,
                    COUNT { (:Location) } AS locations,
                    COUNT { ()-[:MEMBER_OF]->() } AS memberOf,
                    COUNT { ()-[:HAS_ACCESS_TO]->() } AS hasAccessTo,
                    COUNT { ()-[:BELONGS_TO]->() } AS belongsTo,
                    COUNT { ()-[:WORKS_AT]->() } AS worksAt,
                    COUNT { ()-[:REPORTS_TO]->() } AS reportsTo",
        );
        let Some(row) = self.fetch_one(q, "graph_counts").await? else {
            return Ok(GraphCounts::default());
        };
        Ok(GraphCounts {
            users: count(&row, "users"),
            departments: count(&row, "departments"),
            organizations: count(&row, "organizations"),
            locations: count(&row, "locations"),
            member_of: count(&row, "memberOf"),
            has_access_to: count(&row, "hasAccessTo"),
            belongs_to: count(&row, "belongsTo"),
            works_at: count(&row, "worksAt"),
            reports_to: count(&row, "reportsTo"),
        })
    }

    // ── Org chart ───────────────────────────────────────────────────

    async fn org_chart(&self, email: &str) -> Result<Option<OrgChartView>, DatabaseError> {
        let Some(user) = self.find_user_by_email(email).await? else {
            return Ok(None);
        };

        let manager = self
            .persons(
                query(&format!(
                    "MATCH (:User {{email: $email}})-[:REPORTS_TO]->(m:User) RETURN {} LIMIT 1",
                    person_fields("m")
                ))
                .param("email", user.email.clone()),
                "org_chart",
            )
            .await?
            .into_iter()
            .next();

        let peers = self
            .persons(
                query(&format!(
                    "MATCH (u:User {{email: $email}})-[:REPORTS_TO]->(:User)<-[:REPORTS_TO]-(p:User)
                     WHERE p <> u
                     RETURN {} ORDER BY p.name",
                    person_fields("p")
                ))
                .param("email", user.email.clone()),
                "org_chart",
            )
            .await?;

        let subordinates = self
            .persons(
                query(&format!(
                    "MATCH (s:User)-[:REPORTS_TO]->(:User {{email: $email}}) RETURN {} ORDER BY s.name",
                    person_fields("s")
                ))
                .param("email", user.email.clone()),
                "org_chart",
            )
            .await?;

        // Walk up the chain; cycles in imported data stop the walk.
        let mut hierarchy_level = 0;
        let mut visited = HashSet::from([user.email.clone()]);
        let mut cursor = user.email.clone();
        while hierarchy_level < MAX_HIERARCHY_DEPTH {
            let next = self
                .fetch_one(
                    query("MATCH (:User {email: $email})-[:REPORTS_TO]->(m:User) RETURN m.email AS value LIMIT 1")
                        .param("email", cursor.clone()),
                    "org_chart",
                )
                .await?
                .map(|row| text(&row, "value"));
            match next {
                Some(next) if visited.insert(next.clone()) => {
                    hierarchy_level += 1;
                    cursor = next;
                }
                _ => break,
            }
        }

        Ok(Some(OrgChartView {
            user: PersonRef {
                id: user.id.clone(),
                email: user.email.clone(),
                name: user.name.clone(),
                job_title: user.job_title.clone(),
                department: user.department.clone(),
            },
            manager,
            peers,
            subordinates,
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
        let q = query(
            "MATCH (u:User {email: $email})
             SET u.positionValidated = true, u.positionValidatedAt = $at, u.updatedAt = $at
             RETURN count(u) AS n",
        )
        .param("email", normalize_email(email))
        .param("at", at.to_rfc3339());
        Ok(self.fetch_count(q, "mark_position_validated").await? > 0)
    }

    async fn record_org_chart_issue(
        &self,
        email: &str,
        description: &str,
    ) -> Result<OrgChartIssue, DatabaseError> {
        let email = self.require_user(email).await?;
        let issue = OrgChartIssue {
            id: Uuid::new_v4().to_string(),
            user_email: email,
            description: description.trim().to_string(),
            status: "open".into(),
            created_at: Utc::now(),
        };
        let q = query(
            "MATCH (u:User {email: $email})
             CREATE (i:OrgChartIssue {id: $id, user_email: $email, description: $description,
                                      status: $status, created_at: $createdAt})
             CREATE (u)-[:REPORTED_ISSUE]->(i)",
        )
        .param("email", issue.user_email.clone())
        .param("id", issue.id.clone())
        .param("description", issue.description.clone())
        .param("status", issue.status.clone())
        .param("createdAt", issue.created_at.to_rfc3339());
        self.run(q, "record_org_chart_issue").await?;
        Ok(issue)
    }

    async fn list_org_chart_issues(&self) -> Result<Vec<OrgChartIssue>, DatabaseError> {
        let q = query(
            "MATCH (i:OrgChartIssue {status: 'open'})
             RETURN i.id AS id, i.user_email AS user_email, i.description AS description,
                    i.status AS status, i.created_at AS created_at
             ORDER BY i.created_at DESC",
        );
        self.fetch(q, "list_org_chart_issues")
            .await?
            .iter()
            .map(|row| {
                Ok(OrgChartIssue {
                    id: required_id(row, "list_org_chart_issues")?,
                    user_email: text(row, "user_email"),
                    description: text(row, "description"),
                    status: text(row, "status"),
                    created_at: parse_datetime(&text(row, "created_at")),
                })
            })
            .collect()
    }

    // ── Onboarding ──────────────────────────────────────────────────

    async fn get_session(&self, email: &str) -> Result<Option<serde_json::Value>, DatabaseError> {
        let row = self
            .fetch_one(
                query("MATCH (s:OnboardingSession {user_email: $email}) RETURN s.state AS value")
                    .param("email", normalize_email(email)),
                "get_session",
            )
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        match serde_json::from_str(&text(&row, "value")) {
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
        let q = query(
            "MERGE (s:OnboardingSession {user_email: $email})
             SET s.state = $state, s.updated_at = $now",
        )
        .param("email", normalize_email(email))
        .param("state", state)
        .param("now", Utc::now().to_rfc3339());
        self.run(q, "save_session").await
    }

    async fn record_first_run_onboarding(
        &self,
        record: &FirstRunRecord,
    ) -> Result<CompletionOutcome, DatabaseError> {
        let email = normalize_email(&record.user_email);
        let now = Utc::now().to_rfc3339();

        let existing = self
            .fetch_one(
                query(
                    "OPTIONAL MATCH (f:FirstRunOnboarding {user_email: $email})
                     OPTIONAL MATCH (a:AIProfile {user_email: $email})
                     RETURN f.id AS froId, a.id AS aiId,
                            COUNT { (:PersonaVersion {user_email: $email}) } AS n",
                )
                .param("email", email.clone()),
                "record_first_run_onboarding",
            )
            .await?;
        let (existing_fro, existing_ai, persona_count) = match &existing {
            Some(row) => (opt(row, "froId"), opt(row, "aiId"), count(row, "n")),
            None => (None, None, 0),
        };
        let created = existing_fro.is_none();
        let first_run_id = existing_fro.unwrap_or_else(|| record.id.clone());
        let ai_profile_id = existing_ai.unwrap_or_else(|| Uuid::new_v4().to_string());
        let persona_version = persona_version_label(persona_count as usize);
        let competencies: Vec<String> = record
            .competencies
            .iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();
        let competencies_linked = competencies.len();

        let first_run = query(
            "MERGE (f:FirstRunOnboarding {user_email: $email})
             ON CREATE SET f.id = $id, f.created_at = $now, f.source_type = 'user_input',
                           f.confidence = 1.0, f.version = 'v1'
             SET f.full_name = $fullName, f.job_role = $jobRole, f.company = $company,
                 f.department = $department, f.profile_description = $profileDescription,
                 f.role_description = $roleDescription,
                 f.department_description = $departmentDescription,
                 f.competencies = $competencies, f.primary_objective = $primaryObjective,
                 f.top_challenges = $topChallenges, f.org_chart_validated = $orgChartValidated,
                 f.memory_level = $memoryLevel, f.default_visibility = $defaultVisibility,
                 f.session_id = $sessionId, f.duration_seconds = $durationSeconds,
                 f.completed_at = $completedAt, f.updated_at = $now, f.status = 'active'
             WITH f
             OPTIONAL MATCH (u:User {email: $email})
             FOREACH (_ IN CASE WHEN u IS NULL THEN [] ELSE [1] END |
                 MERGE (u)-[:COMPLETED_FIRST_RUN_ONBOARDING]->(f)
                 MERGE (f)-[c:CONFIRMS_POSITION]->(u)
                 SET c.validated = $orgChartValidated)",
        )
        .param("email", email.clone())
        .param("id", first_run_id.clone())
        .param("now", now.clone())
        .param("fullName", record.full_name.clone())
        .param("jobRole", record.job_role.clone())
        .param("company", record.company.clone())
        .param("department", record.department.clone())
        .param("profileDescription", record.profile_description.clone())
        .param("roleDescription", record.role_description.clone())
        .param("departmentDescription", record.department_description.clone())
        .param("competencies", record.competencies.clone())
        .param("primaryObjective", record.primary_objective.clone())
        .param("topChallenges", record.top_challenges.clone())
        .param("orgChartValidated", record.org_chart_validated)
        .param("memoryLevel", record.memory_level.clone())
        .param("defaultVisibility", record.default_visibility.clone())
        .param("sessionId", record.session_id.clone())
        .param("durationSeconds", record.duration_seconds)
        .param("completedAt", record.completed_at.to_rfc3339());

        let ai_profile = query(
            "MERGE (a:AIProfile {user_email: $email})
             ON CREATE SET a.id = $id, a.created_at = $now
             SET a.ai_experience_level = $level, a.technical_path = $technicalPath,
                 a.preferred_communication = $communication, a.status = 'active',
                 a.source = $source, a.source_id = $froId, a.updated_at = $now
             WITH a
             MATCH (f:FirstRunOnboarding {user_email: $email})
             MERGE (f)-[:INITIATES]->(a)
             WITH a
             OPTIONAL MATCH (u:User {email: $email})
             FOREACH (_ IN CASE WHEN u IS NULL THEN [] ELSE [1] END |
                 MERGE (u)-[:HAS_AI_PROFILE]->(a))",
        )
        .param("email", email.clone())
        .param("id", ai_profile_id.clone())
        .param("now", now.clone())
        .param("level", record.ai_profile.ai_experience_level.clone())
        .param("technicalPath", record.ai_profile.technical_path)
        .param("communication", record.ai_profile.preferred_communication.clone())
        .param("source", SOURCE_FIRST_RUN)
        .param("froId", first_run_id.clone());

        let supersede = query(
            "MATCH (p:PersonaVersion {user_email: $email})
             SET p.status = 'superseded'
             WITH p
             OPTIONAL MATCH (:AIProfile)-[r:CURRENT_PERSONA]->(p)
             DELETE r",
        )
        .param("email", email.clone());

        let persona = query(
            "MATCH (a:AIProfile {user_email: $email})
             MATCH (f:FirstRunOnboarding {user_email: $email})
             CREATE (p:PersonaVersion {
                 id: $id, user_email: $email, version: $version,
                 persona_summary: $summary, core_competencies: $coreCompetencies,
                 organizational_context: $context, primary_goals: $goals,
                 key_challenges: $challenges, status: 'active', created_at: $now
             })
             CREATE (a)-[:CURRENT_PERSONA]->(p)
             CREATE (f)-[:GENERATES]->(p)
             WITH p
             OPTIONAL MATCH (u:User {email: $email})
             FOREACH (_ IN CASE WHEN u IS NULL THEN [] ELSE [1] END |
                 MERGE (u)-[:HAS_PERSONA_VERSION]->(p))",
        )
        .param("email", email.clone())
        .param("id", Uuid::new_v4().to_string())
        .param("version", persona_version.clone())
        .param("summary", record.persona.persona_summary.clone())
        .param("coreCompetencies", record.persona.core_competencies.clone())
        .param("context", record.persona.organizational_context.clone())
        .param("goals", record.persona.primary_goals.clone())
        .param("challenges", record.persona.key_challenges.clone())
        .param("now", now.clone());

        let competency_links = query(
            "UNWIND $names AS name
             MERGE (c:Competency {name: name})
               ON CREATE SET c.id = randomUUID(), c.created_at = $now
             WITH c
             OPTIONAL MATCH (u:User {email: $email})
             FOREACH (_ IN CASE WHEN u IS NULL THEN [] ELSE [1] END |
                 MERGE (u)-[r:HAS_COMPETENCY]->(c)
                 SET r.source = $source, r.source_id = $froId,
                     r.confidence = 1.0, r.declared_at = $now)",
        )
        .param("names", competencies)
        .param("email", email.clone())
        .param("source", SOURCE_FIRST_RUN)
        .param("froId", first_run_id.clone())
        .param("now", now);

        self.run_in_txn(
            vec![first_run, ai_profile, supersede, persona, competency_links],
            "record_first_run_onboarding",
        )
        .await?;

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
        let q = query(&format!(
            "MATCH (f:FirstRunOnboarding {{user_email: $email}}) RETURN {FRO_FIELDS}"
        ))
        .param("email", normalize_email(email));
        self.fetch_one(q, "first_run_onboarding")
            .await?
            .map(|r| row_to_first_run(&r))
            .transpose()
    }

    async fn ai_profile(&self, email: &str) -> Result<Option<AiProfile>, DatabaseError> {
        let q = query(
            "MATCH (a:AIProfile {user_email: $email})
             OPTIONAL MATCH (a)-[:CURRENT_PERSONA]->(p:PersonaVersion)
             RETURN a.id AS id, a.user_email AS user_email,
                    a.ai_experience_level AS ai_experience_level,
                    a.technical_path AS technical_path,
                    a.preferred_communication AS preferred_communication,
                    a.status AS status, a.source AS source, a.source_id AS source_id,
                    p.version AS current_persona
             LIMIT 1",
        )
        .param("email", normalize_email(email));
        let Some(row) = self.fetch_one(q, "ai_profile").await? else {
            return Ok(None);
        };
        Ok(Some(AiProfile {
            id: required_id(&row, "ai_profile")?,
            user_email: text(&row, "user_email"),
            ai_experience_level: text(&row, "ai_experience_level"),
            technical_path: flag(&row, "technical_path"),
            preferred_communication: text(&row, "preferred_communication"),
            status: text(&row, "status"),
            source: text(&row, "source"),
            source_id: text(&row, "source_id"),
            current_persona: opt(&row, "current_persona"),
        }))
    }

    async fn persona_versions(&self, email: &str) -> Result<Vec<PersonaVersion>, DatabaseError> {
        let q = query(
            "MATCH (p:PersonaVersion {user_email: $email})
             RETURN p.id AS id, p.version AS version, p.persona_summary AS persona_summary,
                    p.core_competencies AS core_competencies,
                    p.organizational_context AS organizational_context,
                    p.primary_goals AS primary_goals, p.key_challenges AS key_challenges,
                    p.status AS status, toString(p.created_at) AS created_at
             ORDER BY toInteger(substring(p.version, 1))",
        )
        .param("email", normalize_email(email));
        self.fetch(q, "persona_versions")
            .await?
            .iter()
            .map(|row| {
                Ok(PersonaVersion {
                    id: required_id(row, "persona_versions")?,
                    version: text(row, "version"),
                    persona_summary: text(row, "persona_summary"),
                    core_competencies: list(row, "core_competencies"),
                    organizational_context: text(row, "organizational_context"),
                    primary_goals: text(row, "primary_goals"),
                    key_challenges: text(row, "key_challenges"),
                    status: text(row, "status"),
                    created_at: parse_datetime(&text(row, "created_at")),
                })
            })
            .collect()
    }

    async fn user_competencies(&self, email: &str) -> Result<Vec<CompetencyLink>, DatabaseError> {
        let q = query(
            "MATCH (:User {email: $email})-[r:HAS_COMPETENCY]->(c:Competency)
             RETURN c.name AS name, r.source AS source, r.source_id AS source_id,
                    r.confidence AS confidence, toString(r.declared_at) AS declared_at
             ORDER BY c.name",
        )
        .param("email", normalize_email(email));
        Ok(self
            .fetch(q, "user_competencies")
            .await?
            .iter()
            .map(|row| CompetencyLink {
                name: text(row, "name"),
                source: text(row, "source"),
                source_id: text(row, "source_id"),
                confidence: row.get::<f64>("confidence").unwrap_or(1.0),
                declared_at: parse_datetime(&text(row, "declared_at")),
            })
            .collect())
    }

    // ── Company ─────────────────────────────────────────────────────

    async fn company_profile(
        &self,
        name: Option<&str>,
    ) -> Result<Option<CompanyProfile>, DatabaseError> {
        let q = query(&format!(
            "MATCH (o:Organization) WHERE $name IS NULL OR o.name = $name
             RETURN {ORG_FIELDS} ORDER BY o.name LIMIT 1"
        ))
        .param("name", nullable(name));
        self.fetch_one(q, "company_profile")
            .await?
            .map(|r| row_to_company(&r))
            .transpose()
    }

    async fn save_company_profile(
        &self,
        update: &CompanyProfileUpdate,
        updated_by: &str,
    ) -> Result<Option<CompanyProfile>, DatabaseError> {
        let Some(current) = self.company_profile(update.name.as_deref()).await? else {
            return Ok(None);
        };
        let q = query(
            "MATCH (o:Organization {name: $name})
             SET o.description = $description, o.industry = $industry, o.size = $size,
                 o.mission = $mission, o.vision = $vision, o.values = $values,
                 o.updatedBy = $updatedBy, o.updatedAt = $now",
        )
        .param("name", current.name.clone())
        .param("description", update.description.trim())
        .param("industry", nullable(update.industry.as_deref()))
        .param("size", nullable(update.size.as_deref()))
        .param("mission", nullable(update.mission.as_deref()))
        .param("vision", nullable(update.vision.as_deref()))
        .param("values", update.values.clone())
        .param("updatedBy", updated_by)
        .param("now", Utc::now().to_rfc3339());
        self.run(q, "save_company_profile").await?;
        self.company_profile(Some(&current.name)).await
    }

    async fn organizational_structure(&self) -> Result<OrganizationalStructure, DatabaseError> {
        let organizations = self
            .single_strings(
                query("MATCH (o:Organization) RETURN o.name AS value ORDER BY value"),
                "organizational_structure",
            )
            .await?;
        let departments = self
            .fetch(
                query(
                    "MATCH (d:Department)
                     OPTIONAL MATCH (u:User)-[:MEMBER_OF]->(d)
                     RETURN d.name AS name, count(u) AS n ORDER BY name",
                ),
                "organizational_structure",
            )
            .await?
            .iter()
            .map(|row| DepartmentSummary {
                name: text(row, "name"),
                member_count: count(row, "n"),
            })
            .collect();
        let totals = self
            .fetch_one(
                query(
                    "RETURN COUNT { (:User) } AS total,
                            COUNT { (u:User) WHERE EXISTS { (u)-[:COMPLETED_FIRST_RUN_ONBOARDING]->(:FirstRunOnboarding) } } AS onboarded",
                ),
                "organizational_structure",
            )
            .await?;
        let (total, onboarded) = totals
            .map(|row| (count(&row, "total"), count(&row, "onboarded")))
            .unwrap_or((0, 0));
        Ok(OrganizationalStructure::new(
            organizations,
            departments,
            total,
            onboarded,
        ))
    }

    async fn profile_data(&self, email: &str) -> Result<Option<ProfileData>, DatabaseError> {
        let Some(user) = self.find_user_by_email(email).await? else {
            return Ok(None);
        };
        let related = |rel: &str, label: &str| {
            query(&format!(
                "MATCH (:User {{email: $email}})-[:{rel}]->(n:{label}) RETURN n.name AS value ORDER BY value"
            ))
            .param("email", user.email.clone())
        };
        let departments = self
            .single_strings(related("MEMBER_OF", "Department"), "profile_data")
            .await?;
        let organizations = self
            .single_strings(related("BELONGS_TO", "Organization"), "profile_data")
            .await?;
        let location = self
            .single_strings(related("WORKS_AT", "Location"), "profile_data")
            .await?
            .into_iter()
            .next();
        let access_areas = self
            .single_strings(related("HAS_ACCESS_TO", "Department"), "profile_data")
            .await?;
        let first_run_onboarding = self.first_run_onboarding(&user.email).await?;
        if first_run_onboarding.is_none() {
            warn!(email = %user.email, "Profile requested before first-run onboarding");
        }
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
