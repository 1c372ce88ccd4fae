//! The single async interface over the knowledge graph.
//!
//! Two backends implement it: Neo4j (production) and embedded libSQL
//! (local development and tests). Services only ever see
//! `Arc<dyn GraphStore>`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::company::model::{
    CompanyProfile, CompanyProfileUpdate, OrganizationalStructure, ProfileData,
};
use crate::error::DatabaseError;
use crate::onboarding::model::{
    AiProfile, CompetencyLink, CompletionOutcome, FirstRunOnboarding, FirstRunRecord,
    PersonaVersion,
};
use crate::orgchart::model::{OrgChartIssue, OrgChartView};
use crate::users::model::{NewUser, RosterUser, UpsertOutcome, User, UserUpdate};

/// Node and relationship totals reported by `GET /admin/ingest/status`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphCounts {
    pub users: u64,
    pub departments: u64,
    pub organizations: u64,
    pub locations: u64,
    pub member_of: u64,
    pub has_access_to: u64,
    pub belongs_to: u64,
    pub works_at: u64,
    pub reports_to: u64,
}

impl GraphCounts {
    pub fn is_empty(&self) -> bool {
        self.users == 0
    }
}

/// One applied schema migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedMigration {
    pub version: i64,
    pub name: String,
}

/// Backend-agnostic store covering users, org structure and onboarding.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Backend name for logs and banners.
    fn backend_name(&self) -> &'static str;

    /// Run all pending schema migrations. Returns the versions applied now.
    async fn run_migrations(&self) -> Result<Vec<AppliedMigration>, DatabaseError>;

    /// Highest applied migration version, 0 when none.
    async fn schema_version(&self) -> Result<i64, DatabaseError>;

    // ── Users ───────────────────────────────────────────────────────

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, DatabaseError>;

    async fn find_user_by_id(&self, id: &str) -> Result<Option<User>, DatabaseError>;

    /// Create a user. Fails with `Constraint` when the email already exists.
    async fn create_user(&self, user: &NewUser) -> Result<User, DatabaseError>;

    /// Merge a roster row by email. New users get `default_password_hash`
    /// and must change it; existing admins keep their role.
    async fn upsert_roster_user(
        &self,
        entry: &RosterUser,
        default_password_hash: &str,
    ) -> Result<UpsertOutcome, DatabaseError>;

    async fn update_user(&self, id: &str, update: &UserUpdate)
    -> Result<Option<User>, DatabaseError>;

    /// Delete a user and every relationship touching it.
    async fn delete_user(&self, id: &str) -> Result<bool, DatabaseError>;

    /// All users ordered by name.
    async fn list_users(&self) -> Result<Vec<User>, DatabaseError>;

    /// Up to `limit` users ordered by name.
    async fn sample_users(&self, limit: usize) -> Result<Vec<User>, DatabaseError>;

    /// Replace a user's password hash. Returns false when no such email.
    async fn set_password(
        &self,
        email: &str,
        password_hash: &str,
        force_change: bool,
    ) -> Result<bool, DatabaseError>;

    // ── Org structure ───────────────────────────────────────────────

    /// `(User)-[:BELONGS_TO]->(Organization)`, merging the organization.
    async fn link_organization(&self, email: &str, organization: &str)
    -> Result<(), DatabaseError>;

    /// `(User)-[:MEMBER_OF]->(Department)`, merging the department.
    async fn link_department(&self, email: &str, department: &str) -> Result<(), DatabaseError>;

    /// `(User)-[:WORKS_AT]->(Location)`, merging the location.
    async fn link_location(&self, email: &str, location: &str) -> Result<(), DatabaseError>;

    /// Replace every `HAS_ACCESS_TO` of the user with `areas` (departments).
    /// Returns the number of edges now present.
    async fn replace_access_areas(
        &self,
        email: &str,
        areas: &[String],
    ) -> Result<usize, DatabaseError>;

    /// Replace the user's `REPORTS_TO` edge. Returns false (and leaves the
    /// graph untouched) when either user is missing or both are the same.
    async fn set_manager(&self, email: &str, manager_email: &str) -> Result<bool, DatabaseError>;

    /// `(Organization)-[:HAS_DEPARTMENT]->(Department)` for every department
    /// that has a member belonging to the organization. Returns edges created.
    async fn link_organization_departments(&self) -> Result<usize, DatabaseError>;

    async fn graph_counts(&self) -> Result<GraphCounts, DatabaseError>;

    // ── Org chart ───────────────────────────────────────────────────

    async fn org_chart(&self, email: &str) -> Result<Option<OrgChartView>, DatabaseError>;

    async fn mark_position_validated(
        &self,
        email: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError>;

    async fn record_org_chart_issue(
        &self,
        email: &str,
        description: &str,
    ) -> Result<OrgChartIssue, DatabaseError>;

    /// Open issues, newest first.
    async fn list_org_chart_issues(&self) -> Result<Vec<OrgChartIssue>, DatabaseError>;

    // ── Onboarding ──────────────────────────────────────────────────

    /// Raw persisted wizard session for a user.
    async fn get_session(&self, email: &str) -> Result<Option<serde_json::Value>, DatabaseError>;

    async fn save_session(&self, email: &str, session: &serde_json::Value)
    -> Result<(), DatabaseError>;

    /// Write FirstRunOnboarding, AIProfile, a new PersonaVersion and
    /// competencies in one transaction.
    async fn record_first_run_onboarding(
        &self,
        record: &FirstRunRecord,
    ) -> Result<CompletionOutcome, DatabaseError>;

    async fn first_run_onboarding(
        &self,
        email: &str,
    ) -> Result<Option<FirstRunOnboarding>, DatabaseError>;

    async fn ai_profile(&self, email: &str) -> Result<Option<AiProfile>, DatabaseError>;

    /// All persona versions, oldest first.
    async fn persona_versions(&self, email: &str) -> Result<Vec<PersonaVersion>, DatabaseError>;

    async fn user_competencies(&self, email: &str) -> Result<Vec<CompetencyLink>, DatabaseError>;

    // ── Company ─────────────────────────────────────────────────────

    /// Profile of the named organization, or of the first one by name.
    async fn company_profile(
        &self,
        name: Option<&str>,
    ) -> Result<Option<CompanyProfile>, DatabaseError>;

    /// Returns None when no matching organization exists.
    async fn save_company_profile(
        &self,
        update: &CompanyProfileUpdate,
        updated_by: &str,
    ) -> Result<Option<CompanyProfile>, DatabaseError>;

    async fn organizational_structure(&self) -> Result<OrganizationalStructure, DatabaseError>;

    async fn profile_data(&self, email: &str) -> Result<Option<ProfileData>, DatabaseError>;
}
