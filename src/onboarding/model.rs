//! Onboarding answers and the graph records produced on completion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How comfortable the user is with AI tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AiExperienceLevel {
    #[default]
    #[serde(rename = "iniciante")]
    Beginner,
    #[serde(rename = "intermediário")]
    Intermediate,
    #[serde(rename = "técnico")]
    Technical,
}

impl AiExperienceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Beginner => "iniciante",
            Self::Intermediate => "intermediário",
            Self::Technical => "técnico",
        }
    }
}

/// Register the assistant should use with the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PreferredLanguage {
    #[default]
    #[serde(rename = "simples")]
    Plain,
    #[serde(rename = "técnica")]
    Technical,
}

impl PreferredLanguage {
    /// Communication style stored on the AI profile.
    pub fn communication_style(&self) -> &'static str {
        match self {
            Self::Plain => "direto",
            Self::Technical => "técnico",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    Corporate,
    Personal,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Corporate => "corporate",
            Self::Personal => "personal",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MemoryLevel {
    Short,
    Medium,
    #[default]
    Long,
}

impl MemoryLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Short => "short",
            Self::Medium => "medium",
            Self::Long => "long",
        }
    }
}

/// Phase of the guided goals conversation inside the wizard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConversationPhase {
    #[default]
    NotStarted,
    Goals,
    Challenges,
    Preferences,
    Validation,
    Done,
}

/// Everything the wizard collects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct OnboardingResponses {
    pub full_name: String,
    pub email: String,
    pub job_role: String,

    pub company: String,
    pub department: String,
    pub org_chart_validated: bool,

    pub role_description: String,
    pub department_description: String,

    pub profile_description: String,
    pub competencies: Vec<String>,

    pub primary_objective: String,
    pub top_challenges: String,

    pub ai_experience_level: AiExperienceLevel,
    pub technical_path: bool,
    pub needs: Vec<String>,
    pub preferred_language: PreferredLanguage,

    pub default_visibility: Visibility,
    pub memory_level: MemoryLevel,

    pub conversation_phase: ConversationPhase,
    pub conversation_signals: Vec<String>,
    pub conversation_started_at: Option<DateTime<Utc>>,
    pub conversation_completed_at: Option<DateTime<Utc>>,
}

/// A typed update of one answer, as sent by `POST /onboarding/session/response`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "camelCase")]
pub enum ResponseUpdate {
    FullName(String),
    Email(String),
    JobRole(String),
    Company(String),
    Department(String),
    OrgChartValidated(bool),
    RoleDescription(String),
    DepartmentDescription(String),
    ProfileDescription(String),
    Competencies(Vec<String>),
    PrimaryObjective(String),
    TopChallenges(String),
    AiExperienceLevel(AiExperienceLevel),
    TechnicalPath(bool),
    Needs(Vec<String>),
    PreferredLanguage(PreferredLanguage),
    DefaultVisibility(Visibility),
    MemoryLevel(MemoryLevel),
}

impl OnboardingResponses {
    pub fn apply(&mut self, update: ResponseUpdate) {
        match update {
            ResponseUpdate::FullName(v) => self.full_name = v,
            ResponseUpdate::Email(v) => self.email = v,
            ResponseUpdate::JobRole(v) => self.job_role = v,
            ResponseUpdate::Company(v) => self.company = v,
            ResponseUpdate::Department(v) => self.department = v,
            ResponseUpdate::OrgChartValidated(v) => self.org_chart_validated = v,
            ResponseUpdate::RoleDescription(v) => self.role_description = v,
            ResponseUpdate::DepartmentDescription(v) => self.department_description = v,
            ResponseUpdate::ProfileDescription(v) => self.profile_description = v,
            ResponseUpdate::Competencies(v) => self.competencies = clean_list(v),
            ResponseUpdate::PrimaryObjective(v) => self.primary_objective = v,
            ResponseUpdate::TopChallenges(v) => self.top_challenges = v,
            ResponseUpdate::AiExperienceLevel(v) => self.ai_experience_level = v,
            ResponseUpdate::TechnicalPath(v) => self.technical_path = v,
            ResponseUpdate::Needs(v) => self.needs = clean_list(v),
            ResponseUpdate::PreferredLanguage(v) => self.preferred_language = v,
            ResponseUpdate::DefaultVisibility(v) => self.default_visibility = v,
            ResponseUpdate::MemoryLevel(v) => self.memory_level = v,
        }
    }

    /// Add `need` if absent, remove it if present.
    pub fn toggle_need(&mut self, need: &str) {
        if let Some(pos) = self.needs.iter().position(|n| n == need) {
            self.needs.remove(pos);
        } else {
            self.needs.push(need.to_string());
        }
    }
}

/// Trim entries and drop empties and duplicates, preserving order.
fn clean_list(values: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(values.len());
    for v in values {
        let v = v.trim().to_string();
        if !v.is_empty() && !out.contains(&v) {
            out.push(v);
        }
    }
    out
}

/// Profile facts known before the wizard starts, taken from the user record.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Prefill {
    pub name: String,
    pub email: String,
    pub company: Option<String>,
    pub job_title: Option<String>,
    pub department: Option<String>,
    pub location: Option<String>,
    pub organization_type: String,
    pub status: Option<String>,
    pub relationship_type: Option<String>,
    pub access_types: Vec<String>,
}

impl Prefill {
    /// Overlay onto default answers, as `start` does.
    pub fn seed(&self) -> OnboardingResponses {
        OnboardingResponses {
            full_name: self.name.clone(),
            email: self.email.clone(),
            job_role: self.job_title.clone().unwrap_or_default(),
            company: self.company.clone().unwrap_or_default(),
            department: self.department.clone().unwrap_or_default(),
            ..OnboardingResponses::default()
        }
    }
}

// ── Completion records ──────────────────────────────────────────────

/// AI-interaction preferences written to the user's AIProfile.
#[derive(Debug, Clone, PartialEq)]
pub struct AiProfileInput {
    pub ai_experience_level: String,
    pub technical_path: bool,
    pub preferred_communication: String,
}

/// Content of a new PersonaVersion; the store assigns the version label.
#[derive(Debug, Clone, PartialEq)]
pub struct PersonaDraft {
    pub persona_summary: String,
    pub core_competencies: Vec<String>,
    pub organizational_context: String,
    pub primary_goals: String,
    pub key_challenges: String,
}

/// Everything written atomically when a user completes onboarding.
#[derive(Debug, Clone)]
pub struct FirstRunRecord {
    pub id: String,
    pub user_email: String,
    pub full_name: String,
    pub job_role: String,
    pub company: String,
    pub department: String,
    pub profile_description: String,
    pub role_description: String,
    pub department_description: String,
    pub competencies: Vec<String>,
    pub primary_objective: String,
    pub top_challenges: String,
    pub org_chart_validated: bool,
    pub memory_level: String,
    pub default_visibility: String,
    pub session_id: String,
    pub duration_seconds: i64,
    pub completed_at: DateTime<Utc>,
    pub ai_profile: AiProfileInput,
    pub persona: PersonaDraft,
}

/// What the store did with a [`FirstRunRecord`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionOutcome {
    pub first_run_id: String,
    /// False when an existing FirstRunOnboarding was updated in place.
    pub created: bool,
    pub ai_profile_id: String,
    pub persona_version: String,
    pub competencies_linked: usize,
}

/// Stored FirstRunOnboarding.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FirstRunOnboarding {
    pub id: String,
    pub user_email: String,
    pub full_name: String,
    pub job_role: String,
    pub company: String,
    pub department: String,
    pub profile_description: String,
    pub role_description: String,
    pub department_description: String,
    pub competencies: Vec<String>,
    pub primary_objective: String,
    pub top_challenges: String,
    pub org_chart_validated: bool,
    pub memory_level: String,
    pub default_visibility: String,
    pub source_type: String,
    pub confidence: f64,
    pub version: String,
    pub status: String,
    pub session_id: String,
    pub duration_seconds: i64,
    pub created_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AiProfile {
    pub id: String,
    pub user_email: String,
    pub ai_experience_level: String,
    pub technical_path: bool,
    pub preferred_communication: String,
    pub status: String,
    pub source: String,
    pub source_id: String,
    /// Version label of the persona `CURRENT_PERSONA` points to.
    pub current_persona: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonaVersion {
    pub id: String,
    pub version: String,
    pub persona_summary: String,
    pub core_competencies: Vec<String>,
    pub organizational_context: String,
    pub primary_goals: String,
    pub key_challenges: String,
    /// `active` for the current persona, `superseded` otherwise.
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// A `HAS_COMPETENCY` edge with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompetencyLink {
    pub name: String,
    pub source: String,
    pub source_id: String,
    pub confidence: f64,
    pub declared_at: DateTime<Utc>,
}

pub const SOURCE_FIRST_RUN: &str = "first_run_onboarding";

/// Label for the persona version that follows `existing` versions.
pub fn persona_version_label(existing: usize) -> String {
    format!("v{}", existing + 1)
}
