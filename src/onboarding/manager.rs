//! OnboardingManager — loads a user's wizard session, applies one action to
//! it, persists it back, and turns a finished session into graph records.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use super::model::{
    AiProfileInput, CompletionOutcome, ConversationPhase, FirstRunRecord, Prefill, ResponseUpdate,
};
use super::persona::persona_draft;
use super::state::{OnboardingSession, OnboardingStatus, OnboardingStep};
use crate::auth::Principal;
use crate::error::{DatabaseError, Error, OnboardingError};
use crate::store::GraphStore;

/// One mutation of the wizard session, as posted to
/// `/onboarding/session/{action}`.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionAction {
    Start,
    Next,
    Prev,
    GoTo(OnboardingStep),
    Response(ResponseUpdate),
    ToggleNeed(String),
    StepComplete(OnboardingStep),
    StartConversation,
    ConversationPhase(ConversationPhase),
    ConversationSignal(String),
    Reset,
    Sync,
}

#[derive(Deserialize)]
struct StepBody {
    step: String,
}

#[derive(Deserialize)]
struct NeedBody {
    need: String,
}

#[derive(Deserialize)]
struct PhaseBody {
    phase: ConversationPhase,
}

#[derive(Deserialize)]
struct SignalBody {
    signal: String,
}

impl SessionAction {
    /// Parse the action named in the URL with its JSON body.
    pub fn parse(action: &str, body: Value) -> Result<Self, Error> {
        fn body_as<T: DeserializeOwned>(action: &str, body: Value) -> Result<T, Error> {
            serde_json::from_value(body)
                .map_err(|e| Error::Validation(format!("invalid body for '{action}': {e}")))
        }
        fn step(id: &str) -> Result<OnboardingStep, Error> {
            OnboardingStep::from_id(id).ok_or_else(|| OnboardingError::UnknownStep(id.into()).into())
        }

        Ok(match action {
            "start" => Self::Start,
            "next" => Self::Next,
            "prev" => Self::Prev,
            "goto" => Self::GoTo(step(&body_as::<StepBody>(action, body)?.step)?),
            "response" => Self::Response(body_as(action, body)?),
            "need" => Self::ToggleNeed(body_as::<NeedBody>(action, body)?.need),
            "step-complete" => Self::StepComplete(step(&body_as::<StepBody>(action, body)?.step)?),
            "conversation/start" => Self::StartConversation,
            "conversation/phase" => {
                Self::ConversationPhase(body_as::<PhaseBody>(action, body)?.phase)
            }
            "conversation/signal" => {
                let signal = body_as::<SignalBody>(action, body)?.signal;
                if signal.trim().is_empty() {
                    return Err(Error::Validation("signal must not be empty".into()));
                }
                Self::ConversationSignal(signal)
            }
            "reset" => Self::Reset,
            "sync" => Self::Sync,
            other => return Err(Error::Validation(format!("unknown session action '{other}'"))),
        })
    }
}

/// `GET /onboarding/status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusView {
    pub status: OnboardingStatus,
    pub has_first_run_onboarding: bool,
    pub current_step: OnboardingStep,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Result of `POST /onboarding/complete`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Completion {
    #[serde(flatten)]
    pub outcome: CompletionOutcome,
    pub session: OnboardingSession,
}

pub struct OnboardingManager {
    store: Arc<dyn GraphStore>,
}

impl OnboardingManager {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    /// Profile facts from the user record, department and location from the
    /// graph. The bootstrap admin has no record and gets just its email.
    pub async fn prefill(&self, principal: &Principal) -> Result<Prefill, Error> {
        if principal.is_bootstrap() {
            return Ok(Prefill {
                email: principal.email.clone(),
                organization_type: principal.organization_type.to_string(),
                ..Prefill::default()
            });
        }
        let data = self
            .store
            .profile_data(&principal.email)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "User".into(),
                id: principal.email.clone(),
            })?;
        let user = data.user;
        Ok(Prefill {
            name: user.name,
            email: user.email,
            company: user.company,
            job_title: user.job_title,
            department: data.departments.into_iter().next().or(user.department),
            location: data.location,
            organization_type: user.organization_type.to_string(),
            status: user.status,
            relationship_type: user.relationship_type,
            access_types: user.access_types,
        })
    }

    pub async fn session(&self, email: &str) -> Result<OnboardingSession, Error> {
        Ok(self
            .store
            .get_session(email)
            .await?
            .map(|value| OnboardingSession::from_persisted(&value))
            .unwrap_or_default())
    }

    async fn save(&self, email: &str, session: &OnboardingSession) -> Result<(), Error> {
        let value = serde_json::to_value(session)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        self.store.save_session(email, &value).await?;
        Ok(())
    }

    /// Server-side status: completed iff a FirstRunOnboarding exists,
    /// otherwise whatever the session says.
    pub async fn status(&self, email: &str) -> Result<StatusView, Error> {
        let first_run = self.store.first_run_onboarding(email).await?;
        let session = self.session(email).await?;
        Ok(StatusView {
            status: if first_run.is_some() {
                OnboardingStatus::Completed
            } else {
                session.status
            },
            has_first_run_onboarding: first_run.is_some(),
            current_step: session.current_step,
            completed_at: first_run.map(|f| f.completed_at).or(session.completed_at),
        })
    }

    /// Apply one action and persist the resulting session.
    pub async fn apply(
        &self,
        principal: &Principal,
        action: SessionAction,
    ) -> Result<OnboardingSession, Error> {
        let email = principal.email.as_str();
        let mut session = self.session(email).await?;
        match action {
            SessionAction::Start => {
                let prefill = self.prefill(principal).await?;
                session.start(prefill.seed());
                info!(email = %email, "Onboarding started");
            }
            SessionAction::Next => {
                session.next();
            }
            SessionAction::Prev => {
                session.prev();
            }
            SessionAction::GoTo(step) => session.go_to(step),
            SessionAction::Response(update) => session.update_response(update),
            SessionAction::ToggleNeed(need) => session.toggle_need(&need),
            SessionAction::StepComplete(step) => session.mark_step_complete(step),
            SessionAction::StartConversation => session.start_conversation(),
            SessionAction::ConversationPhase(phase) => session.update_conversation_phase(phase),
            SessionAction::ConversationSignal(signal) => session.add_conversation_signal(&signal),
            SessionAction::Reset => {
                session.reset();
                info!(email = %email, "Onboarding reset");
            }
            SessionAction::Sync => {
                let backend = if self.store.first_run_onboarding(email).await?.is_some() {
                    OnboardingStatus::Completed
                } else {
                    OnboardingStatus::NotStarted
                };
                if session.sync_status(backend) {
                    info!(email = %email, status = %session.status, "Onboarding session synced");
                }
            }
        }
        self.save(email, &session).await?;
        Ok(session)
    }

    /// Write the session's answers to the graph and close the wizard.
    pub async fn complete(&self, principal: &Principal) -> Result<Completion, Error> {
        let email = principal.email.as_str();
        let mut session = self.session(email).await?;
        if session.status == OnboardingStatus::NotStarted {
            return Err(OnboardingError::NotStarted.into());
        }
        let r = &session.responses;
        if r.full_name.trim().is_empty() {
            return Err(OnboardingError::MissingAnswer("fullName").into());
        }
        if r.job_role.trim().is_empty() {
            return Err(OnboardingError::MissingAnswer("jobRole").into());
        }

        let completed_at = Utc::now();
        let duration_seconds = session
            .started_at
            .map(|started| (completed_at - started).num_seconds().max(0))
            .unwrap_or(0);
        let record = FirstRunRecord {
            id: Uuid::new_v4().to_string(),
            user_email: email.to_string(),
            full_name: r.full_name.trim().to_string(),
            job_role: r.job_role.trim().to_string(),
            company: r.company.trim().to_string(),
            department: r.department.trim().to_string(),
            profile_description: r.profile_description.trim().to_string(),
            role_description: r.role_description.trim().to_string(),
            department_description: r.department_description.trim().to_string(),
            competencies: r.competencies.clone(),
            primary_objective: r.primary_objective.trim().to_string(),
            top_challenges: r.top_challenges.trim().to_string(),
            org_chart_validated: r.org_chart_validated,
            memory_level: r.memory_level.as_str().to_string(),
            default_visibility: r.default_visibility.as_str().to_string(),
            session_id: Uuid::new_v4().to_string(),
            duration_seconds,
            completed_at,
            ai_profile: AiProfileInput {
                ai_experience_level: r.ai_experience_level.as_str().to_string(),
                technical_path: r.technical_path,
                preferred_communication: r.preferred_language.communication_style().to_string(),
            },
            persona: persona_draft(r),
        };

        let outcome = self.store.record_first_run_onboarding(&record).await?;
        session.complete();
        self.save(email, &session).await?;
        info!(
            email = %email,
            persona = %outcome.persona_version,
            competencies = outcome.competencies_linked,
            created = outcome.created,
            "Onboarding completed"
        );
        Ok(Completion { outcome, session })
    }
}
