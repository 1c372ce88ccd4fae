//! Onboarding wizard state machine: which step the user is on, which steps
//! are done, and the answers collected so far.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::model::{ConversationPhase, OnboardingResponses, ResponseUpdate};

/// The wizard steps, in order.
///
/// Progresses linearly: Welcome → Profile → Organization → OrgChart →
/// Competencies → Goals → AiProfile → Review → Done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnboardingStep {
    Welcome,
    Profile,
    Organization,
    OrgChart,
    Competencies,
    Goals,
    AiProfile,
    Review,
    Done,
}

impl OnboardingStep {
    pub const ALL: [OnboardingStep; 9] = [
        Self::Welcome,
        Self::Profile,
        Self::Organization,
        Self::OrgChart,
        Self::Competencies,
        Self::Goals,
        Self::AiProfile,
        Self::Review,
        Self::Done,
    ];

    pub fn index(&self) -> usize {
        Self::ALL.iter().position(|s| s == self).unwrap_or(0)
    }

    /// The following step, if any.
    pub fn next(&self) -> Option<OnboardingStep> {
        Self::ALL.get(self.index() + 1).copied()
    }

    /// The preceding step, if any.
    pub fn prev(&self) -> Option<OnboardingStep> {
        self.index().checked_sub(1).and_then(|i| Self::ALL.get(i).copied())
    }

    /// Whether this step is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Welcome => "welcome",
            Self::Profile => "profile",
            Self::Organization => "organization",
            Self::OrgChart => "org_chart",
            Self::Competencies => "competencies",
            Self::Goals => "goals",
            Self::AiProfile => "ai_profile",
            Self::Review => "review",
            Self::Done => "done",
        }
    }

    /// Parse a step id, including ids written by older clients.
    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            // the memory step was folded into review
            "memory" => Some(Self::Review),
            _ => Self::ALL.iter().copied().find(|s| s.as_str() == id),
        }
    }
}

impl Default for OnboardingStep {
    fn default() -> Self {
        Self::Welcome
    }
}

impl std::fmt::Display for OnboardingStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Overall progress, also reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OnboardingStatus {
    #[default]
    NotStarted,
    InProgress,
    Review,
    Completed,
}

impl OnboardingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Review => "review",
            Self::Completed => "completed",
        }
    }

    fn from_id(id: &str) -> Option<Self> {
        match id {
            "not_started" => Some(Self::NotStarted),
            "in_progress" => Some(Self::InProgress),
            "review" => Some(Self::Review),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

impl std::fmt::Display for OnboardingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted wizard session for one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct OnboardingSession {
    pub status: OnboardingStatus,
    pub current_step: OnboardingStep,
    /// Ordered, duplicate-free.
    pub completed_steps: Vec<OnboardingStep>,
    pub responses: OnboardingResponses,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl OnboardingSession {
    /// Begin the wizard with answers seeded from the user's record.
    pub fn start(&mut self, seeded: OnboardingResponses) {
        self.status = OnboardingStatus::InProgress;
        self.current_step = OnboardingStep::Profile;
        self.completed_steps = vec![OnboardingStep::Welcome];
        self.responses = seeded;
        self.started_at = Some(Utc::now());
        self.completed_at = None;
    }

    /// Advance one step; stays put on `done`. Entering `review` flips the
    /// status to review.
    pub fn next(&mut self) -> OnboardingStep {
        if let Some(next) = self.current_step.next() {
            self.current_step = next;
        }
        if self.current_step == OnboardingStep::Review {
            self.status = OnboardingStatus::Review;
        }
        self.current_step
    }

    /// Go back one step; stays put on `welcome`.
    pub fn prev(&mut self) -> OnboardingStep {
        if let Some(prev) = self.current_step.prev() {
            self.current_step = prev;
        }
        self.current_step
    }

    pub fn go_to(&mut self, step: OnboardingStep) {
        self.current_step = step;
    }

    pub fn mark_step_complete(&mut self, step: OnboardingStep) {
        if !self.completed_steps.contains(&step) {
            self.completed_steps.push(step);
        }
    }

    pub fn update_response(&mut self, update: ResponseUpdate) {
        self.responses.apply(update);
    }

    pub fn toggle_need(&mut self, need: &str) {
        self.responses.toggle_need(need);
    }

    pub fn start_conversation(&mut self) {
        self.responses.conversation_phase = ConversationPhase::Goals;
        self.responses.conversation_started_at = Some(Utc::now());
    }

    pub fn update_conversation_phase(&mut self, phase: ConversationPhase) {
        self.responses.conversation_phase = phase;
        if phase == ConversationPhase::Done {
            self.responses.conversation_completed_at = Some(Utc::now());
        }
    }

    pub fn add_conversation_signal(&mut self, signal: &str) {
        self.responses.conversation_signals.push(signal.to_string());
    }

    /// Finish the wizard: every step is marked complete.
    pub fn complete(&mut self) {
        self.status = OnboardingStatus::Completed;
        self.current_step = OnboardingStep::Done;
        for step in OnboardingStep::ALL {
            self.mark_step_complete(step);
        }
        self.completed_at = Some(Utc::now());
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Reconcile with the status the backend reports. Returns whether the
    /// session changed.
    pub fn sync_status(&mut self, backend: OnboardingStatus) -> bool {
        let before = self.clone();
        match backend {
            OnboardingStatus::Completed => {
                if self.status != OnboardingStatus::Completed {
                    let completed_at = self.completed_at;
                    self.complete();
                    if completed_at.is_some() {
                        self.completed_at = completed_at;
                    }
                }
            }
            OnboardingStatus::NotStarted => {
                if self.status == OnboardingStatus::Completed {
                    self.reset();
                }
            }
            OnboardingStatus::InProgress | OnboardingStatus::Review => {
                if self.status == OnboardingStatus::NotStarted {
                    self.status = backend;
                    if self.current_step == OnboardingStep::Welcome {
                        self.current_step = OnboardingStep::Profile;
                    }
                    self.mark_step_complete(OnboardingStep::Welcome);
                }
            }
        }
        *self != before
    }

    /// Rebuild a session from whatever an older client or server version
    /// stored. Unknown steps fall back to `welcome`, unknown completed ids are
    /// dropped, and missing or malformed answers take their defaults.
    pub fn from_persisted(value: &Value) -> Self {
        let state = value.get("state").filter(|s| s.is_object()).unwrap_or(value);
        let text = |keys: &[&str]| {
            keys.iter()
                .find_map(|k| state.get(*k).and_then(Value::as_str))
                .map(str::to_string)
        };

        let status = text(&["status"])
            .and_then(|s| OnboardingStatus::from_id(&s))
            .unwrap_or_default();
        let current_step = text(&["currentStep", "currentStepId"])
            .and_then(|s| OnboardingStep::from_id(&s))
            .unwrap_or_default();

        let mut completed_steps = Vec::new();
        let completed = state
            .get("completedSteps")
            .or_else(|| state.get("completedStepIds"))
            .and_then(Value::as_array);
        for id in completed.into_iter().flatten().filter_map(Value::as_str) {
            // only exact ids count here; a legacy "memory" entry is dropped
            if let Some(step) = OnboardingStep::ALL.iter().find(|s| s.as_str() == id) {
                if !completed_steps.contains(step) {
                    completed_steps.push(*step);
                }
            }
        }

        let responses = state
            .get("responses")
            .map(lenient_responses)
            .unwrap_or_default();

        let timestamp = |keys: &[&str]| {
            text(keys)
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|dt| dt.with_timezone(&Utc))
        };

        Self {
            status,
            current_step,
            completed_steps,
            responses,
            started_at: timestamp(&["startedAt"]),
            completed_at: timestamp(&["completedAt"]),
        }
    }
}

/// Merge stored answers over the defaults one field at a time, skipping any
/// field whose stored value no longer deserializes.
fn lenient_responses(stored: &Value) -> OnboardingResponses {
    if let Ok(parsed) = serde_json::from_value::<OnboardingResponses>(stored.clone()) {
        return parsed;
    }
    let Some(fields) = stored.as_object() else {
        return OnboardingResponses::default();
    };
    let mut merged = match serde_json::to_value(OnboardingResponses::default()) {
        Ok(Value::Object(map)) => map,
        _ => return OnboardingResponses::default(),
    };
    for (key, value) in fields {
        if !merged.contains_key(key) {
            continue;
        }
        let previous = merged.insert(key.clone(), value.clone());
        if serde_json::from_value::<OnboardingResponses>(Value::Object(merged.clone())).is_err() {
            if let Some(previous) = previous {
                merged.insert(key.clone(), previous);
            }
        }
    }
    serde_json::from_value(Value::Object(merged)).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::onboarding::model::MemoryLevel;

    #[test]
    fn linear_step_order() {
        assert_eq!(OnboardingStep::Welcome.next(), Some(OnboardingStep::Profile));
        assert_eq!(OnboardingStep::Goals.next(), Some(OnboardingStep::AiProfile));
        assert_eq!(OnboardingStep::Review.next(), Some(OnboardingStep::Done));
        assert_eq!(OnboardingStep::Done.next(), None);
        assert_eq!(OnboardingStep::Welcome.prev(), None);
        assert!(OnboardingStep::Done.is_terminal());
    }

    #[test]
    fn display_matches_serde() {
        for step in OnboardingStep::ALL {
            let json = serde_json::to_value(step).unwrap();
            assert_eq!(json.as_str().unwrap(), step.to_string());
        }
        for status in [
            OnboardingStatus::NotStarted,
            OnboardingStatus::InProgress,
            OnboardingStatus::Review,
            OnboardingStatus::Completed,
        ] {
            let json = serde_json::to_value(status).unwrap();
            assert_eq!(json.as_str().unwrap(), status.to_string());
        }
    }

    #[test]
    fn start_enters_profile() {
        let mut s = OnboardingSession::default();
        let mut seeded = OnboardingResponses::default();
        seeded.full_name = "Ana".into();
        s.start(seeded);
        assert_eq!(s.status, OnboardingStatus::InProgress);
        assert_eq!(s.current_step, OnboardingStep::Profile);
        assert_eq!(s.completed_steps, vec![OnboardingStep::Welcome]);
        assert_eq!(s.responses.full_name, "Ana");
        assert!(s.started_at.is_some());
        assert!(s.completed_at.is_none());
    }

    #[test]
    fn next_clamps_at_done() {
        let mut s = OnboardingSession::default();
        for _ in 0..20 {
            s.next();
        }
        assert_eq!(s.current_step, OnboardingStep::Done);
        assert_eq!(s.next(), OnboardingStep::Done);
    }

    #[test]
    fn prev_clamps_at_welcome() {
        let mut s = OnboardingSession::default();
        assert_eq!(s.prev(), OnboardingStep::Welcome);
        s.go_to(OnboardingStep::Organization);
        assert_eq!(s.prev(), OnboardingStep::Profile);
        assert_eq!(s.prev(), OnboardingStep::Welcome);
        assert_eq!(s.prev(), OnboardingStep::Welcome);
    }

    #[test]
    fn entering_review_sets_review_status() {
        let mut s = OnboardingSession::default();
        s.start(OnboardingResponses::default());
        s.go_to(OnboardingStep::AiProfile);
        assert_eq!(s.next(), OnboardingStep::Review);
        assert_eq!(s.status, OnboardingStatus::Review);
    }

    #[test]
    fn mark_step_complete_is_idempotent() {
        let mut s = OnboardingSession::default();
        s.mark_step_complete(OnboardingStep::Profile);
        s.mark_step_complete(OnboardingStep::Profile);
        s.mark_step_complete(OnboardingStep::Goals);
        assert_eq!(
            s.completed_steps,
            vec![OnboardingStep::Profile, OnboardingStep::Goals]
        );
    }

    #[test]
    fn complete_marks_everything() {
        let mut s = OnboardingSession::default();
        s.start(OnboardingResponses::default());
        s.mark_step_complete(OnboardingStep::Goals);
        s.complete();
        assert_eq!(s.status, OnboardingStatus::Completed);
        assert_eq!(s.current_step, OnboardingStep::Done);
        assert_eq!(s.completed_steps.len(), OnboardingStep::ALL.len());
        assert!(s.completed_at.is_some());
    }

    #[test]
    fn reset_restores_defaults() {
        let mut s = OnboardingSession::default();
        s.start(OnboardingResponses::default());
        s.toggle_need("x");
        s.reset();
        assert_eq!(s, OnboardingSession::default());
    }

    #[test]
    fn conversation_pipeline() {
        let mut s = OnboardingSession::default();
        s.start_conversation();
        assert_eq!(s.responses.conversation_phase, ConversationPhase::Goals);
        assert!(s.responses.conversation_started_at.is_some());
        s.add_conversation_signal("quer automatizar relatórios");
        s.update_conversation_phase(ConversationPhase::Challenges);
        assert!(s.responses.conversation_completed_at.is_none());
        s.update_conversation_phase(ConversationPhase::Done);
        assert!(s.responses.conversation_completed_at.is_some());
        assert_eq!(s.responses.conversation_signals.len(), 1);
    }

    #[test]
    fn sync_completed_from_backend() {
        let mut s = OnboardingSession::default();
        s.start(OnboardingResponses::default());
        assert!(s.sync_status(OnboardingStatus::Completed));
        assert_eq!(s.status, OnboardingStatus::Completed);
        assert_eq!(s.current_step, OnboardingStep::Done);
        // already in sync
        assert!(!s.sync_status(OnboardingStatus::Completed));
    }

    #[test]
    fn sync_not_started_resets_stale_completion() {
        let mut s = OnboardingSession::default();
        s.complete();
        assert!(s.sync_status(OnboardingStatus::NotStarted));
        assert_eq!(s, OnboardingSession::default());
    }

    #[test]
    fn sync_in_progress_keeps_local_progress() {
        let mut s = OnboardingSession::default();
        s.start(OnboardingResponses::default());
        s.go_to(OnboardingStep::Goals);
        assert!(!s.sync_status(OnboardingStatus::InProgress));
        assert_eq!(s.current_step, OnboardingStep::Goals);

        let mut fresh = OnboardingSession::default();
        assert!(fresh.sync_status(OnboardingStatus::InProgress));
        assert_eq!(fresh.status, OnboardingStatus::InProgress);
        assert_eq!(fresh.current_step, OnboardingStep::Profile);
    }

    #[test]
    fn persisted_roundtrip() {
        let mut s = OnboardingSession::default();
        s.start(OnboardingResponses::default());
        s.next();
        let value = serde_json::to_value(&s).unwrap();
        assert_eq!(OnboardingSession::from_persisted(&value), s);
    }

    #[test]
    fn legacy_client_blob_is_upgraded() {
        let legacy = serde_json::json!({
            "state": {
                "status": "in_progress",
                "currentStepId": "memory",
                "completedStepIds": ["welcome", "profile", "memory", "profile", "bogus"],
                "responses": {
                    "fullName": "Carlos",
                    "memoryLevel": "forever",
                    "competencies": "not-a-list"
                },
                "startedAt": "2025-03-01T12:00:00.000Z"
            },
            "version": 4
        });
        let s = OnboardingSession::from_persisted(&legacy);
        assert_eq!(s.status, OnboardingStatus::InProgress);
        assert_eq!(s.current_step, OnboardingStep::Review);
        assert_eq!(
            s.completed_steps,
            vec![OnboardingStep::Welcome, OnboardingStep::Profile]
        );
        assert_eq!(s.responses.full_name, "Carlos");
        assert_eq!(s.responses.memory_level, MemoryLevel::Long);
        assert!(s.responses.competencies.is_empty());
        assert!(s.started_at.is_some());
    }

    #[test]
    fn unknown_step_falls_back_to_welcome() {
        let s = OnboardingSession::from_persisted(&serde_json::json!({"currentStep": "tour"}));
        assert_eq!(s.current_step, OnboardingStep::Welcome);
        assert_eq!(s.status, OnboardingStatus::NotStarted);
    }
}
