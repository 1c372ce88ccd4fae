//! Builds the persona snapshot stored alongside the AI profile.

use super::model::{OnboardingResponses, PersonaDraft};

const SUMMARY_DESCRIPTION_CHARS: usize = 150;
const CONTEXT_CHARS: usize = 200;

/// First `max` characters of `text` (not bytes).
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// `"{name} é {role} na área de {department}. {description}"`
pub fn persona_summary(responses: &OnboardingResponses) -> String {
    let department = if responses.department.trim().is_empty() {
        "N/A"
    } else {
        responses.department.trim()
    };
    let description = truncate_chars(
        responses.profile_description.trim(),
        SUMMARY_DESCRIPTION_CHARS,
    );
    format!(
        "{} é {} na área de {}. {}",
        responses.full_name.trim(),
        responses.job_role.trim(),
        department,
        description
    )
    .trim_end()
    .to_string()
}

pub fn persona_draft(responses: &OnboardingResponses) -> PersonaDraft {
    PersonaDraft {
        persona_summary: persona_summary(responses),
        core_competencies: responses.competencies.clone(),
        organizational_context: truncate_chars(responses.role_description.trim(), CONTEXT_CHARS)
            .to_string(),
        primary_goals: responses.primary_objective.trim().to_string(),
        key_challenges: responses.top_challenges.trim().to_string(),
    }
}
