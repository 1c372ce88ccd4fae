//! Company profile and organization-wide structure summaries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::onboarding::model::FirstRunOnboarding;
use crate::users::model::User;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyProfile {
    pub name: String,
    pub description: Option<String>,
    pub industry: Option<String>,
    pub size: Option<String>,
    pub mission: Option<String>,
    pub vision: Option<String>,
    pub values: Vec<String>,
    pub updated_by: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Body of `POST /company/profile`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyProfileUpdate {
    /// Organization to update; defaults to the first one by name.
    pub name: Option<String>,
    pub description: String,
    pub industry: Option<String>,
    pub size: Option<String>,
    pub mission: Option<String>,
    pub vision: Option<String>,
    #[serde(default)]
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DepartmentSummary {
    pub name: String,
    pub member_count: u64,
}

/// Departments and onboarding coverage for the whole graph.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationalStructure {
    pub organizations: Vec<String>,
    pub departments: Vec<DepartmentSummary>,
    pub total_users: u64,
    pub with_onboarding: u64,
    pub without_onboarding: u64,
    /// Share of users with a FirstRunOnboarding, 0-100.
    pub coverage_percent: f64,
}

impl OrganizationalStructure {
    pub fn new(
        organizations: Vec<String>,
        departments: Vec<DepartmentSummary>,
        total_users: u64,
        with_onboarding: u64,
    ) -> Self {
        let coverage_percent = if total_users == 0 {
            0.0
        } else {
            ((with_onboarding as f64 / total_users as f64) * 1000.0).round() / 10.0
        };
        Self {
            organizations,
            departments,
            total_users,
            with_onboarding,
            without_onboarding: total_users.saturating_sub(with_onboarding),
            coverage_percent,
        }
    }
}

/// Everything known about one user, for profile pages.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileData {
    pub user: User,
    pub first_run_onboarding: Option<FirstRunOnboarding>,
    pub departments: Vec<String>,
    pub organizations: Vec<String>,
    pub location: Option<String>,
    pub access_areas: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coverage_rounds_to_one_decimal() {
        let s = OrganizationalStructure::new(vec![], vec![], 3, 1);
        assert_eq!(s.coverage_percent, 33.3);
        assert_eq!(s.without_onboarding, 2);
    }

    #[test]
    fn coverage_of_empty_graph() {
        let s = OrganizationalStructure::new(vec![], vec![], 0, 0);
        assert_eq!(s.coverage_percent, 0.0);
        assert_eq!(s.without_onboarding, 0);
    }
}
