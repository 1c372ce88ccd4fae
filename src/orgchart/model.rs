//! Org-chart views over `REPORTS_TO`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A person as shown on an org chart card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonRef {
    pub id: String,
    pub email: String,
    pub name: String,
    pub job_title: Option<String>,
    pub department: Option<String>,
}

/// Manager, peers and direct reports around one user.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrgChartView {
    pub user: PersonRef,
    pub manager: Option<PersonRef>,
    /// Other direct reports of the same manager, sorted by name.
    pub peers: Vec<PersonRef>,
    pub subordinates: Vec<PersonRef>,
    /// Number of managers above the user.
    pub hierarchy_level: u32,
    pub validated_by_user: bool,
    pub validated_at: Option<DateTime<Utc>>,
}

/// The slice of the org chart a user is asked to confirm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub user: PersonRef,
    pub department: Option<String>,
    pub hierarchy_level: u32,
    pub manager: Option<PersonRef>,
    pub subordinates: Vec<PersonRef>,
    pub validated_by_user: bool,
    pub validated_at: Option<DateTime<Utc>>,
}

impl From<OrgChartView> for Position {
    fn from(view: OrgChartView) -> Self {
        Self {
            department: view.user.department.clone(),
            user: view.user,
            hierarchy_level: view.hierarchy_level,
            manager: view.manager,
            subordinates: view.subordinates,
            validated_by_user: view.validated_by_user,
            validated_at: view.validated_at,
        }
    }
}

/// A user's report that their org-chart position is wrong.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrgChartIssue {
    pub id: String,
    pub user_email: String,
    pub description: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}
