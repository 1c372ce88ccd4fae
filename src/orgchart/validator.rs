//! Org-chart position validation: a user confirms (or reports a problem
//! with) where the org chart places them.
//!
//! [`PositionValidator`] holds the view state for one user. Backend failures
//! are recorded in `error` and never change the visibility flags.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::model::{OrgChartIssue, Position};
use crate::error::{DatabaseError, OrgChartError};
use crate::store::GraphStore;

/// Where positions come from and where confirmations go.
#[async_trait]
pub trait PositionBackend: Send + Sync {
    async fn fetch_position(&self, email: &str) -> Result<Option<Position>, OrgChartError>;

    /// Record the confirmation. Returns the stored timestamp.
    async fn confirm_position(&self, email: &str) -> Result<DateTime<Utc>, OrgChartError>;

    async fn report_issue(
        &self,
        email: &str,
        description: &str,
    ) -> Result<OrgChartIssue, OrgChartError>;
}

/// [`PositionBackend`] over the graph store.
pub struct StorePositionBackend {
    store: Arc<dyn GraphStore>,
}

impl StorePositionBackend {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }
}

fn backend_error(e: DatabaseError) -> OrgChartError {
    OrgChartError::Backend(e.to_string())
}

#[async_trait]
impl PositionBackend for StorePositionBackend {
    async fn fetch_position(&self, email: &str) -> Result<Option<Position>, OrgChartError> {
        let view = self.store.org_chart(email).await.map_err(backend_error)?;
        Ok(view.map(Position::from))
    }

    async fn confirm_position(&self, email: &str) -> Result<DateTime<Utc>, OrgChartError> {
        let now = Utc::now();
        if !self
            .store
            .mark_position_validated(email, now)
            .await
            .map_err(backend_error)?
        {
            return Err(OrgChartError::PositionNotFound(email.to_string()));
        }
        Ok(now)
    }

    async fn report_issue(
        &self,
        email: &str,
        description: &str,
    ) -> Result<OrgChartIssue, OrgChartError> {
        self.store
            .record_org_chart_issue(email, description)
            .await
            .map_err(backend_error)
    }
}

/// View state of the validation card and report modal.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorState {
    pub position: Option<Position>,
    pub is_loading: bool,
    pub error: Option<String>,
    pub show_validation_card: bool,
    pub show_report_modal: bool,
}

pub struct PositionValidator {
    backend: Arc<dyn PositionBackend>,
    email: String,
    state: ValidatorState,
}

impl PositionValidator {
    pub fn new(backend: Arc<dyn PositionBackend>, email: impl Into<String>) -> Self {
        Self {
            backend,
            email: email.into(),
            state: ValidatorState::default(),
        }
    }

    pub fn state(&self) -> &ValidatorState {
        &self.state
    }

    pub fn into_state(self) -> ValidatorState {
        self.state
    }

    /// Fetch the position. The card is shown iff a position exists and the
    /// user has not validated it yet.
    pub async fn load_position(&mut self) {
        self.state.is_loading = true;
        match self.backend.fetch_position(&self.email).await {
            Ok(position) => {
                self.state.show_validation_card =
                    position.as_ref().is_some_and(|p| !p.validated_by_user);
                self.state.position = position;
                self.state.error = None;
            }
            Err(e) => {
                warn!(email = %self.email, error = %e, "Failed to load org-chart position");
                self.state.error = Some(e.to_string());
            }
        }
        self.state.is_loading = false;
    }

    pub async fn validate_position(&mut self) {
        if self.state.position.is_none() {
            self.state.error = Some(OrgChartError::PositionNotFound(self.email.clone()).to_string());
            return;
        }
        self.state.is_loading = true;
        match self.backend.confirm_position(&self.email).await {
            Ok(at) => {
                if let Some(position) = self.state.position.as_mut() {
                    position.validated_by_user = true;
                    position.validated_at = Some(at);
                }
                self.state.show_validation_card = false;
                self.state.error = None;
                info!(email = %self.email, "Org-chart position validated");
            }
            Err(e) => {
                warn!(email = %self.email, error = %e, "Failed to validate org-chart position");
                self.state.error = Some(e.to_string());
            }
        }
        self.state.is_loading = false;
    }

    /// Send a report. Returns the stored issue on success.
    pub async fn report_issue(&mut self, description: &str) -> Option<OrgChartIssue> {
        let description = description.trim();
        if description.is_empty() {
            self.state.error = Some(OrgChartError::EmptyReport.to_string());
            return None;
        }
        self.state.is_loading = true;
        let result = self.backend.report_issue(&self.email, description).await;
        self.state.is_loading = false;
        match result {
            Ok(issue) => {
                self.state.show_report_modal = false;
                self.state.show_validation_card = false;
                self.state.error = None;
                info!(email = %self.email, issue = %issue.id, "Org-chart issue reported");
                Some(issue)
            }
            Err(e) => {
                warn!(email = %self.email, error = %e, "Failed to report org-chart issue");
                self.state.error = Some(e.to_string());
                None
            }
        }
    }

    pub fn hide_validation_card(&mut self) {
        self.state.show_validation_card = false;
    }

    pub fn open_report_modal(&mut self) {
        self.state.show_report_modal = true;
    }

    /// Close the modal and drop any error it was showing.
    pub fn close_report_modal(&mut self) {
        self.state.show_report_modal = false;
        self.state.error = None;
    }

    pub fn clear_error(&mut self) {
        self.state.error = None;
    }
}
