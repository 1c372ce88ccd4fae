//! Org-chart ingestion: roster rows become users and their relationships.
//!
//! Users and their organization, department, location and access links are
//! written in a first pass. Manager links are resolved in a second pass once
//! every user exists, so row order does not matter.

use std::path::Path;
use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::{info, warn};

use super::encoding::{self, Decoded};
use super::roster::{self, RosterRow};
use crate::auth::PasswordHasher;
use crate::config::IngestConfig;
use crate::error::{Error, IngestError};
use crate::store::{GraphCounts, GraphStore};
use crate::users::model::{RosterUser, User};

/// Users shown by the status endpoint.
const SAMPLE_USERS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RowAction {
    Created,
    Updated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowError {
    pub row: usize,
    pub email: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestSummary {
    pub total_rows: usize,
    pub users_created: usize,
    pub users_updated: usize,
    pub departments_linked: usize,
    pub organizations_linked: usize,
    pub locations_linked: usize,
    pub access_relationships: usize,
    pub reports_to_created: usize,
    pub errors: Vec<RowError>,
    /// Manager emails that matched no user.
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestedUser {
    pub email: String,
    pub name: String,
    pub action: RowAction,
    pub department: String,
    pub access_areas: Vec<String>,
    pub access_types: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub summary: IngestSummary,
    pub users: Vec<IngestedUser>,
}

/// `GET /admin/ingest/status`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestStatus {
    pub counts: GraphCounts,
    pub sample_users: Vec<User>,
    pub is_empty: bool,
}

pub struct IngestService {
    store: Arc<dyn GraphStore>,
    hasher: PasswordHasher,
    default_password: SecretString,
    max_bytes: u64,
    max_file_size_mb: u64,
}

impl IngestService {
    pub fn new(store: Arc<dyn GraphStore>, hasher: PasswordHasher, config: &IngestConfig) -> Self {
        if config.uses_builtin_password() {
            warn!("INGEST_DEFAULT_PASSWORD is unset; ingested users get the built-in default password");
        }
        Self {
            store,
            hasher,
            default_password: config.default_password.clone(),
            max_bytes: config.max_file_size_mb.saturating_mul(1024 * 1024),
            max_file_size_mb: config.max_file_size_mb,
        }
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    pub async fn status(&self) -> Result<IngestStatus, Error> {
        let counts = self.store.graph_counts().await?;
        let sample_users = self.store.sample_users(SAMPLE_USERS).await?;
        Ok(IngestStatus {
            is_empty: counts.is_empty(),
            counts,
            sample_users,
        })
    }

    /// Decode, parse and ingest an uploaded roster.
    pub async fn ingest_bytes(&self, bytes: &[u8]) -> Result<IngestReport, Error> {
        if bytes.len() as u64 > self.max_bytes {
            return Err(IngestError::TooLarge {
                limit_mb: self.max_file_size_mb,
            }
            .into());
        }
        let decoded = encoding::decode(bytes);
        if decoded.repairs > 0 {
            info!(repairs = decoded.repairs, "Repaired mis-encoded roster text");
        }
        let rows = roster::parse(&decoded.text)?;
        self.ingest_rows(&rows).await
    }

    pub async fn ingest_file(&self, path: &Path) -> Result<IngestReport, Error> {
        let bytes = tokio::fs::read(path).await.map_err(IngestError::Io)?;
        info!(path = %path.display(), bytes = bytes.len(), "Ingesting roster file");
        self.ingest_bytes(&bytes).await
    }

    pub async fn ingest_rows(&self, rows: &[RosterRow]) -> Result<IngestReport, Error> {
        let password = self.default_password.expose_secret().to_string();
        let default_hash = self.hasher.hash_blocking(&password).await?;
        let mut report = IngestReport::default();
        report.summary.total_rows = rows.len();

        let mut managed = Vec::new();
        for row in rows {
            if row.email.is_empty() {
                report.summary.errors.push(RowError {
                    row: row.row,
                    email: String::new(),
                    error: "Missing email".into(),
                });
                continue;
            }
            match self.ingest_row(row, &default_hash, &mut report.summary).await {
                Ok(action) => {
                    report.users.push(IngestedUser {
                        email: row.email.clone(),
                        name: row.name.clone(),
                        action,
                        department: row.department.clone(),
                        access_areas: row.access_areas.clone(),
                        access_types: row.access_types.clone(),
                    });
                    if !row.manager_email.is_empty() && row.manager_email != row.email {
                        managed.push(row);
                    }
                }
                Err(e) => {
                    warn!(row = row.row, email = %row.email, error = %e, "Roster row failed");
                    report.summary.errors.push(RowError {
                        row: row.row,
                        email: row.email.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        for row in managed {
            match self.store.set_manager(&row.email, &row.manager_email).await {
                Ok(true) => report.summary.reports_to_created += 1,
                Ok(false) => {
                    warn!(email = %row.email, manager = %row.manager_email, "Manager not found");
                    report
                        .summary
                        .warnings
                        .push(format!("Manager not found for {}: {}", row.email, row.manager_email));
                }
                Err(e) => report.summary.errors.push(RowError {
                    row: row.row,
                    email: row.email.clone(),
                    error: e.to_string(),
                }),
            }
        }

        let s = &report.summary;
        info!(
            created = s.users_created,
            updated = s.users_updated,
            reports_to = s.reports_to_created,
            errors = s.errors.len(),
            "Ingestion complete"
        );
        Ok(report)
    }

    async fn ingest_row(
        &self,
        row: &RosterRow,
        default_hash: &str,
        summary: &mut IngestSummary,
    ) -> Result<RowAction, Error> {
        let outcome = self
            .store
            .upsert_roster_user(
                &RosterUser {
                    email: row.email.clone(),
                    name: row.name.clone(),
                    company: row.company.clone(),
                    job_title: row.job_title.clone(),
                    department: row.department.clone(),
                    role: row.role,
                    status: row.status.clone(),
                    relationship_type: row.relationship_type.clone(),
                    access_types: row.access_types.clone(),
                },
                default_hash,
            )
            .await?;
        let action = if outcome.created {
            summary.users_created += 1;
            RowAction::Created
        } else {
            summary.users_updated += 1;
            RowAction::Updated
        };

        if !row.company.is_empty() {
            self.store.link_organization(&row.email, &row.company).await?;
            summary.organizations_linked += 1;
        }
        if !row.department.is_empty() {
            self.store.link_department(&row.email, &row.department).await?;
            summary.departments_linked += 1;
        }
        if !row.location.is_empty() {
            self.store.link_location(&row.email, &row.location).await?;
            summary.locations_linked += 1;
        }
        summary.access_relationships += self
            .store
            .replace_access_areas(&row.email, &row.access_areas)
            .await?;
        Ok(action)
    }
}

/// Rewrite a roster file as repaired UTF-8.
pub async fn fix_encoding(input: &Path, output: &Path) -> Result<Decoded, IngestError> {
    let bytes = tokio::fs::read(input).await?;
    let decoded = encoding::decode(&bytes);
    tokio::fs::write(output, decoded.text.as_bytes()).await?;
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LibSqlBackend;
    use crate::users::model::Role;

    const HEADER: &str = "name;company;jobTitle;department;access;relationshipType;accessTypes;location;email;status;role;managerEmail";

    async fn service() -> (IngestService, Arc<dyn GraphStore>) {
        let store: Arc<dyn GraphStore> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let config = IngestConfig {
            default_password: SecretString::from("EKB123"),
            max_file_size_mb: 1,
        };
        (
            IngestService::new(Arc::clone(&store), PasswordHasher::new(4), &config),
            store,
        )
    }

    #[tokio::test]
    async fn huge_size_limit_saturates() {
        let store: Arc<dyn GraphStore> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let config = IngestConfig {
            default_password: SecretString::from("Troque-2024"),
            max_file_size_mb: u64::MAX / 1024,
        };
        let ingest = IngestService::new(store, PasswordHasher::new(4), &config);
        assert_eq!(ingest.max_bytes(), u64::MAX);
    }

    fn roster() -> String {
        // the report comes before the manager on purpose
        format!(
            "{HEADER}\n\
             Ana;Acme;Analista;Finanas;Finanças;CLT;leitura;São Paulo;ana@acme.com;ativo;user;bob@acme.com\n\
             ;Acme;;;;;;;;;;\n\
             Bob;Acme;Diretor;Finanças;\"Finanças;Jurídico\";CLT;;São Paulo;bob@acme.com;ativo;admin;bob@acme.com\n\
             Carla;Acme;Analista;Operação;;CLT;;;carla@acme.com;ativo;user;ghost@acme.com\n"
        )
    }

    #[tokio::test]
    async fn ingest_builds_users_and_links() {
        let (ingest, store) = service().await;
        let report = ingest.ingest_bytes(roster().as_bytes()).await.unwrap();
        let s = &report.summary;

        assert_eq!(s.total_rows, 4);
        assert_eq!(s.users_created, 3);
        assert_eq!(s.users_updated, 0);
        assert_eq!(s.errors.len(), 1);
        assert_eq!(s.errors[0].row, 3);
        assert_eq!(s.errors[0].error, "Missing email");
        assert_eq!(s.access_relationships, 3);
        // Bob reports to himself (skipped), Carla's manager does not exist
        assert_eq!(s.reports_to_created, 1);
        assert_eq!(s.warnings.len(), 1);

        let counts = store.graph_counts().await.unwrap();
        assert_eq!(counts.users, 3);
        assert_eq!(counts.reports_to, 1);
        assert_eq!(counts.locations, 1);

        let ana = store.find_user_by_email("ana@acme.com").await.unwrap().unwrap();
        assert!(ana.force_password_change);
        assert_eq!(ana.department.as_deref(), Some("Finanças"));
        let bob = store.find_user_by_email("bob@acme.com").await.unwrap().unwrap();
        assert_eq!(bob.role, Role::Admin);
    }

    #[tokio::test]
    async fn reingestion_updates_without_duplicates() {
        let (ingest, store) = service().await;
        ingest.ingest_bytes(roster().as_bytes()).await.unwrap();
        let report = ingest.ingest_bytes(roster().as_bytes()).await.unwrap();

        assert_eq!(report.summary.users_created, 0);
        assert_eq!(report.summary.users_updated, 3);
        assert!(report.users.iter().all(|u| u.action == RowAction::Updated));

        let counts = store.graph_counts().await.unwrap();
        assert_eq!(counts.users, 3);
        assert_eq!(counts.reports_to, 1);
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected() {
        let (ingest, _) = service().await;
        let big = vec![b'a'; (ingest.max_bytes() + 1) as usize];
        let err = ingest.ingest_bytes(&big).await.unwrap_err();
        assert!(matches!(err, Error::Ingest(IngestError::TooLarge { limit_mb: 1 })));
    }

    #[tokio::test]
    async fn status_reports_empty_graph() {
        let (ingest, _) = service().await;
        let status = ingest.status().await.unwrap();
        assert!(status.is_empty);
        assert!(status.sample_users.is_empty());

        ingest.ingest_bytes(roster().as_bytes()).await.unwrap();
        let status = ingest.status().await.unwrap();
        assert!(!status.is_empty);
        assert_eq!(status.sample_users.len(), 3);
    }

    #[tokio::test]
    async fn fix_encoding_writes_utf8() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("roster.csv");
        let output = dir.path().join("roster_fixed.csv");
        std::fs::write(&input, b"Diretoria de Opera\xe7\xe3o;Execuo").unwrap();

        let decoded = fix_encoding(&input, &output).await.unwrap();
        assert_eq!(decoded.repairs, 1);
        assert_eq!(
            std::fs::read_to_string(&output).unwrap(),
            "Diretoria de Operação;Execução"
        );
    }
}
