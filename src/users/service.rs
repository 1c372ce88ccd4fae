//! Account administration shared by the admin API and the CLI.

use std::sync::Arc;

use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::model::{NewUser, OrganizationType, Role, User, UserUpdate, is_valid_email, normalize_email};
use crate::auth::PasswordHasher;
use crate::error::{AuthError, DatabaseError, Error};
use crate::store::GraphStore;

/// Length of generated temporary passwords.
const TEMP_PASSWORD_LEN: usize = 12;

/// Input for creating an account.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUser {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub organization_type: OrganizationType,
    pub company: Option<String>,
    pub department: Option<String>,
    pub job_title: Option<String>,
    #[serde(default)]
    pub force_password_change: bool,
}

/// Outcome of an admin password reset. The temporary password is only
/// returned when the server generated it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordReset {
    pub email: String,
    pub temporary_password: Option<String>,
}

/// Outcome of a bulk reset over a fixed list of emails.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkResetReport {
    pub reset: Vec<String>,
    pub missing: Vec<String>,
}

pub struct UserService {
    store: Arc<dyn GraphStore>,
    hasher: PasswordHasher,
}

impl UserService {
    pub fn new(store: Arc<dyn GraphStore>, hasher: PasswordHasher) -> Self {
        Self { store, hasher }
    }

    pub async fn create(&self, input: CreateUser) -> Result<User, Error> {
        let email = normalize_email(&input.email);
        if !is_valid_email(&email) {
            return Err(AuthError::InvalidEmail(input.email).into());
        }
        let name = input.name.trim();
        if name.is_empty() {
            return Err(Error::Validation("name is required".into()));
        }
        if self.store.find_user_by_email(&email).await?.is_some() {
            return Err(AuthError::EmailTaken(email).into());
        }

        let password_hash = self.hasher.hash_blocking(&input.password).await?;
        let company = non_empty(input.company);
        let department = non_empty(input.department);
        let user = self
            .store
            .create_user(&NewUser {
                email: email.clone(),
                name: name.to_string(),
                password_hash,
                role: input.role,
                organization_type: input.organization_type,
                company: company.clone(),
                department: department.clone(),
                job_title: non_empty(input.job_title),
                force_password_change: input.force_password_change,
            })
            .await
            .map_err(|e| match e {
                DatabaseError::Constraint(_) => Error::from(AuthError::EmailTaken(email.clone())),
                other => other.into(),
            })?;

        if let Some(company) = &company {
            self.store.link_organization(&email, company).await?;
        }
        if let Some(department) = &department {
            self.store.link_department(&email, department).await?;
        }
        info!(email = %email, role = %user.role, "User created");
        Ok(user)
    }

    pub async fn list(&self) -> Result<Vec<User>, Error> {
        Ok(self.store.list_users().await?)
    }

    pub async fn get(&self, id: &str) -> Result<User, Error> {
        self.store
            .find_user_by_id(id)
            .await?
            .ok_or_else(|| not_found(id))
    }

    pub async fn update(&self, id: &str, update: UserUpdate) -> Result<User, Error> {
        if update.is_empty() {
            return Err(Error::Validation("no fields to update".into()));
        }
        if update.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(Error::Validation("name must not be empty".into()));
        }
        let user = self
            .store
            .update_user(id, &update)
            .await?
            .ok_or_else(|| not_found(id))?;
        if let Some(company) = update.company.as_deref().filter(|c| !c.trim().is_empty()) {
            self.store.link_organization(&user.email, company.trim()).await?;
        }
        if let Some(department) = update.department.as_deref().filter(|d| !d.trim().is_empty()) {
            self.store.link_department(&user.email, department.trim()).await?;
        }
        info!(email = %user.email, "User updated");
        Ok(user)
    }

    pub async fn delete(&self, id: &str) -> Result<(), Error> {
        if !self.store.delete_user(id).await? {
            return Err(not_found(id));
        }
        info!(user_id = %id, "User deleted");
        Ok(())
    }

    /// Set a new password for user `id` and force a change on next login.
    /// Generates a temporary password when `new_password` is None.
    pub async fn reset_password(
        &self,
        id: &str,
        new_password: Option<String>,
    ) -> Result<PasswordReset, Error> {
        let user = self.get(id).await?;
        let (password, generated) = match new_password {
            Some(p) => (p, false),
            None => (temporary_password(), true),
        };
        let hash = self.hasher.hash_blocking(&password).await?;
        self.store.set_password(&user.email, &hash, true).await?;
        info!(email = %user.email, "Password reset");
        Ok(PasswordReset {
            email: user.email,
            temporary_password: generated.then_some(password),
        })
    }

    /// Create the administrator if missing, then make sure it belongs to its
    /// organization. Returns the user and whether it was created.
    pub async fn seed_admin(
        &self,
        email: &str,
        name: &str,
        password: &str,
        organization_type: OrganizationType,
        company: &str,
    ) -> Result<(User, bool), Error> {
        let email = normalize_email(email);
        let (user, created) = match self.store.find_user_by_email(&email).await? {
            Some(existing) => {
                warn!(email = %email, "Admin already exists, ensuring organization link");
                (existing, false)
            }
            None => {
                let user = self
                    .create(CreateUser {
                        name: name.to_string(),
                        email: email.clone(),
                        password: password.to_string(),
                        role: Role::Admin,
                        organization_type,
                        company: Some(company.to_string()),
                        department: None,
                        job_title: None,
                        force_password_change: true,
                    })
                    .await?;
                (user, true)
            }
        };
        self.store.link_organization(&email, company).await?;
        Ok((user, created))
    }

    /// Reset every listed account to `password` with a forced change.
    /// Unless `allow_partial`, nothing is written when any email is unknown.
    pub async fn reset_passwords(
        &self,
        emails: &[String],
        password: &str,
        allow_partial: bool,
    ) -> Result<BulkResetReport, Error> {
        let mut report = BulkResetReport::default();
        let mut found = Vec::new();
        for email in emails.iter().map(|e| normalize_email(e)) {
            match self.store.find_user_by_email(&email).await? {
                Some(user) => found.push(user.email),
                None => report.missing.push(email),
            }
        }
        if !report.missing.is_empty() && !allow_partial {
            return Err(AuthError::UserNotFound(report.missing.join(", ")).into());
        }

        let hash = self.hasher.hash_blocking(password).await?;
        for email in found {
            if self.store.set_password(&email, &hash, true).await? {
                report.reset.push(email);
            }
        }
        info!(
            reset = report.reset.len(),
            missing = report.missing.len(),
            "Bulk password reset finished"
        );
        Ok(report)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn not_found(id: &str) -> Error {
    DatabaseError::NotFound {
        entity: "User".into(),
        id: id.to_string(),
    }
    .into()
}

fn temporary_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TEMP_PASSWORD_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LibSqlBackend;

    async fn service() -> UserService {
        let store: Arc<dyn GraphStore> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        UserService::new(store, PasswordHasher::new(4))
    }

    fn input(email: &str) -> CreateUser {
        CreateUser {
            name: "Ana Silva".into(),
            email: email.into(),
            password: "senha123".into(),
            role: Role::User,
            organization_type: OrganizationType::Cvc,
            company: Some("Acme".into()),
            department: Some("Finanças".into()),
            job_title: None,
            force_password_change: false,
        }
    }

    #[tokio::test]
    async fn create_normalizes_and_rejects_duplicates() {
        let users = service().await;
        let user = users.create(input(" Ana@Acme.com ")).await.unwrap();
        assert_eq!(user.email, "ana@acme.com");

        let err = users.create(input("ANA@acme.com")).await.unwrap_err();
        assert!(matches!(err, Error::Auth(AuthError::EmailTaken(_))));
        assert_eq!(users.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn create_validates_input() {
        let users = service().await;
        let err = users.create(input("not-an-email")).await.unwrap_err();
        assert!(matches!(err, Error::Auth(AuthError::InvalidEmail(_))));

        let mut short = input("b@acme.com");
        short.password = "123".into();
        let err = users.create(short).await.unwrap_err();
        assert!(matches!(err, Error::Auth(AuthError::WeakPassword { .. })));

        let mut nameless = input("c@acme.com");
        nameless.name = "  ".into();
        assert!(matches!(
            users.create(nameless).await.unwrap_err(),
            Error::Validation(_)
        ));
    }

    #[tokio::test]
    async fn create_links_organization_and_department() {
        let users = service().await;
        users.create(input("ana@acme.com")).await.unwrap();
        let counts = users.store.graph_counts().await.unwrap();
        assert_eq!(counts.organizations, 1);
        assert_eq!(counts.departments, 1);
        assert_eq!(counts.belongs_to, 1);
        assert_eq!(counts.member_of, 1);
    }

    #[tokio::test]
    async fn update_and_delete() {
        let users = service().await;
        let user = users.create(input("ana@acme.com")).await.unwrap();

        let err = users.update(&user.id, UserUpdate::default()).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let updated = users
            .update(
                &user.id,
                UserUpdate {
                    role: Some(Role::Admin),
                    job_title: Some("Diretora".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.role, Role::Admin);
        assert_eq!(updated.job_title.as_deref(), Some("Diretora"));

        users.delete(&user.id).await.unwrap();
        let err = users.get(&user.id).await.unwrap_err();
        assert!(matches!(err, Error::Database(DatabaseError::NotFound { .. })));
        assert!(users.delete(&user.id).await.is_err());
    }

    #[tokio::test]
    async fn reset_password_generates_when_missing() {
        let users = service().await;
        let user = users.create(input("ana@acme.com")).await.unwrap();

        let reset = users.reset_password(&user.id, None).await.unwrap();
        let temp = reset.temporary_password.unwrap();
        assert_eq!(temp.len(), TEMP_PASSWORD_LEN);

        let stored = users.get(&user.id).await.unwrap();
        assert!(stored.force_password_change);
        assert!(users.hasher.verify(&temp, &stored.password_hash));

        let reset = users
            .reset_password(&user.id, Some("escolhida".into()))
            .await
            .unwrap();
        assert!(reset.temporary_password.is_none());
    }

    #[tokio::test]
    async fn seed_admin_is_idempotent() {
        let users = service().await;
        let (admin, created) = users
            .seed_admin("admin@acme.com", "Admin", "1234", OrganizationType::Cocreate, "Acme")
            .await
            .unwrap();
        assert!(created);
        assert_eq!(admin.role, Role::Admin);

        let (again, created) = users
            .seed_admin("admin@acme.com", "Admin", "1234", OrganizationType::Cocreate, "Acme")
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(again.id, admin.id);
        assert_eq!(users.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn bulk_reset_requires_all_emails_unless_partial() {
        let users = service().await;
        users.create(input("ana@acme.com")).await.unwrap();
        let emails = vec!["ana@acme.com".to_string(), "ghost@acme.com".to_string()];

        let err = users.reset_passwords(&emails, "EKB123", false).await.unwrap_err();
        assert!(matches!(err, Error::Auth(AuthError::UserNotFound(_))));
        let ana = users.store.find_user_by_email("ana@acme.com").await.unwrap().unwrap();
        assert!(!ana.force_password_change);

        let report = users.reset_passwords(&emails, "EKB123", true).await.unwrap();
        assert_eq!(report.reset, vec!["ana@acme.com"]);
        assert_eq!(report.missing, vec!["ghost@acme.com"]);
        let ana = users.store.find_user_by_email("ana@acme.com").await.unwrap().unwrap();
        assert!(ana.force_password_change);
    }
}
