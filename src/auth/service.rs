//! Login, token refresh and self-service password changes.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use super::jwt::{BOOTSTRAP_USER_ID, Principal, TokenIssuer, TokenKind, TokenPair};
use super::password::PasswordHasher;
use crate::config::BootstrapAdminConfig;
use crate::error::{AuthError, Error};
use crate::store::GraphStore;
use crate::users::model::{Role, User, normalize_email};

/// Body of a successful login.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    #[serde(flatten)]
    pub tokens: TokenPair,
    pub user: Me,
}

/// `GET /auth/me`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Me {
    pub user_id: String,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub company: Option<String>,
    pub department: Option<String>,
    pub job_role: Option<String>,
    pub force_password_change: bool,
}

impl Me {
    fn from_user(user: &User) -> Self {
        Self {
            user_id: user.id.clone(),
            email: user.email.clone(),
            name: user.name.clone(),
            role: user.role,
            company: user.company.clone(),
            department: user.department.clone(),
            job_role: user.job_title.clone(),
            force_password_change: user.force_password_change,
        }
    }

    fn bootstrap(principal: &Principal) -> Self {
        Self {
            user_id: principal.user_id.clone(),
            email: principal.email.clone(),
            name: "Administrador".into(),
            role: Role::Admin,
            company: None,
            department: None,
            job_role: None,
            force_password_change: false,
        }
    }
}

fn principal_for(user: &User) -> Principal {
    Principal {
        user_id: user.id.clone(),
        email: user.email.clone(),
        role: user.role,
        organization_type: user.organization_type,
    }
}

pub struct AuthService {
    store: Arc<dyn GraphStore>,
    issuer: Arc<TokenIssuer>,
    hasher: PasswordHasher,
    bootstrap: BootstrapAdminConfig,
}

impl AuthService {
    pub fn new(
        store: Arc<dyn GraphStore>,
        issuer: Arc<TokenIssuer>,
        hasher: PasswordHasher,
        bootstrap: BootstrapAdminConfig,
    ) -> Self {
        Self {
            store,
            issuer,
            hasher,
            bootstrap,
        }
    }

    pub fn issuer(&self) -> Arc<TokenIssuer> {
        Arc::clone(&self.issuer)
    }

    fn bootstrap_principal(&self) -> Principal {
        Principal {
            user_id: BOOTSTRAP_USER_ID.into(),
            email: self.bootstrap.email.clone(),
            role: Role::Admin,
            organization_type: self.bootstrap.organization_type,
        }
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, Error> {
        let email = normalize_email(email);
        if email.is_empty() || password.is_empty() {
            return Err(Error::Validation("email and password are required".into()));
        }

        if self.bootstrap.matches(&email, password) {
            let principal = self.bootstrap_principal();
            info!(email = %email, "Bootstrap administrator logged in");
            return Ok(LoginResponse {
                tokens: self.issuer.issue_pair(&principal)?,
                user: Me::bootstrap(&principal),
            });
        }

        let Some(user) = self.store.find_user_by_email(&email).await? else {
            warn!(email = %email, "Login for unknown email");
            return Err(AuthError::InvalidCredentials.into());
        };
        if !self.hasher.verify_blocking(password, &user.password_hash).await {
            warn!(email = %email, "Login with wrong password");
            return Err(AuthError::InvalidCredentials.into());
        }

        info!(email = %email, role = %user.role, "User logged in");
        Ok(LoginResponse {
            tokens: self.issuer.issue_pair(&principal_for(&user))?,
            user: Me::from_user(&user),
        })
    }

    /// Exchange a refresh token for a new pair, re-reading the user so role
    /// changes take effect.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, Error> {
        let claims = self.issuer.verify(refresh_token, TokenKind::Refresh)?;
        let principal = claims.principal();
        if principal.is_bootstrap() {
            if !self.bootstrap.enabled {
                return Err(AuthError::InvalidToken("bootstrap administrator disabled".into()).into());
            }
            return Ok(self.issuer.issue_pair(&self.bootstrap_principal())?);
        }
        let user = self
            .store
            .find_user_by_id(&principal.user_id)
            .await?
            .ok_or_else(|| AuthError::InvalidToken("user no longer exists".into()))?;
        Ok(self.issuer.issue_pair(&principal_for(&user))?)
    }

    pub async fn me(&self, principal: &Principal) -> Result<Me, Error> {
        if principal.is_bootstrap() {
            return Ok(Me::bootstrap(principal));
        }
        let user = self
            .store
            .find_user_by_id(&principal.user_id)
            .await?
            .ok_or_else(|| AuthError::UserNotFound(principal.email.clone()))?;
        Ok(Me::from_user(&user))
    }

    /// Replace the caller's password and clear `forcePasswordChange`.
    pub async fn change_password(
        &self,
        principal: &Principal,
        current: &str,
        new: &str,
    ) -> Result<(), Error> {
        if principal.is_bootstrap() {
            return Err(AuthError::BootstrapAccount.into());
        }
        PasswordHasher::validate(new)?;
        let user = self
            .store
            .find_user_by_id(&principal.user_id)
            .await?
            .ok_or_else(|| AuthError::UserNotFound(principal.email.clone()))?;
        if !self.hasher.verify_blocking(current, &user.password_hash).await {
            return Err(AuthError::InvalidCredentials.into());
        }
        let hash = self.hasher.hash_blocking(new).await?;
        self.store.set_password(&user.email, &hash, false).await?;
        info!(email = %user.email, "Password changed");
        Ok(())
    }
}
