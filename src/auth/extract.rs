//! Request extractors for authenticated endpoints.

use std::sync::Arc;

use axum::extract::{FromRef, FromRequestParts};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use super::jwt::{Principal, TokenIssuer, TokenKind};
use crate::error::{AuthError, Error};

/// Token from an `Authorization: Bearer <token>` header.
fn bearer_token(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() {
        Some(token.trim())
    } else {
        None
    }
}

/// Any caller with a valid access token.
#[derive(Debug, Clone)]
pub struct AuthUser(pub Principal);

impl<S> FromRequestParts<S> for AuthUser
where
    Arc<TokenIssuer>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or(AuthError::MissingToken)?;
        let issuer = Arc::<TokenIssuer>::from_ref(state);
        let claims = issuer.verify(token, TokenKind::Access)?;
        Ok(Self(claims.principal()))
    }
}

/// A caller whose role is admin (`admin` or `Administrador`).
#[derive(Debug, Clone)]
pub struct AdminUser(pub Principal);

impl<S> FromRequestParts<S> for AdminUser
where
    Arc<TokenIssuer>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let AuthUser(principal) = AuthUser::from_request_parts(parts, state).await?;
        if !principal.is_admin() {
            return Err(AuthError::Forbidden("administrator role required".into()).into());
        }
        Ok(Self(principal))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::http::Request;

    use super::*;
    use crate::users::model::{OrganizationType, Role};

    fn issuer() -> Arc<TokenIssuer> {
        Arc::new(TokenIssuer::new(
            b"0123456789abcdef0123456789abcdef",
            Duration::from_secs(60),
            Duration::from_secs(120),
        ))
    }

    fn parts(auth: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/auth/me");
        if let Some(value) = auth {
            builder = builder.header(AUTHORIZATION, value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    fn principal(role: Role) -> Principal {
        Principal {
            user_id: "u-1".into(),
            email: "ana@acme.com".into(),
            role,
            organization_type: OrganizationType::Cvc,
        }
    }

    #[tokio::test]
    async fn missing_header_is_rejected() {
        let state = issuer();
        let err = AuthUser::from_request_parts(&mut parts(None), &state)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Auth(AuthError::MissingToken)));

        let err = AuthUser::from_request_parts(&mut parts(Some("Basic abc")), &state)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Auth(AuthError::MissingToken)));
    }

    #[tokio::test]
    async fn bearer_token_is_verified() {
        let state = issuer();
        let token = state.issue(&principal(Role::User), TokenKind::Access).unwrap();
        let header = format!("bearer {token}");
        let AuthUser(p) = AuthUser::from_request_parts(&mut parts(Some(&header)), &state)
            .await
            .unwrap();
        assert_eq!(p.email, "ana@acme.com");
    }

    #[tokio::test]
    async fn refresh_token_is_not_an_access_token() {
        let state = issuer();
        let token = state.issue(&principal(Role::User), TokenKind::Refresh).unwrap();
        let header = format!("Bearer {token}");
        let err = AuthUser::from_request_parts(&mut parts(Some(&header)), &state)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Auth(AuthError::InvalidToken(_))));
    }

    #[tokio::test]
    async fn admin_requires_admin_role() {
        let state = issuer();
        let user = state.issue(&principal(Role::User), TokenKind::Access).unwrap();
        let err = AdminUser::from_request_parts(
            &mut parts(Some(&format!("Bearer {user}"))),
            &state,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Auth(AuthError::Forbidden(_))));

        let admin = state.issue(&principal(Role::Admin), TokenKind::Access).unwrap();
        assert!(
            AdminUser::from_request_parts(&mut parts(Some(&format!("Bearer {admin}"))), &state)
                .await
                .is_ok()
        );
    }
}
