//! User accounts and the values attached to them.

use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Access role. Only two roles exist; legacy data also spells admin as
/// `Administrador`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    #[default]
    User,
}

impl Role {
    /// Lenient parse used for stored values and CSV cells.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "admin" | "administrador" => Self::Admin,
            _ => Self::User,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::User => "user",
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Self::Admin)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kind of organization a user belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OrganizationType {
    Cocreate,
    #[default]
    Cvc,
    Startup,
    Client,
}

impl OrganizationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cocreate => "cocreate",
            Self::Cvc => "cvc",
            Self::Startup => "startup",
            Self::Client => "client",
        }
    }
}

impl FromStr for OrganizationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cocreate" => Ok(Self::Cocreate),
            "cvc" => Ok(Self::Cvc),
            "startup" => Ok(Self::Startup),
            "client" => Ok(Self::Client),
            other => Err(format!(
                "unknown organization type '{other}' (expected cocreate, cvc, startup or client)"
            )),
        }
    }
}

impl std::fmt::Display for OrganizationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored user. The password hash never leaves the process.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub organization_type: OrganizationType,
    pub company: Option<String>,
    pub department: Option<String>,
    pub job_title: Option<String>,
    #[serde(skip)]
    pub password_hash: String,
    pub force_password_change: bool,
    pub status: Option<String>,
    pub relationship_type: Option<String>,
    pub access_types: Vec<String>,
    pub position_validated: bool,
    pub position_validated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a single account (admin API and CLI).
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub role: Role,
    pub organization_type: OrganizationType,
    pub company: Option<String>,
    pub department: Option<String>,
    pub job_title: Option<String>,
    pub force_password_change: bool,
}

/// Partial update applied by `PATCH /admin/users/{id}`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserUpdate {
    pub name: Option<String>,
    pub role: Option<Role>,
    pub organization_type: Option<OrganizationType>,
    pub company: Option<String>,
    pub department: Option<String>,
    pub job_title: Option<String>,
    pub status: Option<String>,
}

impl UserUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.role.is_none()
            && self.organization_type.is_none()
            && self.company.is_none()
            && self.department.is_none()
            && self.job_title.is_none()
            && self.status.is_none()
    }
}

/// One person as described by an org-chart roster row.
#[derive(Debug, Clone, PartialEq)]
pub struct RosterUser {
    pub email: String,
    pub name: String,
    pub company: String,
    pub job_title: String,
    pub department: String,
    pub role: Role,
    pub status: String,
    pub relationship_type: String,
    pub access_types: Vec<String>,
}

/// Result of merging a roster row into the user set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub user_id: String,
    pub created: bool,
}

/// Trim and lower-case an email address; the identity key for users.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap_or_else(|_| unreachable!())
});

/// Loose shape check: one `@` and a dotted domain, no whitespace.
pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_labels() {
        assert_eq!(Role::from_label("admin"), Role::Admin);
        assert_eq!(Role::from_label(" Administrador "), Role::Admin);
        assert_eq!(Role::from_label("ADMIN"), Role::Admin);
        assert_eq!(Role::from_label("user"), Role::User);
        assert_eq!(Role::from_label("gestor"), Role::User);
        assert_eq!(Role::from_label(""), Role::User);
    }

    #[test]
    fn role_serde_matches_display() {
        for role in [Role::Admin, Role::User] {
            let json = serde_json::to_value(role).unwrap();
            assert_eq!(json.as_str().unwrap(), role.to_string());
        }
    }

    #[test]
    fn organization_type_parse() {
        assert_eq!("CVC".parse::<OrganizationType>().unwrap(), OrganizationType::Cvc);
        assert_eq!(
            "cocreate".parse::<OrganizationType>().unwrap(),
            OrganizationType::Cocreate
        );
        assert!("agency".parse::<OrganizationType>().is_err());
    }

    #[test]
    fn email_shape() {
        assert!(is_valid_email("ana.silva@acme.com.br"));
        assert!(!is_valid_email("ana.silva"));
        assert!(!is_valid_email("ana@localhost"));
        assert!(!is_valid_email("ana silva@acme.com"));
        assert!(!is_valid_email(""));
    }

    #[test]
    fn emails_normalize() {
        assert_eq!(normalize_email("  Ana.Silva@Example.COM "), "ana.silva@example.com");
    }

    #[test]
    fn password_hash_is_not_serialized() {
        let now = Utc::now();
        let user = User {
            id: "u1".into(),
            email: "a@b.com".into(),
            name: "A".into(),
            role: Role::User,
            organization_type: OrganizationType::Cvc,
            company: None,
            department: None,
            job_title: None,
            password_hash: "$2b$10$secret".into(),
            force_password_change: true,
            status: None,
            relationship_type: None,
            access_types: vec![],
            position_validated: false,
            position_validated_at: None,
            created_at: now,
            updated_at: now,
        };
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("secret"));
        assert!(json.contains("forcePasswordChange"));
    }
}
