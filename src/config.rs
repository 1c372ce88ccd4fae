//! Configuration loaded from the environment.
//!
//! Every binary entry point (server and maintenance commands) goes through
//! [`EksConfig::from_env`]; nothing reads credentials from source. A `.env`
//! file in the working directory is honored when present.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::error::ConfigError;
use crate::users::model::OrganizationType;

/// Minimum accepted length for `JWT_SECRET`.
pub const MIN_JWT_SECRET_LEN: usize = 32;

/// Password given to ingested users when `INGEST_DEFAULT_PASSWORD` is unset.
pub const DEFAULT_INGEST_PASSWORD: &str = "EKB123";

/// Complete service configuration.
#[derive(Debug, Clone)]
pub struct EksConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub auth: AuthConfig,
    pub bootstrap: BootstrapAdminConfig,
    pub ingest: IngestConfig,
    pub log: LogConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origin: String,
}

/// Which graph store backs the service.
#[derive(Debug, Clone)]
pub enum StoreConfig {
    /// Embedded libSQL file, used for local development.
    LibSql { path: PathBuf },
    /// Neo4j over Bolt.
    Neo4j(Neo4jConfig),
}

#[derive(Debug, Clone)]
pub struct Neo4jConfig {
    pub uri: String,
    pub username: String,
    pub password: SecretString,
    pub database: String,
}

/// Token signing and password hashing.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: SecretString,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub bcrypt_cost: u32,
}

/// Local administrator that can log in before any user exists.
///
/// Enabled only when `BOOTSTRAP_ADMIN_PASSWORD` is set, unless
/// `BOOTSTRAP_ADMIN_ENABLED` says otherwise. There is no built-in password.
#[derive(Debug, Clone)]
pub struct BootstrapAdminConfig {
    pub enabled: bool,
    pub email: String,
    pub password: SecretString,
    pub organization_type: OrganizationType,
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Password given to users created by CSV ingestion. They must change it.
    pub default_password: SecretString,
    pub max_file_size_mb: u64,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Fallback filter when `RUST_LOG` is not set.
    pub level: String,
    /// When set, logs are also written to a daily-rolling file here.
    pub dir: Option<PathBuf>,
}

impl EksConfig {
    /// Load configuration from the process environment (and `.env`).
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                tracing::warn!("Ignoring unreadable .env file: {e}");
            }
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an explicit map. Used by tests.
    pub fn from_map(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        Self::from_lookup(|key| vars.get(key).cloned())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(&get);

        let server = ServerConfig {
            host: env.string_or("HOST", "0.0.0.0"),
            port: env.parse_or("PORT", 3001u16)?,
            cors_origin: env.string_or("CORS_ORIGIN", "http://localhost:3000"),
        };

        let store = match env.optional("EKS_STORE").as_deref() {
            Some("libsql") => StoreConfig::LibSql {
                path: PathBuf::from(env.string_or("EKS_DB_PATH", "./data/eks.db")),
            },
            Some("neo4j") => StoreConfig::Neo4j(neo4j_config(&env)?),
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "EKS_STORE".into(),
                    message: format!("expected 'neo4j' or 'libsql', got '{other}'"),
                });
            }
            None if env.optional("NEO4J_URI").is_some() => StoreConfig::Neo4j(neo4j_config(&env)?),
            None => StoreConfig::LibSql {
                path: PathBuf::from(env.string_or("EKS_DB_PATH", "./data/eks.db")),
            },
        };

        let jwt_secret = env.required("JWT_SECRET")?;
        if jwt_secret.chars().count() < MIN_JWT_SECRET_LEN {
            return Err(ConfigError::InvalidValue {
                key: "JWT_SECRET".into(),
                message: format!("must be at least {MIN_JWT_SECRET_LEN} characters"),
            });
        }

        let auth = AuthConfig {
            jwt_secret: SecretString::from(jwt_secret),
            access_ttl: env.duration_or("JWT_EXPIRES_IN", "7d")?,
            refresh_ttl: env.duration_or("JWT_REFRESH_EXPIRES_IN", "30d")?,
            bcrypt_cost: env.parse_or("BCRYPT_COST", bcrypt::DEFAULT_COST)?,
        };
        if !(4..=31).contains(&auth.bcrypt_cost) {
            return Err(ConfigError::InvalidValue {
                key: "BCRYPT_COST".into(),
                message: "must be between 4 and 31".into(),
            });
        }

        let organization_type = env.string_or("BOOTSTRAP_ADMIN_ORGANIZATION_TYPE", "cvc");
        let bootstrap_password = env.optional("BOOTSTRAP_ADMIN_PASSWORD");
        let enabled = env.bool_or("BOOTSTRAP_ADMIN_ENABLED", bootstrap_password.is_some())?;
        let bootstrap_password = match bootstrap_password {
            Some(password) => password,
            None if enabled => {
                return Err(ConfigError::MissingEnvVar("BOOTSTRAP_ADMIN_PASSWORD".into()));
            }
            None => String::new(),
        };
        let bootstrap = BootstrapAdminConfig {
            enabled,
            email: env
                .string_or("BOOTSTRAP_ADMIN_EMAIL", "admin@admin.com.br")
                .trim()
                .to_lowercase(),
            password: SecretString::from(bootstrap_password),
            organization_type: organization_type.parse().map_err(|message| {
                ConfigError::InvalidValue {
                    key: "BOOTSTRAP_ADMIN_ORGANIZATION_TYPE".into(),
                    message,
                }
            })?,
        };

        let ingest = IngestConfig {
            default_password: SecretString::from(
                env.string_or("INGEST_DEFAULT_PASSWORD", DEFAULT_INGEST_PASSWORD),
            ),
            max_file_size_mb: env.parse_or("MAX_FILE_SIZE_MB", 10u64)?,
        };

        let log = LogConfig {
            level: env.string_or("LOG_LEVEL", "info"),
            dir: env.optional("LOG_DIR").map(PathBuf::from),
        };

        Ok(Self {
            server,
            store,
            auth,
            bootstrap,
            ingest,
            log,
        })
    }

    /// Short description of the store for startup banners. Never includes secrets.
    pub fn store_label(&self) -> String {
        match &self.store {
            StoreConfig::LibSql { path } => format!("libsql ({})", path.display()),
            StoreConfig::Neo4j(neo) => format!("neo4j ({} / {})", neo.uri, neo.database),
        }
    }
}

impl IngestConfig {
    /// Whether ingested users get the well-known built-in password.
    pub fn uses_builtin_password(&self) -> bool {
        self.default_password.expose_secret() == DEFAULT_INGEST_PASSWORD
    }
}

impl BootstrapAdminConfig {
    /// Whether `email`/`password` match the configured bootstrap admin.
    pub fn matches(&self, email: &str, password: &str) -> bool {
        self.enabled && self.email == email && self.password.expose_secret() == password
    }
}

fn neo4j_config(env: &Env<'_>) -> Result<Neo4jConfig, ConfigError> {
    Ok(Neo4jConfig {
        uri: env.required("NEO4J_URI")?,
        username: env.required("NEO4J_USERNAME")?,
        password: SecretString::from(env.required("NEO4J_PASSWORD")?),
        database: env.string_or("NEO4J_DATABASE", "neo4j"),
    })
}

/// Parse a duration like `7d`, `12h`, `30m`, `45s` or a bare number of seconds.
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    let (digits, unit) = match value.char_indices().find(|(_, c)| !c.is_ascii_digit()) {
        Some((idx, _)) => value.split_at(idx),
        None => (value, "s"),
    };
    let amount: u64 = digits.parse().ok()?;
    let secs = match unit {
        "s" => amount,
        "m" => amount * 60,
        "h" => amount * 3600,
        "d" => amount * 86_400,
        _ => return None,
    };
    Some(Duration::from_secs(secs))
}

struct Env<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Env<'_> {
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.optional(key)
            .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
    }

    fn string_or(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    fn parse_or<T: std::str::FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T::Err: std::fmt::Display,
    {
        match self.optional(key) {
            Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            }),
            None => Ok(default),
        }
    }

    fn bool_or(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.optional(key).map(|v| v.trim().to_lowercase()).as_deref() {
            None => Ok(default),
            Some("true" | "1" | "yes") => Ok(true),
            Some("false" | "0" | "no") => Ok(false),
            Some(other) => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("expected a boolean, got '{other}'"),
            }),
        }
    }

    fn duration_or(&self, key: &str, default: &str) -> Result<Duration, ConfigError> {
        let raw = self.string_or(key, default);
        parse_duration(&raw).ok_or_else(|| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{raw}' is not a duration (use e.g. 7d, 12h, 30m)"),
        })
    }
}
